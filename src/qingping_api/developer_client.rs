use crate::qingping_api::error::CloudApiError;
use crate::qingping_api::models::private_config::PrivateConfig;
use crate::qingping_api::models::request::{BindDevicesRequest, UnbindDevicesRequest};
use crate::qingping_api::models::response::{
    ConfigsData, CreatedConfig, DevicesData, LoginData, PortalDevice, PortalResponse,
};
use crate::qingping_api::read_json;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Method, RequestBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const DEVELOPER_API_BASE: &str = "https://developer.cleargrass.com";

const LOGIN_SUCCESS: i64 = 0;
const REQUEST_SUCCESS: i64 = 200;

/// Developer portal operations used by provisioning.
pub trait DeveloperApiTrait: Send + Sync {
    fn login(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<LoginData, CloudApiError>> + Send;
    fn list_configs(&self) -> impl Future<Output = Result<Vec<PrivateConfig>, CloudApiError>> + Send;
    fn create_config(
        &self,
        config: &PrivateConfig,
    ) -> impl Future<Output = Result<u64, CloudApiError>> + Send;
    /// `config.id` must be set.
    fn update_config(
        &self,
        config: &PrivateConfig,
    ) -> impl Future<Output = Result<(), CloudApiError>> + Send;
    /// `had_private` selects devices that already carry a private config.
    fn list_devices(
        &self,
        had_private: bool,
        product_code: &str,
    ) -> impl Future<Output = Result<Vec<PortalDevice>, CloudApiError>> + Send;
    fn bind_devices(
        &self,
        macs: &[String],
        config_id: u64,
    ) -> impl Future<Output = Result<(), CloudApiError>> + Send;
    fn unbind_devices(&self, macs: &[String]) -> impl Future<Output = Result<(), CloudApiError>> + Send;
}

/// Session-token client for the developer portal's private-config endpoints.
#[derive(Clone)]
pub struct DeveloperClient {
    client: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl DeveloperClient {
    pub fn new(request_timeout: Duration) -> Result<Self, CloudApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert("language", HeaderValue::from_static("en-US"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://developer.qingping.co"));
        headers.insert(REFERER, HeaderValue::from_static("https://developer.qingping.co/"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("qingping-mqtt-bridge/", env!("CARGO_PKG_VERSION"))),
        );

        Ok(Self {
            client: reqwest::Client::builder()
                .default_headers(headers)
                .timeout(request_timeout)
                .build()?,
            base_url: DEVELOPER_API_BASE.to_string(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    fn config_url(&self) -> String {
        format!("{}/v1/private/config", self.base_url)
    }

    fn devices_url(&self) -> String {
        format!("{}/v1/private/devices", self.base_url)
    }

    async fn authorized(&self, method: Method, url: String) -> Result<RequestBuilder, CloudApiError> {
        let token = self.token.read().await.clone().ok_or(CloudApiError::NotLoggedIn)?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }
}

impl DeveloperApiTrait for DeveloperClient {
    async fn login(&self, email: &str, password: &str) -> Result<LoginData, CloudApiError> {
        let url = format!("{}/account/login", self.base_url);
        let response = self
            .client
            .post(url)
            .form(&[
                ("account", email),
                ("password", password),
                ("cid", ""),
                ("country_code", "86"),
            ])
            .send()
            .await?;

        let login = read_json::<PortalResponse<LoginData>>(response)
            .await?
            .into_data(LOGIN_SUCCESS)?
            .ok_or(CloudApiError::Missing("login data"))?;

        *self.token.write().await = Some(login.token.clone());
        info!(
            user = login.display_name.as_deref().unwrap_or("unknown"),
            "logged in to developer portal"
        );
        Ok(login)
    }

    async fn list_configs(&self) -> Result<Vec<PrivateConfig>, CloudApiError> {
        let response = self
            .authorized(Method::GET, self.config_url())
            .await?
            .query(&[("limit", "50"), ("offset", "0")])
            .send()
            .await?;

        let configs = read_json::<PortalResponse<ConfigsData>>(response)
            .await?
            .into_data(REQUEST_SUCCESS)?
            .unwrap_or_default()
            .configs;
        debug!(count = configs.len(), "listed private configs");
        Ok(configs)
    }

    async fn create_config(&self, config: &PrivateConfig) -> Result<u64, CloudApiError> {
        let response = self
            .authorized(Method::POST, self.config_url())
            .await?
            .json(config)
            .send()
            .await?;

        let created = read_json::<PortalResponse<CreatedConfig>>(response)
            .await?
            .into_data(REQUEST_SUCCESS)?
            .ok_or(CloudApiError::Missing("created config id"))?;
        info!(name = %config.name, id = created.id, "created private config");
        Ok(created.id)
    }

    async fn update_config(&self, config: &PrivateConfig) -> Result<(), CloudApiError> {
        let id = config.id.ok_or(CloudApiError::Missing("config id"))?;
        let response = self
            .authorized(Method::PUT, self.config_url())
            .await?
            .json(config)
            .send()
            .await?;

        read_json::<PortalResponse<serde_json::Value>>(response)
            .await?
            .into_data(REQUEST_SUCCESS)?;
        info!(name = %config.name, id, "updated private config");
        Ok(())
    }

    async fn list_devices(
        &self,
        had_private: bool,
        product_code: &str,
    ) -> Result<Vec<PortalDevice>, CloudApiError> {
        let had_private = if had_private { "true" } else { "false" };
        let response = self
            .authorized(Method::GET, self.devices_url())
            .await?
            .query(&[
                ("hadPrivate", had_private),
                ("limit", "50"),
                ("offset", "0"),
                ("productCode", product_code),
            ])
            .send()
            .await?;

        let devices = read_json::<PortalResponse<DevicesData>>(response)
            .await?
            .into_data(REQUEST_SUCCESS)?
            .unwrap_or_default()
            .devices;
        debug!(count = devices.len(), had_private, "listed portal devices");
        Ok(devices)
    }

    async fn bind_devices(&self, macs: &[String], config_id: u64) -> Result<(), CloudApiError> {
        let body = BindDevicesRequest {
            mac_list: macs,
            private_config_id: config_id,
        };
        let response = self
            .authorized(Method::PUT, self.devices_url())
            .await?
            .json(&body)
            .send()
            .await?;

        read_json::<PortalResponse<serde_json::Value>>(response)
            .await?
            .into_data(REQUEST_SUCCESS)?;
        info!(macs = ?macs, config_id, "bound devices to private config");
        Ok(())
    }

    async fn unbind_devices(&self, macs: &[String]) -> Result<(), CloudApiError> {
        let body = UnbindDevicesRequest { mac_list: macs };
        let response = self
            .authorized(Method::DELETE, self.devices_url())
            .await?
            .json(&body)
            .send()
            .await?;

        read_json::<PortalResponse<serde_json::Value>>(response)
            .await?
            .into_data(REQUEST_SUCCESS)?;
        info!(macs = ?macs, "unbound devices");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calls_before_login_are_rejected() {
        let client = DeveloperClient::new(Duration::from_secs(5)).unwrap();
        let result = client.list_configs().await;
        assert!(matches!(result, Err(CloudApiError::NotLoggedIn)));
    }
}
