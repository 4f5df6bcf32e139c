use crate::protocol::mac::normalize_mac;
use crate::qingping_api::error::CloudApiError;
use crate::qingping_api::models::request::DeviceSettingsRequest;
use crate::qingping_api::models::response::TokenResponse;
use crate::qingping_api::read_json;
use moka::future::Cache;
use reqwest::{Response, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

pub const OAUTH_URL: &str = "https://oauth.cleargrass.com/oauth2/token";
pub const CLOUD_API_BASE: &str = "https://apis.cleargrass.com/v1/apis";

const TOKEN_KEY: &str = "access_token";
const RESYNC_REPORT_INTERVAL: u64 = 60;

/// Asks the vendor cloud to push configuration to a device again.
pub trait CloudResync: Clone + Send + Sync + 'static {
    fn trigger_device_sync(&self, mac: &str) -> impl Future<Output = Result<(), CloudApiError>> + Send;
}

/// Client-credentials client for the legacy cloud API.
#[derive(Clone)]
pub struct CloudClient {
    client: reqwest::Client,
    app_key: String,
    app_secret: String,
    api_base: String,
    token_cache: Cache<&'static str, String>,
}

impl CloudClient {
    pub fn new(
        app_key: &str,
        app_secret: &str,
        token_ttl: Duration,
        request_timeout: Duration,
    ) -> Result<Self, CloudApiError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(request_timeout).build()?,
            app_key: app_key.to_string(),
            app_secret: app_secret.to_string(),
            api_base: CLOUD_API_BASE.to_string(),
            token_cache: Cache::builder()
                .max_capacity(1)
                .time_to_live(token_ttl)
                .build(),
        })
    }

    async fn authenticate(&self) -> Result<String, CloudApiError> {
        let response = self
            .client
            .post(OAUTH_URL)
            .basic_auth(&self.app_key, Some(&self.app_secret))
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", "device_full_access"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CloudApiError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token = read_json::<TokenResponse>(response).await?;
        info!(expires_in = ?token.expires_in, "authenticated with cloud API");
        Ok(token.access_token)
    }

    async fn access_token(&self) -> Result<String, CloudApiError> {
        self.token_cache
            .try_get_with(TOKEN_KEY, self.authenticate())
            .await
            .map_err(|e| CloudApiError::Auth(e.to_string()))
    }

    async fn put_settings(&self, token: &str, body: &DeviceSettingsRequest) -> Result<Response, CloudApiError> {
        Ok(self
            .client
            .put(format!("{}/devices/settings", self.api_base))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?)
    }

    /// Updates settings through the cloud. A rejected token is refreshed and the call retried once.
    pub async fn update_device_settings(
        &self,
        mac: &str,
        settings: Map<String, Value>,
    ) -> Result<(), CloudApiError> {
        let mac = normalize_mac(mac)?;
        let body = DeviceSettingsRequest {
            mac: vec![mac.clone()],
            settings,
        };

        let mut response = self.put_settings(&self.access_token().await?, &body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(mac = %mac, "cloud token rejected, re-authenticating");
            self.token_cache.invalidate(TOKEN_KEY).await;
            response = self.put_settings(&self.access_token().await?, &body).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(CloudApiError::Status { status, body });
        }
        info!(mac = %mac, "cloud settings updated");
        Ok(())
    }
}

impl CloudResync for CloudClient {
    async fn trigger_device_sync(&self, mac: &str) -> Result<(), CloudApiError> {
        info!(mac = %mac, "triggering cloud sync");
        let mut settings = Map::new();
        settings.insert(
            "report_interval".to_string(),
            Value::from(RESYNC_REPORT_INTERVAL),
        );
        self.update_device_settings(mac, settings).await
    }
}
