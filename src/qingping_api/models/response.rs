use crate::qingping_api::error::CloudApiError;
use crate::qingping_api::models::private_config::PrivateConfig;
use serde::Deserialize;
use serde_json::Value;

/// `{code, msg, data}` wrapper used by every developer portal endpoint.
#[derive(Deserialize, Debug)]
pub struct PortalResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

impl<T> PortalResponse<T> {
    /// The portal signals failure in `code`, often with HTTP 200.
    pub fn into_data(self, success_code: i64) -> Result<Option<T>, CloudApiError> {
        if self.code != success_code {
            return Err(CloudApiError::Api {
                code: self.code,
                msg: self.msg.unwrap_or_else(|| "Unknown error".to_string()),
            });
        }
        Ok(self.data)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct LoginData {
    pub token: String,
    #[serde(default)]
    pub qing_user_id: Option<Value>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ConfigsData {
    #[serde(default)]
    pub configs: Vec<PrivateConfig>,
}

#[derive(Deserialize, Debug)]
pub struct CreatedConfig {
    pub id: u64,
}

#[derive(Deserialize, Debug, Default)]
pub struct DevicesData {
    #[serde(default)]
    pub devices: Vec<PortalDevice>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PortalDevice {
    pub mac: String,
    #[serde(rename = "privateConfig", default)]
    pub private_config: Option<ConfigRef>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigRef {
    pub id: Option<u64>,
}

impl PortalDevice {
    pub fn bound_config_id(&self) -> Option<u64> {
        self.private_config.as_ref().and_then(|c| c.id)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}
