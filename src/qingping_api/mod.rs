pub mod cloud_client;
pub mod developer_client;
pub mod error;
pub mod models;

use crate::qingping_api::error::CloudApiError;
use reqwest::Response;
use serde::de::DeserializeOwned;

/// Product code of the Air Monitor Lite.
pub const PRODUCT_AIR_MONITOR_LITE: &str = "CGDN1";

/// Reads the body and deserializes it, keeping the raw text on failure.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, CloudApiError> {
    let status = response.status();
    let contents = response.text().await?;
    if !status.is_success() {
        return Err(CloudApiError::Status {
            status,
            body: contents,
        });
    }

    let parsed = serde_json::from_str::<T>(&contents);
    match parsed {
        Ok(value) => Ok(value),
        Err(source) => Err(CloudApiError::Deserialize {
            source,
            body: contents,
        }),
    }
}
