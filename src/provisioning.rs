use crate::protocol::mac::normalize_mac;
use crate::qingping_api::PRODUCT_AIR_MONITOR_LITE;
use crate::qingping_api::developer_client::DeveloperApiTrait;
use crate::qingping_api::error::CloudApiError;
use crate::qingping_api::models::private_config::{
    MqttConfig, NETWORK_TYPE_SELF_HOSTED_MQTT, PrivateConfig,
};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// The broker devices should connect to, as written into the private config.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub config_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    Created,
    Updated,
    Reused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Bound,
    AlreadyBound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub config_id: u64,
    pub config: ConfigAction,
    pub device: DeviceAction,
}

/// Points devices at this bridge through the developer portal.
///
/// Every step reads the portal before writing, so running a sequence again after a partial
/// failure picks up where it stopped.
pub struct Provisioner<T: DeveloperApiTrait> {
    pub api: T,
    /// Pause between unbind and bind on `rebind`.
    pub rebind_delay: Duration,
}

impl<T: DeveloperApiTrait> Provisioner<T> {
    pub fn new(api: T) -> Self {
        Self {
            api,
            rebind_delay: Duration::from_secs(1),
        }
    }

    pub async fn ensure_provisioned(
        &self,
        credentials: &Credentials,
        broker: &BrokerConfig,
        target_mac: &str,
    ) -> Result<ProvisionOutcome, CloudApiError> {
        let mac = normalize_mac(target_mac)?;
        self.api.login(&credentials.email, &credentials.password).await?;
        let (config_id, config) = self.resolve_config(broker).await?;

        let bound = self.api.list_devices(true, PRODUCT_AIR_MONITOR_LITE).await?;
        let already_bound = bound.iter().any(|d| {
            normalize_mac(&d.mac).is_ok_and(|m| m == mac) && d.bound_config_id() == Some(config_id)
        });

        let device = if already_bound {
            info!(mac = %mac, config_id, "device already bound");
            DeviceAction::AlreadyBound
        } else {
            self.api.bind_devices(&[mac.clone()], config_id).await?;
            DeviceAction::Bound
        };

        Ok(ProvisionOutcome {
            config_id,
            config,
            device,
        })
    }

    /// Unbinds then binds again so the device downloads its configuration anew.
    pub async fn rebind(
        &self,
        credentials: &Credentials,
        broker: &BrokerConfig,
        mac: &str,
    ) -> Result<ProvisionOutcome, CloudApiError> {
        let mac = normalize_mac(mac)?;
        self.api.login(&credentials.email, &credentials.password).await?;
        let (config_id, config) = self.resolve_config(broker).await?;

        let macs = [mac.clone()];
        if let Err(e) = self.api.unbind_devices(&macs).await {
            warn!(mac = %mac, error = %e, "could not unbind device, binding anyway");
        }
        tokio::time::sleep(self.rebind_delay).await;
        self.api.bind_devices(&macs, config_id).await?;

        Ok(ProvisionOutcome {
            config_id,
            config,
            device: DeviceAction::Bound,
        })
    }

    /// Binds every Air Monitor Lite on the account that has no private config yet.
    /// Returns the MACs that were bound.
    pub async fn provision_unbound(
        &self,
        credentials: &Credentials,
        broker: &BrokerConfig,
    ) -> Result<Vec<String>, CloudApiError> {
        self.api.login(&credentials.email, &credentials.password).await?;
        let (config_id, _) = self.resolve_config(broker).await?;

        let unbound = self.api.list_devices(false, PRODUCT_AIR_MONITOR_LITE).await?;
        if unbound.is_empty() {
            info!("no unbound devices found");
            return Ok(Vec::new());
        }

        let mut provisioned = Vec::new();
        for device in unbound {
            let Ok(mac) = normalize_mac(&device.mac) else {
                warn!(mac = %device.mac, "skipping device with malformed MAC");
                continue;
            };
            match self.api.bind_devices(&[mac.clone()], config_id).await {
                Ok(()) => provisioned.push(mac),
                Err(e) => error!(mac = %mac, error = %e, "failed to bind device"),
            }
        }
        info!(count = provisioned.len(), "provisioned devices");
        Ok(provisioned)
    }

    /// Finds the config for this broker by host and port, fixing or creating it as needed.
    async fn resolve_config(&self, broker: &BrokerConfig) -> Result<(u64, ConfigAction), CloudApiError> {
        let desired = MqttConfig::self_hosted(
            &broker.host,
            broker.port,
            &broker.username,
            &broker.password,
        );
        let configs = self.api.list_configs().await?;
        let existing = configs
            .into_iter()
            .find(|c| c.mqtt().is_some_and(|m| m.same_broker(&broker.host, broker.port)));

        match existing {
            Some(existing) => {
                let id = existing.id.ok_or(CloudApiError::Missing("config id"))?;
                if existing.mqtt().is_some_and(|m| m.same_connection(&desired)) {
                    info!(name = %existing.name, id, "reusing private config");
                    return Ok((id, ConfigAction::Reused));
                }
                let mut updated = existing;
                updated.network_config.network_type = NETWORK_TYPE_SELF_HOSTED_MQTT;
                updated.network_config.mqtt_config = Some(desired);
                self.api.update_config(&updated).await?;
                Ok((id, ConfigAction::Updated))
            }
            None => {
                info!(host = %broker.host, port = broker.port, "no matching config, creating one");
                let config = PrivateConfig::self_hosted_mqtt(
                    &broker.config_name,
                    PRODUCT_AIR_MONITOR_LITE,
                    desired,
                );
                let id = self.api.create_config(&config).await?;
                Ok((id, ConfigAction::Created))
            }
        }
    }
}
