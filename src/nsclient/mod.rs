//! Client side of the network-server control-plane API.
//!
//! The application-server mirrors routing-profiles, service-profiles,
//! device-profiles and devices on the network-server. Every operation maps to
//! exactly one remote call. Deleting a resource which no longer exists on the
//! network-server is reported as [`Error::NotFound`] so that callers can treat
//! deletes as idempotent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::helpers::hex_encode;
use crate::storage::{DeviceProfileSettings, ServiceProfileSettings};

pub mod http;
pub mod pool;

pub use pool::{HttpPool, Pool};

#[derive(Error, Debug)]
pub enum Error {
    #[error("object does not exist")]
    NotFound,

    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingProfile {
    pub routing_profile_id: Uuid,
    pub as_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoutingProfileRequest {
    pub routing_profile: RoutingProfile,
    pub ca_cert: String,
    pub tls_cert: String,
    pub tls_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRoutingProfileRequest {
    pub routing_profile: RoutingProfile,
    pub ca_cert: String,
    pub tls_cert: String,
    pub tls_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRoutingProfileRequest {
    pub routing_profile_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub service_profile_id: Uuid,
    #[serde(flatten)]
    pub settings: ServiceProfileSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServiceProfileRequest {
    pub service_profile: ServiceProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateServiceProfileRequest {
    pub service_profile: ServiceProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteServiceProfileRequest {
    pub service_profile_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_profile_id: Uuid,
    #[serde(flatten)]
    pub settings: DeviceProfileSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDeviceProfileRequest {
    pub device_profile: DeviceProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDeviceProfileRequest {
    pub device_profile: DeviceProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDeviceProfileRequest {
    pub device_profile_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(with = "hex_encode")]
    pub dev_eui: Vec<u8>,
    pub device_profile_id: Uuid,
    pub service_profile_id: Uuid,
    pub routing_profile_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDeviceRequest {
    pub device: Device,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDeviceRequest {
    pub device: Device,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDeviceRequest {
    #[serde(with = "hex_encode")]
    pub dev_eui: Vec<u8>,
}

#[async_trait]
pub trait NetworkServerClient: Send + Sync {
    async fn create_routing_profile(&self, req: &CreateRoutingProfileRequest) -> Result<(), Error>;
    async fn update_routing_profile(&self, req: &UpdateRoutingProfileRequest) -> Result<(), Error>;
    async fn delete_routing_profile(&self, req: &DeleteRoutingProfileRequest) -> Result<(), Error>;

    async fn create_service_profile(&self, req: &CreateServiceProfileRequest) -> Result<(), Error>;
    async fn update_service_profile(&self, req: &UpdateServiceProfileRequest) -> Result<(), Error>;
    async fn delete_service_profile(&self, req: &DeleteServiceProfileRequest) -> Result<(), Error>;

    async fn create_device_profile(&self, req: &CreateDeviceProfileRequest) -> Result<(), Error>;
    async fn update_device_profile(&self, req: &UpdateDeviceProfileRequest) -> Result<(), Error>;
    async fn delete_device_profile(&self, req: &DeleteDeviceProfileRequest) -> Result<(), Error>;

    async fn create_device(&self, req: &CreateDeviceRequest) -> Result<(), Error>;
    async fn update_device(&self, req: &UpdateDeviceRequest) -> Result<(), Error>;
    async fn delete_device(&self, req: &DeleteDeviceRequest) -> Result<(), Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_device_request_json() {
        let req = CreateDeviceRequest {
            device: Device {
                dev_eui: vec![1, 2, 3, 4, 5, 6, 7, 8],
                device_profile_id: Uuid::nil(),
                service_profile_id: Uuid::nil(),
                routing_profile_id: Uuid::nil(),
            },
        };

        let v = serde_json::to_value(&req).unwrap();
        assert_eq!("0102030405060708", v["device"]["dev_eui"]);

        let req2: DeleteDeviceRequest =
            serde_json::from_str(r#"{"dev_eui": "0x0102030405060708"}"#).unwrap();
        assert_eq!(vec![1, 2, 3, 4, 5, 6, 7, 8], req2.dev_eui);
    }
}
