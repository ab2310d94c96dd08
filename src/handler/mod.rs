//! Delivery of device-traffic notifications to the application backends.
//!
//! A [`Handler`] is one delivery backend (MQTT, HTTP webhook, ...). The
//! [`multi::MultiHandler`] combines the process-wide handlers with the handlers
//! configured per application through integrations, and delivers every event
//! to all of them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lrwn::{DevAddr, EUI64};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::helpers::{dev_addr, hex_encode};

pub mod http;
pub mod mqtt;
pub mod multi;

pub use multi::{MultiHandler, Registry};

/// Version of the serialized event record.
pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    DataUp,
    Join,
    Ack,
    Error,
}

impl EventKind {
    /// Last segment of the MQTT topic for this kind of event.
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            EventKind::DataUp => "rx",
            EventKind::Join => "join",
            EventKind::Ack => "ack",
            EventKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RxInfo {
    #[serde(rename = "gatewayID")]
    pub gateway_id: EUI64,
    pub name: String,
    pub time: Option<DateTime<Utc>>,
    pub rssi: i32,
    #[serde(rename = "loRaSNR")]
    pub lora_snr: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInfo {
    pub frequency: u32,
    pub dr: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUpPayload {
    #[serde(rename = "applicationID")]
    pub application_id: Uuid,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: EUI64,
    pub rx_info: Vec<RxInfo>,
    pub tx_info: TxInfo,
    pub adr: bool,
    pub f_cnt: u32,
    pub f_port: u8,
    #[serde(with = "hex_encode")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinNotification {
    #[serde(rename = "applicationID")]
    pub application_id: Uuid,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: EUI64,
    #[serde(deserialize_with = "dev_addr::deserialize")]
    pub dev_addr: DevAddr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckNotification {
    #[serde(rename = "applicationID")]
    pub application_id: Uuid,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: EUI64,
    pub acknowledged: bool,
    pub f_cnt: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotification {
    #[serde(rename = "applicationID")]
    pub application_id: Uuid,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: EUI64,
    #[serde(rename = "type")]
    pub error_type: String,
    pub error: String,
    pub f_cnt: u32,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    version: u32,
    kind: EventKind,
    #[serde(flatten)]
    payload: &'a T,
}

/// Serializes the payload into the versioned JSON event record shared by all
/// backends.
pub fn marshal<T: Serialize>(kind: EventKind, payload: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Envelope {
        version: PAYLOAD_VERSION,
        kind,
        payload,
    })?)
}

/// A single notification, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    DataUp(&'a DataUpPayload),
    Join(&'a JoinNotification),
    Ack(&'a AckNotification),
    Error(&'a ErrorNotification),
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DataUp(_) => EventKind::DataUp,
            Event::Join(_) => EventKind::Join,
            Event::Ack(_) => EventKind::Ack,
            Event::Error(_) => EventKind::Error,
        }
    }

    pub fn application_id(&self) -> Uuid {
        match self {
            Event::DataUp(pl) => pl.application_id,
            Event::Join(pl) => pl.application_id,
            Event::Ack(pl) => pl.application_id,
            Event::Error(pl) => pl.application_id,
        }
    }

    pub fn dev_eui(&self) -> EUI64 {
        match self {
            Event::DataUp(pl) => pl.dev_eui,
            Event::Join(pl) => pl.dev_eui,
            Event::Ack(pl) => pl.dev_eui,
            Event::Error(pl) => pl.dev_eui,
        }
    }

    /// Hands the event to the matching send method of the handler.
    pub async fn send_to(&self, h: &dyn Handler) -> Result<()> {
        match self {
            Event::DataUp(pl) => h.send_data_up(pl).await,
            Event::Join(pl) => h.send_join_notification(pl).await,
            Event::Ack(pl) => h.send_ack_notification(pl).await,
            Event::Error(pl) => h.send_error_notification(pl).await,
        }
    }
}

/// A delivery backend.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name under which delivery failures are reported.
    fn name(&self) -> &str;

    async fn send_data_up(&self, pl: &DataUpPayload) -> Result<()>;
    async fn send_join_notification(&self, pl: &JoinNotification) -> Result<()>;
    async fn send_ack_notification(&self, pl: &AckNotification) -> Result<()>;
    async fn send_error_notification(&self, pl: &ErrorNotification) -> Result<()>;

    /// Releases held connections. Must be safe to call when nothing was
    /// sent.
    async fn close(&self) -> Result<()>;
}
