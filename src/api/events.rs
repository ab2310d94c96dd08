//! Device-traffic events reported by the network-server. Every event is
//! enriched with the device and application names and handed to the
//! multi-handler.

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use lrwn::{AES128Key, DevAddr, EUI64};
use serde::{Deserialize, Serialize};
use tracing::{span, Instrument, Level};

use super::ApiState;
use crate::errors::Error;
use crate::handler::{
    AckNotification, DataUpPayload, ErrorNotification, JoinNotification, MultiHandler, RxInfo,
    TxInfo,
};
use crate::helpers::{dev_addr, hex_encode};
use crate::storage::{self, device_activation, Application, Device, DeviceActivation};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UplinkRequest {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(rename = "devEUI")]
    pub dev_eui: EUI64,
    #[serde(deserialize_with = "dev_addr::deserialize")]
    pub dev_addr: DevAddr,
    pub app_s_key: AES128Key,
    pub nwk_s_key: AES128Key,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AckRequest {
    #[serde(rename = "devEUI")]
    pub dev_eui: EUI64,
    pub acknowledged: bool,
    pub f_cnt: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorRequest {
    #[serde(rename = "devEUI")]
    pub dev_eui: EUI64,
    #[serde(rename = "type")]
    pub error_type: String,
    pub error: String,
    pub f_cnt: u32,
}

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/api/uplink", post(handle_uplink))
        .route("/api/join", post(handle_join))
        .route("/api/ack", post(handle_ack))
        .route("/api/error", post(handle_error))
}

async fn handle_uplink(State(s): State<ApiState>, b: Bytes) -> Result<StatusCode, Error> {
    let req: UplinkRequest = serde_json::from_slice(&b)?;

    let span = span!(Level::INFO, "uplink", dev_eui = %req.dev_eui, f_cnt = req.f_cnt);
    _handle_uplink(&s.handler, req).instrument(span).await?;
    Ok(StatusCode::OK)
}

async fn _handle_uplink(h: &MultiHandler, req: UplinkRequest) -> Result<(), Error> {
    let (d, app) = get_device_and_application(&req.dev_eui).await?;

    h.send_data_up(&DataUpPayload {
        application_id: app.id,
        application_name: app.name,
        device_name: d.name,
        dev_eui: d.dev_eui,
        rx_info: req.rx_info,
        tx_info: req.tx_info,
        adr: req.adr,
        f_cnt: req.f_cnt,
        f_port: req.f_port,
        data: req.data,
    })
    .await
}

async fn handle_join(State(s): State<ApiState>, b: Bytes) -> Result<StatusCode, Error> {
    let req: JoinRequest = serde_json::from_slice(&b)?;

    let span = span!(Level::INFO, "join", dev_eui = %req.dev_eui, dev_addr = %req.dev_addr);
    _handle_join(&s.handler, req).instrument(span).await?;
    Ok(StatusCode::OK)
}

async fn _handle_join(h: &MultiHandler, req: JoinRequest) -> Result<(), Error> {
    let (d, app) = get_device_and_application(&req.dev_eui).await?;

    // The activation is recorded before anyone is notified of the session.
    device_activation::create(DeviceActivation {
        id: Default::default(),
        dev_eui: d.dev_eui,
        dev_addr: req.dev_addr,
        app_s_key: req.app_s_key,
        nwk_s_key: req.nwk_s_key,
        created_at: Default::default(),
    })
    .await?;

    h.send_join_notification(&JoinNotification {
        application_id: app.id,
        application_name: app.name,
        device_name: d.name,
        dev_eui: d.dev_eui,
        dev_addr: req.dev_addr,
    })
    .await
}

async fn handle_ack(State(s): State<ApiState>, b: Bytes) -> Result<StatusCode, Error> {
    let req: AckRequest = serde_json::from_slice(&b)?;

    let span = span!(Level::INFO, "ack", dev_eui = %req.dev_eui, f_cnt = req.f_cnt);
    _handle_ack(&s.handler, req).instrument(span).await?;
    Ok(StatusCode::OK)
}

async fn _handle_ack(h: &MultiHandler, req: AckRequest) -> Result<(), Error> {
    let (d, app) = get_device_and_application(&req.dev_eui).await?;

    h.send_ack_notification(&AckNotification {
        application_id: app.id,
        application_name: app.name,
        device_name: d.name,
        dev_eui: d.dev_eui,
        acknowledged: req.acknowledged,
        f_cnt: req.f_cnt,
    })
    .await
}

async fn handle_error(State(s): State<ApiState>, b: Bytes) -> Result<StatusCode, Error> {
    let req: ErrorRequest = serde_json::from_slice(&b)?;

    let span = span!(Level::INFO, "error", dev_eui = %req.dev_eui, error_type = %req.error_type);
    _handle_error(&s.handler, req).instrument(span).await?;
    Ok(StatusCode::OK)
}

async fn _handle_error(h: &MultiHandler, req: ErrorRequest) -> Result<(), Error> {
    let (d, app) = get_device_and_application(&req.dev_eui).await?;

    h.send_error_notification(&ErrorNotification {
        application_id: app.id,
        application_name: app.name,
        device_name: d.name,
        dev_eui: d.dev_eui,
        error_type: req.error_type,
        error: req.error,
        f_cnt: req.f_cnt,
    })
    .await
}

async fn get_device_and_application(dev_eui: &EUI64) -> Result<(Device, Application), Error> {
    let d = storage::device::get(dev_eui).await?;
    let app = storage::application::get(&d.application_id).await?;
    Ok((d, app))
}
