use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::Configuration;
use crate::errors::Error;
use crate::handler::MultiHandler;
use crate::sync::Synchronizer;

pub mod events;
pub mod resources;

#[derive(Clone)]
pub struct ApiState {
    pub sync: Arc<Synchronizer>,
    pub handler: Arc<MultiHandler>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_backends: Vec<String>,
}

pub async fn setup(conf: &Configuration, state: ApiState) -> Result<()> {
    let addr: SocketAddr = conf.api.bind.parse()?;
    let app = router(state);

    if conf.api.tls_cert.is_empty() && conf.api.tls_key.is_empty() {
        info!(bind = %addr, "Starting HTTP API interface");
        serve_http(addr, app).await?;
    } else {
        info!(bind = %addr, tls_cert = %conf.api.tls_cert, tls_key = %conf.api.tls_key, "Starting HTTPS API interface");
        serve_https(addr, &conf.api.tls_cert, &conf.api.tls_key, app).await?;
    }

    Ok(())
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .merge(events::router())
        .merge(resources::router())
        .with_state(state)
}

async fn serve_http(addr: SocketAddr, app: Router) -> Result<()> {
    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn serve_https(addr: SocketAddr, tls_cert: &str, tls_key: &str, app: Router) -> Result<()> {
    let config =
        RustlsConfig::from_pem_file(PathBuf::from(tls_cert), PathBuf::from(tls_key)).await?;

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = err_to_status_code(&self);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Handling request failed");
        } else {
            warn!(error = %self, "Handling request failed");
        }

        let failed_backends = match &self {
            Error::PartialDelivery(failures) => {
                failures.iter().map(|f| f.backend.clone()).collect()
            }
            _ => Vec::new(),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                failed_backends,
            }),
        )
            .into_response()
    }
}

fn err_to_status_code(e: &Error) -> StatusCode {
    match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) | Error::SerdeJson(_) | Error::Lrwn(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::PartialDelivery(_)
        | Error::RemoteCall { .. }
        | Error::UnreachableEndpoint(_)
        | Error::Connection(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
pub mod test {
    use std::time::Duration;

    use axum::body::{Body, Bytes};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::errors::{Operation, ResourceKind};
    use crate::handler::{http, Handler, Registry};
    use crate::nsclient;
    use crate::test::NetworkServerClient;

    /// API state backed by the recording network-server client, with the
    /// webhook handler registered.
    pub fn state() -> (Arc<NetworkServerClient>, ApiState) {
        let (client, sync) = crate::test::new_synchronizer(Duration::from_secs(1));

        let mut registry = Registry::default();
        let http_client = reqwest::Client::new();
        registry.register(
            http::KIND,
            Box::new(move |settings| {
                let h: Arc<dyn Handler> =
                    Arc::new(http::Handler::from_settings(settings, http_client.clone())?);
                Ok(h)
            }),
        );

        (
            client,
            ApiState {
                sync: Arc::new(sync),
                handler: Arc::new(MultiHandler::new(
                    Vec::new(),
                    registry,
                    Duration::from_secs(5),
                )),
            },
        )
    }

    pub async fn request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Bytes) {
        let body = match body {
            Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
            None => Body::empty(),
        };

        let resp = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let b = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, b)
    }

    #[test]
    fn test_err_to_status_code() {
        assert_eq!(
            StatusCode::NOT_FOUND,
            err_to_status_code(&Error::NotFound("x".into()))
        );
        assert_eq!(
            StatusCode::BAD_REQUEST,
            err_to_status_code(&Error::Validation("x".into()))
        );
        assert_eq!(
            StatusCode::CONFLICT,
            err_to_status_code(&Error::Conflict("x".into()))
        );
        assert_eq!(
            StatusCode::BAD_GATEWAY,
            err_to_status_code(&Error::PartialDelivery(vec![]))
        );
        assert_eq!(
            StatusCode::BAD_GATEWAY,
            err_to_status_code(&Error::RemoteCall {
                kind: ResourceKind::Device,
                operation: Operation::Create,
                source: nsclient::Error::NotFound,
            })
        );
        assert_eq!(
            StatusCode::GATEWAY_TIMEOUT,
            err_to_status_code(&Error::Timeout {
                kind: ResourceKind::Device,
                operation: Operation::Create,
            })
        );
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            err_to_status_code(&Error::Anyhow(anyhow!("boom")))
        );
    }
}
