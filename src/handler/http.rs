use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    marshal, AckNotification, DataUpPayload, ErrorNotification, EventKind, Handler as HandlerTrait,
    JoinNotification,
};

/// Integration kind of the webhook handler.
pub const KIND: &str = "HTTP";

/// Integration settings of the webhook handler. Every event kind has its own
/// endpoint, an empty URL disables the kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub headers: HashMap<String, String>,
    #[serde(rename = "dataUpURL")]
    pub data_up_url: String,
    #[serde(rename = "joinNotificationURL")]
    pub join_notification_url: String,
    #[serde(rename = "ackNotificationURL")]
    pub ack_notification_url: String,
    #[serde(rename = "errorNotificationURL")]
    pub error_notification_url: String,
}

impl HandlerConfig {
    pub fn validate(&self) -> Result<()> {
        for url in [
            &self.data_up_url,
            &self.join_notification_url,
            &self.ack_notification_url,
            &self.error_notification_url,
        ] {
            if !url.is_empty() {
                Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
            }
        }
        Ok(())
    }

    fn url(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::DataUp => &self.data_up_url,
            EventKind::Join => &self.join_notification_url,
            EventKind::Ack => &self.ack_notification_url,
            EventKind::Error => &self.error_notification_url,
        }
    }
}

/// Posts every notification as JSON to the endpoint configured for its kind.
pub struct Handler {
    config: HandlerConfig,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl Handler {
    /// The client carries the request timeout and is shared between the
    /// webhook handlers of all applications.
    pub fn new(config: HandlerConfig, client: reqwest::Client) -> Result<Handler> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (k, v) in &config.headers {
            headers.insert(
                HeaderName::from_bytes(k.as_bytes())
                    .with_context(|| format!("Invalid header name: {}", k))?,
                HeaderValue::from_str(v).with_context(|| format!("Invalid header value: {}", k))?,
            );
        }

        Ok(Handler {
            config,
            headers,
            client,
        })
    }

    /// Builds a handler from stored integration settings.
    pub fn from_settings(settings: &serde_json::Value, client: reqwest::Client) -> Result<Handler> {
        let config: HandlerConfig =
            serde_json::from_value(settings.clone()).context("Decode HTTP integration settings")?;
        Handler::new(config, client)
    }

    async fn send<T: Serialize + Sync>(&self, kind: EventKind, pl: &T) -> Result<()> {
        let url = self.config.url(kind);
        if url.is_empty() {
            return Ok(());
        }

        let b = marshal(kind, pl)?;

        debug!(url = %url, kind = ?kind, "Sending event to endpoint");
        self.client
            .post(url)
            .headers(self.headers.clone())
            .body(b)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?
            .error_for_status()
            .with_context(|| format!("POST {}", url))?;

        Ok(())
    }
}

#[async_trait]
impl HandlerTrait for Handler {
    fn name(&self) -> &str {
        KIND
    }

    async fn send_data_up(&self, pl: &DataUpPayload) -> Result<()> {
        self.send(EventKind::DataUp, pl).await
    }

    async fn send_join_notification(&self, pl: &JoinNotification) -> Result<()> {
        self.send(EventKind::Join, pl).await
    }

    async fn send_ack_notification(&self, pl: &AckNotification) -> Result<()> {
        self.send(EventKind::Ack, pl).await
    }

    async fn send_error_notification(&self, pl: &ErrorNotification) -> Result<()> {
        self.send(EventKind::Error, pl).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::{Arc, Mutex};

    use axum::{
        body::Bytes,
        extract::Path,
        http::{HeaderMap as AxumHeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use lrwn::EUI64;
    use uuid::Uuid;

    use super::*;

    /// Path, authorization header and body of every received request.
    pub type Received = Arc<Mutex<Vec<(String, String, serde_json::Value)>>>;

    /// Serves `POST /{path}`, responding 500 when the path starts with
    /// `fail`.
    pub async fn serve(received: Received) -> String {
        let app = Router::new().route(
            "/:path",
            post(
                move |Path(path): Path<String>, headers: AxumHeaderMap, b: Bytes| {
                    let received = received.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        let v: serde_json::Value = serde_json::from_slice(&b).unwrap();
                        received.lock().unwrap().push((path.clone(), auth, v));

                        if path.starts_with("fail") {
                            StatusCode::INTERNAL_SERVER_ERROR
                        } else {
                            StatusCode::OK
                        }
                    }
                },
            ),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_handler_config() {
        let config: HandlerConfig = serde_json::from_str(
            r#"{"dataUpURL": "http://localhost/rx", "headers": {"Authorization": "Bearer x"}}"#,
        )
        .unwrap();
        assert_eq!("http://localhost/rx", config.data_up_url);
        assert_eq!("", config.join_notification_url);
        assert!(config.validate().is_ok());

        let config = HandlerConfig {
            ack_notification_url: "not a url".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_handler() {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let server = serve(received.clone()).await;

        let h = Handler::new(
            HandlerConfig {
                headers: [("Authorization".to_string(), "Bearer secret".to_string())].into(),
                data_up_url: format!("{}/rx", server),
                join_notification_url: format!("{}/join", server),
                ack_notification_url: format!("{}/ack", server),
                error_notification_url: format!("{}/fail-error", server),
            },
            reqwest::Client::new(),
        )
        .unwrap();

        let application_id = Uuid::new_v4();
        let dev_eui = EUI64::from_be_bytes([1, 1, 1, 1, 1, 1, 1, 1]);

        h.send_data_up(&DataUpPayload {
            application_id,
            dev_eui,
            data: vec![1, 2, 3],
            ..Default::default()
        })
        .await
        .unwrap();
        h.send_join_notification(&JoinNotification {
            application_id,
            dev_eui,
            ..Default::default()
        })
        .await
        .unwrap();
        h.send_ack_notification(&AckNotification {
            application_id,
            dev_eui,
            acknowledged: true,
            ..Default::default()
        })
        .await
        .unwrap();
        assert!(h
            .send_error_notification(&ErrorNotification {
                application_id,
                dev_eui,
                ..Default::default()
            })
            .await
            .is_err());

        let received = received.lock().unwrap();
        assert_eq!(
            vec!["rx", "join", "ack", "fail-error"],
            received.iter().map(|r| r.0.as_str()).collect::<Vec<_>>()
        );
        assert!(received.iter().all(|r| r.1 == "Bearer secret"));
        assert_eq!("dataUp", received[0].2["kind"]);
        assert_eq!("010203", received[0].2["data"]);
        assert_eq!("join", received[1].2["kind"]);
        assert_eq!(true, received[2].2["acknowledged"]);
    }

    #[tokio::test]
    async fn test_handler_unconfigured_kind() {
        let h = Handler::new(
            HandlerConfig {
                // nothing listens here, the request would fail
                data_up_url: "http://127.0.0.1:1/rx".into(),
                ..Default::default()
            },
            reqwest::Client::new(),
        )
        .unwrap();

        h.send_join_notification(&JoinNotification::default())
            .await
            .unwrap();
        assert!(h.send_data_up(&DataUpPayload::default()).await.is_err());
    }
}
