use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lrwn::EUI64;
use reqwest::Url;
use rumqttc::{
    AsyncClient, Event as MqttEvent, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration,
    Transport,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    marshal, AckNotification, DataUpPayload, ErrorNotification, EventKind, Handler as HandlerTrait,
    JoinNotification,
};
use crate::config;

pub const NAME: &str = "MQTT";

// Time given to the event loop to flush the disconnect before it is aborted.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Publishes every notification on the MQTT broker. The connection is owned
/// by a background task which reconnects on failure.
pub struct Handler {
    client: AsyncClient,
    qos: QoS,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Handler {
    pub fn new(conf: &config::Mqtt) -> Result<Handler> {
        let opts = mqtt_options(conf)?;
        let (client, mut event_loop) = AsyncClient::new(opts, 100);
        let reconnect_interval = conf.reconnect_interval;
        let server = conf.server.clone();

        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                        info!(server = %server, "Connected to MQTT broker");
                    }
                    Ok(MqttEvent::Outgoing(Outgoing::Disconnect)) => {
                        info!(server = %server, "Disconnected from MQTT broker");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(server = %server, error = %e, "MQTT connection error");
                        tokio::time::sleep(reconnect_interval).await;
                    }
                }
            }
        });

        Ok(Handler {
            client,
            qos: qos(conf.qos)?,
            event_loop: Mutex::new(Some(task)),
        })
    }

    async fn publish<T: Serialize + Sync>(
        &self,
        application_id: Uuid,
        dev_eui: EUI64,
        kind: EventKind,
        pl: &T,
    ) -> Result<()> {
        let topic = topic(application_id, dev_eui, kind);
        let b = marshal(kind, pl)?;

        debug!(topic = %topic, "Publishing event");
        self.client
            .publish(topic.clone(), self.qos, false, b)
            .await
            .with_context(|| format!("Publish to {}", topic))
    }
}

#[async_trait]
impl HandlerTrait for Handler {
    fn name(&self) -> &str {
        NAME
    }

    async fn send_data_up(&self, pl: &DataUpPayload) -> Result<()> {
        self.publish(pl.application_id, pl.dev_eui, EventKind::DataUp, pl)
            .await
    }

    async fn send_join_notification(&self, pl: &JoinNotification) -> Result<()> {
        self.publish(pl.application_id, pl.dev_eui, EventKind::Join, pl)
            .await
    }

    async fn send_ack_notification(&self, pl: &AckNotification) -> Result<()> {
        self.publish(pl.application_id, pl.dev_eui, EventKind::Ack, pl)
            .await
    }

    async fn send_error_notification(&self, pl: &ErrorNotification) -> Result<()> {
        self.publish(pl.application_id, pl.dev_eui, EventKind::Error, pl)
            .await
    }

    async fn close(&self) -> Result<()> {
        let task = self
            .event_loop
            .lock()
            .map_err(|e| anyhow!("MQTT event-loop lock error: {}", e))?
            .take();

        if let Some(mut task) = task {
            info!("Closing MQTT connection");
            // try_disconnect does not block on a full request channel.
            if let Err(e) = self.client.try_disconnect() {
                warn!(error = %e, "Queue MQTT disconnect error");
            }

            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!("MQTT event-loop did not stop in time, aborting");
                task.abort();
            }
        }

        Ok(())
    }
}

/// Topic on which an event of the given device is published.
pub fn topic(application_id: Uuid, dev_eui: EUI64, kind: EventKind) -> String {
    format!(
        "application/{}/node/{}/{}",
        application_id,
        hex::encode(dev_eui.to_be_bytes()),
        kind.topic_suffix()
    )
}

fn qos(v: u8) -> Result<QoS> {
    Ok(match v {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => return Err(anyhow!("Invalid MQTT QoS: {}", v)),
    })
}

fn mqtt_options(conf: &config::Mqtt) -> Result<MqttOptions> {
    let url = Url::parse(&conf.server).context("Parse MQTT server")?;
    let host = match url.host_str() {
        Some(v) if !v.is_empty() => v,
        _ => return Err(anyhow!("MQTT server has no host: {}", conf.server)),
    };
    let tls = matches!(url.scheme(), "ssl" | "tls" | "mqtts");
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    let client_id = if conf.client_id.is_empty() {
        format!("simple-app-server-{}", &Uuid::new_v4().simple().to_string()[..8])
    } else {
        conf.client_id.clone()
    };

    let mut opts = MqttOptions::new(client_id, host, port);
    opts.set_keep_alive(conf.keep_alive);
    opts.set_clean_session(conf.clean_session);
    if !conf.username.is_empty() {
        opts.set_credentials(&conf.username, &conf.password);
    }

    if tls || !conf.ca_cert.is_empty() || !conf.tls_cert.is_empty() {
        opts.set_transport(Transport::Tls(tls_configuration(conf)?));
    }

    Ok(opts)
}

fn tls_configuration(conf: &config::Mqtt) -> Result<TlsConfiguration> {
    let client_auth = if !conf.tls_cert.is_empty() && !conf.tls_key.is_empty() {
        Some((
            fs::read(&conf.tls_cert).context("Read MQTT TLS certificate")?,
            fs::read(&conf.tls_key).context("Read MQTT TLS key")?,
        ))
    } else {
        None
    };

    if conf.ca_cert.is_empty() && client_auth.is_none() {
        // System root certificates.
        return Ok(TlsConfiguration::default());
    }
    if conf.ca_cert.is_empty() {
        return Err(anyhow!("MQTT client certificate requires ca_cert"));
    }

    Ok(TlsConfiguration::Simple {
        ca: fs::read(&conf.ca_cert).context("Read MQTT CA certificate")?,
        alpn: None,
        client_auth,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_topic() {
        let app_id = Uuid::parse_str("f2a3c1e0-0000-4000-8000-000000000001").unwrap();
        let dev_eui = EUI64::from_be_bytes([1, 1, 1, 1, 1, 1, 1, 1]);

        assert_eq!(
            "application/f2a3c1e0-0000-4000-8000-000000000001/node/0101010101010101/rx",
            topic(app_id, dev_eui, EventKind::DataUp)
        );
        assert_eq!(
            "application/f2a3c1e0-0000-4000-8000-000000000001/node/0101010101010101/join",
            topic(app_id, dev_eui, EventKind::Join)
        );
        assert_eq!(
            "application/f2a3c1e0-0000-4000-8000-000000000001/node/0101010101010101/ack",
            topic(app_id, dev_eui, EventKind::Ack)
        );
        assert_eq!(
            "application/f2a3c1e0-0000-4000-8000-000000000001/node/0101010101010101/error",
            topic(app_id, dev_eui, EventKind::Error)
        );

        // hex is lowercase
        let dev_eui = EUI64::from_be_bytes([0xab, 0xcd, 0xef, 1, 2, 3, 4, 5]);
        assert!(topic(app_id, dev_eui, EventKind::DataUp).contains("/abcdef0102030405/"));
    }

    #[test]
    fn test_qos() {
        assert_eq!(QoS::AtMostOnce, qos(0).unwrap());
        assert_eq!(QoS::ExactlyOnce, qos(2).unwrap());
        assert!(qos(3).is_err());
    }

    #[test]
    fn test_mqtt_options() {
        let conf = config::Mqtt {
            server: "tcp://broker:1884".into(),
            client_id: "test-client".into(),
            username: "user".into(),
            password: "secret".into(),
            ..Default::default()
        };

        let opts = mqtt_options(&conf).unwrap();
        assert_eq!(("broker".to_string(), 1884), opts.broker_address());
        assert_eq!("test-client", opts.client_id());
        assert_eq!(
            Some(("user".to_string(), "secret".to_string())),
            opts.credentials()
        );

        let conf = config::Mqtt {
            server: "tcp://".into(),
            ..Default::default()
        };
        assert!(mqtt_options(&conf).is_err());
    }

    #[tokio::test]
    async fn test_close_without_connection() {
        let h = Handler::new(&config::Mqtt {
            server: "tcp://127.0.0.1:1".into(),
            ..Default::default()
        })
        .unwrap();

        // the disconnect is never flushed, close is bounded by the timeout
        let start = std::time::Instant::now();
        h.close().await.unwrap();
        assert!(start.elapsed() < DISCONNECT_TIMEOUT + Duration::from_secs(1));

        // second close is a no-op
        let start = std::time::Instant::now();
        h.close().await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
