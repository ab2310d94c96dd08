use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use super::*;

/// JSON over HTTP(S) implementation of the network-server control-plane API.
pub struct HttpClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(base_url: Url, client: reqwest::Client) -> Self {
        HttpClient { base_url, client }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::InvalidUrl(format!("{}{}: {}", self.base_url, path, e)))
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!(url = %url, "POST");
        check(self.client.post(url).json(body).send().await?).await
    }

    async fn put<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!(url = %url, "PUT");
        check(self.client.put(url).json(body).send().await?).await
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!(url = %url, "DELETE");
        check(self.client.delete(url).send().await?).await
    }
}

async fn check(resp: Response) -> Result<(), Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound);
    }

    let message = resp.text().await.unwrap_or_default();
    Err(Error::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl NetworkServerClient for HttpClient {
    async fn create_routing_profile(&self, req: &CreateRoutingProfileRequest) -> Result<(), Error> {
        self.post("api/routing-profiles", req).await
    }

    async fn update_routing_profile(&self, req: &UpdateRoutingProfileRequest) -> Result<(), Error> {
        self.put(
            &format!(
                "api/routing-profiles/{}",
                req.routing_profile.routing_profile_id
            ),
            req,
        )
        .await
    }

    async fn delete_routing_profile(&self, req: &DeleteRoutingProfileRequest) -> Result<(), Error> {
        self.delete(&format!("api/routing-profiles/{}", req.routing_profile_id))
            .await
    }

    async fn create_service_profile(&self, req: &CreateServiceProfileRequest) -> Result<(), Error> {
        self.post("api/service-profiles", req).await
    }

    async fn update_service_profile(&self, req: &UpdateServiceProfileRequest) -> Result<(), Error> {
        self.put(
            &format!(
                "api/service-profiles/{}",
                req.service_profile.service_profile_id
            ),
            req,
        )
        .await
    }

    async fn delete_service_profile(&self, req: &DeleteServiceProfileRequest) -> Result<(), Error> {
        self.delete(&format!("api/service-profiles/{}", req.service_profile_id))
            .await
    }

    async fn create_device_profile(&self, req: &CreateDeviceProfileRequest) -> Result<(), Error> {
        self.post("api/device-profiles", req).await
    }

    async fn update_device_profile(&self, req: &UpdateDeviceProfileRequest) -> Result<(), Error> {
        self.put(
            &format!(
                "api/device-profiles/{}",
                req.device_profile.device_profile_id
            ),
            req,
        )
        .await
    }

    async fn delete_device_profile(&self, req: &DeleteDeviceProfileRequest) -> Result<(), Error> {
        self.delete(&format!("api/device-profiles/{}", req.device_profile_id))
            .await
    }

    async fn create_device(&self, req: &CreateDeviceRequest) -> Result<(), Error> {
        self.post("api/devices", req).await
    }

    async fn update_device(&self, req: &UpdateDeviceRequest) -> Result<(), Error> {
        self.put(
            &format!("api/devices/{}", hex::encode(&req.device.dev_eui)),
            req,
        )
        .await
    }

    async fn delete_device(&self, req: &DeleteDeviceRequest) -> Result<(), Error> {
        self.delete(&format!("api/devices/{}", hex::encode(&req.dev_eui)))
            .await
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use axum::{extract::Path, http::Method, routing::any, Router};

    use super::*;

    type Seen = Arc<Mutex<Vec<(Method, String)>>>;

    async fn serve(seen: Seen) -> Url {
        let app = Router::new().route(
            "/api/*path",
            any(move |method: Method, Path(path): Path<String>| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push((method, path.clone()));
                    if path.ends_with("0000000000000000") {
                        StatusCode::NOT_FOUND
                    } else if path.starts_with("routing-profiles") {
                        StatusCode::OK
                    } else {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_http_client() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let c = HttpClient::new(serve(seen.clone()).await, reqwest::Client::new());
        let rp_id = Uuid::new_v4();

        c.create_routing_profile(&CreateRoutingProfileRequest {
            routing_profile: RoutingProfile {
                routing_profile_id: rp_id,
                as_id: "localhost:8001".into(),
            },
            ca_cert: "".into(),
            tls_cert: "".into(),
            tls_key: "".into(),
        })
        .await
        .unwrap();

        c.delete_routing_profile(&DeleteRoutingProfileRequest {
            routing_profile_id: rp_id,
        })
        .await
        .unwrap();

        let res = c
            .delete_device(&DeleteDeviceRequest {
                dev_eui: vec![0; 8],
            })
            .await;
        assert!(matches!(res, Err(Error::NotFound)));

        let res = c
            .delete_device(&DeleteDeviceRequest {
                dev_eui: vec![1, 2, 3, 4, 5, 6, 7, 8],
            })
            .await;
        assert!(matches!(res, Err(Error::Status { status: 500, .. })));

        assert_eq!(
            vec![
                (Method::POST, "routing-profiles".to_string()),
                (Method::DELETE, format!("routing-profiles/{}", rp_id)),
                (Method::DELETE, "devices/0000000000000000".to_string()),
                (Method::DELETE, "devices/0102030405060708".to_string()),
            ],
            *seen.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn test_invalid_url() {
        // a mailto URL can not be used as base for the request path
        let c = HttpClient::new(
            Url::parse("mailto:ns@example.com").unwrap(),
            reqwest::Client::new(),
        );

        let res = c
            .delete_device(&DeleteDeviceRequest {
                dev_eui: vec![1, 2, 3, 4, 5, 6, 7, 8],
            })
            .await;
        assert!(matches!(res, Err(Error::InvalidUrl(_))));
        assert!(!res.unwrap_err().is_timeout());
    }
}
