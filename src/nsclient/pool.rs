use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Url;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use super::http::HttpClient;
use super::NetworkServerClient;
use crate::errors::Error;
use crate::storage::NetworkServer;

/// Resolves a network-server to a client connected to it.
pub trait Pool: Send + Sync {
    fn get(&self, ns: &NetworkServer) -> Result<Arc<dyn NetworkServerClient>, Error>;

    /// Drops the cached client, if any.
    fn evict(&self, network_server_id: &Uuid);
}

struct CachedClient {
    fingerprint: String,
    client: Arc<HttpClient>,
}

/// Caches one HTTP client per network-server. A client is replaced when the
/// address or credentials of the network-server change.
pub struct HttpPool {
    timeout: Duration,
    clients: RwLock<HashMap<Uuid, CachedClient>>,
}

impl HttpPool {
    pub fn new(timeout: Duration) -> Self {
        HttpPool {
            timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn client(&self, ns: &NetworkServer) -> Result<Arc<HttpClient>, Error> {
        let fingerprint = fingerprint(ns);

        {
            let clients = self
                .clients
                .read()
                .map_err(|e| anyhow!("Client pool lock error: {}", e))?;
            if let Some(c) = clients.get(&ns.id) {
                if c.fingerprint == fingerprint {
                    return Ok(c.client.clone());
                }
            }
        }

        // Construct under the write lock so that concurrent callers for the
        // same network-server end up with the same client.
        let mut clients = self
            .clients
            .write()
            .map_err(|e| anyhow!("Client pool lock error: {}", e))?;
        if let Some(c) = clients.get(&ns.id) {
            if c.fingerprint == fingerprint {
                return Ok(c.client.clone());
            }
        }

        let client = Arc::new(self.new_client(ns)?);
        info!(network_server_id = %ns.id, base_url = %client.base_url(), "Network-server client created");

        clients.insert(
            ns.id,
            CachedClient {
                fingerprint,
                client: client.clone(),
            },
        );

        Ok(client)
    }

    fn new_client(&self, ns: &NetworkServer) -> Result<HttpClient, Error> {
        let base_url = base_url(ns)?;

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .use_rustls_tls();

        if !ns.ca_cert.is_empty() {
            let cert = reqwest::Certificate::from_pem(ns.ca_cert.as_bytes())
                .map_err(|e| Error::Connection(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if !ns.tls_cert.is_empty() && !ns.tls_key.is_empty() {
            let pem = format!("{}\n{}", ns.tls_cert, ns.tls_key);
            let identity = reqwest::Identity::from_pem(pem.as_bytes())
                .map_err(|e| Error::Connection(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(HttpClient::new(base_url, client))
    }
}

impl Pool for HttpPool {
    fn get(&self, ns: &NetworkServer) -> Result<Arc<dyn NetworkServerClient>, Error> {
        Ok(self.client(ns)?)
    }

    fn evict(&self, network_server_id: &Uuid) {
        if let Ok(mut clients) = self.clients.write() {
            clients.remove(network_server_id);
        }
    }
}

fn base_url(ns: &NetworkServer) -> Result<Url, Error> {
    let server = ns.server.trim();
    if server.is_empty() {
        return Err(Error::UnreachableEndpoint(format!(
            "network-server {} has no server address",
            ns.id
        )));
    }

    let url = if server.contains("://") {
        server.to_string()
    } else if ns.ca_cert.is_empty() && ns.tls_cert.is_empty() {
        format!("http://{}", server)
    } else {
        format!("https://{}", server)
    };

    let mut url = Url::parse(&url)
        .map_err(|e| Error::UnreachableEndpoint(format!("{}: {}", server, e)))?;
    if url.host_str().is_none() {
        return Err(Error::UnreachableEndpoint(format!(
            "{}: missing host",
            server
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

fn fingerprint(ns: &NetworkServer) -> String {
    let mut h = Sha256::new();
    for v in [&ns.server, &ns.ca_cert, &ns.tls_cert, &ns.tls_key] {
        h.update((v.len() as u64).to_be_bytes());
        h.update(v.as_bytes());
    }
    hex::encode(h.finalize())
}

#[cfg(test)]
mod test {
    use std::sync::Barrier;
    use std::thread;

    use super::*;

    fn network_server(server: &str) -> NetworkServer {
        NetworkServer {
            id: Uuid::new_v4(),
            name: "test-ns".into(),
            server: server.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_url() {
        let ns = network_server("test-ns:1234");
        assert_eq!("http://test-ns:1234/", base_url(&ns).unwrap().as_str());

        let ns = NetworkServer {
            ca_cert: "CACERT".into(),
            ..network_server("test-ns:1234")
        };
        assert_eq!("https://test-ns:1234/", base_url(&ns).unwrap().as_str());

        let ns = network_server("https://ns.example.com/v1");
        assert_eq!(
            "https://ns.example.com/v1/",
            base_url(&ns).unwrap().as_str()
        );

        let ns = network_server("  ");
        assert!(matches!(base_url(&ns), Err(Error::UnreachableEndpoint(_))));
    }

    #[test]
    fn test_pool_caching() {
        let pool = HttpPool::new(Duration::from_secs(1));
        let mut ns = network_server("test-ns:1234");

        let c1 = pool.client(&ns).unwrap();
        let c2 = pool.client(&ns).unwrap();
        assert!(Arc::ptr_eq(&c1, &c2));

        // other network-server, other client
        let c3 = pool.client(&network_server("test-ns:1234")).unwrap();
        assert!(!Arc::ptr_eq(&c1, &c3));

        // changing the endpoint replaces the cached client
        ns.server = "test-ns:4321".into();
        let c4 = pool.client(&ns).unwrap();
        assert!(!Arc::ptr_eq(&c1, &c4));
        assert_eq!("http://test-ns:4321/", c4.base_url().as_str());
        assert!(Arc::ptr_eq(&c4, &pool.client(&ns).unwrap()));

        pool.evict(&ns.id);
        assert!(!Arc::ptr_eq(&c4, &pool.client(&ns).unwrap()));
    }

    #[test]
    fn test_pool_concurrent_get() {
        let pool = HttpPool::new(Duration::from_secs(1));
        let ns = network_server("test-ns:1234");
        let barrier = Barrier::new(16);

        let clients: Vec<Arc<HttpClient>> = thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        pool.client(&ns).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // a single client is constructed and shared
        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
    }

    #[test]
    fn test_pool_unreachable() {
        let pool = HttpPool::new(Duration::from_secs(1));
        let res = pool.get(&network_server(""));
        assert!(matches!(res, Err(Error::UnreachableEndpoint(_))));
    }

    #[test]
    fn test_fingerprint() {
        let ns = network_server("test-ns:1234");
        let ns2 = NetworkServer {
            tls_cert: "TLSCERT".into(),
            ..ns.clone()
        };
        let ns3 = NetworkServer {
            routing_profile_tls_cert: "RPTLSCERT".into(),
            ..ns.clone()
        };

        assert_ne!(fingerprint(&ns), fingerprint(&ns2));
        // routing-profile credentials are not used for the connection
        assert_eq!(fingerprint(&ns), fingerprint(&ns3));
    }
}
