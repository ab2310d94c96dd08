//! Keeps local resources and their network-server counterparts in lockstep.
//!
//! Create and update write the local row first, then perform the remote call
//! inside the same database transaction: a failing remote call rolls back the
//! local change. Delete performs the remote call first and only removes the
//! local row when the network-server confirmed the delete (or did not know the
//! resource).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lrwn::EUI64;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config;
use crate::errors::{Error, Operation, ResourceKind};
use crate::nsclient::{self, Pool};
use crate::storage::{
    self, application, db_transaction, device, device_profile, network_server, service_profile,
    Device, DeviceProfile, NetworkServer, ServiceProfile,
};

/// Identity under which this application-server is known to the
/// network-servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingIdentity {
    pub id: Uuid,
    pub server: String,
}

impl From<&config::ApplicationServer> for RoutingIdentity {
    fn from(c: &config::ApplicationServer) -> Self {
        RoutingIdentity {
            id: c.id,
            server: c.public_server.clone(),
        }
    }
}

pub struct Synchronizer {
    pool: Arc<dyn Pool>,
    routing: RoutingIdentity,
    timeout: Duration,
}

impl Synchronizer {
    pub fn new(pool: Arc<dyn Pool>, routing: RoutingIdentity, timeout: Duration) -> Self {
        Synchronizer {
            pool,
            routing,
            timeout,
        }
    }

    async fn remote<F>(&self, kind: ResourceKind, operation: Operation, f: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), nsclient::Error>>,
    {
        match tokio::time::timeout(self.timeout, f).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_timeout() => {
                warn!(kind = %kind, operation = %operation, "Remote call timed out");
                Err(Error::Timeout { kind, operation })
            }
            Ok(Err(e)) => {
                warn!(kind = %kind, operation = %operation, error = %e, "Remote call failed");
                Err(Error::RemoteCall {
                    kind,
                    operation,
                    source: e,
                })
            }
            Err(_) => {
                warn!(kind = %kind, operation = %operation, timeout = ?self.timeout, "Remote call timed out");
                Err(Error::Timeout { kind, operation })
            }
        }
    }

    // Deletes are idempotent, a resource the network-server does not know
    // counts as deleted.
    async fn remote_delete<F>(&self, kind: ResourceKind, f: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), nsclient::Error>>,
    {
        match self.remote(kind, Operation::Delete, f).await {
            Err(Error::RemoteCall {
                source: nsclient::Error::NotFound,
                ..
            }) => {
                warn!(kind = %kind, "Resource does not exist on network-server, ignoring");
                Ok(())
            }
            v => v,
        }
    }

    fn routing_profile(&self) -> nsclient::RoutingProfile {
        nsclient::RoutingProfile {
            routing_profile_id: self.routing.id,
            as_id: self.routing.server.clone(),
        }
    }

    pub async fn create_network_server(&self, ns: NetworkServer) -> Result<NetworkServer, Error> {
        ns.validate()?;
        let ns_name = ns.name.clone();

        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let res = db_transaction::<NetworkServer, Error, _>(&mut c, |c| {
            Box::pin(async move {
                let ns = network_server::insert(c, ns).await?;
                let client = self.pool.get(&ns)?;

                let req = nsclient::CreateRoutingProfileRequest {
                    routing_profile: self.routing_profile(),
                    ca_cert: ns.routing_profile_ca_cert.clone(),
                    tls_cert: ns.routing_profile_tls_cert.clone(),
                    tls_key: ns.routing_profile_tls_key.clone(),
                };
                self.remote(
                    ResourceKind::RoutingProfile,
                    Operation::Create,
                    client.create_routing_profile(&req),
                )
                .await
                .inspect_err(|_| self.pool.evict(&ns.id))?;
                remote_done.store(true, Ordering::SeqCst);

                Ok(ns)
            })
        })
        .await;
        let ns = check_commit(res, remote_done, ResourceKind::RoutingProfile, &ns_name)?;

        info!(id = %ns.id, name = %ns.name, server = %ns.server, "Network-server created");
        Ok(ns)
    }

    pub async fn update_network_server(&self, ns: NetworkServer) -> Result<NetworkServer, Error> {
        ns.validate()?;

        let id = ns.id;
        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let ns = db_transaction::<NetworkServer, Error, _>(&mut c, |c| {
            Box::pin(async move {
                // Locks the row, concurrent updates wait for this transaction.
                network_server::get_for_update(c, &ns.id).await?;
                let ns = network_server::update(c, &ns).await?;
                let client = self.pool.get(&ns)?;

                let req = nsclient::UpdateRoutingProfileRequest {
                    routing_profile: self.routing_profile(),
                    ca_cert: ns.routing_profile_ca_cert.clone(),
                    tls_cert: ns.routing_profile_tls_cert.clone(),
                    tls_key: ns.routing_profile_tls_key.clone(),
                };
                self.remote(
                    ResourceKind::RoutingProfile,
                    Operation::Update,
                    client.update_routing_profile(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                Ok(ns)
            })
        })
        .await;
        let ns = check_commit(ns, remote_done, ResourceKind::RoutingProfile, &id.to_string())
            // The cached client may have been built from rolled back values.
            .inspect_err(|_| self.pool.evict(&id))?;

        info!(id = %ns.id, name = %ns.name, "Network-server updated");
        Ok(ns)
    }

    pub async fn delete_network_server(&self, id: &Uuid) -> Result<(), Error> {
        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let id = *id;
        let res = db_transaction::<(), Error, _>(&mut c, |c| {
            Box::pin(async move {
                let ns = network_server::get_for_update(c, &id).await?;

                let dependents = network_server::get_dependent_count(c, &id).await?;
                if dependents > 0 {
                    return Err(Error::Conflict(format!(
                        "network-server {} is still used by {} profile(s)",
                        id, dependents
                    )));
                }

                let client = self.pool.get(&ns)?;
                let req = nsclient::DeleteRoutingProfileRequest {
                    routing_profile_id: self.routing.id,
                };
                self.remote_delete(
                    ResourceKind::RoutingProfile,
                    client.delete_routing_profile(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                network_server::delete(c, &id).await
            })
        })
        .await;
        check_commit(res, remote_done, ResourceKind::RoutingProfile, &id.to_string())?;

        self.pool.evict(&id);
        info!(id = %id, "Network-server deleted");
        Ok(())
    }

    pub async fn create_service_profile(&self, sp: ServiceProfile) -> Result<ServiceProfile, Error> {
        sp.validate()?;
        let sp_name = sp.name.clone();

        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let res = db_transaction::<ServiceProfile, Error, _>(&mut c, |c| {
            Box::pin(async move {
                let ns = network_server::get_with_conn(c, &sp.network_server_id).await?;
                let sp = service_profile::insert(c, sp).await?;
                let client = self.pool.get(&ns)?;

                let req = nsclient::CreateServiceProfileRequest {
                    service_profile: nsclient::ServiceProfile {
                        service_profile_id: sp.id,
                        settings: sp.settings.clone(),
                    },
                };
                self.remote(
                    ResourceKind::ServiceProfile,
                    Operation::Create,
                    client.create_service_profile(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                Ok(sp)
            })
        })
        .await;
        let sp = check_commit(res, remote_done, ResourceKind::ServiceProfile, &sp_name)?;

        info!(id = %sp.id, name = %sp.name, "Service-profile created");
        Ok(sp)
    }

    pub async fn update_service_profile(&self, sp: ServiceProfile) -> Result<ServiceProfile, Error> {
        sp.validate()?;
        let id = sp.id;

        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let res = db_transaction::<ServiceProfile, Error, _>(&mut c, |c| {
            Box::pin(async move {
                let current = service_profile::get_for_update(c, &sp.id).await?;
                if current.network_server_id != sp.network_server_id
                    || current.organization_id != sp.organization_id
                {
                    return Err(Error::Validation(
                        "network_server_id and organization_id can not be changed".into(),
                    ));
                }

                let ns = network_server::get_with_conn(c, &current.network_server_id).await?;
                let sp = service_profile::update(c, &sp).await?;
                let client = self.pool.get(&ns)?;

                let req = nsclient::UpdateServiceProfileRequest {
                    service_profile: nsclient::ServiceProfile {
                        service_profile_id: sp.id,
                        settings: sp.settings.clone(),
                    },
                };
                self.remote(
                    ResourceKind::ServiceProfile,
                    Operation::Update,
                    client.update_service_profile(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                Ok(sp)
            })
        })
        .await;
        let sp = check_commit(res, remote_done, ResourceKind::ServiceProfile, &id.to_string())?;

        info!(id = %sp.id, name = %sp.name, "Service-profile updated");
        Ok(sp)
    }

    pub async fn delete_service_profile(&self, id: &Uuid) -> Result<(), Error> {
        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let id = *id;
        let res = db_transaction::<(), Error, _>(&mut c, |c| {
            Box::pin(async move {
                let sp = service_profile::get_for_update(c, &id).await?;

                let count = service_profile::get_application_count(c, &id).await?;
                if count > 0 {
                    return Err(Error::Conflict(format!(
                        "service-profile {} is still used by {} application(s)",
                        id, count
                    )));
                }

                let ns = network_server::get_with_conn(c, &sp.network_server_id).await?;
                let client = self.pool.get(&ns)?;
                let req = nsclient::DeleteServiceProfileRequest {
                    service_profile_id: id,
                };
                self.remote_delete(
                    ResourceKind::ServiceProfile,
                    client.delete_service_profile(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                service_profile::delete(c, &id).await
            })
        })
        .await;
        check_commit(res, remote_done, ResourceKind::ServiceProfile, &id.to_string())?;

        info!(id = %id, "Service-profile deleted");
        Ok(())
    }

    pub async fn create_device_profile(&self, dp: DeviceProfile) -> Result<DeviceProfile, Error> {
        dp.validate()?;
        let dp_name = dp.name.clone();

        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let res = db_transaction::<DeviceProfile, Error, _>(&mut c, |c| {
            Box::pin(async move {
                let ns = network_server::get_with_conn(c, &dp.network_server_id).await?;
                let dp = device_profile::insert(c, dp).await?;
                let client = self.pool.get(&ns)?;

                let req = nsclient::CreateDeviceProfileRequest {
                    device_profile: nsclient::DeviceProfile {
                        device_profile_id: dp.id,
                        settings: dp.settings.clone(),
                    },
                };
                self.remote(
                    ResourceKind::DeviceProfile,
                    Operation::Create,
                    client.create_device_profile(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                Ok(dp)
            })
        })
        .await;
        let dp = check_commit(res, remote_done, ResourceKind::DeviceProfile, &dp_name)?;

        info!(id = %dp.id, name = %dp.name, "Device-profile created");
        Ok(dp)
    }

    pub async fn update_device_profile(&self, dp: DeviceProfile) -> Result<DeviceProfile, Error> {
        dp.validate()?;
        let id = dp.id;

        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let res = db_transaction::<DeviceProfile, Error, _>(&mut c, |c| {
            Box::pin(async move {
                let current = device_profile::get_for_update(c, &dp.id).await?;
                if current.network_server_id != dp.network_server_id
                    || current.organization_id != dp.organization_id
                {
                    return Err(Error::Validation(
                        "network_server_id and organization_id can not be changed".into(),
                    ));
                }

                let ns = network_server::get_with_conn(c, &current.network_server_id).await?;
                let dp = device_profile::update(c, &dp).await?;
                let client = self.pool.get(&ns)?;

                let req = nsclient::UpdateDeviceProfileRequest {
                    device_profile: nsclient::DeviceProfile {
                        device_profile_id: dp.id,
                        settings: dp.settings.clone(),
                    },
                };
                self.remote(
                    ResourceKind::DeviceProfile,
                    Operation::Update,
                    client.update_device_profile(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                Ok(dp)
            })
        })
        .await;
        let dp = check_commit(res, remote_done, ResourceKind::DeviceProfile, &id.to_string())?;

        info!(id = %dp.id, name = %dp.name, "Device-profile updated");
        Ok(dp)
    }

    pub async fn delete_device_profile(&self, id: &Uuid) -> Result<(), Error> {
        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let id = *id;
        let res = db_transaction::<(), Error, _>(&mut c, |c| {
            Box::pin(async move {
                let dp = device_profile::get_for_update(c, &id).await?;

                let count = device_profile::get_device_count(c, &id).await?;
                if count > 0 {
                    return Err(Error::Conflict(format!(
                        "device-profile {} is still used by {} device(s)",
                        id, count
                    )));
                }

                let ns = network_server::get_with_conn(c, &dp.network_server_id).await?;
                let client = self.pool.get(&ns)?;
                let req = nsclient::DeleteDeviceProfileRequest {
                    device_profile_id: id,
                };
                self.remote_delete(
                    ResourceKind::DeviceProfile,
                    client.delete_device_profile(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                device_profile::delete(c, &id).await
            })
        })
        .await;
        check_commit(res, remote_done, ResourceKind::DeviceProfile, &id.to_string())?;

        info!(id = %id, "Device-profile deleted");
        Ok(())
    }

    pub async fn create_device(&self, d: Device) -> Result<Device, Error> {
        d.validate()?;
        let dev_eui = d.dev_eui;

        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let res = db_transaction::<Device, Error, _>(&mut c, |c| {
            Box::pin(async move {
                let (ns, req_dev) = self.resolve_device(c, &d).await?;
                let d = device::insert(c, d).await?;
                let client = self.pool.get(&ns)?;

                let req = nsclient::CreateDeviceRequest { device: req_dev };
                self.remote(
                    ResourceKind::Device,
                    Operation::Create,
                    client.create_device(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                Ok(d)
            })
        })
        .await;
        let d = check_commit(res, remote_done, ResourceKind::Device, &dev_eui.to_string())?;

        info!(dev_eui = %d.dev_eui, name = %d.name, "Device created");
        Ok(d)
    }

    pub async fn update_device(&self, d: Device) -> Result<Device, Error> {
        d.validate()?;
        let dev_eui = d.dev_eui;

        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let res = db_transaction::<Device, Error, _>(&mut c, |c| {
            Box::pin(async move {
                device::get_for_update(c, &d.dev_eui).await?;
                let (ns, req_dev) = self.resolve_device(c, &d).await?;
                let d = device::update(c, &d).await?;
                let client = self.pool.get(&ns)?;

                let req = nsclient::UpdateDeviceRequest { device: req_dev };
                self.remote(
                    ResourceKind::Device,
                    Operation::Update,
                    client.update_device(&req),
                )
                .await?;
                remote_done.store(true, Ordering::SeqCst);

                Ok(d)
            })
        })
        .await;
        let d = check_commit(res, remote_done, ResourceKind::Device, &dev_eui.to_string())?;

        info!(dev_eui = %d.dev_eui, name = %d.name, "Device updated");
        Ok(d)
    }

    pub async fn delete_device(&self, dev_eui: &EUI64) -> Result<(), Error> {
        let mut c = storage::get_db_conn().await?;
        let remote_done = &AtomicBool::new(false);
        let dev_eui = *dev_eui;
        let res = db_transaction::<(), Error, _>(&mut c, |c| {
            Box::pin(async move {
                let d = device::get_for_update(c, &dev_eui).await?;
                let dp = device_profile::get_with_conn(c, &d.device_profile_id).await?;
                let ns = network_server::get_with_conn(c, &dp.network_server_id).await?;
                let client = self.pool.get(&ns)?;

                let req = nsclient::DeleteDeviceRequest {
                    dev_eui: dev_eui.to_vec(),
                };
                self.remote_delete(ResourceKind::Device, client.delete_device(&req))
                    .await?;
                remote_done.store(true, Ordering::SeqCst);

                device::delete(c, &dev_eui).await
            })
        })
        .await;
        check_commit(res, remote_done, ResourceKind::Device, &dev_eui.to_string())?;

        info!(dev_eui = %dev_eui, "Device deleted");
        Ok(())
    }

    // Resolves the network-server and the remote representation of the device.
    async fn resolve_device(
        &self,
        c: &mut diesel_async::AsyncPgConnection,
        d: &Device,
    ) -> Result<(NetworkServer, nsclient::Device), Error> {
        let app = application::get_with_conn(c, &d.application_id).await?;
        let sp = service_profile::get_with_conn(c, &app.service_profile_id).await?;
        let dp = device_profile::get_with_conn(c, &d.device_profile_id).await?;

        if sp.network_server_id != dp.network_server_id {
            return Err(Error::Validation(format!(
                "device-profile {} and service-profile {} belong to different network-servers",
                dp.id, sp.id
            )));
        }
        if dp.organization_id != app.organization_id {
            return Err(Error::Validation(format!(
                "device-profile {} does not belong to the organization of application {}",
                dp.id, app.id
            )));
        }

        let ns = network_server::get_with_conn(c, &dp.network_server_id).await?;

        Ok((
            ns,
            nsclient::Device {
                dev_eui: d.dev_eui.to_vec(),
                device_profile_id: dp.id,
                service_profile_id: sp.id,
                routing_profile_id: self.routing.id,
            },
        ))
    }
}

// A transaction that fails after its remote call succeeded leaves the
// network-server ahead of the local store. Nothing retries this, it needs
// manual reconciliation.
fn check_commit<R>(
    res: Result<R, Error>,
    remote_done: &AtomicBool,
    kind: ResourceKind,
    id: &str,
) -> Result<R, Error> {
    if let Err(e) = &res {
        if remote_done.load(Ordering::SeqCst) {
            error!(kind = %kind, id = %id, error = %e, "Local commit failed after remote call succeeded, manual reconciliation required");
        }
    }
    res
}
