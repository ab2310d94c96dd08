use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::get_db_conn;
use crate::errors::Error;
use crate::schema::{device_profile, network_server, service_profile};

/// Network-server control-plane endpoint. The `ca_cert`, `tls_cert` and
/// `tls_key` fields are used to connect to the network-server, the
/// `routing_profile_*` fields are handed to the network-server so that it can
/// connect back to this application-server. Private keys are accepted on
/// input but never serialized.
#[derive(Default, Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = network_server)]
#[serde(default)]
pub struct NetworkServer {
    pub id: Uuid,
    pub name: String,
    pub server: String,
    pub ca_cert: String,
    pub tls_cert: String,
    #[serde(skip_serializing)]
    pub tls_key: String,
    pub routing_profile_ca_cert: String,
    pub routing_profile_tls_cert: String,
    #[serde(skip_serializing)]
    pub routing_profile_tls_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NetworkServer {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }
        if self.server.trim().is_empty() {
            return Err(Error::Validation("server must not be empty".into()));
        }
        if self.tls_cert.is_empty() != self.tls_key.is_empty() {
            return Err(Error::Validation(
                "tls_cert and tls_key must be set together".into(),
            ));
        }
        if self.routing_profile_tls_cert.is_empty() != self.routing_profile_tls_key.is_empty() {
            return Err(Error::Validation(
                "routing_profile_tls_cert and routing_profile_tls_key must be set together".into(),
            ));
        }
        Ok(())
    }
}

pub async fn insert(c: &mut AsyncPgConnection, ns: NetworkServer) -> Result<NetworkServer, Error> {
    let now = Utc::now();
    let ns = NetworkServer {
        id: if ns.id.is_nil() { Uuid::new_v4() } else { ns.id },
        created_at: now,
        updated_at: now,
        ..ns
    };

    diesel::insert_into(network_server::table)
        .values(&ns)
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, ns.id.to_string()))
}

pub async fn get(id: &Uuid) -> Result<NetworkServer, Error> {
    network_server::table
        .find(id)
        .first(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn get_with_conn(c: &mut AsyncPgConnection, id: &Uuid) -> Result<NetworkServer, Error> {
    network_server::table
        .find(id)
        .first(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

/// Gets and locks the network-server row until the end of the transaction.
pub async fn get_for_update(c: &mut AsyncPgConnection, id: &Uuid) -> Result<NetworkServer, Error> {
    network_server::table
        .find(id)
        .for_update()
        .first(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn update(c: &mut AsyncPgConnection, ns: &NetworkServer) -> Result<NetworkServer, Error> {
    diesel::update(network_server::table.find(&ns.id))
        .set((
            network_server::name.eq(&ns.name),
            network_server::server.eq(&ns.server),
            network_server::ca_cert.eq(&ns.ca_cert),
            network_server::tls_cert.eq(&ns.tls_cert),
            network_server::tls_key.eq(&ns.tls_key),
            network_server::routing_profile_ca_cert.eq(&ns.routing_profile_ca_cert),
            network_server::routing_profile_tls_cert.eq(&ns.routing_profile_tls_cert),
            network_server::routing_profile_tls_key.eq(&ns.routing_profile_tls_key),
            network_server::updated_at.eq(Utc::now()),
        ))
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, ns.id.to_string()))
}

pub async fn delete(c: &mut AsyncPgConnection, id: &Uuid) -> Result<(), Error> {
    let ra = diesel::delete(network_server::table.find(id))
        .execute(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))?;
    if ra == 0 {
        return Err(Error::NotFound(id.to_string()));
    }
    Ok(())
}

/// Returns the number of service- and device-profiles referencing the
/// network-server.
pub async fn get_dependent_count(c: &mut AsyncPgConnection, id: &Uuid) -> Result<i64, Error> {
    let sp_count: i64 = service_profile::table
        .filter(service_profile::network_server_id.eq(id))
        .count()
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))?;

    let dp_count: i64 = device_profile::table
        .filter(device_profile::network_server_id.eq(id))
        .count()
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))?;

    Ok(sp_count + dp_count)
}

pub async fn get_count() -> Result<i64, Error> {
    network_server::table
        .count()
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, "".into()))
}

pub async fn list(limit: i64, offset: i64) -> Result<Vec<NetworkServer>, Error> {
    network_server::table
        .order_by(network_server::name)
        .limit(limit)
        .offset(offset)
        .load(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, "".into()))
}

/// Network-servers are visible to an organization through its service-profiles.
pub async fn get_count_for_organization_id(organization_id: &Uuid) -> Result<i64, Error> {
    network_server::table
        .filter(
            network_server::id.eq_any(
                service_profile::table
                    .select(service_profile::network_server_id)
                    .filter(service_profile::organization_id.eq(organization_id)),
            ),
        )
        .count()
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, organization_id.to_string()))
}

pub async fn list_for_organization_id(
    organization_id: &Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<NetworkServer>, Error> {
    network_server::table
        .filter(
            network_server::id.eq_any(
                service_profile::table
                    .select(service_profile::network_server_id)
                    .filter(service_profile::organization_id.eq(organization_id)),
            ),
        )
        .order_by(network_server::name)
        .limit(limit)
        .offset(offset)
        .load(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, organization_id.to_string()))
}
