use std::sync::{LazyLock, RwLock};

use anyhow::Result;
use diesel::{ConnectionError, ConnectionResult};
use diesel_async::{
    async_connection_wrapper::AsyncConnectionWrapper,
    pooled_connection::{
        deadpool::{Object as DeadpoolObject, Pool as DeadpoolPool},
        {AsyncDieselConnectionManager, ManagerConfig},
    },
    AsyncConnection, AsyncPgConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use futures::{future::BoxFuture, FutureExt};
use scoped_futures::ScopedBoxFuture;
use tracing::{error, info};

use crate::config::Configuration;
use crate::helpers::get_root_certs;

// Maps a serde type onto a JSONB column.
macro_rules! jsonb_type {
    ($t:ty) => {
        impl diesel::deserialize::FromSql<diesel::sql_types::Jsonb, diesel::pg::Pg> for $t {
            fn from_sql(
                value: <diesel::pg::Pg as diesel::backend::Backend>::RawValue<'_>,
            ) -> diesel::deserialize::Result<Self> {
                let value = <serde_json::Value as diesel::deserialize::FromSql<
                    diesel::sql_types::Jsonb,
                    diesel::pg::Pg,
                >>::from_sql(value)?;
                Ok(serde_json::from_value(value)?)
            }
        }

        impl diesel::serialize::ToSql<diesel::sql_types::Jsonb, diesel::pg::Pg> for $t {
            fn to_sql<'b>(
                &'b self,
                out: &mut diesel::serialize::Output<'b, '_, diesel::pg::Pg>,
            ) -> diesel::serialize::Result {
                let value = serde_json::to_value(self)?;
                <serde_json::Value as diesel::serialize::ToSql<
                    diesel::sql_types::Jsonb,
                    diesel::pg::Pg,
                >>::to_sql(&value, &mut out.reborrow())
            }
        }
    };
}

pub mod application;
pub mod device;
pub mod device_activation;
pub mod device_keys;
pub mod device_profile;
pub mod integration;
pub mod network_server;
pub mod organization;
pub mod service_profile;

pub use application::Application;
pub use device::{Device, DeviceListItem};
pub use device_activation::DeviceActivation;
pub use device_keys::DeviceKeys;
pub use device_profile::{DeviceProfile, DeviceProfileSettings};
pub use integration::Integration;
pub use network_server::NetworkServer;
pub use organization::Organization;
pub use service_profile::{RatePolicy, ServiceProfile, ServiceProfileSettings};

pub type PgPool = DeadpoolPool<AsyncPgConnection>;
pub type PgPoolConnection = DeadpoolObject<AsyncPgConnection>;

static CA_CERT: LazyLock<RwLock<Option<String>>> = LazyLock::new(|| RwLock::new(None));
static PG_POOL: LazyLock<RwLock<Option<PgPool>>> = LazyLock::new(|| RwLock::new(None));

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

pub async fn setup(conf: &Configuration) -> Result<()> {
    info!("Setting up PostgreSQL connection pool");

    if !conf.postgresql.ca_cert.is_empty() {
        let mut ca_cert = CA_CERT
            .write()
            .map_err(|e| anyhow!("CA certificate lock error: {}", e))?;
        *ca_cert = Some(conf.postgresql.ca_cert.clone());
    }

    let mut config = ManagerConfig::default();
    config.custom_setup = Box::new(pg_establish_connection);
    let mgr = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
        &conf.postgresql.dsn,
        config,
    );
    let pool = DeadpoolPool::builder(mgr)
        .max_size(conf.postgresql.max_open_connections as usize)
        .build()?;
    set_db_pool(pool)?;
    run_db_migrations().await?;

    Ok(())
}

fn pg_establish_connection(config: &str) -> BoxFuture<ConnectionResult<AsyncPgConnection>> {
    let fut = async {
        let ca_cert = {
            CA_CERT
                .read()
                .map_err(|e| ConnectionError::BadConnection(e.to_string()))?
                .clone()
                .unwrap_or_default()
        };
        let root_certs = get_root_certs(if ca_cert.is_empty() {
            None
        } else {
            Some(ca_cert)
        })
        .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
        let rustls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_certs)
            .with_no_client_auth();
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(rustls_config);
        let (client, conn) = tokio_postgres::connect(config, tls)
            .await
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });
        AsyncPgConnection::try_from(client).await
    };
    fut.boxed()
}

fn set_db_pool(p: PgPool) -> Result<()> {
    let mut pool_w = PG_POOL
        .write()
        .map_err(|e| anyhow!("PostgreSQL pool lock error: {}", e))?;
    *pool_w = Some(p);
    Ok(())
}

fn get_db_pool() -> Result<PgPool> {
    let pool_r = PG_POOL
        .read()
        .map_err(|e| anyhow!("PostgreSQL pool lock error: {}", e))?;
    let pool: PgPool = pool_r
        .as_ref()
        .ok_or_else(|| anyhow!("PostgreSQL connection pool is not initialized"))?
        .clone();
    Ok(pool)
}

pub async fn get_db_conn() -> Result<PgPoolConnection> {
    let pool = get_db_pool()?;
    Ok(pool.get().await?)
}

/// Runs the callback inside a single database transaction. The transaction
/// commits when the callback returns Ok and rolls back on Err.
pub async fn db_transaction<'a, R, E, F>(conn: &mut PgPoolConnection, callback: F) -> Result<R, E>
where
    F: for<'r> FnOnce(&'r mut PgPoolConnection) -> ScopedBoxFuture<'a, 'r, Result<R, E>>
        + Send
        + 'a,
    E: From<diesel::result::Error> + Send + 'a,
    R: Send + 'a,
{
    conn.transaction(callback).await
}

async fn run_db_migrations() -> Result<()> {
    info!("Applying schema migrations");

    let c = get_db_conn().await?;
    let mut c_wrapped: AsyncConnectionWrapper<PgPoolConnection> = AsyncConnectionWrapper::from(c);

    tokio::task::spawn_blocking(move || -> Result<()> {
        c_wrapped
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("{}", e))?;

        Ok(())
    })
    .await?
}

#[cfg(test)]
pub async fn reset_db() -> Result<()> {
    let c = get_db_conn().await?;
    let mut c_wrapped: AsyncConnectionWrapper<PgPoolConnection> = AsyncConnectionWrapper::from(c);

    tokio::task::spawn_blocking(move || -> Result<()> {
        c_wrapped
            .revert_all_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("During revert: {}", e))?;
        c_wrapped
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("During run: {}", e))?;

        Ok(())
    })
    .await?
}
