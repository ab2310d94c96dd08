use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use lrwn::{AES128Key, DevAddr, EUI64};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::get_db_conn;
use crate::errors::Error;
use crate::schema::device_activation;

/// Activation history row. Rows are append-only, the most recent row is the
/// active session.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize)]
#[diesel(table_name = device_activation)]
pub struct DeviceActivation {
    pub id: Uuid,
    pub dev_eui: EUI64,
    pub dev_addr: DevAddr,
    pub app_s_key: AES128Key,
    pub nwk_s_key: AES128Key,
    pub created_at: DateTime<Utc>,
}

pub async fn create(da: DeviceActivation) -> Result<DeviceActivation, Error> {
    // v7 ids are time-ordered and break created_at ties.
    let da = DeviceActivation {
        id: Uuid::now_v7(),
        created_at: Utc::now(),
        ..da
    };

    let da: DeviceActivation = diesel::insert_into(device_activation::table)
        .values(&da)
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, da.dev_eui.to_string()))?;

    info!(dev_eui = %da.dev_eui, dev_addr = %da.dev_addr, "Device-activation created");
    Ok(da)
}

pub async fn get_last_for_dev_eui(dev_eui: &EUI64) -> Result<DeviceActivation, Error> {
    device_activation::table
        .filter(device_activation::dev_eui.eq(dev_eui))
        .order_by((
            device_activation::created_at.desc(),
            device_activation::id.desc(),
        ))
        .first(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, dev_eui.to_string()))
}

/// Returns the activation history, most recent first.
pub async fn list_for_dev_eui(
    dev_eui: &EUI64,
    limit: i64,
    offset: i64,
) -> Result<Vec<DeviceActivation>, Error> {
    device_activation::table
        .filter(device_activation::dev_eui.eq(dev_eui))
        .order_by((
            device_activation::created_at.desc(),
            device_activation::id.desc(),
        ))
        .limit(limit)
        .offset(offset)
        .load(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, dev_eui.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{self, Fixture};

    #[tokio::test]
    async fn test_device_activation() {
        let _guard = test::prepare().await;
        let f = Fixture::new().await;
        let d = f
            .create_device(EUI64::from_be_bytes([1, 2, 3, 4, 5, 6, 7, 8]), "dev")
            .await;

        assert!(matches!(
            get_last_for_dev_eui(&d.dev_eui).await,
            Err(Error::NotFound(_))
        ));

        let da1 = create(DeviceActivation {
            id: Uuid::nil(),
            dev_eui: d.dev_eui,
            dev_addr: DevAddr::from_be_bytes([1, 2, 3, 4]),
            app_s_key: AES128Key::from_bytes([1; 16]),
            nwk_s_key: AES128Key::from_bytes([2; 16]),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let da2 = create(DeviceActivation {
            dev_addr: DevAddr::from_be_bytes([4, 3, 2, 1]),
            ..da1.clone()
        })
        .await
        .unwrap();
        assert_ne!(da1.id, da2.id);

        assert_eq!(da2, get_last_for_dev_eui(&d.dev_eui).await.unwrap());
        assert_eq!(
            vec![da2.clone(), da1.clone()],
            list_for_dev_eui(&d.dev_eui, 10, 0).await.unwrap()
        );
        assert_eq!(
            vec![da1],
            list_for_dev_eui(&d.dev_eui, 10, 1).await.unwrap()
        );
    }
}
