use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use lrwn::{AES128Key, EUI64};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::get_db_conn;
use crate::errors::Error;
use crate::schema::device_keys;

#[derive(Default, Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = device_keys)]
#[serde(default)]
pub struct DeviceKeys {
    pub dev_eui: EUI64,
    pub app_key: AES128Key,
    pub join_nonce: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn create(dk: DeviceKeys) -> Result<DeviceKeys, Error> {
    let now = Utc::now();
    let dk = DeviceKeys {
        created_at: now,
        updated_at: now,
        ..dk
    };

    let dk: DeviceKeys = diesel::insert_into(device_keys::table)
        .values(&dk)
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, dk.dev_eui.to_string()))?;

    info!(dev_eui = %dk.dev_eui, "Device-keys created");
    Ok(dk)
}

pub async fn get(dev_eui: &EUI64) -> Result<DeviceKeys, Error> {
    device_keys::table
        .find(dev_eui)
        .first(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, dev_eui.to_string()))
}

pub async fn update(dk: DeviceKeys) -> Result<DeviceKeys, Error> {
    let dk: DeviceKeys = diesel::update(device_keys::table.find(&dk.dev_eui))
        .set((
            device_keys::app_key.eq(&dk.app_key),
            device_keys::join_nonce.eq(dk.join_nonce),
            device_keys::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, dk.dev_eui.to_string()))?;

    info!(dev_eui = %dk.dev_eui, "Device-keys updated");
    Ok(dk)
}

pub async fn delete(dev_eui: &EUI64) -> Result<(), Error> {
    let ra = diesel::delete(device_keys::table.find(dev_eui))
        .execute(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, dev_eui.to_string()))?;
    if ra == 0 {
        return Err(Error::NotFound(dev_eui.to_string()));
    }

    info!(dev_eui = %dev_eui, "Device-keys deleted");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{self, Fixture};

    #[tokio::test]
    async fn test_device_keys() {
        let _guard = test::prepare().await;
        let f = Fixture::new().await;
        let d = f
            .create_device(EUI64::from_be_bytes([1, 2, 3, 4, 5, 6, 7, 8]), "dev")
            .await;

        let dk = create(DeviceKeys {
            dev_eui: d.dev_eui,
            app_key: AES128Key::from_bytes([1; 16]),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(dk, get(&d.dev_eui).await.unwrap());

        let dk = update(DeviceKeys {
            join_nonce: 3,
            ..dk
        })
        .await
        .unwrap();
        assert_eq!(3, get(&d.dev_eui).await.unwrap().join_nonce);

        // keys of an unknown device
        let res = create(DeviceKeys {
            dev_eui: EUI64::from_be_bytes([8, 7, 6, 5, 4, 3, 2, 1]),
            ..dk.clone()
        })
        .await;
        assert!(matches!(res, Err(Error::Conflict(_))));

        delete(&d.dev_eui).await.unwrap();
        assert!(matches!(get(&d.dev_eui).await, Err(Error::NotFound(_))));
        assert!(matches!(delete(&d.dev_eui).await, Err(Error::NotFound(_))));
    }
}
