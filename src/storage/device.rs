use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use lrwn::EUI64;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::get_db_conn;
use crate::errors::Error;
use crate::schema::{device, device_profile};

#[derive(Default, Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = device)]
#[serde(default)]
pub struct Device {
    pub dev_eui: EUI64,
    pub application_id: Uuid,
    pub device_profile_id: Uuid,
    pub name: String,
    pub description: String,
    pub device_status_battery: Option<i32>,
    pub device_status_margin: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }
        if self.dev_eui == EUI64::default() {
            return Err(Error::Validation("dev_eui must be set".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Serialize, Deserialize)]
pub struct DeviceListItem {
    pub dev_eui: EUI64,
    pub name: String,
    pub description: String,
    pub device_profile_id: Uuid,
    pub device_profile_name: String,
}

pub async fn insert(c: &mut AsyncPgConnection, d: Device) -> Result<Device, Error> {
    let now = Utc::now();
    let d = Device {
        created_at: now,
        updated_at: now,
        ..d
    };

    diesel::insert_into(device::table)
        .values(&d)
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, d.dev_eui.to_string()))
}

pub async fn get(dev_eui: &EUI64) -> Result<Device, Error> {
    device::table
        .find(dev_eui)
        .first(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, dev_eui.to_string()))
}

/// Gets and locks the device row until the end of the transaction.
pub async fn get_for_update(c: &mut AsyncPgConnection, dev_eui: &EUI64) -> Result<Device, Error> {
    device::table
        .find(dev_eui)
        .for_update()
        .first(c)
        .await
        .map_err(|e| Error::from_diesel(e, dev_eui.to_string()))
}

pub async fn update(c: &mut AsyncPgConnection, d: &Device) -> Result<Device, Error> {
    diesel::update(device::table.find(&d.dev_eui))
        .set((
            device::application_id.eq(&d.application_id),
            device::device_profile_id.eq(&d.device_profile_id),
            device::name.eq(&d.name),
            device::description.eq(&d.description),
            device::device_status_battery.eq(&d.device_status_battery),
            device::device_status_margin.eq(&d.device_status_margin),
            device::updated_at.eq(Utc::now()),
        ))
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, d.dev_eui.to_string()))
}

pub async fn delete(c: &mut AsyncPgConnection, dev_eui: &EUI64) -> Result<(), Error> {
    let ra = diesel::delete(device::table.find(dev_eui))
        .execute(c)
        .await
        .map_err(|e| Error::from_diesel(e, dev_eui.to_string()))?;
    if ra == 0 {
        return Err(Error::NotFound(dev_eui.to_string()));
    }
    Ok(())
}

pub async fn get_count_for_application_id(
    application_id: &Uuid,
    search: &str,
) -> Result<i64, Error> {
    let mut q = device::table
        .select(diesel::dsl::count_star())
        .filter(device::application_id.eq(application_id))
        .into_boxed();

    if !search.is_empty() {
        q = q.filter(device::name.ilike(format!("%{}%", search)));
    }

    q.get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, application_id.to_string()))
}

pub async fn list_for_application_id(
    application_id: &Uuid,
    limit: i64,
    offset: i64,
    search: &str,
) -> Result<Vec<DeviceListItem>, Error> {
    let mut q = device::table
        .inner_join(device_profile::table)
        .select((
            device::dev_eui,
            device::name,
            device::description,
            device::device_profile_id,
            device_profile::name,
        ))
        .filter(device::application_id.eq(application_id))
        .into_boxed();

    if !search.is_empty() {
        q = q.filter(device::name.ilike(format!("%{}%", search)));
    }

    q.order_by(device::name)
        .limit(limit)
        .offset(offset)
        .load(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, application_id.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{self, Fixture};

    #[test]
    fn test_validate() {
        let d = Device {
            dev_eui: EUI64::from_be_bytes([1, 2, 3, 4, 5, 6, 7, 8]),
            name: "dev".into(),
            ..Default::default()
        };
        assert!(d.validate().is_ok());

        let d2 = Device {
            name: " ".into(),
            ..d.clone()
        };
        assert!(matches!(d2.validate(), Err(Error::Validation(_))));

        let d3 = Device {
            dev_eui: EUI64::default(),
            ..d
        };
        assert!(matches!(d3.validate(), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_list() {
        let _guard = test::prepare().await;
        let f = Fixture::new().await;

        f.create_device(EUI64::from_be_bytes([1, 1, 1, 1, 1, 1, 1, 1]), "sensor-a")
            .await;
        f.create_device(EUI64::from_be_bytes([2, 2, 2, 2, 2, 2, 2, 2]), "sensor-b")
            .await;
        f.create_device(EUI64::from_be_bytes([3, 3, 3, 3, 3, 3, 3, 3]), "tracker")
            .await;

        let app_id = f.application.id;
        assert_eq!(3, get_count_for_application_id(&app_id, "").await.unwrap());
        assert_eq!(
            2,
            get_count_for_application_id(&app_id, "SENSOR").await.unwrap()
        );

        let items = list_for_application_id(&app_id, 10, 0, "sensor")
            .await
            .unwrap();
        assert_eq!(
            vec!["sensor-a", "sensor-b"],
            items.iter().map(|d| d.name.as_str()).collect::<Vec<_>>()
        );
        assert_eq!("test-dp", items[0].device_profile_name);

        let items = list_for_application_id(&app_id, 1, 2, "").await.unwrap();
        assert_eq!(1, items.len());
        assert_eq!("tracker", items[0].name);
    }
}
