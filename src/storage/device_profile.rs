use chrono::{DateTime, Utc};
use diesel::{prelude::*, sql_types::Jsonb};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::get_db_conn;
use crate::errors::Error;
use crate::schema::{device, device_profile};

/// Device capabilities as provisioned on the network-server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(default)]
pub struct DeviceProfileSettings {
    pub supports_class_b: bool,
    pub class_b_timeout: u32,
    pub ping_slot_period: u32,
    pub ping_slot_dr: u8,
    pub ping_slot_freq: u32,
    pub supports_class_c: bool,
    pub class_c_timeout: u32,
    pub mac_version: String,
    pub reg_params_revision: String,
    pub rx_delay_1: u8,
    pub rx_dr_offset_1: u8,
    pub rx_datarate_2: u8,
    pub rx_freq_2: u32,
    pub factory_preset_freqs: Vec<u32>,
    pub max_eirp: u8,
    pub max_duty_cycle: u8,
    pub supports_join: bool,
    pub rf_region: String,
    pub supports_32bit_fcnt: bool,
}

impl Default for DeviceProfileSettings {
    fn default() -> Self {
        DeviceProfileSettings {
            supports_class_b: false,
            class_b_timeout: 0,
            ping_slot_period: 0,
            ping_slot_dr: 0,
            ping_slot_freq: 0,
            supports_class_c: false,
            class_c_timeout: 0,
            mac_version: "1.0.2".into(),
            reg_params_revision: "B".into(),
            rx_delay_1: 0,
            rx_dr_offset_1: 0,
            rx_datarate_2: 0,
            rx_freq_2: 0,
            factory_preset_freqs: vec![],
            max_eirp: 0,
            max_duty_cycle: 0,
            supports_join: true,
            rf_region: "EU868".into(),
            supports_32bit_fcnt: false,
        }
    }
}

jsonb_type!(DeviceProfileSettings);

#[derive(Default, Debug, Clone, PartialEq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = device_profile)]
#[serde(default)]
pub struct DeviceProfile {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub network_server_id: Uuid,
    pub name: String,
    pub settings: DeviceProfileSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceProfile {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }
        if self.settings.mac_version.is_empty() {
            return Err(Error::Validation("mac_version must be set".into()));
        }
        Ok(())
    }
}

pub async fn insert(c: &mut AsyncPgConnection, dp: DeviceProfile) -> Result<DeviceProfile, Error> {
    let now = Utc::now();
    let dp = DeviceProfile {
        id: if dp.id.is_nil() { Uuid::new_v4() } else { dp.id },
        created_at: now,
        updated_at: now,
        ..dp
    };

    diesel::insert_into(device_profile::table)
        .values(&dp)
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, dp.id.to_string()))
}

pub async fn get(id: &Uuid) -> Result<DeviceProfile, Error> {
    get_with_conn(&mut *get_db_conn().await?, id).await
}

pub async fn get_with_conn(c: &mut AsyncPgConnection, id: &Uuid) -> Result<DeviceProfile, Error> {
    device_profile::table
        .find(id)
        .first(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn get_for_update(c: &mut AsyncPgConnection, id: &Uuid) -> Result<DeviceProfile, Error> {
    device_profile::table
        .find(id)
        .for_update()
        .first(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn update(c: &mut AsyncPgConnection, dp: &DeviceProfile) -> Result<DeviceProfile, Error> {
    diesel::update(device_profile::table.find(&dp.id))
        .set((
            device_profile::name.eq(&dp.name),
            device_profile::settings.eq(&dp.settings),
            device_profile::updated_at.eq(Utc::now()),
        ))
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, dp.id.to_string()))
}

pub async fn delete(c: &mut AsyncPgConnection, id: &Uuid) -> Result<(), Error> {
    let ra = diesel::delete(device_profile::table.find(id))
        .execute(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))?;
    if ra == 0 {
        return Err(Error::NotFound(id.to_string()));
    }
    Ok(())
}

pub async fn get_device_count(c: &mut AsyncPgConnection, id: &Uuid) -> Result<i64, Error> {
    device::table
        .filter(device::device_profile_id.eq(id))
        .count()
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn list_for_organization_id(
    organization_id: &Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<DeviceProfile>, Error> {
    device_profile::table
        .filter(device_profile::organization_id.eq(organization_id))
        .order_by(device_profile::name)
        .limit(limit)
        .offset(offset)
        .load(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, organization_id.to_string()))
}
