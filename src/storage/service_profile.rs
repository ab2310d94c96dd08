use chrono::{DateTime, Utc};
use diesel::{prelude::*, sql_types::Jsonb};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::get_db_conn;
use crate::errors::Error;
use crate::schema::{application, service_profile};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RatePolicy {
    #[default]
    Drop,
    Mark,
}

/// Traffic-shaping policy as provisioned on the network-server.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(default)]
pub struct ServiceProfileSettings {
    pub ul_rate: u32,
    pub ul_bucket_size: u32,
    pub ul_rate_policy: RatePolicy,
    pub dl_rate: u32,
    pub dl_bucket_size: u32,
    pub dl_rate_policy: RatePolicy,
    pub add_gw_metadata: bool,
    pub dev_status_req_freq: u32,
    pub report_dev_status_battery: bool,
    pub report_dev_status_margin: bool,
    pub dr_min: u8,
    pub dr_max: u8,
    pub pr_allowed: bool,
    pub hr_allowed: bool,
    pub ra_allowed: bool,
    pub nwk_geo_loc: bool,
    pub target_per: u32,
    pub min_gw_diversity: u32,
}

jsonb_type!(ServiceProfileSettings);

#[derive(Default, Debug, Clone, PartialEq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = service_profile)]
#[serde(default)]
pub struct ServiceProfile {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub network_server_id: Uuid,
    pub name: String,
    pub settings: ServiceProfileSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceProfile {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }
        if self.settings.dr_min > self.settings.dr_max {
            return Err(Error::Validation("dr_min must not exceed dr_max".into()));
        }
        Ok(())
    }
}

pub async fn insert(c: &mut AsyncPgConnection, sp: ServiceProfile) -> Result<ServiceProfile, Error> {
    let now = Utc::now();
    let sp = ServiceProfile {
        id: if sp.id.is_nil() { Uuid::new_v4() } else { sp.id },
        created_at: now,
        updated_at: now,
        ..sp
    };

    diesel::insert_into(service_profile::table)
        .values(&sp)
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, sp.id.to_string()))
}

pub async fn get(id: &Uuid) -> Result<ServiceProfile, Error> {
    get_with_conn(&mut *get_db_conn().await?, id).await
}

pub async fn get_with_conn(c: &mut AsyncPgConnection, id: &Uuid) -> Result<ServiceProfile, Error> {
    service_profile::table
        .find(id)
        .first(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn get_for_update(c: &mut AsyncPgConnection, id: &Uuid) -> Result<ServiceProfile, Error> {
    service_profile::table
        .find(id)
        .for_update()
        .first(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn update(c: &mut AsyncPgConnection, sp: &ServiceProfile) -> Result<ServiceProfile, Error> {
    diesel::update(service_profile::table.find(&sp.id))
        .set((
            service_profile::name.eq(&sp.name),
            service_profile::settings.eq(&sp.settings),
            service_profile::updated_at.eq(Utc::now()),
        ))
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, sp.id.to_string()))
}

pub async fn delete(c: &mut AsyncPgConnection, id: &Uuid) -> Result<(), Error> {
    let ra = diesel::delete(service_profile::table.find(id))
        .execute(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))?;
    if ra == 0 {
        return Err(Error::NotFound(id.to_string()));
    }
    Ok(())
}

pub async fn get_application_count(c: &mut AsyncPgConnection, id: &Uuid) -> Result<i64, Error> {
    application::table
        .filter(application::service_profile_id.eq(id))
        .count()
        .get_result(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn list_for_organization_id(
    organization_id: &Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<ServiceProfile>, Error> {
    service_profile::table
        .filter(service_profile::organization_id.eq(organization_id))
        .order_by(service_profile::name)
        .limit(limit)
        .offset(offset)
        .load(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, organization_id.to_string()))
}
