use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::get_db_conn;
use super::organization::validate_name;
use crate::errors::Error;
use crate::schema::application;

#[derive(Default, Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = application)]
#[serde(default)]
pub struct Application {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub service_profile_id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn validate(&self) -> Result<(), Error> {
        validate_name(&self.name)
    }
}

pub async fn create(a: Application) -> Result<Application, Error> {
    a.validate()?;

    let now = Utc::now();
    let a = Application {
        id: if a.id.is_nil() { Uuid::new_v4() } else { a.id },
        created_at: now,
        updated_at: now,
        ..a
    };

    let a: Application = diesel::insert_into(application::table)
        .values(&a)
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, a.id.to_string()))?;

    info!(id = %a.id, name = %a.name, "Application created");
    Ok(a)
}

pub async fn get(id: &Uuid) -> Result<Application, Error> {
    get_with_conn(&mut *get_db_conn().await?, id).await
}

pub async fn get_with_conn(c: &mut AsyncPgConnection, id: &Uuid) -> Result<Application, Error> {
    application::table
        .find(id)
        .first(c)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

/// Updates name and description. The service-profile is fixed at creation,
/// the devices of the application are provisioned with it.
pub async fn update(a: Application) -> Result<Application, Error> {
    a.validate()?;

    let a: Application = diesel::update(application::table.find(&a.id))
        .set((
            application::name.eq(&a.name),
            application::description.eq(&a.description),
            application::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, a.id.to_string()))?;

    info!(id = %a.id, "Application updated");
    Ok(a)
}

pub async fn delete(id: &Uuid) -> Result<(), Error> {
    let ra = diesel::delete(application::table.find(id))
        .execute(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))?;
    if ra == 0 {
        return Err(Error::NotFound(id.to_string()));
    }

    info!(id = %id, "Application deleted");
    Ok(())
}

pub async fn list_for_organization_id(
    organization_id: &Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Application>, Error> {
    application::table
        .filter(application::organization_id.eq(organization_id))
        .order_by(application::name)
        .limit(limit)
        .offset(offset)
        .load(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, organization_id.to_string()))
}
