use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::get_db_conn;
use crate::errors::Error;
use crate::schema::integration;

/// Per-application delivery backend configuration. The settings blob is only
/// interpreted by the handler registered for `kind`.
#[derive(Default, Debug, Clone, PartialEq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = integration)]
#[serde(default)]
pub struct Integration {
    pub id: Uuid,
    pub application_id: Uuid,
    pub kind: String,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn create(i: Integration) -> Result<Integration, Error> {
    if i.kind.is_empty() {
        return Err(Error::Validation("kind must not be empty".into()));
    }

    let now = Utc::now();
    let i = Integration {
        id: if i.id.is_nil() { Uuid::new_v4() } else { i.id },
        created_at: now,
        updated_at: now,
        ..i
    };

    let i: Integration = diesel::insert_into(integration::table)
        .values(&i)
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, format!("{}/{}", i.application_id, i.kind)))?;

    info!(id = %i.id, application_id = %i.application_id, kind = %i.kind, "Integration created");
    Ok(i)
}

pub async fn get(id: &Uuid) -> Result<Integration, Error> {
    integration::table
        .find(id)
        .first(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn get_for_application_id_and_kind(
    application_id: &Uuid,
    kind: &str,
) -> Result<Integration, Error> {
    integration::table
        .filter(integration::application_id.eq(application_id))
        .filter(integration::kind.eq(kind))
        .first(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, format!("{}/{}", application_id, kind)))
}

pub async fn get_for_application_id(application_id: &Uuid) -> Result<Vec<Integration>, Error> {
    integration::table
        .filter(integration::application_id.eq(application_id))
        .order_by(integration::kind)
        .load(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, application_id.to_string()))
}

pub async fn update(i: Integration) -> Result<Integration, Error> {
    let i: Integration = diesel::update(integration::table.find(&i.id))
        .set((
            integration::settings.eq(&i.settings),
            integration::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, i.id.to_string()))?;

    info!(id = %i.id, kind = %i.kind, "Integration updated");
    Ok(i)
}

pub async fn delete(id: &Uuid) -> Result<(), Error> {
    let ra = diesel::delete(integration::table.find(id))
        .execute(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))?;
    if ra == 0 {
        return Err(Error::NotFound(id.to_string()));
    }

    info!(id = %id, "Integration deleted");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{self, Fixture};

    #[tokio::test]
    async fn test_integration() {
        let _guard = test::prepare().await;
        let f = Fixture::new().await;

        let i = create(Integration {
            application_id: f.application.id,
            kind: "HTTP".into(),
            settings: serde_json::json!({"dataUpURL": "http://localhost/up"}),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(i, get(&i.id).await.unwrap());
        assert_eq!(
            i,
            get_for_application_id_and_kind(&f.application.id, "HTTP")
                .await
                .unwrap()
        );

        // one integration per kind
        let res = create(Integration {
            id: Uuid::nil(),
            ..i.clone()
        })
        .await;
        assert!(matches!(res, Err(Error::Conflict(_))));

        let i = update(Integration {
            settings: serde_json::json!({"dataUpURL": "http://localhost/up2"}),
            ..i
        })
        .await
        .unwrap();
        assert_eq!(vec![i.clone()], get_for_application_id(&f.application.id).await.unwrap());

        delete(&i.id).await.unwrap();
        assert!(matches!(
            get_for_application_id_and_kind(&f.application.id, "HTTP").await,
            Err(Error::NotFound(_))
        ));
        assert!(get_for_application_id(&f.application.id)
            .await
            .unwrap()
            .is_empty());
    }
}
