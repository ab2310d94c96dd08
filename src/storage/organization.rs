use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::get_db_conn;
use crate::errors::Error;
use crate::schema::organization;

#[derive(Default, Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = organization)]
#[serde(default)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub can_have_gateways: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn validate(&self) -> Result<(), Error> {
        validate_name(&self.name)
    }
}

// Names end up in URLs and topics, so restrict them to a slug.
pub(crate) fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::Validation("name must not be empty".into()));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Validation(format!(
            "name `{}` may only contain letters, digits, dashes and underscores",
            name
        )));
    }

    Ok(())
}

pub async fn create(o: Organization) -> Result<Organization, Error> {
    o.validate()?;

    let now = Utc::now();
    let o = Organization {
        id: if o.id.is_nil() { Uuid::new_v4() } else { o.id },
        created_at: now,
        updated_at: now,
        ..o
    };

    let o: Organization = diesel::insert_into(organization::table)
        .values(&o)
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, o.id.to_string()))?;

    info!(id = %o.id, name = %o.name, "Organization created");
    Ok(o)
}

pub async fn get(id: &Uuid) -> Result<Organization, Error> {
    organization::table
        .find(id)
        .first(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))
}

pub async fn update(o: Organization) -> Result<Organization, Error> {
    o.validate()?;

    let o: Organization = diesel::update(organization::table.find(&o.id))
        .set((
            organization::name.eq(&o.name),
            organization::display_name.eq(&o.display_name),
            organization::can_have_gateways.eq(o.can_have_gateways),
            organization::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, o.id.to_string()))?;

    info!(id = %o.id, "Organization updated");
    Ok(o)
}

pub async fn delete(id: &Uuid) -> Result<(), Error> {
    let ra = diesel::delete(organization::table.find(id))
        .execute(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, id.to_string()))?;
    if ra == 0 {
        return Err(Error::NotFound(id.to_string()));
    }

    info!(id = %id, "Organization deleted");
    Ok(())
}

pub async fn get_count() -> Result<i64, Error> {
    organization::table
        .count()
        .get_result(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, "".into()))
}

pub async fn list(limit: i64, offset: i64) -> Result<Vec<Organization>, Error> {
    organization::table
        .order_by(organization::name)
        .limit(limit)
        .offset(offset)
        .load(&mut get_db_conn().await?)
        .await
        .map_err(|e| Error::from_diesel(e, "".into()))
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::test;

    pub async fn create_organization(name: &str) -> Organization {
        create(Organization {
            name: name.into(),
            display_name: name.into(),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("test-org_1").is_ok());
        assert!(matches!(validate_name(""), Err(Error::Validation(_))));
        assert!(matches!(
            validate_name("test org"),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_organization() {
        let _guard = test::prepare().await;

        let mut o = create_organization("test-org").await;
        assert_eq!(o, get(&o.id).await.unwrap());
        assert_eq!(1, get_count().await.unwrap());
        assert_eq!(1, list(10, 0).await.unwrap().len());

        o.display_name = "Test organization".into();
        o.can_have_gateways = true;
        let o = update(o).await.unwrap();
        assert_eq!(o, get(&o.id).await.unwrap());

        // duplicate name
        assert!(matches!(
            create(Organization {
                name: "test-org".into(),
                ..Default::default()
            })
            .await,
            Err(Error::Conflict(_))
        ));

        delete(&o.id).await.unwrap();
        assert!(matches!(get(&o.id).await, Err(Error::NotFound(_))));
        assert!(matches!(delete(&o.id).await, Err(Error::NotFound(_))));
    }
}
