//! Management of the local resources. Resources mirrored on a network-server
//! go through the synchronizer, all other resources are plain store writes.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use lrwn::EUI64;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiState;
use crate::errors::Error;
use crate::storage::{
    application, device, device_activation, device_keys, device_profile, integration,
    network_server, organization, service_profile, Application, Device, DeviceActivation,
    DeviceKeys, DeviceListItem, DeviceProfile, Integration, NetworkServer, Organization,
    ServiceProfile,
};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub limit: i64,
    pub offset: i64,
    pub search: String,
    pub organization_id: Option<Uuid>,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            limit: 100,
            offset: 0,
            search: "".into(),
            organization_id: None,
        }
    }
}

impl ListQuery {
    fn organization_id(&self) -> Result<Uuid, Error> {
        self.organization_id
            .ok_or_else(|| Error::Validation("organization_id is required".into()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub total_count: i64,
    pub result: Vec<T>,
}

pub fn router() -> Router<ApiState> {
    Router::new()
        .route(
            "/api/organizations",
            post(create_organization).get(list_organizations),
        )
        .route(
            "/api/organizations/:id",
            get(get_organization)
                .put(update_organization)
                .delete(delete_organization),
        )
        .route(
            "/api/network-servers",
            post(create_network_server).get(list_network_servers),
        )
        .route(
            "/api/network-servers/:id",
            get(get_network_server)
                .put(update_network_server)
                .delete(delete_network_server),
        )
        .route(
            "/api/service-profiles",
            post(create_service_profile).get(list_service_profiles),
        )
        .route(
            "/api/service-profiles/:id",
            get(get_service_profile)
                .put(update_service_profile)
                .delete(delete_service_profile),
        )
        .route(
            "/api/device-profiles",
            post(create_device_profile).get(list_device_profiles),
        )
        .route(
            "/api/device-profiles/:id",
            get(get_device_profile)
                .put(update_device_profile)
                .delete(delete_device_profile),
        )
        .route(
            "/api/applications",
            post(create_application).get(list_applications),
        )
        .route(
            "/api/applications/:id",
            get(get_application)
                .put(update_application)
                .delete(delete_application),
        )
        .route("/api/applications/:id/devices", get(list_devices))
        .route(
            "/api/applications/:id/integrations",
            post(create_integration).get(list_integrations),
        )
        .route(
            "/api/applications/:id/integrations/:kind",
            get(get_integration)
                .put(update_integration)
                .delete(delete_integration),
        )
        .route("/api/devices", post(create_device))
        .route(
            "/api/devices/:dev_eui",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route(
            "/api/devices/:dev_eui/keys",
            post(create_device_keys)
                .get(get_device_keys)
                .put(update_device_keys)
                .delete(delete_device_keys),
        )
        .route(
            "/api/devices/:dev_eui/activation",
            get(get_device_activation),
        )
        .route(
            "/api/devices/:dev_eui/activations",
            get(list_device_activations),
        )
}

async fn create_organization(b: Bytes) -> Result<Json<Organization>, Error> {
    let o: Organization = serde_json::from_slice(&b)?;
    Ok(Json(organization::create(o).await?))
}

async fn list_organizations(
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse<Organization>>, Error> {
    Ok(Json(ListResponse {
        total_count: organization::get_count().await?,
        result: organization::list(q.limit, q.offset).await?,
    }))
}

async fn get_organization(Path(id): Path<Uuid>) -> Result<Json<Organization>, Error> {
    Ok(Json(organization::get(&id).await?))
}

async fn update_organization(
    Path(id): Path<Uuid>,
    b: Bytes,
) -> Result<Json<Organization>, Error> {
    let o: Organization = serde_json::from_slice(&b)?;
    Ok(Json(organization::update(Organization { id, ..o }).await?))
}

async fn delete_organization(Path(id): Path<Uuid>) -> Result<StatusCode, Error> {
    organization::delete(&id).await?;
    Ok(StatusCode::OK)
}

async fn create_network_server(
    State(s): State<ApiState>,
    b: Bytes,
) -> Result<Json<NetworkServer>, Error> {
    let ns: NetworkServer = serde_json::from_slice(&b)?;
    Ok(Json(s.sync.create_network_server(ns).await?))
}

async fn list_network_servers(
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse<NetworkServer>>, Error> {
    let resp = match q.organization_id {
        Some(org_id) => ListResponse {
            total_count: network_server::get_count_for_organization_id(&org_id).await?,
            result: network_server::list_for_organization_id(&org_id, q.limit, q.offset).await?,
        },
        None => ListResponse {
            total_count: network_server::get_count().await?,
            result: network_server::list(q.limit, q.offset).await?,
        },
    };
    Ok(Json(resp))
}

async fn get_network_server(Path(id): Path<Uuid>) -> Result<Json<NetworkServer>, Error> {
    Ok(Json(network_server::get(&id).await?))
}

async fn update_network_server(
    State(s): State<ApiState>,
    Path(id): Path<Uuid>,
    b: Bytes,
) -> Result<Json<NetworkServer>, Error> {
    let ns: NetworkServer = serde_json::from_slice(&b)?;
    let existing = network_server::get(&id).await?;

    // Keys are never returned, an update leaving them out keeps the stored
    // key as long as its certificate is kept.
    let tls_key = if ns.tls_key.is_empty() && !ns.tls_cert.is_empty() {
        existing.tls_key
    } else {
        ns.tls_key
    };
    let routing_profile_tls_key =
        if ns.routing_profile_tls_key.is_empty() && !ns.routing_profile_tls_cert.is_empty() {
            existing.routing_profile_tls_key
        } else {
            ns.routing_profile_tls_key
        };

    Ok(Json(
        s.sync
            .update_network_server(NetworkServer {
                id,
                tls_key,
                routing_profile_tls_key,
                ..ns
            })
            .await?,
    ))
}

async fn delete_network_server(
    State(s): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Error> {
    s.sync.delete_network_server(&id).await?;
    Ok(StatusCode::OK)
}

async fn create_service_profile(
    State(s): State<ApiState>,
    b: Bytes,
) -> Result<Json<ServiceProfile>, Error> {
    let sp: ServiceProfile = serde_json::from_slice(&b)?;
    Ok(Json(s.sync.create_service_profile(sp).await?))
}

async fn list_service_profiles(
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ServiceProfile>>, Error> {
    Ok(Json(
        service_profile::list_for_organization_id(&q.organization_id()?, q.limit, q.offset)
            .await?,
    ))
}

async fn get_service_profile(Path(id): Path<Uuid>) -> Result<Json<ServiceProfile>, Error> {
    Ok(Json(service_profile::get(&id).await?))
}

async fn update_service_profile(
    State(s): State<ApiState>,
    Path(id): Path<Uuid>,
    b: Bytes,
) -> Result<Json<ServiceProfile>, Error> {
    let sp: ServiceProfile = serde_json::from_slice(&b)?;
    Ok(Json(
        s.sync
            .update_service_profile(ServiceProfile { id, ..sp })
            .await?,
    ))
}

async fn delete_service_profile(
    State(s): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Error> {
    s.sync.delete_service_profile(&id).await?;
    Ok(StatusCode::OK)
}

async fn create_device_profile(
    State(s): State<ApiState>,
    b: Bytes,
) -> Result<Json<DeviceProfile>, Error> {
    let dp: DeviceProfile = serde_json::from_slice(&b)?;
    Ok(Json(s.sync.create_device_profile(dp).await?))
}

async fn list_device_profiles(
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<DeviceProfile>>, Error> {
    Ok(Json(
        device_profile::list_for_organization_id(&q.organization_id()?, q.limit, q.offset)
            .await?,
    ))
}

async fn get_device_profile(Path(id): Path<Uuid>) -> Result<Json<DeviceProfile>, Error> {
    Ok(Json(device_profile::get(&id).await?))
}

async fn update_device_profile(
    State(s): State<ApiState>,
    Path(id): Path<Uuid>,
    b: Bytes,
) -> Result<Json<DeviceProfile>, Error> {
    let dp: DeviceProfile = serde_json::from_slice(&b)?;
    Ok(Json(
        s.sync
            .update_device_profile(DeviceProfile { id, ..dp })
            .await?,
    ))
}

async fn delete_device_profile(
    State(s): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Error> {
    s.sync.delete_device_profile(&id).await?;
    Ok(StatusCode::OK)
}

async fn create_application(b: Bytes) -> Result<Json<Application>, Error> {
    let a: Application = serde_json::from_slice(&b)?;
    Ok(Json(application::create(a).await?))
}

async fn list_applications(Query(q): Query<ListQuery>) -> Result<Json<Vec<Application>>, Error> {
    Ok(Json(
        application::list_for_organization_id(&q.organization_id()?, q.limit, q.offset).await?,
    ))
}

async fn get_application(Path(id): Path<Uuid>) -> Result<Json<Application>, Error> {
    Ok(Json(application::get(&id).await?))
}

async fn update_application(
    Path(id): Path<Uuid>,
    b: Bytes,
) -> Result<Json<Application>, Error> {
    let a: Application = serde_json::from_slice(&b)?;
    Ok(Json(application::update(Application { id, ..a }).await?))
}

async fn delete_application(Path(id): Path<Uuid>) -> Result<StatusCode, Error> {
    application::delete(&id).await?;
    Ok(StatusCode::OK)
}

async fn list_devices(
    Path(id): Path<Uuid>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse<DeviceListItem>>, Error> {
    Ok(Json(ListResponse {
        total_count: device::get_count_for_application_id(&id, &q.search).await?,
        result: device::list_for_application_id(&id, q.limit, q.offset, &q.search).await?,
    }))
}

// Settings are checked against the handler registered for the kind before
// they are stored.
async fn create_integration(
    State(s): State<ApiState>,
    Path(id): Path<Uuid>,
    b: Bytes,
) -> Result<Json<Integration>, Error> {
    let i: Integration = serde_json::from_slice(&b)?;
    let i = Integration {
        application_id: id,
        ..i
    };
    s.handler.validate_integration(&i).await?;
    Ok(Json(integration::create(i).await?))
}

async fn list_integrations(Path(id): Path<Uuid>) -> Result<Json<Vec<Integration>>, Error> {
    Ok(Json(integration::get_for_application_id(&id).await?))
}

async fn get_integration(
    Path((id, kind)): Path<(Uuid, String)>,
) -> Result<Json<Integration>, Error> {
    Ok(Json(
        integration::get_for_application_id_and_kind(&id, &kind).await?,
    ))
}

async fn update_integration(
    State(s): State<ApiState>,
    Path((id, kind)): Path<(Uuid, String)>,
    b: Bytes,
) -> Result<Json<Integration>, Error> {
    let i: Integration = serde_json::from_slice(&b)?;
    let existing = integration::get_for_application_id_and_kind(&id, &kind).await?;
    let i = Integration {
        settings: i.settings,
        ..existing
    };
    s.handler.validate_integration(&i).await?;
    Ok(Json(integration::update(i).await?))
}

async fn delete_integration(Path((id, kind)): Path<(Uuid, String)>) -> Result<StatusCode, Error> {
    let i = integration::get_for_application_id_and_kind(&id, &kind).await?;
    integration::delete(&i.id).await?;
    Ok(StatusCode::OK)
}

async fn create_device(State(s): State<ApiState>, b: Bytes) -> Result<Json<Device>, Error> {
    let d: Device = serde_json::from_slice(&b)?;
    Ok(Json(s.sync.create_device(d).await?))
}

async fn get_device(Path(dev_eui): Path<EUI64>) -> Result<Json<Device>, Error> {
    Ok(Json(device::get(&dev_eui).await?))
}

async fn update_device(
    State(s): State<ApiState>,
    Path(dev_eui): Path<EUI64>,
    b: Bytes,
) -> Result<Json<Device>, Error> {
    let d: Device = serde_json::from_slice(&b)?;
    Ok(Json(s.sync.update_device(Device { dev_eui, ..d }).await?))
}

async fn delete_device(
    State(s): State<ApiState>,
    Path(dev_eui): Path<EUI64>,
) -> Result<StatusCode, Error> {
    s.sync.delete_device(&dev_eui).await?;
    Ok(StatusCode::OK)
}

async fn create_device_keys(
    Path(dev_eui): Path<EUI64>,
    b: Bytes,
) -> Result<Json<DeviceKeys>, Error> {
    let dk: DeviceKeys = serde_json::from_slice(&b)?;
    Ok(Json(device_keys::create(DeviceKeys { dev_eui, ..dk }).await?))
}

async fn get_device_keys(Path(dev_eui): Path<EUI64>) -> Result<Json<DeviceKeys>, Error> {
    Ok(Json(device_keys::get(&dev_eui).await?))
}

async fn update_device_keys(
    Path(dev_eui): Path<EUI64>,
    b: Bytes,
) -> Result<Json<DeviceKeys>, Error> {
    let dk: DeviceKeys = serde_json::from_slice(&b)?;
    Ok(Json(device_keys::update(DeviceKeys { dev_eui, ..dk }).await?))
}

async fn delete_device_keys(Path(dev_eui): Path<EUI64>) -> Result<StatusCode, Error> {
    device_keys::delete(&dev_eui).await?;
    Ok(StatusCode::OK)
}

async fn get_device_activation(
    Path(dev_eui): Path<EUI64>,
) -> Result<Json<DeviceActivation>, Error> {
    Ok(Json(
        device_activation::get_last_for_dev_eui(&dev_eui).await?,
    ))
}

async fn list_device_activations(
    Path(dev_eui): Path<EUI64>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<DeviceActivation>>, Error> {
    Ok(Json(
        device_activation::list_for_dev_eui(&dev_eui, q.limit, q.offset).await?,
    ))
}
