use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::api::Pagination;
use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::db::LOCATION_COLUMNS;
use crate::error::{AppError, AppResult};
use crate::model::location::{
    Location, validate_coordinates, validate_latitude, validate_longitude, validate_radius,
};
use crate::services::geofence::{
    LocationLookup, find_nearest_location, get_distance_to_location, is_within_geofence,
};
use crate::utils::db_utils::{UpdateBuilder, execute_update};

#[derive(Deserialize, ToSchema)]
pub struct CreateLocation {
    #[schema(example = "Head office")]
    pub name: String,
    #[schema(example = "1 Centre St, New York, NY")]
    pub address: String,
    #[schema(example = 40.7128)]
    pub latitude: f64,
    #[schema(example = json!(-74.0060))]
    pub longitude: f64,
    /// Defaults to the configured radius when omitted
    #[schema(example = 100)]
    pub radius_meters: Option<u32>,
    pub description: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateLocation {
    pub name: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_meters: Option<u32>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, IntoParams)]
pub struct PointQuery {
    #[param(example = 40.7130)]
    pub latitude: f64,
    #[param(example = json!(-74.0055))]
    pub longitude: f64,
}

#[derive(Serialize, ToSchema)]
pub struct NearestLocationResponse {
    pub location: Location,
    #[schema(example = 42.7)]
    pub distance_meters: f64,
    pub within_geofence: bool,
}

pub(crate) async fn fetch_location(pool: &MySqlPool, id: u64) -> AppResult<Location> {
    pool.find_location_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("Location not found"))
}

async fn page_of_locations(pool: &MySqlPool, active_only: bool, page: &Pagination) -> AppResult<Vec<Location>> {
    let filter = if active_only { "WHERE is_active = TRUE" } else { "" };
    let sql = format!("SELECT {LOCATION_COLUMNS} FROM locations {filter} ORDER BY id ASC LIMIT ? OFFSET ?");

    Ok(sqlx::query_as::<_, Location>(&sql)
        .bind(page.limit())
        .bind(page.skip())
        .fetch_all(pool)
        .await?)
}

/// List active locations
#[utoipa::path(
    get,
    path = "/api/v1/locations",
    params(Pagination),
    responses(
        (status = 200, description = "Active locations", body = [Location]),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Locations"
)]
pub async fn list_locations(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<Pagination>,
) -> AppResult<impl Responder> {
    let locations = page_of_locations(pool.get_ref(), true, &page).await?;
    Ok(HttpResponse::Ok().json(locations))
}

/// List all locations, including inactive ones (manager)
#[utoipa::path(
    get,
    path = "/api/v1/locations/all",
    params(Pagination),
    responses(
        (status = 200, description = "All locations", body = [Location]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Locations"
)]
pub async fn list_all_locations(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<Pagination>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;

    let locations = page_of_locations(pool.get_ref(), false, &page).await?;
    Ok(HttpResponse::Ok().json(locations))
}

/// Create a location (manager)
#[utoipa::path(
    post,
    path = "/api/v1/locations",
    request_body = CreateLocation,
    responses(
        (status = 201, description = "Location created", body = Location),
        (status = 400, description = "Invalid coordinates or radius"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Locations"
)]
pub async fn create_location(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<CreateLocation>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;

    let radius = payload.radius_meters.unwrap_or(config.default_radius_meters);
    validate_coordinates(payload.latitude, payload.longitude).map_err(AppError::bad_request)?;
    validate_radius(radius).map_err(AppError::bad_request)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO locations (name, address, latitude, longitude, radius_meters, description)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payload.name.trim())
    .bind(&payload.address)
    .bind(payload.latitude)
    .bind(payload.longitude)
    .bind(radius)
    .bind(&payload.description)
    .execute(pool.get_ref())
    .await?;

    let location = fetch_location(pool.get_ref(), result.last_insert_id()).await?;
    info!(location_id = location.id, created_by = auth.user_id, "Location created");

    Ok(HttpResponse::Created().json(location))
}

/// Get a location by id
#[utoipa::path(
    get,
    path = "/api/v1/locations/{location_id}",
    params(("location_id" = u64, Path, description = "Location ID")),
    responses(
        (status = 200, description = "Location found", body = Location),
        (status = 404, description = "Location not found", body = Object, example = json!({
            "detail": "Location not found"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Locations"
)]
pub async fn get_location(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> AppResult<impl Responder> {
    let location = fetch_location(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(location))
}

/// Update a location (manager)
#[utoipa::path(
    put,
    path = "/api/v1/locations/{location_id}",
    params(("location_id" = u64, Path, description = "Location ID")),
    request_body = UpdateLocation,
    responses(
        (status = 200, description = "Location updated", body = Location),
        (status = 400, description = "Invalid coordinates or radius"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Location not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Locations"
)]
pub async fn update_location(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateLocation>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;
    let location_id = path.into_inner();
    let payload = payload.into_inner();

    if let Some(lat) = payload.latitude {
        validate_latitude(lat).map_err(AppError::bad_request)?;
    }
    if let Some(lng) = payload.longitude {
        validate_longitude(lng).map_err(AppError::bad_request)?;
    }
    if let Some(radius) = payload.radius_meters {
        validate_radius(radius).map_err(AppError::bad_request)?;
    }

    // 404 before touching anything
    fetch_location(pool.get_ref(), location_id).await?;

    let update = UpdateBuilder::new("locations")
        .set("name", payload.name)
        .set("address", payload.address)
        .set("latitude", payload.latitude)
        .set("longitude", payload.longitude)
        .set("radius_meters", payload.radius_meters)
        .set("description", payload.description)
        .set("is_active", payload.is_active)
        .build("id", location_id);

    if let Some(update) = update {
        let mut conn = pool.acquire().await?;
        execute_update(&mut conn, update).await?;
    }

    let location = fetch_location(pool.get_ref(), location_id).await?;
    Ok(HttpResponse::Ok().json(location))
}

/// Remove a location (manager)
///
/// Locations referenced by past time entries are deactivated instead of
/// deleted so history stays intact.
#[utoipa::path(
    delete,
    path = "/api/v1/locations/{location_id}",
    params(("location_id" = u64, Path, description = "Location ID")),
    responses(
        (status = 200, description = "Location deleted or deactivated", body = Object, example = json!({
            "message": "Location deactivated"
        })),
        (status = 400, description = "Location has active time entries"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Location not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Locations"
)]
pub async fn delete_location(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;
    let location_id = path.into_inner();

    let mut tx = pool.begin().await?;

    let exists: Option<u64> = sqlx::query_scalar("SELECT id FROM locations WHERE id = ? FOR UPDATE")
        .bind(location_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(AppError::not_found("Location not found"));
    }

    let open_shifts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM open_shifts WHERE location_id = ?")
        .bind(location_id)
        .fetch_one(&mut *tx)
        .await?;
    if open_shifts > 0 {
        return Err(AppError::bad_request("Cannot delete location with active time entries"));
    }

    let history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM time_entries WHERE location_id = ?")
        .bind(location_id)
        .fetch_one(&mut *tx)
        .await?;

    let message = if history > 0 {
        sqlx::query("UPDATE locations SET is_active = FALSE WHERE id = ?")
            .bind(location_id)
            .execute(&mut *tx)
            .await?;
        "Location deactivated"
    } else {
        sqlx::query("DELETE FROM locations WHERE id = ?")
            .bind(location_id)
            .execute(&mut *tx)
            .await?;
        "Location deleted successfully"
    };

    tx.commit().await?;
    info!(location_id, removed_by = auth.user_id, outcome = message, "Location removed");

    Ok(HttpResponse::Ok().json(json!({ "message": message })))
}

/// Nearest active location to a point
#[utoipa::path(
    get,
    path = "/api/v1/locations/nearest",
    params(PointQuery),
    responses(
        (status = 200, description = "Nearest active location", body = NearestLocationResponse),
        (status = 400, description = "Invalid coordinates"),
        (status = 404, description = "No active locations")
    ),
    security(("bearer_auth" = [])),
    tag = "Locations"
)]
pub async fn nearest_location(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    point: web::Query<PointQuery>,
) -> AppResult<impl Responder> {
    validate_coordinates(point.latitude, point.longitude).map_err(AppError::bad_request)?;

    let active = pool.list_active_locations().await?;
    let nearest = find_nearest_location(&active, point.latitude, point.longitude)
        .ok_or_else(|| AppError::not_found("No active locations"))?;

    Ok(HttpResponse::Ok().json(NearestLocationResponse {
        distance_meters: get_distance_to_location(point.latitude, point.longitude, nearest),
        within_geofence: is_within_geofence(point.latitude, point.longitude, nearest),
        location: nearest.clone(),
    }))
}
