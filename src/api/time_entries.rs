use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::api::Pagination;
use crate::auth::auth::AuthUser;
use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult};
use crate::model::location::validate_coordinates;
use crate::model::time_entry::{
    EntryType, OpenShift, TIME_ENTRY_SELECT, TimeEntryResponse, TimeEntryRow,
};
use crate::services::geofence::{LocationAccess, LocationLookup, validate_location_access};
use crate::utils::db_utils::{UpdateBuilder, execute_update};

#[derive(Deserialize, ToSchema)]
pub struct ClockInRequest {
    #[schema(example = 1)]
    pub location_id: u64,
    #[schema(example = 40.7128)]
    pub latitude: f64,
    #[schema(example = json!(-74.0060))]
    pub longitude: f64,
    /// Reported GPS accuracy in meters
    #[schema(example = 8.5)]
    pub accuracy: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ClockOutRequest {
    #[schema(example = 40.7128)]
    pub latitude: f64,
    #[schema(example = json!(-74.0060))]
    pub longitude: f64,
    #[schema(example = 8.5)]
    pub accuracy: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateTimeEntry {
    pub notes: Option<String>,
}

async fn open_clock_in_id(pool: &MySqlPool, user_id: u64) -> Result<Option<u64>, sqlx::Error> {
    sqlx::query_scalar("SELECT clock_in_entry_id FROM open_shifts WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Decides whether a clock-in may proceed. An open shift refuses it before
/// the location is even looked up; then the geofence decides.
async fn admit_clock_in<L>(
    lookup: &L,
    open_clock_in: Option<u64>,
    location_id: u64,
    latitude: f64,
    longitude: f64,
) -> AppResult<()>
where
    L: LocationLookup + Sync + ?Sized,
    AppError: From<L::Error>,
{
    if open_clock_in.is_some() {
        return Err(AppError::bad_request("You are already clocked in"));
    }

    match validate_location_access(lookup, location_id, latitude, longitude).await? {
        LocationAccess::Granted => Ok(()),
        LocationAccess::Denied(denial) => Err(denial.into()),
    }
}

/// Failure while recording the open shift. A duplicate key means another
/// clock-in for the same user committed first.
fn shift_claim_error(err: sqlx::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::bad_request("You are already clocked in")
    } else {
        err.into()
    }
}

fn require_open_shift(open: Option<OpenShift>) -> AppResult<OpenShift> {
    open.ok_or_else(|| AppError::bad_request("You are not currently clocked in"))
}

async fn fetch_entry(pool: &MySqlPool, entry_id: u64) -> AppResult<TimeEntryRow> {
    sqlx::query_as::<_, TimeEntryRow>(&format!("{TIME_ENTRY_SELECT} WHERE t.id = ?"))
        .bind(entry_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Time entry not found"))
}

/// Clock in at a location
#[utoipa::path(
    post,
    path = "/api/v1/time-entries/clock-in",
    request_body = ClockInRequest,
    responses(
        (status = 200, description = "Clocked in", body = TimeEntryResponse),
        (status = 400, description = "Already clocked in, location inactive or out of range", body = Object, example = json!({
            "detail": "You are 250m away from the work area"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Location not found", body = Object, example = json!({
            "detail": "Location not found"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Time entries"
)]
pub async fn clock_in(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ClockInRequest>,
) -> AppResult<impl Responder> {
    let user_id = auth.user_id;
    validate_coordinates(payload.latitude, payload.longitude).map_err(AppError::bad_request)?;

    let open = open_clock_in_id(pool.get_ref(), user_id).await?;
    if let Err(e) = admit_clock_in(
        pool.get_ref(),
        open,
        payload.location_id,
        payload.latitude,
        payload.longitude,
    )
    .await
    {
        info!(user_id, username = %auth.username, location_id = payload.location_id, reason = %e, "Clock-in refused");
        return Err(e);
    }

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO time_entries
            (user_id, location_id, entry_type, recorded_at, latitude, longitude, accuracy, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(payload.location_id)
    .bind(EntryType::ClockIn.as_ref())
    .bind(Utc::now())
    .bind(payload.latitude)
    .bind(payload.longitude)
    .bind(payload.accuracy)
    .bind(&payload.notes)
    .execute(&mut *tx)
    .await?;
    let entry_id = inserted.last_insert_id();

    // The primary key on open_shifts.user_id is what makes a concurrent
    // second clock-in fail here.
    let claimed = sqlx::query(
        "INSERT INTO open_shifts (user_id, clock_in_entry_id, location_id) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(entry_id)
    .bind(payload.location_id)
    .execute(&mut *tx)
    .await;

    if let Err(e) = claimed {
        warn!(user_id, error = %e, "Could not record open shift");
        return Err(shift_claim_error(e));
    }

    tx.commit().await?;
    info!(user_id, username = %auth.username, entry_id, location_id = payload.location_id, "Clocked in");

    let row = fetch_entry(pool.get_ref(), entry_id).await?;
    Ok(HttpResponse::Ok().json(TimeEntryResponse::from_row(row, Some(entry_id))))
}

/// Clock out of the current shift
#[utoipa::path(
    post,
    path = "/api/v1/time-entries/clock-out",
    request_body = ClockOutRequest,
    responses(
        (status = 200, description = "Clocked out", body = TimeEntryResponse),
        (status = 400, description = "Not clocked in", body = Object, example = json!({
            "detail": "You are not currently clocked in"
        })),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Time entries"
)]
pub async fn clock_out(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ClockOutRequest>,
) -> AppResult<impl Responder> {
    let user_id = auth.user_id;
    validate_coordinates(payload.latitude, payload.longitude).map_err(AppError::bad_request)?;

    let mut tx = pool.begin().await?;

    let open = sqlx::query_as::<_, OpenShift>(
        "SELECT user_id, clock_in_entry_id, location_id FROM open_shifts WHERE user_id = ? FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let open = require_open_shift(open)?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO time_entries
            (user_id, location_id, entry_type, recorded_at, latitude, longitude, accuracy, notes, clock_in_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(open.user_id)
    .bind(open.location_id)
    .bind(EntryType::ClockOut.as_ref())
    .bind(Utc::now())
    .bind(payload.latitude)
    .bind(payload.longitude)
    .bind(payload.accuracy)
    .bind(&payload.notes)
    .bind(open.clock_in_entry_id)
    .execute(&mut *tx)
    .await?;
    let entry_id = inserted.last_insert_id();

    sqlx::query("DELETE FROM open_shifts WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(user_id, entry_id, clock_in_id = open.clock_in_entry_id, "Clocked out");

    let row = fetch_entry(pool.get_ref(), entry_id).await?;
    Ok(HttpResponse::Ok().json(TimeEntryResponse::from_row(row, None)))
}

/// Current user's time entries, newest first
#[utoipa::path(
    get,
    path = "/api/v1/time-entries/my-entries",
    params(Pagination),
    responses(
        (status = 200, description = "Time entries", body = [TimeEntryResponse]),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Time entries"
)]
pub async fn my_entries(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<Pagination>,
) -> AppResult<impl Responder> {
    let open = open_clock_in_id(pool.get_ref(), auth.user_id).await?;

    let rows = sqlx::query_as::<_, TimeEntryRow>(&format!(
        "{TIME_ENTRY_SELECT} WHERE t.user_id = ? ORDER BY t.recorded_at DESC, t.id DESC LIMIT ? OFFSET ?"
    ))
    .bind(auth.user_id)
    .bind(page.limit())
    .bind(page.skip())
    .fetch_all(pool.get_ref())
    .await?;

    let entries: Vec<_> = rows
        .into_iter()
        .map(|row| TimeEntryResponse::from_row(row, open))
        .collect();

    Ok(HttpResponse::Ok().json(entries))
}

/// Current user's open clock-in
#[utoipa::path(
    get,
    path = "/api/v1/time-entries/my-active",
    responses(
        (status = 200, description = "Open clock-in", body = TimeEntryResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No active time entry found")
    ),
    security(("bearer_auth" = [])),
    tag = "Time entries"
)]
pub async fn my_active_entry(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> AppResult<impl Responder> {
    let row = sqlx::query_as::<_, TimeEntryRow>(&format!(
        "{TIME_ENTRY_SELECT} JOIN open_shifts o ON o.clock_in_entry_id = t.id WHERE o.user_id = ?"
    ))
    .bind(auth.user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::not_found("No active time entry found"))?;

    let id = row.entry.id;
    Ok(HttpResponse::Ok().json(TimeEntryResponse::from_row(row, Some(id))))
}

/// Every open clock-in across users (manager)
#[utoipa::path(
    get,
    path = "/api/v1/time-entries/active-employees",
    responses(
        (status = 200, description = "Open clock-ins", body = [TimeEntryResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Time entries"
)]
pub async fn active_employees(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;

    let rows = sqlx::query_as::<_, TimeEntryRow>(&format!(
        "{TIME_ENTRY_SELECT} JOIN open_shifts o ON o.clock_in_entry_id = t.id ORDER BY t.recorded_at ASC"
    ))
    .fetch_all(pool.get_ref())
    .await?;

    let entries: Vec<_> = rows
        .into_iter()
        .map(|row| {
            let id = row.entry.id;
            TimeEntryResponse::from_row(row, Some(id))
        })
        .collect();

    Ok(HttpResponse::Ok().json(entries))
}

/// Edit the notes of a time entry (manager)
#[utoipa::path(
    put,
    path = "/api/v1/time-entries/{entry_id}",
    params(("entry_id" = u64, Path, description = "Time entry ID")),
    request_body = UpdateTimeEntry,
    responses(
        (status = 200, description = "Updated entry", body = TimeEntryResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Time entry not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Time entries"
)]
pub async fn update_time_entry(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateTimeEntry>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;
    let entry_id = path.into_inner();

    let existing = fetch_entry(pool.get_ref(), entry_id).await?;

    if let Some(update) = UpdateBuilder::new("time_entries")
        .set("notes", payload.into_inner().notes)
        .build("id", entry_id)
    {
        let mut conn = pool.acquire().await?;
        execute_update(&mut conn, update).await?;
        info!(entry_id, edited_by = auth.user_id, "Time entry notes updated");
    }

    let open = open_clock_in_id(pool.get_ref(), existing.entry.user_id).await?;
    let row = fetch_entry(pool.get_ref(), entry_id).await?;
    Ok(HttpResponse::Ok().json(TimeEntryResponse::from_row(row, open)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{duplicate_key, foreign_key};
    use crate::model::location::Location;
    use actix_web::{ResponseError, http::StatusCode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const OFFICE: (f64, f64) = (40.7128, -74.0060);

    /// Counts lookups so tests can tell whether the geofence was consulted.
    struct Sites {
        locations: Vec<Location>,
        lookups: AtomicUsize,
    }

    impl Sites {
        fn new(locations: Vec<Location>) -> Self {
            Self { locations, lookups: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LocationLookup for Sites {
        type Error = sqlx::Error;

        async fn find_location_by_id(&self, id: u64) -> Result<Option<Location>, Self::Error> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.locations.iter().find(|l| l.id == id).cloned())
        }

        async fn list_active_locations(&self) -> Result<Vec<Location>, Self::Error> {
            Ok(self.locations.iter().filter(|l| l.is_active).cloned().collect())
        }
    }

    fn office(id: u64, is_active: bool) -> Location {
        Location {
            id,
            name: "Head office".into(),
            address: "1 Centre St".into(),
            latitude: OFFICE.0,
            longitude: OFFICE.1,
            radius_meters: 100,
            is_active,
            description: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn detail(err: &AppError) -> (StatusCode, String) {
        (err.status_code(), err.to_string())
    }

    #[actix_web::test]
    async fn inside_the_geofence_is_admitted() {
        let sites = Sites::new(vec![office(1, true)]);
        assert!(admit_clock_in(&sites, None, 1, OFFICE.0, OFFICE.1).await.is_ok());
    }

    #[actix_web::test]
    async fn open_shift_refuses_before_the_location_is_checked() {
        let sites = Sites::new(vec![office(1, true)]);

        // even an unknown location reports the open shift first
        let err = admit_clock_in(&sites, Some(7), 99, 0.0, 0.0).await.unwrap_err();
        assert_eq!(
            detail(&err),
            (StatusCode::BAD_REQUEST, "You are already clocked in".to_string())
        );
        assert_eq!(sites.lookups.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn unknown_location_is_not_found() {
        let sites = Sites::new(vec![office(1, true)]);
        let err = admit_clock_in(&sites, None, 42, OFFICE.0, OFFICE.1).await.unwrap_err();
        assert_eq!(detail(&err), (StatusCode::NOT_FOUND, "Location not found".to_string()));
    }

    #[actix_web::test]
    async fn inactive_location_is_a_bad_request() {
        let sites = Sites::new(vec![office(1, false)]);
        let err = admit_clock_in(&sites, None, 1, OFFICE.0, OFFICE.1).await.unwrap_err();
        assert_eq!(
            detail(&err),
            (StatusCode::BAD_REQUEST, "Location is not active".to_string())
        );
    }

    #[actix_web::test]
    async fn out_of_range_reports_the_distance() {
        let sites = Sites::new(vec![office(1, true)]);
        // Times Square, about 5.4 km north
        let err = admit_clock_in(&sites, None, 1, 40.7589, -73.9851).await.unwrap_err();
        let (status, message) = detail(&err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.starts_with("You are 54"), "{message}");
        assert!(message.ends_with("m away from the work area"), "{message}");
    }

    #[test]
    fn losing_the_open_shift_race_reads_as_already_clocked_in() {
        let err = shift_claim_error(duplicate_key("open_shifts.PRIMARY"));
        assert_eq!(
            detail(&err),
            (StatusCode::BAD_REQUEST, "You are already clocked in".to_string())
        );

        let other = shift_claim_error(foreign_key());
        assert_eq!(other.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn clock_out_needs_an_open_shift() {
        let err = require_open_shift(None).unwrap_err();
        assert_eq!(
            detail(&err),
            (StatusCode::BAD_REQUEST, "You are not currently clocked in".to_string())
        );

        let shift = OpenShift { user_id: 3, clock_in_entry_id: 11, location_id: 1 };
        let open = require_open_shift(Some(shift)).unwrap();
        assert_eq!(open.clock_in_entry_id, 11);
    }
}
