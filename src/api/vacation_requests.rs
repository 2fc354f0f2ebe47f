use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::api::Pagination;
use crate::auth::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::model::vacation_request::{
    VACATION_COLUMNS, VacationAction, VacationRequest, VacationRequestResponse, VacationStatus,
    VacationType,
};
use crate::utils::db_utils::{UpdateBuilder, execute_update};

#[derive(Deserialize, ToSchema)]
pub struct CreateVacationRequest {
    #[schema(value_type = String, format = "date-time", example = "2026-07-01T00:00:00Z")]
    pub start_date: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time", example = "2026-07-05T00:00:00Z")]
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub vacation_type: VacationType,
    #[schema(example = "Family trip")]
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateVacationRequest {
    #[schema(value_type = Option<String>, format = "date-time")]
    pub start_date: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub end_date: Option<DateTime<Utc>>,
    pub vacation_type: Option<VacationType>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct RejectQuery {
    /// Shown to the employee
    pub rejection_reason: String,
}

fn validate_dates(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), &'static str> {
    if start >= end {
        return Err("Start date must be before end date");
    }
    if start < Utc::now() {
        return Err("Start date cannot be in the past");
    }
    Ok(())
}

async fn fetch_request(pool: &MySqlPool, request_id: u64) -> AppResult<VacationRequest> {
    sqlx::query_as::<_, VacationRequest>(&format!(
        "SELECT {VACATION_COLUMNS} FROM vacation_requests WHERE id = ?"
    ))
    .bind(request_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Vacation request not found"))
}

/// Moves a pending request to the status `action` leads to.
///
/// The UPDATE is guarded on `status = 'pending'`, so of two concurrent
/// transitions only the first one changes a row.
async fn transition(
    pool: &MySqlPool,
    request: &VacationRequest,
    action: VacationAction,
    builder: UpdateBuilder,
    not_pending: &'static str,
) -> AppResult<VacationStatus> {
    let next = request
        .status
        .apply(action)
        .map_err(|_| AppError::bad_request(not_pending))?;

    let update = builder
        .set("status", Some(next.as_ref()))
        .guard("status", VacationStatus::Pending.as_ref())
        .build("id", request.id);

    let Some(update) = update else {
        return Ok(request.status);
    };

    let mut conn = pool.acquire().await?;
    if execute_update(&mut conn, update).await? == 0 {
        return Err(AppError::bad_request(not_pending));
    }

    Ok(next)
}

/// Current user's vacation requests, newest first
#[utoipa::path(
    get,
    path = "/api/v1/vacation-requests/my-requests",
    params(Pagination),
    responses(
        (status = 200, description = "Vacation requests", body = [VacationRequestResponse]),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacation requests"
)]
pub async fn my_requests(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<Pagination>,
) -> AppResult<impl Responder> {
    let requests = sqlx::query_as::<_, VacationRequest>(&format!(
        "SELECT {VACATION_COLUMNS} FROM vacation_requests WHERE user_id = ? \
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    ))
    .bind(auth.user_id)
    .bind(page.limit())
    .bind(page.skip())
    .fetch_all(pool.get_ref())
    .await?;

    let body: Vec<VacationRequestResponse> = requests.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// Pending requests of every user (manager)
#[utoipa::path(
    get,
    path = "/api/v1/vacation-requests/pending",
    params(Pagination),
    responses(
        (status = 200, description = "Pending requests", body = [VacationRequestResponse]),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacation requests"
)]
pub async fn pending_requests(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<Pagination>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;

    let requests = sqlx::query_as::<_, VacationRequest>(&format!(
        "SELECT {VACATION_COLUMNS} FROM vacation_requests WHERE status = ? \
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    ))
    .bind(VacationStatus::Pending.as_ref())
    .bind(page.limit())
    .bind(page.skip())
    .fetch_all(pool.get_ref())
    .await?;

    let body: Vec<VacationRequestResponse> = requests.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// Submit a vacation request
#[utoipa::path(
    post,
    path = "/api/v1/vacation-requests",
    request_body = CreateVacationRequest,
    responses(
        (status = 201, description = "Request created", body = VacationRequestResponse),
        (status = 400, description = "Invalid dates", body = Object, example = json!({
            "detail": "Start date must be before end date"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Vacation requests"
)]
pub async fn create_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateVacationRequest>,
) -> AppResult<impl Responder> {
    let payload = payload.into_inner();
    validate_dates(payload.start_date, payload.end_date).map_err(AppError::bad_request)?;

    let result = sqlx::query(
        r#"
        INSERT INTO vacation_requests (user_id, start_date, end_date, vacation_type, status, reason, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(auth.user_id)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(payload.vacation_type.as_ref())
    .bind(VacationStatus::Pending.as_ref())
    .bind(&payload.reason)
    .bind(&payload.notes)
    .execute(pool.get_ref())
    .await?;

    let request = fetch_request(pool.get_ref(), result.last_insert_id()).await?;
    info!(request_id = request.id, user_id = auth.user_id, "Vacation request submitted");

    Ok(HttpResponse::Created().json(VacationRequestResponse::from(request)))
}

/// Get a vacation request (owner or manager)
#[utoipa::path(
    get,
    path = "/api/v1/vacation-requests/{request_id}",
    params(("request_id" = u64, Path, description = "Vacation request ID")),
    responses(
        (status = 200, description = "Vacation request", body = VacationRequestResponse),
        (status = 403, description = "Not enough permissions"),
        (status = 404, description = "Vacation request not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacation requests"
)]
pub async fn get_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> AppResult<impl Responder> {
    let request = fetch_request(pool.get_ref(), path.into_inner()).await?;
    auth.require_owner_or_manager(request.user_id)?;

    Ok(HttpResponse::Ok().json(VacationRequestResponse::from(request)))
}

/// Edit a pending request (owner)
#[utoipa::path(
    put,
    path = "/api/v1/vacation-requests/{request_id}",
    params(("request_id" = u64, Path, description = "Vacation request ID")),
    request_body = UpdateVacationRequest,
    responses(
        (status = 200, description = "Updated request", body = VacationRequestResponse),
        (status = 400, description = "Request is no longer pending or dates are invalid"),
        (status = 403, description = "Not enough permissions"),
        (status = 404, description = "Vacation request not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacation requests"
)]
pub async fn update_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateVacationRequest>,
) -> AppResult<impl Responder> {
    let request_id = path.into_inner();
    let payload = payload.into_inner();
    let request = fetch_request(pool.get_ref(), request_id).await?;

    if request.user_id != auth.user_id {
        return Err(AppError::forbidden("Not enough permissions"));
    }
    if request.status != VacationStatus::Pending {
        return Err(AppError::bad_request("Cannot update non-pending request"));
    }

    if payload.start_date.is_some() || payload.end_date.is_some() {
        validate_dates(
            payload.start_date.unwrap_or(request.start_date),
            payload.end_date.unwrap_or(request.end_date),
        )
        .map_err(AppError::bad_request)?;
    }

    let update = UpdateBuilder::new("vacation_requests")
        .set("start_date", payload.start_date)
        .set("end_date", payload.end_date)
        .set("vacation_type", payload.vacation_type.map(|t| t.as_ref().to_owned()))
        .set("reason", payload.reason)
        .set("notes", payload.notes)
        .guard("status", VacationStatus::Pending.as_ref())
        .build("id", request_id);

    if let Some(update) = update {
        let mut conn = pool.acquire().await?;
        if execute_update(&mut conn, update).await? == 0 {
            // approved or rejected in between
            return Err(AppError::bad_request("Cannot update non-pending request"));
        }
    }

    let request = fetch_request(pool.get_ref(), request_id).await?;
    Ok(HttpResponse::Ok().json(VacationRequestResponse::from(request)))
}

/// Approve a pending request (manager)
#[utoipa::path(
    put,
    path = "/api/v1/vacation-requests/{request_id}/approve",
    params(("request_id" = u64, Path, description = "Vacation request ID")),
    responses(
        (status = 200, description = "Approved", body = Object, example = json!({
            "message": "Vacation request approved"
        })),
        (status = 400, description = "Request is not pending"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Vacation request not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacation requests"
)]
pub async fn approve_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;
    let request = fetch_request(pool.get_ref(), path.into_inner()).await?;

    let builder = UpdateBuilder::new("vacation_requests")
        .set("approved_by", Some(auth.user_id))
        .set("approved_at", Some(Utc::now()));

    transition(
        pool.get_ref(),
        &request,
        VacationAction::Approve,
        builder,
        "Request is not pending",
    )
    .await?;
    info!(request_id = request.id, approved_by = auth.user_id, "Vacation request approved");

    Ok(HttpResponse::Ok().json(json!({ "message": "Vacation request approved" })))
}

/// Reject a pending request (manager)
#[utoipa::path(
    put,
    path = "/api/v1/vacation-requests/{request_id}/reject",
    params(
        ("request_id" = u64, Path, description = "Vacation request ID"),
        RejectQuery
    ),
    responses(
        (status = 200, description = "Rejected", body = Object, example = json!({
            "message": "Vacation request rejected"
        })),
        (status = 400, description = "Request is not pending"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Vacation request not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacation requests"
)]
pub async fn reject_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<RejectQuery>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;
    let request = fetch_request(pool.get_ref(), path.into_inner()).await?;

    let builder = UpdateBuilder::new("vacation_requests")
        .set("rejection_reason", Some(query.into_inner().rejection_reason));

    transition(
        pool.get_ref(),
        &request,
        VacationAction::Reject,
        builder,
        "Request is not pending",
    )
    .await?;
    info!(request_id = request.id, rejected_by = auth.user_id, "Vacation request rejected");

    Ok(HttpResponse::Ok().json(json!({ "message": "Vacation request rejected" })))
}

/// Cancel a pending request (owner)
#[utoipa::path(
    delete,
    path = "/api/v1/vacation-requests/{request_id}",
    params(("request_id" = u64, Path, description = "Vacation request ID")),
    responses(
        (status = 200, description = "Cancelled", body = Object, example = json!({
            "message": "Vacation request cancelled"
        })),
        (status = 400, description = "Cannot cancel non-pending request"),
        (status = 403, description = "Not enough permissions"),
        (status = 404, description = "Vacation request not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacation requests"
)]
pub async fn cancel_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> AppResult<impl Responder> {
    let request = fetch_request(pool.get_ref(), path.into_inner()).await?;

    if request.user_id != auth.user_id {
        return Err(AppError::forbidden("Not enough permissions"));
    }

    transition(
        pool.get_ref(),
        &request,
        VacationAction::Cancel,
        UpdateBuilder::new("vacation_requests"),
        "Cannot cancel non-pending request",
    )
    .await?;
    info!(request_id = request.id, user_id = auth.user_id, "Vacation request cancelled");

    Ok(HttpResponse::Ok().json(json!({ "message": "Vacation request cancelled" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn start_must_precede_end() {
        let start = Utc::now() + Duration::days(10);
        assert_eq!(
            validate_dates(start, start),
            Err("Start date must be before end date")
        );
        assert_eq!(
            validate_dates(start, start - Duration::days(1)),
            Err("Start date must be before end date")
        );
        assert!(validate_dates(start, start + Duration::days(4)).is_ok());
    }

    #[test]
    fn start_in_the_past_is_refused() {
        let start = Utc::now() - Duration::days(1);
        assert_eq!(
            validate_dates(start, start + Duration::days(3)),
            Err("Start date cannot be in the past")
        );
    }

    #[test]
    fn type_defaults_to_vacation_when_omitted() {
        let payload: CreateVacationRequest = serde_json::from_value(json!({
            "start_date": "2099-07-01T00:00:00Z",
            "end_date": "2099-07-05T00:00:00Z",
            "reason": "Family trip"
        }))
        .unwrap();

        assert_eq!(payload.vacation_type, VacationType::Vacation);
        assert!(payload.notes.is_none());
    }
}
