use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};
use serde_json::json;
use sqlx::MySqlPool;

use crate::auth::account::account_status;
use crate::auth::auth::AuthUser;
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;

/// Resolves the bearer token once per request, checks the account is still
/// active and stores the `AuthUser` in the request extensions.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .cloned()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App config missing"))?;
    let pool = req
        .app_data::<Data<MySqlPool>>()
        .cloned()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("Database pool missing"))?;

    let header_value = match req.headers().get("Authorization") {
        Some(h) => match h.to_str() {
            Ok(v) => v.to_owned(),
            Err(_) => return Ok(reject(req, "Invalid Authorization header encoding")),
        },
        None => return Ok(reject(req, "Missing Authorization header")),
    };

    let Some(token) = header_value.strip_prefix("Bearer ") else {
        return Ok(reject(req, "Authorization header must start with Bearer"));
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            return Ok(reject(req, "Invalid or expired token"));
        }
    };

    let account = account_status(pool.get_ref(), claims.user_id)
        .await
        .map_err(AppError::from)?;

    let auth_user = match AuthUser::resolve(claims, account) {
        Ok(user) => user,
        Err(e) => return Ok(reject(req, &e.to_string())),
    };

    req.extensions_mut().insert(auth_user);

    next.call(req).await
}

fn reject(req: ServiceRequest, detail: &str) -> ServiceResponse<BoxBody> {
    let resp = HttpResponse::Unauthorized().json(json!({ "detail": detail }));
    req.into_response(resp.map_into_boxed_body())
}
