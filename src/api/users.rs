use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::api::Pagination;
use crate::auth::auth::AuthUser;
use crate::auth::password::hash_password;
use crate::auth::account::forget_account;
use crate::db::{is_foreign_key_violation, is_unique_violation, is_unique_violation_on};
use crate::error::{AppError, AppResult};
use crate::model::role::Role;
use crate::model::user::{USER_COLUMNS, User, UserResponse};
use crate::utils::db_utils::{UpdateBuilder, execute_update};
use crate::utils::{Identity, is_identity_available, release, remember};

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "jane@example.com")]
    pub email: String,
    #[schema(example = "jane")]
    pub username: String,
    #[schema(example = "Jane Doe")]
    pub full_name: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
    /// Admin only
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

fn validate_new_user(user: &CreateUser) -> Result<(), &'static str> {
    if user.username.trim().is_empty() {
        return Err("username must not be empty");
    }
    if !user.email.contains('@') {
        return Err("email is not valid");
    }
    if user.full_name.trim().is_empty() {
        return Err("full_name must not be empty");
    }
    if user.password.is_empty() {
        return Err("password must not be empty");
    }
    Ok(())
}

async fn fetch_user(pool: &MySqlPool, user_id: u64) -> AppResult<User> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

/// Names the identity a duplicate-key insert or update collided with.
fn duplicate_identity(err: &sqlx::Error) -> AppError {
    if is_unique_violation_on(err, "uq_users_email") {
        AppError::bad_request("Email already registered")
    } else {
        AppError::bad_request("Username already taken")
    }
}

/// Fails with the user-facing message when the identity belongs to someone.
async fn ensure_available(identity: Identity<'_>, pool: &MySqlPool) -> AppResult<()> {
    if is_identity_available(identity, pool).await? {
        return Ok(());
    }
    Err(AppError::bad_request(match identity {
        Identity::Email(_) => "Email already registered",
        Identity::Username(_) => "Username already taken",
    }))
}

/// The authenticated user
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn me(auth: AuthUser, pool: web::Data<MySqlPool>) -> AppResult<impl Responder> {
    let user = fetch_user(pool.get_ref(), auth.user_id).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/// List users (manager)
#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(Pagination),
    responses(
        (status = 200, description = "Users", body = [UserResponse]),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<Pagination>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;

    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY id ASC LIMIT ? OFFSET ?"
    ))
    .bind(page.limit())
    .bind(page.skip())
    .fetch_all(pool.get_ref())
    .await?;

    let body: Vec<UserResponse> = users.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// Create a user (admin)
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Email or username already in use", body = Object, example = json!({
            "detail": "Username already taken"
        })),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
#[instrument(name = "create_user", skip(auth, pool, payload), fields(username = %payload.username))]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> AppResult<impl Responder> {
    auth.require_admin()?;
    validate_new_user(&payload).map_err(AppError::bad_request)?;

    let email = payload.email.trim().to_lowercase();
    let username = payload.username.trim();

    ensure_available(Identity::Email(&email), pool.get_ref()).await?;
    ensure_available(Identity::Username(username), pool.get_ref()).await?;

    let hashed = hash_password(&payload.password)?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (email, username, full_name, hashed_password, role)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&email)
    .bind(username)
    .bind(payload.full_name.trim())
    .bind(&hashed)
    .bind(payload.role.as_ref())
    .execute(pool.get_ref())
    .await;

    let result = match inserted {
        Ok(r) => r,
        Err(e) if is_unique_violation(&e) => {
            // registered between the availability check and the insert
            warn!(error = %e, "Duplicate identity on insert");
            return Err(duplicate_identity(&e));
        }
        Err(e) => return Err(e.into()),
    };

    remember(Identity::Email(&email)).await;
    remember(Identity::Username(username)).await;

    let user = fetch_user(pool.get_ref(), result.last_insert_id()).await?;
    info!(user_id = user.id, created_by = auth.user_id, role = %user.role, "User created");

    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

/// Get a user (manager)
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;

    let user = fetch_user(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/// Update a user (manager; role changes need an admin)
#[utoipa::path(
    put,
    path = "/api/v1/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Email or username already in use"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateUser>,
) -> AppResult<impl Responder> {
    auth.require_manager()?;
    let user_id = path.into_inner();
    let payload = payload.into_inner();

    if payload.role.is_some() {
        auth.require_admin()?;
    }

    let existing = fetch_user(pool.get_ref(), user_id).await?;

    let email = payload
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| *e != existing.email.to_lowercase());
    let username = payload
        .username
        .map(|u| u.trim().to_owned())
        .filter(|u| u.to_lowercase() != existing.username.to_lowercase());

    if let Some(email) = &email {
        if !email.contains('@') {
            return Err(AppError::bad_request("email is not valid"));
        }
        ensure_available(Identity::Email(email), pool.get_ref()).await?;
    }
    if let Some(username) = &username {
        if username.is_empty() {
            return Err(AppError::bad_request("username must not be empty"));
        }
        ensure_available(Identity::Username(username), pool.get_ref()).await?;
    }

    let hashed = match payload.password.as_deref() {
        Some("") => return Err(AppError::bad_request("password must not be empty")),
        Some(p) => Some(hash_password(p)?),
        None => None,
    };

    let update = UpdateBuilder::new("users")
        .set("email", email.clone())
        .set("username", username.clone())
        .set("full_name", payload.full_name)
        .set("hashed_password", hashed)
        .set("role", payload.role.map(|r| r.as_ref().to_owned()))
        .set("is_active", payload.is_active)
        .build("id", user_id);

    if let Some(update) = update {
        let mut conn = pool.acquire().await?;
        match execute_update(&mut conn, update).await {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(duplicate_identity(&e)),
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(email) = &email {
        release(Identity::Email(&existing.email)).await;
        remember(Identity::Email(email)).await;
    }
    if let Some(username) = &username {
        release(Identity::Username(&existing.username)).await;
        remember(Identity::Username(username)).await;
    }

    forget_account(user_id).await;

    let user = fetch_user(pool.get_ref(), user_id).await?;
    info!(user_id, updated_by = auth.user_id, "User updated");

    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/// Delete a user (admin)
#[utoipa::path(
    delete,
    path = "/api/v1/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted", body = Object, example = json!({
            "message": "User deleted successfully"
        })),
        (status = 400, description = "Cannot delete yourself, or the user has history"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> AppResult<impl Responder> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    let user = fetch_user(pool.get_ref(), user_id).await?;

    if user.id == auth.user_id {
        return Err(AppError::bad_request("Cannot delete yourself"));
    }

    let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(pool.get_ref())
        .await;

    match deleted {
        Ok(_) => {}
        Err(e) if is_foreign_key_violation(&e) => {
            return Err(AppError::bad_request(
                "User has time or vacation records; deactivate the account instead",
            ));
        }
        Err(e) => return Err(e.into()),
    }

    forget_account(user_id).await;
    release(Identity::Email(&user.email)).await;
    release(Identity::Username(&user.username)).await;
    info!(user_id, deleted_by = auth.user_id, "User deleted");

    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted successfully" })))
}
