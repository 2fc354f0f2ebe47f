use crate::{
    auth::{
        auth::bearer_token,
        jwt::{generate_access_token, generate_refresh_token, verify_token},
        password::verify_password,
    },
    config::Config,
    error::{AppError, AppResult},
    model::{
        role::Role,
        user::{USER_COLUMNS, User},
    },
    models::{LoginReqDto, TokenPair, TokenType},
};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use sqlx::{MySqlConnection, MySqlPool, Row};
use tracing::{debug, error, info, instrument};

/// Issues an access/refresh pair and stores the refresh `jti` on `conn`,
/// which may be an open transaction.
async fn issue_tokens(
    user_id: u64,
    username: &str,
    role_id: u8,
    config: &Config,
    conn: &mut MySqlConnection,
) -> AppResult<TokenPair> {
    let access_token = generate_access_token(
        user_id,
        username.to_owned(),
        role_id,
        &config.jwt_secret,
        config.access_token_ttl,
    )?;

    let (refresh_token, refresh_claims) = generate_refresh_token(
        user_id,
        username.to_owned(),
        role_id,
        &config.jwt_secret,
        config.refresh_token_ttl,
    )?;

    debug!(user_id, jti = %refresh_claims.jti, "Storing refresh token");

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(user_id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(&mut *conn)
    .await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "bearer".to_string(),
    })
}

/// Log in with username and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Tokens issued", body = TokenPair),
        (status = 400, description = "Username or password missing"),
        (status = 401, description = "Invalid credentials or inactive account")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(username = %user.username)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> AppResult<impl Responder> {
    info!("Login request received");

    if user.username.trim().is_empty() || user.password.is_empty() {
        info!("Validation failed: empty username or password");
        return Err(AppError::bad_request("Username or password required"));
    }

    let db_user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
    ))
    .bind(user.username.trim())
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(db_user) = db_user else {
        info!("Invalid credentials: user not found");
        return Err(AppError::unauthorized("Invalid credentials"));
    };

    if let Err(e) = verify_password(&user.password, &db_user.hashed_password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::unauthorized("Invalid credentials"));
    }

    if !db_user.is_active {
        info!(user_id = db_user.id, "Login refused: inactive user");
        return Err(AppError::unauthorized("Inactive user"));
    }

    let mut conn = pool.acquire().await?;
    let tokens = issue_tokens(
        db_user.id,
        &db_user.username,
        db_user.role.id(),
        &config,
        &mut *conn,
    )
    .await?;

    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(&mut *conn)
        .await
    {
        // not fatal for the login itself
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = db_user.id, "Login successful");

    Ok(HttpResponse::Ok().json(tokens))
}

/// Role id to embed in a rotated pair, from the account's current state.
fn rotation_role(is_active: bool, role: String) -> AppResult<u8> {
    if !is_active {
        return Err(AppError::unauthorized("Inactive user"));
    }

    Role::try_from(role)
        .map(|role| role.id())
        .map_err(|_| AppError::unauthorized("Invalid role"))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Refresh token invalid, revoked or expired")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> AppResult<impl Responder> {
    let token = bearer_token(&req).ok_or_else(|| AppError::unauthorized("No token"))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| AppError::unauthorized("Invalid token"))?;

    if claims.token_type != TokenType::Refresh {
        return Err(AppError::unauthorized("Refresh token required"));
    }

    let mut tx = pool.begin().await?;

    // Lock the row so two concurrent refreshes cannot both rotate it
    let record = sqlx::query(
        r#"
        SELECT r.id, u.role, u.is_active
        FROM refresh_tokens r
        JOIN users u ON u.id = r.user_id
        WHERE r.jti = ? AND r.revoked = FALSE
        FOR UPDATE
        "#,
    )
    .bind(&claims.jti)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::unauthorized("Refresh token revoked"))?;

    let token_id: u64 = record.try_get("id")?;
    let is_active: bool = record.try_get("is_active")?;
    let role: String = record.try_get("role")?;

    // The role may have changed since the old token was issued
    let role_id = rotation_role(is_active, role)?;

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(token_id)
        .execute(&mut *tx)
        .await?;

    // Revocation and the replacement token commit together
    let tokens = issue_tokens(claims.user_id, &claims.sub, role_id, &config, &mut *tx).await?;

    tx.commit().await?;

    Ok(HttpResponse::Ok().json(tokens))
}

/// Revoke a refresh token. Always answers 204.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let Some(token) = bearer_token(&req) else {
        return HttpResponse::NoContent().finish();
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::NoContent().finish(),
    };

    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_carries_the_current_role() {
        assert_eq!(rotation_role(true, "manager".into()).unwrap(), Role::Manager.id());
    }

    #[test]
    fn rotation_refuses_an_inactive_account() {
        let err = rotation_role(false, "admin".into()).unwrap_err();
        assert_eq!(err.to_string(), "Inactive user");
    }

    #[test]
    fn rotation_refuses_an_unknown_role() {
        let err = rotation_role(true, "superuser".into()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid role");
    }
}
