use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::time::Duration;
use tracing::warn;

use crate::model::role::Role;

/// Role and active flag as stored in `users`, authoritative over token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountStatus {
    pub role: Role,
    pub is_active: bool,
}

/// Short TTL bounds staleness across instances; local writes invalidate.
static ACCOUNT_CACHE: Lazy<Cache<u64, AccountStatus>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(50_000)
        .time_to_live(Duration::from_secs(30))
        .build()
});

/// `None` when the user no longer exists or carries an unknown role.
pub async fn account_status(pool: &MySqlPool, user_id: u64) -> Result<Option<AccountStatus>, sqlx::Error> {
    if let Some(status) = ACCOUNT_CACHE.get(&user_id).await {
        return Ok(Some(status));
    }

    let row = sqlx::query_as::<_, (String, bool)>("SELECT role, is_active FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    let Some((role, is_active)) = row else {
        return Ok(None);
    };

    let Ok(role) = Role::try_from(role) else {
        warn!(user_id, "Stored role is not recognised");
        return Ok(None);
    };

    let status = AccountStatus { role, is_active };
    ACCOUNT_CACHE.insert(user_id, status).await;
    Ok(Some(status))
}

/// Call after changing or deleting a user so the next request rereads it.
pub async fn forget_account(user_id: u64) {
    ACCOUNT_CACHE.invalidate(&user_id).await;
}
