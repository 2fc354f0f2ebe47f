use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::time::Duration;

use super::Identity;

/// Keys present here are known to be TAKEN; absence proves nothing.
pub static IDENTITY_CACHE: Lazy<Cache<String, ()>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(500_000)
        .time_to_live(Duration::from_secs(86400)) // 24h TTL
        .build()
});

pub async fn mark_taken(identity: Identity<'_>) {
    IDENTITY_CACHE.insert(identity.key(), ()).await;
}

pub async fn is_taken(identity: Identity<'_>) -> bool {
    IDENTITY_CACHE.contains_key(&identity.key())
}

/// Drop an identity after its user is deleted or renamed
pub async fn forget(identity: Identity<'_>) {
    IDENTITY_CACHE.invalidate(&identity.key()).await;
}

async fn batch_mark(keys: &[String]) {
    let futures: Vec<_> = keys
        .iter()
        .map(|k| IDENTITY_CACHE.insert(k.clone(), ()))
        .collect();

    futures::future::join_all(futures).await;
}

/// Load identities of users who logged in during the last `days` days (batched)
pub async fn warmup_identity_cache(pool: &MySqlPool, days: u32, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT username, email
        FROM users
        WHERE last_login_at >= NOW() - INTERVAL ? DAY
        ORDER BY last_login_at DESC
        "#,
    )
    .bind(days)
    .fetch(pool);

    let mut batch = Vec::with_capacity(batch_size * 2);
    let mut total_count = 0usize;

    while let Some(row) = stream.next().await {
        let (username, email) = row?;
        batch.push(Identity::Username(&username).key());
        batch.push(Identity::Email(&email).key());
        total_count += 1;

        if batch.len() >= batch_size * 2 {
            batch_mark(&batch).await;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        batch_mark(&batch).await;
    }

    log::info!(
        "Identity cache warmup complete: {} recent users (last {} days)",
        total_count,
        days
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn marked_identity_is_taken_until_forgotten() {
        let name = Identity::Username("cache-test-dave");
        assert!(!is_taken(name).await);

        mark_taken(name).await;
        assert!(is_taken(Identity::Username("Cache-Test-Dave")).await);

        forget(name).await;
        assert!(!is_taken(name).await);
    }
}
