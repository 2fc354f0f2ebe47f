use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use super::Identity;

/// Expected capacity and false-positive rate.
/// Each user contributes two keys (username and email).
const FILTER_CAPACITY: usize = 200_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static IDENTITY_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

/// Set once the warmup has loaded every registered identity.
static WARMED_UP: AtomicBool = AtomicBool::new(false);

/// Until this is true a filter miss proves nothing.
pub fn is_warmed_up() -> bool {
    WARMED_UP.load(Ordering::Acquire)
}

/// Check if an identity might be registered (false positives possible)
pub fn might_exist(identity: Identity<'_>) -> bool {
    IDENTITY_FILTER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(&identity.key())
}

pub fn insert(identity: Identity<'_>) {
    IDENTITY_FILTER
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .add(&identity.key());
}

pub fn remove(identity: Identity<'_>) {
    IDENTITY_FILTER
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&identity.key());
}

/// Load every registered username and email, streaming in batches
pub async fn warmup_identity_filter(pool: &MySqlPool, batch_size: usize) -> Result<()> {
    let mut stream =
        sqlx::query_as::<_, (String, String)>("SELECT username, email FROM users").fetch(pool);

    let mut batch = Vec::with_capacity(batch_size * 2);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (username, email) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;

        batch.push(Identity::Username(&username).key());
        batch.push(Identity::Email(&email).key());
        total += 1;

        if batch.len() >= batch_size * 2 {
            insert_batch(&batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_batch(&batch);
    }

    WARMED_UP.store(true, Ordering::Release);
    log::info!("Identity filter warmup complete: {} users", total);
    Ok(())
}

fn insert_batch(keys: &[String]) {
    let mut filter = IDENTITY_FILTER.write().unwrap_or_else(PoisonError::into_inner);

    for key in keys {
        filter.add(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_identity_is_reported() {
        insert(Identity::Username("filter-test-alice"));
        assert!(might_exist(Identity::Username("FILTER-TEST-ALICE")));
    }

    #[test]
    fn removed_identity_is_gone() {
        let email = Identity::Email("filter-test-bob@example.com");
        insert(email);
        remove(email);
        assert!(!might_exist(email));
    }
}
