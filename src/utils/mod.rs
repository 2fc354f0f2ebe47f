pub mod db_utils;
pub mod identity_cache;
pub mod identity_filter;

use sqlx::MySqlPool;

/// A unique user attribute checked on registration.
#[derive(Debug, Clone, Copy)]
pub enum Identity<'a> {
    Username(&'a str),
    Email(&'a str),
}

impl Identity<'_> {
    /// Case-insensitive, namespaced so a username never matches an email.
    pub fn key(&self) -> String {
        match self {
            Identity::Username(v) => format!("username:{}", v.trim().to_lowercase()),
            Identity::Email(v) => format!("email:{}", v.trim().to_lowercase()),
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Identity::Username(_) => "username",
            Identity::Email(_) => "email",
        }
    }

    fn value(&self) -> String {
        match self {
            Identity::Username(v) | Identity::Email(v) => v.trim().to_lowercase(),
        }
    }
}

/// A filter miss only proves an identity free once the filter is complete.
fn filter_rules_out(warmed_up: bool, might_exist: bool) -> bool {
    warmed_up && !might_exist
}

/// true  => AVAILABLE
/// false => TAKEN
pub async fn is_identity_available(identity: Identity<'_>, pool: &MySqlPool) -> Result<bool, sqlx::Error> {
    // Cuckoo filter: after warmup, a miss means the identity was never registered
    if filter_rules_out(identity_filter::is_warmed_up(), identity_filter::might_exist(identity)) {
        return Ok(true);
    }

    // Cache: a hit means it is taken
    if identity_cache::is_taken(identity).await {
        return Ok(false);
    }

    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER({}) = ? LIMIT 1)",
        identity.column()
    );
    let exists = sqlx::query_scalar::<_, i64>(&sql)
        .bind(identity.value())
        .fetch_one(pool)
        .await?
        != 0;

    if exists {
        identity_cache::mark_taken(identity).await;
    }

    Ok(!exists)
}

/// Record a freshly registered identity in both in-memory layers.
pub async fn remember(identity: Identity<'_>) {
    identity_filter::insert(identity);
    identity_cache::mark_taken(identity).await;
}

/// Remove an identity that no longer belongs to anyone.
pub async fn release(identity: Identity<'_>) {
    identity_filter::remove(identity);
    identity_cache::forget(identity).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_normalized_and_namespaced() {
        assert_eq!(Identity::Username(" Jane ").key(), "username:jane");
        assert_eq!(Identity::Email("Jane@Example.com").key(), "email:jane@example.com");
        assert_ne!(Identity::Username("jane").key(), Identity::Email("jane").key());
    }

    #[test]
    fn cold_filter_never_vouches_for_a_free_identity() {
        assert!(!filter_rules_out(false, false));
        assert!(!filter_rules_out(false, true));
        assert!(filter_rules_out(true, false));
        assert!(!filter_rules_out(true, true));
    }
}
