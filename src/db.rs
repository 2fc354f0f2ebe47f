use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::model::location::Location;
use crate::services::geofence::LocationLookup;

pub const LOCATION_COLUMNS: &str = "id, name, address, latitude, longitude, radius_meters, \
     is_active, description, created_at, updated_at";

pub async fn init_db(database_url: &str) -> Result<MySqlPool, sqlx::Error> {
    MySqlPool::connect(database_url).await
}

/// True for a duplicate-key rejection (SQLSTATE 23000 on MySQL).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Duplicate-key rejection on the named unique key; MySQL names the key in
/// the message (`Duplicate entry 'x' for key 'users.uq_users_email'`).
pub fn is_unique_violation_on(err: &sqlx::Error, key: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err)
        if db_err.is_unique_violation() && db_err.message().contains(key))
}

pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

#[async_trait]
impl LocationLookup for MySqlPool {
    type Error = sqlx::Error;

    async fn find_location_by_id(&self, id: u64) -> Result<Option<Location>, Self::Error> {
        sqlx::query_as::<_, Location>(&format!(
            "SELECT {LOCATION_COLUMNS} FROM locations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self)
        .await
    }

    async fn list_active_locations(&self) -> Result<Vec<Location>, Self::Error> {
        sqlx::query_as::<_, Location>(&format!(
            "SELECT {LOCATION_COLUMNS} FROM locations WHERE is_active = TRUE ORDER BY id ASC"
        ))
        .fetch_all(self)
        .await
    }
}

/// Stand-in for driver errors in unit tests.
#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct StubDbError {
        kind: ErrorKind,
        message: String,
    }

    impl fmt::Display for StubDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.message)
        }
    }

    impl StdError for StubDbError {}

    impl DatabaseError for StubDbError {
        fn message(&self) -> &str {
            &self.message
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match self.kind {
                ErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
                ErrorKind::ForeignKeyViolation => ErrorKind::ForeignKeyViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    pub fn duplicate_key(key: &str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(StubDbError {
            kind: ErrorKind::UniqueViolation,
            message: format!("Duplicate entry 'x' for key '{key}'"),
        }))
    }

    pub fn foreign_key() -> sqlx::Error {
        sqlx::Error::Database(Box::new(StubDbError {
            kind: ErrorKind::ForeignKeyViolation,
            message: "Cannot delete or update a parent row: a foreign key constraint fails".into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{duplicate_key, foreign_key};
    use super::*;

    #[test]
    fn classifies_constraint_failures() {
        let dup = duplicate_key("users.uq_users_email");
        assert!(is_unique_violation(&dup));
        assert!(is_unique_violation_on(&dup, "uq_users_email"));
        assert!(!is_unique_violation_on(&dup, "uq_users_username"));
        assert!(!is_foreign_key_violation(&dup));

        assert!(is_foreign_key_violation(&foreign_key()));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
