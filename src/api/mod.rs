pub mod locations;
pub mod time_entries;
pub mod users;
pub mod vacation_requests;

use serde::Deserialize;
use utoipa::IntoParams;

const DEFAULT_LIMIT: u64 = 100;
const MAX_LIMIT: u64 = 500;

/// Offset pagination shared by list endpoints.
#[derive(Debug, Deserialize, IntoParams)]
pub struct Pagination {
    /// Rows to skip
    pub skip: Option<u64>,
    /// Rows to return (default 100, max 500)
    pub limit: Option<u64>,
}

impl Pagination {
    pub fn skip(&self) -> u64 {
        self.skip.unwrap_or(0)
    }

    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_bounds() {
        let none = Pagination { skip: None, limit: None };
        assert_eq!((none.skip(), none.limit()), (0, 100));

        let huge = Pagination { skip: Some(20), limit: Some(10_000) };
        assert_eq!((huge.skip(), huge.limit()), (20, 500));

        let zero = Pagination { skip: None, limit: Some(0) };
        assert_eq!(zero.limit(), 1);
    }
}
