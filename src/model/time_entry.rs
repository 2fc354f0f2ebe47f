use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryType {
    ClockIn,
    ClockOut,
}

impl TryFrom<String> for EntryType {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One clock event. Events are append-only; a clock-out points back at the
/// clock-in it closes through `clock_in_id`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TimeEntry {
    pub id: u64,
    pub user_id: u64,
    pub location_id: u64,
    #[sqlx(try_from = "String")]
    pub entry_type: EntryType,
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub notes: Option<String>,
    pub clock_in_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A time entry joined with the timestamp of the clock-in it closes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TimeEntryRow {
    #[sqlx(flatten)]
    pub entry: TimeEntry,
    pub clock_in_at: Option<DateTime<Utc>>,
}

/// Selects `TimeEntryRow` columns; callers append WHERE / ORDER BY.
pub const TIME_ENTRY_SELECT: &str = r#"
    SELECT t.id, t.user_id, t.location_id, t.entry_type, t.recorded_at,
           t.latitude, t.longitude, t.accuracy, t.notes, t.clock_in_id,
           t.created_at, t.updated_at,
           ci.recorded_at AS clock_in_at
    FROM time_entries t
    LEFT JOIN time_entries ci ON ci.id = t.clock_in_id
"#;

/// The outstanding clock-in of a user; at most one row per user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OpenShift {
    pub user_id: u64,
    pub clock_in_entry_id: u64,
    pub location_id: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "id": 12,
    "user_id": 3,
    "location_id": 1,
    "entry_type": "clock_out",
    "time": "2026-01-05T17:02:00Z",
    "latitude": 40.7128,
    "longitude": -74.0060,
    "accuracy": 8.5,
    "notes": null,
    "clock_in_id": 11,
    "duration_minutes": 482,
    "is_active": false,
    "created_at": "2026-01-05T17:02:00Z",
    "updated_at": null
}))]
pub struct TimeEntryResponse {
    pub id: u64,
    pub user_id: u64,
    pub location_id: u64,
    pub entry_type: EntryType,
    #[schema(value_type = String, format = "date-time")]
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub notes: Option<String>,
    pub clock_in_id: Option<u64>,
    /// Set on clock-out events
    pub duration_minutes: Option<i64>,
    /// True for a clock-in that has not been closed yet
    pub is_active: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TimeEntryResponse {
    /// `open_clock_in` is the user's outstanding clock-in id, if any.
    pub fn from_row(row: TimeEntryRow, open_clock_in: Option<u64>) -> Self {
        let TimeEntryRow { entry, clock_in_at } = row;
        let duration_minutes = match entry.entry_type {
            EntryType::ClockOut => clock_in_at.map(|start| (entry.recorded_at - start).num_minutes()),
            EntryType::ClockIn => None,
        };
        let is_active = entry.entry_type == EntryType::ClockIn && open_clock_in == Some(entry.id);

        Self {
            id: entry.id,
            user_id: entry.user_id,
            location_id: entry.location_id,
            entry_type: entry.entry_type,
            time: entry.recorded_at,
            latitude: entry.latitude,
            longitude: entry.longitude,
            accuracy: entry.accuracy,
            notes: entry.notes,
            clock_in_id: entry.clock_in_id,
            duration_minutes,
            is_active,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(id: u64, entry_type: EntryType, recorded_at: DateTime<Utc>) -> TimeEntry {
        TimeEntry {
            id,
            user_id: 3,
            location_id: 1,
            entry_type,
            recorded_at,
            latitude: 40.7128,
            longitude: -74.0060,
            accuracy: None,
            notes: None,
            clock_in_id: None,
            created_at: recorded_at,
            updated_at: None,
        }
    }

    #[test]
    fn open_clock_in_is_active() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let row = TimeEntryRow { entry: entry(11, EntryType::ClockIn, at), clock_in_at: None };

        let response = TimeEntryResponse::from_row(row.clone(), Some(11));
        assert!(response.is_active);
        assert_eq!(response.duration_minutes, None);

        let closed = TimeEntryResponse::from_row(row, None);
        assert!(!closed.is_active);
    }

    #[test]
    fn clock_out_carries_shift_duration() {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let mut out = entry(12, EntryType::ClockOut, start + Duration::minutes(482));
        out.clock_in_id = Some(11);
        let row = TimeEntryRow { entry: out, clock_in_at: Some(start) };

        let response = TimeEntryResponse::from_row(row, Some(12));
        assert_eq!(response.duration_minutes, Some(482));
        assert!(!response.is_active);
    }

    #[test]
    fn entry_types_use_snake_case_names() {
        assert_eq!(EntryType::ClockIn.as_ref(), "clock_in");
        assert_eq!(EntryType::try_from("clock_out".to_string()), Ok(EntryType::ClockOut));
    }
}
