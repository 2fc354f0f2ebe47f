use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, AsRefStr, EnumString,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VacationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize, ToSchema, AsRefStr,
    EnumString, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VacationType {
    #[default]
    Vacation,
    SickLeave,
    PersonalDay,
    Other,
}

impl TryFrom<String> for VacationStatus {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for VacationType {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VacationAction {
    Approve,
    Reject,
    Cancel,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
#[display(fmt = "request is {}", _0)]
pub struct NotPending(pub VacationStatus);

impl VacationStatus {
    /// Only a pending request can move, and only once.
    pub fn apply(self, action: VacationAction) -> Result<VacationStatus, NotPending> {
        if self != VacationStatus::Pending {
            return Err(NotPending(self));
        }
        Ok(match action {
            VacationAction::Approve => VacationStatus::Approved,
            VacationAction::Reject => VacationStatus::Rejected,
            VacationAction::Cancel => VacationStatus::Cancelled,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VacationRequest {
    pub id: u64,
    pub user_id: u64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub vacation_type: VacationType,
    #[sqlx(try_from = "String")]
    pub status: VacationStatus,
    pub reason: String,
    pub notes: Option<String>,
    pub approved_by: Option<u64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub const VACATION_COLUMNS: &str = "id, user_id, start_date, end_date, vacation_type, status, \
     reason, notes, approved_by, approved_at, rejection_reason, created_at, updated_at";

/// Calendar days covered, counting both ends.
pub fn duration_days(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_days() + 1
}

#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "id": 4,
    "user_id": 3,
    "start_date": "2026-07-01T00:00:00Z",
    "end_date": "2026-07-05T00:00:00Z",
    "vacation_type": "vacation",
    "status": "pending",
    "reason": "Family trip",
    "notes": null,
    "approved_by": null,
    "approved_at": null,
    "rejection_reason": null,
    "duration_days": 5,
    "created_at": "2026-06-01T10:00:00Z",
    "updated_at": null
}))]
pub struct VacationRequestResponse {
    pub id: u64,
    pub user_id: u64,
    #[schema(value_type = String, format = "date-time")]
    pub start_date: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub end_date: DateTime<Utc>,
    pub vacation_type: VacationType,
    pub status: VacationStatus,
    pub reason: String,
    pub notes: Option<String>,
    pub approved_by: Option<u64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub duration_days: i64,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<VacationRequest> for VacationRequestResponse {
    fn from(r: VacationRequest) -> Self {
        Self {
            duration_days: duration_days(r.start_date, r.end_date),
            id: r.id,
            user_id: r.user_id,
            start_date: r.start_date,
            end_date: r.end_date,
            vacation_type: r.vacation_type,
            status: r.status,
            reason: r.reason,
            notes: r.notes,
            approved_by: r.approved_by,
            approved_at: r.approved_at,
            rejection_reason: r.rejection_reason,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
