use crate::api::locations::{CreateLocation, NearestLocationResponse, UpdateLocation};
use crate::api::time_entries::{ClockInRequest, ClockOutRequest, UpdateTimeEntry};
use crate::api::users::{CreateUser, UpdateUser};
use crate::api::vacation_requests::{CreateVacationRequest, UpdateVacationRequest};
use crate::model::location::Location;
use crate::model::role::Role;
use crate::model::time_entry::{EntryType, TimeEntryResponse};
use crate::model::user::UserResponse;
use crate::model::vacation_request::{VacationRequestResponse, VacationStatus, VacationType};
use crate::models::{LoginReqDto, TokenPair};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Time Tracking API",
        version = "1.0.0",
        description = r#"
## Location-based time tracking

Employees clock in and out only while standing inside the geofence of an
active work location.

### Key Features
- **Locations**: work sites with a center point and a radius in meters
- **Time entries**: clock-in / clock-out events validated against the geofence
- **Vacation requests**: submit, approve, reject or cancel time off
- **Users**: employees, managers and admins

### Security
Endpoints under `/api/v1` require a **JWT Bearer** access token obtained
from `/auth/login`.

### Errors
Failures answer with `{"detail": "..."}`. A clock-in outside the work area
reads `You are 250m away from the work area`.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::locations::list_locations,
        crate::api::locations::list_all_locations,
        crate::api::locations::create_location,
        crate::api::locations::get_location,
        crate::api::locations::update_location,
        crate::api::locations::delete_location,
        crate::api::locations::nearest_location,

        crate::api::time_entries::clock_in,
        crate::api::time_entries::clock_out,
        crate::api::time_entries::my_entries,
        crate::api::time_entries::my_active_entry,
        crate::api::time_entries::active_employees,
        crate::api::time_entries::update_time_entry,

        crate::api::vacation_requests::my_requests,
        crate::api::vacation_requests::pending_requests,
        crate::api::vacation_requests::create_request,
        crate::api::vacation_requests::get_request,
        crate::api::vacation_requests::update_request,
        crate::api::vacation_requests::approve_request,
        crate::api::vacation_requests::reject_request,
        crate::api::vacation_requests::cancel_request,

        crate::api::users::me,
        crate::api::users::list_users,
        crate::api::users::create_user,
        crate::api::users::get_user,
        crate::api::users::update_user,
        crate::api::users::delete_user
    ),
    components(
        schemas(
            LoginReqDto,
            TokenPair,
            Location,
            CreateLocation,
            UpdateLocation,
            NearestLocationResponse,
            EntryType,
            TimeEntryResponse,
            ClockInRequest,
            ClockOutRequest,
            UpdateTimeEntry,
            VacationStatus,
            VacationType,
            VacationRequestResponse,
            CreateVacationRequest,
            UpdateVacationRequest,
            Role,
            UserResponse,
            CreateUser,
            UpdateUser
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login and token rotation"),
        (name = "Locations", description = "Work locations and geofences"),
        (name = "Time entries", description = "Clock-in / clock-out"),
        (name = "Vacation requests", description = "Time-off workflow"),
        (name = "Users", description = "User management"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme referenced by protected paths.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_geofenced_clock_in() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/time-entries/clock-in"));
        assert!(doc.paths.paths.contains_key("/api/v1/locations/nearest"));
        assert!(doc.paths.paths.contains_key("/auth/login"));
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
