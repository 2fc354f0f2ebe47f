use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const MIN_RADIUS_METERS: u32 = 1;
pub const MAX_RADIUS_METERS: u32 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 1,
    "name": "Head office",
    "address": "1 Centre St, New York, NY",
    "latitude": 40.7128,
    "longitude": -74.0060,
    "radius_meters": 100,
    "is_active": true,
    "description": "Main entrance",
    "created_at": "2026-01-01T08:00:00Z",
    "updated_at": null
}))]
pub struct Location {
    pub id: u64,
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Geofence radius around the center point
    pub radius_meters: u32,
    pub is_active: bool,
    pub description: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn validate_latitude(latitude: f64) -> Result<(), &'static str> {
    if (-90.0..=90.0).contains(&latitude) {
        Ok(())
    } else {
        Err("latitude must be between -90 and 90")
    }
}

pub fn validate_longitude(longitude: f64) -> Result<(), &'static str> {
    if (-180.0..=180.0).contains(&longitude) {
        Ok(())
    } else {
        Err("longitude must be between -180 and 180")
    }
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), &'static str> {
    validate_latitude(latitude)?;
    validate_longitude(longitude)
}

pub fn validate_radius(radius_meters: u32) -> Result<(), &'static str> {
    if (MIN_RADIUS_METERS..=MAX_RADIUS_METERS).contains(&radius_meters) {
        Ok(())
    } else {
        Err("radius_meters must be between 1 and 10000")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_at_the_limits_are_accepted() {
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(validate_coordinates(-90.0, -180.0).is_ok());
    }

    #[test]
    fn coordinates_out_of_range_are_rejected() {
        assert!(validate_coordinates(90.5, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.1).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn radius_must_be_positive_and_bounded() {
        assert!(validate_radius(0).is_err());
        assert!(validate_radius(1).is_ok());
        assert!(validate_radius(10_000).is_ok());
        assert!(validate_radius(10_001).is_err());
    }
}
