//! Geofence admission for location-bound actions.
//!
//! Distances are geodesic, computed with Vincenty's inverse formula on the
//! WGS-84 ellipsoid. For nearly antipodal points where the iteration does not
//! converge, the haversine great-circle distance on the mean Earth radius is
//! used instead. Neither case matters at municipal scale, where Vincenty is
//! accurate to well under a millimetre.

use async_trait::async_trait;
use derive_more::Display;

use crate::model::location::Location;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);
const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_TOLERANCE: f64 = 1e-12;

/// Source of location records for the validator.
///
/// `list_active_locations` must yield locations in a stable order (primary
/// key ascending for the database implementation); nearest-location ties are
/// resolved in favour of whichever comes first.
#[async_trait]
pub trait LocationLookup {
    type Error;

    async fn find_location_by_id(&self, id: u64) -> Result<Option<Location>, Self::Error>;

    async fn list_active_locations(&self) -> Result<Vec<Location>, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum AccessDenial {
    #[display(fmt = "Location not found")]
    NotFound,
    #[display(fmt = "Location is not active")]
    Inactive,
    #[display(fmt = "You are {:.0}m away from the work area", distance_m)]
    OutOfRange { distance_m: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationAccess {
    Granted,
    Denied(AccessDenial),
}

impl LocationAccess {
    pub fn is_granted(&self) -> bool {
        matches!(self, LocationAccess::Granted)
    }

    /// Empty when access is granted.
    pub fn reason(&self) -> String {
        match self {
            LocationAccess::Granted => String::new(),
            LocationAccess::Denied(denial) => denial.to_string(),
        }
    }

    pub fn into_parts(self) -> (bool, String) {
        (self.is_granted(), self.reason())
    }
}

/// Geodesic distance in meters between two points given in degrees.
pub fn distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    vincenty_inverse(lat1, lng1, lat2, lng2).unwrap_or_else(|| haversine(lat1, lng1, lat2, lng2))
}

fn vincenty_inverse(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> Option<f64> {
    let l = (lng2 - lng1).to_radians();
    let u1 = ((1.0 - WGS84_F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            // coincident points
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // equatorial line: cos_sq_alpha == 0
        let cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));

        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - previous).abs() < VINCENTY_TOLERANCE {
            let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
            let a = 1.0
                + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = b
                * sin_sigma
                * (cos_2sigma_m
                    + b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(WGS84_B * a * (sigma - delta_sigma));
        }
    }

    None
}

fn haversine(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Boundary inclusive.
pub fn is_within_radius(distance_m: f64, radius_m: f64) -> bool {
    distance_m <= radius_m
}

pub fn get_distance_to_location(user_lat: f64, user_lng: f64, location: &Location) -> f64 {
    distance_meters(location.latitude, location.longitude, user_lat, user_lng)
}

pub fn is_within_geofence(user_lat: f64, user_lng: f64, location: &Location) -> bool {
    is_within_radius(
        get_distance_to_location(user_lat, user_lng, location),
        f64::from(location.radius_meters),
    )
}

/// Nearest of `locations` to the given point. Ties go to the earliest entry.
pub fn find_nearest_location<'a, I>(locations: I, user_lat: f64, user_lng: f64) -> Option<&'a Location>
where
    I: IntoIterator<Item = &'a Location>,
{
    let mut nearest: Option<(&Location, f64)> = None;
    for location in locations {
        let distance = get_distance_to_location(user_lat, user_lng, location);
        match nearest {
            Some((_, best)) if distance >= best => {}
            _ => nearest = Some((location, distance)),
        }
    }
    nearest.map(|(location, _)| location)
}

/// Decides whether a user at the given point may act at `location_id`.
///
/// Business rejections come back as `LocationAccess::Denied`; only lookup
/// failures surface as `Err`.
pub async fn validate_location_access<L>(
    lookup: &L,
    location_id: u64,
    user_lat: f64,
    user_lng: f64,
) -> Result<LocationAccess, L::Error>
where
    L: LocationLookup + Sync + ?Sized,
{
    let Some(location) = lookup.find_location_by_id(location_id).await? else {
        return Ok(LocationAccess::Denied(AccessDenial::NotFound));
    };

    if !location.is_active {
        return Ok(LocationAccess::Denied(AccessDenial::Inactive));
    }

    let distance_m = get_distance_to_location(user_lat, user_lng, &location);
    if !is_within_radius(distance_m, f64::from(location.radius_meters)) {
        tracing::debug!(
            location_id,
            distance_m,
            radius_m = location.radius_meters,
            "Point outside geofence"
        );
        return Ok(LocationAccess::Denied(AccessDenial::OutOfRange { distance_m }));
    }

    Ok(LocationAccess::Granted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::convert::Infallible;

    const NYC: (f64, f64) = (40.7128, -74.0060);
    const TIMES_SQUARE: (f64, f64) = (40.7589, -73.9851);

    fn location(id: u64, latitude: f64, longitude: f64, radius_meters: u32) -> Location {
        Location {
            id,
            name: format!("Site {id}"),
            address: "somewhere".to_string(),
            latitude,
            longitude,
            radius_meters,
            is_active: true,
            description: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    struct InMemoryLocations(Vec<Location>);

    #[async_trait]
    impl LocationLookup for InMemoryLocations {
        type Error = Infallible;

        async fn find_location_by_id(&self, id: u64) -> Result<Option<Location>, Self::Error> {
            Ok(self.0.iter().find(|l| l.id == id).cloned())
        }

        async fn list_active_locations(&self) -> Result<Vec<Location>, Self::Error> {
            Ok(self.0.iter().filter(|l| l.is_active).cloned().collect())
        }
    }

    /// Longitude offset that lands `meters` east of (0, 0) along the equator.
    fn equator_offset_degrees(meters: f64) -> f64 {
        (meters / WGS84_A).to_degrees()
    }

    #[test]
    fn center_point_is_always_inside() {
        for radius in [1, 50, 10_000] {
            let site = location(1, NYC.0, NYC.1, radius);
            assert!(is_within_geofence(NYC.0, NYC.1, &site));
            assert_eq!(get_distance_to_location(NYC.0, NYC.1, &site), 0.0);
        }
    }

    #[test]
    fn boundary_is_inclusive() {
        assert!(is_within_radius(100.0, 100.0));
        assert!(!is_within_radius(100.000_001, 100.0));
    }

    #[test]
    fn points_near_the_edge_fall_on_the_right_side() {
        let site = location(1, 0.0, 0.0, 100);
        assert!(is_within_geofence(0.0, equator_offset_degrees(99.9), &site));
        assert!(!is_within_geofence(0.0, equator_offset_degrees(100.1), &site));
        assert!(get_distance_to_location(0.0, equator_offset_degrees(100.1), &site) > 100.0);
    }

    #[test]
    fn vincenty_matches_reference_geodesic() {
        // Flinders Peak to Buninyong, the classic Vincenty worked example.
        let d = distance_meters(-37.951_033_416_7, 144.424_867_888_9, -37.652_821_138_9, 143.926_495_527_8);
        assert!((d - 54_972.271).abs() < 0.01, "got {d}");
    }

    #[test]
    fn manhattan_distance_is_about_five_and_a_half_km() {
        let d = distance_meters(NYC.0, NYC.1, TIMES_SQUARE.0, TIMES_SQUARE.1);
        assert!((5_390.0..5_440.0).contains(&d), "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (NYC, TIMES_SQUARE),
            ((51.5007, -0.1246), (48.8584, 2.2945)),
            ((-33.8568, 151.2153), (-37.8136, 144.9631)),
            ((64.1466, -21.9426), (64.2, -21.5)),
        ];
        for ((a_lat, a_lng), (b_lat, b_lng)) in pairs {
            let ab = distance_meters(a_lat, a_lng, b_lat, b_lng);
            let ba = distance_meters(b_lat, b_lng, a_lat, a_lng);
            assert!((ab - ba).abs() < 1e-6, "{ab} vs {ba}");
        }
    }

    #[test]
    fn antipodal_points_fall_back_to_a_finite_distance() {
        let d = distance_meters(0.0, 0.0, 0.5, 179.7);
        assert!(d.is_finite());
        assert!(d > 19_000_000.0 && d < 20_100_000.0, "got {d}");
    }

    #[test]
    fn nearest_of_nothing_is_none() {
        let sites: Vec<Location> = Vec::new();
        assert!(find_nearest_location(&sites, NYC.0, NYC.1).is_none());
    }

    #[test]
    fn nearest_of_one_is_that_one_however_far() {
        let sites = [location(7, -33.8568, 151.2153, 10)];
        let nearest = find_nearest_location(&sites, NYC.0, NYC.1).map(|l| l.id);
        assert_eq!(nearest, Some(7));
    }

    #[test]
    fn nearest_picks_the_minimum_distance() {
        let sites = [
            location(1, TIMES_SQUARE.0, TIMES_SQUARE.1, 100),
            location(2, 40.7130, -74.0055, 100),
            location(3, 51.5007, -0.1246, 100),
        ];
        let nearest = find_nearest_location(&sites, NYC.0, NYC.1).map(|l| l.id);
        assert_eq!(nearest, Some(2));
    }

    #[test]
    fn nearest_keeps_the_first_of_equally_distant_sites() {
        let sites = [
            location(4, TIMES_SQUARE.0, TIMES_SQUARE.1, 100),
            location(5, TIMES_SQUARE.0, TIMES_SQUARE.1, 500),
        ];
        let nearest = find_nearest_location(&sites, NYC.0, NYC.1).map(|l| l.id);
        assert_eq!(nearest, Some(4));
    }

    #[actix_web::test]
    async fn unknown_location_is_not_found() {
        let lookup = InMemoryLocations(vec![location(1, NYC.0, NYC.1, 100)]);
        let access = validate_location_access(&lookup, 99, NYC.0, NYC.1).await.unwrap();
        assert_eq!(access, LocationAccess::Denied(AccessDenial::NotFound));
        assert_eq!(access.into_parts(), (false, "Location not found".to_string()));
    }

    #[actix_web::test]
    async fn inactive_location_is_rejected_even_from_its_center() {
        let mut site = location(1, NYC.0, NYC.1, 100);
        site.is_active = false;
        let lookup = InMemoryLocations(vec![site]);

        let access = validate_location_access(&lookup, 1, NYC.0, NYC.1).await.unwrap();
        assert_eq!(access.into_parts(), (false, "Location is not active".to_string()));
    }

    #[actix_web::test]
    async fn out_of_range_reports_rounded_distance() {
        let lookup = InMemoryLocations(vec![location(1, 0.0, 0.0, 100)]);
        let access = validate_location_access(&lookup, 1, 0.0, equator_offset_degrees(250.0))
            .await
            .unwrap();
        assert_eq!(
            access.into_parts(),
            (false, "You are 250m away from the work area".to_string())
        );
    }

    #[actix_web::test]
    async fn clock_in_scenario_in_manhattan() {
        let lookup = InMemoryLocations(vec![location(1, NYC.0, NYC.1, 100)]);

        let at_office = validate_location_access(&lookup, 1, NYC.0, NYC.1).await.unwrap();
        assert_eq!(at_office.into_parts(), (true, String::new()));

        let uptown = validate_location_access(&lookup, 1, TIMES_SQUARE.0, TIMES_SQUARE.1)
            .await
            .unwrap();
        let LocationAccess::Denied(AccessDenial::OutOfRange { distance_m }) = uptown else {
            panic!("expected out-of-range denial, got {uptown:?}");
        };
        assert!(distance_m > 100.0);
        assert_eq!(
            uptown.reason(),
            format!("You are {}m away from the work area", distance_m.round() as i64)
        );
    }
}
