//! Great-circle math on a spherical earth.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

// Widens every box edge so points lying exactly on the circle survive float rounding.
const BOX_MARGIN_DEG: f64 = 1e-9;

/// Haversine distance in kilometers. Inputs are expected to be range-checked already.
///
/// Deltas are taken as absolute values so that `haversine_km(a, b)` and
/// `haversine_km(b, a)` evaluate the exact same float expression.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).abs().to_radians();
    let delta_lon = (lon2 - lon1).abs().to_radians();

    // Rounding can push `a` just past 1 for near-antipodal pairs.
    let a = ((delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2))
    .clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Latitude/longitude rectangle in degrees that fully contains a spherical cap.
///
/// When `min_lon > max_lon` the box crosses the antimeridian and covers
/// `[min_lon, 180] ∪ [-180, max_lon]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub const WORLD: BoundingBox = BoundingBox {
        min_lat: -90.0,
        max_lat: 90.0,
        min_lon: -180.0,
        max_lon: 180.0,
    };

    /// Smallest lat/lon box enclosing every point within `radius_km` of the center.
    pub fn around(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        let angular = radius_km / EARTH_RADIUS_KM;
        if angular >= std::f64::consts::PI {
            return Self::WORLD;
        }

        let lat = latitude.to_radians();
        let min_lat = lat - angular;
        let max_lat = lat + angular;

        // A cap reaching a pole spans every meridian.
        if min_lat <= -FRAC_PI_2 || max_lat >= FRAC_PI_2 {
            return Self {
                min_lat: min_lat.max(-FRAC_PI_2).to_degrees(),
                max_lat: max_lat.min(FRAC_PI_2).to_degrees(),
                min_lon: -180.0,
                max_lon: 180.0,
            };
        }

        let delta_lon = (angular.sin() / lat.cos()).min(1.0).asin().to_degrees();
        if delta_lon + BOX_MARGIN_DEG >= 180.0 {
            return Self {
                min_lat: min_lat.to_degrees() - BOX_MARGIN_DEG,
                max_lat: max_lat.to_degrees() + BOX_MARGIN_DEG,
                min_lon: -180.0,
                max_lon: 180.0,
            };
        }

        let mut min_lon = longitude - delta_lon - BOX_MARGIN_DEG;
        let mut max_lon = longitude + delta_lon + BOX_MARGIN_DEG;
        if min_lon < -180.0 {
            min_lon += 360.0;
        }
        if max_lon > 180.0 {
            max_lon -= 360.0;
        }

        Self {
            min_lat: min_lat.to_degrees() - BOX_MARGIN_DEG,
            max_lat: max_lat.to_degrees() + BOX_MARGIN_DEG,
            min_lon,
            max_lon,
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lon > self.max_lon
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        if latitude < self.min_lat || latitude > self.max_lat {
            return false;
        }
        if self.crosses_antimeridian() {
            longitude >= self.min_lon || longitude <= self.max_lon
        } else {
            longitude >= self.min_lon && longitude <= self.max_lon
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAN_FRANCISCO: (f64, f64) = (37.7749, -122.4194);
    const LOS_ANGELES: (f64, f64) = (34.0522, -118.2437);
    const NEW_YORK: (f64, f64) = (40.7128, -74.0060);

    fn dist(a: (f64, f64), b: (f64, f64)) -> f64 {
        haversine_km(a.0, a.1, b.0, b.1)
    }

    #[test]
    fn known_city_distance() {
        let km = dist(SAN_FRANCISCO, LOS_ANGELES);
        assert!((km - 559.1).abs() < 1.0, "got {km}");
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_identity() {
        let samples = [
            SAN_FRANCISCO,
            LOS_ANGELES,
            NEW_YORK,
            (90.0, 0.0),
            (-90.0, 180.0),
            (0.0, -180.0),
            (-33.8688, 151.2093),
        ];
        for a in samples {
            assert_eq!(dist(a, a), 0.0);
            for b in samples {
                assert_eq!(dist(a, b), dist(b, a), "{a:?} <-> {b:?}");
                assert!(dist(a, b) >= 0.0);
            }
        }
    }

    #[test]
    fn triangle_inequality_holds() {
        let samples = [
            SAN_FRANCISCO,
            LOS_ANGELES,
            NEW_YORK,
            (51.5074, -0.1278),
            (-6.2088, 106.8456),
            (0.0, 179.9),
            (0.0, -179.9),
        ];
        for a in samples {
            for b in samples {
                for c in samples {
                    assert!(dist(a, c) <= dist(a, b) + dist(b, c) + 1e-6);
                }
            }
        }
    }

    #[test]
    fn antipodal_points_are_half_circumference_apart() {
        let km = haversine_km(0.0, 0.0, 0.0, 180.0);
        assert!((km - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn near_antipodal_pairs_stay_finite() {
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_KM;
        for step in -900..=900 {
            let lat = step as f64 / 10.0;
            for lon in [-180.0, -90.0, 0.0, 45.5, 90.0, 180.0] {
                let other_lon = if lon > 0.0 { lon - 180.0 } else { lon + 180.0 };
                let km = haversine_km(lat, lon, -lat, other_lon);
                assert!(km.is_finite(), "({lat}, {lon}) -> NaN");
                assert!((km - half_circumference).abs() < 1e-3, "({lat}, {lon}) -> {km}");
            }
        }
        assert!(haversine_km(-87.5, 0.0, 87.5, 180.0).is_finite());
    }

    #[test]
    fn small_hop_matches_expected_magnitude() {
        let km = haversine_km(37.7749, -122.4194, 37.7750, -122.4195);
        assert!((km - 0.014).abs() < 0.001, "got {km}");
    }

    #[test]
    fn bounding_box_contains_cap_edge_points() {
        let (lat, lon) = NEW_YORK;
        let radius = 25.0;
        let bbox = BoundingBox::around(lat, lon, radius);
        let dlat = (radius / EARTH_RADIUS_KM).to_degrees();
        assert!(bbox.contains(lat + dlat, lon));
        assert!(bbox.contains(lat - dlat, lon));
        assert!(bbox.contains(lat, lon));
        assert!(!bbox.contains(lat + 1.0, lon));
        assert!(!bbox.contains(lat, lon + 1.0));
    }

    #[test]
    fn bounding_box_wraps_the_antimeridian() {
        let bbox = BoundingBox::around(0.0, 179.95, 20.0);
        assert!(bbox.crosses_antimeridian());
        assert!(bbox.contains(0.0, -179.95));
        assert!(bbox.contains(0.0, 179.99));
        assert!(!bbox.contains(0.0, 0.0));
    }

    #[test]
    fn bounding_box_near_pole_spans_all_longitudes() {
        let bbox = BoundingBox::around(89.9, 10.0, 50.0);
        assert_eq!(bbox.min_lon, -180.0);
        assert_eq!(bbox.max_lon, 180.0);
        assert!(bbox.contains(89.95, -170.0));
    }

    #[test]
    fn huge_radius_is_the_whole_world() {
        assert_eq!(BoundingBox::around(10.0, 10.0, 30_000.0), BoundingBox::WORLD);
    }
}
