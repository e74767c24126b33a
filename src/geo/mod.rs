use thiserror::Error;

use crate::models::location::GeoPoint;
use crate::models::route::Region;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub const REGION_PADDING: f64 = 1.5;
pub const REGION_MIN_DELTA: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("invalid coordinates ({lat}, {lng})")]
pub struct InvalidGeometry {
    pub lat: f64,
    pub lng: f64,
}

/// Great-circle distance. `valid` is false when either input was malformed,
/// in which case `km` is 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance {
    pub km: f64,
    pub valid: bool,
}

pub fn validate(point: &GeoPoint) -> Result<(), InvalidGeometry> {
    let in_range = point.lat.is_finite()
        && point.lng.is_finite()
        && (-90.0..=90.0).contains(&point.lat)
        && (-180.0..=180.0).contains(&point.lng);

    if in_range {
        Ok(())
    } else {
        Err(InvalidGeometry {
            lat: point.lat,
            lng: point.lng,
        })
    }
}

/// (0, 0) is what upstream clients send when they have no fix.
pub fn is_placeholder(point: &GeoPoint) -> bool {
    point.lat == 0.0 && point.lng == 0.0
}

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> Distance {
    if validate(a).is_err() || validate(b).is_err() {
        return Distance {
            km: 0.0,
            valid: false,
        };
    }

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.clamp(0.0, 1.0).sqrt().asin();

    Distance {
        km: (EARTH_RADIUS_KM * central_angle).max(0.0),
        valid: true,
    }
}

/// `count` evenly spaced points from `from` to `to`, both endpoints included.
pub fn interpolate(from: &GeoPoint, to: &GeoPoint, count: usize) -> Vec<GeoPoint> {
    let count = count.max(2);
    let last = (count - 1) as f64;

    (0..count)
        .map(|step| {
            let t = step as f64 / last;
            GeoPoint {
                lat: from.lat + (to.lat - from.lat) * t,
                lng: from.lng + (to.lng - from.lng) * t,
            }
        })
        .collect()
}

/// Smallest padded viewport containing every valid, non-placeholder point;
/// `None` when there are none.
pub fn fit_region<'a, I>(points: I) -> Option<Region>
where
    I: IntoIterator<Item = &'a GeoPoint>,
{
    let mut bounds: Option<(f64, f64, f64, f64)> = None;

    for point in points {
        if validate(point).is_err() || is_placeholder(point) {
            continue;
        }
        bounds = Some(match bounds {
            None => (point.lat, point.lat, point.lng, point.lng),
            Some((min_lat, max_lat, min_lng, max_lng)) => (
                min_lat.min(point.lat),
                max_lat.max(point.lat),
                min_lng.min(point.lng),
                max_lng.max(point.lng),
            ),
        });
    }

    let (min_lat, max_lat, min_lng, max_lng) = bounds?;

    Some(Region {
        center: GeoPoint {
            lat: (min_lat + max_lat) / 2.0,
            lng: (min_lng + max_lng) / 2.0,
        },
        lat_delta: ((max_lat - min_lat) * REGION_PADDING).max(REGION_MIN_DELTA),
        lng_delta: ((max_lng - min_lng) * REGION_PADDING).max(REGION_MIN_DELTA),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn london() -> GeoPoint {
        GeoPoint::new(51.5074, -0.1278)
    }

    fn paris() -> GeoPoint {
        GeoPoint::new(48.8566, 2.3522)
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint::new(53.5511, 9.9937);
        let distance = haversine_km(&p, &p);
        assert!(distance.valid);
        assert_eq!(distance.km, 0.0);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let distance = haversine_km(&london(), &paris());
        assert!(distance.valid);
        assert!((distance.km - 343.0).abs() < 5.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let there = haversine_km(&london(), &paris()).km;
        let back = haversine_km(&paris(), &london()).km;
        assert!((there - back).abs() < 1e-9);
    }

    #[test]
    fn malformed_input_is_flagged_not_nan() {
        let bad = GeoPoint::new(f64::NAN, 10.0);
        let distance = haversine_km(&bad, &paris());
        assert!(!distance.valid);
        assert_eq!(distance.km, 0.0);

        let out_of_range = GeoPoint::new(123.0, 10.0);
        assert!(!haversine_km(&paris(), &out_of_range).valid);
    }

    #[test]
    fn interpolation_hits_both_endpoints() {
        let from = GeoPoint::new(10.0, 20.0);
        let to = GeoPoint::new(11.0, 22.0);
        let path = interpolate(&from, &to, 30);

        assert_eq!(path.len(), 30);
        assert_eq!(path[0], from);
        assert_eq!(path[29], to);
        assert!(path[15].lat > from.lat && path[15].lat < to.lat);
    }

    #[test]
    fn interpolation_never_returns_fewer_than_two_points() {
        let from = GeoPoint::new(10.0, 20.0);
        let to = GeoPoint::new(11.0, 22.0);
        assert_eq!(interpolate(&from, &to, 0), vec![from, to]);
    }

    #[test]
    fn region_is_centered_and_padded() {
        let points = [GeoPoint::new(10.0, 20.0), GeoPoint::new(12.0, 24.0)];
        let region = fit_region(&points).unwrap();

        assert_eq!(region.center, GeoPoint::new(11.0, 22.0));
        assert!((region.lat_delta - 3.0).abs() < 1e-12);
        assert!((region.lng_delta - 6.0).abs() < 1e-12);
    }

    #[test]
    fn coincident_points_get_minimum_span() {
        let points = [GeoPoint::new(10.0, 20.0), GeoPoint::new(10.0, 20.0)];
        let region = fit_region(&points).unwrap();

        assert_eq!(region.lat_delta, REGION_MIN_DELTA);
        assert_eq!(region.lng_delta, REGION_MIN_DELTA);
    }

    #[test]
    fn region_skips_invalid_points() {
        let points = [GeoPoint::new(f64::NAN, 0.0)];
        assert!(fit_region(&points).is_none());
    }

    #[test]
    fn region_ignores_placeholder_locations() {
        let points = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(52.50, 13.40),
            GeoPoint::new(52.52, 13.42),
        ];
        let region = fit_region(&points).unwrap();

        assert!((region.center.lat - 52.51).abs() < 1e-9);
        assert!((region.center.lng - 13.41).abs() < 1e-9);
        assert!(region.lat_delta < 0.1);
    }
}
