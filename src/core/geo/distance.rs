//! Great-circle distance between samples and stations.
//!
//! Thresholds are sub-kilometer, so planar approximations are not good
//! enough; everything goes through the Haversine formula.

use geo::{HaversineDistance, Point};

use crate::core::model::{GeoSample, Station};

/// Haversine distance in meters between two latitude/longitude pairs.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let a = Point::new(lon1, lat1);
    let b = Point::new(lon2, lat2);
    a.haversine_distance(&b)
}

/// Distance in meters from a position sample to a station.
pub fn sample_to_station_m(sample: &GeoSample, station: &Station) -> f64 {
    haversine_m(
        sample.latitude,
        sample.longitude,
        station.latitude,
        station.longitude,
    )
}
