//! Great-circle distances for listing coordinates.

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two points given in degrees.
pub fn haversine_km(lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> f64 {
    let (lat0, lon0, lat1, lon1) = (
        lat0.to_radians(),
        lon0.to_radians(),
        lat1.to_radians(),
        lon1.to_radians(),
    );
    let h = ((lat1 - lat0) / 2.0).sin().powi(2)
        + lat0.cos() * lat1.cos() * ((lon1 - lon0) / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}
