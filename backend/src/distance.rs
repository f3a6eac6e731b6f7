use crate::models::Coordinate;

/// Kilometres per degree used by the planar approximation.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Planar distance between two coordinates: the Euclidean difference in
/// degrees scaled by [`KM_PER_DEGREE`]. Edge weights, manual route totals and
/// discovered route totals all go through this function so they stay
/// comparable.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let dlat = b.lat - a.lat;
    let dlng = b.lng - a.lng;
    (dlat * dlat + dlng * dlng).sqrt() * KM_PER_DEGREE
}

/// Sum of consecutive pairwise distances along `path`.
pub fn path_distance_km(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|w| distance_km(w[0], w[1])).sum()
}

/// Rounds a distance to two decimals for presentation.
pub fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}
