use geo::{Distance, Geodesic, Point};

use super::segment::Fix;

/// Ellipsoidal (WGS-84) distance in meters between two fixes.
pub fn distance_between(a: &Fix, b: &Fix) -> f64 {
    if a.same_position(b) {
        return 0.0;
    }
    let p1 = Point::new(a.longitude, a.latitude);
    let p2 = Point::new(b.longitude, b.latitude);
    Geodesic::distance(p1, p2)
}

/// Total length in meters of the polyline through `fixes`, in order.
///
/// Fewer than two fixes have no length.
pub fn path_length(fixes: &[Fix]) -> f64 {
    fixes
        .windows(2)
        .map(|pair| distance_between(&pair[0], &pair[1]))
        .sum()
}
