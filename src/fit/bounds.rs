use crate::params::Bounds;

/// Typical magnitude of a parameter: `|x|` capped by the bounds width, the width for zero `x`,
/// unity if both are unavailable
pub(super) fn scale(x: f64, bounds: Bounds) -> f64 {
    let width = bounds.upper - bounds.lower;
    if x != 0.0 && x.is_finite() {
        x.abs().min(width)
    } else if width.is_finite() {
        width
    } else {
        1.0
    }
}
