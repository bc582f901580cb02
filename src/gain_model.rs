//! Manual white balance: color temperature and tint to channel gains.

use nalgebra::Vector3;

use crate::gains::GainVector;

pub const MIN_TEMPERATURE: f32 = 2000.0;
pub const MAX_TEMPERATURE: f32 = 10000.0;
pub const MAX_TINT: f32 = 50.0;

/// Temperature knots and their (blue, green, red) gains. Gains are
/// interpolated linearly between neighbouring knots.
const KNOTS: [(f32, [f32; 3]); 5] = [
    (2000.0, [0.25, 0.65, 1.00]),  // incandescent
    (4000.0, [0.70, 0.85, 1.00]),  // warm white
    (5500.0, [1.00, 1.00, 1.00]),  // neutral
    (6500.0, [1.10, 1.00, 0.90]),  // daylight
    (10000.0, [1.25, 0.95, 0.70]), // shade / overcast
];

/// Sensor cast compensation, slightly favouring red over blue.
const SENSOR_BIAS: [f32; 3] = [0.97, 1.00, 1.03];

/// `gains_for(6500.0, 0.0)`, used as the daylight fixture.
pub const DAYLIGHT_REFERENCE: [f32; 3] = [1.069_138, 1.002_004, 0.928_858];

/// Gains for a manual white balance setting.
///
/// Pure: the same temperature and tint always produce the same vector.
pub fn gains_for(temperature_kelvin: f32, tint: f32) -> GainVector {
    let temperature = if temperature_kelvin.is_finite() {
        temperature_kelvin.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
    } else {
        KNOTS[3].0
    };
    let tint = if tint.is_finite() { tint.clamp(-MAX_TINT, MAX_TINT) } else { 0.0 };

    let band = interpolate(temperature);
    let mut gains = Vector3::from(band).component_mul(&Vector3::from(SENSOR_BIAS));
    gains[1] *= 1.0 - tint / 200.0;

    GainVector::new(gains[0], gains[1], gains[2]).normalized_to_mean(1.0)
}

fn interpolate(temperature: f32) -> [f32; 3] {
    for pair in KNOTS.windows(2) {
        let (t0, g0) = pair[0];
        let (t1, g1) = pair[1];
        if temperature <= t1 {
            let f = ((temperature - t0) / (t1 - t0)).clamp(0.0, 1.0);
            return [
                g0[0] + (g1[0] - g0[0]) * f,
                g0[1] + (g1[1] - g0[1]) * f,
                g0[2] + (g1[2] - g0[2]) * f,
            ];
        }
    }
    KNOTS[KNOTS.len() - 1].1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_daylight_reference() {
        let g = gains_for(6500.0, 0.0);
        for (got, want) in g.as_array().iter().zip(DAYLIGHT_REFERENCE) {
            assert!(close(*got, want, 1e-3), "{got} vs {want}");
        }
        assert_eq!(gains_for(6500.0, 0.0), g);
    }

    #[test]
    fn test_mean_is_one_in_normal_range() {
        for k in [3500.0, 5000.0, 6000.0, 8000.0] {
            let g = gains_for(k, 0.0);
            assert!(close(g.mean(), 1.0, 1e-4), "{k}: mean {}", g.mean());
        }
    }

    #[test]
    fn test_bands_are_continuous() {
        for (knot, _) in KNOTS {
            let below = gains_for(knot - 0.01, 0.0);
            let above = gains_for(knot + 0.01, 0.0);
            for (a, b) in below.as_array().iter().zip(above.as_array()) {
                assert!(close(*a, b, 1e-3), "discontinuity at {knot}K");
            }
        }
    }

    #[test]
    fn test_warm_light_cuts_blue() {
        let warm = gains_for(3000.0, 0.0);
        let cool = gains_for(9000.0, 0.0);
        assert!(warm.blue() < warm.red());
        assert!(cool.blue() > cool.red());
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(gains_for(500.0, 0.0), gains_for(MIN_TEMPERATURE, 0.0));
        assert_eq!(gains_for(50_000.0, 0.0), gains_for(MAX_TEMPERATURE, 0.0));
        assert_eq!(gains_for(6500.0, 400.0), gains_for(6500.0, MAX_TINT));
        assert_eq!(gains_for(f32::NAN, f32::NAN), gains_for(6500.0, 0.0));

        let g = gains_for(MIN_TEMPERATURE, 0.0);
        assert!(g.blue() >= 0.4);
    }

    #[test]
    fn test_tint_moves_green() {
        let magenta = gains_for(6500.0, 40.0);
        let green = gains_for(6500.0, -40.0);
        assert!(magenta.green() < green.green());
    }
}
