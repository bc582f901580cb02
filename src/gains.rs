use nalgebra::Vector3;

use crate::error::{PipelineError, StageResult};

pub const MIN_GAIN: f32 = 0.4;
pub const MAX_GAIN: f32 = 3.0;
pub const MAX_MEAN_GAIN: f32 = 1.5;

/// Per-channel multiplicative correction in BGR order.
///
/// Every constructor enforces the invariants: each component lies in
/// `[MIN_GAIN, MAX_GAIN]` and the mean never exceeds `MAX_MEAN_GAIN`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainVector(Vector3<f32>);

impl Default for GainVector {
    fn default() -> Self {
        Self::identity()
    }
}

impl GainVector {
    pub fn identity() -> Self {
        Self(Vector3::new(1.0, 1.0, 1.0))
    }

    /// Builds a gain vector, replacing non-finite components with 1.0.
    pub fn new(blue: f32, green: f32, red: f32) -> Self {
        let fix = |v: f32| if v.is_finite() { v } else { 1.0 };
        Self::enforce(Vector3::new(fix(blue), fix(green), fix(red)))
    }

    /// Builds a gain vector from raw estimator output, rejecting NaN/inf.
    pub fn try_from_raw(raw: Vector3<f32>) -> StageResult<Self> {
        if let Some(value) = raw.iter().copied().find(|v| !v.is_finite()) {
            return Err(PipelineError::NonFinite { what: "gain", value });
        }
        Ok(Self::enforce(raw))
    }

    pub fn blue(&self) -> f32 {
        self.0[0]
    }

    pub fn green(&self) -> f32 {
        self.0[1]
    }

    pub fn red(&self) -> f32 {
        self.0[2]
    }

    pub fn as_array(&self) -> [f32; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    pub fn as_vector(&self) -> Vector3<f32> {
        self.0
    }

    pub fn mean(&self) -> f32 {
        self.0.mean()
    }

    pub fn is_identity(&self, tolerance: f32) -> bool {
        self.0.iter().all(|g| (g - 1.0).abs() <= tolerance)
    }

    /// Rescales so the mean equals `target`, then re-applies the invariants.
    pub fn normalized_to_mean(&self, target: f32) -> Self {
        let mean = self.mean();
        if mean <= f32::EPSILON {
            return *self;
        }
        Self::enforce(self.0 * (target / mean))
    }

    /// Largest absolute distance of any component from 1.0.
    pub fn deviation_from_neutral(&self) -> f32 {
        self.0.iter().map(|g| (g - 1.0).abs()).fold(0.0, f32::max)
    }

    /// Weighted average of gain vectors. `None` if the weights sum to zero.
    pub fn weighted_average<I>(entries: I) -> Option<Self>
    where
        I: IntoIterator<Item = (GainVector, f32)>,
    {
        let (sum, total) = entries
            .into_iter()
            .fold((Vector3::zeros(), 0.0f32), |(sum, total), (gain, w)| {
                (sum + gain.0 * w, total + w)
            });
        if total <= f32::EPSILON {
            return None;
        }
        Some(Self::enforce(sum / total))
    }

    fn enforce(raw: Vector3<f32>) -> Self {
        let clamped = raw.map(|g| g.clamp(MIN_GAIN, MAX_GAIN));
        Self(cap_mean(clamped, MAX_MEAN_GAIN))
    }
}

/// Scales components down until the mean is at most `max_mean`, keeping
/// every component at or above `MIN_GAIN`. Components that would sink below
/// the floor are pinned there and the remaining ones absorb the reduction.
fn cap_mean(gains: Vector3<f32>, max_mean: f32) -> Vector3<f32> {
    if gains.mean() <= max_mean {
        return gains;
    }

    let budget = max_mean * 3.0;
    let mut pinned = [false; 3];
    let mut out = gains;
    // At most one pass per component can pin something new.
    for _ in 0..3 {
        let pinned_sum = pinned.iter().filter(|&&p| p).count() as f32 * MIN_GAIN;
        let free_sum: f32 = (0..3).filter(|&i| !pinned[i]).map(|i| gains[i]).sum();
        if free_sum <= f32::EPSILON {
            break;
        }
        let k = (budget - pinned_sum) / free_sum;

        let mut newly_pinned = false;
        for i in 0..3 {
            if pinned[i] {
                out[i] = MIN_GAIN;
                continue;
            }
            let scaled = gains[i] * k;
            if scaled < MIN_GAIN {
                pinned[i] = true;
                newly_pinned = true;
                out[i] = MIN_GAIN;
            } else {
                out[i] = scaled;
            }
        }
        if !newly_pinned {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(g: &GainVector) {
        for c in g.as_array() {
            assert!((MIN_GAIN..=MAX_GAIN).contains(&c), "component {c} out of range");
        }
        assert!(g.mean() <= MAX_MEAN_GAIN + 1e-5, "mean {} too high", g.mean());
    }

    #[test]
    fn test_components_are_clamped() {
        let g = GainVector::new(0.1, 1.0, 9.0);
        assert_eq!(g.blue(), MIN_GAIN);
        assert_invariants(&g);
    }

    #[test]
    fn test_mean_cap_respects_floor() {
        let g = GainVector::new(0.4, 3.0, 3.0);
        assert_invariants(&g);
        assert!((g.mean() - MAX_MEAN_GAIN).abs() < 1e-4);
        assert_eq!(g.blue(), MIN_GAIN);
        assert!((g.green() - g.red()).abs() < 1e-6);

        let g = GainVector::new(3.0, 3.0, 3.0);
        assert_invariants(&g);
        assert!((g.blue() - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_non_finite_input() {
        let g = GainVector::new(f32::NAN, 1.2, f32::INFINITY);
        assert_eq!(g.blue(), 1.0);
        assert_eq!(g.red(), 1.0);

        let err = GainVector::try_from_raw(Vector3::new(1.0, f32::NAN, 1.0)).unwrap_err();
        assert!(matches!(err, PipelineError::NonFinite { what: "gain", .. }));
    }

    #[test]
    fn test_weighted_average() {
        let a = GainVector::new(1.0, 1.0, 1.0);
        let b = GainVector::new(2.0, 1.0, 0.5);
        let avg = GainVector::weighted_average([(a, 1.0), (b, 3.0)]).unwrap();
        assert!((avg.blue() - 1.75).abs() < 1e-5);
        assert!((avg.red() - 0.625).abs() < 1e-5);
        assert!(GainVector::weighted_average(Vec::new()).is_none());
    }

    #[test]
    fn test_normalized_to_mean() {
        let g = GainVector::new(0.5, 1.0, 1.5).normalized_to_mean(1.2);
        assert!((g.mean() - 1.2).abs() < 1e-5);
        assert!(!g.is_identity(0.01));
        assert!(GainVector::identity().is_identity(0.0));
    }
}
