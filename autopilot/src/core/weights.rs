//! Scoring weight vectors.

use serde::{Deserialize, Serialize};

use crate::core::error::DecisionError;

const SUM_TOLERANCE: f64 = 1e-9;

/// Relative importance of each scoring metric. Normalized vectors sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub effort: f64,
    pub risk: f64,
    pub alignment: f64,
    pub confidence: f64,
}

impl WeightVector {
    pub const fn new(effort: f64, risk: f64, alignment: f64, confidence: f64) -> Self {
        Self {
            effort,
            risk,
            alignment,
            confidence,
        }
    }

    pub fn sum(&self) -> f64 {
        self.effort + self.risk + self.alignment + self.confidence
    }

    fn components(&self) -> [f64; 4] {
        [self.effort, self.risk, self.alignment, self.confidence]
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(
            f(self.effort),
            f(self.risk),
            f(self.alignment),
            f(self.confidence),
        )
    }

    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() < SUM_TOLERANCE
    }

    /// Return a copy rescaled to sum to 1.0.
    ///
    /// Negative, non-finite, or all-zero vectors cannot be normalized.
    pub fn normalized(&self) -> Result<Self, DecisionError> {
        if let Some(bad) = self.components().iter().find(|w| !w.is_finite()) {
            return Err(DecisionError::InvalidWeights(format!(
                "non-finite component {bad}"
            )));
        }
        if let Some(bad) = self.components().iter().find(|w| **w < 0.0) {
            return Err(DecisionError::InvalidWeights(format!(
                "negative component {bad}"
            )));
        }
        let sum = self.sum();
        if !sum.is_finite() {
            return Err(DecisionError::InvalidWeights(format!(
                "components sum to {sum}"
            )));
        }
        if sum <= 0.0 {
            return Err(DecisionError::InvalidWeights(
                "components sum to zero".to_string(),
            ));
        }
        if self.is_normalized() {
            return Ok(*self);
        }
        Ok(self.map(|w| w / sum))
    }

    /// Linear interpolation: `factor = 0` yields `self`, `factor = 1` yields `other`.
    pub fn blend(&self, other: &Self, factor: f64) -> Self {
        let t = factor.clamp(0.0, 1.0);
        Self::new(
            self.effort * (1.0 - t) + other.effort * t,
            self.risk * (1.0 - t) + other.risk * t,
            self.alignment * (1.0 - t) + other.alignment * t,
            self.confidence * (1.0 - t) + other.confidence * t,
        )
    }

    /// Component-wise mean. Returns `None` for an empty slice.
    pub fn mean(vectors: &[Self]) -> Option<Self> {
        if vectors.is_empty() {
            return None;
        }
        let n = vectors.len() as f64;
        let total = vectors.iter().fold(Self::new(0.0, 0.0, 0.0, 0.0), |acc, w| {
            Self::new(
                acc.effort + w.effort,
                acc.risk + w.risk,
                acc.alignment + w.alignment,
                acc.confidence + w.confidence,
            )
        });
        Some(total.map(|w| w / n))
    }

    /// Clamp every component to be non-negative.
    pub fn clamp_non_negative(&self) -> Self {
        self.map(|w| if w.is_finite() { w.max(0.0) } else { 0.0 })
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.components()
            .iter()
            .zip(other.components())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalized_vector_is_returned_unchanged() {
        let w = WeightVector::new(0.35, 0.25, 0.30, 0.10);
        assert_eq!(w.normalized().expect("normalize"), w);
    }

    #[test]
    fn unnormalized_vector_is_rescaled() {
        let w = WeightVector::new(2.0, 2.0, 4.0, 0.0)
            .normalized()
            .expect("normalize");
        assert!(w.approx_eq(&WeightVector::new(0.25, 0.25, 0.5, 0.0), 1e-12));
    }

    #[test]
    fn malformed_vectors_are_rejected() {
        assert!(WeightVector::new(0.0, 0.0, 0.0, 0.0).normalized().is_err());
        assert!(WeightVector::new(-0.1, 0.5, 0.5, 0.1).normalized().is_err());
        assert!(
            WeightVector::new(f64::NAN, 0.5, 0.5, 0.1)
                .normalized()
                .is_err()
        );
    }

    #[test]
    fn overflowing_sum_is_rejected() {
        let huge = f64::MAX / 2.0;
        let err = WeightVector::new(huge, huge, huge, 0.0)
            .normalized()
            .unwrap_err();
        assert!(err.to_string().contains("sum to inf"));
    }

    #[test]
    fn blend_interpolates_between_endpoints() {
        let a = WeightVector::new(1.0, 0.0, 0.0, 0.0);
        let b = WeightVector::new(0.0, 1.0, 0.0, 0.0);
        assert_eq!(a.blend(&b, 0.0), a);
        assert_eq!(a.blend(&b, 1.0), b);
        assert!(
            a.blend(&b, 0.25)
                .approx_eq(&WeightVector::new(0.75, 0.25, 0.0, 0.0), 1e-12)
        );
    }

    #[test]
    fn mean_of_empty_is_none() {
        assert!(WeightVector::mean(&[]).is_none());
    }

    proptest! {
        #[test]
        fn normalization_always_sums_to_one(
            e in 0.0f64..10.0,
            r in 0.0f64..10.0,
            a in 0.0f64..10.0,
            c in 0.001f64..10.0,
        ) {
            let w = WeightVector::new(e, r, a, c).normalized().expect("normalize");
            prop_assert!((w.sum() - 1.0).abs() < 1e-9);
            prop_assert!(
                w.effort >= 0.0 && w.risk >= 0.0 && w.alignment >= 0.0 && w.confidence >= 0.0
            );
        }
    }
}
