//! Verdict scoring table.

use crate::models::SimilarityScore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Points awarded per similarity tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierWeights {
    /// Weight of an exact match.
    pub exact: f64,
    /// Weight of a similar match.
    pub similar: f64,
    /// Weight of a potential match.
    pub potential: f64,
    /// Weight of an unlikely match.
    pub unlikely: f64,
}

impl TierWeights {
    /// Creates weights from the four tier values, strongest first.
    #[must_use]
    pub const fn new(exact: f64, similar: f64, potential: f64, unlikely: f64) -> Self {
        Self {
            exact,
            similar,
            potential,
            unlikely,
        }
    }

    /// Returns the weight for a score.
    #[must_use]
    pub const fn get(&self, score: SimilarityScore) -> f64 {
        match score {
            SimilarityScore::Exact => self.exact,
            SimilarityScore::Similar => self.similar,
            SimilarityScore::Potential => self.potential,
            SimilarityScore::Unlikely => self.unlikely,
        }
    }

    fn values(&self) -> [f64; 4] {
        [self.exact, self.similar, self.potential, self.unlikely]
    }
}

/// Weights a matched field adds to the two accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldWeights {
    /// Added to the confident accumulator.
    pub confident: TierWeights,
    /// Added to the potential accumulator.
    pub potential: TierWeights,
}

/// Thresholds, weights and modifiers used by the decision function.
///
/// Every key may be overridden from the `[scoring]` table of the config
/// file; missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringTable {
    /// Minimum confident accumulator for a confident verdict.
    pub confident_threshold: f64,
    /// Minimum potential accumulator for a potential verdict.
    pub potential_threshold: f64,
    /// Weights of fields with `if_match = confident`.
    pub confident_field: FieldWeights,
    /// Weights of fields with `if_match = potential`.
    pub potential_field: FieldWeights,
    /// Points removed by a `reduce-*` mismatch.
    pub mismatch_malus: f64,
    /// Bonus for sparse records, indexed by populated compared fields minus one.
    pub missing_data_bonus: Vec<f64>,
    /// Scale factors of multiplier fields.
    pub multiplier: TierWeights,
}

impl Default for ScoringTable {
    fn default() -> Self {
        Self {
            confident_threshold: 70.0,
            potential_threshold: 50.0,
            confident_field: FieldWeights {
                confident: TierWeights::new(70.0, 50.0, 35.0, 15.0),
                potential: TierWeights::new(70.0, 50.0, 35.0, 15.0),
            },
            potential_field: FieldWeights {
                confident: TierWeights::new(35.0, 30.0, 20.0, 10.0),
                potential: TierWeights::new(50.0, 40.0, 30.0, 15.0),
            },
            mismatch_malus: 30.0,
            missing_data_bonus: vec![20.0, 10.0, 5.0],
            multiplier: TierWeights::new(1.5, 1.4, 1.25, 1.1),
        }
    }
}

impl ScoringTable {
    /// Returns the sparse-record bonus for `min_filled` populated compared fields.
    #[must_use]
    pub fn missing_data_bonus_for(&self, min_filled: usize) -> f64 {
        min_filled
            .checked_sub(1)
            .and_then(|i| self.missing_data_bonus.get(i))
            .copied()
            .unwrap_or(0.0)
    }

    /// Checks that the table is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a threshold is not positive, the
    /// potential threshold exceeds the confident one, a weight or bonus is
    /// negative, or a multiplier is below 1.
    pub fn validate(&self) -> Result<()> {
        if self.confident_threshold <= 0.0 || self.potential_threshold <= 0.0 {
            return Err(Error::InvalidInput(
                "scoring thresholds must be positive".to_string(),
            ));
        }
        if self.potential_threshold > self.confident_threshold {
            return Err(Error::InvalidInput(format!(
                "potential threshold {} exceeds confident threshold {}",
                self.potential_threshold, self.confident_threshold
            )));
        }
        let weights = [
            self.confident_field.confident,
            self.confident_field.potential,
            self.potential_field.confident,
            self.potential_field.potential,
        ];
        let negative = weights
            .iter()
            .flat_map(TierWeights::values)
            .chain(self.missing_data_bonus.iter().copied())
            .chain(std::iter::once(self.mismatch_malus))
            .any(|w| w < 0.0);
        if negative {
            return Err(Error::InvalidInput(
                "scoring weights must not be negative".to_string(),
            ));
        }
        if self.multiplier.values().iter().any(|m| *m < 1.0) {
            return Err(Error::InvalidInput(
                "multiplier factors must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
