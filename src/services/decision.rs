//! Duplicate decision.
//!
//! Turns the similarity edges between two items into a verdict. Each
//! compared field adds tiered weights to a confident and a potential
//! accumulator; mismatches on populated fields subtract or cap; sparse
//! records get a bonus; a matching multiplier field scales the result.

use crate::config::{DupstackConfig, IfMatch};
use crate::models::{Item, SimilarityEdge, SimilarityScore};
use crate::services::similarity::{check_comparable, has_comparable_values};
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Outcome of comparing two items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicateVerdict {
    /// Confidently the same entity.
    Confident,
    /// Possibly the same entity.
    Potential,
    /// Not a duplicate.
    NotDuplicate,
}

impl DuplicateVerdict {
    /// Returns true for either positive tier.
    #[must_use]
    pub const fn is_duplicate(self) -> bool {
        !matches!(self, Self::NotDuplicate)
    }

    /// Returns the verdict as displayed to users.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confident => "CONFIDENT",
            Self::Potential => "POTENTIAL",
            Self::NotDuplicate => "NOT_DUPLICATE",
        }
    }
}

impl fmt::Display for DuplicateVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verdict with the scores that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionBreakdown {
    /// Final verdict.
    pub verdict: DuplicateVerdict,
    /// Confident accumulator after every modifier.
    pub confident_score: f64,
    /// Potential accumulator after every modifier.
    pub potential_score: f64,
    /// Sparse-record bonus added to both accumulators.
    pub missing_data_bonus: f64,
    /// Multiplier factor applied, 1.0 when none.
    pub multiplier: f64,
    /// Whether a mismatch capped the verdict at potential.
    pub confident_prevented: bool,
    /// Field whose mismatch ruled out any verdict.
    pub prevented_by: Option<String>,
}

/// Classifies a pair of items from their similarity edges.
///
/// Pure and symmetric: `classify(a, b) == classify(b, a)`. Edges that do not
/// connect `a` and `b` are ignored.
///
/// # Errors
///
/// Returns [`crate::Error::InvariantViolation`] if `a` and `b` are the same
/// item and [`crate::Error::InvalidInput`] if they differ in type.
pub fn classify(
    config: &DupstackConfig,
    a: &Item,
    b: &Item,
    edges: &[SimilarityEdge],
) -> Result<DuplicateVerdict> {
    explain(config, a, b, edges).map(|breakdown| breakdown.verdict)
}

/// Classifies a pair and reports how the verdict was reached.
///
/// # Errors
///
/// Same as [`classify`].
pub fn explain(
    config: &DupstackConfig,
    a: &Item,
    b: &Item,
    edges: &[SimilarityEdge],
) -> Result<DecisionBreakdown> {
    check_comparable(a, b)?;
    let scoring = &config.scoring;
    let fields = config.fields.for_type(a.item_type);

    let mut best_by_field: HashMap<&str, SimilarityScore> = HashMap::new();
    for edge in edges.iter().filter(|e| e.connects(&a.id, &b.id)) {
        best_by_field
            .entry(edge.field_id.as_str())
            .and_modify(|s| *s = (*s).max(edge.score))
            .or_insert(edge.score);
    }

    let mut confident = 0.0;
    let mut potential = 0.0;
    let mut malus_confident = 0.0;
    let mut malus_potential = 0.0;
    let mut matched_any = false;
    let mut confident_prevented = false;
    let mut filled_a = 0_usize;
    let mut filled_b = 0_usize;

    for field in fields.iter().filter(|f| f.is_compared()) {
        let a_has = has_comparable_values(field, a);
        let b_has = has_comparable_values(field, b);
        filled_a += usize::from(a_has);
        filled_b += usize::from(b_has);

        if let Some(score) = best_by_field.get(field.id.as_str()) {
            let weights = match field.if_match {
                Some(IfMatch::Confident) => &scoring.confident_field,
                _ => &scoring.potential_field,
            };
            confident += weights.confident.get(*score);
            potential += weights.potential.get(*score);
            matched_any = true;
            continue;
        }

        let Some(effect) = field.if_different else {
            continue;
        };
        if !(a_has && b_has) {
            continue;
        }
        if effect.prevents_match() {
            return Ok(DecisionBreakdown {
                verdict: DuplicateVerdict::NotDuplicate,
                confident_score: 0.0,
                potential_score: 0.0,
                missing_data_bonus: 0.0,
                multiplier: 1.0,
                confident_prevented: false,
                prevented_by: Some(field.id.clone()),
            });
        }
        confident_prevented |= effect.prevents_confident();
        if effect.reduces_confident() {
            malus_confident += scoring.mismatch_malus;
        }
        if effect.reduces_potential() {
            malus_potential += scoring.mismatch_malus;
        }
    }

    let missing_data_bonus = if matched_any {
        scoring.missing_data_bonus_for(filled_a.min(filled_b))
    } else {
        0.0
    };
    confident += missing_data_bonus - malus_confident;
    potential += missing_data_bonus - malus_potential;

    let multiplier = fields
        .iter()
        .filter(|f| f.is_multiplier())
        .filter_map(|f| best_by_field.get(f.id.as_str()))
        .max()
        .map_or(1.0, |score| scoring.multiplier.get(*score));
    if confident > 0.0 {
        confident *= multiplier;
    }
    if potential > 0.0 {
        potential *= multiplier;
    }

    let verdict = if !confident_prevented && confident >= scoring.confident_threshold {
        DuplicateVerdict::Confident
    } else if potential >= scoring.potential_threshold {
        DuplicateVerdict::Potential
    } else {
        DuplicateVerdict::NotDuplicate
    };

    Ok(DecisionBreakdown {
        verdict,
        confident_score: confident,
        potential_score: potential,
        missing_data_bonus,
        multiplier,
        confident_prevented,
        prevented_by: None,
    })
}
