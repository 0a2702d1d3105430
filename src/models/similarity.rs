//! Similarity edge types.

use super::ItemId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strength of a field-level match, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityScore {
    /// Values are equal after normalisation.
    Exact,
    /// Values are near-identical.
    Similar,
    /// Values plausibly refer to the same thing.
    Potential,
    /// Values share a weak resemblance.
    Unlikely,
}

impl SimilarityScore {
    /// Returns all scores from strongest to weakest.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Exact, Self::Similar, Self::Potential, Self::Unlikely]
    }

    /// Rank used to keep the best edge per field (higher is stronger).
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Exact => 4,
            Self::Similar => 3,
            Self::Potential => 2,
            Self::Unlikely => 1,
        }
    }

    /// Returns the score as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Similar => "similar",
            Self::Potential => "potential",
            Self::Unlikely => "unlikely",
        }
    }

    /// Parses a score string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "similar" => Some(Self::Similar),
            "potential" => Some(Self::Potential),
            "unlikely" => Some(Self::Unlikely),
            _ => None,
        }
    }
}

impl PartialOrd for SimilarityScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimilarityScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for SimilarityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scored relation between two items for one configured field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimilarityEdge {
    /// First endpoint.
    pub item_a_id: ItemId,
    /// Second endpoint.
    pub item_b_id: ItemId,
    /// Identity of the field rule that produced the edge.
    pub field_id: String,
    /// Matched value on the first endpoint.
    pub value_a: String,
    /// Matched value on the second endpoint.
    pub value_b: String,
    /// Match strength.
    pub score: SimilarityScore,
}

impl SimilarityEdge {
    /// Returns the same edge with its endpoints swapped.
    #[must_use]
    pub fn mirrored(self) -> Self {
        Self {
            item_a_id: self.item_b_id,
            item_b_id: self.item_a_id,
            field_id: self.field_id,
            value_a: self.value_b,
            value_b: self.value_a,
            score: self.score,
        }
    }

    /// Returns the edge oriented so that `item_a_id < item_b_id`.
    ///
    /// Stores key edges by this orientation so that an unordered pair maps
    /// to a single row per field.
    #[must_use]
    pub fn canonical(self) -> Self {
        if self.item_a_id <= self.item_b_id {
            self
        } else {
            self.mirrored()
        }
    }

    /// Returns the endpoint opposite `id`, if `id` is an endpoint.
    #[must_use]
    pub fn other_endpoint(&self, id: &ItemId) -> Option<&ItemId> {
        if &self.item_a_id == id {
            Some(&self.item_b_id)
        } else if &self.item_b_id == id {
            Some(&self.item_a_id)
        } else {
            None
        }
    }

    /// Returns true if the edge links `a` and `b` in either direction.
    #[must_use]
    pub fn connects(&self, a: &ItemId, b: &ItemId) -> bool {
        (&self.item_a_id == a && &self.item_b_id == b)
            || (&self.item_a_id == b && &self.item_b_id == a)
    }

    /// Key identifying the edge's slot: unordered pair plus field.
    #[must_use]
    pub fn slot(&self) -> (ItemId, ItemId, String) {
        let (a, b) = if self.item_a_id <= self.item_b_id {
            (&self.item_a_id, &self.item_b_id)
        } else {
            (&self.item_b_id, &self.item_a_id)
        };
        (a.clone(), b.clone(), self.field_id.clone())
    }
}
