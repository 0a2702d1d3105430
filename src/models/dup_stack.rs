//! Dup stack types.

use super::{ItemId, ItemType, WorkspaceId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a dup stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DupStackId(String);

impl DupStackId {
    /// Creates a stack ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh time-ordered stack ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DupStackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of an item inside a dup stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DupType {
    /// The most complete member; other members merge into it.
    Reference,
    /// Confidently a duplicate of the reference.
    Confident,
    /// Possibly a duplicate; needs review.
    Potential,
    /// Marked by a reviewer as not a duplicate.
    FalsePositive,
}

impl DupType {
    /// Returns the dup type as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "REFERENCE",
            Self::Confident => "CONFIDENT",
            Self::Potential => "POTENTIAL",
            Self::FalsePositive => "FALSE_POSITIVE",
        }
    }

    /// Parses a stored dup type.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "REFERENCE" => Some(Self::Reference),
            "CONFIDENT" => Some(Self::Confident),
            "POTENTIAL" => Some(Self::Potential),
            "FALSE_POSITIVE" => Some(Self::FalsePositive),
            _ => None,
        }
    }
}

impl fmt::Display for DupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One membership row of a dup stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DupStackMember {
    /// Member item.
    pub item_id: ItemId,
    /// Role in the stack.
    pub dup_type: DupType,
}

/// A cluster of items believed to represent one real-world entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DupStack {
    /// Stack identity.
    pub id: DupStackId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Item type shared by every member.
    pub item_type: ItemType,
    /// Members, reference first.
    pub members: Vec<DupStackMember>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl DupStack {
    /// Builds a stack from resolver tiers.
    ///
    /// The first confident item becomes the reference, the remaining
    /// confident items become `Confident` members and the potential items
    /// become `Potential` members.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if `confident` is empty.
    pub fn from_tiers(
        workspace_id: WorkspaceId,
        item_type: ItemType,
        confident: &[ItemId],
        potential: &[ItemId],
    ) -> Result<Self> {
        let Some((reference, rest)) = confident.split_first() else {
            return Err(Error::InvariantViolation(
                "dup stack needs a reference item".to_string(),
            ));
        };

        let members = std::iter::once(DupStackMember {
            item_id: reference.clone(),
            dup_type: DupType::Reference,
        })
        .chain(rest.iter().map(|id| DupStackMember {
            item_id: id.clone(),
            dup_type: DupType::Confident,
        }))
        .chain(potential.iter().map(|id| DupStackMember {
            item_id: id.clone(),
            dup_type: DupType::Potential,
        }))
        .collect();

        Ok(Self {
            id: DupStackId::generate(),
            workspace_id,
            item_type,
            members,
            created_at: crate::current_timestamp(),
        })
    }

    /// Returns the reference member's item ID.
    #[must_use]
    pub fn reference(&self) -> Option<&ItemId> {
        self.members
            .first()
            .filter(|m| m.dup_type == DupType::Reference)
            .map(|m| &m.item_id)
    }

    /// Returns every member item ID in stack order.
    #[must_use]
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.members.iter().map(|m| m.item_id.clone()).collect()
    }

    /// Returns true if `id` is a member.
    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.members.iter().any(|m| &m.item_id == id)
    }

    /// Returns the members with the given role.
    #[must_use]
    pub fn members_of_type(&self, dup_type: DupType) -> Vec<&ItemId> {
        self.members
            .iter()
            .filter(|m| m.dup_type == dup_type)
            .map(|m| &m.item_id)
            .collect()
    }

    /// Checks the structural invariants of a stack.
    ///
    /// Exactly one `Reference` member, placed first, and no item listed twice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] describing the first broken rule.
    pub fn validate(&self) -> Result<()> {
        if self.reference().is_none() {
            return Err(Error::InvariantViolation(format!(
                "dup stack {} does not start with a reference member",
                self.id
            )));
        }
        let references = self.members_of_type(DupType::Reference).len();
        if references != 1 {
            return Err(Error::InvariantViolation(format!(
                "dup stack {} has {references} reference members",
                self.id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.members.iter().find(|m| !seen.insert(&m.item_id)) {
            return Err(Error::InvariantViolation(format!(
                "dup stack {} lists item {} twice",
                self.id, dup.item_id
            )));
        }
        Ok(())
    }
}
