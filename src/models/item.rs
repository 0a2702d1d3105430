//! CRM item types and identifiers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Unique internal identifier for a synced item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Creates an item ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random item ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the workspace (one connected CRM account) an item belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Creates a workspace ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of CRM record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    /// People records.
    Contacts,
    /// Organisation records.
    Companies,
}

impl ItemType {
    /// Returns all item types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Contacts, Self::Companies]
    }

    /// Returns the item type as stored in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Contacts => "CONTACTS",
            Self::Companies => "COMPANIES",
        }
    }

    /// Parses an item type, accepting singular and lowercase spellings.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "contacts" | "contact" => Some(Self::Contacts),
            "companies" | "company" => Some(Self::Companies),
            _ => None,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw value of one CRM field.
///
/// Text values may hold several entries separated by `;`, the way CRMs
/// export multi-valued properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A single string value.
    Text(String),
    /// A multi-valued field.
    List(Vec<String>),
}

impl FieldValue {
    /// Returns every non-empty trimmed entry of the value.
    #[must_use]
    pub fn entries(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => text
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect(),
            Self::List(values) => values
                .iter()
                .map(|v| v.trim())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Returns true if the value holds no usable entry.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.entries().is_empty()
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

/// Raw field map of an item, keyed by CRM property name.
pub type ItemValue = BTreeMap<String, FieldValue>;

/// A record synced from the external CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Stable internal identity.
    pub id: ItemId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Contact or company.
    pub item_type: ItemType,
    /// Identifier of the record in the external CRM.
    pub distant_id: String,
    /// Raw field values.
    pub value: ItemValue,
    /// Number of configured source fields that are populated.
    pub filled_score: u32,
    /// Whether the item has been compared against every installed item.
    pub similarity_checked: bool,
    /// Whether the resolver has made its stack decision for the item.
    pub dup_checked: bool,
    /// External id of the record this item was merged into, if any.
    pub merged_in_distant_id: Option<String>,
    /// Store-assigned insertion order, used as the completeness tie-break.
    pub sequence: u64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: u64,
}

impl Item {
    /// Creates an unchecked item with a generated ID.
    ///
    /// `filled_score` and `sequence` are left at zero; the sync service and
    /// the store fill them in.
    #[must_use]
    pub fn new(
        workspace_id: WorkspaceId,
        item_type: ItemType,
        distant_id: impl Into<String>,
        value: ItemValue,
    ) -> Self {
        let now = crate::current_timestamp();
        Self {
            id: ItemId::generate(),
            workspace_id,
            item_type,
            distant_id: distant_id.into(),
            value,
            filled_score: 0,
            similarity_checked: false,
            dup_checked: false,
            merged_in_distant_id: None,
            sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets an explicit ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets one raw field value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.value.insert(name.into(), value.into());
        self
    }

    /// Sets the filled score.
    #[must_use]
    pub const fn with_filled_score(mut self, filled_score: u32) -> Self {
        self.filled_score = filled_score;
        self
    }

    /// Returns the non-empty entries of a raw field.
    #[must_use]
    pub fn field_entries(&self, name: &str) -> Vec<&str> {
        self.value.get(name).map(FieldValue::entries).unwrap_or_default()
    }

    /// Returns true if any of the given source fields holds a value.
    #[must_use]
    pub fn has_any(&self, sources: &[String]) -> bool {
        sources.iter().any(|s| !self.field_entries(s).is_empty())
    }

    /// Returns true if the item has been merged away in the CRM.
    #[must_use]
    pub const fn is_merged(&self) -> bool {
        self.merged_in_distant_id.is_some()
    }

    /// Orders items from most to least complete.
    ///
    /// Higher `filled_score` first; ties go to the earlier `sequence`, then
    /// to the smaller ID so the order is total.
    #[must_use]
    pub fn completeness_cmp(&self, other: &Self) -> Ordering {
        other
            .filled_score
            .cmp(&self.filled_score)
            .then_with(|| self.sequence.cmp(&other.sequence))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Returns true if this item should seed a stack ahead of `other`.
    #[must_use]
    pub fn outranks(&self, other: &Self) -> bool {
        self.completeness_cmp(other) == Ordering::Less
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn item(filled: u32, sequence: u64) -> Item {
        let mut item = Item::new(
            WorkspaceId::new("ws"),
            ItemType::Contacts,
            format!("d{sequence}"),
            ItemValue::new(),
        )
        .with_filled_score(filled);
        item.sequence = sequence;
        item
    }

    #[test_case("contacts", Some(ItemType::Contacts); "plural")]
    #[test_case("CONTACT", Some(ItemType::Contacts); "singular upper")]
    #[test_case(" Companies ", Some(ItemType::Companies); "padded")]
    #[test_case("deals", None; "unknown")]
    fn test_item_type_parse(input: &str, expected: Option<ItemType>) {
        assert_eq!(ItemType::parse(input), expected);
    }

    #[test]
    fn test_field_value_entries() {
        let text = FieldValue::from(" a@x.com ; b@y.com ;; ");
        assert_eq!(text.entries(), vec!["a@x.com", "b@y.com"]);

        let list = FieldValue::from(vec![" one ".to_string(), String::new()]);
        assert_eq!(list.entries(), vec!["one"]);
        assert!(FieldValue::from("  ").is_blank());
    }

    #[test]
    fn test_field_value_deserializes_untagged() {
        let value: ItemValue =
            serde_json::from_str(r#"{"email": "a@x.com", "phones": ["1", "2"]}"#).unwrap();
        assert_eq!(value["email"], FieldValue::Text("a@x.com".to_string()));
        assert_eq!(
            value["phones"],
            FieldValue::List(vec!["1".to_string(), "2".to_string()])
        );
    }

    #[test]
    fn test_completeness_order() {
        let rich = item(9, 5);
        let sparse = item(5, 1);
        assert!(rich.outranks(&sparse));
        assert!(!sparse.outranks(&rich));

        let early = item(5, 1);
        let late = item(5, 2);
        assert!(early.outranks(&late));
        assert!(!late.outranks(&early));
        assert!(!early.outranks(&early));
    }

    #[test]
    fn test_has_any() {
        let item = item(1, 1).with_field("firstname", "Ada");
        assert!(item.has_any(&["lastname".to_string(), "firstname".to_string()]));
        assert!(!item.has_any(&["lastname".to_string()]));
    }
}
