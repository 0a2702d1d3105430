//! Field matching rules.
//!
//! Rules are written as plain strings in TOML and validated once into
//! [`FieldConfig`] values; the evaluator and the decision function only ever
//! see the validated form.

use crate::models::{ItemType, ItemValue};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Values with fewer characters than this are ignored by default.
pub const DEFAULT_MINIMUM_LENGTH: usize = 3;

/// How two values of a field are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchingMethod {
    /// String equality only.
    Exact,
    /// Equality, then bigram similarity tiers.
    Similar,
    /// Person name assembled from several parts.
    Name,
    /// Email address with local-part normalisation.
    Email,
    /// URL or social handle.
    Url,
}

impl MatchingMethod {
    /// Returns the method name as written in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Similar => "similar",
            Self::Name => "name",
            Self::Email => "email",
            Self::Url => "url",
        }
    }

    /// Parses a method name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown method.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "similar" => Ok(Self::Similar),
            "name" => Ok(Self::Name),
            "email" => Ok(Self::Email),
            "url" => Ok(Self::Url),
            other => Err(Error::InvalidInput(format!(
                "unknown matching method '{other}'"
            ))),
        }
    }
}

impl fmt::Display for MatchingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a matching field contributes to the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfMatch {
    /// Weighted towards a confident verdict.
    Confident,
    /// Weighted towards a potential verdict.
    Potential,
    /// Corroborating signal that scales the other fields' score.
    Multiplier,
}

impl IfMatch {
    /// Returns the tier name as written in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confident => "confident",
            Self::Potential => "potential",
            Self::Multiplier => "multiplier",
        }
    }

    /// Parses an optional tier; `null`, `none` and the empty string mean no tier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown tier.
    pub fn parse_optional(s: Option<&str>) -> Result<Option<Self>> {
        let Some(raw) = s else {
            return Ok(None);
        };
        match raw.trim().to_lowercase().as_str() {
            "" | "null" | "none" => Ok(None),
            "confident" => Ok(Some(Self::Confident)),
            "potential" => Ok(Some(Self::Potential)),
            "multiplier" => Ok(Some(Self::Multiplier)),
            other => Err(Error::InvalidInput(format!("unknown if_match '{other}'"))),
        }
    }
}

/// Effect of a field that holds values on both items but did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IfDifferent {
    /// The pair is never a duplicate.
    PreventMatch,
    /// Cap at potential and lower the potential score.
    PreventConfidentReducePotential,
    /// Lower both scores.
    ReduceConfidentReducePotential,
    /// Cap at potential.
    PreventConfident,
    /// Lower the confident score.
    ReduceConfident,
    /// Lower the potential score.
    ReducePotential,
}

impl IfDifferent {
    /// Returns the effect name as written in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreventMatch => "prevent-match",
            Self::PreventConfidentReducePotential => "prevent-confident-reduce-potential",
            Self::ReduceConfidentReducePotential => "reduce-confident-reduce-potential",
            Self::PreventConfident => "prevent-confident",
            Self::ReduceConfident => "reduce-confident",
            Self::ReducePotential => "reduce-potential",
        }
    }

    /// Parses an optional effect; `null`, `none` and the empty string mean no effect.
    ///
    /// Underscores are accepted in place of dashes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown effect.
    pub fn parse_optional(s: Option<&str>) -> Result<Option<Self>> {
        let Some(raw) = s else {
            return Ok(None);
        };
        match raw.trim().to_lowercase().replace('_', "-").as_str() {
            "" | "null" | "none" => Ok(None),
            "prevent-match" => Ok(Some(Self::PreventMatch)),
            "prevent-confident-reduce-potential" => Ok(Some(Self::PreventConfidentReducePotential)),
            "reduce-confident-reduce-potential" => Ok(Some(Self::ReduceConfidentReducePotential)),
            "prevent-confident" => Ok(Some(Self::PreventConfident)),
            "reduce-confident" => Ok(Some(Self::ReduceConfident)),
            "reduce-potential" => Ok(Some(Self::ReducePotential)),
            other => Err(Error::InvalidInput(format!(
                "unknown if_different '{other}'"
            ))),
        }
    }

    /// Returns true if the effect rules out any verdict.
    #[must_use]
    pub const fn prevents_match(self) -> bool {
        matches!(self, Self::PreventMatch)
    }

    /// Returns true if the effect caps the verdict at potential.
    #[must_use]
    pub const fn prevents_confident(self) -> bool {
        matches!(
            self,
            Self::PreventConfident | Self::PreventConfidentReducePotential
        )
    }

    /// Returns true if the effect lowers the confident score.
    #[must_use]
    pub const fn reduces_confident(self) -> bool {
        matches!(
            self,
            Self::ReduceConfident | Self::ReduceConfidentReducePotential
        )
    }

    /// Returns true if the effect lowers the potential score.
    #[must_use]
    pub const fn reduces_potential(self) -> bool {
        matches!(
            self,
            Self::ReducePotential
                | Self::ReduceConfidentReducePotential
                | Self::PreventConfidentReducePotential
        )
    }
}

/// Field rule as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFieldConfig {
    /// Field identity, stored on similarity edges.
    pub id: String,
    /// Raw CRM property names merged into the field.
    pub sources: Vec<String>,
    /// Matching method name.
    pub matching_method: String,
    /// Tier name or `null`.
    #[serde(default)]
    pub if_match: Option<String>,
    /// Effect name or `null`.
    #[serde(default)]
    pub if_different: Option<String>,
    /// Minimum value length.
    #[serde(default)]
    pub minimum_length: Option<usize>,
}

/// A validated field rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldConfig {
    /// Field identity, stored on similarity edges.
    pub id: String,
    /// Raw CRM property names merged into the field, in order.
    pub sources: Vec<String>,
    /// Matching method.
    pub matching_method: MatchingMethod,
    /// Contribution of a match.
    pub if_match: Option<IfMatch>,
    /// Effect of a mismatch.
    pub if_different: Option<IfDifferent>,
    /// Values shorter than this are ignored.
    pub minimum_length: usize,
}

impl FieldConfig {
    /// Creates a rule with no tier, no mismatch effect and the default minimum length.
    #[must_use]
    pub fn new(id: impl Into<String>, sources: &[&str], matching_method: MatchingMethod) -> Self {
        Self {
            id: id.into(),
            sources: sources.iter().map(ToString::to_string).collect(),
            matching_method,
            if_match: None,
            if_different: None,
            minimum_length: DEFAULT_MINIMUM_LENGTH,
        }
    }

    /// Sets the match tier.
    #[must_use]
    pub const fn with_if_match(mut self, if_match: IfMatch) -> Self {
        self.if_match = Some(if_match);
        self
    }

    /// Sets the mismatch effect.
    #[must_use]
    pub const fn with_if_different(mut self, if_different: IfDifferent) -> Self {
        self.if_different = Some(if_different);
        self
    }

    /// Sets the minimum value length.
    #[must_use]
    pub const fn with_minimum_length(mut self, minimum_length: usize) -> Self {
        self.minimum_length = minimum_length;
        self
    }

    /// Returns true for corroborating multiplier fields.
    #[must_use]
    pub fn is_multiplier(&self) -> bool {
        self.if_match == Some(IfMatch::Multiplier)
    }

    /// Returns true for fields that carry weight in the verdict.
    #[must_use]
    pub fn is_compared(&self) -> bool {
        matches!(self.if_match, Some(IfMatch::Confident | IfMatch::Potential))
    }
}

impl TryFrom<RawFieldConfig> for FieldConfig {
    type Error = Error;

    fn try_from(raw: RawFieldConfig) -> Result<Self> {
        let id = raw.id.trim().to_string();
        if id.is_empty() {
            return Err(Error::InvalidInput("field rule without an id".to_string()));
        }
        let sources: Vec<String> = raw
            .sources
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if sources.is_empty() {
            return Err(Error::InvalidInput(format!(
                "field rule '{id}' has no sources"
            )));
        }
        let minimum_length = raw.minimum_length.unwrap_or(DEFAULT_MINIMUM_LENGTH);
        if minimum_length == 0 {
            return Err(Error::InvalidInput(format!(
                "field rule '{id}' has a zero minimum_length"
            )));
        }

        let matching_method = MatchingMethod::parse(&raw.matching_method)
            .map_err(|e| Error::InvalidInput(format!("field rule '{id}': {e}")))?;
        let if_match = IfMatch::parse_optional(raw.if_match.as_deref())
            .map_err(|e| Error::InvalidInput(format!("field rule '{id}': {e}")))?;
        let if_different = IfDifferent::parse_optional(raw.if_different.as_deref())
            .map_err(|e| Error::InvalidInput(format!("field rule '{id}': {e}")))?;

        Ok(Self {
            id,
            sources,
            matching_method,
            if_match,
            if_different,
            minimum_length,
        })
    }
}

impl From<&FieldConfig> for RawFieldConfig {
    fn from(field: &FieldConfig) -> Self {
        Self {
            id: field.id.clone(),
            sources: field.sources.clone(),
            matching_method: field.matching_method.as_str().to_string(),
            if_match: field.if_match.map(|m| m.as_str().to_string()),
            if_different: field.if_different.map(|d| d.as_str().to_string()),
            minimum_length: Some(field.minimum_length),
        }
    }
}

/// Validates an ordered list of raw rules.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for the first malformed rule or a
/// repeated field id.
pub fn validate_rules(raw: Vec<RawFieldConfig>) -> Result<Vec<FieldConfig>> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|rule| {
            let field = FieldConfig::try_from(rule)?;
            if !seen.insert(field.id.clone()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate field rule id '{}'",
                    field.id
                )));
            }
            Ok(field)
        })
        .collect()
}

/// Field rules for every item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldConfigSet {
    /// Rules for contacts.
    pub contacts: Vec<FieldConfig>,
    /// Rules for companies.
    pub companies: Vec<FieldConfig>,
}

impl Default for FieldConfigSet {
    fn default() -> Self {
        Self {
            contacts: default_contact_fields(),
            companies: default_company_fields(),
        }
    }
}

impl FieldConfigSet {
    /// Returns the rules for an item type.
    #[must_use]
    pub fn for_type(&self, item_type: ItemType) -> &[FieldConfig] {
        match item_type {
            ItemType::Contacts => &self.contacts,
            ItemType::Companies => &self.companies,
        }
    }

    /// Returns every raw source property referenced by an item type's rules.
    #[must_use]
    pub fn relevant_sources(&self, item_type: ItemType) -> BTreeSet<&str> {
        self.for_type(item_type)
            .iter()
            .flat_map(|f| f.sources.iter().map(String::as_str))
            .collect()
    }

    /// Counts the configured source properties populated in `value`.
    #[must_use]
    pub fn filled_score(&self, item_type: ItemType, value: &ItemValue) -> u32 {
        let filled = self
            .relevant_sources(item_type)
            .into_iter()
            .filter(|source| value.get(*source).is_some_and(|v| !v.is_blank()))
            .count();
        u32::try_from(filled).unwrap_or(u32::MAX)
    }
}

/// Default rules for contacts.
#[must_use]
pub fn default_contact_fields() -> Vec<FieldConfig> {
    vec![
        FieldConfig::new("fullname", &["firstname", "lastname"], MatchingMethod::Name)
            .with_if_match(IfMatch::Potential)
            .with_if_different(IfDifferent::PreventConfidentReducePotential),
        FieldConfig::new("email", &["email", "hs_additional_emails"], MatchingMethod::Email)
            .with_if_match(IfMatch::Confident),
        FieldConfig::new("phone", &["phone", "mobilephone"], MatchingMethod::Exact)
            .with_if_match(IfMatch::Potential),
        FieldConfig::new("linkedin", &["hs_linkedinid", "linkedinbio"], MatchingMethod::Url)
            .with_if_match(IfMatch::Confident)
            .with_if_different(IfDifferent::PreventConfident),
        FieldConfig::new(
            "company",
            &["company", "associatedcompanyid"],
            MatchingMethod::Similar,
        )
        .with_if_match(IfMatch::Multiplier),
        FieldConfig::new("jobtitle", &["jobtitle"], MatchingMethod::Similar),
    ]
}

/// Default rules for companies.
#[must_use]
pub fn default_company_fields() -> Vec<FieldConfig> {
    vec![
        FieldConfig::new("name", &["name"], MatchingMethod::Similar)
            .with_if_match(IfMatch::Potential)
            .with_if_different(IfDifferent::ReduceConfident),
        FieldConfig::new("domain", &["domain", "website"], MatchingMethod::Url)
            .with_if_match(IfMatch::Confident)
            .with_if_different(IfDifferent::ReduceConfidentReducePotential),
        FieldConfig::new("phone", &["phone"], MatchingMethod::Exact)
            .with_if_match(IfMatch::Potential),
        FieldConfig::new("linkedin", &["linkedin_company_page"], MatchingMethod::Url)
            .with_if_match(IfMatch::Confident)
            .with_if_different(IfDifferent::PreventConfident),
        FieldConfig::new("city", &["city", "zip"], MatchingMethod::Similar)
            .with_if_match(IfMatch::Multiplier),
    ]
}
