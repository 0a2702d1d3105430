//! Field similarity evaluation.
//!
//! Compares two items field by field and emits at most one
//! [`SimilarityEdge`] per field rule.
//!
//! # Matching methods
//!
//! | Method | Exact | Similar | Potential | Unlikely |
//! |--------|-------|---------|-----------|----------|
//! | `exact` | equal | | | |
//! | `similar` | equal | dice > 0.90 | dice > 0.85 | dice > 0.80 |
//! | `email` | same mailbox | local and domain > 0.95 | local > 0.95, bare domain > 0.90 | local > 0.90 |
//! | `name` | equal full name | full > 0.90 | full > 0.80 or strict > 0.90 | full > 0.70 or strict > 0.80 |
//! | `url` | equal handle or URL | | | |
//!
//! Multiplier fields are only evaluated once another field produced an edge,
//! so they never create a link on their own.

mod normalize;

pub use normalize::{
    EmailParts, dice, is_bare_handle, normalize_url, normalize_value, url_handle,
};

use crate::config::{FieldConfig, FieldConfigSet, MatchingMethod};
use crate::models::{Item, SimilarityEdge, SimilarityScore};
use crate::{Error, Result};

/// Longest value, in characters, that a field rule will compare.
pub const MAX_VALUE_LENGTH: usize = 1024;

/// Compares two items and returns one edge per matching field.
///
/// The result is deterministic and symmetric: swapping `a` and `b` yields
/// the mirrored edges.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the items differ in type or
/// workspace or a compared value is longer than [`MAX_VALUE_LENGTH`], and
/// [`Error::InvariantViolation`] if both are the same item.
pub fn evaluate_similarity(
    config: &FieldConfigSet,
    a: &Item,
    b: &Item,
) -> Result<Vec<SimilarityEdge>> {
    check_comparable(a, b)?;
    let fields = config.for_type(a.item_type);
    check_values(fields, a)?;
    check_values(fields, b)?;

    let mut edges: Vec<SimilarityEdge> = fields
        .iter()
        .filter(|f| !f.is_multiplier())
        .filter_map(|f| evaluate_field(f, a, b))
        .collect();

    if !edges.is_empty() {
        edges.extend(
            fields
                .iter()
                .filter(|f| f.is_multiplier())
                .filter_map(|f| evaluate_field(f, a, b)),
        );
    }

    Ok(edges)
}

/// Rejects pairs that can never be compared.
pub(crate) fn check_comparable(a: &Item, b: &Item) -> Result<()> {
    if a.id == b.id {
        return Err(Error::InvariantViolation(format!(
            "item {} compared with itself",
            a.id
        )));
    }
    if a.item_type != b.item_type {
        return Err(Error::InvalidInput(format!(
            "cannot compare {} item {} with {} item {}",
            a.item_type, a.id, b.item_type, b.id
        )));
    }
    if a.workspace_id != b.workspace_id {
        return Err(Error::InvalidInput(format!(
            "items {} and {} belong to different workspaces",
            a.id, b.id
        )));
    }
    Ok(())
}

/// Rejects items carrying a configured value too long to compare.
fn check_values(fields: &[FieldConfig], item: &Item) -> Result<()> {
    for field in fields {
        for source in &field.sources {
            if let Some(entry) = item
                .field_entries(source)
                .into_iter()
                .find(|entry| entry.chars().count() > MAX_VALUE_LENGTH)
            {
                return Err(Error::InvalidInput(format!(
                    "item {} field {source} holds a {}-character value, limit is {MAX_VALUE_LENGTH}",
                    item.id,
                    entry.chars().count()
                )));
            }
        }
    }
    Ok(())
}

/// Returns true if `item` holds at least one value the field would compare.
///
/// Applies the same normalisation and length filter as the evaluator.
pub fn has_comparable_values(field: &FieldConfig, item: &Item) -> bool {
    match field.matching_method {
        MatchingMethod::Name => {
            join_parts(name_parts(field, item).iter().flatten())
                .chars()
                .count()
                >= field.minimum_length
        },
        _ => !field_values(field, item).is_empty(),
    }
}

/// Evaluates one field rule, keeping the best-scoring value pair.
fn evaluate_field(field: &FieldConfig, a: &Item, b: &Item) -> Option<SimilarityEdge> {
    let candidates: Vec<Candidate> = match field.matching_method {
        MatchingMethod::Name => compare_names(field, a, b).into_iter().collect(),
        method => {
            let values_a = field_values(field, a);
            let values_b = field_values(field, b);
            values_a
                .iter()
                .flat_map(|va| values_b.iter().map(move |vb| (va, vb)))
                .filter_map(|(va, vb)| {
                    compare_values(method, va, vb).map(|score| Candidate {
                        value_a: va.clone(),
                        value_b: vb.clone(),
                        score,
                    })
                })
                .collect()
        },
    };

    let best = candidates.into_iter().reduce(|best, next| {
        if next.outranks(&best) { next } else { best }
    })?;

    Some(SimilarityEdge {
        item_a_id: a.id.clone(),
        item_b_id: b.id.clone(),
        field_id: field.id.clone(),
        value_a: best.value_a,
        value_b: best.value_b,
        score: best.score,
    })
}

/// A scored value pair.
struct Candidate {
    value_a: String,
    value_b: String,
    score: SimilarityScore,
}

impl Candidate {
    /// Higher score wins; ties go to the smaller unordered value pair so the
    /// choice does not depend on which item is `a`.
    fn outranks(&self, other: &Self) -> bool {
        match self.score.cmp(&other.score) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.pair_key() < other.pair_key(),
        }
    }

    fn pair_key(&self) -> (&str, &str) {
        if self.value_a <= self.value_b {
            (&self.value_a, &self.value_b)
        } else {
            (&self.value_b, &self.value_a)
        }
    }
}

/// Collects the normalised values of a field across its sources.
///
/// Values shorter than the field's minimum length are dropped.
fn field_values(field: &FieldConfig, item: &Item) -> Vec<String> {
    let mut values: Vec<String> = field
        .sources
        .iter()
        .flat_map(|source| item.field_entries(source))
        .map(normalize_value)
        .filter(|v| v.chars().count() >= field.minimum_length)
        .collect();
    values.sort();
    values.dedup();
    values
}

/// Scores two normalised values with a non-name method.
fn compare_values(method: MatchingMethod, a: &str, b: &str) -> Option<SimilarityScore> {
    match method {
        MatchingMethod::Exact => (a == b).then_some(SimilarityScore::Exact),
        MatchingMethod::Similar | MatchingMethod::Name => compare_similar(a, b),
        MatchingMethod::Email => compare_emails(a, b),
        MatchingMethod::Url => compare_urls(a, b),
    }
}

fn compare_similar(a: &str, b: &str) -> Option<SimilarityScore> {
    if a == b {
        return Some(SimilarityScore::Exact);
    }
    let similarity = dice(a, b);
    if similarity > 0.90 {
        Some(SimilarityScore::Similar)
    } else if similarity > 0.85 {
        Some(SimilarityScore::Potential)
    } else if similarity > 0.80 {
        Some(SimilarityScore::Unlikely)
    } else {
        None
    }
}

fn compare_emails(a: &str, b: &str) -> Option<SimilarityScore> {
    let (Some(email_a), Some(email_b)) = (EmailParts::parse(a), EmailParts::parse(b)) else {
        tracing::debug!(value_a = a, value_b = b, "Skipping malformed email pair");
        return None;
    };
    if email_a.same_mailbox(&email_b) {
        return Some(SimilarityScore::Exact);
    }

    let local = dice(&email_a.local, &email_b.local);
    let domain = dice(&email_a.domain, &email_b.domain);
    if local > 0.95 && domain > 0.95 {
        return Some(SimilarityScore::Similar);
    }
    let bare_domain = dice(
        email_a.domain_without_extension(),
        email_b.domain_without_extension(),
    );
    if local > 0.95 && bare_domain > 0.90 {
        Some(SimilarityScore::Potential)
    } else if local > 0.90 {
        Some(SimilarityScore::Unlikely)
    } else {
        None
    }
}

fn compare_urls(a: &str, b: &str) -> Option<SimilarityScore> {
    let url_a = normalize_url(a);
    let url_b = normalize_url(b);
    if url_a.is_empty() || url_b.is_empty() {
        return None;
    }
    let matched = if is_bare_handle(&url_a) || is_bare_handle(&url_b) {
        url_handle(&url_a) == url_handle(&url_b)
    } else {
        url_a == url_b
    };
    matched.then_some(SimilarityScore::Exact)
}

/// Name parts of one item, one slot per source in configured order.
fn name_parts(field: &FieldConfig, item: &Item) -> Vec<Option<String>> {
    field
        .sources
        .iter()
        .map(|source| {
            let part = item
                .field_entries(source)
                .iter()
                .map(|entry| normalize_value(entry))
                .collect::<Vec<_>>()
                .join(" ");
            (!part.is_empty()).then_some(part)
        })
        .collect()
}

fn join_parts<'a>(parts: impl Iterator<Item = &'a String>) -> String {
    parts.map(String::as_str).collect::<Vec<_>>().join(" ")
}

/// Compares assembled person names.
///
/// The full name joins every populated part; the strict name joins only the
/// parts populated on both sides, so a missing last name does not count
/// against an otherwise equal first name.
fn compare_names(field: &FieldConfig, a: &Item, b: &Item) -> Option<Candidate> {
    let parts_a = name_parts(field, a);
    let parts_b = name_parts(field, b);

    let full_a = join_parts(parts_a.iter().flatten());
    let full_b = join_parts(parts_b.iter().flatten());
    if full_a.chars().count() < field.minimum_length
        || full_b.chars().count() < field.minimum_length
    {
        return None;
    }

    let shared = parts_a
        .iter()
        .zip(&parts_b)
        .filter_map(|(pa, pb)| pa.as_ref().zip(pb.as_ref()));
    let (strict_a, strict_b): (Vec<&String>, Vec<&String>) = shared.unzip();
    let strict_a = join_parts(strict_a.into_iter());
    let strict_b = join_parts(strict_b.into_iter());

    let score = name_score(&full_a, &full_b, &strict_a, &strict_b)?;

    Some(Candidate {
        value_a: full_a,
        value_b: full_b,
        score,
    })
}

fn name_score(full_a: &str, full_b: &str, strict_a: &str, strict_b: &str) -> Option<SimilarityScore> {
    if full_a == full_b {
        return Some(SimilarityScore::Exact);
    }
    let full = dice(full_a, full_b);
    let strict = if strict_a.is_empty() {
        0.0
    } else {
        dice(strict_a, strict_b)
    };
    if full > 0.90 {
        Some(SimilarityScore::Similar)
    } else if full > 0.80 || strict > 0.90 {
        Some(SimilarityScore::Potential)
    } else if full > 0.70 || strict > 0.80 {
        Some(SimilarityScore::Unlikely)
    } else {
        None
    }
}
