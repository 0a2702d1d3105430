//! Value normalisation for field comparison.

// Static regexes are checked by the unit tests below
#![allow(clippy::expect_used)]

use regex::Regex;
use std::sync::LazyLock;

/// URL scheme prefix such as `https://`.
static URL_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9+.\-]*://").expect("static regex: url scheme")
});

/// Leading `www.` host label.
static WWW_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^www\d?\.").expect("static regex: www prefix"));

/// Trims and lowercases a raw value.
#[must_use]
pub fn normalize_value(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Bigram Dice coefficient of two strings, in `0.0..=1.0`.
///
/// Whitespace is ignored.
#[must_use]
pub fn dice(a: &str, b: &str) -> f64 {
    strsim::sorensen_dice(a, b)
}

/// An email address split for comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailParts {
    /// Local part with any `+suffix` and every dot removed.
    pub local: String,
    /// Domain part.
    pub domain: String,
}

impl EmailParts {
    /// Splits and normalises an address.
    ///
    /// Returns `None` for anything that is not `local@domain` with both
    /// parts non-empty.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let value = normalize_value(raw);
        let (local, domain) = value.split_once('@')?;
        if domain.contains('@') || domain.is_empty() || domain.contains(char::is_whitespace) {
            return None;
        }
        let local = local.split('+').next().unwrap_or_default().replace('.', "");
        if local.is_empty() {
            return None;
        }
        Some(Self {
            local,
            domain: domain.to_string(),
        })
    }

    /// Returns the domain without its last label, e.g. `acme` for `acme.co`.
    #[must_use]
    pub fn domain_without_extension(&self) -> &str {
        self.domain
            .rsplit_once('.')
            .map_or(self.domain.as_str(), |(head, _)| head)
    }

    /// Returns true if both addresses normalise to the same mailbox.
    #[must_use]
    pub fn same_mailbox(&self, other: &Self) -> bool {
        self.local == other.local && self.domain == other.domain
    }
}

/// Normalises a URL or handle for comparison.
///
/// Lowercases, strips the scheme, a leading `www.`, any query or fragment,
/// and surrounding slashes.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let value = normalize_value(raw);
    let value = URL_SCHEME.replace(&value, "");
    let value = WWW_PREFIX.replace(&value, "");
    let value = value
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_matches('/');
    value.to_string()
}

/// Returns true if a normalised URL is a bare handle without a path.
#[must_use]
pub fn is_bare_handle(normalized: &str) -> bool {
    !normalized.contains('/')
}

/// Returns the handle of a normalised URL: the value itself for a bare
/// handle, otherwise its last path segment.
#[must_use]
pub fn url_handle(normalized: &str) -> &str {
    normalized.rsplit('/').next().unwrap_or(normalized)
}
