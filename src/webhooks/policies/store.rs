//! Registry whitelist loaded once at startup.
//!
//! The store is built before the webhook listener binds and is shared
//! read-only by every in-flight review, so it carries no interior mutability.

use std::fmt;
use std::str::FromStr;

/// How a whitelist prefix is compared against a container image reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PrefixMatch {
    /// Plain string prefix. `registry.example.com` also matches
    /// `registry.example.com.evil.io/app`.
    #[default]
    Prefix,
    /// The prefix must end on a reference boundary: either the prefix ends in
    /// `/`, it covers the whole image, or the image continues with `/`, `:` or `@`.
    PathSegment,
}

impl PrefixMatch {
    /// Check whether `image` is covered by `prefix` under this mode
    pub fn matches(self, image: &str, prefix: &str) -> bool {
        let Some(rest) = image.strip_prefix(prefix) else {
            return false;
        };
        match self {
            PrefixMatch::Prefix => true,
            PrefixMatch::PathSegment => {
                prefix.ends_with('/')
                    || rest.is_empty()
                    || rest.starts_with(['/', ':', '@'])
            }
        }
    }
}

impl fmt::Display for PrefixMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixMatch::Prefix => write!(f, "prefix"),
            PrefixMatch::PathSegment => write!(f, "path-segment"),
        }
    }
}

/// Error returned when parsing an unknown prefix-match mode
#[derive(Debug, thiserror::Error)]
#[error("unknown prefix match mode '{0}' (expected 'prefix' or 'path-segment')")]
pub struct ParsePrefixMatchError(String);

impl FromStr for PrefixMatch {
    type Err = ParsePrefixMatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefix" => Ok(PrefixMatch::Prefix),
            "path-segment" => Ok(PrefixMatch::PathSegment),
            other => Err(ParsePrefixMatchError(other.to_string())),
        }
    }
}

/// Ordered, case-sensitive set of allowed registry prefixes.
///
/// An empty store whitelists nothing, so every container image is denied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyStore {
    prefixes: Vec<String>,
    mode: PrefixMatch,
}

impl PolicyStore {
    /// Create a store from an ordered list of prefixes.
    ///
    /// Empty entries are dropped: an empty prefix would match every image.
    /// Duplicates keep their first position.
    pub fn new<I, S>(prefixes: I, mode: PrefixMatch) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for prefix in prefixes.into_iter().map(Into::into) {
            if prefix.is_empty() || ordered.contains(&prefix) {
                continue;
            }
            ordered.push(prefix);
        }
        Self {
            prefixes: ordered,
            mode,
        }
    }

    /// Parse the comma-separated `WHITELIST_REGISTRY` form.
    ///
    /// Entries are split on `,` only; surrounding whitespace is part of the prefix.
    pub fn from_csv(value: &str, mode: PrefixMatch) -> Self {
        Self::new(value.split(','), mode)
    }

    /// The prefixes in configuration order
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// The configured matching mode
    pub fn mode(&self) -> PrefixMatch {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Check whether an image reference is covered by any whitelisted prefix
    pub fn is_whitelisted(&self, image: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| self.mode.matches(image, prefix))
    }
}
