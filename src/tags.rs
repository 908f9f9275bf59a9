use std::collections::BTreeMap;
use std::str::FromStr;

/// Errors from parsing the registry tag language.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("invalid tag key '{0}'")]
    InvalidKey(String),
    #[error("invalid tag '{0}': expected key:value")]
    InvalidFilter(String),
}

/// A bare tag key, the form used for tag deletion targets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TagKey(String);

impl TagKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TagKey {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.contains(':') {
            return Err(TagError::InvalidKey(s.to_string()));
        }

        Ok(TagKey(s.to_string()))
    }
}

/// A `key:value` binding, the form used for tag filtering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    /// Whether a tag set satisfies this filter.
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.get(&self.key).is_some_and(|v| v == &self.value)
    }
}

impl FromStr for TagFilter {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((k, v)) if !k.is_empty() && !v.is_empty() => Ok(TagFilter {
                key: k.to_string(),
                value: v.to_string(),
            }),
            _ => Err(TagError::InvalidFilter(s.to_string())),
        }
    }
}

/// Parses a list of `key:value` filter strings.
pub fn parse_tag_filters<S: AsRef<str>>(filters: &[S]) -> Result<Vec<TagFilter>, TagError> {
    filters.iter().map(|s| s.as_ref().parse()).collect()
}

/// Whether a tag set satisfies every filter.
pub fn matches_all(filters: &[TagFilter], tags: &BTreeMap<String, String>) -> bool {
    filters.iter().all(|f| f.matches(tags))
}
