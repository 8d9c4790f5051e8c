//! Gmail OAuth2 scopes and scope-set arithmetic

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{AuthError, Result};

/// Read all resources and their metadata, no write operations
pub const GMAIL_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
/// Send messages only
pub const GMAIL_SEND: &str = "https://www.googleapis.com/auth/gmail.send";
/// Read/write access (no permanent deletion)
pub const GMAIL_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";
/// Label management
pub const GMAIL_LABELS: &str = "https://www.googleapis.com/auth/gmail.labels";
/// Filter and basic settings management
pub const GMAIL_SETTINGS_BASIC: &str = "https://www.googleapis.com/auth/gmail.settings.basic";
/// Headers only, no body content
pub const GMAIL_METADATA: &str = "https://www.googleapis.com/auth/gmail.metadata";
/// Create, read, update and delete drafts
pub const GMAIL_COMPOSE: &str = "https://www.googleapis.com/auth/gmail.compose";

/// Short names accepted on the command line and in the config file
const ALIASES: &[(&str, &str)] = &[
    ("read", GMAIL_READONLY),
    ("readonly", GMAIL_READONLY),
    ("send", GMAIL_SEND),
    ("modify", GMAIL_MODIFY),
    ("labels", GMAIL_LABELS),
    ("settings", GMAIL_SETTINGS_BASIC),
    ("metadata", GMAIL_METADATA),
    ("compose", GMAIL_COMPOSE),
];

/// Scopes requested by `gmail init` when none are given
pub const DEFAULT_SCOPE_ALIASES: &[&str] = &["read", "send", "modify", "settings"];

/// Resolve a short alias or full scope URL into the full scope string
pub fn resolve(scope: &str) -> Result<String> {
    let scope = scope.trim();
    if scope.starts_with("https://") {
        return Ok(scope.to_string());
    }

    let lower = scope.to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, full)| full.to_string())
        .ok_or_else(|| {
            let known: Vec<&str> = ALIASES.iter().map(|(alias, _)| *alias).collect();
            AuthError::Config(format!(
                "Unknown scope '{}'. Use a full scope URL or one of: {}",
                scope,
                known.join(", ")
            ))
        })
}

/// Short alias for a full scope URL, if there is one
pub fn alias_of(scope: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(alias, full)| *full == scope && *alias != "readonly")
        .map(|(alias, _)| *alias)
}

/// An ordered set of granted or required scopes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from aliases or full URLs, rejecting unknown aliases
    pub fn parse<I, S>(scopes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        scopes
            .into_iter()
            .map(|s| resolve(s.as_ref()))
            .collect::<Result<BTreeSet<_>>>()
            .map(ScopeSet)
    }

    /// Parse the space-separated `scope` field of a token response
    pub fn from_space_delimited(scopes: &str) -> Self {
        ScopeSet(scopes.split_whitespace().map(str::to_string).collect())
    }

    pub fn default_scopes() -> Self {
        Self::parse(DEFAULT_SCOPE_ALIASES.iter().copied()).unwrap_or_default()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// True if every scope in `required` is granted by this set
    pub fn covers(&self, required: &ScopeSet) -> bool {
        required.0.is_subset(&self.0)
    }

    /// Scopes in `required` that this set does not grant
    pub fn missing(&self, required: &ScopeSet) -> Vec<String> {
        required.0.difference(&self.0).cloned().collect()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|s| alias_of(s).unwrap_or(s)).collect();
        write!(f, "{}", names.join(", "))
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        ScopeSet(iter.into_iter().map(Into::into).collect())
    }
}
