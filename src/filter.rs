//! Call filtering for -e expressions
//!
//! Supports:
//! - Exclude list: -e exclude=vendor/,lib/ruby (substring match on source path)
//! - Only list: -e only=Outer,Inner (exact match on resolved entity name)
//!
//! The two are mutually exclusive per session. Suppressed calls are still
//! tracked on the shadow stack; they only produce no records.

use anyhow::{bail, Result};
use std::collections::HashSet;

use crate::event::TraceEvent;

/// Policy deciding which calls are suppressed from output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Nothing is suppressed
    #[default]
    None,
    /// Suppress events whose source path contains any of these substrings
    Exclude(Vec<String>),
    /// Suppress events whose entity is not in this set
    Only(HashSet<String>),
}

impl FilterPolicy {
    /// Create a policy that suppresses nothing
    pub fn all() -> Self {
        FilterPolicy::None
    }

    /// Blacklist of path substrings; empty patterns are ignored
    pub fn exclude<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_empty())
            .collect();
        if patterns.is_empty() {
            FilterPolicy::None
        } else {
            FilterPolicy::Exclude(patterns)
        }
    }

    /// Whitelist of entity names
    pub fn only<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterPolicy::Only(entities.into_iter().map(Into::into).collect())
    }

    /// Parse a filter expression like "exclude=vendor/,gems/" or "only=Outer,Inner"
    pub fn from_expr(expr: &str) -> Result<Self> {
        if let Some(list) = expr.strip_prefix("exclude=") {
            Ok(Self::exclude(split_list(list)))
        } else if let Some(list) = expr.strip_prefix("only=") {
            Ok(Self::only(split_list(list)))
        } else {
            bail!(
                "Invalid filter expression: {}. Expected format: exclude=PATHS or only=ENTITIES",
                expr
            );
        }
    }

    /// Check if an event should be suppressed from output
    pub fn suppresses(&self, event: &TraceEvent) -> bool {
        match self {
            FilterPolicy::None => false,
            FilterPolicy::Exclude(patterns) => patterns
                .iter()
                .any(|pattern| event.filepath.contains(pattern.as_str())),
            FilterPolicy::Only(entities) => !entities.contains(&*event.entity),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, FilterPolicy::None)
    }
}

fn split_list(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
}
