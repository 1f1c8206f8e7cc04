use serde::Serialize;

use crate::classifier::normalize_pattern;
use crate::error::{CoreError, CoreResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "site", rename_all = "snake_case")]
pub enum AddOutcome {
    Added(String),
    AlreadyPresent(String),
}

/// Appends the normalized form of `raw`, keeping the list free of duplicates.
pub fn add_site(list: &mut Vec<String>, raw: &str) -> CoreResult<AddOutcome> {
    let site = normalize_pattern(raw);
    if site.is_empty() {
        return Err(CoreError::InvalidSite);
    }
    if list.iter().any(|s| *s == site) {
        return Ok(AddOutcome::AlreadyPresent(site));
    }
    list.push(site.clone());
    Ok(AddOutcome::Added(site))
}

/// Exact-match removal. Returns whether anything was removed.
pub fn remove_site(list: &mut Vec<String>, site: &str) -> bool {
    let before = list.len();
    list.retain(|s| s != site);
    list.len() != before
}
