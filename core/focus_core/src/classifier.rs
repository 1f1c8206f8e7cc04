//! Hostname matching shared by the navigation guard and time classification.
//!
//! A pattern matches when the normalized hostname *contains* the normalized
//! pattern. This is a plain substring test: `reddit.com` matches
//! `old.reddit.com` and also `reddit.company.example`.

use crate::error::{CoreError, CoreResult};

fn strip_www(s: &str) -> &str {
    s.strip_prefix("www.").unwrap_or(s)
}

/// Normalizes a stored block-list pattern: trims, lower-cases, then strips a
/// leading `http://`/`https://`, a leading `www.` and one trailing `/`.
pub fn normalize_pattern(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let rest = strip_www(rest);
    rest.strip_suffix('/').unwrap_or(rest).to_string()
}

/// Normalizes a candidate hostname (no scheme, it comes from a parsed URL).
pub fn normalize_hostname(hostname: &str) -> String {
    strip_www(&hostname.trim().to_ascii_lowercase()).to_string()
}

pub fn is_blocked<I, S>(hostname: &str, block_list: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let host = normalize_hostname(hostname);
    block_list.into_iter().any(|site| {
        let pattern = normalize_pattern(site.as_ref());
        // An empty pattern would contain-match every host.
        !pattern.is_empty() && host.contains(&pattern)
    })
}

/// Extracts the host component of `raw`.
pub fn hostname_of(raw: &str) -> CoreResult<String> {
    let malformed = || CoreError::MalformedUrl {
        url: raw.to_string(),
    };
    let parsed = url::Url::parse(raw).map_err(|_| malformed())?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(malformed()),
    }
}
