//! Turning a submitted post URL into a [`WorkItem`].

use url::Url;

use crate::error::AppError;
use crate::models::{Period, WorkItem};

const STATUS_HOSTS: &[&str] = &["x.com", "twitter.com"];

/// Identity parsed from a status URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRef {
    pub handle: String,
    pub status_id: String,
}

/// Parses `https://x.com/<handle>/status/<id>` (and the `twitter.com`,
/// `www.` and `mobile.` variants).
pub fn parse_status_url(raw: &str) -> Result<StatusRef, AppError> {
    let url = Url::parse(raw.trim()).map_err(|e| AppError::InvalidUrl(format!("{raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::InvalidUrl(format!(
            "{raw}: scheme '{}' is not allowed",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| AppError::InvalidUrl(format!("{raw}: missing host")))?;
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("mobile."))
        .unwrap_or(host);
    if !STATUS_HOSTS.contains(&host) {
        return Err(AppError::InvalidUrl(format!(
            "{raw}: not an X/Twitter post URL"
        )));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [handle, "status", id, ..] if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => {
            Ok(StatusRef {
                handle: handle.to_string(),
                status_id: id.to_string(),
            })
        }
        _ => Err(AppError::InvalidUrl(format!(
            "{raw}: expected /<handle>/status/<id>"
        ))),
    }
}

impl WorkItem {
    /// Builds a work item for a submitted status URL.
    pub fn from_url(owner: &str, url: &str, period: Period) -> Result<Self, AppError> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(AppError::Generic("Owner must not be empty".into()));
        }
        let status = parse_status_url(url)?;
        Ok(Self {
            external_id: status.status_id,
            url: url.trim().to_string(),
            owner: owner.to_string(),
            period,
        })
    }
}
