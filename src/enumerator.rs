//! Target enumeration: turns a raw result listing into ordered, unique targets
//!
//! The listing is whatever the authenticated session handed over (a results page or
//! a JSON document). Identifiers are found in this order:
//! 1. The listing itself is a JSON array, or an object with a `docKeys` array
//! 2. A key list embedded in page script (`_docKeyList = [...]` and variants)
//! 3. Anchors whose `href` carries a `docName=<key>` query parameter
//!
//! The first source that yields identifiers wins. Duplicates are dropped, keeping
//! the first-seen position.

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::error::{EnumerationError, Result};
use crate::types::{FetchTask, TargetId};

/// Script patterns that carry the result key list, tried in order
const KEY_LIST_PATTERNS: &[&str] = &[
    r"(?s)_docKeyList\s*=\s*(\[.+?\]);",
    r"(?s)var\s+_docKeyList\s*=\s*(\[.+?\]);",
    r"(?s)_docKeyList\s*=\s*(\[.*?\])",
    r"(?s)docKeyList\s*=\s*(\[.+?\]);",
    r#"(?s)"docKeys":\s*(\[.+?\])"#,
];

static KEY_LIST_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    KEY_LIST_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

static DOC_NAME_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[?&]docName=([^&#]+)").ok());

/// Extract ordered, unique target identifiers from a raw listing
///
/// # Errors
///
/// - [`EnumerationError::NoTargets`] if a key list was found but is empty
/// - [`EnumerationError::Unrecognized`] if nothing in the listing looks like a result set
pub fn enumerate(raw_listing: &str) -> std::result::Result<Vec<TargetId>, EnumerationError> {
    let trimmed = raw_listing.trim();
    if trimmed.is_empty() {
        return Err(EnumerationError::Unrecognized("listing is empty".to_string()));
    }

    let mut recognized = false;

    if let Some(keys) = keys_from_json_document(trimmed) {
        recognized = true;
        let ids = dedup(keys);
        if !ids.is_empty() {
            info!(count = ids.len(), "enumerated targets from JSON listing");
            return Ok(ids);
        }
    }

    if let Some(keys) = keys_from_embedded_list(trimmed) {
        recognized = true;
        let ids = dedup(keys);
        if !ids.is_empty() {
            info!(count = ids.len(), "enumerated targets from embedded key list");
            return Ok(ids);
        }
    }

    debug!("no key list found, scanning document links");
    let ids = dedup(keys_from_links(trimmed));
    if !ids.is_empty() {
        info!(count = ids.len(), "enumerated targets from document links");
        return Ok(ids);
    }

    if recognized {
        Err(EnumerationError::NoTargets)
    } else {
        Err(EnumerationError::Unrecognized(
            "no key list or document links found".to_string(),
        ))
    }
}

/// Build fetch tasks in enumeration order from a URL template
///
/// `{id}` is replaced by the percent-encoded identifier (every reserved character is
/// encoded) and `{index}` by the 0-based sequence index.
pub fn build_tasks(targets: &[TargetId], url_template: &str) -> Vec<FetchTask> {
    targets
        .iter()
        .enumerate()
        .map(|(index, target_id)| FetchTask {
            target_id: target_id.clone(),
            url: url_template
                .replace("{id}", &urlencoding::encode(target_id.as_str()))
                .replace("{index}", &index.to_string()),
            index,
        })
        .collect()
}

/// Persist the ordered target list so a later run can reuse it
pub async fn save_targets(path: &Path, targets: &[TargetId]) -> Result<()> {
    let json = serde_json::to_vec_pretty(targets)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(?path, count = targets.len(), "saved target manifest");
    Ok(())
}

/// Load a previously saved target list
///
/// Returns an empty list when the manifest is missing or unreadable.
pub async fn load_saved_targets(path: &Path) -> Vec<TargetId> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_slice::<Vec<TargetId>>(&raw) {
        Ok(targets) => {
            info!(?path, count = targets.len(), "loaded saved target manifest");
            targets
        }
        Err(e) => {
            warn!(?path, error = %e, "could not parse saved target manifest");
            Vec::new()
        }
    }
}

/// Keys from a listing that is itself JSON
fn keys_from_json_document(listing: &str) -> Option<Vec<String>> {
    if !(listing.starts_with('[') || listing.starts_with('{')) {
        return None;
    }
    match serde_json::from_str::<Value>(listing).ok()? {
        Value::Array(items) => Some(keys_from_array(&items)),
        Value::Object(map) => match map.get("docKeys") {
            Some(Value::Array(items)) => Some(keys_from_array(items)),
            _ => None,
        },
        _ => None,
    }
}

/// Keys from the first embedded script list that parses as JSON
fn keys_from_embedded_list(listing: &str) -> Option<Vec<String>> {
    for regex in KEY_LIST_REGEXES.iter() {
        let Some(captures) = regex.captures(listing) else {
            continue;
        };
        let Some(array) = captures.get(1) else {
            continue;
        };
        let cleaned = array.as_str().replace("\\\"", "\"").replace("\\n", "");
        match serde_json::from_str::<Vec<Value>>(&cleaned) {
            Ok(items) => {
                debug!(pattern = regex.as_str(), "matched embedded key list");
                return Some(keys_from_array(&items));
            }
            Err(e) => {
                debug!(pattern = regex.as_str(), error = %e, "key list did not parse");
            }
        }
    }
    None
}

/// Keys from anchors linking to individual documents
fn keys_from_links(listing: &str) -> Vec<String> {
    let Some(param) = DOC_NAME_PARAM.as_ref() else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let document = Html::parse_document(listing);
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| param.captures(href)?.get(1).map(|m| m.as_str().to_string()))
        .map(|encoded| match urlencoding::decode(&encoded) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => encoded,
        })
        .collect()
}

fn keys_from_array(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn dedup(keys: Vec<String>) -> Vec<TargetId> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.into_iter()
        .filter(|k| seen.insert(k.clone()))
        .map(TargetId::from)
        .collect()
}
