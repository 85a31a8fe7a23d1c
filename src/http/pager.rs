//! Page extraction and next-page resolution for list endpoints.
//!
//! Two page shapes are understood:
//!
//! - `{"results": [...], "next": <url|null>}` with an absolute or relative
//!   `next` link
//! - `{"items": [...], "page": p, "pages": n, "size": s}` where the next page
//!   is requested with `page=p+1&size=s` while `p < n`

use anyhow::{Context, Result};
use reqwest::Url;
use serde_json::Value;

/// The records carried by one page.
///
/// A body that is itself an array is treated as a single page of records.
pub fn page_items(body: &Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items.clone(),
        Value::Object(map) => ["results", "items"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// URL of the page following the one fetched from `current`, if any.
pub fn next_page(current: &Url, body: &Value) -> Result<Option<Url>> {
    let Some(map) = body.as_object() else {
        return Ok(None);
    };

    if map.contains_key("results") {
        return match map.get("next").and_then(Value::as_str) {
            Some(next) if !next.is_empty() => current
                .join(next)
                .map(Some)
                .with_context(|| format!("Invalid next page link: {}", next)),
            _ => Ok(None),
        };
    }

    let page = map.get("page").and_then(Value::as_u64);
    let pages = map.get("pages").and_then(Value::as_u64);
    let size = map.get("size").and_then(Value::as_u64);
    match (page, pages, size) {
        (Some(page), Some(pages), Some(size)) if page < pages => {
            let kept: Vec<(String, String)> = current
                .query_pairs()
                .filter(|(k, _)| k != "page" && k != "size")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let mut next = current.clone();
            next.query_pairs_mut()
                .clear()
                .extend_pairs(&kept)
                .append_pair("page", &(page + 1).to_string())
                .append_pair("size", &size.to_string());
            Ok(Some(next))
        }
        _ => Ok(None),
    }
}
