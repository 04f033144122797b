// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Payload normalizers
//!
//! Server payloads have used several naming conventions over time
//! (`app_name` vs `name`, `variant_name` vs `name`, nested testcases vs a
//! top-level count). Each normalizer maps the raw JSON into one stable
//! display shape. Normalizers never fail: a missing or mistyped field becomes
//! `None` (or an empty list), and only a payload with no usable id at all
//! yields `None`.

pub mod application;
pub mod evaluator;
pub mod query;
pub mod testset;
pub mod variant;

pub use application::normalize_application;
pub use evaluator::normalize_evaluator;
pub use query::normalize_query_revision;
pub use testset::{normalize_testset, normalize_testset_with, DEFAULT_PREVIEW_TESTCASES};
pub use variant::normalize_variant;

use serde_json::Value;
use tracing::debug;

/// Value at a dotted path (`"data.schemas.outputs"`)
pub fn lookup<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(raw, |value, segment| value.get(segment))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().trim_start_matches('v').parse().ok(),
        _ => None,
    }
}

/// First non-empty string over the candidate paths. Numbers are accepted
/// and rendered as text.
pub fn pick_string(raw: &Value, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|path| lookup(raw, path).and_then(as_text))
}

/// First integer over the candidate paths. Numeric strings count.
pub fn pick_i64(raw: &Value, candidates: &[&str]) -> Option<i64> {
    candidates
        .iter()
        .find_map(|path| lookup(raw, path).and_then(as_i64))
}

/// Entity id from the payload, else the caller's fallback
pub(crate) fn resolve_id(
    raw: &Value,
    candidates: &[&str],
    fallback_id: Option<&str>,
) -> Option<String> {
    pick_string(raw, candidates).or_else(|| {
        fallback_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Items of a list response.
///
/// Accepts a bare array, or an object holding the array under the first
/// matching envelope key. Any other shape yields no items.
pub fn unwrap_list<'a>(raw: &'a Value, envelopes: &[&str]) -> Vec<&'a Value> {
    if let Value::Array(items) = raw {
        return items.iter().collect();
    }
    match envelopes
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_array))
    {
        Some(items) => items.iter().collect(),
        None => {
            debug!(?envelopes, "list payload has no recognised envelope");
            Vec::new()
        }
    }
}
