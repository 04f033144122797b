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

//! Testset normalization
//!
//! The column set is not stored on the testset; it is derived from the keys
//! of the first few testcases.

use super::{lookup, pick_i64, pick_string, resolve_id};
use crate::resolved::TestsetRef;
use serde_json::Value;
use std::collections::BTreeSet;

/// Testcases inspected when deriving columns
pub const DEFAULT_PREVIEW_TESTCASES: usize = 5;

/// Record keys that describe the testcase rather than its data
const TESTCASE_META_KEYS: &[&str] = &[
    "id",
    "testcase_id",
    "testset_id",
    "created_at",
    "updated_at",
    "created_by_id",
    "flags",
    "tags",
    "meta",
];

pub fn normalize_testset(raw: &Value, fallback_id: Option<&str>) -> Option<TestsetRef> {
    normalize_testset_with(raw, fallback_id, DEFAULT_PREVIEW_TESTCASES)
}

pub fn normalize_testset_with(
    raw: &Value,
    fallback_id: Option<&str>,
    preview_testcases: usize,
) -> Option<TestsetRef> {
    let id = resolve_id(raw, &["id", "testset_id"], fallback_id)?;
    let testcases = lookup(raw, "data.testcases")
        .and_then(Value::as_array)
        .map(Vec::as_slice);

    Some(TestsetRef {
        id,
        name: pick_string(raw, &["name", "testset_name"]),
        slug: pick_string(raw, &["slug", "testset_slug"]),
        testcase_count: testcase_count(raw, testcases),
        columns: testcases
            .map(|cases| preview_columns(cases, preview_testcases))
            .unwrap_or_default(),
    })
}

fn testcase_count(raw: &Value, testcases: Option<&[Value]>) -> Option<usize> {
    if let Some(cases) = testcases {
        return Some(cases.len());
    }
    if let Some(ids) = lookup(raw, "data.testcase_ids").and_then(Value::as_array) {
        return Some(ids.len());
    }
    pick_i64(raw, &["count", "testcase_count", "data.count"])
        .and_then(|n| usize::try_from(n).ok())
}

fn preview_columns(testcases: &[Value], limit: usize) -> Vec<String> {
    let mut columns = BTreeSet::new();
    for case in testcases.iter().take(limit) {
        match case.get("data").and_then(Value::as_object) {
            Some(data) => columns.extend(data.keys().cloned()),
            None => {
                if let Some(record) = case.as_object() {
                    columns.extend(
                        record
                            .keys()
                            .filter(|k| !TESTCASE_META_KEYS.contains(&k.as_str()))
                            .cloned(),
                    );
                }
            }
        }
    }
    columns.into_iter().collect()
}
