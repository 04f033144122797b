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

use super::{lookup, pick_i64, pick_string, resolve_id};
use crate::resolved::QueryRef;
use serde_json::Value;

pub fn normalize_query_revision(raw: &Value, fallback_id: Option<&str>) -> Option<QueryRef> {
    let id = resolve_id(raw, &["id", "query_revision_id"], fallback_id)?;
    Some(QueryRef {
        id,
        name: pick_string(raw, &["name", "query_name"]),
        slug: pick_string(raw, &["slug"]),
        version: pick_i64(raw, &["version", "revision"]),
        query_id: pick_string(raw, &["query_id", "query_ref.id"]),
        query_slug: pick_string(raw, &["query_slug", "query_ref.slug"]),
        variant_id: pick_string(
            raw,
            &["query_variant_id", "variant_id", "query_variant_ref.id"],
        ),
        variant_slug: pick_string(
            raw,
            &["query_variant_slug", "variant_slug", "query_variant_ref.slug"],
        ),
        filtering: lookup(raw, "data.filtering")
            .filter(|v| !v.is_null())
            .cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_revision_shape() {
        let raw = json!({
            "id": "qr1",
            "slug": "errors-last-day",
            "version": 3,
            "query_id": "q1",
            "query_variant_id": "qv1",
            "data": {"filtering": {"operator": "and", "conditions": []}}
        });
        let query = normalize_query_revision(&raw, None).unwrap();
        assert_eq!(query.version, Some(3));
        assert_eq!(query.query_id.as_deref(), Some("q1"));
        assert_eq!(query.variant_id.as_deref(), Some("qv1"));
        assert_eq!(query.filtering.unwrap()["operator"], "and");
    }

    #[test]
    fn test_nested_refs_and_null_filtering() {
        let raw = json!({
            "id": "qr2",
            "query_ref": {"id": "q2", "slug": "errors"},
            "query_variant_ref": {"id": "qv2", "slug": "errors.default"},
            "data": {"filtering": null}
        });
        let query = normalize_query_revision(&raw, None).unwrap();
        assert_eq!(query.query_id.as_deref(), Some("q2"));
        assert_eq!(query.variant_id.as_deref(), Some("qv2"));
        assert_eq!(query.query_slug.as_deref(), Some("errors"));
        assert_eq!(query.variant_slug.as_deref(), Some("errors.default"));
        assert_eq!(query.filtering, None);
    }
}
