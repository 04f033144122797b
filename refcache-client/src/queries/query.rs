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

//! Query revision lookups
//!
//! A reference may name a revision, a query variant or a whole query. All
//! three levels go out in one request; references above revision level
//! resolve to the latest matching revision.

use super::{best_match, ref_object, ProjectLoader, ReferenceQuery};
use crate::api::{paths, ReferenceApi};
use crate::ClientError;
use async_trait::async_trait;
use refcache_core::normalize::{normalize_query_revision, unwrap_list};
use refcache_core::{QueryRef, QueryReference, QueryTarget};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub type QueryRevisionQuery = ReferenceQuery<QueryReference, QueryRef>;

pub struct QueryLoader {
    api: Arc<dyn ReferenceApi>,
}

impl QueryLoader {
    pub fn new(api: Arc<dyn ReferenceApi>) -> Self {
        Self { api }
    }
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn revision_ref_json(reference: &QueryReference) -> Value {
    let mut object = ref_object(trimmed(&reference.revision_id), trimmed(&reference.revision_slug));
    if let Some(version) = trimmed(&reference.revision_version) {
        let version = version
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(version));
        object.insert("version".to_string(), version);
    }
    Value::Object(object)
}

/// Request body with only the non-empty ref lists
fn query_body(refs: &[(String, QueryReference)]) -> Value {
    let mut revision_refs = Vec::new();
    let mut variant_refs = Vec::new();
    let mut query_refs = Vec::new();

    for (_, reference) in refs {
        match reference.target() {
            Some(QueryTarget::Revision) => revision_refs.push(revision_ref_json(reference)),
            Some(QueryTarget::Variant) => variant_refs.push(Value::Object(ref_object(
                trimmed(&reference.variant_id),
                trimmed(&reference.variant_slug),
            ))),
            Some(QueryTarget::Query) => query_refs.push(Value::Object(ref_object(
                trimmed(&reference.id),
                trimmed(&reference.slug),
            ))),
            None => {}
        }
    }

    let only_revisions = variant_refs.is_empty() && query_refs.is_empty();
    let mut body = Map::new();
    if !revision_refs.is_empty() {
        body.insert("query_revision_refs".to_string(), Value::Array(revision_refs));
    }
    if !variant_refs.is_empty() {
        body.insert("query_variant_refs".to_string(), Value::Array(variant_refs));
    }
    if !query_refs.is_empty() {
        body.insert("query_refs".to_string(), Value::Array(query_refs));
    }

    // Query and variant refs return every revision, so only cap pure revision lookups
    let windowing = if only_revisions {
        json!({"order": "descending", "limit": refs.len()})
    } else {
        json!({"order": "descending"})
    };
    body.insert("windowing".to_string(), windowing);

    Value::Object(body)
}

fn eq_opt(field: &Option<String>, wanted: &str) -> bool {
    field.as_deref() == Some(wanted)
}

/// Revision a reference points at among the returned revisions
fn match_revision<'a>(revisions: &'a [QueryRef], reference: &QueryReference) -> Option<&'a QueryRef> {
    let latest = |r: &QueryRef| r.version;

    match reference.target()? {
        QueryTarget::Revision => {
            let version = trimmed(&reference.revision_version).and_then(|v| v.parse::<i64>().ok());
            let version_ok = |r: &QueryRef| version.is_none() || r.version == version;
            trimmed(&reference.revision_id)
                .and_then(|id| best_match(revisions, |r| r.id == id && version_ok(r), |_| None))
                .or_else(|| {
                    trimmed(&reference.revision_slug).and_then(|slug| {
                        best_match(revisions, |r| eq_opt(&r.slug, slug) && version_ok(r), latest)
                    })
                })
        }
        QueryTarget::Variant => trimmed(&reference.variant_id)
            .and_then(|id| best_match(revisions, |r| eq_opt(&r.variant_id, id), latest))
            .or_else(|| {
                trimmed(&reference.variant_slug)
                    .and_then(|slug| best_match(revisions, |r| eq_opt(&r.variant_slug, slug), latest))
            }),
        QueryTarget::Query => trimmed(&reference.id)
            .and_then(|id| best_match(revisions, |r| eq_opt(&r.query_id, id), latest))
            .or_else(|| {
                trimmed(&reference.slug)
                    .and_then(|slug| best_match(revisions, |r| eq_opt(&r.query_slug, slug), latest))
            }),
    }
}

#[async_trait]
impl ProjectLoader<QueryReference, QueryRef> for QueryLoader {
    async fn load_project(
        &self,
        project_id: &str,
        refs: Vec<(String, QueryReference)>,
    ) -> Result<HashMap<String, Option<QueryRef>>, ClientError> {
        let body = query_body(&refs);
        let raw = self
            .api
            .post(paths::QUERY_REVISIONS_QUERY, project_id, body)
            .await?;

        let revisions: Vec<QueryRef> = unwrap_list(&raw, &["query_revisions", "revisions"])
            .into_iter()
            .filter_map(|item| normalize_query_revision(item, None))
            .collect();

        Ok(refs
            .into_iter()
            .map(|(key, reference)| {
                let found = match_revision(&revisions, &reference).cloned();
                (key, found)
            })
            .collect())
    }
}
