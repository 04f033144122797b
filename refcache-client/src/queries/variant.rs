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

use super::{find_entity, ref_object, ProjectLoader, ReferenceQuery};
use crate::api::{paths, ReferenceApi};
use crate::ClientError;
use async_trait::async_trait;
use refcache_core::normalize::{normalize_variant, unwrap_list};
use refcache_core::{Reference, VariantRef, VariantReference, VersionSelector};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub type VariantQuery = ReferenceQuery<VariantReference, VariantRef>;

pub struct VariantLoader {
    api: Arc<dyn ReferenceApi>,
}

impl VariantLoader {
    pub fn new(api: Arc<dyn ReferenceApi>) -> Self {
        Self { api }
    }
}

/// `{id?, slug?, version?}`; a latest selector is sent as `null`
fn variant_ref_json(reference: &VariantReference) -> Value {
    let mut object = ref_object(reference.primary_id(), reference.primary_slug());
    match reference.version {
        Some(VersionSelector::Latest) => {
            object.insert("version".to_string(), Value::Null);
        }
        Some(VersionSelector::Exact(v)) => {
            object.insert("version".to_string(), Value::from(v));
        }
        None => {}
    }
    Value::Object(object)
}

fn matches_version(variant: &VariantRef, selector: Option<VersionSelector>) -> bool {
    match selector {
        Some(VersionSelector::Exact(v)) => variant.version == Some(v),
        _ => true,
    }
}

#[async_trait]
impl ProjectLoader<VariantReference, VariantRef> for VariantLoader {
    async fn load_project(
        &self,
        project_id: &str,
        refs: Vec<(String, VariantReference)>,
    ) -> Result<HashMap<String, Option<VariantRef>>, ClientError> {
        let body = json!({
            "variant_refs": refs.iter().map(|(_, r)| variant_ref_json(r)).collect::<Vec<_>>(),
        });
        let raw = self
            .api
            .post(paths::VARIANT_CONFIGS_QUERY, project_id, body)
            .await?;

        let variants: Vec<VariantRef> = unwrap_list(&raw, &["variants", "configs"])
            .into_iter()
            .filter_map(|item| normalize_variant(item, None))
            .collect();

        Ok(refs
            .into_iter()
            .map(|(key, reference)| {
                let candidates: Vec<VariantRef> = variants
                    .iter()
                    .filter(|v| matches_version(v, reference.version))
                    .cloned()
                    .collect();
                let found = find_entity(
                    &candidates,
                    reference.primary_id(),
                    reference.primary_slug(),
                    |v| v.version,
                );
                (key, found.cloned())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::BatcherConfig;
    use crate::HttpApiClient;
    use mockito::Matcher;
    use refcache_core::CachePolicy;

    #[test]
    fn test_variant_ref_json() {
        let latest = VariantReference::by_slug("chat.default").with_version(VersionSelector::Latest);
        assert_eq!(
            variant_ref_json(&latest),
            json!({"slug": "chat.default", "version": null})
        );

        let exact = VariantReference::by_id("v1").with_version(VersionSelector::Exact(3));
        assert_eq!(variant_ref_json(&exact), json!({"id": "v1", "version": 3}));

        assert_eq!(variant_ref_json(&VariantReference::by_id("v1")), json!({"id": "v1"}));
    }

    #[tokio::test]
    async fn test_versions_matched_per_reference() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/variants/configs/query")
            .match_query(Matcher::UrlEncoded("project_id".into(), "p1".into()))
            .match_body(Matcher::PartialJson(json!({
                "variant_refs": [
                    {"slug": "chat.default", "version": null},
                    {"slug": "chat.default", "version": 1}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"variant_ref": {"id": "r1", "slug": "chat.default", "version": 1}},
                    {"variant_ref": {"id": "r2", "slug": "chat.default", "version": "2"}}
                ]"#,
            )
            .expect(1)
            .create_async()
            .await;

        let api: Arc<dyn ReferenceApi> = Arc::new(HttpApiClient::new(&server.url()).unwrap());
        let q = VariantQuery::new(
            VariantLoader::new(api),
            BatcherConfig::default(),
            CachePolicy::default(),
        );

        let latest = VariantReference::by_slug("chat.default").with_version(VersionSelector::Latest);
        let first = VariantReference::by_slug("chat.default").with_version(VersionSelector::Exact(1));
        let (latest, first) = tokio::join!(q.fetch(Some("p1"), &latest), q.fetch(Some("p1"), &first));

        assert_eq!(latest.resolved().unwrap().id, "r2");
        assert_eq!(latest.resolved().unwrap().version, Some(2));
        assert_eq!(first.resolved().unwrap().id, "r1");
        mock.assert_async().await;
    }
}
