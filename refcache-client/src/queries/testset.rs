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
use refcache_core::normalize::{normalize_testset_with, unwrap_list, DEFAULT_PREVIEW_TESTCASES};
use refcache_core::{Reference, TestsetRef, TestsetReference};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub type TestsetQuery = ReferenceQuery<TestsetReference, TestsetRef>;

pub struct TestsetLoader {
    api: Arc<dyn ReferenceApi>,
    preview_testcases: usize,
}

impl TestsetLoader {
    pub fn new(api: Arc<dyn ReferenceApi>) -> Self {
        Self {
            api,
            preview_testcases: DEFAULT_PREVIEW_TESTCASES,
        }
    }

    /// Testcases inspected per testset when collecting columns
    pub fn with_preview_testcases(mut self, preview_testcases: usize) -> Self {
        self.preview_testcases = preview_testcases;
        self
    }
}

#[async_trait]
impl ProjectLoader<TestsetReference, TestsetRef> for TestsetLoader {
    async fn load_project(
        &self,
        project_id: &str,
        refs: Vec<(String, TestsetReference)>,
    ) -> Result<HashMap<String, Option<TestsetRef>>, ClientError> {
        let testset_refs: Vec<Value> = refs
            .iter()
            .map(|(_, r)| Value::Object(ref_object(r.primary_id(), r.primary_slug())))
            .collect();
        let body = json!({
            "testset_refs": testset_refs,
            "include_archived": true,
            "windowing": {"limit": refs.len()},
        });
        let raw = self.api.post(paths::TESTSETS_QUERY, project_id, body).await?;

        let testsets: Vec<TestsetRef> = unwrap_list(&raw, &["testsets"])
            .into_iter()
            .filter_map(|item| normalize_testset_with(item, None, self.preview_testcases))
            .collect();

        Ok(refs
            .into_iter()
            .map(|(key, reference)| {
                let found = find_entity(
                    &testsets,
                    reference.primary_id(),
                    reference.primary_slug(),
                    |_| None,
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

    #[tokio::test]
    async fn test_columns_limited_to_preview() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/preview/testsets/query")
            .match_query(Matcher::UrlEncoded("project_id".into(), "p1".into()))
            .match_body(Matcher::PartialJson(json!({
                "testset_refs": [{"slug": "golden"}],
                "include_archived": true,
                "windowing": {"limit": 1}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"count": 1, "testsets": [{
                    "id": "t1",
                    "slug": "golden",
                    "name": "Golden set",
                    "data": {"testcases": [
                        {"id": "tc1", "data": {"question": "q", "answer": "a"}},
                        {"id": "tc2", "data": {"context": "c"}}
                    ]}
                }]}"#,
            )
            .create_async()
            .await;

        let api: Arc<dyn ReferenceApi> = Arc::new(HttpApiClient::new(&server.url()).unwrap());
        let q = TestsetQuery::new(
            TestsetLoader::new(api).with_preview_testcases(1),
            BatcherConfig::default(),
            CachePolicy::default(),
        );

        let state = q.fetch(Some("p1"), &TestsetReference::by_slug("golden")).await;
        let testset = state.resolved().unwrap();
        assert_eq!(testset.id, "t1");
        assert_eq!(testset.testcase_count, Some(2));
        assert_eq!(testset.columns, vec!["answer", "question"]);
    }
}
