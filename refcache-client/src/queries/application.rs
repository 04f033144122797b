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

//! Application lookups
//!
//! The apps endpoint has no batch query. A single id is fetched directly;
//! anything else lists the project's apps once and matches locally.

use super::{find_entity, ProjectLoader, ReferenceQuery};
use crate::api::{paths, ReferenceApi};
use crate::ClientError;
use async_trait::async_trait;
use refcache_core::normalize::{normalize_application, unwrap_list};
use refcache_core::{AppReference, ApplicationRef, Reference};
use std::collections::HashMap;
use std::sync::Arc;

pub type ApplicationQuery = ReferenceQuery<AppReference, ApplicationRef>;

pub struct ApplicationLoader {
    api: Arc<dyn ReferenceApi>,
}

impl ApplicationLoader {
    pub fn new(api: Arc<dyn ReferenceApi>) -> Self {
        Self { api }
    }

    async fn load_one(
        &self,
        project_id: &str,
        id: &str,
    ) -> Result<Option<ApplicationRef>, ClientError> {
        let raw = self.api.get(&paths::app(id), project_id).await?;
        Ok(raw.and_then(|raw| normalize_application(&raw, Some(id))))
    }

    async fn list(&self, project_id: &str) -> Result<Vec<ApplicationRef>, ClientError> {
        let Some(raw) = self.api.get(paths::APPS, project_id).await? else {
            return Ok(Vec::new());
        };
        Ok(unwrap_list(&raw, &["apps", "applications"])
            .into_iter()
            .filter_map(|item| normalize_application(item, None))
            .collect())
    }
}

#[async_trait]
impl ProjectLoader<AppReference, ApplicationRef> for ApplicationLoader {
    async fn load_project(
        &self,
        project_id: &str,
        refs: Vec<(String, AppReference)>,
    ) -> Result<HashMap<String, Option<ApplicationRef>>, ClientError> {
        if let [(key, reference)] = refs.as_slice() {
            if let Some(id) = reference.primary_id() {
                let app = self.load_one(project_id, id).await?;
                return Ok(HashMap::from([(key.clone(), app)]));
            }
        }

        let apps = self.list(project_id).await?;
        Ok(refs
            .into_iter()
            .map(|(key, reference)| {
                let found = find_entity(
                    &apps,
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

    fn query_for(server: &mockito::Server) -> ApplicationQuery {
        let api: Arc<dyn ReferenceApi> = Arc::new(HttpApiClient::new(&server.url()).unwrap());
        ReferenceQuery::new(
            ApplicationLoader::new(api),
            BatcherConfig::default(),
            CachePolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_single_id_uses_detail_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/apps/a1")
            .match_query(Matcher::UrlEncoded("project_id".into(), "p1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"app_id": "a1", "app_name": "Support Bot"}"#)
            .create_async()
            .await;

        let q = query_for(&server);
        let state = q.fetch(Some("p1"), &AppReference::by_id("a1")).await;

        let app = state.resolved().unwrap();
        assert_eq!(app.id, "a1");
        assert_eq!(app.name.as_deref(), Some("Support Bot"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_app_is_deleted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/apps/gone")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let q = query_for(&server);
        let state = q.fetch(Some("p1"), &AppReference::by_id("gone")).await;
        assert!(state.is_deleted());
    }

    #[tokio::test]
    async fn test_several_refs_list_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/apps")
            .match_query(Matcher::UrlEncoded("project_id".into(), "p1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"app_id": "a1", "app_name": "Support Bot", "app_slug": "support"},
                    {"app_id": "a2", "app_name": "Summarizer"}
                ]"#,
            )
            .expect(1)
            .create_async()
            .await;

        let q = query_for(&server);
        let states = q
            .fetch_many(
                Some("p1"),
                &[
                    AppReference::by_slug("support"),
                    AppReference::by_id("a2"),
                    AppReference::by_id("a3"),
                ],
            )
            .await;

        assert_eq!(states[0].resolved().unwrap().id, "a1");
        assert_eq!(states[1].resolved().unwrap().name.as_deref(), Some("Summarizer"));
        assert!(states[2].is_deleted());
        mock.assert_async().await;
    }
}
