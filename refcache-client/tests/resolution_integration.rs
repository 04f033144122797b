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

// Integration tests for batched reference resolution
//
// Exercise the resolver end to end against a mock API server, plus the
// batch fetcher through its public surface.

use mockito::Matcher;
use refcache_client::{
    BatchFetcher, BatcherConfig, ClientConfig, ClientError, ReferenceApi, ReferenceResolver,
};
use refcache_core::{AppReference, QueryState, ScopedRequest, TestsetReference};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn resolver_for(server: &mockito::Server) -> ReferenceResolver {
    let mut config = ClientConfig::default();
    config.api.base_url = server.url();
    ReferenceResolver::from_config(&config).unwrap()
}

type Calls = Arc<parking_lot::Mutex<Vec<Vec<String>>>>;

/// Fetcher echoing `value-<key>` and recording each batch's keys
fn recording_fetcher(calls: Calls) -> BatchFetcher<ScopedRequest<AppReference>, Option<String>> {
    BatchFetcher::from_fn(
        BatcherConfig::default(),
        |request: &ScopedRequest<AppReference>| request.key().into_string(),
        move |_requests: Vec<ScopedRequest<AppReference>>, keys: Vec<String>| {
            let calls = calls.clone();
            async move {
                calls.lock().push(keys.clone());
                Ok(keys
                    .into_iter()
                    .map(|k| (k.clone(), Some(format!("value-{}", k))))
                    .collect::<HashMap<_, _>>())
            }
        },
    )
}

#[tokio::test]
async fn identical_requests_in_one_tick_share_a_call() {
    let calls: Calls = Arc::default();
    let fetcher = recording_fetcher(calls.clone());
    let request = ScopedRequest::new("p1", AppReference::by_id("a1"));

    let results = fetcher
        .load_many(vec![request.clone(), request.clone(), request.clone()])
        .await;

    assert_eq!(calls.lock().len(), 1);
    assert_eq!(calls.lock()[0].len(), 1);
    assert!(results.iter().all(|r| r == &results[0]));
    assert!(results[0].is_some());
}

#[tokio::test]
async fn distinct_requests_fan_out_by_key() {
    let calls: Calls = Arc::default();
    let fetcher = recording_fetcher(calls.clone());
    let requests: Vec<_> = ["a1", "a2", "a3"]
        .iter()
        .map(|id| ScopedRequest::new("p1", AppReference::by_id(*id)))
        .collect();

    let results = fetcher.load_many(requests.clone()).await;

    assert_eq!(calls.lock().len(), 1);
    assert_eq!(calls.lock()[0].len(), 3);
    for (request, result) in requests.iter().zip(&results) {
        assert_eq!(
            result.as_deref(),
            Some(format!("value-{}", request.key()).as_str())
        );
    }
}

#[tokio::test]
async fn failed_batch_delivers_fallback_then_recovers() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let fetcher: BatchFetcher<String, Option<String>> = BatchFetcher::from_fn(
        BatcherConfig::default(),
        |id: &String| id.clone(),
        move |_requests: Vec<String>, keys: Vec<String>| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    return Err(ClientError::Batch("upstream unavailable".to_string()));
                }
                Ok(keys.into_iter().map(|k| (k.clone(), Some(k))).collect())
            }
        },
    )
    .with_resolve_result(|_, request, _| Some(format!("unresolved-{}", request)));

    let (a, b) = tokio::join!(fetcher.load("x".to_string()), fetcher.load("y".to_string()));
    assert_eq!((a, b), (None, None));

    let c = fetcher.load("z".to_string()).await;
    assert_eq!(c.as_deref(), Some("z"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn disabled_reference_makes_no_request() {
    // Unroutable base URL: any request would fail loudly
    let mut config = ClientConfig::default();
    config.api.base_url = "http://127.0.0.1:9".to_string();
    let resolver = ReferenceResolver::from_config(&config).unwrap();

    let state = tokio_test::block_on(
        resolver
            .testsets()
            .fetch(Some("p1"), &TestsetReference::default()),
    );
    assert_eq!(state, QueryState::Disabled);

    let state = tokio_test::block_on(
        resolver
            .applications()
            .fetch(None, &AppReference::by_id("a1")),
    );
    assert!(state.is_disabled());
    assert!(resolver.stats().iter().all(|s| s.batch.total_requests == 0));
}

#[tokio::test]
async fn testsets_in_one_tick_share_one_post() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/preview/testsets/query")
        .match_query(Matcher::UrlEncoded("project_id".into(), "p1".into()))
        .match_body(Matcher::PartialJson(json!({
            "testset_refs": [{"id": "t1"}, {"id": "t2"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "count": 2,
                "testsets": [
                    {"id": "t2", "name": "Regression", "data": {"testcase_ids": ["c1"]}},
                    {"id": "t1", "name": "Golden", "data": {"testcases": [
                        {"id": "c1", "data": {"input": "hi", "expected": "hello"}}
                    ]}}
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let resolver = resolver_for(&server);
    let golden = TestsetReference::by_id("t1");
    let regression = TestsetReference::by_id("t2");
    let (t1, t2) = tokio::join!(
        resolver.testsets().fetch(Some("p1"), &golden),
        resolver.testsets().fetch(Some("p1"), &regression),
    );

    let t1 = t1.into_resolved().unwrap();
    assert_eq!(t1.name.as_deref(), Some("Golden"));
    assert_eq!(t1.columns, vec!["expected", "input"]);

    let t2 = t2.into_resolved().unwrap();
    assert_eq!(t2.name.as_deref(), Some("Regression"));
    assert_eq!(t2.testcase_count, Some(1));

    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_many_sends_one_post_on_multi_thread_runtime() {
    for _ in 0..10 {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/preview/testsets/query")
            .match_query(Matcher::UrlEncoded("project_id".into(), "p1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"testsets": [{"id": "t7", "name": "Seven"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let resolver = resolver_for(&server);
        let refs: Vec<_> = (0..40)
            .map(|i| TestsetReference::by_id(format!("t{}", i)))
            .collect();
        let states = resolver.testsets().fetch_many(Some("p1"), &refs).await;

        assert_eq!(states.len(), 40);
        assert_eq!(states[7].resolved().unwrap().name.as_deref(), Some("Seven"));
        assert!(states[8].is_deleted());
        assert_eq!(resolver.testsets().batch_stats().total_batches, 1);
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn projects_are_queried_separately() {
    let mut server = mockito::Server::new_async().await;
    let p1 = server
        .mock("POST", "/preview/simple/evaluators/query")
        .match_query(Matcher::UrlEncoded("project_id".into(), "p1".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"evaluators": [{"id": "e1", "name": "Exact match"}]}"#)
        .expect(1)
        .create_async()
        .await;
    let p2 = server
        .mock("POST", "/preview/simple/evaluators/query")
        .match_query(Matcher::UrlEncoded("project_id".into(), "p2".into()))
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let resolver = resolver_for(&server);
    let reference = refcache_core::EvaluatorReference::by_id("e1");
    let (ok, failed) = tokio::join!(
        resolver.evaluators().fetch(Some("p1"), &reference),
        resolver.evaluators().fetch(Some("p2"), &reference),
    );

    assert_eq!(ok.resolved().unwrap().name.as_deref(), Some("Exact match"));
    assert!(failed.is_deleted());
    p1.assert_async().await;
    p2.assert_async().await;
}

#[tokio::test]
async fn api_trait_is_object_safe() {
    struct Offline;

    #[async_trait::async_trait]
    impl ReferenceApi for Offline {
        async fn get(
            &self,
            _path: &[&str],
            _project_id: &str,
        ) -> Result<Option<serde_json::Value>, ClientError> {
            Ok(None)
        }

        async fn post(
            &self,
            _path: &[&str],
            _project_id: &str,
            _body: serde_json::Value,
        ) -> Result<serde_json::Value, ClientError> {
            Ok(json!([]))
        }
    }

    let resolver = ReferenceResolver::new(Arc::new(Offline), &ClientConfig::default());
    let state = resolver
        .applications()
        .fetch(Some("p1"), &AppReference::by_id("a1"))
        .await;
    assert!(state.is_deleted());
}
