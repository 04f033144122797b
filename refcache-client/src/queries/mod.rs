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

//! Reference queries
//!
//! A [`ReferenceQuery`] is what a presentation cell calls: it checks the
//! cache, falls through to the shared batch fetcher on a miss and reports a
//! [`QueryState`]. Each entity kind plugs in a [`ProjectLoader`] that knows
//! its endpoint; [`PerProject`] splits a batch by project and runs the
//! per-project calls concurrently.

pub mod application;
pub mod evaluator;
pub mod query;
pub mod testset;
pub mod variant;

pub use application::{ApplicationLoader, ApplicationQuery};
pub use evaluator::{EvaluatorLoader, EvaluatorQuery};
pub use query::{QueryLoader, QueryRevisionQuery};
pub use testset::{TestsetLoader, TestsetQuery};
pub use variant::{VariantLoader, VariantQuery};

use crate::batcher::{BatchFetcher, BatchLoader, BatcherConfig, BatcherStats};
use crate::cache::{CacheStats, ReferenceCache};
use crate::ClientError;
use async_trait::async_trait;
use refcache_core::{CacheKey, CachePolicy, QueryState, Reference, Resolved, ScopedRequest};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Loads every reference of one project with a single API call.
///
/// `refs` pairs each reference with its request key; the returned map is
/// keyed the same way. Keys left out of the map resolve to "not found".
#[async_trait]
pub trait ProjectLoader<R, T>: Send + Sync {
    async fn load_project(
        &self,
        project_id: &str,
        refs: Vec<(String, R)>,
    ) -> Result<HashMap<String, Option<T>>, ClientError>;
}

/// Splits a batch by project and merges the per-project results.
///
/// A failing project only loses its own keys; the batch fails as a whole
/// only when every project failed.
pub struct PerProject<L> {
    inner: L,
}

impl<L> PerProject<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R, T, L> BatchLoader<ScopedRequest<R>, Option<T>> for PerProject<L>
where
    R: Reference,
    T: Send + 'static,
    L: ProjectLoader<R, T>,
{
    async fn load_batch(
        &self,
        requests: Vec<ScopedRequest<R>>,
        keys: Vec<String>,
    ) -> Result<HashMap<String, Option<T>>, ClientError> {
        let groups = group_by_project(requests, keys);
        let group_count = groups.len();
        debug!(kind = %R::KIND, projects = group_count, "loading reference batch");

        let results = futures::future::join_all(groups.into_iter().map(
            |(project_id, refs)| async move {
                let result = self.inner.load_project(&project_id, refs).await;
                (project_id, result)
            },
        ))
        .await;

        let mut merged = HashMap::new();
        let mut first_error = None;
        let mut failed = 0;
        for (project_id, result) in results {
            match result {
                Ok(map) => merged.extend(map),
                Err(e) => {
                    warn!(kind = %R::KIND, project_id = %project_id, error = %e, "project lookup failed");
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if failed == group_count => Err(e),
            _ => Ok(merged),
        }
    }
}

/// Requests grouped by project, each paired with its key
pub fn group_by_project<R>(
    requests: Vec<ScopedRequest<R>>,
    keys: Vec<String>,
) -> BTreeMap<String, Vec<(String, R)>> {
    let mut groups: BTreeMap<String, Vec<(String, R)>> = BTreeMap::new();
    for (request, key) in requests.into_iter().zip(keys) {
        groups
            .entry(request.project_id)
            .or_default()
            .push((key, request.reference));
    }
    groups
}

/// Highest-ranked item accepted by `accept`; the first wins on ties
pub(crate) fn best_match<'a, T>(
    items: &'a [T],
    accept: impl Fn(&T) -> bool,
    rank: impl Fn(&T) -> Option<i64>,
) -> Option<&'a T> {
    items
        .iter()
        .filter(|item| accept(item))
        .fold(None, |best: Option<&'a T>, item| match best {
            Some(current) if rank(item) <= rank(current) => Some(current),
            _ => Some(item),
        })
}

/// Match by id, then by slug
pub(crate) fn find_entity<'a, T: Resolved>(
    items: &'a [T],
    id: Option<&str>,
    slug: Option<&str>,
    rank: impl Fn(&T) -> Option<i64>,
) -> Option<&'a T> {
    id.and_then(|id| best_match(items, |item| item.id() == id, &rank))
        .or_else(|| slug.and_then(|slug| best_match(items, |item| item.slug() == Some(slug), &rank)))
}

/// `{id?, slug?}` reference object for query bodies
pub(crate) fn ref_object(id: Option<&str>, slug: Option<&str>) -> Map<String, Value> {
    let mut object = Map::new();
    if let Some(id) = id {
        object.insert("id".to_string(), Value::from(id));
    }
    if let Some(slug) = slug {
        object.insert("slug".to_string(), Value::from(slug));
    }
    object
}

/// Cached, batched lookups for one entity kind
pub struct ReferenceQuery<R, T> {
    fetcher: BatchFetcher<ScopedRequest<R>, Option<T>>,
    cache: ReferenceCache<Option<T>>,
}

impl<R, T> ReferenceQuery<R, T>
where
    R: Reference,
    T: Clone + Send + Sync + 'static,
{
    pub fn new<L>(loader: L, batch: BatcherConfig, policy: CachePolicy) -> Self
    where
        L: ProjectLoader<R, T> + 'static,
    {
        let fetcher = BatchFetcher::new(
            batch,
            |request: &ScopedRequest<R>| request.key().into_string(),
            PerProject::new(loader),
        );
        Self {
            fetcher,
            cache: ReferenceCache::new(policy),
        }
    }

    fn scoped(scope: Option<&str>, reference: &R) -> Option<ScopedRequest<R>> {
        let project_id = scope.map(str::trim).filter(|s| !s.is_empty())?;
        let request = ScopedRequest::new(project_id, reference.clone());
        request.is_enabled().then_some(request)
    }

    /// Cache key, or `None` when the query is disabled
    pub fn query_key(&self, scope: Option<&str>, reference: &R) -> Option<CacheKey> {
        Self::scoped(scope, reference).map(|request| request.key())
    }

    pub async fn fetch(&self, scope: Option<&str>, reference: &R) -> QueryState<T> {
        let Some(request) = Self::scoped(scope, reference) else {
            return QueryState::Disabled;
        };
        let key = request.key();
        let fetcher = &self.fetcher;
        let value = self
            .cache
            .get_or_fetch(&key, move || fetcher.load(request))
            .await;
        QueryState::from_lookup(reference, value)
    }

    /// Resolve several references of one project in a shared batch window.
    ///
    /// Cache hits are answered directly; every miss is handed to the
    /// fetcher in a single `load_many`.
    pub async fn fetch_many(&self, scope: Option<&str>, references: &[R]) -> Vec<QueryState<T>> {
        let requests: Vec<Option<ScopedRequest<R>>> = references
            .iter()
            .map(|reference| Self::scoped(scope, reference))
            .collect();
        let enabled: Vec<&ScopedRequest<R>> = requests.iter().flatten().collect();
        let keys: Vec<CacheKey> = enabled.iter().map(|request| request.key()).collect();

        let fetcher = &self.fetcher;
        let mut values = self
            .cache
            .get_or_fetch_many(&keys, |missing| {
                let batch = missing.iter().map(|&index| enabled[index].clone()).collect();
                fetcher.load_many(batch)
            })
            .await
            .into_iter();

        references
            .iter()
            .zip(&requests)
            .map(|(reference, request)| match request {
                Some(_) => QueryState::from_lookup(reference, values.next().flatten().flatten()),
                None => QueryState::Disabled,
            })
            .collect()
    }

    /// Current state without triggering a fetch
    pub async fn peek(&self, scope: Option<&str>, reference: &R) -> QueryState<T> {
        let Some(key) = self.query_key(scope, reference) else {
            return QueryState::Disabled;
        };
        match self.cache.peek(&key).await {
            Some(value) => QueryState::from_lookup(reference, value),
            None => QueryState::Loading,
        }
    }

    pub fn is_fetching(&self, scope: Option<&str>, reference: &R) -> bool {
        self.query_key(scope, reference)
            .map(|key| self.cache.is_fetching(&key))
            .unwrap_or(false)
    }

    pub async fn invalidate(&self, scope: Option<&str>, reference: &R) {
        if let Some(key) = self.query_key(scope, reference) {
            self.cache.invalidate(&key).await;
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn batch_stats(&self) -> BatcherStats {
        self.fetcher.stats()
    }
}
