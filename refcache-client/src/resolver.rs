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

//! One query per entity kind behind a shared API client

use crate::api::{HttpApiClient, ReferenceApi};
use crate::batcher::BatcherStats;
use crate::cache::CacheStats;
use crate::config::ClientConfig;
use crate::queries::{
    ApplicationLoader, ApplicationQuery, EvaluatorLoader, EvaluatorQuery, QueryLoader,
    QueryRevisionQuery, TestsetLoader, TestsetQuery, VariantLoader, VariantQuery,
};
use crate::ClientError;
use refcache_core::EntityKind;
use std::sync::Arc;
use tracing::info;

/// Cache and batch statistics for one entity kind
#[derive(Debug, Clone)]
pub struct KindStats {
    pub kind: EntityKind,
    pub cache: CacheStats,
    pub batch: BatcherStats,
}

pub struct ReferenceResolver {
    applications: ApplicationQuery,
    variants: VariantQuery,
    testsets: TestsetQuery,
    evaluators: EvaluatorQuery,
    queries: QueryRevisionQuery,
}

impl ReferenceResolver {
    pub fn new(api: Arc<dyn ReferenceApi>, config: &ClientConfig) -> Self {
        let policy = config.policy();
        let batch = config.batcher_config();

        Self {
            applications: ApplicationQuery::new(
                ApplicationLoader::new(api.clone()),
                batch.clone(),
                policy,
            ),
            variants: VariantQuery::new(VariantLoader::new(api.clone()), batch.clone(), policy),
            testsets: TestsetQuery::new(
                TestsetLoader::new(api.clone())
                    .with_preview_testcases(config.testsets.preview_testcases),
                batch.clone(),
                policy,
            ),
            evaluators: EvaluatorQuery::new(EvaluatorLoader::new(api.clone()), batch.clone(), policy),
            queries: QueryRevisionQuery::new(QueryLoader::new(api), batch, policy),
        }
    }

    /// Resolver talking HTTP to the configured API
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        let api = HttpApiClient::from_config(&config.api)?;
        info!(base_url = %api.base_url(), "reference resolver ready");
        Ok(Self::new(Arc::new(api), config))
    }

    pub fn applications(&self) -> &ApplicationQuery {
        &self.applications
    }

    pub fn variants(&self) -> &VariantQuery {
        &self.variants
    }

    pub fn testsets(&self) -> &TestsetQuery {
        &self.testsets
    }

    pub fn evaluators(&self) -> &EvaluatorQuery {
        &self.evaluators
    }

    pub fn queries(&self) -> &QueryRevisionQuery {
        &self.queries
    }

    /// Drop every cached result, e.g. after switching projects
    pub fn clear_all(&self) {
        self.applications.clear();
        self.variants.clear();
        self.testsets.clear();
        self.evaluators.clear();
        self.queries.clear();
    }

    pub fn stats(&self) -> Vec<KindStats> {
        vec![
            KindStats {
                kind: EntityKind::Application,
                cache: self.applications.cache_stats(),
                batch: self.applications.batch_stats(),
            },
            KindStats {
                kind: EntityKind::Variant,
                cache: self.variants.cache_stats(),
                batch: self.variants.batch_stats(),
            },
            KindStats {
                kind: EntityKind::Testset,
                cache: self.testsets.cache_stats(),
                batch: self.testsets.batch_stats(),
            },
            KindStats {
                kind: EntityKind::Evaluator,
                cache: self.evaluators.cache_stats(),
                batch: self.evaluators.batch_stats(),
            },
            KindStats {
                kind: EntityKind::Query,
                cache: self.queries.cache_stats(),
                batch: self.queries.batch_stats(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = ClientConfig::default();
        config.cache.gc_time_secs = 0;
        assert!(matches!(
            ReferenceResolver::from_config(&config),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_stats_cover_every_kind() {
        let resolver = ReferenceResolver::from_config(&ClientConfig::default()).unwrap();
        let stats = resolver.stats();
        assert_eq!(stats.len(), EntityKind::ALL.len());
        assert!(stats.iter().all(|s| s.batch.total_requests == 0));
    }
}
