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
use refcache_core::normalize::{normalize_evaluator, unwrap_list};
use refcache_core::{EvaluatorRef, EvaluatorReference, Reference};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub type EvaluatorQuery = ReferenceQuery<EvaluatorReference, EvaluatorRef>;

pub struct EvaluatorLoader {
    api: Arc<dyn ReferenceApi>,
}

impl EvaluatorLoader {
    pub fn new(api: Arc<dyn ReferenceApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ProjectLoader<EvaluatorReference, EvaluatorRef> for EvaluatorLoader {
    async fn load_project(
        &self,
        project_id: &str,
        refs: Vec<(String, EvaluatorReference)>,
    ) -> Result<HashMap<String, Option<EvaluatorRef>>, ClientError> {
        let evaluator_refs: Vec<Value> = refs
            .iter()
            .map(|(_, r)| Value::Object(ref_object(r.primary_id(), r.primary_slug())))
            .collect();
        let raw = self
            .api
            .post(
                paths::EVALUATORS_QUERY,
                project_id,
                json!({ "evaluator_refs": evaluator_refs }),
            )
            .await?;

        let evaluators: Vec<EvaluatorRef> = unwrap_list(&raw, &["evaluators"])
            .into_iter()
            .filter_map(|item| normalize_evaluator(item, None))
            .collect();

        Ok(refs
            .into_iter()
            .map(|(key, reference)| {
                let found = find_entity(
                    &evaluators,
                    reference.primary_id(),
                    reference.primary_slug(),
                    |_| None,
                );
                (key, found.cloned())
            })
            .collect())
    }
}
