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

//! Evaluator normalization
//!
//! Output metrics are read from the JSON schema of the evaluator's outputs.
//! Current evaluators keep it under `data.schemas.outputs`; older ones under
//! `data.service.format.properties.outputs`.

use super::{lookup, pick_string, resolve_id};
use crate::resolved::{EvaluatorRef, MetricSchema};
use serde_json::Value;

const OUTPUT_PROPERTY_PATHS: &[&str] = &[
    "data.schemas.outputs.properties",
    "data.service.format.properties.outputs.properties",
];

pub fn normalize_evaluator(raw: &Value, fallback_id: Option<&str>) -> Option<EvaluatorRef> {
    let id = resolve_id(raw, &["id", "evaluator_id"], fallback_id)?;
    Some(EvaluatorRef {
        id,
        name: pick_string(raw, &["name", "evaluator_name"]),
        slug: pick_string(raw, &["slug", "evaluator_key", "key"]),
        metrics: output_metrics(raw),
    })
}

fn output_metrics(raw: &Value) -> Vec<MetricSchema> {
    let Some(properties) = OUTPUT_PROPERTY_PATHS
        .iter()
        .find_map(|path| lookup(raw, path).and_then(Value::as_object))
    else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, schema)| MetricSchema {
            name: name.clone(),
            metric_type: metric_type(schema),
            description: pick_string(schema, &["description", "title"]),
        })
        .collect()
}

/// `"type": "number"` or `"type": ["number", "null"]`
fn metric_type(schema: &Value) -> Option<String> {
    match schema.get("type")? {
        Value::String(t) => Some(t.clone()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .map(str::to_string),
        _ => None,
    }
}
