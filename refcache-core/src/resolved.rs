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

//! Resolved display objects and lookup states

use crate::reference::{EntityKind, Reference};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Common accessors over resolved entities
pub trait Resolved: Clone + fmt::Debug + Send + Sync + 'static {
    fn id(&self) -> &str;

    fn name(&self) -> Option<&str>;

    fn slug(&self) -> Option<&str>;

    /// Name, then slug, then id
    fn display_name(&self) -> &str {
        self.name().or_else(|| self.slug()).unwrap_or_else(|| self.id())
    }
}

macro_rules! impl_resolved {
    ($ty:ty) => {
        impl Resolved for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn name(&self) -> Option<&str> {
                self.name.as_deref()
            }

            fn slug(&self) -> Option<&str> {
                self.slug.as_deref()
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRef {
    pub id: String,
    pub name: Option<String>,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRef {
    pub id: String,
    pub name: Option<String>,
    pub slug: Option<String>,
    /// Revision number
    pub version: Option<i64>,
    pub app_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestsetRef {
    pub id: String,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub testcase_count: Option<usize>,
    /// Sorted union of column names over the preview testcases
    pub columns: Vec<String>,
}

/// One output metric declared by an evaluator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSchema {
    pub name: String,
    pub metric_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorRef {
    pub id: String,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub metrics: Vec<MetricSchema>,
}

/// A query revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRef {
    /// Revision id
    pub id: String,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub version: Option<i64>,
    pub query_id: Option<String>,
    pub query_slug: Option<String>,
    pub variant_id: Option<String>,
    pub variant_slug: Option<String>,
    pub filtering: Option<serde_json::Value>,
}

impl_resolved!(ApplicationRef);
impl_resolved!(VariantRef);
impl_resolved!(TestsetRef);
impl_resolved!(EvaluatorRef);
impl_resolved!(QueryRef);

/// A populated reference that resolved to no entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeletedMarker {
    pub kind: EntityKind,
    pub id: Option<String>,
    pub slug: Option<String>,
}

impl DeletedMarker {
    pub fn for_reference<R: Reference>(reference: &R) -> Self {
        Self {
            kind: R::KIND,
            id: reference.primary_id().map(str::to_string),
            slug: reference.primary_slug().map(str::to_string),
        }
    }

    pub fn label(&self) -> &'static str {
        "Deleted"
    }

    /// Hover text disclosing what was referenced
    pub fn tooltip(&self) -> String {
        match (&self.id, &self.slug) {
            (Some(id), _) => format!("{} {} no longer exists", self.kind, id),
            (None, Some(slug)) => format!("{} '{}' no longer exists", self.kind, slug),
            (None, None) => format!("{} no longer exists", self.kind),
        }
    }
}

/// What a presentation cell sees for one reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum QueryState<T> {
    /// No scope or nothing to look up; no request was made
    Disabled,
    Loading,
    Resolved(T),
    Deleted(DeletedMarker),
}

impl<T> QueryState<T> {
    /// State for a finished lookup of `reference`
    pub fn from_lookup<R: Reference>(reference: &R, value: Option<T>) -> Self {
        match value {
            Some(v) => QueryState::Resolved(v),
            None => QueryState::Deleted(DeletedMarker::for_reference(reference)),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, QueryState::Deleted(_))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, QueryState::Disabled)
    }

    pub fn resolved(&self) -> Option<&T> {
        match self {
            QueryState::Resolved(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_resolved(self) -> Option<T> {
        match self {
            QueryState::Resolved(v) => Some(v),
            _ => None,
        }
    }
}
