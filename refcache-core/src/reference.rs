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

//! Entity references: partial identifier bundles held before resolution
//!
//! Call sites rarely have every identifier, so every field is optional. A
//! reference is resolvable only when at least one identifying field is
//! non-empty; unresolvable references never reach the network.

use crate::cache_key::{self, CacheKey, FieldValue, KeyField};
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of entities that can be referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Application,
    Variant,
    Testset,
    Evaluator,
    Query,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Application,
        EntityKind::Variant,
        EntityKind::Testset,
        EntityKind::Evaluator,
        EntityKind::Query,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Application => "application",
            EntityKind::Variant => "variant",
            EntityKind::Testset => "testset",
            EntityKind::Evaluator => "evaluator",
            EntityKind::Query => "query",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "app" | "application" => Ok(EntityKind::Application),
            "variant" | "revision" => Ok(EntityKind::Variant),
            "testset" => Ok(EntityKind::Testset),
            "evaluator" => Ok(EntityKind::Evaluator),
            "query" => Ok(EntityKind::Query),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}

/// Version part of a variant reference.
///
/// `Option<VersionSelector>::None` means "unspecified, match any";
/// `Latest` is an explicit null version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    Latest,
    Exact(i64),
}

impl FromStr for VersionSelector {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "latest" | "null" => Ok(VersionSelector::Latest),
            _ => trimmed
                .parse::<i64>()
                .map(VersionSelector::Exact)
                .map_err(|_| CoreError::InvalidVersion(s.to_string())),
        }
    }
}

/// A reference to one entity kind
pub trait Reference: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Discriminating fields for the cache key. Absent fields are skipped.
    fn key_fields(&self) -> Vec<(KeyField, FieldValue<'_>)>;

    /// Most specific id carried by the reference
    fn primary_id(&self) -> Option<&str>;

    /// Most specific slug carried by the reference
    fn primary_slug(&self) -> Option<&str>;

    /// At least one identifying field is non-empty
    fn is_resolvable(&self) -> bool {
        self.key_fields()
            .iter()
            .any(|(field, value)| field.is_identifying() && value.is_present_text())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn push_text<'a>(
    fields: &mut Vec<(KeyField, FieldValue<'a>)>,
    field: KeyField,
    value: &'a Option<String>,
) {
    if let Some(v) = FieldValue::from_option(value.as_deref()) {
        fields.push((field, v));
    }
}

/// Application reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AppReference {
    pub id: Option<String>,
    pub slug: Option<String>,
}

impl AppReference {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            slug: None,
        }
    }

    pub fn by_slug(slug: impl Into<String>) -> Self {
        Self {
            id: None,
            slug: Some(slug.into()),
        }
    }
}

impl Reference for AppReference {
    const KIND: EntityKind = EntityKind::Application;

    fn key_fields(&self) -> Vec<(KeyField, FieldValue<'_>)> {
        let mut fields = Vec::with_capacity(2);
        push_text(&mut fields, KeyField::Id, &self.id);
        push_text(&mut fields, KeyField::Slug, &self.slug);
        fields
    }

    fn primary_id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    fn primary_slug(&self) -> Option<&str> {
        non_empty(&self.slug)
    }
}

/// Variant (revision) reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantReference {
    pub id: Option<String>,
    pub slug: Option<String>,
    pub version: Option<VersionSelector>,
}

impl VariantReference {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn by_slug(slug: impl Into<String>) -> Self {
        Self {
            slug: Some(slug.into()),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: VersionSelector) -> Self {
        self.version = Some(version);
        self
    }
}

impl Reference for VariantReference {
    const KIND: EntityKind = EntityKind::Variant;

    fn key_fields(&self) -> Vec<(KeyField, FieldValue<'_>)> {
        let mut fields = Vec::with_capacity(3);
        push_text(&mut fields, KeyField::Id, &self.id);
        push_text(&mut fields, KeyField::Slug, &self.slug);
        match self.version {
            Some(VersionSelector::Latest) => fields.push((KeyField::Version, FieldValue::Null)),
            Some(VersionSelector::Exact(v)) => {
                fields.push((KeyField::Version, FieldValue::text(v.to_string())))
            }
            None => {}
        }
        fields
    }

    fn primary_id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    fn primary_slug(&self) -> Option<&str> {
        non_empty(&self.slug)
    }
}

/// Testset reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TestsetReference {
    pub id: Option<String>,
    pub slug: Option<String>,
}

impl TestsetReference {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            slug: None,
        }
    }

    pub fn by_slug(slug: impl Into<String>) -> Self {
        Self {
            id: None,
            slug: Some(slug.into()),
        }
    }
}

impl Reference for TestsetReference {
    const KIND: EntityKind = EntityKind::Testset;

    fn key_fields(&self) -> Vec<(KeyField, FieldValue<'_>)> {
        let mut fields = Vec::with_capacity(2);
        push_text(&mut fields, KeyField::Id, &self.id);
        push_text(&mut fields, KeyField::Slug, &self.slug);
        fields
    }

    fn primary_id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    fn primary_slug(&self) -> Option<&str> {
        non_empty(&self.slug)
    }
}

/// Evaluator reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorReference {
    pub id: Option<String>,
    pub slug: Option<String>,
}

impl EvaluatorReference {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            slug: None,
        }
    }

    pub fn by_slug(slug: impl Into<String>) -> Self {
        Self {
            id: None,
            slug: Some(slug.into()),
        }
    }
}

impl Reference for EvaluatorReference {
    const KIND: EntityKind = EntityKind::Evaluator;

    fn key_fields(&self) -> Vec<(KeyField, FieldValue<'_>)> {
        let mut fields = Vec::with_capacity(2);
        push_text(&mut fields, KeyField::Id, &self.id);
        push_text(&mut fields, KeyField::Slug, &self.slug);
        fields
    }

    fn primary_id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    fn primary_slug(&self) -> Option<&str> {
        non_empty(&self.slug)
    }
}

/// Query reference
///
/// May point at a query, one of its variants, or a specific revision. The
/// most specific populated level decides what is looked up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryReference {
    pub id: Option<String>,
    pub slug: Option<String>,
    pub revision_id: Option<String>,
    pub revision_slug: Option<String>,
    pub revision_version: Option<String>,
    pub variant_id: Option<String>,
    pub variant_slug: Option<String>,
}

/// Which level of a query a reference targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTarget {
    Revision,
    Variant,
    Query,
}

impl QueryReference {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn by_revision_id(revision_id: impl Into<String>) -> Self {
        Self {
            revision_id: Some(revision_id.into()),
            ..Default::default()
        }
    }

    pub fn by_variant_id(variant_id: impl Into<String>) -> Self {
        Self {
            variant_id: Some(variant_id.into()),
            ..Default::default()
        }
    }

    /// Most specific level carrying an identifying value
    pub fn target(&self) -> Option<QueryTarget> {
        if non_empty(&self.revision_id).is_some() || non_empty(&self.revision_slug).is_some() {
            Some(QueryTarget::Revision)
        } else if non_empty(&self.variant_id).is_some() || non_empty(&self.variant_slug).is_some()
        {
            Some(QueryTarget::Variant)
        } else if non_empty(&self.id).is_some() || non_empty(&self.slug).is_some() {
            Some(QueryTarget::Query)
        } else {
            None
        }
    }
}

impl Reference for QueryReference {
    const KIND: EntityKind = EntityKind::Query;

    fn key_fields(&self) -> Vec<(KeyField, FieldValue<'_>)> {
        let mut fields = Vec::with_capacity(7);
        push_text(&mut fields, KeyField::Id, &self.id);
        push_text(&mut fields, KeyField::Slug, &self.slug);
        push_text(&mut fields, KeyField::RevisionId, &self.revision_id);
        push_text(&mut fields, KeyField::RevisionSlug, &self.revision_slug);
        push_text(&mut fields, KeyField::RevisionVersion, &self.revision_version);
        push_text(&mut fields, KeyField::VariantId, &self.variant_id);
        push_text(&mut fields, KeyField::VariantSlug, &self.variant_slug);
        fields
    }

    fn primary_id(&self) -> Option<&str> {
        non_empty(&self.revision_id)
            .or_else(|| non_empty(&self.variant_id))
            .or_else(|| non_empty(&self.id))
    }

    fn primary_slug(&self) -> Option<&str> {
        non_empty(&self.revision_slug)
            .or_else(|| non_empty(&self.variant_slug))
            .or_else(|| non_empty(&self.slug))
    }
}

/// One lookup request: a reference inside a project scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopedRequest<R> {
    pub project_id: String,
    pub reference: R,
}

impl<R: Reference> ScopedRequest<R> {
    pub fn new(project_id: impl Into<String>, reference: R) -> Self {
        Self {
            project_id: project_id.into(),
            reference,
        }
    }

    /// Canonical key for this request
    pub fn key(&self) -> CacheKey {
        cache_key::serialize_reference(&self.project_id, &self.reference)
    }

    /// Has a non-empty scope and a resolvable reference
    pub fn is_enabled(&self) -> bool {
        !self.project_id.trim().is_empty() && self.reference.is_resolvable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("app".parse::<EntityKind>().unwrap(), EntityKind::Application);
        assert_eq!("Revision".parse::<EntityKind>().unwrap(), EntityKind::Variant);
        assert_eq!(" testset ".parse::<EntityKind>().unwrap(), EntityKind::Testset);
        assert!("trace".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_version_selector_parse() {
        assert_eq!("latest".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!("null".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!("7".parse::<VersionSelector>().unwrap(), VersionSelector::Exact(7));
        assert!("v7".parse::<VersionSelector>().is_err());
    }

    #[test]
    fn test_resolvable_requires_identifying_field() {
        assert!(!AppReference::default().is_resolvable());
        assert!(!AppReference {
            id: Some("  ".to_string()),
            slug: Some(String::new()),
        }
        .is_resolvable());
        assert!(AppReference::by_slug("my-app").is_resolvable());

        // A version alone does not identify a variant
        let version_only = VariantReference {
            version: Some(VersionSelector::Exact(2)),
            ..Default::default()
        };
        assert!(!version_only.is_resolvable());

        let revision_version_only = QueryReference {
            revision_version: Some("3".to_string()),
            ..Default::default()
        };
        assert!(!revision_version_only.is_resolvable());
    }

    #[test]
    fn test_query_target_prefers_most_specific() {
        let reference = QueryReference {
            id: Some("q1".to_string()),
            variant_id: Some("qv1".to_string()),
            revision_id: Some("qr1".to_string()),
            ..Default::default()
        };
        assert_eq!(reference.target(), Some(QueryTarget::Revision));
        assert_eq!(reference.primary_id(), Some("qr1"));

        assert_eq!(QueryReference::by_variant_id("qv1").target(), Some(QueryTarget::Variant));
        assert_eq!(QueryReference::by_id("q1").target(), Some(QueryTarget::Query));
        assert_eq!(QueryReference::default().target(), None);
    }

    #[test]
    fn test_scoped_request_enabled() {
        assert!(ScopedRequest::new("p1", TestsetReference::by_id("t1")).is_enabled());
        assert!(!ScopedRequest::new("", TestsetReference::by_id("t1")).is_enabled());
        assert!(!ScopedRequest::new("p1", TestsetReference::default()).is_enabled());
    }

    #[test]
    fn test_scoped_request_key() {
        let request = ScopedRequest::new("p1", TestsetReference::by_id("t1"));
        assert_eq!(request.key().as_str(), "testset|project=2:p1|id=2:t1");
    }
}
