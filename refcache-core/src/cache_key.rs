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

//! Canonical cache keys for entity references
//!
//! A key identifies one `(kind, project, reference)` lookup. The same key is
//! used to deduplicate requests inside a batch window and to find each
//! caller's entry in the batch response.
//!
//! ## Key Format
//!
//! ```text
//! <kind>|project=<len>:<scope>|<field>=<len>:<value>|<field>:null|...
//! ```
//!
//! - Text values are trimmed; empty text counts as absent and is omitted
//! - `Null` is written as `<field>:null`, distinct from an omitted field
//! - Fields are emitted in [`KeyField`] order, never insertion order
//! - Every text value is length-prefixed, so `|`, `:` or a literal `null`
//!   inside an id cannot produce another reference's key
//!
//! Equality is syntactic: `{id: "a"}` and `{slug: "x"}` produce different
//! keys even when both name the same entity.

use crate::reference::{EntityKind, Reference};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::{self, Write};

/// Discriminating reference fields, in canonical key order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyField {
    Id,
    Slug,
    Version,
    RevisionId,
    RevisionSlug,
    RevisionVersion,
    VariantId,
    VariantSlug,
}

impl KeyField {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyField::Id => "id",
            KeyField::Slug => "slug",
            KeyField::Version => "version",
            KeyField::RevisionId => "revision_id",
            KeyField::RevisionSlug => "revision_slug",
            KeyField::RevisionVersion => "revision_version",
            KeyField::VariantId => "variant_id",
            KeyField::VariantSlug => "variant_slug",
        }
    }

    /// Whether a populated value of this field is enough to look an entity up.
    /// Versions only narrow a lookup, they never identify on their own.
    pub fn is_identifying(self) -> bool {
        !matches!(self, KeyField::Version | KeyField::RevisionVersion)
    }
}

/// A field value as it enters the key builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Explicit null (e.g. "latest version")
    Null,
    Text(Cow<'a, str>),
}

impl<'a> FieldValue<'a> {
    pub fn text(value: impl Into<Cow<'a, str>>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Wrap an optional string; `None` means the field is absent.
    pub fn from_option(value: Option<&'a str>) -> Option<Self> {
        value.map(|v| FieldValue::Text(Cow::Borrowed(v)))
    }

    /// Trim text and drop empty values. `None` means "absent".
    pub fn normalized(&self) -> Option<FieldValue<'_>> {
        match self {
            FieldValue::Null => Some(FieldValue::Null),
            FieldValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(FieldValue::Text(Cow::Borrowed(trimmed)))
                }
            }
        }
    }

    /// True for non-empty text after trimming
    pub fn is_present_text(&self) -> bool {
        matches!(self, FieldValue::Text(s) if !s.trim().is_empty())
    }
}

/// Serialized key for one scoped reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Build the canonical key for `(kind, scope, fields)`.
///
/// When a field appears more than once the first occurrence wins.
pub fn build(kind: EntityKind, scope: &str, fields: &[(KeyField, FieldValue<'_>)]) -> CacheKey {
    let mut normalized: Vec<(KeyField, FieldValue<'_>)> = fields
        .iter()
        .filter_map(|(field, value)| value.normalized().map(|v| (*field, v)))
        .collect();

    // Stable sort keeps the first occurrence ahead of duplicates
    normalized.sort_by_key(|(field, _)| *field);
    normalized.dedup_by_key(|(field, _)| *field);

    let mut out = String::with_capacity(32 + scope.len());
    out.push_str(kind.as_str());
    push_segment(&mut out, "project", FieldValue::text(scope.trim()));
    for (field, value) in normalized {
        push_segment(&mut out, field.as_str(), value);
    }

    CacheKey(out)
}

/// Key for a reference of any kind under `scope`
pub fn serialize_reference<R: Reference>(scope: &str, reference: &R) -> CacheKey {
    build(R::KIND, scope, &reference.key_fields())
}

fn push_segment(out: &mut String, name: &str, value: FieldValue<'_>) {
    out.push('|');
    out.push_str(name);
    match value {
        FieldValue::Null => out.push_str(":null"),
        FieldValue::Text(text) => {
            // Writing into a String cannot fail
            let _ = write!(out, "={}:{}", text.len(), text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{AppReference, VariantReference, VersionSelector};
    use proptest::prelude::*;

    #[test]
    fn test_key_is_deterministic() {
        let reference = VariantReference::by_id("v1").with_version(VersionSelector::Exact(3));
        let a = serialize_reference("p1", &reference);
        let b = serialize_reference("p1", &reference);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "variant|project=2:p1|id=2:v1|version=1:3");
    }

    #[test]
    fn test_field_order_is_fixed() {
        let forward = build(
            EntityKind::Variant,
            "p1",
            &[
                (KeyField::Id, FieldValue::text("v1")),
                (KeyField::Slug, FieldValue::text("main")),
                (KeyField::Version, FieldValue::Null),
            ],
        );
        let reversed = build(
            EntityKind::Variant,
            "p1",
            &[
                (KeyField::Version, FieldValue::Null),
                (KeyField::Slug, FieldValue::text("main")),
                (KeyField::Id, FieldValue::text("v1")),
            ],
        );
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_null_differs_from_absent() {
        let latest = VariantReference::by_id("v1").with_version(VersionSelector::Latest);
        let unspecified = VariantReference::by_id("v1");

        let latest_key = serialize_reference("p1", &latest);
        let unspecified_key = serialize_reference("p1", &unspecified);

        assert_ne!(latest_key, unspecified_key);
        assert!(latest_key.as_str().ends_with("|version:null"));
        assert!(!unspecified_key.as_str().contains("version"));
    }

    #[test]
    fn test_empty_and_whitespace_are_absent() {
        let with_blank_slug = AppReference {
            id: Some("  app-1 ".to_string()),
            slug: Some("   ".to_string()),
        };
        let id_only = AppReference::by_id("app-1");
        assert_eq!(
            serialize_reference("p1", &with_blank_slug),
            serialize_reference("p1", &id_only)
        );
    }

    #[test]
    fn test_literal_null_text_is_not_null() {
        let literal = build(
            EntityKind::Variant,
            "p1",
            &[(KeyField::Version, FieldValue::text("null"))],
        );
        let null = build(EntityKind::Variant, "p1", &[(KeyField::Version, FieldValue::Null)]);
        assert_ne!(literal, null);
    }

    #[test]
    fn test_delimiters_inside_values_do_not_collide() {
        // An id that embeds what looks like a slug segment
        let tricky = AppReference::by_id("a|slug=1:b");
        let split = AppReference {
            id: Some("a".to_string()),
            slug: Some("b".to_string()),
        };
        assert_ne!(
            serialize_reference("p1", &tricky),
            serialize_reference("p1", &split)
        );
    }

    #[test]
    fn test_equality_is_syntactic() {
        // Same entity, different representation
        let by_id = AppReference::by_id("app-1");
        let by_both = AppReference {
            id: Some("app-1".to_string()),
            slug: Some("my-app".to_string()),
        };
        assert_ne!(
            serialize_reference("p1", &by_id),
            serialize_reference("p1", &by_both)
        );
    }

    #[test]
    fn test_scope_and_kind_are_part_of_key() {
        let reference = AppReference::by_id("x");
        assert_ne!(
            serialize_reference("p1", &reference),
            serialize_reference("p2", &reference)
        );
        assert_ne!(
            build(EntityKind::Application, "p1", &[(KeyField::Id, FieldValue::text("x"))]),
            build(EntityKind::Testset, "p1", &[(KeyField::Id, FieldValue::text("x"))]),
        );
    }

    #[test]
    fn test_duplicate_field_first_wins() {
        let key = build(
            EntityKind::Application,
            "p1",
            &[
                (KeyField::Id, FieldValue::text("first")),
                (KeyField::Id, FieldValue::text("second")),
            ],
        );
        assert_eq!(key.as_str(), "application|project=2:p1|id=5:first");
    }

    proptest! {
        #[test]
        fn prop_key_determinism(id in ".{0,24}", slug in ".{0,24}", scope in "[a-z0-9-]{1,12}") {
            let reference = AppReference { id: Some(id), slug: Some(slug) };
            prop_assert_eq!(
                serialize_reference(&scope, &reference),
                serialize_reference(&scope, &reference.clone())
            );
        }

        #[test]
        fn prop_distinct_ids_distinct_keys(a in "[^\\s]{1,24}", b in "[^\\s]{1,24}") {
            prop_assume!(a != b);
            prop_assert_ne!(
                serialize_reference("p", &AppReference::by_id(a)),
                serialize_reference("p", &AppReference::by_id(b))
            );
        }
    }
}
