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

//! # Refcache Core
//!
//! I/O-free building blocks for resolving lightweight entity references
//! (applications, variants, testsets, evaluators, queries) into display
//! objects.
//!
//! - [`reference`]: the partial identifier bundles callers hold before lookup
//! - [`cache_key`]: canonical, order-independent keys for dedup and lookup
//! - [`resolved`]: normalized display shapes and the deleted/loading states
//! - [`normalize`]: tolerant mapping from raw server payloads
//! - [`policy`]: freshness and eviction policy for cached lookups

use thiserror::Error;

pub mod cache_key;
pub mod normalize;
pub mod policy;
pub mod reference;
pub mod resolved;

pub use cache_key::{CacheKey, FieldValue, KeyField};
pub use policy::CachePolicy;
pub use reference::{
    AppReference, EntityKind, EvaluatorReference, QueryReference, QueryTarget, Reference,
    ScopedRequest, TestsetReference, VariantReference, VersionSelector,
};
pub use resolved::{
    ApplicationRef, DeletedMarker, EvaluatorRef, MetricSchema, QueryRef, QueryState, Resolved,
    TestsetRef, VariantRef,
};

/// Errors raised by the core crate
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("Invalid version selector: {0}")]
    InvalidVersion(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),
}
