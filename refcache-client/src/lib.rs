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

//! # Refcache Client
//!
//! Resolves entity references against the platform API with request
//! coalescing and a per-project TTL cache.
//!
//! ## Flow
//!
//! ```text
//! fetch(scope, ref) ─► ReferenceCache ─(miss/stale)─► BatchFetcher ─► per-kind loader ─► HTTP
//!        ▲                                                  │
//!        └──────────── QueryState (resolved / deleted) ◄────┘ (matched by key)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use refcache_client::{ClientConfig, ReferenceResolver};
//! use refcache_core::TestsetReference;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::load(None)?;
//!     let resolver = ReferenceResolver::from_config(&config)?;
//!
//!     // Both lookups share one POST /preview/testsets/query
//!     let refs = [TestsetReference::by_id("t1"), TestsetReference::by_id("t2")];
//!     let (a, b) = tokio::join!(
//!         resolver.testsets().fetch(Some("p1"), &refs[0]),
//!         resolver.testsets().fetch(Some("p1"), &refs[1]),
//!     );
//!     println!("{:?} {:?}", a, b);
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub mod api;
pub mod batcher;
pub mod cache;
pub mod config;
pub mod queries;
pub mod resolver;

pub use api::{HttpApiClient, ReferenceApi};
pub use batcher::{BatchFetcher, BatchLoader, BatchPhase, BatcherConfig, BatcherStats, FlushTrigger};
pub use cache::{CacheStats, ReferenceCache};
pub use config::ClientConfig;
pub use queries::{ProjectLoader, ReferenceQuery};
pub use resolver::{KindStats, ReferenceResolver};

/// Errors from the client layer.
///
/// These never reach presentation code: the batch fetcher converts them into
/// per-caller fallbacks.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {path}")]
    Status { status: u16, path: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Batch load failed: {0}")]
    Batch(String),

    #[error(transparent)]
    Core(#[from] refcache_core::CoreError),
}
