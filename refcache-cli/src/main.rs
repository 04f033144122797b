// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Refcache CLI
//!
//! Resolve entity references against the API and inspect cache keys.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use refcache_client::{ClientConfig, ReferenceResolver};
use refcache_core::{
    AppReference, CacheKey, EntityKind, EvaluatorReference, QueryReference, QueryState, Reference,
    Resolved, ScopedRequest, TestsetReference, VariantReference, VersionSelector,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "refcache")]
#[command(about = "Refcache - batched entity reference resolution", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "REFCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve references of one kind in a single batch
    Resolve {
        /// Entity kind (app, variant, testset, evaluator, query)
        kind: String,

        /// Project ID
        #[arg(long)]
        project: String,

        /// Ids (or slugs with --slug) to resolve
        #[arg(required = true)]
        ids: Vec<String>,

        /// Treat the values as slugs
        #[arg(long)]
        slug: bool,

        /// Variant version ("latest" or a number)
        #[arg(long = "version")]
        version: Option<String>,

        /// Which level of a query the values name
        #[arg(long, value_enum, default_value_t = QueryLevel::Revision)]
        level: QueryLevel,
    },

    /// Print the canonical cache key for a reference
    Key {
        /// Entity kind (app, variant, testset, evaluator, query)
        kind: String,

        /// Project ID
        #[arg(long)]
        project: String,

        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        slug: Option<String>,

        /// Variant version ("latest" or a number)
        #[arg(long = "version")]
        version: Option<String>,

        /// Which level of a query the id/slug name
        #[arg(long, value_enum, default_value_t = QueryLevel::Revision)]
        level: QueryLevel,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QueryLevel {
    Query,
    Variant,
    Revision,
}

/// Identifying fields taken from the command line
struct RefArgs {
    id: Option<String>,
    slug: Option<String>,
    version: Option<VersionSelector>,
    level: QueryLevel,
}

impl RefArgs {
    fn app(&self) -> AppReference {
        AppReference {
            id: self.id.clone(),
            slug: self.slug.clone(),
        }
    }

    fn variant(&self) -> VariantReference {
        VariantReference {
            id: self.id.clone(),
            slug: self.slug.clone(),
            version: self.version,
        }
    }

    fn testset(&self) -> TestsetReference {
        TestsetReference {
            id: self.id.clone(),
            slug: self.slug.clone(),
        }
    }

    fn evaluator(&self) -> EvaluatorReference {
        EvaluatorReference {
            id: self.id.clone(),
            slug: self.slug.clone(),
        }
    }

    fn query(&self) -> QueryReference {
        let mut reference = QueryReference::default();
        match self.level {
            QueryLevel::Query => {
                reference.id = self.id.clone();
                reference.slug = self.slug.clone();
            }
            QueryLevel::Variant => {
                reference.variant_id = self.id.clone();
                reference.variant_slug = self.slug.clone();
            }
            QueryLevel::Revision => {
                reference.revision_id = self.id.clone();
                reference.revision_slug = self.slug.clone();
                reference.revision_version = match self.version {
                    Some(VersionSelector::Exact(v)) => Some(v.to_string()),
                    _ => None,
                };
            }
        }
        reference
    }
}

fn parse_version(version: Option<&str>) -> Result<Option<VersionSelector>> {
    version
        .map(|v| v.parse::<VersionSelector>())
        .transpose()
        .context("Invalid version")
}

fn key_for<R: Reference>(project: &str, reference: R) -> CacheKey {
    ScopedRequest::new(project, reference).key()
}

fn report<T: Resolved + Serialize>(labels: &[String], states: &[QueryState<T>], json: bool) -> Result<()> {
    if json {
        let rows: Vec<_> = labels
            .iter()
            .zip(states)
            .map(|(label, state)| serde_json::json!({"reference": label, "result": state}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for (label, state) in labels.iter().zip(states) {
        match state {
            QueryState::Resolved(value) => {
                println!("✓ {} → {} ({})", label, value.display_name(), value.id())
            }
            QueryState::Deleted(marker) => {
                println!("✗ {} → {}: {}", label, marker.label(), marker.tooltip())
            }
            QueryState::Disabled => println!("- {} → disabled", label),
            QueryState::Loading => println!("… {} → loading", label),
        }
    }
    Ok(())
}

/// Copy of the configuration safe to print
fn redacted(mut config: ClientConfig) -> ClientConfig {
    if config.api.api_key.is_some() {
        config.api.api_key = Some("<redacted>".to_string());
    }
    config
}

#[allow(clippy::too_many_arguments)]
async fn resolve(
    resolver: &ReferenceResolver,
    kind: EntityKind,
    project: &str,
    ids: &[String],
    slug: bool,
    version: Option<VersionSelector>,
    level: QueryLevel,
    json: bool,
) -> Result<()> {
    let args: Vec<RefArgs> = ids
        .iter()
        .map(|value| RefArgs {
            id: (!slug).then(|| value.clone()),
            slug: slug.then(|| value.clone()),
            version,
            level,
        })
        .collect();
    let scope = Some(project);
    debug!(%kind, project, count = ids.len(), "resolving references");

    match kind {
        EntityKind::Application => {
            let refs: Vec<_> = args.iter().map(RefArgs::app).collect();
            let states = resolver.applications().fetch_many(scope, &refs).await;
            report(ids, &states, json)
        }
        EntityKind::Variant => {
            let refs: Vec<_> = args.iter().map(RefArgs::variant).collect();
            let states = resolver.variants().fetch_many(scope, &refs).await;
            report(ids, &states, json)
        }
        EntityKind::Testset => {
            let refs: Vec<_> = args.iter().map(RefArgs::testset).collect();
            let states = resolver.testsets().fetch_many(scope, &refs).await;
            report(ids, &states, json)
        }
        EntityKind::Evaluator => {
            let refs: Vec<_> = args.iter().map(RefArgs::evaluator).collect();
            let states = resolver.evaluators().fetch_many(scope, &refs).await;
            report(ids, &states, json)
        }
        EntityKind::Query => {
            let refs: Vec<_> = args.iter().map(RefArgs::query).collect();
            let states = resolver.queries().fetch_many(scope, &refs).await;
            report(ids, &states, json)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for results
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::load(cli.config.clone()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Resolve {
            kind,
            project,
            ids,
            slug,
            version,
            level,
        } => {
            let kind: EntityKind = kind.parse()?;
            let version = parse_version(version.as_deref())?;
            let resolver =
                ReferenceResolver::from_config(&config).context("Failed to create resolver")?;

            resolve(&resolver, kind, &project, &ids, slug, version, level, cli.json).await?;

            for stats in resolver.stats().iter().filter(|s| s.batch.total_batches > 0) {
                info!(
                    kind = %stats.kind,
                    batches = stats.batch.total_batches,
                    requests = stats.batch.total_requests,
                    "batch summary"
                );
            }
        }

        Commands::Key {
            kind,
            project,
            id,
            slug,
            version,
            level,
        } => {
            let kind: EntityKind = kind.parse()?;
            let args = RefArgs {
                id,
                slug,
                version: parse_version(version.as_deref())?,
                level,
            };
            let key = match kind {
                EntityKind::Application => key_for(&project, args.app()),
                EntityKind::Variant => key_for(&project, args.variant()),
                EntityKind::Testset => key_for(&project, args.testset()),
                EntityKind::Evaluator => key_for(&project, args.evaluator()),
                EntityKind::Query => key_for(&project, args.query()),
            };

            if cli.json {
                println!("{}", serde_json::json!({"kind": kind, "key": key}));
            } else {
                println!("{}", key);
            }
        }

        Commands::Config => {
            let config = redacted(config);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}
