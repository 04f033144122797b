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

//! Request-Coalescing Batch Fetcher
//!
//! Many cells ask for the same kind of entity at nearly the same moment.
//! The fetcher merges every request submitted inside one batch window into a
//! single loader call and fans the results back out by serialized key.
//!
//! ## Window State Machine
//!
//! ```text
//!          load()                flush trigger            loader returns
//! Idle ─────────────► Collecting ─────────────► Dispatching ─────────────► Idle
//!                      ▲     │ load(): join the open window
//!                      └─────┘
//! ```
//!
//! - The first `load` in `Idle` opens a window and schedules its flush
//! - The flush takes the batch and reopens the window immediately, so a
//!   request arriving while a batch is in flight starts the next batch
//! - A window also closes as soon as `max_batch_size` unique keys are queued
//!
//! ## Flush Trigger
//!
//! [`FlushTrigger::NextTick`] yields once to the scheduler before taking the
//! batch: everything submitted in the same scheduling pass is merged and no
//! timer latency is added. Requests straddling two passes may land in two
//! batches. [`FlushTrigger::Delay`] trades latency for wider windows.
//!
//! ## Delivery
//!
//! Every caller gets exactly one value, looked up by key. Keys missing from
//! the loader's map go through `resolve_result` (or `Default`). A failed or
//! panicked loader delivers the fallback to every waiting caller and leaves
//! the fetcher usable.

use crate::ClientError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// When an open window is flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Yield once to the scheduler, then flush
    NextTick,
    /// Wait a fixed delay, then flush
    Delay(Duration),
}

/// Configuration for the batch fetcher
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Unique keys per batch before the window closes early
    pub max_batch_size: usize,
    pub flush: FlushTrigger,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            flush: FlushTrigger::NextTick,
        }
    }
}

/// Observable state of the batch window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Collecting,
    Dispatching,
}

/// Loads a whole batch at once.
///
/// `requests` and `keys` are parallel and hold one entry per unique key.
/// Implementations group by scope themselves; the fetcher knows nothing
/// about projects.
#[async_trait]
pub trait BatchLoader<Req, Res>: Send + Sync {
    async fn load_batch(
        &self,
        requests: Vec<Req>,
        keys: Vec<String>,
    ) -> Result<HashMap<String, Res>, ClientError>;
}

/// Adapter turning an async closure into a [`BatchLoader`]
pub struct FnLoader<F>(F);

#[async_trait]
impl<Req, Res, F, Fut> BatchLoader<Req, Res> for FnLoader<F>
where
    Req: Send + 'static,
    Res: Send + 'static,
    F: Fn(Vec<Req>, Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HashMap<String, Res>, ClientError>> + Send,
{
    async fn load_batch(
        &self,
        requests: Vec<Req>,
        keys: Vec<String>,
    ) -> Result<HashMap<String, Res>, ClientError> {
        (self.0)(requests, keys).await
    }
}

type KeyFn<Req> = Arc<dyn Fn(&Req) -> String + Send + Sync>;
type ResolveFn<Req, Res> = Arc<dyn Fn(&HashMap<String, Res>, &Req, &str) -> Res + Send + Sync>;

/// Statistics for the fetcher
#[derive(Debug, Clone, Default)]
pub struct BatcherStats {
    /// Calls to `load`
    pub total_requests: u64,
    /// Calls that joined an identical key already in the window
    pub deduplicated_requests: u64,
    pub total_batches: u64,
    pub failed_batches: u64,
    /// Average unique keys per batch
    pub avg_batch_size: f64,
    pub avg_batch_latency_ms: f64,
}

#[derive(Debug, Default)]
struct BatcherStatsInternal {
    total_requests: u64,
    deduplicated_requests: u64,
    total_batches: u64,
    failed_batches: u64,
    total_batch_size: u64,
    total_latency_ns: u64,
}

struct PendingBatch<Req, Res> {
    id: u64,
    requests: Vec<Req>,
    keys: Vec<String>,
    waiters: HashMap<String, Vec<oneshot::Sender<Res>>>,
}

impl<Req, Res> PendingBatch<Req, Res> {
    fn new(id: u64) -> Self {
        Self {
            id,
            requests: Vec::new(),
            keys: Vec::new(),
            waiters: HashMap::new(),
        }
    }

    /// Returns true when the key was already queued
    fn add(&mut self, request: Req, key: String, waiter: oneshot::Sender<Res>) -> bool {
        if let Some(senders) = self.waiters.get_mut(&key) {
            senders.push(waiter);
            return true;
        }
        self.waiters.insert(key.clone(), vec![waiter]);
        self.requests.push(request);
        self.keys.push(key);
        false
    }
}

enum WindowState<Req, Res> {
    Idle,
    Collecting(PendingBatch<Req, Res>),
}

struct Shared<Req, Res> {
    config: BatcherConfig,
    serialize_key: KeyFn<Req>,
    resolve_result: Option<ResolveFn<Req, Res>>,
    loader: Arc<dyn BatchLoader<Req, Res>>,
    window: Mutex<WindowState<Req, Res>>,
    next_batch_id: AtomicU64,
    dispatching: AtomicUsize,
    stats: RwLock<BatcherStatsInternal>,
}

/// Decrements the dispatching counter even if the loader panics
struct DispatchGuard<'a>(&'a AtomicUsize);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Counts a batch in the stats once its loader returns or unwinds
struct BatchRecord<'a> {
    stats: &'a RwLock<BatcherStatsInternal>,
    size: usize,
    started: Instant,
    succeeded: bool,
}

impl<'a> BatchRecord<'a> {
    fn new(stats: &'a RwLock<BatcherStatsInternal>, size: usize) -> Self {
        Self {
            stats,
            size,
            started: Instant::now(),
            succeeded: false,
        }
    }
}

impl Drop for BatchRecord<'_> {
    fn drop(&mut self) {
        let mut stats = self.stats.write();
        stats.total_batches += 1;
        stats.total_batch_size += self.size as u64;
        stats.total_latency_ns += self.started.elapsed().as_nanos() as u64;
        if !self.succeeded {
            stats.failed_batches += 1;
        }
    }
}

/// Coalescing batch fetcher. Cheap to clone; clones share one window.
pub struct BatchFetcher<Req, Res> {
    shared: Arc<Shared<Req, Res>>,
}

impl<Req, Res> Clone for BatchFetcher<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Req, Res> BatchFetcher<Req, Res>
where
    Req: Clone + Send + Sync + 'static,
    Res: Clone + Default + Send + 'static,
{
    pub fn new<K, L>(config: BatcherConfig, serialize_key: K, loader: L) -> Self
    where
        K: Fn(&Req) -> String + Send + Sync + 'static,
        L: BatchLoader<Req, Res> + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                config,
                serialize_key: Arc::new(serialize_key),
                resolve_result: None,
                loader: Arc::new(loader),
                window: Mutex::new(WindowState::Idle),
                next_batch_id: AtomicU64::new(1),
                dispatching: AtomicUsize::new(0),
                stats: RwLock::new(BatcherStatsInternal::default()),
            }),
        }
    }

    /// Build from an async closure `(requests, keys) -> Result<map>`
    pub fn from_fn<K, F, Fut>(config: BatcherConfig, serialize_key: K, batch_fn: F) -> Self
    where
        K: Fn(&Req) -> String + Send + Sync + 'static,
        F: Fn(Vec<Req>, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<String, Res>, ClientError>> + Send + 'static,
    {
        Self::new(config, serialize_key, FnLoader(batch_fn))
    }

    /// Fallback for keys the loader's response omits.
    ///
    /// Must be set before the fetcher is cloned or used.
    pub fn with_resolve_result<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&HashMap<String, Res>, &Req, &str) -> Res + Send + Sync + 'static,
    {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.resolve_result = Some(Arc::new(resolve)),
            None => warn!("resolve_result ignored: fetcher already shared"),
        }
        self
    }

    /// Serialized key for a request
    pub fn key_for(&self, request: &Req) -> String {
        (self.shared.serialize_key)(request)
    }

    /// Resolve one request through the current batch window
    pub async fn load(&self, request: Req) -> Res {
        let key = self.key_for(&request);
        match self.enqueue_many(vec![(request, key.clone())]).pop() {
            Some(receiver) => Self::receive(&key, receiver).await,
            None => Res::default(),
        }
    }

    /// Resolve several requests in the same window.
    ///
    /// All requests join the window under one lock, so a flush running on
    /// another worker cannot split them (short of `max_batch_size`).
    pub async fn load_many(&self, requests: Vec<Req>) -> Vec<Res> {
        let keyed: Vec<(Req, String)> = requests
            .into_iter()
            .map(|request| {
                let key = self.key_for(&request);
                (request, key)
            })
            .collect();
        let keys: Vec<String> = keyed.iter().map(|(_, key)| key.clone()).collect();
        let receivers = self.enqueue_many(keyed);

        futures::future::join_all(
            keys.iter()
                .zip(receivers)
                .map(|(key, receiver)| Self::receive(key, receiver)),
        )
        .await
    }

    async fn receive(key: &str, receiver: oneshot::Receiver<Res>) -> Res {
        match receiver.await {
            Ok(value) => value,
            Err(_) => {
                warn!(key = %key, "batch dropped before delivering a result");
                Res::default()
            }
        }
    }

    pub fn phase(&self) -> BatchPhase {
        if matches!(*self.shared.window.lock(), WindowState::Collecting(_)) {
            BatchPhase::Collecting
        } else if self.shared.dispatching.load(Ordering::Acquire) > 0 {
            BatchPhase::Dispatching
        } else {
            BatchPhase::Idle
        }
    }

    pub fn stats(&self) -> BatcherStats {
        let internal = self.shared.stats.read();
        let batches = internal.total_batches;
        BatcherStats {
            total_requests: internal.total_requests,
            deduplicated_requests: internal.deduplicated_requests,
            total_batches: batches,
            failed_batches: internal.failed_batches,
            avg_batch_size: if batches > 0 {
                internal.total_batch_size as f64 / batches as f64
            } else {
                0.0
            },
            avg_batch_latency_ms: if batches > 0 {
                (internal.total_latency_ns as f64 / batches as f64) / 1_000_000.0
            } else {
                0.0
            },
        }
    }

    fn enqueue_many(&self, requests: Vec<(Req, String)>) -> Vec<oneshot::Receiver<Res>> {
        let total = requests.len() as u64;
        let mut receivers = Vec::with_capacity(requests.len());
        let mut opened = Vec::new();
        let mut full = Vec::new();
        let mut duplicates = 0;

        {
            let mut window = self.shared.window.lock();
            for (request, key) in requests {
                let (tx, rx) = oneshot::channel();
                receivers.push(rx);

                if matches!(*window, WindowState::Idle) {
                    let id = self.shared.next_batch_id.fetch_add(1, Ordering::Relaxed);
                    *window = WindowState::Collecting(PendingBatch::new(id));
                    opened.push(id);
                }

                let is_full = match &mut *window {
                    WindowState::Collecting(batch) => {
                        if batch.add(request, key, tx) {
                            duplicates += 1;
                        }
                        batch.keys.len() >= self.shared.config.max_batch_size
                    }
                    WindowState::Idle => false,
                };

                if is_full {
                    if let WindowState::Collecting(batch) =
                        std::mem::replace(&mut *window, WindowState::Idle)
                    {
                        full.push(batch);
                    }
                }
            }
        }

        {
            let mut stats = self.shared.stats.write();
            stats.total_requests += total;
            stats.deduplicated_requests += duplicates;
        }

        for id in opened {
            self.schedule_flush(id);
        }
        for batch in full {
            debug!(batch_id = batch.id, "batch window full, dispatching early");
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.dispatch(batch).await });
        }

        receivers
    }

    fn schedule_flush(&self, batch_id: u64) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            match shared.config.flush {
                FlushTrigger::NextTick => tokio::task::yield_now().await,
                FlushTrigger::Delay(delay) => tokio::time::sleep(delay).await,
            }
            if let Some(batch) = shared.take_window(batch_id) {
                shared.dispatch(batch).await;
            }
        });
    }
}

impl<Req, Res> Shared<Req, Res>
where
    Req: Clone + Send + Sync + 'static,
    Res: Clone + Default + Send + 'static,
{
    /// Close the window if it still holds `batch_id`
    fn take_window(&self, batch_id: u64) -> Option<PendingBatch<Req, Res>> {
        let mut window = self.window.lock();
        let current = matches!(&*window, WindowState::Collecting(batch) if batch.id == batch_id);
        if !current {
            // Already dispatched early because it filled up
            return None;
        }
        match std::mem::replace(&mut *window, WindowState::Idle) {
            WindowState::Collecting(batch) => Some(batch),
            WindowState::Idle => None,
        }
    }

    async fn dispatch(&self, batch: PendingBatch<Req, Res>) {
        self.dispatching.fetch_add(1, Ordering::AcqRel);
        let _guard = DispatchGuard(&self.dispatching);

        let PendingBatch {
            id,
            requests,
            keys,
            mut waiters,
        } = batch;
        let size = keys.len();
        debug!(batch_id = id, size, "dispatching batch");

        // Declared after `waiters` so it records before senders drop on unwind
        let mut record = BatchRecord::new(&self.stats, size);

        let response = match self.loader.load_batch(requests.clone(), keys.clone()).await {
            Ok(map) => {
                record.succeeded = true;
                Some(map)
            }
            Err(e) => {
                warn!(batch_id = id, size, error = %e, "batch load failed, delivering fallbacks");
                None
            }
        };
        drop(record);

        for (request, key) in requests.iter().zip(keys.iter()) {
            let Some(senders) = waiters.remove(key) else {
                continue;
            };
            let value = match &response {
                Some(map) => match map.get(key) {
                    Some(value) => value.clone(),
                    None => self.fallback(map, request, key),
                },
                None => Res::default(),
            };
            for sender in senders {
                // Receiver gone means the caller stopped waiting
                let _ = sender.send(value.clone());
            }
        }
    }

    fn fallback(&self, map: &HashMap<String, Res>, request: &Req, key: &str) -> Res {
        match &self.resolve_result {
            Some(resolve) => resolve(map, request, key),
            None => Res::default(),
        }
    }
}
