// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The incremental evaluator: parallel traversal, restart protocol,
//! change-pruned invalidation, cycle reporting.
//!
//! Scheduling model: a fixed pool of workers drains a queue of ready nodes.
//! Computations never block on sibling nodes; they return the missing-deps
//! sentinel and are re-enqueued once the keys they asked about resolve.
//! There is no per-node thread and no async runtime; functions are plain
//! calls that either finish or ask to be restarted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;

use crate::env::ComputeEnv;
use crate::error::{NodeError, RequestError};
use crate::events::EventSink;
use crate::node::{Dirt, Node, NodeMap, Phase, RunMode, RunState};
use crate::semaphore::CpuBoundSemaphore;
use crate::spec::{EngineFault, EvalSpec, Step};
use crate::version::Version;

/// Tunables for an [`Evaluator`].
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Worker pool size; `0` resolves to `ANVIL_WORKERS` or the machine's
    /// available parallelism.
    pub workers: usize,
    /// CPU-bound semaphore size; `0` resolves to the worker count.
    pub cpu_heavy_permits: usize,
    /// Release the CPU permit around dependency fetches of heavy functions.
    pub unblock_cpu_work_when_fetching_deps: bool,
    /// Maintain reverse edges so [`Evaluator::invalidate`] works. Disable
    /// only for one-shot evaluations.
    pub keep_edges: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            cpu_heavy_permits: 0,
            unblock_cpu_work_when_fetching_deps: false,
            keep_edges: true,
        }
    }
}

/// Returns the default worker count for an evaluation.
///
/// Precedence:
/// 1. `ANVIL_WORKERS` environment variable (if set and valid)
/// 2. `available_parallelism()`
fn default_worker_count() -> usize {
    if let Ok(val) = std::env::var("ANVIL_WORKERS") {
        if let Ok(n) = val.parse::<usize>() {
            return n.max(1);
        }
    }
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1)
}

// ============================================================================
// Work queue
// ============================================================================

struct QueueInner<K> {
    items: VecDeque<K>,
    active: usize,
    done: bool,
    stalled: bool,
}

/// Ready-node queue shared by the worker pool.
///
/// Stall detection lives here: when a worker goes idle, the queue is empty,
/// and no other worker is mid-node, every path to progress is exhausted, so
/// the run is marked stalled instead of hanging.
struct WorkQueue<K> {
    inner: Mutex<QueueInner<K>>,
    ready: Condvar,
}

impl<K> WorkQueue<K> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                active: 0,
                done: false,
                stalled: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn push(&self, key: K) {
        let mut inner = self.inner.lock();
        inner.items.push_back(key);
        drop(inner);
        self.ready.notify_one();
    }

    fn pop(&self, interrupt: &AtomicBool) -> Option<K> {
        let mut inner = self.inner.lock();
        loop {
            if inner.done {
                return None;
            }
            if interrupt.load(Ordering::Relaxed) {
                inner.done = true;
                drop(inner);
                self.ready.notify_all();
                return None;
            }
            if let Some(key) = inner.items.pop_front() {
                inner.active += 1;
                return Some(key);
            }
            // Timed wait so a pending interrupt is observed promptly.
            let _ = self
                .ready
                .wait_for(&mut inner, Duration::from_millis(10));
        }
    }

    /// Marks one unit of work finished; returns `true` if this exposed a
    /// stall (no queued work, no active workers, run not done).
    fn finish(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.active -= 1;
        if inner.active == 0 && inner.items.is_empty() && !inner.done {
            inner.done = true;
            inner.stalled = true;
            drop(inner);
            self.ready.notify_all();
            return true;
        }
        false
    }

    fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.done = true;
        drop(inner);
        self.ready.notify_all();
    }

    fn was_stalled(&self) -> bool {
        self.inner.lock().stalled
    }
}

// ============================================================================
// Evaluation run context
// ============================================================================

struct RunCtx<'e, S: EvalSpec> {
    spec: &'e S,
    nodes: &'e NodeMap<S>,
    version: Version,
    queue: WorkQueue<S::Key>,
    root: &'e S::Key,
    interrupt: &'e AtomicBool,
    cpu: &'e CpuBoundSemaphore,
    unblock_fetch: bool,
    keep_edges: bool,
    sink: &'e dyn EventSink,
}

impl<S: EvalSpec> RunCtx<'_, S> {
    /// Returns the cell for `key`, creating it if absent. The map shard
    /// guard is dropped before the caller locks the cell, so a node mutex is
    /// never nested inside a shard lock.
    fn cell(&self, key: &S::Key) -> Arc<Mutex<Node<S>>> {
        if let Some(existing) = self.nodes.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.nodes
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Node::new())))
                .value(),
        )
    }

    /// `changed_at` of `key` when its stored outcome is currently usable.
    fn peek(&self, key: &S::Key) -> Option<Version> {
        let cell = self.cell(key);
        let node = cell.lock();
        node.is_usable().then_some(node.changed_at)
    }

    /// Snapshot of the missing deps `key` is suspended on.
    fn waiting_edges(&self, key: &S::Key) -> Vec<S::Key> {
        let cell = self.cell(key);
        let node = cell.lock();
        if node.phase == Phase::Suspended {
            node.run
                .as_ref()
                .map(|r| r.waiting_on.clone())
                .unwrap_or_default()
        } else {
            Vec::new()
        }
    }
}

// ============================================================================
// Worker pool
// ============================================================================

fn worker_loop<S: EvalSpec>(ctx: &RunCtx<'_, S>) {
    loop {
        let Some(key) = ctx.queue.pop(ctx.interrupt) else {
            return;
        };
        process(ctx, &key);
        if ctx.queue.finish() {
            return;
        }
    }
}

fn process<S: EvalSpec>(ctx: &RunCtx<'_, S>, key: &S::Key) {
    let cell = ctx.cell(key);
    let mut node = cell.lock();
    if node.phase != Phase::Queued {
        return;
    }
    if node.dirt.is_none() && node.value.is_some() {
        // Resolved while queued (e.g. as a participant of a cycle failure).
        node.phase = Phase::Finished;
        let waiters = std::mem::take(&mut node.waiters);
        drop(node);
        finish_and_wake(ctx, key, waiters);
        return;
    }
    let verify = node.dirt == Some(Dirt::Verify)
        && node.value.is_some()
        && node.run.as_ref().is_none_or(|r| r.mode == RunMode::Verify);
    if verify {
        verify_deps(ctx, key, &cell, node);
    } else {
        execute(ctx, key, &cell, node);
    }
}

/// Dirty-node dep check: bring recorded deps up to date and re-execute only
/// when one of them actually changed value (early cutoff).
fn verify_deps<S: EvalSpec>(
    ctx: &RunCtx<'_, S>,
    key: &S::Key,
    cell: &Arc<Mutex<Node<S>>>,
    mut node: parking_lot::MutexGuard<'_, Node<S>>,
) {
    node.phase = Phase::Running;
    if node.run.is_none() {
        node.run = Some(RunState::new(RunMode::Verify));
    }
    let recorded = node.deps.clone();
    drop(node);

    let mut missing: Vec<S::Key> = Vec::new();
    let mut changed = false;
    for (dep, stamp) in &recorded {
        match ctx.peek(dep) {
            Some(current) => {
                if current != *stamp {
                    changed = true;
                }
            }
            None => missing.push(dep.clone()),
        }
    }

    if changed {
        // A dep changed value; the memoized result is gone for good.
        let mut node = cell.lock();
        node.dirt = Some(Dirt::Execute);
        node.run = Some(RunState::new(RunMode::Execute));
        node.phase = Phase::Queued;
        drop(node);
        ctx.queue.push(key.clone());
        return;
    }
    if !missing.is_empty() {
        suspend(ctx, key, cell, missing);
        return;
    }

    // Every recorded dep is unchanged: the node is clean as-is.
    let mut node = cell.lock();
    node.dirt = None;
    node.run = None;
    node.phase = Phase::Finished;
    let waiters = std::mem::take(&mut node.waiters);
    drop(node);
    finish_and_wake(ctx, key, waiters);
}

fn execute<S: EvalSpec>(
    ctx: &RunCtx<'_, S>,
    key: &S::Key,
    cell: &Arc<Mutex<Node<S>>>,
    mut node: parking_lot::MutexGuard<'_, Node<S>>,
) {
    node.phase = Phase::Running;
    if node.run.as_ref().is_none_or(|r| r.mode != RunMode::Execute) {
        node.run = Some(RunState::new(RunMode::Execute));
    }
    let scratch = node.run.as_mut().and_then(|r| r.scratch.take());
    drop(node);

    let heavy = ctx.spec.is_cpu_heavy(key);
    let permit = heavy.then(|| ctx.cpu.acquire());
    let unblock = (heavy && ctx.unblock_fetch).then_some(ctx.cpu);
    let mut env = ComputeEnv::new(ctx.nodes, scratch, unblock);
    let step = ctx.spec.compute(key, &mut env);
    drop(permit);
    let record = env.into_outcome();

    let mut node = cell.lock();
    if let Some(run) = node.run.as_mut() {
        run.scratch = record.scratch;
        run.record_requests(record.requested);
    }

    match step {
        Step::Done(value) => complete(ctx, key, node, Ok(value), &record.events),
        Step::Failed(error) => complete(ctx, key, node, Err(error), &record.events),
        Step::Restart => {
            if record.missing.is_empty() {
                let error = ctx
                    .spec
                    .fault_error(EngineFault::RestartWithoutMissingDeps(key));
                complete(ctx, key, node, Err(error), &record.events);
            } else {
                // Events from a restarted activation are dropped; the
                // function replays its buffer on the run that completes.
                drop(node);
                suspend(ctx, key, cell, record.missing);
            }
        }
    }
}

/// Stores an outcome, updates edges and stamps, wakes waiters.
fn complete<S: EvalSpec>(
    ctx: &RunCtx<'_, S>,
    key: &S::Key,
    mut node: parking_lot::MutexGuard<'_, Node<S>>,
    result: Result<S::Value, NodeError<S::Cause>>,
    events: &crate::events::StoredEvents,
) {
    events.replay_to(ctx.sink);

    let run = node.run.take();
    let new_deps: Vec<(S::Key, Version)> = run
        .map(|r| {
            r.deps
                .into_iter()
                .filter_map(|(k, stamp)| stamp.map(|s| (k, s)))
                .collect()
        })
        .unwrap_or_default();
    let old_deps: Vec<S::Key> = node.deps.iter().map(|(k, _)| k.clone()).collect();

    let changed = node.value.as_ref() != Some(&result);
    node.value = Some(result);
    if changed {
        node.changed_at = ctx.version;
    }
    node.deps = new_deps.clone();
    node.dirt = None;
    node.phase = Phase::Finished;
    let waiters = std::mem::take(&mut node.waiters);
    drop(node);

    if ctx.keep_edges {
        let new_set: FxHashSet<&S::Key> = new_deps.iter().map(|(k, _)| k).collect();
        for dep in old_deps.iter().filter(|d| !new_set.contains(*d)) {
            let dcell = ctx.cell(dep);
            dcell.lock().rdeps.remove(key);
        }
        for (dep, _) in &new_deps {
            let dcell = ctx.cell(dep);
            dcell.lock().rdeps.insert(key.clone());
        }
    }

    finish_and_wake(ctx, key, waiters);
}

fn finish_and_wake<S: EvalSpec>(ctx: &RunCtx<'_, S>, key: &S::Key, waiters: Vec<S::Key>) {
    for waiter in waiters {
        let wcell = ctx.cell(&waiter);
        let mut wnode = wcell.lock();
        if wnode.phase != Phase::Suspended {
            continue;
        }
        let ready = match wnode.run.as_mut() {
            Some(run) => {
                if let Some(pos) = run.waiting_on.iter().position(|k| k == key) {
                    run.waiting_on.swap_remove(pos);
                    run.pending -= 1;
                }
                run.pending == 0
            }
            None => false,
        };
        if ready {
            wnode.phase = Phase::Queued;
            drop(wnode);
            ctx.queue.push(waiter);
        }
    }
    if key == ctx.root {
        ctx.queue.shutdown();
    }
}

/// Parks `key` until `missing` resolve, scheduling whichever of them are not
/// already in flight. Cycle detection runs after registration so that two
/// nodes suspending on each other concurrently cannot both slip past it.
fn suspend<S: EvalSpec>(
    ctx: &RunCtx<'_, S>,
    key: &S::Key,
    cell: &Arc<Mutex<Node<S>>>,
    missing: Vec<S::Key>,
) {
    {
        let mut node = cell.lock();
        node.phase = Phase::Suspended;
        if let Some(run) = node.run.as_mut() {
            run.waiting_on = missing.clone();
            run.pending = missing.len();
        }
    }

    let mut satisfied: FxHashSet<S::Key> = FxHashSet::default();
    for dep in &missing {
        let dcell = ctx.cell(dep);
        let mut dnode = dcell.lock();
        if dnode.is_usable() {
            satisfied.insert(dep.clone());
            continue;
        }
        dnode.waiters.push(key.clone());
        if matches!(dnode.phase, Phase::New | Phase::Finished) {
            dnode.phase = Phase::Queued;
            drop(dnode);
            ctx.queue.push(dep.clone());
        }
    }

    if !satisfied.is_empty() {
        let mut node = cell.lock();
        if node.phase == Phase::Suspended {
            let ready = match node.run.as_mut() {
                Some(run) => {
                    run.waiting_on.retain(|k| !satisfied.contains(k));
                    run.pending = run.waiting_on.len();
                    run.pending == 0
                }
                None => false,
            };
            if ready {
                node.phase = Phase::Queued;
                drop(node);
                ctx.queue.push(key.clone());
            }
        }
    }

    if let Some(participants) = find_cycle(ctx, key) {
        fail_cycle(ctx, &participants);
    }
}

/// Walks in-flight waiting edges looking for a path from `start` back to
/// itself. Returns the participants in discovery order.
fn find_cycle<S: EvalSpec>(ctx: &RunCtx<'_, S>, start: &S::Key) -> Option<Vec<S::Key>> {
    let mut path: Vec<S::Key> = vec![start.clone()];
    let mut frontier: Vec<Vec<S::Key>> = vec![ctx.waiting_edges(start)];
    let mut visited: FxHashSet<S::Key> = FxHashSet::default();
    visited.insert(start.clone());

    while let Some(edges) = frontier.last_mut() {
        if let Some(next) = edges.pop() {
            if next == *start {
                return Some(path);
            }
            if visited.insert(next.clone()) {
                frontier.push(ctx.waiting_edges(&next));
                path.push(next);
            }
        } else {
            frontier.pop();
            path.pop();
        }
    }
    None
}

/// Fails every cycle participant with one shared `Cycle` error and wakes
/// anything waiting on them.
fn fail_cycle<S: EvalSpec>(ctx: &RunCtx<'_, S>, participants: &[S::Key]) {
    let error = ctx.spec.fault_error(EngineFault::Cycle(participants));
    for key in participants {
        let cell = ctx.cell(key);
        let mut node = cell.lock();
        if node.is_usable() {
            continue;
        }
        node.value = Some(Err(error.clone()));
        node.changed_at = ctx.version;
        node.dirt = None;
        node.run = None;
        node.deps.clear();
        node.phase = Phase::Finished;
        let waiters = std::mem::take(&mut node.waiters);
        drop(node);
        finish_and_wake(ctx, key, waiters);
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Keyed, incremental, concurrent evaluation graph.
///
/// Owns the node table, the graph version, the CPU-bound semaphore, and the
/// interrupt flag. One evaluation (a [`Evaluator::request`] call) runs at a
/// time; the worker pool inside it is the concurrency surface.
pub struct Evaluator<S: EvalSpec> {
    spec: Arc<S>,
    nodes: NodeMap<S>,
    version: Version,
    options: EvalOptions,
    cpu: CpuBoundSemaphore,
    interrupt: Arc<AtomicBool>,
    sink: Arc<dyn EventSink>,
}

impl<S: EvalSpec> Evaluator<S> {
    /// Builds an evaluator over `spec`, delivering clean-completion events
    /// to `sink`.
    #[must_use]
    pub fn new(spec: Arc<S>, options: EvalOptions, sink: Arc<dyn EventSink>) -> Self {
        let workers = if options.workers == 0 {
            default_worker_count()
        } else {
            options.workers
        };
        let permits = if options.cpu_heavy_permits == 0 {
            workers
        } else {
            options.cpu_heavy_permits
        };
        Self {
            spec,
            nodes: NodeMap::<S>::default(),
            version: Version::FIRST,
            options: EvalOptions { workers, ..options },
            cpu: CpuBoundSemaphore::new(permits),
            interrupt: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    /// The domain spec driving this evaluator.
    #[must_use]
    pub fn spec(&self) -> &S {
        &self.spec
    }

    /// Current graph version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Handle for requesting cancellation from another thread.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Computes `key` and its transitive dependencies in parallel.
    ///
    /// Values already computed and not invalidated are served from the
    /// graph without recomputation.
    pub fn request(&mut self, key: &S::Key) -> Result<S::Value, RequestError<S::Cause>> {
        self.interrupt.store(false, Ordering::Relaxed);
        self.reset_in_flight();

        if let Some(outcome) = self.lookup(key) {
            return outcome.map_err(RequestError::Failed);
        }

        let span = tracing::debug_span!(target: "anvil", "request", version = self.version.value());
        let _guard = span.enter();

        let ctx = RunCtx {
            spec: &*self.spec,
            nodes: &self.nodes,
            version: self.version,
            queue: WorkQueue::new(),
            root: key,
            interrupt: &self.interrupt,
            cpu: &self.cpu,
            unblock_fetch: self.options.unblock_cpu_work_when_fetching_deps,
            keep_edges: self.options.keep_edges,
            sink: &*self.sink,
        };
        {
            let cell = ctx.cell(key);
            let mut node = cell.lock();
            node.phase = Phase::Queued;
            drop(node);
            ctx.queue.push(key.clone());
        }

        std::thread::scope(|s| {
            for _ in 0..self.options.workers {
                s.spawn(|| worker_loop(&ctx));
            }
        });

        if self.interrupt.load(Ordering::Relaxed) {
            self.reset_in_flight();
            return Err(RequestError::Interrupted);
        }
        if ctx.queue.was_stalled() {
            let error = self.spec.fault_error(EngineFault::Stalled(key));
            return Err(RequestError::Failed(error));
        }
        match self.lookup(key) {
            Some(outcome) => outcome.map_err(RequestError::Failed),
            None => Err(RequestError::Failed(
                self.spec.fault_error(EngineFault::Stalled(key)),
            )),
        }
    }

    /// Marks the transitive reverse closure of `changed` dirty.
    ///
    /// The changed keys themselves re-execute unconditionally on next
    /// request; everything downstream is change-pruned: a dirty node whose
    /// recomputed deps all kept their values is marked clean without
    /// re-executing, and a re-execution that reproduces the old value keeps
    /// the old change stamp so its own reverse deps stay clean.
    ///
    /// An empty `changed` set is a no-op.
    pub fn invalidate(&mut self, changed: &[S::Key]) {
        if changed.is_empty() {
            return;
        }
        self.version = self.version.next();

        let mut visited: FxHashSet<S::Key> = FxHashSet::default();
        let mut stack: Vec<S::Key> = Vec::new();

        for key in changed {
            let Some(cell) = self.nodes.get(key).map(|c| Arc::clone(c.value())) else {
                continue;
            };
            if !visited.insert(key.clone()) {
                continue;
            }
            let mut node = cell.lock();
            if node.value.is_some() {
                node.dirt = Some(Dirt::Execute);
            }
            stack.extend(node.rdeps.iter().cloned());
        }

        while let Some(key) = stack.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            let Some(cell) = self.nodes.get(&key).map(|c| Arc::clone(c.value())) else {
                continue;
            };
            let mut node = cell.lock();
            if node.value.is_some() && node.dirt.is_none() {
                node.dirt = Some(Dirt::Verify);
            }
            stack.extend(node.rdeps.iter().cloned());
        }
    }

    /// Returns the stored outcome for `key` when it is currently valid.
    #[must_use]
    pub fn lookup(&self, key: &S::Key) -> Option<Result<S::Value, NodeError<S::Cause>>> {
        let cell = self.nodes.get(key)?;
        let node = cell.lock();
        if node.is_usable() {
            node.value.clone()
        } else {
            None
        }
    }

    /// Dependencies recorded by `key`'s last completed run.
    #[must_use]
    pub fn dependencies_of(&self, key: &S::Key) -> Option<Vec<S::Key>> {
        let cell = self.nodes.get(key)?;
        let node = cell.lock();
        Some(node.deps.iter().map(|(k, _)| k.clone()).collect())
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Drops every node not reachable from `roots` through recorded deps.
    ///
    /// This backs the lifecycle rule that loader-produced values are
    /// garbage-collected once no reachable node depends on them.
    pub fn retain_reachable(&mut self, roots: &[S::Key]) {
        let mut keep: FxHashSet<S::Key> = FxHashSet::default();
        let mut stack: Vec<S::Key> = roots.to_vec();
        while let Some(key) = stack.pop() {
            if !keep.insert(key.clone()) {
                continue;
            }
            if let Some(cell) = self.nodes.get(&key) {
                let node = cell.lock();
                stack.extend(node.deps.iter().map(|(k, _)| k.clone()));
            }
        }
        self.nodes.retain(|key, _| keep.contains(key));
        for entry in self.nodes.iter() {
            let mut node = entry.value().lock();
            node.rdeps.retain(|r| keep.contains(r));
        }
    }

    fn reset_in_flight(&mut self) {
        for entry in self.nodes.iter() {
            let mut node = entry.value().lock();
            if node.run.is_some()
                || !matches!(node.phase, Phase::New | Phase::Finished)
                || !node.waiters.is_empty()
            {
                node.reset_in_flight();
            }
        }
    }
}

impl<S: EvalSpec> core::fmt::Debug for Evaluator<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Evaluator")
            .field("nodes", &self.nodes.len())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
