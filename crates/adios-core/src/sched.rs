//! The scheduler: hook surface, batch dispatch, refill.
//!
//! Lock order, outermost first: batch-queue lock, deadline-tree lock,
//! priority-queue lock, request pool, model parameter lock, model bucket
//! lock. Refill runs with the batch-queue lock held and takes the tree
//! lock inside it; no path acquires against this order. None of the
//! locks are held across blocking operations.

use crate::batch::BatchQueues;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::model::LatencyModel;
use crate::optype::{OpType, OP_TYPES};
use crate::request::{MergeKind, RequestDesc, RequestId, RequestPool};
use crate::timer::UpdateTimer;
use crate::tree::DeadlineTree;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Bio summary handed through [`Scheduler::bio_merge`].
#[derive(Debug, Clone, Copy)]
pub struct BioDesc {
    /// Operation class of the bio.
    pub op: OpType,
    /// Payload length in bytes.
    pub total_bytes: u64,
}

/// Outcome of a host bio-merge attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct BioMergeOutcome {
    /// Whether the bio was absorbed into an existing request.
    pub merged: bool,
    /// A request the merge made redundant, to be freed by the host.
    pub free: Option<RequestId>,
}

/// Merge primitives provided by the surrounding I/O stack.
///
/// The scheduler never touches bio payloads itself; it asks the host to
/// attempt merges and keeps the host's merge lookup structures informed
/// as requests enter and leave the deadline index. Every method defaults
/// to a no-op so hosts without merging can pass [`NoMerge`].
pub trait MergeHost {
    /// Try to merge the request into one already queued. Returns true
    /// when the request was absorbed and must not be queued itself.
    fn try_insert_merge(&self, rq: RequestId) -> bool {
        let _ = rq;
        false
    }

    /// Try to merge a bio into a queued request. Called with the
    /// deadline index locked.
    fn try_bio_merge(&self, bio: &BioDesc) -> BioMergeOutcome {
        let _ = bio;
        BioMergeOutcome::default()
    }

    /// A mergeable request became a merge candidate.
    fn hash_add(&self, rq: RequestId) {
        let _ = rq;
    }

    /// A request is no longer a merge candidate; the host must also drop
    /// any cached last-merge pointer to it.
    fn hash_remove(&self, rq: RequestId) {
        let _ = rq;
    }

    /// Release a request made redundant by a merge.
    fn free_request(&self, rq: RequestId) {
        let _ = rq;
    }
}

/// Host with no merging support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMerge;

impl MergeHost for NoMerge {}

/// Observable per-request scheduling state.
#[derive(Debug, Clone, Copy)]
pub struct RequestSnapshot {
    /// Operation class.
    pub op: OpType,
    /// Absolute deadline chosen at insert, ns. Zero before insert.
    pub deadline: u64,
    /// Predicted service latency captured at insert, ns.
    pub pred_lat: u64,
    /// Byte length captured at insert.
    pub block_size: u64,
}

/// Adaptive-deadline I/O scheduler.
///
/// Orders pending requests by an adaptive per-request deadline, learns
/// the device's service-time behavior from completions, and serves
/// dispatch from a double-buffered batch queue refilled under learned
/// batch caps and a global predicted-latency window.
///
/// All hooks take `&self`; the scheduler is safe to share across
/// submitter threads and completion contexts.
#[derive(Debug)]
pub struct Scheduler {
    bq: Mutex<BatchQueues>,
    tree: Mutex<DeadlineTree>,
    pq: Mutex<VecDeque<RequestId>>,
    pool: Mutex<RequestPool>,
    models: Arc<[LatencyModel; OP_TYPES]>,
    timer: UpdateTimer,

    /// Sum of predicted latency over requests held in batch pages.
    total_pred_lat: AtomicU64,
    latency_window: AtomicU64,
    refill_below_ratio: AtomicU32,
    latency_target: [AtomicU64; OP_TYPES],
    batch_limit: [AtomicU32; OP_TYPES],
    async_depth: AtomicU32,
    update_delay: Duration,
}

impl Scheduler {
    /// Create a scheduler with default tunables.
    #[must_use]
    pub fn new() -> Self {
        Self::build(SchedulerConfig::default())
    }

    /// Create a scheduler from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] if the configuration
    /// fails validation.
    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SchedulerConfig) -> Self {
        let models: Arc<[LatencyModel; OP_TYPES]> = Arc::new(std::array::from_fn(|_| {
            LatencyModel::with_interval(config.update_interval)
        }));
        let timer_models = Arc::clone(&models);
        let timer = UpdateTimer::spawn(move || {
            for model in timer_models.iter() {
                model.update();
            }
        });

        Self {
            bq: Mutex::new(BatchQueues::default()),
            tree: Mutex::new(DeadlineTree::default()),
            pq: Mutex::new(VecDeque::new()),
            pool: Mutex::new(RequestPool::default()),
            models,
            timer,
            total_pred_lat: AtomicU64::new(0),
            latency_window: AtomicU64::new(config.latency_window),
            refill_below_ratio: AtomicU32::new(config.refill_below_ratio),
            latency_target: std::array::from_fn(|i| AtomicU64::new(config.latency_target[i])),
            batch_limit: std::array::from_fn(|i| AtomicU32::new(config.batch_limit[i])),
            async_depth: AtomicU32::new(0),
            update_delay: config.update_delay,
        }
    }

    // ------------------------------------------------------------------
    // Request lifecycle
    // ------------------------------------------------------------------

    /// Attach scheduler metadata to a new host request.
    pub fn prepare_request(&self, desc: &RequestDesc) -> RequestId {
        self.pool.lock().insert(desc)
    }

    /// Queue one prepared request.
    ///
    /// Head insertion bypasses the deadline index entirely; otherwise
    /// the host is offered an insert merge first, and on failure the
    /// request lands in the index under its computed deadline.
    pub fn insert_request(&self, rq: RequestId, at_head: bool, host: &dyn MergeHost) {
        let mut tree = self.tree.lock();
        self.insert_locked(&mut tree, rq, at_head, host);
    }

    /// Queue a batch of prepared requests under one tree lock.
    pub fn insert_requests<I>(&self, rqs: I, at_head: bool, host: &dyn MergeHost)
    where
        I: IntoIterator<Item = RequestId>,
    {
        let mut tree = self.tree.lock();
        for rq in rqs {
            self.insert_locked(&mut tree, rq, at_head, host);
        }
    }

    fn insert_locked(
        &self,
        tree: &mut DeadlineTree,
        rq: RequestId,
        at_head: bool,
        host: &dyn MergeHost,
    ) {
        if at_head {
            self.pq.lock().push_back(rq);
            return;
        }
        if host.try_insert_merge(rq) {
            return;
        }
        if self.add_to_tree(tree, rq) {
            host.hash_add(rq);
        }
    }

    /// Compute deadline and prediction for a request and index it.
    /// Returns whether the request is a merge candidate.
    fn add_to_tree(&self, tree: &mut DeadlineTree, rq: RequestId) -> bool {
        let (deadline, mergeable) = {
            let mut pool = self.pool.lock();
            let Some(rd) = pool.get_mut(rq) else {
                // Metadata allocation failed at prepare; the request is
                // the host's to retry or complete without scheduling.
                warn!(?rq, "insert for a request without metadata");
                return false;
            };
            rd.block_size = rd.total_bytes;
            let op = rd.op;
            rd.pred_lat = self.models[op.index()].predict(rd.block_size);
            rd.deadline = rd.start_time_ns
                + self.latency_target[op.index()].load(Ordering::Relaxed)
                + rd.pred_lat;
            rd.dl_group = Some(rd.deadline);
            (rd.deadline, rd.mergeable)
        };
        tree.insert(deadline, rq);
        mergeable
    }

    /// Detach a request from the deadline index and the host's merge
    /// structures.
    fn remove_from_tree(&self, tree: &mut DeadlineTree, rq: RequestId, host: &dyn MergeHost) {
        let group = {
            let mut pool = self.pool.lock();
            pool.get_mut(rq).and_then(|rd| rd.dl_group.take())
        };
        if let Some(deadline) = group {
            tree.remove(deadline, rq);
        }
        host.hash_remove(rq);
    }

    /// A bio was merged into `rq`.
    ///
    /// A front merge moves the request's start and length, so it is
    /// repositioned in the index under a freshly computed deadline. Back
    /// merges leave the scheduling state untouched.
    pub fn request_merged(&self, rq: RequestId, kind: MergeKind, total_bytes: u64) {
        if kind == MergeKind::Back {
            return;
        }
        let mut tree = self.tree.lock();
        let group = {
            let mut pool = self.pool.lock();
            let Some(rd) = pool.get_mut(rq) else {
                return;
            };
            rd.total_bytes = total_bytes;
            rd.dl_group.take()
        };
        let Some(deadline) = group else {
            warn!(?rq, "front merge for a request not in the deadline index");
            return;
        };
        tree.remove(deadline, rq);
        self.add_to_tree(&mut tree, rq);
    }

    /// `next` was absorbed into `rq`; drop `next` from the scheduler.
    pub fn merged_requests(&self, rq: RequestId, next: RequestId, host: &dyn MergeHost) {
        let _ = rq; // the surviving request keeps its position
        let mut tree = self.tree.lock();
        self.remove_from_tree(&mut tree, next, host);
    }

    /// Offer a bio to the host's merge primitive under the index lock.
    ///
    /// Frees any request the host reports as made redundant. Returns
    /// whether the bio was absorbed.
    pub fn bio_merge(&self, host: &dyn MergeHost, bio: &BioDesc) -> bool {
        let outcome = {
            let _tree = self.tree.lock();
            host.try_bio_merge(bio)
        };
        if let Some(free) = outcome.free {
            host.free_request(free);
        }
        outcome.merged
    }

    /// Record the start of service for a dispatched request.
    pub fn start_io(&self, rq: RequestId, now_ns: u64) {
        if let Some(rd) = self.pool.lock().get_mut(rq) {
            rd.io_start_time_ns = now_ns;
        }
    }

    /// Feed a completion back into the latency model.
    ///
    /// Discharges the request's predicted latency from the outstanding
    /// total, and when both a service start timestamp and a block size
    /// were captured, turns the measured service time into a model
    /// sample and arms a near-term model recomputation.
    pub fn completed_request(&self, rq: RequestId, now_ns: u64) {
        let data = {
            let pool = self.pool.lock();
            pool.get(rq)
                .map(|rd| (rd.op, rd.block_size, rd.pred_lat, rd.io_start_time_ns))
        };
        let Some((op, block_size, pred_lat, io_start)) = data else {
            return;
        };

        self.total_pred_lat.fetch_sub(pred_lat, Ordering::Relaxed);

        if io_start == 0 || block_size == 0 {
            return;
        }
        let latency = now_ns.saturating_sub(io_start);
        self.models[op.index()].input(block_size, latency, pred_lat);
        self.timer.schedule_in(self.update_delay);
    }

    /// Release a request's scheduler metadata.
    pub fn finish_request(&self, rq: RequestId) {
        self.pool.lock().remove(rq);
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Select the next request to hand to the hardware.
    ///
    /// Head-inserted requests always go first; otherwise the active
    /// batch page is drained, refilling and flipping pages as the
    /// outstanding predicted latency runs low.
    pub fn dispatch_request(&self, host: &dyn MergeHost) -> Option<RequestId> {
        if let Some(rq) = self.pq.lock().pop_front() {
            return Some(rq);
        }
        self.dispatch_from_bq(host)
    }

    fn dispatch_from_bq(&self, host: &dyn MergeHost) -> Option<RequestId> {
        let mut bq = self.bq.lock();

        let tpl = self.total_pred_lat.load(Ordering::Relaxed);
        let window = self.latency_window.load(Ordering::Relaxed);
        let ratio = u64::from(self.refill_below_ratio.load(Ordering::Relaxed));
        if !bq.more_ready() && (tpl == 0 || tpl < window * ratio / 100) {
            self.fill_batch_queues(&mut bq, tpl, host);
        }

        loop {
            if let Some(rq) = bq.pop_active() {
                return Some(rq);
            }
            if !bq.more_ready() {
                return None;
            }
            bq.flip();
        }
    }

    /// Stage deadline-ordered requests into the inactive page.
    ///
    /// Takes the earliest request unconditionally, then keeps going until
    /// a class's model is cold, a class's batch limit fills up, or the
    /// staged predicted latency would overrun the window.
    fn fill_batch_queues(
        &self,
        bq: &mut BatchQueues,
        start_lat: u64,
        host: &dyn MergeHost,
    ) -> bool {
        let page = bq.inactive_page();
        bq.reset_page(page);

        let window = self.latency_window.load(Ordering::Relaxed);
        let mut current_lat = start_lat;
        let mut count: u32 = 0;
        let mut per_op = [0u32; OP_TYPES];

        {
            let mut tree = self.tree.lock();
            loop {
                let Some(rq) = tree.peek() else { break };

                let info = {
                    let pool = self.pool.lock();
                    pool.get(rq).map(|rd| (rd.op, rd.pred_lat))
                };
                let Some((op, pred_lat)) = info else {
                    warn!(?rq, "indexed request without metadata, dropping");
                    tree.pop_first();
                    continue;
                };

                current_lat += pred_lat;
                if count > 0
                    && (self.models[op.index()].base() == 0
                        || bq.count(page, op) >= self.batch_limit[op.index()].load(Ordering::Relaxed)
                        || current_lat > window)
                {
                    break;
                }

                tree.pop_first();
                {
                    let mut pool = self.pool.lock();
                    if let Some(rd) = pool.get_mut(rq) {
                        rd.dl_group = None;
                    }
                }
                host.hash_remove(rq);

                bq.push(page, op, rq);
                self.total_pred_lat.fetch_add(pred_lat, Ordering::Relaxed);
                per_op[op.index()] += 1;
                count += 1;
            }
        }

        if count > 0 {
            bq.set_more_ready();
            bq.record_high_water(&per_op, count);
        }
        count > 0
    }

    /// Whether any request is queued anywhere in the scheduler.
    #[must_use]
    pub fn has_work(&self) -> bool {
        if !self.pq.lock().is_empty() {
            return true;
        }
        {
            let bq = self.bq.lock();
            if bq.has_pending_active() || bq.more_ready() {
                return true;
            }
        }
        !self.tree.lock().is_empty()
    }

    // ------------------------------------------------------------------
    // Depth limiting
    // ------------------------------------------------------------------

    /// The host's request pool size changed.
    pub fn depth_updated(&self, nr_requests: u32) {
        self.async_depth.store(nr_requests, Ordering::Relaxed);
    }

    /// Allocation cap for a request about to be allocated by the host.
    ///
    /// Synchronous reads are never throttled; everything else is capped
    /// at the async depth so read capacity stays reserved.
    #[must_use]
    pub fn limit_depth(&self, op: OpType, is_sync: bool) -> Option<u32> {
        if is_sync && op != OpType::Write {
            return None;
        }
        Some(self.async_depth.load(Ordering::Relaxed))
    }

    /// Current async depth cap.
    #[must_use]
    pub fn async_depth(&self) -> u32 {
        self.async_depth.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Introspection and tuning
    // ------------------------------------------------------------------

    /// Learned `(base, slope)` of one operation class.
    #[must_use]
    pub fn model_params(&self, op: OpType) -> (u64, u64) {
        let model = &self.models[op.index()];
        (model.base(), model.slope())
    }

    /// Force a recomputation of all latency models.
    ///
    /// The same path the update timer drives; useful for hosts that
    /// want model output at a specific point.
    pub fn update_models(&self) {
        for model in self.models.iter() {
            model.update();
        }
    }

    /// Observable scheduling state of a request, if still tracked.
    #[must_use]
    pub fn request_snapshot(&self, rq: RequestId) -> Option<RequestSnapshot> {
        let pool = self.pool.lock();
        pool.get(rq).map(|rd| RequestSnapshot {
            op: rd.op,
            deadline: rd.deadline,
            pred_lat: rd.pred_lat,
            block_size: rd.block_size,
        })
    }

    /// Sum of predicted latency over requests staged in batch pages, ns.
    #[must_use]
    pub fn total_pred_lat(&self) -> u64 {
        self.total_pred_lat.load(Ordering::Relaxed)
    }

    /// Number of requests with live metadata (prepared, not yet finished).
    #[must_use]
    pub fn tracked_requests(&self) -> usize {
        self.pool.lock().len()
    }

    /// Predicted-latency budget for one refill, ns.
    #[must_use]
    pub fn latency_window(&self) -> u64 {
        self.latency_window.load(Ordering::Relaxed)
    }

    /// Set the refill latency budget.
    pub fn set_latency_window(&self, window_ns: u64) {
        self.latency_window.store(window_ns, Ordering::Relaxed);
    }

    /// Current refill trigger ratio, percent.
    #[must_use]
    pub fn refill_below_ratio(&self) -> u32 {
        self.refill_below_ratio.load(Ordering::Relaxed)
    }

    /// Set the refill trigger ratio.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] when the ratio exceeds 100.
    pub fn set_refill_below_ratio(&self, ratio: u32) -> Result<()> {
        if ratio > 100 {
            return Err(crate::Error::InvalidConfig(
                "refill_below_ratio must be within 0..=100".to_string(),
            ));
        }
        self.refill_below_ratio.store(ratio, Ordering::Relaxed);
        Ok(())
    }

    /// Latency target of one operation class, ns.
    #[must_use]
    pub fn latency_target(&self, op: OpType) -> u64 {
        self.latency_target[op.index()].load(Ordering::Relaxed)
    }

    /// Set an operation's latency target.
    ///
    /// Also forgets that class's learned base: deadlines derived from
    /// the old target would bias the relearning.
    pub fn set_latency_target(&self, op: OpType, target_ns: u64) {
        self.models[op.index()].reset_base();
        self.latency_target[op.index()].store(target_ns, Ordering::Relaxed);
    }

    /// Batch limit of one operation class.
    #[must_use]
    pub fn batch_limit(&self, op: OpType) -> u32 {
        self.batch_limit[op.index()].load(Ordering::Relaxed)
    }

    /// Set an operation's batch limit.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] when the limit is zero.
    pub fn set_batch_limit(&self, op: OpType, limit: u32) -> Result<()> {
        if limit == 0 {
            return Err(crate::Error::InvalidConfig(
                "batch limits must be > 0".to_string(),
            ));
        }
        self.batch_limit[op.index()].store(limit, Ordering::Relaxed);
        Ok(())
    }

    /// Observed batch maxima: (total, per class).
    #[must_use]
    pub fn batch_actual_max(&self) -> (u32, [u32; OP_TYPES]) {
        self.bq.lock().high_water()
    }

    /// Clear the observed batch maxima.
    pub fn reset_bq_stats(&self) {
        self.bq.lock().reset_high_water();
    }

    /// Zero every latency model's parameters and aggregates.
    pub fn reset_latency_models(&self) {
        for model in self.models.iter() {
            model.reset();
        }
    }

    /// Tear the scheduler down: stop the update timer and verify no
    /// bypass requests were left behind.
    pub fn shutdown(&self) {
        self.timer.shutdown();
        if !self.pq.lock().is_empty() {
            warn!("scheduler shut down with head-inserted requests still queued");
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
