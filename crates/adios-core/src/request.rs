//! Request handles and per-request scheduler metadata.

use crate::optype::OpType;
use rustc_hash::FxHashMap;

/// Opaque handle the host keeps for a prepared request.
///
/// Issued by [`Scheduler::prepare_request`](crate::Scheduler::prepare_request)
/// and valid until [`Scheduler::finish_request`](crate::Scheduler::finish_request).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

/// What the scheduler reads from a host request when it is prepared.
#[derive(Debug, Clone, Copy)]
pub struct RequestDesc {
    /// Operation class.
    pub op: OpType,
    /// Whether a submitter is synchronously waiting on this request.
    pub sync: bool,
    /// Whether the host may merge further bios into this request.
    pub mergeable: bool,
    /// Submission timestamp, monotonic nanoseconds.
    pub start_time_ns: u64,
    /// Total payload length in bytes.
    pub total_bytes: u64,
}

/// How a bio was merged into an existing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// The bio was prepended; the request now starts earlier and its
    /// deadline must be recomputed.
    Front,
    /// The bio was appended; no scheduler state changes.
    Back,
}

/// Per-request scheduler state, owned by the pool from prepare to finish.
#[derive(Debug)]
pub(crate) struct RqData {
    pub(crate) op: OpType,
    pub(crate) mergeable: bool,
    pub(crate) start_time_ns: u64,
    pub(crate) total_bytes: u64,
    /// Set by the host when service begins; zero until then.
    pub(crate) io_start_time_ns: u64,
    /// Absolute deadline chosen at insert, ns.
    pub(crate) deadline: u64,
    /// Model estimate captured at insert, ns.
    pub(crate) pred_lat: u64,
    /// Byte length captured at insert.
    pub(crate) block_size: u64,
    /// Deadline of the group holding this request, `None` when not indexed.
    pub(crate) dl_group: Option<u64>,
}

impl RqData {
    fn new(desc: &RequestDesc) -> Self {
        Self {
            op: desc.op,
            mergeable: desc.mergeable,
            start_time_ns: desc.start_time_ns,
            total_bytes: desc.total_bytes,
            io_start_time_ns: 0,
            deadline: 0,
            pred_lat: 0,
            block_size: 0,
            dl_group: None,
        }
    }
}

/// Id-keyed pool of per-request metadata.
#[derive(Debug, Default)]
pub(crate) struct RequestPool {
    entries: FxHashMap<RequestId, RqData>,
    next_id: u64,
}

impl RequestPool {
    pub(crate) fn insert(&mut self, desc: &RequestDesc) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, RqData::new(desc));
        id
    }

    pub(crate) fn get(&self, id: RequestId) -> Option<&RqData> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: RequestId) -> Option<&mut RqData> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: RequestId) -> Option<RqData> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
