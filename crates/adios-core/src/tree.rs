//! Deadline-ordered index of pending requests.

use crate::request::RequestId;
use std::collections::{BTreeMap, VecDeque};

/// Requests sharing one absolute deadline, FIFO within the group.
#[derive(Debug, Default)]
struct DlGroup {
    rqs: VecDeque<RequestId>,
}

/// Ordered map from absolute deadline (ns) to its request group.
///
/// A group exists exactly while it holds at least one request: it is
/// created on first insert at a deadline and destroyed when the last
/// request leaves.
#[derive(Debug, Default)]
pub(crate) struct DeadlineTree {
    groups: BTreeMap<u64, DlGroup>,
}

impl DeadlineTree {
    /// Append a request to the group at `deadline`, creating it if needed.
    pub(crate) fn insert(&mut self, deadline: u64, rq: RequestId) {
        self.groups.entry(deadline).or_default().rqs.push_back(rq);
    }

    /// Detach a request from its group; the group is erased when emptied.
    ///
    /// Returns whether the request was found.
    pub(crate) fn remove(&mut self, deadline: u64, rq: RequestId) -> bool {
        let Some(group) = self.groups.get_mut(&deadline) else {
            return false;
        };
        let Some(pos) = group.rqs.iter().position(|&id| id == rq) else {
            return false;
        };
        group.rqs.remove(pos);
        if group.rqs.is_empty() {
            self.groups.remove(&deadline);
        }
        true
    }

    /// First request of the earliest-deadline group, without removing it.
    pub(crate) fn peek(&self) -> Option<RequestId> {
        self.groups
            .first_key_value()
            .and_then(|(_, group)| group.rqs.front().copied())
    }

    /// Remove and return the first request of the earliest-deadline group.
    pub(crate) fn pop_first(&mut self) -> Option<RequestId> {
        let mut entry = self.groups.first_entry()?;
        let rq = entry.get_mut().rqs.pop_front();
        if entry.get().rqs.is_empty() {
            entry.remove();
        }
        rq
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
