//! Operation classification.

/// Number of operation classes the scheduler distinguishes.
pub const OP_TYPES: usize = 4;

/// Closed set of operation classes.
///
/// Every per-operation table in the scheduler (latency models, batch
/// limits, latency targets, batch queues) is indexed by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// Read request.
    Read,
    /// Write request.
    Write,
    /// Discard (trim) request.
    Discard,
    /// Anything else (flush, zone ops, ...).
    Other,
}

impl OpType {
    /// All operation classes in dispatch scan order: reads drain first
    /// within a batch page.
    pub const ALL: [OpType; OP_TYPES] = [OpType::Read, OpType::Write, OpType::Discard, OpType::Other];

    /// Index into per-operation tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            OpType::Read => 0,
            OpType::Write => 1,
            OpType::Discard => 2,
            OpType::Other => 3,
        }
    }

    /// Short lowercase name, as used in attribute names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpType::Read => "read",
            OpType::Write => "write",
            OpType::Discard => "discard",
            OpType::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_dense() {
        for (i, op) in OpType::ALL.iter().enumerate() {
            assert_eq!(op.index(), i);
        }
    }

    #[test]
    fn test_scan_order_reads_first() {
        assert_eq!(OpType::ALL[0], OpType::Read);
        assert_eq!(OpType::ALL[1], OpType::Write);
    }

    #[test]
    fn test_names() {
        assert_eq!(OpType::Read.name(), "read");
        assert_eq!(OpType::Write.name(), "write");
        assert_eq!(OpType::Discard.name(), "discard");
        assert_eq!(OpType::Other.name(), "other");
    }
}
