use std::sync::atomic::{AtomicI32, Ordering};

/// Identifier correlating one outbound message with at most one reply.
pub type RequestId = i32;

/// Strictly increasing request identifiers for the lifetime of a session.
///
/// Only the sending path calls [`RequestIdAllocator::next`]; anything may read
/// [`RequestIdAllocator::last_issued`] for diagnostics.
#[derive(Debug)]
pub struct RequestIdAllocator {
    first: RequestId,
    next: AtomicI32,
}

impl RequestIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: RequestId) -> Self {
        Self {
            first,
            next: AtomicI32::new(first),
        }
    }

    /// Issues the next identifier.
    pub fn next(&self) -> RequestId {
        self.next.fetch_add(1, Ordering::AcqRel)
    }

    /// Most recently issued identifier, if any has been issued.
    pub fn last_issued(&self) -> Option<RequestId> {
        let next = self.next.load(Ordering::Acquire);
        (next != self.first).then(|| next - 1)
    }
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
