//! Handlers waiting on replies.
//!
//! The [`PendingRegistry`] holds one [`PendingEntry`] per outstanding request. An entry
//! leaves the registry exactly once: either when its reply is delivered, when the write
//! carrying its request fails, or when the session is torn down. Teardown drops entries
//! without calling their handlers.
use std::{collections::HashMap, fmt};

use super::{OutboundMessage, RequestId, SessionError};

/// Completion callback for one request. Runs on the session's receive thread.
pub type ReplyHandler<R> = Box<dyn FnOnce(R) + Send + 'static>;

pub struct PendingEntry<M, R> {
    pub handler: ReplyHandler<R>,
    pub request: OutboundMessage<M>,
}

impl<M, R> PendingEntry<M, R> {
    /// Hands the reply to the waiting handler.
    pub fn complete(self, reply: R) {
        (self.handler)(reply)
    }
}

impl<M: fmt::Debug, R> fmt::Debug for PendingEntry<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEntry")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

pub struct PendingRegistry<M, R> {
    entries: HashMap<RequestId, PendingEntry<M, R>>,
}

impl<M, R> PendingRegistry<M, R> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registers `handler` against the request's identifier.
    pub fn register(
        &mut self,
        handler: ReplyHandler<R>,
        request: OutboundMessage<M>,
    ) -> Result<(), SessionError> {
        let id = request.request_id();
        if self.entries.contains_key(&id) {
            return Err(SessionError::DuplicateRequestId(id));
        }
        self.entries.insert(id, PendingEntry { handler, request });
        Ok(())
    }

    /// Removes the entry for `id` without invoking it.
    pub fn take(&mut self, id: RequestId) -> Option<PendingEntry<M, R>> {
        self.entries.remove(&id)
    }

    /// Delivers `reply` to the handler registered for `id`. Returns `false` if nothing
    /// was waiting on `id`.
    pub fn resolve(&mut self, id: RequestId, reply: R) -> bool {
        match self.take(id) {
            Some(entry) => {
                entry.complete(reply);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: RequestId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Drops every pending entry without invoking it. Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<M, R> Default for PendingRegistry<M, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, R> fmt::Debug for PendingRegistry<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("pending", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
