//! Per-session registry of in-flight requests.
//!
//! The registry serves two readers: an abandon lookup by message identifier,
//! and the teardown sweep that signals every request still running.  One
//! mutex guards the map and is held only for map operations; cancellation
//! posts never block, so the sweep is safe under the lock.
//!
//! Message identifiers are chosen by the client and may repeat while an
//! earlier request with the same identifier is still running.  Each
//! registration is tracked separately: lookups resolve to the most recent
//! one, the sweep reaches all of them, and unregistering removes only the
//! exact context that finished.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ldap_core::MessageId;

use crate::application::request::{AbandonReason, RequestContext};

type RequestMap = HashMap<MessageId, Vec<Arc<RequestContext>>>;

#[derive(Debug, Default)]
pub struct RequestRegistry {
    requests: Mutex<RequestMap>,
}

impl RequestRegistry {
    fn lock(&self) -> MutexGuard<'_, RequestMap> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks `context` until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, context: Arc<RequestContext>) -> Registration {
        self.lock()
            .entry(context.message_id())
            .or_default()
            .push(Arc::clone(&context));
        Registration {
            registry: Arc::clone(self),
            context,
        }
    }

    /// The most recent in-flight request registered under `message_id`.
    pub fn get(&self, message_id: MessageId) -> Option<Arc<RequestContext>> {
        self.lock()
            .get(&message_id)
            .and_then(|contexts| contexts.last())
            .cloned()
    }

    /// Posts `reason` to the most recent request registered under
    /// `message_id`.  Returns `false` if there is none.
    pub fn abandon(&self, message_id: MessageId, reason: AbandonReason) -> bool {
        match self.lock().get(&message_id).and_then(|contexts| contexts.last()) {
            Some(context) => {
                context.abandon(reason);
                true
            }
            None => false,
        }
    }

    /// Posts `reason` to every registered request and returns how many were
    /// signalled.
    pub fn cancel_all(&self, reason: AbandonReason) -> usize {
        let requests = self.lock();
        let mut signalled = 0;
        for context in requests.values().flatten() {
            context.abandon(reason);
            signalled += 1;
        }
        signalled
    }

    /// Number of registered requests, duplicates included.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unregister(&self, context: &Arc<RequestContext>) {
        let mut requests = self.lock();
        let id = context.message_id();
        if let Some(contexts) = requests.get_mut(&id) {
            contexts.retain(|c| !Arc::ptr_eq(c, context));
            if contexts.is_empty() {
                requests.remove(&id);
            }
        }
    }
}

/// Keeps a request registered.  Dropping it unregisters the request, so an
/// early return or a panicking handler still leaves the registry clean.
#[derive(Debug)]
#[must_use = "dropping the registration unregisters the request immediately"]
pub struct Registration {
    registry: Arc<RequestRegistry>,
    context: Arc<RequestContext>,
}

impl Registration {
    pub fn context(&self) -> &Arc<RequestContext> {
        &self.context
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.context);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
