//! ResponseSink: the per-request handle handlers write responses through.

use ldap_core::{LdapMessage, MessageId, ProtocolOp};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Items on a session's outbound queue, consumed in order by the write pump.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// A response to encode and flush.
    Message(LdapMessage),
    /// Flush everything queued so far, report `paused`, then release the
    /// socket writer until `resume` fires.  Used for the StartTLS upgrade.
    Handoff {
        paused: oneshot::Sender<()>,
        resume: oneshot::Receiver<()>,
    },
    /// No further items will be accepted; drain and exit.
    Close,
}

/// Returned when a response is written after the session stopped accepting
/// output.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("session is closed")]
pub struct SessionClosed;

/// Writes responses for one request.
///
/// Every envelope written through a sink carries the message identifier of
/// the request it was created for.  Writes wait for room on the session's
/// bounded outbound queue, so a slow client stalls the handlers writing to
/// it and nobody else.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    message_id: MessageId,
    outbound: mpsc::Sender<Outbound>,
}

impl ResponseSink {
    pub(crate) fn new(message_id: MessageId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            message_id,
            outbound,
        }
    }

    /// The identifier stamped onto every response.
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Queues `op` as a response to this request.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] once the session's outbound queue is closed.
    pub async fn write(&self, op: ProtocolOp) -> Result<(), SessionClosed> {
        self.write_raw(LdapMessage::new(self.message_id, op)).await
    }

    /// Queues a complete envelope, for responses that carry controls.
    /// Its message identifier is overwritten with this request's.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] once the session's outbound queue is closed.
    pub async fn write_raw(&self, mut message: LdapMessage) -> Result<(), SessionClosed> {
        message.message_id = self.message_id;
        self.outbound
            .send(Outbound::Message(message))
            .await
            .map_err(|_| SessionClosed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
