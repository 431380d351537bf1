//! The write pump: the single task that writes a session's socket.
//!
//! Handlers never touch the socket.  They queue envelopes through their
//! `ResponseSink`; the pump takes them off the queue one at a time and
//! encodes and flushes each before looking at the next, so two responses
//! can never interleave on the wire.
//!
//! The socket writer lives in a shared slot rather than inside the pump so
//! the session can take it back for a StartTLS upgrade (see
//! [`Outbound::Handoff`]) and for the final shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use ldap_core::LdapMessage;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::response::Outbound;
use crate::infrastructure::framing::LdapCodec;
use crate::infrastructure::session::SessionError;

/// Slot holding the framed socket writer.  `None` while handed off.
pub type WriterSlot<W> = Arc<Mutex<Option<FramedWrite<W, LdapCodec>>>>;

pub struct WritePump<W> {
    session: u64,
    writer: WriterSlot<W>,
    queue: mpsc::Receiver<Outbound>,
    write_timeout: Option<Duration>,
    /// Cancelled when a write fails so the read loop stops too.
    on_failure: CancellationToken,
}

impl<W> WritePump<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        session: u64,
        writer: WriterSlot<W>,
        queue: mpsc::Receiver<Outbound>,
        write_timeout: Option<Duration>,
        on_failure: CancellationToken,
    ) -> Self {
        Self {
            session,
            writer,
            queue,
            write_timeout,
            on_failure,
        }
    }

    /// Runs until the queue is closed and drained.
    pub async fn run(mut self) {
        let mut failed = false;
        let mut closed = false;

        while let Some(item) = self.queue.recv().await {
            match item {
                Outbound::Message(message) if failed || closed => {
                    debug!(
                        session = self.session,
                        message_id = message.message_id,
                        "discarding response; session output is closed"
                    );
                }
                Outbound::Message(message) => {
                    if let Err(e) = self.write(message).await {
                        warn!(session = self.session, error = %e, "write failed; closing session");
                        failed = true;
                        self.on_failure.cancel();
                    }
                }
                Outbound::Handoff { paused, resume } => {
                    // Everything queued before the handoff has been flushed.
                    if paused.send(()).is_ok() && resume.await.is_err() {
                        debug!(
                            session = self.session,
                            "handoff abandoned without resuming; writer slot may be empty"
                        );
                    }
                }
                Outbound::Close => {
                    closed = true;
                    self.queue.close();
                }
            }
        }

        debug!(session = self.session, "write pump finished");
    }

    async fn write(&self, message: LdapMessage) -> Result<(), SessionError> {
        let mut slot = self.writer.lock().await;
        let writer = slot.as_mut().ok_or(SessionError::WriterUnavailable)?;
        let message_id = message.message_id;
        let op = message.op.name();

        match self.write_timeout {
            Some(limit) => timeout(limit, writer.send(message))
                .await
                .map_err(|_| SessionError::WriteTimeout(limit))??,
            None => writer.send(message).await?,
        }

        debug!(session = self.session, message_id, op, ">>> response written");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
