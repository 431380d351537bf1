//! Runtime options applied to a listener before it starts accepting.
//!
//! Options are built with the `with_*` methods on top of
//! [`ServerOptions::default()`]:
//!
//! ```rust
//! use std::time::Duration;
//! use ldap_server::ServerOptions;
//!
//! let options = ServerOptions::default()
//!     .with_read_timeout(Duration::from_secs(30))
//!     .with_outbound_queue_capacity(64);
//! assert!(options.validate().is_ok());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ldap_core::DEFAULT_MAX_MESSAGE_SIZE;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

/// Default number of responses a session buffers before handlers stall.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 20;

/// First delay applied after a non-transient accept error.
pub const DEFAULT_ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Ceiling for the accept-error delay.
pub const DEFAULT_ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Connection-admission hook.
///
/// Called once per accepted connection, before any byte is read and before
/// the TLS handshake of a secure listener.  Returning an error closes the
/// connection; the server keeps serving everyone else.
pub type AdmissionHook = Arc<dyn Fn(&TcpStream) -> anyhow::Result<()> + Send + Sync>;

/// Error returned by [`ServerOptions::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("outbound queue capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("maximum message size must be at least 1 byte")]
    ZeroMaxMessageSize,
    #[error("accept backoff minimum {min:?} must be non-zero and not exceed maximum {max:?}")]
    InvalidBackoff { min: Duration, max: Duration },
}

/// Per-listener configuration.
#[derive(Clone)]
pub struct ServerOptions {
    /// Maximum time to wait for the next request on an idle session.
    /// `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Maximum time one response may take to reach the socket.
    pub write_timeout: Option<Duration>,
    /// Optional connection-admission hook.
    pub on_new_connection: Option<AdmissionHook>,
    /// Acceptor used to upgrade plaintext sessions in-band via StartTLS.
    /// Without one, accepted StartTLS requests leave the session in plaintext.
    pub start_tls: Option<TlsAcceptor>,
    /// Capacity of each session's outbound response queue.
    pub outbound_queue_capacity: usize,
    /// Largest envelope a client may send.
    pub max_message_size: usize,
    pub accept_backoff_min: Duration,
    pub accept_backoff_max: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
            on_new_connection: None,
            start_tls: None,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            accept_backoff_min: DEFAULT_ACCEPT_BACKOFF_MIN,
            accept_backoff_max: DEFAULT_ACCEPT_BACKOFF_MAX,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("on_new_connection", &self.on_new_connection.is_some())
            .field("start_tls", &self.start_tls.is_some())
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("max_message_size", &self.max_message_size)
            .field("accept_backoff_min", &self.accept_backoff_min)
            .field("accept_backoff_max", &self.accept_backoff_max)
            .finish()
    }
}

impl ServerOptions {
    /// Sets the idle read timeout.  A zero duration disables it.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = non_zero(timeout);
        self
    }

    /// Sets the per-response write timeout.  A zero duration disables it.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = non_zero(timeout);
        self
    }

    #[must_use]
    pub fn with_admission_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TcpStream) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_new_connection = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_start_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.start_tls = Some(acceptor);
        self
    }

    #[must_use]
    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    #[must_use]
    pub fn with_accept_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.accept_backoff_min = min;
        self.accept_backoff_max = max;
        self
    }

    /// Checks the options for values no session could run with.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.outbound_queue_capacity == 0 {
            return Err(OptionsError::ZeroQueueCapacity);
        }
        if self.max_message_size == 0 {
            return Err(OptionsError::ZeroMaxMessageSize);
        }
        if self.accept_backoff_min.is_zero() || self.accept_backoff_min > self.accept_backoff_max {
            return Err(OptionsError::InvalidBackoff {
                min: self.accept_backoff_min,
                max: self.accept_backoff_max,
            });
        }
        Ok(())
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = ServerOptions::default();
        assert_eq!(options.outbound_queue_capacity, 20);
        assert_eq!(options.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(options.read_timeout.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let options = ServerOptions::default()
            .with_read_timeout(Duration::from_secs(5))
            .with_read_timeout(Duration::ZERO)
            .with_write_timeout(Duration::from_millis(250));
        assert_eq!(options.read_timeout, None);
        assert_eq!(options.write_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let options = ServerOptions::default().with_outbound_queue_capacity(0);
        assert_eq!(options.validate(), Err(OptionsError::ZeroQueueCapacity));
    }

    #[test]
    fn test_validate_rejects_zero_message_size() {
        let options = ServerOptions::default().with_max_message_size(0);
        assert_eq!(options.validate(), Err(OptionsError::ZeroMaxMessageSize));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let min = Duration::from_secs(2);
        let max = Duration::from_secs(1);
        let options = ServerOptions::default().with_accept_backoff(min, max);
        assert_eq!(options.validate(), Err(OptionsError::InvalidBackoff { min, max }));
    }

    #[test]
    fn test_debug_does_not_require_hook_debug() {
        let options = ServerOptions::default().with_admission_hook(|_| Ok(()));
        let text = format!("{options:?}");
        assert!(text.contains("on_new_connection: true"));
    }
}
