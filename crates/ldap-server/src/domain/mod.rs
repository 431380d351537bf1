//! Domain layer: the runtime options a server is started with.
//!
//! Nothing in here performs I/O.  Options are plain values that are
//! validated once, before the accept loop starts, and are then shared
//! read-only by every session.

pub mod options;
