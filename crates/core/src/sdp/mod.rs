//! SDP (Session Description Protocol) support (RFC 4566).
//!
//! Two directions live here:
//!
//! - [`crate::protocol::sdp::generate_sdp`] — building an SDP body for a
//!   DESCRIBE response, already implemented there for this server's own
//!   mounts.
//! - [`session::parse`] — parsing an SDP body received from elsewhere into
//!   a [`session::MediaSession`]/[`session::MediaSubSession`] tree, for a
//!   client or proxy role.
//!
//! [`payload`] holds the static RTP payload-type table both directions can
//! use.

pub mod payload;
pub mod session;

pub use session::{MediaSession, MediaSubSession};
