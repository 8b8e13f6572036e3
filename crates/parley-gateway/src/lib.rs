//! Real-time fan-out hub.
//!
//! `registry` tracks one live session per user, `router` fans encoded events
//! out to every online member of a chat, and `connection` runs the
//! per-socket read loop that validates, persists and routes inbound events.

pub mod auth;
pub mod backend;
pub mod connection;
pub mod registry;
pub mod router;

pub use auth::{AuthError, CredentialVerifier, JwtVerifier, SessionUser};
pub use backend::{ChatBackend, SharedBackend};
pub use registry::{ConnectionRegistry, Frame, SessionHandle};
pub use router::ChatRouter;
