//! agent-crew-bridge — chat control plane for a crew of terminal workers
//!
//! One operator, one narrow chat channel, N independently-running worker
//! processes. The bridge multiplexes the channel across workers and routes
//! their asynchronous output back to the right conversation.
//!
//! ## Components
//!
//! - `backend` — the [`backend::Backend`] protocol plus the interactive
//!   (tmux) and exec (adapter subprocess) implementations
//! - `registry` — worker lifecycle (hire/end/restart/send) reconciled
//!   against externally observable state on every read
//! - `relay` — FIFO-based worker-to-worker message relay for exec workers
//! - `router` — inbound text parsing and dispatch (commands, mentions,
//!   replies, broadcast, focus)
//! - `server` — the HTTP control endpoints (`/response`, `/notify`,
//!   `/workers`, `/webhook`)
//! - `transport` — the outbound chat-API seam

pub mod backend;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod transport;

pub use backend::{Backend, BackendKind, SendContext};
pub use registry::{ControlPlaneState, WorkerInfo, WorkerRegistry};
pub use relay::PipeRelay;
pub use router::{CommandRouter, InboundMessage, ReplyRef};
pub use transport::{
    ChatTransport, HttpChatTransport, MockChatTransport, NullChatTransport, SentItem,
};
