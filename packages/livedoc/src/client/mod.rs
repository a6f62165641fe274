//! Client core
//!
//! Everything between a UI intent and the wire: the endpoint registry
//! with failover priorities, the connection manager state machine that
//! owns the single live WebSocket, the session tracker that turns
//! envelope bursts into UI-facing updates, and the search debouncer.

mod debounce;
mod manager;
mod registry;
mod session;

pub use debounce::Debouncer;
pub use manager::{
    ClientEvent, ClientHandle, ConnectionManager, LinkState, RetryPolicy, SendError,
};
pub use registry::{ServerEndpoint, ServerRegistry};
pub use session::{OpCategory, ProgressStage, SessionTracker, SessionUpdate};
