//! The synthetic engine's HTTP surface.
//!
//! Speaks enough of the Docker Engine API for compose tooling: listings and
//! inspection of containers, images, networks and volumes, stats, top,
//! multiplexed logs and the event stream. A private `/_mock` surface lets a
//! test harness flip runtime state.

pub mod events;
pub mod filters;
pub mod framing;
pub mod handlers;
pub mod server;
pub mod shapes;
pub mod synth;
pub mod types;

pub use events::{EventBroker, EventHub, EventTracker, Subscription};
pub use filters::Filters;
pub use framing::{Frame, FrameError, StreamKind};
pub use server::{EngineServer, ServerContext, ServerSettings, default_socket_path, routes};
