//! Outer HTTP surface for the coaching core (§6 inbound interfaces) and
//! the stub `ChannelAdapter` implementations the composition root wires
//! into the scheduler. Rendering, auth, and the rest of the routine glue
//! named out of scope in §1 live elsewhere; this crate only carries the
//! edge that feeds the core and the edge the core delivers through.

pub mod adapters;
pub mod server;
pub mod types;

pub use adapters::LoggingChannelAdapter;
pub use server::GatewayServer;
