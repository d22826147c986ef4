//! Distributed work server.
//!
//! Hands work items to untrusted clients over WebSocket, gated by hashcash
//! challenges, and accepts an item only once enough independent workers
//! agree on its solution. See [`server::Server`] for the event loop and
//! [`server::ServerHandle`] for driving it.

pub mod admission;
pub mod allocator;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod hashcash;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tracing;
pub mod transport;
pub mod types;
pub mod verification;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{Notification, Server, ServerBuilder, ServerHandle, ServerStats};
pub use verification::{check_percentage, Verdict};
