//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! LaunchPlan listener settings
//!     → listener.rs (bind while privileged, retry EADDRINUSE)
//!     → std sockets inherited across fork
//!     → converted to tokio sockets inside each worker
//! ```

pub mod listener;

pub use listener::{bind_tcp, bind_udp};
