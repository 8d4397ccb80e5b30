//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! conf file (INI)
//!     → conf.rs (parse into a typed section/option provider)
//!     → plan.rs (discover sub-instances, run factory hooks, validate)
//!     → LaunchPlan (frozen, immutable)
//!     → shared via Arc with the supervisor and every worker
//! ```
//!
//! # Design Decisions
//! - The plan is immutable once built; a HUP restart reuses the same plan
//! - Option lookup falls back sub-section → family section → `[brim]`
//! - Validation separates syntactic (INI) from semantic checks

pub mod conf;
pub mod plan;

pub use conf::{read_conf, Conf, ConfError};
pub use plan::{
    DaemonGroup, DaemonSpec, HandlerSpec, JsonCodec, LaunchPlan, LogConfig, PlanOptions,
    SubInstance, SubKind,
};
