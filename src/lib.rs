//! brimd — a process-supervising launcher.
//!
//! One command starts a parent supervisor that hosts user-supplied request
//! handlers behind listening endpoints and keeps background daemons alive.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────┐
//!                 │                 PARENT SUPERVISOR                 │
//!                 │                                                   │
//!   brimd.conf ──▶│  config ──▶ LaunchPlan (frozen before any fork)   │
//!                 │     │                                             │
//!                 │     ▼                                             │
//!                 │  net: bind listeners (privileged) ── droppriv     │
//!                 │     │                                             │
//!                 │     ▼                                             │
//!                 │  stats: shared counter region (one mmap)          │
//!                 │     │                                             │
//!                 │     ▼                                             │
//!                 │  supervisor: fork N workers per listener,         │
//!                 │  one process per daemon; reap, classify,          │
//!                 │  restart with backoff; relay signals              │
//!                 └─────────┬──────────────┬──────────────┬──────────┘
//!                           │              │              │
//!                     ┌─────▼────┐   ┌─────▼────┐   ┌─────▼────┐
//!                     │  worker  │   │  worker  │   │  daemon  │
//!                     │ http/tcp │   │ udp loop │   │   body   │
//!                     │   loop   │   │          │   │          │
//!                     └──────────┘   └──────────┘   └──────────┘
//!                       handlers update shared counters; a reporting
//!                       handler exports the folded view as JSON
//! ```

// Core subsystems
pub mod config;
pub mod net;
pub mod stats;
pub mod supervisor;

// In-worker dispatch and the handler contracts
pub mod handlers;
pub mod server;

// Cross-cutting concerns
pub mod cli;
pub mod error;

pub use error::{BrimError, Result};
