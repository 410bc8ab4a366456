//! # relay-server
//!
//! The bridge itself: accepts WebSocket clients, multiplexes their
//! sessions onto the upstream back-end, and relays traffic both ways.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `server` | Axum router (`/ws`, `/health`), bind + serve |
//! | `ws` | Client connections: registry, per-connection supervisor loop |
//! | `rpc` | Request dispatch: method registry, handlers, frame decoding |
//! | `sessions` | Session registry: create/lookup/close, owner cascade |
//! | `upstream` | Upstream side: connector, message router, probe, child process |
//! | `shutdown` | CancellationToken shutdown coordination |
//!
//! ## Data Flow
//!
//! `ws::session` (per client) → `rpc::handler` → `rpc::registry` →
//! handlers mutate `sessions`. Each session's upstream reader feeds
//! `upstream::router`, which delivers `stream` notifications back through
//! the client registry.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod rpc;
pub mod server;
pub mod sessions;
pub mod shutdown;
pub mod upstream;
pub mod ws;
