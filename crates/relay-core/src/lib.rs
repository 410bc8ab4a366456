//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - **Branded IDs**: [`ids::ClientId`], [`ids::SessionId`] as newtypes
//! - **Wire envelope**: [`rpc::RpcRequest`], [`rpc::RpcResponse`],
//!   [`rpc::RpcNotification`] — the JSON-RPC 2.0 shapes spoken on the
//!   client-facing socket
//! - **Error registry**: [`rpc::codes`] and [`rpc::RpcError`] with the
//!   fixed negative integer codes both transports agree on
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other relay crates.

#![deny(unsafe_code)]

pub mod ids;
pub mod rpc;
