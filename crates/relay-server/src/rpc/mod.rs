//! Request dispatch.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `context` | Shared handler state: registries + message-id counter |
//! | `registry` | `MethodRegistry` / `MethodHandler` dispatch machinery |
//! | `handlers` | The fixed method set: `session.create`, `session.close`, `send`, `stream` |
//! | `handler` | Text frame → decoded request → dispatched response |

pub mod context;
pub mod handler;
pub mod handlers;
pub mod registry;
