//! dscbridge: serves OMI/DSC resource operations over an inherited Unix socket.
//!
//! The host sends one request at a time naming an operation (Verify, Apply or
//! Query), a resource and a map of typed arguments. The bridge looks the
//! resource up in a [`Registry`], runs the matching handler and writes back a
//! return code with either outputs or an error message.
//!
//! ```text
//! host ──request──▶ FrameReader ─▶ decode_request ─▶ Dispatcher ─▶ Resource
//! host ◀─response── FramedWrite ◀─ ResponseEncoder ◀──────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod registry;
pub mod resource;
pub mod script;

#[cfg(test)]
mod testing;

pub use bridge::{
    ArgMap, ByteOrder, OperationKind, ProtocolError, Request, Response, Value, ValueType,
};
pub use config::{BridgeConfig, ConfigError};
pub use connection::{ConnectionSummary, serve_connection};
pub use dispatch::Dispatcher;
pub use registry::Registry;
pub use resource::{Arguments, Resource, ResourceContext, ResourceError, ResourceResult};
pub use script::{ScriptResource, register_scripts};
