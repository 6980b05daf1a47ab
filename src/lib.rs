//! Message-oriented client/server adapter for OPC UA.
//!
//! Provides discovery, browse, read/write, method-call, and subscription services
//! over a registry of underlying `opcua` client sessions, exposed as a single
//! asynchronous message stream (see [`message::Message`]) instead of the wire
//! library's per-service request/response calls.

pub mod attributes;
pub mod browse;
pub mod config;
pub mod discovery;
pub mod error;
pub mod facade;
pub mod message;
pub mod ordered_map;
pub mod queue;
pub mod registry;
pub mod status;
pub mod subscription;

pub use config::{EdgeConfig, EdgeConfigBuilder, SupportedApplicationTypes};
pub use error::{EdgeError, EdgeResult};
pub use facade::EdgeAdapter;
pub use message::Message;
pub use status::EdgeStatusCode;
