#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Sockvisor
//!
//! Supervised, named TCP/UDP endpoints for long-running devices and services.
//!
//! Each socket runs its own loop that keeps it alive across interface loss:
//! - Interface selection between a default and a backup adapter, with failover
//! - Serialized DNS resolution with a literal-address fallback
//! - Reconnect after failures, with a cooperative delay
//! - Length-capped receive and transmit buffers per connection that drop the
//!   oldest bytes on overflow
//! - Optional identification handshake, keepalive pings and line-ending cleanup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sockvisor::{
//!     AdapterSet, InterfaceId, NoHooks, SocketConfig, SocketManager, StaticAdapter,
//! };
//!
//! let adapters = AdapterSet::new().with(
//!     InterfaceId::WifiStation,
//!     Arc::new(StaticAdapter::loopback()),
//! );
//! let manager = SocketManager::builder().adapters(adapters).build();
//!
//! let console = SocketConfig::server("console", 2323)
//!     .max_connections(2)
//!     .build()?;
//! let handle = manager.start(console, NoHooks)?;
//!
//! if let Some(rx) = handle.recv_stream(0) {
//!     let line = rx.pull_vec(256);
//!     println!("received {} bytes", line.len());
//! }
//! manager.sockets().log_list();
//! # Ok::<(), sockvisor::Error>(())
//! ```
//!
//! ## Features
//!
//! - `serde-support` - Serialization of configuration values and reports

mod config;
mod error;
mod manager;
mod registry;
mod types;

pub mod dns;
pub mod interface;
pub mod socket;
pub mod stream;

pub use config::{Limits, Timings};
pub use error::{Error, Result};
pub use manager::{SocketManager, SocketManagerBuilder};
pub use registry::{Named, Registry};
pub use types::{
    is_broadcast_like, FirmwareVersion, InterfaceId, MacAddress, Priority, Role, SocketKind,
    SocketState,
};

pub use dns::{DnsGate, Lookup, ResolveCallback, ResolveStatus, Resolver, SystemResolver};
pub use interface::{
    Adapter, AdapterSelector, AdapterSet, Selection, StaticAdapter, SystemAdapter,
};
pub use socket::{
    Behavior, NoHooks, SocketConfig, SocketConfigBuilder, SocketHandle, SocketHooks,
    SocketInfo, SocketRegistry, SocketReport,
};
pub use stream::{StreamBuffer, StreamCapture, StreamInfo, StreamRegistry, StreamReport};
