//! Concurrent IoT device-swarm simulation engine.
//!
//! A [`swarm::Swarm`] owns many [`device::Device`]s, each pairing a
//! [`datasource::DataSource`] (looping CSV or embedded SQLite), a
//! [`publisher::Publisher`] (MQTT or a mock), and a [`adapter::PayloadAdapter`]
//! (CR1000X envelope or passthrough). Devices run concurrently, advance a
//! per-device cycle counter only on successful publish, and the swarm snapshots
//! its full resumable state after every such publish so a process restart can
//! pick back up mid-cycle.
//!
//! This crate holds no environment-variable parsing and performs no logging
//! initialization - those belong to the binaries in `apps/` that embed it.

pub mod adapter;
pub mod config;
pub mod datasource;
pub mod device;
pub mod error;
pub mod liveupload;
pub mod publisher;
pub mod snapshot;
pub mod swarm;

pub use config::{DeviceConfig, DeviceType, Row, Table, Value};
pub use device::Device;
pub use swarm::Swarm;
