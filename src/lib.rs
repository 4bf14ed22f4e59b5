//! smartstack-probe - verification helpers for a SmartStack node
//!
//! This library provides the pieces a node's test suite needs to check a
//! nerve/synapse/HAProxy deployment from the outside:
//! - Parses the HAProxy configuration synapse generates into a structured document
//! - Drives services down and up through their control commands
//! - Confirms each transition by polling the service's HTTP health endpoint
//! - Runs the ZooKeeper CLI against the SmartStack cluster
//! - Assembles the synapse JSON configuration from the service catalog

pub mod config;
pub mod error;
pub mod haproxy;
pub mod healthcheck;
pub mod poller;
pub mod process;
pub mod synapse;

pub use config::Config;
pub use error::{Error, Result};
pub use haproxy::ConfigDocument;
pub use poller::ServicePoller;
