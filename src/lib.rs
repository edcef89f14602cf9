//! # kmeans-server
//!
//! A K-means clustering service for tables of mixed continuous and
//! categorical columns.
//!
//! ## Features
//!
//! - **Mixed attributes**: numeric columns are min-max normalized, text
//!   columns compared by equality; centroids use the mean or the mode
//! - **Deterministic reports**: members are kept ordered and ties resolve to
//!   the first candidate, so a seeded run always renders the same report
//! - **Persistent models**: a versioned binary format storing centroids and
//!   membership, reloadable against the source table
//! - **TCP protocol**: a thread-per-connection server with per-session state
//!   and a blocking [`Client`]
//! - **Pluggable sources**: rows come from any [`TableSource`]; in-memory and
//!   CSV-directory sources ship with the crate
//!
//! ## Example
//!
//! ```rust
//! use kmeans_server::{Dataset, KMeansMiner, Value};
//!
//! let rows = vec![
//!     vec![Value::from("sunny"), Value::from(30.0)],
//!     vec![Value::from("sunny"), Value::from(28.0)],
//!     vec![Value::from("rain"), Value::from(12.0)],
//!     vec![Value::from("rain"), Value::from(10.0)],
//! ];
//! let dataset = Dataset::from_rows(vec!["outlook".into(), "temperature".into()], rows).unwrap();
//!
//! let mut miner = KMeansMiner::new(2);
//! miner.run(&dataset).unwrap();
//!
//! let report = miner.report(&dataset).unwrap();
//! assert!(report.contains("Number of iterations"));
//! ```
//!
//! ## Serving a table source
//!
//! ```no_run
//! use std::sync::Arc;
//! use kmeans_server::{CsvSource, KMeansServer, ServerConfig};
//!
//! let config = ServerConfig::load(None).unwrap();
//! let source = CsvSource::new(&config.storage.data_dir).with_policy(config.access_policy());
//! let address = config.listen_address();
//! let server = KMeansServer::bind(address, Arc::new(source), Arc::new(config)).unwrap();
//! server.run().unwrap();
//! ```

mod algorithm;
mod attribute;
pub mod client;
mod cluster;
mod config;
mod dataset;
mod error;
mod item;
mod kmeans;
pub mod model;
pub mod protocol;
mod server;
mod session;
pub mod source;
mod tuple;

pub use algorithm::{kmeans, KMeansResult};
pub use attribute::Attribute;
pub use client::{Client, ClientError};
pub use cluster::{Cluster, ClusterSet};
pub use crate::config::{
    ClusteringConfig, KMeansConfig, LoggingConfig, NetworkConfig, ServerConfig, StorageConfig,
};
pub use dataset::{Dataset, Value};
pub use error::{KMeansError, Result};
pub use item::Item;
pub use kmeans::KMeansMiner;
pub use server::{serve_connection, KMeansServer};
pub use session::Session;
pub use source::{ConnectionParams, CsvSource, MemorySource, TableSource};
pub use tuple::Tuple;
