//! es-lifecycle - open, close, chill, snapshot and delete time-partitioned
//! Elasticsearch indices.

pub mod catalog;
pub mod config;
pub mod es_http;
pub mod naming;
pub mod notify;
pub mod operation;
pub mod orchestrator;
pub mod outcome;
pub mod retention;
pub mod snapshot;
