//! SGAS - grid usage record accounting
//!
//! Authorization of inserts, views and queries against a small rule
//! language, and the background scheduler that keeps the aggregated usage
//! table up to date after records are inserted.

pub mod aggregation;
pub mod authz;
pub mod entities;
pub mod errors;
pub mod host_scale;
pub mod settings;
pub mod storage;
