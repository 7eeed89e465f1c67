//! Hotel availability and allocation engine served over the Postgres wire
//! protocol. Each property keeps its state in memory, rebuilt from a
//! per-property write-ahead log; concurrency control lives in per-room and
//! per-slot locks so allocation checks and writes commit as one step.

pub mod auth;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod reaper;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
