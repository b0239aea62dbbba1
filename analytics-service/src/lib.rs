pub mod api;
pub mod auth;
pub mod config;
pub mod etl;
pub mod metrics_server;
pub mod ml;
pub mod observability;
pub mod pipeline;
pub mod scheduler;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use pipeline::{Envelope, LoadReport, Pipeline};
