pub mod agent;
pub mod config;
pub mod model;
pub mod observer;
pub mod server;
pub mod service;
pub mod storage;
pub mod wire;

pub use model::{MetricKind, MetricRecord};
pub use service::MetricsService;
