//! Processing health monitoring

mod monitor;
mod resources;

pub use monitor::{
    ComponentHealth, ErrorRecord, HealthSnapshot, HealthStatus, OperationStats,
    PerformanceHistory, ProcessingMonitor, ProcessingStats, ResourceRecord, ResponseSample,
    Thresholds,
};
pub use resources::{ResourceSample, ResourceSampler, SysinfoSampler};
