//! Processing health monitor
//!
//! Counters and bounded histories are shared across worker threads. Health is
//! derived on demand from runtime-configurable thresholds.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::resources::{ResourceSample, ResourceSampler, SysinfoSampler};
use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::export::ExportFormat;

/// Overall health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Limits used by [`ProcessingMonitor::check_health`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub max_response_time_secs: f64,
    pub max_error_rate: f64,
    pub warning_error_rate: f64,
    pub max_memory_usage: f32,
    pub max_cpu_usage: f32,
}

impl From<&MonitoringConfig> for Thresholds {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            max_response_time_secs: config.max_response_time_secs,
            max_error_rate: config.max_error_rate,
            warning_error_rate: config.warning_error_rate,
            max_memory_usage: config.max_memory_usage,
            max_cpu_usage: config.max_cpu_usage,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&MonitoringConfig::default())
    }
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub operation: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One recorded success duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSample {
    pub operation: String,
    pub seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// One resource sample with its time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    #[serde(flatten)]
    pub sample: ResourceSample,
    pub timestamp: DateTime<Utc>,
}

/// Per-operation counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub successes: u64,
    pub errors: u64,
    pub total_time_secs: f64,
}

impl OperationStats {
    pub fn avg_time_secs(&self) -> f64 {
        if self.successes == 0 {
            0.0
        } else {
            self.total_time_secs / self.successes as f64
        }
    }
}

/// Health of a named component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub details: HashMap<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub success_count: u64,
    pub error_count: u64,
    pub total_operations: u64,
    pub error_rate: f64,
    pub avg_response_time: f64,
    pub max_response_time: f64,
    pub min_response_time: f64,
    pub uptime_seconds: f64,
    pub uptime_hours: f64,
    pub latest_memory_usage: Option<f32>,
    pub latest_cpu_usage: Option<f32>,
    pub operations: BTreeMap<String, OperationStats>,
    pub thresholds: Thresholds,
}

/// Result of a health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub metrics: ProcessingStats,
    pub components: BTreeMap<String, ComponentHealth>,
    pub timestamp: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Samples recorded within a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHistory {
    pub response_times: Vec<ResponseSample>,
    pub resources: Vec<ResourceRecord>,
}

struct History {
    success_count: u64,
    error_count: u64,
    response_times: VecDeque<ResponseSample>,
    errors: VecDeque<ErrorRecord>,
    resources: VecDeque<ResourceRecord>,
    started: Instant,
}

impl History {
    fn new(capacity: usize) -> Self {
        Self {
            success_count: 0,
            error_count: 0,
            response_times: VecDeque::with_capacity(capacity),
            errors: VecDeque::with_capacity(capacity.min(256)),
            resources: VecDeque::with_capacity(capacity.min(256)),
            started: Instant::now(),
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, limit: usize) {
    if queue.len() >= limit {
        queue.pop_front();
    }
    queue.push_back(item);
}

/// Thread-safe success/error/resource recorder
pub struct ProcessingMonitor {
    history_size: usize,
    thresholds: RwLock<Thresholds>,
    state: Mutex<History>,
    operations: DashMap<String, OperationStats>,
    components: DashMap<String, ComponentHealth>,
    sampler: Option<Arc<dyn ResourceSampler>>,
}

impl ProcessingMonitor {
    /// Create a monitor; resource sampling uses `sysinfo` when enabled
    pub fn new(config: &MonitoringConfig) -> Self {
        let sampler: Option<Arc<dyn ResourceSampler>> = if config.enable_resource_sampling {
            Some(Arc::new(SysinfoSampler::new()))
        } else {
            None
        };
        let history_size = config.history_size.max(1);

        Self {
            history_size,
            thresholds: RwLock::new(Thresholds::from(config)),
            state: Mutex::new(History::new(history_size)),
            operations: DashMap::new(),
            components: DashMap::new(),
            sampler,
        }
    }

    /// Replace the resource sampler
    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Record a successful operation
    pub fn record_success(&self, operation: &str, duration: Duration) {
        let seconds = duration.as_secs_f64();
        {
            let mut state = self.state.lock();
            state.success_count += 1;
            push_bounded(
                &mut state.response_times,
                ResponseSample {
                    operation: operation.to_string(),
                    seconds,
                    timestamp: Utc::now(),
                },
                self.history_size,
            );
        }

        let mut stats = self.operations.entry(operation.to_string()).or_default();
        stats.successes += 1;
        stats.total_time_secs += seconds;

        tracing::debug!("Operation '{}' completed in {:.3}s", operation, seconds);
    }

    /// Record a failed operation
    pub fn record_error(&self, operation: &str, message: &str) {
        {
            let mut state = self.state.lock();
            state.error_count += 1;
            push_bounded(
                &mut state.errors,
                ErrorRecord {
                    operation: operation.to_string(),
                    message: message.to_string(),
                    timestamp: Utc::now(),
                },
                self.history_size,
            );
        }
        self.operations.entry(operation.to_string()).or_default().errors += 1;

        tracing::error!("Operation '{}' failed: {}", operation, message);
    }

    /// Take one resource sample if a sampler is installed and free
    pub fn sample_resources(&self) -> Option<ResourceSample> {
        let sampler = self.sampler.as_ref()?;
        match sampler.sample() {
            Ok(Some(sample)) => {
                let mut state = self.state.lock();
                push_bounded(
                    &mut state.resources,
                    ResourceRecord {
                        sample,
                        timestamp: Utc::now(),
                    },
                    self.history_size,
                );
                Some(sample)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to sample resource usage: {}", e);
                None
            }
        }
    }

    pub fn error_count(&self) -> u64 {
        self.state.lock().error_count
    }

    /// Errors over all recorded operations
    pub fn error_rate(&self) -> f64 {
        let state = self.state.lock();
        rate(state.error_count, state.success_count)
    }

    pub fn uptime(&self) -> Duration {
        self.state.lock().started.elapsed()
    }

    /// Current aggregate metrics
    pub fn get_metrics(&self) -> ProcessingStats {
        let thresholds = self.thresholds.read().clone();
        let operations: BTreeMap<String, OperationStats> = self
            .operations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let state = self.state.lock();
        let times: Vec<f64> = state.response_times.iter().map(|r| r.seconds).collect();
        let (avg, max, min) = if times.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                times.iter().sum::<f64>() / times.len() as f64,
                times.iter().copied().fold(f64::MIN, f64::max),
                times.iter().copied().fold(f64::MAX, f64::min),
            )
        };
        let uptime = state.started.elapsed().as_secs_f64();
        let latest = state.resources.back().map(|r| r.sample);

        ProcessingStats {
            success_count: state.success_count,
            error_count: state.error_count,
            total_operations: state.success_count + state.error_count,
            error_rate: rate(state.error_count, state.success_count),
            avg_response_time: avg,
            max_response_time: max,
            min_response_time: min,
            uptime_seconds: uptime,
            uptime_hours: uptime / 3600.0,
            latest_memory_usage: latest.map(|s| s.memory_percent),
            latest_cpu_usage: latest.map(|s| s.cpu_percent),
            operations,
            thresholds,
        }
    }

    /// Derive health from the current metrics and thresholds
    pub fn check_health(&self) -> HealthSnapshot {
        self.sample_resources();
        let metrics = self.get_metrics();
        let t = &metrics.thresholds;
        let mut issues = Vec::new();

        if metrics.avg_response_time > t.max_response_time_secs {
            issues.push(format!(
                "High response time: {:.3}s > {:.3}s",
                metrics.avg_response_time, t.max_response_time_secs
            ));
        }
        if metrics.error_rate > t.max_error_rate {
            issues.push(format!(
                "High error rate: {:.2}% > {:.2}%",
                metrics.error_rate * 100.0,
                t.max_error_rate * 100.0
            ));
        }
        if let Some(memory) = metrics.latest_memory_usage {
            if memory > t.max_memory_usage {
                issues.push(format!("High memory usage: {:.1}% > {:.1}%", memory, t.max_memory_usage));
            }
        }
        if let Some(cpu) = metrics.latest_cpu_usage {
            if cpu > t.max_cpu_usage {
                issues.push(format!("High CPU usage: {:.1}% > {:.1}%", cpu, t.max_cpu_usage));
            }
        }

        let status = if !issues.is_empty() {
            HealthStatus::Unhealthy
        } else if metrics.error_rate > t.warning_error_rate {
            issues.push(format!("Elevated error rate: {:.2}%", metrics.error_rate * 100.0));
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthSnapshot {
            status,
            issues,
            metrics,
            components: self
                .components
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            timestamp: Utc::now(),
        }
    }

    /// The most recent `limit` errors, oldest first
    pub fn error_history(&self, limit: usize) -> Vec<ErrorRecord> {
        let state = self.state.lock();
        let skip = state.errors.len().saturating_sub(limit);
        state.errors.iter().skip(skip).cloned().collect()
    }

    /// Samples recorded within the last `window`
    pub fn performance_history(&self, window: chrono::Duration) -> PerformanceHistory {
        let cutoff = Utc::now() - window;
        let state = self.state.lock();
        PerformanceHistory {
            response_times: state
                .response_times
                .iter()
                .filter(|r| r.timestamp > cutoff)
                .cloned()
                .collect(),
            resources: state
                .resources
                .iter()
                .filter(|r| r.timestamp > cutoff)
                .cloned()
                .collect(),
        }
    }

    pub fn set_component_health(
        &self,
        component: &str,
        status: HealthStatus,
        details: HashMap<String, serde_json::Value>,
    ) {
        self.components.insert(
            component.to_string(),
            ComponentHealth {
                status,
                details,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn component_health(&self, component: &str) -> Option<ComponentHealth> {
        self.components.get(component).map(|entry| entry.value().clone())
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds.read().clone()
    }

    pub fn set_thresholds(&self, thresholds: Thresholds) {
        tracing::info!("Monitor thresholds updated: {:?}", thresholds);
        *self.thresholds.write() = thresholds;
    }

    /// Clear counters and histories; thresholds and components are kept
    pub fn reset_metrics(&self) {
        *self.state.lock() = History::new(self.history_size);
        self.operations.clear();
        tracing::info!("Processing metrics reset");
    }

    /// Metrics as pretty JSON or as `metric,value` rows
    pub fn export_metrics(&self, format: ExportFormat) -> Result<String> {
        let metrics = self.get_metrics();
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&metrics)?),
            ExportFormat::Csv => {
                let mut rows = Vec::new();
                flatten("", &serde_json::to_value(&metrics)?, &mut rows);

                let mut writer = csv::Writer::from_writer(Vec::new());
                writer.write_record(["metric", "value"])?;
                for (key, value) in rows {
                    writer.write_record([key, value])?;
                }
                let bytes = writer
                    .into_inner()
                    .map_err(|e| crate::Error::internal(format!("CSV flush failed: {}", e)))?;
                String::from_utf8(bytes).map_err(|e| crate::Error::internal(e.to_string()))
            }
        }
    }
}

impl Default for ProcessingMonitor {
    fn default() -> Self {
        Self::new(&MonitoringConfig::default())
    }
}

fn rate(errors: u64, successes: u64) -> f64 {
    let total = errors + successes;
    if total == 0 {
        0.0
    } else {
        errors as f64 / total as f64
    }
}

fn flatten(prefix: &str, value: &serde_json::Value, rows: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&key, value, rows);
            }
        }
        serde_json::Value::Null => rows.push((prefix.to_string(), String::new())),
        serde_json::Value::String(s) => rows.push((prefix.to_string(), s.clone())),
        other => rows.push((prefix.to_string(), other.to_string())),
    }
}
