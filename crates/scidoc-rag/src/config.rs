//! Configuration for the document pipeline

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::ContentType;

/// Prefix of the environment variables that override file configuration
pub const ENV_PREFIX: &str = "SCIDOC_";

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chunk sizing and atomic span handling
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Content classification thresholds
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Specialized enrichment stages
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    /// Equation processing
    #[serde(default)]
    pub math: MathConfig,
    /// Health thresholds and sampling
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Batch processing
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Fraction of a chunk carried into the start of the next one
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f32,
    /// Lead-in text shorter than this is glued to the following atomic span
    #[serde(default = "default_min_fragment_size")]
    pub min_fragment_size: usize,
    /// Emit equations, figures, tables and code fences as their own chunks
    #[serde(default = "default_true")]
    pub isolate_atomic_spans: bool,
}

fn default_chunk_size() -> usize { 320 }
fn default_overlap_ratio() -> f32 { 0.12 }
fn default_min_fragment_size() -> usize { 50 }
fn default_true() -> bool { true }

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_ratio: default_overlap_ratio(),
            min_fragment_size: default_min_fragment_size(),
            isolate_atomic_spans: true,
        }
    }
}

impl ChunkingConfig {
    /// Problems with chunk sizing; empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.chunk_size == 0 {
            errors.push("chunk_size must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.overlap_ratio) {
            errors.push("overlap_ratio must be between 0 and 1".to_string());
        }
        errors
    }

    /// Overlap in characters derived from the ratio
    pub fn overlap_size(&self) -> usize {
        ((self.chunk_size as f32) * self.overlap_ratio).round() as usize
    }
}

/// Classification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Detectors below this confidence are ignored
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
    /// Per-type floors keyed by content type name; the stricter of this and
    /// `confidence_floor` applies
    #[serde(default)]
    pub type_floors: HashMap<String, f32>,
    /// Boost applied to a caller-supplied type guess
    #[serde(default = "default_hint_weight")]
    pub hint_weight: f32,
}

fn default_confidence_floor() -> f32 { 0.3 }
fn default_hint_weight() -> f32 { 0.35 }

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            type_floors: HashMap::new(),
            hint_weight: default_hint_weight(),
        }
    }
}

impl ClassificationConfig {
    /// Effective floor for one content type
    pub fn floor_for(&self, content_type: ContentType) -> f32 {
        self.type_floors
            .get(content_type.as_str())
            .map(|floor| floor.max(self.confidence_floor))
            .unwrap_or(self.confidence_floor)
    }
}

/// Enrichment stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enable_mathematical_processing: bool,
    #[serde(default = "default_true")]
    pub enable_asset_processing: bool,
    #[serde(default = "default_true")]
    pub enable_glossary_extraction: bool,
    /// Keep the base-classified chunk when a stage fails
    #[serde(default = "default_true")]
    pub fallback_on_error: bool,
    /// Suspend enrichment while the monitor reports a high error rate
    #[serde(default = "default_true")]
    pub enable_auto_fallback: bool,
    /// Minimum error count before auto fallback can kick in
    #[serde(default = "default_max_errors")]
    pub max_errors_before_fallback: u64,
}

fn default_max_errors() -> u64 { 10 }

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enable_mathematical_processing: true,
            enable_asset_processing: true,
            enable_glossary_extraction: true,
            fallback_on_error: true,
            enable_auto_fallback: true,
            max_errors_before_fallback: default_max_errors(),
        }
    }
}

/// Equation processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MathConfig {
    /// Token window used for k-grams
    #[serde(default = "default_kgram_size")]
    pub kgram_size: usize,
    /// Use the canonicalizer when one is installed
    #[serde(default = "default_true")]
    pub enable_canonicalization: bool,
}

fn default_kgram_size() -> usize { 3 }

impl Default for MathConfig {
    fn default() -> Self {
        Self {
            kgram_size: default_kgram_size(),
            enable_canonicalization: true,
        }
    }
}

/// Monitor thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Average response time above this is unhealthy
    #[serde(default = "default_max_response_time")]
    pub max_response_time_secs: f64,
    /// Error rate above this is unhealthy
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Error rate above this is degraded
    #[serde(default = "default_warning_error_rate")]
    pub warning_error_rate: f64,
    /// Memory usage percent above this is unhealthy
    #[serde(default = "default_max_usage")]
    pub max_memory_usage: f32,
    /// CPU usage percent above this is unhealthy
    #[serde(default = "default_max_usage")]
    pub max_cpu_usage: f32,
    /// Capacity of each bounded history buffer
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_true")]
    pub enable_resource_sampling: bool,
}

fn default_max_response_time() -> f64 { 5.0 }
fn default_max_error_rate() -> f64 { 0.1 }
fn default_warning_error_rate() -> f64 { 0.05 }
fn default_max_usage() -> f32 { 80.0 }
fn default_history_size() -> usize { 1000 }

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            max_response_time_secs: default_max_response_time(),
            max_error_rate: default_max_error_rate(),
            warning_error_rate: default_warning_error_rate(),
            max_memory_usage: default_max_usage(),
            max_cpu_usage: default_max_usage(),
            history_size: default_history_size(),
            enable_resource_sampling: true,
        }
    }
}

/// Batch processing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Documents processed in parallel (default: CPU count, max 8)
    #[serde(default)]
    pub parallel_documents: Option<usize>,
}

impl ProcessingConfig {
    pub fn worker_count(&self) -> usize {
        self.parallel_documents
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }
}

impl PipelineConfig {
    /// Parse from TOML text, then validate
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validated()
    }

    /// Load a TOML file, apply `SCIDOC_*` environment overrides, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = toml::from_str(&text)?;
        config.with_overrides(std::env::vars())?.validated()
    }

    /// Defaults plus `SCIDOC_*` environment overrides
    pub fn from_env() -> Result<Self> {
        PipelineConfig::default()
            .with_overrides(std::env::vars())?
            .validated()
    }

    /// Apply `SCIDOC_*` overrides from any key/value source
    pub fn with_overrides<I, K, V>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut problems = Vec::new();

        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "CHUNK_SIZE" => set_parsed(&mut self.chunking.chunk_size, name, value, &mut problems),
                "OVERLAP_RATIO" => {
                    set_parsed(&mut self.chunking.overlap_ratio, name, value, &mut problems)
                }
                "MATH_PROCESSING" => self.enrichment.enable_mathematical_processing = parse_bool(value),
                "ASSET_PROCESSING" => self.enrichment.enable_asset_processing = parse_bool(value),
                "GLOSSARY_EXTRACTION" => self.enrichment.enable_glossary_extraction = parse_bool(value),
                "FALLBACK_ON_ERROR" => self.enrichment.fallback_on_error = parse_bool(value),
                "CLASSIFICATION_THRESHOLD" => set_parsed(
                    &mut self.classification.confidence_floor,
                    name,
                    value,
                    &mut problems,
                ),
                "MATH_KGRAM_SIZE" => set_parsed(&mut self.math.kgram_size, name, value, &mut problems),
                "MAX_RESPONSE_TIME" => set_parsed(
                    &mut self.monitoring.max_response_time_secs,
                    name,
                    value,
                    &mut problems,
                ),
                "MAX_ERROR_RATE" => {
                    set_parsed(&mut self.monitoring.max_error_rate, name, value, &mut problems)
                }
                "MAX_ERRORS" => set_parsed(
                    &mut self.enrichment.max_errors_before_fallback,
                    name,
                    value,
                    &mut problems,
                ),
                "MAX_MEMORY_USAGE" => {
                    set_parsed(&mut self.monitoring.max_memory_usage, name, value, &mut problems)
                }
                "PARALLEL_DOCUMENTS" => match value.parse::<usize>() {
                    Ok(n) => self.processing.parallel_documents = Some(n),
                    Err(_) => problems.push(format!("{}{} is not a valid number: {}", ENV_PREFIX, name, value)),
                },
                _ => {}
            }
        }

        if problems.is_empty() {
            Ok(self)
        } else {
            Err(Error::InvalidConfig(problems))
        }
    }

    /// List every configuration problem; empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.chunking.validate();

        if !(0.0..=1.0).contains(&self.classification.confidence_floor) {
            errors.push("confidence_floor must be between 0 and 1".to_string());
        }
        for (name, floor) in &self.classification.type_floors {
            if name.parse::<ContentType>().is_err() {
                errors.push(format!("type floor names an unknown content type: {}", name));
            }
            if !(0.0..=1.0).contains(floor) {
                errors.push(format!("type floor for {} must be between 0 and 1", name));
            }
        }
        if !(0.0..=1.0).contains(&self.classification.hint_weight) {
            errors.push("hint_weight must be between 0 and 1".to_string());
        }
        if self.math.kgram_size == 0 {
            errors.push("math_kgram_size must be positive".to_string());
        }
        if self.monitoring.max_response_time_secs <= 0.0 {
            errors.push("max_response_time must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.monitoring.max_error_rate) {
            errors.push("max_error_rate must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.monitoring.warning_error_rate) {
            errors.push("warning_error_rate must be between 0 and 1".to_string());
        } else if self.monitoring.warning_error_rate > self.monitoring.max_error_rate {
            errors.push("warning_error_rate must not exceed max_error_rate".to_string());
        }
        if !(0.0..=100.0).contains(&self.monitoring.max_memory_usage) {
            errors.push("max_memory_usage must be between 0 and 100".to_string());
        }
        if !(0.0..=100.0).contains(&self.monitoring.max_cpu_usage) {
            errors.push("max_cpu_usage must be between 0 and 100".to_string());
        }
        if self.enrichment.max_errors_before_fallback == 0 {
            errors.push("max_errors_before_fallback must be positive".to_string());
        }
        if self.monitoring.history_size == 0 {
            errors.push("history_size must be positive".to_string());
        }
        if self.processing.parallel_documents == Some(0) {
            errors.push("parallel_documents must be positive".to_string());
        }

        errors
    }

    /// Return self if valid, otherwise the full list of problems
    pub fn validated(self) -> Result<Self> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::InvalidConfig(errors))
        }
    }

    /// Flat view of the effective configuration
    pub fn to_map(&self) -> BTreeMap<String, serde_json::Value> {
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: serde_json::Value| {
            map.insert(key.to_string(), value);
        };

        put("chunk_size", serde_json::json!(self.chunking.chunk_size));
        put("overlap_ratio", serde_json::json!(self.chunking.overlap_ratio));
        put("min_fragment_size", serde_json::json!(self.chunking.min_fragment_size));
        put("isolate_atomic_spans", serde_json::json!(self.chunking.isolate_atomic_spans));
        put("classification_threshold", serde_json::json!(self.classification.confidence_floor));
        put("hint_weight", serde_json::json!(self.classification.hint_weight));
        put(
            "enable_mathematical_processing",
            serde_json::json!(self.enrichment.enable_mathematical_processing),
        );
        put("enable_asset_processing", serde_json::json!(self.enrichment.enable_asset_processing));
        put(
            "enable_glossary_extraction",
            serde_json::json!(self.enrichment.enable_glossary_extraction),
        );
        put("fallback_on_error", serde_json::json!(self.enrichment.fallback_on_error));
        put("enable_auto_fallback", serde_json::json!(self.enrichment.enable_auto_fallback));
        put(
            "max_errors_before_fallback",
            serde_json::json!(self.enrichment.max_errors_before_fallback),
        );
        put("math_kgram_size", serde_json::json!(self.math.kgram_size));
        put("enable_canonicalization", serde_json::json!(self.math.enable_canonicalization));
        put("max_response_time", serde_json::json!(self.monitoring.max_response_time_secs));
        put("max_error_rate", serde_json::json!(self.monitoring.max_error_rate));
        put("warning_error_rate", serde_json::json!(self.monitoring.warning_error_rate));
        put("max_memory_usage", serde_json::json!(self.monitoring.max_memory_usage));
        put("max_cpu_usage", serde_json::json!(self.monitoring.max_cpu_usage));
        put("history_size", serde_json::json!(self.monitoring.history_size));
        put(
            "enable_resource_sampling",
            serde_json::json!(self.monitoring.enable_resource_sampling),
        );
        put("parallel_documents", serde_json::json!(self.processing.worker_count()));

        map
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, name: &str, value: &str, problems: &mut Vec<String>) {
    match value.parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => problems.push(format!("{}{} is not a valid number: {}", ENV_PREFIX, name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_empty());
        assert_eq!(config.chunking.chunk_size, 320);
        assert_eq!(config.chunking.overlap_size(), 38);
        assert_eq!(config.math.kgram_size, 3);
        assert!(config.enrichment.fallback_on_error);
    }

    #[test]
    fn test_validation_lists_every_problem() {
        let mut config = PipelineConfig::default();
        config.chunking.chunk_size = 0;
        config.chunking.overlap_ratio = 1.5;
        config.monitoring.max_error_rate = 0.01;

        let errors = config.validate();
        assert!(errors.contains(&"chunk_size must be positive".to_string()));
        assert!(errors.contains(&"overlap_ratio must be between 0 and 1".to_string()));
        assert!(errors.contains(&"warning_error_rate must not exceed max_error_rate".to_string()));

        match config.validated() {
            Err(Error::InvalidConfig(list)) => assert_eq!(list.len(), errors.len()),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_monitoring_ranges() {
        let mut config = PipelineConfig::default();
        config.monitoring.max_memory_usage = 150.0;
        config.monitoring.max_cpu_usage = -1.0;
        config.monitoring.warning_error_rate = -0.5;

        assert_eq!(
            config.validate(),
            vec![
                "warning_error_rate must be between 0 and 1".to_string(),
                "max_memory_usage must be between 0 and 100".to_string(),
                "max_cpu_usage must be between 0 and 100".to_string(),
            ]
        );
    }

    #[test]
    fn test_defaults_match_serde_defaults() {
        let parsed: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.to_map(), PipelineConfig::default().to_map());
    }

    #[test]
    fn test_toml_partial_sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [chunking]
            chunk_size = 500

            [enrichment]
            enable_glossary_extraction = false

            [classification.type_floors]
            equation = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap_ratio, 0.12);
        assert!(!config.enrichment.enable_glossary_extraction);
        assert!(config.enrichment.enable_asset_processing);
        assert_eq!(config.classification.floor_for(ContentType::Equation), 0.5);
        assert_eq!(config.classification.floor_for(ContentType::Table), 0.3);
    }

    #[test]
    fn test_toml_rejects_invalid_values() {
        let result = PipelineConfig::from_toml_str("[chunking]\noverlap_ratio = -0.2\n");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::default()
            .with_overrides(vec![
                ("SCIDOC_CHUNK_SIZE", "512"),
                ("SCIDOC_MATH_PROCESSING", "0"),
                ("SCIDOC_ASSET_PROCESSING", "TRUE"),
                ("SCIDOC_GLOSSARY_EXTRACTION", "yes"),
                ("SCIDOC_PARALLEL_DOCUMENTS", "2"),
                ("UNRELATED", "value"),
            ])
            .unwrap();

        assert_eq!(config.chunking.chunk_size, 512);
        assert!(!config.enrichment.enable_mathematical_processing);
        assert!(config.enrichment.enable_asset_processing);
        assert!(!config.enrichment.enable_glossary_extraction);
        assert_eq!(config.processing.worker_count(), 2);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let result = PipelineConfig::default().with_overrides(vec![("SCIDOC_OVERLAP_RATIO", "lots")]);
        match result {
            Err(Error::InvalidConfig(list)) => assert!(list[0].contains("SCIDOC_OVERLAP_RATIO")),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scidoc.toml");
        std::fs::write(&path, "[math]\nkgram_size = 4\n").unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.math.kgram_size, 4);
    }

    #[test]
    fn test_to_map() {
        let map = PipelineConfig::default().to_map();
        assert_eq!(map["chunk_size"], serde_json::json!(320));
        assert_eq!(map["enable_mathematical_processing"], serde_json::json!(true));
        assert!(map.contains_key("max_error_rate"));
    }
}
