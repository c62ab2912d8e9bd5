use serde::Deserialize;

/// Root engine configuration. Loaded from environment variables with the
/// prefix `CADENCE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub deliverability: DeliverabilityConfig,
    #[serde(default)]
    pub suppression: SuppressionConfig,
    #[serde(default)]
    pub experiments: ExperimentsConfig,
    #[serde(default)]
    pub autoenroll: AutoEnrollConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Ultimate fallback when no timezone can be detected for a lead.
    #[serde(default = "default_fallback_timezone")]
    pub fallback_timezone: String,
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliverabilityConfig {
    #[serde(default = "default_validation_chunk_size")]
    pub validation_chunk_size: usize,
    /// MX verification is best-effort; disabled it always passes.
    #[serde(default = "default_mx_check_enabled")]
    pub mx_check_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuppressionConfig {
    /// Soft bounces tolerated before the address is suppressed.
    #[serde(default = "default_soft_bounce_threshold")]
    pub soft_bounce_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentsConfig {
    #[serde(default = "default_min_sample_size")]
    pub default_min_sample_size: u64,
    #[serde(default = "default_traffic_percentage")]
    pub default_traffic_percentage: u32,
    /// Unsubscribe rate above which a variant earns an advisory warning.
    #[serde(default = "default_unsubscribe_warn_rate")]
    pub unsubscribe_warn_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoEnrollConfig {
    /// Upper bound on leads resolved by one batch trigger evaluation.
    #[serde(default = "default_max_batch_leads")]
    pub max_batch_leads: usize,
    #[serde(default = "default_audit_log_capacity")]
    pub audit_log_capacity: usize,
}

// Default functions
fn default_fallback_timezone() -> String {
    "America/New_York".to_string()
}
fn default_bulk_chunk_size() -> usize {
    50
}
fn default_validation_chunk_size() -> usize {
    25
}
fn default_mx_check_enabled() -> bool {
    false
}
fn default_soft_bounce_threshold() -> u32 {
    3
}
fn default_min_sample_size() -> u64 {
    100
}
fn default_traffic_percentage() -> u32 {
    100
}
fn default_unsubscribe_warn_rate() -> f64 {
    0.02
}
fn default_max_batch_leads() -> usize {
    100
}
fn default_audit_log_capacity() -> usize {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_timezone: default_fallback_timezone(),
            bulk_chunk_size: default_bulk_chunk_size(),
        }
    }
}

impl Default for DeliverabilityConfig {
    fn default() -> Self {
        Self {
            validation_chunk_size: default_validation_chunk_size(),
            mx_check_enabled: default_mx_check_enabled(),
        }
    }
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            soft_bounce_threshold: default_soft_bounce_threshold(),
        }
    }
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            default_min_sample_size: default_min_sample_size(),
            default_traffic_percentage: default_traffic_percentage(),
            unsubscribe_warn_rate: default_unsubscribe_warn_rate(),
        }
    }
}

impl Default for AutoEnrollConfig {
    fn default() -> Self {
        Self {
            max_batch_leads: default_max_batch_leads(),
            audit_log_capacity: default_audit_log_capacity(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            deliverability: DeliverabilityConfig::default(),
            suppression: SuppressionConfig::default(),
            experiments: ExperimentsConfig::default(),
            autoenroll: AutoEnrollConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CADENCE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.fallback_timezone, "America/New_York");
        assert_eq!(cfg.engine.bulk_chunk_size, 50);
        assert!(!cfg.deliverability.mx_check_enabled);
        assert_eq!(cfg.experiments.default_traffic_percentage, 100);
    }
}
