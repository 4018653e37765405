use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<StreamConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());

    let config = parse_config(&content)?;

    info!("Configuration loaded successfully");
    Ok(config)
}

/// Parse a YAML document after environment variable substitution
pub fn parse_config(content: &str) -> Result<StreamConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: StreamConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    Ok(config)
}

#[instrument]
pub fn generate_default_config() -> StreamConfig {
    StreamConfig {
        engine: EngineSettings::default(),
        windows: WindowSettings {
            candle_intervals: vec!["1m".to_string(), "5m".to_string(), "1h".to_string()],
            ..WindowSettings::default()
        },
        indicators: IndicatorSettings::default(),
        normalizer: NormalizerSettings::default(),
        buffer: BufferSettings::default(),
        risk: RiskSettings::default(),
        compute: ComputeSettings::default(),
    }
}

#[instrument]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &StreamConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_is_valid() {
        let config = generate_default_config();
        let report = validate_config(&config);
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!(
            "streamx-config-{}.yaml",
            std::process::id()
        ));
        let mut config = generate_default_config();
        config.windows.session_gap_ms = 12_345;

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded.windows.session_gap_ms, 12_345);
        assert_eq!(loaded.windows.candle_intervals, config.windows.candle_intervals);
    }

    #[test]
    fn test_parse_config_rejects_bad_yaml() {
        assert!(parse_config("windows: [unclosed").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_config("/definitely/not/here.yaml").is_err());
    }
}
