mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./wavecast.toml",
        "~/.config/wavecast/config.toml",
        "/etc/wavecast/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    let config = Config::default();
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.transcode.encoder.trim().is_empty() {
        anyhow::bail!("Transcode encoder cannot be empty");
    }
    if config.transcode.poll_ms == 0 {
        anyhow::bail!("Transcode poll interval cannot be 0");
    }
    if config.transcode.sweep_secs == 0 {
        anyhow::bail!("Transcode sweep interval cannot be 0");
    }

    if !config.library.media_dir.exists() {
        tracing::warn!("Media directory does not exist: {:?}", config.library.media_dir);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 6500);
        assert_eq!(config.transcode.encoder, "ffmpeg");
        assert_eq!(config.transcode.retention_secs, 30);
        assert_eq!(config.transcode.poll_ms, 250);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [transcode]
            encoder = "avconv"
            retention_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.transcode.encoder, "avconv");
        assert_eq!(config.transcode.retention_secs, 0);
        // Untouched sections keep their defaults.
        assert_eq!(config.transcode.sweep_secs, 10);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_port_zero_rejected() {
        let config: Config = toml::from_str("[server]\nport = 0").unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config: Config = toml::from_str("[transcode]\npoll_ms = 0").unwrap();
        assert!(validate_config(&config).is_err());
    }
}
