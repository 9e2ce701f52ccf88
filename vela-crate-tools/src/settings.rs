use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;

/// 配置文件读取错误
#[derive(Debug)]
pub enum SettingsError {
    Io { path: String, source: std::io::Error },
    Parse(toml::de::Error),
}
impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io { path, source } => write!(f, "failed to read settings file '{path}': {source}"),
            SettingsError::Parse(err) => write!(f, "failed to parse settings: {err}"),
        }
    }
}
impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io { source, .. } => Some(source),
            SettingsError::Parse(err) => Some(err),
        }
    }
}

/// 从 TOML 字符串读取配置
pub fn load_toml_str<T: DeserializeOwned>(content: &str) -> Result<T, SettingsError> {
    toml::from_str(content).map_err(SettingsError::Parse)
}

/// 从 TOML 文件读取配置
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, SettingsError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let value = load_toml_str(&content)?;
    log::info!("settings loaded from {}", path.display());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogSettings;

    #[derive(Debug, serde::Deserialize, Default)]
    #[serde(default)]
    struct Sample {
        depth: u32,
        log: LogSettings,
    }

    #[test]
    fn test_load_partial_toml() {
        let sample: Sample = load_toml_str("depth = 2\n[log]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(sample.depth, 2);
        assert_eq!(sample.log.level, "debug");
        assert!(sample.log.filters.is_none());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_toml::<Sample>("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
