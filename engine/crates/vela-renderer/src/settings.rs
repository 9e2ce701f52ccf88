use std::path::Path;

use vela_crate_tools::{LogSettings, SettingsError, load_toml, load_toml_str};

/// 渲染器配置，所有字段都可以在 TOML 中省略
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// 同时在飞的帧数，也是 ring buffer 和 descriptor set 的拷贝数
    pub buffering_count: u32,
    /// 检查调用约定，违反时返回错误并记录日志
    pub validation: bool,
    /// 使用 rayon 并行录制不同的渲染图
    pub parallel_graph_recording: bool,
    /// descriptor pool 在预留数量之外额外分配的 set
    pub descriptor_pool_headroom: u32,
    pub log: LogSettings,
}
impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            buffering_count: Self::DEFAULT_BUFFERING_COUNT,
            validation: cfg!(debug_assertions),
            parallel_graph_recording: false,
            descriptor_pool_headroom: 0,
            log: LogSettings::default(),
        }
    }
}
impl RendererSettings {
    pub const DEFAULT_BUFFERING_COUNT: u32 = 3;
    pub const MAX_BUFFERING_COUNT: u32 = 4;

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        load_toml(path).map(Self::sanitized)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        load_toml_str(content).map(Self::sanitized)
    }

    /// 把超出范围的值收回到合法范围
    pub fn sanitized(mut self) -> Self {
        let clamped = self.buffering_count.clamp(1, Self::MAX_BUFFERING_COUNT);
        if clamped != self.buffering_count {
            log::warn!("buffering_count {} out of range, using {clamped}", self.buffering_count);
            self.buffering_count = clamped;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RendererSettings::from_toml_str("").unwrap();
        assert_eq!(settings, RendererSettings::default());
        assert_eq!(settings.buffering_count, 3);
        assert_eq!(settings.validation, cfg!(debug_assertions));
        assert!(!settings.parallel_graph_recording);
    }

    #[test]
    fn test_partial_file() {
        let settings = RendererSettings::from_toml_str(
            r#"
            buffering_count = 2
            parallel_graph_recording = true

            [log]
            level = "debug"
            filters = "vela_render_graph=trace"
            "#,
        )
        .unwrap();
        assert_eq!(settings.buffering_count, 2);
        assert!(settings.parallel_graph_recording);
        assert_eq!(settings.descriptor_pool_headroom, 0);
        assert_eq!(settings.log.level_filter(), log::LevelFilter::Debug);
        assert_eq!(settings.log.filters.as_deref(), Some("vela_render_graph=trace"));
    }

    #[test]
    fn test_buffering_count_clamped() {
        assert_eq!(RendererSettings::from_toml_str("buffering_count = 0").unwrap().buffering_count, 1);
        assert_eq!(RendererSettings::from_toml_str("buffering_count = 9").unwrap().buffering_count, 4);
    }

    #[test]
    fn test_parse_error() {
        let err = RendererSettings::from_toml_str("buffering_count = \"three\"").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
