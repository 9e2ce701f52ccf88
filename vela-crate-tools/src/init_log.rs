use std::io::Write;
use std::str::FromStr;

/// 日志配置
///
/// 通常作为 `RendererSettings` 的一部分从 TOML 中读取。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// 全局等级：off / error / warn / info / debug / trace
    pub level: String,
    /// env_logger 风格的附加过滤，例如 `vela_render_graph=debug`
    pub filters: Option<String>,
}
impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filters: None,
        }
    }
}
impl LogSettings {
    /// 解析全局等级，无法识别时退回到 `Info`
    pub fn level_filter(&self) -> log::LevelFilter {
        log::LevelFilter::from_str(&self.level).unwrap_or(log::LevelFilter::Info)
    }
}

/// 日志上下文
///
/// 由应用层对象创建并持有，生命周期和持有者绑定。
/// `log` facade 只允许安装一次 logger，重复创建时第二个上下文不会重新安装，
/// 通过 `already_installed()` 可以得知。
pub struct LogContext {
    settings: LogSettings,
    installed: bool,
}
// new & init
impl LogContext {
    pub fn install(settings: LogSettings) -> Self {
        let installed = build_logger(&settings).try_init().is_ok();
        if installed {
            log::debug!("logger installed, level: {}", settings.level);
        }
        Self { settings, installed }
    }
}
// getters
impl LogContext {
    #[inline]
    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }

    /// 安装时发现已经存在 logger
    #[inline]
    pub fn already_installed(&self) -> bool {
        !self.installed
    }
}
impl Drop for LogContext {
    fn drop(&mut self) {
        log::logger().flush();
    }
}

/// 使用默认配置安装 logger
pub fn init_log() {
    let _ = build_logger(&LogSettings::default()).try_init();
}

fn build_logger(settings: &LogSettings) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .filter(None, settings.level_filter());
    if let Some(filters) = &settings.filters {
        builder.parse_filters(filters);
    }
    builder
}
