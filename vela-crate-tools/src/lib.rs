//! Vela 工具集
//!
//! 提供日志初始化、配置文件加载等通用工具。
//!
//! # LogContext
//! 日志上下文由应用层显式创建并持有，不依赖进程级的静态单例。
//!
//! # settings
//! 基于 TOML 的配置文件读取。

pub mod init_log;
pub mod settings;

pub use init_log::{LogContext, LogSettings};
pub use settings::{SettingsError, load_toml, load_toml_str};
