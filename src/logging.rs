//! Logging Setup
//!
//! tracing-subscriber の初期化。標準出力は stdio トランスポートが使うため、
//! コンソール出力は常に stderr へ書き出す。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// ログファイル名の接頭辞
pub const LOG_FILE_PREFIX: &str = "rds-monitoring-mcp.log";

/// ログ設定
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// ログレベルまたは EnvFilter ディレクティブ（RUST_LOG が優先）
    pub level: String,
    pub format: LogFormat,
    /// 指定した場合のみファイルにも出力
    pub log_dir: Option<PathBuf>,
    pub rotation: LogRotation,
    /// 指定日数より古いログファイルを起動時に削除
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// 日次ローテーション
    Daily,
    /// 時間毎ローテーション
    Hourly,
    /// ローテーションなし
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            log_dir: None,
            rotation: LogRotation::Daily,
            retention_days: None,
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// カスタムログディレクトリを設定
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        EnvFilter::try_new(&self.level)
            .map(|_| ())
            .map_err(|e| Error::Config(format!("logging.level '{}' is invalid: {}", self.level, e)))
    }
}

/// ログシステムを初期化
///
/// Keep the returned guard alive for the life of the process, or buffered
/// file output is lost.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let mut layers: Vec<Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>> = Vec::new();
    layers.push(match config.format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Human => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    });

    let mut guard = None;
    if let Some(log_dir) = &config.log_dir {
        ensure_log_dir(log_dir)?;
        let file_appender = match config.rotation {
            LogRotation::Daily => rolling::daily(log_dir, LOG_FILE_PREFIX),
            LogRotation::Hourly => rolling::hourly(log_dir, LOG_FILE_PREFIX),
            LogRotation::Never => rolling::never(log_dir, LOG_FILE_PREFIX),
        };
        let (writer, worker_guard) = non_blocking(file_appender);
        guard = Some(worker_guard);
        layers.push(match config.format {
            LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
            LogFormat::Human => fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    tracing::info!("Logging initialized (level: {})", config.level);
    if let Some(log_dir) = &config.log_dir {
        tracing::info!("Writing log files to {}", log_dir.display());
        if let Some(days) = config.retention_days {
            match cleanup_old_logs_by_age(log_dir, days) {
                Ok(removed) if removed > 0 => {
                    tracing::info!("Removed {} log files older than {} days", removed, days)
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to apply log retention: {}", e),
            }
        }
    }

    Ok(guard)
}

/// ログディレクトリを確保
fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// 日数ベースでログファイルを削除し、削除件数を返す
pub fn cleanup_old_logs_by_age(log_dir: &Path, max_days: u32) -> Result<usize> {
    let max_age = Duration::from_secs(u64::from(max_days) * 24 * 60 * 60);
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !is_log_file(&path) {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified());
        if matches!(modified, Ok(modified) if modified < cutoff) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!("Removed old log file {}", path.display());
                }
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }

    Ok(removed)
}

fn is_log_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Human);
        assert!(config.log_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_directive_levels_accepted() {
        let config = LogConfig::default().with_level("rds_monitoring_mcp=debug,warn");
        config.validate().unwrap();
    }

    #[test]
    fn test_ensure_log_dir() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("a").join("logs");
        ensure_log_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_cleanup_only_touches_log_files() {
        let temp = tempfile::tempdir().unwrap();
        let log = temp.path().join(format!("{}.2025-06-01", LOG_FILE_PREFIX));
        let other = temp.path().join("notes.txt");
        fs::write(&log, "old").unwrap();
        fs::write(&other, "keep").unwrap();

        // Fresh files are younger than any whole-day cutoff.
        assert_eq!(cleanup_old_logs_by_age(temp.path(), 1).unwrap(), 0);
        assert_eq!(cleanup_old_logs_by_age(temp.path(), 0).unwrap(), 1);
        assert!(!log.exists());
        assert!(other.exists());
    }
}
