//! Server Configuration
//!
//! デフォルト値 → TOML ファイル → 環境変数 (`RDS_MCP__*`) → CLI の順に上書きする。

use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::monitoring::classifier::MAX_FINDING_LIMIT;
use crate::monitoring::logs::MAX_LOG_LINES;
use crate::monitoring::report::SynthesisSettings;
use crate::monitoring::retry::{self, RetryPolicy};
use crate::monitoring::{DataQualityPolicy, RateLimit, RetentionPolicy, ServiceSettings};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// 環境変数のプレフィックス（区切りは `__`）
pub const ENV_PREFIX: &str = "RDS_MCP";

/// `--config` 未指定時に探す設定ファイル
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = [
    "rds-monitoring-mcp.toml",
    "config/rds-monitoring-mcp.toml",
];

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct McpConfig {
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
    pub retry: RetryPolicy,
    pub report: ReportConfig,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP サーバーのバインドアドレス (stdio=false の場合)
    pub bind_addr: String,
    /// 標準入出力モードで動作 (MCP クライアント用)
    pub stdio: bool,
    /// 変更系ツール（CreatePerformanceReport）を無効化
    pub readonly: bool,
    pub register_resources_as_tools: bool,
    /// 一覧・データポイントの最大件数
    pub max_items: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            stdio: false,
            readonly: true,
            register_resources_as_tools: false,
            max_items: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// 不正サンプル・ログ行の許容破棄率
    pub max_drop_ratio: f64,
    /// インメモリバックエンドのフィクスチャ (JSON)
    pub fixtures: Option<PathBuf>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            max_drop_ratio: DataQualityPolicy::default().max_drop_ratio,
            fixtures: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    pub max_reports: usize,
    pub max_age_hours: u64,
    pub collect_timeout_secs: u64,
    pub optional_section_timeout_secs: u64,
    pub period_seconds: u32,
    pub finding_limit: usize,
    pub log_lines: usize,
    /// CreatePerformanceReport のレート制限
    pub rate_limit_calls: u32,
    pub rate_limit_period_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let retention = RetentionPolicy::default();
        let synthesis = SynthesisSettings::default();
        let rate_limit = RateLimit::default();
        Self {
            max_reports: retention.max_reports,
            max_age_hours: retention.max_age_secs / 3600,
            collect_timeout_secs: synthesis.collect_timeout.as_secs(),
            optional_section_timeout_secs: synthesis.optional_section_timeout.as_secs(),
            period_seconds: synthesis.period_seconds,
            finding_limit: synthesis.finding_limit,
            log_lines: synthesis.log_lines,
            rate_limit_calls: rate_limit.calls,
            rate_limit_period_secs: rate_limit.period.as_secs(),
        }
    }
}

impl McpConfig {
    /// 設定ファイルと `RDS_MCP__*` 環境変数から読み込む
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with_env(
            path,
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
    }

    /// 環境変数ソースを差し替えて読み込む
    pub fn load_with_env(
        path: Option<&Path>,
        environment: config::Environment,
    ) -> anyhow::Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&McpConfig::default())?);

        match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                settings = settings.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(found) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .map(Path::new)
                    .find(|candidate| candidate.exists())
                {
                    info!("Loading configuration from {}", found.display());
                    settings = settings.add_source(config::File::from(found));
                }
            }
        }

        let config: McpConfig = settings
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.max_items == 0 {
            return Err(Error::Config("server.max_items must be at least 1".into()));
        }
        if !self.server.stdio {
            self.server.bind_addr.parse::<SocketAddr>().map_err(|e| {
                Error::Config(format!(
                    "server.bind_addr '{}' is invalid: {}",
                    self.server.bind_addr, e
                ))
            })?;
        }
        if !(0.0..=1.0).contains(&self.monitoring.max_drop_ratio) {
            return Err(Error::Config(
                "monitoring.max_drop_ratio must be between 0.0 and 1.0".into(),
            ));
        }
        retry::validate(&self.retry)?;

        let report = &self.report;
        if report.max_reports == 0 {
            return Err(Error::Config("report.max_reports must be at least 1".into()));
        }
        if report.collect_timeout_secs == 0 || report.optional_section_timeout_secs == 0 {
            return Err(Error::Config("report timeouts must be positive".into()));
        }
        if report.period_seconds == 0 {
            return Err(Error::Config("report.period_seconds must be positive".into()));
        }
        if !(1..=MAX_FINDING_LIMIT).contains(&report.finding_limit) {
            return Err(Error::Config(format!(
                "report.finding_limit must be between 1 and {}",
                MAX_FINDING_LIMIT
            )));
        }
        if report.log_lines == 0 || report.log_lines >= MAX_LOG_LINES {
            return Err(Error::Config(format!(
                "report.log_lines must be between 1 and {}",
                MAX_LOG_LINES - 1
            )));
        }
        if report.rate_limit_calls == 0 || report.rate_limit_period_secs == 0 {
            return Err(Error::Config(
                "report rate limit needs at least one call per positive period".into(),
            ));
        }
        self.logging.validate()
    }

    /// サービス設定へ変換
    pub fn service_settings(&self) -> ServiceSettings {
        let report = &self.report;
        ServiceSettings {
            max_items: self.server.max_items,
            readonly: self.server.readonly,
            retry: self.retry,
            quality: DataQualityPolicy::new(self.monitoring.max_drop_ratio),
            retention: RetentionPolicy {
                max_reports: report.max_reports,
                max_age_secs: report.max_age_hours.saturating_mul(3600),
            },
            synthesis: SynthesisSettings {
                collect_timeout: Duration::from_secs(report.collect_timeout_secs),
                optional_section_timeout: Duration::from_secs(report.optional_section_timeout_secs),
                period_seconds: report.period_seconds,
                finding_limit: report.finding_limit,
                log_lines: report.log_lines,
            },
            report_rate_limit: RateLimit {
                calls: report.rate_limit_calls,
                period: Duration::from_secs(report.rate_limit_period_secs),
            },
        }
    }

    /// サンプル設定ファイルの内容
    pub fn sample_toml() -> Result<String> {
        let body = toml::to_string_pretty(&McpConfig::default())
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(format!(
            r#"# rds-monitoring-mcp configuration
#
# このファイルを rds-monitoring-mcp.toml として保存してください
# 環境変数での上書きも可能です (例: RDS_MCP__SERVER__MAX_ITEMS=50)
#
# [server]
# readonly = true の間は CreatePerformanceReport を公開しません
#
# [retry]
# initial_delay / max_delay はミリ秒

{}"#,
            body
        ))
    }
}
