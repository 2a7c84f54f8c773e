//! Log Reader and Filtering
//!
//! ログファイルの生行を読み取り、パターンで絞り込み、再開可能なカーソルを返す。
//! Pagination is over raw lines, so a cursor means the same thing whatever
//! pattern the caller applies.

use super::quality::DataQualityPolicy;
use super::retry::RetryPolicy;
use super::types::LogExcerpt;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// 1 回の読み取り行数のデフォルト
pub const DEFAULT_LOG_LINES: usize = 100;
/// 1 回の読み取り行数の上限（この値未満）
pub const MAX_LOG_LINES: usize = 10_000;

/// 正規表現パターンの接頭辞
const REGEX_PREFIX: &str = "re:";

/// ログファイルのメタデータ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFileSummary {
    pub log_file_name: String,
    pub last_written: DateTime<Utc>,
    pub size: u64,
}

/// 上流から読み取った生ログ行
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLogPortion {
    pub lines: Vec<Vec<u8>>,
    pub additional_data_pending: bool,
}

/// ログ提供元（外部コラボレーター）
#[async_trait]
pub trait LogReader: Send + Sync {
    /// インスタンスのログファイル一覧
    async fn list_log_files(&self, db_instance_id: &str) -> Result<Vec<LogFileSummary>>;

    /// 生の行オフセット `offset` から最大 `max_lines` 行を読み取る
    async fn read_lines(
        &self,
        db_instance_id: &str,
        log_file_name: &str,
        offset: u64,
        max_lines: usize,
    ) -> Result<RawLogPortion>;
}

/// 行フィルタ（部分一致または `re:` 接頭辞付きの正規表現）
#[derive(Debug, Clone)]
pub enum LogPattern {
    Substring(String),
    Regex(Regex),
}

impl LogPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        match pattern.strip_prefix(REGEX_PREFIX) {
            Some(expr) => Regex::new(expr)
                .map(LogPattern::Regex)
                .map_err(|e| Error::InvalidParams(format!("invalid log pattern regex: {}", e))),
            None => Ok(LogPattern::Substring(pattern.to_string())),
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        match self {
            LogPattern::Substring(needle) => line.contains(needle.as_str()),
            LogPattern::Regex(regex) => regex.is_match(line),
        }
    }
}

/// 再開用カーソル（ログファイル名 + 生行オフセット）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCursor {
    pub log_file_name: String,
    pub offset: u64,
}

impl LogCursor {
    pub fn new(log_file_name: impl Into<String>, offset: u64) -> Self {
        Self {
            log_file_name: log_file_name.into(),
            offset,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    /// カーソル文字列を復号する（`"0"` は先頭を意味する）
    pub fn decode(token: &str, log_file_name: &str) -> Result<Self> {
        if token.is_empty() || token == "0" {
            return Ok(Self::new(log_file_name, 0));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| Error::InvalidParams("malformed log cursor".into()))?;
        let cursor: LogCursor = serde_json::from_slice(&bytes)
            .map_err(|_| Error::InvalidParams("malformed log cursor".into()))?;
        if cursor.log_file_name != log_file_name {
            return Err(Error::InvalidParams(format!(
                "cursor was issued for '{}', not '{}'",
                cursor.log_file_name, log_file_name
            )));
        }
        Ok(cursor)
    }
}

/// ログ読み取り要求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogReadRequest {
    #[serde(alias = "db_instance_identifier")]
    pub db_instance_id: String,
    pub log_file_name: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default, alias = "marker")]
    pub cursor: Option<String>,
    #[serde(default = "default_log_lines", alias = "number_of_lines")]
    pub max_lines: usize,
}

fn default_log_lines() -> usize {
    DEFAULT_LOG_LINES
}

impl LogReadRequest {
    pub fn new(db_instance_id: impl Into<String>, log_file_name: impl Into<String>) -> Self {
        Self {
            db_instance_id: db_instance_id.into(),
            log_file_name: log_file_name.into(),
            pattern: None,
            cursor: None,
            max_lines: DEFAULT_LOG_LINES,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }
}

/// 読み取り結果（抜粋 + 次のカーソル）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    pub excerpt: LogExcerpt,
    /// `None` when the file is exhausted
    pub next_cursor: Option<String>,
    pub additional_data_pending: bool,
}

/// ログの読み取りとフィルタリング
#[derive(Clone)]
pub struct LogPager {
    reader: Arc<dyn LogReader>,
    retry: RetryPolicy,
    quality: DataQualityPolicy,
}

impl LogPager {
    pub fn new(reader: Arc<dyn LogReader>, retry: RetryPolicy, quality: DataQualityPolicy) -> Self {
        Self {
            reader,
            retry,
            quality,
        }
    }

    /// 空でないログファイルの一覧（最大 `max_items` 件）
    pub async fn list_log_files(
        &self,
        db_instance_id: &str,
        max_items: usize,
    ) -> Result<Vec<LogFileSummary>> {
        let files = self
            .retry
            .execute("list_log_files", || self.reader.list_log_files(db_instance_id))
            .await?;
        Ok(files
            .into_iter()
            .filter(|file| file.size > 0)
            .take(max_items)
            .collect())
    }

    pub async fn read(&self, request: &LogReadRequest) -> Result<LogPage> {
        if request.max_lines == 0 || request.max_lines >= MAX_LOG_LINES {
            return Err(Error::InvalidParams(format!(
                "max_lines must be between 1 and {}",
                MAX_LOG_LINES - 1
            )));
        }
        let pattern = request.pattern.as_deref().map(LogPattern::parse).transpose()?;
        let cursor = match request.cursor.as_deref() {
            Some(token) => LogCursor::decode(token, &request.log_file_name)?,
            None => LogCursor::new(&request.log_file_name, 0),
        };

        let portion = self
            .retry
            .execute("read_log_lines", || {
                self.reader.read_lines(
                    &request.db_instance_id,
                    &request.log_file_name,
                    cursor.offset,
                    request.max_lines,
                )
            })
            .await?;

        let page = build_page(
            &request.log_file_name,
            request.pattern.clone(),
            pattern.as_ref(),
            cursor.offset,
            portion,
        )?;
        self.quality.check(
            "log lines",
            page.excerpt.raw_line_count() as usize,
            page.excerpt.skipped_lines,
        )?;

        info!(
            "Read {} of {} lines from {}/{} (offset {})",
            page.excerpt.lines.len(),
            page.excerpt.raw_line_count(),
            request.db_instance_id,
            request.log_file_name,
            cursor.offset
        );
        Ok(page)
    }
}

fn build_page(
    log_file_name: &str,
    raw_pattern: Option<String>,
    pattern: Option<&LogPattern>,
    offset: u64,
    portion: RawLogPortion,
) -> Result<LogPage> {
    let raw_count = portion.lines.len() as u64;
    let mut excerpt = LogExcerpt::empty(log_file_name, offset, raw_pattern);
    excerpt.end_line = offset + raw_count;

    for raw in portion.lines {
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(_) => {
                excerpt.skipped_lines += 1;
                continue;
            }
        };
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if pattern.map_or(true, |p| p.matches(&line)) {
            excerpt.lines.push(line);
        }
    }
    if excerpt.skipped_lines > 0 {
        debug!(
            "Skipped {} non UTF-8 lines in {}",
            excerpt.skipped_lines, log_file_name
        );
    }

    let pending = portion.additional_data_pending && raw_count > 0;
    let next_cursor = if pending {
        Some(LogCursor::new(log_file_name, excerpt.end_line).encode()?)
    } else {
        None
    };

    Ok(LogPage {
        excerpt,
        next_cursor,
        additional_data_pending: pending,
    })
}
