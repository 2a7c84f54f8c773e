//! Wait-Event Classifier
//!
//! Performance Insights のサンプルを対象（SQL ID / 待機イベント名）ごとに集計し、
//! 負荷寄与の降順でランク付けする。

use super::types::{Dimension, Finding, TimeWindow, WaitEventCategory, WaitEventSample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// 上位何件を返すかのデフォルト
pub const DEFAULT_FINDING_LIMIT: usize = 10;
/// 上位件数の上限
pub const MAX_FINDING_LIMIT: usize = 50;

/// 分類結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub window: TimeWindow,
    pub dimension: Dimension,
    pub findings: Vec<Finding>,
    /// 入力サンプル総数
    pub total_samples: usize,
    /// 不正値・対象不明のため除外したサンプル数
    pub dropped_samples: usize,
}

impl Classification {
    /// 所見スコアの合計
    pub fn total_score(&self) -> f64 {
        self.findings.iter().map(|f| f.score).sum()
    }
}

#[derive(Default)]
struct SubjectGroup {
    score: f64,
    sample_count: usize,
    category: Option<WaitEventCategory>,
}

/// 待機イベント分類器
///
/// Scoring: a subject's score is the plain sum of the `load` contributions
/// of its valid samples. Ranking is by score descending, then subject
/// ascending, which gives a total order.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitEventClassifier {
    limit: Option<usize>,
}

impl WaitEventClassifier {
    pub fn new() -> Self {
        Self { limit: None }
    }

    /// ランク付け後に上位 `limit` 件へ切り詰める
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit.clamp(1, MAX_FINDING_LIMIT)),
        }
    }

    pub fn classify(
        &self,
        window: TimeWindow,
        dimension: Dimension,
        samples: &[WaitEventSample],
    ) -> Classification {
        let mut groups: BTreeMap<String, SubjectGroup> = BTreeMap::new();
        let mut dropped = 0usize;

        for sample in samples {
            if !sample.has_valid_load() {
                dropped += 1;
                continue;
            }
            let Some(subject) = subject_of(dimension, sample) else {
                dropped += 1;
                continue;
            };

            let group = groups.entry(subject.to_string()).or_default();
            group.score += sample.load;
            group.sample_count += 1;
            if dimension == Dimension::WaitEvent && group.category.is_none() {
                group.category = Some(sample.category);
            }
        }

        let mut ranked: Vec<(String, SubjectGroup)> = groups.into_iter().collect();
        ranked.sort_by(|(a_subject, a), (b_subject, b)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a_subject.cmp(b_subject))
        });
        if let Some(limit) = self.limit {
            ranked.truncate(limit);
        }

        let findings: Vec<Finding> = ranked
            .into_iter()
            .enumerate()
            .map(|(index, (subject, group))| Finding {
                rank: index as u32 + 1,
                subject,
                category: group.category,
                score: group.score,
                sample_count: group.sample_count,
            })
            .collect();

        if dropped > 0 {
            debug!(
                "Dropped {} of {} {} samples with invalid load or missing subject",
                dropped,
                samples.len(),
                dimension
            );
        }

        Classification {
            window,
            dimension,
            findings,
            total_samples: samples.len(),
            dropped_samples: dropped,
        }
    }
}

fn subject_of(dimension: Dimension, sample: &WaitEventSample) -> Option<&str> {
    let subject = if dimension.groups_by_sql() {
        sample.tags.sql_id.as_deref()?
    } else {
        sample.event_name.as_str()
    };
    if subject.is_empty() {
        None
    } else {
        Some(subject)
    }
}
