//! RDS Recommendations

use super::types::parse_timestamp;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 推奨事項の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Active,
    Pending,
    Resolved,
    Dismissed,
}

/// 推奨事項の重要度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSeverity {
    High,
    Medium,
    Low,
    Informational,
}

/// RDS の推奨事項
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommendation_id: String,
    /// DbiResourceId またはクラスタリソース ID
    pub resource_id: String,
    pub status: RecommendationStatus,
    pub severity: RecommendationSeverity,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// 推奨事項のフィルタ（ツール引数）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationFilter {
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub status: Option<RecommendationStatus>,
    #[serde(default)]
    pub severity: Option<RecommendationSeverity>,
    #[serde(default)]
    pub last_updated_after: Option<String>,
    #[serde(default)]
    pub last_updated_before: Option<String>,
}

/// 解決済みのフィルタ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecommendationQuery {
    pub resource_id: Option<String>,
    pub status: Option<RecommendationStatus>,
    pub severity: Option<RecommendationSeverity>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

impl RecommendationFilter {
    pub fn resolve(&self) -> Result<RecommendationQuery> {
        Ok(RecommendationQuery {
            resource_id: self.resource_id.clone(),
            status: self.status,
            severity: self.severity,
            updated_after: self
                .last_updated_after
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            updated_before: self
                .last_updated_before
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

impl RecommendationQuery {
    pub fn matches(&self, recommendation: &Recommendation) -> bool {
        self.resource_id
            .as_ref()
            .map_or(true, |id| &recommendation.resource_id == id)
            && self.status.map_or(true, |s| recommendation.status == s)
            && self.severity.map_or(true, |s| recommendation.severity == s)
            && self
                .updated_after
                .map_or(true, |after| recommendation.updated_at > after)
            && self
                .updated_before
                .map_or(true, |before| recommendation.updated_at < before)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationList {
    pub recommendations: Vec<Recommendation>,
    pub count: usize,
}

/// 推奨事項の提供元（外部コラボレーター）
#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn describe_recommendations(
        &self,
        query: &RecommendationQuery,
    ) -> Result<Vec<Recommendation>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn recommendation(severity: RecommendationSeverity) -> Recommendation {
        Recommendation {
            recommendation_id: "rec-1".into(),
            resource_id: "db-ABC".into(),
            status: RecommendationStatus::Active,
            severity,
            category: "performance efficiency".into(),
            description: "Enable Performance Insights".into(),
            recommended_actions: Vec::new(),
            updated_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_filter_by_severity_and_time() {
        let query = RecommendationFilter {
            severity: Some(RecommendationSeverity::High),
            last_updated_after: Some("2025-05-01".into()),
            ..Default::default()
        }
        .resolve()
        .unwrap();

        assert!(query.matches(&recommendation(RecommendationSeverity::High)));
        assert!(!query.matches(&recommendation(RecommendationSeverity::Low)));
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let filter = RecommendationFilter {
            last_updated_before: Some("not-a-date".into()),
            ..Default::default()
        };
        assert!(filter.resolve().is_err());
    }
}
