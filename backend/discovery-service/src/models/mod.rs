use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content category used for per-type devaluation tuning.
///
/// Unrecognized categories coming from external stats degrade to
/// `General` instead of failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    News,
    Entertainment,
    Educational,
    Evergreen,
    General,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::News => "news",
            ContentCategory::Entertainment => "entertainment",
            ContentCategory::Educational => "educational",
            ContentCategory::Evergreen => "evergreen",
            ContentCategory::General => "general",
        }
    }

    /// Parse an external category tag, falling back to `General`.
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "news" => ContentCategory::News,
            "entertainment" => ContentCategory::Entertainment,
            "educational" => ContentCategory::Educational,
            "evergreen" => ContentCategory::Evergreen,
            _ => ContentCategory::General,
        }
    }
}

impl Default for ContentCategory {
    fn default() -> Self {
        ContentCategory::General
    }
}

/// How thoroughly a candidate was viewed when it was last seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewQuality {
    QuickScroll,
    EngagedView,
    PartialInteraction,
}

impl ViewQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewQuality::QuickScroll => "quick_scroll",
            ViewQuality::EngagedView => "engaged_view",
            ViewQuality::PartialInteraction => "partial_interaction",
        }
    }
}

/// Per-content engagement aggregate, written by the external interaction
/// path and read-only here. Missing stats default to zero engagement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementStats {
    pub total_interactions: u64,
    /// Interactions per hour over the trailing window.
    pub interactions_per_hour: f32,
    #[serde(default)]
    pub category: ContentCategory,
}

/// Seen-history record for one candidate, read from external storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewEvent {
    pub candidate_id: Uuid,
    pub last_seen_at: DateTime<Utc>,
    pub view_quality: ViewQuality,
}

/// Viewing-session record. Created on first activity after timeout
/// expiry; refreshed on each activity event; implicitly expires once the
/// timeout elapses without activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub is_new_session: bool,
    pub session_start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Candidate with its materialized inputs: embedding borrowed from the
/// vector index plus the engagement aggregate.
#[derive(Debug, Clone)]
pub struct CandidateContent {
    pub candidate_id: Uuid,
    pub embedding: Vec<f32>,
    pub published_at: DateTime<Utc>,
    pub stats: EngagementStats,
}

/// Per-request scoring result, discarded after the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate_id: Uuid,
    pub raw_similarity: f32,
    pub blended_score: f32,
    pub retention_multiplier: f32,
    pub final_score: f32,
}

/// One page of ranked results.
#[derive(Debug, Clone)]
pub struct RankedPage {
    pub items: Vec<ScoredCandidate>,
    /// Opaque cursor for the next page; `None` once exhausted.
    pub next_cursor: Option<String>,
    pub served_from_cache: bool,
    pub stats: RankingStats,
}

/// Per-request ranking observability counters.
#[derive(Debug, Clone, Default)]
pub struct RankingStats {
    pub candidate_count: usize,
    pub scored_count: usize,
    /// Candidates that were in the seen-history and got devalued.
    pub devalued_count: usize,
    /// Candidates dropped because their embedding dimension did not
    /// match the query vector.
    pub dropped_dimension_mismatch: usize,
    pub returned_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_fallback() {
        assert_eq!(ContentCategory::parse("news"), ContentCategory::News);
        assert_eq!(ContentCategory::parse("NEWS"), ContentCategory::News);
        assert_eq!(
            ContentCategory::parse("interpretive-dance"),
            ContentCategory::General
        );
        assert_eq!(ContentCategory::parse(""), ContentCategory::General);
    }

    #[test]
    fn test_view_quality_serde_names() {
        let json = serde_json::to_string(&ViewQuality::QuickScroll).unwrap();
        assert_eq!(json, "\"quick_scroll\"");
        let parsed: ViewQuality = serde_json::from_str("\"engaged_view\"").unwrap();
        assert_eq!(parsed, ViewQuality::EngagedView);
    }

    #[test]
    fn test_missing_stats_default() {
        let stats = EngagementStats::default();
        assert_eq!(stats.total_interactions, 0);
        assert_eq!(stats.interactions_per_hour, 0.0);
        assert_eq!(stats.category, ContentCategory::General);
    }
}
