// ============================================
// Discovery Configuration
// ============================================
//
// Two configuration surfaces:
// - DevaluationConfig: tunables for seen-content suppression/recovery
// - RankingConfig: blend weights and paging/cache settings
//
// Both are immutable value objects. Reconfiguration builds a new value
// (callers swap an Arc); fields are never mutated in place. Overrides
// arrive as JSON from the external key/value surface and are merged
// over the documented defaults; an override that fails validation is
// rejected with a warning and the defaults are kept. Constructing the
// engine from an invalid config is a hard startup error.

use crate::models::ContentCategory;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be in (0, 1], got {value}")]
    MultiplierOutOfRange { name: &'static str, value: f32 },

    #[error(
        "minimum_retention ({minimum_retention}) must not exceed \
         base_devaluation_multiplier ({base})"
    )]
    RetentionFloorAboveBase { minimum_retention: f32, base: f32 },

    #[error("{name} must be positive, got {value}")]
    NonPositiveThreshold { name: &'static str, value: f64 },

    #[error(
        "engagement_saturation ({saturation}) must exceed \
         high_engagement_threshold ({threshold})"
    )]
    SaturationBelowThreshold { saturation: u64, threshold: u64 },

    #[error("daily_recovery_rate must be in (0, 0.5], got {0}")]
    RecoveryRateOutOfRange(f32),

    #[error("recovery_timeline_days must be in (0, 30], got {0}")]
    RecoveryTimelineOutOfRange(f32),

    #[error("{name} weight must be in [0, 1], got {value}")]
    WeightOutOfRange { name: &'static str, value: f32 },

    #[error("ranking weights must sum to 1.0, got {0}")]
    WeightsDoNotSumToOne(f32),
}

/// Devaluation strength multiplier per view quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewQualityMultipliers {
    pub quick_scroll: f32,
    pub engaged_view: f32,
    pub partial_interaction: f32,
}

impl Default for ViewQualityMultipliers {
    fn default() -> Self {
        Self {
            quick_scroll: 0.4,
            engaged_view: 1.0,
            partial_interaction: 0.7,
        }
    }
}

/// Devaluation strength multiplier per content category.
///
/// Evergreen content devalues the least (it stays relevant on re-view),
/// news the most (stale news is rarely worth resurfacing early).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentTypeMultipliers {
    pub news: f32,
    pub entertainment: f32,
    pub educational: f32,
    pub evergreen: f32,
    pub general: f32,
}

impl Default for ContentTypeMultipliers {
    fn default() -> Self {
        Self {
            news: 1.0,
            entertainment: 0.9,
            educational: 0.7,
            evergreen: 0.5,
            general: 0.8,
        }
    }
}

impl ContentTypeMultipliers {
    pub fn for_category(&self, category: ContentCategory) -> f32 {
        match category {
            ContentCategory::News => self.news,
            ContentCategory::Entertainment => self.entertainment,
            ContentCategory::Educational => self.educational,
            ContentCategory::Evergreen => self.evergreen,
            ContentCategory::General => self.general,
        }
    }
}

/// Tunables for the devaluation engine. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevaluationConfig {
    /// Devaluation strength applied to a fully engaged view at time zero.
    pub base_devaluation_multiplier: f32,
    /// Hard floor for the retention multiplier.
    pub minimum_retention: f32,
    pub view_quality_multipliers: ViewQualityMultipliers,
    pub content_type_multipliers: ContentTypeMultipliers,
    /// Interaction count at which the engagement reduction starts.
    pub high_engagement_threshold: u64,
    /// Interaction count at which the engagement reduction saturates.
    pub engagement_saturation: u64,
    /// Cap on the fractional reduction of devaluation strength.
    pub max_engagement_reduction: f32,
    /// Interactions-per-hour above which content counts as viral.
    pub viral_velocity_threshold: f32,
    /// Retention floor for viral content.
    pub viral_minimum_retention: f32,
    /// Retention floor when the viewer is in a fresh session.
    pub new_session_minimum_retention: f32,
    /// Inactivity gap that ends a viewing session.
    pub session_timeout_ms: i64,
    /// Fraction of remaining devaluation strength recovered per day.
    pub daily_recovery_rate: f32,
    /// Days after which a seen candidate is fully recovered.
    pub recovery_timeline_days: f32,
}

impl Default for DevaluationConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl DevaluationConfig {
    /// Default preset used in production.
    pub fn standard() -> Self {
        Self {
            base_devaluation_multiplier: 0.5,
            minimum_retention: 0.15,
            view_quality_multipliers: ViewQualityMultipliers::default(),
            content_type_multipliers: ContentTypeMultipliers::default(),
            high_engagement_threshold: 100,
            engagement_saturation: 1000,
            max_engagement_reduction: 0.5,
            viral_velocity_threshold: 50.0,
            viral_minimum_retention: 0.7,
            new_session_minimum_retention: 0.5,
            session_timeout_ms: 30 * 60 * 1000,
            daily_recovery_rate: 0.25,
            recovery_timeline_days: 7.0,
        }
    }

    /// Suppresses seen content harder and recovers it more slowly.
    pub fn aggressive() -> Self {
        Self {
            base_devaluation_multiplier: 0.8,
            minimum_retention: 0.05,
            viral_minimum_retention: 0.5,
            new_session_minimum_retention: 0.3,
            daily_recovery_rate: 0.15,
            recovery_timeline_days: 14.0,
            ..Self::standard()
        }
    }

    /// Light suppression with fast recovery.
    pub fn gentle() -> Self {
        Self {
            base_devaluation_multiplier: 0.3,
            minimum_retention: 0.3,
            viral_minimum_retention: 0.85,
            new_session_minimum_retention: 0.7,
            daily_recovery_rate: 0.5,
            recovery_timeline_days: 3.0,
            ..Self::standard()
        }
    }

    /// Look up a preset by its external name.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "standard" => Some(Self::standard()),
            "aggressive" => Some(Self::aggressive()),
            "gentle" => Some(Self::gentle()),
            _ => None,
        }
    }

    /// Validate every tunable. Called both at config load (override
    /// rejection) and at engine construction (startup-fatal).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_multipliers = [
            ("base_devaluation_multiplier", self.base_devaluation_multiplier),
            ("minimum_retention", self.minimum_retention),
            ("max_engagement_reduction", self.max_engagement_reduction),
            ("viral_minimum_retention", self.viral_minimum_retention),
            (
                "new_session_minimum_retention",
                self.new_session_minimum_retention,
            ),
            (
                "view_quality_multipliers.quick_scroll",
                self.view_quality_multipliers.quick_scroll,
            ),
            (
                "view_quality_multipliers.engaged_view",
                self.view_quality_multipliers.engaged_view,
            ),
            (
                "view_quality_multipliers.partial_interaction",
                self.view_quality_multipliers.partial_interaction,
            ),
            ("content_type_multipliers.news", self.content_type_multipliers.news),
            (
                "content_type_multipliers.entertainment",
                self.content_type_multipliers.entertainment,
            ),
            (
                "content_type_multipliers.educational",
                self.content_type_multipliers.educational,
            ),
            (
                "content_type_multipliers.evergreen",
                self.content_type_multipliers.evergreen,
            ),
            (
                "content_type_multipliers.general",
                self.content_type_multipliers.general,
            ),
        ];
        for (name, value) in unit_multipliers {
            if !(value > 0.0 && value <= 1.0) || !value.is_finite() {
                return Err(ConfigError::MultiplierOutOfRange { name, value });
            }
        }

        if self.minimum_retention > self.base_devaluation_multiplier {
            return Err(ConfigError::RetentionFloorAboveBase {
                minimum_retention: self.minimum_retention,
                base: self.base_devaluation_multiplier,
            });
        }

        if self.high_engagement_threshold == 0 {
            return Err(ConfigError::NonPositiveThreshold {
                name: "high_engagement_threshold",
                value: 0.0,
            });
        }
        if self.engagement_saturation <= self.high_engagement_threshold {
            return Err(ConfigError::SaturationBelowThreshold {
                saturation: self.engagement_saturation,
                threshold: self.high_engagement_threshold,
            });
        }
        if !(self.viral_velocity_threshold > 0.0) {
            return Err(ConfigError::NonPositiveThreshold {
                name: "viral_velocity_threshold",
                value: self.viral_velocity_threshold as f64,
            });
        }
        if self.session_timeout_ms <= 0 {
            return Err(ConfigError::NonPositiveThreshold {
                name: "session_timeout_ms",
                value: self.session_timeout_ms as f64,
            });
        }

        if !(self.daily_recovery_rate > 0.0 && self.daily_recovery_rate <= 0.5) {
            return Err(ConfigError::RecoveryRateOutOfRange(self.daily_recovery_rate));
        }
        if !(self.recovery_timeline_days > 0.0 && self.recovery_timeline_days <= 30.0) {
            return Err(ConfigError::RecoveryTimelineOutOfRange(
                self.recovery_timeline_days,
            ));
        }

        Ok(())
    }

    /// Merge a JSON override blob over this config. Invalid JSON or an
    /// override that fails validation is rejected with a warning and
    /// `self` is returned unchanged.
    pub fn with_overrides(self, json: &str) -> Self {
        let overrides: DevaluationOverrides = match serde_json::from_str(json) {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed devaluation override JSON, keeping defaults");
                return self;
            }
        };

        let merged = overrides.apply(self.clone());
        match merged.validate() {
            Ok(()) => {
                info!("Applied devaluation config overrides");
                merged
            }
            Err(e) => {
                warn!(error = %e, "Rejecting invalid devaluation override, keeping defaults");
                self
            }
        }
    }
}

/// JSON-shaped partial override of `DevaluationConfig`. Any subset of
/// fields may be present; unknown fields are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevaluationOverrides {
    pub base_devaluation_multiplier: Option<f32>,
    pub minimum_retention: Option<f32>,
    pub view_quality_multipliers: Option<ViewQualityOverrides>,
    pub content_type_multipliers: Option<ContentTypeOverrides>,
    pub high_engagement_threshold: Option<u64>,
    pub engagement_saturation: Option<u64>,
    pub max_engagement_reduction: Option<f32>,
    pub viral_velocity_threshold: Option<f32>,
    pub viral_minimum_retention: Option<f32>,
    pub new_session_minimum_retention: Option<f32>,
    pub session_timeout_ms: Option<i64>,
    pub daily_recovery_rate: Option<f32>,
    pub recovery_timeline_days: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewQualityOverrides {
    pub quick_scroll: Option<f32>,
    pub engaged_view: Option<f32>,
    pub partial_interaction: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentTypeOverrides {
    pub news: Option<f32>,
    pub entertainment: Option<f32>,
    pub educational: Option<f32>,
    pub evergreen: Option<f32>,
    pub general: Option<f32>,
}

impl DevaluationOverrides {
    fn apply(self, mut config: DevaluationConfig) -> DevaluationConfig {
        if let Some(v) = self.base_devaluation_multiplier {
            config.base_devaluation_multiplier = v;
        }
        if let Some(v) = self.minimum_retention {
            config.minimum_retention = v;
        }
        if let Some(vq) = self.view_quality_multipliers {
            let m = &mut config.view_quality_multipliers;
            if let Some(v) = vq.quick_scroll {
                m.quick_scroll = v;
            }
            if let Some(v) = vq.engaged_view {
                m.engaged_view = v;
            }
            if let Some(v) = vq.partial_interaction {
                m.partial_interaction = v;
            }
        }
        if let Some(ct) = self.content_type_multipliers {
            let m = &mut config.content_type_multipliers;
            if let Some(v) = ct.news {
                m.news = v;
            }
            if let Some(v) = ct.entertainment {
                m.entertainment = v;
            }
            if let Some(v) = ct.educational {
                m.educational = v;
            }
            if let Some(v) = ct.evergreen {
                m.evergreen = v;
            }
            if let Some(v) = ct.general {
                m.general = v;
            }
        }
        if let Some(v) = self.high_engagement_threshold {
            config.high_engagement_threshold = v;
        }
        if let Some(v) = self.engagement_saturation {
            config.engagement_saturation = v;
        }
        if let Some(v) = self.max_engagement_reduction {
            config.max_engagement_reduction = v;
        }
        if let Some(v) = self.viral_velocity_threshold {
            config.viral_velocity_threshold = v;
        }
        if let Some(v) = self.viral_minimum_retention {
            config.viral_minimum_retention = v;
        }
        if let Some(v) = self.new_session_minimum_retention {
            config.new_session_minimum_retention = v;
        }
        if let Some(v) = self.session_timeout_ms {
            config.session_timeout_ms = v;
        }
        if let Some(v) = self.daily_recovery_rate {
            config.daily_recovery_rate = v;
        }
        if let Some(v) = self.recovery_timeline_days {
            config.recovery_timeline_days = v;
        }
        config
    }
}

/// Blend weights for the ranking pipeline. Must sum to 1.0 so final
/// scores stay comparable across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingWeights {
    pub similarity: f32,
    pub recency: f32,
    pub popularity: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            similarity: 0.55,
            recency: 0.25,
            popularity: 0.20,
        }
    }
}

/// Ranking pipeline configuration (blend weights, paging, score cache).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub weights: RankingWeights,
    /// Half-life for the recency decay term.
    pub recency_half_life_hours: f32,
    /// Interaction count where the popularity term saturates at 1.0.
    pub popularity_saturation: u64,
    pub default_page_size: usize,
    /// TTL for cached ranked lists (per-request paging consistency).
    pub score_cache_ttl_ms: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            recency_half_life_hours: 24.0,
            popularity_saturation: 10_000,
            default_page_size: 20,
            score_cache_ttl_ms: 30_000,
        }
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            ("similarity", self.weights.similarity),
            ("recency", self.weights.recency),
            ("popularity", self.weights.popularity),
        ];
        for (name, value) in weights {
            if !(0.0..=1.0).contains(&value) || !value.is_finite() {
                return Err(ConfigError::WeightOutOfRange { name, value });
            }
        }
        let sum = self.weights.similarity + self.weights.recency + self.weights.popularity;
        if (sum - 1.0).abs() > 1e-3 {
            return Err(ConfigError::WeightsDoNotSumToOne(sum));
        }
        if !(self.recency_half_life_hours > 0.0) {
            return Err(ConfigError::NonPositiveThreshold {
                name: "recency_half_life_hours",
                value: self.recency_half_life_hours as f64,
            });
        }
        if self.popularity_saturation == 0 {
            return Err(ConfigError::NonPositiveThreshold {
                name: "popularity_saturation",
                value: 0.0,
            });
        }
        if self.default_page_size == 0 {
            return Err(ConfigError::NonPositiveThreshold {
                name: "default_page_size",
                value: 0.0,
            });
        }
        Ok(())
    }

    /// Merge a JSON override blob, rejecting invalid results.
    pub fn with_overrides(self, json: &str) -> Self {
        let merged: RankingConfig = match serde_json::from_str::<RankingOverrides>(json) {
            Ok(o) => o.apply(self.clone()),
            Err(e) => {
                warn!(error = %e, "Rejecting malformed ranking override JSON, keeping defaults");
                return self;
            }
        };
        match merged.validate() {
            Ok(()) => merged,
            Err(e) => {
                warn!(error = %e, "Rejecting invalid ranking override, keeping defaults");
                self
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RankingOverrides {
    pub weights: Option<RankingWeightOverrides>,
    pub recency_half_life_hours: Option<f32>,
    pub popularity_saturation: Option<u64>,
    pub default_page_size: Option<usize>,
    pub score_cache_ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RankingWeightOverrides {
    pub similarity: Option<f32>,
    pub recency: Option<f32>,
    pub popularity: Option<f32>,
}

impl RankingOverrides {
    fn apply(self, mut config: RankingConfig) -> RankingConfig {
        if let Some(w) = self.weights {
            if let Some(v) = w.similarity {
                config.weights.similarity = v;
            }
            if let Some(v) = w.recency {
                config.weights.recency = v;
            }
            if let Some(v) = w.popularity {
                config.weights.popularity = v;
            }
        }
        if let Some(v) = self.recency_half_life_hours {
            config.recency_half_life_hours = v;
        }
        if let Some(v) = self.popularity_saturation {
            config.popularity_saturation = v;
        }
        if let Some(v) = self.default_page_size {
            config.default_page_size = v;
        }
        if let Some(v) = self.score_cache_ttl_ms {
            config.score_cache_ttl_ms = v;
        }
        config
    }
}

/// Load both configs from the environment.
///
/// `DISCOVERY_DEVALUATION_PRESET` selects a named preset (standard,
/// aggressive, gentle); `DISCOVERY_DEVALUATION_OVERRIDES` and
/// `DISCOVERY_RANKING_OVERRIDES` carry JSON overrides merged on top.
pub fn load_from_env() -> (DevaluationConfig, RankingConfig) {
    dotenvy::dotenv().ok();

    let mut devaluation = match env::var("DISCOVERY_DEVALUATION_PRESET") {
        Ok(name) => DevaluationConfig::preset(&name).unwrap_or_else(|| {
            warn!(preset = %name, "Unknown devaluation preset, using standard");
            DevaluationConfig::standard()
        }),
        Err(_) => DevaluationConfig::standard(),
    };
    if let Ok(json) = env::var("DISCOVERY_DEVALUATION_OVERRIDES") {
        devaluation = devaluation.with_overrides(&json);
    }

    let mut ranking = RankingConfig::default();
    if let Ok(json) = env::var("DISCOVERY_RANKING_OVERRIDES") {
        ranking = ranking.with_overrides(&json);
    }

    (devaluation, ranking)
}
