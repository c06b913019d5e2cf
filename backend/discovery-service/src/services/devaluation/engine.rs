use crate::config::{ConfigError, DevaluationConfig};
use crate::models::{EngagementStats, SessionInfo, ViewEvent, ViewQuality};
use chrono::{DateTime, Utc};
use tracing::debug;

const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Retention-multiplier calculator for previously-seen candidates.
///
/// Never-seen candidates must not be passed here; the pipeline assigns
/// them a multiplier of exactly 1.0 by construction.
pub struct DevaluationEngine {
    config: DevaluationConfig,
}

impl DevaluationEngine {
    /// Validates the config; an invalid config refuses to construct the
    /// engine (startup-time fatal, never a per-request error).
    pub fn new(config: DevaluationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DevaluationConfig {
        &self.config
    }

    /// Retention multiplier in `[minimum_retention, 1.0]` for a seen
    /// candidate.
    ///
    /// Pipeline: view-quality and content-type scale the base
    /// devaluation strength, high engagement reduces it, elapsed time
    /// decays it toward zero, then the viral and new-session floors and
    /// the configured minimum clamp the resulting retention.
    pub fn retention_multiplier(
        &self,
        view: &ViewEvent,
        stats: &EngagementStats,
        session: &SessionInfo,
        now: DateTime<Utc>,
    ) -> f32 {
        let config = &self.config;

        let elapsed_ms = (now - view.last_seen_at).num_milliseconds().max(0);
        let elapsed_days = (elapsed_ms as f64 / MS_PER_DAY) as f32;

        // Fully recovered at or past the horizon.
        if elapsed_days >= config.recovery_timeline_days {
            return 1.0;
        }

        let mut strength = config.base_devaluation_multiplier
            * self.view_quality_multiplier(view.view_quality)
            * config
                .content_type_multipliers
                .for_category(stats.category);

        strength *= 1.0 - self.engagement_reduction(stats.total_interactions);

        // Daily compounded recovery toward zero strength.
        strength *= (1.0 - config.daily_recovery_rate).powf(elapsed_days);

        let mut retention = 1.0 - strength;

        if stats.interactions_per_hour >= config.viral_velocity_threshold {
            retention = retention.max(config.viral_minimum_retention);
        }
        if session.is_new_session {
            retention = retention.max(config.new_session_minimum_retention);
        }

        let retention = retention.clamp(config.minimum_retention, 1.0);

        debug!(
            candidate_id = %view.candidate_id,
            view_quality = view.view_quality.as_str(),
            category = stats.category.as_str(),
            elapsed_days,
            retention,
            "Retention multiplier computed"
        );

        retention
    }

    fn view_quality_multiplier(&self, quality: ViewQuality) -> f32 {
        let m = &self.config.view_quality_multipliers;
        match quality {
            ViewQuality::QuickScroll => m.quick_scroll,
            ViewQuality::EngagedView => m.engaged_view,
            ViewQuality::PartialInteraction => m.partial_interaction,
        }
    }

    /// Fractional reduction of devaluation strength for well-engaged
    /// content: a linear ramp from the high-engagement threshold up to
    /// the saturation point, capped at `max_engagement_reduction`.
    fn engagement_reduction(&self, total_interactions: u64) -> f32 {
        let config = &self.config;
        if total_interactions < config.high_engagement_threshold {
            return 0.0;
        }
        let span = (config.engagement_saturation - config.high_engagement_threshold) as f32;
        let progress =
            (total_interactions - config.high_engagement_threshold) as f32 / span;
        config.max_engagement_reduction * progress.min(1.0)
    }
}
