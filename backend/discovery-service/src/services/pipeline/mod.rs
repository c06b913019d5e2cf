// ============================================
// Ranking Pipeline
// ============================================
//
// Orchestrates one feed ranking pass:
//   similarity -> blend with recency/popularity -> devaluation -> sort
//   -> paged truncation
//
// All external fetches (vector index, stats, seen history) happen once
// at the boundary through injected ports; the scoring path itself runs
// over fully materialized inputs and performs no I/O. Independent
// requests share no mutable state beyond the lock-free score cache.

use crate::config::{ConfigError, RankingConfig};
use crate::models::{
    CandidateContent, EngagementStats, RankedPage, RankingStats, ScoredCandidate, SessionInfo,
    ViewEvent,
};
use crate::services::cache::{composite_key, ScoreCache};
use crate::services::devaluation::DevaluationEngine;
use crate::services::vector_math;
use crate::utils::{exponential_decay, log_normalized};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How many candidates to pull from the vector index per request.
const CANDIDATE_FETCH_LIMIT: usize = 500;

/// Candidate as returned by the external vector index: identity,
/// current embedding, and when it was published. Content whose vector
/// is missing is simply not returned (excluded, never fatal).
#[derive(Debug, Clone)]
pub struct IndexedCandidate {
    pub candidate_id: Uuid,
    pub embedding: Vec<f32>,
    pub published_at: DateTime<Utc>,
}

/// External vector index lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Current embedding for a user, if one has been computed yet.
    async fn user_embedding(&self, user_id: Uuid) -> Option<Vec<f32>>;

    /// Candidate set eligible for ranking this user's feed.
    async fn candidates_for(&self, user_id: Uuid, limit: usize) -> Vec<IndexedCandidate>;
}

/// External engagement stats lookup. Candidates absent from the result
/// default to zero engagement in the `general` category.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngagementStatsLookup: Send + Sync {
    async fn stats_for(&self, candidate_ids: &[Uuid]) -> HashMap<Uuid, EngagementStats>;
}

/// External seen-history lookup for a user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SeenHistoryLookup: Send + Sync {
    async fn seen_history(&self, user_id: Uuid) -> HashMap<Uuid, ViewEvent>;
}

/// Fully materialized inputs for one ranking pass.
#[derive(Debug, Clone)]
pub struct RankingRequest {
    pub user_vector: Vec<f32>,
    pub candidates: Vec<CandidateContent>,
    pub seen_history: HashMap<Uuid, ViewEvent>,
    pub session: SessionInfo,
    pub now: DateTime<Utc>,
    pub page_size: usize,
    pub cursor: Option<String>,
}

/// Scored list cached for paging consistency within one logical request.
#[derive(Debug, Clone)]
struct ScoredSet {
    candidates: Vec<ScoredCandidate>,
    devalued_count: usize,
    dropped_dimension_mismatch: usize,
}

pub struct RankingPipeline {
    engine: DevaluationEngine,
    config: RankingConfig,
    cache: ScoreCache<Arc<ScoredSet>>,
}

impl RankingPipeline {
    pub fn new(engine: DevaluationEngine, config: RankingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            engine,
            config,
            cache: ScoreCache::new(),
        })
    }

    /// HIT/MISS observability for the score cache.
    pub fn cache_stats(&self) -> crate::services::cache::CacheStats {
        self.cache.stats()
    }

    /// Rank a materialized request and return one page.
    ///
    /// Pages of the same logical request (same session + candidate set,
    /// cursor from a previous page) are served from the cached scored
    /// list so candidates are never re-ranked against a shifting set
    /// mid-pagination. An empty candidate set yields an empty page.
    pub fn rank(&self, request: &RankingRequest) -> RankedPage {
        let page_size = if request.page_size == 0 {
            self.config.default_page_size
        } else {
            request.page_size
        };

        let fingerprint = Self::request_fingerprint(request);
        let offset = self.cursor_offset(request.cursor.as_deref(), fingerprint);

        let fingerprint_hex = format!("{fingerprint:016x}");
        let session_id = request.session.session_id.to_string();
        let key = composite_key(&["rank", &session_id, &fingerprint_hex]);
        let ttl = Duration::from_millis(self.config.score_cache_ttl_ms);

        // Follow-up pages (valid cursor) read through the cache so the
        // whole pagination sees one consistent ranked list; a fresh
        // logical request always recomputes and replaces the entry.
        let (set, served_from_cache) = if offset.is_some() {
            self.cache
                .get_or_insert_with(&key, ttl, || Arc::new(self.score_all(request)))
        } else {
            let set = Arc::new(self.score_all(request));
            self.cache.insert(key, set.clone(), ttl);
            (set, false)
        };
        let offset = offset.unwrap_or(0);

        let total = set.candidates.len();
        let start = offset.min(total);
        let end = (start + page_size).min(total);
        let items: Vec<ScoredCandidate> = set.candidates[start..end].to_vec();
        let next_cursor = if end < total {
            Some(format!("{fingerprint_hex}:{end}"))
        } else {
            None
        };

        let stats = RankingStats {
            candidate_count: request.candidates.len(),
            scored_count: total,
            devalued_count: set.devalued_count,
            dropped_dimension_mismatch: set.dropped_dimension_mismatch,
            returned_count: items.len(),
        };

        info!(
            session_id = %request.session.session_id,
            candidate_count = stats.candidate_count,
            returned_count = stats.returned_count,
            devalued_count = stats.devalued_count,
            served_from_cache,
            "Ranking pass completed"
        );

        RankedPage {
            items,
            next_cursor,
            served_from_cache,
            stats,
        }
    }

    /// Pull inputs through the external ports once, then rank. A user
    /// without an embedding degrades to a zero query vector (similarity
    /// 0.0 for everyone, ranking driven by recency and popularity).
    pub async fn fetch_and_rank(
        &self,
        user_id: Uuid,
        session: SessionInfo,
        page_size: usize,
        cursor: Option<String>,
        index: &dyn VectorIndex,
        stats: &dyn EngagementStatsLookup,
        seen: &dyn SeenHistoryLookup,
        now: DateTime<Utc>,
    ) -> anyhow::Result<RankedPage> {
        let indexed = index.candidates_for(user_id, CANDIDATE_FETCH_LIMIT).await;

        let user_vector = match index.user_embedding(user_id).await {
            Some(vector) => vector,
            None => {
                warn!(user_id = %user_id, "No user embedding yet, ranking without similarity");
                let dim = indexed.first().map(|c| c.embedding.len()).unwrap_or(0);
                vec![0.0; dim]
            }
        };

        let candidate_ids: Vec<Uuid> = indexed.iter().map(|c| c.candidate_id).collect();
        let mut stats_map = stats.stats_for(&candidate_ids).await;
        let seen_history = seen.seen_history(user_id).await;

        let candidates: Vec<CandidateContent> = indexed
            .into_iter()
            .map(|c| CandidateContent {
                candidate_id: c.candidate_id,
                published_at: c.published_at,
                stats: stats_map.remove(&c.candidate_id).unwrap_or_default(),
                embedding: c.embedding,
            })
            .collect();

        let request = RankingRequest {
            user_vector,
            candidates,
            seen_history,
            session,
            now,
            page_size,
            cursor,
        };

        Ok(self.rank(&request))
    }

    /// Score every candidate: batched similarity, blend, devaluation,
    /// stable descending sort.
    fn score_all(&self, request: &RankingRequest) -> ScoredSet {
        let total = request.candidates.len();
        if total == 0 {
            return ScoredSet {
                candidates: Vec::new(),
                devalued_count: 0,
                dropped_dimension_mismatch: 0,
            };
        }

        let vectors: Vec<(Uuid, &[f32])> = request
            .candidates
            .iter()
            .map(|c| (c.candidate_id, c.embedding.as_slice()))
            .collect();
        let similarities: HashMap<Uuid, f32> =
            vector_math::top_k(&request.user_vector, &vectors, total)
                .into_iter()
                .collect();
        let dropped_dimension_mismatch = total - similarities.len();

        let weights = &self.config.weights;
        let mut devalued_count = 0usize;

        // Iterate in candidate insertion order so the stable sort below
        // breaks score ties by insertion order.
        let mut scored: Vec<ScoredCandidate> = Vec::with_capacity(similarities.len());
        for candidate in &request.candidates {
            let Some(&raw_similarity) = similarities.get(&candidate.candidate_id) else {
                continue;
            };

            let age_hours =
                (request.now - candidate.published_at).num_minutes().max(0) as f32 / 60.0;
            let recency = exponential_decay(age_hours, self.config.recency_half_life_hours);
            let popularity = log_normalized(
                candidate.stats.total_interactions,
                self.config.popularity_saturation,
            );

            let blended_score = weights.similarity * raw_similarity
                + weights.recency * recency
                + weights.popularity * popularity;

            let retention_multiplier = match request.seen_history.get(&candidate.candidate_id) {
                Some(view) => {
                    devalued_count += 1;
                    self.engine.retention_multiplier(
                        view,
                        &candidate.stats,
                        &request.session,
                        request.now,
                    )
                }
                None => 1.0,
            };

            let final_score = blended_score * retention_multiplier;

            debug!(
                candidate_id = %candidate.candidate_id,
                raw_similarity,
                blended_score,
                retention_multiplier,
                final_score,
                "Candidate scored"
            );

            scored.push(ScoredCandidate {
                candidate_id: candidate.candidate_id,
                raw_similarity,
                blended_score,
                retention_multiplier,
                final_score,
            });
        }

        // Stable sort; NaN cannot occur (similarity is NaN-free and the
        // blend terms are finite).
        scored.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        ScoredSet {
            candidates: scored,
            devalued_count,
            dropped_dimension_mismatch,
        }
    }

    /// Fingerprint of the logical request: session identity plus the
    /// candidate set, stable across pages of the same request.
    fn request_fingerprint(request: &RankingRequest) -> u64 {
        let mut hasher = DefaultHasher::new();
        request.session.session_id.hash(&mut hasher);
        for candidate in &request.candidates {
            candidate.candidate_id.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Decode a page cursor against the current request fingerprint.
    /// `None` means "fresh request": no cursor, or a stale/foreign one
    /// (fingerprint mismatch, unparseable) which falls back to the
    /// first page of a fresh ranking rather than erroring.
    fn cursor_offset(&self, cursor: Option<&str>, fingerprint: u64) -> Option<usize> {
        let cursor = cursor?;
        let parsed = cursor.split_once(':').and_then(|(fp, offset)| {
            let fp = u64::from_str_radix(fp, 16).ok()?;
            let offset: usize = offset.parse().ok()?;
            Some((fp, offset))
        });
        match parsed {
            Some((fp, offset)) if fp == fingerprint => Some(offset),
            _ => {
                debug!(cursor, "Stale or malformed cursor, restarting from first page");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DevaluationConfig;
    use crate::models::{ContentCategory, ViewQuality};
    use chrono::Duration as ChronoDuration;

    fn pipeline() -> RankingPipeline {
        let engine = DevaluationEngine::new(DevaluationConfig::standard()).unwrap();
        RankingPipeline::new(engine, RankingConfig::default()).unwrap()
    }

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn candidate(id: Uuid, embedding: Vec<f32>, now: DateTime<Utc>) -> CandidateContent {
        CandidateContent {
            candidate_id: id,
            embedding,
            published_at: now - ChronoDuration::hours(1),
            stats: EngagementStats::default(),
        }
    }

    fn session(now: DateTime<Utc>) -> SessionInfo {
        SessionInfo {
            session_id: uid(999),
            is_new_session: false,
            session_start_time: now - ChronoDuration::minutes(10),
            last_activity: now,
        }
    }

    fn request(candidates: Vec<CandidateContent>, now: DateTime<Utc>) -> RankingRequest {
        RankingRequest {
            user_vector: vec![1.0, 0.0],
            candidates,
            seen_history: HashMap::new(),
            session: session(now),
            now,
            page_size: 10,
            cursor: None,
        }
    }

    #[test]
    fn test_empty_candidate_set_is_not_an_error() {
        let now = Utc::now();
        let page = pipeline().rank(&request(Vec::new(), now));
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
        assert_eq!(page.stats.candidate_count, 0);
    }

    #[test]
    fn test_similar_candidate_ranks_first() {
        let now = Utc::now();
        let aligned = uid(1);
        let orthogonal = uid(2);
        let req = request(
            vec![
                candidate(orthogonal, vec![0.0, 1.0], now),
                candidate(aligned, vec![1.0, 0.0], now),
            ],
            now,
        );

        let page = pipeline().rank(&req);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].candidate_id, aligned);
        assert!((page.items[0].raw_similarity - 1.0).abs() < 1e-6);
        assert!(page.items[1].raw_similarity.abs() < 1e-6);
        assert!(page.items[0].final_score > page.items[1].final_score);
    }

    #[test]
    fn test_never_seen_retention_is_exactly_one() {
        let now = Utc::now();
        let req = request(vec![candidate(uid(1), vec![1.0, 0.0], now)], now);
        let page = pipeline().rank(&req);
        assert_eq!(page.items[0].retention_multiplier, 1.0);
        assert_eq!(
            page.items[0].final_score,
            page.items[0].blended_score
        );
        assert_eq!(page.stats.devalued_count, 0);
    }

    #[test]
    fn test_seen_candidate_is_devalued_below_identical_unseen() {
        let now = Utc::now();
        let seen_id = uid(1);
        let unseen_id = uid(2);
        let mut req = request(
            vec![
                candidate(seen_id, vec![1.0, 0.0], now),
                candidate(unseen_id, vec![1.0, 0.0], now),
            ],
            now,
        );
        req.seen_history.insert(
            seen_id,
            ViewEvent {
                candidate_id: seen_id,
                last_seen_at: now,
                view_quality: ViewQuality::EngagedView,
            },
        );

        let page = pipeline().rank(&req);
        assert_eq!(page.items[0].candidate_id, unseen_id);
        assert_eq!(page.items[1].candidate_id, seen_id);
        assert!(page.items[1].retention_multiplier < 1.0);
        assert_eq!(page.stats.devalued_count, 1);

        let seen = &page.items[1];
        assert!(
            (seen.final_score - seen.blended_score * seen.retention_multiplier).abs() < 1e-6
        );
    }

    #[test]
    fn test_dimension_mismatch_drops_only_offender() {
        let now = Utc::now();
        let req = request(
            vec![
                candidate(uid(1), vec![1.0, 0.0], now),
                candidate(uid(2), vec![1.0, 0.0, 0.0], now),
            ],
            now,
        );

        let page = pipeline().rank(&req);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].candidate_id, uid(1));
        assert_eq!(page.stats.dropped_dimension_mismatch, 1);
    }

    #[test]
    fn test_equal_scores_keep_insertion_order() {
        let now = Utc::now();
        // Same direction, same stats, same age: identical final scores.
        let req = request(
            vec![
                candidate(uid(3), vec![2.0, 0.0], now),
                candidate(uid(1), vec![4.0, 0.0], now),
                candidate(uid(2), vec![8.0, 0.0], now),
            ],
            now,
        );
        let page = pipeline().rank(&req);
        let order: Vec<Uuid> = page.items.iter().map(|c| c.candidate_id).collect();
        assert_eq!(order, vec![uid(3), uid(1), uid(2)]);
    }

    #[test]
    fn test_paging_cursor_walks_the_full_list() {
        let now = Utc::now();
        let candidates: Vec<CandidateContent> = (0..7)
            .map(|i| {
                let mut c = candidate(uid(i as u128 + 1), vec![1.0, 0.0], now);
                c.stats.total_interactions = 1000 - i as u64 * 100;
                c
            })
            .collect();
        let p = pipeline();

        let mut req = request(candidates, now);
        req.page_size = 3;

        let first = p.rank(&req);
        assert_eq!(first.items.len(), 3);
        assert!(!first.served_from_cache);
        let mut collected: Vec<Uuid> = first.items.iter().map(|c| c.candidate_id).collect();

        req.cursor = first.next_cursor.clone();
        let second = p.rank(&req);
        assert_eq!(second.items.len(), 3);
        assert!(second.served_from_cache);
        collected.extend(second.items.iter().map(|c| c.candidate_id));

        req.cursor = second.next_cursor.clone();
        let third = p.rank(&req);
        assert_eq!(third.items.len(), 1);
        assert!(third.next_cursor.is_none());
        collected.extend(third.items.iter().map(|c| c.candidate_id));

        // No duplicates, no gaps across pages
        let mut deduped = collected.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), 7);
    }

    #[test]
    fn test_foreign_cursor_restarts_from_first_page() {
        let now = Utc::now();
        let p = pipeline();
        let mut req = request(vec![candidate(uid(1), vec![1.0, 0.0], now)], now);
        req.cursor = Some("deadbeef:5".to_string());

        let page = p.rank(&req);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_zero_page_size_uses_configured_default() {
        let now = Utc::now();
        let candidates: Vec<CandidateContent> = (0..30)
            .map(|i| candidate(uid(i as u128 + 1), vec![1.0, 0.0], now))
            .collect();
        let p = pipeline();
        let mut req = request(candidates, now);
        req.page_size = 0;

        let page = p.rank(&req);
        assert_eq!(page.items.len(), RankingConfig::default().default_page_size);
    }

    #[tokio::test]
    async fn test_fetch_and_rank_merges_port_data() {
        let now = Utc::now();
        let user_id = uid(77);
        let hot = uid(1);
        let cold = uid(2);

        let mut index = MockVectorIndex::new();
        index
            .expect_candidates_for()
            .returning(move |_, _| {
                vec![
                    IndexedCandidate {
                        candidate_id: hot,
                        embedding: vec![1.0, 0.0],
                        published_at: now - ChronoDuration::hours(1),
                    },
                    IndexedCandidate {
                        candidate_id: cold,
                        embedding: vec![1.0, 0.0],
                        published_at: now - ChronoDuration::hours(1),
                    },
                ]
            });
        index
            .expect_user_embedding()
            .returning(|_| Some(vec![1.0, 0.0]));

        let mut stats = MockEngagementStatsLookup::new();
        stats.expect_stats_for().returning(move |_| {
            // Only `hot` has stats; `cold` must default to zero.
            HashMap::from([(
                hot,
                EngagementStats {
                    total_interactions: 5000,
                    interactions_per_hour: 10.0,
                    category: ContentCategory::Entertainment,
                },
            )])
        });

        let mut seen = MockSeenHistoryLookup::new();
        seen.expect_seen_history().returning(|_| HashMap::new());

        let page = pipeline()
            .fetch_and_rank(
                user_id,
                session(now),
                10,
                None,
                &index,
                &stats,
                &seen,
                now,
            )
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        // Equal similarity and recency; popularity breaks the tie.
        assert_eq!(page.items[0].candidate_id, hot);
    }

    #[tokio::test]
    async fn test_fetch_and_rank_without_user_embedding_degrades() {
        let now = Utc::now();
        let user_id = uid(77);

        let mut index = MockVectorIndex::new();
        index.expect_candidates_for().returning(move |_, _| {
            vec![IndexedCandidate {
                candidate_id: uid(1),
                embedding: vec![0.4, 0.6],
                published_at: now - ChronoDuration::hours(2),
            }]
        });
        index.expect_user_embedding().returning(|_| None);

        let mut stats = MockEngagementStatsLookup::new();
        stats.expect_stats_for().returning(|_| HashMap::new());
        let mut seen = MockSeenHistoryLookup::new();
        seen.expect_seen_history().returning(|_| HashMap::new());

        let page = pipeline()
            .fetch_and_rank(user_id, session(now), 10, None, &index, &stats, &seen, now)
            .await
            .unwrap();

        // Candidate survives with zero similarity instead of being dropped
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].raw_similarity, 0.0);
        assert!(page.items[0].final_score > 0.0);
    }
}

