//! Episodic memory with temporal decay.
//!
//! Episodes are appended with a frozen importance score; recall ranks by
//! the *current* importance after decay:
//!
//! ```text
//! current = importance · e^(−age_hours / (168 + 24·access_count))
//! ```
//!
//! Frequently accessed episodes decay slower (one extra day of decay rate
//! per access), and an episode touched within the last hour gets a
//! 20% boost. `consolidate()` garbage-collects episodes that are old, cold,
//! and unimportant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Base decay rate in hours (one week).
const DECAY_BASE_HOURS: f64 = 168.0;
/// Extra decay allowance per recorded access, in hours.
const DECAY_HOURS_PER_ACCESS: f64 = 24.0;
/// Boost applied when the episode was accessed within the last hour.
const RECENT_ACCESS_BOOST: f64 = 1.2;
/// Default floor below which episodes drop out of recall.
pub const DEFAULT_IMPORTANCE_THRESHOLD: f64 = 0.3;
/// Default recall window in hours (one week).
pub const DEFAULT_TIME_WINDOW_HOURS: i64 = 168;
/// Default number of episodes returned by retrieval.
pub const DEFAULT_TOP_K: usize = 5;

/// A stored episode. `importance` is frozen at write time; decay is always
/// computed on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub importance: f64,
    pub emotion: String,
    pub tags: Vec<String>,
    pub access_count: u32,
    pub last_accessed: DateTime<Utc>,
}

/// Episode view returned by retrieval, with the decayed score attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEpisode {
    #[serde(flatten)]
    pub episode: Episode,
    pub current_importance: f64,
}

/// Input for storing a new episode.
#[derive(Debug, Clone)]
pub struct EpisodeInput {
    pub content: String,
    /// Explicit importance; computed heuristically when absent.
    pub importance: Option<f64>,
    pub emotion: Option<String>,
    pub tags: Vec<String>,
    /// Event time override; `Utc::now()` when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl EpisodeInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            importance: None,
            emotion: None,
            tags: Vec::new(),
            timestamp: None,
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance.max(0.0).min(1.0));
        self
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Append-only per-agent episode lists.
pub struct EpisodicStore {
    episodes: Mutex<HashMap<Uuid, Vec<Episode>>>,
}

impl EpisodicStore {
    pub fn new() -> Self {
        Self {
            episodes: Mutex::new(HashMap::new()),
        }
    }

    /// Store a new episode and return its id.
    pub fn store(&self, agent_id: Uuid, input: EpisodeInput) -> String {
        let timestamp = input.timestamp.unwrap_or_else(Utc::now);
        let emotion = input.emotion.clone().unwrap_or_else(|| "neutral".to_string());
        let importance = input
            .importance
            .unwrap_or_else(|| heuristic_importance(&input.content, &emotion));
        let episode = Episode {
            id: Uuid::new_v4().to_string(),
            content: input.content,
            timestamp,
            importance,
            emotion,
            tags: input.tags,
            access_count: 0,
            last_accessed: timestamp,
        };
        let id = episode.id.clone();
        let mut episodes = self.episodes.lock().unwrap();
        episodes.entry(agent_id).or_insert_with(Vec::new).push(episode);
        id
    }

    /// Retrieve the top episodes within a time window, ranked by decayed
    /// importance. Episodes below the default threshold are omitted.
    /// Returned episodes have their access counters bumped.
    pub fn retrieve(
        &self,
        agent_id: Uuid,
        query: Option<&str>,
        time_window_hours: i64,
        top_k: usize,
    ) -> Vec<ScoredEpisode> {
        self.retrieve_at(agent_id, query, time_window_hours, top_k, Utc::now())
    }

    /// Retrieval against an explicit clock; the public entry point passes
    /// `Utc::now()`.
    pub fn retrieve_at(
        &self,
        agent_id: Uuid,
        query: Option<&str>,
        time_window_hours: i64,
        top_k: usize,
        now: DateTime<Utc>,
    ) -> Vec<ScoredEpisode> {
        let mut episodes = self.episodes.lock().unwrap();
        let list = match episodes.get_mut(&agent_id) {
            Some(list) => list,
            None => return Vec::new(),
        };
        let cutoff = now - Duration::hours(time_window_hours);

        let mut scored: Vec<(usize, f64)> = list
            .iter()
            .enumerate()
            .filter(|(_, e)| e.timestamp >= cutoff)
            .filter(|(_, e)| match query {
                Some(q) => e.content.to_lowercase().contains(&q.to_lowercase()),
                None => true,
            })
            .map(|(i, e)| (i, current_importance(e, now)))
            .filter(|(_, score)| *score > DEFAULT_IMPORTANCE_THRESHOLD)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| {
                let episode = &mut list[i];
                episode.access_count += 1;
                episode.last_accessed = now;
                ScoredEpisode {
                    episode: episode.clone(),
                    current_importance: score,
                }
            })
            .collect()
    }

    /// Content search with an explicit importance floor. Does not bump
    /// access counters.
    pub fn search(
        &self,
        agent_id: Uuid,
        query: &str,
        importance_threshold: f64,
    ) -> Vec<ScoredEpisode> {
        self.search_at(agent_id, query, importance_threshold, Utc::now())
    }

    pub fn search_at(
        &self,
        agent_id: Uuid,
        query: &str,
        importance_threshold: f64,
        now: DateTime<Utc>,
    ) -> Vec<ScoredEpisode> {
        let episodes = self.episodes.lock().unwrap();
        let list = match episodes.get(&agent_id) {
            Some(list) => list,
            None => return Vec::new(),
        };
        let needle = query.to_lowercase();
        let mut matches: Vec<ScoredEpisode> = list
            .iter()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .map(|e| ScoredEpisode {
                episode: e.clone(),
                current_importance: current_importance(e, now),
            })
            .filter(|s| s.current_importance >= importance_threshold)
            .collect();
        matches.sort_by(|a, b| {
            b.current_importance
                .partial_cmp(&a.current_importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }

    /// Remove episodes that are older than 24 hours, have not been
    /// accessed in 24 hours, and whose decayed importance is at or below
    /// the threshold. Returns `(removed, remaining)`.
    pub fn consolidate(&self, agent_id: Uuid) -> (usize, usize) {
        self.consolidate_at(agent_id, Utc::now())
    }

    pub fn consolidate_at(&self, agent_id: Uuid, now: DateTime<Utc>) -> (usize, usize) {
        let mut episodes = self.episodes.lock().unwrap();
        let list = match episodes.get_mut(&agent_id) {
            Some(list) => list,
            None => return (0, 0),
        };
        let original = list.len();
        let day = Duration::hours(24);
        list.retain(|e| {
            current_importance(e, now) > DEFAULT_IMPORTANCE_THRESHOLD
                || now - e.last_accessed < day
                || now - e.timestamp < day
        });
        let remaining = list.len();
        (original - remaining, remaining)
    }

    /// Number of stored episodes for an agent.
    pub fn len(&self, agent_id: Uuid) -> usize {
        let episodes = self.episodes.lock().unwrap();
        episodes.get(&agent_id).map(|l| l.len()).unwrap_or(0)
    }
}

impl Default for EpisodicStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Decayed importance at `now`. Capped at 1.0, so the recent-access boost
/// can never push an episode above `importance · 1.2`.
pub fn current_importance(episode: &Episode, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - episode.timestamp).num_seconds() as f64 / 3600.0;
    let decay_rate = DECAY_BASE_HOURS + DECAY_HOURS_PER_ACCESS * episode.access_count as f64;
    let mut current = episode.importance * (-age_hours.max(0.0) / decay_rate).exp();
    if (now - episode.last_accessed).num_seconds() < 3600 {
        current *= RECENT_ACCESS_BOOST;
    }
    current.min(1.0)
}

/// Importance heuristic for episodes stored without an explicit score.
fn heuristic_importance(content: &str, emotion: &str) -> f64 {
    let mut importance: f64 = 0.5;
    if content.len() > 100 {
        importance += 0.1;
    }
    importance += match emotion {
        "strong_positive" | "strong_negative" => 0.3,
        "excited" | "angry" => 0.2,
        "positive" | "negative" | "sad" => 0.1,
        _ => 0.0,
    };
    let lowered = content.to_lowercase();
    const KEYWORDS: &[&str] = &[
        "important",
        "critical",
        "urgent",
        "remember",
        "decision",
        "breakthrough",
        "problem",
    ];
    if KEYWORDS.iter().any(|k| lowered.contains(k)) {
        importance += 0.15;
    }
    importance.max(0.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_week_decay_drops_below_threshold() {
        let store = EpisodicStore::new();
        let agent = Uuid::new_v4();
        let t0 = Utc::now() - Duration::hours(336);
        store.store(
            agent,
            EpisodeInput::new("met the vendor")
                .with_importance(0.8)
                .with_timestamp(t0),
        );

        // 0.8 * e^(-336/168) ≈ 0.108, below the 0.3 default floor.
        let now = Utc::now();
        let results = store.retrieve_at(agent, None, 1000, 10, now);
        assert!(results.is_empty());

        let scored = store.search_at(agent, "vendor", 0.0, now);
        assert_eq!(scored.len(), 1);
        assert!((scored[0].current_importance - 0.108).abs() < 0.01);
    }

    #[test]
    fn test_recent_access_boost_capped() {
        let now = Utc::now();
        let episode = Episode {
            id: "e".into(),
            content: "c".into(),
            timestamp: now,
            importance: 0.95,
            emotion: "neutral".into(),
            tags: Vec::new(),
            access_count: 0,
            last_accessed: now,
        };
        let score = current_importance(&episode, now);
        assert!(score <= 1.0);
        assert!(score <= episode.importance * 1.2 + 1e-9);
    }

    #[test]
    fn test_access_slows_decay() {
        let now = Utc::now();
        let old = now - Duration::hours(336);
        let cold = Episode {
            id: "a".into(),
            content: "x".into(),
            timestamp: old,
            importance: 0.8,
            emotion: "neutral".into(),
            tags: Vec::new(),
            access_count: 0,
            last_accessed: old,
        };
        let warm = Episode {
            access_count: 10,
            ..cold.clone()
        };
        assert!(current_importance(&warm, now) > current_importance(&cold, now));
    }

    #[test]
    fn test_retrieve_bumps_access_counters() {
        let store = EpisodicStore::new();
        let agent = Uuid::new_v4();
        store.store(agent, EpisodeInput::new("fresh event").with_importance(0.9));

        let first = store.retrieve(agent, None, 168, 5);
        assert_eq!(first.len(), 1);
        let second = store.retrieve(agent, None, 168, 5);
        assert_eq!(second[0].episode.access_count, 2);
    }

    #[test]
    fn test_consolidate_removes_old_cold_unimportant() {
        let store = EpisodicStore::new();
        let agent = Uuid::new_v4();
        let now = Utc::now();

        // Old and faded: should be collected.
        store.store(
            agent,
            EpisodeInput::new("stale")
                .with_importance(0.4)
                .with_timestamp(now - Duration::hours(400)),
        );
        // Fresh: kept regardless of score.
        store.store(
            agent,
            EpisodeInput::new("fresh").with_importance(0.1),
        );

        let (removed, remaining) = store.consolidate_at(agent, now);
        assert_eq!(removed, 1);
        assert_eq!(remaining, 1);
    }
}
