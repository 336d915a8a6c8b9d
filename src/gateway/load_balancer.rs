//! Load Balancer: pluggable member-selection strategies.
//!
//! The balancer never holds provider handles itself, only [`ProviderId`]s
//! and the small amount of rotation state each strategy needs. The caller
//! ([`super::group::ProviderGroup`]) resolves candidates through the
//! [`super::registry::Registry`] and passes a snapshot in on every call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use crate::config::Strategy;
use crate::provider::ProviderId;

/// One member eligible for selection on this call: already filtered to
/// "ready or degraded" and, if member-level breakers are enabled, not
/// tripped.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Member id.
    pub id: ProviderId,
    /// Static weight, used by `weighted_round_robin`.
    pub weight: u32,
    /// Static priority, used by `priority` (lower wins).
    pub priority: i32,
    /// Current in-flight call count, used by `least_connections`.
    pub in_flight: usize,
}

/// Strategy-specific rotation state plus the selection logic for all five
/// strategies.
pub struct LoadBalancer {
    strategy: Strategy,
    round_robin_index: AtomicUsize,
    priority_tie_index: AtomicUsize,
    /// Smooth weighted round-robin running totals, keyed by member id.
    wrr_current: Mutex<HashMap<ProviderId, i64>>,
}

impl LoadBalancer {
    /// Build a balancer for `strategy`. Rotation state starts fresh; it is
    /// rebuilt from config on every process start (no persisted state, per
    /// explicit config reload is out of scope).
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            round_robin_index: AtomicUsize::new(0),
            priority_tie_index: AtomicUsize::new(0),
            wrr_current: Mutex::new(HashMap::new()),
        }
    }

    /// Select one candidate per this balancer's strategy. `candidates` must
    /// already be filtered to eligible members; an empty slice yields
    /// `None` (the caller should have already rejected on `min_healthy`
    /// before reaching here).
    #[must_use]
    pub fn select(&self, candidates: &[Candidate]) -> Option<ProviderId> {
        if candidates.is_empty() {
            return None;
        }
        match self.strategy {
            Strategy::RoundRobin => self.select_round_robin(candidates),
            Strategy::WeightedRoundRobin => self.select_weighted_round_robin(candidates),
            Strategy::Random => self.select_random(candidates),
            Strategy::Priority => self.select_priority(candidates),
            Strategy::LeastConnections => self.select_least_connections(candidates),
        }
    }

    fn select_round_robin(&self, candidates: &[Candidate]) -> Option<ProviderId> {
        let i = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[i].id.clone())
    }

    fn select_weighted_round_robin(&self, candidates: &[Candidate]) -> Option<ProviderId> {
        let total_weight: i64 = candidates.iter().map(|c| i64::from(c.weight.max(1))).sum();
        let mut state = self.wrr_current.lock();

        for c in candidates {
            *state.entry(c.id.clone()).or_insert(0) += i64::from(c.weight.max(1));
        }

        let (winner_idx, _) = candidates
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| *state.get(&c.id).unwrap_or(&0))?;

        let winner = &candidates[winner_idx];
        if let Some(current) = state.get_mut(&winner.id) {
            *current -= total_weight;
        }
        Some(winner.id.clone())
    }

    fn select_random(&self, candidates: &[Candidate]) -> Option<ProviderId> {
        let i = rand::rng().random_range(0..candidates.len());
        Some(candidates[i].id.clone())
    }

    fn select_priority(&self, candidates: &[Candidate]) -> Option<ProviderId> {
        let min_priority = candidates.iter().map(|c| c.priority).min()?;
        let tied: Vec<&Candidate> = candidates.iter().filter(|c| c.priority == min_priority).collect();
        let i = self.priority_tie_index.fetch_add(1, Ordering::Relaxed) % tied.len();
        Some(tied[i].id.clone())
    }

    fn select_least_connections(&self, candidates: &[Candidate]) -> Option<ProviderId> {
        candidates
            .iter()
            .min_by_key(|c| c.in_flight)
            .map(|c| c.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, weight: u32, priority: i32, in_flight: usize) -> Candidate {
        Candidate {
            id: ProviderId::new(id).unwrap(),
            weight,
            priority,
            in_flight,
        }
    }

    #[test]
    fn round_robin_advances_each_call() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let candidates = vec![candidate("a", 1, 0, 0), candidate("b", 1, 0, 0), candidate("c", 1, 0, 0)];
        let picks: Vec<String> = (0..6)
            .map(|_| lb.select(&candidates).unwrap().as_str().to_string())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn priority_picks_lowest_number() {
        let lb = LoadBalancer::new(Strategy::Priority);
        let candidates = vec![candidate("p2", 1, 2, 0), candidate("p1", 1, 1, 0)];
        assert_eq!(lb.select(&candidates).unwrap().as_str(), "p1");
    }

    #[test]
    fn priority_ties_round_robin() {
        let lb = LoadBalancer::new(Strategy::Priority);
        let candidates = vec![candidate("a", 1, 1, 0), candidate("b", 1, 1, 0)];
        let first = lb.select(&candidates).unwrap();
        let second = lb.select(&candidates).unwrap();
        assert_ne!(first.as_str(), second.as_str());
    }

    #[test]
    fn least_connections_picks_smallest_in_flight() {
        let lb = LoadBalancer::new(Strategy::LeastConnections);
        let candidates = vec![candidate("busy", 1, 0, 5), candidate("idle", 1, 0, 0)];
        assert_eq!(lb.select(&candidates).unwrap().as_str(), "idle");
    }

    #[test]
    fn weighted_round_robin_respects_weight_ratio() {
        let lb = LoadBalancer::new(Strategy::WeightedRoundRobin);
        let candidates = vec![candidate("heavy", 3, 0, 0), candidate("light", 1, 0, 0)];
        let picks: Vec<String> = (0..4)
            .map(|_| lb.select(&candidates).unwrap().as_str().to_string())
            .collect();
        let heavy_count = picks.iter().filter(|p| p.as_str() == "heavy").count();
        assert_eq!(heavy_count, 3);
    }

    #[test]
    fn empty_candidates_yields_none() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        assert!(lb.select(&[]).is_none());
    }

    #[test]
    fn random_only_picks_from_candidates() {
        let lb = LoadBalancer::new(Strategy::Random);
        let candidates = vec![candidate("a", 1, 0, 0), candidate("b", 1, 0, 0)];
        for _ in 0..20 {
            let pick = lb.select(&candidates).unwrap();
            assert!(pick.as_str() == "a" || pick.as_str() == "b");
        }
    }
}
