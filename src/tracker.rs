//! Tracks the peers available for sync requests and scores them by observed
//! behaviour.
//!
//! Every request logs its round trip here, so the preference order adapts as
//! peers speed up, slow down or start failing. The table is shared by all
//! in-flight requests; [PeerTracker::pref_sorted_peers] hands out an owned
//! snapshot so callers iterate without holding the lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::constants::{NEUTRAL_LATENCY, SYNC_PEER_TAG, SYNC_PEER_TAG_WEIGHT};
use crate::host::Host;
use crate::id::PeerId;

/// Per-peer observation state.
#[derive(Debug, Clone)]
pub struct PeerStats {
    average_latency: Duration,
    successes: u32,
    failures: u32,
    last_seen: Instant,
}

impl PeerStats {
    fn new(now: Instant) -> PeerStats {
        PeerStats {
            average_latency: NEUTRAL_LATENCY,
            successes: 0,
            failures: 0,
            last_seen: now,
        }
    }

    // Folds a new round trip into the latency average with weight 1/2.
    fn observe(&mut self, elapsed: Duration, now: Instant) {
        self.average_latency = (self.average_latency + elapsed) / 2;
        self.last_seen = now;
    }

    /// Lower scores are preferred. Grows with latency and failures, shrinks
    /// with successes; an unobserved peer sits between the two.
    pub fn score(&self) -> f64 {
        self.average_latency.as_secs_f64() * (1.0 + self.failures as f64)
            / (1.0 + self.successes as f64)
    }

    pub fn average_latency(&self) -> Duration {
        self.average_latency
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

pub struct PeerTracker {
    peers: Mutex<HashMap<PeerId, PeerStats>>,
    // latency across all peers, kept for ambient metrics only
    global_latency: Mutex<Option<Duration>>,
    host: Arc<dyn Host>,
    clock: Arc<dyn Clock>,
}

impl PeerTracker {
    pub fn new(host: Arc<dyn Host>, clock: Arc<dyn Clock>) -> PeerTracker {
        PeerTracker {
            peers: Mutex::new(HashMap::new()),
            global_latency: Mutex::new(None),
            host,
            clock,
        }
    }

    /// Starts tracking a peer and tags it in the connection manager so the
    /// node keeps the connection alive. Idempotent.
    pub fn add_peer(&self, peer: PeerId) {
        let mut peers = self.peers.lock().unwrap();
        if let Entry::Vacant(slot) = peers.entry(peer) {
            slot.insert(PeerStats::new(self.clock.now()));
            self.host.tag_peer(peer, SYNC_PEER_TAG, SYNC_PEER_TAG_WEIGHT);
            debug!("tracking peer {}", peer);
        }
    }

    /// Stops tracking a peer. Idempotent.
    pub fn remove_peer(&self, peer: PeerId) {
        let mut peers = self.peers.lock().unwrap();
        if peers.remove(&peer).is_some() {
            debug!("dropped peer {}", peer);
        }
    }

    /// Records a successful round trip to `peer`.
    pub fn log_success(&self, peer: PeerId, elapsed: Duration) {
        self.log_time(peer, elapsed, true)
    }

    /// Records a failed round trip to `peer`.
    pub fn log_failure(&self, peer: PeerId, elapsed: Duration) {
        self.log_time(peer, elapsed, false)
    }

    fn log_time(&self, peer: PeerId, elapsed: Duration, success: bool) {
        let mut peers = self.peers.lock().unwrap();
        match peers.get_mut(&peer) {
            Some(stats) => {
                if success {
                    stats.successes += 1;
                } else {
                    stats.failures += 1;
                }
                stats.observe(elapsed, self.clock.now());
            }
            None => warn!("log for untracked peer {}", peer),
        }
    }

    /// Records that some peer satisfied a whole request.
    pub fn log_global_success(&self, elapsed: Duration) {
        let mut global = self.global_latency.lock().unwrap();
        let updated = match *global {
            Some(latency) => (latency + elapsed) / 2,
            None => elapsed,
        };
        *global = Some(updated);
        debug!("global success in {:?} (average {:?})", elapsed, updated);
    }

    /// Snapshot of the tracked peers ordered by preference. The returned
    /// list is owned by the caller.
    pub fn pref_sorted_peers(&self) -> Vec<PeerId> {
        let mut scored: Vec<(PeerId, f64)> = {
            let peers = self.peers.lock().unwrap();
            peers.iter().map(|(peer, stats)| (*peer, stats.score())).collect()
        };
        scored.sort_by(|(a_peer, a_score), (b_peer, b_score)| {
            a_score
                .partial_cmp(b_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a_peer.cmp(b_peer))
        });
        scored.into_iter().map(|(peer, _)| peer).collect()
    }

    /// Current observation state for `peer`, if tracked.
    pub fn stats(&self, peer: PeerId) -> Option<PeerStats> {
        self.peers.lock().unwrap().get(&peer).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::SystemClock;
    use crate::host::RawStream;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct TagHost {
        tags: Mutex<Vec<PeerId>>,
    }

    impl TagHost {
        fn new() -> Arc<TagHost> {
            Arc::new(TagHost { tags: Mutex::new(vec![]) })
        }
    }

    #[async_trait]
    impl Host for TagHost {
        async fn supports_protocols(
            &self,
            _peer: PeerId,
            _protocols: &[&'static str],
        ) -> crate::Result<Vec<&'static str>> {
            Ok(vec![])
        }

        async fn new_stream(
            &self,
            peer: PeerId,
            _protocol: &'static str,
        ) -> crate::Result<RawStream> {
            Err(crate::Error::NoConn(peer))
        }

        fn tag_peer(&self, peer: PeerId, _tag: &'static str, _weight: u32) {
            self.tags.lock().unwrap().push(peer);
        }
    }

    fn tracker() -> PeerTracker {
        PeerTracker::new(TagHost::new(), Arc::new(SystemClock))
    }

    #[test]
    fn test_add_peer_is_idempotent() {
        let host = TagHost::new();
        let tracker = PeerTracker::new(host.clone(), Arc::new(SystemClock));

        tracker.add_peer(PeerId::one());
        tracker.add_peer(PeerId::one());

        assert_eq!(tracker.pref_sorted_peers(), vec![PeerId::one()]);
        // tagged once, on first sight
        assert_eq!(host.tags.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_peer() {
        let tracker = tracker();
        tracker.add_peer(PeerId::one());
        tracker.add_peer(PeerId::two());
        tracker.remove_peer(PeerId::one());

        assert_eq!(tracker.pref_sorted_peers(), vec![PeerId::two()]);

        tracker.remove_peer(PeerId::one());
        assert_eq!(tracker.pref_sorted_peers(), vec![PeerId::two()]);
    }

    #[test]
    fn test_preference_order() {
        let tracker = tracker();
        let fast = PeerId::new(b"fast");
        let fresh = PeerId::new(b"fresh");
        let flaky = PeerId::new(b"flaky");
        tracker.add_peer(fast);
        tracker.add_peer(fresh);
        tracker.add_peer(flaky);

        // comparable latency, opposite outcomes
        tracker.log_success(fast, Duration::from_secs(1));
        tracker.log_failure(flaky, Duration::from_secs(1));

        assert_eq!(tracker.pref_sorted_peers(), vec![fast, fresh, flaky]);
    }

    #[test]
    fn test_latency_dominates_for_successful_peers() {
        let tracker = tracker();
        let quick = PeerId::new(b"quick");
        let slow = PeerId::new(b"slow");
        tracker.add_peer(quick);
        tracker.add_peer(slow);

        tracker.log_success(quick, Duration::from_millis(50));
        tracker.log_success(slow, Duration::from_secs(4));

        assert_eq!(tracker.pref_sorted_peers()[0], quick);
    }

    #[test]
    fn test_snapshot_is_owned() {
        let tracker = tracker();
        tracker.add_peer(PeerId::one());
        tracker.add_peer(PeerId::two());

        let mut snapshot = tracker.pref_sorted_peers();
        snapshot.clear();

        assert_eq!(tracker.pref_sorted_peers().len(), 2);
    }

    #[test]
    fn test_log_for_untracked_peer_does_not_track_it() {
        let tracker = tracker();
        tracker.log_success(PeerId::one(), Duration::from_secs(1));
        assert!(tracker.pref_sorted_peers().is_empty());
    }

    #[test]
    fn test_stats_observations() {
        let tracker = tracker();
        let peer = PeerId::one();
        tracker.add_peer(peer);

        tracker.log_success(peer, Duration::from_secs(1));
        tracker.log_failure(peer, Duration::from_secs(1));

        let stats = tracker.stats(peer).unwrap();
        assert_eq!(stats.successes(), 1);
        assert_eq!(stats.failures(), 1);
        assert_eq!(stats.average_latency(), Duration::from_secs(1));
    }
}
