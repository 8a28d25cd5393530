//! Hierarchical objection counter gating the end of a task phase.
//!
//! Contributors are identified by their hierarchical component name
//! (`env.agent.driver`). A raise or drop updates the contributor's own count
//! and the total of every enclosing scope up to the top scope `""`, so
//! `total("env")` covers the whole `env` subtree.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use events::Event;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::core::OrderedEventEmitter;

/// Scope key of the whole component tree.
pub const TOP_SCOPE: &str = "";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObjectionError {
    #[error("Objection {objection}: '{contributor}' dropped {count} but only {outstanding} outstanding")]
    DropWithoutRaise {
        objection: String,
        contributor: String,
        count: u32,
        outstanding: u32,
    },
}

#[derive(Debug, Clone, Default)]
struct Counts {
    own: BTreeMap<String, u32>,
    totals: BTreeMap<String, u32>,
    /// Set when the top total returns to zero after a drop, cleared by a raise.
    top_all_dropped: bool,
    /// When the top total last returned to zero.
    dropped_at: Option<Instant>,
}

impl Counts {
    fn total(&self, scope: &str) -> u32 {
        self.totals.get(scope).copied().unwrap_or(0)
    }
}

/// `"a.b.c"` -> `["a.b.c", "a.b", "a", ""]`
fn scopes_of(contributor: &str) -> Vec<&str> {
    let mut scopes = Vec::new();
    if !contributor.is_empty() {
        let mut current = contributor;
        scopes.push(current);
        while let Some((parent, _)) = current.rsplit_once('.') {
            scopes.push(parent);
            current = parent;
        }
    }
    scopes.push(TOP_SCOPE);
    scopes
}

pub struct Objection {
    name: String,
    counts: watch::Sender<Counts>,
    drain_ns: AtomicU64,
    trace: AtomicBool,
    emitter: Option<OrderedEventEmitter>,
}

impl Objection {
    pub fn new(name: impl Into<String>) -> Self {
        let (counts, _) = watch::channel(Counts::default());
        Self {
            name: name.into(),
            counts,
            drain_ns: AtomicU64::new(0),
            trace: AtomicBool::new(false),
            emitter: None,
        }
    }

    pub fn with_emitter(mut self, emitter: OrderedEventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_drain_time(self, drain: Duration) -> Self {
        self.set_drain_time(drain);
        self
    }

    pub fn with_trace(self, enabled: bool) -> Self {
        self.set_trace(enabled);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_drain_time(&self, drain: Duration) {
        let nanos = u64::try_from(drain.as_nanos()).unwrap_or(u64::MAX);
        self.drain_ns.store(nanos, Ordering::Relaxed);
    }

    pub fn drain_time(&self) -> Duration {
        Duration::from_nanos(self.drain_ns.load(Ordering::Relaxed))
    }

    pub fn set_trace(&self, enabled: bool) {
        self.trace.store(enabled, Ordering::Relaxed);
    }

    /// Raise `count` objections on behalf of `contributor`. Returns the new top total.
    pub fn raise(&self, contributor: &str, description: &str, count: u32) -> u32 {
        if count == 0 {
            return self.top_total();
        }

        let mut top = 0;
        self.counts.send_modify(|counts| {
            *counts.own.entry(contributor.to_string()).or_insert(0) += count;
            for scope in scopes_of(contributor) {
                *counts.totals.entry(scope.to_string()).or_insert(0) += count;
            }
            counts.top_all_dropped = false;
            counts.dropped_at = None;
            top = counts.total(TOP_SCOPE);
        });

        if self.trace.load(Ordering::Relaxed) {
            debug!(
                objection = %self.name,
                contributor,
                description,
                count,
                total = top,
                "Objection raised"
            );
        }
        self.emit(Event::ObjectionRaised {
            objection: self.name.clone(),
            contributor: contributor.to_string(),
            description: description.to_string(),
            count,
            total: top,
        });
        top
    }

    /// Drop `count` objections previously raised by `contributor`.
    ///
    /// Dropping more than the contributor holds leaves every count untouched
    /// and returns [`ObjectionError::DropWithoutRaise`].
    pub fn drop_objection(
        &self,
        contributor: &str,
        description: &str,
        count: u32,
    ) -> std::result::Result<u32, ObjectionError> {
        let outstanding = self.count(contributor);
        if count > outstanding {
            let err = ObjectionError::DropWithoutRaise {
                objection: self.name.clone(),
                contributor: contributor.to_string(),
                count,
                outstanding,
            };
            error!(objection = %self.name, contributor, description, "{}", err);
            return Err(err);
        }
        if count == 0 {
            return Ok(self.top_total());
        }

        let mut top = 0;
        self.counts.send_modify(|counts| {
            decrement(&mut counts.own, contributor, count);
            for scope in scopes_of(contributor) {
                decrement(&mut counts.totals, scope, count);
            }
            top = counts.total(TOP_SCOPE);
            if top == 0 {
                counts.top_all_dropped = true;
                counts.dropped_at = Some(Instant::now());
            }
        });

        if self.trace.load(Ordering::Relaxed) {
            debug!(
                objection = %self.name,
                contributor,
                description,
                count,
                total = top,
                "Objection dropped"
            );
        }
        self.emit(Event::ObjectionDropped {
            objection: self.name.clone(),
            contributor: contributor.to_string(),
            description: description.to_string(),
            count,
            total: top,
        });
        if top == 0 {
            self.emit(Event::AllDropped {
                objection: self.name.clone(),
            });
        }
        Ok(top)
    }

    /// Objections raised by `contributor` itself.
    pub fn count(&self, contributor: &str) -> u32 {
        self.counts.borrow().own.get(contributor).copied().unwrap_or(0)
    }

    /// Objections raised anywhere within `scope`.
    pub fn total(&self, scope: &str) -> u32 {
        self.counts.borrow().total(scope)
    }

    pub fn top_total(&self) -> u32 {
        self.total(TOP_SCOPE)
    }

    /// Whether the top total has returned to zero since the last raise.
    pub fn top_all_dropped(&self) -> bool {
        self.counts.borrow().top_all_dropped
    }

    /// Contributors with outstanding objections and their own counts.
    pub fn objectors(&self) -> Vec<(String, u32)> {
        self.counts
            .borrow()
            .own
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect()
    }

    /// Forget every count. Returns the top total that was discarded.
    pub fn clear(&self) -> u32 {
        let mut discarded = 0;
        self.counts.send_modify(|counts| {
            discarded = counts.total(TOP_SCOPE);
            *counts = Counts::default();
        });
        if discarded > 0 {
            warn!(
                objection = %self.name,
                discarded,
                "Clearing objection with outstanding raises"
            );
        }
        discarded
    }

    /// Wait until nothing within `scope` objects.
    pub async fn wait_for_zero(&self, scope: &str) {
        let mut rx = self.counts.subscribe();
        let _ = rx.wait_for(|counts| counts.total(scope) == 0).await;
    }

    /// Wait for the next "all dropped" at the top scope.
    ///
    /// Returns at once if the total already dropped to zero since the last
    /// raise. With a drain time the total must then stay at zero until the
    /// drain has elapsed from the moment it reached zero; a raise during the
    /// drain restarts the wait.
    pub async fn wait_for_all_dropped(&self) {
        let mut rx = self.counts.subscribe();
        loop {
            let dropped_at = match rx.wait_for(|counts| counts.top_all_dropped).await {
                Ok(counts) => counts.dropped_at,
                Err(_) => return,
            };
            let drain = self.drain_time();
            if drain.is_zero() {
                return;
            }
            let deadline = dropped_at.unwrap_or_else(Instant::now) + drain;
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    if self.top_all_dropped() {
                        return;
                    }
                }
                _ = rx.wait_for(|counts| !counts.top_all_dropped) => {
                    debug!(objection = %self.name, "Objection re-raised during drain");
                }
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event);
        }
    }
}

impl std::fmt::Debug for Objection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Objection")
            .field("name", &self.name)
            .field("top_total", &self.top_total())
            .field("drain_time", &self.drain_time())
            .finish()
    }
}

fn decrement(map: &mut BTreeMap<String, u32>, key: &str, count: u32) {
    if let Some(value) = map.get_mut(key) {
        *value = value.saturating_sub(count);
        if *value == 0 {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{sleep, Instant};

    #[test]
    fn test_scopes_of() {
        assert_eq!(scopes_of("env.agent.drv"), vec!["env.agent.drv", "env.agent", "env", ""]);
        assert_eq!(scopes_of("test"), vec!["test", ""]);
        assert_eq!(scopes_of(""), vec![""]);
    }

    #[test]
    fn test_hierarchical_totals() {
        let objection = Objection::new("common.run");
        objection.raise("env.agent.drv", "traffic", 2);
        objection.raise("env.scb", "pending compare", 1);

        assert_eq!(objection.count("env.agent.drv"), 2);
        assert_eq!(objection.count("env"), 0);
        assert_eq!(objection.total("env.agent"), 2);
        assert_eq!(objection.total("env"), 3);
        assert_eq!(objection.top_total(), 3);

        objection.drop_objection("env.agent.drv", "traffic", 2).unwrap();
        assert_eq!(objection.total("env.agent"), 0);
        assert_eq!(objection.total("env"), 1);
        assert!(!objection.top_all_dropped());
    }

    #[test]
    fn test_drop_without_raise_is_rejected() {
        let objection = Objection::new("common.run");
        objection.raise("env", "hold", 1);

        let err = objection.drop_objection("env", "hold", 2).unwrap_err();
        assert_eq!(
            err,
            ObjectionError::DropWithoutRaise {
                objection: "common.run".to_string(),
                contributor: "env".to_string(),
                count: 2,
                outstanding: 1,
            }
        );
        assert_eq!(objection.top_total(), 1);
        assert!(objection.drop_objection("stranger", "hold", 1).is_err());
    }

    #[test]
    fn test_top_all_dropped_tracks_cycles() {
        let objection = Objection::new("common.run");
        assert!(!objection.top_all_dropped());
        objection.raise("env", "hold", 1);
        objection.drop_objection("env", "hold", 1).unwrap();
        assert!(objection.top_all_dropped());
        objection.raise("env", "again", 1);
        assert!(!objection.top_all_dropped());
    }

    #[test]
    fn test_clear_discards_counts() {
        let objection = Objection::new("common.run");
        objection.raise("env", "hold", 3);
        assert_eq!(objection.clear(), 3);
        assert_eq!(objection.top_total(), 0);
        assert!(objection.objectors().is_empty());
    }

    #[test]
    fn test_objectors_listing() {
        let objection = Objection::new("common.run");
        objection.raise("b", "x", 1);
        objection.raise("a", "y", 2);
        assert_eq!(
            objection.objectors(),
            vec![("a".to_string(), 2), ("b".to_string(), 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_zero_blocks_until_drop() {
        let objection = Arc::new(Objection::new("common.run"));
        objection.raise("env", "hold", 1);

        let dropper = Arc::clone(&objection);
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            dropper.drop_objection("env", "hold", 1).unwrap();
        });

        let start = Instant::now();
        objection.wait_for_zero(TOP_SCOPE).await;
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_restarts_on_reraise() {
        let objection =
            Arc::new(Objection::new("common.run").with_drain_time(Duration::from_millis(50)));
        objection.raise("env", "hold", 1);

        let actor = Arc::clone(&objection);
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            actor.drop_objection("env", "hold", 1).unwrap();
            sleep(Duration::from_millis(20)).await;
            actor.raise("env", "late", 1);
            sleep(Duration::from_millis(10)).await;
            actor.drop_objection("env", "late", 1).unwrap();
        });

        let start = Instant::now();
        objection.wait_for_all_dropped().await;
        // last drop at t=40, then a full 50ms drain
        assert_eq!(start.elapsed(), Duration::from_millis(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_counts_from_the_drop() {
        let objection =
            Arc::new(Objection::new("common.run").with_drain_time(Duration::from_millis(5)));
        objection.raise("env", "hold", 1);
        sleep(Duration::from_millis(2)).await;
        objection.drop_objection("env", "hold", 1).unwrap();
        sleep(Duration::from_millis(1)).await;

        let start = Instant::now();
        objection.wait_for_all_dropped().await;
        assert_eq!(start.elapsed(), Duration::from_millis(4));
    }
}
