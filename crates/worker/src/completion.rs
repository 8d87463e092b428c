//! Session completion detection.
//!
//! A session completes either explicitly (a `session.completed` event) or
//! by inactivity (no events for `inactivity_timeout`, caught by a periodic
//! sweep). Whichever route wins, the registered callback fires **exactly
//! once**: the completed latch is checked and set inside the same critical
//! section, so a racing explicit completion and sweep cannot both claim
//! the transition.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use omnia_domain::error::Result;

/// Async callback invoked once per completed session.
pub type CompletionCallback =
    Arc<dyn Fn(CancellationToken, String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug)]
struct SessionState {
    last_seen: Instant,
    completed: bool,
}

/// Last-seen map + completed latch per tracked session.
pub struct CompletionTracker {
    inactivity_timeout: Duration,
    sessions: Mutex<HashMap<String, SessionState>>,
    on_complete: RwLock<Option<CompletionCallback>>,
}

impl CompletionTracker {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            inactivity_timeout,
            sessions: Mutex::new(HashMap::new()),
            on_complete: RwLock::new(None),
        }
    }

    /// Install the end-of-session callback. The worker registers itself
    /// here at construction time.
    pub fn set_on_complete(&self, callback: CompletionCallback) {
        *self.on_complete.write() = Some(callback);
    }

    /// Refresh the last-seen timestamp. No-op once a session completed.
    pub fn record_activity(&self, session_id: &str) {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(state) if state.completed => {}
            Some(state) => state.last_seen = Instant::now(),
            None => {
                sessions.insert(
                    session_id.to_owned(),
                    SessionState {
                        last_seen: Instant::now(),
                        completed: false,
                    },
                );
            }
        }
    }

    /// Explicit completion. Latches the session and, on the first
    /// transition only, runs the callback; its error propagates to the
    /// caller so the triggering event stays unacked.
    pub async fn mark_completed(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
    ) -> Result<()> {
        if !self.latch(session_id) {
            return Ok(());
        }
        self.invoke(cancel, session_id).await
    }

    /// Inactivity sweep. Flags every session silent past the timeout and
    /// runs the callback for each newly transitioned one. Callback errors
    /// are logged — there is no event to fail here.
    pub async fn check_inactive(&self, cancel: &CancellationToken) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut sessions = self.sessions.lock();
            sessions
                .iter_mut()
                .filter(|(_, state)| {
                    !state.completed
                        && now.duration_since(state.last_seen) >= self.inactivity_timeout
                })
                .map(|(id, state)| {
                    state.completed = true;
                    id.clone()
                })
                .collect()
        };

        for session_id in expired {
            tracing::info!(session_id = %session_id, "session inactive, treating as completed");
            if let Err(e) = self.invoke(cancel, &session_id).await {
                tracing::warn!(session_id = %session_id, error = %e, "end-of-session callback failed");
            }
        }
    }

    /// Remove all tracker state for a session.
    pub fn cleanup(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Number of tracked sessions (for introspection/tests).
    pub fn tracked(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Atomically claim the completed→true transition. Returns whether
    /// this caller won it.
    fn latch(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let state = sessions.entry(session_id.to_owned()).or_insert(SessionState {
            last_seen: Instant::now(),
            completed: false,
        });
        if state.completed {
            return false;
        }
        state.completed = true;
        true
    }

    async fn invoke(&self, cancel: &CancellationToken, session_id: &str) -> Result<()> {
        let callback = self.on_complete.read().clone();
        match callback {
            Some(callback) => callback(cancel.clone(), session_id.to_owned()).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_tracker(timeout: Duration) -> (Arc<CompletionTracker>, Arc<AtomicUsize>) {
        let tracker = Arc::new(CompletionTracker::new(timeout));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = fired.clone();
        tracker.set_on_complete(Arc::new(move |_cancel, _session_id| {
            let fired = fired_in_cb.clone();
            Box::pin(async move {
                fired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));
        (tracker, fired)
    }

    #[tokio::test]
    async fn explicit_completion_fires_once() {
        let (tracker, fired) = counting_tracker(Duration::from_secs(300));
        let cancel = CancellationToken::new();

        tracker.record_activity("s1");
        tracker.mark_completed(&cancel, "s1").await.unwrap();
        tracker.mark_completed(&cancel, "s1").await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completion_without_prior_activity_still_fires() {
        let (tracker, fired) = counting_tracker(Duration::from_secs(300));
        let cancel = CancellationToken::new();
        tracker.mark_completed(&cancel, "fresh").await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activity_after_completion_is_a_noop() {
        let (tracker, fired) = counting_tracker(Duration::from_millis(10));
        let cancel = CancellationToken::new();

        tracker.record_activity("s1");
        tracker.mark_completed(&cancel, "s1").await.unwrap();
        tracker.record_activity("s1");

        // The session stays completed — the sweep must not re-fire it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.check_inactive(&cancel).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inactivity_sweep_fires_for_silent_sessions() {
        let (tracker, fired) = counting_tracker(Duration::from_millis(10));
        let cancel = CancellationToken::new();

        tracker.record_activity("s1");
        tracker.record_activity("s2");
        tokio::time::sleep(Duration::from_millis(25)).await;
        tracker.check_inactive(&cancel).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        // Sweeping again finds nothing new.
        tracker.check_inactive(&cancel).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn active_sessions_survive_the_sweep() {
        let (tracker, fired) = counting_tracker(Duration::from_millis(50));
        let cancel = CancellationToken::new();

        tracker.record_activity("s1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.record_activity("s1"); // refreshed inside the window
        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.check_inactive(&cancel).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cleanup_allows_retracking() {
        let (tracker, fired) = counting_tracker(Duration::from_secs(300));
        let cancel = CancellationToken::new();

        tracker.mark_completed(&cancel, "s1").await.unwrap();
        tracker.cleanup("s1");
        assert_eq!(tracker.tracked(), 0);

        // A fresh lifecycle for the same id fires again.
        tracker.mark_completed(&cancel, "s1").await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn racing_explicit_and_inactivity_fire_exactly_once() {
        for _ in 0..100 {
            let (tracker, fired) = counting_tracker(Duration::from_millis(0));
            let cancel = CancellationToken::new();
            tracker.record_activity("s1");

            let explicit = {
                let tracker = tracker.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { tracker.mark_completed(&cancel, "s1").await })
            };
            let sweep = {
                let tracker = tracker.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { tracker.check_inactive(&cancel).await })
            };

            explicit.await.unwrap().unwrap();
            sweep.await.unwrap();
            assert_eq!(fired.load(Ordering::SeqCst), 1, "callback must fire exactly once");
        }
    }

    #[tokio::test]
    async fn no_callback_registered_is_fine() {
        let tracker = CompletionTracker::new(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        tracker.mark_completed(&cancel, "s1").await.unwrap();
    }
}
