// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Expiry Sweeper
//!
//! Background task that removes expired login challenges and sessions.
//! Reads already treat expired records as absent; the sweep only keeps
//! abandoned records from accumulating.
//!
//! ## Shutdown
//!
//! Stops at the next tick after the `CancellationToken` fires, the same way
//! the HTTP server drains on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{ChallengeStore, SessionManager};

/// Records removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub challenges: usize,
    pub sessions: usize,
}

pub struct ExpirySweeper {
    challenges: Arc<ChallengeStore>,
    sessions: Arc<SessionManager>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        challenges: Arc<ChallengeStore>,
        sessions: Arc<SessionManager>,
        interval: Duration,
    ) -> Self {
        Self {
            challenges,
            sessions,
            interval,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Expiry sweeper starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Expiry sweeper shutting down");
                    return;
                }
            }

            self.sweep_once();
        }
    }

    /// One pass over both stores. A failure in one does not skip the other.
    pub fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.challenges.sweep_expired() {
            Ok(n) => report.challenges = n,
            Err(e) => warn!(error = ?e, "Failed to sweep expired challenges"),
        }
        match self.sessions.sweep_expired() {
            Ok(n) => report.sessions = n,
            Err(e) => warn!(error = ?e, "Failed to sweep expired sessions"),
        }

        debug!(
            challenges = report.challenges,
            sessions = report.sessions,
            "Expiry sweep finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::clock::ManualClock;
    use crate::models::Identity;
    use crate::storage::MemoryStore;

    fn sweeper() -> (Arc<ManualClock>, Arc<ChallengeStore>, Arc<SessionManager>, ExpirySweeper) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let challenges = Arc::new(ChallengeStore::new(store.clone(), clock.clone()));
        let sessions = Arc::new(SessionManager::new(store.clone(), store, clock.clone()));
        let sweeper = ExpirySweeper::new(
            challenges.clone(),
            sessions.clone(),
            Duration::from_millis(10),
        );
        (clock, challenges, sessions, sweeper)
    }

    fn identity() -> Identity {
        let now = Utc::now();
        Identity {
            id: "ada".into(),
            subject: "ada".into(),
            email: "ada@example.com".into(),
            display_name: None,
            picture: None,
            email_verified: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn sweep_removes_only_expired_records() {
        let (clock, challenges, sessions, sweeper) = sweeper();
        challenges.issue().unwrap();
        sessions.create(&identity()).unwrap();

        assert_eq!(sweeper.sweep_once(), SweepReport::default());

        clock.advance(chrono::Duration::minutes(10));
        let live = sessions.create(&identity()).unwrap();
        assert_eq!(
            sweeper.sweep_once(),
            SweepReport {
                challenges: 1,
                sessions: 0
            }
        );

        clock.advance(chrono::Duration::hours(24));
        assert_eq!(
            sweeper.sweep_once(),
            SweepReport {
                challenges: 0,
                sessions: 2
            }
        );
        assert!(!sessions.validate(&live.token).unwrap().is_valid());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (_, _, _, sweeper) = sweeper();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
