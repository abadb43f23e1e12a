use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::common::AppState;
use crate::render;
use crate::session::Session;
use crate::sync::backoff::Backoff;

/// Control handle for one session's polling task.
pub struct PollerHandle {
    cancel: CancellationToken,
    restart: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// A render just happened outside the loop; wait a full interval from now.
    pub fn restart_timer(&self) {
        self.restart.notify_one();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn the fetch → render → publish loop for `session`.
pub fn spawn(state: AppState, session: Arc<Session>) -> PollerHandle {
    let cancel = CancellationToken::new();
    let restart = Arc::new(Notify::new());
    let task = tokio::spawn(run(
        state,
        session,
        cancel.clone(),
        Arc::clone(&restart),
    ));

    PollerHandle {
        cancel,
        restart,
        task,
    }
}

/// First deadline strictly after `now` on the fixed grid `previous + k * interval`.
///
/// Stepping from the previous deadline rather than from "now" keeps the cycle
/// free of drift; slots that were overrun are skipped instead of replayed.
#[must_use]
pub fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let mut next = previous + interval;
    while next <= now {
        next += interval;
    }
    next
}

async fn run(
    state: AppState,
    session: Arc<Session>,
    cancel: CancellationToken,
    restart: Arc<Notify>,
) {
    let interval = state.config.poll_interval();
    let backoff = Backoff::from_config(&state.config);

    tracing::info!(
        session_id = %session.id,
        interval_ms = state.config.poll_interval_ms,
        "Starting session poller"
    );

    let mut consecutive_failures: u32 = 0;
    // First cycle runs immediately.
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = restart.notified() => {
                deadline = Instant::now() + interval;
                continue;
            }
            () = sleep_until(deadline) => {}
        }

        let view = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            view = render::refresh_view(&state, &session) => view,
        };

        let now = Instant::now();
        if view.online {
            if consecutive_failures > 0 {
                tracing::info!(
                    session_id = %session.id,
                    failures = consecutive_failures,
                    "Live state reachable again"
                );
            }
            consecutive_failures = 0;
            deadline = next_deadline(deadline, interval, now);
        } else {
            consecutive_failures = consecutive_failures.saturating_add(1);
            let delay = backoff.delay(consecutive_failures);
            tracing::warn!(
                session_id = %session.id,
                failures = consecutive_failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Live state unreachable, backing off"
            );
            deadline = now + delay;
        }
    }

    tracing::info!(session_id = %session.id, "Session poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_deadline_steps_on_the_grid() {
        let start = Instant::now();
        let interval = Duration::from_secs(3);

        // Cycle finished early: exactly one interval later.
        let next = next_deadline(start, interval, start + Duration::from_millis(40));
        assert_eq!(next, start + interval);

        // Cycle overran two slots: land on the next slot, no burst.
        let next = next_deadline(start, interval, start + Duration::from_secs(7));
        assert_eq!(next, start + Duration::from_secs(9));
    }
}
