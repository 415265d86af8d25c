//! Fixed-interval job scheduling.

use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// What a job run tells the scheduler about the next wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Wait for the regular cadence.
    Done,
    /// Reset the next tick to this delta; the regular cadence resumes
    /// after that tick fires.
    RetryAfter(Duration),
}

enum Command {
    RunNow,
    Stop(oneshot::Sender<()>),
}

/// Runs a job at a fixed interval.
///
/// Exactly one execution proceeds at a time: ticks, [`Scheduler::run_now`]
/// requests, and shutdown are serialized through one loop. A run fires
/// immediately at startup, then on every interval tick.
pub struct Scheduler {
    commands: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Starts the scheduler loop with the given cadence.
    pub fn start<F, Fut>(frequency: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = JobOutcome> + Send,
    {
        let (commands, mut rx) = mpsc::channel::<Command>(4);

        let handle = tokio::spawn(async move {
            tracing::debug!(?frequency, "scheduler started");

            let mut interval = tokio::time::interval(frequency);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // one-shot override of the next wakeup, set by RetryAfter
            let mut override_at: Option<Instant> = None;

            loop {
                let override_deadline = override_at.unwrap_or_else(Instant::now);
                let outcome = tokio::select! {
                    _ = interval.tick(), if override_at.is_none() => {
                        Some(run_once(&mut job).await)
                    }
                    _ = tokio::time::sleep_until(override_deadline), if override_at.is_some() => {
                        override_at = None;
                        // the regular cadence resumes after this tick
                        interval.reset();
                        Some(run_once(&mut job).await)
                    }
                    command = rx.recv() => match command {
                        // an immediate run does not reset the cadence
                        Some(Command::RunNow) => Some(run_once(&mut job).await),
                        Some(Command::Stop(ack)) => {
                            tracing::debug!("scheduler shutdown");
                            let _ = ack.send(());
                            return;
                        }
                        None => return,
                    },
                };

                if let Some(JobOutcome::RetryAfter(delay)) = outcome {
                    tracing::debug!(?delay, "job requested an earlier run");
                    override_at = Some(Instant::now() + delay);
                }
            }
        });

        Self { commands, handle }
    }

    /// Requests an immediate execution. Coalesces: requests arriving while
    /// a run is in progress collapse into the already-queued one.
    pub async fn run_now(&self) {
        // a full queue already guarantees a pending run
        let _ = self.commands.try_send(Command::RunNow);
    }

    /// Cancels pending wakeups and blocks until the current execution (if
    /// any) returns.
    pub async fn stop(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Stop(ack)).await.is_ok() {
            let _ = done.await;
        }
        let _ = self.handle.await;
    }
}

async fn run_once<F, Fut>(job: &mut F) -> JobOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = JobOutcome>,
{
    tracing::debug!("starting job execution");
    let outcome = job().await;
    tracing::debug!(?outcome, "job execution complete");
    outcome
}
