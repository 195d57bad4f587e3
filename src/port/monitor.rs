//! Latency monitor
//!
//! One background task per started output port. The port sends the deadline of
//! every batch window it opens; when a deadline passes the monitor asks the port
//! to re-check its accumulators. Deadlines for windows that were already flushed
//! by a count or byte trigger still fire, and the check finds nothing to do.
//!
//! The monitor only holds a weak reference to the port, so an abandoned port is
//! not kept alive by its own timer.
//!
//! [`Monitor::shutdown`] lets a check that is already running finish before the
//! task exits, so a batch taken by that check is still delivered. Dropping the
//! handle instead aborts the task wherever it is.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Weak;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Span;

/// Target of the latency monitor
#[async_trait]
pub trait LatencyCheck: Send + Sync {
    /// Flush every accumulator whose latency window has expired
    async fn check_latency(&self);
}

enum Command {
    Check(Instant),
    Shutdown,
}

/// Handle to a running latency monitor task
///
/// Dropping the handle aborts the task along with every pending deadline.
pub struct Monitor {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Spawn the monitor task
    pub fn spawn(target: Weak<dyn LatencyCheck>, span: Span) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(target, rx, span));
        Self {
            commands: tx,
            task: Some(task),
        }
    }

    /// Arrange a check at `deadline`
    pub fn schedule(&self, deadline: Instant) {
        // Fails only once the task has exited, when no check is wanted anyway
        let _ = self.commands.send(Command::Check(deadline));
    }

    /// Whether the task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the task once any check in progress has completed
    ///
    /// Pending deadlines are dropped.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::debug!(error = %err, "Latency monitor ended abnormally");
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn run(
    target: Weak<dyn LatencyCheck>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    span: Span,
) {
    let mut deadlines: BinaryHeap<Reverse<Instant>> = BinaryHeap::new();

    loop {
        let next = deadlines.peek().map(|Reverse(at)| *at);

        tokio::select! {
            received = rx.recv() => match received {
                Some(Command::Check(deadline)) => deadlines.push(Reverse(deadline)),
                Some(Command::Shutdown) | None => break,
            },
            _ = tokio::time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                // Every deadline that has passed is served by one check
                let now = Instant::now();
                while deadlines.peek().is_some_and(|Reverse(at)| *at <= now) {
                    deadlines.pop();
                }

                let Some(target) = target.upgrade() else {
                    break;
                };
                target.check_latency().await;
            }
        }
    }

    tracing::trace!(parent: &span, "Latency monitor exiting");
}
