use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::Scheduler;
use crate::constants::LOG_SCHEDULER;

/// Background tokio task that fires due tasks without anyone polling.
///
/// The driver sleeps until the scheduler's next deadline, or until a newly
/// scheduled task wakes it, and then calls [`Scheduler::run_due`]. Effects run
/// on the driver task.
#[derive(Debug)]
pub struct SchedulerDriver {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl SchedulerDriver {
    /// Spawn the driver onto the current tokio runtime.
    #[must_use]
    pub fn spawn(scheduler: Scheduler) -> Self {
        let (shutdown, mut stop) = oneshot::channel();
        let join = tokio::spawn(async move {
            log::debug!(target: LOG_SCHEDULER, "driver started");
            loop {
                scheduler.run_due();
                let wake = scheduler.notified();
                match scheduler.time_until_next() {
                    Some(wait) => {
                        tokio::select! {
                            () = tokio::time::sleep(wait) => {}
                            () = wake => {}
                            _ = &mut stop => break,
                        }
                    }
                    None => {
                        tokio::select! {
                            () = wake => {}
                            _ = &mut stop => break,
                        }
                    }
                }
            }
            log::debug!(target: LOG_SCHEDULER, "driver stopped");
        });
        Self {
            shutdown: Some(shutdown),
            join,
        }
    }

    /// Stop the driver and wait for it to exit. Pending tasks stay pending.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.join).await;
    }
}

impl Drop for SchedulerDriver {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.join.abort();
        }
    }
}
