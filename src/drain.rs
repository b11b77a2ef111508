use crate::resource::Resource;
use crate::state::{NOT_PARTICIPATING, SessionSlot, SharedState, TIMEOUT_DIAGNOSTIC_WINDOW};
use crate::sync::{Ordering, fence, pause, sleep};
use std::time::{Duration, Instant};

/// One drain request: wait until no session is published below `target`.
///
/// The pause count and the progress clock are cumulative over the whole walk,
/// so a drain that had to wait on one session does not start spinning again on
/// the next one.
///
/// 一次排空请求：等待直到没有任何会话发布的代小于 `target`。
pub(crate) struct Drain<'a> {
    shared: &'a SharedState,
    resource: Resource,
    target: u64,
    caller: &'a SessionSlot,
    start: Instant,
    pauses: usize,
    progress_reports: u32,
    diagnosed: bool,
}

impl<'a> Drain<'a> {
    pub(crate) fn new(
        shared: &'a SharedState,
        caller: &'a SessionSlot,
        resource: Resource,
        target: u64,
    ) -> Self {
        Self {
            shared,
            resource,
            target,
            caller,
            start: Instant::now(),
            pauses: 0,
            progress_reports: 1,
            diagnosed: false,
        }
    }

    /// Walk the registered sessions and wait out each one still below the target.
    ///
    /// Membership is snapshotted so sessions can open and close while we wait.
    pub(crate) fn run(mut self) {
        fence(Ordering::SeqCst);
        for slot in self.shared.snapshot() {
            self.wait_for(&slot);
        }
    }

    fn wait_for(&mut self, slot: &SessionSlot) {
        let config = &self.shared.config;

        loop {
            let published = slot.published(self.resource);

            // Sessions published at the target or later are fine; 0 is idle.
            if published == NOT_PARTICIPATING || published >= self.target {
                return;
            }

            if std::ptr::eq(slot, self.caller) {
                self.shared.fatal(format_args!(
                    "{} generation drain: self-deadlock, session {} is published at {} and waits for {}",
                    self.resource, slot.id, published, self.target
                ));
            }

            self.pauses += 1;
            if self.pauses < config.spin_limit {
                pause();
            } else {
                sleep(config.sleep_interval);
            }

            let elapsed = self.start.elapsed();
            let next_report = config.progress_interval.checked_mul(self.progress_reports);
            if next_report.is_some_and(|next| elapsed > next) {
                log::info!(
                    "{} generation drain waited {} minutes",
                    self.resource,
                    elapsed.as_secs() / 60
                );
                self.progress_reports += 1;
            }

            let Some(timeout) = config.drain_timeout else {
                continue;
            };

            if !self.diagnosed && near_timeout(elapsed, timeout) {
                log::warn!(
                    "{} generation drain close to its {:?} timeout: session {} published at {}, target {}, waited {:?}",
                    self.resource,
                    timeout,
                    slot.id,
                    published,
                    self.target,
                    elapsed
                );
                self.diagnosed = true;
                continue;
            }

            if elapsed >= timeout {
                self.shared.fatal(format_args!(
                    "{} generation drain timed out after {:?} waiting on session {}",
                    self.resource, elapsed, slot.id
                ));
            }
        }
    }
}

#[inline]
fn near_timeout(elapsed: Duration, timeout: Duration) -> bool {
    timeout < TIMEOUT_DIAGNOSTIC_WINDOW || elapsed > timeout - TIMEOUT_DIAGNOSTIC_WINDOW
}
