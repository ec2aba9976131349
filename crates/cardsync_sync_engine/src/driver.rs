//! Background scheduling of sync cycles.
//!
//! [`SyncDriver`] owns the timers: the periodic interval while the app is
//! in the foreground, and a one-shot retry after a failed cycle. Cycles run
//! on the blocking pool because the engine and its transport are blocking.
//! Triggers that arrive while a cycle runs are coalesced into it.

use crate::applier::SyncApplier;
use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::transport::SyncTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Why a cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The periodic interval elapsed.
    Periodic,
    /// The application asked for it.
    Manual,
    /// The application came to the foreground.
    Foreground,
    /// Connectivity was restored.
    Reconnect,
    /// The retry delay after a failure elapsed.
    Retry,
}

#[derive(Debug)]
enum DriverEvent {
    Trigger(SyncTrigger),
    Connectivity(bool),
    Foreground,
    Background,
    Shutdown,
}

/// A one-shot timer that posts an event unless dropped first.
struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    fn after(delay: Duration, events: mpsc::UnboundedSender<DriverEvent>, trigger: SyncTrigger) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(DriverEvent::Trigger(trigger));
        });
        Self { handle }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Handle of the background sync loop.
///
/// Dropping the handle stops the loop after the running cycle, if any.
pub struct SyncDriver {
    events: mpsc::UnboundedSender<DriverEvent>,
    handle: JoinHandle<()>,
}

impl SyncDriver {
    /// Starts the loop on the current tokio runtime.
    ///
    /// The first periodic tick fires immediately, so a cycle runs at start.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<T, A>(engine: Arc<SyncEngine<T, A>>) -> Self
    where
        T: SyncTransport + 'static,
        A: SyncApplier + 'static,
    {
        let (events, receiver) = mpsc::unbounded_channel();
        let driver = DriverLoop {
            engine,
            events: events.clone(),
            receiver,
            retry: None,
            failures: 0,
            foreground: true,
            running: true,
        };
        let handle = tokio::spawn(driver.run());
        Self { events, handle }
    }

    /// Requests a cycle.
    pub fn request_sync(&self) {
        self.send(DriverEvent::Trigger(SyncTrigger::Manual));
    }

    /// Reports a connectivity change. Regaining connectivity runs a cycle;
    /// losing it cancels a scheduled retry.
    pub fn set_online(&self, online: bool) {
        self.send(DriverEvent::Connectivity(online));
    }

    /// Reports that the application came to the foreground.
    pub fn on_foreground(&self) {
        self.send(DriverEvent::Foreground);
    }

    /// Reports that the application went to the background. Periodic
    /// cycles pause until [`SyncDriver::on_foreground`].
    pub fn on_background(&self) {
        self.send(DriverEvent::Background);
    }

    /// Stops the loop and waits for it to finish.
    pub async fn shutdown(self) {
        self.send(DriverEvent::Shutdown);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "sync driver task failed");
        }
    }

    fn send(&self, event: DriverEvent) {
        if self.events.send(event).is_err() {
            debug!("sync driver already stopped");
        }
    }
}

struct DriverLoop<T: SyncTransport, A: SyncApplier> {
    engine: Arc<SyncEngine<T, A>>,
    events: mpsc::UnboundedSender<DriverEvent>,
    receiver: mpsc::UnboundedReceiver<DriverEvent>,
    retry: Option<ScheduledTask>,
    failures: u32,
    foreground: bool,
    running: bool,
}

impl<T, A> DriverLoop<T, A>
where
    T: SyncTransport + 'static,
    A: SyncApplier + 'static,
{
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.engine.config().sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.engine.config().sync_interval, "sync driver started");

        while self.running {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.foreground {
                        self.cycle(SyncTrigger::Periodic).await;
                    }
                }
                event = self.receiver.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => self.running = false,
                },
            }
        }

        info!("sync driver stopped");
    }

    async fn handle(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Trigger(trigger) => self.cycle(trigger).await,
            DriverEvent::Connectivity(online) => {
                if self.set_online(online) {
                    self.cycle(SyncTrigger::Reconnect).await;
                }
            }
            DriverEvent::Foreground => {
                self.foreground = true;
                self.cycle(SyncTrigger::Foreground).await;
            }
            other => {
                self.control(other);
            }
        }
    }

    /// Applies an event without starting a cycle. Returns true if the
    /// device came back online.
    fn control(&mut self, event: DriverEvent) -> bool {
        match event {
            DriverEvent::Trigger(trigger) => {
                debug!(?trigger, "sync request coalesced into running cycle");
            }
            DriverEvent::Connectivity(online) => return self.set_online(online),
            DriverEvent::Foreground => self.foreground = true,
            DriverEvent::Background => self.foreground = false,
            DriverEvent::Shutdown => self.running = false,
        }
        false
    }

    fn set_online(&mut self, online: bool) -> bool {
        if !online {
            self.retry = None;
        }
        self.engine.set_online(online)
    }

    /// Runs a cycle, then applies the events that queued up meanwhile.
    /// Connectivity regained during the cycle runs one more.
    async fn cycle(&mut self, trigger: SyncTrigger) {
        let mut next = Some(trigger);
        while let Some(trigger) = next.take() {
            self.run_cycle(trigger).await;

            let mut reconnected = false;
            while let Ok(event) = self.receiver.try_recv() {
                reconnected |= self.control(event);
            }
            if reconnected && self.running {
                next = Some(SyncTrigger::Reconnect);
            }
        }
    }

    async fn run_cycle(&mut self, trigger: SyncTrigger) {
        if trigger == SyncTrigger::Retry && self.retry.take().is_none() {
            return;
        }
        if !self.engine.is_online() {
            debug!(?trigger, "offline, sync skipped");
            return;
        }

        debug!(?trigger, "starting sync cycle");
        let engine = Arc::clone(&self.engine);
        let error = match tokio::task::spawn_blocking(move || engine.sync()).await {
            Ok(Ok(_)) => {
                self.failures = 0;
                self.retry = None;
                return;
            }
            Ok(Err(SyncError::AlreadySyncing)) => {
                debug!(?trigger, "another cycle is running, request coalesced");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("sync task failed: {e}"),
        };

        if self.engine.is_online() {
            self.failures += 1;
            let delay = self.engine.config().retry.delay_for_attempt(self.failures);
            warn!(
                %error,
                failures = self.failures,
                ?delay,
                "sync cycle failed, retry scheduled"
            );
            self.retry = Some(ScheduledTask::after(delay, self.events.clone(), SyncTrigger::Retry));
        }
    }
}
