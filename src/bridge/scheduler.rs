//! # Scheduler
//!
//! Single worker that turns the ingress queue into paced controller
//! operations. One cycle runs through three states:
//!
//! ```text
//! Idle ──► Collecting ──► Executing(FlushPlan) ──► Idle
//!  │           │                 │
//!  │      debounce, then     discover, refresh,
//!  │      drain the queue    one op per device
//! wait for the
//! next intent
//! ```
//!
//! Every device-facing operation is followed by the same fixed gap, whether
//! it succeeded or not; the controller drops or interleaves replies when
//! commands arrive back to back.

use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregator::{Directive, FlushPlan, PendingMap};
use super::intent::{Intent, IntentSender};
use super::publisher::StatePublisher;
use crate::zense::protocol::{self, BRIGHTNESS_SCALE};
use crate::zense::{DeviceId, SessionClient};

/// Floor for the idle refresh period.
pub const MIN_POLL_PERIOD: Duration = Duration::from_secs(60);

/// Ceiling for the idle refresh period.
pub const MAX_POLL_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerSettings {
    /// Wait after the first intent of a burst before executing
    pub debounce: Duration,
    /// Gap after every device-facing operation
    pub command_gap: Duration,
    /// Maximum intents drained per cycle after the debounce
    pub drain_limit: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(120),
            command_gap: Duration::from_millis(100),
            drain_limit: 200,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("ingress queue closed")]
    IngressClosed,
}

#[state]
#[derive(Debug, Clone)]
pub enum CycleState {
    Idle,
    Collecting,
    Executing(FlushPlan),
}

#[machine]
pub struct Scheduler<S: CycleState> {
    ingress: mpsc::UnboundedReceiver<Intent>,
    pending: PendingMap,
    session: Arc<SessionClient>,
    publisher: StatePublisher,
    known: watch::Sender<Vec<DeviceId>>,
    settings: SchedulerSettings,
}

impl<S: CycleState> Scheduler<S> {
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Receiver for the device ids of the last successful discovery.
    pub fn subscribe_known(&self) -> watch::Receiver<Vec<DeviceId>> {
        self.known.subscribe()
    }
}

impl Scheduler<Idle> {
    pub fn create(
        ingress: mpsc::UnboundedReceiver<Intent>,
        session: Arc<SessionClient>,
        publisher: StatePublisher,
        settings: SchedulerSettings,
    ) -> Self {
        info!("Creating scheduler with settings: {:?}", settings);
        let (known, _) = watch::channel(Vec::new());
        Self::new(ingress, PendingMap::new(), session, publisher, known, settings)
    }

    /// Blocks until the next intent arrives and merges it.
    pub async fn wait_for_intent(mut self) -> Result<Scheduler<Collecting>, SchedulerError> {
        match self.ingress.recv().await {
            Some(intent) => {
                debug!("Intent {:?} opens a new cycle", intent);
                self.pending.merge(intent);
                Ok(self.transition())
            }
            None => Err(SchedulerError::IngressClosed),
        }
    }
}

impl Scheduler<Collecting> {
    /// Lets a burst settle, drains what arrived meanwhile and snapshots the
    /// pending map into a flush plan.
    pub async fn debounce(mut self) -> Scheduler<Executing> {
        sleep(self.settings.debounce).await;

        let mut drained = 0;
        while drained < self.settings.drain_limit {
            match self.ingress.try_recv() {
                Ok(intent) => {
                    self.pending.merge(intent);
                    drained += 1;
                }
                Err(_) => break,
            }
        }
        if drained > 0 {
            debug!(
                "Drained {} more intents into {} pending devices",
                drained,
                self.pending.len()
            );
        }

        let plan = self.pending.take_plan();
        self.transition_with(plan)
    }
}

impl Scheduler<Executing> {
    /// Runs the flush plan: discovery, then refresh, then device directives.
    pub async fn execute(mut self) -> Scheduler<Idle> {
        let plan = self.get_state_data().cloned().unwrap_or_default();

        if plan.discover {
            self.discover().await;
        }
        if plan.refresh {
            self.refresh().await;
        }
        for (device, directive) in &plan.directives {
            self.apply(*device, *directive).await;
        }

        self.transition()
    }

    async fn pace(&self) {
        sleep(self.settings.command_gap).await;
    }

    async fn discover(&mut self) {
        let reply = self.session.get_devices().await;
        self.pace().await;

        let devices = match reply {
            Ok(Some(devices)) if !devices.is_empty() => devices,
            Ok(_) => {
                warn!(
                    "Discovery returned no devices, keeping {} known",
                    self.known.borrow().len()
                );
                return;
            }
            Err(e) => {
                warn!("Discovery failed: {}", e);
                return;
            }
        };

        info!("Discovered devices: {:?}", devices);
        self.known.send_replace(devices.clone());

        for device in devices {
            let name = match self.session.get_name(device).await {
                Ok(name) => name,
                Err(e) => {
                    warn!("Name query for device {} failed: {}", device, e);
                    protocol::fallback_name(device)
                }
            };
            self.publisher.publish_discovery(device, &name);
            self.pace().await;
        }
    }

    async fn refresh(&mut self) {
        let known = self.known.borrow().clone();
        if known.is_empty() {
            debug!("Refresh requested before any discovery, skipping");
            return;
        }

        for device in known {
            match self.session.get_level(device).await {
                Ok(Some(level)) => {
                    self.publisher.publish_state(device, level);
                }
                Ok(None) => debug!("No level in reply for device {}", device),
                Err(e) => warn!("Level query for device {} failed: {}", device, e),
            }
            self.pace().await;
        }
    }

    async fn apply(&mut self, device: DeviceId, directive: Directive) {
        debug!("TX {:?} did={}", directive, device);
        let outcome = match directive {
            Directive::Off => self.session.set_off(device).await.map(|()| 0),
            Directive::Fade(level) => self.session.fade(device, level).await.map(|()| level),
            Directive::On => self.session.set_on(device).await.map(|()| BRIGHTNESS_SCALE),
        };
        match outcome {
            Ok(level) => {
                self.publisher.publish_state(device, i64::from(level));
            }
            Err(e) => warn!("{:?} for device {} not confirmed: {}", directive, device, e),
        }
        self.pace().await;
    }
}

/// Public interface for spawning and feeding the scheduler.
pub struct SchedulerHandle {
    intents: IntentSender,
    known: watch::Receiver<Vec<DeviceId>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn spawn(
        session: Arc<SessionClient>,
        publisher: StatePublisher,
        settings: SchedulerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let (intents, ingress) = IntentSender::channel();
        let scheduler = Scheduler::<Idle>::create(ingress, session, publisher, settings);
        let known = scheduler.subscribe_known();

        let task = tokio::spawn(async move {
            info!("Scheduler task started");
            if let Err(e) = run_scheduler_loop(scheduler, shutdown).await {
                error!("Scheduler task terminated with error: {}", e);
            } else {
                info!("Scheduler task finished");
            }
        });

        Self {
            intents,
            known,
            task,
        }
    }

    pub fn sender(&self) -> IntentSender {
        self.intents.clone()
    }

    pub fn known_devices(&self) -> watch::Receiver<Vec<DeviceId>> {
        self.known.clone()
    }

    pub async fn join(self) {
        drop(self.intents);
        if let Err(e) = self.task.await {
            error!("Scheduler task panicked: {}", e);
        }
    }
}

async fn run_scheduler_loop(
    mut scheduler: Scheduler<Idle>,
    shutdown: CancellationToken,
) -> Result<(), SchedulerError> {
    let settings = scheduler.settings().clone();
    info!(
        "Entering scheduler loop (debounce {:?}, gap {:?})",
        settings.debounce, settings.command_gap
    );

    let mut cycles: u64 = 0;
    loop {
        let collecting = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Scheduler stopping after {} cycles", cycles);
                return Ok(());
            }
            next = scheduler.wait_for_intent() => next?,
        };

        let executing = collecting.debounce().await;
        if let Some(plan) = executing.get_state_data() {
            debug!(
                "Cycle {}: discover={} refresh={} directives={}",
                cycles,
                plan.discover,
                plan.refresh,
                plan.directives.len()
            );
        }
        scheduler = executing.execute().await;
        cycles += 1;
    }
}

/// Periodically asks for a fleet refresh once devices are known.
///
/// This is the only way to learn about changes made at the wall switches.
pub fn spawn_idle_poller(
    intents: IntentSender,
    known: watch::Receiver<Vec<DeviceId>>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let period = period.clamp(MIN_POLL_PERIOD, MAX_POLL_PERIOD);
    tokio::spawn(async move {
        info!("Polling device state every {:?}", period);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if known.borrow().is_empty() {
                debug!("No devices known yet, skipping refresh");
                continue;
            }
            if !intents.submit(Intent::refresh()) {
                break;
            }
        }
        debug!("Idle poller stopped");
    })
}
