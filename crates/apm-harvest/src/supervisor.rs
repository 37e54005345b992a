// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Harvest scheduling and lifecycle.
//!
//! The supervisor owns every aggregator and drives them through
//! `Idle -> Collecting -> Disposed`. Outside serverless mode each aggregator
//! gets its own loop that harvests on the kind's interval, re-arms when the
//! interval changes and stops on cancellation. Every harvest runs in its own
//! task so a failing or panicking aggregator never takes its loop, or any
//! other kind, down with it.
//!
//! At most one harvest per telemetry kind is in flight at a time. Scheduled,
//! manual and final harvests of a kind queue on the same gate.

use std::sync::Arc;
use std::time::Duration;

use apm_sampling::SamplerService;
use hashbrown::HashMap;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::{HarvestReport, Harvestable};
use crate::config::{AgentConfig, ConfigWatch, TelemetryKind};
use crate::error::HarvestError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Collecting,
    Disposed,
}

/// Held for the whole of a harvest, including the transport call.
type HarvestGate = Arc<Mutex<()>>;

pub struct HarvestSupervisor {
    config: ConfigWatch,
    aggregators: Vec<Arc<dyn Harvestable>>,
    gates: HashMap<TelemetryKind, HarvestGate>,
    samplers: Option<Arc<SamplerService>>,
    state: SupervisorState,
    shutdown_token: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl HarvestSupervisor {
    #[must_use]
    pub fn new(config: ConfigWatch) -> Self {
        Self {
            config,
            aggregators: Vec::new(),
            gates: HashMap::new(),
            samplers: None,
            state: SupervisorState::Idle,
            shutdown_token: CancellationToken::new(),
            task_handles: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Adds an aggregator. Aggregators registered after [`start`](Self::start)
    /// are only harvested manually.
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: Arc<dyn Harvestable>) -> Self {
        self.gates.entry(aggregator.kind()).or_default();
        self.aggregators.push(aggregator);
        self
    }

    /// Sampler service notified of sampling configuration changes.
    #[must_use]
    pub fn with_sampler_service(mut self, samplers: Arc<SamplerService>) -> Self {
        self.samplers = Some(samplers);
        self
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> Arc<AgentConfig> {
        self.config.current()
    }

    /// Starts one harvest loop per aggregator, or none in serverless mode.
    pub fn start(&mut self) -> Result<(), HarvestError> {
        match self.state {
            SupervisorState::Disposed => return Err(HarvestError::AlreadyDisposed),
            SupervisorState::Collecting => {
                debug!("Harvest supervisor already started");
                return Ok(());
            }
            SupervisorState::Idle => {}
        }

        self.started_at = Instant::now();
        self.state = SupervisorState::Collecting;

        if self.config.current().serverless_mode {
            info!("Serverless mode: harvests are triggered manually");
            return Ok(());
        }

        for aggregator in &self.aggregators {
            let handle = spawn_harvest_loop(
                Arc::clone(aggregator),
                self.gate(aggregator.kind()),
                self.config.subscribe(),
                self.shutdown_token.clone(),
            );
            self.task_handles.push(handle);
        }
        info!("Started {} harvest loops", self.task_handles.len());
        Ok(())
    }

    /// Harvests `kind` right away. `None` when no aggregator handles the kind,
    /// the kind is disabled, or the harvest failed (the failure is logged).
    pub async fn harvest_now(
        &self,
        kind: TelemetryKind,
    ) -> Result<Option<HarvestReport>, HarvestError> {
        self.ensure_not_disposed()?;
        if !self.config.current().harvest.get(kind).enabled {
            debug!("Skipping manual harvest of disabled {kind}");
            return Ok(None);
        }
        match self.aggregators.iter().find(|a| a.kind() == kind) {
            Some(aggregator) => {
                let gate = self.gate(kind);
                Ok(run_isolated(Arc::clone(aggregator), gate).await)
            }
            None => Ok(None),
        }
    }

    /// Harvests every enabled kind once, one after another.
    pub async fn harvest_all(&self) -> Result<Vec<HarvestReport>, HarvestError> {
        self.ensure_not_disposed()?;
        let config = self.config.current();
        let mut reports = Vec::with_capacity(self.aggregators.len());
        for aggregator in &self.aggregators {
            if !config.harvest.get(aggregator.kind()).enabled {
                continue;
            }
            let gate = self.gate(aggregator.kind());
            if let Some(report) = run_isolated(Arc::clone(aggregator), gate).await {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    /// Publishes a new snapshot, resets every aggregator and notifies the
    /// sampler service. Loops pick up interval changes on their own.
    pub fn update_config(&self, config: AgentConfig) -> Result<(), HarvestError> {
        self.ensure_not_disposed()?;
        config.validate()?;

        let config = self.config.publish(config);
        for aggregator in &self.aggregators {
            aggregator.on_config_update(&config);
        }
        if let Some(samplers) = &self.samplers {
            samplers.update_config(config.sampling.clone());
        }
        info!("Configuration updated");
        Ok(())
    }

    /// Runs the final harvest when configured to, then stops every loop.
    ///
    /// Each final harvest and the wait for the loops are bounded by the
    /// shutdown grace period. Calling it again is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), HarvestError> {
        if self.state == SupervisorState::Disposed {
            return Ok(());
        }
        self.state = SupervisorState::Disposed;

        let config = self.config.current();
        let grace = config.shutdown_grace;
        let uptime = self.started_at.elapsed();
        if config.send_data_on_exit && uptime > config.send_data_on_exit_threshold {
            info!("Harvesting before exit after {uptime:?} of uptime");
            for aggregator in &self.aggregators {
                let kind = aggregator.kind();
                if !config.harvest.get(kind).enabled {
                    continue;
                }
                let harvest = run_isolated(Arc::clone(aggregator), self.gate(kind));
                if tokio::time::timeout(grace, harvest).await.is_err() {
                    warn!("Final harvest of {kind} did not finish within {grace:?}");
                }
            }
        } else {
            debug!("Skipping final harvest, uptime {uptime:?}");
        }

        self.shutdown_token.cancel();

        let deadline = Instant::now() + grace;
        let mut timed_out = false;
        for handle in self.task_handles.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Harvest loop failed: {e}"),
                Err(_) => {
                    // the timeout dropped the handle, which detaches the task
                    timed_out = true;
                }
            }
        }

        if timed_out {
            warn!("Harvest loops still running after {grace:?}");
            return Err(HarvestError::ShutdownTimeout(grace));
        }
        info!("Harvest supervisor shut down");
        Ok(())
    }

    fn gate(&self, kind: TelemetryKind) -> HarvestGate {
        self.gates.get(&kind).map(Arc::clone).unwrap_or_default()
    }

    fn ensure_not_disposed(&self) -> Result<(), HarvestError> {
        if self.state == SupervisorState::Disposed {
            return Err(HarvestError::AlreadyDisposed);
        }
        Ok(())
    }
}

impl Drop for HarvestSupervisor {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
        for handle in &self.task_handles {
            handle.abort();
        }
    }
}

fn harvest_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn spawn_harvest_loop(
    aggregator: Arc<dyn Harvestable>,
    gate: HarvestGate,
    mut config_rx: watch::Receiver<Arc<AgentConfig>>,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let kind = aggregator.kind();
        let mut period = config_rx.borrow_and_update().harvest.get(kind).interval;
        let mut interval = harvest_interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let enabled = config_rx.borrow().harvest.get(kind).enabled;
                    if enabled {
                        run_isolated(Arc::clone(&aggregator), Arc::clone(&gate)).await;
                    }
                }
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        debug!("Configuration channel closed, stopping {kind} harvest loop");
                        break;
                    }
                    let next = config_rx.borrow_and_update().harvest.get(kind).interval;
                    if next != period && !next.is_zero() {
                        debug!("Re-arming {kind} harvest every {next:?}");
                        period = next;
                        interval = harvest_interval(period);
                    }
                }
                () = shutdown_token.cancelled() => {
                    debug!("Stopping {kind} harvest loop");
                    break;
                }
            }
        }
    })
}

/// Runs one harvest in its own task once the kind's gate is free. Errors and
/// panics are logged and reported as `None`.
///
/// The task owns the gate guard, so a caller that stops waiting does not let
/// another harvest of the kind start before this one ends.
async fn run_isolated(
    aggregator: Arc<dyn Harvestable>,
    gate: HarvestGate,
) -> Option<HarvestReport> {
    let kind = aggregator.kind();
    let guard = gate.lock_owned().await;
    let harvest = tokio::spawn(async move {
        let _guard = guard;
        aggregator.harvest().await
    });
    match harvest.await {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) => {
            error!("Harvest of {kind} failed: {e}");
            None
        }
        Err(e) if e.is_panic() => {
            error!("Harvest of {kind} panicked");
            None
        }
        Err(e) => {
            error!("Harvest of {kind} did not complete: {e}");
            None
        }
    }
}
