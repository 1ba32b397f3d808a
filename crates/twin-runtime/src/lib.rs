#![deny(warnings)]

//! Simulation engine for the factory twin.
//!
//! [`FactoryTwin`] owns the [`FactoryState`], the market model and the
//! history log. Every mutation goes through its methods, one at a time; wrap
//! it in a [`SharedTwin`] to serve several callers.
//!
//! A tick runs three steps in order:
//! 1. advance the clock
//! 2. progress the job ledger, pricing and crediting completed jobs
//! 3. write the post-completion snapshot to history

mod history;
mod ledger;
mod shared;

pub use history::HistoryLog;
pub use ledger::JobLedger;
pub use shared::SharedTwin;

use persistence::HistoryStore;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};
use twin_core::{
    validate_config, CommandError, Job, JobId, JobRecord, JobStatus, MachineHealth, Shift, Tick,
    TickSnapshot, TwinConfig, ValidationError,
};
use twin_market::{Forecast, MarketModel};

/// Token returned by [`FactoryTwin::log_issue`].
pub const ISSUE_ACK: &str = "LOGGED";

/// Horizon used when callers do not ask for one.
pub const DEFAULT_FORECAST_HORIZON: u32 = 5;

/// Mutable simulation state. Read-only outside this crate.
#[derive(Clone, Debug)]
pub struct FactoryState {
    clock: Tick,
    cash: Decimal,
    inventory: u64,
    health: MachineHealth,
    shift: Shift,
    ledger: JobLedger,
}

impl FactoryState {
    pub fn new(cfg: &TwinConfig) -> Self {
        Self {
            clock: 0,
            cash: cfg.initial_cash,
            inventory: cfg.initial_inventory,
            health: MachineHealth::FULL,
            shift: cfg.initial_shift,
            ledger: JobLedger::new(),
        }
    }

    pub fn clock(&self) -> Tick {
        self.clock
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn inventory(&self) -> u64 {
        self.inventory
    }

    pub fn health(&self) -> MachineHealth {
        self.health
    }

    pub fn shift(&self) -> Shift {
        self.shift
    }

    pub fn jobs(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn snapshot(&self) -> TickSnapshot {
        TickSnapshot {
            tick: self.clock,
            cash: self.cash,
            inventory: self.inventory,
            health: self.health,
            active_job_count: self.active_job_count(),
            shift: self.shift,
        }
    }

    fn active_job_count(&self) -> u32 {
        u32::try_from(self.ledger.len()).unwrap_or(u32::MAX)
    }

    fn ensure_funds(&self, required: Decimal) -> Result<(), CommandError> {
        if self.cash < required {
            return Err(CommandError::InsufficientFunds {
                required,
                available: self.cash,
            });
        }
        Ok(())
    }
}

/// Confirmation of [`FactoryTwin::start_job`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobStarted {
    pub job_id: JobId,
    pub quantity: u32,
    pub cost: Decimal,
    pub duration_ticks: u32,
    /// Health lost by this start.
    pub wear: f64,
    pub health: MachineHealth,
}

impl fmt::Display for JobStarted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {} started. Cost: ${}. Est. Duration: {} ticks.",
            self.job_id, self.cost, self.duration_ticks
        )
    }
}

/// Confirmation of [`FactoryTwin::cancel_job`]. Cancelled jobs are not refunded.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobCancelled {
    pub job_id: JobId,
    pub forfeited_cost: Decimal,
}

impl fmt::Display for JobCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job {} cancelled.", self.job_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MachineRepaired {
    pub cost: Decimal,
    pub health: MachineHealth,
}

impl fmt::Display for MachineRepaired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Machine repaired. Cost: ${}. Health: {}%.", self.cost, self.health)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShiftChanged {
    pub shift: Shift,
}

impl fmt::Display for ShiftChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shift changed to {}.", self.shift)
    }
}

/// Result of [`FactoryTwin::status`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FactoryStatus {
    pub tick: Tick,
    pub shift: Shift,
    pub cash: Decimal,
    pub inventory: u64,
    pub health: MachineHealth,
    pub active_job_count: u32,
}

impl fmt::Display for FactoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tick: {} | Shift: {} | Cash: ${:.2} | Inventory: {} | Health: {}% | Active Jobs: {}",
            self.tick, self.shift, self.cash, self.inventory, self.health, self.active_job_count
        )
    }
}

/// Result of [`FactoryTwin::financials`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Financials {
    pub cash: Decimal,
    pub unit_cost: Decimal,
    /// Base market price; the realised price depends on the completion tick.
    pub unit_revenue_estimate: Decimal,
}

/// A job finished during a tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompletedJob {
    pub job_id: JobId,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub revenue: Decimal,
}

/// Outcome of one [`FactoryTwin::tick`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: Tick,
    /// In start order.
    pub completed: Vec<CompletedJob>,
}

/// The digital twin: state, market and history behind one set of operations.
#[derive(Debug)]
pub struct FactoryTwin {
    cfg: TwinConfig,
    state: FactoryState,
    market: MarketModel,
    history: HistoryLog,
}

impl FactoryTwin {
    /// Twin with seeded market noise from `cfg.market.rng_seed`.
    pub fn new<S: HistoryStore + 'static>(
        cfg: TwinConfig,
        store: S,
    ) -> Result<Self, ValidationError> {
        let market = MarketModel::new(cfg.market.clone());
        Self::with_market(cfg, market, store)
    }

    pub fn with_market<S: HistoryStore + 'static>(
        cfg: TwinConfig,
        market: MarketModel,
        store: S,
    ) -> Result<Self, ValidationError> {
        validate_config(&cfg)?;
        let state = FactoryState::new(&cfg);
        Ok(Self {
            cfg,
            state,
            market,
            history: HistoryLog::new(store),
        })
    }

    pub fn config(&self) -> &TwinConfig {
        &self.cfg
    }

    pub fn state(&self) -> &FactoryState {
        &self.state
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Debit `unit_cost · qty`, queue the job and wear the machine.
    pub fn start_job(&mut self, id: &str, qty: u32) -> Result<JobStarted, CommandError> {
        if qty == 0 {
            return Err(CommandError::InvalidQuantity);
        }
        if self.state.ledger.contains(id) {
            return Err(CommandError::DuplicateJob(id.to_string()));
        }
        let cost = self.cfg.unit_cost * Decimal::from(qty);
        self.state.ensure_funds(cost)?;
        if self.state.health.is_broken() {
            return Err(CommandError::MachineBroken);
        }

        self.state.cash -= cost;
        let job = Job {
            id: JobId::from(id),
            quantity: qty,
            start_tick: self.state.clock,
            remaining_duration: self.cfg.job_duration_ticks,
            cost,
            revenue: Decimal::ZERO,
        };
        let record = JobRecord::for_job(&job, JobStatus::Started, self.state.clock);
        self.state.ledger.push(job);
        let wear = self.cfg.wear_for(self.state.shift);
        self.state.health = self.state.health.worn(wear);
        self.history.record_job(&record);

        info!(job_id = id, qty, %cost, health = self.state.health.value(), "job started");
        Ok(JobStarted {
            job_id: JobId::from(id),
            quantity: qty,
            cost,
            duration_ticks: self.cfg.job_duration_ticks,
            wear,
            health: self.state.health,
        })
    }

    /// Remove an active job without refund.
    pub fn cancel_job(&mut self, id: &str) -> Result<JobCancelled, CommandError> {
        let Some(job) = self.state.ledger.remove(id) else {
            debug!(job_id = id, "cancel requested for unknown job");
            return Err(CommandError::JobNotFound(id.to_string()));
        };
        self.history
            .record_job(&JobRecord::for_job(&job, JobStatus::Cancelled, self.state.clock));
        info!(job_id = id, "job cancelled");
        Ok(JobCancelled {
            job_id: job.id,
            forfeited_cost: job.cost,
        })
    }

    pub fn repair_machine(&mut self) -> Result<MachineRepaired, CommandError> {
        let cost = self.cfg.repair_cost;
        self.state.ensure_funds(cost)?;
        self.state.cash -= cost;
        self.state.health = MachineHealth::FULL;
        info!(%cost, "machine repaired");
        Ok(MachineRepaired {
            cost,
            health: self.state.health,
        })
    }

    /// Accepts exactly "DAY" or "NIGHT".
    pub fn change_shift(&mut self, new_shift: &str) -> Result<ShiftChanged, CommandError> {
        let shift: Shift = new_shift.parse()?;
        Ok(self.set_shift(shift))
    }

    pub fn set_shift(&mut self, shift: Shift) -> ShiftChanged {
        if self.state.shift != shift {
            info!(from = %self.state.shift, to = %shift, "shift changed");
        }
        self.state.shift = shift;
        ShiftChanged { shift }
    }

    pub fn status(&self) -> FactoryStatus {
        FactoryStatus {
            tick: self.state.clock,
            shift: self.state.shift,
            cash: self.state.cash,
            inventory: self.state.inventory,
            health: self.state.health,
            active_job_count: self.state.active_job_count(),
        }
    }

    pub fn financials(&self) -> Financials {
        Financials {
            cash: self.state.cash,
            unit_cost: self.cfg.unit_cost,
            unit_revenue_estimate: self.cfg.market.base_price,
        }
    }

    /// Forecast for the `horizon` ticks after the current one.
    pub fn market_forecast(&mut self, horizon: u32) -> Forecast {
        self.market.forecast(self.state.clock, horizon)
    }

    pub fn log_issue(&self, category: &str, description: &str) -> &'static str {
        warn!(category, description, tick = self.state.clock, "issue logged");
        ISSUE_ACK
    }

    /// Advance one tick. Persistence failures are logged by the history log
    /// and never stop the tick.
    pub fn tick(&mut self) -> TickReport {
        self.state.clock = self.state.clock.saturating_add(1);
        let now = self.state.clock;

        let mut completed = Vec::new();
        for mut job in self.state.ledger.progress() {
            // Output is sold into the tick after completion.
            let unit_price = self.market.spot_price(now);
            let revenue = unit_price * Decimal::from(job.quantity);
            job.revenue = revenue;
            self.state.cash += revenue;
            self.state.inventory = self.state.inventory.saturating_add(u64::from(job.quantity));
            self.history
                .record_job(&JobRecord::for_job(&job, JobStatus::Completed, now));
            info!(job_id = %job.id, %revenue, "job completed");
            completed.push(CompletedJob {
                job_id: job.id,
                quantity: job.quantity,
                unit_price,
                revenue,
            });
        }

        self.history.record_tick(&self.state.snapshot());
        debug!(tick = now, completed = completed.len(), "tick processed");
        TickReport { tick: now, completed }
    }

    /// Run `ticks` ticks back to back.
    pub fn advance(&mut self, ticks: u32) -> Vec<TickReport> {
        (0..ticks).map(|_| self.tick()).collect()
    }
}
