#![deny(warnings)]

//! Core domain models and invariants for the factory twin.
//!
//! This crate defines the serializable types shared by the market model, the
//! engine and the history store, with validation helpers that guarantee basic
//! invariants before a simulation is started.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Discrete simulated time unit (~1 hour).
pub type Tick = u64;

/// Caller-supplied job identifier, e.g. "O1".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// Crew on duty. Night crews wear the machine faster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Shift {
    Day,
    Night,
}

impl Shift {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shift::Day => "DAY",
            Shift::Night => "NIGHT",
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shift {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAY" => Ok(Shift::Day),
            "NIGHT" => Ok(Shift::Night),
            other => Err(CommandError::InvalidShift(other.to_string())),
        }
    }
}

/// Lifecycle status written to the job history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Started,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "STARTED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parses the stored column value; unknown text maps to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(JobStatus::Started),
            "COMPLETED" => Some(JobStatus::Completed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine condition in percent. Always within [0, 100].
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(into = "f64", from = "f64")]
pub struct MachineHealth(f64);

impl From<f64> for MachineHealth {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<MachineHealth> for f64 {
    fn from(h: MachineHealth) -> Self {
        h.0
    }
}

impl MachineHealth {
    pub const FULL: MachineHealth = MachineHealth(100.0);
    pub const BROKEN: MachineHealth = MachineHealth(0.0);

    /// Clamps `value` into [0, 100]; NaN counts as broken.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::BROKEN;
        }
        MachineHealth(value.clamp(0.0, 100.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Health after `amount` of wear, floored at zero.
    pub fn worn(self, amount: f64) -> Self {
        Self::new(self.0 - amount.max(0.0))
    }

    pub fn is_broken(self) -> bool {
        self.0 <= 0.0
    }
}

impl Default for MachineHealth {
    fn default() -> Self {
        Self::FULL
    }
}

impl fmt::Display for MachineHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A production job in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Units produced on completion (> 0).
    pub quantity: u32,
    pub start_tick: Tick,
    /// Ticks left until completion; fixed at creation, decremented per tick.
    pub remaining_duration: u32,
    /// Charged in full at start.
    pub cost: Decimal,
    /// Zero until completion.
    pub revenue: Decimal,
}

/// Post-tick state written to `factory_history`, keyed by `tick`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub tick: Tick,
    pub cash: Decimal,
    pub inventory: u64,
    pub health: MachineHealth,
    pub active_job_count: u32,
    pub shift: Shift,
}

/// Job lifecycle row written to `job_history`, keyed by `job_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub start_tick: Tick,
    /// Tick of the completion or cancellation; `None` while started.
    pub end_tick: Option<Tick>,
    pub status: JobStatus,
    pub revenue: Decimal,
    pub cost: Decimal,
}

impl JobRecord {
    /// Builds the history row for `job` in `status` at tick `now`.
    pub fn for_job(job: &Job, status: JobStatus, now: Tick) -> Self {
        let end_tick = match status {
            JobStatus::Started => None,
            JobStatus::Completed | JobStatus::Cancelled => Some(now),
        };
        JobRecord {
            job_id: job.id.clone(),
            start_tick: job.start_tick,
            end_tick,
            status,
            revenue: job.revenue,
            cost: job.cost,
        }
    }
}

/// Parameters of the demand/price forecast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Demand in units per tick around which the cycle oscillates.
    pub base_demand: u32,
    /// Unit price around which the cycle oscillates.
    pub base_price: Decimal,
    /// Length of one market cycle in ticks (24 = daily).
    pub period_ticks: u32,
    pub demand_amplitude: f64,
    pub price_amplitude: f64,
    /// Demand noise is drawn uniformly from [-demand_noise, demand_noise].
    pub demand_noise: i64,
    /// Price noise is drawn uniformly from [-price_noise, price_noise].
    pub price_noise: f64,
    /// Seed for deterministic RNG.
    pub rng_seed: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_demand: 10,
            base_price: Decimal::new(150, 0),
            period_ticks: 24,
            demand_amplitude: 5.0,
            price_amplitude: 20.0,
            demand_noise: 2,
            price_noise: 5.0,
            rng_seed: 42,
        }
    }
}

/// Simulation configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinConfig {
    pub initial_cash: Decimal,
    pub initial_inventory: u64,
    pub initial_shift: Shift,
    /// Cost per unit, charged when a job starts.
    pub unit_cost: Decimal,
    pub job_duration_ticks: u32,
    pub repair_cost: Decimal,
    /// Health lost per job start on the day shift.
    pub day_wear: f64,
    /// Health lost per job start on the night shift.
    pub night_wear: f64,
    pub market: MarketConfig,
}

impl TwinConfig {
    pub fn wear_for(&self, shift: Shift) -> f64 {
        match shift {
            Shift::Day => self.day_wear,
            Shift::Night => self.night_wear,
        }
    }
}

impl Default for TwinConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::new(1000, 0),
            initial_inventory: 0,
            initial_shift: Shift::Day,
            unit_cost: Decimal::new(50, 0),
            job_duration_ticks: 5,
            repair_cost: Decimal::new(200, 0),
            day_wear: 5.0,
            night_wear: 8.0,
            market: MarketConfig::default(),
        }
    }
}

/// Business-rule rejections returned by commands. None of these are fatal.
#[derive(Clone, Debug, Error, PartialEq, Serialize)]
pub enum CommandError {
    #[error("insufficient funds: need ${required}, have ${available}")]
    InsufficientFunds { required: Decimal, available: Decimal },
    #[error("machine broken, repair required before starting jobs")]
    MachineBroken,
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("invalid shift {0:?}, use DAY or NIGHT")]
    InvalidShift(String),
    #[error("job {0} is already active")]
    DuplicateJob(String),
    #[error("quantity must be positive")]
    InvalidQuantity,
}

impl CommandError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            CommandError::MachineBroken => "MACHINE_BROKEN",
            CommandError::JobNotFound(_) => "JOB_NOT_FOUND",
            CommandError::InvalidShift(_) => "INVALID_SHIFT",
            CommandError::DuplicateJob(_) => "DUPLICATE_JOB",
            CommandError::InvalidQuantity => "INVALID_QUANTITY",
        }
    }
}

/// Validation errors for configuration invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Price or cost must be non-negative.
    #[error("negative monetary value for {0}")]
    NegativeMoney(&'static str),
    /// Jobs must take at least one tick.
    #[error("job duration must be > 0")]
    ZeroDuration,
    /// Wear is a health percentage.
    #[error("wear {0} must be finite and within [0, 100]")]
    InvalidWear(f64),
    /// The market cycle needs a positive period.
    #[error("market period must be > 0")]
    ZeroPeriod,
    /// Numeric field must be finite and non-negative.
    #[error("non-finite or negative market parameter: {0}")]
    InvalidMarketParam(&'static str),
}

/// Validate the market model parameters.
pub fn validate_market(m: &MarketConfig) -> Result<(), ValidationError> {
    if m.period_ticks == 0 {
        return Err(ValidationError::ZeroPeriod);
    }
    if m.base_price < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney("base_price"));
    }
    let params = [
        ("demand_amplitude", m.demand_amplitude),
        ("price_amplitude", m.price_amplitude),
        ("price_noise", m.price_noise),
    ];
    for (name, v) in params {
        if !v.is_finite() || v < 0.0 {
            return Err(ValidationError::InvalidMarketParam(name));
        }
    }
    if m.demand_noise < 0 {
        return Err(ValidationError::InvalidMarketParam("demand_noise"));
    }
    Ok(())
}

/// Validate the whole configuration, including the market section.
pub fn validate_config(c: &TwinConfig) -> Result<(), ValidationError> {
    let money = [
        ("initial_cash", c.initial_cash),
        ("unit_cost", c.unit_cost),
        ("repair_cost", c.repair_cost),
    ];
    for (name, v) in money {
        if v < Decimal::ZERO {
            return Err(ValidationError::NegativeMoney(name));
        }
    }
    if c.job_duration_ticks == 0 {
        return Err(ValidationError::ZeroDuration);
    }
    for wear in [c.day_wear, c.night_wear] {
        if !wear.is_finite() || !(0.0..=100.0).contains(&wear) {
            return Err(ValidationError::InvalidWear(wear));
        }
    }
    validate_market(&c.market)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TwinConfig::default();
        validate_config(&cfg).unwrap();
        assert_eq!(cfg.initial_cash, Decimal::new(1000, 0));
        assert_eq!(cfg.wear_for(Shift::Day), 5.0);
        assert_eq!(cfg.wear_for(Shift::Night), 8.0);
    }

    #[test]
    fn config_from_partial_yaml() {
        let cfg: TwinConfig =
            serde_yaml::from_str("initial_cash: 2500\nmarket:\n  rng_seed: 7\n").unwrap();
        assert_eq!(cfg.initial_cash, Decimal::new(2500, 0));
        assert_eq!(cfg.unit_cost, Decimal::new(50, 0));
        assert_eq!(cfg.market.rng_seed, 7);
        assert_eq!(cfg.market.period_ticks, 24);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let cfg: TwinConfig =
            serde_yaml::from_str(include_str!("../../../config/default.yaml")).unwrap();
        assert_eq!(cfg, TwinConfig::default());
    }

    #[test]
    fn rejects_bad_config() {
        let mut cfg = TwinConfig {
            job_duration_ticks: 0,
            ..TwinConfig::default()
        };
        assert_eq!(validate_config(&cfg), Err(ValidationError::ZeroDuration));
        cfg.job_duration_ticks = 5;
        cfg.night_wear = 120.0;
        assert_eq!(validate_config(&cfg), Err(ValidationError::InvalidWear(120.0)));
        cfg.night_wear = 8.0;
        cfg.unit_cost = Decimal::new(-1, 0);
        assert_eq!(
            validate_config(&cfg),
            Err(ValidationError::NegativeMoney("unit_cost"))
        );
        cfg.unit_cost = Decimal::new(50, 0);
        cfg.market.period_ticks = 0;
        assert_eq!(validate_config(&cfg), Err(ValidationError::ZeroPeriod));
    }

    #[test]
    fn shift_parsing_is_strict() {
        assert_eq!("DAY".parse::<Shift>(), Ok(Shift::Day));
        assert_eq!("NIGHT".parse::<Shift>(), Ok(Shift::Night));
        assert_eq!(
            "SIDEWAYS".parse::<Shift>(),
            Err(CommandError::InvalidShift("SIDEWAYS".to_string()))
        );
        assert_eq!(serde_json::to_string(&Shift::Night).unwrap(), "\"NIGHT\"");
        assert_eq!(serde_json::to_string(&MachineHealth::new(95.0)).unwrap(), "95.0");
    }

    #[test]
    fn job_record_end_tick_follows_status() {
        let job = Job {
            id: JobId::from("O1"),
            quantity: 10,
            start_tick: 3,
            remaining_duration: 5,
            cost: Decimal::new(500, 0),
            revenue: Decimal::ZERO,
        };
        assert_eq!(JobRecord::for_job(&job, JobStatus::Started, 3).end_tick, None);
        let done = JobRecord::for_job(&job, JobStatus::Completed, 8);
        assert_eq!(done.end_tick, Some(8));
        assert_eq!(done.status.as_str(), "COMPLETED");
        assert_eq!(JobStatus::parse("CANCELLED"), Some(JobStatus::Cancelled));
        assert_eq!(JobStatus::parse("LOST"), None);
    }

    #[test]
    fn error_kinds_are_stable() {
        let e = CommandError::InsufficientFunds {
            required: Decimal::new(200, 0),
            available: Decimal::new(100, 0),
        };
        assert_eq!(e.kind(), "INSUFFICIENT_FUNDS");
        assert_eq!(e.to_string(), "insufficient funds: need $200, have $100");
        assert_eq!(CommandError::JobNotFound("X".into()).kind(), "JOB_NOT_FOUND");
    }

    #[test]
    fn nan_health_is_broken() {
        assert!(MachineHealth::new(f64::NAN).is_broken());
        assert_eq!(MachineHealth::FULL.worn(-5.0), MachineHealth::FULL);
    }

    #[test]
    fn deserialized_health_is_clamped() {
        let h: MachineHealth = serde_json::from_str("150.0").unwrap();
        assert_eq!(h, MachineHealth::FULL);
        let h: MachineHealth = serde_json::from_str("-3").unwrap();
        assert!(h.is_broken());
        let snap: TickSnapshot = serde_json::from_value(serde_json::json!({
            "tick": 1, "cash": "10", "inventory": 0, "health": 250.0,
            "active_job_count": 0, "shift": "DAY"
        }))
        .unwrap();
        assert_eq!(snap.health.value(), 100.0);
    }

    proptest! {
        #[test]
        fn health_stays_in_bounds(
            start in -50.0f64..150.0,
            wear in proptest::collection::vec(0.0f64..40.0, 0..20),
        ) {
            let mut h = MachineHealth::new(start);
            prop_assert!((0.0..=100.0).contains(&h.value()));
            for w in wear {
                let next = h.worn(w);
                prop_assert!(next.value() <= h.value());
                prop_assert!((0.0..=100.0).contains(&next.value()));
                h = next;
            }
        }
    }
}
