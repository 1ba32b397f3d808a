#![deny(warnings)]

//! Market model: cyclical demand and price forecast with bounded noise.
//!
//! For every future tick `t` the signal is `sin(2π · t / period)`:
//! - demand = max(1, round(base_demand + cycle · demand_amplitude + noise))
//! - price = base_price + cycle · price_amplitude + noise, rounded to cents
//!
//! The model keeps no state apart from its noise source. Noise is injected
//! through the [`Noise`] trait so tests can pin it to zero.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::fmt;
use twin_core::{MarketConfig, Tick};

/// Source of the bounded perturbation added to each forecast point.
pub trait Noise: Send + Sync {
    /// Uniform integer in `[-spread, spread]`.
    fn demand_jitter(&mut self, spread: i64) -> i64;
    /// Uniform real in `[-spread, spread]`.
    fn price_jitter(&mut self, spread: f64) -> f64;
}

/// Reproducible noise from a seeded ChaCha8 stream.
pub struct SeededNoise {
    rng: ChaCha8Rng,
}

impl SeededNoise {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Noise for SeededNoise {
    fn demand_jitter(&mut self, spread: i64) -> i64 {
        if spread <= 0 {
            return 0;
        }
        self.rng.gen_range(-spread..=spread)
    }

    fn price_jitter(&mut self, spread: f64) -> f64 {
        if !spread.is_finite() || spread <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-spread..=spread)
    }
}

/// No perturbation at all; the forecast becomes a pure function of the tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroNoise;

impl Noise for ZeroNoise {
    fn demand_jitter(&mut self, _spread: i64) -> i64 {
        0
    }

    fn price_jitter(&mut self, _spread: f64) -> f64 {
        0.0
    }
}

/// Expected demand and unit price for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPoint {
    pub demand: u32,
    pub price: Decimal,
}

/// Forecast points ordered by tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Forecast {
    points: BTreeMap<Tick, MarketPoint>,
}

impl Forecast {
    pub fn get(&self, tick: Tick) -> Option<&MarketPoint> {
        self.points.get(&tick)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tick, &MarketPoint)> + '_ {
        self.points.iter().map(|(t, p)| (*t, p))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Phase of the market cycle at `tick`, in [-1, 1].
pub fn cycle(tick: Tick, period_ticks: u32) -> f64 {
    if period_ticks == 0 {
        return 0.0;
    }
    let period = u64::from(period_ticks);
    // Reduce first so large ticks keep full precision.
    let phase = (tick % period) as f64 / period as f64;
    (TAU * phase).sin()
}

/// Evaluate one forecast point with explicit noise values.
pub fn market_point(
    cfg: &MarketConfig,
    tick: Tick,
    demand_jitter: i64,
    price_jitter: f64,
) -> MarketPoint {
    let c = cycle(tick, cfg.period_ticks);
    let demand = (f64::from(cfg.base_demand) + c * cfg.demand_amplitude + demand_jitter as f64)
        .round()
        .clamp(1.0, f64::from(u32::MAX)) as u32;
    let base_price = cfg.base_price.to_f64().unwrap_or(0.0);
    let raw = base_price + c * cfg.price_amplitude + price_jitter;
    let price = Decimal::from_f64(raw)
        .map(|p| p.round_dp(2))
        .unwrap_or(Decimal::ZERO)
        .max(Decimal::ZERO);
    MarketPoint { demand, price }
}

/// Forecast generator owning its noise source.
pub struct MarketModel {
    cfg: MarketConfig,
    noise: Box<dyn Noise>,
}

impl MarketModel {
    /// Model with seeded noise taken from `cfg.rng_seed`.
    pub fn new(cfg: MarketConfig) -> Self {
        let noise = SeededNoise::new(cfg.rng_seed);
        Self::with_noise(cfg, noise)
    }

    pub fn with_noise<N: Noise + 'static>(cfg: MarketConfig, noise: N) -> Self {
        Self {
            cfg,
            noise: Box::new(noise),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.cfg
    }

    /// Points for ticks `current + 1 ..= current + horizon`.
    pub fn forecast(&mut self, current: Tick, horizon: u32) -> Forecast {
        let mut points = BTreeMap::new();
        for offset in 1..=u64::from(horizon) {
            let tick = current.saturating_add(offset);
            let dj = self.noise.demand_jitter(self.cfg.demand_noise);
            let pj = self.noise.price_jitter(self.cfg.price_noise);
            points.insert(tick, market_point(&self.cfg, tick, dj, pj));
        }
        Forecast { points }
    }

    /// Unit price for output sold into the tick after `current`.
    pub fn spot_price(&mut self, current: Tick) -> Decimal {
        let next = current.saturating_add(1);
        let forecast = self.forecast(current, 1);
        let price = forecast
            .get(next)
            .map(|p| p.price)
            .unwrap_or(self.cfg.base_price);
        tracing::debug!(tick = next, %price, "spot price");
        price
    }
}

impl fmt::Debug for MarketModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketModel").field("cfg", &self.cfg).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn quiet() -> MarketModel {
        MarketModel::with_noise(MarketConfig::default(), ZeroNoise)
    }

    #[test]
    fn forecast_covers_horizon_after_current() {
        let f = quiet().forecast(10, 5);
        let ticks: Vec<Tick> = f.iter().map(|(t, _)| t).collect();
        assert_eq!(ticks, vec![11, 12, 13, 14, 15]);
        assert!(quiet().forecast(10, 0).is_empty());
    }

    #[test]
    fn zero_noise_is_deterministic() {
        let a = quiet().forecast(0, 5);
        let b = quiet().forecast(0, 5);
        assert_eq!(a, b);
        let mut m = quiet();
        assert_eq!(m.forecast(0, 5), m.forecast(0, 5));
    }

    #[test]
    fn zero_noise_values_follow_cycle() {
        let cfg = MarketConfig::default();
        // Quarter period: sin = 1.
        let peak = market_point(&cfg, 6, 0, 0.0);
        assert_eq!(peak.demand, 15);
        assert_eq!(peak.price, Decimal::new(17000, 2));
        // Zero crossing.
        let mid = market_point(&cfg, 12, 0, 0.0);
        assert_eq!(mid.demand, 10);
        assert_eq!(mid.price, Decimal::new(15000, 2));
        // Trough.
        let low = market_point(&cfg, 18, 0, 0.0);
        assert_eq!(low.demand, 5);
        assert_eq!(low.price, Decimal::new(13000, 2));
    }

    #[test]
    fn demand_never_below_one() {
        let cfg = MarketConfig {
            base_demand: 0,
            ..MarketConfig::default()
        };
        assert_eq!(market_point(&cfg, 18, -2, 0.0).demand, 1);
    }

    #[test]
    fn seeded_noise_is_reproducible() {
        let mut a = MarketModel::new(MarketConfig::default());
        let mut b = MarketModel::new(MarketConfig::default());
        assert_eq!(a.forecast(3, 8), b.forecast(3, 8));
    }

    #[test]
    fn spot_price_reads_next_tick() {
        let cfg = MarketConfig::default();
        let mut m = quiet();
        assert_eq!(m.spot_price(5), market_point(&cfg, 6, 0, 0.0).price);
    }

    #[test]
    fn cycle_is_periodic() {
        assert!((cycle(3, 24) - cycle(27, 24)).abs() < 1e-12);
        assert_eq!(cycle(5, 0), 0.0);
    }

    proptest! {
        #[test]
        fn noisy_points_stay_in_band(
            seed in any::<u64>(),
            current in 0u64..10_000,
            horizon in 1u32..48,
        ) {
            let cfg = MarketConfig { rng_seed: seed, ..MarketConfig::default() };
            let mut m = MarketModel::new(cfg);
            let f = m.forecast(current, horizon);
            prop_assert_eq!(f.len(), horizon as usize);
            for (_, p) in f.iter() {
                prop_assert!(p.demand >= 1 && p.demand <= 17);
                prop_assert!(p.price >= Decimal::new(12500, 2));
                prop_assert!(p.price <= Decimal::new(17500, 2));
            }
        }
    }
}
