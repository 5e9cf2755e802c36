//! Synthetic order book simulation.
//!
//! Each [`OrderBook`] keeps randomized bid/ask ladders around a drifting mid
//! price and regenerates them on its own randomized retick schedule.

use crate::config::{SimulationConfig, SymbolConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Share of `max_volume` used as the expected volume at the best level.
const BASE_INTENSITY: f64 = 0.75;

/// Highest mid price a book will drift to. Keeps ladder arithmetic far from
/// `i64` overflow.
pub const MAX_MID_PRICE: i64 = 1_000_000_000_000_000;

/// Parameters controlling how a book is rebuilt.
#[derive(Debug, Clone, PartialEq)]
pub struct BookParams {
    /// Exponential volume decay per level of depth.
    pub depth_decay: f64,
    /// Maximum relative bid/ask volume tilt.
    pub tilt: f64,
    /// Volume multiplier for prices that are a multiple of 5.
    pub round_multiplier: f64,
    /// Maximum absolute mid price step per rebuild.
    pub max_step: i64,
    /// Maximum spread in ticks between best bid and best ask.
    pub max_tick: i64,
    /// Probability that a level is left empty.
    pub gap_probability: f64,
    /// Levels generated per side.
    pub levels: u32,
    /// Levels per side reported by [`OrderBook::top_of_book`].
    pub snapshot_depth: usize,
    /// Lower bound of the retick interval in milliseconds.
    pub retick_min_ms: u64,
    /// Upper bound of the retick interval in milliseconds.
    pub retick_max_ms: u64,
}

impl Default for BookParams {
    fn default() -> Self {
        Self::from(&SimulationConfig::default())
    }
}

impl From<&SimulationConfig> for BookParams {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            depth_decay: config.depth_decay,
            tilt: config.tilt,
            round_multiplier: config.round_multiplier,
            max_step: config.max_step,
            max_tick: config.max_tick,
            gap_probability: config.gap_probability,
            levels: config.levels,
            snapshot_depth: config.snapshot_depth,
            retick_min_ms: config.retick_min_ms,
            retick_max_ms: config.retick_max_ms,
        }
    }
}

/// A single price level in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    /// Price.
    pub price: i64,
    /// Resting volume, always at least 1.
    pub volume: u32,
}

/// Top of book for one symbol. An empty side serializes as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSnapshot {
    /// Best bids, price descending.
    pub buy: Option<Vec<PriceLevel>>,
    /// Best asks, price ascending.
    pub sell: Option<Vec<PriceLevel>>,
}

/// Which side of the book a level belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Bid,
    Ask,
}

/// Simulated order book for a single symbol.
pub struct OrderBook {
    /// Bids keyed so that iteration yields the highest price first.
    bids: BTreeMap<Reverse<i64>, u32>,
    /// Asks keyed by price ascending.
    asks: BTreeMap<i64, u32>,
    mid_price: i64,
    max_volume: u32,
    /// Next retick time in milliseconds, `None` until first scheduled.
    next_retick_ms: Option<i64>,
    params: BookParams,
    rng: ChaCha8Rng,
}

impl OrderBook {
    /// Creates a book seeded from OS entropy and builds its first ladders.
    ///
    /// # Arguments
    /// * `mid_price` - Initial mid price, clamped to at least 1.
    /// * `max_volume` - Volume scale of the book.
    /// * `params` - Rebuild parameters.
    #[must_use]
    pub fn new(mid_price: i64, max_volume: u32, params: BookParams) -> Self {
        Self::with_rng(mid_price, max_volume, params, ChaCha8Rng::from_entropy())
    }

    /// Creates a book with a deterministic seed.
    #[must_use]
    pub fn with_seed(mid_price: i64, max_volume: u32, params: BookParams, seed: u64) -> Self {
        Self::with_rng(
            mid_price,
            max_volume,
            params,
            ChaCha8Rng::seed_from_u64(seed),
        )
    }

    /// Creates a book from a symbol configuration.
    #[must_use]
    pub fn from_config(symbol: &SymbolConfig, params: BookParams) -> Self {
        Self::new(symbol.mid_price, symbol.max_volume, params)
    }

    fn with_rng(mid_price: i64, max_volume: u32, params: BookParams, rng: ChaCha8Rng) -> Self {
        let mut book = Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            mid_price: mid_price.clamp(1, MAX_MID_PRICE),
            max_volume,
            next_retick_ms: None,
            params,
            rng,
        };
        book.rebuild();
        book
    }

    /// Current mid price.
    #[must_use]
    pub fn mid_price(&self) -> i64 {
        self.mid_price
    }

    /// Scheduled retick time in milliseconds, if any.
    #[must_use]
    pub fn next_retick_ms(&self) -> Option<i64> {
        self.next_retick_ms
    }

    /// Number of populated bid levels.
    #[must_use]
    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    /// Number of populated ask levels.
    #[must_use]
    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    /// Schedules the next retick at `now_ms` plus a random interval.
    pub fn schedule_retick(&mut self, now_ms: i64) {
        let interval = self
            .rng
            .gen_range(self.params.retick_min_ms..=self.params.retick_max_ms);
        self.next_retick_ms = Some(now_ms.saturating_add(interval as i64));
    }

    /// Advances the retick state machine.
    ///
    /// The first call only schedules. Later calls rebuild and reschedule once
    /// `now_ms` reaches the scheduled time.
    ///
    /// Returns `true` if the book was rebuilt.
    pub fn check_tick(&mut self, now_ms: i64) -> bool {
        match self.next_retick_ms {
            None => {
                self.schedule_retick(now_ms);
                false
            }
            Some(due) if now_ms >= due => {
                self.rebuild();
                self.schedule_retick(now_ms);
                true
            }
            Some(_) => false,
        }
    }

    /// Clears both ladders and regenerates them around a stepped mid price.
    pub fn rebuild(&mut self) {
        self.bids.clear();
        self.asks.clear();

        let max_step = self.params.max_step;
        let step = self.rng.gen_range(-max_step..=max_step);
        self.mid_price = self.mid_price.saturating_add(step).clamp(1, MAX_MID_PRICE);

        let tick = self.rng.gen_range(1..=self.params.max_tick.max(1));
        let best_bid = self.mid_price;
        let best_ask = self.mid_price.saturating_add(tick);

        for depth in 0..self.params.levels {
            let bid_price = best_bid - i64::from(depth);
            if bid_price >= 1 && !self.rng.gen_bool(self.params.gap_probability) {
                let volume = self.level_volume(depth, bid_price, Side::Bid);
                self.bids.insert(Reverse(bid_price), volume);
            }

            let ask_price = best_ask.saturating_add(i64::from(depth));
            if !self.rng.gen_bool(self.params.gap_probability) {
                let volume = self.level_volume(depth, ask_price, Side::Ask);
                self.asks.insert(ask_price, volume);
            }
        }
    }

    fn level_volume(&mut self, depth: u32, price: i64, side: Side) -> u32 {
        let base = BASE_INTENSITY * f64::from(self.max_volume);
        let mut expected = base * (-self.params.depth_decay * f64::from(depth)).exp();

        let tilt = if self.params.tilt > 0.0 {
            self.rng.gen_range(-self.params.tilt..=self.params.tilt)
        } else {
            0.0
        };
        expected *= match side {
            Side::Bid => 1.0 + tilt,
            Side::Ask => 1.0 - tilt,
        };

        if price % 5 == 0 {
            expected *= self.params.round_multiplier;
        }

        match Poisson::new(expected) {
            Ok(poisson) => {
                let draw: f64 = poisson.sample(&mut self.rng);
                (draw as u32).max(1)
            }
            Err(_) => 1,
        }
    }

    /// Returns the best `snapshot_depth` levels on each side.
    #[must_use]
    pub fn top_of_book(&self) -> BookSnapshot {
        let depth = self.params.snapshot_depth;
        let buy: Vec<PriceLevel> = self
            .bids
            .iter()
            .take(depth)
            .map(|(Reverse(price), volume)| PriceLevel {
                price: *price,
                volume: *volume,
            })
            .collect();
        let sell: Vec<PriceLevel> = self
            .asks
            .iter()
            .take(depth)
            .map(|(price, volume)| PriceLevel {
                price: *price,
                volume: *volume,
            })
            .collect();

        BookSnapshot {
            buy: (!buy.is_empty()).then_some(buy),
            sell: (!sell.is_empty()).then_some(sell),
        }
    }
}
