//! Simulated metric source
//!
//! Each component follows `baseline + amplitude * sin(0.1 * t + phase)` with
//! uniform noise on top, clamped to `[0.1, 1.0]`. Phases are drawn once from
//! the seeded RNG so runs with the same seed are reproducible.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use coherence_monitor::{HealthResult, MetricSource};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;

/// Angular frequency of the simulated wave, in radians per second.
const WAVE_RATE: f64 = 0.1;

const FLOOR: f64 = 0.1;
const CEILING: f64 = 1.0;

/// Sine-wave metric source for running the daemon without real components
pub struct SimulatedSource {
    components: Vec<(String, f64)>,
    baseline: f64,
    amplitude: f64,
    noise: f64,
    started: Instant,
    rng: Mutex<StdRng>,
}

impl SimulatedSource {
    pub fn new(config: &SimulationConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let components = config
            .components
            .iter()
            .map(|name| (name.clone(), rng.gen_range(0.0..100.0)))
            .collect();

        Self {
            components,
            baseline: config.baseline,
            amplitude: config.amplitude,
            noise: config.noise,
            started: Instant::now(),
            rng: Mutex::new(rng),
        }
    }

    /// Readings for every component at `t` seconds after start.
    pub fn sample_at(&self, t: f64) -> BTreeMap<String, f64> {
        let mut rng = self.rng.lock();
        self.components
            .iter()
            .map(|(name, phase)| {
                let wave = self.amplitude * (t * WAVE_RATE + phase).sin();
                let jitter = if self.noise > 0.0 {
                    rng.gen_range(-self.noise..=self.noise)
                } else {
                    0.0
                };
                let value = (self.baseline + wave + jitter).clamp(FLOOR, CEILING);
                (name.clone(), value)
            })
            .collect()
    }
}

#[async_trait]
impl MetricSource for SimulatedSource {
    async fn read(&self) -> HealthResult<BTreeMap<String, f64>> {
        Ok(self.sample_at(self.started.elapsed().as_secs_f64()))
    }
}
