//! Monte Carlo localization particle filter.
//!
//! The filter owns a fixed-size population of [`Particle`]s and a single seeded random number generator. An
//! external driver advances it one timestep at a time:
//!
//! ```rust
//! use mcl::filter::{ParticleFilter, ParticleFilterConfig};
//! use mcl::map::{Landmark, Map};
//! use mcl::measurements::LandmarkObs;
//! use mcl::{Control, Pose};
//! use nalgebra::{Vector2, Vector3};
//!
//! let map = Map::new(vec![Landmark::new(1, 10.0, 0.0), Landmark::new(2, 0.0, 10.0)]);
//! let config = ParticleFilterConfig { num_particles: 50, seed: Some(1), ..Default::default() };
//! let mut pf = ParticleFilter::new(config).unwrap();
//! pf.init(Pose::new(0.0, 0.0, 0.0), Vector3::new(0.3, 0.3, 0.01)).unwrap();
//! pf.predict(0.1, Vector3::new(0.3, 0.3, 0.01), Control::new(1.0, 0.0)).unwrap();
//! let observations = [LandmarkObs::new(9.9, 0.0), LandmarkObs::new(-0.1, 10.0)];
//! pf.update_weights(50.0, Vector2::new(0.3, 0.3), &observations, &map).unwrap();
//! pf.resample().unwrap();
//! assert_eq!(pf.particles().len(), 50);
//! ```

use crate::error::{FilterError, Result, check_std};
use crate::map::Map;
use crate::measurements::{LandmarkMeasurementModel, LandmarkObs};
use crate::particle::{
    Particle, ParticleAveragingStrategy, ParticleResamplingStrategy, highest_weight,
    uniform_resample,
};
use crate::{Control, Pose, forward};

use log::{debug, warn};
use nalgebra::{Vector2, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// Particle filter configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleFilterConfig {
    /// Number of particles, fixed for the lifetime of the filter
    pub num_particles: usize,
    /// Seed for the filter's random number generator. `None` seeds from the operating system.
    pub seed: Option<u64>,
    pub resampling_strategy: ParticleResamplingStrategy,
    pub averaging_strategy: ParticleAveragingStrategy,
}

impl Default for ParticleFilterConfig {
    fn default() -> Self {
        Self {
            num_particles: 100,
            seed: None,
            resampling_strategy: ParticleResamplingStrategy::Multinomial,
            averaging_strategy: ParticleAveragingStrategy::HighestWeight,
        }
    }
}

pub struct ParticleFilter {
    config: ParticleFilterConfig,
    particles: Vec<Particle>,
    rng: StdRng,
    is_initialized: bool,
}

impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        let mut debug = f.debug_struct("ParticleFilter");
        debug
            .field("num_particles", &self.config.num_particles)
            .field("is_initialized", &self.is_initialized)
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            );
        if let Some(best) = highest_weight(&self.particles) {
            debug.field(
                "best_pose",
                &format_args!("({:.3}, {:.3}, {:.3})", best.x, best.y, best.theta),
            );
        }
        debug.finish()
    }
}

impl ParticleFilter {
    /// Create an uninitialized filter. Particles are created by [`ParticleFilter::init`].
    ///
    /// # Errors
    /// `NoParticles` if `config.num_particles` is zero.
    pub fn new(config: ParticleFilterConfig) -> Result<Self> {
        if config.num_particles == 0 {
            return Err(FilterError::NoParticles);
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(ParticleFilter {
            particles: Vec::with_capacity(config.num_particles),
            config,
            rng,
            is_initialized: false,
        })
    }

    pub fn config(&self) -> &ParticleFilterConfig {
        &self.config
    }
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }
    pub fn num_particles(&self) -> usize {
        self.config.num_particles
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    /// Current particle weights in particle order.
    ///
    /// Derived from the particles on every call, so it always has one entry per particle.
    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized {
            Ok(())
        } else {
            Err(FilterError::Uninitialized)
        }
    }

    /// Seed the particle population around a prior pose estimate.
    ///
    /// Each particle pose is drawn independently per axis from a normal distribution centered on `pose` with
    /// the matching entry of `std` (x, y, theta). Particles are numbered `0..N` and start with weight `1.0`.
    /// Calling `init` again replaces the population.
    pub fn init(&mut self, pose: Pose, std: Vector3<f64>) -> Result<()> {
        let noise = pose_noise(&std)?;
        self.particles = (0..self.config.num_particles)
            .map(|id| Particle::new(id, sample_pose(&pose, &noise, &mut self.rng), 1.0))
            .collect();
        self.is_initialized = true;
        debug!(
            "Initialized {} particles around {}",
            self.particles.len(),
            pose
        );
        Ok(())
    }

    /// Propagate every particle through the motion model and add process noise.
    ///
    /// # Arguments
    /// * `dt` - Time step in seconds
    /// * `std_pos` - Process noise standard deviations for x, y and theta
    /// * `control` - Velocity and yaw rate held over the time step
    pub fn predict(&mut self, dt: f64, std_pos: Vector3<f64>, control: Control) -> Result<()> {
        self.ensure_initialized()?;
        if !dt.is_finite() || dt < 0.0 {
            return Err(FilterError::InvalidTimestep(dt));
        }
        let noise = pose_noise(&std_pos)?;
        // Serial on purpose: every draw comes from the one seeded generator.
        for particle in &mut self.particles {
            let predicted = forward(&particle.pose(), &control, dt);
            particle.set_pose(sample_pose(&predicted, &noise, &mut self.rng));
        }
        debug!("Predicted {} particles with {}, dt = {}", self.particles.len(), control, dt);
        Ok(())
    }

    /// Recompute every particle weight from the current observations.
    ///
    /// Each observation is transformed into map coordinates with the particle pose, associated to the nearest
    /// landmark and scored under a bivariate Gaussian with standard deviations `std_landmark`. The weight is the
    /// product of the scores (`1.0` when there are no observations). Previous weights are discarded.
    ///
    /// Scores are accumulated as log-densities. If the largest product would overflow once exponentiated, every
    /// weight is divided by that largest product instead, which leaves the best particle at `1.0` and keeps the
    /// relative weights that resampling and estimation depend on. Weights are always finite and non-negative.
    ///
    /// `sensor_range` is validated but does not restrict association: an observation far from every landmark
    /// still matches the nearest one and simply scores a very small density.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: Vector2<f64>,
        observations: &[LandmarkObs],
        map: &Map,
    ) -> Result<()> {
        self.ensure_initialized()?;
        if !sensor_range.is_finite() || sensor_range < 0.0 {
            return Err(FilterError::InvalidRange(sensor_range));
        }
        let model = LandmarkMeasurementModel::new(std_landmark)?;
        if !observations.is_empty() && map.is_empty() {
            return Err(FilterError::EmptyMap);
        }
        let log_weights: Vec<f64> = self
            .particles
            .par_iter()
            .map(|particle| model.log_likelihood(&particle.pose(), observations, map))
            .collect();
        let max_log = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        // Headroom so the sum of N weights also stays below f64::MAX.
        let ceiling = f64::MAX.ln() - (self.particles.len() as f64).ln();
        let shift = if max_log > ceiling {
            debug!("Rescaling weights by exp(-{:.3}) to avoid overflow", max_log);
            max_log
        } else {
            0.0
        };
        self.particles
            .par_iter_mut()
            .zip(log_weights.par_iter())
            .for_each(|(particle, &log_weight)| {
                let weight = (log_weight - shift).exp();
                particle.weight = if weight.is_nan() { 0.0 } else { weight };
            });
        debug!(
            "Weighted {} particles against {} observations, {} with zero weight",
            self.particles.len(),
            observations.len(),
            self.particles.iter().filter(|p| p.weight == 0.0).count()
        );
        Ok(())
    }

    /// Replace the population with `N` particles drawn with replacement in proportion to their weights.
    ///
    /// Drawn particles are cloned as they are, ids included. If every weight is zero (or the total is not
    /// finite) the weights carry no information and every particle is drawn with equal probability instead.
    pub fn resample(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        let weights = self.weights();
        let total: f64 = weights.iter().sum();
        let indices = if total > 0.0 && total.is_finite() {
            self.config
                .resampling_strategy
                .resample(&weights, &mut self.rng)
        } else {
            warn!(
                "Degenerate particle weights (total = {}); resampling uniformly",
                total
            );
            uniform_resample(weights.len(), &mut self.rng)
        };
        self.particles = indices.into_iter().map(|i| self.particles[i].clone()).collect();
        Ok(())
    }

    /// Resample only when the effective sample size drops below `threshold` times the particle count.
    ///
    /// Returns `true` if resampling was performed.
    pub fn resample_if_needed(&mut self, threshold: f64) -> Result<bool> {
        self.ensure_initialized()?;
        let n_eff = self.effective_sample_size();
        if n_eff < threshold * self.particles.len() as f64 {
            debug!("Effective sample size {:.1} below threshold; resampling", n_eff);
            self.resample()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Effective sample size `1 / sum(w_i^2)` of the normalized weights; `0.0` when all weights are zero.
    pub fn effective_sample_size(&self) -> f64 {
        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        if !(total > 0.0 && total.is_finite()) {
            return 0.0;
        }
        let sum_of_squares: f64 = self
            .particles
            .iter()
            .map(|p| (p.weight / total).powi(2))
            .sum();
        1.0 / sum_of_squares
    }

    /// Overwrite the particle weights, e.g. when weights are computed outside of the filter.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        self.ensure_initialized()?;
        if weights.len() != self.particles.len() {
            return Err(FilterError::WeightCountMismatch {
                expected: self.particles.len(),
                got: weights.len(),
            });
        }
        if let Some((index, &value)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(FilterError::InvalidWeight { index, value });
        }
        for (particle, &w) in self.particles.iter_mut().zip(weights.iter()) {
            particle.weight = w;
        }
        Ok(())
    }

    /// The particle with the highest weight (first one on ties), if initialized.
    pub fn best_particle(&self) -> Option<&Particle> {
        highest_weight(&self.particles)
    }
    /// Position of the highest weight particle within the population.
    pub fn best_index(&self) -> Option<usize> {
        let best = self.best_particle()?;
        self.particles.iter().position(|p| std::ptr::eq(p, best))
    }

    /// Pose estimate according to the configured averaging strategy.
    pub fn estimate(&self) -> Result<Pose> {
        self.ensure_initialized()?;
        self.config
            .averaging_strategy
            .estimate(&self.particles)
            .ok_or(FilterError::Uninitialized)
    }

    /// Attach diagnostic associations to the particle at `index`.
    pub fn set_associations(
        &mut self,
        index: usize,
        associations: Vec<i32>,
        sense_x: Vec<f64>,
        sense_y: Vec<f64>,
    ) -> Result<()> {
        let len = self.particles.len();
        self.particles
            .get_mut(index)
            .ok_or(FilterError::ParticleIndexOutOfRange { index, len })?
            .set_associations(associations, sense_x, sense_y)
    }

    /// Compute and attach the associations of the highest weight particle.
    ///
    /// Returns the map-frame observations tagged with landmark ids.
    pub fn record_best_associations(
        &mut self,
        observations: &[LandmarkObs],
        map: &Map,
    ) -> Result<Vec<LandmarkObs>> {
        let index = self.best_index().ok_or(FilterError::Uninitialized)?;
        self.particles[index].record_associations(observations, map)
    }
}

/// Normal distributions for the three pose axes, centered on zero.
fn pose_noise(std: &Vector3<f64>) -> Result<[Normal<f64>; 3]> {
    let axis = |index: usize, name: &'static str| -> Result<Normal<f64>> {
        let value = std[index];
        check_std(name, value)?;
        Normal::new(0.0, value).map_err(|_| FilterError::InvalidNoise { name, value })
    };
    Ok([axis(0, "std_x")?, axis(1, "std_y")?, axis(2, "std_theta")?])
}

fn sample_pose(mean: &Pose, noise: &[Normal<f64>; 3], rng: &mut StdRng) -> Pose {
    Pose {
        x: mean.x + noise[0].sample(rng),
        y: mean.y + noise[1].sample(rng),
        theta: mean.theta + noise[2].sample(rng),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Landmark;
    use crate::measurements::bivariate_gaussian;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn seeded(num_particles: usize, seed: u64) -> ParticleFilter {
        ParticleFilter::new(ParticleFilterConfig {
            num_particles,
            seed: Some(seed),
            ..ParticleFilterConfig::default()
        })
        .unwrap()
    }

    fn test_map() -> Map {
        Map::new(vec![
            Landmark::new(1, 5.0, 3.0),
            Landmark::new(2, 2.0, 1.0),
            Landmark::new(3, 6.0, 1.0),
            Landmark::new(4, 7.0, 4.0),
            Landmark::new(5, 4.0, 7.0),
        ])
    }

    #[test]
    fn rejects_zero_particles() {
        let config = ParticleFilterConfig {
            num_particles: 0,
            ..ParticleFilterConfig::default()
        };
        assert_eq!(ParticleFilter::new(config).unwrap_err(), FilterError::NoParticles);
    }
    #[test]
    fn stages_fail_before_init() {
        let mut pf = seeded(10, 1);
        let map = test_map();
        assert_eq!(
            pf.predict(0.1, Vector3::zeros(), Control::default()),
            Err(FilterError::Uninitialized)
        );
        assert_eq!(
            pf.update_weights(50.0, Vector2::new(0.3, 0.3), &[], &map),
            Err(FilterError::Uninitialized)
        );
        assert_eq!(pf.resample(), Err(FilterError::Uninitialized));
        assert_eq!(pf.estimate(), Err(FilterError::Uninitialized));
        assert!(pf.particles().is_empty());
    }
    #[test]
    fn init_creates_numbered_particles() {
        let mut pf = seeded(200, 3);
        pf.init(Pose::new(4.0, 5.0, -FRAC_PI_2), Vector3::new(0.3, 0.3, 0.01))
            .unwrap();
        assert!(pf.is_initialized());
        assert_eq!(pf.particles().len(), 200);
        for (i, particle) in pf.particles().iter().enumerate() {
            assert_eq!(particle.id, i);
            assert_eq!(particle.weight, 1.0);
        }
        let mean_x: f64 = pf.particles().iter().map(|p| p.x).sum::<f64>() / 200.0;
        let mean_y: f64 = pf.particles().iter().map(|p| p.y).sum::<f64>() / 200.0;
        assert_approx_eq!(mean_x, 4.0, 0.1);
        assert_approx_eq!(mean_y, 5.0, 0.1);
    }
    #[test]
    fn init_with_zero_noise_is_exact() {
        let mut pf = seeded(5, 3);
        pf.init(Pose::new(1.0, 2.0, 0.5), Vector3::zeros()).unwrap();
        assert!(pf.particles().iter().all(|p| p.pose() == Pose::new(1.0, 2.0, 0.5)));
    }
    #[test]
    fn init_rejects_negative_noise() {
        let mut pf = seeded(5, 3);
        assert_eq!(
            pf.init(Pose::default(), Vector3::new(0.3, -0.3, 0.01)),
            Err(FilterError::InvalidNoise {
                name: "std_y",
                value: -0.3
            })
        );
        assert!(!pf.is_initialized());
    }
    #[test]
    fn predict_straight_line() {
        let mut pf = seeded(4, 5);
        pf.init(Pose::new(0.0, 0.0, 0.0), Vector3::zeros()).unwrap();
        pf.predict(1.0, Vector3::zeros(), Control::new(2.0, 0.0)).unwrap();
        for particle in pf.particles() {
            assert_eq!(particle.pose(), Pose::new(2.0, 0.0, 0.0));
        }
    }
    #[test]
    fn predict_curved_path() {
        let mut pf = seeded(4, 5);
        pf.init(Pose::new(0.0, 0.0, 0.0), Vector3::zeros()).unwrap();
        pf.predict(1.0, Vector3::zeros(), Control::new(1.0, FRAC_PI_2))
            .unwrap();
        for particle in pf.particles() {
            assert_approx_eq!(particle.x, 2.0 / PI, 1e-12);
            assert_approx_eq!(particle.y, 2.0 / PI, 1e-12);
            assert_approx_eq!(particle.theta, FRAC_PI_2, 1e-12);
        }
    }
    #[test]
    fn predict_adds_independent_noise() {
        let mut pf = seeded(500, 9);
        pf.init(Pose::new(0.0, 0.0, 0.0), Vector3::zeros()).unwrap();
        pf.predict(1.0, Vector3::new(0.5, 0.5, 0.05), Control::new(1.0, 0.0))
            .unwrap();
        let xs: Vec<f64> = pf.particles().iter().map(|p| p.x).collect();
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
        assert_approx_eq!(mean, 1.0, 0.1);
        assert_approx_eq!(var.sqrt(), 0.5, 0.1);
        assert!(pf.particles().windows(2).any(|w| w[0].y != w[1].y));
    }
    #[test]
    fn predict_rejects_bad_timestep() {
        let mut pf = seeded(4, 5);
        pf.init(Pose::default(), Vector3::zeros()).unwrap();
        assert_eq!(
            pf.predict(-0.1, Vector3::zeros(), Control::default()),
            Err(FilterError::InvalidTimestep(-0.1))
        );
    }
    #[test]
    fn update_scores_known_pose() {
        let mut pf = seeded(3, 5);
        pf.init(Pose::new(4.0, 5.0, -FRAC_PI_2), Vector3::zeros()).unwrap();
        let observations = [
            LandmarkObs::new(2.0, 2.0),
            LandmarkObs::new(3.0, -2.0),
            LandmarkObs::new(1.0, -1.0),
        ];
        pf.update_weights(50.0, Vector2::new(0.3, 0.3), &observations, &test_map())
            .unwrap();
        // Map-frame observations (6, 3), (2, 2), (3, 4) match landmarks 1, 2 and 1.
        let expected = bivariate_gaussian(6.0, 3.0, 5.0, 3.0, 0.3, 0.3)
            * bivariate_gaussian(2.0, 2.0, 2.0, 1.0, 0.3, 0.3)
            * bivariate_gaussian(3.0, 4.0, 5.0, 3.0, 0.3, 0.3);
        for w in pf.weights() {
            assert_approx_eq!(w, expected, expected * 1e-9);
        }
    }
    #[test]
    fn update_without_observations_keeps_unit_weight() {
        let mut pf = seeded(10, 5);
        pf.init(Pose::default(), Vector3::new(1.0, 1.0, 0.1)).unwrap();
        pf.update_weights(50.0, Vector2::new(0.3, 0.3), &[], &test_map())
            .unwrap();
        assert!(pf.weights().iter().all(|&w| w == 1.0));
    }
    #[test]
    fn update_with_many_sharp_observations_stays_finite() {
        // 60 exact matches at 1 mm noise: each density is ~1.6e5, so the raw product is ~1e313.
        let mut pf = seeded(5, 41);
        pf.init(Pose::default(), Vector3::zeros()).unwrap();
        let map = Map::new((0..70).map(|i| Landmark::new(i, 2.0 * i as f64, 0.0)).collect());
        let mut observations: Vec<LandmarkObs> =
            (0..60).map(|i| LandmarkObs::new(2.0 * i as f64, 0.0)).collect();
        let std_landmark = Vector2::new(0.001, 0.001);
        pf.update_weights(50.0, std_landmark, &observations, &map).unwrap();
        for weight in pf.weights() {
            assert!(weight.is_finite());
            assert_approx_eq!(weight, 1.0, 1e-12);
        }
        assert_approx_eq!(pf.effective_sample_size(), 5.0, 1e-9);

        observations.push(LandmarkObs::new(5.0, 5.0));
        pf.update_weights(50.0, std_landmark, &observations, &map).unwrap();
        assert!(pf.weights().iter().all(|&w| w.is_finite() && w >= 0.0));
        pf.resample().unwrap();
        assert_eq!(pf.particles().len(), 5);
    }
    #[test]
    fn update_rescaling_preserves_weight_ratios() {
        let mut pf = seeded(2, 43);
        pf.init(Pose::default(), Vector3::zeros()).unwrap();
        let map = Map::new((0..70).map(|i| Landmark::new(i, 2.0 * i as f64, 0.0)).collect());
        let observations: Vec<LandmarkObs> =
            (0..60).map(|i| LandmarkObs::new(2.0 * i as f64, 0.0)).collect();
        // Second particle is off by 1 mm along x, one standard deviation for every observation.
        pf.particles[1].x = 0.001;
        pf.update_weights(50.0, Vector2::new(0.001, 0.001), &observations, &map)
            .unwrap();
        let weights = pf.weights();
        assert_approx_eq!(weights[0], 1.0, 1e-12);
        assert_approx_eq!(weights[1], (-30.0_f64).exp(), 1e-6 * (-30.0_f64).exp());
    }
    #[test]
    fn update_is_deterministic_for_fixed_poses() {
        let mut pf = seeded(100, 21);
        pf.init(Pose::new(4.0, 5.0, -FRAC_PI_2), Vector3::new(0.3, 0.3, 0.01))
            .unwrap();
        let observations = [LandmarkObs::new(2.0, 2.0), LandmarkObs::new(3.0, -2.0)];
        let map = test_map();
        pf.update_weights(50.0, Vector2::new(0.3, 0.3), &observations, &map)
            .unwrap();
        let first = pf.weights();
        pf.update_weights(50.0, Vector2::new(0.3, 0.3), &observations, &map)
            .unwrap();
        assert_eq!(first, pf.weights());
        assert_eq!(first.len(), 100);
        assert!(first.iter().all(|&w| w >= 0.0 && w.is_finite()));
        assert!(first.iter().any(|&w| w > 0.0));
    }
    #[test]
    fn update_rejects_zero_sensor_noise() {
        let mut pf = seeded(10, 5);
        pf.init(Pose::default(), Vector3::zeros()).unwrap();
        assert_eq!(
            pf.update_weights(50.0, Vector2::new(0.0, 0.3), &[], &test_map()),
            Err(FilterError::InvalidNoise {
                name: "landmark_std_x",
                value: 0.0
            })
        );
    }
    #[test]
    fn update_rejects_empty_map_and_bad_range() {
        let mut pf = seeded(10, 5);
        pf.init(Pose::default(), Vector3::zeros()).unwrap();
        let observations = [LandmarkObs::new(1.0, 1.0)];
        assert_eq!(
            pf.update_weights(50.0, Vector2::new(0.3, 0.3), &observations, &Map::default()),
            Err(FilterError::EmptyMap)
        );
        assert_eq!(
            pf.update_weights(-1.0, Vector2::new(0.3, 0.3), &observations, &test_map()),
            Err(FilterError::InvalidRange(-1.0))
        );
    }
    #[test]
    fn resample_follows_dominant_weight() {
        let mut pf = seeded(1000, 13);
        pf.init(Pose::default(), Vector3::new(10.0, 10.0, 1.0)).unwrap();
        let dominant = pf.particles()[0].pose();
        let mut weights = vec![0.0; 1000];
        weights[0] = 1.0;
        pf.set_weights(&weights).unwrap();
        pf.resample().unwrap();
        assert_eq!(pf.particles().len(), 1000);
        let hits = pf
            .particles()
            .iter()
            .filter(|p| p.pose() == dominant)
            .count();
        assert!(hits >= 990, "only {} of 1000 draws hit the dominant particle", hits);
        assert!(pf.particles().iter().all(|p| p.id == 0));
    }
    #[test]
    fn resample_is_proportional_to_weight() {
        let mut pf = seeded(2000, 17);
        pf.init(Pose::default(), Vector3::new(1.0, 1.0, 0.1)).unwrap();
        let weights: Vec<f64> = (0..2000).map(|i| if i % 2 == 0 { 3.0 } else { 1.0 }).collect();
        pf.set_weights(&weights).unwrap();
        pf.resample().unwrap();
        let even = pf.particles().iter().filter(|p| p.id % 2 == 0).count() as f64 / 2000.0;
        assert_approx_eq!(even, 0.75, 0.05);
    }
    #[test]
    fn resample_with_degenerate_weights_stays_uniform() {
        let mut pf = seeded(50, 19);
        pf.init(Pose::new(500.0, 500.0, 0.0), Vector3::new(1.0, 1.0, 0.1))
            .unwrap();
        let map = Map::new(vec![Landmark::new(1, 0.0, 0.0)]);
        pf.update_weights(50.0, Vector2::new(0.01, 0.01), &[LandmarkObs::new(0.0, 0.0)], &map)
            .unwrap();
        assert!(pf.weights().iter().all(|&w| w == 0.0));
        assert_eq!(pf.effective_sample_size(), 0.0);
        pf.resample().unwrap();
        assert_eq!(pf.particles().len(), 50);
    }
    #[test]
    fn resample_if_needed_skips_uniform_population() {
        let mut pf = seeded(20, 23);
        pf.init(Pose::default(), Vector3::new(1.0, 1.0, 0.1)).unwrap();
        assert_approx_eq!(pf.effective_sample_size(), 20.0, 1e-9);
        assert_eq!(pf.resample_if_needed(0.5), Ok(false));
        let mut weights = vec![0.0; 20];
        weights[3] = 1.0;
        pf.set_weights(&weights).unwrap();
        assert_approx_eq!(pf.effective_sample_size(), 1.0, 1e-12);
        assert_eq!(pf.resample_if_needed(0.5), Ok(true));
        assert!(pf.particles().iter().all(|p| p.id == 3));
    }
    #[test]
    fn set_weights_validates_input() {
        let mut pf = seeded(3, 29);
        pf.init(Pose::default(), Vector3::zeros()).unwrap();
        assert_eq!(
            pf.set_weights(&[1.0, 2.0]),
            Err(FilterError::WeightCountMismatch {
                expected: 3,
                got: 2
            })
        );
        assert_eq!(
            pf.set_weights(&[1.0, -2.0, 0.0]),
            Err(FilterError::InvalidWeight {
                index: 1,
                value: -2.0
            })
        );
    }
    #[test]
    fn particle_count_is_invariant_over_cycles() {
        let mut pf = seeded(64, 31);
        let map = test_map();
        pf.init(Pose::new(4.0, 5.0, -FRAC_PI_2), Vector3::new(0.3, 0.3, 0.01))
            .unwrap();
        for _ in 0..10 {
            pf.predict(0.1, Vector3::new(0.3, 0.3, 0.01), Control::new(1.0, 0.1))
                .unwrap();
            assert_eq!(pf.particles().len(), 64);
            pf.update_weights(
                50.0,
                Vector2::new(0.3, 0.3),
                &[LandmarkObs::new(2.0, 2.0)],
                &map,
            )
            .unwrap();
            assert_eq!(pf.weights().len(), 64);
            pf.resample().unwrap();
            assert_eq!(pf.particles().len(), 64);
        }
    }
    #[test]
    fn same_seed_same_population() {
        let run = |seed| {
            let mut pf = seeded(30, seed);
            pf.init(Pose::default(), Vector3::new(1.0, 1.0, 0.1)).unwrap();
            pf.predict(0.1, Vector3::new(0.3, 0.3, 0.01), Control::new(1.0, 0.2))
                .unwrap();
            pf.particles().to_vec()
        };
        assert_eq!(run(37), run(37));
        assert_ne!(run(37), run(38));
    }
    #[test]
    fn best_particle_and_associations() {
        let mut pf = seeded(3, 41);
        pf.init(Pose::new(4.0, 5.0, -FRAC_PI_2), Vector3::zeros()).unwrap();
        pf.set_weights(&[0.1, 0.7, 0.2]).unwrap();
        assert_eq!(pf.best_index(), Some(1));
        assert_eq!(pf.estimate().unwrap(), Pose::new(4.0, 5.0, -FRAC_PI_2));
        let tagged = pf
            .record_best_associations(&[LandmarkObs::new(2.0, 2.0)], &test_map())
            .unwrap();
        assert_eq!(tagged[0].id, Some(1));
        assert_eq!(pf.particles()[1].get_associations(), "1");
        assert!(pf.particles()[0].associations.is_empty());
        assert_eq!(
            pf.set_associations(7, vec![], vec![], vec![]),
            Err(FilterError::ParticleIndexOutOfRange { index: 7, len: 3 })
        );
    }
}
