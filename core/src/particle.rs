//! Particles and the strategies that act on a particle population.
//!
//! A [`Particle`] is one pose hypothesis with an unnormalized likelihood weight and optional diagnostic fields
//! describing which landmarks it matched its observations to. The resampling functions in this module operate
//! on weight slices and return the indices of the particles to keep, so the filter can copy particles without
//! renumbering them.
use crate::Pose;
use crate::error::{FilterError, Result};
use crate::map::Map;
use crate::measurements::{LandmarkObs, associate, transform_to_map};

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    /// Index assigned at initialization; kept across resampling
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    /// Unnormalized likelihood weight
    pub weight: f64,
    /// Landmark ids the particle associated its observations with
    pub associations: Vec<i32>,
    /// Map-frame x coordinate of each associated observation
    pub sense_x: Vec<f64>,
    /// Map-frame y coordinate of each associated observation
    pub sense_y: Vec<f64>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("theta", &self.theta)
            .field("weight", &self.weight)
            .field("associations", &self.associations.len())
            .finish()
    }
}

/// Selects which sensed coordinate list to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenseAxis {
    X,
    Y,
}

impl Particle {
    pub fn new(id: usize, pose: Pose, weight: f64) -> Particle {
        Particle {
            id,
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            weight,
            associations: Vec::new(),
            sense_x: Vec::new(),
            sense_y: Vec::new(),
        }
    }
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.theta)
    }
    pub fn set_pose(&mut self, pose: Pose) {
        self.x = pose.x;
        self.y = pose.y;
        self.theta = pose.theta;
    }
    /// Attach diagnostic associations to the particle, replacing any previous ones.
    ///
    /// # Arguments
    /// * `associations` - Landmark id for each association
    /// * `sense_x` - Map-frame x coordinate of each associated observation
    /// * `sense_y` - Map-frame y coordinate of each associated observation
    ///
    /// # Errors
    /// `AssociationLengthMismatch` if the three lists differ in length. The particle is left unchanged.
    pub fn set_associations(
        &mut self,
        associations: Vec<i32>,
        sense_x: Vec<f64>,
        sense_y: Vec<f64>,
    ) -> Result<()> {
        if associations.len() != sense_x.len() || associations.len() != sense_y.len() {
            return Err(FilterError::AssociationLengthMismatch {
                associations: associations.len(),
                sense_x: sense_x.len(),
                sense_y: sense_y.len(),
            });
        }
        self.associations = associations;
        self.sense_x = sense_x;
        self.sense_y = sense_y;
        Ok(())
    }
    /// Compute and attach the associations this particle makes for a set of vehicle-frame observations.
    ///
    /// Each observation is moved into map coordinates with this particle's pose and matched to its nearest
    /// landmark. Returns the map-frame observations tagged with their landmark ids.
    pub fn record_associations(
        &mut self,
        observations: &[LandmarkObs],
        map: &Map,
    ) -> Result<Vec<LandmarkObs>> {
        if !observations.is_empty() && map.is_empty() {
            return Err(FilterError::EmptyMap);
        }
        let pose = self.pose();
        let tagged: Vec<LandmarkObs> = observations
            .iter()
            .filter_map(|observation| associate(&transform_to_map(&pose, observation), map))
            .map(|(tagged, _)| tagged)
            .collect();
        self.set_associations(
            tagged.iter().filter_map(|obs| obs.id).collect(),
            tagged.iter().map(|obs| obs.x).collect(),
            tagged.iter().map(|obs| obs.y).collect(),
        )?;
        Ok(tagged)
    }
    /// Landmark ids as a single space separated string.
    pub fn get_associations(&self) -> String {
        join_values(&self.associations)
    }
    /// Sensed map coordinates along one axis as a single space separated string.
    pub fn get_sense_coord(&self, axis: SenseAxis) -> String {
        match axis {
            SenseAxis::X => join_values(&self.sense_x),
            SenseAxis::Y => join_values(&self.sense_y),
        }
    }
}

fn join_values<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleAveragingStrategy {
    WeightedAverage,
    UnweightedAverage,
    #[default]
    HighestWeight,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleResamplingStrategy {
    #[default]
    Multinomial,
    Systematic,
    Stratified,
    Residual,
}

impl ParticleResamplingStrategy {
    /// Draw `weights.len()` indices with replacement, proportionally to `weights`.
    ///
    /// Weights need not be normalized, but their total must be positive and finite; see [`uniform_resample`]
    /// for the degenerate case.
    pub fn resample<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Vec<usize> {
        match self {
            ParticleResamplingStrategy::Multinomial => multinomial_resample(weights, rng),
            ParticleResamplingStrategy::Systematic => systematic_resample(weights, rng),
            ParticleResamplingStrategy::Stratified => stratified_resample(weights, rng),
            ParticleResamplingStrategy::Residual => residual_resample(weights, rng),
        }
    }
}

/// Independent draws from the categorical distribution defined by `weights`.
///
/// Falls back to [`uniform_resample`] if the weights cannot form a distribution (all zero, negative or NaN).
pub fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    match WeightedIndex::new(weights) {
        Ok(distribution) => (0..weights.len())
            .map(|_| distribution.sample(rng))
            .collect(),
        Err(_) => uniform_resample(weights.len(), rng),
    }
}

/// Every index equally likely, ignoring weights.
pub fn uniform_resample<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    (0..n).map(|_| rng.random_range(0..n)).collect()
}

/// Low-variance resampling with a single random offset and evenly spaced pointers.
pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let offset = rng.random::<f64>();
    let positions: Vec<f64> = (0..n).map(|k| (k as f64 + offset) / n as f64).collect();
    select_by_position(weights, &positions)
}

/// One uniform draw inside each of `n` equal strata of the cumulative weight.
pub fn stratified_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let positions: Vec<f64> = (0..n)
        .map(|k| (k as f64 + rng.random::<f64>()) / n as f64)
        .collect();
    select_by_position(weights, &positions)
}

/// Deterministic copies for the integer part of `n * w`, then systematic draws over the remainders.
pub fn residual_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let total: f64 = weights.iter().sum();
    let mut indices = Vec::with_capacity(n);
    let mut residual = vec![0.0; n];
    for (i, &w) in weights.iter().enumerate() {
        let scaled = w / total * n as f64;
        let copies = scaled.floor() as usize;
        indices.extend(std::iter::repeat_n(i, copies));
        residual[i] = scaled - copies as f64;
    }
    // Rounding can push the deterministic copies one past n.
    indices.truncate(n);
    let remaining = n - indices.len();
    if remaining > 0 {
        let offset = rng.random::<f64>();
        let positions: Vec<f64> = (0..remaining)
            .map(|k| (k as f64 + offset) / remaining as f64)
            .collect();
        indices.extend(select_by_position(&residual, &positions));
    }
    indices
}

/// Walk the normalized cumulative weights with sorted positions in `[0, 1)`.
///
/// Rounding can leave the final cumulative sum just under a position; such positions fall on the last index
/// with positive weight, never on a trailing zero-weight one.
fn select_by_position(weights: &[f64], positions: &[f64]) -> Vec<usize> {
    let total: f64 = weights.iter().sum();
    let last = weights.iter().rposition(|&w| w > 0.0).unwrap_or(0);
    let mut selected = Vec::with_capacity(positions.len());
    let mut i = 0;
    let mut cumulative = weights.first().copied().unwrap_or(0.0) / total;
    for &position in positions {
        while position >= cumulative && i < last {
            i += 1;
            cumulative += weights[i] / total;
        }
        selected.push(i);
    }
    selected
}

impl ParticleAveragingStrategy {
    /// Collapse a particle population into a single pose estimate.
    ///
    /// Returns `None` for an empty population. Headings are averaged on the unit circle.
    pub fn estimate(&self, particles: &[Particle]) -> Option<Pose> {
        match self {
            ParticleAveragingStrategy::HighestWeight => {
                highest_weight(particles).map(Particle::pose)
            }
            ParticleAveragingStrategy::WeightedAverage => {
                let total: f64 = particles.iter().map(|p| p.weight).sum();
                if total > 0.0 && total.is_finite() {
                    average(particles, |p| p.weight / total)
                } else {
                    average(particles, |_| 1.0 / particles.len() as f64)
                }
            }
            ParticleAveragingStrategy::UnweightedAverage => {
                average(particles, |_| 1.0 / particles.len() as f64)
            }
        }
    }
}

/// The particle with the largest weight; the first one wins on ties.
pub fn highest_weight(particles: &[Particle]) -> Option<&Particle> {
    particles.iter().reduce(|best, candidate| {
        if candidate.weight > best.weight {
            candidate
        } else {
            best
        }
    })
}

fn average<F: Fn(&Particle) -> f64>(particles: &[Particle], weight_of: F) -> Option<Pose> {
    if particles.is_empty() {
        return None;
    }
    let mut x = 0.0;
    let mut y = 0.0;
    let mut sin = 0.0;
    let mut cos = 0.0;
    for particle in particles {
        let w = weight_of(particle);
        x += w * particle.x;
        y += w * particle.y;
        sin += w * particle.theta.sin();
        cos += w * particle.theta.cos();
    }
    Some(Pose::new(x, y, sin.atan2(cos)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Landmark;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::FRAC_PI_2;

    fn particle_at(id: usize, x: f64, y: f64, theta: f64, weight: f64) -> Particle {
        Particle::new(id, Pose::new(x, y, theta), weight)
    }

    #[test]
    fn set_associations_checks_lengths() {
        let mut particle = Particle::default();
        let err = particle
            .set_associations(vec![1, 2], vec![0.5], vec![0.5, 1.5])
            .unwrap_err();
        assert_eq!(
            err,
            FilterError::AssociationLengthMismatch {
                associations: 2,
                sense_x: 1,
                sense_y: 2
            }
        );
        assert!(particle.associations.is_empty());
    }
    #[test]
    fn association_strings() {
        let mut particle = Particle::default();
        particle
            .set_associations(vec![3, 7, 12], vec![1.5, -2.0, 10.25], vec![0.0, 4.5, -1.125])
            .unwrap();
        assert_eq!(particle.get_associations(), "3 7 12");
        assert_eq!(particle.get_sense_coord(SenseAxis::X), "1.5 -2 10.25");
        assert_eq!(particle.get_sense_coord(SenseAxis::Y), "0 4.5 -1.125");
    }
    #[test]
    fn empty_association_strings() {
        let particle = Particle::default();
        assert_eq!(particle.get_associations(), "");
        assert_eq!(particle.get_sense_coord(SenseAxis::Y), "");
    }
    #[test]
    fn record_associations_uses_particle_pose() {
        let map = Map::new(vec![Landmark::new(1, 5.0, 5.0), Landmark::new(2, 0.0, 1.0)]);
        let mut particle = particle_at(0, 0.0, 0.0, FRAC_PI_2, 1.0);
        let tagged = particle
            .record_associations(&[LandmarkObs::new(1.0, 0.0)], &map)
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(particle.associations, vec![2]);
        assert_approx_eq!(particle.sense_x[0], 0.0, 1e-12);
        assert_approx_eq!(particle.sense_y[0], 1.0, 1e-12);
    }
    #[test]
    fn record_associations_rejects_empty_map() {
        let mut particle = Particle::default();
        assert_eq!(
            particle.record_associations(&[LandmarkObs::new(1.0, 0.0)], &Map::default()),
            Err(FilterError::EmptyMap)
        );
    }
    #[test]
    fn multinomial_picks_only_nonzero() {
        let mut rng = StdRng::seed_from_u64(42);
        let weights = [0.0, 0.0, 3.0, 0.0];
        let indices = multinomial_resample(&weights, &mut rng);
        assert_eq!(indices, vec![2, 2, 2, 2]);
    }
    #[test]
    fn multinomial_all_zero_falls_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let indices = multinomial_resample(&[0.0; 8], &mut rng);
        assert_eq!(indices.len(), 8);
        assert!(indices.iter().all(|&i| i < 8));
    }
    #[test]
    fn low_variance_strategies_respect_proportions() {
        let weights = [2.0, 0.0, 1.0, 1.0];
        for strategy in [
            ParticleResamplingStrategy::Systematic,
            ParticleResamplingStrategy::Residual,
        ] {
            let mut rng = StdRng::seed_from_u64(7);
            let indices = strategy.resample(&weights, &mut rng);
            let counts: Vec<usize> = (0..4)
                .map(|i| indices.iter().filter(|&&j| j == i).count())
                .collect();
            // n * w is integral for every particle, so the copy counts are exact.
            assert_eq!(counts, vec![2, 0, 1, 1], "{:?}", strategy);
        }
    }
    #[test]
    fn stratified_keeps_population_size() {
        let mut rng = StdRng::seed_from_u64(11);
        let weights = [0.1, 0.0, 0.5, 0.2, 0.2];
        let indices = stratified_resample(&weights, &mut rng);
        assert_eq!(indices.len(), 5);
        assert!(!indices.contains(&1));
    }
    #[test]
    fn highest_weight_first_wins_ties() {
        let particles = vec![
            particle_at(0, 0.0, 0.0, 0.0, 0.5),
            particle_at(1, 1.0, 0.0, 0.0, 2.0),
            particle_at(2, 2.0, 0.0, 0.0, 2.0),
        ];
        assert_eq!(highest_weight(&particles).unwrap().id, 1);
        assert!(highest_weight(&[]).is_none());
    }
    #[test]
    fn selection_never_lands_on_trailing_zero_weight() {
        // A position at or past the end of the cumulative sum stops on the last positive weight.
        let weights = [0.1, 0.2, 0.7, 0.0, 0.0];
        assert_eq!(select_by_position(&weights, &[0.05, 0.5, 0.99, 1.0]), vec![0, 2, 2, 2]);
        assert_eq!(select_by_position(&[0.0, 1.0, 0.0], &[0.0, 1.0]), vec![1, 1]);

        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..100 {
            for indices in [
                systematic_resample(&weights, &mut rng),
                stratified_resample(&weights, &mut rng),
                residual_resample(&weights, &mut rng),
            ] {
                assert_eq!(indices.len(), weights.len());
                assert!(indices.iter().all(|&i| weights[i] > 0.0), "{:?}", indices);
            }
        }
    }
    #[test]
    fn weighted_average_of_poses() {
        let particles = vec![
            particle_at(0, 0.0, 0.0, 0.1, 1.0),
            particle_at(1, 4.0, 2.0, 0.3, 3.0),
        ];
        let pose = ParticleAveragingStrategy::WeightedAverage
            .estimate(&particles)
            .unwrap();
        assert_approx_eq!(pose.x, 3.0, 1e-12);
        assert_approx_eq!(pose.y, 1.5, 1e-12);
        assert!(pose.theta > 0.2 && pose.theta < 0.3);
    }
    #[test]
    fn unweighted_average_wraps_heading() {
        let particles = vec![
            particle_at(0, 0.0, 0.0, 3.1, 1.0),
            particle_at(1, 2.0, 0.0, -3.1, 0.0),
        ];
        let pose = ParticleAveragingStrategy::UnweightedAverage
            .estimate(&particles)
            .unwrap();
        assert_approx_eq!(pose.x, 1.0, 1e-12);
        assert!(pose.theta.abs() > 3.1);
    }
    #[test]
    fn weighted_average_with_zero_weights_is_unweighted() {
        let particles = vec![
            particle_at(0, 0.0, 0.0, 0.0, 0.0),
            particle_at(1, 2.0, 4.0, 0.0, 0.0),
        ];
        let pose = ParticleAveragingStrategy::WeightedAverage
            .estimate(&particles)
            .unwrap();
        assert_approx_eq!(pose.x, 1.0, 1e-12);
        assert_approx_eq!(pose.y, 2.0, 1e-12);
    }
}
