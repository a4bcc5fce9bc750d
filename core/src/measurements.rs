//! Landmark observations and the sensor model used to weight particles.
//!
//! Observations arrive in the vehicle frame. For every particle they are transformed into map coordinates,
//! associated to the nearest landmark of the [`Map`], and scored under a bivariate Gaussian with independent x
//! and y standard deviations. The particle's likelihood is the product of the per-observation scores.

use crate::Pose;
use crate::error::{Result, check_positive_std};
use crate::map::{Landmark, Map};

use nalgebra::{Matrix2, Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::{self, Display};

/// A single landmark observation.
///
/// Sensor readings carry no identity (`id == None`) and are expressed in the vehicle frame. Transformed copies
/// are expressed in map coordinates, and associated copies carry the id of the matched landmark.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObs {
    /// Id of the associated landmark, if any
    pub id: Option<i32>,
    pub x: f64,
    pub y: f64,
}
impl LandmarkObs {
    /// A raw sensor reading in the vehicle frame.
    pub fn new(x: f64, y: f64) -> LandmarkObs {
        LandmarkObs { id: None, x, y }
    }
}
impl Display for LandmarkObs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "LandmarkObs(id: {}, x: {}, y: {})", id, self.x, self.y),
            None => write!(f, "LandmarkObs(id: none, x: {}, y: {})", self.x, self.y),
        }
    }
}

/// Transforms an observation from the frame of a particle into map coordinates.
///
/// The observation is rotated by the particle heading and translated by the particle position. The input is
/// left untouched; the returned observation keeps its id.
pub fn transform_to_map(pose: &Pose, observation: &LandmarkObs) -> LandmarkObs {
    let rotated = Rotation2::new(pose.theta) * Vector2::new(observation.x, observation.y);
    LandmarkObs {
        id: observation.id,
        x: rotated[0] + pose.x,
        y: rotated[1] + pose.y,
    }
}

/// Nearest-neighbour data association of a map-frame observation.
///
/// Returns the observation tagged with the matched landmark id together with the landmark itself, or `None`
/// when the map is empty. Ties go to the first landmark in map order.
pub fn associate<'a>(observation: &LandmarkObs, map: &'a Map) -> Option<(LandmarkObs, &'a Landmark)> {
    map.nearest(observation.x, observation.y).map(|landmark| {
        (
            LandmarkObs {
                id: Some(landmark.id),
                ..*observation
            },
            landmark,
        )
    })
}

/// Bivariate Gaussian density with diagonal covariance evaluated at `(x, y)`.
///
/// # Arguments
/// * `x`, `y` - Point at which to evaluate the density
/// * `mu_x`, `mu_y` - Mean of the distribution
/// * `std_x`, `std_y` - Standard deviations along each axis; must be positive
pub fn bivariate_gaussian(x: f64, y: f64, mu_x: f64, mu_y: f64, std_x: f64, std_y: f64) -> f64 {
    let normalizer = 1.0 / (2.0 * PI * std_x * std_y);
    let exponent = (x - mu_x).powi(2) / (2.0 * std_x.powi(2))
        + (y - mu_y).powi(2) / (2.0 * std_y.powi(2));
    normalizer * (-exponent).exp()
}

/// Natural logarithm of [`bivariate_gaussian`], finite wherever the density itself would under- or overflow.
pub fn log_bivariate_gaussian(x: f64, y: f64, mu_x: f64, mu_y: f64, std_x: f64, std_y: f64) -> f64 {
    let exponent = (x - mu_x).powi(2) / (2.0 * std_x.powi(2))
        + (y - mu_y).powi(2) / (2.0 * std_y.powi(2));
    -(2.0 * PI * std_x * std_y).ln() - exponent
}

/// Range/bearing landmark sensor expressed as independent x/y Gaussian noise in the map frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandmarkMeasurementModel {
    pub noise_std: Vector2<f64>,
}
impl Display for LandmarkMeasurementModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LandmarkMeasurementModel(std_x: {}, std_y: {})",
            self.noise_std[0], self.noise_std[1]
        )
    }
}
impl LandmarkMeasurementModel {
    /// Builds the sensor model, rejecting zero, negative or non-finite deviations since they cannot normalize
    /// the density.
    pub fn new(noise_std: Vector2<f64>) -> Result<LandmarkMeasurementModel> {
        check_positive_std("landmark_std_x", noise_std[0])?;
        check_positive_std("landmark_std_y", noise_std[1])?;
        Ok(LandmarkMeasurementModel { noise_std })
    }
    /// Measurement noise covariance.
    pub fn get_noise(&self) -> Matrix2<f64> {
        Matrix2::from_diagonal(&self.noise_std.component_mul(&self.noise_std))
    }
    /// Density of a map-frame observation given the landmark it was associated with.
    pub fn score(&self, observation: &LandmarkObs, landmark: &Landmark) -> f64 {
        bivariate_gaussian(
            observation.x,
            observation.y,
            landmark.x,
            landmark.y,
            self.noise_std[0],
            self.noise_std[1],
        )
    }
    /// Log-density of a map-frame observation given the landmark it was associated with.
    pub fn log_score(&self, observation: &LandmarkObs, landmark: &Landmark) -> f64 {
        log_bivariate_gaussian(
            observation.x,
            observation.y,
            landmark.x,
            landmark.y,
            self.noise_std[0],
            self.noise_std[1],
        )
    }
    /// Log-likelihood of a set of vehicle-frame observations for a pose.
    ///
    /// Observations are treated as conditionally independent given the pose, so the log-likelihood is the sum
    /// of their individual log-densities. An empty observation set yields `0.0`; an empty map yields `0.0` as
    /// well, callers are expected to reject that combination beforehand.
    pub fn log_likelihood(&self, pose: &Pose, observations: &[LandmarkObs], map: &Map) -> f64 {
        observations
            .iter()
            .map(|observation| transform_to_map(pose, observation))
            .filter_map(|transformed| associate(&transformed, map))
            .map(|(transformed, landmark)| self.log_score(&transformed, landmark))
            .sum()
    }
    /// Likelihood of a set of vehicle-frame observations for a pose, the product of their densities.
    ///
    /// Many sharp, well matched observations can push this past `f64::MAX`; the particle filter weighs particles
    /// with [`LandmarkMeasurementModel::log_likelihood`] instead.
    pub fn likelihood(&self, pose: &Pose, observations: &[LandmarkObs], map: &Map) -> f64 {
        self.log_likelihood(pose, observations, map).exp()
    }
}
