//! Monte Carlo localization toolbox for a planar vehicle on a known landmark map
//!
//! This crate implements a particle filter that estimates the pose $(x, y, \theta)$ of a vehicle moving on a
//! flat, known map of point landmarks. The filter is driven one timestep at a time by an external caller that
//! supplies the commanded motion (velocity and yaw rate) and a set of landmark observations expressed in the
//! vehicle's own frame. The filter itself performs no I/O and has no internal scheduling; a small file-driven
//! simulation driver is provided in [sim] to exercise it end to end.
//!
//! This crate is primarily built off of a few additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the vector types used for poses and noise parameters.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides random
//!   number generation for process noise and resampling.
//! - [`rayon`](https://crates.io/crates/rayon): Provides data-parallel weighting of the particle population.
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [error]: Error type shared by the filter and its accessors.
//! - [map]: The static landmark map and nearest-landmark queries.
//! - [measurements]: Landmark observations, the vehicle-to-map coordinate transform, data association and the
//!   sensor likelihood model.
//! - [particle]: Particles, their diagnostic fields, and the resampling and averaging strategies.
//! - [filter]: The particle filter itself (initialize, predict, update weights, resample).
//! - [sim]: Simulation utilities for running the filter against recorded or synthetic data.
//!
//! ## Filter cycle
//!
//! Each timestep runs four stages:
//!
//! 1. **Initialize** (once): draw $N$ particles from $\mathcal{N}(\hat{x}_0, \sigma_0^2)$ per axis.
//! 2. **Predict**: propagate every particle through the motion model below and add process noise.
//! 3. **Update weights**: transform each observation into map coordinates, associate it to the nearest landmark and
//!    score it under a bivariate Gaussian sensor model. The particle weight is the product of the scores.
//! 4. **Resample**: draw $N$ particles with replacement, with probability proportional to weight.
//!
//! ## Motion model
//!
//! The vehicle follows a unicycle (constant turn rate and velocity) model. Given a velocity $v$, a yaw rate
//! $\omega$ and a time step $t$, the pose is propagated in closed form:
//!
//! $$
//! x(+) = x(-) + \frac{v}{\omega} \left( \sin(\theta(-) + \omega t) - \sin(\theta(-)) \right)
//! $$
//!
//! $$
//! y(+) = y(-) + \frac{v}{\omega} \left( \cos(\theta(-)) - \cos(\theta(-) + \omega t) \right)
//! $$
//!
//! $$
//! \theta(+) = \theta(-) + \omega t
//! $$
//!
//! When $|\omega|$ is below [YAW_RATE_THRESHOLD] the vehicle is treated as driving in a straight line:
//!
//! $$
//! x(+) = x(-) + v \cos(\theta(-)) t, \quad y(+) = y(-) + v \sin(\theta(-)) t, \quad \theta(+) = \theta(-)
//! $$
//!
//! ## Sensor model
//!
//! An observation $(x_o, y_o)$ in the vehicle frame is rotated by the particle heading and translated by the
//! particle position:
//!
//! $$
//! \begin{bmatrix} x_m \\\\ y_m \end{bmatrix} =
//! \begin{bmatrix} \cos\theta & -\sin\theta \\\\ \sin\theta & \cos\theta \end{bmatrix}
//! \begin{bmatrix} x_o \\\\ y_o \end{bmatrix} + \begin{bmatrix} x_p \\\\ y_p \end{bmatrix}
//! $$
//!
//! and scored against the nearest landmark $(\mu_x, \mu_y)$ with
//!
//! $$
//! p(x_m, y_m) = \frac{1}{2 \pi \sigma_x \sigma_y}
//! \exp\left( -\left( \frac{(x_m - \mu_x)^2}{2 \sigma_x^2} + \frac{(y_m - \mu_y)^2}{2 \sigma_y^2} \right) \right)
//! $$

pub mod error;
pub mod filter;
pub mod map;
pub mod measurements;
pub mod particle;
pub mod sim;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Yaw rates (rad/s) below this magnitude are integrated with the straight-line model.
pub const YAW_RATE_THRESHOLD: f64 = 1e-4;

/// Planar pose of the vehicle (or of a particle) in map coordinates.
///
/// Positions are in meters and the heading `theta` is in radians, measured counter-clockwise from the map's
/// x-axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Map x coordinate in meters
    pub x: f64,
    /// Map y coordinate in meters
    pub y: f64,
    /// Heading in radians
    pub theta: f64,
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Pose {
        Pose { x, y, theta }
    }
}
impl Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4}, y: {:.4}, theta: {:.4} }}",
            self.x, self.y, self.theta
        )
    }
}
impl From<Pose> for Vector3<f64> {
    fn from(pose: Pose) -> Self {
        Vector3::new(pose.x, pose.y, pose.theta)
    }
}
impl From<Vector3<f64>> for Pose {
    fn from(vector: Vector3<f64>) -> Self {
        Pose::new(vector[0], vector[1], vector[2])
    }
}
impl From<Pose> for Vec<f64> {
    /// Converts a Pose to a Vec<f64> in (x, y, theta) order.
    fn from(pose: Pose) -> Self {
        vec![pose.x, pose.y, pose.theta]
    }
}
impl TryFrom<&[f64]> for Pose {
    type Error = &'static str;
    /// Attempts to create a Pose from a slice of 3 elements in (x, y, theta) order.
    fn try_from(slice: &[f64]) -> Result<Self, Self::Error> {
        if slice.len() != 3 {
            return Err("Slice must have length 3 for Pose");
        }
        Ok(Pose::new(slice[0], slice[1], slice[2]))
    }
}
impl TryFrom<Vec<f64>> for Pose {
    type Error = &'static str;
    fn try_from(vec: Vec<f64>) -> Result<Self, Self::Error> {
        Self::try_from(vec.as_slice())
    }
}

/// Commanded motion for a single timestep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Control {
    /// Forward velocity in m/s
    pub velocity: f64,
    /// Yaw rate in rad/s, positive counter-clockwise
    pub yaw_rate: f64,
}
impl Control {
    pub fn new(velocity: f64, yaw_rate: f64) -> Control {
        Control { velocity, yaw_rate }
    }
}
impl Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Control {{ velocity: {:.4}, yaw_rate: {:.4} }}",
            self.velocity, self.yaw_rate
        )
    }
}

/// Deterministic motion update of a pose.
///
/// Propagates the pose by `dt` seconds under the unicycle model described in the crate documentation. No noise
/// is added here; the particle filter layers process noise on top of the returned pose.
///
/// # Arguments
/// * `pose` - The pose at the start of the timestep
/// * `control` - Commanded velocity and yaw rate held over the timestep
/// * `dt` - Time step in seconds
///
/// # Returns
/// * The propagated pose. The heading is not wrapped.
///
/// # Example
/// ```rust
/// use mcl::{Control, Pose, forward};
/// let pose = forward(&Pose::new(0.0, 0.0, 0.0), &Control::new(2.0, 0.0), 1.0);
/// assert_eq!(pose, Pose::new(2.0, 0.0, 0.0));
/// ```
pub fn forward(pose: &Pose, control: &Control, dt: f64) -> Pose {
    let Control { velocity, yaw_rate } = *control;
    if yaw_rate.abs() < YAW_RATE_THRESHOLD {
        Pose {
            x: pose.x + velocity * pose.theta.cos() * dt,
            y: pose.y + velocity * pose.theta.sin() * dt,
            theta: pose.theta,
        }
    } else {
        let theta = pose.theta + yaw_rate * dt;
        let radius = velocity / yaw_rate;
        Pose {
            x: pose.x + radius * (theta.sin() - pose.theta.sin()),
            y: pose.y + radius * (pose.theta.cos() - theta.cos()),
            theta,
        }
    }
}

/// Wrap an angle to the range 0 to $\pm\pi$ radians
///
/// Angles a few turns out are wrapped by whole turns of $2\pi$ so that exact multiples of $\pi$ land on
/// $\pm\pi$; larger magnitudes are first reduced with a Euclidean remainder. Non-finite angles have no
/// meaningful wrap and come back as `NaN`.
///
/// # Arguments
/// * `angle` - The angle to be wrapped, in radians.
/// # Returns
/// * The wrapped angle, which will be in the range -π to π radians, or `NaN` for a non-finite input.
/// # Example
/// ```rust
/// use mcl::wrap_to_pi;
/// use std::f64::consts::PI;
/// let angle = 3.0 * PI / 2.0;
/// let wrapped_angle = wrap_to_pi(angle);
/// assert_eq!(wrapped_angle, -PI / 2.0);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    if !angle.is_finite() {
        return f64::NAN;
    }
    let mut wrapped = if angle.abs() > 2.0 * TAU {
        angle.rem_euclid(TAU)
    } else {
        angle
    };
    while wrapped > PI {
        wrapped -= TAU;
    }
    while wrapped < -PI {
        wrapped += TAU;
    }
    wrapped
}
