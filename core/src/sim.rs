//! Simulation utilities and CSV data loading for landmark localization.
//!
//! This module provides:
//! - `SimulationConfig` for describing a run, stored as JSON, YAML or TOML
//! - Readers and writers for the CSV inputs (controls, ground truth, observations)
//! - A synthetic scenario generator that drives a vehicle through a map and records what it would see
//! - `run_simulation`, which runs the particle filter over a recorded or synthetic dataset
//! - `LocalizationResult` and `ErrorSummary` for storing and analyzing the filter's output

use crate::error::{FilterError, check_std};
use crate::filter::{ParticleFilter, ParticleFilterConfig};
use crate::map::Map;
use crate::measurements::LandmarkObs;
use crate::particle::SenseAxis;
use crate::{Control, Pose, forward, wrap_to_pi};

use log::{info, warn};
use nalgebra::{Rotation2, Vector2, Vector3};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Parameters of a localization run.
///
/// Missing fields fall back to their defaults when read from a file, so a configuration only needs to name the
/// values it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time between consecutive steps in seconds
    pub delta_t: f64,
    /// Sensor range in meters
    pub sensor_range: f64,
    /// Standard deviations (x, y, theta) of the initial pose estimate
    pub init_std: [f64; 3],
    /// Standard deviations (x, y, theta) of the process noise
    pub process_noise_std: [f64; 3],
    /// Standard deviations (x, y) of landmark observations
    pub landmark_std: [f64; 2],
    /// Resample only when the effective sample size falls below this fraction of the particle count. `None`
    /// resamples every step.
    pub resample_threshold: Option<f64>,
    pub filter: ParticleFilterConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            delta_t: 0.1,
            sensor_range: 50.0,
            init_std: [0.3, 0.3, 0.01],
            process_noise_std: [0.3, 0.3, 0.01],
            landmark_std: [0.3, 0.3],
            resample_threshold: None,
            filter: ParticleFilterConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn init_std(&self) -> Vector3<f64> {
        Vector3::from(self.init_std)
    }
    pub fn process_noise_std(&self) -> Vector3<f64> {
        Vector3::from(self.process_noise_std)
    }
    pub fn landmark_std(&self) -> Vector2<f64> {
        Vector2::from(self.landmark_std)
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// Reads every row of a headed CSV file.
fn read_records<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>, Box<dyn Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        records.push(record);
    }
    Ok(records)
}

fn write_records<T: Serialize, P: AsRef<Path>>(records: &[T], path: P) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads per-step controls from a CSV file with a `velocity,yaw_rate` header.
pub fn read_controls<P: AsRef<Path>>(path: P) -> Result<Vec<Control>, Box<dyn Error>> {
    read_records(path)
}
pub fn write_controls<P: AsRef<Path>>(controls: &[Control], path: P) -> io::Result<()> {
    write_records(controls, path)
}
/// Reads per-step ground truth poses from a CSV file with an `x,y,theta` header.
pub fn read_truth<P: AsRef<Path>>(path: P) -> Result<Vec<Pose>, Box<dyn Error>> {
    read_records(path)
}
pub fn write_truth<P: AsRef<Path>>(truth: &[Pose], path: P) -> io::Result<()> {
    write_records(truth, path)
}

/// A single row of the observations file: one vehicle-frame landmark sighting at a zero-based step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub step: usize,
    /// Forward distance to the landmark in the vehicle frame, meters
    pub x: f64,
    /// Leftward distance to the landmark in the vehicle frame, meters
    pub y: f64,
}

impl ObservationRecord {
    /// Reads observation rows from a CSV file with a `step,x,y` header.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn Error>> {
        read_records(path)
    }
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        write_records(records, path)
    }
    /// Flattens per-step observation lists into rows, in step order.
    pub fn from_steps(observations: &[Vec<LandmarkObs>]) -> Vec<Self> {
        observations
            .iter()
            .enumerate()
            .flat_map(|(step, list)| {
                list.iter().map(move |obs| ObservationRecord {
                    step,
                    x: obs.x,
                    y: obs.y,
                })
            })
            .collect()
    }
}

/// Groups observation rows into one list per step.
///
/// Steps without rows get an empty list. Rows are kept in file order within their step; rows whose step is
/// beyond `steps` are dropped with a warning.
pub fn group_observations(records: &[ObservationRecord], steps: usize) -> Vec<Vec<LandmarkObs>> {
    let mut grouped = vec![Vec::new(); steps];
    let mut dropped = 0usize;
    for record in records {
        match grouped.get_mut(record.step) {
            Some(list) => list.push(LandmarkObs::new(record.x, record.y)),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!(
            "Dropped {} observations recorded after the last of {} steps",
            dropped, steps
        );
    }
    grouped
}

/// A complete localization dataset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scenario {
    pub map: Map,
    /// Control applied between step `k` and `k + 1`
    pub controls: Vec<Control>,
    /// Ground truth pose at every step
    pub truth: Vec<Pose>,
    /// Vehicle-frame observations at every step
    pub observations: Vec<Vec<LandmarkObs>>,
}

impl Scenario {
    /// Loads a dataset from its four CSV files.
    pub fn from_csv<P: AsRef<Path>>(
        map: P,
        controls: P,
        observations: P,
        truth: P,
    ) -> Result<Self, Box<dyn Error>> {
        let map = Map::from_csv(map)?;
        let controls = read_controls(controls)?;
        let truth = read_truth(truth)?;
        let records = ObservationRecord::from_csv(observations)?;
        let observations = group_observations(&records, truth.len());
        info!(
            "Loaded {} landmarks, {} controls, {} truth poses and {} observations",
            map.len(),
            controls.len(),
            truth.len(),
            records.len()
        );
        Ok(Scenario {
            map,
            controls,
            truth,
            observations,
        })
    }
    /// Writes the dataset as four CSV files.
    pub fn to_csv<P: AsRef<Path>>(
        &self,
        map: P,
        controls: P,
        observations: P,
        truth: P,
    ) -> io::Result<()> {
        self.map.to_csv(map)?;
        write_controls(&self.controls, controls)?;
        write_truth(&self.truth, truth)?;
        ObservationRecord::to_csv(&ObservationRecord::from_steps(&self.observations), observations)
    }

    /// Drives a vehicle through `map` and records what a landmark sensor would report.
    ///
    /// The ground truth starts at `start` and follows [`forward`] under each control, so there is one more truth
    /// pose than controls. At every step each landmark within `sensor_range` of the vehicle is reported in the
    /// vehicle frame, in map order, with independent Gaussian noise of `noise_std` on each axis (zero is
    /// allowed and yields exact observations).
    pub fn generate<R: Rng + ?Sized>(
        map: Map,
        start: Pose,
        controls: Vec<Control>,
        dt: f64,
        sensor_range: f64,
        noise_std: Vector2<f64>,
        rng: &mut R,
    ) -> Result<Self, FilterError> {
        check_std("observation_std_x", noise_std[0])?;
        check_std("observation_std_y", noise_std[1])?;
        let noise_x = Normal::new(0.0, noise_std[0]).map_err(|_| FilterError::InvalidNoise {
            name: "observation_std_x",
            value: noise_std[0],
        })?;
        let noise_y = Normal::new(0.0, noise_std[1]).map_err(|_| FilterError::InvalidNoise {
            name: "observation_std_y",
            value: noise_std[1],
        })?;

        let mut truth = Vec::with_capacity(controls.len() + 1);
        truth.push(start);
        for control in &controls {
            let last = truth[truth.len() - 1];
            truth.push(forward(&last, control, dt));
        }

        let range_squared = sensor_range * sensor_range;
        let observations = truth
            .iter()
            .map(|pose| {
                let to_vehicle = Rotation2::new(-pose.theta);
                map.landmarks()
                    .iter()
                    .filter(|landmark| landmark.distance_squared(pose.x, pose.y) <= range_squared)
                    .map(|landmark| {
                        let local = to_vehicle * Vector2::new(landmark.x - pose.x, landmark.y - pose.y);
                        LandmarkObs::new(
                            local[0] + noise_x.sample(rng),
                            local[1] + noise_y.sample(rng),
                        )
                    })
                    .collect()
            })
            .collect();

        Ok(Scenario {
            map,
            controls,
            truth,
            observations,
        })
    }

    pub fn steps(&self) -> usize {
        self.truth.len()
    }
}

/// Filter output for a single step, compared against ground truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalizationResult {
    pub step: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    /// Weight of the highest weight particle after the update
    pub best_weight: f64,
    pub truth_x: f64,
    pub truth_y: f64,
    pub truth_theta: f64,
    /// Absolute x error in meters
    pub error_x: f64,
    /// Absolute y error in meters
    pub error_y: f64,
    /// Absolute heading error in radians, wrapped to [0, pi]
    pub error_theta: f64,
    /// Space-separated landmark ids associated by the best particle
    pub associations: String,
    /// Space-separated map-frame x coordinates of the best particle's observations
    pub sense_x: String,
    /// Space-separated map-frame y coordinates of the best particle's observations
    pub sense_y: String,
}

impl LocalizationResult {
    pub fn estimate(&self) -> Pose {
        Pose::new(self.x, self.y, self.theta)
    }
    pub fn truth(&self) -> Pose {
        Pose::new(self.truth_x, self.truth_y, self.truth_theta)
    }
    /// Euclidean position error in meters.
    pub fn position_error(&self) -> f64 {
        self.error_x.hypot(self.error_y)
    }

    /// Writes results to a CSV file, one row per step.
    pub fn to_csv<P: AsRef<Path>>(results: &[Self], path: P) -> io::Result<()> {
        write_records(results, path)
    }
    /// Reads results previously written by [`LocalizationResult::to_csv`].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn Error>> {
        read_records(path)
    }
}

/// Aggregate error statistics over a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub steps: usize,
    pub mean_error_x: f64,
    pub mean_error_y: f64,
    pub mean_error_theta: f64,
    pub max_error_x: f64,
    pub max_error_y: f64,
    pub max_error_theta: f64,
}

impl std::fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} steps, mean error (x: {:.3}, y: {:.3}, theta: {:.4}), max error (x: {:.3}, y: {:.3}, theta: {:.4})",
            self.steps,
            self.mean_error_x,
            self.mean_error_y,
            self.mean_error_theta,
            self.max_error_x,
            self.max_error_y,
            self.max_error_theta
        )
    }
}

/// Mean and maximum absolute errors over all steps; all zeros for an empty run.
pub fn summarize(results: &[LocalizationResult]) -> ErrorSummary {
    if results.is_empty() {
        return ErrorSummary::default();
    }
    let n = results.len() as f64;
    let mut summary = ErrorSummary {
        steps: results.len(),
        ..ErrorSummary::default()
    };
    for r in results {
        summary.mean_error_x += r.error_x / n;
        summary.mean_error_y += r.error_y / n;
        summary.mean_error_theta += r.error_theta / n;
        summary.max_error_x = summary.max_error_x.max(r.error_x);
        summary.max_error_y = summary.max_error_y.max(r.error_y);
        summary.max_error_theta = summary.max_error_theta.max(r.error_theta);
    }
    summary
}

/// Run the particle filter over a dataset.
///
/// The filter is initialized around the first ground truth pose with `config.init_std`. For every step `k` the
/// filter predicts with control `k - 1` (skipped at `k = 0`), weighs the particles against the observations of
/// step `k`, records the estimate and the best particle's associations, and then resamples.
///
/// # Arguments
/// * `config` - Simulation and filter parameters
/// * `scenario` - Map, controls, observations and ground truth
///
/// # Returns
/// * One `LocalizationResult` per ground truth pose.
/// * `Err` if the dataset is inconsistent or the filter rejects a parameter.
pub fn run_simulation(
    config: &SimulationConfig,
    scenario: &Scenario,
) -> Result<Vec<LocalizationResult>, Box<dyn Error>> {
    let steps = scenario.steps();
    let Some(first) = scenario.truth.first() else {
        return Err("ground truth must contain at least one pose".into());
    };
    if scenario.controls.len() + 1 < steps {
        return Err(format!(
            "{} steps need at least {} controls, got {}",
            steps,
            steps - 1,
            scenario.controls.len()
        )
        .into());
    }

    let mut pf = ParticleFilter::new(config.filter.clone())?;
    pf.init(*first, config.init_std())?;
    info!("Running localization over {} steps with {:?}", steps, pf);

    let mut results = Vec::with_capacity(steps);
    for (step, truth) in scenario.truth.iter().enumerate() {
        if step > 0 {
            pf.predict(
                config.delta_t,
                config.process_noise_std(),
                scenario.controls[step - 1],
            )?;
        }
        let observations = scenario
            .observations
            .get(step)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        pf.update_weights(
            config.sensor_range,
            config.landmark_std(),
            observations,
            &scenario.map,
        )?;

        let estimate = pf.estimate()?;
        pf.record_best_associations(observations, &scenario.map)?;
        let best = pf.best_particle().ok_or(FilterError::Uninitialized)?;
        results.push(LocalizationResult {
            step,
            x: estimate.x,
            y: estimate.y,
            theta: estimate.theta,
            best_weight: best.weight,
            truth_x: truth.x,
            truth_y: truth.y,
            truth_theta: truth.theta,
            error_x: (estimate.x - truth.x).abs(),
            error_y: (estimate.y - truth.y).abs(),
            error_theta: wrap_to_pi(estimate.theta - truth.theta).abs(),
            associations: best.get_associations(),
            sense_x: best.get_sense_coord(SenseAxis::X),
            sense_y: best.get_sense_coord(SenseAxis::Y),
        });

        match config.resample_threshold {
            Some(threshold) => {
                pf.resample_if_needed(threshold)?;
            }
            None => pf.resample()?,
        }
    }
    info!("Localization finished: {}", summarize(&results));
    Ok(results)
}
