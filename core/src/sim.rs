//! Simulation utilities and CSV data loading for landmark localization.
//!
//! This module provides:
//! - CSV loading for landmark maps and per-timestep control/observation logs
//! - A closed-loop localization runner driving the filter over a recorded dataset
//! - `LocalizationResult` for storing the per-step solution and writing it back out
//!
//! The filter core never touches files; everything here parses external data into the
//! typed structures the core consumes, mirroring the split between the estimator and
//! the data pipeline feeding it.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::Path;

use crate::measurements::{Landmark, LandmarkObservation, Map};
use crate::particle::{FilterConfig, ParticleFilter};
use crate::{Control, FilterError, Pose, forward};

/// Load a landmark map from a CSV file with an `id,x,y` header row.
///
/// # Arguments
/// * `path` - Path to the CSV file to read.
///
/// # Returns
/// * `Ok(Map)` if successful.
/// * `Err` if the file cannot be read or parsed.
pub fn load_map<P: AsRef<Path>>(path: P) -> Result<Map, Box<dyn Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut landmarks = Vec::new();
    for result in rdr.deserialize() {
        let landmark: Landmark = result?;
        landmarks.push(landmark);
    }
    Ok(Map::new(landmarks))
}

/// One row of the control log: the commanded motion at a timestep.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ControlRecord {
    /// Timestamp in seconds
    pub time: f64,
    /// Commanded forward velocity in m/s
    pub velocity: f64,
    /// Commanded yaw rate in rad/s
    pub yaw_rate: f64,
}

impl ControlRecord {
    /// Reads a CSV file (`time,velocity,yaw_rate` header) into a vector of records.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// The motion command carried by this record.
    pub fn control(&self) -> Control {
        Control::new(self.velocity, self.yaw_rate)
    }
}

/// One row of the sensor log: a landmark detection in the sensor frame.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ObservationRecord {
    /// Timestamp in seconds; detections sharing a control timestamp form that
    /// timestep's observation set
    pub time: f64,
    /// Sensor-frame x coordinate in meters
    pub x: f64,
    /// Sensor-frame y coordinate in meters
    pub y: f64,
}

impl ObservationRecord {
    /// Reads a CSV file (`time,x,y` header) into a vector of records.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// The detection carried by this record.
    pub fn observation(&self) -> LandmarkObservation {
        LandmarkObservation::new(self.x, self.y)
    }
}

/// Tunable parameters for a closed-loop localization run.
///
/// The defaults carry the reference configuration: 100 particles, 0.1 s timestep,
/// 50 m sensor range, GPS-grade initial/process noise, and 0.3 m landmark noise.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SimulationParams {
    /// Number of particles in the filter
    pub num_particles: usize,
    /// Seed for the filter's random source
    pub seed: u64,
    /// Timestep between control records in seconds
    pub delta_t: f64,
    /// Maximum landmark detection range in meters
    pub sensor_range: f64,
    /// Initial and process noise standard deviations `[x, y, theta]`
    pub sigma_pos: [f64; 3],
    /// Landmark measurement noise standard deviations `[x, y]`
    pub sigma_landmark: [f64; 2],
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            num_particles: 100,
            seed: 42,
            delta_t: 0.1,
            sensor_range: 50.0,
            sigma_pos: [0.3, 0.3, 0.01],
            sigma_landmark: [0.3, 0.3],
        }
    }
}

/// One row of the localization solution: the best-particle pose after a timestep.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct EstimateRecord {
    /// Timestamp of the control record that produced this step
    pub time: f64,
    /// Best-particle x position in meters
    pub x: f64,
    /// Best-particle y position in meters
    pub y: f64,
    /// Best-particle heading in radians
    pub theta: f64,
    /// Normalized weight of the best particle
    pub best_weight: f64,
    /// Effective sample size after the weight update
    pub n_eff: f64,
}

/// The per-step localization solution for a full run.
#[derive(Clone, Debug, Default)]
pub struct LocalizationResult {
    pub steps: Vec<EstimateRecord>,
}

impl LocalizationResult {
    /// Writes the solution to a CSV file, one row per timestep.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let mut wtr = csv::Writer::from_path(path)?;
        for step in &self.steps {
            wtr.serialize(step)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Reads a solution previously written with
    /// [`to_csv`](LocalizationResult::to_csv).
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut steps = Vec::new();
        for result in rdr.deserialize() {
            let step: EstimateRecord = result?;
            steps.push(step);
        }
        Ok(LocalizationResult { steps })
    }
}

/// Propagate the initial pose through the control log with no noise and no
/// measurement corrections.
///
/// Useful as an open-loop baseline to quantify how much the landmark updates help.
pub fn dead_reckoning(controls: &[ControlRecord], initial_pose: &Pose, delta_t: f64) -> Vec<Pose> {
    let mut pose = *initial_pose;
    let mut trajectory = Vec::with_capacity(controls.len());
    for record in controls {
        forward(&mut pose, &record.control(), delta_t);
        trajectory.push(pose);
    }
    trajectory
}

/// Run the filter closed-loop over a recorded dataset.
///
/// Initializes the particle set at `initial_pose` with `sigma_pos` spread, then per
/// control record: predict, weight-update against the observations sharing that
/// record's timestamp (within half a timestep), and resample. A degenerate weight
/// update is logged and skipped, retaining the prior weights, rather than aborting
/// the run.
///
/// Observations are consumed in time order; records more than half a timestep older
/// than the current control are dropped with a warning.
pub fn run_localization(
    map: &Map,
    controls: &[ControlRecord],
    observations: &[ObservationRecord],
    params: &SimulationParams,
    initial_pose: &Pose,
) -> Result<LocalizationResult, FilterError> {
    let mut filter = ParticleFilter::new(FilterConfig {
        num_particles: params.num_particles,
        seed: params.seed,
        ..FilterConfig::default()
    });
    filter.initialize(initial_pose.x, initial_pose.y, initial_pose.theta, &params.sigma_pos)?;
    info!(
        "starting localization: {} particles, {} control steps, {} observations, {} landmarks",
        params.num_particles,
        controls.len(),
        observations.len(),
        map.len()
    );
    let half_step = params.delta_t / 2.0;
    let mut next_observation = 0;
    let mut result = LocalizationResult::default();
    for record in controls {
        filter.predict(params.delta_t, &params.sigma_pos, &record.control())?;

        while next_observation < observations.len()
            && observations[next_observation].time < record.time - half_step
        {
            warn!(
                "dropping stale observation at t = {:.3} (current step t = {:.3})",
                observations[next_observation].time, record.time
            );
            next_observation += 1;
        }
        let mut step_observations = Vec::new();
        while next_observation < observations.len()
            && observations[next_observation].time <= record.time + half_step
        {
            step_observations.push(observations[next_observation].observation());
            next_observation += 1;
        }

        match filter.update_weights(params.sensor_range, &params.sigma_landmark, &step_observations, map) {
            Ok(()) => {}
            Err(FilterError::DegenerateWeights) => {
                warn!("degenerate weight update at t = {:.3}; keeping prior weights", record.time);
            }
            Err(e) => return Err(e),
        }
        filter.resample()?;

        let best = filter
            .best_particle()
            .expect("initialized filter has a non-empty particle set");
        result.steps.push(EstimateRecord {
            time: record.time,
            x: best.pose.x,
            y: best.pose.y,
            theta: best.pose.theta,
            best_weight: best.weight,
            n_eff: filter.effective_sample_size(),
        });
    }
    Ok(result)
}
