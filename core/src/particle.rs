//! Particle set and Monte Carlo localization filter.
//!
//! The filter owns a fixed-size set of weighted pose hypotheses and advances them
//! through the classic predict / weight-update / resample cycle. The deterministic
//! motion propagation lives in the crate root ([`crate::forward`]); this module wraps
//! it with per-particle Gaussian process noise, computes importance weights from the
//! sensor model in [`crate::measurements`], and resamples the set when asked.
//!
//! All randomness flows through a single filter-owned generator seeded from
//! [`FilterConfig::seed`], so a given configuration replays the same particle history
//! run after run.

use log::{debug, warn};
use nalgebra::{Matrix3, Vector3};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::fmt::{self, Debug, Display};

use crate::measurements::{Landmark, LandmarkObservation, Map, gaussian_weight, nearest_landmark_indices};
use crate::{Control, FilterError, Pose, forward};

/// One hypothesized pose plus an importance weight.
///
/// Particles are owned exclusively by the [`ParticleFilter`]: they are mutated in
/// place by the prediction and weight-update steps and replaced wholesale at
/// resampling. The association diagnostics are overwritten on every weight update
/// and describe only the most recent pass.
#[derive(Clone, Default)]
pub struct Particle {
    /// Particle identifier. Assigned at initialization and deliberately NOT
    /// renumbered by resampling, so duplicates appear once low-weight hypotheses
    /// collapse.
    pub id: usize,
    /// The hypothesized pose
    pub pose: Pose,
    /// Importance weight; normalized across the set after each weight update
    pub weight: f64,
    associations: Vec<u32>,
    sense_x: Vec<f64>,
    sense_y: Vec<f64>,
}

impl Debug for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.pose.x)
            .field("y", &self.pose.y)
            .field("theta", &self.pose.theta)
            .field("weight", &self.weight)
            .finish()
    }
}

impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Particle {{ id: {}, pose: {}, weight: {:.6e} }}", self.id, self.pose, self.weight)
    }
}

impl Particle {
    /// Create a particle with unit weight at the given pose.
    pub fn new(id: usize, pose: Pose) -> Particle {
        Particle {
            id,
            pose,
            weight: 1.0,
            associations: Vec::new(),
            sense_x: Vec::new(),
            sense_y: Vec::new(),
        }
    }

    /// Ids of the landmarks matched to each observation in the latest weight update,
    /// in observation order. These are the landmarks' real map identifiers, not
    /// candidate-list positions.
    pub fn associations(&self) -> &[u32] {
        &self.associations
    }

    /// World-frame x coordinates of the matched landmarks, same order as
    /// [`Particle::associations`].
    pub fn sensed_x(&self) -> &[f64] {
        &self.sense_x
    }

    /// World-frame y coordinates of the matched landmarks, same order as
    /// [`Particle::associations`].
    pub fn sensed_y(&self) -> &[f64] {
        &self.sense_y
    }

    /// Overwrite the association diagnostics for this particle.
    ///
    /// Called by the weight update once per pass; primarily useful for logging and
    /// visualization, not part of the estimation algorithm itself.
    pub fn set_associations(&mut self, associations: Vec<u32>, sense_x: Vec<f64>, sense_y: Vec<f64>) {
        self.associations = associations;
        self.sense_x = sense_x;
        self.sense_y = sense_y;
    }
}

/// Resampling scheme used when the particle set is redrawn.
///
/// The filter default is [`Multinomial`](ResamplingStrategy::Multinomial): independent
/// categorical draws per slot. [`Systematic`](ResamplingStrategy::Systematic) is the
/// lower-variance single-offset variant and is available for callers that opt in via
/// [`FilterConfig::resampling_strategy`]; it changes which indices are drawn for a
/// given random sequence, so it is not a drop-in replacement where draw-for-draw
/// reproducibility against the multinomial scheme matters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResamplingStrategy {
    #[default]
    Multinomial,
    Systematic,
}

/// Filter construction parameters.
#[derive(Clone, Copy, Debug)]
pub struct FilterConfig {
    /// Number of particles; fixed for the lifetime of the estimator.
    pub num_particles: usize,
    /// Seed for the filter-owned random source. Runs with the same seed and the same
    /// call sequence reproduce the same particle history.
    pub seed: u64,
    /// Resampling scheme; multinomial unless a caller explicitly opts out.
    pub resampling_strategy: ResamplingStrategy,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: 100,
            seed: 42,
            resampling_strategy: ResamplingStrategy::Multinomial,
        }
    }
}

/// Draw `count` indices with replacement, probability proportional to weight, using
/// independent categorical draws (one uniform variate per slot).
///
/// A weight vector with no positive mass falls back to uniform index draws; this is
/// the degenerate-but-valid case, not an error.
pub fn multinomial_resample_indices(weights: &[f64], count: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let cumulative = cumulative_sum(weights);
    let total = cumulative.last().copied().unwrap_or(0.0);
    let mut indices = Vec::with_capacity(count);
    if !(total > 0.0) || !total.is_finite() {
        for _ in 0..count {
            indices.push(rng.random_range(0..n));
        }
        return indices;
    }
    for _ in 0..count {
        let u = rng.random::<f64>() * total;
        let index = cumulative.partition_point(|&c| c <= u).min(n - 1);
        indices.push(index);
    }
    indices
}

/// Draw `count` indices with replacement using systematic (single random offset,
/// evenly spaced positions) resampling.
pub fn systematic_resample_indices(weights: &[f64], count: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let cumulative = cumulative_sum(weights);
    let total = cumulative.last().copied().unwrap_or(0.0);
    let mut indices = Vec::with_capacity(count);
    if !(total > 0.0) || !total.is_finite() {
        for _ in 0..count {
            indices.push(rng.random_range(0..n));
        }
        return indices;
    }
    let step = total / count as f64;
    let mut position = rng.random::<f64>() * step;
    for _ in 0..count {
        let index = cumulative.partition_point(|&c| c <= position).min(n - 1);
        indices.push(index);
        position += step;
    }
    indices
}

fn cumulative_sum(weights: &[f64]) -> Vec<f64> {
    let mut cumulative = Vec::with_capacity(weights.len());
    let mut sum = 0.0;
    for &w in weights {
        sum += w;
        cumulative.push(sum);
    }
    cumulative
}

/// Landmark-based Monte Carlo localization filter.
///
/// Lifecycle: construct with [`ParticleFilter::new`], seed the particle set once with
/// [`ParticleFilter::initialize`], then per timestep call
/// [`predict`](ParticleFilter::predict), [`update_weights`](ParticleFilter::update_weights),
/// and [`resample`](ParticleFilter::resample). Every operation other than `initialize`
/// fails fast with [`FilterError::NotInitialized`] until the set exists.
///
/// The per-particle loops in `predict` and `update_weights` carry no cross-particle
/// data dependency and could be parallelized without changing semantics, provided the
/// noise draws stay sequenced; this implementation keeps them sequential.
#[derive(Clone)]
pub struct ParticleFilter {
    config: FilterConfig,
    particles: Vec<Particle>,
    rng: StdRng,
    initialized: bool,
}

impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self.particles.iter().map(|p| p.weight).fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("initialized", &self.initialized)
            .field("effective_particles", &self.effective_sample_size())
            .field("weight_range", &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight))
            .field("estimate", &self.estimate())
            .finish()
    }
}

impl Default for ParticleFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

impl ParticleFilter {
    /// Create an uninitialized filter. No particles exist until
    /// [`initialize`](ParticleFilter::initialize) is called.
    pub fn new(config: FilterConfig) -> ParticleFilter {
        ParticleFilter {
            config,
            particles: Vec::new(),
            rng: StdRng::seed_from_u64(config.seed),
            initialized: false,
        }
    }

    /// Seed the particle set from an initial pose estimate.
    ///
    /// Samples `num_particles` poses independently from per-axis Gaussians centered
    /// on `(x, y, theta)` with standard deviations `std`, and gives every particle a
    /// raw weight of 1.0; the first weight update's normalization accounts for the
    /// scale. A zero standard deviation is legal and collapses that axis onto the
    /// estimate exactly.
    ///
    /// # Errors
    /// * [`FilterError::AlreadyInitialized`] if called again without
    ///   [`reset`](ParticleFilter::reset).
    /// * [`FilterError::InvalidParameter`] if any std entry is negative or non-finite.
    pub fn initialize(&mut self, x: f64, y: f64, theta: f64, std: &[f64; 3]) -> Result<(), FilterError> {
        if self.initialized {
            return Err(FilterError::AlreadyInitialized);
        }
        if std.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(FilterError::InvalidParameter("std"));
        }
        let dist_x = Normal::new(x, std[0]).unwrap();
        let dist_y = Normal::new(y, std[1]).unwrap();
        let dist_theta = Normal::new(theta, std[2]).unwrap();
        self.particles = (0..self.config.num_particles)
            .map(|i| {
                let pose = Pose::new(
                    dist_x.sample(&mut self.rng),
                    dist_y.sample(&mut self.rng),
                    dist_theta.sample(&mut self.rng),
                );
                Particle::new(i, pose)
            })
            .collect();
        self.initialized = true;
        debug!("initialized {} particles around ({:.3}, {:.3}, {:.3})", self.particles.len(), x, y, theta);
        Ok(())
    }

    /// Discard the particle set and return to the uninitialized state.
    ///
    /// The random source keeps its sequence position; reseed by constructing a new
    /// filter if a fresh replay is needed.
    pub fn reset(&mut self) {
        self.particles.clear();
        self.initialized = false;
    }

    /// Prediction step: propagate every particle through the velocity motion model
    /// and inject process noise.
    ///
    /// Each particle is advanced independently with [`crate::forward`] and then
    /// perturbed by zero-mean Gaussian noise with per-axis standard deviations
    /// `std_pos`, drawn fresh per particle per call.
    ///
    /// # Errors
    /// * [`FilterError::NotInitialized`] before the first `initialize`.
    /// * [`FilterError::InvalidParameter`] if `delta_t` is not a positive finite
    ///   number or any `std_pos` entry is negative or non-finite.
    pub fn predict(
        &mut self,
        delta_t: f64,
        std_pos: &[f64; 3],
        control: &Control,
    ) -> Result<(), FilterError> {
        if !self.initialized {
            return Err(FilterError::NotInitialized);
        }
        if !delta_t.is_finite() || delta_t <= 0.0 {
            return Err(FilterError::InvalidParameter("delta_t"));
        }
        if std_pos.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(FilterError::InvalidParameter("std_pos"));
        }
        let noise_x = Normal::new(0.0, std_pos[0]).unwrap();
        let noise_y = Normal::new(0.0, std_pos[1]).unwrap();
        let noise_theta = Normal::new(0.0, std_pos[2]).unwrap();
        for particle in &mut self.particles {
            forward(&mut particle.pose, control, delta_t);
            particle.pose.x += noise_x.sample(&mut self.rng);
            particle.pose.y += noise_y.sample(&mut self.rng);
            particle.pose.theta += noise_theta.sample(&mut self.rng);
        }
        Ok(())
    }

    /// Measurement step: recompute every particle's importance weight from the
    /// current observations and normalize across the set.
    ///
    /// Per particle: map landmarks within `sensor_range` of the hypothesis form the
    /// candidate set; the sensor-frame observations are transformed into the world
    /// frame through the particle's own pose; each transformed observation is
    /// associated with its nearest candidate; and the matched residuals are scored
    /// by the bivariate Gaussian sensor model. The matched landmark ids and world
    /// coordinates are recorded on the particle as diagnostics, replacing those of
    /// the previous pass.
    ///
    /// A particle with no candidates in range, or a pass with no observations,
    /// receives an unnormalized weight of exactly 1.0 (the empty product).
    ///
    /// # Errors
    /// * [`FilterError::NotInitialized`] before the first `initialize`.
    /// * [`FilterError::InvalidParameter`] if `sensor_range` is negative or
    ///   non-finite, or any `std_landmark` entry is not strictly positive and finite.
    /// * [`FilterError::DegenerateWeights`] if every unnormalized weight underflowed
    ///   to zero. The prior weights are retained; NaN is never stored.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: &[f64; 2],
        observations: &[LandmarkObservation],
        map: &Map,
    ) -> Result<(), FilterError> {
        if !self.initialized {
            return Err(FilterError::NotInitialized);
        }
        if !sensor_range.is_finite() || sensor_range < 0.0 {
            return Err(FilterError::InvalidParameter("sensor_range"));
        }
        if std_landmark.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(FilterError::InvalidParameter("std_landmark"));
        }
        let mut raw_weights = Vec::with_capacity(self.particles.len());
        let mut weight_total = 0.0;
        for particle in &mut self.particles {
            let candidates = map.landmarks_in_range(particle.pose.x, particle.pose.y, sensor_range);
            if candidates.is_empty() || observations.is_empty() {
                particle.set_associations(Vec::new(), Vec::new(), Vec::new());
                raw_weights.push(1.0);
                weight_total += 1.0;
                continue;
            }
            let world_observations: Vec<LandmarkObservation> = observations
                .iter()
                .map(|obs| {
                    let (x_w, y_w) = particle.pose.transform_to_world(obs.x, obs.y);
                    LandmarkObservation::new(x_w, y_w)
                })
                .collect();
            let matches = nearest_landmark_indices(&candidates, &world_observations);
            let matched: Vec<Landmark> = matches.iter().map(|&j| candidates[j]).collect();
            particle.set_associations(
                matched.iter().map(|lm| lm.id).collect(),
                matched.iter().map(|lm| lm.x).collect(),
                matched.iter().map(|lm| lm.y).collect(),
            );
            let weight = gaussian_weight(&matched, &world_observations, std_landmark);
            weight_total += weight;
            raw_weights.push(weight);
        }
        if !(weight_total > 0.0) || !weight_total.is_finite() {
            warn!(
                "weight update degenerate (total = {:.4e}); retaining prior weights",
                weight_total
            );
            return Err(FilterError::DegenerateWeights);
        }
        for (particle, raw) in self.particles.iter_mut().zip(raw_weights.iter()) {
            particle.weight = raw / weight_total;
        }
        debug!(
            "weight update complete: n_eff = {:.1} of {}",
            self.effective_sample_size(),
            self.particles.len()
        );
        Ok(())
    }

    /// Resampling step: redraw the particle set with replacement, probability
    /// proportional to weight.
    ///
    /// The replacement set is the drawn particles in draw order; ids are not
    /// renumbered, so copies of a surviving hypothesis share its original id. The
    /// collapse of low-weight hypotheses is the point of the operation. Degenerate
    /// weight distributions (all equal, or a single dominant weight) are valid
    /// inputs and need no special handling by callers.
    ///
    /// # Errors
    /// * [`FilterError::NotInitialized`] before the first `initialize`.
    pub fn resample(&mut self) -> Result<(), FilterError> {
        if !self.initialized {
            return Err(FilterError::NotInitialized);
        }
        let weights = self.weights();
        let indices = match self.config.resampling_strategy {
            ResamplingStrategy::Multinomial => {
                multinomial_resample_indices(&weights, self.particles.len(), &mut self.rng)
            }
            ResamplingStrategy::Systematic => {
                systematic_resample_indices(&weights, self.particles.len(), &mut self.rng)
            }
        };
        let resampled: Vec<Particle> = indices.iter().map(|&i| self.particles[i].clone()).collect();
        self.particles = resampled;
        Ok(())
    }

    /// Read-only view of the particle set.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable view of the particle set, for embedding layers that need to adjust
    /// hypotheses directly (and for tests).
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// The current weights in particle order, as a derived view. The particle is the
    /// single source of truth for its weight; no parallel array is stored.
    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    /// Number of particles in the set (zero before initialization).
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    /// Whether `initialize` has run since construction or the last reset.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The highest-weight hypothesis, if the set is non-empty.
    pub fn best_particle(&self) -> Option<&Particle> {
        self.particles
            .iter()
            .max_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap())
    }

    /// Weighted mean pose of the particle set.
    ///
    /// Position is the weighted average; heading is the circular (vector) mean, so
    /// hypotheses straddling the +/- pi seam average sensibly. Returns the default
    /// pose for an empty set.
    pub fn estimate(&self) -> Pose {
        if self.particles.is_empty() {
            return Pose::default();
        }
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_sin = 0.0;
        let mut sum_cos = 0.0;
        let mut total_weight = 0.0;
        for p in &self.particles {
            sum_x += p.weight * p.pose.x;
            sum_y += p.weight * p.pose.y;
            sum_sin += p.weight * p.pose.theta.sin();
            sum_cos += p.weight * p.pose.theta.cos();
            total_weight += p.weight;
        }
        if total_weight > 0.0 {
            Pose::new(
                sum_x / total_weight,
                sum_y / total_weight,
                sum_sin.atan2(sum_cos),
            )
        } else {
            let n = self.particles.len() as f64;
            let mean_x = self.particles.iter().map(|p| p.pose.x).sum::<f64>() / n;
            let mean_y = self.particles.iter().map(|p| p.pose.y).sum::<f64>() / n;
            let mean_sin = self.particles.iter().map(|p| p.pose.theta.sin()).sum::<f64>() / n;
            let mean_cos = self.particles.iter().map(|p| p.pose.theta.cos()).sum::<f64>() / n;
            Pose::new(mean_x, mean_y, mean_sin.atan2(mean_cos))
        }
    }

    /// Weighted covariance of the particle set about the [`estimate`](ParticleFilter::estimate).
    ///
    /// The x/y block carries the cross term; heading variance sits on the last
    /// diagonal entry with the pose/heading cross terms left at zero.
    pub fn covariance(&self) -> Matrix3<f64> {
        let mean = self.estimate();
        let mut cov = Matrix3::zeros();
        let mut total_weight = 0.0;
        for p in &self.particles {
            let diff = Vector3::new(p.pose.x - mean.x, p.pose.y - mean.y, p.pose.theta - mean.theta);
            cov[(0, 0)] += p.weight * diff[0] * diff[0];
            cov[(0, 1)] += p.weight * diff[0] * diff[1];
            cov[(1, 1)] += p.weight * diff[1] * diff[1];
            cov[(2, 2)] += p.weight * diff[2] * diff[2];
            total_weight += p.weight;
        }
        if total_weight > 0.0 {
            cov /= total_weight;
        }
        cov[(1, 0)] = cov[(0, 1)];
        cov
    }

    /// Effective sample size `1 / sum(w_i^2)` of the normalized weights; a standard
    /// degeneracy diagnostic.
    pub fn effective_sample_size(&self) -> f64 {
        let sum_of_squares: f64 = self.particles.iter().map(|p| p.weight * p.weight).sum();
        if sum_of_squares > 0.0 { 1.0 / sum_of_squares } else { 0.0 }
    }
}
