//! Measurement-related code for the landmark localization filter.
//!
//! This module defines the map and observation data structures, the nearest-neighbor
//! association engine, and the bivariate Gaussian sensor likelihood used by the weight
//! update. The filter in [`crate::particle`] orchestrates these pieces per particle;
//! everything here is a pure function of its inputs.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::distance;

/// A single map landmark in world-frame coordinates.
///
/// The map is read-only external data: it is supplied once, already parsed, and never
/// mutated by the filter. Field order matches the `id,x,y` CSV layout read by
/// [`crate::sim::load_map`].
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Landmark {
    /// Landmark identifier, unique within the map
    pub id: u32,
    /// World-frame x position in meters
    pub x: f64,
    /// World-frame y position in meters
    pub y: f64,
}

impl Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Landmark {{ id: {}, x: {:.3}, y: {:.3} }}", self.id, self.x, self.y)
    }
}

/// A collection of known landmarks describing the environment.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Map {
    pub landmarks: Vec<Landmark>,
}

impl Map {
    /// Create a map from a list of landmarks.
    pub fn new(landmarks: Vec<Landmark>) -> Map {
        Map { landmarks }
    }

    /// Number of landmarks in the map.
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    /// Whether the map contains no landmarks.
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// Select the landmarks within `sensor_range` (inclusive) of a position.
    ///
    /// This forms the candidate set for association: landmarks a sensor at `(x, y)`
    /// could plausibly have detected.
    ///
    /// # Example
    /// ```rust
    /// use mcl::measurements::{Landmark, Map};
    ///
    /// let map = Map::new(vec![
    ///     Landmark { id: 1, x: 5.0, y: 0.0 },
    ///     Landmark { id: 2, x: 100.0, y: 0.0 },
    /// ]);
    /// let candidates = map.landmarks_in_range(0.0, 0.0, 10.0);
    /// assert_eq!(candidates.len(), 1);
    /// assert_eq!(candidates[0].id, 1);
    /// ```
    pub fn landmarks_in_range(&self, x: f64, y: f64, sensor_range: f64) -> Vec<Landmark> {
        self.landmarks
            .iter()
            .filter(|lm| distance(lm.x, lm.y, x, y) <= sensor_range)
            .copied()
            .collect()
    }
}

/// A single landmark detection.
///
/// The same structure is used in two coordinate frames: sensor-frame (vehicle-relative,
/// as received from the detector) and world-frame (after transforming through a
/// particle's hypothesized pose). Which frame applies is determined by context; the
/// filter transforms sensor-frame input into per-particle world-frame copies before
/// association.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LandmarkObservation {
    /// x coordinate in meters (sensor frame: forward positive)
    pub x: f64,
    /// y coordinate in meters (sensor frame: left positive)
    pub y: f64,
}

impl LandmarkObservation {
    /// Create a new observation.
    pub fn new(x: f64, y: f64) -> LandmarkObservation {
        LandmarkObservation { x, y }
    }
}

/// Associate each observation with its nearest candidate landmark.
///
/// Greedy nearest-neighbor matching by Euclidean distance with no mutual exclusivity:
/// multiple observations may map to the same candidate. Ties break toward the first
/// candidate in iteration order (strict `<` against the best distance so far). Both
/// inputs must already be in a common coordinate frame.
///
/// # Returns
/// * One index into `candidates` per observation, in observation order. The index is
///   the candidate's position in the slice, not its landmark id. An empty candidate
///   slice yields an empty result regardless of the observation count.
///
/// # Example
/// ```rust
/// use mcl::measurements::{Landmark, LandmarkObservation, nearest_landmark_indices};
///
/// let candidates = vec![
///     Landmark { id: 7, x: 0.0, y: 0.0 },
///     Landmark { id: 9, x: 10.0, y: 0.0 },
/// ];
/// let observations = vec![LandmarkObservation::new(9.0, 1.0)];
/// assert_eq!(nearest_landmark_indices(&candidates, &observations), vec![1]);
/// ```
pub fn nearest_landmark_indices(
    candidates: &[Landmark],
    observations: &[LandmarkObservation],
) -> Vec<usize> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let mut matches = Vec::with_capacity(observations.len());
    for obs in observations {
        let mut best_index = 0;
        let mut best_distance = f64::MAX;
        for (j, candidate) in candidates.iter().enumerate() {
            let d = distance(obs.x, obs.y, candidate.x, candidate.y);
            if d < best_distance {
                best_index = j;
                best_distance = d;
            }
        }
        matches.push(best_index);
    }
    matches
}

/// Largest exponent magnitude admitted into the likelihood sum. Beyond this the sum
/// saturates to the negative bound so `exp` stays within double-precision range.
const EXPONENT_SATURATION: f64 = 100.0;

/// Evaluate the unnormalized likelihood of a set of matched observation/landmark pairs
/// under an axis-independent bivariate Gaussian sensor model.
///
/// Each pair contributes `exp(-(dx^2 / 2 sigma_x^2 + dy^2 / 2 sigma_y^2))` scaled by
/// the density normalizer `1 / (2 pi sigma_x sigma_y)`; the normalizer is raised to
/// the pair count rather than folded into the exponent sum. An exponent whose
/// magnitude exceeds the saturation bound collapses the running sum to the bound,
/// which keeps the final weight strictly positive and finite in the face of gross
/// outlier residuals.
///
/// Zero pairs yield a weight of exactly 1.0.
///
/// # Arguments
/// * `matched` - The associated landmark per observation, same order as `observed`.
/// * `observed` - World-frame observations.
/// * `std_landmark` - Sensor noise standard deviations `[sigma_x, sigma_y]`.
pub fn gaussian_weight(
    matched: &[Landmark],
    observed: &[LandmarkObservation],
    std_landmark: &[f64; 2],
) -> f64 {
    debug_assert_eq!(matched.len(), observed.len());
    let normalizer = 1.0 / (2.0 * std::f64::consts::PI * std_landmark[0] * std_landmark[1]);
    let mut exponent_sum = 0.0;
    for (landmark, obs) in matched.iter().zip(observed.iter()) {
        let dx = landmark.x - obs.x;
        let dy = landmark.y - obs.y;
        let exponent = -(dx.powi(2) / (2.0 * std_landmark[0].powi(2))
            + dy.powi(2) / (2.0 * std_landmark[1].powi(2)));
        if exponent.abs() <= EXPONENT_SATURATION {
            exponent_sum += exponent;
        } else {
            exponent_sum = -EXPONENT_SATURATION;
        }
    }
    normalizer.powi(matched.len() as i32) * exponent_sum.exp()
}
