//! Monte Carlo localization toolbox for landmark-based navigation filters
//!
//! This crate provides a set of tools for implementing a Sequential Monte Carlo (particle
//! filter) pose estimator in Rust. The estimator fuses a noisy velocity/yaw-rate motion
//! model with noisy landmark observations against a known map and is designed to be
//! embedded in a localization loop: the caller supplies motion commands and sensor
//! detections each timestep and reads back a best-estimate pose or the full weighted
//! particle set. Map loading and per-timestep control/sensor feeds are handled by the
//! [`sim`] module and the `mcl` binary; the filter itself only ever sees already-parsed
//! structures.
//!
//! Primarily built off of three crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra tools
//!   for state vectors and covariance estimates.
//! - [`rand`](https://crates.io/crates/rand) and
//!   [`rand_distr`](https://crates.io/crates/rand_distr): Provide the seeded random
//!   source and Gaussian sampling used for initialization, process noise, and
//!   resampling.
//!
//! The primary reference text is _Probabilistic Robotics_ by Thrun, Burgard, and Fox.
//! Where applicable, calculations are referenced by the corresponding algorithm in the
//! book (chapters 4 and 8 cover the particle filter and Monte Carlo localization). In
//! general, variables are named for the quantity they represent and not the symbol used
//! in the book.
//!
//! # State definition and coordinate frames
//!
//! The estimated state is the planar pose of the vehicle:
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! Where:
//! - $p_x$ and $p_y$ are world-frame (map) coordinates in meters.
//! - $\theta$ is the heading in radians, measured counter-clockwise from the world
//!   x-axis. The filter does not wrap $\theta$ into a canonical range; callers must
//!   tolerate unbounded radians.
//!
//! Landmark detections arrive in the sensor (body) frame, i.e. relative to the vehicle.
//! Converting a detection $(x_o, y_o)$ into the world frame under a hypothesized pose
//! is the standard 2D rigid-body rotate-then-translate transform:
//!
//! $$
//! x_w = p_x + x_o \cos\theta - y_o \sin\theta
//! $$
//! $$
//! y_w = p_y + x_o \sin\theta + y_o \cos\theta
//! $$
//!
//! # Motion model
//!
//! The process model is the standard differential/Ackermann velocity motion model.
//! Given commanded velocity $v$, yaw rate $\omega$, and elapsed time $\Delta t$, the
//! closed-form arc update is:
//!
//! $$
//! x' = x + \frac{v}{\omega}\left(\sin(\theta + \omega \Delta t) - \sin\theta\right)
//! $$
//! $$
//! y' = y + \frac{v}{\omega}\left(\cos\theta - \cos(\theta + \omega \Delta t)\right)
//! $$
//! $$
//! \theta' = \theta + \omega \Delta t
//! $$
//!
//! The arc form is singular as $\omega \to 0$, so below [`YAW_RATE_EPSILON`] the motion
//! degrades to the straight-line form $x' = x + v \Delta t \cos\theta$,
//! $y' = y + v \Delta t \sin\theta$, $\theta' = \theta$. The deterministic part of the
//! model is exposed as the free function [`forward`]; the filter wraps it and injects
//! per-axis Gaussian process noise per particle.
//!
//! # Measurement model
//!
//! Each particle's importance weight is the product over observations of an
//! axis-independent bivariate Gaussian density centered on the associated landmark:
//!
//! $$
//! w = \prod_{j=1}^{m} \frac{1}{2\pi\sigma_x\sigma_y}
//!     \exp\left(-\frac{(x_j - \mu_{x,j})^2}{2\sigma_x^2}
//!               -\frac{(y_j - \mu_{y,j})^2}{2\sigma_y^2}\right)
//! $$
//!
//! evaluated in a saturating form that protects against double-precision underflow.
//! See [`particle::ParticleFilter::update_weights`] for the full contract.

pub mod measurements;
pub mod particle;
pub mod sim;

use nalgebra::Vector3;
use std::fmt::{self, Debug, Display};

/// Yaw rates with magnitude below this threshold are treated as straight-line motion
/// to avoid the 0/0 singularity of the arc-motion closed form.
pub const YAW_RATE_EPSILON: f64 = 1e-4;

/// Compute the Euclidean distance between two points in the plane.
///
/// # Example
/// ```rust
/// use mcl::distance;
/// let d = distance(0.0, 0.0, 3.0, 4.0);
/// assert_eq!(d, 5.0);
/// ```
pub fn distance(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt()
}

/// Planar pose of the vehicle: world-frame position in meters plus heading in radians.
///
/// Heading is measured counter-clockwise from the world x-axis and is not wrapped into
/// a canonical range by any operation in this crate.
#[derive(Clone, Copy, Default, PartialEq)]
pub struct Pose {
    /// World-frame x position in meters
    pub x: f64,
    /// World-frame y position in meters
    pub y: f64,
    /// Heading in radians, unbounded
    pub theta: f64,
}

impl Debug for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.3} m, y: {:.3} m, theta: {:.2} deg }}",
            self.x,
            self.y,
            self.theta.to_degrees()
        )
    }
}

impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4}, {:.4})", self.x, self.y, self.theta)
    }
}

impl Pose {
    /// Create a new pose from world-frame coordinates and heading.
    pub fn new(x: f64, y: f64, theta: f64) -> Pose {
        Pose { x, y, theta }
    }

    /// Convert the pose to a fixed-size nalgebra vector `[x, y, theta]`.
    ///
    /// # Example
    /// ```rust
    /// use mcl::Pose;
    /// let v = Pose::new(1.0, 2.0, 0.5).to_vector();
    /// assert_eq!(v[2], 0.5);
    /// ```
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.theta)
    }

    /// Convert the pose to a `Vec<f64>` in `[x, y, theta]` order.
    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.x, self.y, self.theta]
    }

    /// Transform a sensor-frame point into the world frame under this pose.
    ///
    /// Applies the 2D rigid-body rotate-then-translate transform (rotation by the
    /// heading followed by translation to the pose position). Each particle applies
    /// its own transform because each represents a hypothesized pose.
    ///
    /// # Arguments
    /// * `x_obs` - Sensor-frame x coordinate of the point (meters, forward positive).
    /// * `y_obs` - Sensor-frame y coordinate of the point (meters, left positive).
    ///
    /// # Returns
    /// * The `(x, y)` world-frame coordinates of the point.
    ///
    /// # Example
    /// ```rust
    /// use mcl::Pose;
    /// use std::f64::consts::FRAC_PI_2;
    ///
    /// let pose = Pose::new(4.0, 5.0, -FRAC_PI_2);
    /// let (x_w, y_w) = pose.transform_to_world(2.0, 2.0);
    /// assert!((x_w - 6.0).abs() < 1e-12);
    /// assert!((y_w - 3.0).abs() < 1e-12);
    /// ```
    pub fn transform_to_world(&self, x_obs: f64, y_obs: f64) -> (f64, f64) {
        let (sin_theta, cos_theta) = self.theta.sin_cos();
        (
            self.x + x_obs * cos_theta - y_obs * sin_theta,
            self.y + x_obs * sin_theta + y_obs * cos_theta,
        )
    }
}

impl TryFrom<&[f64]> for Pose {
    type Error = &'static str;
    /// Attempts to create a Pose from a slice of 3 elements in `[x, y, theta]` order.
    fn try_from(slice: &[f64]) -> Result<Self, Self::Error> {
        if slice.len() != 3 {
            return Err("Slice must have length 3 for Pose");
        }
        Ok(Pose::new(slice[0], slice[1], slice[2]))
    }
}

impl From<Pose> for Vector3<f64> {
    fn from(pose: Pose) -> Self {
        pose.to_vector()
    }
}

/// Commanded planar motion for one timestep: forward velocity and yaw rate.
///
/// The command is expressed in the body frame of the vehicle. This crate is not a
/// motor controller or odometry driver; the command is assumed to be pre-processed
/// and ready for use in the motion model equations.
#[derive(Clone, Copy, Debug, Default)]
pub struct Control {
    /// Forward velocity in m/s
    pub velocity: f64,
    /// Yaw rate in rad/s, counter-clockwise positive
    pub yaw_rate: f64,
}

impl Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Control {{ velocity: {:.4} m/s, yaw_rate: {:.4} rad/s }}",
            self.velocity, self.yaw_rate
        )
    }
}

impl Control {
    /// Create a new control input from a forward velocity and a yaw rate.
    pub fn new(velocity: f64, yaw_rate: f64) -> Control {
        Control { velocity, yaw_rate }
    }
}

/// Deterministic forward propagation of a pose under the velocity motion model.
///
/// This is the noise-free part of the prediction step, shared by every particle. When
/// the yaw rate magnitude is below [`YAW_RATE_EPSILON`] the straight-line form is used;
/// otherwise the closed-form arc update applies. The heading is left unwrapped.
///
/// # Arguments
/// * `state` - The pose to propagate in place.
/// * `control` - The commanded velocity and yaw rate over the interval.
/// * `dt` - The time step in seconds.
///
/// # Example
/// ```rust
/// use mcl::{forward, Control, Pose};
///
/// let mut pose = Pose::new(0.0, 0.0, 0.0);
/// forward(&mut pose, &Control::new(1.0, 0.0), 1.0);
/// assert!((pose.x - 1.0).abs() < 1e-12);
/// assert_eq!(pose.theta, 0.0);
/// ```
pub fn forward(state: &mut Pose, control: &Control, dt: f64) {
    let theta = state.theta;
    if control.yaw_rate.abs() < YAW_RATE_EPSILON {
        state.x += control.velocity * dt * theta.cos();
        state.y += control.velocity * dt * theta.sin();
    } else {
        let radius = control.velocity / control.yaw_rate;
        let theta_new = theta + control.yaw_rate * dt;
        state.x += radius * (theta_new.sin() - theta.sin());
        state.y += radius * (theta.cos() - theta_new.cos());
        state.theta = theta_new;
    }
}

/// Errors surfaced by the filter operations.
///
/// Precondition violations are fatal to the current call only; the particle set is
/// left untouched. [`FilterError::DegenerateWeights`] is a recoverable condition
/// signalling that the sensor model produced no informative mass for any particle
/// (for instance, no landmarks in range of any hypothesis); the prior weights are
/// retained rather than propagating NaN into the particle set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterError {
    /// An operation other than `initialize` was called before initialization.
    NotInitialized,
    /// `initialize` was called twice without an intervening reset.
    AlreadyInitialized,
    /// A noise, range, or time-step parameter was out of domain. The payload names
    /// the offending parameter.
    InvalidParameter(&'static str),
    /// Every unnormalized weight underflowed to zero; normalization was skipped and
    /// the prior weights retained.
    DegenerateWeights,
}

impl Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::NotInitialized => {
                write!(f, "filter operation called before initialize")
            }
            FilterError::AlreadyInitialized => {
                write!(f, "initialize called twice without reset")
            }
            FilterError::InvalidParameter(name) => {
                write!(f, "parameter out of domain: {}", name)
            }
            FilterError::DegenerateWeights => {
                write!(f, "all particle weights underflowed to zero; prior weights retained")
            }
        }
    }
}

impl std::error::Error for FilterError {}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_distance() {
        assert_approx_eq!(distance(0.0, 0.0, 3.0, 4.0), 5.0, 1e-12);
        assert_approx_eq!(distance(-1.0, -1.0, -1.0, -1.0), 0.0, 1e-12);
    }

    #[test]
    fn test_pose_to_vector() {
        let pose = Pose::new(1.0, -2.0, 0.25);
        let v = pose.to_vector();
        assert_eq!(v, Vector3::new(1.0, -2.0, 0.25));
        assert_eq!(pose.to_vec(), vec![1.0, -2.0, 0.25]);
    }

    #[test]
    fn test_pose_try_from() {
        let pose = Pose::try_from([1.0, 2.0, 3.0].as_slice()).unwrap();
        assert_eq!(pose, Pose::new(1.0, 2.0, 3.0));
        assert!(Pose::try_from([1.0, 2.0].as_slice()).is_err());
    }

    #[test]
    fn test_transform_to_world() {
        // Classic worked example: vehicle at (4, 5) facing -90 degrees sees a point
        // two ahead and two to the left.
        let pose = Pose::new(4.0, 5.0, -FRAC_PI_2);
        let (x_w, y_w) = pose.transform_to_world(2.0, 2.0);
        assert_approx_eq!(x_w, 6.0, 1e-9);
        assert_approx_eq!(y_w, 3.0, 1e-9);
    }

    #[test]
    fn test_transform_identity_heading() {
        let pose = Pose::new(1.0, 1.0, 0.0);
        let (x_w, y_w) = pose.transform_to_world(5.0, 0.0);
        assert_approx_eq!(x_w, 6.0, 1e-12);
        assert_approx_eq!(y_w, 1.0, 1e-12);
    }

    #[test]
    fn test_forward_straight_line() {
        let mut pose = Pose::new(0.0, 0.0, 0.0);
        forward(&mut pose, &Control::new(1.0, 0.0), 1.0);
        assert_approx_eq!(pose.x, 1.0, 1e-12);
        assert_approx_eq!(pose.y, 0.0, 1e-12);
        assert_eq!(pose.theta, 0.0);
    }

    #[test]
    fn test_forward_straight_line_heading() {
        let mut pose = Pose::new(2.0, 3.0, FRAC_PI_2);
        forward(&mut pose, &Control::new(2.0, 0.0), 0.5);
        assert_approx_eq!(pose.x, 2.0, 1e-12);
        assert_approx_eq!(pose.y, 4.0, 1e-12);
        assert_approx_eq!(pose.theta, FRAC_PI_2, 1e-12);
    }

    #[test]
    fn test_forward_arc_quarter_turn() {
        // One second at pi/2 rad/s on a unit-radius arc: the vehicle ends up at
        // (r, r) having turned 90 degrees.
        let omega = FRAC_PI_2;
        let v = omega; // radius v / omega = 1
        let mut pose = Pose::new(0.0, 0.0, 0.0);
        forward(&mut pose, &Control::new(v, omega), 1.0);
        assert_approx_eq!(pose.x, 1.0, 1e-9);
        assert_approx_eq!(pose.y, 1.0, 1e-9);
        assert_approx_eq!(pose.theta, FRAC_PI_2, 1e-12);
    }

    #[test]
    fn test_forward_continuity_at_epsilon() {
        // The arc form just above the threshold must agree with the straight-line
        // form to within the truncation error of the arc expansion.
        let mut straight = Pose::new(0.0, 0.0, 0.3);
        let mut curved = Pose::new(0.0, 0.0, 0.3);
        forward(&mut straight, &Control::new(5.0, 0.0), 1.0);
        forward(&mut curved, &Control::new(5.0, YAW_RATE_EPSILON * 1.001), 1.0);
        assert_approx_eq!(straight.x, curved.x, 1e-3);
        assert_approx_eq!(straight.y, curved.y, 1e-3);
        assert_approx_eq!(straight.theta, curved.theta, 1.1e-4);
    }

    #[test]
    fn test_forward_zero_dt() {
        let mut pose = Pose::new(1.0, 2.0, 0.7);
        let before = pose;
        forward(&mut pose, &Control::new(3.0, 1.0), 0.0);
        assert_approx_eq!(pose.x, before.x, 1e-12);
        assert_approx_eq!(pose.y, before.y, 1e-12);
        assert_approx_eq!(pose.theta, before.theta, 1e-12);
    }

    #[test]
    fn test_filter_error_display() {
        assert_eq!(
            FilterError::NotInitialized.to_string(),
            "filter operation called before initialize"
        );
        assert_eq!(
            FilterError::InvalidParameter("delta_t").to_string(),
            "parameter out of domain: delta_t"
        );
    }
}
