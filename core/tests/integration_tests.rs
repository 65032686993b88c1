//! Integration tests for the landmark localization filter.
//!
//! These exercise the full predict / update / resample cycle through the public API,
//! including the degenerate no-noise scenarios that pin down the motion and
//! measurement models exactly.

use assert_approx_eq::assert_approx_eq;

use mcl::measurements::{Landmark, LandmarkObservation, Map};
use mcl::particle::{FilterConfig, ParticleFilter, multinomial_resample_indices};
use mcl::{Control, Pose, forward};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn filter_with(num_particles: usize, seed: u64) -> ParticleFilter {
    ParticleFilter::new(FilterConfig {
        num_particles,
        seed,
        ..FilterConfig::default()
    })
}

#[test]
fn degenerate_init_and_straight_predict() {
    // No-noise initialization collapses every particle onto the estimate; a
    // noise-free straight-line predict then moves the whole set one meter forward.
    let mut pf = filter_with(5, 1);
    pf.initialize(0.0, 0.0, 0.0, &[0.0, 0.0, 0.0]).unwrap();
    assert_eq!(pf.num_particles(), 5);
    for p in pf.particles() {
        assert_eq!(p.pose, Pose::new(0.0, 0.0, 0.0));
    }
    pf.predict(1.0, &[0.0, 0.0, 0.0], &Control::new(1.0, 0.0)).unwrap();
    for p in pf.particles() {
        assert_approx_eq!(p.pose.x, 1.0, 1e-12);
        assert_approx_eq!(p.pose.y, 0.0, 1e-12);
        assert_eq!(p.pose.theta, 0.0);
    }
}

#[test]
fn single_landmark_single_particle_scenario() {
    // One particle at the origin observing one landmark dead ahead: the transformed
    // observation coincides with the landmark, and the lone particle carries the
    // whole normalized weight.
    let mut pf = filter_with(1, 1);
    pf.initialize(0.0, 0.0, 0.0, &[0.0, 0.0, 0.0]).unwrap();
    let map = Map::new(vec![Landmark { id: 17, x: 5.0, y: 0.0 }]);
    let observations = vec![LandmarkObservation::new(5.0, 0.0)];
    pf.update_weights(10.0, &[0.3, 0.3], &observations, &map).unwrap();

    let p = &pf.particles()[0];
    assert_eq!(p.weight, 1.0);
    assert_eq!(p.associations(), &[17]);
    assert_approx_eq!(p.sensed_x()[0], 5.0, 1e-12);
    assert_approx_eq!(p.sensed_y()[0], 0.0, 1e-12);
}

#[test]
fn weights_normalize_across_spread_particles() {
    let mut pf = filter_with(100, 5);
    pf.initialize(0.0, 0.0, 0.0, &[1.0, 1.0, 0.2]).unwrap();
    let map = Map::new(vec![
        Landmark { id: 1, x: 5.0, y: 0.0 },
        Landmark { id: 2, x: 0.0, y: 5.0 },
    ]);
    let observations = vec![
        LandmarkObservation::new(5.0, 0.0),
        LandmarkObservation::new(0.0, 5.0),
    ];
    pf.update_weights(50.0, &[0.3, 0.3], &observations, &map).unwrap();
    let total: f64 = pf.weights().iter().sum();
    assert_approx_eq!(total, 1.0, 1e-9);
}

#[test]
fn resample_collapse_is_seed_independent() {
    // A single dominant weight collapses the set deterministically, whatever the
    // random sequence produces.
    for seed in [0, 1, 7, 12345] {
        let mut pf = filter_with(20, seed);
        pf.initialize(0.0, 0.0, 0.0, &[1.0, 1.0, 0.2]).unwrap();
        for p in pf.particles_mut() {
            p.weight = if p.id == 13 { 1.0 } else { 0.0 };
        }
        pf.resample().unwrap();
        assert!(pf.particles().iter().all(|p| p.id == 13));
    }
}

#[test]
fn multinomial_draws_are_approximately_uniform() {
    // Under uniform weights the empirical distribution of drawn indices approaches
    // uniform. 100k draws over 10 slots: expected 10k per slot, binomial standard
    // deviation ~95, so a 600-count tolerance sits well past five sigma.
    let mut rng = StdRng::seed_from_u64(99);
    let weights = vec![0.1; 10];
    let indices = multinomial_resample_indices(&weights, 100_000, &mut rng);
    let mut counts = [0usize; 10];
    for i in indices {
        counts[i] += 1;
    }
    for count in counts {
        assert!(
            (count as i64 - 10_000).abs() < 600,
            "slot count {} strays too far from uniform",
            count
        );
    }
}

#[test]
fn closed_loop_tracking_stays_near_truth() {
    // Drive straight through a corridor of landmarks with realistic noise levels
    // and a seeded filter; the weighted-mean estimate should hug the true pose.
    let map = Map::new(vec![
        Landmark { id: 1, x: 2.0, y: 2.0 },
        Landmark { id: 2, x: 4.0, y: -2.0 },
        Landmark { id: 3, x: 6.0, y: 2.0 },
        Landmark { id: 4, x: 8.0, y: -2.0 },
        Landmark { id: 5, x: 10.0, y: 2.0 },
    ]);
    let sigma_pos = [0.3, 0.3, 0.01];
    let sigma_landmark = [0.3, 0.3];
    let control = Control::new(1.0, 0.0);
    let delta_t = 0.5;

    let mut pf = filter_with(500, 42);
    pf.initialize(0.0, 0.0, 0.0, &sigma_pos).unwrap();
    let mut truth = Pose::new(0.0, 0.0, 0.0);
    for _ in 0..10 {
        forward(&mut truth, &control, delta_t);
        pf.predict(delta_t, &sigma_pos, &control).unwrap();

        // Noise-free detections of every in-range landmark, expressed in the body
        // frame of the true pose (heading is zero throughout, so the inverse
        // transform is a pure translation).
        let observations: Vec<LandmarkObservation> = map
            .landmarks_in_range(truth.x, truth.y, 10.0)
            .iter()
            .map(|lm| LandmarkObservation::new(lm.x - truth.x, lm.y - truth.y))
            .collect();
        assert!(!observations.is_empty());

        pf.update_weights(10.0, &sigma_landmark, &observations, &map).unwrap();
        pf.resample().unwrap();
    }
    let estimate = pf.estimate();
    assert!(
        (estimate.x - truth.x).abs() < 1.0,
        "x estimate {:.3} strayed from truth {:.3}",
        estimate.x,
        truth.x
    );
    assert!((estimate.y - truth.y).abs() < 1.0);
    assert!((estimate.theta - truth.theta).abs() < 0.5);
}

#[test]
fn empty_observation_pass_keeps_uniform_weights() {
    // A pass with no detections carries no information: every particle receives the
    // empty-product weight and normalization leaves the set uniform.
    let mut pf = filter_with(8, 3);
    pf.initialize(0.0, 0.0, 0.0, &[0.5, 0.5, 0.1]).unwrap();
    let map = Map::new(vec![Landmark { id: 1, x: 3.0, y: 3.0 }]);
    pf.update_weights(50.0, &[0.3, 0.3], &[], &map).unwrap();
    for p in pf.particles() {
        assert_approx_eq!(p.weight, 1.0 / 8.0, 1e-12);
    }
    pf.resample().unwrap();
    assert_eq!(pf.num_particles(), 8);
}
