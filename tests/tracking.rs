// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end tracking scenarios on synthetic RGB-D frames.
//!
//! A smooth analytic intensity field stands in for the scene, so a frame
//! observed after a pure camera x-translation at constant depth is exactly
//! the same field shifted in pixels (u_w = u + fx * tx / d).

use dvo_rs::core::track::photometric::{Accumulation, Config, Tracker};
use dvo_rs::misc::type_aliases::{Float, Mat3, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WIDTH: usize = 64;
const HEIGHT: usize = 48;
const FX: Float = 50.0;
const FY: Float = 50.0;

fn intrinsics() -> Mat3 {
    Mat3::new(FX, 0.0, 31.5, 0.0, FY, 23.5, 0.0, 0.0, 1.0)
}

/// Smooth scene texture with structure along both axes.
fn scene(x: Float, y: Float) -> Float {
    0.5 + 0.22 * (0.25 * x + 0.3).sin()
        + 0.14 * (0.18 * y - 0.2).cos()
        + 0.09 * (0.11 * x + 0.14 * y).sin()
}

/// Render the scene shifted right by `shift` pixels.
fn render(shift: Float) -> Vec<Float> {
    (0..WIDTH * HEIGHT)
        .map(|i| scene((i % WIDTH) as Float - shift, (i / WIDTH) as Float))
        .collect()
}

fn constant_depth(value: Float) -> Vec<Float> {
    vec![value; WIDTH * HEIGHT]
}

fn small_pyramid_config() -> Config {
    let mut config = Config::new(WIDTH, HEIGHT, intrinsics());
    config.max_level = 2;
    config
}

fn shift_tracker(shift: Float, config: Config) -> Tracker {
    let depth = constant_depth(1.0);
    let mut tracker = config.init(&render(0.0), &depth).unwrap();
    tracker.align(&render(shift), &depth).unwrap();
    tracker
}

#[test]
fn aligning_a_frame_with_itself_stays_still() {
    let gray = render(0.0);
    let depth = constant_depth(1.0);
    let mut tracker = Config::new(WIDTH, HEIGHT, intrinsics())
        .init(&gray, &depth)
        .unwrap();
    let xi = tracker.align(&gray, &depth).unwrap();
    for i in 0..6 {
        assert!(xi[i].abs() < 1e-3, "pose drifted: {}", xi);
    }
}

#[test]
fn identity_alignment_stays_below_the_noise_floor() {
    let gray = render(0.0);
    let depth = constant_depth(1.0);
    let mut tracker = small_pyramid_config().init(&gray, &depth).unwrap();
    let xi = tracker.align(&gray, &depth).unwrap();
    assert!(xi.norm() < 1e-4, "pose drifted: {}", xi);
}

#[test]
fn one_pixel_shift_recovers_the_x_translation() {
    let tracker = shift_tracker(1.0, small_pyramid_config());
    let xi = tracker.relative_twist();
    // One pixel at 1 m depth is 1/fx meters of camera-frame translation.
    let expected = 1.0 / FX;
    assert!(xi[0] > 0.0, "wrong sign: {}", xi[0]);
    assert!(
        (xi[0] - expected).abs() <= 0.2 * expected,
        "tx = {}, expected {}",
        xi[0],
        expected
    );
    // The accumulated pose follows the inverse-incremental convention.
    let pose = tracker.pose();
    assert!((pose[0] + expected).abs() <= 0.2 * expected);
}

#[test]
fn pure_translation_is_recovered_within_five_percent() {
    // 3 px is just under 5% of the image width.
    let shift = 3.0;
    let tracker = shift_tracker(shift, small_pyramid_config());
    let xi = tracker.relative_twist();
    let t_est = Vec3::new(xi[0], xi[1], xi[2]);
    let t_true = Vec3::new(shift / FX, 0.0, 0.0);
    let relative_error = (t_est - t_true).norm() / t_true.norm();
    assert!(
        relative_error < 0.05,
        "t_est = {:?}, relative error {}",
        t_est,
        relative_error
    );
}

#[test]
fn forward_accumulation_flips_the_convention() {
    let mut config = small_pyramid_config();
    config.accumulation = Accumulation::ForwardIncremental;
    let tracker = shift_tracker(1.0, config);
    // With forward accumulation the first pose equals the inter-frame twist.
    let diff = tracker.pose() - tracker.relative_twist();
    assert!(diff.norm() < 1e-6);
}

#[test]
fn frames_without_depth_leave_the_pose_untouched() {
    let depth = constant_depth(1.0);
    let no_depth = vec![0.0; WIDTH * HEIGHT];
    let mut tracker = small_pyramid_config().init(&render(0.0), &depth).unwrap();

    // Warm the tracker with real motion so the inter-frame twist and the
    // accumulated pose are both far from identity.
    tracker.align(&render(2.0), &depth).unwrap();
    assert!(tracker.relative_twist().norm() > 1e-3);

    // A frame without depth still aligns against the previous, depth-bearing
    // reference; it only starves the call after it.
    let before = tracker.align(&render(3.0), &no_depth).unwrap();
    assert!(before.norm() > 1e-3);
    assert!(tracker.relative_twist().norm() > 1e-3);

    // Aligning against a reference with no usable depth is fully degenerate:
    // the returned pose is bit-exactly the previous one even though the
    // warm-started twist is not identity.
    let after = tracker.align(&render(4.0), &depth).unwrap();
    assert_eq!(before, after);
    assert_eq!(before, tracker.pose());

    // The warm start survives the degenerate frame, and tracking resumes
    // once a depth-bearing reference is back.
    assert!(tracker.relative_twist().norm() > 1e-3);
    let recovered = tracker.align(&render(5.0), &depth).unwrap();
    assert!((recovered - after).norm() > 1e-3);
}

#[test]
fn per_level_errors_decrease_until_the_stop_ratio() {
    let tracker = shift_tracker(3.0, small_pyramid_config());
    for level_stats in tracker.last_stats().levels.iter() {
        let errors = &level_stats.errors;
        // Every recorded error but the last must have improved enough to
        // keep the level iterating.
        for i in 0..errors.len().saturating_sub(2) {
            assert!(
                errors[i + 1] <= errors[i],
                "error rose at level {}: {:?}",
                level_stats.level,
                errors
            );
        }
    }
}

#[test]
fn outliers_are_tolerated_and_tamed_by_tdist_weights() {
    let shift = 2.0;
    let expected = shift / FX;
    let depth = constant_depth(1.0);
    let mut corrupted = render(shift);
    let mut rng = StdRng::seed_from_u64(17);
    let nb_outliers = WIDTH * HEIGHT / 100;
    for _ in 0..nb_outliers {
        let idx = rng.gen_range(0..WIDTH * HEIGHT);
        corrupted[idx] = if rng.gen_bool(0.5) { 1.0 } else { 0.0 };
    }

    for (use_tdist, tolerance) in [(false, 0.15), (true, 0.08)] {
        let mut config = small_pyramid_config();
        config.use_tdist_weights = use_tdist;
        let mut tracker = config.init(&render(0.0), &depth).unwrap();
        tracker.align(&corrupted, &depth).unwrap();
        let xi = tracker.relative_twist();
        let relative_error = (xi[0] - expected).abs() / expected;
        assert!(
            relative_error < tolerance,
            "tdist = {}: tx = {}, relative error {}",
            use_tdist,
            xi[0],
            relative_error
        );
    }
}

#[test]
fn warm_starts_do_not_cost_iterations_on_slow_motion() {
    let depth = constant_depth(1.0);
    let nb_pairs = 6;
    let frames: Vec<Vec<Float>> = (0..=nb_pairs)
        .map(|k| render(0.4 * k as Float))
        .collect();

    let mut warm_iterations = Vec::new();
    let mut warm = small_pyramid_config().init(&frames[0], &depth).unwrap();
    for frame in frames.iter().skip(1) {
        warm.align(frame, &depth).unwrap();
        warm_iterations.push(warm.last_stats().total_iterations());
    }

    let mut cold_iterations = Vec::new();
    for pair in frames.windows(2) {
        let mut cold = small_pyramid_config().init(&pair[0], &depth).unwrap();
        cold.align(&pair[1], &depth).unwrap();
        cold_iterations.push(cold.last_stats().total_iterations());
    }

    assert!(
        median(&mut warm_iterations) <= median(&mut cold_iterations),
        "warm {:?} vs cold {:?}",
        warm_iterations,
        cold_iterations
    );
}

fn median(values: &mut [usize]) -> usize {
    values.sort_unstable();
    values[values.len() / 2]
}
