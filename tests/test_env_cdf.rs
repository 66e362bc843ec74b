//! Environment importance sampling: table normalization, sampling
//! distribution and the asynchronous build inside a pipeline

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec4;
use pathforge::lighting::env_cdf::weighted_luminance;
use pathforge::lighting::{load_environment, EnvironmentCdf};
use pathforge::pipeline::{keys, Pipeline, PipelineEvent, ResetReason};
use pathforge::{EnvironmentStage, FloatImage};

/// Deterministic noisy environment map
fn noisy_environment(width: u32, height: u32, seed: u64) -> FloatImage {
    let mut rng_state = seed;
    let mut simple_rand = || {
        rng_state = rng_state.wrapping_mul(1103515245).wrapping_add(12345);
        ((rng_state / 65536) % 1024) as f32 / 1024.0
    };
    let mut env = FloatImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let v = simple_rand() * 4.0;
            env.set(x, y, Vec4::new(v, v * 0.5, v * 0.25, 1.0));
        }
    }
    env
}

#[test]
fn test_every_row_normalized() {
    let env = noisy_environment(64, 32, 7);
    let cdf = EnvironmentCdf::build(&env).unwrap();
    let s = cdf.size();
    assert_eq!(s, 64);
    for y in 0..s {
        let (last, _) = cdf.conditional(s - 1, y);
        assert!((last - 1.0).abs() < 1e-5, "row {} ends at {}", y, last);
        let mut prev = 0.0;
        for x in 0..s {
            let (c, p) = cdf.conditional(x, y);
            assert!(c >= prev - 1e-6, "row {} not monotonic at {}", y, x);
            assert!(p >= 0.0);
            prev = c;
        }
    }
    assert!((cdf.marginal(s - 1).0 - 1.0).abs() < 1e-5);
    let mass: f32 = (0..s).map(|y| cdf.marginal(y).1).sum();
    assert!((mass - 1.0).abs() < 1e-4);
}

#[test]
fn test_zero_rows_never_nan() {
    let mut env = noisy_environment(16, 16, 3);
    for x in 0..16 {
        env.set(x, 5, Vec4::ZERO);
        env.set(x, 6, Vec4::new(f32::NAN, 0.0, 0.0, 1.0));
    }
    let cdf = EnvironmentCdf::build(&env).unwrap();
    assert!(!cdf.texture().has_non_finite());
    for x in 0..16 {
        assert_eq!(cdf.conditional(x, 5), (0.0, 0.0));
        assert_eq!(cdf.conditional(x, 6), (0.0, 0.0));
    }
    // Zero-energy rows are never picked
    for i in 0..200 {
        let u = i as f32 / 200.0;
        let (uv, pdf) = cdf.sample(0.5, u);
        let row = (uv.y * 16.0) as u32;
        assert!(row != 5 && row != 6);
        assert!(pdf > 0.0);
    }
}

#[test]
fn test_sampling_follows_luminance() {
    // Two bright quadrants, one ten times brighter than the other
    let mut env = FloatImage::filled(8, 8, Vec4::new(0.0, 0.0, 0.0, 1.0));
    for y in 0..4 {
        for x in 0..4 {
            env.set(x, y, Vec4::splat(1.0));
            env.set(x + 4, y + 4, Vec4::splat(10.0));
        }
    }
    let cdf = EnvironmentCdf::build(&env).unwrap();
    let weights = weighted_luminance(&env);
    let dim: f32 = (0..4).flat_map(|y| (0..4).map(move |x| (x, y))).map(|(x, y)| weights[y * 8 + x]).sum();
    let bright: f32 = (4..8).flat_map(|y| (4..8).map(move |x| (x, y))).map(|(x, y)| weights[y * 8 + x]).sum();
    let expected = bright / (dim + bright);

    let mut rng_state = 99u64;
    let mut simple_rand = || {
        rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (rng_state >> 40) as f32 / (1u64 << 24) as f32
    };
    let n = 20_000;
    let mut in_bright = 0;
    for _ in 0..n {
        let (uv, pdf) = cdf.sample(simple_rand(), simple_rand());
        assert!(pdf > 0.0);
        assert!((cdf.pdf(uv) - pdf).abs() < 1e-3 * pdf.max(1.0));
        if uv.x >= 0.5 && uv.y >= 0.5 {
            in_bright += 1;
        } else {
            assert!(uv.x < 0.5 && uv.y < 0.5, "sampled a black cell at {:?}", uv);
        }
    }
    let observed = in_bright as f32 / n as f32;
    assert!(
        (observed - expected).abs() < 0.02,
        "bright fraction {} vs expected {}",
        observed,
        expected
    );
}

#[test]
fn test_load_environment_from_png() {
    let path = std::env::temp_dir().join(format!("pathforge-env-{}.png", std::process::id()));
    let mut img = image::RgbImage::new(8, 4);
    img.put_pixel(6, 2, image::Rgb([255, 255, 255]));
    img.save(&path).unwrap();

    let env = load_environment(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(env.size(), (8, 4));
    assert!((env.get(6, 2).x - 1.0).abs() < 1e-6);

    let cdf = EnvironmentCdf::build(&env).unwrap();
    let (uv, _) = cdf.sample(0.1, 0.9);
    assert_eq!(((uv.x * 8.0) as u32, (uv.y * 8.0) as u32 / 2), (6, 2));
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(load_environment("/nonexistent/pathforge/env.hdr").is_err());
}

#[test]
fn test_stage_publishes_tables_asynchronously() {
    let mut pipeline = Pipeline::new(4, 4);
    pipeline.add_stage(Box::new(EnvironmentStage::new())).unwrap();

    let resets = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = resets.clone();
    pipeline.subscribe(
        pathforge::pipeline::EventKind::AccumulationReset,
        Box::new(move |e| sink.borrow_mut().push(e.clone())),
    );

    pipeline.render_frame();
    assert!(!pipeline.context().has_image(keys::ENVIRONMENT_CDF));

    pipeline.publish(PipelineEvent::EnvironmentLoaded(Arc::new(noisy_environment(32, 16, 11))));
    let deadline = Instant::now() + Duration::from_secs(10);
    while !pipeline.context().has_image(keys::ENVIRONMENT_CDF) {
        assert!(Instant::now() < deadline, "CDF build never landed");
        pipeline.render_frame();
        std::thread::sleep(Duration::from_millis(1));
    }

    let ctx = pipeline.context();
    assert_eq!(ctx.int_state(keys::ENVIRONMENT_CDF_SIZE), Some(32));
    assert_eq!(ctx.image(keys::ENVIRONMENT_CDF).unwrap().size(), (32, 33));
    assert!(ctx.has_image(keys::ENVIRONMENT_MAP));
    assert_eq!(
        resets.borrow().as_slice(),
        &[PipelineEvent::AccumulationReset {
            reason: ResetReason::EnvironmentChanged
        }]
    );
}
