//! Tests for the temporal-spatial denoiser
//!
//! Validates:
//! - Invalid or off-screen reprojection yields exactly the current color with history 1
//! - Valid reprojection grows history up to the cap
//! - The filter reduces noise on flat regions without bleeding across geometry edges
//! - Tiled intermediate frames run the spatial-only path

use glam::Vec4;
use pathforge::denoise::svgf::motion::INVALID_MOTION;
use pathforge::denoise::svgf::temporal::{temporal_accumulate, TemporalInputs};
use pathforge::denoise::{DenoisePath, DenoiserStage, SvgfParams};
use pathforge::path_tracing::RenderMode;
use pathforge::pipeline::{keys, PipelineContext, Stage, StateValue};
use pathforge::FloatImage;

/// Generate a noisy gray image around `base`
fn generate_noisy_image(width: u32, height: u32, base: f32, amplitude: f32, seed: u64) -> FloatImage {
    let mut rng_state = seed;
    let mut simple_rand = || {
        rng_state = rng_state.wrapping_mul(1103515245).wrapping_add(12345);
        ((rng_state / 65536) % 256) as f32 / 255.0
    };
    let mut img = FloatImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let v = (base + (simple_rand() - 0.5) * 2.0 * amplitude).max(0.0);
            img.set(x, y, Vec4::new(v, v, v, 1.0));
        }
    }
    img
}

/// Luminance variance over a rectangle
fn region_variance(img: &FloatImage, x0: u32, x1: u32, y0: u32, y1: u32) -> f32 {
    let values: Vec<f32> = (y0..y1)
        .flat_map(|y| (x0..x1).map(move |x| (x, y)))
        .map(|(x, y)| img.luminance_at(x, y))
        .collect();
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n
}

fn flat_normal_depth(width: u32, height: u32) -> FloatImage {
    FloatImage::filled(width, height, Vec4::new(0.0, 0.0, 1.0, 3.0))
}

#[test]
fn test_invalid_reprojection_returns_current_color_exactly() {
    let (w, h) = (8u32, 8u32);
    let color = generate_noisy_image(w, h, 0.4, 0.3, 5);
    let nd = flat_normal_depth(w, h);

    // Previous buffers full of garbage, which must never be read through
    let mut prev_color = generate_noisy_image(w, h, 50.0, 40.0, 9);
    prev_color.set(3, 3, Vec4::splat(f32::NAN));
    prev_color.set(4, 4, Vec4::splat(f32::INFINITY));
    let prev_nd = flat_normal_depth(w, h);
    let prev_history = vec![17.0; (w * h) as usize];

    let mut motion = FloatImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let m = match (x + y) % 4 {
                0 => Vec4::new(INVALID_MOTION, INVALID_MOTION, 0.0, 0.0),
                1 => Vec4::new(0.0, INVALID_MOTION * 3.0, 0.0, 0.0),
                2 => Vec4::new(1.5, 0.0, 0.0, 1.0),
                _ => Vec4::new(-0.2, -1.2, 0.0, 1.0),
            };
            motion.set(x, y, m);
        }
    }

    let inputs = TemporalInputs {
        color: &color,
        normal_depth: &nd,
        motion: &motion,
        prev_color: &prev_color,
        prev_normal_depth: &prev_nd,
        prev_history: &prev_history,
    };
    let mut out = FloatImage::filled(w, h, Vec4::splat(-1.0));
    let mut history = vec![0.0; (w * h) as usize];
    temporal_accumulate(&inputs, None, true, &SvgfParams::default(), &mut out, &mut history).unwrap();

    assert_eq!(out.texels(), color.texels());
    assert!(history.iter().all(|&l| l == 1.0));
}

#[test]
fn test_valid_reprojection_grows_history_to_cap() {
    let (w, h) = (4u32, 4u32);
    let color = FloatImage::filled(w, h, Vec4::new(0.5, 0.5, 0.5, 1.0));
    let nd = flat_normal_depth(w, h);
    let motion = FloatImage::filled(w, h, Vec4::new(0.0, 0.0, 0.0, 1.0));
    let params = SvgfParams {
        max_accum_frames: 8,
        ..SvgfParams::default()
    };

    let mut prev_color = color.clone();
    let mut prev_history = vec![1.0; (w * h) as usize];
    for expected in 2..=12u32 {
        let inputs = TemporalInputs {
            color: &color,
            normal_depth: &nd,
            motion: &motion,
            prev_color: &prev_color,
            prev_normal_depth: &nd,
            prev_history: &prev_history,
        };
        let mut out = FloatImage::new(w, h);
        let mut history = vec![0.0; (w * h) as usize];
        temporal_accumulate(&inputs, None, true, &params, &mut out, &mut history).unwrap();
        assert_eq!(history[5], expected.min(8) as f32);
        prev_color = out;
        prev_history = history;
    }
}

#[test]
fn test_stage_reduces_noise_and_keeps_edges() {
    let (w, h) = (32u32, 32u32);
    let mut ctx = PipelineContext::new(w, h);
    let mut stage = DenoiserStage::new(SvgfParams::default(), w, h).unwrap();

    // Left half faces +Z at depth 3, right half faces +X at depth 9
    let mut nd = FloatImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let t = if x < w / 2 {
                Vec4::new(0.0, 0.0, 1.0, 3.0)
            } else {
                Vec4::new(1.0, 0.0, 0.0, 9.0)
            };
            nd.set(x, y, t);
        }
    }

    let mut last_input = FloatImage::new(w, h);
    for seed in 0..4u64 {
        let mut color = generate_noisy_image(w, h, 0.3, 0.2, 100 + seed);
        for y in 0..h {
            for x in w / 2..w {
                let v = color.get(x, y) + Vec4::new(0.6, 0.6, 0.6, 0.0);
                color.set(x, y, v);
            }
        }
        ctx.set_image(keys::PATHTRACER_COLOR, color.clone());
        ctx.set_image(keys::PATHTRACER_NORMAL_DEPTH, nd.clone());
        stage.render(&mut ctx).unwrap();
        last_input = color;
    }
    assert_eq!(stage.last_path(), DenoisePath::Temporal);

    let out = ctx.image(keys::DENOISED_COLOR).unwrap();
    let before = region_variance(&last_input, 2, 14, 2, 30);
    let after = region_variance(out, 2, 14, 2, 30);
    assert!(
        after < before * 0.7,
        "variance {} -> {} not reduced enough",
        before,
        after
    );

    // The bright half must not bleed into the dark half across the edge
    let dark_mean: f32 = (0..h).map(|y| out.luminance_at(w / 2 - 1, y)).sum::<f32>() / h as f32;
    let bright_mean: f32 = (0..h).map(|y| out.luminance_at(w / 2, y)).sum::<f32>() / h as f32;
    assert!(dark_mean < 0.45, "dark side mean {}", dark_mean);
    assert!(bright_mean > 0.75, "bright side mean {}", bright_mean);
}

#[test]
fn test_intermediate_tile_frames_skip_temporal_phases() {
    let (w, h) = (16u32, 16u32);
    let mut ctx = PipelineContext::new(w, h);
    let mut stage = DenoiserStage::new(SvgfParams::default(), w, h).unwrap();
    ctx.set_image(keys::PATHTRACER_COLOR, generate_noisy_image(w, h, 0.5, 0.2, 1));
    ctx.set_image(keys::PATHTRACER_NORMAL_DEPTH, flat_normal_depth(w, h));
    ctx.set_state(keys::RENDER_MODE, StateValue::Int(RenderMode::Tiled.as_index()));

    ctx.set_state(keys::IS_CYCLE_COMPLETE, StateValue::Bool(false));
    stage.render(&mut ctx).unwrap();
    assert_eq!(stage.last_path(), DenoisePath::SpatialOnly);
    assert!(ctx.has_image(keys::DENOISED_COLOR));
    assert!(!ctx.has_image(keys::DENOISER_HISTORY_LENGTH));

    ctx.set_state(keys::IS_CYCLE_COMPLETE, StateValue::Bool(true));
    stage.render(&mut ctx).unwrap();
    assert_eq!(stage.last_path(), DenoisePath::Temporal);
    let hl = ctx.image(keys::DENOISER_HISTORY_LENGTH).unwrap();
    assert_eq!(hl.get(0, 0).x, 1.0);
}

#[test]
fn test_disabled_denoiser_forgets_history() {
    let (w, h) = (8u32, 8u32);
    let mut ctx = PipelineContext::new(w, h);
    let mut stage = DenoiserStage::new(SvgfParams::default(), w, h).unwrap();
    ctx.set_image(keys::PATHTRACER_COLOR, FloatImage::filled(w, h, Vec4::splat(0.5)));
    ctx.set_image(keys::PATHTRACER_NORMAL_DEPTH, flat_normal_depth(w, h));
    stage.render(&mut ctx).unwrap();
    stage.render(&mut ctx).unwrap();
    assert!(stage.history().is_valid());

    stage.set_enabled(false);
    assert!(!stage.history().is_valid());
    stage.set_enabled(true);
    stage.render(&mut ctx).unwrap();
    assert_eq!(ctx.image(keys::DENOISER_HISTORY_LENGTH).unwrap().get(4, 4).x, 1.0);
}

#[test]
fn test_parameter_patch_is_typed() {
    let mut stage = DenoiserStage::new(SvgfParams::default(), 4, 4).unwrap();
    stage
        .update_parameters(&serde_json::json!({ "iterations": 3, "alpha": 0.1 }))
        .unwrap();
    assert_eq!(stage.params().iterations, 3);
    assert!((stage.params().alpha - 0.1).abs() < 1e-6);
    assert!(stage.update_parameters(&serde_json::json!({ "iterations": "many" })).is_err());
    assert_eq!(stage.params().iterations, 3);
}
