//! Pipeline configuration and partial parameter updates.
//!
//! Every stage's parameters are plain serde structs. A UI sends partial
//! field sets as JSON objects; `merge_parameters` overlays them on the current
//! values and rebuilds the typed struct.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::denoise::svgf::pipelines::SvgfParams;
use crate::error::{RenderError, RenderResult};
use crate::path_tracing::accumulation::AccumulationParams;
use crate::post::exposure::ExposureParams;
use crate::sampling::adaptive::AdaptiveSamplingParams;

/// Top-level configuration for a pipeline instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub width: u32,
    pub height: u32,
    pub accumulation: AccumulationParams,
    pub adaptive: AdaptiveSamplingParams,
    pub denoiser: SvgfParams,
    pub exposure: ExposureParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            accumulation: AccumulationParams::default(),
            adaptive: AdaptiveSamplingParams::default(),
            denoiser: SvgfParams::default(),
            exposure: ExposureParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> RenderResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> RenderResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> RenderResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Overlay `patch` on `current`. Objects merge recursively; any other value
/// replaces the field. Keys the target type does not know are ignored by
/// serde. On a type error `current` is untouched and the error is returned.
pub fn merge_parameters<T>(current: &T, patch: &Value) -> RenderResult<T>
where
    T: Serialize + DeserializeOwned,
{
    if !patch.is_object() {
        return Err(RenderError::config(format!(
            "parameter patch must be an object, got {}",
            patch
        )));
    }
    let mut merged = serde_json::to_value(current)?;
    merge_value(&mut merged, patch);
    serde_json::from_value(merged)
        .map_err(|e| RenderError::config(format!("invalid parameter patch: {}", e)))
}

fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Inner {
        a: u32,
        b: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Outer {
        enabled: bool,
        inner: Inner,
    }

    fn sample() -> Outer {
        Outer {
            enabled: true,
            inner: Inner { a: 1, b: 2.0 },
        }
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let merged = merge_parameters(&sample(), &json!({"inner": {"a": 5}})).unwrap();
        assert_eq!(merged.inner.a, 5);
        assert_eq!(merged.inner.b, 2.0);
        assert!(merged.enabled);
    }

    #[test]
    fn test_type_error_rejected() {
        assert!(merge_parameters(&sample(), &json!({"enabled": "yes"})).is_err());
        assert!(merge_parameters(&sample(), &json!(3)).is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let merged = merge_parameters(&sample(), &json!({"bogus": 1})).unwrap();
        assert_eq!(merged, sample());
    }

    #[test]
    fn test_config_round_trip_defaults() {
        let cfg = PipelineConfig::from_json_str(r#"{"width": 64, "accumulation": {"max_frames": 8}}"#)
            .unwrap();
        assert_eq!(cfg.width, 64);
        assert_eq!(cfg.height, 720);
        assert_eq!(cfg.accumulation.max_frames, 8);
        assert_eq!(cfg.denoiser, SvgfParams::default());
    }
}
