//! Emissions sampling around a batch of trials.
//!
//! Emission values are kilograms of CO2-equivalent.

use serde::{Deserialize, Serialize};

use std::time::Instant;

use crate::{EcoError, EcoResult};

/// Starts a sampling span. One span brackets every trial of a measurement.
pub trait EmissionsSampler: Send + Sync {
    fn start(&self) -> EcoResult<Box<dyn SamplerSession>>;
}

pub trait SamplerSession {
    /// Total emission since `start`.
    fn stop(self: Box<Self>) -> EcoResult<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PowerModel {
    /// Average package power drawn while trials run.
    #[serde(default = "default_cpu_watts")]
    pub cpu_watts: f64,
    /// Grid carbon intensity in grams CO2eq per kWh.
    #[serde(default = "default_grid_intensity")]
    pub grid_intensity_g_per_kwh: f64,
}

fn default_cpu_watts() -> f64 {
    65.0
}

fn default_grid_intensity() -> f64 {
    475.0
}

impl Default for PowerModel {
    fn default() -> Self {
        Self {
            cpu_watts: default_cpu_watts(),
            grid_intensity_g_per_kwh: default_grid_intensity(),
        }
    }
}

impl PowerModel {
    pub fn emission_for_seconds(&self, seconds: f64) -> f64 {
        let kwh = self.cpu_watts * seconds / 3600.0 / 1000.0;
        kwh * self.grid_intensity_g_per_kwh / 1000.0
    }
}

/// Estimates emission from wall-clock time under a constant power draw.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerModelSampler {
    model: PowerModel,
}

impl PowerModelSampler {
    pub fn new(model: PowerModel) -> EcoResult<Self> {
        if !(model.cpu_watts.is_finite() && model.cpu_watts >= 0.0) {
            return Err(EcoError::Config(format!(
                "sampler cpu_watts must be a non-negative number, got {}",
                model.cpu_watts
            )));
        }
        if !(model.grid_intensity_g_per_kwh.is_finite() && model.grid_intensity_g_per_kwh >= 0.0)
        {
            return Err(EcoError::Config(format!(
                "sampler grid_intensity_g_per_kwh must be a non-negative number, got {}",
                model.grid_intensity_g_per_kwh
            )));
        }
        Ok(Self { model })
    }
}

struct PowerModelSession {
    model: PowerModel,
    started: Instant,
}

impl EmissionsSampler for PowerModelSampler {
    fn start(&self) -> EcoResult<Box<dyn SamplerSession>> {
        Ok(Box::new(PowerModelSession {
            model: self.model,
            started: Instant::now(),
        }))
    }
}

impl SamplerSession for PowerModelSession {
    fn stop(self: Box<Self>) -> EcoResult<f64> {
        Ok(self
            .model
            .emission_for_seconds(self.started.elapsed().as_secs_f64()))
    }
}

/// Sampler for hosts where no emission source is available; measurements degrade to 0.
#[derive(Debug, Clone, Default)]
pub struct NullSampler {
    reason: String,
}

impl NullSampler {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl EmissionsSampler for NullSampler {
    fn start(&self) -> EcoResult<Box<dyn SamplerSession>> {
        Err(EcoError::SamplerUnavailable(self.reason.clone()))
    }
}
