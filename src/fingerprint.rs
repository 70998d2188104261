//! Cache keys for measurements.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::{EcoError, EcoResult, HostProfile, JsonParser, Language, normalize_language};

/// What a source unit is measured as: a program in some language, or a JSON document
/// round-tripped by one of the parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "family", content = "kind", rename_all = "snake_case")]
pub enum Target {
    Code(Language),
    Json(JsonParser),
}

impl Target {
    /// Stable tag stored in the `language` column of records.
    pub fn tag(&self) -> String {
        match self {
            Self::Code(lang) => lang.tag().to_string(),
            Self::Json(parser) => format!("json:{}", parser.tag()),
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }

    /// Canonical form of `source` for this target.
    pub fn canonicalize(&self, source: &str) -> EcoResult<String> {
        match self {
            Self::Code(lang) => Ok(normalize_language(source, *lang)),
            Self::Json(_) => canonical_json_digest(source),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Hash of the re-serialized document: key order and whitespace drop out, values do not.
pub fn canonical_json_digest(source: &str) -> EcoResult<String> {
    let value: serde_json::Value = serde_json::from_str(source)
        .map_err(|e| EcoError::InvalidArgument(format!("invalid json document: {e}")))?;
    let canonical = serde_json::to_string(&value)?;
    Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionParameters {
    repeat: u64,
    scale_threshold: u64,
}

impl ExecutionParameters {
    pub fn new(repeat: u64, scale_threshold: u64) -> EcoResult<Self> {
        if repeat == 0 {
            return Err(EcoError::InvalidArgument(
                "repeat must be at least 1".to_string(),
            ));
        }
        if scale_threshold == 0 {
            return Err(EcoError::InvalidArgument(
                "scale threshold must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            repeat,
            scale_threshold,
        })
    }

    pub fn repeat(&self) -> u64 {
        self.repeat
    }

    pub fn scale_threshold(&self) -> u64 {
        self.scale_threshold
    }

    pub fn is_scaled(&self) -> bool {
        self.repeat > self.scale_threshold
    }

    /// Trials actually executed.
    pub fn actual_repeat(&self) -> u64 {
        self.repeat.min(self.scale_threshold)
    }

    pub fn scale_factor(&self) -> f64 {
        if self.is_scaled() {
            self.repeat as f64 / self.actual_repeat() as f64
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub language: String,
    #[serde(rename = "normalizedCode")]
    pub normalized_code: String,
    pub repeat: u64,
    #[serde(rename = "cpuModel")]
    pub cpu_model: String,
    #[serde(rename = "totalMemoryGb")]
    pub total_memory_gb: f64,
    #[serde(rename = "isScaled")]
    pub is_scaled: bool,
    /// Only part of the key for scaled measurements.
    #[serde(rename = "scaleThreshold")]
    pub scale_threshold: Option<u64>,
}

impl Fingerprint {
    pub fn build(
        source: &str,
        target: Target,
        params: ExecutionParameters,
        host: &HostProfile,
    ) -> EcoResult<Self> {
        let normalized_code = target.canonicalize(source)?;
        Ok(Self::from_parts(
            target.tag(),
            normalized_code,
            params,
            host,
        ))
    }

    pub fn from_parts(
        language: String,
        normalized_code: String,
        params: ExecutionParameters,
        host: &HostProfile,
    ) -> Self {
        let is_scaled = params.is_scaled();
        Self {
            language,
            normalized_code,
            repeat: params.repeat(),
            cpu_model: host.cpu_model.clone(),
            total_memory_gb: host.total_memory_gb,
            is_scaled,
            scale_threshold: is_scaled.then_some(params.scale_threshold()),
        }
    }
}
