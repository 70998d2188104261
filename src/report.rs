//! Measurement reports returned to callers and the records persisted for them.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::{EcoResult, ExecutionParameters, Fingerprint, HostProfile, RawMeasurement};

pub const CACHED_OUTPUT_NOTE: &str = "(cached result from an identical earlier measurement)";

/// Uniform response shape for every request path (cache hit, compile failure, fresh run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementReport {
    pub language: String,
    pub repeat: u64,
    #[serde(rename = "totalEmission")]
    pub total_emission: f64,
    #[serde(rename = "emissionPerRun")]
    pub emission_per_run: f64,
    #[serde(rename = "totalDurationSeconds")]
    pub total_duration_seconds: f64,
    #[serde(rename = "durationPerRun")]
    pub duration_per_run: f64,
    #[serde(rename = "successfulRuns")]
    pub successful_runs: u64,
    #[serde(rename = "failedRuns")]
    pub failed_runs: u64,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "fromCache")]
    pub from_cache: bool,
    /// Emission and duration were extrapolated from `scaleThreshold` trials.
    #[serde(rename = "isScaled")]
    pub is_scaled: bool,
    #[serde(rename = "scaleThreshold")]
    pub scale_threshold: u64,
    pub host: HostProfile,
    pub timestamp: String,
}

impl MeasurementReport {
    pub fn from_measurement(
        language: String,
        params: ExecutionParameters,
        raw: RawMeasurement,
        host: HostProfile,
    ) -> EcoResult<Self> {
        let repeat = params.repeat();
        Ok(Self {
            language,
            repeat,
            total_emission: raw.total_emission,
            emission_per_run: per_run(raw.total_emission, repeat),
            total_duration_seconds: raw.total_duration_seconds,
            duration_per_run: per_run(raw.total_duration_seconds, repeat),
            successful_runs: raw.successful_runs,
            failed_runs: raw.failed_runs,
            stdout: raw.stdout,
            stderr: raw.stderr,
            from_cache: false,
            is_scaled: raw.is_scaled,
            scale_threshold: params.scale_threshold(),
            host,
            timestamp: now_rfc3339()?,
        })
    }

    /// Zero-emission, all-failed report for an artifact the toolchain rejected.
    pub fn compilation_failed(
        language: String,
        params: ExecutionParameters,
        diagnostic: String,
        host: HostProfile,
    ) -> EcoResult<Self> {
        Ok(Self {
            language,
            repeat: params.repeat(),
            total_emission: 0.0,
            emission_per_run: 0.0,
            total_duration_seconds: 0.0,
            duration_per_run: 0.0,
            successful_runs: 0,
            failed_runs: params.repeat(),
            stdout: String::new(),
            stderr: diagnostic,
            from_cache: false,
            is_scaled: false,
            scale_threshold: params.scale_threshold(),
            host,
            timestamp: now_rfc3339()?,
        })
    }

    /// Stored totals reshaped to the requested repeat count.
    pub fn from_cached(record: &StoredRecord, params: ExecutionParameters, host: HostProfile) -> Self {
        let repeat = params.repeat();
        Self {
            language: record.language.clone(),
            repeat,
            total_emission: record.total_emission,
            emission_per_run: per_run(record.total_emission, repeat),
            total_duration_seconds: record.total_duration_seconds,
            duration_per_run: per_run(record.total_duration_seconds, repeat),
            successful_runs: record.successful_runs,
            failed_runs: record.failed_runs,
            stdout: CACHED_OUTPUT_NOTE.to_string(),
            stderr: String::new(),
            from_cache: true,
            is_scaled: record.is_scaled,
            scale_threshold: params.scale_threshold(),
            host,
            timestamp: record.timestamp.clone(),
        }
    }
}

/// A persisted measurement. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: u64,
    pub language: String,
    #[serde(rename = "normalizedCode")]
    pub normalized_code: String,
    #[serde(rename = "rawCode")]
    pub raw_code: String,
    pub repeat: u64,
    #[serde(rename = "isScaled")]
    pub is_scaled: bool,
    #[serde(rename = "scaleThreshold")]
    pub scale_threshold: u64,
    #[serde(rename = "totalEmission")]
    pub total_emission: f64,
    #[serde(rename = "emissionPerRun")]
    pub emission_per_run: f64,
    #[serde(rename = "totalDurationSeconds")]
    pub total_duration_seconds: f64,
    #[serde(rename = "successfulRuns")]
    pub successful_runs: u64,
    #[serde(rename = "failedRuns")]
    pub failed_runs: u64,
    #[serde(rename = "cpuModel")]
    pub cpu_model: String,
    #[serde(rename = "cpuCount")]
    pub cpu_count: u32,
    #[serde(rename = "totalMemoryGb")]
    pub total_memory_gb: f64,
    pub os: String,
    pub timestamp: String,
}

/// Everything a store needs to append a record except the id it assigns.
#[derive(Debug, Clone)]
pub struct NewRecord<'a> {
    pub fingerprint: &'a Fingerprint,
    pub report: &'a MeasurementReport,
    pub raw_code: &'a str,
}

impl StoredRecord {
    pub fn from_new(id: u64, new: &NewRecord<'_>) -> Self {
        let NewRecord {
            fingerprint,
            report,
            raw_code,
        } = new;
        Self {
            id,
            language: fingerprint.language.clone(),
            normalized_code: fingerprint.normalized_code.clone(),
            raw_code: (*raw_code).to_string(),
            repeat: fingerprint.repeat,
            is_scaled: fingerprint.is_scaled,
            scale_threshold: report.scale_threshold,
            total_emission: report.total_emission,
            emission_per_run: report.emission_per_run,
            total_duration_seconds: report.total_duration_seconds,
            successful_runs: report.successful_runs,
            failed_runs: report.failed_runs,
            cpu_model: fingerprint.cpu_model.clone(),
            cpu_count: report.host.cpu_count,
            total_memory_gb: fingerprint.total_memory_gb,
            os: report.host.os.clone(),
            timestamp: report.timestamp.clone(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            language: self.language.clone(),
            normalized_code: self.normalized_code.clone(),
            repeat: self.repeat,
            cpu_model: self.cpu_model.clone(),
            total_memory_gb: self.total_memory_gb,
            is_scaled: self.is_scaled,
            scale_threshold: self.is_scaled.then_some(self.scale_threshold),
        }
    }

    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprint() == *fingerprint
    }

    pub fn is_json(&self) -> bool {
        self.language.starts_with("json:")
    }
}

fn per_run(total: f64, repeat: u64) -> f64 {
    if repeat == 0 { 0.0 } else { total / repeat as f64 }
}

pub fn now_rfc3339() -> EcoResult<String> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Language, Target};

    fn host() -> HostProfile {
        HostProfile {
            cpu_model: "cpu".to_string(),
            cpu_count: 4,
            total_memory_gb: 8.0,
            os: "linux (x86_64)".to_string(),
        }
    }

    #[test]
    fn record_round_trips_its_fingerprint() {
        let params = ExecutionParameters::new(20_000, 10_000).expect("params");
        let fp = Fingerprint::build("print(1)", Target::Code(Language::Python), params, &host())
            .expect("fp");
        let raw = RawMeasurement {
            total_emission: 2.0,
            total_duration_seconds: 4.0,
            successful_runs: 20_000,
            failed_runs: 0,
            is_scaled: true,
            ..RawMeasurement::default()
        };
        let report =
            MeasurementReport::from_measurement(fp.language.clone(), params, raw, host()).expect("report");
        assert_eq!(report.emission_per_run, 2.0 / 20_000.0);

        let record = StoredRecord::from_new(
            1,
            &NewRecord {
                fingerprint: &fp,
                report: &report,
                raw_code: "print(1)",
            },
        );
        assert!(record.matches(&fp));
        assert_eq!(record.scale_threshold, 10_000);
        assert!(!record.is_json());
    }

    #[test]
    fn cached_report_is_reshaped_to_the_requested_repeat() {
        let params = ExecutionParameters::new(4, 10).expect("params");
        let fp = Fingerprint::build("print(1)", Target::Code(Language::Python), params, &host())
            .expect("fp");
        let report = MeasurementReport::compilation_failed(
            fp.language.clone(),
            params,
            "boom".to_string(),
            host(),
        )
        .expect("report");
        let mut record = StoredRecord::from_new(
            7,
            &NewRecord {
                fingerprint: &fp,
                report: &report,
                raw_code: "print(1)",
            },
        );
        record.total_emission = 8.0;
        record.total_duration_seconds = 2.0;

        let cached = MeasurementReport::from_cached(&record, params, host());
        assert!(cached.from_cache);
        assert_eq!(cached.emission_per_run, 2.0);
        assert_eq!(cached.duration_per_run, 0.5);
        assert_eq!(cached.stdout, CACHED_OUTPUT_NOTE);
    }

    #[test]
    fn report_serializes_with_camel_case_keys() {
        let params = ExecutionParameters::new(1, 1).expect("params");
        let report =
            MeasurementReport::compilation_failed("c".to_string(), params, String::new(), host())
                .expect("report");
        let value = serde_json::to_value(&report).expect("json");
        assert!(value.get("fromCache").is_some());
        assert!(value.get("isScaled").is_some());
        assert_eq!(value["failedRuns"], serde_json::json!(1));
    }
}
