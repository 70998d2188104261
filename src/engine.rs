//! Request orchestration: fingerprint, cache lookup, prepare, run, persist, respond.

use serde::Serialize;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    CacheStore, Config, DefaultExecutor, EcoError, EcoResult, EmissionsSampler,
    ExecutionParameters, Fingerprint, HostProfileProvider, JsonParser, JsonlStore,
    MeasurementReport,
    NewRecord, NullSampler, PowerModelSampler, ScaledRunner, StoredRecord, SystemHostProfile,
    Target, WorkloadExecutor,
};

#[derive(Debug, Clone)]
pub struct BenchRequest {
    pub source: String,
    pub target: Target,
    pub repeat: u64,
    pub scale_threshold: u64,
}

/// Per-request lifecycle, logged as the request advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    Fingerprinted,
    CacheHit,
    CacheMiss,
    Preparing,
    PrepareFailed,
    Running,
    Aggregated,
    Persisted,
    Done,
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Fingerprinted => "fingerprinted",
            Self::CacheHit => "cache_hit",
            Self::CacheMiss => "cache_miss",
            Self::Preparing => "preparing",
            Self::PrepareFailed => "prepare_failed",
            Self::Running => "running",
            Self::Aggregated => "aggregated",
            Self::Persisted => "persisted",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmissionTotals {
    #[serde(rename = "codeEmission")]
    pub code_emission: f64,
    #[serde(rename = "jsonEmission")]
    pub json_emission: f64,
    pub records: usize,
}

/// One document measured under every JSON parser, in `JsonParser::ALL` order.
#[derive(Debug, Clone, Serialize)]
pub struct JsonComparison {
    pub reports: Vec<MeasurementReport>,
    /// Language tag of the parser with the lowest total emission among those with at
    /// least one successful run.
    #[serde(rename = "lowestEmission")]
    pub lowest_emission: Option<String>,
}

/// Everything a request needs, built once at startup and shared by reference.
#[derive(Clone)]
pub struct BenchContext {
    store: Arc<dyn CacheStore>,
    host: Arc<dyn HostProfileProvider>,
    executor: Arc<dyn WorkloadExecutor>,
    sampler: Arc<dyn EmissionsSampler>,
    timeout_per_run: Duration,
}

impl fmt::Debug for BenchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchContext")
            .field("timeout_per_run", &self.timeout_per_run)
            .finish_non_exhaustive()
    }
}

fn stage(stage: RequestStage) {
    tracing::debug!(stage = %stage, "request stage");
}

impl BenchContext {
    pub fn new(
        store: Arc<dyn CacheStore>,
        host: Arc<dyn HostProfileProvider>,
        executor: Arc<dyn WorkloadExecutor>,
        sampler: Arc<dyn EmissionsSampler>,
        timeout_per_run: Duration,
    ) -> Self {
        Self {
            store,
            host,
            executor,
            sampler,
            timeout_per_run,
        }
    }

    /// Production wiring: JSONL store under `base_dir`, `/proc` host profile, child
    /// processes for code and the power-model sampler unless disabled.
    pub fn from_config(config: &Config) -> EcoResult<Self> {
        let sampler: Arc<dyn EmissionsSampler> = if config.sampler.enabled {
            Arc::new(PowerModelSampler::new(config.sampler.model)?)
        } else {
            Arc::new(NullSampler::new("emissions sampling disabled in config"))
        };
        Ok(Self::new(
            Arc::new(JsonlStore::new(config.store_path())),
            Arc::new(SystemHostProfile),
            Arc::new(DefaultExecutor::new(config.toolchain.clone())),
            sampler,
            config.timeout(),
        ))
    }

    pub fn submit(&self, request: &BenchRequest) -> EcoResult<MeasurementReport> {
        stage(RequestStage::Received);
        tracing::info!(
            "processing {} source with {} repetitions (threshold: {})",
            request.target,
            request.repeat,
            request.scale_threshold
        );
        let params = ExecutionParameters::new(request.repeat, request.scale_threshold)?;
        let host = self.host.current();
        let fingerprint = Fingerprint::build(&request.source, request.target, params, &host)?;
        stage(RequestStage::Fingerprinted);

        let cached = self.store.lookup(&fingerprint).unwrap_or_else(|err| {
            tracing::warn!("cache lookup failed, treating as miss: {err}");
            None
        });
        if let Some(record) = cached {
            stage(RequestStage::CacheHit);
            tracing::info!("found cached measurement #{}", record.id);
            let report = MeasurementReport::from_cached(&record, params, host);
            stage(RequestStage::Done);
            return Ok(report);
        }
        stage(RequestStage::CacheMiss);

        stage(RequestStage::Preparing);
        let mut workload = match self.executor.prepare(&request.source, request.target) {
            Ok(workload) => workload,
            Err(EcoError::Compilation(diagnostic)) => {
                stage(RequestStage::PrepareFailed);
                let report = MeasurementReport::compilation_failed(
                    fingerprint.language,
                    params,
                    diagnostic,
                    host,
                )?;
                stage(RequestStage::Done);
                return Ok(report);
            }
            Err(err) => return Err(err),
        };

        stage(RequestStage::Running);
        let raw = ScaledRunner::new(self.sampler.as_ref(), self.timeout_per_run)
            .run(workload.as_mut(), params);
        // Release the workspace before touching the store.
        drop(workload);

        let report =
            MeasurementReport::from_measurement(fingerprint.language.clone(), params, raw, host)?;
        stage(RequestStage::Aggregated);

        if report.successful_runs > 0 {
            let new = NewRecord {
                fingerprint: &fingerprint,
                report: &report,
                raw_code: &request.source,
            };
            match self.store.insert(new) {
                Ok(id) => {
                    stage(RequestStage::Persisted);
                    tracing::info!("saved measurement #{id}");
                }
                Err(err) => tracing::error!("failed to persist measurement: {err}"),
            }
        }

        stage(RequestStage::Done);
        Ok(report)
    }

    /// Submits the document once per parser. Each parser goes through the normal cache
    /// path, so a comparison only measures the parsers missing from the store.
    pub fn compare_json(
        &self,
        source: &str,
        repeat: u64,
        scale_threshold: u64,
    ) -> EcoResult<JsonComparison> {
        let reports = JsonParser::ALL
            .into_iter()
            .map(|parser| {
                self.submit(&BenchRequest {
                    source: source.to_string(),
                    target: Target::Json(parser),
                    repeat,
                    scale_threshold,
                })
            })
            .collect::<EcoResult<Vec<_>>>()?;
        let lowest_emission = reports
            .iter()
            .filter(|r| r.successful_runs > 0)
            .min_by(|a, b| a.total_emission.total_cmp(&b.total_emission))
            .map(|r| r.language.clone());
        Ok(JsonComparison {
            reports,
            lowest_emission,
        })
    }

    /// All persisted measurements, newest first.
    pub fn history(&self) -> EcoResult<Vec<StoredRecord>> {
        self.store.list_all()
    }

    pub fn total_emission(&self) -> EcoResult<EmissionTotals> {
        let records = self.store.list_all()?;
        let mut totals = EmissionTotals {
            records: records.len(),
            ..EmissionTotals::default()
        };
        for record in &records {
            if record.is_json() {
                totals.json_emission += record.total_emission;
            } else {
                totals.code_emission += record.total_emission;
            }
        }
        Ok(totals)
    }
}
