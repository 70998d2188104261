//! Bounded trial execution with linear extrapolation past the scale threshold.
//!
//! At most `scale_threshold` trials run, one after another, inside a single sampler
//! span. When more repeats were requested, duration and emission are multiplied by
//! `repeat / actual_repeat` and the result is flagged as scaled. The extrapolation
//! assumes every trial costs the same; it is an estimate, not a measurement.

use std::time::{Duration, Instant};

use crate::{EcoError, EmissionsSampler, ExecutionParameters, TrialOutcome, Workload};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMeasurement {
    pub actual_repeat: u64,
    pub scale_factor: f64,
    pub trials_run: u64,
    /// Invariant: `successful_runs + failed_runs` equals the requested repeat.
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub total_emission: f64,
    pub total_duration_seconds: f64,
    pub stdout: String,
    pub stderr: String,
    pub is_scaled: bool,
    pub timed_out: bool,
}

pub struct ScaledRunner<'a> {
    sampler: &'a dyn EmissionsSampler,
    timeout_per_run: Duration,
}

impl<'a> ScaledRunner<'a> {
    pub fn new(sampler: &'a dyn EmissionsSampler, timeout_per_run: Duration) -> Self {
        Self {
            sampler,
            timeout_per_run,
        }
    }

    pub fn run(&self, workload: &mut dyn Workload, params: ExecutionParameters) -> RawMeasurement {
        let actual_repeat = params.actual_repeat();
        let scale_factor = params.scale_factor();
        if params.is_scaled() {
            tracing::info!(
                "scaling enabled: actual_repeat={actual_repeat}, scale_factor={scale_factor}"
            );
        }

        let session = match self.sampler.start() {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!("{err}; emission will be reported as 0");
                None
            }
        };
        let started = Instant::now();

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut successes = 0u64;
        let mut trials_run = 0u64;
        let mut timed_out = false;

        for trial in 1..=actual_repeat {
            trials_run = trial;
            let outcome = workload
                .execute(self.timeout_per_run)
                .unwrap_or_else(|err| {
                    tracing::warn!("trial {trial} could not run: {err}");
                    TrialOutcome {
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: err.to_string(),
                        timed_out: false,
                    }
                });

            let trial_stderr = if outcome.timed_out {
                EcoError::TrialTimeout {
                    timeout: self.timeout_per_run,
                }
                .to_string()
            } else {
                outcome.stderr.clone()
            };

            stdout.push_str(&format!(
                "=== Run {trial}/{actual_repeat} ===\n{}\n",
                outcome.stdout
            ));
            if !trial_stderr.is_empty() {
                stderr.push_str(&format!(
                    "=== Run {trial}/{actual_repeat} Error ===\n{trial_stderr}\n"
                ));
            }

            if outcome.succeeded() {
                successes += 1;
                tracing::debug!("trial {trial}/{actual_repeat} completed");
            } else if outcome.timed_out {
                tracing::error!(
                    "trial {trial}/{actual_repeat} timed out after {:?}; aborting remaining trials",
                    self.timeout_per_run
                );
                timed_out = true;
                break;
            } else {
                tracing::warn!(
                    "trial {trial}/{actual_repeat} failed with exit code {}",
                    outcome.exit_code
                );
            }
        }

        let mut total_duration_seconds = started.elapsed().as_secs_f64();
        let mut total_emission = match session {
            Some(session) => session.stop().unwrap_or_else(|err| {
                tracing::warn!("emissions sampler failed to stop: {err}; using 0");
                0.0
            }),
            None => 0.0,
        };
        tracing::info!(
            "ran {trials_run} trial(s) in {total_duration_seconds:.3}s, emission {total_emission:.9} kg"
        );

        let repeat = params.repeat();
        let successful_runs = if params.is_scaled() {
            let scaled = u128::from(successes) * u128::from(repeat) / u128::from(actual_repeat);
            u64::try_from(scaled).unwrap_or(repeat)
        } else {
            successes
        };

        if params.is_scaled() {
            total_duration_seconds *= scale_factor;
            total_emission *= scale_factor;
            tracing::info!(
                "scaled results: {total_duration_seconds:.3}s, emission {total_emission:.9} kg"
            );
        }

        RawMeasurement {
            actual_repeat,
            scale_factor,
            trials_run,
            successful_runs,
            failed_runs: repeat - successful_runs,
            total_emission,
            total_duration_seconds,
            stdout,
            stderr,
            is_scaled: params.is_scaled(),
            timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EcoResult, NullSampler, SamplerSession};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSampler {
        emission: f64,
        spans: Arc<AtomicUsize>,
    }

    struct FixedSession(f64);

    impl EmissionsSampler for FixedSampler {
        fn start(&self) -> EcoResult<Box<dyn SamplerSession>> {
            self.spans.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FixedSession(self.emission)))
        }
    }

    impl SamplerSession for FixedSession {
        fn stop(self: Box<Self>) -> EcoResult<f64> {
            Ok(self.0)
        }
    }

    fn sampler(emission: f64) -> FixedSampler {
        FixedSampler {
            emission,
            spans: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Plays back scripted outcomes; once the script runs out every trial succeeds.
    #[derive(Default)]
    struct ScriptedWorkload {
        calls: usize,
        script: Vec<EcoResult<TrialOutcome>>,
    }

    fn ok(stdout: &str) -> EcoResult<TrialOutcome> {
        Ok(TrialOutcome {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            timed_out: false,
        })
    }

    fn exit(code: i32) -> EcoResult<TrialOutcome> {
        Ok(TrialOutcome {
            exit_code: code,
            stdout: String::new(),
            stderr: "boom".to_string(),
            timed_out: false,
        })
    }

    fn timeout() -> EcoResult<TrialOutcome> {
        Ok(TrialOutcome {
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        })
    }

    impl Workload for ScriptedWorkload {
        fn execute(&mut self, _timeout: Duration) -> EcoResult<TrialOutcome> {
            let idx = self.calls;
            self.calls += 1;
            if idx < self.script.len() {
                std::mem::replace(&mut self.script[idx], ok(""))
            } else {
                ok("")
            }
        }
    }

    fn params(repeat: u64, threshold: u64) -> ExecutionParameters {
        ExecutionParameters::new(repeat, threshold).expect("params")
    }

    #[test]
    fn unscaled_run_executes_every_trial() {
        let sampler = sampler(0.25);
        let mut workload = ScriptedWorkload {
            script: vec![ok("2\n"), ok("2\n"), ok("2\n")],
            ..ScriptedWorkload::default()
        };
        let raw = ScaledRunner::new(&sampler, Duration::from_secs(30))
            .run(&mut workload, params(3, 10_000));

        assert_eq!(workload.calls, 3);
        assert_eq!(sampler.spans.load(Ordering::SeqCst), 1);
        assert_eq!(raw.successful_runs, 3);
        assert_eq!(raw.failed_runs, 0);
        assert!(!raw.is_scaled);
        assert_eq!(raw.scale_factor, 1.0);
        assert_eq!(raw.total_emission, 0.25);
        assert!(raw.stdout.starts_with("=== Run 1/3 ===\n2\n"));
        assert!(raw.stdout.contains("=== Run 3/3 ==="));
        assert!(raw.stderr.is_empty());
    }

    #[test]
    fn large_repeat_is_extrapolated_from_the_threshold() {
        let sampler = sampler(0.002);
        let mut workload = ScriptedWorkload::default();
        let raw = ScaledRunner::new(&sampler, Duration::from_secs(30))
            .run(&mut workload, params(1_000_000, 10_000));

        assert_eq!(workload.calls, 10_000);
        assert_eq!(raw.actual_repeat, 10_000);
        assert_eq!(raw.scale_factor, 100.0);
        assert!(raw.is_scaled);
        assert!((raw.total_emission - 0.2).abs() < 1e-12);
        assert_eq!(raw.successful_runs, 1_000_000);
        assert_eq!(raw.failed_runs, 0);
    }

    #[test]
    fn timeout_aborts_and_counts_the_rest_as_failed() {
        let sampler = sampler(1.0);
        let mut workload = ScriptedWorkload {
            script: vec![ok("a"), timeout(), ok("never")],
            ..ScriptedWorkload::default()
        };
        let raw = ScaledRunner::new(&sampler, Duration::from_secs(2))
            .run(&mut workload, params(5, 10));

        assert_eq!(workload.calls, 2);
        assert_eq!(raw.trials_run, 2);
        assert!(raw.timed_out);
        assert_eq!(raw.successful_runs, 1);
        assert_eq!(raw.failed_runs, 4);
        assert!(raw.stderr.contains("=== Run 2/5 Error ===\nexecution timeout (2 seconds)"));
        assert!(!raw.stdout.contains("never"));
    }

    #[test]
    fn scaled_accounting_stays_consistent_after_a_timeout() {
        let sampler = sampler(1.0);
        let mut workload = ScriptedWorkload {
            script: vec![ok(""), ok(""), ok(""), timeout()],
            ..ScriptedWorkload::default()
        };
        let raw = ScaledRunner::new(&sampler, Duration::from_secs(1))
            .run(&mut workload, params(20, 10));

        assert_eq!(workload.calls, 4);
        assert_eq!(raw.successful_runs, 6);
        assert_eq!(raw.failed_runs, 14);
        assert_eq!(raw.successful_runs + raw.failed_runs, 20);
    }

    #[test]
    fn failed_trials_do_not_stop_the_loop() {
        let sampler = sampler(0.0);
        let mut workload = ScriptedWorkload {
            script: vec![
                ok(""),
                exit(1),
                Err(EcoError::InvalidArgument("spawn failed".to_string())),
                ok(""),
            ],
            ..ScriptedWorkload::default()
        };
        let raw = ScaledRunner::new(&sampler, Duration::from_secs(1))
            .run(&mut workload, params(4, 10));

        assert_eq!(workload.calls, 4);
        assert_eq!(raw.successful_runs, 2);
        assert_eq!(raw.failed_runs, 2);
        assert!(!raw.timed_out);
        assert!(raw.stderr.contains("=== Run 2/4 Error ===\nboom"));
        assert!(raw.stderr.contains("spawn failed"));
    }

    #[test]
    fn unavailable_sampler_degrades_emission_to_zero() {
        let sampler = NullSampler::new("no power source");
        let mut workload = ScriptedWorkload::default();
        let raw = ScaledRunner::new(&sampler, Duration::from_secs(1))
            .run(&mut workload, params(3, 10));

        assert_eq!(workload.calls, 3);
        assert_eq!(raw.total_emission, 0.0);
        assert_eq!(raw.successful_runs, 3);
    }
}
