//! Measurement history commands (`ecobench history ...`).

use clap::Subcommand;
use serde::{Deserialize, Serialize};

use ecobench::{BenchContext, EcoResult, StoredRecord};

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// List stored measurements, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only records with this language tag (e.g. `python`, `json:dom`).
        #[arg(long)]
        language: Option<String>,
    },
    /// Total emission over every stored measurement, split by code and json.
    Total,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub language: String,
    pub repeat: u64,
    #[serde(rename = "isScaled")]
    pub is_scaled: bool,
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
    pub timestamp: String,
}

impl From<&StoredRecord> for HistoryEntry {
    fn from(record: &StoredRecord) -> Self {
        Self {
            id: record.id,
            language: record.language.clone(),
            repeat: record.repeat,
            is_scaled: record.is_scaled,
            total_emission: record.total_emission,
            emission_per_run: record.emission_per_run,
            total_duration_seconds: record.total_duration_seconds,
            successful_runs: record.successful_runs,
            failed_runs: record.failed_runs,
            cpu_model: record.cpu_model.clone(),
            timestamp: record.timestamp.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryList {
    pub limit: usize,
    pub total: usize,
    pub records: Vec<HistoryEntry>,
}

pub fn history_command(
    ctx: &BenchContext,
    command: &HistoryCommand,
) -> EcoResult<serde_json::Value> {
    match command {
        HistoryCommand::List { limit, language } => {
            let matching: Vec<StoredRecord> = ctx
                .history()?
                .into_iter()
                .filter(|r| language.as_deref().is_none_or(|tag| r.language == tag))
                .collect();
            let out = HistoryList {
                limit: *limit,
                total: matching.len(),
                records: matching.iter().take(*limit).map(HistoryEntry::from).collect(),
            };
            Ok(serde_json::to_value(out)?)
        }
        HistoryCommand::Total => Ok(serde_json::to_value(ctx.total_emission()?)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecobench::{
        BenchRequest, HostProfile, JsonExecutor, JsonParser, MemoryStore, NullSampler, Target,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> BenchContext {
        BenchContext::new(
            Arc::new(MemoryStore::new()),
            Arc::new(HostProfile {
                cpu_model: "cpu".to_string(),
                cpu_count: 2,
                total_memory_gb: 4.0,
                os: "linux (x86_64)".to_string(),
            }),
            Arc::new(JsonExecutor),
            Arc::new(NullSampler::new("test")),
            Duration::from_secs(30),
        )
    }

    fn submit(ctx: &BenchContext, doc: &str, parser: JsonParser) {
        ctx.submit(&BenchRequest {
            source: doc.to_string(),
            target: Target::Json(parser),
            repeat: 1,
            scale_threshold: 10,
        })
        .expect("submit");
    }

    #[test]
    fn list_filters_by_language_and_applies_the_limit() {
        let ctx = context();
        submit(&ctx, "[1]", JsonParser::Dom);
        submit(&ctx, "[2]", JsonParser::Skim);
        submit(&ctx, "[3]", JsonParser::Dom);

        let all = history_command(
            &ctx,
            &HistoryCommand::List {
                limit: 2,
                language: None,
            },
        )
        .expect("list");
        assert_eq!(all["total"], 3);
        assert_eq!(all["records"].as_array().expect("records").len(), 2);
        assert_eq!(all["records"][0]["id"], 3);

        let dom = history_command(
            &ctx,
            &HistoryCommand::List {
                limit: 20,
                language: Some("json:dom".to_string()),
            },
        )
        .expect("list");
        assert_eq!(dom["total"], 2);
        assert_eq!(dom["records"][1]["language"], "json:dom");
    }

    #[test]
    fn total_reports_both_families() {
        let ctx = context();
        submit(&ctx, "{}", JsonParser::Stream);
        let total = history_command(&ctx, &HistoryCommand::Total).expect("total");
        assert_eq!(total["records"], 1);
        assert_eq!(total["codeEmission"], 0.0);
        assert_eq!(total["jsonEmission"], 0.0);
    }
}
