//! Measurement commands (`ecobench code`, `ecobench json`, `ecobench normalize`).

use clap::Args;
use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use ecobench::{
    BenchContext, BenchRequest, Config, EcoError, EcoResult, JsonComparison, JsonParser,
    Language, MeasurementReport, Target, normalize_language,
};

#[derive(Debug, Args)]
pub struct CodeArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    #[arg(long)]
    pub lang: Language,
    #[arg(long, default_value_t = 1)]
    pub repeat: u64,
    /// Trials actually executed before extrapolating (defaults to the config value).
    #[arg(long)]
    pub scale_threshold: Option<u64>,
    /// Per-trial timeout in seconds (defaults to the config value).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Args)]
pub struct JsonArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    #[arg(long, default_value_t = JsonParser::Dom)]
    pub parser: JsonParser,
    /// Measure the document under every parser, side by side.
    #[arg(long, conflicts_with = "parser")]
    pub compare: bool,
    #[arg(long, default_value_t = 1)]
    pub repeat: u64,
    #[arg(long)]
    pub scale_threshold: Option<u64>,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
    #[arg(long)]
    pub lang: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedSource {
    pub language: Language,
    pub normalized: String,
}

pub fn code_command(config: &Config, args: &CodeArgs) -> EcoResult<MeasurementReport> {
    let mut config = config.clone();
    if let Some(secs) = args.timeout {
        if secs == 0 {
            return Err(EcoError::InvalidArgument(
                "timeout must be at least 1 second".to_string(),
            ));
        }
        config.timeout_secs = secs;
    }
    let source = read_source(&args.file)?;
    BenchContext::from_config(&config)?.submit(&BenchRequest {
        source,
        target: Target::Code(args.lang),
        repeat: args.repeat,
        scale_threshold: args.scale_threshold.unwrap_or(config.scale_threshold),
    })
}

pub fn json_command(config: &Config, args: &JsonArgs) -> EcoResult<MeasurementReport> {
    let source = read_source(&args.file)?;
    BenchContext::from_config(config)?.submit(&BenchRequest {
        source,
        target: Target::Json(args.parser),
        repeat: args.repeat,
        scale_threshold: args.scale_threshold.unwrap_or(config.scale_threshold),
    })
}

pub fn json_compare_command(config: &Config, args: &JsonArgs) -> EcoResult<JsonComparison> {
    let source = read_source(&args.file)?;
    BenchContext::from_config(config)?.compare_json(
        &source,
        args.repeat,
        args.scale_threshold.unwrap_or(config.scale_threshold),
    )
}

pub fn normalize_command(args: &NormalizeArgs) -> EcoResult<NormalizedSource> {
    let source = read_source(&args.file)?;
    Ok(NormalizedSource {
        language: args.lang,
        normalized: normalize_language(&source, args.lang),
    })
}

fn read_source(path: &Path) -> EcoResult<String> {
    std::fs::read_to_string(path).map_err(|err| {
        EcoError::InvalidArgument(format!("failed to read {}: {err}", path.display()))
    })
}
