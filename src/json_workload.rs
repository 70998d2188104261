//! JSON parsing benchmark: each trial round-trips a document through one parser.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::{EcoError, EcoResult, Target, TrialOutcome, Workload, WorkloadExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonParser {
    /// Parse into a `serde_json::Value` tree, serialize, parse again.
    Dom,
    /// Same round trip through the streaming deserializer.
    Stream,
    /// Validate without building a tree.
    Skim,
}

impl JsonParser {
    pub const ALL: [JsonParser; 3] = [JsonParser::Dom, JsonParser::Stream, JsonParser::Skim];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Dom => "dom",
            Self::Stream => "stream",
            Self::Skim => "skim",
        }
    }

    /// One trial. Returns the number of bytes produced by re-serialization.
    pub fn round_trip(self, document: &str) -> EcoResult<usize> {
        match self {
            Self::Dom => {
                let value: serde_json::Value = serde_json::from_str(document)?;
                let text = serde_json::to_string(&value)?;
                let _: serde_json::Value = serde_json::from_str(&text)?;
                Ok(text.len())
            }
            Self::Stream => {
                let values = serde_json::Deserializer::from_str(document)
                    .into_iter::<serde_json::Value>()
                    .collect::<Result<Vec<_>, _>>()?;
                let mut buf = Vec::with_capacity(document.len());
                for value in &values {
                    serde_json::to_writer(&mut buf, value)?;
                    buf.push(b'\n');
                }
                let reparsed = serde_json::Deserializer::from_slice(&buf)
                    .into_iter::<IgnoredAny>()
                    .count();
                if reparsed != values.len() {
                    return Err(EcoError::InvalidArgument(format!(
                        "stream round trip produced {reparsed} values, expected {}",
                        values.len()
                    )));
                }
                Ok(buf.len())
            }
            Self::Skim => {
                serde_json::from_str::<IgnoredAny>(document)?;
                Ok(0)
            }
        }
    }
}

impl fmt::Display for JsonParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for JsonParser {
    type Err = EcoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.tag().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EcoError::InvalidArgument(format!("unknown json parser {s:?}")))
    }
}

impl clap::ValueEnum for JsonParser {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.tag()))
    }
}

/// In-process executor for JSON targets; nothing to compile and no workspace needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExecutor;

impl WorkloadExecutor for JsonExecutor {
    fn prepare(&self, source: &str, target: Target) -> EcoResult<Box<dyn Workload>> {
        let Target::Json(parser) = target else {
            return Err(EcoError::InvalidArgument(format!(
                "json executor cannot run {target} targets"
            )));
        };
        parser
            .round_trip(source)
            .map_err(|e| EcoError::InvalidArgument(format!("invalid json document: {e}")))?;
        Ok(Box::new(JsonWorkload {
            parser,
            document: source.to_string(),
        }))
    }
}

/// Parses in the calling thread. The timeout is only checked once a parse returns, so a
/// single pathological document cannot be interrupted: the overrunning trial is flagged
/// as timed out after the fact and the runner stops there.
struct JsonWorkload {
    parser: JsonParser,
    document: String,
}

impl Workload for JsonWorkload {
    fn execute(&mut self, timeout: Duration) -> EcoResult<TrialOutcome> {
        let started = Instant::now();
        let result = self.parser.round_trip(&self.document);
        let timed_out = started.elapsed() > timeout;
        Ok(match result {
            Ok(_) => TrialOutcome {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                timed_out,
            },
            Err(err) => TrialOutcome {
                exit_code: 1,
                stdout: String::new(),
                stderr: err.to_string(),
                timed_out,
            },
        })
    }
}
