//! Capability introspection for automation (`ecobench capabilities`).

use serde::Serialize;

use ecobench::{BuildKind, Config, JsonParser, Language};

#[derive(Debug, Clone, Serialize)]
pub struct CapabilitiesDoc {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub languages: Vec<LanguageCapability>,
    #[serde(rename = "jsonParsers")]
    pub json_parsers: Vec<&'static str>,
    #[serde(rename = "recordFields")]
    pub record_fields: Vec<&'static str>,
    #[serde(rename = "defaultScaleThreshold")]
    pub default_scale_threshold: u64,
    #[serde(rename = "timeoutSecs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageCapability {
    pub name: &'static str,
    pub build: BuildKind,
    #[serde(rename = "sourceFile")]
    pub source_file: &'static str,
}

pub fn capabilities_doc(config: &Config) -> CapabilitiesDoc {
    CapabilitiesDoc {
        schema_version: "ecobench.capabilities.v1".to_string(),
        languages: Language::ALL
            .into_iter()
            .map(|lang| LanguageCapability {
                name: lang.tag(),
                build: lang.build_kind(),
                source_file: lang.source_file_name(),
            })
            .collect(),
        json_parsers: JsonParser::ALL.into_iter().map(JsonParser::tag).collect(),
        record_fields: vec![
            "id",
            "language",
            "normalizedCode",
            "rawCode",
            "repeat",
            "isScaled",
            "scaleThreshold",
            "totalEmission",
            "emissionPerRun",
            "totalDurationSeconds",
            "successfulRuns",
            "failedRuns",
            "cpuModel",
            "cpuCount",
            "totalMemoryGb",
            "os",
            "timestamp",
        ],
        default_scale_threshold: config.scale_threshold,
        timeout_secs: config.timeout_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecobench::StoredRecord;

    #[test]
    fn record_fields_match_the_stored_layout() {
        let record = StoredRecord {
            id: 1,
            language: "python".to_string(),
            normalized_code: "print(1)".to_string(),
            raw_code: "print(1)".to_string(),
            repeat: 1,
            is_scaled: false,
            scale_threshold: 10_000,
            total_emission: 0.0,
            emission_per_run: 0.0,
            total_duration_seconds: 0.0,
            successful_runs: 1,
            failed_runs: 0,
            cpu_model: "cpu".to_string(),
            cpu_count: 1,
            total_memory_gb: 1.0,
            os: "linux".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };
        let value = serde_json::to_value(&record).expect("json");
        let mut keys: Vec<&str> = value
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        let mut documented = capabilities_doc(&Config::default()).record_fields;
        keys.sort_unstable();
        documented.sort_unstable();
        assert_eq!(keys, documented);
    }

    #[test]
    fn every_language_is_listed() {
        let doc = capabilities_doc(&Config::default());
        assert_eq!(doc.languages.len(), Language::ALL.len());
        assert_eq!(doc.json_parsers, vec!["dom", "stream", "skim"]);
        let java = doc
            .languages
            .iter()
            .find(|l| l.name == "java")
            .expect("java");
        assert_eq!(java.build, BuildKind::Compiled);
        assert_eq!(java.source_file, "Main.java");
    }
}
