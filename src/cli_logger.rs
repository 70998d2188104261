use anyhow::Result;
use ecobench::{JsonComparison, MeasurementReport};
use serde::Serialize;
use serde_json::Value;

use crate::cmd::measure_cmd::NormalizedSource;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let rendered = render_value(&serde_json::to_value(value)?, 0);
        println!("{rendered}");
        Ok(())
    }

    pub fn print_report(&self, report: &MeasurementReport) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(report)?);
            return Ok(());
        }

        let status = if report.successful_runs == 0 {
            self.style("FAIL", "31;1")
        } else if report.failed_runs > 0 {
            self.style("PARTIAL", "33;1")
        } else {
            self.style("PASS", "32;1")
        };
        let mut tags = Vec::new();
        if report.from_cache {
            tags.push(self.style("cached", "35"));
        }
        if report.is_scaled {
            tags.push(self.style(
                &format!("scaled from {} trials", report.scale_threshold),
                "33",
            ));
        }

        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {} {}\n",
            self.style("ecobench", "36;1"),
            self.style(&report.language, "37;1"),
            status,
            tags.join(" ")
        ));
        out.push_str(&format!(
            "{} {} (ok={} failed={})\n",
            self.style("runs", "90"),
            report.repeat,
            report.successful_runs,
            report.failed_runs
        ));
        out.push_str(&format!(
            "{} {:.9} kg CO2eq ({:.3e} per run)\n",
            self.style("emission", "90"),
            report.total_emission,
            report.emission_per_run
        ));
        out.push_str(&format!(
            "{} {:.3}s ({:.6}s per run)\n",
            self.style("duration", "90"),
            report.total_duration_seconds,
            report.duration_per_run
        ));
        out.push_str(&format!(
            "{} {} / {} cpus / {} GB / {}\n",
            self.style("host", "90"),
            report.host.cpu_model,
            report.host.cpu_count,
            report.host.total_memory_gb,
            report.host.os
        ));
        out.push_str(&format!(
            "{} {}\n",
            self.style("measured", "90"),
            report.timestamp
        ));
        if !report.stderr.trim().is_empty() {
            out.push_str(&format!("{}\n", self.style("stderr", "33;1")));
            out.push_str(&format!("{}\n", report.stderr.trim_end()));
        }

        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_comparison(&self, comparison: &JsonComparison) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(comparison)?);
            return Ok(());
        }

        for report in &comparison.reports {
            self.print_report(report)?;
            println!();
        }
        let lowest = comparison.lowest_emission.as_deref().unwrap_or("none");
        println!("{} {}", self.style("lowest emission", "32;1"), lowest);
        Ok(())
    }

    pub fn print_normalized(&self, normalized: &NormalizedSource) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(normalized)?);
            return Ok(());
        }
        println!("{}", normalized.normalized);
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "code": "warning",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for item in items {
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!(
                    "{pad}{key}:\n{}\n",
                    render_value(value, indent + 2)
                ));
            }
            _ => out.push_str(&format!(
                "{pad}{key}: {}\n",
                render_value(value, indent + 2)
            )),
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_values_render_as_indented_blocks() {
        let value = serde_json::json!({
            "total": 2,
            "records": [{"id": 1}, {"id": 2}],
            "tags": [],
        });
        let rendered = render_value(&value, 0);
        assert!(rendered.contains("total: 2"));
        assert!(rendered.contains("records:\n  -\n    id: 1"));
        assert!(rendered.contains("tags:\n[]"));
    }

    #[test]
    fn styling_is_dropped_without_color() {
        let logger = CliLogger::new(false, true);
        assert_eq!(logger.style("ok", "32"), "ok");
        let colored = CliLogger::new(false, false);
        assert_eq!(colored.style("ok", "32"), "\x1b[32mok\x1b[0m");
    }
}
