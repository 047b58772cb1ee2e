//! Parsing of the LSF job report written to a job's stdout log.
//!
//! LSF prepends a header and a resource usage summary to whatever the job
//! printed, then appends a `PS:` trailer. The markers below delimit the
//! sections; anything else in the report is free-form.

use std::time::Duration;

use crate::error::UsageParseError;

const USAGE_START: &str = "Resource usage summary:\n\n";
const USAGE_END: &str = "\nThe output (if any) follows:\n";
const OUTPUT_START: &str = "The output (if any) follows:\n\n";
const OUTPUT_END: &str = "\n\nPS:\n";
const CPU_TIME_LABEL: &str = "CPU time";
const CPU_TIME_UNIT: &str = "sec.";

/// The resource usage summary block of a job report.
pub fn resource_summary(report: &str) -> Result<&str, UsageParseError> {
    let start = report
        .find(USAGE_START)
        .ok_or(UsageParseError::MissingMarker(USAGE_START))?
        + USAGE_START.len();
    let len = report[start..]
        .find(USAGE_END)
        .ok_or(UsageParseError::MissingMarker(USAGE_END))?;
    Ok(&report[start..start + len])
}

/// Total CPU time the job consumed, as reported in the usage summary.
pub fn cpu_time(report: &str) -> Result<Duration, UsageParseError> {
    let summary = resource_summary(report)?;

    let label = summary
        .find(CPU_TIME_LABEL)
        .ok_or(UsageParseError::MissingMarker(CPU_TIME_LABEL))?;
    let after_label = &summary[label + CPU_TIME_LABEL.len()..];
    let colon = after_label
        .find(':')
        .ok_or(UsageParseError::MissingMarker(":"))?;
    let value = &after_label[colon + 1..];
    let unit = value
        .find(CPU_TIME_UNIT)
        .ok_or(UsageParseError::MissingMarker(CPU_TIME_UNIT))?;

    let raw = value[..unit].trim();
    raw.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| UsageParseError::InvalidCpuTime(raw.to_string()))
}

/// What the job itself printed, without the LSF header and trailer.
pub fn program_output(report: &str) -> Option<&str> {
    let start = report.find(OUTPUT_START)? + OUTPUT_START.len();
    let len = report[start..].find(OUTPUT_END)?;
    Some(&report[start..start + len])
}
