//! Report generation
//!
//! Renders per-file activity summaries as plain text or JSON.

use activity_decoder::ActivitySummary;
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;

/// Outcome of decoding one input file
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ActivitySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileReport {
    pub fn decoded(file: PathBuf, summary: ActivitySummary) -> Self {
        Self {
            file,
            summary: Some(summary),
            error: None,
        }
    }

    pub fn failed(file: PathBuf, error: &anyhow::Error) -> Self {
        Self {
            file,
            summary: None,
            error: Some(format!("{:#}", error)),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON array with one object per file
pub fn render_json(reports: &[FileReport]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(reports)
}

/// Human-readable report, one section per file
pub fn render_txt(reports: &[FileReport]) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    for report in reports {
        write_file_section(&mut out, report)?;
    }
    Ok(out)
}

fn write_file_section(out: &mut String, report: &FileReport) -> std::fmt::Result {
    writeln!(out, "═══════════════════════════════════════════════")?;
    writeln!(out, "  {}", report.file.display())?;
    writeln!(out, "═══════════════════════════════════════════════")?;

    if let Some(error) = &report.error {
        writeln!(out, "  ✗ {}", error)?;
        writeln!(out)?;
        return Ok(());
    }
    let Some(summary) = &report.summary else {
        return Ok(());
    };

    writeln!(out, "  Format:         {}", summary.format)?;
    let device: Vec<&str> = [
        summary.device.manufacturer.as_deref(),
        summary.device.product.as_deref(),
        summary.device.serial_number.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !device.is_empty() {
        writeln!(out, "  Device:         {}", device.join(" / "))?;
    }
    writeln!(out, "  Rows:           {}", summary.rows)?;
    if let Some(start) = &summary.start {
        writeln!(out, "  Start:          {}", start)?;
    }
    writeln!(out, "  Elapsed:        {}", hms(summary.elapsed_secs))?;
    writeln!(out, "  Recording time: {}", hms(summary.recording_secs))?;
    if let Some(laps) = summary.laps {
        writeln!(out, "  Laps:           {}", laps)?;
    }
    if let Some(distance) = summary.distance_m {
        writeln!(out, "  Distance:       {:.2} km", distance / 1000.0)?;
    }
    if let (Some(ascent), Some(descent)) = (summary.ascent_m, summary.descent_m) {
        writeln!(out, "  Ascent/descent: {:.0} m / {:.0} m", ascent, descent)?;
    }
    if let Some(power) = summary.avg_power_w {
        writeln!(out, "  Avg power:      {:.0} W", power)?;
    }
    if let Some(power) = summary.normalized_power_w {
        writeln!(out, "  NP:             {:.0} W", power)?;
    }
    if let Some(speed) = summary.avg_speed_mps {
        writeln!(out, "  Avg speed:      {:.1} km/h", speed * 3.6)?;
    }
    if let Some(hr) = summary.avg_heart_rate {
        writeln!(out, "  Avg heart rate: {:.0} bpm", hr)?;
    }
    if summary.non_monotonic_rows > 0 {
        writeln!(out, "  ⚠ {} rows with decreasing time", summary.non_monotonic_rows)?;
    }
    if summary.dropped_records > 0 {
        writeln!(out, "  ⚠ {} records dropped", summary.dropped_records)?;
    }

    writeln!(out, "\n  Columns:")?;
    for column in &summary.columns {
        writeln!(
            out,
            "    {:<14} {:<6} {} values",
            column.name,
            column.unit.as_deref().unwrap_or("-"),
            column.present
        )?;
    }
    writeln!(out)
}

fn hms(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, total / 60 % 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use activity_decoder::{decode, Format};

    const GPX: &str = r#"<gpx><trk><trkseg>
        <trkpt lat="45.0" lon="7.0"><ele>300</ele><time>2020-01-01T10:00:00Z</time></trkpt>
        <trkpt lat="45.001" lon="7.0"><ele>310</ele><time>2020-01-01T10:00:01Z</time></trkpt>
        <trkpt lat="45.002" lon="7.0"><ele>305</ele><time>2020-01-01T10:00:02Z</time></trkpt>
    </trkseg></trk></gpx>"#;

    fn reports() -> Vec<FileReport> {
        let summary = decode(Format::Gpx, GPX.as_bytes(), None).unwrap().summary();
        vec![
            FileReport::decoded(PathBuf::from("hill.gpx"), summary),
            FileReport::failed(
                PathBuf::from("broken.fit"),
                &anyhow::anyhow!("invalid FIT signature"),
            ),
        ]
    }

    #[test]
    fn test_hms() {
        assert_eq!(hms(0.0), "0:00:00");
        assert_eq!(hms(3723.4), "1:02:03");
    }

    #[test]
    fn test_txt_report() {
        let text = render_txt(&reports()).unwrap();
        assert!(text.contains("hill.gpx"));
        assert!(text.contains("Format:         GPX"));
        assert!(text.contains("Rows:           3"));
        assert!(text.contains("Ascent/descent: 10 m / 5 m"));
        assert!(text.contains("Distance:       0.22 km"));
        assert!(text.contains("altitude"));
        assert!(text.contains("✗ invalid FIT signature"));
    }

    #[test]
    fn test_json_report() {
        let json = render_json(&reports()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let files = value.as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["summary"]["rows"], 3);
        assert_eq!(files[0]["summary"]["local_start"], "2020-01-01T10:00:00");
        assert!(files[0].get("error").is_none());
        assert_eq!(files[1]["error"], "invalid FIT signature");
        assert!(files[1].get("summary").is_none());
    }
}
