//! Run options: defaults, TOML file loading, CLI merging, validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output serialization format, detected from the output file extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    /// Detect the format from a path extension; `None` for anything else.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "csv" => Some(OutputFormat::Csv),
            _ => None,
        }
    }
}

/// All knobs for one run. Tunables can come from an optional TOML file, with
/// CLI flags layered on top; inputs and output always come from the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// URL inputs: `.txt` file paths or comma-separated URL lists.
    pub urls: Vec<String>,
    /// Output file path; must end in `.json` or `.csv`.
    pub output: PathBuf,
    #[serde(skip)]
    pub format: OutputFormat,
    /// Concurrent HTTP fetches.
    pub parallel: usize,
    /// Concurrent page renders.
    pub render_parallel: usize,
    /// Per-request HTTP timeout in seconds.
    pub http_timeout_secs: u64,
    /// Per-page render timeout in seconds.
    pub page_timeout_secs: u64,
    /// URLs processed per batch.
    pub batch_size: usize,
    /// Similarity threshold recorded in report meta; the duplicate predicate
    /// uses its own fixed thresholds.
    pub sim_threshold: f64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            urls: Vec::new(),
            output: PathBuf::new(),
            format: OutputFormat::Json,
            parallel: 20,
            render_parallel: 20,
            http_timeout_secs: 10,
            page_timeout_secs: 20,
            batch_size: 1000,
            sim_threshold: 0.85,
        }
    }
}

impl Options {
    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("failed to read config file '{}': {e}", path.display())
        })?;
        let options: Options = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("failed to parse config file '{}': {e}", path.display())
        })?;
        Ok(options)
    }

    /// Validate all fields, collecting every problem into a single error so
    /// the user can fix everything in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.urls.is_empty() {
            errors.push("at least one URL input is required".to_string());
        }
        if self.output.as_os_str().is_empty() {
            errors.push("output path is required".to_string());
        } else if OutputFormat::from_path(&self.output).is_none() {
            errors.push("output path must end in .json or .csv".to_string());
        }
        if self.parallel == 0 {
            errors.push("parallel must be positive".to_string());
        }
        if self.render_parallel == 0 {
            errors.push("render_parallel must be positive".to_string());
        }
        if self.batch_size == 0 {
            errors.push("batch_size must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.sim_threshold) {
            errors.push("sim_threshold must be between 0.0 and 1.0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "invalid options:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_options() -> Options {
        Options {
            urls: vec!["https://example.com".to_string()],
            output: PathBuf::from("out.json"),
            ..Options::default()
        }
    }

    #[test]
    fn default_options_values() {
        let opts = Options::default();
        assert_eq!(opts.parallel, 20);
        assert_eq!(opts.render_parallel, 20);
        assert_eq!(opts.http_timeout_secs, 10);
        assert_eq!(opts.page_timeout_secs, 20);
        assert_eq!(opts.batch_size, 1000);
        assert!((opts.sim_threshold - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn valid_options_pass() {
        assert!(valid_options().validate().is_ok());
    }

    #[test]
    fn format_detection_by_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("report.json")),
            Some(OutputFormat::Json)
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("report.CSV")),
            Some(OutputFormat::Csv)
        );
        assert_eq!(OutputFormat::from_path(Path::new("report.xml")), None);
        assert_eq!(OutputFormat::from_path(Path::new("report")), None);
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let opts = Options {
            parallel: 0,
            batch_size: 0,
            sim_threshold: 1.5,
            ..Options::default()
        };
        let err = opts.validate().unwrap_err().to_string();
        assert!(err.contains("at least one URL input is required"));
        assert!(err.contains("output path is required"));
        assert!(err.contains("parallel must be positive"));
        assert!(err.contains("batch_size must be positive"));
        assert!(err.contains("sim_threshold must be between 0.0 and 1.0"));
    }

    #[test]
    fn validate_rejects_unknown_output_extension() {
        let mut opts = valid_options();
        opts.output = PathBuf::from("report.yaml");
        let err = opts.validate().unwrap_err().to_string();
        assert!(err.contains("must end in .json or .csv"));
    }

    #[test]
    fn load_reads_partial_toml_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "parallel = 5\nsim_threshold = 0.9").unwrap();
        file.flush().unwrap();

        let opts = Options::load(file.path()).unwrap();
        assert_eq!(opts.parallel, 5);
        assert!((opts.sim_threshold - 0.9).abs() < f64::EPSILON);
        // Untouched fields keep their defaults.
        assert_eq!(opts.batch_size, 1000);
    }

    #[test]
    fn load_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "parallel = [not toml").unwrap();
        file.flush().unwrap();
        assert!(Options::load(file.path()).is_err());
    }
}
