//! Pipeline for output transformation.
//!
//! Tool results pass through here before they reach the agent:
//!
//! - **Truncation**: cap list sizes and console output, with hints about what
//!   was left out
//! - **Markdown**: render results as Markdown or one-liners instead of JSON
//!
//! # Example
//!
//! ```ignore
//! use jenkins_mcp_pipeline::{OutputFormat, Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::with_config(PipelineConfig {
//!     format: OutputFormat::Compact,
//!     ..Default::default()
//! });
//! let output = pipeline.transform_build(&result)?;
//! ```

pub mod markdown;
pub mod truncation;

use std::str::FromStr;

use jenkins_mcp_core::{BuildResult, Error, JobSummary, PendingWait, QueueHandle, Result};

/// Output from a pipeline transformation.
///
/// Contains the transformed data and metadata about truncation.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// The transformed output (Markdown, compact text or JSON string)
    pub content: String,
    /// Whether the output was truncated
    pub truncated: bool,
    /// Total count before truncation (if known)
    pub total_count: Option<usize>,
    /// Number of items actually included
    pub included_count: usize,
    /// Hint for the agent about hidden content
    pub agent_hint: Option<String>,
}

impl TransformOutput {
    /// Create a new output with content.
    pub fn new(content: String) -> Self {
        Self {
            content,
            truncated: false,
            total_count: None,
            included_count: 0,
            agent_hint: None,
        }
    }

    /// Mark output as truncated with a hint.
    pub fn with_truncation(mut self, total: usize, included: usize, hint: String) -> Self {
        self.truncated = true;
        self.total_count = Some(total);
        self.included_count = included;
        self.agent_hint = Some(hint);
        self
    }

    /// Get the final output including any agent hints.
    pub fn to_string_with_hints(&self) -> String {
        if let Some(hint) = &self.agent_hint {
            format!("{}\n\n{}", self.content, hint)
        } else {
            self.content.clone()
        }
    }
}

/// Configuration for pipeline transformations.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of items to include in list output
    pub max_items: usize,
    /// Maximum characters for the entire output
    pub max_chars: usize,
    /// Maximum characters of console text
    pub max_console_chars: usize,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include agent hints about truncation
    pub include_hints: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_items: 50,
            max_chars: 8000,
            max_console_chars: 6000,
            format: OutputFormat::Markdown,
            include_hints: true,
        }
    }
}

/// Output format for transformations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Markdown (default)
    #[default]
    Markdown,
    /// One line per item
    Compact,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "compact" => Ok(OutputFormat::Compact),
            other => Err(Error::InvalidArgument(format!(
                "unknown format '{}', expected markdown, compact or json",
                other
            ))),
        }
    }
}

/// Pipeline for shaping tool output.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with default configuration.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    /// Create a pipeline with custom configuration.
    pub fn with_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Same configuration, different format.
    pub fn with_format(format: OutputFormat) -> Self {
        Self::with_config(PipelineConfig {
            format,
            ..Default::default()
        })
    }

    /// Transform a single build result.
    pub fn transform_build(&self, build: &BuildResult) -> Result<TransformOutput> {
        let mut build = build.clone();
        if let Some(console) = &build.console_tail {
            build.console_tail = Some(truncation::truncate_log_head(
                console,
                self.config.max_console_chars,
            ));
        }

        let content = match self.config.format {
            OutputFormat::Json => serde_json::to_string_pretty(&build)?,
            OutputFormat::Markdown => markdown::build_to_markdown(&build),
            OutputFormat::Compact => markdown::build_to_compact(&build),
        };

        let mut output = TransformOutput::new(content);
        output.included_count = 1;
        Ok(self.apply_char_limit(output))
    }

    /// Transform the handle of a trigger that did not wait.
    pub fn transform_queued(&self, handle: &QueueHandle, duplicate: bool) -> Result<TransformOutput> {
        let content = match self.config.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "job": handle.job,
                "queue_id": handle.queue_id,
                "phase": "QUEUED",
                "duplicate": duplicate,
            }))?,
            OutputFormat::Markdown => markdown::queued_to_markdown(handle, duplicate),
            OutputFormat::Compact => markdown::queued_to_compact(handle, duplicate),
        };

        let mut output = TransformOutput::new(content);
        output.included_count = 1;
        Ok(output)
    }

    /// Transform a list of jobs.
    pub fn transform_jobs(&self, jobs: Vec<JobSummary>) -> Result<TransformOutput> {
        let total = jobs.len();
        let truncated_jobs = self.truncate_items(jobs);
        let included = truncated_jobs.len();

        let content = match self.config.format {
            OutputFormat::Json => serde_json::to_string_pretty(&truncated_jobs)?,
            OutputFormat::Markdown => markdown::jobs_to_markdown(&truncated_jobs),
            OutputFormat::Compact => markdown::jobs_to_compact(&truncated_jobs),
        };

        let mut output = TransformOutput::new(content);
        output.included_count = included;

        if included < total && self.config.include_hints {
            let hint = self.create_truncation_hint("jobs", total, included);
            output = output.with_truncation(total, included, hint);
        }

        Ok(self.apply_char_limit(output))
    }

    /// Transform the registry's pending waits.
    pub fn transform_pending(&self, pending: Vec<PendingWait>) -> Result<TransformOutput> {
        let total = pending.len();
        let truncated_pending = self.truncate_items(pending);
        let included = truncated_pending.len();

        let content = match self.config.format {
            OutputFormat::Json => serde_json::to_string_pretty(&truncated_pending)?,
            OutputFormat::Markdown => markdown::pending_to_markdown(&truncated_pending),
            OutputFormat::Compact => markdown::pending_to_compact(&truncated_pending),
        };

        let mut output = TransformOutput::new(content);
        output.included_count = included;

        if included < total && self.config.include_hints {
            let hint = self.create_truncation_hint("pending builds", total, included);
            output = output.with_truncation(total, included, hint);
        }

        Ok(self.apply_char_limit(output))
    }

    /// Transform console output, keeping its end.
    pub fn transform_console(&self, job: &str, build_number: u64, text: &str) -> Result<TransformOutput> {
        let clipped = truncation::truncate_log_head(text, self.config.max_console_chars);
        let truncated = clipped.len() != text.len();

        let content = match self.config.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "job": job,
                "build_number": build_number,
                "console": clipped,
            }))?,
            OutputFormat::Markdown => markdown::console_to_markdown(job, build_number, &clipped),
            OutputFormat::Compact => clipped,
        };

        let mut output = TransformOutput::new(content);
        output.included_count = 1;
        if truncated && self.config.include_hints {
            output.truncated = true;
            output.agent_hint = Some(format!(
                "Console trimmed to the last {} chars. Request fewer `lines` to see a smaller tail.",
                self.config.max_console_chars
            ));
        }
        Ok(output)
    }

    /// Truncate a vector to max_items.
    fn truncate_items<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().take(self.config.max_items).collect()
    }

    /// Apply character limit to output.
    fn apply_char_limit(&self, mut output: TransformOutput) -> TransformOutput {
        if output.content.len() > self.config.max_chars {
            output.content = truncation::truncate_string(&output.content, self.config.max_chars);
            if !output.truncated {
                output.truncated = true;
                output.agent_hint = Some(format!(
                    "Output truncated to {} chars.",
                    self.config.max_chars
                ));
            }
        }
        output
    }

    fn create_truncation_hint(&self, item_type: &str, total: usize, included: usize) -> String {
        format!(
            "Showing {}/{} {}. {} more not shown.",
            included,
            total,
            item_type,
            total - included
        )
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jenkins_mcp_core::{BuildOutcome, BuildPhase};

    fn sample_jobs(n: usize) -> Vec<JobSummary> {
        (1..=n)
            .map(|i| JobSummary {
                name: format!("job-{}", i),
                url: Some(format!("https://ci.example.com/job/job-{}/", i)),
                color: Some("blue".to_string()),
            })
            .collect()
    }

    #[test]
    fn test_pipeline_truncates_jobs() {
        let pipeline = Pipeline::with_config(PipelineConfig {
            max_items: 5,
            ..Default::default()
        });

        let output = pipeline.transform_jobs(sample_jobs(25)).unwrap();

        assert!(output.truncated);
        assert_eq!(output.total_count, Some(25));
        assert_eq!(output.included_count, 5);
        assert!(output.to_string_with_hints().contains("Showing 5/25 jobs"));
    }

    #[test]
    fn test_pipeline_no_truncation_when_under_limit() {
        let output = Pipeline::new().transform_jobs(sample_jobs(5)).unwrap();
        assert!(!output.truncated);
        assert!(output.agent_hint.is_none());
    }

    #[test]
    fn test_json_build_round_trips() {
        let pipeline = Pipeline::with_format(OutputFormat::Json);
        let build = BuildResult::complete("build-api", 7, BuildOutcome::Success);

        let output = pipeline.transform_build(&build).unwrap();
        let parsed: BuildResult = serde_json::from_str(&output.content).unwrap();
        assert_eq!(parsed.phase, BuildPhase::Complete);
        assert_eq!(parsed.build_number, Some(7));
    }

    #[test]
    fn test_build_console_is_trimmed_from_the_front() {
        let pipeline = Pipeline::with_config(PipelineConfig {
            max_console_chars: 50,
            ..Default::default()
        });
        let console = (1..=100)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let build = BuildResult {
            console_tail: Some(console),
            ..BuildResult::complete("build-api", 7, BuildOutcome::Failure)
        };

        let output = pipeline.transform_build(&build).unwrap();
        assert!(output.content.contains("line 100"));
        assert!(output.content.contains("lines hidden"));
    }

    #[test]
    fn test_queued_formats() {
        let handle = QueueHandle::new("build-api", 42);
        let compact = Pipeline::with_format(OutputFormat::Compact)
            .transform_queued(&handle, true)
            .unwrap();
        assert_eq!(compact.content, "build-api queued as item 42 (duplicate)");

        let json = Pipeline::with_format(OutputFormat::Json)
            .transform_queued(&handle, false)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json.content).unwrap();
        assert_eq!(value["queue_id"], 42);
    }

    #[test]
    fn test_console_hint_when_trimmed() {
        let pipeline = Pipeline::with_config(PipelineConfig {
            max_console_chars: 20,
            ..Default::default()
        });
        let output = pipeline
            .transform_console("build-api", 7, "a fairly long line\nanother long line\nlast")
            .unwrap();
        assert!(output.truncated);
        assert!(output.content.contains("last"));
    }

    #[test]
    fn test_char_limit_applied() {
        let pipeline = Pipeline::with_config(PipelineConfig {
            max_items: 100,
            max_chars: 100,
            ..Default::default()
        });

        let output = pipeline.transform_jobs(sample_jobs(25)).unwrap();

        assert!(output.content.len() <= 100);
        assert!(output.truncated);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
