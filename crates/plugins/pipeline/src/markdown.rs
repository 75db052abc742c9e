//! Markdown conversion for token-efficient output.
//!
//! Converts build results, queue handles and job listings to Markdown,
//! which reads better and costs fewer tokens than the JSON payloads.
//!
//! # Format Comparison
//!
//! | Format   | Use Case                    |
//! |----------|-----------------------------|
//! | JSON     | Machine processing          |
//! | Markdown | LLM reading, human readable |
//! | Compact  | Quick overview, listing     |

use jenkins_mcp_core::{BuildOutcome, BuildPhase, BuildResult, JobSummary, PendingWait, QueueHandle};

// ============================================================================
// Builds
// ============================================================================

/// Convert a build result to Markdown.
pub fn build_to_markdown(build: &BuildResult) -> String {
    let mut output = String::new();

    output.push_str(&format!("## {}\n\n", build_title(build)));
    output.push_str(&format!("**Phase:** {}", build.phase));
    if build.phase == BuildPhase::Complete {
        output.push_str(&format!(
            " | **Result:** {} {}",
            outcome_icon(build.outcome),
            build.outcome
        ));
    }
    output.push('\n');

    if let Some(queue_id) = build.queue_id {
        output.push_str(&format!("**Queue item:** {}\n", queue_id));
    }
    if let Some(duration) = build.duration_ms {
        output.push_str(&format!("**Duration:** {}\n", format_duration(duration)));
    }
    if let Some(detail) = &build.detail {
        output.push_str(&format!("**Waiting:** {}\n", detail));
    }
    if let Some(url) = &build.url {
        output.push_str(&format!("**URL:** {}\n", url));
    }

    if let Some(console) = &build.console_tail {
        output.push_str("\n### Console (tail)\n\n```\n");
        output.push_str(console);
        if !console.ends_with('\n') {
            output.push('\n');
        }
        output.push_str("```\n");
    }

    output
}

/// Convert a build result to a single line.
pub fn build_to_compact(build: &BuildResult) -> String {
    let mut line = format!("{} [{}]", build_title(build), build.phase);
    if build.phase == BuildPhase::Complete {
        line.push_str(&format!(" {}", build.outcome));
    }
    if let Some(duration) = build.duration_ms {
        line.push_str(&format!(" in {}", format_duration(duration)));
    }
    line
}

fn build_title(build: &BuildResult) -> String {
    match (build.build_number, build.queue_id) {
        (Some(number), _) => format!("{} #{}", build.job, number),
        (None, Some(queue_id)) => format!("{} (queue item {})", build.job, queue_id),
        (None, None) => build.job.clone(),
    }
}

fn outcome_icon(outcome: BuildOutcome) -> &'static str {
    match outcome {
        BuildOutcome::Success => "✅",
        BuildOutcome::Failure => "❌",
        BuildOutcome::Unstable => "⚠️",
        BuildOutcome::Aborted => "⏹",
        BuildOutcome::Unknown => "❔",
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Describe a freshly queued (or deduplicated) trigger.
pub fn queued_to_markdown(handle: &QueueHandle, duplicate: bool) -> String {
    let mut output = format!(
        "## {} queued\n\n**Queue item:** {}\n",
        handle.job, handle.queue_id
    );
    if duplicate {
        output.push_str("**Note:** idempotency key matched an earlier trigger, no new build was queued\n");
    }
    output.push_str(&format!(
        "\nUse `wait_for_build` with job=\"{}\" and queue_id={} to wait for the result.\n",
        handle.job, handle.queue_id
    ));
    output
}

pub fn queued_to_compact(handle: &QueueHandle, duplicate: bool) -> String {
    let suffix = if duplicate { " (duplicate)" } else { "" };
    format!("{} queued as item {}{}", handle.job, handle.queue_id, suffix)
}

// ============================================================================
// Jobs
// ============================================================================

/// Convert jobs to Markdown format.
pub fn jobs_to_markdown(jobs: &[JobSummary]) -> String {
    if jobs.is_empty() {
        return "No jobs found.".to_string();
    }

    let mut output = String::new();
    output.push_str("# Jobs\n\n");
    output.push_str("| Job | Status |\n|-----|--------|\n");

    for job in jobs {
        output.push_str(&format!(
            "| {} | {} |\n",
            job.name,
            job_status(job.color.as_deref())
        ));
    }

    output
}

/// Convert jobs to compact format (one line per job).
pub fn jobs_to_compact(jobs: &[JobSummary]) -> String {
    if jobs.is_empty() {
        return "No jobs found.".to_string();
    }

    jobs.iter()
        .map(|j| format!("{} [{}]", j.name, job_status(j.color.as_deref())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Translate a Jenkins ball colour into words.
///
/// `_anime` marks a build in progress.
pub fn job_status(color: Option<&str>) -> String {
    let Some(color) = color else {
        return "unknown".to_string();
    };
    let (base, building) = match color.strip_suffix("_anime") {
        Some(base) => (base, true),
        None => (color, false),
    };
    let status = match base {
        "blue" => "passing",
        "red" => "failing",
        "yellow" => "unstable",
        "aborted" => "aborted",
        "disabled" => "disabled",
        "notbuilt" | "grey" => "not built",
        other => other,
    };
    if building {
        format!("{}, building", status)
    } else {
        status.to_string()
    }
}

// ============================================================================
// Pending waits
// ============================================================================

/// Convert in-flight waits to Markdown format.
pub fn pending_to_markdown(pending: &[PendingWait]) -> String {
    if pending.is_empty() {
        return "No builds are being waited on.".to_string();
    }

    let mut output = String::new();
    output.push_str("# Pending builds\n\n");
    output.push_str("| Job | Queue item | Build | Phase | Age | Remaining |\n");
    output.push_str("|-----|------------|-------|-------|-----|-----------|\n");

    for wait in pending {
        output.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            wait.job,
            wait.queue_id.map(|q| q.to_string()).unwrap_or_else(|| "-".into()),
            wait.build_number
                .map(|n| format!("#{}", n))
                .unwrap_or_else(|| "-".into()),
            wait.phase,
            format_duration(wait.age_ms),
            format_duration(wait.remaining_ms),
        ));
    }

    output
}

pub fn pending_to_compact(pending: &[PendingWait]) -> String {
    if pending.is_empty() {
        return "No builds are being waited on.".to_string();
    }

    pending
        .iter()
        .map(|w| {
            let id = match (w.build_number, w.queue_id) {
                (Some(n), _) => format!("#{}", n),
                (None, Some(q)) => format!("queue {}", q),
                (None, None) => "-".to_string(),
            };
            format!(
                "{} {} [{}] {} left",
                w.job,
                id,
                w.phase,
                format_duration(w.remaining_ms)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Console
// ============================================================================

/// Wrap console text in a fenced block.
pub fn console_to_markdown(job: &str, build_number: u64, text: &str) -> String {
    let mut output = format!("## {} #{} console\n\n```\n", job, build_number);
    output.push_str(text);
    if !text.ends_with('\n') {
        output.push('\n');
    }
    output.push_str("```\n");
    output
}

// ============================================================================
// Helpers
// ============================================================================

/// Format milliseconds as `1h 2m`, `3m 4s` or `5.2s`.
fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}
