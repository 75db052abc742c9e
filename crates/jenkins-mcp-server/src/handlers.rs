//! Tool handlers for the MCP server.
//!
//! Each [`ToolName`] maps to one of three things: a direct Jenkins query, a
//! build orchestration, or a look into the correlation registry. Output goes
//! through the pipeline; failures become the `{code, message}` envelope.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jenkins_mcp_bridge::BuildOrchestrator;
use jenkins_mcp_core::{CancelTarget, Error, QueueHandle, Result, Settings, TriggerRequest};
use jenkins_mcp_pipeline::{OutputFormat, Pipeline, PipelineConfig, TransformOutput};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::protocol::{ToolCallResult, ToolDefinition};
use crate::tools::{tool_definitions, ToolName};

/// Lines returned by `get_build_log` when the caller does not say.
const DEFAULT_LOG_LINES: usize = 200;

/// Executes tool calls against the orchestrator and the registry.
pub struct ToolDispatcher {
    orchestrator: Arc<BuildOrchestrator>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    console_tail_lines: usize,
    pipeline_config: PipelineConfig,
}

impl ToolDispatcher {
    pub fn new(orchestrator: Arc<BuildOrchestrator>, settings: &Settings) -> Self {
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_triggers)),
            max_concurrent: settings.max_concurrent_triggers,
            console_tail_lines: settings.console_tail_lines,
            pipeline_config: PipelineConfig::default(),
        }
    }

    pub fn orchestrator(&self) -> &Arc<BuildOrchestrator> {
        &self.orchestrator
    }

    /// Orchestration slots currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Get available tool definitions.
    pub fn available_tools(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    /// Execute a tool by name with arguments. Never fails: errors are
    /// returned as an error result.
    pub async fn execute(&self, name: &str, arguments: Option<Value>) -> ToolCallResult {
        let tool = match name.parse::<ToolName>() {
            Ok(tool) => tool,
            Err(err) => return ToolCallResult::failure(&err),
        };
        let arguments = arguments.unwrap_or_else(|| Value::Object(Map::new()));

        match self.dispatch(tool, arguments).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!("Tool {} failed: {}", tool, err);
                ToolCallResult::failure(&err)
            }
        }
    }

    async fn dispatch(&self, tool: ToolName, arguments: Value) -> Result<ToolCallResult> {
        let _permit = if tool.needs_permit() {
            Some(self.acquire_permit()?)
        } else {
            None
        };

        match tool {
            ToolName::TriggerBuild => self.handle_trigger_build(parse_args(arguments)?).await,
            ToolName::GetBuildStatus => {
                self.handle_get_build_status(parse_args(arguments)?).await
            }
            ToolName::GetQueueStatus => {
                self.handle_get_queue_status(parse_args(arguments)?).await
            }
            ToolName::CancelBuild => self.handle_cancel_build(parse_args(arguments)?).await,
            ToolName::WaitForBuild => self.handle_wait_for_build(parse_args(arguments)?).await,
            ToolName::GetBuildLog => self.handle_get_build_log(parse_args(arguments)?).await,
            ToolName::ListJobs => self.handle_list_jobs(parse_args(arguments)?).await,
            ToolName::ListPendingBuilds => self.handle_list_pending(parse_args(arguments)?),
        }
    }

    /// Take an orchestration slot or fail straight away.
    fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| Error::Busy {
                limit: self.max_concurrent,
            })
    }

    // ========================================================================
    // Orchestrations
    // ========================================================================

    async fn handle_trigger_build(&self, params: TriggerBuildParams) -> Result<ToolCallResult> {
        require_job(&params.job)?;
        let pipeline = self.create_pipeline(&params.format)?;

        let mut request = TriggerRequest::new(&params.job);
        for (key, value) in params.params.unwrap_or_default() {
            let value = param_value(&key, value)?;
            request = request.with_param(key, value);
        }
        if let Some(key) = params.idempotency_key.filter(|k| !k.is_empty()) {
            request = request.with_idempotency_key(key);
        }

        if params.wait.unwrap_or(true) {
            let result = self.orchestrator.run(&request).await?;
            let structured = serde_json::to_value(&result)?;
            return render(pipeline.transform_build(&result)?, structured);
        }

        let submission = self.orchestrator.submit(&request).await?;
        let structured = json!({
            "job": submission.handle.job,
            "queue_id": submission.handle.queue_id,
            "phase": "QUEUED",
            "duplicate": submission.duplicate,
        });
        render(
            pipeline.transform_queued(&submission.handle, submission.duplicate)?,
            structured,
        )
    }

    async fn handle_wait_for_build(&self, params: WaitForBuildParams) -> Result<ToolCallResult> {
        require_job(&params.job)?;
        let pipeline = self.create_pipeline(&params.format)?;
        let timeout = match params.timeout_ms {
            Some(0) => {
                return Err(Error::InvalidArgument(
                    "timeout_ms must be greater than zero".into(),
                ))
            }
            Some(ms) => Duration::from_millis(ms),
            None => self.orchestrator.max_wait(),
        };

        let handle = QueueHandle::new(&params.job, params.queue_id);
        let result = self.orchestrator.wait_for_queued(&handle, timeout).await?;
        let structured = serde_json::to_value(&result)?;
        render(pipeline.transform_build(&result)?, structured)
    }

    // ========================================================================
    // Direct queries
    // ========================================================================

    async fn handle_get_build_status(
        &self,
        params: GetBuildStatusParams,
    ) -> Result<ToolCallResult> {
        require_job(&params.job)?;
        let pipeline = self.create_pipeline(&params.format)?;
        let provider = self.orchestrator.provider();

        let mut result = provider.poll_build(&params.job, params.build_number).await?;
        if params.include_console.unwrap_or(false) {
            let lines = self.console_tail_lines.max(1);
            result.console_tail = Some(
                provider
                    .console_tail(&params.job, params.build_number, lines)
                    .await?,
            );
        }

        let structured = serde_json::to_value(&result)?;
        render(pipeline.transform_build(&result)?, structured)
    }

    async fn handle_get_queue_status(
        &self,
        params: GetQueueStatusParams,
    ) -> Result<ToolCallResult> {
        require_job(&params.job)?;
        let pipeline = self.create_pipeline(&params.format)?;

        let handle = QueueHandle::new(&params.job, params.queue_id);
        let result = self.orchestrator.provider().poll_queue(&handle).await?;
        let structured = serde_json::to_value(&result)?;
        render(pipeline.transform_build(&result)?, structured)
    }

    async fn handle_cancel_build(&self, params: CancelBuildParams) -> Result<ToolCallResult> {
        require_job(&params.job)?;
        let target = match (params.build_number, params.queue_id) {
            (Some(number), None) => CancelTarget::Build(number),
            (None, Some(id)) => CancelTarget::Queue(id),
            _ => {
                return Err(Error::InvalidArgument(
                    "pass exactly one of build_number or queue_id".into(),
                ))
            }
        };

        self.orchestrator.provider().cancel(&params.job, target).await?;
        tracing::info!(job = %params.job, target = %target, "Cancellation requested");

        Ok(ToolCallResult::success(
            format!("Cancellation requested for {} {}", params.job, target),
            json!({
                "job": params.job,
                "target": target,
                "cancelled": true,
            }),
        ))
    }

    async fn handle_get_build_log(&self, params: GetBuildLogParams) -> Result<ToolCallResult> {
        require_job(&params.job)?;
        let pipeline = self.create_pipeline(&params.format)?;
        let lines = match params.lines {
            Some(0) => return Err(Error::InvalidArgument("lines must be greater than zero".into())),
            Some(lines) => lines,
            None => DEFAULT_LOG_LINES,
        };

        let text = self
            .orchestrator
            .provider()
            .console_tail(&params.job, params.build_number, lines)
            .await?;
        let output = pipeline.transform_console(&params.job, params.build_number, &text)?;
        render(
            output,
            json!({
                "job": params.job,
                "build_number": params.build_number,
                "lines": lines,
                "console": text,
            }),
        )
    }

    async fn handle_list_jobs(&self, params: FormatParams) -> Result<ToolCallResult> {
        let pipeline = self.create_pipeline(&params.format)?;
        let jobs = self.orchestrator.provider().list_jobs().await?;
        tracing::debug!("Got {} jobs", jobs.len());

        let structured = json!({ "jobs": jobs });
        render(pipeline.transform_jobs(jobs)?, structured)
    }

    // ========================================================================
    // Registry inspection
    // ========================================================================

    fn handle_list_pending(&self, params: FormatParams) -> Result<ToolCallResult> {
        let pipeline = self.create_pipeline(&params.format)?;
        let pending = self.orchestrator.registry().pending();

        let structured = json!({ "pending": pending });
        render(pipeline.transform_pending(pending)?, structured)
    }

    /// Create a pipeline with the specified format.
    fn create_pipeline(&self, format: &Option<String>) -> Result<Pipeline> {
        let format = match format.as_deref() {
            Some(name) => name.parse::<OutputFormat>()?,
            None => self.pipeline_config.format,
        };
        Ok(Pipeline::with_config(PipelineConfig {
            format,
            ..self.pipeline_config.clone()
        }))
    }
}

fn render(output: TransformOutput, structured: Value) -> Result<ToolCallResult> {
    Ok(ToolCallResult::success(
        output.to_string_with_hints(),
        structured,
    ))
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments).map_err(|e| Error::InvalidArgument(e.to_string()))
}

fn require_job(job: &str) -> Result<()> {
    if job.trim().is_empty() {
        return Err(Error::InvalidArgument("job must not be empty".into()));
    }
    Ok(())
}

/// Jenkins parameters are strings; accept JSON scalars and stringify them.
fn param_value(key: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::InvalidArgument(format!(
            "parameter '{}' must be a string, number or boolean",
            key
        ))),
    }
}

/// Parameters for trigger_build tool.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TriggerBuildParams {
    job: String,
    params: Option<BTreeMap<String, Value>>,
    wait: Option<bool>,
    idempotency_key: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GetBuildStatusParams {
    job: String,
    build_number: u64,
    include_console: Option<bool>,
    format: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GetQueueStatusParams {
    job: String,
    queue_id: u64,
    format: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CancelBuildParams {
    job: String,
    build_number: Option<u64>,
    queue_id: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WaitForBuildParams {
    job: String,
    queue_id: u64,
    timeout_ms: Option<u64>,
    format: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GetBuildLogParams {
    job: String,
    build_number: u64,
    lines: Option<usize>,
    format: Option<String>,
}

/// Parameters for tools that only take an output format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FormatParams {
    format: Option<String>,
}
