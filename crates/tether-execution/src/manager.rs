//! Execution manager

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tether_binding::RuntimeBinder;
use tether_types::{
    DeviceId, EventBus, EventSource, ExecutionContext, ExecutionId, ExecutionMode, Runtime,
    RuntimeExecutionResult, RuntimeType, TetherEvent,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::active::{ActiveExecution, ActiveGuard, ActiveTable};
use crate::config::ExecutionConfig;
use crate::error::{ExecutionError, Result};
use crate::lines::{count_output_lines, count_source_lines, split_logical_lines};
use crate::types::{
    BatchResult, ExecutionMetrics, ExecutionOptions, ExecutionRequest, ExecutionResult,
    ExecutionStatistics, ExecutionStatusReport, StreamEvent,
};

/// Runs code on devices through their bound runtimes
pub struct ExecutionManager {
    config: ExecutionConfig,
    binder: Arc<RuntimeBinder>,
    active: ActiveTable,
    history: Mutex<VecDeque<ExecutionResult>>,
    events: EventBus,
}

/// Everything needed to run once admission succeeded
struct Admitted {
    runtime: Arc<dyn Runtime>,
    ctx: ExecutionContext,
    guard: ActiveGuard,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl ExecutionManager {
    pub fn new(config: ExecutionConfig, binder: Arc<RuntimeBinder>, events: EventBus) -> Self {
        Self {
            config,
            binder,
            active: ActiveTable::default(),
            history: Mutex::new(VecDeque::new()),
            events,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Resolve the runtime and claim an active slot for the device
    fn admit(&self, device_id: &DeviceId, options: &ExecutionOptions, lines_total: usize) -> Result<Admitted> {
        let runtime = self
            .binder
            .get_runtime(device_id)
            .ok_or_else(|| ExecutionError::NoRuntimeBound(device_id.clone()))?;
        let runtime_type = runtime.runtime_type();
        let timeout = options.timeout.unwrap_or_else(|| self.config.default_timeout());

        let execution_id = ExecutionId::generate();
        let cancellation = CancellationToken::new();
        let started = Instant::now();
        let started_at = Utc::now();

        let guard = self.active.admit(
            ActiveExecution {
                execution_id,
                device_id: device_id.clone(),
                runtime_type,
                mode: options.mode,
                started_at,
                started,
                timeout,
                cancellation: cancellation.clone(),
                lines_completed: 0,
                lines_total,
            },
            self.config.max_concurrent_executions,
        )?;

        self.binder.touch(device_id);
        debug!(device_id = %device_id, execution_id = %execution_id, "Execution admitted");
        self.events.emit(
            EventSource::Execution,
            TetherEvent::ExecutionStarted {
                device_id: device_id.clone(),
                execution_id,
                runtime_type,
            },
        );

        Ok(Admitted {
            runtime,
            ctx: ExecutionContext {
                execution_id,
                device_id: device_id.clone(),
                mode: options.mode,
                timeout,
                cancellation,
            },
            guard,
            started,
            started_at,
        })
    }

    /// Run code once on a device
    ///
    /// A runtime that reports a script failure yields `Ok` with
    /// `success == false`; runtime faults, timeouts and interruption are
    /// errors.
    #[instrument(skip(self, code, options), fields(device_id = %device_id))]
    pub async fn execute_code(
        &self,
        device_id: &DeviceId,
        code: &str,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult> {
        let admitted = self.admit(device_id, &options, 0)?;
        let Admitted {
            runtime,
            ctx,
            guard,
            started,
            started_at,
        } = admitted;

        let outcome = run_with_limits(runtime.as_ref(), code, &ctx, ctx.timeout).await;
        drop(guard);

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(raw) => {
                let result = self.build_result(&ctx, runtime.runtime_type(), started_at, duration_ms, code, raw);
                info!(
                    device_id = %device_id,
                    execution_id = %ctx.execution_id,
                    success = result.success,
                    duration_ms,
                    "Execution completed"
                );
                self.events.emit(
                    EventSource::Execution,
                    TetherEvent::ExecutionCompleted {
                        device_id: device_id.clone(),
                        execution_id: ctx.execution_id,
                        success: result.success,
                        duration_ms,
                    },
                );
                self.record(result.clone());
                Ok(result)
            }
            Err(err) => {
                let failed = self.build_result(
                    &ctx,
                    runtime.runtime_type(),
                    started_at,
                    duration_ms,
                    code,
                    RuntimeExecutionResult::failed(err.to_string()),
                );
                self.record(failed);
                self.report_failure(&ctx, &err);
                Err(err)
            }
        }
    }

    /// Run several requests concurrently
    ///
    /// Each entry is admitted independently, so entries for the same device
    /// race and all but one fail with `AlreadyExecuting`. Results come back
    /// in submission order.
    pub async fn execute_batch(&self, requests: Vec<ExecutionRequest>) -> Vec<BatchResult> {
        let mut pending: FuturesUnordered<_> = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| async move {
                let result = self
                    .execute_code(&request.device_id, &request.code, request.options)
                    .await;
                BatchResult {
                    index,
                    device_id: request.device_id,
                    result,
                }
            })
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        while let Some(result) = pending.next().await {
            results.push(result);
        }
        results.sort_by_key(|r| r.index);
        results
    }

    /// Stop the active execution on a device
    ///
    /// Returns `false` when nothing was running. The runtime's interrupt
    /// hook, if any, is invoked best-effort.
    #[instrument(skip(self))]
    pub async fn interrupt_execution(&self, device_id: &DeviceId) -> bool {
        let Some(active) = self.active.take(device_id) else {
            debug!(device_id = %device_id, "Nothing to interrupt");
            return false;
        };
        active.cancellation.cancel();

        if let Some(runtime) = self.binder.get_runtime(device_id) {
            if let Some(hook) = runtime.interrupt_hook() {
                if let Err(e) = hook.interrupt(device_id).await {
                    warn!(device_id = %device_id, error = %e, "Runtime interrupt hook failed");
                }
            }
        }

        info!(device_id = %device_id, execution_id = %active.execution_id, "Execution interrupted");
        self.events.emit(
            EventSource::Execution,
            TetherEvent::ExecutionInterrupted {
                device_id: device_id.clone(),
                execution_id: active.execution_id,
            },
        );
        true
    }

    /// Run code line by line, yielding progress and output as it goes
    ///
    /// Admission happens on the call. The returned stream is lazy and
    /// finite, always ends with [`StreamEvent::Complete`], and releases the
    /// device when exhausted or dropped.
    #[instrument(skip(self, code), fields(device_id = %device_id))]
    pub fn stream_execution(
        &self,
        device_id: &DeviceId,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<BoxStream<'_, StreamEvent>> {
        let lines = split_logical_lines(code);
        let options = ExecutionOptions {
            mode: ExecutionMode::Stream,
            timeout,
        };
        let admitted = self.admit(device_id, &options, lines.len())?;

        let state = StreamState {
            manager: self,
            admitted: Some(admitted),
            source: code.to_string(),
            lines,
            next: 0,
            staged: None,
            ran: 0,
            pending: VecDeque::new(),
            output: String::new(),
            errors: String::new(),
            finished: false,
        };

        Ok(stream::unfold(state, |mut state| async move {
            state.advance().await.map(|event| (event, state))
        })
        .boxed())
    }

    /// Live status of the device's active execution
    pub fn get_execution_status(&self, device_id: &DeviceId) -> Option<ExecutionStatusReport> {
        self.active.get(device_id).map(|a| a.report())
    }

    pub fn is_executing(&self, device_id: &DeviceId) -> bool {
        self.active.get(device_id).is_some()
    }

    pub fn active_executions(&self) -> Vec<ExecutionStatusReport> {
        self.active.reports()
    }

    /// Most recent results, newest last
    pub fn get_execution_history(&self, limit: Option<usize>) -> Vec<ExecutionResult> {
        let history = self.history.lock();
        let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    pub fn get_statistics(&self) -> ExecutionStatistics {
        let history = self.history.lock();
        let total = history.len();
        let successful = history.iter().filter(|r| r.success).count();
        let average_duration_ms = if total == 0 {
            0.0
        } else {
            history.iter().map(|r| r.duration_ms as f64).sum::<f64>() / total as f64
        };

        ExecutionStatistics {
            total,
            successful,
            failed: total - successful,
            active: self.active.len(),
            average_duration_ms,
        }
    }

    fn build_result(
        &self,
        ctx: &ExecutionContext,
        runtime_type: RuntimeType,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        code: &str,
        raw: RuntimeExecutionResult,
    ) -> ExecutionResult {
        let error = (!raw.success).then(|| {
            if raw.stderr.is_empty() {
                "Execution failed".to_string()
            } else {
                raw.stderr.clone()
            }
        });

        ExecutionResult {
            execution_id: ctx.execution_id,
            device_id: ctx.device_id.clone(),
            runtime_type,
            mode: ctx.mode,
            success: raw.success,
            metrics: ExecutionMetrics {
                lines_executed: count_source_lines(code),
                output_lines: count_output_lines(&raw.stdout),
                memory_used: raw.memory_used,
            },
            output: raw.stdout,
            error,
            return_value: raw.return_value,
            started_at,
            completed_at: Utc::now(),
            duration_ms,
        }
    }

    fn record(&self, result: ExecutionResult) {
        let mut history = self.history.lock();
        history.push_back(result);
        while history.len() > self.config.max_history_size {
            history.pop_front();
        }
    }

    /// Interruption already announced itself; everything else is a failure
    fn report_failure(&self, ctx: &ExecutionContext, err: &ExecutionError) {
        if matches!(err, ExecutionError::Cancelled(_)) {
            debug!(device_id = %ctx.device_id, execution_id = %ctx.execution_id, "Execution cancelled");
            return;
        }
        warn!(device_id = %ctx.device_id, execution_id = %ctx.execution_id, error = %err, "Execution failed");
        self.events.emit(
            EventSource::Execution,
            TetherEvent::ExecutionFailed {
                device_id: ctx.device_id.clone(),
                execution_id: ctx.execution_id,
                error: err.to_string(),
            },
        );
    }
}

/// Run one piece of code, bounded by the timeout and the cancellation token
async fn run_with_limits(
    runtime: &dyn Runtime,
    code: &str,
    ctx: &ExecutionContext,
    budget: Duration,
) -> Result<RuntimeExecutionResult> {
    tokio::select! {
        biased;
        _ = ctx.cancellation.cancelled() => Err(ExecutionError::Cancelled(ctx.device_id.clone())),
        outcome = tokio::time::timeout(budget, runtime.execute_code(code, ctx)) => match outcome {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(source)) => Err(ExecutionError::Runtime {
                device_id: ctx.device_id.clone(),
                source,
            }),
            Err(_) => {
                ctx.cancellation.cancel();
                Err(ExecutionError::Timeout {
                    device_id: ctx.device_id.clone(),
                    timeout_ms: ctx.timeout.as_millis() as u64,
                })
            }
        },
    }
}

struct StreamState<'a> {
    manager: &'a ExecutionManager,

    /// Taken when the stream finishes, releasing the device
    admitted: Option<Admitted>,
    source: String,
    lines: Vec<String>,
    next: usize,

    /// Line announced by the last Progress item, not yet run
    staged: Option<String>,
    ran: usize,
    pending: VecDeque<StreamEvent>,
    output: String,
    errors: String,
    finished: bool,
}

impl StreamState<'_> {
    async fn advance(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                self.admitted = None;
                return None;
            }
            let admitted = self.admitted.as_ref()?;

            if admitted.ctx.cancellation.is_cancelled() {
                self.finish(false, None);
                continue;
            }

            // Progress for a line is yielded before the line runs
            let Some(code) = self.staged.take() else {
                if self.next >= self.lines.len() {
                    self.finish(true, None);
                    continue;
                }
                let code = self.lines[self.next].clone();
                self.next += 1;
                self.pending.push_back(StreamEvent::Progress {
                    execution_id: admitted.ctx.execution_id,
                    line: self.next,
                    total: self.lines.len(),
                    code: code.clone(),
                });
                self.staged = Some(code);
                continue;
            };

            let line_no = self.next;
            let execution_id = admitted.ctx.execution_id;
            let remaining = admitted.ctx.timeout.saturating_sub(admitted.started.elapsed());
            let outcome = run_with_limits(admitted.runtime.as_ref(), &code, &admitted.ctx, remaining).await;
            self.ran += 1;

            match outcome {
                Ok(raw) if raw.success => {
                    self.manager
                        .active
                        .set_progress(&admitted.ctx.device_id, execution_id, line_no);
                    if !raw.stdout.is_empty() {
                        self.output.push_str(&raw.stdout);
                        self.pending.push_back(StreamEvent::Output {
                            execution_id,
                            line: line_no,
                            output: raw.stdout,
                            is_error: false,
                        });
                    }
                }
                Ok(raw) => {
                    self.output.push_str(&raw.stdout);
                    let message = if raw.stderr.is_empty() {
                        "Execution failed".to_string()
                    } else {
                        raw.stderr
                    };
                    self.pending.push_back(StreamEvent::Output {
                        execution_id,
                        line: line_no,
                        output: message.clone(),
                        is_error: true,
                    });
                    self.errors.push_str(&message);
                    self.finish(false, None);
                }
                Err(err) => {
                    if !matches!(err, ExecutionError::Cancelled(_)) {
                        self.pending.push_back(StreamEvent::Output {
                            execution_id,
                            line: line_no,
                            output: err.to_string(),
                            is_error: true,
                        });
                    }
                    self.errors.push_str(&err.to_string());
                    self.finish(false, Some(err));
                }
            }
        }
    }

    /// Queue the terminal item and record the outcome
    fn finish(&mut self, success: bool, err: Option<ExecutionError>) {
        self.finished = true;
        let Some(admitted) = self.admitted.as_ref() else {
            return;
        };
        let manager = self.manager;
        let ctx = &admitted.ctx;
        let duration_ms = admitted.started.elapsed().as_millis() as u64;
        let cancelled = ctx.cancellation.is_cancelled() && err.is_none() && !success;

        let raw = RuntimeExecutionResult {
            success,
            stdout: std::mem::take(&mut self.output),
            stderr: std::mem::take(&mut self.errors),
            return_value: None,
            memory_used: None,
        };
        let mut result = manager.build_result(
            ctx,
            admitted.runtime.runtime_type(),
            admitted.started_at,
            duration_ms,
            &self.source,
            raw,
        );
        if cancelled {
            result.error = Some("Interrupted".to_string());
        }
        manager.record(result);

        match err {
            Some(err) => manager.report_failure(ctx, &err),
            None if !cancelled => {
                manager.events.emit(
                    EventSource::Execution,
                    TetherEvent::ExecutionCompleted {
                        device_id: ctx.device_id.clone(),
                        execution_id: ctx.execution_id,
                        success,
                        duration_ms,
                    },
                );
            }
            None => {}
        }

        self.pending.push_back(StreamEvent::Complete {
            execution_id: ctx.execution_id,
            success,
            lines_executed: self.ran,
            duration_ms,
        });
    }
}
