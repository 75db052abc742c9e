//! Drives one build from trigger to a definitive outcome.
//!
//! Two observers race for every waiter: a cooperative poll loop and whatever
//! webhooks the ingestor routes into the registry. The orchestrator deadline
//! bounds both.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jenkins_mcp_core::{
    BuildResult, CancelTarget, CiProvider, Error, QueueHandle, Result, Settings, TriggerRequest,
};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::registry::{CorrelationKey, CorrelationRegistry, WaitKey, WaiterRef};

/// Result of a trigger that does not wait for the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub handle: QueueHandle,
    /// The idempotency key matched an earlier trigger; nothing new was queued.
    pub duplicate: bool,
}

enum TokenState {
    Triggering,
    Queued {
        handle: QueueHandle,
        expires_at: Instant,
    },
}

pub struct BuildOrchestrator {
    provider: Arc<dyn CiProvider>,
    registry: Arc<CorrelationRegistry>,
    poll_interval: Duration,
    max_wait: Duration,
    console_tail_lines: usize,
    tokens: DashMap<String, TokenState>,
}

impl BuildOrchestrator {
    pub fn new(
        provider: Arc<dyn CiProvider>,
        registry: Arc<CorrelationRegistry>,
        settings: &Settings,
    ) -> Self {
        Self {
            provider,
            registry,
            poll_interval: settings.poll_interval,
            max_wait: settings.max_wait,
            console_tail_lines: settings.console_tail_lines,
            tokens: DashMap::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn CiProvider> {
        &self.provider
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Trigger a build and wait for its terminal result.
    ///
    /// A repeated idempotency key whose build is still in flight fails with
    /// `Conflict` instead of queueing a second build.
    pub async fn run(&self, request: &TriggerRequest) -> Result<BuildResult> {
        let submission = self.submit(request).await?;
        if submission.duplicate {
            return Err(Error::Conflict(format!(
                "a build for this idempotency key is already in flight as queue item {}",
                submission.handle.queue_id
            )));
        }

        let result = self
            .wait_for_queued(&submission.handle, self.max_wait)
            .await;

        if let Some(token) = &request.idempotency_key {
            self.tokens.remove(token);
        }
        result
    }

    /// Trigger a build and return its queue handle without waiting.
    pub async fn submit(&self, request: &TriggerRequest) -> Result<Submission> {
        let Some(token) = request.idempotency_key.clone() else {
            let handle = self.provider.trigger(request).await?;
            return Ok(Submission {
                handle,
                duplicate: false,
            });
        };

        if let Some(handle) = self.reserve_token(&token)? {
            debug!(job = %handle.job, queue_id = handle.queue_id, "Idempotency key matched");
            return Ok(Submission {
                handle,
                duplicate: true,
            });
        }

        // Released on error or if this future is dropped mid-trigger.
        let reservation = TokenReservation {
            tokens: &self.tokens,
            token: Some(token),
        };
        let handle = self.provider.trigger(request).await?;
        reservation.commit(handle.clone(), Instant::now() + self.max_wait);
        Ok(Submission {
            handle,
            duplicate: false,
        })
    }

    /// Wait for an already-queued item to finish.
    ///
    /// The effective deadline is `min(timeout, max_wait)` from now. On expiry
    /// the queue item or build is cancelled on a best-effort basis.
    pub async fn wait_for_queued(
        &self,
        handle: &QueueHandle,
        timeout: Duration,
    ) -> Result<BuildResult> {
        let deadline = Instant::now() + timeout.min(self.max_wait);
        let key = CorrelationKey::queue(&handle.job, handle.queue_id);
        let mut waiter = self.registry.register(key, deadline)?;
        let watcher = waiter.watcher();

        let (fatal_tx, mut fatal_rx) = oneshot::channel();
        tokio::spawn(poll_until_settled(
            Arc::clone(&self.provider),
            Arc::clone(&self.registry),
            watcher.clone(),
            handle.clone(),
            self.poll_interval,
            fatal_tx,
        ));

        let outcome = tokio::select! {
            result = self.registry.wait(&mut waiter) => result,
            Ok(err) = &mut fatal_rx => {
                match self.registry.abandon(&mut waiter).await {
                    Some(result) => Ok(result),
                    None => Err(err),
                }
            }
        };

        match outcome {
            Ok(mut result) => {
                result.queue_id.get_or_insert(handle.queue_id);
                self.attach_console(&mut result, deadline).await;
                info!(
                    job = %result.job,
                    build = ?result.build_number,
                    outcome = %result.outcome,
                    "Build finished"
                );
                Ok(result)
            }
            Err(err @ Error::Timeout { .. }) => {
                self.cancel_after_timeout(&handle.job, &watcher);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Forget idempotency keys whose window has passed.
    pub fn expire_tokens(&self) {
        let now = Instant::now();
        self.tokens.retain(|_, state| match state {
            TokenState::Triggering => true,
            TokenState::Queued { expires_at, .. } => *expires_at > now,
        });
    }

    /// Returns the handle of an earlier trigger, or reserves the token.
    fn reserve_token(&self, token: &str) -> Result<Option<QueueHandle>> {
        match self.tokens.entry(token.to_string()) {
            Entry::Occupied(mut entry) => {
                let reuse = match entry.get() {
                    TokenState::Triggering => {
                        return Err(Error::Conflict(
                            "a trigger for this idempotency key is in progress".into(),
                        ))
                    }
                    TokenState::Queued { handle, expires_at } => {
                        (*expires_at > Instant::now()).then(|| handle.clone())
                    }
                };
                if reuse.is_none() {
                    entry.insert(TokenState::Triggering);
                }
                Ok(reuse)
            }
            Entry::Vacant(entry) => {
                entry.insert(TokenState::Triggering);
                Ok(None)
            }
        }
    }

    /// Fetch the console tail, giving up at the orchestration deadline.
    async fn attach_console(&self, result: &mut BuildResult, deadline: Instant) {
        if self.console_tail_lines == 0 || result.console_tail.is_some() {
            return;
        }
        let Some(number) = result.build_number else {
            return;
        };
        if Instant::now() >= deadline {
            debug!(job = %result.job, build = number, "No time left for console tail");
            return;
        }
        let tail = self
            .provider
            .console_tail(&result.job, number, self.console_tail_lines);
        match tokio::time::timeout_at(deadline, tail).await {
            Ok(Ok(tail)) => result.console_tail = Some(tail),
            Ok(Err(err)) => debug!(job = %result.job, build = number, error = %err, "Console tail unavailable"),
            Err(_) => debug!(job = %result.job, build = number, "Console tail timed out"),
        }
    }

    /// Cancel in the background so the timeout is reported on time.
    fn cancel_after_timeout(&self, job: &str, watcher: &WaiterRef) {
        let target = match watcher.current_key().id {
            WaitKey::Build(number) => CancelTarget::Build(number),
            WaitKey::Queue(id) => CancelTarget::Queue(id),
        };
        warn!(job = %job, target = %target, "Build timed out, cancelling");
        let provider = Arc::clone(&self.provider);
        let job = job.to_string();
        tokio::spawn(async move {
            if let Err(err) = provider.cancel(&job, target).await {
                warn!(job = %job, target = %target, error = %err, "Cancel after timeout failed");
            }
        });
    }
}

/// An idempotency key held in `Triggering` while its trigger is in flight.
struct TokenReservation<'a> {
    tokens: &'a DashMap<String, TokenState>,
    token: Option<String>,
}

impl TokenReservation<'_> {
    fn commit(mut self, handle: QueueHandle, expires_at: Instant) {
        if let Some(token) = self.token.take() {
            self.tokens
                .insert(token, TokenState::Queued { handle, expires_at });
        }
    }
}

impl Drop for TokenReservation<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.tokens
                .remove_if(&token, |_, state| matches!(state, TokenState::Triggering));
        }
    }
}

/// Poll Jenkins until the waiter is settled by anyone.
///
/// Checks the waiter before each request and after each response, so a
/// settled waiter never causes another HTTP call. Errors that survived the
/// client's retries are reported once through `fatal` unless retrying on the
/// next tick could help.
async fn poll_until_settled(
    provider: Arc<dyn CiProvider>,
    registry: Arc<CorrelationRegistry>,
    watcher: WaiterRef,
    handle: QueueHandle,
    every: Duration,
    fatal: oneshot::Sender<Error>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut build_number: Option<u64> = None;

    loop {
        ticker.tick().await;
        if watcher.is_settled() {
            debug!(job = %handle.job, queue_id = handle.queue_id, "Poller stopping");
            return;
        }

        let polled = match build_number {
            None => provider.poll_queue(&handle).await,
            Some(number) => provider.poll_build(&handle.job, number).await,
        };
        if watcher.is_settled() {
            return;
        }

        match polled {
            Ok(result) => {
                if build_number.is_none() {
                    if let Some(number) = result.build_number {
                        build_number = Some(number);
                        registry.rekey_waiter(&watcher, CorrelationKey::build(&handle.job, number));
                    }
                }
                if result.is_terminal() {
                    registry.resolve_waiter(&watcher, result);
                    return;
                }
                registry.observe_waiter(&watcher, result.phase);
            }
            Err(err) if err.is_retryable() => {
                warn!(job = %handle.job, error = %err, "Poll failed, retrying next tick");
            }
            Err(err) => {
                debug!(job = %handle.job, error = %err, "Poll failed permanently");
                let _ = fatal.send(err);
                return;
            }
        }
    }
}
