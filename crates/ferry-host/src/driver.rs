use crate::bridge::{Application, UNSUPPORTED_TASK};
use crate::error::BridgeError;
use crate::fetch::{FetchError, HttpFetch};
use crate::ids::RequestIds;
use crate::metrics::{self, DriverMetricsSink, NoopMetricsSink};
use ferry_abi::{exports, Envelope, HttpRequest, HttpResponse, InvokeOutput, TaskData, TaskResult};
use ferry_config::DriverConfig;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Drives one request through repeated `invoke` rounds, performing the tasks
/// the guest reports as pending between rounds.
///
/// At most `max_invoke_rounds` invokes are made per request. If the guest still
/// reports pending tasks after the last one, the request fails with
/// [`BridgeError::ResourceExhausted`] and that round's tasks are not run.
pub struct TaskDriver<A: ?Sized> {
    app: Arc<A>,
    fetch: Arc<dyn HttpFetch>,
    ids: RequestIds,
    config: DriverConfig,
    metrics: Arc<dyn DriverMetricsSink>,
}

impl<A: Application + ?Sized> TaskDriver<A> {
    pub fn new(app: Arc<A>, fetch: Arc<dyn HttpFetch>, config: DriverConfig) -> Self {
        Self {
            app,
            fetch,
            ids: RequestIds::new(),
            config,
            metrics: Arc::new(NoopMetricsSink),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn DriverMetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn application(&self) -> &Arc<A> {
        &self.app
    }

    pub fn request_ids(&self) -> &RequestIds {
        &self.ids
    }

    /// Wraps `request` in an envelope with a fresh request id and drives it.
    pub async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, BridgeError> {
        let lease = self.ids.acquire();
        let envelope = Envelope {
            request_id: lease.id(),
            http_request: request,
        };
        self.drive(&envelope).await
    }

    /// Drives an envelope whose request id the caller manages.
    pub async fn drive(&self, envelope: &Envelope) -> Result<HttpResponse, BridgeError> {
        let started = Instant::now();
        let outcome = self.run_rounds(envelope).await;
        self.metrics.record_request(metrics::REQUEST, started.elapsed());
        match &outcome {
            Ok(response) => tracing::debug!(
                request_id = envelope.request_id,
                status = response.status,
                "request finished"
            ),
            Err(BridgeError::ResourceExhausted { rounds }) => {
                self.metrics.record_exhausted(metrics::REQUEST);
                tracing::warn!(
                    request_id = envelope.request_id,
                    rounds,
                    "guest kept reporting pending tasks"
                );
            }
            Err(err) => {
                self.metrics.record_error(metrics::REQUEST);
                tracing::debug!(request_id = envelope.request_id, error = %err, "request failed");
            }
        }
        outcome
    }

    async fn run_rounds(&self, envelope: &Envelope) -> Result<HttpResponse, BridgeError> {
        let max_rounds = self.config.max_invoke_rounds.max(1);
        for round in 1..=max_rounds {
            let pending = match self.invoke(envelope)? {
                InvokeOutput::HttpResponse(response) => return Ok(response),
                InvokeOutput::PendingTasks(pending) => pending,
            };
            tracing::debug!(
                request_id = envelope.request_id,
                round,
                tasks = ?pending.task_ids,
                "guest reported pending tasks"
            );
            if round == max_rounds {
                break;
            }
            self.run_tasks(envelope.request_id, &pending.task_ids).await?;
        }
        Err(BridgeError::ResourceExhausted { rounds: max_rounds })
    }

    fn invoke(&self, envelope: &Envelope) -> Result<InvokeOutput, BridgeError> {
        self.app.invoke(envelope).inspect_err(|_| {
            self.metrics.record_error(exports::INVOKE);
        })
    }

    /// Runs every task of one round concurrently. Each task is completed at
    /// most once per round even if the guest lists it twice. The first guest
    /// error is returned after all tasks have settled.
    async fn run_tasks(&self, request_id: u32, task_ids: &[u32]) -> Result<(), BridgeError> {
        let mut seen = HashSet::new();
        let tasks = task_ids
            .iter()
            .copied()
            .filter(|task_id| seen.insert(*task_id))
            .map(|task_id| self.run_task(request_id, task_id));
        join_all(tasks).await.into_iter().collect()
    }

    async fn run_task(&self, request_id: u32, task_id: u32) -> Result<(), BridgeError> {
        let ticket = self.app.get_task(request_id, task_id).inspect_err(|_| {
            self.metrics.record_error(exports::GET_TASK);
        })?;
        if ticket.task_id != task_id {
            self.metrics.record_error(exports::GET_TASK);
            tracing::warn!(
                request_id,
                task_id,
                ticket_task_id = ticket.task_id,
                "guest answered `getTask` with a different task"
            );
            return Err(BridgeError::application(UNSUPPORTED_TASK));
        }
        let TaskData::Http { request } = ticket.data;

        let result = self.perform(request_id, task_id, request).await;

        self.app
            .complete_task(request_id, task_id, &result)
            .inspect_err(|_| {
                self.metrics.record_error(exports::COMPLETE_TASK);
            })?;
        Ok(())
    }

    async fn perform(&self, request_id: u32, task_id: u32, request: HttpRequest) -> TaskResult {
        let started = Instant::now();
        let method = request.method.clone();
        let outcome = self.fetch.fetch(request).await;
        self.metrics.record_request(metrics::TASK, started.elapsed());

        match outcome {
            Ok(response) => TaskResult::Response(response),
            Err(err) => {
                if matches!(err, FetchError::Timeout) {
                    self.metrics.record_timeout(metrics::TASK);
                } else {
                    self.metrics.record_error(metrics::TASK);
                }
                tracing::warn!(
                    request_id,
                    task_id,
                    method = %method,
                    code = %err.code(),
                    error = %err,
                    "task effect failed"
                );
                TaskResult::Error(err.code())
            }
        }
    }
}

impl<A: ?Sized> std::fmt::Debug for TaskDriver<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDriver")
            .field("config", &self.config)
            .field("in_flight", &self.ids.in_flight())
            .finish_non_exhaustive()
    }
}
