//! Single-flight export orchestration.
//!
//! At most one generation request is in flight. Its state is published on a watch channel
//! so presentation layers can subscribe instead of blocking on the request.

use super::post_process::{process_export_completion, ProcessedExport};
use crate::engine::{GeneratorClient, Retriever};
use crate::error::{SessionError, SessionResult};
use crate::model::{ChartConfig, ChartId, ChartType, DataFile, ExportPhase, ExportState};
use reqwest::Url;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Identity of one export attempt: what it was started against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTicket {
    pub attempt: u64,
    pub chart_id: ChartId,
    pub chart_title: String,
    pub file_revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Succeeded { ticket: AttemptTicket, url: Url },
    Failed { ticket: AttemptTicket, error: SessionError },
    /// The chart or file changed while the request ran; its result was dropped.
    Discarded { ticket: AttemptTicket },
}

struct InFlight {
    ticket: AttemptTicket,
    stale: Arc<AtomicBool>,
    handle: JoinHandle<ProcessedExport>,
}

impl InFlight {
    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }
}

/// Publish `state` unless the attempt was invalidated.
///
/// The stale check runs under the watch lock, so it cannot interleave with `invalidate`.
fn publish_unless_stale(
    state_tx: &watch::Sender<ExportState>,
    stale: &AtomicBool,
    state: ExportState,
) -> bool {
    state_tx.send_if_modified(|current| {
        if stale.load(Ordering::SeqCst) {
            return false;
        }
        *current = state;
        true
    })
}

/// Body of the spawned export task: request, publish, then retrieve and build notices.
async fn run_attempt(
    client: GeneratorClient,
    retriever: Arc<dyn Retriever>,
    state_tx: Arc<watch::Sender<ExportState>>,
    stale: Arc<AtomicBool>,
    ticket: AttemptTicket,
    file: DataFile,
    chart_type: ChartType,
) -> ProcessedExport {
    let result = client.generate(&file, chart_type).await;
    let state = match &result {
        Ok(url) => ExportState::succeeded(url),
        Err(e) => ExportState::failed(e.to_string()),
    };
    let outcome = if !publish_unless_stale(&state_tx, &stale, state) {
        info!(attempt = ticket.attempt, "discarding stale export result");
        ExportOutcome::Discarded { ticket }
    } else {
        match result {
            Ok(url) => ExportOutcome::Succeeded { ticket, url },
            Err(error) => ExportOutcome::Failed { ticket, error },
        }
    };
    process_export_completion(outcome, retriever.as_ref())
}

pub struct ExportOrchestrator {
    client: GeneratorClient,
    retriever: Arc<dyn Retriever>,
    state_tx: Arc<watch::Sender<ExportState>>,
    in_flight: Option<InFlight>,
    attempts: u64,
}

impl ExportOrchestrator {
    pub fn new(client: GeneratorClient, retriever: Arc<dyn Retriever>) -> Self {
        let (state_tx, _) = watch::channel(ExportState::default());
        Self {
            client,
            retriever,
            state_tx: Arc::new(state_tx),
            in_flight: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state_tx.borrow().clone()
    }

    /// Receive every export state transition, including completions nobody awaits.
    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state_tx.borrow().phase == ExportPhase::Running
    }

    /// An attempt whose notices have not been collected yet and whose result still counts.
    pub fn has_pending(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|f| !f.is_stale())
    }

    pub fn retriever(&self) -> &Arc<dyn Retriever> {
        &self.retriever
    }

    /// Start exporting `chart` built from `file`. Returns as soon as the request is spawned.
    ///
    /// The spawned task publishes the terminal state and triggers retrieval on its own;
    /// `next_completion` only hands back the notices.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        &mut self,
        file: Option<&DataFile>,
        chart: Option<&ChartConfig>,
        file_revision: u64,
    ) -> SessionResult<AttemptTicket> {
        if self.is_running() {
            return Err(SessionError::ConcurrentExport);
        }
        let (Some(file), Some(chart)) = (file, chart) else {
            return Err(SessionError::Precondition(
                "please ensure data is uploaded and a chart is selected".into(),
            ));
        };

        if let Some(old) = self.in_flight.take() {
            if old.handle.is_finished() {
                debug!(attempt = old.ticket.attempt, "dropping uncollected export notices");
            } else {
                // Only an invalidated attempt can still be running; nobody will read its result.
                debug!(attempt = old.ticket.attempt, "aborting invalidated export");
                old.handle.abort();
            }
        }

        self.attempts += 1;
        let ticket = AttemptTicket {
            attempt: self.attempts,
            chart_id: chart.id.clone(),
            chart_title: chart.title.clone(),
            file_revision,
        };
        let stale = Arc::new(AtomicBool::new(false));
        // Running is published before the task exists so it can never overwrite the result.
        self.state_tx.send_replace(ExportState::running());
        let handle = tokio::spawn(run_attempt(
            self.client.clone(),
            self.retriever.clone(),
            self.state_tx.clone(),
            stale.clone(),
            ticket.clone(),
            file.clone(),
            chart.chart_type,
        ));

        info!(
            attempt = ticket.attempt,
            chart = %ticket.chart_title,
            chart_id = %ticket.chart_id,
            file_revision = ticket.file_revision,
            "export started"
        );
        self.in_flight = Some(InFlight {
            ticket: ticket.clone(),
            stale,
            handle,
        });
        Ok(ticket)
    }

    /// The active chart or the file changed: go back to `idle` and drop whatever the
    /// in-flight attempt (if any) produces.
    pub fn invalidate(&mut self) {
        if let Some(f) = self.in_flight.as_ref() {
            f.stale.store(true, Ordering::SeqCst);
        }
        let reset = self.state_tx.send_if_modified(|current| {
            if current.phase == ExportPhase::Idle {
                return false;
            }
            *current = ExportState::default();
            true
        });
        if reset {
            debug!("export state reset");
        }
    }

    /// Collect the notices of the in-flight attempt. Pends forever when nothing is in
    /// flight, so it can sit in a `select!` next to other sources.
    ///
    /// Cancel-safe: the attempt is only taken once its handle has resolved.
    pub async fn next_completion(&mut self) -> ProcessedExport {
        let joined = match self.in_flight.as_mut() {
            Some(f) => (&mut f.handle).await,
            None => futures::future::pending().await,
        };
        let Some(f) = self.in_flight.take() else {
            return futures::future::pending().await;
        };
        match joined {
            Ok(done) => done,
            Err(e) => {
                let error = SessionError::Transport(format!("export task ended unexpectedly: {e}"));
                let outcome = if publish_unless_stale(
                    &self.state_tx,
                    &f.stale,
                    ExportState::failed(error.to_string()),
                ) {
                    ExportOutcome::Failed {
                        ticket: f.ticket,
                        error,
                    }
                } else {
                    ExportOutcome::Discarded { ticket: f.ticket }
                };
                process_export_completion(outcome, self.retriever.as_ref())
            }
        }
    }

    /// Wait for the current attempt if one is running or still holds notices.
    pub async fn settle(&mut self) -> Option<ProcessedExport> {
        if self.has_pending() {
            Some(self.next_completion().await)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChartConfigRegistry;
    use crate::test_support::{service_config, RecordingRetriever, StubService};
    use std::time::Duration;

    fn csv() -> DataFile {
        DataFile::new("data.csv", None, &b"a,b\n1,2\n"[..]).unwrap()
    }

    fn orchestrator(base: &str) -> (ExportOrchestrator, Arc<RecordingRetriever>) {
        let client = GeneratorClient::new(&service_config(base)).unwrap();
        let retriever = Arc::new(RecordingRetriever::default());
        (ExportOrchestrator::new(client, retriever.clone()), retriever)
    }

    fn chart(t: ChartType) -> ChartConfig {
        ChartConfigRegistry::new().create(t)
    }

    #[tokio::test]
    async fn missing_inputs_never_touch_the_network() {
        let stub = StubService::spawn(200, r#"{"downloadUrl":"/x.pptx"}"#).await;
        let (mut orch, _) = orchestrator(&stub.base_url);
        let c = chart(ChartType::Bar);
        assert!(matches!(orch.start(None, Some(&c), 0), Err(SessionError::Precondition(_))));
        assert!(matches!(orch.start(Some(&csv()), None, 0), Err(SessionError::Precondition(_))));
        assert_eq!(orch.state().phase, ExportPhase::Idle);
        assert!(orch.settle().await.is_none());
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let stub = StubService::spawn_delayed(
            200,
            r#"{"downloadUrl":"/files/one.pptx"}"#,
            Duration::from_millis(100),
        )
        .await;
        let (mut orch, retriever) = orchestrator(&stub.base_url);
        let c = chart(ChartType::Line);
        let file = csv();

        orch.start(Some(&file), Some(&c), 1).unwrap();
        assert_eq!(orch.state(), ExportState::running());
        assert_eq!(
            orch.start(Some(&file), Some(&c), 1),
            Err(SessionError::ConcurrentExport)
        );

        let done = orch.settle().await.unwrap();
        assert!(matches!(done.outcome, ExportOutcome::Succeeded { .. }));
        assert_eq!(stub.requests().len(), 1);
        assert_eq!(retriever.urls().len(), 1);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let stub = StubService::spawn(500, r#"{"error":"bad file"}"#).await;
        let (mut orch, retriever) = orchestrator(&stub.base_url);
        let mut rx = orch.subscribe();
        let c = chart(ChartType::Pie);

        orch.start(Some(&csv()), Some(&c), 1).unwrap();
        assert_eq!(rx.borrow_and_update().phase, ExportPhase::Running);
        orch.settle().await.unwrap();
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen, ExportState::failed("bad file"));
        assert!(retriever.urls().is_empty());
    }

    #[tokio::test]
    async fn completion_is_published_without_being_awaited() {
        let stub = StubService::spawn(200, r#"{"downloadUrl":"/files/bg.pptx"}"#).await;
        let (mut orch, retriever) = orchestrator(&stub.base_url);
        let mut rx = orch.subscribe();
        let c = chart(ChartType::Bar);
        let file = csv();

        orch.start(Some(&file), Some(&c), 1).unwrap();
        assert_eq!(rx.borrow_and_update().phase, ExportPhase::Running);
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        let expected = format!("{}/files/bg.pptx", stub.base_url);
        assert_eq!(rx.borrow_and_update().download_handle.as_deref(), Some(expected.as_str()));
        assert_eq!(orch.state().phase, ExportPhase::Succeeded);
        assert!(!orch.is_running());
        assert_eq!(retriever.urls().len(), 1);

        // The uncollected attempt does not block a new one.
        orch.start(Some(&file), Some(&c), 1).unwrap();
        let done = orch.settle().await.unwrap();
        assert!(matches!(done.outcome, ExportOutcome::Succeeded { ref ticket, .. } if ticket.attempt == 2));
        assert_eq!(stub.requests().len(), 2);
    }

    #[tokio::test]
    async fn terminal_state_accepts_a_fresh_attempt() {
        let stub = StubService::spawn(200, r#"{"downloadUrl":"/files/a.pptx"}"#).await;
        let (mut orch, _) = orchestrator(&stub.base_url);
        let c = chart(ChartType::Area);
        let file = csv();

        let first = orch.start(Some(&file), Some(&c), 1).unwrap();
        orch.settle().await.unwrap();
        assert_eq!(orch.state().phase, ExportPhase::Succeeded);

        let second = orch.start(Some(&file), Some(&c), 1).unwrap();
        assert_eq!(second.attempt, first.attempt + 1);
        assert_eq!(orch.state(), ExportState::running());
        orch.settle().await.unwrap();
        assert_eq!(stub.requests().len(), 2);
    }

    #[tokio::test]
    async fn invalidated_attempt_is_discarded() {
        let stub = StubService::spawn_delayed(
            200,
            r#"{"downloadUrl":"/files/old.pptx"}"#,
            Duration::from_millis(50),
        )
        .await;
        let (mut orch, retriever) = orchestrator(&stub.base_url);
        let c = chart(ChartType::Scatter);

        orch.start(Some(&csv()), Some(&c), 1).unwrap();
        orch.invalidate();
        assert_eq!(orch.state(), ExportState::default());
        assert!(orch.settle().await.is_none());

        let done = tokio::time::timeout(Duration::from_secs(5), orch.next_completion())
            .await
            .unwrap();
        assert!(matches!(done.outcome, ExportOutcome::Discarded { .. }));
        assert_eq!(orch.state(), ExportState::default());
        assert!(retriever.urls().is_empty());
    }

    #[tokio::test]
    async fn restart_after_invalidation_keeps_one_request_in_flight() {
        let stub = StubService::spawn_delayed(
            200,
            r#"{"downloadUrl":"/files/new.pptx"}"#,
            Duration::from_millis(200),
        )
        .await;
        let (mut orch, retriever) = orchestrator(&stub.base_url);
        let a = chart(ChartType::Bar);
        let b = chart(ChartType::Combo);
        let file = csv();

        orch.start(Some(&file), Some(&a), 1).unwrap();
        orch.invalidate();
        let ticket = orch.start(Some(&file), Some(&b), 1).unwrap();
        let done = orch.settle().await.unwrap();
        match done.outcome {
            ExportOutcome::Succeeded { ticket: t, .. } => assert_eq!(t, ticket),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(retriever.urls().len(), 1);
    }
}
