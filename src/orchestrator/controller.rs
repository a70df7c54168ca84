//! Intent loop.
//!
//! Applies presentation intents to the session, watches the in-flight export and emits
//! events back to presentation layers.

use crate::error::SessionError;
use crate::model::{ChartId, ChartType, DataFile, InfoEvent, SessionEvent};
use crate::session::Session;
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Intents emitted by presentation layers.
#[derive(Debug, Clone)]
pub(crate) enum Intent {
    FileChosen(DataFile),
    FileRemoved,
    TypeChosen(ChartType),
    Next,
    Previous,
    Jump(usize),
    CreateAnother,
    RequestExport,
    SelectChart(ChartId),
    /// Re-emit the current snapshot.
    Refresh,
    Quit,
}

/// Apply one intent and collect the notices it produced.
fn apply_intent(session: &mut Session, intent: Intent) -> Vec<InfoEvent> {
    let mut notices = Vec::new();
    match intent {
        Intent::FileChosen(file) => {
            notices.push(InfoEvent::Message(format!("Loaded {}", file.name)));
            session.file_chosen(file);
        }
        Intent::FileRemoved => session.file_removed(),
        Intent::TypeChosen(t) => session.type_chosen(t),
        Intent::Next => match session.next() {
            Ok(Some(chart)) => notices.push(InfoEvent::ChartCreated { title: chart.title }),
            Ok(None) => {}
            Err(e) => notices.push(InfoEvent::Message(e.to_string())),
        },
        Intent::Previous => {
            if let Err(e) = session.previous() {
                notices.push(InfoEvent::Message(e.to_string()));
            }
        }
        Intent::Jump(step) => {
            session.jump(step);
        }
        Intent::CreateAnother => {
            if !session.create_another() {
                notices.push(InfoEvent::Message(
                    "Another chart can be created from the preview step".into(),
                ));
            }
        }
        Intent::RequestExport => match session.request_export() {
            Ok(ticket) => notices.push(InfoEvent::ExportStarted {
                chart: ticket.chart_title,
            }),
            Err(SessionError::ConcurrentExport) => notices.push(InfoEvent::Message(
                "An export is already running, please wait".into(),
            )),
            Err(e) => notices.push(InfoEvent::Message(e.to_string())),
        },
        Intent::SelectChart(id) => {
            session.select_chart(&id);
        }
        Intent::Refresh | Intent::Quit => {}
    }
    notices
}

fn emit(event_tx: &UnboundedSender<SessionEvent>, session: &Session, notices: Vec<InfoEvent>) {
    for n in notices {
        let _ = event_tx.send(SessionEvent::Info(n));
    }
    let _ = event_tx.send(SessionEvent::Snapshot(Box::new(session.snapshot())));
}

/// Drive `session` from presentation intents until `Quit` (or the intent channel closes).
///
/// Export state changes made in the background (completion, reset) also produce a
/// snapshot. A running export is allowed to finish before the loop returns; the session
/// is handed back so callers can inspect the final state.
pub(crate) async fn run_controller(
    mut session: Session,
    event_tx: UnboundedSender<SessionEvent>,
    mut intent_rx: UnboundedReceiver<Intent>,
) -> Result<Session> {
    let mut export_rx = session.export().subscribe();
    emit(&event_tx, &session, Vec::new());
    export_rx.mark_unchanged();
    let mut quit_pending = false;

    loop {
        tokio::select! {
            intent = intent_rx.recv(), if !quit_pending => {
                let intent = intent.unwrap_or(Intent::Quit);
                debug!(?intent, "intent");
                if matches!(intent, Intent::Quit) {
                    // Quit waits for the current export so its result is not lost.
                    quit_pending = true;
                    if !session.export().has_pending() {
                        break;
                    }
                    let _ = event_tx.send(SessionEvent::Info(InfoEvent::Message(
                        "Waiting for the running export to finish…".into(),
                    )));
                    continue;
                }
                let notices = apply_intent(&mut session, intent);
                emit(&event_tx, &session, notices);
                export_rx.mark_unchanged();
            }
            Ok(()) = export_rx.changed() => {
                export_rx.mark_unchanged();
                emit(&event_tx, &session, Vec::new());
            }
            // Only takes the in-flight attempt once it has resolved, so losing the race to
            // an intent never drops its notices.
            done = session.export_mut().next_completion() => {
                emit(&event_tx, &session, done.notices);
                export_rx.mark_unchanged();
                if quit_pending && !session.export().has_pending() {
                    break;
                }
            }
        }
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GeneratorClient;
    use crate::model::{ExportPhase, SessionSnapshot, Step};
    use crate::orchestrator::ExportOrchestrator;
    use crate::test_support::{service_config, RecordingRetriever, StubService};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn session(base: &str) -> Session {
        let client = GeneratorClient::new(&service_config(base)).unwrap();
        Session::new(ExportOrchestrator::new(
            client,
            Arc::new(RecordingRetriever::default()),
        ))
    }

    fn csv() -> DataFile {
        DataFile::new("data.csv", None, &b"x,y\n1,2\n"[..]).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> (Vec<String>, Option<SessionSnapshot>) {
        let mut messages = Vec::new();
        let mut last = None;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                SessionEvent::Info(i) => messages.push(i.to_message()),
                SessionEvent::Snapshot(s) => last = Some(*s),
            }
        }
        (messages, last)
    }

    #[tokio::test]
    async fn quit_waits_for_running_export() {
        let stub = StubService::spawn_delayed(
            200,
            r#"{"downloadUrl":"/files/q.pptx"}"#,
            Duration::from_millis(50),
        )
        .await;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        for intent in [
            Intent::FileChosen(csv()),
            Intent::Next,
            Intent::TypeChosen(ChartType::Pie),
            Intent::Next,
            Intent::RequestExport,
            Intent::RequestExport,
            Intent::Quit,
        ] {
            intent_tx.send(intent).unwrap();
        }

        let session = tokio::time::timeout(
            Duration::from_secs(5),
            run_controller(session(&stub.base_url), event_tx, intent_rx),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(session.export().state().phase, ExportPhase::Succeeded);
        assert_eq!(stub.requests().len(), 1);

        let (messages, last) = drain(&mut event_rx);
        assert!(messages.iter().any(|m| m == "Created Pie Chart 1"));
        assert!(messages.iter().any(|m| m.contains("already running")));
        assert!(messages.iter().any(|m| m.contains("q.pptx")));
        let last = last.unwrap();
        assert_eq!(last.current_step, Step::PreviewExport);
        assert_eq!(last.export.phase, ExportPhase::Succeeded);
    }

    #[tokio::test]
    async fn background_completion_produces_a_snapshot() {
        let stub = StubService::spawn(200, r#"{"downloadUrl":"/files/bg.pptx"}"#).await;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(session(&stub.base_url), event_tx, intent_rx));
        for intent in [
            Intent::FileChosen(csv()),
            Intent::Next,
            Intent::TypeChosen(ChartType::Bar),
            Intent::Next,
            Intent::RequestExport,
        ] {
            intent_tx.send(intent).unwrap();
        }

        let succeeded = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(ev) = event_rx.recv().await {
                if let SessionEvent::Snapshot(s) = ev {
                    if s.export.phase == ExportPhase::Succeeded {
                        return Some(s);
                    }
                }
            }
            None
        })
        .await
        .unwrap()
        .unwrap();
        assert!(succeeded.export.download_handle.unwrap().ends_with("/files/bg.pptx"));

        intent_tx.send(Intent::Quit).unwrap();
        let session = controller.await.unwrap().unwrap();
        assert_eq!(session.export().state().phase, ExportPhase::Succeeded);
    }

    #[tokio::test]
    async fn navigation_while_generating_becomes_a_notice() {
        let stub = StubService::spawn_delayed(
            200,
            r#"{"downloadUrl":"/files/p.pptx"}"#,
            Duration::from_millis(50),
        )
        .await;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        for intent in [
            Intent::FileChosen(csv()),
            Intent::Next,
            Intent::TypeChosen(ChartType::Line),
            Intent::Next,
            Intent::RequestExport,
            Intent::Previous,
            Intent::Quit,
        ] {
            intent_tx.send(intent).unwrap();
        }

        let session = tokio::time::timeout(
            Duration::from_secs(5),
            run_controller(session(&stub.base_url), event_tx, intent_rx),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(session.wizard().step(), Step::PreviewExport);
        let (messages, _) = drain(&mut event_rx);
        assert!(messages.iter().any(|m| m == "an export is already running"));
    }

    #[tokio::test]
    async fn validation_errors_become_notices() {
        let stub = StubService::spawn(200, "{}").await;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        intent_tx.send(Intent::Next).unwrap();
        intent_tx.send(Intent::FileChosen(csv())).unwrap();
        intent_tx.send(Intent::Next).unwrap();
        intent_tx.send(Intent::Next).unwrap();
        intent_tx.send(Intent::Jump(2)).unwrap();
        drop(intent_tx);

        let session = run_controller(session(&stub.base_url), event_tx, intent_rx)
            .await
            .unwrap();
        assert_eq!(session.wizard().step(), Step::SelectType);
        assert!(session.registry().list().is_empty());

        let (messages, _) = drain(&mut event_rx);
        assert_eq!(
            messages,
            vec![
                "please upload a data file".to_string(),
                "Loaded data.csv".to_string(),
                "please select a chart type".to_string(),
            ]
        );
    }
}
