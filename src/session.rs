//! Session-scoped context.
//!
//! Owns the wizard, the chart registry and the export orchestrator for one user session
//! and exposes the intents the presentation layer may send. Cross-component rules live
//! here: a change of active chart or of the data file resets the export state.

use crate::engine::{DownloadRetriever, GeneratorClient, LinkRetriever, Retriever};
use crate::error::{SessionError, SessionResult};
use crate::model::{
    ChartConfig, ChartId, ChartType, DataFile, DataFileInfo, ServiceConfig, SessionSnapshot, Step,
};
use crate::orchestrator::{AttemptTicket, ExportOrchestrator, ProcessedExport};
use crate::registry::ChartConfigRegistry;
use crate::wizard::WizardController;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

pub struct Session {
    wizard: WizardController,
    registry: ChartConfigRegistry,
    export: ExportOrchestrator,
}

impl Session {
    pub fn new(export: ExportOrchestrator) -> Self {
        Self {
            wizard: WizardController::new(),
            registry: ChartConfigRegistry::new(),
            export,
        }
    }

    /// Build a session talking to the configured generation service.
    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        let client = GeneratorClient::new(cfg)?;
        let retriever: Arc<dyn Retriever> = if cfg.retrieve {
            Arc::new(DownloadRetriever::new(client.http.clone(), cfg.download_dir.clone()))
        } else {
            Arc::new(LinkRetriever)
        };
        debug!(base_url = %client.base_url(), "session created");
        Ok(Self::new(ExportOrchestrator::new(client, retriever)))
    }

    pub fn wizard(&self) -> &WizardController {
        &self.wizard
    }

    pub fn registry(&self) -> &ChartConfigRegistry {
        &self.registry
    }

    pub fn export(&self) -> &ExportOrchestrator {
        &self.export
    }

    pub fn export_mut(&mut self) -> &mut ExportOrchestrator {
        &mut self.export
    }

    pub fn file_chosen(&mut self, file: DataFile) {
        self.wizard.set_file(file);
        self.export.invalidate();
    }

    pub fn file_removed(&mut self) {
        if self.wizard.clear_file() {
            self.export.invalidate();
        }
    }

    pub fn type_chosen(&mut self, chart_type: ChartType) {
        self.wizard.select_type(chart_type);
    }

    /// Step buttons stay locked while an export is generating.
    fn ensure_idle_navigation(&self) -> SessionResult<()> {
        if self.export.is_running() {
            return Err(SessionError::ConcurrentExport);
        }
        Ok(())
    }

    /// Advance the wizard; returns the chart created when leaving type selection.
    pub fn next(&mut self) -> SessionResult<Option<ChartConfig>> {
        self.ensure_idle_navigation()?;
        let before = self.registry.active_id().cloned();
        let created = self.wizard.go_next(&mut self.registry)?;
        if self.registry.active_id() != before.as_ref() {
            self.export.invalidate();
        }
        Ok(created)
    }

    pub fn previous(&mut self) -> SessionResult<bool> {
        self.ensure_idle_navigation()?;
        Ok(self.wizard.go_previous())
    }

    /// Jump to the step at `index`; out-of-range and forward jumps are ignored.
    pub fn jump(&mut self, index: usize) -> bool {
        Step::from_index(index).is_some_and(|step| self.wizard.jump_to(step))
    }

    pub fn create_another(&mut self) -> bool {
        self.wizard.start_new_chart()
    }

    /// Make `id` the active chart and its type the selected one. Unknown ids are ignored.
    pub fn select_chart(&mut self, id: &ChartId) -> bool {
        let Some(chart_type) = self.registry.get(id).map(|c| c.chart_type) else {
            return false;
        };
        self.wizard.select_type(chart_type);
        if self.registry.select(id) {
            self.export.invalidate();
            return true;
        }
        false
    }

    /// Start exporting the active chart; completion is observed through the orchestrator.
    pub fn request_export(&mut self) -> SessionResult<AttemptTicket> {
        let state = self.wizard.state();
        self.export.start(
            state.data_file.as_ref(),
            self.registry.active(),
            state.file_revision,
        )
    }

    /// Wait for a running export to finish.
    pub async fn settle_export(&mut self) -> Option<ProcessedExport> {
        self.export.settle().await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.wizard.state();
        SessionSnapshot {
            current_step: self.wizard.step(),
            visited_max: state.visited_max,
            data_file: state.data_file.as_ref().map(DataFileInfo::from),
            selected_type: state.selected_type,
            charts: self.registry.list().to_vec(),
            active_chart: self.registry.active_id().cloned(),
            export: self.export.state(),
        }
    }
}
