//! Three-step wizard: Upload → Select Type → Preview & Export.
//!
//! Forward moves are validated, backward moves are free, and direct jumps only reach
//! steps strictly before the current one.

use crate::error::{SessionError, SessionResult};
use crate::model::{ChartConfig, ChartType, DataFile, Step, WizardState};
use crate::registry::ChartConfigRegistry;
use tracing::debug;

#[derive(Debug, Default)]
pub struct WizardController {
    state: WizardState,
}

impl WizardController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn step(&self) -> Step {
        self.state.current_step
    }

    pub fn set_file(&mut self, file: DataFile) {
        debug!(name = %file.name, bytes = file.size(), "data file chosen");
        self.state.data_file = Some(file);
        self.state.file_revision += 1;
    }

    /// Drop the current file. Returns false if there was none.
    pub fn clear_file(&mut self) -> bool {
        if self.state.data_file.take().is_none() {
            return false;
        }
        self.state.file_revision += 1;
        true
    }

    pub fn select_type(&mut self, chart_type: ChartType) {
        self.state.selected_type = Some(chart_type);
    }

    /// Advance one step.
    ///
    /// Leaving `SelectType` creates a chart from the selected type and makes it active;
    /// the created chart is returned. On the last step this does nothing.
    pub fn go_next(
        &mut self,
        registry: &mut ChartConfigRegistry,
    ) -> SessionResult<Option<ChartConfig>> {
        let from = self.state.current_step;
        let Some(to) = from.next() else {
            return Ok(None);
        };

        let created = match from {
            Step::Upload => {
                if self.state.data_file.is_none() {
                    return Err(SessionError::Validation("please upload a data file".into()));
                }
                None
            }
            Step::SelectType => {
                let Some(chart_type) = self.state.selected_type else {
                    return Err(SessionError::Validation("please select a chart type".into()));
                };
                Some(registry.create_active(chart_type))
            }
            Step::PreviewExport => None,
        };

        self.state.current_step = to;
        self.state.visited_max = self.state.visited_max.max(to);
        debug!(?from, ?to, "wizard advanced");
        Ok(created)
    }

    /// Step back once; false at the first step.
    pub fn go_previous(&mut self) -> bool {
        match self.state.current_step.previous() {
            Some(prev) => {
                self.state.current_step = prev;
                true
            }
            None => false,
        }
    }

    /// Jump to an earlier step. The current step and later ones are ignored.
    pub fn jump_to(&mut self, step: Step) -> bool {
        if step >= self.state.current_step {
            return false;
        }
        self.state.current_step = step;
        true
    }

    /// From the preview step, return to type selection with no type chosen.
    /// The uploaded file stays.
    pub fn start_new_chart(&mut self) -> bool {
        if self.state.current_step != Step::PreviewExport {
            return false;
        }
        self.state.selected_type = None;
        self.state.current_step = Step::SelectType;
        true
    }
}
