use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SessionError;

/// Largest data file accepted by the upload step.
pub const MAX_DATA_FILE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub generate_path: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub download_dir: PathBuf,
    pub user_agent: String,
    /// Fetch the generated file after a successful export (false = only report the link).
    pub retrieve: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Area,
    Scatter,
    Combo,
}

impl ChartType {
    pub const ALL: [ChartType; 6] = [
        ChartType::Bar,
        ChartType::Line,
        ChartType::Pie,
        ChartType::Area,
        ChartType::Scatter,
        ChartType::Combo,
    ];

    /// Wire tag sent to the generation service.
    pub fn tag(self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Area => "area",
            ChartType::Scatter => "scatter",
            ChartType::Combo => "combo",
        }
    }

    /// Tag with its first letter upper-cased, used for chart titles.
    pub fn capitalized(self) -> String {
        let tag = self.tag();
        let mut chars = tag.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ChartType::Bar => "Bar Chart",
            ChartType::Line => "Line Chart",
            ChartType::Pie => "Pie Chart",
            ChartType::Area => "Area Chart",
            ChartType::Scatter => "Scatter Plot",
            ChartType::Combo => "Combo Chart",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ChartType::Bar => "Compare values across categories",
            ChartType::Line => "Show trends over time or categories",
            ChartType::Pie => "Show proportion of a whole",
            ChartType::Area => "Highlight magnitude of change",
            ChartType::Scatter => "Show correlation between variables",
            ChartType::Combo => "Combine multiple chart types",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ChartType {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ChartType::ALL
            .into_iter()
            .find(|t| t.tag() == wanted)
            .ok_or_else(|| SessionError::Validation(format!("unknown chart type '{}'", s.trim())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartId(String);

impl ChartId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartConfig {
    pub id: ChartId,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub title: String,
    #[serde(default)]
    pub created_utc: String,
}

/// The three wizard stages, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Step {
    #[default]
    Upload,
    SelectType,
    PreviewExport,
}

impl Step {
    pub const COUNT: usize = 3;

    pub fn index(self) -> usize {
        match self {
            Step::Upload => 0,
            Step::SelectType => 1,
            Step::PreviewExport => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Step> {
        match index {
            0 => Some(Step::Upload),
            1 => Some(Step::SelectType),
            2 => Some(Step::PreviewExport),
            _ => None,
        }
    }

    pub fn next(self) -> Option<Step> {
        Step::from_index(self.index() + 1)
    }

    pub fn previous(self) -> Option<Step> {
        self.index().checked_sub(1).and_then(Step::from_index)
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::Upload => "Upload Data",
            Step::SelectType => "Select Chart Type",
            Step::PreviewExport => "Preview & Export",
        }
    }
}

/// An uploaded tabular data file. Cloning shares the content buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct DataFile {
    pub name: String,
    pub mime: String,
    pub content: Bytes,
}

impl fmt::Debug for DataFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFile")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("len", &self.content.len())
            .finish()
    }
}

const ACCEPTED_MIME_TYPES: [&str; 4] = [
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/csv",
    "application/csv",
];

impl DataFile {
    /// Build a data file from raw content, rejecting anything that is not CSV/Excel or too large.
    pub fn new(
        name: impl Into<String>,
        mime: Option<&str>,
        content: impl Into<Bytes>,
    ) -> Result<Self, SessionError> {
        let name = name.into();
        let content = content.into();
        let lower = name.to_ascii_lowercase();
        let extension_mime = mime_for_name(&lower);
        let mime_ok = mime.is_some_and(|m| ACCEPTED_MIME_TYPES.contains(&m));
        if !mime_ok && extension_mime.is_none() {
            return Err(SessionError::Validation(
                "please upload a valid Excel or CSV file".into(),
            ));
        }
        if content.is_empty() {
            return Err(SessionError::Validation(format!("{name} is empty")));
        }
        if content.len() > MAX_DATA_FILE_BYTES {
            return Err(SessionError::Validation(format!(
                "{name} is {:.2} MB, the limit is 10 MB",
                content.len() as f64 / 1024.0 / 1024.0
            )));
        }
        let mime = match (mime, extension_mime) {
            (Some(m), _) if mime_ok => m.to_string(),
            (_, Some(m)) => m.to_string(),
            _ => "application/octet-stream".to_string(),
        };
        Ok(Self {
            name,
            mime,
            content,
        })
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

fn mime_for_name(lower_name: &str) -> Option<&'static str> {
    if lower_name.ends_with(".csv") {
        Some("text/csv")
    } else if lower_name.ends_with(".xlsx") {
        Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
    } else if lower_name.ends_with(".xls") {
        Some("application/vnd.ms-excel")
    } else {
        None
    }
}

/// Summary of the uploaded file, safe to render and serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFileInfo {
    pub name: String,
    pub mime: String,
    pub bytes: u64,
}

impl From<&DataFile> for DataFileInfo {
    fn from(f: &DataFile) -> Self {
        Self {
            name: f.name.clone(),
            mime: f.mime.clone(),
            bytes: f.size() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WizardState {
    pub current_step: Step,
    /// Highest step ever reached.
    pub visited_max: Step,
    pub data_file: Option<DataFile>,
    /// Bumped every time the file is chosen or removed.
    pub file_revision: u64,
    pub selected_type: Option<ChartType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPhase {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportState {
    pub phase: ExportPhase,
    pub download_handle: Option<String>,
    pub error_message: Option<String>,
}

impl ExportState {
    pub fn running() -> Self {
        Self {
            phase: ExportPhase::Running,
            ..Default::default()
        }
    }

    pub fn succeeded(url: &Url) -> Self {
        Self {
            phase: ExportPhase::Succeeded,
            download_handle: Some(url.to_string()),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            phase: ExportPhase::Failed,
            download_handle: None,
            error_message: Some(message.into()),
        }
    }
}

/// Everything the presentation layer needs to render the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub current_step: Step,
    pub visited_max: Step,
    pub data_file: Option<DataFileInfo>,
    pub selected_type: Option<ChartType>,
    pub charts: Vec<ChartConfig>,
    pub active_chart: Option<ChartId>,
    pub export: ExportState,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Snapshot(Box<SessionSnapshot>),
    Info(InfoEvent),
}

/// Structured notices emitted by the session and consumed by presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    ChartCreated { title: String },
    ExportStarted { chart: String },
    ExportSucceeded { url: String },
    ExportFailed { message: String },
    StaleExportDiscarded { attempt: u64 },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::ChartCreated { title } => format!("Created {title}"),
            InfoEvent::ExportStarted { chart } => {
                format!("Generating your PowerPoint file for {chart}…")
            }
            InfoEvent::ExportSucceeded { url } => {
                format!("Chart generated, download started: {url}")
            }
            InfoEvent::ExportFailed { message } => format!("Export failed: {message}"),
            InfoEvent::StaleExportDiscarded { attempt } => {
                format!("Discarded result of export #{attempt} (chart or file changed)")
            }
        }
    }
}
