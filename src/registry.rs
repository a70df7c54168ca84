//! Ordered store of the charts created during a session.

use crate::model::{ChartConfig, ChartId, ChartType};
use rand::RngCore;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ChartConfigRegistry {
    charts: Vec<ChartConfig>,
    active: Option<ChartId>,
}

/// Random 64-bit chart identifier, hex encoded.
fn gen_chart_id() -> ChartId {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    ChartId::new(format!("{:016x}", u64::from_le_bytes(b)))
}

impl ChartConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new chart titled `"<Type> Chart <n>"` and return it.
    ///
    /// The new entry is not made active; `create_active` does both.
    pub fn create(&mut self, chart_type: ChartType) -> ChartConfig {
        let mut id = gen_chart_id();
        while self.get(&id).is_some() {
            id = gen_chart_id();
        }
        let chart = ChartConfig {
            id,
            chart_type,
            title: format!("{} Chart {}", chart_type.capitalized(), self.len() + 1),
            created_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
        };
        debug!(id = %chart.id, title = %chart.title, "chart created");
        self.charts.push(chart.clone());
        chart
    }

    /// Create a chart and make it the active selection.
    pub fn create_active(&mut self, chart_type: ChartType) -> ChartConfig {
        let chart = self.create(chart_type);
        self.active = Some(chart.id.clone());
        chart
    }

    /// Make `id` active. Unknown ids are ignored; returns whether the active chart changed.
    pub fn select(&mut self, id: &ChartId) -> bool {
        if self.get(id).is_none() {
            debug!(%id, "ignoring selection of unknown chart");
            return false;
        }
        if self.active.as_ref() == Some(id) {
            return false;
        }
        self.active = Some(id.clone());
        true
    }

    pub fn list(&self) -> &[ChartConfig] {
        &self.charts
    }

    pub fn get(&self, id: &ChartId) -> Option<&ChartConfig> {
        self.charts.iter().find(|c| &c.id == id)
    }

    pub fn active(&self) -> Option<&ChartConfig> {
        self.active.as_ref().and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> Option<&ChartId> {
        self.active.as_ref()
    }

    pub fn len(&self) -> usize {
        self.charts.len()
    }
}
