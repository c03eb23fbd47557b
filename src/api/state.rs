use crate::detect::engine::DetectionEngine;
use crate::storage::records::SqliteSeriesProvider;

#[derive(Clone)]
pub struct AppState {
    pub engine: DetectionEngine,
    pub records: SqliteSeriesProvider,
}
