//! Domain types for QuantLab

pub mod candidate;
pub mod fold;
pub mod ids;
pub mod metric;
pub mod panel;

pub use candidate::{Family, UnknownFamily};
pub use fold::Fold;
pub use ids::{short_id, stable_hash, RunId};
pub use metric::{FoldMetric, FoldMetricTable, MetricColumn};
pub use panel::AsOfPanelRow;
