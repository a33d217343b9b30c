pub mod chart_api;

pub use chart_api::{ChartApiError, ChartClient, ChartData, ChartMeta};
