pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod pages;
pub mod raster;
pub mod scene;
pub mod synthetic;
pub mod table;

pub use config::DashboardConfig;
pub use error::{PageError, PageResult};
pub use pages::{Dashboard, PageView, PanelOutcome, Selection};
