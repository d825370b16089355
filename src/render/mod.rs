pub mod chart;
pub mod page;

pub use chart::{ChartRenderer, RenderedChart};
