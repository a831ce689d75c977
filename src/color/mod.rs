//! Color annotation: per-unitig sets of input-file identifiers.

pub mod color_set;
pub mod mapper;
pub mod storage;

pub use color_set::ColorSet;
pub use mapper::{check_colors, map_colors};
pub use storage::{ColorStorage, MAX_NB_HASH};
