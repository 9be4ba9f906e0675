pub mod header;
pub mod section;

pub use header::CarHeader;
pub use section::{Block, Section, SectionMeta};
