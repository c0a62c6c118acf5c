//! Service layer
//!
//! Business logic between the web handlers and the database/protocol layers.

pub mod guide;
pub mod guide_cache;

pub use guide::{GuideRead, GuideService};
pub use guide_cache::GuideCache;
