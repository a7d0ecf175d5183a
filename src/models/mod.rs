mod aggregation;
mod record;
mod version;

pub use aggregation::*;
pub use record::*;
pub use version::*;
