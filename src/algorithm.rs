mod avoidance;
mod focal;

pub use avoidance::{AvoidanceTables, ConflictAvoidanceTable};
pub use focal::focal_search;
