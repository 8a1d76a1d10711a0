pub mod aggregator;

pub use aggregator::{SortedRunAggregator, SortedRuns};
