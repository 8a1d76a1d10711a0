pub mod run;

pub use run::{NewRun, RunRecord, RunTotals, SortKey};
