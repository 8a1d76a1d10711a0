pub mod format;
pub mod logging;

pub use format::{
    format_calories, format_distance_km, format_run_date, format_speed, format_stopwatch,
};
pub use logging::init_logging;
