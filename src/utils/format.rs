use chrono::{DateTime, Utc};

/// Render a duration as `HH:MM:SS`, or `HH:MM:SS:CC` with centiseconds when `include_centis`
/// is set. Hours are not wrapped at 24.
pub fn format_stopwatch(ms: i64, include_centis: bool) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;

    if !include_centis {
        return format!("{hours:02}:{minutes:02}:{seconds:02}");
    }

    let centis = (ms % 1_000) / 10;
    format!("{hours:02}:{minutes:02}:{seconds:02}:{centis:02}")
}

pub fn format_distance_km(distance_meters: i32) -> String {
    format!("{}km", distance_meters as f64 / 1000.0)
}

pub fn format_speed(avg_speed_kmh: f64) -> String {
    format!("{avg_speed_kmh:.1}km/h")
}

pub fn format_calories(calories_burned: i32) -> String {
    format!("{calories_burned}kcal")
}

/// `dd.MM.yy` in UTC. Out-of-range timestamps render as `--.--.--`.
pub fn format_run_date(captured_at_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(captured_at_ms)
        .map(|dt| dt.format("%d.%m.%y").to_string())
        .unwrap_or_else(|| "--.--.--".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwatch_pads_every_field() {
        assert_eq!(format_stopwatch(0, false), "00:00:00");
        assert_eq!(format_stopwatch(3_723_000, false), "01:02:03");
        assert_eq!(format_stopwatch(3_723_450, true), "01:02:03:45");
    }

    #[test]
    fn stopwatch_keeps_hours_past_a_day() {
        assert_eq!(format_stopwatch(100 * 3_600_000, false), "100:00:00");
    }

    #[test]
    fn stopwatch_clamps_negative_input() {
        assert_eq!(format_stopwatch(-5, true), "00:00:00:00");
    }

    #[test]
    fn run_fields_render_with_units() {
        assert_eq!(format_distance_km(1500), "1.5km");
        assert_eq!(format_speed(12.0), "12.0km/h");
        assert_eq!(format_calories(80), "80kcal");
        assert_eq!(format_run_date(0), "01.01.70");
    }
}
