//! Human-readable text for sensor state and times.

use crate::sensors::Sensor;
use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// Describe how long ago `then` was, relative to `now`.
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }

    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {} ago", unit)
        } else {
            format!("{} {}s ago", n, unit)
        }
    };

    match secs {
        0..=9 => "just now".to_string(),
        10..=59 => plural(secs, "second"),
        60..=3_599 => plural(secs / 60, "minute"),
        3_600..=86_399 => plural(secs / 3_600, "hour"),
        86_400..=172_799 => "yesterday".to_string(),
        _ => plural(secs / 86_400, "day"),
    }
}

/// `dd.mm HH:MM` in local time.
pub fn short_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%d.%m %H:%M").to_string()
}

/// One status line: `name: state (3 minutes ago)`.
pub fn status_line(sensor: &Sensor, now: DateTime<Utc>) -> String {
    match (sensor.state(), sensor.changed()) {
        (Some(state), Some(changed)) => format!(
            "{}: {} ({})",
            sensor.name(),
            state,
            relative_time(changed, now)
        ),
        _ => format!("{}: never updated", sensor.name()),
    }
}

/// Alert text for a debounced sensor crossing its threshold.
pub fn alert_text(sensor: &str, at: DateTime<Utc>) -> String {
    format!("{}: alert {}", sensor, short_timestamp(at))
}

/// Caption for camera media.
pub fn camera_caption(sensor: &str, at: DateTime<Utc>, motion: bool) -> String {
    let time = at.with_timezone(&Local).format("%H:%M");
    if motion {
        format!("camera#{} motion {}", sensor, time)
    } else {
        format!("camera#{} {}", sensor, time)
    }
}

/// Timestamp embedded in a recording name such as `20230102_090000.mp4`.
pub fn recording_timestamp(file_name: &str) -> Option<NaiveDateTime> {
    let stem = file_name.strip_suffix(".mp4")?;
    if stem.len() != 15 || !stem.chars().all(|c| c.is_ascii_digit() || c == '_') {
        return None;
    }
    NaiveDateTime::parse_from_str(stem, "%Y%m%d_%H%M%S").ok()
}
