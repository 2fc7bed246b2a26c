//! MQTT topic pattern matching.
//!
//! Patterns are split into `/`-separated levels. A `+` (or `*`) level
//! matches exactly one topic level, a trailing `#` matches the remaining
//! levels including none at all.
//!
//! ```text
//! pattern: home/camera/cam1/#
//! topic:   home/camera/cam1/video/clip1
//!                           └─ suffix ─┘
//! ```
//!
//! The levels consumed by `#` are returned as the topic suffix; camera
//! sensors read their event discriminator from it.

/// Matches `topic` against `pattern`.
///
/// Returns the levels consumed by a trailing `#` (empty when the pattern
/// has no `#`), or `None` if the topic does not match.
pub fn match_topic<'a>(pattern: &str, topic: &'a str) -> Option<Vec<&'a str>> {
    // Broker-internal topics are never matched by a leading wildcard
    if topic.starts_with('$') && pattern.starts_with(['+', '*', '#']) {
        return None;
    }

    let mut levels = topic.split('/');
    for filter in pattern.split('/') {
        match filter {
            "#" => return Some(levels.collect()),
            "+" | "*" => {
                levels.next()?;
            }
            literal => {
                if levels.next()? != literal {
                    return None;
                }
            }
        }
    }

    if levels.next().is_some() {
        None
    } else {
        Some(Vec::new())
    }
}
