//! Display formatting for playback times
//!
//! Track positions and durations render as `M:SS`, truncated to whole
//! seconds (never rounded: a position of 59.9s in a track shows 0:59,
//! not 1:00).

/// Format a time in seconds as `M:SS`, truncating fractional seconds.
///
/// Negative and non-finite inputs render as `0:00`.
pub fn format_track_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let whole = seconds.trunc() as i64;
    let minutes = whole / 60;
    let secs = whole % 60;
    format!("{}:{:02}", minutes, secs)
}
