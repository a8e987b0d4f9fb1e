use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};
use std::time::Duration;

pub mod parsers;

pub use parsers::{parse_gpu_indices, parse_memory, parse_time_limit};

/// Format duration for display in HH:MM:SS format.
///
/// Hours are the largest unit and may exceed 24.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use corun::utils::format_duration;
///
/// assert_eq!(format_duration(Duration::from_secs(45)), "00:00:45");
/// assert_eq!(format_duration(Duration::from_secs(9045)), "02:30:45");
/// assert_eq!(format_duration(Duration::from_secs(90000)), "25:00:00");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Short human form of a job's elapsed time: sub-second runs keep
/// milliseconds, anything longer uses [`format_duration`].
pub fn format_elapsed(duration: Duration) -> String {
    if duration < Duration::from_secs(1) {
        format!("{}ms", duration.as_millis())
    } else {
        format_duration(duration)
    }
}

pub const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());
