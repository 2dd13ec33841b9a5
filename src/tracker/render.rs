//! Status message rendering. Pure functions, no state.

use std::time::Duration;

use super::state::JobOutcome;

const FILLED: char = '█';
const EMPTY: char = '░';

/// Render a fixed-width progress bar. Out-of-range percentages are clamped.
pub fn render_bar(percent: i64, width: usize) -> String {
    let percent = percent.clamp(0, 100) as usize;
    let filled = percent * width / 100;
    let mut bar = String::with_capacity(width * FILLED.len_utf8());
    bar.extend(std::iter::repeat_n(FILLED, filled));
    bar.extend(std::iter::repeat_n(EMPTY, width - filled));
    bar
}

fn progress_line(percent: u8, width: usize) -> String {
    format!("[{}] {percent}%", render_bar(i64::from(percent), width))
}

/// Initial message posted on admission.
pub fn render_started(job_name: &str, requester: &str, width: usize) -> String {
    format!(
        "🚀 {job_name} started by {requester}\n{}\nWaiting for first progress report...",
        progress_line(0, width)
    )
}

/// Message body while the job is running.
pub fn render_running(job_name: &str, percent: u8, status_text: &str, width: usize) -> String {
    let mut text = format!("⏳ {job_name} in progress\n{}", progress_line(percent, width));
    if !status_text.is_empty() {
        text.push('\n');
        text.push_str(status_text);
    }
    text
}

/// Final message for a terminated job.
pub fn render_terminal(
    job_name: &str,
    outcome: &JobOutcome,
    status_text: &str,
    width: usize,
    timeout: Duration,
) -> String {
    match outcome {
        JobOutcome::Completed => {
            let mut text = format!("✅ {job_name} complete!\n{}", progress_line(100, width));
            if !status_text.is_empty() {
                text.push('\n');
                text.push_str(status_text);
            }
            text
        }
        JobOutcome::Timeout => format!(
            "❌ {job_name} timed out: no progress for {}s",
            timeout.as_secs()
        ),
        JobOutcome::Error(reason) => format!("❌ {job_name} failed: {reason}"),
    }
}
