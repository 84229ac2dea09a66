//! Terminal progress for the fetch stage

use indicatif::{ProgressBar, ProgressStyle};

const COUNT_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})";

/// Count-based bar, hidden when `enabled` is false
pub fn count_bar(total: u64, message: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total);
    match ProgressStyle::default_bar().template(COUNT_TEMPLATE) {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => tracing::debug!(error = %e, "Falling back to default progress style"),
    }
    pb.set_message(message.to_string());
    pb
}
