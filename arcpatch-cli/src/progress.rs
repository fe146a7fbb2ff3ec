//! Progress bars for long-running engine operations

use arcpatch::progress::PatchProgress;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar style with the current phase and file
pub fn bar_style() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{prefix:>12.bold} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")?
        .progress_chars("##-"))
}

/// A hidden-until-first-update bar driven by engine progress callbacks
pub fn patch_bar() -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(bar_style()?);
    Ok(pb)
}

/// Forward one engine progress update to a bar
pub fn update(pb: &ProgressBar, progress: &PatchProgress) {
    pb.set_prefix(progress.phase.as_str());
    pb.set_length(progress.total as u64);
    pb.set_position(progress.current as u64);
    if let Some(ref name) = progress.current_file {
        pb.set_message(name.clone());
    }
}
