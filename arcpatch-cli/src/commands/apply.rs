//! CLI commands that rewrite the installation

use std::time::Instant;

use arcpatch::archive::ArchiveRegistry;
use arcpatch::config::EngineConfig;
use arcpatch::container::PatchContainer;
use arcpatch::installation::GameInstallation;
use arcpatch::modules::ModuleRegistry;
use arcpatch::patcher::{ApplyReport, Patcher};
use indicatif::HumanDuration;

use crate::progress;

#[derive(Clone, Copy)]
enum Mode {
    Apply,
    Restore,
}

fn run(config: &EngineConfig, install: &GameInstallation, quiet: bool, mode: Mode) -> anyhow::Result<()> {
    let started = Instant::now();
    let archives = ArchiveRegistry::with_defaults();
    let modules = ModuleRegistry::with_defaults();
    let mut container = PatchContainer::open(install.container_path())?;

    let pb = progress::patch_bar()?;
    if quiet {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    let update = |p: &arcpatch::progress::PatchProgress| progress::update(&pb, p);
    let patcher = Patcher::new(&archives, &modules)
        .with_settings(config.apply)
        .with_progress(&update);

    let report = match mode {
        Mode::Apply => patcher.apply(install, &mut container),
        Mode::Restore => patcher.restore(install, &mut container),
    };
    pb.finish_and_clear();
    let report = report?;

    print_report(&report);
    println!("Done in {}", HumanDuration(started.elapsed()));
    Ok(())
}

fn print_report(report: &ApplyReport) {
    println!(
        "{} archive(s) rewritten, {} loose file(s) changed",
        report.archives_rewritten, report.loose_files_changed
    );
    println!(
        "Installation now differs by {} added, {} replaced, {} removed file(s)",
        report.added, report.replaced, report.removed
    );
}

pub fn apply(config: &EngineConfig, install: &GameInstallation, quiet: bool) -> anyhow::Result<()> {
    run(config, install, quiet, Mode::Apply)
}

pub fn restore(config: &EngineConfig, install: &GameInstallation, quiet: bool) -> anyhow::Result<()> {
    run(config, install, quiet, Mode::Restore)
}
