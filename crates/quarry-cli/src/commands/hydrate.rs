use super::{
    colorize_outcome, json_pretty, make_gate, transfer_bar, NetworkArgs, EXIT_FAILURE,
    EXIT_MANIFEST_ERROR, EXIT_PARTIAL, EXIT_POLICY_ERROR, EXIT_SUCCESS,
};
use indicatif::ProgressBar;
use quarry_core::{
    BatchFailure, HydrationEvent, HydrationReport, Hydrator, HydratorConfig, ManifestSource,
    MirrorRoot, ToolOutcome,
};
use quarry_schema::{ManifestKind, ToolRequest};
use quarry_store::{DirectoryLibrary, Extractor, Library};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct HydrateOptions {
    pub manifest: String,
    pub stack: bool,
    pub mirror: Option<String>,
    pub library: PathBuf,
    pub staging: PathBuf,
}

pub fn run(
    options: &HydrateOptions,
    network: &NetworkArgs,
    policy_file: Option<&Path>,
    tools: Vec<ToolRequest>,
    json: bool,
) -> Result<u8, String> {
    let gate = make_gate(policy_file, network)?;

    let mut config = HydratorConfig::new(ManifestSource::parse(&options.manifest), &options.staging);
    if options.stack {
        config.kind = ManifestKind::Stack;
    }
    config.mirror = options.mirror.as_deref().map(MirrorRoot::parse);

    let library = Arc::new(DirectoryLibrary::new(&options.library));
    let hydrator = Arc::new(
        Hydrator::new(
            config,
            gate,
            Arc::clone(&library) as Arc<dyn Library>,
            library as Arc<dyn Extractor>,
        )
        .map_err(|e| e.to_string())?,
    );

    let handle = hydrator.spawn(tools).map_err(|e| e.to_string())?;
    let outcome = if json {
        handle.wait(&mut |_: &HydrationEvent| {})
    } else {
        let mut display = Display::default();
        handle.wait(&mut |event: &HydrationEvent| display.on_event(event))
    };
    let report = outcome.map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(exit_code(&report))
}

pub fn exit_code(report: &HydrationReport) -> u8 {
    match &report.batch_failure {
        Some(BatchFailure::Policy(_)) => EXIT_POLICY_ERROR,
        Some(BatchFailure::Manifest(_)) => EXIT_MANIFEST_ERROR,
        None if report.success => EXIT_SUCCESS,
        None if report.is_partial() => EXIT_PARTIAL,
        None => EXIT_FAILURE,
    }
}

/// Terminal rendering of hydration events: one transfer bar per tool while it
/// downloads, one status line once it settles.
#[derive(Default)]
struct Display {
    bar: Option<ProgressBar>,
}

impl Display {
    fn on_event(&mut self, event: &HydrationEvent) {
        match event {
            HydrationEvent::ToolStarted { request, index, total } => {
                self.clear();
                let bar = transfer_bar(&format!("[{}/{total}] {request}", index + 1));
                self.bar = Some(bar);
            }
            HydrationEvent::Progress { bytes, total, .. } => {
                if let Some(bar) = &self.bar {
                    bar.set_length(*total);
                    bar.set_position(*bytes);
                }
            }
            HydrationEvent::ToolFinished { request, outcome } => {
                self.clear();
                match outcome {
                    ToolOutcome::Installed {
                        already_present: true,
                    } => println!("{} {request}", colorize_outcome("present")),
                    ToolOutcome::Installed { .. } => {
                        println!("{} {request}", colorize_outcome("installed"));
                    }
                    ToolOutcome::Failed { reason } => {
                        println!("{} {request}: {reason}", colorize_outcome("failed"));
                    }
                }
            }
            HydrationEvent::BatchFinished { .. } => self.clear(),
        }
    }

    fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn print_summary(report: &HydrationReport) {
    if let Some(failure) = &report.batch_failure {
        let label = match failure {
            BatchFailure::Policy(_) => colorize_outcome("denied"),
            BatchFailure::Manifest(_) => colorize_outcome("failed"),
        };
        eprintln!("{label} batch: {}", failure.reason());
    }
    println!(
        "installed: {}, failed: {}",
        report.installed_count, report.failed_count
    );
}
