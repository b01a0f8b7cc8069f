use crate::concurrency::{RunGuard, StagingLock};
use crate::report::{
    BatchFailure, HydrationEvent, HydrationObserver, HydrationReport, ToolOutcome, ToolResult,
};
use crate::source::{resolve_archive_source, ArchiveSource, ManifestSource, MirrorRoot};
use crate::CoreError;
use quarry_remote::{ClientOptions, Connector, HttpClient, OfflineGate, TcpConnector};
use quarry_schema::{Manifest, ManifestKind, ToolEntry, ToolRequest};
use quarry_store::{verify_sha256, Extractor, Library, StagingArea, StoreError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a [`Hydrator`] needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct HydratorConfig {
    pub manifest: ManifestSource,
    pub kind: ManifestKind,
    /// Base for relative archive paths. Defaults to the manifest's directory.
    pub mirror: Option<MirrorRoot>,
    pub staging_dir: PathBuf,
    pub client: ClientOptions,
}

impl HydratorConfig {
    pub fn new(manifest: ManifestSource, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            kind: ManifestKind::Repository,
            mirror: None,
            staging_dir: staging_dir.into(),
            client: ClientOptions::default(),
        }
    }

    fn effective_mirror(&self) -> Option<MirrorRoot> {
        self.mirror
            .clone()
            .or_else(|| self.manifest.default_mirror())
    }
}

/// Drives requested tools to `Installed` or `Failed`, one at a time.
///
/// Per tool: skip if the library already has it, look it up in the manifest,
/// stage the archive (local copy or download), check declared size and
/// SHA-256, hand it to the extractor, then confirm with the library. Any
/// failure ends that tool only; the batch carries on with the next one.
///
/// The whole batch is first cleared with the offline gate and then with the
/// manifest. If either fails every tool is reported failed without being
/// attempted.
pub struct Hydrator {
    config: HydratorConfig,
    gate: Arc<OfflineGate>,
    client: HttpClient,
    library: Arc<dyn Library>,
    extractor: Arc<dyn Extractor>,
    staging: StagingArea,
    pub(crate) running: Arc<AtomicBool>,
}

impl Hydrator {
    pub fn new(
        config: HydratorConfig,
        gate: Arc<OfflineGate>,
        library: Arc<dyn Library>,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, CoreError> {
        let connector = Arc::new(TcpConnector::new(config.client.clone())?);
        Ok(Self::with_connector(
            config, gate, connector, library, extractor,
        ))
    }

    /// Build over a caller-supplied transport factory. The client shares
    /// `gate`, so batch and per-connection checks read the same policy.
    pub fn with_connector(
        config: HydratorConfig,
        gate: Arc<OfflineGate>,
        connector: Arc<dyn Connector>,
        library: Arc<dyn Library>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let client = HttpClient::with_connector(Arc::clone(&gate), connector, config.client.clone());
        let staging = StagingArea::new(&config.staging_dir);
        Self {
            config,
            gate,
            client,
            library,
            extractor,
            staging,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &HydratorConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<OfflineGate> {
        &self.gate
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn hydrate(&self, requests: &[ToolRequest]) -> Result<HydrationReport, CoreError> {
        self.hydrate_with(requests, &mut |_: &HydrationEvent| {})
    }

    /// Run on the calling thread, delivering events to `observer` as they happen.
    pub fn hydrate_with(
        &self,
        requests: &[ToolRequest],
        observer: &mut dyn HydrationObserver,
    ) -> Result<HydrationReport, CoreError> {
        let _guard = RunGuard::try_acquire(&self.running).ok_or(CoreError::AlreadyRunning)?;
        self.run(requests, observer)
    }

    /// Body of a run. The caller holds the run guard.
    pub(crate) fn run(
        &self,
        requests: &[ToolRequest],
        observer: &mut dyn HydrationObserver,
    ) -> Result<HydrationReport, CoreError> {
        self.staging.initialize()?;
        let _lock = StagingLock::try_acquire(&self.staging.lock_file())?.ok_or_else(|| {
            CoreError::StagingLocked(self.staging.dir().display().to_string())
        })?;

        let started_at = chrono::Utc::now().to_rfc3339();
        info!(
            "hydrating {} tool(s) from {}",
            requests.len(),
            self.config.manifest
        );

        let report = match self.prepare_batch() {
            Ok(manifest) => {
                let results = self.run_tools(&manifest, requests, observer);
                HydrationReport::from_results(results, None, started_at)
            }
            Err(failure) => {
                warn!("batch rejected: {}", failure.reason());
                let results = requests
                    .iter()
                    .map(|request| {
                        let outcome = ToolOutcome::Failed {
                            reason: failure.reason().to_owned(),
                        };
                        observer.on_event(&HydrationEvent::ToolFinished {
                            request: request.clone(),
                            outcome: outcome.clone(),
                        });
                        ToolResult {
                            request: request.clone(),
                            outcome,
                        }
                    })
                    .collect();
                HydrationReport::from_results(results, Some(failure), started_at)
            }
        };

        info!(
            "hydration finished: {} installed, {} failed",
            report.installed_count, report.failed_count
        );
        observer.on_event(&HydrationEvent::BatchFinished {
            report: report.clone(),
        });
        Ok(report)
    }

    fn prepare_batch(&self) -> Result<Manifest, BatchFailure> {
        self.gate
            .guard_network_call("hydration batch", None)
            .map_err(|e| BatchFailure::Policy(e.to_string()))?;
        self.config
            .manifest
            .load(self.config.kind, &self.client)
            .map_err(|e| match e {
                CoreError::Remote(ref remote) if remote.is_policy_denial() => {
                    BatchFailure::Policy(e.to_string())
                }
                _ => BatchFailure::Manifest(e.to_string()),
            })
    }

    fn run_tools(
        &self,
        manifest: &Manifest,
        requests: &[ToolRequest],
        observer: &mut dyn HydrationObserver,
    ) -> Vec<ToolResult> {
        let mirror = self.config.effective_mirror();
        let total = requests.len();
        let mut results = Vec::with_capacity(total);
        for (index, request) in requests.iter().enumerate() {
            observer.on_event(&HydrationEvent::ToolStarted {
                request: request.clone(),
                index,
                total,
            });
            let outcome = match self.hydrate_tool(manifest, mirror.as_ref(), request, observer) {
                Ok(already_present) => {
                    info!("{request} installed");
                    ToolOutcome::Installed { already_present }
                }
                Err(e) => {
                    warn!("{request} failed: {e}");
                    ToolOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            observer.on_event(&HydrationEvent::ToolFinished {
                request: request.clone(),
                outcome: outcome.clone(),
            });
            results.push(ToolResult {
                request: request.clone(),
                outcome,
            });
        }
        results
    }

    /// Returns `true` when the tool was already in the library.
    fn hydrate_tool(
        &self,
        manifest: &Manifest,
        mirror: Option<&MirrorRoot>,
        request: &ToolRequest,
        observer: &mut dyn HydrationObserver,
    ) -> Result<bool, CoreError> {
        if self.library.tool_exists(&request.id, &request.version) {
            debug!("{request} already present in library");
            return Ok(true);
        }
        let entry = manifest
            .lookup(&request.id, &request.version)
            .ok_or_else(|| CoreError::NotInManifest(request.clone()))?;
        let source = resolve_archive_source(&entry.location, mirror)?;
        debug!("staging {request} from {source}");

        let staged = self.stage(&source, request, observer)?;
        let result = self.install_staged(entry, &staged, request);
        self.staging.discard(&staged);
        result.map(|()| false)
    }

    fn stage(
        &self,
        source: &ArchiveSource,
        request: &ToolRequest,
        observer: &mut dyn HydrationObserver,
    ) -> Result<PathBuf, CoreError> {
        let (id, version) = (request.id.as_str(), request.version.as_str());
        match source {
            ArchiveSource::Local(path) => {
                let staged = self.staging.stage_local(path, id, version)?;
                let len = std::fs::metadata(&staged)?.len();
                observer.on_event(&HydrationEvent::Progress {
                    request: request.clone(),
                    bytes: len,
                    total: len,
                });
                Ok(staged)
            }
            ArchiveSource::Remote(url) => {
                let dest = self.staging.prepare(id, version)?;
                let mut progress = |bytes: u64, total: u64| {
                    observer.on_event(&HydrationEvent::Progress {
                        request: request.clone(),
                        bytes,
                        total,
                    });
                };
                if let Err(e) = self.client.download_to(url, &dest, &mut progress) {
                    self.staging.discard(&dest);
                    return Err(e.into());
                }
                Ok(dest)
            }
        }
    }

    /// Verify, extract, confirm. Verification always finishes before the
    /// extractor sees the archive.
    fn install_staged(
        &self,
        entry: &ToolEntry,
        staged: &Path,
        request: &ToolRequest,
    ) -> Result<(), CoreError> {
        let (id, version) = (request.id.as_str(), request.version.as_str());
        if let Some(expected) = entry.size {
            let actual = std::fs::metadata(staged)?.len();
            if actual != expected {
                warn!("{request}: staged archive is {actual} bytes, manifest declares {expected}");
                return Err(StoreError::SizeMismatch {
                    path: staged.display().to_string(),
                    expected,
                    actual,
                }
                .into());
            }
        }
        match &entry.sha256 {
            Some(expected) => {
                if let Err(e) = verify_sha256(staged, expected) {
                    if e.is_integrity_failure() {
                        warn!("{request}: refusing to extract, {e}");
                    }
                    return Err(e.into());
                }
            }
            None => debug!("{request} declares no sha256, archive is unverified"),
        }

        self.extractor
            .extract_to_library(staged, id, version)
            .map_err(|e| CoreError::Extract {
                tool: request.to_string(),
                reason: e.to_string(),
            })?;

        if !self.library.tool_exists(id, version) {
            return Err(CoreError::NotInstalled(request.clone()));
        }
        Ok(())
    }
}
