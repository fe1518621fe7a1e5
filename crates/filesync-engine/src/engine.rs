//! Invocation entry point wrapping one synchronization run

use crate::diagnostics::Diagnostics;
use crate::share::{CommandShareConnector, ShareSession};
use filesync_config::{Config, ConfigLoader};
use filesync_sync::{ChangeFilter, ProgressReporter, SyncOptions, SyncOrchestrator};
use filesync_types::{Error, RemoteCredentials, Result, RunResult, RunStatus, ShareConnector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of one invocation
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Terminal status
    pub status: RunStatus,
    /// Ordered human-readable diagnostics
    pub diagnostics: Vec<String>,
    /// Detailed result, present when the run reached the end
    pub result: Option<RunResult>,
}

impl RunReport {
    /// Whether the run succeeded
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Runs synchronizations for a hosting scheduler or the CLI
#[derive(Clone)]
pub struct SyncEngine {
    config: Arc<Config>,
    options: SyncOptions,
    filter: ChangeFilter,
    connector: Option<Arc<dyn ShareConnector>>,
    cancel: CancellationToken,
    progress: Option<ProgressReporter>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("options", &self.options)
            .field("filter", &self.filter)
            .field("has_connector", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine from the default configuration locations
    pub fn new() -> Result<Self> {
        let config = ConfigLoader::load_default()?;
        Self::with_config(config)
    }

    /// Create an engine from `config`
    pub fn with_config(config: Config) -> Result<Self> {
        EngineBuilder::new().with_config(config).build()
    }

    /// Loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Options applied to every run
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Token that cancels runs of this engine
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Synchronize `source` into `destination`.
    ///
    /// With credentials the configured share connector makes both roots
    /// accessible first and releases them afterwards, whatever the outcome.
    pub async fn run<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source: P,
        destination: Q,
        credentials: Option<RemoteCredentials>,
    ) -> RunReport {
        let source = source.as_ref();
        let destination = destination.as_ref();
        let mut diagnostics = Diagnostics::new();
        diagnostics.started(source, destination, self.options.dry_run);

        let session = match credentials {
            Some(credentials) => match self.open_session(source, destination, &credentials).await {
                Ok(session) => Some(session),
                Err(e) => return Self::report_error(diagnostics, &e),
            },
            None => None,
        };

        let result = self.sync(source, destination).await;

        if let Some(session) = session {
            if let Err(e) = session.close().await {
                diagnostics.warning(format!("Failed to release share access: {}", e));
            }
        }

        match result {
            Ok(result) => Self::report_result(diagnostics, result),
            Err(e) => Self::report_error(diagnostics, &e),
        }
    }

    async fn sync(&self, source: &Path, destination: &Path) -> Result<RunResult> {
        let mut orchestrator =
            SyncOrchestrator::new(self.options.clone()).with_cancellation(self.cancel.clone());
        if let Some(progress) = &self.progress {
            orchestrator = orchestrator.with_progress(progress.clone());
        }
        orchestrator.sync(source, destination, &self.filter).await
    }

    async fn open_session(
        &self,
        source: &Path,
        destination: &Path,
        credentials: &RemoteCredentials,
    ) -> Result<ShareSession> {
        let connector = self.connector.clone().ok_or_else(|| {
            Error::remote_access("Credentials were supplied but no share connector is configured")
        })?;
        debug!("Opening share session for user '{}'", credentials.user);
        ShareSession::open(
            connector,
            [source.to_path_buf(), destination.to_path_buf()],
            credentials,
        )
        .await
    }

    /// A run cancelled while applying still returns its per-item outcomes
    fn report_result(mut diagnostics: Diagnostics, result: RunResult) -> RunReport {
        diagnostics.result(&result);
        diagnostics.completed(&result);
        RunReport {
            status: result.status(),
            diagnostics: diagnostics.into_lines(),
            result: Some(result),
        }
    }

    fn report_error(mut diagnostics: Diagnostics, error: &Error) -> RunReport {
        diagnostics.failed(error);
        let status = if error.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Error
        };
        RunReport {
            status,
            diagnostics: diagnostics.into_lines(),
            result: None,
        }
    }
}

/// Builder for creating a sync engine
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<Config>,
    filter: Option<ChangeFilter>,
    dry_run: bool,
    connector: Option<Arc<dyn ShareConnector>>,
    cancel: Option<CancellationToken>,
    progress: Option<ProgressReporter>,
}

impl EngineBuilder {
    /// Create a new engine builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load the configuration from `path`, or from the default locations
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Result<Self> {
        self.config = Some(ConfigLoader::load(path.as_deref())?);
        Ok(self)
    }

    /// Use `filter` instead of the configured exclude patterns
    pub fn with_filter(mut self, filter: ChangeFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Report without modifying the destination
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Use `connector` for credentialed runs instead of the configured commands
    pub fn with_connector(mut self, connector: Arc<dyn ShareConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Stop runs once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Report run progress to `reporter`
    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<SyncEngine> {
        let config = match self.config {
            Some(config) => config,
            None => ConfigLoader::load_default()?,
        };

        let filter = match self.filter {
            Some(filter) => filter,
            None => ChangeFilter::new(&config.sync.exclude)?,
        };

        let connector = match self.connector {
            Some(connector) => Some(connector),
            None => CommandShareConnector::from_config(&config.share)?
                .map(|c| Arc::new(c) as Arc<dyn ShareConnector>),
        };

        let options = SyncOptions::from_config(&config).with_dry_run(self.dry_run);
        info!(
            "Sync engine ready ({} exclude patterns, share connector {})",
            filter.patterns().len(),
            if connector.is_some() { "configured" } else { "not configured" }
        );

        Ok(SyncEngine {
            config: Arc::new(config),
            options,
            filter,
            connector,
            cancel: self.cancel.unwrap_or_default(),
            progress: self.progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::tests::RecordingConnector;
    use tempfile::TempDir;

    fn engine() -> EngineBuilder {
        EngineBuilder::new().with_config(Config::default())
    }

    #[tokio::test]
    async fn test_run_reports_each_change() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        std::fs::create_dir_all(source.join("docs")).unwrap();
        std::fs::write(source.join("docs/a.txt"), b"alpha").unwrap();
        std::fs::write(source.join("b.txt"), b"bravo").unwrap();

        let report = engine()
            .build()
            .unwrap()
            .run(&source, temp.path().join("dst"), None)
            .await;

        assert_eq!(report.status, RunStatus::Success);
        assert!(report.diagnostics[0].starts_with("Starting sync"));
        assert!(report.diagnostics.iter().any(|l| l == "Applied Create b.txt"));
        assert!(report.diagnostics.last().unwrap().starts_with("Sync completed"));
        assert_eq!(report.result.unwrap().applied_count(), 2);
    }

    #[tokio::test]
    async fn test_configured_excludes_apply() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        let destination = temp.path().join("dst");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("keep.txt"), b"1").unwrap();
        std::fs::write(source.join("drop.tmp"), b"2").unwrap();

        let mut config = Config::default();
        config.sync.exclude = vec!["*.tmp".to_string()];
        let report = SyncEngine::with_config(config)
            .unwrap()
            .run(&source, &destination, None)
            .await;

        assert!(report.is_success());
        assert!(destination.join("keep.txt").exists());
        assert!(!destination.join("drop.tmp").exists());
    }

    #[tokio::test]
    async fn test_fatal_error_becomes_error_status() {
        let temp = TempDir::new().unwrap();

        let report = engine()
            .build()
            .unwrap()
            .run(temp.path().join("missing"), temp.path().join("dst"), None)
            .await;

        assert_eq!(report.status, RunStatus::Error);
        assert!(report.result.is_none());
        assert!(report.diagnostics.last().unwrap().starts_with("Sync failed"));
    }

    #[tokio::test]
    async fn test_cancellation_is_its_own_status() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let report = engine()
            .with_cancellation(token)
            .build()
            .unwrap()
            .run(temp.path().join("src"), temp.path().join("dst"), None)
            .await;

        assert_eq!(report.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_cancelled_result_keeps_item_lines() {
        use filesync_types::{
            ApplyOutcome, ChangeRecord, ContentSignature, ReplicaId, RunId, SkipReason,
        };
        use std::time::{Duration, UNIX_EPOCH};

        let signature = ContentSignature::new(1, UNIX_EPOCH);
        let result = RunResult {
            run_id: RunId::new_v4(),
            source_id: ReplicaId::new_random(),
            destination_id: ReplicaId::new_random(),
            outcomes: vec![
                ApplyOutcome::applied(ChangeRecord::create("a.txt", signature.clone())),
                ApplyOutcome::skipped(
                    ChangeRecord::create("b.txt", signature),
                    SkipReason::Cancelled,
                    None,
                ),
            ],
            issues: Vec::new(),
            duration: Duration::from_millis(5),
            dry_run: false,
            cancelled: true,
        };

        let report = SyncEngine::report_result(Diagnostics::new(), result);

        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report.diagnostics.iter().any(|l| l == "Applied Create a.txt"));
        assert!(report
            .diagnostics
            .iter()
            .any(|l| l.starts_with("Skipped Create b.txt")));
        assert!(report.diagnostics.last().unwrap().starts_with("Sync cancelled"));
        assert_eq!(report.result.unwrap().applied_count(), 1);
    }

    #[tokio::test]
    async fn test_credentials_without_connector_fail() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();

        let report = engine()
            .build()
            .unwrap()
            .run(
                temp.path().join("src"),
                temp.path().join("dst"),
                Some(RemoteCredentials::new("svc", "secret")),
            )
            .await;

        assert_eq!(report.status, RunStatus::Error);
        assert!(report.diagnostics.iter().all(|l| !l.contains("secret")));
    }

    #[tokio::test]
    async fn test_shares_released_after_failed_run() {
        let temp = TempDir::new().unwrap();
        let connector = Arc::new(RecordingConnector::default());
        let source = temp.path().join("missing");
        let destination = temp.path().join("dst");

        let report = engine()
            .with_connector(connector.clone())
            .build()
            .unwrap()
            .run(&source, &destination, Some(RemoteCredentials::new("svc", "secret")))
            .await;

        assert_eq!(report.status, RunStatus::Error);
        let calls = connector.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].starts_with("connect"));
        assert!(calls[2].starts_with("disconnect"));
        assert!(calls[3].starts_with("disconnect"));
    }
}
