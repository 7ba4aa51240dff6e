//! Batch orchestrator: drives one run over a file or directory tree.
//!
//! Processing is single-threaded and sequential by design — the
//! description service is a scarce resource, and sequential processing
//! keeps metadata-write/backup/restore operations free of cross-file
//! races. A single file's failure never aborts the batch; only a
//! missing metadata tool (before any file is touched) or strategy
//! exhaustion under the strict-conversion policy does.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::config::Config;
use crate::describe::recovery::DependencyRecoveryTrigger;
use crate::describe::{self, DescriptionClient};
use crate::error::{ProcessError, ServiceFailure};
use crate::metadata::{self, MetadataTool, MetadataWriter, WriteRequest};
use crate::normalize::{self, NormalizeOutcome, Normalizer};
use crate::retry::RetryPolicy;
use crate::tracking::{
    ImageRecord, RecordStatus, TrackingStore, content_checksum, file_stat, stat_matches,
};

/// Terminal per-file outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Completed,
    /// The file already carries a description.
    Skipped,
    /// The tracking store already knows this exact content.
    TrackedSkip,
    Failed(String),
}

/// Aggregate counts for one run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub success: usize,
    pub skipped: usize,
    pub tracked_skip: usize,
    pub error: usize,
    /// Last diagnostic string per failed file.
    pub failures: Vec<(PathBuf, String)>,
}

impl RunStats {
    pub fn any_success(&self) -> bool {
        self.success > 0
    }

    pub fn total(&self) -> usize {
        self.success + self.skipped + self.tracked_skip + self.error
    }

    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} skipped, {} tracked-skip, {} errors",
            self.success, self.skipped, self.tracked_skip, self.error
        )
    }
}

fn record_outcome(stats: &mut RunStats, path: &Path, outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Completed => {
            stats.success += 1;
            log::info!("  Completed: {}", path.display());
        }
        FileOutcome::Skipped => {
            stats.skipped += 1;
            log::info!("  Skipped (already described): {}", path.display());
        }
        FileOutcome::TrackedSkip => {
            stats.tracked_skip += 1;
            log::info!("  Skipped (tracked): {}", path.display());
        }
        FileOutcome::Failed(detail) => {
            stats.error += 1;
            stats.failures.push((path.to_path_buf(), detail.clone()));
            log::error!("  Failed: {}: {detail}", path.display());
        }
    }
}

/// Collect candidate files from the given roots (files or directories),
/// honoring the recursion flag and extension allow-list, sorted
/// newest-first by modification time so recent imports are prioritized.
pub fn collect_candidates(config: &Config, roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<(PathBuf, i64)> = Vec::new();

    for root in roots {
        if root.is_file() {
            if config.extension_allowed(root) {
                let (mtime, _) = file_stat(root).unwrap_or((0, 0));
                files.push((root.clone(), mtime));
            } else {
                log::warn!("Skipping unsupported file: {}", root.display());
            }
        } else if root.is_dir() {
            let depth = if config.run.recursive { usize::MAX } else { 1 };
            for entry in WalkDir::new(root)
                .max_depth(depth)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && config.extension_allowed(p) {
                    let (mtime, _) = file_stat(p).unwrap_or((0, 0));
                    files.push((p.to_path_buf(), mtime));
                }
            }
        } else {
            log::warn!("Path does not exist: {}", root.display());
        }
    }

    files.sort_by_key(|(_, mtime)| std::cmp::Reverse(*mtime));
    files.into_iter().map(|(path, _)| path).collect()
}

/// One run over a tree. Owns the cross-file mutable state (service
/// failure streak, restart cooldown) — it is the only writer.
pub struct Orchestrator {
    config: Config,
    store: Option<TrackingStore>,
    normalizer: Normalizer,
    tool: Box<dyn MetadataTool>,
    client: DescriptionClient,
    recovery: Option<DependencyRecoveryTrigger>,
    last_restart: Option<Instant>,
    service_failures: u32,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        store: Option<TrackingStore>,
        tool: Box<dyn MetadataTool>,
        client: DescriptionClient,
    ) -> Self {
        let normalizer = Normalizer::new(config.normalize.min_file_bytes);
        let recovery = config
            .service
            .restart_command
            .clone()
            .map(DependencyRecoveryTrigger::new);
        Self {
            config,
            store,
            normalizer,
            tool,
            client,
            recovery,
            last_restart: None,
            service_failures: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Substitute the strategy chain. Used by tests.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Cooperative stop signal, checked between files — never mid-write.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> Option<&TrackingStore> {
        self.store.as_ref()
    }

    /// Drive one run. Per-file failures are absorbed into the stats;
    /// only a missing metadata tool or strict-mode conversion
    /// exhaustion aborts.
    pub async fn run(&mut self, roots: &[PathBuf]) -> Result<RunStats, ProcessError> {
        if !self.tool.is_available() {
            return Err(ProcessError::DependencyMissing(
                "metadata tool (exiftool) not found on PATH".into(),
            ));
        }

        let files = collect_candidates(&self.config, roots);
        log::info!("Found {} candidate file(s)", files.len());
        if self.config.run.dry_run {
            log::info!("DRY RUN — no files will be modified");
        }

        let mut stats = RunStats::default();
        let total = files.len();

        for (index, path) in files.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                log::warn!("Stop requested — ending run after {index} of {total} file(s)");
                break;
            }
            if self.config.run.batch_size > 0 && index > 0 && index % self.config.run.batch_size == 0
            {
                log::info!(
                    "Processed {index} file(s) — pausing {}s between batches",
                    self.config.run.batch_delay_secs
                );
                tokio::time::sleep(Duration::from_secs(self.config.run.batch_delay_secs)).await;
            }

            log::info!("[{}/{total}] {}", index + 1, path.display());
            let outcome = self.process_file(path).await?;
            record_outcome(&mut stats, path, &outcome);
        }

        log::info!("Done: {}", stats.summary());
        Ok(stats)
    }

    async fn process_file(&mut self, path: &Path) -> Result<FileOutcome, ProcessError> {
        let override_mode = self.config.run.override_existing;
        let use_checksum = self.config.tracking.checksum;

        // Checksum IO failures fail open: the file is processed as if
        // untracked.
        let checksum = if self.store.is_some() && use_checksum {
            match content_checksum(path) {
                Ok(c) => Some(c),
                Err(e) => {
                    log::warn!("Checksum failed for {} (fail open): {e}", path.display());
                    None
                }
            }
        } else {
            None
        };

        if !override_mode {
            // Dedup check 1: the tracking store.
            if let Some(store) = &self.store {
                if let Some(c) = &checksum {
                    if store.is_tracked(c) {
                        return Ok(FileOutcome::TrackedSkip);
                    }
                } else if !use_checksum {
                    if let Some(record) = store.find_by_path(path) {
                        if record.status == RecordStatus::Completed && stat_matches(&record, path)
                        {
                            return Ok(FileOutcome::TrackedSkip);
                        }
                    }
                }
            }
            // Dedup check 2: in-place metadata.
            if metadata::has_description(path) {
                return Ok(FileOutcome::Skipped);
            }
        }

        // Normalize when the direct decode fails.
        let describe_input = if normalize::decodes_directly(path) {
            path.to_path_buf()
        } else {
            match self.normalizer.normalize(path) {
                Ok(NormalizeOutcome::Converted(p)) | Ok(NormalizeOutcome::SiblingJpeg(p)) => p,
                Ok(NormalizeOutcome::Placeholder) => {
                    let detail = "placeholder or corrupted stub file".to_string();
                    self.record_failure(path, checksum.as_deref(), &detail);
                    return Ok(FileOutcome::Failed(detail));
                }
                Ok(NormalizeOutcome::Exhausted) => {
                    let detail =
                        format!("all conversion strategies failed for {}", path.display());
                    if self.config.normalize.strict_conversion {
                        return Err(ProcessError::ConversionExhausted { detail });
                    }
                    self.record_failure(path, checksum.as_deref(), &detail);
                    return Ok(FileOutcome::Failed(detail));
                }
                Err(e) => {
                    let detail = format!("normalization error: {e}");
                    self.record_failure(path, checksum.as_deref(), &detail);
                    return Ok(FileOutcome::Failed(detail));
                }
            }
        };

        // Describe.
        let bytes = match std::fs::read(&describe_input) {
            Ok(b) => b,
            Err(e) => {
                let detail = format!("failed to read {}: {e}", describe_input.display());
                self.record_failure(path, checksum.as_deref(), &detail);
                return Ok(FileOutcome::Failed(detail));
            }
        };
        let image_base64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes);
        let prompt = describe::build_prompt();

        let description = match self.client.describe(&image_base64, &prompt).await {
            Ok(text) => {
                self.service_failures = 0;
                text
            }
            Err(e) => {
                self.note_service_failure(&e);
                let detail = e.to_string();
                self.record_failure(path, checksum.as_deref(), &detail);
                return Ok(FileOutcome::Failed(detail));
            }
        };
        let tags = describe::derive_tags(&description, 8);
        log::debug!("  Description: {description}");
        log::debug!("  Tags: {}", tags.join(", "));

        if self.config.run.dry_run {
            log::info!(
                "  DRY RUN — would write description ({} chars) and {} tag(s)",
                description.len(),
                tags.len()
            );
            return Ok(FileOutcome::Completed);
        }

        // Write and verify.
        let writer = MetadataWriter::new(
            self.tool.as_ref(),
            RetryPolicy::exponential(
                self.config.metadata.max_write_attempts,
                Duration::from_millis(self.config.metadata.backoff_base_ms),
            ),
            self.config.backup_dir(),
            override_mode,
        );
        let request = WriteRequest {
            description: &description,
            tags: &tags,
        };
        match writer.write(path, &request) {
            Ok(outcome) => {
                if let Some(companion) = &outcome.fallback_path {
                    log::info!("  Fields written to companion {}", companion.display());
                }
                self.record_success(path, &description, &tags, outcome.attempts);
                Ok(FileOutcome::Completed)
            }
            Err(e) => {
                let detail = e.to_string();
                self.record_failure(path, checksum.as_deref(), &detail);
                Ok(FileOutcome::Failed(detail))
            }
        }
    }

    /// Update the store with the post-write content identity.
    fn record_success(&self, path: &Path, description: &str, tags: &[String], attempts: u32) {
        let Some(store) = &self.store else { return };
        let checksum = if self.config.tracking.checksum {
            content_checksum(path).ok()
        } else {
            None
        };
        let (mtime, size) = file_stat(path).unwrap_or((0, 0));
        store.upsert(&ImageRecord {
            path: path.to_path_buf(),
            checksum,
            mtime,
            size,
            status: RecordStatus::Completed,
            attempts,
            last_error: None,
            description: Some(description.to_string()),
            tags: Some(tags.join(", ")),
        });
    }

    fn record_failure(&self, path: &Path, checksum: Option<&str>, detail: &str) {
        if self.config.run.dry_run {
            return;
        }
        if let Some(store) = &self.store {
            store.mark_failed(path, checksum, detail);
        }
    }

    /// Count timeout/connection failures and, past the threshold, fire
    /// the operator-configured restart — but only once per cooldown
    /// window, so a span of consecutive failures cannot trigger a
    /// restart storm.
    fn note_service_failure(&mut self, err: &ProcessError) {
        let counts = matches!(
            err,
            ProcessError::DescriptionService {
                kind: ServiceFailure::Timeout | ServiceFailure::Connection,
                ..
            }
        );
        if !counts {
            return;
        }
        self.service_failures += 1;

        let Some(trigger) = &self.recovery else {
            return;
        };
        if self.service_failures < self.config.service.restart_after_failures {
            return;
        }
        let cooldown = Duration::from_secs(self.config.service.restart_cooldown_secs);
        let cooled_down = self
            .last_restart
            .map(|at| at.elapsed() >= cooldown)
            .unwrap_or(true);
        if !cooled_down {
            log::debug!("Service restart suppressed by cooldown");
            return;
        }
        if let Err(e) = trigger.restart() {
            log::error!("Service restart failed: {e}");
        }
        self.last_restart = Some(Instant::now());
        self.service_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::{DescriptionService, ServiceError};
    use crate::metadata::png_text;
    use crate::metadata::testing::FakeTool;
    use std::fs;
    use tempfile::TempDir;

    struct CannedService;

    #[async_trait::async_trait]
    impl DescriptionService for CannedService {
        fn name(&self) -> &str {
            "canned"
        }
        async fn describe(&self, _: &str, _: &str) -> Result<String, ServiceError> {
            Ok("A small test image filled with solid colored pixels".into())
        }
    }

    struct RefusingService;

    #[async_trait::async_trait]
    impl DescriptionService for RefusingService {
        fn name(&self) -> &str {
            "refusing"
        }
        async fn describe(&self, _: &str, _: &str) -> Result<String, ServiceError> {
            Err(ServiceError::Connection("connection refused".into()))
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.run.recursive = true;
        config.metadata.backup_dir = Some(dir.path().join("backups"));
        config.metadata.backoff_base_ms = 1;
        config.service.retry_delay_secs = 0;
        config.service.max_retries = 1;
        config
    }

    fn canned_client() -> DescriptionClient {
        DescriptionClient::new(
            Arc::new(CannedService),
            Duration::from_secs(5),
            1,
            Duration::from_millis(1),
        )
    }

    fn orchestrator(dir: &TempDir, config: Config) -> Orchestrator {
        Orchestrator::new(
            config,
            Some(TrackingStore::open_in_memory().unwrap()),
            Box::new(FakeTool::new()),
            canned_client(),
        )
        // Tests never probe real converter binaries.
        .with_normalizer(Normalizer::with_strategies(vec![], 10 * 1024))
    }

    fn write_test_png(path: &Path, shade: u8) {
        let img = image::RgbImage::from_pixel(6, 6, image::Rgb([shade, shade, shade]));
        img.save(path).unwrap();
    }

    fn write_described_png(path: &Path) {
        write_test_png(path, 128);
        let bytes = fs::read(path).unwrap();
        let tagged = png_text::set_text_chunks(
            &bytes,
            &[(png_text::DESCRIPTION_KEY, "already has a description")],
        )
        .unwrap();
        fs::write(path, tagged).unwrap();
    }

    // ── aggregation ──────────────────────────────────────────────────

    #[test]
    fn aggregation_counts_each_outcome() {
        let mut stats = RunStats::default();
        let path = Path::new("/photos/x.jpg");
        for _ in 0..3 {
            record_outcome(&mut stats, path, &FileOutcome::Completed);
        }
        for _ in 0..2 {
            record_outcome(&mut stats, path, &FileOutcome::Skipped);
        }
        record_outcome(&mut stats, path, &FileOutcome::TrackedSkip);
        for _ in 0..4 {
            record_outcome(&mut stats, path, &FileOutcome::Failed("boom".into()));
        }

        assert_eq!(stats.success, 3);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.tracked_skip, 1);
        assert_eq!(stats.error, 4);
        assert_eq!(stats.total(), 10);
        assert!(stats.any_success());
        assert_eq!(stats.failures.len(), 4);
        assert_eq!(stats.summary(), "3 succeeded, 2 skipped, 1 tracked-skip, 4 errors");
    }

    // ── enumeration ──────────────────────────────────────────────────

    #[test]
    fn candidates_sorted_newest_first() {
        let dir = TempDir::new().unwrap();
        let older = dir.path().join("older.png");
        let newer = dir.path().join("newer.png");
        write_test_png(&older, 10);
        write_test_png(&newer, 20);

        let now = filetime::FileTime::from_last_modification_time(
            &fs::metadata(&newer).unwrap(),
        );
        let past = filetime::FileTime::from_unix_time(now.unix_seconds() - 86_400, 0);
        filetime::set_file_times(&older, past, past).unwrap();

        let config = test_config(&dir);
        let files = collect_candidates(&config, &[dir.path().to_path_buf()]);
        assert_eq!(files, vec![newer, older]);
    }

    #[test]
    fn non_recursive_run_ignores_subdirectories() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("nested");
        fs::create_dir(&sub).unwrap();
        write_test_png(&dir.path().join("top.png"), 1);
        write_test_png(&sub.join("deep.png"), 2);

        let mut config = test_config(&dir);
        config.run.recursive = false;
        let files = collect_candidates(&config, &[dir.path().to_path_buf()]);
        assert_eq!(files.len(), 1);

        config.run.recursive = true;
        let files = collect_candidates(&config, &[dir.path().to_path_buf()]);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn extension_filter_applies() {
        let dir = TempDir::new().unwrap();
        write_test_png(&dir.path().join("keep.png"), 1);
        fs::write(dir.path().join("drop.txt"), b"not an image").unwrap();

        let config = test_config(&dir);
        let files = collect_candidates(&config, &[dir.path().to_path_buf()]);
        assert_eq!(files.len(), 1);
    }

    // ── full-run properties ──────────────────────────────────────────

    #[tokio::test]
    async fn second_unchanged_run_is_all_tracked_skips() {
        let dir = TempDir::new().unwrap();
        write_test_png(&dir.path().join("a.png"), 40);
        write_test_png(&dir.path().join("b.png"), 80);

        let mut orch = orchestrator(&dir, test_config(&dir));
        let roots = [dir.path().to_path_buf()];

        let first = orch.run(&roots).await.unwrap();
        assert_eq!(first.success, 2);
        assert!(first.any_success());

        let second = orch.run(&roots).await.unwrap();
        assert_eq!(second.success, 0);
        assert_eq!(second.tracked_skip, 2);
        assert_eq!(second.error, 0);
    }

    #[tokio::test]
    async fn changed_content_is_eligible_again() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.png");
        write_test_png(&target, 40);
        write_test_png(&dir.path().join("b.png"), 80);

        let mut orch = orchestrator(&dir, test_config(&dir));
        let roots = [dir.path().to_path_buf()];
        orch.run(&roots).await.unwrap();

        // Same path, different bytes.
        write_test_png(&target, 200);

        let second = orch.run(&roots).await.unwrap();
        assert_eq!(second.success, 1);
        assert_eq!(second.tracked_skip, 1);
    }

    #[tokio::test]
    async fn already_described_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        write_described_png(&dir.path().join("described.png"));

        let mut orch = orchestrator(&dir, test_config(&dir));
        let stats = orch.run(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.success, 0);
    }

    #[tokio::test]
    async fn override_reprocesses_described_files() {
        let dir = TempDir::new().unwrap();
        write_described_png(&dir.path().join("described.png"));

        let mut config = test_config(&dir);
        config.run.override_existing = true;
        let mut orch = orchestrator(&dir, config);
        let stats = orch.run(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(stats.success, 1);
        assert_eq!(stats.skipped, 0);
    }

    #[tokio::test]
    async fn placeholder_stub_fails_without_conversion() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stub.heic"), b"tiny stub").unwrap();

        let mut orch = orchestrator(&dir, test_config(&dir));
        let stats = orch.run(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(stats.error, 1);
        assert!(stats.failures[0].1.contains("placeholder"));
    }

    #[tokio::test]
    async fn conversion_exhaustion_is_soft_by_default() {
        let dir = TempDir::new().unwrap();
        // Big enough to pass the stub check, still undecodable.
        fs::write(dir.path().join("broken.heic"), vec![0u8; 20 * 1024]).unwrap();

        let mut orch = orchestrator(&dir, test_config(&dir));
        let stats = orch.run(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(stats.error, 1);
        assert!(stats.failures[0].1.contains("conversion strategies"));
    }

    #[tokio::test]
    async fn strict_conversion_aborts_the_run() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.heic"), vec![0u8; 20 * 1024]).unwrap();

        let mut config = test_config(&dir);
        config.normalize.strict_conversion = true;
        let mut orch = orchestrator(&dir, config);
        let err = orch.run(&[dir.path().to_path_buf()]).await.unwrap_err();
        assert!(matches!(err, ProcessError::ConversionExhausted { .. }));
    }

    #[tokio::test]
    async fn mixed_batch_aggregates_correctly() {
        let dir = TempDir::new().unwrap();
        // 3 fresh files that will succeed.
        for (i, name) in ["s1.png", "s2.png", "s3.png"].iter().enumerate() {
            write_test_png(&dir.path().join(name), 10 + i as u8);
        }
        // 2 already described.
        write_described_png(&dir.path().join("d1.png"));
        write_described_png(&dir.path().join("d2.png"));
        // 1 tracked in the store.
        let tracked = dir.path().join("t1.png");
        write_test_png(&tracked, 99);
        let store = TrackingStore::open_in_memory().unwrap();
        let (mtime, size) = file_stat(&tracked).unwrap();
        store.upsert(&ImageRecord {
            path: tracked.clone(),
            checksum: Some(content_checksum(&tracked).unwrap()),
            mtime,
            size,
            status: RecordStatus::Completed,
            attempts: 1,
            last_error: None,
            description: Some("tracked".into()),
            tags: None,
        });
        // 4 stubs that will error.
        for name in ["e1.heic", "e2.heic", "e3.heic", "e4.heic"] {
            fs::write(dir.path().join(name), b"stub").unwrap();
        }

        let mut orch = Orchestrator::new(
            test_config(&dir),
            Some(store),
            Box::new(FakeTool::new()),
            canned_client(),
        )
        .with_normalizer(Normalizer::with_strategies(vec![], 10 * 1024));

        let stats = orch.run(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(stats.success, 3);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.tracked_skip, 1);
        assert_eq!(stats.error, 4);
        assert!(stats.any_success());
    }

    #[tokio::test]
    async fn cancellation_stops_between_files() {
        let dir = TempDir::new().unwrap();
        write_test_png(&dir.path().join("a.png"), 40);

        let mut orch = orchestrator(&dir, test_config(&dir));
        orch.cancel_flag().store(true, Ordering::SeqCst);
        let stats = orch.run(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(stats.total(), 0);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.png");
        write_test_png(&target, 40);
        let before = fs::read(&target).unwrap();

        let mut config = test_config(&dir);
        config.run.dry_run = true;
        let mut orch = orchestrator(&dir, config);
        let stats = orch.run(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(stats.success, 1);
        assert_eq!(fs::read(&target).unwrap(), before);
        // Nothing recorded, so a real run still processes it.
        assert!(orch.store().unwrap().stats().unwrap().total == 0);
    }

    #[tokio::test]
    async fn service_failure_marks_file_failed_not_fatal() {
        let dir = TempDir::new().unwrap();
        write_test_png(&dir.path().join("a.png"), 40);
        write_test_png(&dir.path().join("b.png"), 90);

        let client = DescriptionClient::new(
            Arc::new(RefusingService),
            Duration::from_secs(5),
            1,
            Duration::from_millis(1),
        );
        let mut orch = Orchestrator::new(
            test_config(&dir),
            Some(TrackingStore::open_in_memory().unwrap()),
            Box::new(FakeTool::new()),
            client,
        )
        .with_normalizer(Normalizer::with_strategies(vec![], 10 * 1024));

        let stats = orch.run(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(stats.error, 2);
        assert!(!stats.any_success());
        assert!(stats.failures[0].1.contains("description unavailable"));
    }

    // ── restart cooldown ─────────────────────────────────────────────

    #[test]
    fn restart_fires_at_threshold_then_respects_cooldown() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.service.restart_command = Some("true".into());
        config.service.restart_after_failures = 3;
        config.service.restart_cooldown_secs = 3600;

        let mut orch = orchestrator(&dir, config);
        let err = ProcessError::DescriptionService {
            kind: ServiceFailure::Timeout,
            detail: "hung".into(),
        };

        for _ in 0..2 {
            orch.note_service_failure(&err);
        }
        assert!(orch.last_restart.is_none());

        orch.note_service_failure(&err);
        let first_restart = orch.last_restart.expect("restart should have fired");
        assert_eq!(orch.service_failures, 0);

        // Another streak inside the cooldown window must not re-fire.
        for _ in 0..5 {
            orch.note_service_failure(&err);
        }
        assert_eq!(orch.last_restart.unwrap(), first_restart);
    }

    #[test]
    fn http_failures_do_not_count_toward_restart() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.service.restart_command = Some("true".into());
        config.service.restart_after_failures = 1;

        let mut orch = orchestrator(&dir, config);
        orch.note_service_failure(&ProcessError::DescriptionService {
            kind: ServiceFailure::Http,
            detail: "500".into(),
        });
        assert!(orch.last_restart.is_none());
    }
}
