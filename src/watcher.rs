//! File watcher and background indexer.
//!
//! Two tiers, matching the coordinator's epoch model: a `notify`-backed
//! debouncer coalesces filesystem bursts within a short window (the
//! watcher tier), and a dedicated background thread drains whatever
//! paths piled up since it last looked and republishes them as one
//! epoch (the indexer tier). Watcher events are only a hint -- content
//! hashing inside `Coordinator::reindex_incremental` is what actually
//! decides whether anything changed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebounceConfig, DebounceEventResult, Debouncer};
use parking_lot::Mutex;

use crate::config::WatcherConfig;
use crate::coordinator::Coordinator;

/// A running watcher thread. Dropping this without calling `stop` leaves
/// the background thread running; `stop` is the clean shutdown path.
pub struct Watcher {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Spawn the background thread that owns the debouncer, the
    /// safety-net walk, and the optional HEAD tripwire, all driving the
    /// same `coordinator`.
    pub fn spawn(coordinator: Arc<Coordinator>, root: PathBuf, config: WatcherConfig) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_bg = Arc::clone(&shutdown);

        let thread = std::thread::Builder::new()
            .name("codeplane-watcher".to_string())
            .spawn(move || run(coordinator, root, config, shutdown_bg))
            .expect("spawn watcher thread");

        Self { shutdown, thread: Some(thread) }
    }

    /// Signal shutdown and block until the background thread exits.
    /// Per the bounded-timeout shutdown sequence, callers that need a
    /// deadline should race this against their own timer; the journal,
    /// not a graceful stop, is what keeps the index consistent either
    /// way.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run(coordinator: Arc<Coordinator>, root: PathBuf, config: WatcherConfig, shutdown: Arc<AtomicBool>) {
    if let Err(e) = coordinator.reindex_full() {
        tracing::warn!(error = %e, "initial full reindex failed");
    }

    if looks_like_unreliable_mount(&root) {
        tracing::info!(root = %root.display(), "mount looks unreliable for native notifications, polling instead");
        run_polling(&coordinator, &root, &config, &shutdown);
        return;
    }

    let pending: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));
    let pending_tx = Arc::clone(&pending);
    let coordinator_for_filter = Arc::clone(&coordinator);
    let (tx, rx) = mpsc::channel::<DebounceEventResult>();

    let debounce_config = DebounceConfig::default().with_timeout(Duration::from_millis(config.debounce_ms));
    let debouncer_built: Result<Debouncer<RecommendedWatcher>, notify_debouncer_mini::notify::Error> =
        new_debouncer_opt(debounce_config, move |result: DebounceEventResult| {
            if let Ok(events) = &result {
                // Drop events inside a pruned subtree here rather than
                // waking `reindex_incremental` for them at all --
                // `Coordinator` re-filters on its own too, but there is no
                // reason to schedule a batch for a path it will just
                // discard.
                let mut guard = pending_tx.lock();
                for event in events {
                    if coordinator_for_filter.is_indexable(&event.path) {
                        guard.insert(event.path.clone());
                    }
                }
            }
            let _ = tx.send(result);
        });

    let mut debouncer = match debouncer_built {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "failed to start native file watcher, falling back to polling");
            run_polling(&coordinator, &root, &config, &shutdown);
            return;
        }
    };

    if let Err(e) = debouncer.watcher().watch(&root, RecursiveMode::Recursive) {
        tracing::error!(error = %e, root = %root.display(), "failed to watch root, falling back to polling");
        run_polling(&coordinator, &root, &config, &shutdown);
        return;
    }

    let mut last_safety_net = Instant::now();
    let mut last_head_check = Instant::now();
    let mut last_head = current_head(&root);

    while !shutdown.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(Ok(_events)) => {}
            Ok(Err(errors)) => {
                for e in errors {
                    tracing::warn!(error = %e, "file watcher reported an error");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        drain_and_reindex(&coordinator, &pending);

        if let Some(tripwire_secs) = config.head_tripwire_secs {
            if last_head_check.elapsed() >= Duration::from_secs(tripwire_secs) {
                last_head_check = Instant::now();
                let head = current_head(&root);
                if head != last_head {
                    tracing::info!("HEAD moved, scheduling a full reconcile");
                    coordinator.refresh_ignore();
                    if let Err(e) = coordinator.reindex_full() {
                        tracing::warn!(error = %e, "HEAD-triggered reindex failed");
                    }
                    last_head = head;
                }
            }
        }

        if last_safety_net.elapsed() >= Duration::from_secs(config.safety_net_secs) {
            last_safety_net = Instant::now();
            if let Err(e) = coordinator.reindex_full() {
                tracing::warn!(error = %e, "safety-net reindex failed");
            }
        }
    }
}

/// Drain whatever paths piled up since the last look and republish them
/// as one epoch. Mirrors the background-indexer-tier drain-under-lock:
/// the lock is held only long enough to swap the set out.
fn drain_and_reindex(coordinator: &Coordinator, pending: &Mutex<HashSet<PathBuf>>) {
    let batch: Vec<PathBuf> = {
        let mut guard = pending.lock();
        if guard.is_empty() {
            return;
        }
        guard.drain().collect()
    };
    if let Err(e) = coordinator.reindex_incremental(&batch) {
        tracing::warn!(error = %e, "incremental reindex failed");
    }
}

/// Polling fallback for mounts where native notifiers are unreliable:
/// periodic full reconciles, with the same HEAD tripwire as the native
/// path.
fn run_polling(coordinator: &Arc<Coordinator>, root: &Path, config: &WatcherConfig, shutdown: &AtomicBool) {
    let mut last_head = current_head(root);
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(config.poll_interval_ms));
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        if let Some(_tripwire_secs) = config.head_tripwire_secs {
            let head = current_head(root);
            if head != last_head {
                coordinator.refresh_ignore();
                last_head = head;
            }
        }

        if let Err(e) = coordinator.reindex_full() {
            tracing::warn!(error = %e, "polling reindex failed");
        }
    }
}

/// Path heuristics for mounts where native filesystem notifications are
/// known to be unreliable: Windows-subsystem mount points, UNC network
/// shares, and common network-mount roots.
fn looks_like_unreliable_mount(root: &Path) -> bool {
    let s = root.to_string_lossy();
    s.starts_with("/mnt/")
        || s.starts_with("//")
        || s.starts_with("\\\\")
        || s.contains("/Volumes/")
        || s.contains("/run/user/")
}

/// Current commit the repository's HEAD resolves to, if `root` sits
/// inside a version-controlled tree. `None` for a plain directory or a
/// detached/unborn HEAD, which simply disables drift detection.
fn current_head(root: &Path) -> Option<String> {
    let repo = gix::discover(root).ok()?;
    let id = repo.head_id().ok()?;
    Some(id.to_string())
}
