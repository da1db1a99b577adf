//! Runs a complete package rename: resources, then the manifest, then each smali root.
//!
//! A job runs either on the caller's thread ([`ApkCloner::run`]) or on a dedicated worker
//! ([`ApkCloner::start`]) that reports through a channel of [`CloneEvent`]s. Cancellation is
//! polled between files and directories, never in the middle of a write, and nothing already
//! renamed is rolled back.

use crate::bytecode::{find_bytecode_roots, BytecodeTreeRewriter};
use crate::error::{RewriteError, RewriteFileResult};
use crate::manifest::ManifestRewriter;
use crate::options::CloneOptions;
use crate::resources::ResourceTreeRewriter;
use crate::types::{
    FailureReason, PackageIdentifier, ProgressEvent, RewriteResult, RewriteStats, RewriteWarning,
    Stage,
};
use log::{error, info};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Package roots with a job in flight in this process
static RUNNING_ROOTS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn running_roots() -> MutexGuard<'static, HashSet<PathBuf>> {
    RUNNING_ROOTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Claims a package root for the lifetime of a job
pub(crate) struct RunningJob {
    key: PathBuf,
}

impl RunningJob {
    pub(crate) fn acquire(root: &Path) -> Option<RunningJob> {
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        if running_roots().insert(key.clone()) {
            Some(RunningJob { key })
        } else {
            None
        }
    }
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        running_roots().remove(&self.key);
    }
}

/// Cooperative cancellation flag shared between a job and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mutable state threaded through the stages of one job
pub struct JobContext<'a> {
    pub root: &'a Path,
    pub options: &'a CloneOptions,
    pub stats: RewriteStats,
    cancel: &'a CancelToken,
    progress: &'a mut dyn FnMut(ProgressEvent),
    warnings: Vec<RewriteWarning>,
}

impl<'a> JobContext<'a> {
    pub fn new(
        root: &'a Path,
        options: &'a CloneOptions,
        cancel: &'a CancelToken,
        progress: &'a mut dyn FnMut(ProgressEvent),
    ) -> JobContext<'a> {
        JobContext {
            root,
            options,
            stats: RewriteStats::default(),
            cancel,
            progress,
            warnings: vec![],
        }
    }

    pub fn check_cancelled(&self) -> Result<(), FailureReason> {
        if self.cancel.is_cancelled() {
            Err(FailureReason::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Path relative to the package root, or unchanged if it lies outside it
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(self.root).unwrap_or(path).to_path_buf()
    }

    pub fn emit(&mut self, stage: Stage, path: &Path) {
        let event = ProgressEvent::new(stage, self.relative(path));
        (self.progress)(event);
    }

    pub fn warn(&mut self, path: PathBuf, message: String) {
        self.warnings.push(RewriteWarning { path, message });
    }

    pub fn finish(self) -> (RewriteStats, Vec<RewriteWarning>) {
        (self.stats, self.warnings)
    }
}

/// Lifecycle of a job started with [`ApkCloner::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Everything a started job reports, in order: `Started`, any number of `Progress`, one `Finished`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneEvent {
    Started,
    Progress(ProgressEvent),
    Finished(RewriteResult),
}

/// Renames the package of a decoded APK directory in place
///
/// # Examples
///
/// ```no_run
///  use apkclone::cloner::{ApkCloner, CancelToken};
///
///  let cloner = ApkCloner::new("out", "com.example.app", "com.example.clone");
///  let result = cloner.run(&CancelToken::new(), |p| println!("{} {}", p.description, p.path.display()));
///  println!("{result}");
/// ```
#[derive(Debug, Clone)]
pub struct ApkCloner {
    root: PathBuf,
    from: PackageIdentifier,
    to: PackageIdentifier,
    options: CloneOptions,
}

impl ApkCloner {
    pub fn new(root: impl Into<PathBuf>, from: &str, to: &str) -> ApkCloner {
        ApkCloner {
            root: root.into(),
            from: PackageIdentifier::new(from),
            to: PackageIdentifier::new(to),
            options: CloneOptions::default(),
        }
    }

    /// Builds a job renaming whatever package the root's manifest currently declares
    pub fn from_manifest(
        root: impl Into<PathBuf>,
        to: &str,
        options: CloneOptions,
    ) -> RewriteFileResult<ApkCloner> {
        let root = root.into();
        let manifest_path = root.join(&options.manifest_file);
        let from = ManifestRewriter::read_package(&manifest_path)?.ok_or_else(|| {
            RewriteError::io(
                &manifest_path,
                io::Error::new(io::ErrorKind::InvalidData, "manifest declares no package"),
            )
        })?;
        Ok(ApkCloner {
            root,
            from,
            to: PackageIdentifier::new(to),
            options,
        })
    }

    pub fn with_options(mut self, options: CloneOptions) -> ApkCloner {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_package(&self) -> &PackageIdentifier {
        &self.from
    }

    pub fn target_package(&self) -> &PackageIdentifier {
        &self.to
    }

    pub fn options(&self) -> &CloneOptions {
        &self.options
    }

    /// Runs the whole job on the current thread, calling `on_progress` before each file or directory
    pub fn run<F>(&self, cancel: &CancelToken, mut on_progress: F) -> RewriteResult
    where
        F: FnMut(ProgressEvent),
    {
        info!(
            "Cloning {} from {} to {}",
            self.root.display(),
            self.from,
            self.to
        );

        if self.from.is_empty() || self.to.is_empty() {
            let reason = FailureReason::InvalidJob(
                "source and target package names must not be empty".to_string(),
            );
            error!("{reason}");
            return RewriteResult::failed(reason, vec![], RewriteStats::default());
        }
        if self.from == self.to {
            info!("Source and target package are the same, nothing to do");
            return RewriteResult::succeeded(vec![], RewriteStats::default());
        }

        let _job = match RunningJob::acquire(&self.root) {
            Some(job) => job,
            None => {
                let reason = FailureReason::Busy(self.root.clone());
                error!("{reason}");
                return RewriteResult::failed(reason, vec![], RewriteStats::default());
            }
        };

        // Discovered once, the moves below must not change which roots are processed
        let roots = match find_bytecode_roots(&self.root, &self.options) {
            Ok(roots) => roots,
            Err(e) => {
                let reason = FailureReason::PackageRoot {
                    path: self.root.clone(),
                    message: e.to_string(),
                };
                error!("{reason}");
                return RewriteResult::failed(reason, vec![], RewriteStats::default());
            }
        };

        let mut ctx = JobContext::new(&self.root, &self.options, cancel, &mut on_progress);
        let outcome = self.run_stages(&mut ctx, &roots);
        let (stats, warnings) = ctx.finish();

        match outcome {
            Ok(()) => {
                let result = RewriteResult::succeeded(warnings, stats);
                info!("{result}");
                result
            }
            Err(reason) => {
                error!("Clone of {} failed: {reason}", self.root.display());
                RewriteResult::failed(reason, warnings, stats)
            }
        }
    }

    fn run_stages(&self, ctx: &mut JobContext, roots: &[String]) -> Result<(), FailureReason> {
        ResourceTreeRewriter::new(&self.from, &self.to)
            .rewrite(ctx, &self.root.join(&self.options.resource_dir))?;
        ManifestRewriter::new(&self.from, &self.to)
            .rewrite(ctx, &self.root.join(&self.options.manifest_file))?;
        BytecodeTreeRewriter::new(&self.from, &self.to).rewrite(ctx, roots)
    }

    /// Runs the job on a dedicated worker thread
    pub fn start(self) -> CloneHandle {
        self.start_with(CancelToken::new())
    }

    /// Like [`ApkCloner::start`], polling a caller supplied token
    pub fn start_with(self, cancel: CancelToken) -> CloneHandle {
        let (tx, events) = mpsc::channel();
        let state = Arc::new(Mutex::new(JobState::Idle));
        let outcome = Arc::new(Mutex::new(None));

        let worker_cancel = cancel.clone();
        let worker_state = Arc::clone(&state);
        let worker_outcome = Arc::clone(&outcome);
        let worker_tx = tx.clone();
        let spawned = thread::Builder::new()
            .name("apkclone".to_string())
            .spawn(move || {
                let _guard = WorkerGuard {
                    state: Arc::clone(&worker_state),
                };
                set_state(&worker_state, JobState::Running);
                let _ = worker_tx.send(CloneEvent::Started);
                let progress_tx = worker_tx.clone();
                let result = self.run(&worker_cancel, |event| {
                    let _ = progress_tx.send(CloneEvent::Progress(event));
                });
                // Stored before Finished is sent, for wait() after the event was read
                record_result(&worker_state, &worker_outcome, &result);
                let _ = worker_tx.send(CloneEvent::Finished(result));
            });

        let worker = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Unable to start clone worker: {e}");
                let result = RewriteResult::failed(
                    FailureReason::Worker(e.to_string()),
                    vec![],
                    RewriteStats::default(),
                );
                record_result(&state, &outcome, &result);
                let _ = tx.send(CloneEvent::Finished(result));
                None
            }
        };

        CloneHandle {
            events,
            cancel,
            state,
            outcome,
            worker,
        }
    }
}

fn set_state(state: &Mutex<JobState>, new: JobState) {
    *state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = new;
}

fn record_result(
    state: &Mutex<JobState>,
    outcome: &Mutex<Option<RewriteResult>>,
    result: &RewriteResult,
) {
    *outcome.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result.clone());
    set_state(
        state,
        if result.success {
            JobState::Succeeded
        } else {
            JobState::Failed
        },
    );
}

/// Marks a job `Failed` if its worker unwinds before reaching a terminal state
struct WorkerGuard {
    state: Arc<Mutex<JobState>>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(*state, JobState::Idle | JobState::Running) {
            error!("Clone worker stopped without a result");
            *state = JobState::Failed;
        }
    }
}

/// The caller's side of a job running on a worker thread
pub struct CloneHandle {
    events: Receiver<CloneEvent>,
    cancel: CancelToken,
    state: Arc<Mutex<JobState>>,
    outcome: Arc<Mutex<Option<RewriteResult>>>,
    worker: Option<JoinHandle<()>>,
}

impl CloneHandle {
    pub fn events(&self) -> &Receiver<CloneEvent> {
        &self.events
    }

    /// Asks the job to stop at the next file or directory boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits for the worker and returns the terminal result, whether or not `Finished` was
    /// already taken from [`CloneHandle::events`]
    pub fn wait(mut self) -> RewriteResult {
        for _ in self.events.iter() {}
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                set_state(&self.state, JobState::Failed);
            }
        }
        let stored = self
            .outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        stored.unwrap_or_else(|| {
            set_state(&self.state, JobState::Failed);
            RewriteResult::failed(
                FailureReason::Worker("worker exited without a result".to_string()),
                vec![],
                RewriteStats::default(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwinding_worker_is_marked_failed() {
        let state = Arc::new(Mutex::new(JobState::Idle));
        let worker_state = Arc::clone(&state);
        let joined = thread::spawn(move || {
            let _guard = WorkerGuard {
                state: Arc::clone(&worker_state),
            };
            set_state(&worker_state, JobState::Running);
            panic!("sink failed");
        })
        .join();
        assert!(joined.is_err());
        // Locked while unwinding, so the mutex is poisoned
        let state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        assert_eq!(*state, JobState::Failed);
    }

    #[test]
    fn guard_keeps_terminal_state() {
        let state = Arc::new(Mutex::new(JobState::Succeeded));
        drop(WorkerGuard {
            state: Arc::clone(&state),
        });
        assert_eq!(*state.lock().unwrap(), JobState::Succeeded);
    }
}
