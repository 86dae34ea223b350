use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_core::serde::{read_json, write_json};
use tracing::{debug, info, warn};

use crate::arena::{RunId, RunRecord, RunState};
use crate::engine::{RunRequest, SimulationEngine};

/// File each run persists into its workdir on reaching a terminal state.
pub const RUN_RECORD_FILE: &str = "run.json";

/// Handle to a submitted run, redeemed with [`JobRunner::wait`].
#[derive(Debug)]
pub struct RunHandle {
    id: RunId,
    state: Arc<AtomicU8>,
    receiver: Receiver<RunRecord>,
}

impl RunHandle {
    /// Handle fed by a worker through `receiver`.
    pub fn pending(id: RunId, receiver: Receiver<RunRecord>) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(RunState::Pending as u8)),
            receiver,
        }
    }

    /// Handle for a record that is already terminal.
    pub fn ready(record: RunRecord) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = Self {
            id: record.id,
            state: Arc::new(AtomicU8::new(record.state as u8)),
            receiver: rx,
        };
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(record);
        handle
    }

    /// Identifier assigned at submission.
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Current lifecycle state as observed by the worker.
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Blocks for the terminal record; `None` when the worker went away
    /// without delivering one.
    pub fn join(self) -> Option<RunRecord> {
        self.receiver.recv().ok()
    }
}

/// Submits engine runs and collects their terminal records.
pub trait JobRunner: Send + Sync {
    /// Queues `request`; returns immediately.
    fn submit(&self, request: RunRequest) -> Result<RunHandle, KinError>;

    /// Blocks until the run behind `handle` is terminal.
    fn wait(&self, handle: RunHandle) -> RunRecord;

    /// True when the record completed with parsed outputs.
    fn is_ok(&self, record: &RunRecord) -> bool {
        record.state == RunState::Completed && record.result.is_some()
    }

    /// Reloads a record persisted by an earlier run. `path` may be the
    /// record file or the workdir containing it.
    fn load_persisted(&self, path: &Path) -> Result<RunRecord, KinError> {
        let file = if path.is_dir() {
            path.join(RUN_RECORD_FILE)
        } else {
            path.to_path_buf()
        };
        read_json(&file)
    }
}

/// Configuration of a [`LocalJobRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory under which every run gets its own workdir.
    pub scratch_root: PathBuf,
    /// Maximum number of engine runs executing at once.
    pub max_concurrent: usize,
    /// Keep run workdirs when the runner is dropped.
    pub keep_workdirs: bool,
}

impl RunnerConfig {
    /// Config for `scratch_root` with one worker per available core.
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            max_concurrent: std::thread::available_parallelism().map_or(1, |n| n.get()),
            keep_workdirs: true,
        }
    }
}

/// Runner executing engine runs on a bounded local thread pool.
///
/// Dropping the runner joins nothing and cancels nothing already running,
/// but releases the pool and, unless `keep_workdirs` is set, removes what
/// it created: the whole scratch root if it did not exist beforehand,
/// otherwise only the run workdirs.
pub struct LocalJobRunner {
    engine: Arc<dyn SimulationEngine>,
    pool: rayon::ThreadPool,
    config: RunnerConfig,
    next_id: Arc<AtomicU64>,
    created_root: bool,
    workdirs: Mutex<Vec<PathBuf>>,
}

impl LocalJobRunner {
    /// Creates the scratch root and the worker pool.
    pub fn new(engine: Arc<dyn SimulationEngine>, config: RunnerConfig) -> Result<Self, KinError> {
        let created_root = !config.scratch_root.exists();
        fs::create_dir_all(&config.scratch_root)
            .map_err(|err| KinError::io("scratch_root_create", &config.scratch_root, err))?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrent.max(1))
            .thread_name(|idx| format!("surfkin-run-{idx}"))
            .build()
            .map_err(|err| KinError::Engine(ErrorInfo::new("thread_pool", err.to_string())))?;
        info!(
            root = %config.scratch_root.display(),
            workers = config.max_concurrent.max(1),
            "local job runner ready"
        );
        Ok(Self {
            engine,
            pool,
            config,
            next_id: Arc::new(AtomicU64::new(0)),
            created_root,
            workdirs: Mutex::new(Vec::new()),
        })
    }

    /// Runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn workdir_for(&self, label: &str, id: RunId) -> PathBuf {
        let label = if label.is_empty() { "run" } else { label };
        self.config.scratch_root.join(label).join(id.to_string())
    }
}

impl JobRunner for LocalJobRunner {
    fn submit(&self, request: RunRequest) -> Result<RunHandle, KinError> {
        let id = RunId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let workdir = self.workdir_for(&request.label, id);
        fs::create_dir_all(&workdir).map_err(|err| KinError::io("workdir_create", &workdir, err))?;
        if let Ok(mut workdirs) = self.workdirs.lock() {
            workdirs.push(workdir.clone());
        }
        debug!(run = %id, label = %request.label, seed = request.settings.random_seed, "submitting run");

        let (tx, rx) = mpsc::channel();
        let handle = RunHandle::pending(id, rx);
        let state = Arc::clone(&handle.state);
        let engine = Arc::clone(&self.engine);
        self.pool.spawn(move || {
            state.store(RunState::Running as u8, Ordering::Release);
            let seed = request.settings.random_seed;
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| engine.execute(&request, &workdir)))
                    .unwrap_or_else(|payload| Err(engine_panic(id, payload.as_ref())));
            let record = match outcome {
                Ok(result) => RunRecord {
                    id,
                    label: request.label.clone(),
                    seed,
                    workdir: workdir.clone(),
                    state: RunState::Completed,
                    result: Some(result),
                    error: None,
                },
                Err(err) => {
                    warn!(run = %id, label = %request.label, error = %err, "run failed");
                    RunRecord::failed(id, request.label.clone(), seed, workdir.clone(), err)
                }
            };
            if let Err(err) = write_json(&workdir.join(RUN_RECORD_FILE), &record) {
                warn!(run = %id, error = %err, "could not persist run record");
            }
            state.store(record.state as u8, Ordering::Release);
            // The caller may have dropped the handle; nothing to deliver then.
            let _ = tx.send(record);
        });
        Ok(handle)
    }

    fn wait(&self, handle: RunHandle) -> RunRecord {
        let id = handle.id;
        match handle.join() {
            Some(record) => record,
            None => RunRecord::failed(
                id,
                String::new(),
                0,
                PathBuf::new(),
                KinError::Engine(
                    ErrorInfo::new("worker-lost", "run worker exited without a record")
                        .with_context("run", id.to_string()),
                ),
            ),
        }
    }
}

fn engine_panic(id: RunId, payload: &(dyn Any + Send)) -> KinError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    KinError::Engine(
        ErrorInfo::new("engine-panic", "engine implementation panicked")
            .with_context("run", id.to_string())
            .with_context("panic", message),
    )
}

impl Drop for LocalJobRunner {
    fn drop(&mut self) {
        if self.config.keep_workdirs {
            return;
        }
        // A pre-existing scratch root belongs to the caller; only our run
        // workdirs are removed from it.
        let targets = if self.created_root {
            vec![self.config.scratch_root.clone()]
        } else {
            match self.workdirs.get_mut() {
                Ok(workdirs) => std::mem::take(workdirs),
                Err(poisoned) => std::mem::take(poisoned.into_inner()),
            }
        };
        for target in targets {
            if let Err(err) = fs::remove_dir_all(&target) {
                warn!(path = %target.display(), error = %err, "scratch cleanup failed");
            }
        }
    }
}
