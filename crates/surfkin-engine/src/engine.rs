use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use surfkin_core::errors::{ErrorInfo, KinError};
use tracing::debug;

use crate::input::write_input_bundle;
use crate::model::{PrefactorScaling, SurfaceModel};
use crate::output::{read_run_outputs, RunResult};
use crate::settings::SimulationSettings;

/// Restart state file the engine writes and reads.
pub const RESTART_FILE: &str = "restart.inf";

/// Everything needed to launch one engine run.
#[derive(Clone)]
pub struct RunRequest {
    /// Caller label; groups workdirs under the runner's scratch root.
    pub label: String,
    /// Validated settings, seed included.
    pub settings: SimulationSettings,
    /// Model rendered into the input bundle.
    pub model: Arc<dyn SurfaceModel>,
    /// Prefactor multipliers applied to the mechanism.
    pub scaling: PrefactorScaling,
    /// Workdir of a previous run to continue from.
    pub restart_from: Option<PathBuf>,
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("label", &self.label)
            .field("settings", &self.settings)
            .field("scaling", &self.scaling)
            .field("restart_from", &self.restart_from)
            .finish_non_exhaustive()
    }
}

impl RunRequest {
    /// Fresh run with no scaling and no restart.
    pub fn new(
        label: impl Into<String>,
        settings: SimulationSettings,
        model: Arc<dyn SurfaceModel>,
    ) -> Self {
        Self {
            label: label.into(),
            settings,
            model,
            scaling: PrefactorScaling::new(),
            restart_from: None,
        }
    }
}

/// Executes one run in a prepared working directory.
pub trait SimulationEngine: Send + Sync {
    /// Runs `request` inside `workdir` and returns its parsed outputs.
    fn execute(&self, request: &RunRequest, workdir: &Path) -> Result<RunResult, KinError>;
}

/// Engine driven as an external executable launched in the workdir.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    executable: PathBuf,
    args: Vec<String>,
}

impl ProcessEngine {
    /// Engine launching `executable` with no arguments.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    /// Adds command-line arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Path of the executable.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn unavailable(&self, message: impl Into<String>) -> KinError {
        KinError::EngineUnavailable(
            ErrorInfo::new("engine-unavailable", message)
                .with_context("executable", self.executable.display().to_string())
                .with_hint("install the engine or point the runner at its executable"),
        )
    }
}

impl SimulationEngine for ProcessEngine {
    fn execute(&self, request: &RunRequest, workdir: &Path) -> Result<RunResult, KinError> {
        let has_dir = self.executable.components().count() > 1;
        if has_dir && !self.executable.is_file() {
            return Err(self.unavailable("engine executable not found"));
        }
        write_input_bundle(
            workdir,
            &request.settings,
            request.model.as_ref(),
            &request.scaling,
        )?;
        if let Some(previous) = &request.restart_from {
            let source = previous.join(RESTART_FILE);
            let target = workdir.join(RESTART_FILE);
            fs::copy(&source, &target).map_err(|err| KinError::io("restart_copy", &source, err))?;
        }

        debug!(
            executable = %self.executable.display(),
            workdir = %workdir.display(),
            "launching engine"
        );
        let output = Command::new(&self.executable)
            .args(&self.args)
            .current_dir(workdir)
            .output()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    self.unavailable(err.to_string())
                }
                _ => KinError::Engine(
                    ErrorInfo::new("engine-launch", err.to_string())
                        .with_context("executable", self.executable.display().to_string()),
                ),
            })?;
        let stdout_path = workdir.join("engine_stdout.txt");
        fs::write(&stdout_path, &output.stdout)
            .map_err(|err| KinError::io("engine_stdout_write", &stdout_path, err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(KinError::Engine(
                ErrorInfo::new("engine-exit", "engine exited unsuccessfully")
                    .with_context("status", code)
                    .with_context("stderr", tail)
                    .with_context("workdir", workdir.display().to_string()),
            ));
        }
        read_run_outputs(workdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StaticModel;

    fn request() -> RunRequest {
        let model = StaticModel {
            gas: vec![],
            surface: vec![],
            lattice: String::new(),
            energetics: String::new(),
            mechanism: String::new(),
        };
        let mut settings = SimulationSettings::new(500.0, 1.0);
        settings.termination.max_steps = Some(10);
        RunRequest::new("probe", settings, Arc::new(model))
    }

    #[test]
    fn missing_executable_is_engine_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new(dir.path().join("bin").join("no-such-engine"));
        let err = engine.execute(&request(), dir.path()).unwrap_err();
        assert!(err.is_engine_unavailable());
    }

    #[test]
    fn unknown_command_on_path_is_engine_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new("surfkin-engine-that-does-not-exist");
        let err = engine.execute(&request(), dir.path()).unwrap_err();
        assert!(err.is_engine_unavailable());
        assert!(dir.path().join(crate::input::SIMULATION_INPUT).exists());
    }
}
