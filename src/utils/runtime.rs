//! Container runtime contract
//!
//! Trait seam over the docker/compose adapter so capture strategies can be
//! exercised without a container engine. The mock records calls and serves
//! configured mountpoints, which is what the quiesce-guarantee and restore
//! tests hang off.

use anyhow::Result;
use std::path::{Path, PathBuf};

pub trait ContainerRuntime: Send + Sync {
    /// Host mountpoint of a named volume
    fn volume_mountpoint(&self, volume: &str) -> Result<PathBuf>;

    /// Whether a named volume exists
    fn volume_exists(&self, volume: &str) -> Result<bool>;

    /// Stop the compose stack (containers preserved)
    fn stop_stack(&self, compose_dir: &Path) -> Result<()>;

    /// Start a previously stopped compose stack
    fn start_stack(&self, compose_dir: &Path) -> Result<()>;

    /// Run a command inside a container, forwarding the given env vars,
    /// returning stdout
    fn exec_in_container(
        &self,
        container: &str,
        pass_env: &[(String, String)],
        command: &[&str],
    ) -> Result<String>;

    /// Run a host-side shell pipeline (dump/replay around `docker exec`)
    fn exec_pipeline(&self, pipeline: &str, pass_env: &[(String, String)]) -> Result<String>;
}

/// Production implementation shelling out to the docker CLI
#[derive(Debug, Clone, Default)]
pub struct DockerRuntime;

impl DockerRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl ContainerRuntime for DockerRuntime {
    fn volume_mountpoint(&self, volume: &str) -> Result<PathBuf> {
        super::docker::volume_mountpoint(volume)
    }

    fn volume_exists(&self, volume: &str) -> Result<bool> {
        super::docker::volume_exists(volume)
    }

    fn stop_stack(&self, compose_dir: &Path) -> Result<()> {
        super::docker::stop_stack(compose_dir)
    }

    fn start_stack(&self, compose_dir: &Path) -> Result<()> {
        super::docker::start_stack(compose_dir)
    }

    fn exec_in_container(
        &self,
        container: &str,
        pass_env: &[(String, String)],
        command: &[&str],
    ) -> Result<String> {
        super::docker::exec_in_container(container, pass_env, command)
    }

    fn exec_pipeline(&self, pipeline: &str, pass_env: &[(String, String)]) -> Result<String> {
        super::docker::exec_pipeline(pipeline, pass_env)
    }
}

/// Recording mock for tests
#[allow(dead_code)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq)]
    pub enum RuntimeCall {
        VolumeMountpoint { volume: String },
        VolumeExists { volume: String },
        StopStack { compose_dir: String },
        StartStack { compose_dir: String },
        Exec { container: String, command: Vec<String> },
        Pipeline { pipeline: String },
    }

    #[derive(Clone, Default)]
    pub struct MockRuntime {
        pub calls: Arc<Mutex<Vec<RuntimeCall>>>,
        mountpoints: Arc<Mutex<HashMap<String, PathBuf>>>,
        exec_output: Arc<Mutex<String>>,
        fail_pipelines: Arc<Mutex<bool>>,
        fail_stop: Arc<Mutex<bool>>,
    }

    impl MockRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_mountpoint(self, volume: &str, path: &Path) -> Self {
            self.mountpoints
                .lock()
                .unwrap()
                .insert(volume.to_string(), path.to_path_buf());
            self
        }

        pub fn with_exec_output(self, output: &str) -> Self {
            *self.exec_output.lock().unwrap() = output.to_string();
            self
        }

        pub fn with_failing_pipelines(self) -> Self {
            *self.fail_pipelines.lock().unwrap() = true;
            self
        }

        pub fn with_failing_stop(self) -> Self {
            *self.fail_stop.lock().unwrap() = true;
            self
        }

        pub fn calls(&self) -> Vec<RuntimeCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn pipelines(&self) -> Vec<String> {
            self.calls()
                .iter()
                .filter_map(|c| match c {
                    RuntimeCall::Pipeline { pipeline } => Some(pipeline.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn stop_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, RuntimeCall::StopStack { .. }))
                .count()
        }

        pub fn start_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, RuntimeCall::StartStack { .. }))
                .count()
        }

        fn record(&self, call: RuntimeCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl ContainerRuntime for MockRuntime {
        fn volume_mountpoint(&self, volume: &str) -> Result<PathBuf> {
            self.record(RuntimeCall::VolumeMountpoint {
                volume: volume.to_string(),
            });
            self.mountpoints
                .lock()
                .unwrap()
                .get(volume)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown volume: {}", volume))
        }

        fn volume_exists(&self, volume: &str) -> Result<bool> {
            self.record(RuntimeCall::VolumeExists {
                volume: volume.to_string(),
            });
            Ok(self.mountpoints.lock().unwrap().contains_key(volume))
        }

        fn stop_stack(&self, compose_dir: &Path) -> Result<()> {
            self.record(RuntimeCall::StopStack {
                compose_dir: compose_dir.display().to_string(),
            });
            if *self.fail_stop.lock().unwrap() {
                anyhow::bail!("injected stop failure");
            }
            Ok(())
        }

        fn start_stack(&self, compose_dir: &Path) -> Result<()> {
            self.record(RuntimeCall::StartStack {
                compose_dir: compose_dir.display().to_string(),
            });
            Ok(())
        }

        fn exec_in_container(
            &self,
            container: &str,
            _pass_env: &[(String, String)],
            command: &[&str],
        ) -> Result<String> {
            self.record(RuntimeCall::Exec {
                container: container.to_string(),
                command: command.iter().map(|s| s.to_string()).collect(),
            });
            Ok(self.exec_output.lock().unwrap().clone())
        }

        fn exec_pipeline(&self, pipeline: &str, _pass_env: &[(String, String)]) -> Result<String> {
            self.record(RuntimeCall::Pipeline {
                pipeline: pipeline.to_string(),
            });
            if *self.fail_pipelines.lock().unwrap() {
                anyhow::bail!("injected pipeline failure");
            }
            Ok(String::new())
        }
    }
}
