//! Test-job orchestrator
//!
//! Runs a cell image's attached verification test against a running instance.
//! Image-based tests are submitted to the cluster as a one-shot job inside a
//! throwaway test cell; inline-module tests run locally through the external
//! test runner. All cluster interaction goes through the [`ClusterRunner`]
//! trait so the whole state machine is testable without a cluster.
//!
//! The cluster CLI exposes no structured exit contract for the states we care
//! about, so branching is substring-driven over command output ("Running",
//! "True", "CrashLoopBackOff"). Whatever happens, the test cell is deleted
//! before the orchestrator returns.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::image::{CellImage, Test, TestSource};
use crate::{
    CELL_IMAGE_DIR_ENV, DESCRIPTOR_API_VERSION, DESCRIPTOR_KIND, JOB_WAIT_TIMEOUT,
    POD_NAME_WAIT_TIMEOUT, POD_WAIT_TIMEOUT, POLL_INTERVAL,
};

/// Binary invoked for inline-module tests
const TEST_RUNNER_BIN: &str = "cell-test-runner";

/// Errors raised while orchestrating a test run
#[derive(Debug, Error)]
pub enum TestError {
    /// An external command could not be executed or reported failure
    #[error("command failed: {0}")]
    Command(String),

    /// Filesystem error, wrapped with the offending path
    #[error("{}: {source}", path.display())]
    Io {
        /// Path the operation failed on
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Test cell YAML could not be produced
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A required environment variable is missing
    #[error("{0} environment variable is not set")]
    MissingEnv(String),

    /// Background task failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl TestError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Terminal outcome of one test run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestOutcome {
    /// The test job reported the Complete condition (or the local runner
    /// exited successfully)
    Completed,
    /// The test job reported the Failed condition, never terminated cleanly,
    /// or the local runner exited non-zero
    Failed,
    /// The test pod never appeared; nothing conclusive ran
    Skipped,
}

/// Command output captured for substring branching
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether the command exited zero
    pub success: bool,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Trait for cluster and test-runner commands (allows mocking in tests)
pub trait ClusterRunner: Send + Sync {
    /// Apply a manifest to the cluster
    fn apply(&self, manifest: &Path) -> Result<CommandOutput, TestError>;

    /// List all pods, one per line, no headers
    fn get_pods(&self) -> Result<CommandOutput, TestError>;

    /// Get a single pod's status line
    fn get_pod(&self, pod: &str) -> Result<CommandOutput, TestError>;

    /// Read the status of one job condition ("Complete" or "Failed");
    /// stdout is "True" when the condition holds
    fn job_condition(&self, job: &str, condition: &str) -> Result<CommandOutput, TestError>;

    /// Follow a container's logs line-by-line into `sink` until it exits
    fn follow_logs(
        &self,
        pod: &str,
        container: &str,
        sink: &mut dyn Write,
    ) -> Result<(), TestError>;

    /// Delete a cell instance, tolerating absence
    fn delete_cell(&self, instance: &str) -> Result<CommandOutput, TestError>;

    /// Run the external test runner for an inline module
    fn run_local_tests(&self, working_dir: &Path, module: &str) -> Result<CommandOutput, TestError>;
}

/// Real runner shelling out to the cluster CLI
#[derive(Default, Clone)]
pub struct RealClusterRunner;

impl RealClusterRunner {
    fn run(&self, cmd: &mut Command) -> Result<CommandOutput, TestError> {
        debug!(command = ?cmd, "executing cluster command");
        let output = cmd
            .output()
            .map_err(|e| TestError::Command(format!("failed to execute {:?}: {}", cmd, e)))?;
        Ok(CommandOutput::from(output))
    }
}

impl ClusterRunner for RealClusterRunner {
    fn apply(&self, manifest: &Path) -> Result<CommandOutput, TestError> {
        self.run(Command::new("kubectl").arg("apply").arg("-f").arg(manifest))
    }

    fn get_pods(&self) -> Result<CommandOutput, TestError> {
        self.run(Command::new("kubectl").args(["get", "pods", "--no-headers"]))
    }

    fn get_pod(&self, pod: &str) -> Result<CommandOutput, TestError> {
        self.run(Command::new("kubectl").args(["get", "pod", pod, "--no-headers"]))
    }

    fn job_condition(&self, job: &str, condition: &str) -> Result<CommandOutput, TestError> {
        let jsonpath = format!(
            "-o=jsonpath={{.status.conditions[?(@.type==\"{}\")].status}}",
            condition
        );
        self.run(Command::new("kubectl").args(["get", "job", job, &jsonpath]))
    }

    fn follow_logs(
        &self,
        pod: &str,
        container: &str,
        sink: &mut dyn Write,
    ) -> Result<(), TestError> {
        let mut child = Command::new("kubectl")
            .args(["logs", pod, "-c", container, "-f"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TestError::Command(format!("failed to follow logs: {}", e)))?;

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = line.map_err(|e| TestError::Command(format!("log stream: {}", e)))?;
                writeln!(sink, "{}", line)
                    .map_err(|e| TestError::Command(format!("log sink: {}", e)))?;
            }
        }
        child
            .wait()
            .map_err(|e| TestError::Command(format!("log stream: {}", e)))?;
        Ok(())
    }

    fn delete_cell(&self, instance: &str) -> Result<CommandOutput, TestError> {
        self.run(Command::new("kubectl").args([
            "delete",
            "cell",
            instance,
            "--ignore-not-found",
        ]))
    }

    fn run_local_tests(&self, working_dir: &Path, module: &str) -> Result<CommandOutput, TestError> {
        self.run(
            Command::new(TEST_RUNNER_BIN)
                .arg("test")
                .arg(module)
                .current_dir(working_dir),
        )
    }
}

// =============================================================================
// Test Cell Document
// =============================================================================
// The one-shot job runs inside its own throwaway cell so cleanup is a single
// delete. The document is much smaller than a full descriptor: one job
// component, no gateway.

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestCell {
    api_version: String,
    kind: String,
    metadata: TestCellMeta,
    spec: TestCellSpec,
}

#[derive(Serialize)]
struct TestCellMeta {
    name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct TestCellSpec {
    job: TestJobSpec,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestJobSpec {
    restart_policy: String,
    share_process_namespace: bool,
    container: TestContainer,
}

#[derive(Serialize)]
struct TestContainer {
    name: String,
    image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    env: Vec<TestEnvVar>,
}

#[derive(Serialize)]
struct TestEnvVar {
    name: String,
    value: String,
}

/// Name of the job the cluster derives from a test cell
fn job_name(test_name: &str) -> String {
    format!("{0}--{0}-job", test_name)
}

fn test_cell(test: &Test, image_ref: &str) -> TestCell {
    TestCell {
        api_version: DESCRIPTOR_API_VERSION.to_string(),
        kind: DESCRIPTOR_KIND.to_string(),
        metadata: TestCellMeta {
            name: test.name.clone(),
            labels: test.labels.clone(),
        },
        spec: TestCellSpec {
            job: TestJobSpec {
                restart_policy: "Never".to_string(),
                share_process_namespace: true,
                container: TestContainer {
                    name: test.name.clone(),
                    image: image_ref.to_string(),
                    env: test
                        .env
                        .iter()
                        .map(|(name, value)| TestEnvVar {
                            name: name.clone(),
                            value: value.clone(),
                        })
                        .collect(),
                },
            },
        },
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// What the pod-phase wait concluded
enum PodPhase {
    /// The pod is running (or already ran to completion); logs are available
    Ready,
    /// The container is crash-looping; logs may still explain why
    CrashLooping,
    /// The pod is in an unrecognized broken state; skip log collection
    Broken,
    /// The pod never reached a runnable phase within the deadline
    Missing,
}

/// Drives one test run end to end
pub struct TestOrchestrator<R: ClusterRunner = RealClusterRunner> {
    runner: Arc<R>,
    working_dir: PathBuf,
    poll_interval: Duration,
    pod_wait_timeout: Duration,
    pod_name_wait_timeout: Duration,
    job_wait_timeout: Duration,
}

impl TestOrchestrator<RealClusterRunner> {
    /// Orchestrator with the real cluster runner and default timings
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self::with_runner(working_dir, RealClusterRunner)
    }
}

impl<R: ClusterRunner + 'static> TestOrchestrator<R> {
    /// Orchestrator with a custom runner and default timings
    pub fn with_runner(working_dir: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            runner: Arc::new(runner),
            working_dir: working_dir.into(),
            poll_interval: POLL_INTERVAL,
            pod_wait_timeout: POD_WAIT_TIMEOUT,
            pod_name_wait_timeout: POD_NAME_WAIT_TIMEOUT,
            job_wait_timeout: JOB_WAIT_TIMEOUT,
        }
    }

    /// Override the poll interval and deadlines (tests use millisecond scale)
    pub fn with_timings(
        mut self,
        poll_interval: Duration,
        pod_wait: Duration,
        pod_name_wait: Duration,
        job_wait: Duration,
    ) -> Self {
        self.poll_interval = poll_interval;
        self.pod_wait_timeout = pod_wait;
        self.pod_name_wait_timeout = pod_name_wait;
        self.job_wait_timeout = job_wait;
        self
    }

    /// Run the image's attached test against the running `instance`.
    ///
    /// Returns [`TestOutcome::Skipped`] when the image carries no test or the
    /// test pod never materialized. The test cell is deleted on every
    /// terminal path.
    pub async fn run(&self, image: &CellImage, instance: &str) -> Result<TestOutcome, TestError> {
        let Some(test) = &image.test else {
            debug!(image = %image.name, "image carries no test");
            return Ok(TestOutcome::Skipped);
        };

        match &test.source {
            TestSource::Module(module) => self.run_inline(module).await,
            TestSource::Image(image_ref) => {
                let outcome = self.run_job(test, image_ref, instance).await;
                // Cleanup runs regardless of how the job ended
                if let Err(e) = self.runner.delete_cell(&test.name) {
                    warn!(cell = %test.name, error = %e, "failed to delete test cell");
                }
                outcome
            }
        }
    }

    // -------------------------------------------------------------------------
    // Inline-module tests
    // -------------------------------------------------------------------------

    async fn run_inline(&self, module: &str) -> Result<TestOutcome, TestError> {
        let image_root = std::env::var(CELL_IMAGE_DIR_ENV)
            .map_err(|_| TestError::MissingEnv(CELL_IMAGE_DIR_ENV.to_string()))?;
        let source = Path::new(&image_root).join("src").join(module);
        let target = self.working_dir.join(module);
        if !target.exists() {
            copy_recursive(&source, &target)?;
        }

        info!(module = %module, "running inline test module");
        let runner = self.runner.clone();
        let working_dir = self.working_dir.clone();
        let module = module.to_string();
        let output = tokio::task::spawn_blocking(move || {
            runner.run_local_tests(&working_dir, &module)
        })
        .await
        .map_err(|e| TestError::Internal(e.to_string()))??;

        if output.success {
            Ok(TestOutcome::Completed)
        } else {
            warn!(stderr = %output.stderr.trim(), "inline test module failed");
            Ok(TestOutcome::Failed)
        }
    }

    // -------------------------------------------------------------------------
    // Image-based tests
    // -------------------------------------------------------------------------

    async fn run_job(
        &self,
        test: &Test,
        image_ref: &str,
        instance: &str,
    ) -> Result<TestOutcome, TestError> {
        info!(test = %test.name, instance = %instance, "submitting test job");

        let manifest = self.working_dir.join(format!("{}.yaml", test.name));
        let yaml = serde_yaml::to_string(&test_cell(test, image_ref))?;
        std::fs::write(&manifest, yaml).map_err(|e| TestError::io(&manifest, e))?;

        let applied = self.runner.apply(&manifest)?;
        if !applied.success {
            return Err(TestError::Command(format!(
                "failed to apply test cell: {}",
                applied.stderr.trim()
            )));
        }

        let job = job_name(&test.name);
        let Some(pod) = self.wait_for_pod_name(&job).await? else {
            warn!(job = %job, "test pod never appeared; skipping test");
            return Ok(TestOutcome::Skipped);
        };

        match self.wait_for_pod_ready(&pod).await? {
            PodPhase::Missing => {
                warn!(pod = %pod, "test pod never reached Running; skipping test");
                return Ok(TestOutcome::Skipped);
            }
            PodPhase::Broken => {
                warn!(pod = %pod, "test pod is in an unrecognized state; skipping log collection");
            }
            PodPhase::Ready | PodPhase::CrashLooping => {
                self.collect_logs(&pod, &test.name).await;
            }
        }

        Ok(self.wait_for_job_outcome(&job, &pod).await?)
    }

    /// Resolve the test pod's name from the pod listing
    async fn wait_for_pod_name(&self, job: &str) -> Result<Option<String>, TestError> {
        let start = Instant::now();
        while start.elapsed() < self.pod_name_wait_timeout {
            let output = self.runner.get_pods()?;
            if !output.stdout.contains("No resources found") {
                for line in output.stdout.lines() {
                    if let Some(name) = line.split_whitespace().next() {
                        if name.starts_with(job) {
                            debug!(pod = %name, "resolved test pod");
                            return Ok(Some(name.to_string()));
                        }
                    }
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(None)
    }

    /// Poll the pod until it is running, crash-looping, or out of time
    async fn wait_for_pod_ready(&self, pod: &str) -> Result<PodPhase, TestError> {
        let start = Instant::now();
        while start.elapsed() < self.pod_wait_timeout {
            let output = self.runner.get_pod(pod)?;
            let status = output.stdout.as_str();
            if status.contains("Running") || status.contains("Completed") {
                return Ok(PodPhase::Ready);
            }
            if status.contains("CrashLoopBackOff") {
                return Ok(PodPhase::CrashLooping);
            }
            if status.contains("Error") {
                return Ok(PodPhase::Broken);
            }
            debug!(pod = %pod, status = %status.trim(), "waiting for test pod");
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(PodPhase::Missing)
    }

    /// Stream the test container's logs to stdout; failures are non-fatal
    async fn collect_logs(&self, pod: &str, container: &str) {
        let runner = self.runner.clone();
        let pod_name = pod.to_string();
        let container = container.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut sink = std::io::stdout();
            runner.follow_logs(&pod_name, &container, &mut sink)
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(pod = %pod, error = %e, "failed to stream test logs"),
            Err(e) => warn!(pod = %pod, error = %e, "log streaming task failed"),
        }
    }

    /// Poll the job until Complete or Failed holds, with a final pod check
    /// when neither does in time
    async fn wait_for_job_outcome(&self, job: &str, pod: &str) -> Result<TestOutcome, TestError> {
        let start = Instant::now();
        while start.elapsed() < self.job_wait_timeout {
            if self.runner.job_condition(job, "Complete")?.stdout.contains("True") {
                info!(job = %job, "test job completed");
                return Ok(TestOutcome::Completed);
            }
            if self.runner.job_condition(job, "Failed")?.stdout.contains("True") {
                warn!(job = %job, "test job failed");
                return Ok(TestOutcome::Failed);
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let status = self.runner.get_pod(pod)?.stdout;
        if status.contains("CrashLoopBackOff") {
            warn!(pod = %pod, "test container is crash-looping");
        } else {
            warn!(pod = %pod, status = %status.trim(), "test job never reached a terminal condition");
        }
        Ok(TestOutcome::Failed)
    }
}

/// Copy a file or directory tree
fn copy_recursive(source: &Path, target: &Path) -> Result<(), TestError> {
    let meta = std::fs::metadata(source).map_err(|e| TestError::io(source, e))?;
    if meta.is_file() {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TestError::io(parent, e))?;
        }
        std::fs::copy(source, target).map_err(|e| TestError::io(source, e))?;
        return Ok(());
    }
    std::fs::create_dir_all(target).map_err(|e| TestError::io(target, e))?;
    for entry in std::fs::read_dir(source).map_err(|e| TestError::io(source, e))? {
        let entry = entry.map_err(|e| TestError::io(source, e))?;
        copy_recursive(&entry.path(), &target.join(entry.file_name()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Test;
    use std::sync::Mutex;

    // ==========================================================================
    // Mock Cluster Runner for Testing
    // ==========================================================================
    //
    // A configurable mock that allows tests to script cluster behavior
    // without executing any external commands.

    type PodsMockFn = Box<dyn Fn() -> Result<CommandOutput, TestError> + Send + Sync>;
    type PodMockFn = Box<dyn Fn(&str) -> Result<CommandOutput, TestError> + Send + Sync>;
    type JobMockFn = Box<dyn Fn(&str, &str) -> Result<CommandOutput, TestError> + Send + Sync>;

    fn ok(stdout: &str) -> Result<CommandOutput, TestError> {
        Ok(CommandOutput {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    #[derive(Clone, Default)]
    struct MockClusterRunner {
        pods_fn: Arc<Mutex<Option<PodsMockFn>>>,
        pod_fn: Arc<Mutex<Option<PodMockFn>>>,
        job_fn: Arc<Mutex<Option<JobMockFn>>>,
        applied: Arc<Mutex<Vec<PathBuf>>>,
        deleted: Arc<Mutex<Vec<String>>>,
        logged: Arc<Mutex<Vec<String>>>,
    }

    impl MockClusterRunner {
        fn new() -> Self {
            Self::default()
        }

        fn with_pods<F>(self, f: F) -> Self
        where
            F: Fn() -> Result<CommandOutput, TestError> + Send + Sync + 'static,
        {
            *self.pods_fn.lock().unwrap() = Some(Box::new(f));
            self
        }

        fn with_pod<F>(self, f: F) -> Self
        where
            F: Fn(&str) -> Result<CommandOutput, TestError> + Send + Sync + 'static,
        {
            *self.pod_fn.lock().unwrap() = Some(Box::new(f));
            self
        }

        fn with_job<F>(self, f: F) -> Self
        where
            F: Fn(&str, &str) -> Result<CommandOutput, TestError> + Send + Sync + 'static,
        {
            *self.job_fn.lock().unwrap() = Some(Box::new(f));
            self
        }
    }

    impl ClusterRunner for MockClusterRunner {
        fn apply(&self, manifest: &Path) -> Result<CommandOutput, TestError> {
            self.applied.lock().unwrap().push(manifest.to_path_buf());
            ok("cell created")
        }

        fn get_pods(&self) -> Result<CommandOutput, TestError> {
            match &*self.pods_fn.lock().unwrap() {
                Some(f) => f(),
                None => ok(""),
            }
        }

        fn get_pod(&self, pod: &str) -> Result<CommandOutput, TestError> {
            match &*self.pod_fn.lock().unwrap() {
                Some(f) => f(pod),
                None => ok(""),
            }
        }

        fn job_condition(&self, job: &str, condition: &str) -> Result<CommandOutput, TestError> {
            match &*self.job_fn.lock().unwrap() {
                Some(f) => f(job, condition),
                None => ok(""),
            }
        }

        fn follow_logs(
            &self,
            pod: &str,
            _container: &str,
            sink: &mut dyn Write,
        ) -> Result<(), TestError> {
            self.logged.lock().unwrap().push(pod.to_string());
            writeln!(sink, "test log line").map_err(|e| TestError::Command(e.to_string()))
        }

        fn delete_cell(&self, instance: &str) -> Result<CommandOutput, TestError> {
            self.deleted.lock().unwrap().push(instance.to_string());
            ok("cell deleted")
        }

        fn run_local_tests(
            &self,
            _working_dir: &Path,
            _module: &str,
        ) -> Result<CommandOutput, TestError> {
            ok("tests passed")
        }
    }

    fn image_with_test() -> CellImage {
        CellImage::new("myorg", "stock", "1.0.0").with_test(
            Test::new(
                "stock-test",
                TestSource::Image("myorg/stock-test:1.0.0".to_string()),
            )
            .with_env("ENDPOINT", "http://stock"),
        )
    }

    fn fast_orchestrator(
        dir: &Path,
        mock: MockClusterRunner,
    ) -> TestOrchestrator<MockClusterRunner> {
        TestOrchestrator::with_runner(dir, mock).with_timings(
            Duration::from_millis(1),
            Duration::from_millis(20),
            Duration::from_millis(20),
            Duration::from_millis(20),
        )
    }

    // ==========================================================================
    // Story Tests: Test Job Lifecycle
    // ==========================================================================

    /// Story: a healthy test job runs to completion
    ///
    /// The pod appears, reaches Running, logs are collected, the job reports
    /// Complete, and the test cell is deleted afterwards.
    #[tokio::test]
    async fn story_healthy_test_job_completes_and_cleans_up() {
        let mock = MockClusterRunner::new()
            .with_pods(|| ok("stock-test--stock-test-job-x7k2p   1/1   Running   0   5s"))
            .with_pod(|_| ok("stock-test--stock-test-job-x7k2p   1/1   Running   0   5s"))
            .with_job(|_, condition| {
                if condition == "Complete" {
                    ok("True")
                } else {
                    ok("")
                }
            });
        let deleted = mock.deleted.clone();
        let logged = mock.logged.clone();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = fast_orchestrator(dir.path(), mock);
        let outcome = orchestrator
            .run(&image_with_test(), "stock-instance")
            .await
            .unwrap();

        assert_eq!(outcome, TestOutcome::Completed);
        assert_eq!(
            logged.lock().unwrap().as_slice(),
            ["stock-test--stock-test-job-x7k2p"]
        );
        assert_eq!(deleted.lock().unwrap().as_slice(), ["stock-test"]);
        // The manifest was written and applied
        assert!(dir.path().join("stock-test.yaml").exists());
    }

    /// Story: a job that reports Failed still gets its logs and cleanup
    #[tokio::test]
    async fn story_failed_job_reports_failure() {
        let mock = MockClusterRunner::new()
            .with_pods(|| ok("stock-test--stock-test-job-abc    0/1   Running   0   5s"))
            .with_pod(|_| ok("stock-test--stock-test-job-abc    0/1   Running   0   5s"))
            .with_job(|_, condition| {
                if condition == "Failed" {
                    ok("True")
                } else {
                    ok("")
                }
            });
        let deleted = mock.deleted.clone();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = fast_orchestrator(dir.path(), mock);
        let outcome = orchestrator
            .run(&image_with_test(), "stock-instance")
            .await
            .unwrap();

        assert_eq!(outcome, TestOutcome::Failed);
        assert_eq!(deleted.lock().unwrap().as_slice(), ["stock-test"]);
    }

    /// Story: a pod that never appears is a skip, not an error
    ///
    /// The listing keeps coming back empty; after the deadline the
    /// orchestrator warns, deletes the test cell, and reports Skipped.
    #[tokio::test]
    async fn story_missing_pod_skips_and_cleans_up() {
        let mock = MockClusterRunner::new().with_pods(|| ok("No resources found"));
        let deleted = mock.deleted.clone();
        let logged = mock.logged.clone();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = fast_orchestrator(dir.path(), mock);
        let outcome = orchestrator
            .run(&image_with_test(), "stock-instance")
            .await
            .unwrap();

        assert_eq!(outcome, TestOutcome::Skipped);
        assert!(logged.lock().unwrap().is_empty());
        assert_eq!(deleted.lock().unwrap().as_slice(), ["stock-test"]);
    }

    /// Story: a crash-looping container still surrenders its logs
    ///
    /// CrashLoopBackOff short-circuits the pod wait; logs are collected for
    /// diagnosis and the run counts as failed once no terminal job condition
    /// arrives.
    #[tokio::test]
    async fn story_crash_looping_pod_yields_logs_and_fails() {
        let mock = MockClusterRunner::new()
            .with_pods(|| ok("stock-test--stock-test-job-abc   0/1   CrashLoopBackOff   3   60s"))
            .with_pod(|_| ok("stock-test--stock-test-job-abc   0/1   CrashLoopBackOff   3   60s"))
            .with_job(|_, _| ok(""));
        let deleted = mock.deleted.clone();
        let logged = mock.logged.clone();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = fast_orchestrator(dir.path(), mock);
        let outcome = orchestrator
            .run(&image_with_test(), "stock-instance")
            .await
            .unwrap();

        assert_eq!(outcome, TestOutcome::Failed);
        assert_eq!(logged.lock().unwrap().len(), 1);
        assert_eq!(deleted.lock().unwrap().as_slice(), ["stock-test"]);
    }

    /// Story: a pod in an unrecognized broken state skips log collection
    #[tokio::test]
    async fn story_broken_pod_skips_logs_but_still_cleans_up() {
        let mock = MockClusterRunner::new()
            .with_pods(|| ok("stock-test--stock-test-job-abc   0/1   Error   0   5s"))
            .with_pod(|_| ok("stock-test--stock-test-job-abc   0/1   Error   0   5s"))
            .with_job(|_, _| ok(""));
        let deleted = mock.deleted.clone();
        let logged = mock.logged.clone();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = fast_orchestrator(dir.path(), mock);
        let outcome = orchestrator
            .run(&image_with_test(), "stock-instance")
            .await
            .unwrap();

        assert_eq!(outcome, TestOutcome::Failed);
        assert!(logged.lock().unwrap().is_empty());
        assert_eq!(deleted.lock().unwrap().as_slice(), ["stock-test"]);
    }

    /// Story: an image with no test is a no-op
    #[tokio::test]
    async fn story_image_without_test_is_skipped() {
        let mock = MockClusterRunner::new();
        let deleted = mock.deleted.clone();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = fast_orchestrator(dir.path(), mock);
        let image = CellImage::new("myorg", "stock", "1.0.0");
        let outcome = orchestrator.run(&image, "stock-instance").await.unwrap();

        assert_eq!(outcome, TestOutcome::Skipped);
        assert!(deleted.lock().unwrap().is_empty());
    }

    // ==========================================================================
    // Story Tests: Test Cell Document
    // ==========================================================================

    /// Story: the test cell is a one-shot job document
    #[test]
    fn story_test_cell_document_shape() {
        let test = Test::new(
            "stock-test",
            TestSource::Image("myorg/stock-test:1.0.0".to_string()),
        )
        .with_env("ENDPOINT", "http://stock");

        let yaml = serde_yaml::to_string(&test_cell(&test, "myorg/stock-test:1.0.0")).unwrap();
        assert!(yaml.contains("kind: Cell"));
        assert!(yaml.contains("name: stock-test"));
        assert!(yaml.contains("restartPolicy: Never"));
        assert!(yaml.contains("shareProcessNamespace: true"));
        assert!(yaml.contains("image: myorg/stock-test:1.0.0"));
        assert!(yaml.contains("ENDPOINT"));
    }

    #[test]
    fn story_job_name_doubles_the_test_name() {
        assert_eq!(job_name("stock-test"), "stock-test--stock-test-job");
    }

    // ==========================================================================
    // Story Tests: Inline Modules
    // ==========================================================================

    /// Story: inline modules are copied from the image source root and run
    /// through the external test runner
    #[tokio::test]
    async fn story_inline_module_is_copied_and_run() {
        let image_root = tempfile::tempdir().unwrap();
        let module_dir = image_root.path().join("src/unit-tests");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join("main_test.txt"), "assert").unwrap();

        // Serialized by the env-var lock in real suites; fine standalone here
        std::env::set_var(CELL_IMAGE_DIR_ENV, image_root.path());

        let working = tempfile::tempdir().unwrap();
        let orchestrator = fast_orchestrator(working.path(), MockClusterRunner::new());
        let image = CellImage::new("myorg", "stock", "1.0.0").with_test(Test::new(
            "unit",
            TestSource::Module("unit-tests".to_string()),
        ));

        let outcome = orchestrator.run(&image, "stock-instance").await.unwrap();
        assert_eq!(outcome, TestOutcome::Completed);
        assert!(working.path().join("unit-tests/main_test.txt").exists());

        std::env::remove_var(CELL_IMAGE_DIR_ENV);
    }
}
