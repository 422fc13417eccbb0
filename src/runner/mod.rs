//! Supervision of a single `sona` worker process
//!
//! A [`Runner`] only exists once the worker has printed its ready signal, so
//! holding one means the endpoint is live. Dropping a runner that was never
//! stopped kills the worker; [`scoped`] pairs start and stop for callers that
//! just need the endpoint for a while.

mod handshake;
mod launch;
mod output;
mod terminate;

use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStderr, ChildStdout};

use crate::config::RunnerConfig;
use crate::error::{Result, SonaError};
use crate::messages::WorkerState;
use output::Stream;

/// Network address of a ready worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    port: u16,
}

impl Endpoint {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Base URL of the OpenAI-compatible API
    pub fn api_base(&self) -> String {
        format!("{}/v1", self.base_url())
    }
}

/// A running `sona serve` child process
pub struct Runner {
    child: Child,
    pid: u32,
    requested_port: u16,
    port: u16,
    stop_timeout: Duration,
    state: WorkerState,
    exit_status: Option<ExitStatus>,
}

impl Runner {
    /// Launch the worker and wait for its ready signal
    ///
    /// On any failure after the spawn the child is killed before the error is
    /// returned.
    pub async fn start(config: &RunnerConfig) -> Result<Self> {
        let binary = launch::resolve_binary(&config.binary)?;
        let mut child = launch::spawn(&binary, config.port, &config.extra_args)?;
        let pid = child.id().unwrap_or(0);

        let (port, stdout, stderr) = match Self::handshake(&mut child, config).await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(pid, error = %e, "Worker failed to become ready, killing it");
                if let Err(kill_err) = child.kill().await {
                    tracing::debug!(pid, error = %kill_err, "Kill after failed handshake");
                }
                return Err(e);
            }
        };

        output::forward(Stream::Stdout, stdout, pid, config.forward_output);
        output::forward(Stream::Stderr, stderr, pid, config.forward_output);

        tracing::info!(pid, port, requested_port = config.port, "Worker ready");

        Ok(Self {
            child,
            pid,
            requested_port: config.port,
            port,
            stop_timeout: config.stop_timeout(),
            state: WorkerState::Ready,
            exit_status: None,
        })
    }

    async fn handshake(
        child: &mut Child,
        config: &RunnerConfig,
    ) -> Result<(u16, BufReader<ChildStdout>, BufReader<ChildStderr>)> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("worker stderr was not captured"))?;

        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);

        let ready = handshake::await_ready(&mut stdout, &mut stderr);
        let port = match config.ready_timeout() {
            Some(limit) => tokio::time::timeout(limit, ready).await.map_err(|_| {
                SonaError::ReadyTimeout {
                    seconds: limit.as_secs(),
                }
            })??,
            None => ready.await?,
        };

        Ok((port, stdout, stderr))
    }

    /// Port the worker actually bound
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Port passed on the command line (0 for "any")
    pub fn requested_port(&self) -> u16 {
        self.requested_port
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint { port: self.port }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// How the worker exited, once that has been observed
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Check if the worker process is still running
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status.get_or_insert(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::debug!(pid = self.pid, error = %e, "Failed to poll worker status");
                false
            }
        }
    }

    /// Shut the worker down
    ///
    /// Requests graceful termination and waits up to the stop timeout before
    /// killing it. Never fails, and does nothing once the worker is stopped or
    /// has already exited.
    pub async fn stop(&mut self) {
        if self.state == WorkerState::Stopped {
            return;
        }

        if !self.is_alive() {
            tracing::debug!(pid = self.pid, "Worker already exited");
            self.state = WorkerState::Stopped;
            return;
        }

        tracing::info!(pid = self.pid, "Stopping worker");

        if let Err(e) = terminate::request_graceful_termination(&mut self.child) {
            tracing::warn!(pid = self.pid, error = %e, "Failed to request graceful termination");
        }

        match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(pid = self.pid, %status, "Worker exited");
                self.exit_status = Some(status);
            }
            Ok(Err(e)) => {
                tracing::warn!(pid = self.pid, error = %e, "Error waiting for worker, killing it");
                self.force_kill().await;
            }
            Err(_) => {
                tracing::warn!(
                    pid = self.pid,
                    timeout_secs = self.stop_timeout.as_secs(),
                    "Worker did not exit in time, killing it"
                );
                self.force_kill().await;
            }
        }

        self.state = WorkerState::Stopped;
    }

    async fn force_kill(&mut self) {
        // Fails only if the worker exited on its own in the meantime
        if let Err(e) = self.child.kill().await {
            tracing::debug!(pid = self.pid, error = %e, "Forced kill raced with exit");
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.exit_status = Some(status);
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if self.state == WorkerState::Stopped || self.exit_status.is_some() {
            return;
        }

        tracing::warn!(pid = self.pid, "Runner dropped without stop, killing worker");
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(pid = self.pid, error = %e, "Failed to kill worker on drop");
        }
    }
}

/// Run `f` against a freshly started worker and stop it afterwards
///
/// The worker is stopped however `f` finishes, including when it returns an
/// error of its own. If `f` panics or is cancelled, dropping the runner kills
/// the worker instead.
pub async fn scoped<F, Fut, T>(config: &RunnerConfig, f: F) -> Result<T>
where
    F: FnOnce(Endpoint) -> Fut,
    Fut: Future<Output = T>,
{
    let mut runner = Runner::start(config).await?;
    let output = f(runner.endpoint()).await;
    runner.stop().await;
    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::ExitStatusExt;
    use std::path::PathBuf;
    use std::time::Instant;
    use tempfile::TempDir;

    const READY_WORKER: &str = r#"
port=$3
if [ "$port" = "0" ]; then port=51234; fi
trap 'echo TERM >> "$LOG"; exit 0' TERM
echo "{\"status\":\"ready\",\"port\":$port}"
while :; do sleep 0.05; done
"#;

    const STUBBORN_WORKER: &str = r#"
trap 'echo TERM >> "$LOG"' TERM
echo '{"status":"ready","port":4000}'
while :; do sleep 0.05; done
"#;

    /// Writes well over a pipe buffer to both streams after the ready line
    const CHATTY_WORKER: &str = r#"
trap 'echo TERM >> "$LOG"; exit 0' TERM
echo '{"status":"ready","port":4000}'
line=0123456789012345678901234567890123456789012345678901234567890123456789012345678901234567890123456789
i=0
while [ $i -lt 2000 ]; do
    echo "$line"
    echo "$line" >&2
    i=$((i + 1))
done
touch "$DIR/flushed"
while :; do sleep 0.05; done
"#;

    /// Shell script standing in for the `sona` binary
    struct FakeWorker {
        dir: TempDir,
    }

    impl FakeWorker {
        fn new(body: &str) -> Self {
            let dir = tempfile::Builder::new()
                .prefix("sona-runner-")
                .tempdir()
                .unwrap();
            let root = dir.path().display().to_string();
            let script = format!(
                "#!/bin/sh\nDIR='{root}'\nLOG='{root}/signals'\necho $$ > '{root}/pid'\n{body}"
            );

            let path = dir.path().join("sona");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

            Self { dir }
        }

        fn binary(&self) -> PathBuf {
            self.dir.path().join("sona")
        }

        fn config(&self) -> RunnerConfig {
            RunnerConfig {
                binary: self.binary().display().to_string(),
                stop_timeout_secs: 1,
                forward_output: false,
                ..RunnerConfig::default()
            }
        }

        fn pid(&self) -> i32 {
            std::fs::read_to_string(self.dir.path().join("pid"))
                .unwrap()
                .trim()
                .parse()
                .unwrap()
        }

        fn signals(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join("signals"))
                .map(|s| s.lines().map(str::to_string).collect())
                .unwrap_or_default()
        }
    }

    fn process_exists(pid: i32) -> bool {
        kill(Pid::from_raw(pid), None).is_ok()
    }

    /// Killed children are reaped in the background, so give it a moment
    async fn wait_until_gone(pid: i32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while process_exists(pid) {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    #[tokio::test]
    async fn test_ephemeral_port_is_reported() {
        let worker = FakeWorker::new(READY_WORKER);

        let mut runner = Runner::start(&worker.config()).await.unwrap();
        assert_eq!(runner.requested_port(), 0);
        assert_eq!(runner.port(), 51234);
        assert_eq!(runner.endpoint().api_base(), "http://127.0.0.1:51234/v1");
        assert_eq!(runner.state(), WorkerState::Ready);
        assert!(runner.is_alive());

        runner.stop().await;
    }

    #[tokio::test]
    async fn test_requested_port_is_reported() {
        let worker = FakeWorker::new(READY_WORKER);
        let config = RunnerConfig {
            port: 4567,
            ..worker.config()
        };

        let mut runner = Runner::start(&config).await.unwrap();
        assert_eq!(runner.requested_port(), 4567);
        assert_eq!(runner.port(), 4567);

        runner.stop().await;
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let config = RunnerConfig {
            binary: "sona-runner-test-no-such-binary".to_string(),
            ..RunnerConfig::default()
        };

        let err = Runner::start(&config).await.err().unwrap();
        assert!(matches!(err, SonaError::ExecutableNotFound { .. }));
    }

    #[tokio::test]
    async fn test_exit_before_ready() {
        let worker = FakeWorker::new("echo 'bind: address in use' >&2\nexit 1\n");

        let err = Runner::start(&worker.config()).await.err().unwrap();
        match err {
            SonaError::WorkerExitedEarly { stderr } => assert_eq!(stderr, "bind: address in use"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!process_exists(worker.pid()));
    }

    #[tokio::test]
    async fn test_unexpected_signal_kills_worker() {
        let worker = FakeWorker::new("echo '{\"status\":\"loading\",\"port\":0}'\nexec sleep 30\n");

        let err = Runner::start(&worker.config()).await.err().unwrap();
        assert!(matches!(err, SonaError::UnexpectedReadySignal { .. }));
        assert!(!process_exists(worker.pid()));
    }

    #[tokio::test]
    async fn test_malformed_signal_kills_worker() {
        let worker = FakeWorker::new("echo 'listening on :8080'\nexec sleep 30\n");

        let err = Runner::start(&worker.config()).await.err().unwrap();
        assert!(matches!(err, SonaError::HandshakeParse { .. }));
        assert!(!process_exists(worker.pid()));
    }

    #[tokio::test]
    async fn test_ready_timeout_kills_worker() {
        let worker = FakeWorker::new("exec sleep 30\n");
        let config = RunnerConfig {
            ready_timeout_secs: Some(1),
            ..worker.config()
        };

        let err = Runner::start(&config).await.err().unwrap();
        assert!(matches!(err, SonaError::ReadyTimeout { seconds: 1 }));
        assert!(!process_exists(worker.pid()));
    }

    #[tokio::test]
    async fn test_graceful_stop_does_not_kill() {
        let worker = FakeWorker::new(READY_WORKER);
        let mut runner = Runner::start(&worker.config()).await.unwrap();

        runner.stop().await;

        let status = runner.exit_status().unwrap();
        assert_eq!(status.code(), Some(0));
        assert_eq!(status.signal(), None);
        assert_eq!(worker.signals(), vec!["TERM"]);
        assert_eq!(runner.state(), WorkerState::Stopped);
        assert!(!runner.is_alive());
        assert!(!process_exists(worker.pid()));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let worker = FakeWorker::new(READY_WORKER);
        let mut runner = Runner::start(&worker.config()).await.unwrap();

        runner.stop().await;
        let first = runner.exit_status();
        runner.stop().await;

        assert_eq!(runner.exit_status(), first);
        assert_eq!(runner.state(), WorkerState::Stopped);
        assert_eq!(worker.signals(), vec!["TERM"]);
    }

    #[tokio::test]
    async fn test_unresponsive_worker_is_killed_after_timeout() {
        let worker = FakeWorker::new(STUBBORN_WORKER);
        let mut runner = Runner::start(&worker.config()).await.unwrap();

        let started = Instant::now();
        runner.stop().await;

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(worker.signals().first().map(String::as_str), Some("TERM"));
        assert_eq!(runner.exit_status().unwrap().signal(), Some(Signal::SIGKILL as i32));
        assert!(!process_exists(worker.pid()));
    }

    #[tokio::test]
    async fn test_stop_after_worker_exited() {
        let worker = FakeWorker::new(
            "trap 'echo TERM >> \"$LOG\"' TERM\necho '{\"status\":\"ready\",\"port\":4000}'\nexit 0\n",
        );
        let mut runner = Runner::start(&worker.config()).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.is_alive() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!runner.is_alive());

        let started = Instant::now();
        runner.stop().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(runner.exit_status().unwrap().code(), Some(0));
        assert!(worker.signals().is_empty());
    }

    #[tokio::test]
    async fn test_scoped_stops_worker() {
        let worker = FakeWorker::new(READY_WORKER);

        let port = scoped(&worker.config(), |endpoint| async move { endpoint.port() })
            .await
            .unwrap();

        assert_eq!(port, 51234);
        assert_eq!(worker.signals(), vec!["TERM"]);
        assert!(!process_exists(worker.pid()));
    }

    #[tokio::test]
    async fn test_scoped_stops_worker_on_error_result() {
        let worker = FakeWorker::new(READY_WORKER);

        let result = scoped(&worker.config(), |_| async { Err::<(), &str>("boom") })
            .await
            .unwrap();

        assert_eq!(result, Err("boom"));
        assert!(!process_exists(worker.pid()));
    }

    #[tokio::test]
    async fn test_drop_without_stop_kills_worker() {
        let worker = FakeWorker::new(READY_WORKER);
        let runner = Runner::start(&worker.config()).await.unwrap();
        let pid = worker.pid();
        assert!(process_exists(pid));

        drop(runner);

        assert!(wait_until_gone(pid).await);
        assert!(worker.signals().is_empty());
    }

    #[tokio::test]
    async fn test_chatty_worker_output_is_drained() {
        let worker = FakeWorker::new(CHATTY_WORKER);
        let flushed = worker.dir.path().join("flushed");

        for forward_output in [false, true] {
            let _ = std::fs::remove_file(&flushed);
            let config = RunnerConfig {
                forward_output,
                ..worker.config()
            };
            let mut runner = Runner::start(&config).await.unwrap();

            let deadline = Instant::now() + Duration::from_secs(5);
            while !flushed.exists() && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(flushed.exists(), "worker blocked writing its output");

            runner.stop().await;
            assert_eq!(runner.exit_status().unwrap().code(), Some(0));
        }

        assert_eq!(worker.signals(), vec!["TERM", "TERM"]);
    }

    #[tokio::test]
    async fn test_scoped_kills_worker_when_closure_panics() {
        let worker = FakeWorker::new(READY_WORKER);
        let config = worker.config();

        let handle = tokio::spawn(async move {
            scoped(&config, |endpoint| async move {
                assert_eq!(endpoint.port(), 0, "caller gave up on the worker");
            })
            .await
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert!(wait_until_gone(worker.pid()).await);
    }
}
