//! Child-process lifecycle supervision.
//!
//! [`ProcessSupervisor`] owns the child handle and the lifecycle state
//! machine, and runs two kinds of background workers: output readers that
//! drain the child's pipes into the [`OutputChannel`], and a health waiter
//! that polls the service endpoint until it answers. State, output buffer
//! and log file are guarded by independent locks so output keeps flowing
//! while a transition is in progress.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RoostConfig;
use crate::error::RoostError;
use crate::health::HealthMonitor;
use crate::render::SnapshotSource;

use super::log_sink::LogSink;
use super::output::{OutputCallback, OutputChannel};
use super::state::ProcessState;

/// Callback invoked with `(old, new)` on every state transition.
pub type StateCallback = Box<dyn Fn(ProcessState, ProcessState) + Send + Sync>;

// Delay before the health waiter takes its first look at the child.
const SETTLE_DELAY: Duration = Duration::from_millis(500);
// Bounded wait for the output readers to drain after the child exits.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
// Extra wait for the child after escalating to a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(5);
// Pause between the stop and start phases of a restart.
const RESTART_PAUSE: Duration = Duration::from_secs(1);

/// Supervises exactly one child service process at a time.
pub struct ProcessSupervisor {
    config: RoostConfig,
    state: Mutex<ProcessState>,
    state_subscribers: Mutex<Vec<StateCallback>>,
    child: Mutex<Option<Child>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    output: OutputChannel,
    health: HealthMonitor,
    last_exit: Mutex<Option<i32>>,
}

impl ProcessSupervisor {
    pub fn new(config: RoostConfig) -> Arc<Self> {
        let health = HealthMonitor::new(&config.host, config.port, config.health_interval());
        let output = OutputChannel::new(config.max_console_lines, LogSink::new(&config.log_file));
        info!(
            "supervisor initialized for {} on {}:{}",
            config.command, config.host, config.port
        );
        Arc::new(Self {
            config,
            state: Mutex::new(ProcessState::Stopped),
            state_subscribers: Mutex::new(Vec::new()),
            child: Mutex::new(None),
            readers: Mutex::new(Vec::new()),
            output,
            health,
            last_exit: Mutex::new(None),
        })
    }

    /// Launch the child service.
    ///
    /// Spawning is synchronous, readiness is not: on success the supervisor
    /// is STARTING and the health waiter will move it to RUNNING or ERROR
    /// later. Returns false with no state change when the supervisor is not
    /// in a startable state or a previous child is still alive.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.reap_stale_child() {
            warn!("cannot start: previous child process is still running");
            return false;
        }
        if !self.transition_if(ProcessState::can_start, ProcessState::Starting) {
            warn!("cannot start: current state is {}", self.state());
            return false;
        }

        match self.spawn_child() {
            Ok(()) => true,
            Err(e) => {
                error!("failed to start {}: {e}", self.config.command);
                self.output.sink().close();
                self.transition(ProcessState::Error);
                false
            }
        }
    }

    /// Gracefully stop the child, escalating to a forced kill after
    /// `timeout`. Blocks its caller for up to `timeout` plus the kill grace
    /// period; callers needing a non-blocking shutdown should invoke this
    /// from a worker task.
    pub async fn stop(&self, timeout: Duration) -> bool {
        if !self.transition_if(ProcessState::can_stop, ProcessState::Stopping) {
            warn!("cannot stop: current state is {}", self.state());
            return false;
        }
        self.output.write_separator("STOPPING");

        match self.shutdown_child(timeout).await {
            Ok(()) => {
                self.output.write_separator("STOPPED");
                self.output.sink().close();
                self.transition(ProcessState::Stopped);
                true
            }
            Err(e) => {
                error!("error stopping process: {e}");
                self.output.sink().close();
                self.transition(ProcessState::Error);
                false
            }
        }
    }

    /// Stop the child when it is live, pause briefly, then start again.
    pub async fn restart(self: &Arc<Self>) -> bool {
        info!("restarting service");
        self.output.write_separator("RESTARTING");

        let state = self.state();
        if matches!(
            state,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        ) {
            if !self.stop(self.config.shutdown_timeout()).await {
                error!("failed to stop process during restart");
                return false;
            }
        } else {
            debug!("process is {state}, skipping stop phase");
        }

        // Give the old process a moment to release its port.
        tokio::time::sleep(RESTART_PAUSE).await;

        if !self.start() {
            error!("failed to start process during restart");
            return false;
        }
        true
    }

    /// Snapshot of the current lifecycle state.
    pub fn state(&self) -> ProcessState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Snapshot of the captured output, optionally only the most recent
    /// `max` lines.
    pub fn output_lines(&self, max: Option<usize>) -> Vec<String> {
        self.output.snapshot(max)
    }

    /// Exit status of the most recently observed child death, for
    /// diagnostics when the supervisor lands in ERROR.
    pub fn last_exit_code(&self) -> Option<i32> {
        *self.last_exit.lock().expect("exit code lock poisoned")
    }

    /// Register a callback for state transitions. Delivery is synchronous on
    /// whichever worker performed the transition, in registration order.
    pub fn subscribe_to_state_change(&self, callback: StateCallback) {
        self.state_subscribers
            .lock()
            .expect("state subscriber lock poisoned")
            .push(callback);
        debug!("state change subscriber registered");
    }

    /// Register a callback for new output lines. Delivery is synchronous on
    /// the output reader, in registration order.
    pub fn subscribe_to_output(&self, callback: OutputCallback) {
        self.output.subscribe(callback);
    }

    fn spawn_child(self: &Arc<Self>) -> Result<(), RoostError> {
        self.output.sink().open()?;
        self.output.write_separator("STARTING");

        info!(
            "starting {} on {}:{}",
            self.config.command, self.config.host, self.config.port
        );

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        debug!("process started with PID: {:?}", child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        *self.child.lock().expect("child lock poisoned") = Some(child);

        {
            let mut readers = self.readers.lock().expect("reader lock poisoned");
            if let Some(stdout) = stdout {
                readers.push(tokio::spawn(Arc::clone(self).pump_stream(stdout, "stdout")));
            }
            if let Some(stderr) = stderr {
                readers.push(tokio::spawn(Arc::clone(self).pump_stream(stderr, "stderr")));
            }
        }

        tokio::spawn(Arc::clone(self).wait_for_health());
        Ok(())
    }

    /// Drain one child stream line by line into the output channel. Bytes
    /// are decoded lossily so malformed output can never error the reader;
    /// end of stream is the natural exit condition.
    async fn pump_stream<R>(self: Arc<Self>, stream: R, stream_name: &'static str)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        debug!("{stream_name} reader started");
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    self.output.append(line.trim_end());
                }
                Err(e) => {
                    error!("error reading process {stream_name}: {e}");
                    break;
                }
            }
        }
        // Keep the exit status around for diagnostics; transitions stay the
        // health waiter's (or stop()'s) job so the two paths never race.
        if let Some(status) = self.poll_child_exit() {
            self.record_exit(status);
        }
        debug!("{stream_name} reader finished");
    }

    /// Poll the health endpoint until the service answers, the child dies,
    /// or the startup budget runs out. Every iteration re-checks the state
    /// first so a concurrent stop() is never blocked by health waiting.
    async fn wait_for_health(self: Arc<Self>) {
        tokio::time::sleep(SETTLE_DELAY).await;
        let started = tokio::time::Instant::now();

        loop {
            let state = self.state();
            if state != ProcessState::Starting {
                info!("health wait stopped due to state change to {state}");
                return;
            }

            if let Some(status) = self.poll_child_exit() {
                self.record_exit(status);
                error!("process terminated before becoming healthy ({status})");
                self.transition_if(|s| s == ProcessState::Starting, ProcessState::Error);
                return;
            }

            if let Some(budget) = self.config.startup_timeout()
                && started.elapsed() >= budget
            {
                error!(
                    "service did not become healthy within {}s, giving up",
                    budget.as_secs()
                );
                self.kill_unhealthy_child().await;
                self.transition_if(|s| s == ProcessState::Starting, ProcessState::Error);
                return;
            }

            if self.health.probe().await {
                info!(
                    "service became available after {:.1}s",
                    started.elapsed().as_secs_f64()
                );
                self.transition_if(|s| s == ProcessState::Starting, ProcessState::Running);
                return;
            }

            tokio::time::sleep(self.health.interval()).await;
        }
    }

    async fn shutdown_child(&self, timeout: Duration) -> std::io::Result<()> {
        let child = self.child.lock().expect("child lock poisoned").take();
        let Some(mut child) = child else {
            debug!("no live child, completing stop sequence");
            self.join_readers().await;
            return Ok(());
        };

        info!("stopping child process");
        Self::terminate(&mut child);

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!("process terminated gracefully");
                self.record_exit(status);
            }
            Err(_) => {
                warn!(
                    "process did not terminate within {}s, forcing kill",
                    timeout.as_secs()
                );
                child.start_kill()?;
                let status = tokio::time::timeout(KILL_WAIT, child.wait())
                    .await
                    .map_err(|_| {
                        std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "child survived forced kill",
                        )
                    })??;
                info!("process killed forcefully");
                self.record_exit(status);
            }
        }

        self.join_readers().await;
        Ok(())
    }

    /// Send the platform's graceful-terminate signal.
    fn terminate(child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            debug!("sending SIGTERM to pid {pid}");
            // SAFETY: pid belongs to a live child this supervisor owns.
            unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            return;
        }

        if let Err(e) = child.start_kill() {
            warn!("failed to signal child: {e}");
        }
    }

    /// Kill and reap a child that never became healthy.
    async fn kill_unhealthy_child(&self) {
        let child = self.child.lock().expect("child lock poisoned").take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                warn!("failed to kill unhealthy child: {e}");
            }
            if let Ok(Ok(status)) = tokio::time::timeout(KILL_WAIT, child.wait()).await {
                self.record_exit(status);
            }
        }
        self.join_readers().await;
    }

    async fn join_readers(&self) {
        let handles: Vec<_> = {
            let mut readers = self.readers.lock().expect("reader lock poisoned");
            readers.drain(..).collect()
        };
        for handle in handles {
            match tokio::time::timeout(READER_JOIN_TIMEOUT, handle).await {
                Ok(Err(e)) => warn!("output reader task failed: {e}"),
                Err(_) => warn!(
                    "output reader did not finish within {}s",
                    READER_JOIN_TIMEOUT.as_secs()
                ),
                Ok(Ok(())) => {}
            }
        }
    }

    /// Clear a handle left over from a previous attempt. Returns false when
    /// that child is still alive; at most one live child may exist.
    fn reap_stale_child(&self) -> bool {
        let mut guard = self.child.lock().expect("child lock poisoned");
        match guard.as_mut() {
            None => true,
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    self.record_exit(status);
                    *guard = None;
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!("failed to poll stale child: {e}");
                    *guard = None;
                    true
                }
            },
        }
    }

    fn poll_child_exit(&self) -> Option<ExitStatus> {
        let mut guard = self.child.lock().expect("child lock poisoned");
        guard.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    fn record_exit(&self, status: ExitStatus) {
        debug!("recorded child exit status: {status}");
        *self.last_exit.lock().expect("exit code lock poisoned") = status.code();
    }

    fn transition(&self, new: ProcessState) {
        self.transition_if(|_| true, new);
    }

    /// Mutate the state when `accept` approves of the current value, then
    /// notify subscribers. The subscriber registry is locked before the
    /// state lock is released, so delivery order matches transition order
    /// and callbacks may call read APIs without deadlocking.
    fn transition_if<F>(&self, accept: F, new: ProcessState) -> bool
    where
        F: FnOnce(ProcessState) -> bool,
    {
        let (old, subscribers) = {
            let mut state = self.state.lock().expect("state lock poisoned");
            let old = *state;
            if !accept(old) || old == new {
                return false;
            }
            debug_assert!(old.allows(new), "invalid transition {old} -> {new}");
            *state = new;
            let subscribers = self
                .state_subscribers
                .lock()
                .expect("state subscriber lock poisoned");
            drop(state);
            (old, subscribers)
        };

        info!("state transition: {old} -> {new}");
        for callback in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(old, new))).is_err() {
                error!("error in state change callback; continuing with remaining subscribers");
            }
        }
        true
    }
}

impl SnapshotSource for ProcessSupervisor {
    fn snapshot(&self) -> Vec<String> {
        self.output_lines(None)
    }
}
