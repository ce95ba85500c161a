// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::host::{
    error::ExecutionError, input::Input, output::Output, output::OutputExt,
};

use itertools::Itertools;
use slog::{debug, error, info, warn, Logger};
use std::io::Read;
use std::process::{Command, Stdio};
use std::str::from_utf8;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn to_space_separated_string<T, I>(iter: T) -> String
where
    T: IntoIterator<Item = I>,
    I: std::fmt::Debug,
{
    Itertools::intersperse(
        iter.into_iter().map(|arg| format!("{arg:?}")),
        " ".into(),
    )
    .collect::<String>()
}

fn log_input(log: &Logger, id: u64, command: &Command) {
    info!(
        log,
        "running command via executor";
        "id" => id,
        "command" => %Input::from(command),
    );
    debug!(
        log,
        "running command via executor";
        "id" => id,
        "envs" => %to_space_separated_string(command.get_envs()),
    );
}

const NOT_UTF8: &str = "<Not valid UTF-8>";

fn log_output(log: &Logger, id: u64, output: &Output) {
    info!(
        log,
        "finished running command via executor";
        "id" => id,
        "result" => if output.status.success() { "OK" } else { "ERROR" },
        "status" => output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string()),
    );
    if !output.stdout.is_empty() {
        debug!(
            log,
            "finished command stdout";
            "id" => id,
            "stdout" => from_utf8(&output.stdout).unwrap_or(NOT_UTF8),
        );
    }
    if !output.stderr.is_empty() {
        debug!(
            log,
            "finished command stderr";
            "id" => id,
            "stderr" => from_utf8(&output.stderr).unwrap_or(NOT_UTF8),
        );
    }
}

/// Describes the commonly-used "safe-to-reference" type describing the
/// Executor as a trait object.
pub type BoxedExecutor = Arc<dyn Executor>;

/// Describes an "executor", which can run [Command]s and return a response.
///
/// - In production, this is usually simply a [HostExecutor].
/// - Under test, this can be customized, and a [FakeExecutor] may be used.
///
/// Execution is synchronous: the caller blocks until the command exits (or
/// the executor gives up on it).
pub trait Executor: Send + Sync {
    /// Executes a task, waiting for it to complete, and returning output.
    ///
    /// A command that exits unsuccessfully is reported as
    /// [ExecutionError::CommandFailure].
    fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError>;
}

/// Handler called when a fake command is executed.
type ExecuteFn = dyn FnMut(&Command) -> Output + Send + Sync;
type BoxedExecuteFn = Box<ExecuteFn>;

pub struct FakeExecutorBuilder {
    log: Logger,
    handler: Option<BoxedExecuteFn>,
}

impl FakeExecutorBuilder {
    pub fn new(log: Logger) -> Self {
        Self { log, handler: None }
    }

    pub fn handler(mut self, f: BoxedExecuteFn) -> Self {
        self.handler = Some(f);
        self
    }

    /// Convenience function to register the sequence with a [FakeExecutor].
    pub fn with_sequence(mut self, mut sequence: CommandSequence) -> Self {
        self.handler = Some(Box::new(move |command: &Command| -> Output {
            sequence.execute(command)
        }));
        self
    }

    pub fn build(self) -> Arc<FakeExecutor> {
        FakeExecutor::new(
            self.log,
            self.handler.unwrap_or_else(|| Box::new(|_cmd| Output::success())),
        )
    }
}

/// An executor which can expect certain inputs, and respond with specific
/// outputs.
pub struct FakeExecutor {
    log: Logger,
    counter: AtomicU64,
    handler: Mutex<BoxedExecuteFn>,
    history: Mutex<Vec<Input>>,
}

impl FakeExecutor {
    pub fn new(log: Logger, handler: BoxedExecuteFn) -> Arc<FakeExecutor> {
        Arc::new(Self {
            log,
            counter: AtomicU64::new(0),
            handler: Mutex::new(handler),
            history: Mutex::new(Vec::new()),
        })
    }

    /// Perform some type coercion to access a commonly-used trait object.
    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }

    /// Every command executed so far, in order.
    pub fn history(&self) -> Vec<Input> {
        self.history.lock().unwrap().clone()
    }
}

impl Executor for FakeExecutor {
    fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        log_input(&self.log, id, command);
        self.history.lock().unwrap().push(Input::from(&*command));

        let output = self.handler.lock().unwrap()(&*command);
        log_output(&self.log, id, &output);

        if !output.status.success() {
            return Err(ExecutionError::from_output(command, &output));
        }
        Ok(output)
    }
}

/// How often a deadline-bound command is polled for completion.
const DEADLINE_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct HostExecutor {
    log: Logger,
    counter: AtomicU64,
    timeout: Option<Duration>,
}

impl HostExecutor {
    pub fn new(log: Logger) -> Arc<Self> {
        Arc::new(Self { log, counter: AtomicU64::new(0), timeout: None })
    }

    /// Like [Self::new], but commands that run longer than `timeout` are
    /// killed and reported as [ExecutionError::Timeout].
    pub fn with_timeout(log: Logger, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            log,
            counter: AtomicU64::new(0),
            timeout: Some(timeout),
        })
    }

    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }

    fn prepare(&self, command: &Command) -> u64 {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        log_input(&self.log, id, command);
        id
    }

    fn finalize(
        &self,
        command: &Command,
        id: u64,
        output: Output,
    ) -> Result<Output, ExecutionError> {
        log_output(&self.log, id, &output);
        if !output.status.success() {
            return Err(ExecutionError::from_output(command, &output));
        }
        Ok(output)
    }

    /// Runs `command` to completion, or kills it once `timeout` elapses.
    ///
    /// Returns `Ok(None)` if the command was killed.
    fn output_with_deadline(
        command: &mut Command,
        timeout: Duration,
    ) -> std::io::Result<Option<Output>> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes on their own threads so a chatty child can't
        // block on a full pipe while we wait for it.
        let stdout = child.stdout.take().map(drain_in_background);
        let stderr = child.stderr.take().map(drain_in_background);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if Instant::now() >= deadline {
                // The child may have exited between the check and the kill;
                // either way we reap it below.
                let _ = child.kill();
                let _ = child.wait()?;
                break None;
            }
            std::thread::sleep(DEADLINE_POLL_INTERVAL);
        };

        let stdout = stdout.map(join_drain).unwrap_or_default();
        let stderr = stderr.map(join_drain).unwrap_or_default();
        Ok(status.map(|status| Output { status, stdout, stderr }))
    }
}

fn drain_in_background<R: Read + Send + 'static>(
    mut reader: R,
) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: std::thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

impl Executor for HostExecutor {
    fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError> {
        let id = self.prepare(command);
        let result = match self.timeout {
            None => command.output().map(Some),
            Some(timeout) => Self::output_with_deadline(command, timeout),
        };
        match result {
            Ok(Some(output)) => self.finalize(command, id, output),
            Ok(None) => {
                // `None` is only produced when a timeout is configured.
                let timeout = self.timeout.unwrap_or_default();
                warn!(
                    self.log,
                    "command exceeded its deadline and was killed";
                    "id" => id,
                    "timeout" => ?timeout,
                );
                Err(ExecutionError::Timeout {
                    command: Input::from(&*command).to_string(),
                    timeout,
                })
            }
            Err(err) => {
                error!(self.log, "Could not start program!"; "id" => id);
                Err(ExecutionError::ExecutionStart {
                    command: Input::from(&*command).to_string(),
                    err,
                })
            }
        }
    }
}

type DynamicHandler = Box<dyn FnMut(Input) -> Output + Send + Sync>;

enum HandledCommand {
    Static { input: Input, output: Output },
    Dynamic { handler: DynamicHandler },
}

/// A handler that may be used for setting inputs/outputs to the executor
/// when these commands are known ahead-of-time.
///
/// See: [FakeExecutorBuilder::with_sequence] for integration with a
/// [FakeExecutor].
pub struct CommandSequence {
    expected: Vec<HandledCommand>,
    index: usize,
}

impl Default for CommandSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSequence {
    pub fn new() -> Self {
        Self { expected: Vec::new(), index: 0 }
    }

    /// Expects a static "input" to exactly produce some "output".
    pub fn expect(&mut self, input: Input, output: Output) {
        self.expected.push(HandledCommand::Static { input, output });
    }

    /// A helper for [Self::expect] which quietly succeeds.
    pub fn expect_ok<S: AsRef<str>>(&mut self, input: S) {
        self.expect(Input::shell(input), Output::success())
    }

    /// A helper for [Self::expect] which succeeds and prints `stdout`.
    pub fn expect_stdout<S: AsRef<str>, T: AsRef<str>>(
        &mut self,
        input: S,
        stdout: T,
    ) {
        self.expect(Input::shell(input), Output::success().set_stdout(stdout))
    }

    /// A helper for [Self::expect] which quietly fails.
    pub fn expect_fail<S: AsRef<str>>(&mut self, input: S) {
        self.expect(Input::shell(input), Output::failure())
    }

    /// Expects a dynamic handler to be invoked to dynamically
    /// determine the output of this call.
    pub fn expect_dynamic(&mut self, handler: DynamicHandler) {
        self.expected.push(HandledCommand::Dynamic { handler });
    }

    fn execute(&mut self, command: &Command) -> Output {
        let observed_input = Input::from(command);
        let expected = &mut self
            .expected
            .get_mut(self.index)
            .unwrap_or_else(|| panic!("Unexpected command: {observed_input}"));
        self.index += 1;

        match expected {
            HandledCommand::Static { input, output } => {
                assert_eq!(&observed_input, input, "Unexpected input command");
                output.clone()
            }
            HandledCommand::Dynamic { ref mut handler } => {
                handler(observed_input)
            }
        }
    }
}

impl Drop for CommandSequence {
    fn drop(&mut self) {
        let expected = self.expected.len();
        let actual = self.index;
        if actual < expected {
            let next = &self.expected[actual];
            let tip = match next {
                HandledCommand::Static { input, .. } => input.to_string(),
                HandledCommand::Dynamic { .. } => {
                    "<dynamic handler>".to_string()
                }
            };
            let errmsg = format!(
                "Only saw {actual} calls, expected {expected}\n\
                 Next would have been: {tip}"
            );
            if !std::thread::panicking() {
                panic!("{errmsg}");
            } else {
                eprintln!("{errmsg}");
            }
        }
    }
}
