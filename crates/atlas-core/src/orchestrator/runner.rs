use crate::domain::errors::{EXTERNAL_TOOL, RUN_TIMEOUT};
use crate::domain::{AtlasError, AtlasResult};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs one generated launcher script to completion.
///
/// Implementations block until the script exits. A script that outlives
/// `timeout` is a fatal [`RUN_TIMEOUT`]; a non-zero exit status is an
/// [`EXTERNAL_TOOL`] failure. Nothing is retried.
pub trait CommandRunner: Sync {
    fn run_script(&self, script: &Path, timeout: Duration) -> AtlasResult<()>;
}

/// Feeds launcher scripts to a shell (`bash` unless configured otherwise).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    poll_interval: Duration,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("bash")
    }
}

fn log_lines<R: Read + Send + 'static>(stream: R, stderr: bool) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut tail = String::new();
        for line in BufReader::new(stream).lines().map_while(Result::ok) {
            if line.trim().is_empty() {
                continue;
            }
            if stderr {
                warn!("{line}");
                tail = line;
            } else {
                debug!("{line}");
            }
        }
        tail
    })
}

fn kill_quietly(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!("could not kill timed-out child: {error}");
    }
    let _ = child.wait();
}

impl CommandRunner for ShellRunner {
    fn run_script(&self, script: &Path, timeout: Duration) -> AtlasResult<()> {
        debug!("$ {} {}", self.shell, script.display());
        let mut child = Command::new(&self.shell)
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                AtlasError::computation(
                    EXTERNAL_TOOL,
                    format!(
                        "failed to launch '{} {}': {}",
                        self.shell,
                        script.display(),
                        source
                    ),
                )
            })?;

        let stdout = child.stdout.take().map(|stream| log_lines(stream, false));
        let stderr = child.stderr.take().map(|stream| log_lines(stream, true));

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= timeout => {
                    kill_quietly(&mut child);
                    return Err(AtlasError::computation(
                        RUN_TIMEOUT,
                        format!(
                            "{} did not finish within {} s",
                            script.display(),
                            timeout.as_secs()
                        ),
                    ));
                }
                Ok(None) => thread::sleep(self.poll_interval.min(timeout)),
                Err(source) => {
                    kill_quietly(&mut child);
                    return Err(AtlasError::computation(
                        EXTERNAL_TOOL,
                        format!("failed to wait for {}: {}", script.display(), source),
                    ));
                }
            }
        };

        if let Some(handle) = stdout {
            let _ = handle.join();
        }
        let last_error = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            let mut message = format!("{} exited with {}", script.display(), status);
            if !last_error.is_empty() {
                message.push_str(&format!(": {last_error}"));
            }
            Err(AtlasError::computation(EXTERNAL_TOOL, message))
        }
    }
}
