//! Child process supervision.
//!
//! Starts the wrapped command with stdin inherited and both output streams
//! piped, drains each pipe on its own thread, waits for the child, and only
//! then publishes metrics. Child exit alone is not enough: the pipes may
//! still hold buffered output, or a grandchild may keep them open, so the
//! writer runs after both collector threads have been joined.

use std::io::{self, BufReader, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use crate::collector::{DrainReport, stderr, stdout};
use crate::exposition::{ExpositionError, TextfileWriter};
use crate::metrics::Aggregator;

/// Error type for supervision failures.
#[derive(Debug)]
pub enum SupervisorError {
    /// Empty command line.
    EmptyCommand,
    /// The child could not be started.
    Spawn { program: String, source: io::Error },
    /// A collector thread could not be started.
    Thread(io::Error),
    /// Waiting for the child failed.
    Wait(io::Error),
    /// A collector thread panicked.
    CollectorPanicked(&'static str),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::EmptyCommand => write!(f, "no command given"),
            SupervisorError::Spawn { program, source } => {
                write!(f, "failed to start '{}': {}", program, source)
            }
            SupervisorError::Thread(e) => write!(f, "failed to start collector thread: {}", e),
            SupervisorError::Wait(e) => write!(f, "failed to wait for child: {}", e),
            SupervisorError::CollectorPanicked(stream) => {
                write!(f, "{} collector panicked", stream)
            }
        }
    }
}

impl std::error::Error for SupervisorError {}

/// Everything known about a finished run.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: ExitStatus,
    pub stdout: DrainReport,
    pub stderr: DrainReport,
    /// Result of the single exposition write.
    pub exposition: Result<(), ExpositionError>,
}

impl RunOutcome {
    /// Exit code the wrapper should terminate with.
    pub fn exit_code(&self) -> i32 {
        exit_code(&self.status)
    }
}

/// Maps a child status to a shell-style exit code: the child's own code,
/// `128 + signal` when it was killed, `1` otherwise.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Runs `command`, forwarding passthrough output to the wrapper's own
/// stdout and stderr.
pub fn run(
    command: &[String],
    aggregator: Arc<Aggregator>,
    writer: &TextfileWriter,
) -> Result<RunOutcome, SupervisorError> {
    run_with(command, aggregator, writer, io::stdout(), io::stderr())
}

/// Like [`run`], with explicit passthrough destinations.
pub fn run_with<O, E>(
    command: &[String],
    aggregator: Arc<Aggregator>,
    writer: &TextfileWriter,
    out: O,
    err: E,
) -> Result<RunOutcome, SupervisorError>
where
    O: Write + Send + 'static,
    E: Write + Send + 'static,
{
    let (program, args) = command.split_first().ok_or(SupervisorError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| SupervisorError::Spawn {
            program: program.clone(),
            source,
        })?;
    info!(program = %program, pid = child.id(), "child started");

    let (stdout_handle, stderr_handle) = match spawn_collectors(&mut child, &aggregator, out, err)
    {
        Ok(handles) => handles,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SupervisorError::Thread(e));
        }
    };

    let status = child.wait();
    debug!(?status, "child exited, waiting for collectors");

    let stdout_report = join(stdout_handle, "stdout")?;
    let stderr_report = join(stderr_handle, "stderr")?;
    let status = status.map_err(SupervisorError::Wait)?;

    let exposition = writer.write(&aggregator);

    Ok(RunOutcome {
        status,
        stdout: stdout_report,
        stderr: stderr_report,
        exposition,
    })
}

type Handles = (JoinHandle<DrainReport>, JoinHandle<DrainReport>);

fn spawn_collectors<O, E>(
    child: &mut Child,
    aggregator: &Arc<Aggregator>,
    out: O,
    err: E,
) -> io::Result<Handles>
where
    O: Write + Send + 'static,
    E: Write + Send + 'static,
{
    let child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout not piped"))?;
    let child_stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr not piped"))?;

    let agg = Arc::clone(aggregator);
    let stdout_handle = thread::Builder::new()
        .name("stdout-collector".to_string())
        .spawn(move || stdout::drain(BufReader::new(child_stdout), out, &agg))?;

    let agg = Arc::clone(aggregator);
    let stderr_handle = thread::Builder::new()
        .name("stderr-collector".to_string())
        .spawn(move || stderr::drain(BufReader::new(child_stderr), err, &agg))?;

    Ok((stdout_handle, stderr_handle))
}

fn join(
    handle: JoinHandle<DrainReport>,
    stream: &'static str,
) -> Result<DrainReport, SupervisorError> {
    handle
        .join()
        .map_err(|_| SupervisorError::CollectorPanicked(stream))
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::metrics::{ExpositionKind, LabelIdentity};
    use tempfile::tempdir;

    const SUMMARY: &str = r#"{"message_type":"summary","files_new":2,"files_changed":1,"data_added":512,"total_duration":0.75,"snapshot_id":"cafe"}"#;
    const ERROR: &str = r#"{"message_type":"error","error":{"message":"permission denied"},"during":"archival","item":"/x"}"#;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn aggregator() -> Arc<Aggregator> {
        let identity = LabelIdentity::for_backup(&["/data".to_string()], "/srv/repo");
        Arc::new(Aggregator::new(identity, ExpositionKind::Gauge).unwrap())
    }

    #[test]
    fn test_run_writes_metrics_and_passthrough() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restic.prom");
        let writer = TextfileWriter::new(&path);
        let (out, err) = (Captured::default(), Captured::default());
        let script = format!(
            "echo 'open repository'; echo '{SUMMARY}'; echo '{ERROR}' >&2; echo '{ERROR}' >&2; echo 'warning: x' >&2; exit 3"
        );

        let outcome =
            run_with(&sh(&script), aggregator(), &writer, out.clone(), err.clone()).unwrap();

        assert_eq!(outcome.exit_code(), 3);
        assert!(outcome.exposition.is_ok());
        assert_eq!(outcome.stdout.summaries, 1);
        assert_eq!(outcome.stderr.errors, 2);
        assert_eq!(out.contents(), b"open repository\n");
        assert_eq!(err.contents(), b"warning: x\n");

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(r#"restic_backup_backup_files_new{dir_0="/data",repo="/srv/repo"} 2"#));
        assert!(text.contains(r#"restic_backup_error_count{dir_0="/data",repo="/srv/repo"} 2"#));
    }

    #[test]
    fn test_run_without_summary_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restic.prom");
        let writer = TextfileWriter::new(&path);

        let outcome = run_with(
            &sh("echo 'snapshots listed'; exit 0"),
            aggregator(),
            &writer,
            Captured::default(),
            Captured::default(),
        )
        .unwrap();

        assert_eq!(outcome.exit_code(), 0);
        assert!(matches!(outcome.exposition, Err(ExpositionError::NoSummary)));
        assert!(!path.exists());
    }

    #[test]
    fn test_output_after_child_exit_is_drained() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restic.prom");
        let writer = TextfileWriter::new(&path);
        // The shell exits right away; a background job keeps the pipes open
        // and writes the summary later.
        let script = format!("(sleep 0.3; echo '{SUMMARY}'; echo '{ERROR}' >&2) & exit 0");

        let outcome = run_with(
            &sh(&script),
            aggregator(),
            &writer,
            Captured::default(),
            Captured::default(),
        )
        .unwrap();

        assert!(outcome.exposition.is_ok());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(r#"restic_backup_error_count{dir_0="/data",repo="/srv/repo"} 1"#));
    }

    #[test]
    fn test_large_output_on_both_streams() {
        let dir = tempdir().unwrap();
        let writer = TextfileWriter::new(dir.path().join("restic.prom"));
        let (out, err) = (Captured::default(), Captured::default());
        let script = format!(
            "i=0; while [ $i -lt 5000 ]; do echo \"out $i\"; echo \"err $i\" >&2; i=$((i+1)); done; echo '{SUMMARY}'"
        );

        let outcome =
            run_with(&sh(&script), aggregator(), &writer, out.clone(), err.clone()).unwrap();

        assert!(outcome.exposition.is_ok());
        assert_eq!(outcome.stdout.passthrough, 5000);
        assert_eq!(outcome.stderr.passthrough, 5000);
        let out = String::from_utf8(out.contents()).unwrap();
        assert!(out.starts_with("out 0\nout 1\n"));
        assert!(out.ends_with("out 4999\n"));
    }

    #[test]
    fn test_signal_exit_code() {
        let dir = tempdir().unwrap();
        let writer = TextfileWriter::new(dir.path().join("restic.prom"));
        let outcome = run_with(
            &sh("kill -TERM $$"),
            aggregator(),
            &writer,
            Captured::default(),
            Captured::default(),
        )
        .unwrap();
        assert_eq!(outcome.exit_code(), 128 + 15);
    }

    #[test]
    fn test_spawn_failure() {
        let dir = tempdir().unwrap();
        let writer = TextfileWriter::new(dir.path().join("restic.prom"));
        let command = vec!["/nonexistent/restic".to_string(), "backup".to_string()];
        let err = run_with(
            &command,
            aggregator(),
            &writer,
            Captured::default(),
            Captured::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[test]
    fn test_empty_command() {
        let dir = tempdir().unwrap();
        let writer = TextfileWriter::new(dir.path().join("restic.prom"));
        let err = run_with(
            &[],
            aggregator(),
            &writer,
            Captured::default(),
            Captured::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SupervisorError::EmptyCommand));
    }
}
