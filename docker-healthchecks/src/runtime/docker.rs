//! Docker CLI backed container runtime.
//!
//! State queries and listings run a short-lived `docker` process and parse
//! its output. Event feeds keep a `docker events` process alive for as long
//! as the returned stream exists; dropping the stream kills the process.

use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ContainerRuntime, DiscoveryStream, EventStream, RuntimeError};
use crate::domain::{DiscoveredUnit, EventFilter, EventKind, EventRecord, UnitState};

/// Format of a single event line: `<id> <status>`.
const EVENT_FORMAT: &str = "{{.ID}} {{.Status}}";

/// Default limit for state queries and listings.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Time an ended feed gets to exit before it is killed.
const FEED_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Health value Docker omits when a health object exists without a status.
const MISSING_HEALTH_STATUS: &str = "unhealthy";

/// `docker inspect --format {{json .State}}` output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    paused: bool,
    #[serde(default)]
    restarting: bool,
    #[serde(default)]
    dead: bool,
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    status: Option<String>,
}

impl From<InspectState> for UnitState {
    fn from(state: InspectState) -> Self {
        Self {
            running: state.running,
            paused: state.paused,
            restarting: state.restarting,
            dead: state.dead,
            health: state.health.map(|health| {
                health
                    .status
                    .unwrap_or_else(|| MISSING_HEALTH_STATUS.to_string())
            }),
        }
    }
}

/// Container runtime driven through the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary_path: String,
    command_timeout: Duration,
}

impl DockerCli {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Limit how long a state query or listing may run.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn describe(&self, args: &[String]) -> String {
        process_utils::command_line(&self.binary_path, args)
    }

    /// Run a command to completion and return its trimmed stdout.
    ///
    /// A command still running after the timeout is killed.
    async fn output(&self, args: &[String]) -> Result<String, RuntimeError> {
        let mut cmd = process_utils::tokio_command(&self.binary_path, args);
        let out = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| RuntimeError::Spawn {
                command: self.describe(args),
                source,
            })?,
            Err(_) => {
                return Err(RuntimeError::CommandFailed {
                    command: self.describe(args),
                    message: format!("timed out after {:?}", self.command_timeout),
                });
            }
        };

        if !out.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: self.describe(args),
                message: process_utils::output_text(&out.stderr),
            });
        }

        Ok(process_utils::output_text(&out.stdout))
    }

    /// Spawn a long-running command and stream its non-empty stdout lines.
    fn stream_lines(&self, args: Vec<String>) -> Result<BoxStream<'static, String>, RuntimeError> {
        let command = self.describe(&args);
        let mut child = process_utils::tokio_command(&self.binary_path, &args)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RuntimeError::CommandFailed {
                command,
                message: "output was not captured".to_string(),
            });
        };

        debug!(command = %command, "Spawned event feed");

        let feed = Feed {
            child,
            lines: BufReader::new(stdout).lines(),
            stderr: tokio::spawn(last_stderr_line(stderr)),
            command,
        };
        let stream = futures::stream::unfold(feed, |mut feed| async move {
            loop {
                match feed.lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => return Some((line, feed)),
                    Ok(None) => {
                        feed.finish().await;
                        return None;
                    }
                    Err(e) => {
                        warn!(command = %feed.command, error = %e, "Failed to read event feed");
                        feed.finish().await;
                        return None;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// A running event feed process.
///
/// The child lives exactly as long as the stream holding this state.
struct Feed {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: JoinHandle<String>,
    command: String,
}

impl Feed {
    /// Reap the process and log why the feed ended.
    async fn finish(mut self) {
        let status = match tokio::time::timeout(FEED_EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(command = %self.command, error = %e, "Failed to wait for event feed");
                None
            }
            Err(_) => {
                let _ = self.child.kill().await;
                None
            }
        };
        let stderr = tokio::time::timeout(FEED_EXIT_GRACE, self.stderr)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();

        match feed_end_reason(status, &stderr) {
            Some(reason) => warn!(command = %self.command, reason = %reason, "Event feed ended"),
            None => debug!(command = %self.command, "Event feed closed"),
        }
    }
}

/// Drain stderr so the child never blocks on it, keeping the last non-empty line.
async fn last_stderr_line(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            last = line.trim().to_string();
        }
    }
    last
}

/// Describe an abnormal feed exit. A clean exit with nothing on stderr has no reason.
fn feed_end_reason(status: Option<ExitStatus>, stderr: &str) -> Option<String> {
    let status = match status {
        Some(status) if status.success() => None,
        Some(status) => Some(status.to_string()),
        None => Some("killed after not exiting".to_string()),
    };
    match (status, stderr.is_empty()) {
        (None, true) => None,
        (None, false) => Some(stderr.to_string()),
        (Some(status), true) => Some(status),
        (Some(status), false) => Some(format!("{status}: {stderr}")),
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn inspect_state(&self, id: &str) -> Result<UnitState, RuntimeError> {
        let args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            "--format".to_string(),
            "{{json .State}}".to_string(),
            id.to_string(),
        ];

        match self.output(&args).await {
            Ok(stdout) => parse_inspect_state(&stdout),
            Err(RuntimeError::CommandFailed { message, .. }) if is_not_found_message(&message) => {
                Err(RuntimeError::NotFound(id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn subscribe_events(&self, filter: &EventFilter) -> Result<EventStream, RuntimeError> {
        let args = event_args(filter);
        let filter = filter.clone();
        let stream = self.stream_lines(args)?.filter_map(move |line| {
            let record = match parse_event_line(&line) {
                Some(record) if filter.matches(&record) => Some(record),
                Some(record) => {
                    debug!(kind = %record.kind, "Dropping unrequested event");
                    None
                }
                None => {
                    warn!(line = %line, "Ignoring malformed event line");
                    None
                }
            };
            futures::future::ready(record)
        });
        Ok(stream.boxed())
    }

    async fn list_units(&self, label: &str) -> Result<Vec<DiscoveredUnit>, RuntimeError> {
        let args = vec![
            "ps".to_string(),
            "--all".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("label={label}"),
            "--format".to_string(),
            format!("{{{{.ID}}}} {{{{.Label \"{label}\"}}}}"),
        ];

        let stdout = self.output(&args).await?;
        let mut units = Vec::new();
        for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
            match parse_unit_line(line) {
                Some(unit) => units.push(unit),
                None => warn!(line = %line, "Ignoring malformed container listing"),
            }
        }
        Ok(units)
    }

    async fn subscribe_creations(&self, label: &str) -> Result<DiscoveryStream, RuntimeError> {
        let args = vec![
            "events".to_string(),
            "--filter".to_string(),
            "type=container".to_string(),
            "--filter".to_string(),
            format!("event={}", EventKind::Create),
            "--filter".to_string(),
            format!("label={label}"),
            "--format".to_string(),
            format!("{{{{.ID}}}} {{{{index .Actor.Attributes \"{label}\"}}}}"),
        ];

        let stream = self.stream_lines(args)?.filter_map(|line| {
            let unit = parse_unit_line(&line);
            if unit.is_none() {
                warn!(line = %line, "Ignoring malformed creation event");
            }
            futures::future::ready(unit)
        });
        Ok(stream.boxed())
    }
}

/// Build `docker events` arguments for `filter`.
fn event_args(filter: &EventFilter) -> Vec<String> {
    let mut args = vec![
        "events".to_string(),
        "--filter".to_string(),
        "type=container".to_string(),
    ];
    for kind in &filter.kinds {
        args.push("--filter".to_string());
        args.push(format!("event={kind}"));
    }
    if let Some(ref id) = filter.unit_id {
        args.push("--filter".to_string());
        args.push(format!("container={id}"));
    }
    args.push("--format".to_string());
    args.push(EVENT_FORMAT.to_string());
    args
}

fn parse_inspect_state(stdout: &str) -> Result<UnitState, RuntimeError> {
    serde_json::from_str::<InspectState>(stdout)
        .map(UnitState::from)
        .map_err(|e| RuntimeError::Parse(format!("invalid container state: {e}")))
}

fn parse_event_line(line: &str) -> Option<EventRecord> {
    let (id, status) = line.trim().split_once(' ')?;
    if id.is_empty() || status.trim().is_empty() {
        return None;
    }
    Some(EventRecord::new(id, EventKind::parse(status)))
}

/// Parse `<id> <url>`. Lines without a label value are rejected.
fn parse_unit_line(line: &str) -> Option<DiscoveredUnit> {
    let mut parts = line.split_whitespace();
    let id = parts.next()?;
    let url = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(DiscoveredUnit::new(id, url))
}

fn is_not_found_message(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such object") || stderr.contains("no such container")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inspect_state_without_health() {
        let state = parse_inspect_state(
            r#"{"Status":"running","Running":true,"Paused":false,"Restarting":false,"OOMKilled":false,"Dead":false,"Pid":42}"#,
        )
        .unwrap();
        assert_eq!(state, UnitState::running());
    }

    #[test]
    fn test_parse_inspect_state_with_health() {
        let state = parse_inspect_state(
            r#"{"Running":true,"Paused":false,"Restarting":false,"Dead":false,"Health":{"Status":"starting","FailingStreak":0,"Log":[]}}"#,
        )
        .unwrap();
        assert_eq!(state.health.as_deref(), Some("starting"));
    }

    #[test]
    fn test_parse_inspect_state_health_without_status() {
        let state =
            parse_inspect_state(r#"{"Running":true,"Health":{"FailingStreak":3}}"#).unwrap();
        assert_eq!(state.health.as_deref(), Some("unhealthy"));
    }

    #[test]
    fn test_parse_inspect_state_invalid() {
        let err = parse_inspect_state("not json").unwrap_err();
        assert!(matches!(err, RuntimeError::Parse(_)));
    }

    #[test]
    fn test_parse_event_line() {
        let record = parse_event_line("4f1c2a9d8e7b health_status: healthy").unwrap();
        assert_eq!(record.unit_id, "4f1c2a9d8e7b");
        assert_eq!(record.kind, EventKind::HealthStatus);

        assert_eq!(
            parse_event_line("4f1c2a9d8e7b destroy").unwrap().kind,
            EventKind::Destroy
        );
        assert!(parse_event_line("4f1c2a9d8e7b").is_none());
    }

    #[test]
    fn test_parse_unit_line() {
        let unit = parse_unit_line("4f1c2a9d8e7b https://hc-ping.com/abc").unwrap();
        assert_eq!(unit, DiscoveredUnit::new("4f1c2a9d8e7b", "https://hc-ping.com/abc"));
        assert!(parse_unit_line("4f1c2a9d8e7b").is_none());
        assert!(parse_unit_line("4f1c2a9d8e7b a b").is_none());
    }

    #[test]
    fn test_not_found_message() {
        assert!(is_not_found_message("Error: No such container: abc"));
        assert!(is_not_found_message("Error: No such object: abc"));
        assert!(!is_not_found_message(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock"
        ));
    }

    #[test]
    fn test_event_args_for_unit() {
        let args = event_args(&EventFilter::for_unit("abc"));
        assert_eq!(args[0], "events");
        assert!(args.contains(&"event=destroy".to_string()));
        assert!(args.contains(&"event=health_status".to_string()));
        assert!(args.contains(&"container=abc".to_string()));
        assert!(!args.iter().any(|arg| arg.starts_with("label=")));
        assert_eq!(args.last().map(String::as_str), Some(EVENT_FORMAT));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let docker = DockerCli::new("sleep").with_command_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = docker.output(&["30".to_string()]).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            RuntimeError::CommandFailed { command, message } => {
                assert_eq!(command, "sleep 30");
                assert!(message.contains("timed out"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_feed_ends_after_its_output() {
        let docker = DockerCli::new("sh");
        let lines: Vec<String> = docker
            .stream_lines(vec![
                "-c".to_string(),
                "echo abc; echo 'permission denied' >&2; exit 3".to_string(),
            ])
            .unwrap()
            .collect()
            .await;
        assert_eq!(lines, vec!["abc".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_feed_end_reason() {
        use std::os::unix::process::ExitStatusExt;

        let clean = ExitStatus::from_raw(0);
        let failed = ExitStatus::from_raw(3 << 8);

        assert_eq!(feed_end_reason(Some(clean), ""), None);
        assert_eq!(
            feed_end_reason(Some(clean), "warning").as_deref(),
            Some("warning")
        );
        assert_eq!(
            feed_end_reason(Some(failed), "permission denied").as_deref(),
            Some("exit status: 3: permission denied")
        );
        assert_eq!(
            feed_end_reason(None, "").as_deref(),
            Some("killed after not exiting")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let docker = DockerCli::new("/nonexistent/docker-binary");
        let err = docker.inspect_state("abc").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));

        let err = docker
            .subscribe_events(&EventFilter::for_unit("abc"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }
}
