//! External process control: service stop/start commands and the ZooKeeper CLI

use crate::config::{ControlConfig, ZooKeeperConfig};
use crate::error::{Error, Result};
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Placeholder substituted with the service name in command templates
const SERVICE_PLACEHOLDER: &str = "{service}";

/// Control action issued against a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Stop,
    Start,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Stop => "stop",
            ControlAction::Start => "start",
        }
    }
}

/// Captured result of an external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs the configured stop/start commands for services
#[derive(Debug, Clone)]
pub struct ServiceControl {
    stop: Vec<String>,
    start: Vec<String>,
    timeout: Duration,
}

impl ServiceControl {
    /// Build from shell-word templates such as `sv down {service}`
    pub fn new(stop: &str, start: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            stop: split_template("stop", stop)?,
            start: split_template("start", start)?,
            timeout,
        })
    }

    pub fn from_config(config: &ControlConfig) -> Result<Self> {
        Self::new(&config.stop, &config.start, config.timeout())
    }

    /// Argument vector for `action` on `service`
    pub fn argv(&self, action: ControlAction, service: &str) -> Vec<String> {
        let template = match action {
            ControlAction::Stop => &self.stop,
            ControlAction::Start => &self.start,
        };
        template
            .iter()
            .map(|word| word.replace(SERVICE_PLACEHOLDER, service))
            .collect()
    }

    pub async fn stop(&self, service: &str) -> Result<CommandOutput> {
        self.run(ControlAction::Stop, service).await
    }

    pub async fn start(&self, service: &str) -> Result<CommandOutput> {
        self.run(ControlAction::Start, service).await
    }

    pub async fn run(&self, action: ControlAction, service: &str) -> Result<CommandOutput> {
        let argv = self.argv(action, service);
        info!(service, action = action.as_str(), command = %argv.join(" "), "Issuing control command");
        run_command(&argv, self.timeout).await
    }
}

/// Wrapper around `zkCli.sh` from the configured ZooKeeper install
#[derive(Debug, Clone)]
pub struct ZooKeeperCli {
    script: PathBuf,
    timeout: Duration,
}

impl ZooKeeperCli {
    pub fn new(script: PathBuf, timeout: Duration) -> Self {
        Self { script, timeout }
    }

    pub fn from_config(config: &ZooKeeperConfig, timeout: Duration) -> Self {
        Self::new(config.cli_script(), timeout)
    }

    pub fn script(&self) -> &PathBuf {
        &self.script
    }

    /// Run `zkCli.sh <command>`, e.g. `ls /nerve/services/web/services`
    pub async fn run(&self, command: &str) -> Result<CommandOutput> {
        let words = shell_words::split(command).map_err(|e| Error::Command {
            command: command.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;

        let mut argv = Vec::with_capacity(words.len() + 1);
        argv.push(self.script.to_string_lossy().into_owned());
        argv.extend(words);

        run_command(&argv, self.timeout).await
    }
}

fn split_template(key: &str, template: &str) -> Result<Vec<String>> {
    let words = shell_words::split(template)
        .map_err(|e| Error::Config(format!("'{}' command is invalid: {}", key, e)))?;
    if words.is_empty() {
        return Err(Error::Config(format!("'{}' command is empty", key)));
    }
    Ok(words)
}

/// Spawn `argv`, wait for it to exit and capture its output
async fn run_command(argv: &[String], timeout: Duration) -> Result<CommandOutput> {
    let command_line = argv.join(" ");
    let (program, args) = argv.split_first().ok_or_else(|| Error::Command {
        command: command_line.clone(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| Error::Command {
        command: command_line.clone(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(Error::Command {
                command: command_line,
                source,
            })
        }
        Err(_) => {
            return Err(Error::Command {
                command: command_line,
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("did not exit within {}s", timeout.as_secs()),
                ),
            })
        }
    };

    debug!(command = %command_line, status = %output.status, "Command finished");

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_substitutes_service() {
        let control = ServiceControl::new(
            "sv down {service}",
            "sh -c 'sv up {service} && echo started'",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(control.argv(ControlAction::Stop, "nerve"), vec!["sv", "down", "nerve"]);
        assert_eq!(
            control.argv(ControlAction::Start, "synapse"),
            vec!["sh", "-c", "sv up synapse && echo started"]
        );
    }

    #[test]
    fn test_invalid_templates() {
        assert!(matches!(
            ServiceControl::new("", "sv up {service}", Duration::from_secs(1)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ServiceControl::new("sv down {service}", "sv 'up", Duration::from_secs(1)),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let control = ServiceControl::new(
            "echo stopping {service}",
            "sh -c 'echo {service} >&2; exit 3'",
            Duration::from_secs(5),
        )
        .unwrap();

        let out = control.stop("web").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "stopping web");

        let out = control.start("web").await.unwrap();
        assert!(!out.success());
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stderr.trim(), "web");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let control = ServiceControl::new(
            "/nonexistent/sv down {service}",
            "true",
            Duration::from_secs(5),
        )
        .unwrap();

        let err = control.stop("web").await.unwrap_err();
        match err {
            Error::Command { ref command, .. } => assert_eq!(command, "/nonexistent/sv down web"),
            ref other => panic!("expected Command error, got {:?}", other),
        }
        assert!(err.to_string().contains("'/nonexistent/sv down web'"));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let control = ServiceControl::new("sleep 5", "true", Duration::from_millis(100)).unwrap();

        let start = std::time::Instant::now();
        let err = control.stop("web").await.unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(2));
        match err {
            Error::Command { source, .. } => assert_eq!(source.kind(), io::ErrorKind::TimedOut),
            other => panic!("expected Command error, got {:?}", other),
        }
    }

    #[test]
    fn test_zookeeper_cli_script_path() {
        let config = ZooKeeperConfig {
            home: PathBuf::from("/opt/zk"),
            version: "3.4.5".to_string(),
            smartstack_cluster: Vec::new(),
        };
        let cli = ZooKeeperCli::from_config(&config, Duration::from_secs(5));
        assert_eq!(cli.script(), &PathBuf::from("/opt/zk/zookeeper-3.4.5/bin/zkCli.sh"));
    }

    #[tokio::test]
    async fn test_zookeeper_cli_passes_command_words() {
        let cli = ZooKeeperCli::new(PathBuf::from("echo"), Duration::from_secs(5));

        let out = cli.run("ls '/nerve/services/web/services'").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "ls /nerve/services/web/services");
    }

    #[tokio::test]
    async fn test_zookeeper_cli_rejects_unbalanced_quotes() {
        let cli = ZooKeeperCli::new(PathBuf::from("echo"), Duration::from_secs(5));
        assert!(matches!(cli.run("get '/nerve").await, Err(Error::Command { .. })));
    }
}
