use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// A registered unit of work: an id, a cron schedule, default parameters,
/// and the code to run. Immutable after registration.
///
/// Cron expressions use six fields with seconds:
/// `sec min hour day-of-month month day-of-week`.
#[async_trait]
pub trait Command: Send + Sync {
    fn id(&self) -> &str;
    fn description(&self) -> &str;
    fn cron_expression(&self) -> &str;
    fn default_params(&self) -> Vec<String>;
    async fn execute(&self, params: &[String]) -> Result<()>;
}

/// A command together with its schedule, parsed once at registration.
pub struct RegisteredCommand {
    pub command: Arc<dyn Command>,
    pub schedule: cron::Schedule,
}

/// Process-lifetime set of commands the scheduler knows about.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in command set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for command in builtin_commands() {
            // Built-in expressions are statically known to parse.
            registry
                .register(command)
                .expect("built-in command has a valid cron expression");
        }
        registry
    }

    /// Register a command, validating its cron expression up front so a bad
    /// schedule fails at startup rather than on the first materializer tick.
    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<()> {
        let expr = command.cron_expression();
        let schedule =
            cron::Schedule::from_str(expr).map_err(|e| Error::InvalidCronExpression {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        self.commands.insert(
            command.id().to_string(),
            RegisteredCommand { command, schedule },
        );
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredCommand> {
        self.commands.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredCommand> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Command id -> description, used for the startup banner.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .commands
            .values()
            .map(|r| {
                (
                    r.command.id().to_string(),
                    r.command.description().to_string(),
                )
            })
            .collect();
        out.sort();
        out
    }
}

/// All built-in commands with their production schedules.
pub fn builtin_commands() -> Vec<Arc<dyn Command>> {
    vec![
        Arc::new(EchoCommand),
        Arc::new(ShellCommand),
        Arc::new(ListFilesCommand),
        Arc::new(DiskUsageCommand),
        Arc::new(PingCommand),
    ]
}

/// Run a process to completion, capturing combined diagnostics on failure.
async fn run_process(bin: &str, args: &[String]) -> Result<String> {
    let output = tokio::process::Command::new(bin)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::CommandFailed(format!(
            "{bin} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ── built-in commands ─────────────────────────────────────────────────────────

/// Echo a message to stdout. Doubles as the fleet's heartbeat job.
pub struct EchoCommand;

#[async_trait]
impl Command for EchoCommand {
    fn id(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo a message to stdout"
    }

    fn cron_expression(&self) -> &str {
        "*/5 * * * * *"
    }

    fn default_params(&self) -> Vec<String> {
        vec!["Heartbeat check".to_string()]
    }

    async fn execute(&self, params: &[String]) -> Result<()> {
        println!("{}", params.join(" "));
        Ok(())
    }
}

/// Execute an arbitrary shell command line.
pub struct ShellCommand;

#[async_trait]
impl Command for ShellCommand {
    fn id(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command"
    }

    fn cron_expression(&self) -> &str {
        "0 */30 * * * *"
    }

    fn default_params(&self) -> Vec<String> {
        vec!["df -h".to_string()]
    }

    async fn execute(&self, params: &[String]) -> Result<()> {
        let line = params.join(" ");
        let output = run_process("sh", &["-c".to_string(), line]).await?;
        print!("{output}");
        Ok(())
    }
}

/// List files in a directory.
pub struct ListFilesCommand;

#[async_trait]
impl Command for ListFilesCommand {
    fn id(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List files in a directory"
    }

    fn cron_expression(&self) -> &str {
        "0 * * * * *"
    }

    fn default_params(&self) -> Vec<String> {
        vec![".".to_string()]
    }

    async fn execute(&self, params: &[String]) -> Result<()> {
        let dir = params.first().map(String::as_str).unwrap_or(".");
        let output = run_process("ls", &["-la".to_string(), dir.to_string()]).await?;
        print!("{output}");
        Ok(())
    }
}

/// Report disk usage for a path.
pub struct DiskUsageCommand;

#[async_trait]
impl Command for DiskUsageCommand {
    fn id(&self) -> &str {
        "du"
    }

    fn description(&self) -> &str {
        "Show disk usage for a path"
    }

    fn cron_expression(&self) -> &str {
        "0 */5 * * * *"
    }

    fn default_params(&self) -> Vec<String> {
        vec!["/".to_string()]
    }

    async fn execute(&self, params: &[String]) -> Result<()> {
        let path = params.first().map(String::as_str).unwrap_or(".");
        let output = run_process("du", &["-sh".to_string(), path.to_string()]).await?;
        print!("{output}");
        Ok(())
    }
}

/// Ping a host. Params: host, count, interval seconds.
pub struct PingCommand;

#[async_trait]
impl Command for PingCommand {
    fn id(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Ping a host with specified count and interval"
    }

    fn cron_expression(&self) -> &str {
        "0 */10 * * * *"
    }

    fn default_params(&self) -> Vec<String> {
        vec![
            "google.com".to_string(),
            "4".to_string(),
            "1.0".to_string(),
        ]
    }

    async fn execute(&self, params: &[String]) -> Result<()> {
        let host = params.first().map(String::as_str).unwrap_or("localhost");
        let count: u32 = params.get(1).and_then(|s| s.parse().ok()).unwrap_or(4);
        let interval: f64 = params.get(2).and_then(|s| s.parse().ok()).unwrap_or(1.0);
        let output = run_process(
            "ping",
            &[
                "-c".to_string(),
                count.to_string(),
                "-i".to_string(),
                interval.to_string(),
                host.to_string(),
            ],
        )
        .await?;
        print!("{output}");
        Ok(())
    }
}
