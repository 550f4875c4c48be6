//! Scripted serial console sessions
//!
//! A [`ConsoleSession`] drives the text console of a probe VM the way an
//! operator would: type a line, then wait until one of a set of expected
//! patterns shows up in the output. Output is accumulated across reads until
//! a pattern matches or the wait's deadline passes.
//!
//! Every wait is bounded. Expiry is reported as a console timeout, a failing
//! or closed channel as a console connection error, so callers can tell a
//! slow guest from a broken one.

use crate::cluster::{ConsoleChannel, ControlPlane};
use crate::error::{AppError, Result};
use crate::logging::Logger;
use crate::models::{duration_str, ProbeVm};
use regex::Regex;
use std::time::Duration;
use tokio::time::Instant;

/// `login:` prompt of a getty
pub const LOGIN_PROMPT: &str = r"login:\s*$";
pub const PASSWORD_PROMPT: &str = r"[Pp]assword:\s*$";
/// Bash prompt such as `[fedora@probe ~]$ `
pub const SHELL_PROMPT: &str = r"\][$#] ?$";
pub const LOGIN_INCORRECT: &str = r"Login incorrect";

/// How much trailing output is quoted in error messages
const ERROR_TAIL_CHARS: usize = 200;

/// Compile one of the fixed console patterns
fn pattern(source: &str) -> Result<Regex> {
    Regex::new(source)
        .map_err(|e| AppError::internal(format!("invalid console pattern '{}': {}", source, e)))
}

/// Text matched by [`ConsoleSession::expect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    /// Index of the pattern that matched
    pub index: usize,
    /// All output consumed by this wait, up to and including the match
    pub output: String,
}

/// Output and exit status of one shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// An interactive session on one VM's serial console
pub struct ConsoleSession {
    channel: Box<dyn ConsoleChannel>,
    target: String,
    buffer: String,
    /// Trailing bytes of a UTF-8 sequence cut off by a frame boundary
    pending: Vec<u8>,
    logger: Logger,
    login_prompt: Regex,
    password_prompt: Regex,
    shell_prompt: Regex,
    login_incorrect: Regex,
    exit_status: Regex,
}

impl std::fmt::Debug for ConsoleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSession")
            .field("target", &self.target)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl ConsoleSession {
    /// Wrap an already open channel; `target` names the VM in errors
    pub fn new(channel: Box<dyn ConsoleChannel>, target: impl Into<String>, logger: Logger) -> Result<Self> {
        Ok(Self {
            channel,
            target: target.into(),
            buffer: String::new(),
            pending: Vec::new(),
            logger,
            login_prompt: pattern(LOGIN_PROMPT)?,
            password_prompt: pattern(PASSWORD_PROMPT)?,
            shell_prompt: pattern(SHELL_PROMPT)?,
            login_incorrect: pattern(LOGIN_INCORRECT)?,
            exit_status: pattern(r"(?m)^\s*(\d+)\s*$")?,
        })
    }

    /// Attach to the console of a probe VM
    pub async fn open(cluster: &dyn ControlPlane, vm: &ProbeVm, logger: &Logger) -> Result<Self> {
        let channel = cluster
            .open_console(&vm.namespace, &vm.name)
            .await
            .map_err(|e| {
                let message = format!("failed to open console of {}: {}", vm, e);
                if e.is_timeout() {
                    AppError::console_timeout(message)
                } else {
                    AppError::console_connection(message)
                }
            })?;
        Self::new(channel, vm.to_string(), logger.child("console"))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Type one line into the console
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.logger
            .trace("console input")
            .field("target", &self.target)
            .field("line", line)
            .log()
            .await;

        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.channel.send(&data).await.map_err(|e| {
            AppError::console_connection(format!("failed to write to console of {}: {}", self.target, e))
        })
    }

    /// Wait until one of `patterns` matches the accumulated output.
    ///
    /// When several patterns match, the one matching earliest in the output
    /// wins. `waiting_for` names what is being waited for in errors.
    pub async fn expect(&mut self, patterns: &[&Regex], timeout: Duration, waiting_for: &str) -> Result<Expected> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some((index, end)) = earliest_match(&self.buffer, patterns) {
                let output: String = self.buffer.drain(..end).collect();
                return Ok(Expected { index, output });
            }

            match tokio::time::timeout_at(deadline, self.channel.recv()).await {
                Err(_) => {
                    return Err(AppError::console_timeout(format!(
                        "timed out after {} waiting for {} on {}; last output: {:?}",
                        duration_str::format(timeout),
                        waiting_for,
                        self.target,
                        tail(&self.buffer, ERROR_TAIL_CHARS),
                    )));
                }
                Ok(Err(e)) => {
                    return Err(AppError::console_connection(format!(
                        "console of {} failed while waiting for {}: {}",
                        self.target, waiting_for, e
                    )));
                }
                Ok(Ok(None)) => {
                    return Err(AppError::console_connection(format!(
                        "console of {} closed while waiting for {}",
                        self.target, waiting_for
                    )));
                }
                Ok(Ok(Some(chunk))) => {
                    self.pending.extend_from_slice(&chunk);
                    let text = decode_complete(&mut self.pending);
                    self.logger
                        .trace("console output")
                        .field("target", &self.target)
                        .field("text", text.as_str())
                        .log()
                        .await;
                    self.buffer.push_str(&text);
                }
            }
        }
    }

    /// Log in and wait for a shell prompt.
    ///
    /// A console that already shows a shell prompt is accepted as logged in.
    pub async fn login(&mut self, user: &str, password: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let remaining = || deadline.saturating_duration_since(Instant::now());

        self.send_line("").await?;
        let login_prompt = self.login_prompt.clone();
        let shell_prompt = self.shell_prompt.clone();
        let first = self
            .expect(&[&login_prompt, &shell_prompt], remaining(), "a login prompt")
            .await?;
        if first.index == 1 {
            return Ok(());
        }

        self.send_line(user).await?;
        let password_prompt = self.password_prompt.clone();
        self.expect(&[&password_prompt], remaining(), "a password prompt").await?;

        self.send_line(password).await?;
        let login_incorrect = self.login_incorrect.clone();
        let outcome = self
            .expect(&[&shell_prompt, &login_incorrect], remaining(), "a shell prompt")
            .await?;
        if outcome.index == 1 {
            return Err(AppError::console_command(format!(
                "login as '{}' was rejected by {}",
                user, self.target
            )));
        }

        self.logger
            .debug("Logged in to console")
            .field("target", &self.target)
            .field("user", user)
            .log()
            .await;
        Ok(())
    }

    /// Run a command at the shell prompt and collect its output and exit status
    pub async fn run_command(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let shell_prompt = self.shell_prompt.clone();

        self.send_line(command).await?;
        let finished = self
            .expect(&[&shell_prompt], timeout, &format!("'{}' to finish", command))
            .await?;
        let output = command_output(&finished.output, command);

        self.send_line("echo $?").await?;
        let status_output = self
            .expect(&[&shell_prompt], timeout, &format!("the exit status of '{}'", command))
            .await?;
        let status = self
            .exit_status
            .captures(&command_output(&status_output.output, "echo $?"))
            .and_then(|captures| captures.get(1))
            .and_then(|m| m.as_str().parse::<i32>().ok())
            .ok_or_else(|| {
                AppError::console_command(format!(
                    "could not read the exit status of '{}' on {}",
                    command, self.target
                ))
            })?;

        self.logger
            .debug("Console command finished")
            .field("target", &self.target)
            .field("command", command)
            .field("status", status)
            .log()
            .await;

        Ok(CommandOutput { output, status })
    }

    /// Like [`ConsoleSession::run_command`], failing on a non-zero exit status
    pub async fn run_checked(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let result = self.run_command(command, timeout).await?;
        if !result.success() {
            return Err(AppError::console_command(format!(
                "'{}' exited with status {} on {}",
                command, result.status, self.target
            )));
        }
        Ok(result)
    }

    pub async fn close(mut self) -> Result<()> {
        self.channel.close().await.map_err(|e| {
            AppError::console_connection(format!("failed to close console of {}: {}", self.target, e))
        })
    }
}

/// Pattern index and end offset of the earliest match in `text`
fn earliest_match(text: &str, patterns: &[&Regex]) -> Option<(usize, usize)> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(index, re)| re.find(text).map(|m| (m.start(), index, m.end())))
        .min()
        .map(|(_, index, end)| (index, end))
}

/// Strip the echoed command line and the trailing prompt line from raw output
fn command_output(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.split('\n').map(|line| line.trim_end_matches('\r')).collect();

    // Final line is the prompt
    lines.pop();
    if let Some(position) = lines.iter().position(|line| line.trim_end().ends_with(command.trim())) {
        lines.drain(..=position);
    }
    lines.join("\n")
}

/// Decode the complete characters at the front of `bytes`, leaving an
/// unfinished trailing sequence behind for the next read. Invalid bytes
/// become U+FFFD.
fn decode_complete(bytes: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                start = bytes.len();
                break;
            }
            Err(error) => {
                let valid_end = start + error.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&bytes[start..valid_end]));
                match error.error_len() {
                    Some(invalid) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + invalid;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }
    bytes.drain(..start);
    text
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((offset, _)) => &text[offset..],
        None => text,
    }
}
