//! Host-side shell command wrappers.
//!
//! Thin parsers over `cmd <service> <subcommand> [args...]`-style
//! invocations and the user lifecycle commands. Output contracts are
//! strict: boolean settings must be the literal strings `"true"`/`"false"`,
//! and unrecognized output is a hard error, never a silently-defaulted
//! value.

use std::process::{Command, Output};

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Runs an external command. The system implementation shells out; tests
/// substitute a scripted fake.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output>;
}

/// Real command execution via `std::process::Command`.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
        Command::new(program).args(args).output()
    }
}

/// Shell-command surface over a [`CommandRunner`].
pub struct ServiceShell<R> {
    runner: R,
}

impl ServiceShell<SystemRunner> {
    pub fn system() -> Self {
        Self {
            runner: SystemRunner,
        }
    }
}

impl<R: CommandRunner> ServiceShell<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Invoke `cmd <service> <subcommand> [args...]` and return raw stdout.
    pub fn service_command(
        &self,
        service: &str,
        subcommand: &str,
        args: &[&str],
    ) -> Result<Vec<u8>, ShellError> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 2);
        full.push(service);
        full.push(subcommand);
        full.extend_from_slice(args);
        self.run_checked("cmd", &full)
    }

    /// Like [`service_command`](Self::service_command), but the output must
    /// be valid UTF-8; trailing whitespace is trimmed.
    pub fn service_command_text(
        &self,
        service: &str,
        subcommand: &str,
        args: &[&str],
    ) -> Result<String, ShellError> {
        let stdout = self.service_command(service, subcommand, args)?;
        let command = render_command(service, subcommand, args);
        let text = String::from_utf8(stdout).map_err(|_| ShellError::UnexpectedOutput {
            command: command.clone(),
            output: "<non-UTF-8 output>".to_string(),
        })?;
        Ok(text.trim_end().to_string())
    }

    /// Read a boolean setting. Anything but the literal `"true"`/`"false"`
    /// is an error.
    pub fn read_bool(
        &self,
        service: &str,
        subcommand: &str,
        args: &[&str],
    ) -> Result<bool, ShellError> {
        let text = self.service_command_text(service, subcommand, args)?;
        match text.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(ShellError::UnexpectedOutput {
                command: render_command(service, subcommand, args),
                output: other.to_string(),
            }),
        }
    }

    /// Toggle a boolean setting and verify the service echoes it back.
    pub fn set_bool(
        &self,
        service: &str,
        setting: &str,
        value: bool,
    ) -> Result<(), ShellError> {
        let rendered = if value { "true" } else { "false" };
        self.service_command(service, "set", &[setting, rendered])?;
        Ok(())
    }

    /// Dump service state as a raw binary blob.
    pub fn dump_state(&self, service: &str) -> Result<Vec<u8>, ShellError> {
        self.service_command(service, "dump", &[])
    }

    /// Create a user and parse the new user id out of the success line,
    /// e.g. `Success: created user id 10`.
    pub fn create_user(&self, name: &str) -> Result<u32, ShellError> {
        let output = self.run_checked("pm", &["create-user", name])?;
        let command = format!("pm create-user {name}");
        let text = String::from_utf8_lossy(&output);
        let Some((_, tail)) = text.split_once(" id ") else {
            return Err(ShellError::UnexpectedOutput {
                command,
                output: text.trim_end().to_string(),
            });
        };
        tail.trim()
            .parse()
            .map_err(|_| ShellError::UnexpectedOutput {
                command,
                output: text.trim_end().to_string(),
            })
    }

    pub fn start_user(&self, user_id: u32) -> Result<(), ShellError> {
        self.run_checked("am", &["start-user", &user_id.to_string()])?;
        Ok(())
    }

    pub fn remove_user(&self, user_id: u32) -> Result<(), ShellError> {
        self.run_checked("pm", &["remove-user", &user_id.to_string()])?;
        Ok(())
    }

    fn run_checked(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ShellError> {
        let output = self.runner.run(program, args)?;
        if !output.status.success() {
            return Err(ShellError::CommandFailed {
                command: format!("{program} {}", args.join(" ")),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

fn render_command(service: &str, subcommand: &str, args: &[&str]) -> String {
    let mut out = format!("cmd {service} {subcommand}");
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ShellError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{command}` exited with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` produced unexpected output: {output:?}")]
    UnexpectedOutput { command: String, output: String },
}

impl ShellError {
    pub fn code(&self) -> &'static str {
        match self {
            ShellError::Io(_) => "io_error",
            ShellError::CommandFailed { .. } => "command_failed",
            ShellError::UnexpectedOutput { .. } => "unexpected_output",
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            ShellError::Io(_) => Transience::Retryable,
            ShellError::CommandFailed { .. } => Transience::Unknown,
            ShellError::UnexpectedOutput { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ShellError::Io(_) => Effect::None,
            ShellError::CommandFailed { .. } => Effect::Unknown,
            // The command ran and printed; whatever it did, it did.
            ShellError::UnexpectedOutput { .. } => Effect::Some,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::ScriptedRunner;

    #[test]
    fn read_bool_accepts_only_literals() {
        let runner = ScriptedRunner::new();
        runner.push_success("true\n");
        runner.push_success("false");
        runner.push_success("enabled");

        let shell = ServiceShell::new(runner);
        assert!(shell.read_bool("device_policy", "get", &["admin"]).unwrap());
        assert!(!shell.read_bool("device_policy", "get", &["admin"]).unwrap());
        let err = shell.read_bool("device_policy", "get", &["admin"]).unwrap_err();
        assert!(matches!(err, ShellError::UnexpectedOutput { .. }));
    }

    #[test]
    fn service_command_records_invocation_shape() {
        let runner = ScriptedRunner::new();
        runner.push_success("");
        let shell = ServiceShell::new(runner);
        shell
            .service_command("time_detector", "is_auto_enabled", &["--user", "0"])
            .unwrap();
        assert_eq!(
            shell.runner.calls(),
            vec!["cmd time_detector is_auto_enabled --user 0"]
        );
    }

    #[test]
    fn create_user_slices_on_id_marker() {
        let runner = ScriptedRunner::new();
        runner.push_success("Success: created user id 12\n");
        let shell = ServiceShell::new(runner);
        assert_eq!(shell.create_user("tether-test").unwrap(), 12);
    }

    #[test]
    fn create_user_rejects_unparseable_output() {
        let runner = ScriptedRunner::new();
        runner.push_success("Error: couldn't create user\n");
        let shell = ServiceShell::new(runner);
        let err = shell.create_user("tether-test").unwrap_err();
        assert!(matches!(err, ShellError::UnexpectedOutput { .. }));
    }

    #[test]
    fn nonzero_exit_is_a_command_failure() {
        let runner = ScriptedRunner::new();
        runner.push_failure(1, "Security exception: shell does not own the profile\n");
        let shell = ServiceShell::new(runner);
        let err = shell.dump_state("input_method").unwrap_err();
        match err {
            ShellError::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, Some(1));
                assert!(stderr.contains("Security exception"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn dump_state_returns_raw_bytes() {
        let runner = ScriptedRunner::new();
        runner.push_success_bytes(vec![0x08, 0x01, 0xff]);
        let shell = ServiceShell::new(runner);
        assert_eq!(shell.dump_state("location").unwrap(), vec![0x08, 0x01, 0xff]);
    }
}
