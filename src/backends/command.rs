//! Local speech engine run as a subprocess.
//!
//! Covers the offline tier: `espeak-ng --stdout`, `piper --output_raw`,
//! `say -o /dev/stdout`, or anything else that writes encoded audio to
//! stdout. Arguments may contain `{text}`, `{voice}` and `{speed}`
//! placeholders; when none of them mentions `{text}` the text is written to
//! the child's stdin instead.
//!
//! Text passed as an argument is preceded by a `--` separator (unless the
//! template already has one), so input such as "-5 degrees" or "--help" is
//! never parsed as engine options. Options therefore belong before the
//! `{text}` argument.

use std::path::{MAIN_SEPARATOR, Path};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::SpeechBackend;
use crate::types::SynthesisRequest;
use crate::{Result, SkaldError};

/// A local engine invoked once per request.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandBackend {
    /// Create a backend that runs `program` with no arguments.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Set the argument template.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the text is fed through stdin.
    pub fn uses_stdin(&self) -> bool {
        !self.args.iter().any(|a| a.contains("{text}"))
    }

    fn render_args(&self, request: &SynthesisRequest) -> Vec<String> {
        let speed = format!("{:.2}", request.settings().speed);
        let mut rendered = Vec::with_capacity(self.args.len() + 1);
        let mut separated = false;
        for arg in &self.args {
            if arg == "--" {
                separated = true;
            } else if !separated && arg.starts_with("{text}") {
                rendered.push("--".to_string());
                separated = true;
            }
            rendered.push(
                arg.replace("{text}", request.text())
                    .replace("{voice}", request.voice_id())
                    .replace("{speed}", &speed),
            );
        }
        rendered
    }
}

#[async_trait]
impl SpeechBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let stdin = self.uses_stdin();
        cmd.stdin(if stdin { Stdio::piped() } else { Stdio::null() });

        debug!(backend = %self.name, program = %self.program, stdin, "spawning speech engine");
        let mut child = cmd
            .spawn()
            .map_err(|e| SkaldError::Process(format!("failed to start {}: {e}", self.program)))?;

        let input = child.stdin.take();
        let text = request.text().as_bytes();
        let feed = async move {
            if let Some(mut input) = input {
                input.write_all(text).await?;
                input.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SkaldError::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        // A broken pipe is fine if the engine exited cleanly without reading
        // everything; any other write error is not.
        if let Err(e) = fed
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }
        if output.stdout.is_empty() {
            return Err(SkaldError::EmptyAudio);
        }
        Ok(output.stdout)
    }

    async fn is_reachable(&self) -> bool {
        resolve_program(&self.program)
    }
}

/// Whether `program` is an existing path or resolves on `PATH`.
fn resolve_program(program: &str) -> bool {
    if program.contains(MAIN_SEPARATOR) {
        return Path::new(program).exists();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
