//! Interactive prompting.

use async_trait::async_trait;
use console::Term;
use is_terminal::IsTerminal;
use std::io::{self, BufRead};

/// Source of operator input.
///
/// Implementations may block for as long as the operator takes; callers
/// race them against a cancellation token.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Show `prompt` and read a line without echo.
    ///
    /// End of input or an interrupted read should surface as
    /// `UnexpectedEof` / `Interrupted`, which callers treat as an abort.
    async fn read_secret(&self, prompt: &str) -> io::Result<String>;

    /// Show a line of text to the operator.
    fn notice(&self, message: &str);
}

/// Prompts on the controlling terminal, reading from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    /// Create a new terminal prompter
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn read_secret(&self, prompt: &str) -> io::Result<String> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            let term = Term::stderr();
            term.write_str(&prompt)?;

            if io::stdin().is_terminal() {
                let line = term.read_secure_line()?;
                return Ok(line);
            }

            // Piped input: plain line read, EOF is an abort
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line)? == 0 {
                term.write_line("")?;
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of input"));
            }
            term.write_line("")?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Interrupted, e))?
    }

    fn notice(&self, message: &str) {
        let _ = Term::stderr().write_line(message);
    }
}
