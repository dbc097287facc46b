//! Output formatting for the CLI
//!
//! Text output is colored with `console` when stdout is a terminal; JSON
//! mode writes one object per line.

use console::style;
use serde_json::json;

/// Outcome of one host in `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    /// Session established
    Connected,
    /// Connection failed
    Failed,
    /// Operator aborted a prompt
    Aborted,
}

impl HostStatus {
    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Connected => "connected",
            HostStatus::Failed => "failed",
            HostStatus::Aborted => "aborted",
        }
    }
}

/// Output formatter for text and JSON modes
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    use_color: bool,
    json_mode: bool,
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color
            && std::env::var("NO_COLOR").is_err()
            && console::Term::stdout().features().colors_supported();

        Self {
            use_color,
            json_mode,
            verbosity,
        }
    }

    /// Print a host string and its canonical key
    pub fn normalized(&self, input: &str, key: &str, user: &str, host: &str, port: &str) {
        if self.json_mode {
            let line = json!({
                "type": "normalized",
                "input": input,
                "key": key,
                "user": user,
                "host": host,
                "port": port,
            });
            println!("{}", line);
            return;
        }

        if self.verbosity >= 1 && input != key {
            println!("{} => {}", input, self.paint_key(key));
        } else {
            println!("{}", self.paint_key(key));
        }
    }

    /// Print the result of connecting one host
    pub fn host_result(&self, host: &str, status: HostStatus, message: Option<&str>) {
        if self.json_mode {
            let line = json!({
                "type": "host",
                "host": host,
                "status": status.as_str(),
                "message": message,
            });
            println!("{}", line);
            return;
        }

        let label = match (status, self.use_color) {
            (HostStatus::Connected, true) => style("ok").green().bold().to_string(),
            (HostStatus::Failed, true) => style("failed").red().bold().to_string(),
            (HostStatus::Aborted, true) => style("aborted").yellow().bold().to_string(),
            (status, false) => status.as_str().to_string(),
        };

        match message {
            Some(msg) => println!("[{}] {}: {}", host, label, msg),
            None => println!("[{}] {}", host, label),
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            eprintln!("{}", json!({ "type": "error", "message": message }));
            return;
        }

        if self.use_color {
            eprintln!("{} {}", style("ERROR:").red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a plain status line (suppressed in JSON mode)
    pub fn plain(&self, message: &str) {
        if !self.json_mode {
            println!("{}", message);
        }
    }

    fn paint_key(&self, key: &str) -> String {
        if self.use_color {
            style(key).cyan().to_string()
        } else {
            key.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(HostStatus::Connected.as_str(), "connected");
        assert_eq!(HostStatus::Failed.as_str(), "failed");
        assert_eq!(HostStatus::Aborted.as_str(), "aborted");
    }

    #[test]
    fn test_no_color_flag_disables_color() {
        let out = OutputFormatter::new(false, false, 0);
        assert_eq!(out.paint_key("u@h:22"), "u@h:22");
    }
}
