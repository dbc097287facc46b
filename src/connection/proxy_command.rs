//! Process-backed tunnel sockets.
//!
//! The command runs through `sh -c`; its stdout is read as the socket's
//! input and its stdin receives the socket's output. The child is killed
//! when the socket is dropped.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use super::TunnelSocket;

/// Expand `%h`, `%p`, `%r` and `%%` in a proxy command.
pub fn expand_tokens(command: &str, host: &str, port: u16, user: &str) -> String {
    let mut out = String::with_capacity(command.len());
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(host),
            Some('p') => out.push_str(&port.to_string()),
            Some('r') => out.push_str(user),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }

    out
}

/// Stdio of a running proxy command.
#[derive(Debug)]
pub struct ProxyCommandStream {
    // Held so the child is killed on drop
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl ProxyCommandStream {
    /// Start `command` (tokens already expanded).
    pub fn spawn(command: &str) -> io::Result<Self> {
        debug!(command = %command, "Starting proxy command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "proxy command has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "proxy command has no stdout"))?;

        Ok(Self {
            _child: child,
            stdin,
            stdout,
        })
    }
}

impl AsyncRead for ProxyCommandStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProxyCommandStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}

/// Start a proxy command for `user@host:port` and wrap it as a tunnel socket.
pub fn open(command: &str, host: &str, port: u16, user: &str) -> io::Result<TunnelSocket> {
    let expanded = expand_tokens(command, host, port, user);
    let stream = ProxyCommandStream::spawn(&expanded)?;
    Ok(TunnelSocket::new(format!("proxy-command `{}`", expanded), stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_expand_tokens() {
        assert_eq!(
            expand_tokens("ssh -W %h:%p -l %r jump", "web1", 2222, "deploy"),
            "ssh -W web1:2222 -l deploy jump"
        );
        assert_eq!(expand_tokens("echo 100%% %x %", "h", 22, "u"), "echo 100% %x %");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_proxy_command_echoes() {
        let mut sock = open("cat", "web1", 22, "deploy").unwrap();
        assert!(sock.label().contains("cat"));

        sock.write_all(b"SSH-2.0-test\r\n").await.unwrap();
        sock.flush().await.unwrap();

        let mut buf = [0u8; 14];
        sock.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"SSH-2.0-test\r\n");
    }
}
