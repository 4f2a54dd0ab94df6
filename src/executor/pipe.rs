//! Output capture for spawned commands.
//!
//! Each pipe is drained on its own thread so a chatty stderr cannot block a
//! process that is still writing stdout.

use std::io::{BufRead, BufReader, Read};

use strum::Display;

#[derive(Clone, Copy, Debug, Display)]
#[strum(serialize_all = "lowercase")]
pub(super) enum StreamType {
    Stdout,
    Stderr,
}

/// Extracts a human-readable message from a thread panic.
pub(super) fn panic_message(err: &(dyn std::any::Any + Send)) -> &str {
    err.downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

/// Reads a pipe to EOF and returns the raw bytes.
///
/// Lines are traced as they arrive. A read error ends capture early but
/// keeps what was read; the exit status still decides success.
pub(super) fn capture_pipe<R: Read>(pipe: Option<R>, stream: StreamType) -> Vec<u8> {
    let Some(pipe) = pipe else {
        tracing::error!(stream = %stream, "{} was not piped, nothing captured", stream);
        return Vec::new();
    };

    let mut reader = BufReader::new(pipe);
    let mut captured = Vec::new();

    loop {
        let start = captured.len();
        match reader.read_until(b'\n', &mut captured) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&captured[start..]);
                tracing::trace!(stream = %stream, "{}", line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                tracing::warn!(stream = %stream, "stopped reading {}: {}", stream, e);
                break;
            }
        }
    }

    captured
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_everything_including_unterminated_line() {
        let input: &[u8] = b"Server: 24.0.7\r\nCgroup Driver: systemd";
        let out = capture_pipe(Some(input), StreamType::Stdout);
        assert_eq!(out, input);
    }

    #[test]
    fn missing_pipe_yields_nothing() {
        assert!(capture_pipe(None::<&[u8]>, StreamType::Stderr).is_empty());
    }

    #[test]
    fn stream_names() {
        assert_eq!(StreamType::Stdout.to_string(), "stdout");
        assert_eq!(StreamType::Stderr.to_string(), "stderr");
    }
}
