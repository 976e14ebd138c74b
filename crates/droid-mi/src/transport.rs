//! Line framing for the MI channel.
//!
//! Commands go out as `[token]text\n`; output comes back one record per
//! line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::MiError;

/// Check that `text` is a single non-empty command line.
pub fn validate_command(text: &str) -> Result<&str, MiError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(MiError::InvalidCommand("empty command".into()));
    }
    if trimmed.contains(['\n', '\r']) {
        return Err(MiError::InvalidCommand(format!(
            "command spans several lines: {trimmed:?}"
        )));
    }
    Ok(trimmed)
}

/// Bytes to write for `text` with an optional correlation token.
pub fn encode_command(token: Option<u64>, text: &str) -> Vec<u8> {
    match token {
        Some(token) => format!("{token}{text}\n").into_bytes(),
        None => format!("{text}\n").into_bytes(),
    }
}

/// Read the next line without its terminator. `Ok(None)` at end of stream.
pub async fn read_line<R>(reader: &mut R, buf: &mut String) -> Result<Option<String>, MiError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = reader
        .read_line(buf)
        .await
        .map_err(|e| MiError::Transport(e.to_string()))?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(buf.trim_end_matches(['\r', '\n']).to_string()))
}
