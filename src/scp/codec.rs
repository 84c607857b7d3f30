//! SCP wire codec
//!
//! Pure encode/decode helpers for the line-based SCP grammar:
//!
//! | Element | Bytes |
//! |---|---|
//! | Command (Create) line | `C0644 <size> <filename>\n` |
//! | Time line | `T<mtime> 0 <atime> 0\n` |
//! | Response frame | status byte `0`/`1`/`2`, plus a `\n`-terminated message when non-zero |
//! | Ack / body terminator | a single `0x00` |
//!
//! Line reads go through [`read_line`], which frames on `\n` explicitly and
//! never reads past the newline, so the file body that follows a header is
//! left untouched in the reader.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::ScpError;

/// Highest mode a Command line may carry.
pub const MAX_PERMISSIONS: u32 = 0o777;

/// Highest mode accepted in a received Create line (setuid/setgid/sticky included).
pub const MAX_RECEIVED_PERMISSIONS: u32 = 0o7777;

/// Largest size a header may declare: the range of a signed 64-bit `off_t`.
pub const MAX_FILE_SIZE: u64 = i64::MAX as u64;

/// Upper bound for a single protocol line, newline included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

pub const STATUS_OK: u8 = 0;
pub const STATUS_WARNING: u8 = 1;
pub const STATUS_ERROR: u8 = 2;

pub const TAG_CREATE: u8 = b'C';
pub const TAG_TIME: u8 = b'T';
pub const TAG_DIRECTORY: u8 = b'D';
pub const TAG_END_DIRECTORY: u8 = b'E';

const NUL: [u8; 1] = [0];

/// Significant digits of a Time line field (epoch seconds).
const EPOCH_DIGITS: usize = 10;

/// A Create command as sent to (or received from) the remote `scp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub permissions: u32,
    pub size: u64,
    pub filename: String,
}

impl Command {
    pub fn new(permissions: u32, size: u64, filename: impl Into<String>) -> Self {
        Self {
            permissions,
            size,
            filename: filename.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ScpError> {
        encode_command(self.permissions, self.size, &self.filename)
    }
}

/// Build `C0<ooo> <size> <filename>\n`.
pub fn encode_command(permissions: u32, size: u64, filename: &str) -> Result<Vec<u8>, ScpError> {
    if permissions > MAX_PERMISSIONS {
        return Err(ScpError::BadPermissions { permissions });
    }
    if filename.is_empty() || filename.contains(['\n', '\0']) {
        return Err(ScpError::InvalidCommand(format!(
            "C{:04o} {} {:?}",
            permissions, size, filename
        )));
    }

    Ok(format!("C{:04o} {} {}\n", permissions, size, filename).into_bytes())
}

/// Parse a Command line such as `C0644 42 name`.
///
/// Trailing newline/NUL bytes are ignored. The line must split into exactly
/// three space-separated fields. Any octal mode is accepted, including
/// setuid/setgid/sticky bits; the `0o777` limit applies to encoding only.
pub fn decode_command(text: &[u8]) -> Result<Command, ScpError> {
    let text = std::str::from_utf8(text)
        .map_err(|_| ScpError::InvalidCommand(String::from_utf8_lossy(text).into_owned()))?;
    let trimmed = text.trim_end_matches(['\n', '\0']);

    let parts: Vec<&str> = trimmed.split(' ').collect();
    if parts.len() != 3 {
        return Err(ScpError::InvalidCommand(trimmed.to_string()));
    }

    // Skip the tag character ('C')
    let perm_digits = parts[0].get(1..).unwrap_or_default();
    let permissions = parse_octal(perm_digits).ok_or_else(|| {
        ScpError::Parse(format!("invalid octal permissions {:?}", perm_digits))
    })?;

    let size = parse_size(parts[1])
        .ok_or_else(|| ScpError::Parse(format!("invalid size {:?}", parts[1])))?;

    Ok(Command {
        permissions,
        size,
        filename: parts[2].to_string(),
    })
}

/// Parse a permission string such as `"0644"` or `"755"`.
pub fn parse_permissions(text: &str) -> Result<u32, ScpError> {
    let permissions = parse_octal(text)
        .ok_or_else(|| ScpError::Parse(format!("invalid octal permissions {:?}", text)))?;
    if permissions > MAX_PERMISSIONS {
        return Err(ScpError::BadPermissions { permissions });
    }
    Ok(permissions)
}

/// Build `T<mtime> 0 <atime> 0\n`.
pub fn encode_time(mtime: i64, atime: i64) -> Vec<u8> {
    format!("T{} 0 {} 0\n", mtime, atime).into_bytes()
}

/// Status classification of a response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ok,
    Warning,
    Error,
}

impl ResponseKind {
    pub fn from_status(status: u8) -> Option<Self> {
        match status {
            STATUS_OK => Some(ResponseKind::Ok),
            STATUS_WARNING => Some(ResponseKind::Warning),
            STATUS_ERROR => Some(ResponseKind::Error),
            _ => None,
        }
    }
}

/// A response frame read from the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: ResponseKind,
    /// Message including its trailing newline; empty for `Ok`
    pub message: String,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            kind: ResponseKind::Ok,
            message: String::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.kind, ResponseKind::Warning | ResponseKind::Error)
    }

    /// Turn a warning/error frame into [`ScpError::RemoteFailure`].
    pub fn into_result(self) -> Result<(), ScpError> {
        if self.is_failure() {
            Err(ScpError::RemoteFailure(self.message))
        } else {
            Ok(())
        }
    }
}

/// Read one response frame.
///
/// An `Ok` status consumes exactly one byte.
pub async fn parse_response<R>(reader: &mut R) -> Result<Response, ScpError>
where
    R: AsyncBufRead + Unpin,
{
    let status = reader.read_u8().await?;
    let kind = match ResponseKind::from_status(status) {
        Some(ResponseKind::Ok) => return Ok(Response::ok()),
        Some(kind) => kind,
        None => {
            return Err(ScpError::ProtocolViolation(format!(
                "unexpected response status byte 0x{:02x}",
                status
            )))
        }
    };

    let line = read_line(reader).await?;
    Ok(Response {
        kind,
        message: String::from_utf8_lossy(&line).into_owned(),
    })
}

/// Read one `\n`-terminated line, newline included.
///
/// Never consumes bytes past the newline. A line cut off by EOF or longer
/// than [`MAX_LINE_LEN`] is a protocol violation.
pub async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>, ScpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if line.last() == Some(&b'\n') {
        return Ok(line);
    }
    if n == 0 {
        return Err(ScpError::StreamIo(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream closed while waiting for a protocol line",
        )));
    }
    if line.len() >= MAX_LINE_LEN {
        return Err(ScpError::ProtocolViolation(format!(
            "protocol line exceeds {} bytes",
            MAX_LINE_LEN
        )));
    }
    Err(ScpError::ProtocolViolation(format!(
        "unterminated protocol line {:?}",
        String::from_utf8_lossy(&line)
    )))
}

/// Parse the body of a Create line (tag already consumed): `<mode> <size> <filename>`.
///
/// The filename is everything after the second space.
pub fn parse_file_info_line(line: &str) -> Result<(u32, u64, String), ScpError> {
    let line = line.trim_end_matches('\n');
    let mut parts = line.splitn(3, ' ');

    let (mode, size, filename) = match (parts.next(), parts.next(), parts.next()) {
        (Some(mode), Some(size), Some(filename)) if !filename.is_empty() => (mode, size, filename),
        _ => {
            return Err(ScpError::ProtocolViolation(format!(
                "unable to parse Create line {:?}: expected '<mode> <size> <filename>'",
                line
            )))
        }
    };

    let permissions = parse_octal(mode)
        .filter(|p| *p <= MAX_RECEIVED_PERMISSIONS)
        .ok_or_else(|| {
            ScpError::ProtocolViolation(format!("invalid mode {:?} in Create line", mode))
        })?;
    let size = parse_size(size).ok_or_else(|| {
        ScpError::ProtocolViolation(format!("invalid size {:?} in Create line", size))
    })?;

    Ok((permissions, size, filename.to_string()))
}

/// Parse the body of a Time line (tag already consumed): `<mtime> 0 <atime> 0`.
///
/// Returns `(atime, mtime)`. Only the first ten characters of each timestamp
/// are significant.
pub fn parse_time_line(line: &str) -> Result<(i64, i64), ScpError> {
    let line = line.trim_end_matches('\n');
    let fields: Vec<&str> = line.split(' ').collect();
    if fields.len() < 3 {
        return Err(ScpError::MalformedWireLine(format!(
            "unable to parse Time line {:?}",
            line
        )));
    }

    let mtime = epoch_prefix(fields[0])
        .ok_or_else(|| ScpError::MalformedWireLine(format!("invalid mtime in {:?}", line)))?;
    let atime = epoch_prefix(fields[2])
        .ok_or_else(|| ScpError::MalformedWireLine(format!("invalid atime in {:?}", line)))?;

    Ok((atime, mtime))
}

/// Write a single zero byte.
///
/// Does not wait for the remote's answer; call [`parse_response`] when the
/// acknowledgment itself must be confirmed.
pub async fn ack<W>(writer: &mut W) -> Result<(), ScpError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&NUL).await?;
    writer.flush().await?;
    Ok(())
}

fn parse_octal(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    u32::from_str_radix(text, 8).ok()
}

fn parse_size(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<u64>().ok().filter(|size| *size <= MAX_FILE_SIZE)
}

fn epoch_prefix(field: &str) -> Option<i64> {
    let prefix: String = field.chars().take(EPOCH_DIGITS).collect();
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}
