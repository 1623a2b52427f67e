//! Command port wire protocol.
//!
//! Commands are ASCII lines terminated by `\r\n`. The radar answers with zero
//! or more text lines and then a status line starting with a two letter code.

use std::fmt;

use serde::Serialize;

/// Line terminator expected by the radar.
pub const TERMINATOR: &str = "\r\n";

/// Identity query sent right after connecting.
pub const IDENTITY_QUERY: &str = "*IDN?";

/// Completion status reported by the radar for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// `OK`
    Ok,
    /// `IC`: command not recognised.
    InvalidCommand,
    /// `CE`: command failed on the radar.
    CommandError,
    /// `IP`: bad parameter.
    InvalidParameter,
    /// `TO`: the radar timed out.
    Timeout,
    /// `NA`: not available in the current mode.
    NotAvailable,
    /// `UE`
    UnknownError,
    /// No status line was received.
    Unknown,
}

impl CommandStatus {
    /// Parse a two letter status code.
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "OK" => CommandStatus::Ok,
            "IC" => CommandStatus::InvalidCommand,
            "CE" => CommandStatus::CommandError,
            "IP" => CommandStatus::InvalidParameter,
            "TO" => CommandStatus::Timeout,
            "NA" => CommandStatus::NotAvailable,
            "UE" => CommandStatus::UnknownError,
            _ => return None,
        })
    }

    pub fn code(self) -> &'static str {
        match self {
            CommandStatus::Ok => "OK",
            CommandStatus::InvalidCommand => "IC",
            CommandStatus::CommandError => "CE",
            CommandStatus::InvalidParameter => "IP",
            CommandStatus::Timeout => "TO",
            CommandStatus::NotAvailable => "NA",
            CommandStatus::UnknownError => "UE",
            CommandStatus::Unknown => "??",
        }
    }

    pub fn is_ok(self) -> bool {
        self == CommandStatus::Ok
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of one command, delivered to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    /// True only when the radar answered `OK`.
    pub ok: bool,
    pub text: String,
    pub status: CommandStatus,
}

impl CommandResponse {
    pub fn new(status: CommandStatus, text: impl Into<String>) -> Self {
        Self {
            ok: status.is_ok(),
            text: text.into(),
            status,
        }
    }

    /// A command that never got an answer.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(CommandStatus::Unknown, reason)
    }
}

/// Wire bytes for `command`, with any caller supplied terminator replaced.
pub fn encode_command(command: &str) -> Vec<u8> {
    let trimmed = command.trim_end_matches(['\r', '\n']);
    let mut out = Vec::with_capacity(trimmed.len() + TERMINATOR.len());
    out.extend_from_slice(trimmed.as_bytes());
    out.extend_from_slice(TERMINATOR.as_bytes());
    out
}

/// Incremental response parser fed with raw bytes from the command port.
#[derive(Debug, Default)]
pub struct ResponseParser {
    partial: Vec<u8>,
    lines: Vec<String>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes. Returns the response once its status line is complete.
    ///
    /// Bytes after the status line are discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Option<CommandResponse> {
        self.partial.extend_from_slice(bytes);
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            if let Some((status, rest)) = split_status(line) {
                let mut text = self.lines.join("\n");
                if !rest.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(rest);
                }
                self.partial.clear();
                self.lines.clear();
                return Some(CommandResponse::new(status, text));
            }
            if !line.is_empty() {
                self.lines.push(line.to_string());
            }
        }
        None
    }

    /// Text received so far without a status line, including any
    /// unterminated tail.
    pub fn pending_text(&self) -> String {
        let mut text = self.lines.join("\n");
        let tail = String::from_utf8_lossy(&self.partial);
        let tail = tail.trim_end_matches(['\r', '\n']);
        if !tail.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(tail);
        }
        text
    }
}

/// Split a status line into its code and trailing message.
fn split_status(line: &str) -> Option<(CommandStatus, &str)> {
    let line = line.trim_start();
    let code = line.get(..2)?;
    let rest = &line[2..];
    if rest.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let status = CommandStatus::from_code(code)?;
    Some((status, rest.trim_start_matches([' ', ':', ',', '-']).trim_end()))
}
