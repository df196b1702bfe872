//! Text framing for the plugin control pipe.
//!
//! Each line is one command.  Lines end with LF or CR, everything from the
//! first `#` is a comment, and tokens are separated by whitespace:
//!
//! ```text
//! openNotifyPipe /tmp/kvm-notify   # where to send notifications
//! switchToScreen laptop
//! moveXY 100 200
//! ```
//!
//! The bridge interprets only `openNotifyPipe`; every other token list is
//! forwarded to the dispatcher untouched.
//!
//! Reads from a FIFO can end anywhere inside a line.  [`LineAssembler`]
//! holds the unterminated tail until its terminator arrives, so a command
//! is never parsed from half a line and a UTF-8 sequence is never decoded
//! in pieces.

use std::path::PathBuf;

use tracing::warn;

/// Command that redirects notifications to a new output pipe.
pub const OPEN_NOTIFY_PIPE: &str = "openNotifyPipe";

/// One parsed line of pipe input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeCommand {
    /// Open (or re-open) the notification pipe at this path.
    OpenNotifyPipe(PathBuf),
    /// Hand these tokens to the dispatcher.
    Submit(Vec<String>),
}

/// Longest unterminated line kept between reads.
pub const MAX_PENDING_LINE: usize = 64 * 1024;

/// Reassembles pipe lines that arrive split across reads.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns the commands of every line completed so far.
    ///
    /// A line that grows past [`MAX_PENDING_LINE`] without a terminator is
    /// dropped, up to and including its eventual terminator.
    pub fn push(&mut self, mut bytes: &[u8]) -> Vec<PipeCommand> {
        if self.discarding {
            match bytes.iter().position(|b| is_terminator(*b)) {
                Some(end) => {
                    self.discarding = false;
                    bytes = &bytes[end + 1..];
                }
                None => return Vec::new(),
            }
        }
        self.pending.extend_from_slice(bytes);

        let commands = match self.pending.iter().rposition(|b| is_terminator(*b)) {
            Some(end) => {
                let tail = self.pending.split_off(end + 1);
                let complete = std::mem::replace(&mut self.pending, tail);
                parse_command_text(&String::from_utf8_lossy(&complete))
            }
            None => Vec::new(),
        };

        if self.pending.len() > MAX_PENDING_LINE {
            warn!(
                "dropping {} bytes of pipe input without a line terminator",
                self.pending.len()
            );
            self.pending.clear();
            self.discarding = true;
        }
        commands
    }

    /// Bytes held back waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

/// Splits a chunk of pipe text into commands, in order.
///
/// Blank lines, comment-only lines and `openNotifyPipe` without a path
/// produce nothing.
pub fn parse_command_text(text: &str) -> Vec<PipeCommand> {
    text.split(['\n', '\r']).filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<PipeCommand> {
    let content = line.split('#').next().unwrap_or_default();
    let tokens: Vec<String> = content.split_whitespace().map(str::to_string).collect();

    match tokens.first().map(String::as_str) {
        None => None,
        Some(OPEN_NOTIFY_PIPE) => match tokens.get(1) {
            Some(path) => Some(PipeCommand::OpenNotifyPipe(PathBuf::from(path))),
            None => {
                warn!("{OPEN_NOTIFY_PIPE} without a path ignored");
                None
            }
        },
        Some(_) => Some(PipeCommand::Submit(tokens)),
    }
}
