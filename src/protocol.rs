//! Request/response exchange with the target firmware
//!
//! # Purpose
//! One trial is one `START` request. The target answers with a block of `KEY:VALUE` lines
//! delimited by marker lines, for example:
//!
//! ```text
//! --- DATA_START ---
//! PT:00112233445566778899AABBCCDDEEFF
//! CT:69C4E0D86A7B0430D8CDB78070B4C55A
//! --- DATA_END ---
//! ```
//!
//! The target may also report an error (`ERROR:<code>`), or reboot mid-exchange, in which case it
//! prints its boot banner instead of finishing the block.
//!
//! # Implementation Notes
//! The line state machine lives in [`ResponseParser`] so that it can be driven without any I/O.
//! [`exchange`] only adds the transport and the overall time budget.

use std::{
    collections::HashMap,
    time::Duration,
};
use serde::Serialize;
use tokio::time::Instant;
use crate::{
    cmd::TargetCmd,
    error::LinkError,
    link::TargetLink,
};

/// Boot banner printed by the target after it resets
pub const RESET_MARKER: &str = "KW45 Ready. Waiting for commands...";
/// Marks the start of a response block
pub const DATA_START: &str = "--- DATA_START ---";
/// Marks the end of a response block
pub const DATA_END: &str = "--- DATA_END ---";
/// Prefix of an error report from the target
pub const ERROR_MARKER: &str = "ERROR:";
/// The response field compared between trials
pub const CIPHERTEXT_KEY: &str = "CT";
/// Default time budget for a whole exchange
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(3);

/// The fields of one response block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Response
{
    fields: HashMap<String, String>,
}

impl Response
{
    pub fn get(&self, key: &str) -> Option<&str>
    {
        self.fields.get(key).map(String::as_str)
    }

    /// The ciphertext field, if the target sent a non-empty one
    pub fn ciphertext(&self) -> Option<&str>
    {
        self.get(CIPHERTEXT_KEY).filter(|ct| !ct.is_empty())
    }

    pub fn len(&self) -> usize
    {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)>
    {
        self.fields.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl FromIterator<(String, String)> for Response
{
    fn from_iter<I>(iter: I) -> Self
        where I: IntoIterator<Item = (String, String)>
    {
        Self { fields: iter.into_iter().collect() }
    }
}

/// How one exchange ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeResult
{
    /// A complete response block, or the partial block received before the budget ran out
    Data(Response),
    /// The target printed its boot banner
    Reset,
    /// The target reported an error, the transport failed, or nothing useful arrived in time
    CommError,
}

impl ExchangeResult
{
    /// The ciphertext of a [`Data`](ExchangeResult::Data) result
    pub fn ciphertext(&self) -> Option<&str>
    {
        match self {
            Self::Data(response) => response.ciphertext(),
            _ => None,
        }
    }
}

/// Line-at-a-time parser for the target's response block
#[derive(Debug, Default)]
pub struct ResponseParser
{
    collecting: bool,
    fields: HashMap<String, String>,
}

impl ResponseParser
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Whether the start marker has been seen
    pub fn is_collecting(&self) -> bool
    {
        self.collecting
    }

    /// Consume one line
    ///
    /// Returns `Some` once the line decides the outcome of the exchange. Further lines should not
    /// be fed after that.
    pub fn feed(&mut self, line: &str) -> Option<ExchangeResult>
    {
        let line = line.trim();

        if line.is_empty() {
            return None;
        }

        if line.contains(RESET_MARKER) {
            return Some(ExchangeResult::Reset);
        }

        if line.contains(DATA_START) {
            self.collecting = true;
            return None;
        }

        if line.contains(DATA_END) {
            return Some(ExchangeResult::Data(self.take_response()));
        }

        if line.contains(ERROR_MARKER) {
            self.fields.clear();
            return Some(ExchangeResult::CommError);
        }

        if self.collecting {
            match line.split_once(':') {
                Some((key, value)) => {
                    self.fields.insert(key.trim().to_string(), value.trim().to_string());
                },
                None => tracing::trace!(line, "skipping malformed response line"),
            }
        }

        None
    }

    /// Conclude an exchange which ran out of time
    ///
    /// Whatever was collected is still useful; an empty block is an error.
    pub fn finish(mut self) -> ExchangeResult
    {
        if self.fields.is_empty() {
            ExchangeResult::CommError
        }
        else {
            ExchangeResult::Data(self.take_response())
        }
    }

    fn take_response(&mut self) -> Response
    {
        Response { fields: std::mem::take(&mut self.fields) }
    }
}

/// Send a command to the target
pub async fn send_command<L>(link: &mut L, cmd: &TargetCmd) -> Result<(), LinkError>
    where L: TargetLink + ?Sized
{
    link.send_line(&cmd.to_string()).await
}

/// Put the target into `mode` and discard whatever it prints while switching
pub async fn select_mode<L>(link: &mut L, mode: &str, settle: Duration) -> Result<(), LinkError>
    where L: TargetLink + ?Sized
{
    link.clear_input().await?;
    send_command(link, &TargetCmd::SelectMode(mode.to_string())).await?;
    tokio::time::sleep(settle).await;
    link.clear_input().await
}

/// Request one cryptographic operation and collect the target's response
///
/// Stale input is discarded before the request. `timeout` bounds the whole exchange, not each
/// line. Transport failures are reported as [`ExchangeResult::CommError`].
///
/// # Cancel Safety
/// Not cancel safe. A dropped exchange leaves an unread response on the link; the next exchange
/// clears it.
pub async fn exchange<L>(link: &mut L, timeout: Duration) -> ExchangeResult
    where L: TargetLink + ?Sized
{
    match try_exchange(link, timeout).await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(error = %err, "exchange failed");
            ExchangeResult::CommError
        },
    }
}

async fn try_exchange<L>(link: &mut L, timeout: Duration) -> Result<ExchangeResult, LinkError>
    where L: TargetLink + ?Sized
{
    link.clear_input().await?;
    send_command(link, &TargetCmd::Start).await?;

    let deadline = Instant::now() + timeout;
    let mut parser = ResponseParser::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());

        if remaining.is_zero() {
            break;
        }

        match link.read_line(remaining).await? {
            Some(line) => {
                if let Some(result) = parser.feed(&line) {
                    return Ok(result);
                }
            },
            None => break,
        }
    }

    tracing::debug!(collecting = parser.is_collecting(), "exchange timed out");
    Ok(parser.finish())
}
