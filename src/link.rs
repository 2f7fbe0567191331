//! Line-oriented link to the target board
//!
//! # Purpose
//! The target firmware speaks a human readable, line based protocol so that it stays debuggable
//! from an ordinary serial terminal. This module defines the [`TargetLink`] seam the sweep engine
//! talks through, and [`SerialLink`], an implementation over any async byte stream.
//!
//! Creating the I/O stream is not handled by [`SerialLink::with`] so that you are not restricted to
//! connecting to the target via a particular hardware interface. With the `serial` feature,
//! [`SerialLink::open`] opens a local serial port for the common case.
//!
//! # Cancel Safety
//! [`SerialLink::read_line`] is cancel safe: bytes are only ever appended to the internal read
//! buffer until a full line is available, so dropping the future never loses data.

use std::{
    future::poll_fn,
    pin::Pin,
    task::Poll,
    time::Duration,
};
use async_trait::async_trait;
use tokio::io::{ AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf };
use crate::error::LinkError;

/// Line ending used by the target for both directions
pub const LINE_ENDING: &str = "\r\n";

/// The operations the sweep engine needs from the link to the target board
#[async_trait]
pub trait TargetLink: Send
{
    /// Whether the link is connected and usable
    fn is_open(&self) -> bool;

    /// Write one line, appending the line terminator
    async fn send_line(&mut self, line: &str) -> Result<(), LinkError>;

    /// Read one line, without its terminator
    ///
    /// Returns `Ok(None)` if no complete line arrived before `timeout` elapsed.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError>;

    /// Discard everything received so far but not yet read
    async fn clear_input(&mut self) -> Result<(), LinkError>;
}

/// A [`TargetLink`] over an async byte stream such as a serial port or a TCP serial bridge
pub struct SerialLink<T>
{
    io_handle: Option<T>,
    read_buf: Vec<u8>,
}

impl <T> SerialLink<T>
    where T: AsyncRead + AsyncWrite + Unpin + Send
{
    /// Construct a new link from an already connected I/O stream
    pub fn with(io_handle: T) -> Self
    {
        Self {
            io_handle: Some(io_handle),
            read_buf: Vec::with_capacity(128),
        }
    }

    /// Disconnect from the target, dropping the underlying stream
    pub fn close(&mut self) -> Option<T>
    {
        self.read_buf.clear();
        self.io_handle.take()
    }

    /// Drops the first `n` bytes from the read buffer
    ///
    /// Drops all bytes if `n >= self.read_buf.len()`
    fn drop_first(&mut self, n: usize)
    {
        if n >= self.read_buf.len() {
            self.read_buf.clear();
        }
        else {
            self.read_buf.drain(..n);
            // keep memory usage down after a burst of boot chatter
            self.read_buf.shrink_to(128);
        }
    }

    /// Returns the index of the first linefeed in the read buffer at or after `start_hint`
    fn find_line_ending(&self, start_hint: usize) -> Option<usize>
    {
        self.read_buf
            .get(start_hint..)?
            .iter()
            .position(|byte| *byte == b'\n')
            .map(|offset| offset + start_hint)
    }

    /// Reads from the stream until the read buffer holds a full line and returns the length of
    /// that line including its linefeed
    async fn fill_line(&mut self) -> Result<usize, LinkError>
    {
        // try to find the ending in already-buffered data first
        let mut end_index = self.find_line_ending(0);

        while end_index.is_none() {
            let io_handle = self.io_handle.as_mut().ok_or(LinkError::NotOpen)?;
            let mut temp_buf = [0u8; 64];
            let bytes_read = io_handle.read(&mut temp_buf[..]).await?;

            if bytes_read == 0 {
                return Err(LinkError::Closed);
            }

            let prior_end = self.read_buf.len();
            self.read_buf.extend_from_slice(&temp_buf[..bytes_read]);
            end_index = self.find_line_ending(prior_end);
        }

        Ok(end_index.map_or(0, |index| index + 1))
    }

    /// Removes a line of `size` bytes from the front of the read buffer and decodes it
    ///
    /// Boot chatter from the target may contain garbage bytes, so invalid UTF8 is replaced rather
    /// than rejected.
    fn take_line(&mut self, size: usize) -> String
    {
        let line = String::from_utf8_lossy(&self.read_buf[..size])
            .trim_end_matches(&['\r', '\n'][..])
            .to_string();
        self.drop_first(size);
        line
    }
}

#[cfg(feature = "serial")]
impl SerialLink<tokio_serial::SerialStream>
{
    /// Open a local serial port with 8 data bits, no parity, one stop bit and no flow control
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, LinkError>
    {
        use tokio_serial::{ SerialPortBuilderExt, DataBits, Parity, StopBits, FlowControl };

        let stream = tokio_serial::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        tracing::info!(port = path, baud_rate, "target link opened");
        Ok(Self::with(stream))
    }
}

#[async_trait]
impl <T> TargetLink for SerialLink<T>
    where T: AsyncRead + AsyncWrite + Unpin + Send
{
    fn is_open(&self) -> bool
    {
        self.io_handle.is_some()
    }

    async fn send_line(&mut self, line: &str) -> Result<(), LinkError>
    {
        let io_handle = self.io_handle.as_mut().ok_or(LinkError::NotOpen)?;
        let serialized = format!("{}{}", line, LINE_ENDING);
        io_handle.write_all(serialized.as_bytes()).await?;
        io_handle.flush().await?;
        tracing::debug!(line, "tx");
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError>
    {
        match tokio::time::timeout(timeout, self.fill_line()).await {
            Ok(Ok(size)) => {
                let line = self.take_line(size);
                tracing::debug!(line = line.as_str(), "rx");
                Ok(Some(line))
            },
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn clear_input(&mut self) -> Result<(), LinkError>
    {
        self.read_buf.clear();
        let io_handle = self.io_handle.as_mut().ok_or(LinkError::NotOpen)?;
        let mut temp_buf = [0u8; 64];

        // drain whatever the stream can hand over without waiting
        loop {
            let mut read_buf = ReadBuf::new(&mut temp_buf);
            let polled = poll_fn(|cx| match Pin::new(&mut *io_handle).poll_read(cx, &mut read_buf) {
                Poll::Ready(result) => Poll::Ready(Some(result)),
                Poll::Pending => Poll::Ready(None),
            })
            .await;

            match polled {
                Some(Ok(())) if !read_buf.filled().is_empty() => continue,
                Some(Ok(())) | None => break,
                Some(Err(err)) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::{ SerialLink, TargetLink };
    use std::time::Duration;
    use tokio::io::{ AsyncReadExt, AsyncWriteExt };

    #[tokio::test]
    async fn reads_lines_split_across_writes()
    {
        let (local, mut remote) = tokio::io::duplex(256);
        let mut link = SerialLink::with(local);

        remote.write_all(b"--- DATA_").await.unwrap();
        remote.write_all(b"START ---\r\nCT:AABB").await.unwrap();
        remote.write_all(b"CC\r\n").await.unwrap();

        let first = link.read_line(Duration::from_secs(1)).await.unwrap();
        let second = link.read_line(Duration::from_secs(1)).await.unwrap();

        assert_eq!(first.as_deref(), Some("--- DATA_START ---"));
        assert_eq!(second.as_deref(), Some("CT:AABBCC"));
    }

    #[tokio::test(start_paused = true)]
    async fn read_times_out_without_full_line()
    {
        let (local, mut remote) = tokio::io::duplex(256);
        let mut link = SerialLink::with(local);

        remote.write_all(b"partial").await.unwrap();
        let line = link.read_line(Duration::from_millis(100)).await.unwrap();
        assert!(line.is_none());

        // the partial line is kept and completed by later bytes
        remote.write_all(b" line\n").await.unwrap();
        let line = link.read_line(Duration::from_millis(100)).await.unwrap();
        assert_eq!(line.as_deref(), Some("partial line"));
    }

    #[tokio::test]
    async fn send_line_appends_crlf()
    {
        let (local, mut remote) = tokio::io::duplex(256);
        let mut link = SerialLink::with(local);

        link.send_line("START").await.unwrap();
        let mut received = [0u8; 7];
        remote.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"START\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_input_discards_pending_bytes()
    {
        let (local, mut remote) = tokio::io::duplex(256);
        let mut link = SerialLink::with(local);

        remote.write_all(b"stale boot banner\r\nmore chatter").await.unwrap();
        link.clear_input().await.unwrap();

        remote.write_all(b"fresh\r\n").await.unwrap();
        let line = link.read_line(Duration::from_millis(100)).await.unwrap();
        assert_eq!(line.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn closed_link_reports_not_open()
    {
        let (local, _remote) = tokio::io::duplex(256);
        let mut link = SerialLink::with(local);

        assert!(link.is_open());
        link.close();
        assert!(!link.is_open());
        assert!(link.send_line("START").await.is_err());
    }

    #[tokio::test]
    async fn remote_hangup_is_an_error()
    {
        let (local, remote) = tokio::io::duplex(256);
        let mut link = SerialLink::with(local);
        drop(remote);

        assert!(link.read_line(Duration::from_secs(1)).await.is_err());
    }
}
