use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use balance_traits::{BoxError, Connector, LineTransport};
use tracing::{debug, trace, warn};

use crate::error::{HwError, Result};
use crate::util::{io_timeout, remaining, strip_terminator};

/// Longest response line accepted before the stream is considered garbage.
pub const MAX_LINE_BYTES: usize = 256;

/// Opens TCP connections to a balance exposing its line protocol on `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn open(&self, timeout: Duration) -> Result<TcpLineTransport> {
        let endpoint = self.describe();
        let addrs: Vec<_> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| HwError::Resolve(endpoint.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(HwError::Resolve(endpoint));
        }

        let mut last_err = HwError::Resolve(endpoint.clone());
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, io_timeout(timeout)) {
                Ok(stream) => {
                    debug!(%addr, "balance connected");
                    return TcpLineTransport::from_stream(stream);
                }
                Err(e) => {
                    warn!(%addr, error = %e, "balance connect attempt failed");
                    last_err = match e.kind() {
                        ErrorKind::ConnectionRefused => HwError::Refused(endpoint.clone()),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                            HwError::ConnectTimeout(endpoint.clone())
                        }
                        _ => HwError::Io(e),
                    };
                }
            }
        }
        Err(last_err)
    }
}

impl Connector for TcpConnector {
    fn connect(&self, timeout: Duration) -> std::result::Result<Box<dyn LineTransport>, BoxError> {
        Ok(Box::new(self.open(timeout)?))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CRLF-framed line transport over a `TcpStream`.
///
/// Partial lines survive a read timeout and are completed by the next `read_line`.
pub struct TcpLineTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    pending: Vec<u8>,
    closed: bool,
}

impl TcpLineTransport {
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            pending: Vec::with_capacity(64),
            closed: false,
        })
    }

    fn write_raw(&mut self, line: &str) -> Result<()> {
        if self.closed {
            return Err(HwError::Closed);
        }
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()?;
        trace!(line, "balance tx");
        Ok(())
    }

    /// Read one line, giving up at `timeout` or once the line outgrows `MAX_LINE_BYTES`,
    /// whichever comes first. Both limits hold even while bytes keep arriving.
    fn read_raw(&mut self, timeout: Duration) -> Result<Option<String>> {
        if self.closed {
            return Err(HwError::Closed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let Some(left) = remaining(deadline) else {
                return Ok(None);
            };
            self.reader.get_ref().set_read_timeout(Some(io_timeout(left)))?;
            let buf = match self.reader.fill_buf() {
                Ok([]) => {
                    self.closed = true;
                    return Err(HwError::Closed);
                }
                Ok(buf) => buf,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(HwError::Io(e)),
            };

            let (want, complete) = match buf.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            };
            let room = (MAX_LINE_BYTES + 1).saturating_sub(self.pending.len());
            let take = want.min(room);
            self.pending.extend_from_slice(&buf[..take]);
            self.reader.consume(take);

            if complete && take == want {
                let bytes = std::mem::take(&mut self.pending);
                let text = String::from_utf8(bytes).map_err(|_| HwError::Encoding)?;
                if !text.is_ascii() {
                    return Err(HwError::Encoding);
                }
                let line = strip_terminator(&text).to_string();
                trace!(line = %line, "balance rx");
                return Ok(Some(line));
            }
            if self.pending.len() > MAX_LINE_BYTES {
                let len = self.pending.len();
                self.pending.clear();
                return Err(HwError::LineTooLong(len));
            }
        }
    }
}

impl LineTransport for TcpLineTransport {
    fn write_line(&mut self, line: &str) -> std::result::Result<(), BoxError> {
        Ok(self.write_raw(line)?)
    }

    fn read_line(&mut self, timeout: Duration) -> std::result::Result<Option<String>, BoxError> {
        Ok(self.read_raw(timeout)?)
    }

    fn close(&mut self) {
        if !self.closed {
            let _ = self.writer.shutdown(std::net::Shutdown::Both);
            self.closed = true;
        }
    }
}

impl Drop for TcpLineTransport {
    fn drop(&mut self) {
        self.close();
    }
}
