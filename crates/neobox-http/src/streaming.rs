//! Streaming Responses
//!
//! Reads HTTP/1.1 bodies incrementally (content-length, chunked, or until the
//! peer closes) and tracks how much has arrived.

use std::io::{self, BufRead, Read};

/// Streaming body state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not started reading
    Pending,
    /// Currently streaming
    Reading,
    /// All data received
    Complete,
    /// Error occurred
    Error,
}

/// How the body is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// No body (HEAD, 204, 304)
    Empty,
    /// Content-Length specified
    ContentLength(u64),
    /// Chunked transfer encoding
    Chunked,
    /// Read until connection close
    UntilClose,
}

/// Streaming body reader over a buffered connection
#[derive(Debug)]
pub struct StreamingBody<'a, R: BufRead> {
    reader: &'a mut R,
    encoding: TransferEncoding,
    bytes_read: u64,
    state: StreamState,
    /// Bytes left in the current chunk
    chunk_remaining: u64,
}

impl<'a, R: BufRead> StreamingBody<'a, R> {
    pub fn new(reader: &'a mut R, encoding: TransferEncoding) -> Self {
        Self {
            reader,
            encoding,
            bytes_read: 0,
            state: StreamState::Pending,
            chunk_remaining: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Get bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Get total bytes if known
    pub fn total_bytes(&self) -> Option<u64> {
        match self.encoding {
            TransferEncoding::ContentLength(len) => Some(len),
            TransferEncoding::Empty => Some(0),
            _ => None,
        }
    }

    /// Check if complete
    pub fn is_complete(&self) -> bool {
        self.state == StreamState::Complete
    }

    /// Read the next piece of body into `buf`. `Ok(0)` means the body is
    /// complete.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state == StreamState::Complete || buf.is_empty() {
            return Ok(0);
        }

        self.state = StreamState::Reading;

        let result = match self.encoding {
            TransferEncoding::Empty => Ok(0),
            TransferEncoding::ContentLength(total) => self.read_sized(buf, total),
            TransferEncoding::Chunked => self.read_chunked(buf),
            TransferEncoding::UntilClose => self.reader.read(buf),
        };

        match result {
            Ok(0) => {
                self.state = StreamState::Complete;
                Ok(0)
            }
            Ok(n) => {
                self.bytes_read += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.state = StreamState::Error;
                Err(e)
            }
        }
    }

    fn read_sized(&mut self, buf: &mut [u8], total: u64) -> io::Result<usize> {
        let remaining = total - self.bytes_read;
        if remaining == 0 {
            return Ok(0);
        }

        let to_read = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.reader.read(&mut buf[..to_read])?;

        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed before content-length reached",
            ));
        }

        Ok(n)
    }

    fn read_chunked(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.chunk_remaining == 0 {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Connection closed inside chunked body"));
            }

            // Chunk size may carry an extension after ';'
            let size_str = line.trim().split(';').next().unwrap_or("").trim();
            let size = u64::from_str_radix(size_str, 16)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid chunk size: {}", e)))?;

            if size == 0 {
                // Trailers up to the final empty line
                loop {
                    line.clear();
                    if self.reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                        break;
                    }
                }
                return Ok(0);
            }

            self.chunk_remaining = size;
        }

        let to_read = buf.len().min(usize::try_from(self.chunk_remaining).unwrap_or(usize::MAX));
        let n = self.reader.read(&mut buf[..to_read])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Connection closed inside chunk"));
        }

        self.chunk_remaining -= n as u64;

        // Trailing CRLF after the chunk data
        if self.chunk_remaining == 0 {
            let mut crlf = String::new();
            self.reader.read_line(&mut crlf)?;
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn drain<R: BufRead>(body: &mut StreamingBody<'_, R>, buf_size: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; buf_size];
        loop {
            let n = body.read_chunk(&mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn test_content_length() {
        let mut reader = BufReader::new(&b"Hello, World!extra"[..]);
        let mut body = StreamingBody::new(&mut reader, TransferEncoding::ContentLength(13));

        assert_eq!(body.total_bytes(), Some(13));
        assert_eq!(drain(&mut body, 4).unwrap(), b"Hello, World!");
        assert!(body.is_complete());
        assert_eq!(body.bytes_read(), 13);
    }

    #[test]
    fn test_content_length_short() {
        let mut reader = BufReader::new(&b"Hel"[..]);
        let mut body = StreamingBody::new(&mut reader, TransferEncoding::ContentLength(10));

        let err = drain(&mut body, 64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(body.state(), StreamState::Error);
    }

    #[test]
    fn test_chunked() {
        let data = b"5\r\nHello\r\n8;ext=1\r\n, World!\r\n0\r\nX-Trailer: yes\r\n\r\n";
        let mut reader = BufReader::new(&data[..]);
        let mut body = StreamingBody::new(&mut reader, TransferEncoding::Chunked);

        assert_eq!(body.total_bytes(), None);
        assert_eq!(drain(&mut body, 3).unwrap(), b"Hello, World!");
        assert!(body.is_complete());
    }

    #[test]
    fn test_until_close() {
        let mut reader = BufReader::new(&b"streamed until eof"[..]);
        let mut body = StreamingBody::new(&mut reader, TransferEncoding::UntilClose);

        assert_eq!(drain(&mut body, 5).unwrap(), b"streamed until eof");
        assert_eq!(body.state(), StreamState::Complete);
    }

    #[test]
    fn test_empty() {
        let mut reader = BufReader::new(&b"ignored"[..]);
        let mut body = StreamingBody::new(&mut reader, TransferEncoding::Empty);

        assert_eq!(body.state(), StreamState::Pending);
        assert!(drain(&mut body, 8).unwrap().is_empty());
        assert!(body.is_complete());
    }
}
