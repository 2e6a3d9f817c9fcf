//! Non-blocking capture of child output.

use std::io::{self, ErrorKind, Read, Write};

/// Chunk size used when draining.
pub const DEFAULT_MAX_LEN: usize = 0xff;

/// Accumulates whatever a non-blocking source has ready.
///
/// The source is expected to return `WouldBlock` when empty; a read of zero
/// bytes marks end of stream and further updates are skipped.
pub struct AsyncReader<R> {
    source: R,
    buffer: Vec<u8>,
    eof: bool,
}

impl<R: Read> AsyncReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            eof: false,
        }
    }

    /// Reads in `max_len` chunks until the source has nothing ready.
    ///
    /// Returns the number of bytes appended.
    pub fn update(&mut self, max_len: usize) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let mut chunk = vec![0u8; max_len.max(1)];
        let mut total = 0;
        loop {
            match self.source.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Returns the accumulated text and clears the buffer.
    pub fn dump(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Writes the accumulated text to `out` and clears the buffer.
    pub fn dump_to<W: Write + ?Sized>(&mut self, out: &mut W) -> io::Result<()> {
        let text = self.dump();
        if !text.is_empty() {
            out.write_all(text.as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }

    /// The accumulated text, without clearing it.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True once the source reported end of stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Yields scripted chunks, then `WouldBlock`, like an idle pipe.
    struct Scripted {
        chunks: VecDeque<Vec<u8>>,
        closed: bool,
    }

    impl Scripted {
        fn new(chunks: &[&str]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                closed: false,
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None if self.closed => Ok(0),
                None => Err(io::Error::new(ErrorKind::WouldBlock, "empty")),
            }
        }
    }

    #[test]
    fn test_update_then_dump() {
        let mut reader = AsyncReader::new(Scripted::new(&["A"]));
        assert_eq!(reader.update(DEFAULT_MAX_LEN).unwrap(), 1);

        // The source is idle between the two updates.
        reader.source.chunks.push_back(b"B".to_vec());
        assert_eq!(reader.update(DEFAULT_MAX_LEN).unwrap(), 1);

        assert_eq!(reader.dump(), "AB");
        assert_eq!(reader.dump(), "");
    }

    #[test]
    fn test_idle_source_is_not_an_error() {
        let mut reader = AsyncReader::new(Scripted::new(&[]));
        assert_eq!(reader.update(DEFAULT_MAX_LEN).unwrap(), 0);
        assert!(reader.is_empty());
        assert!(!reader.is_eof());
    }

    #[test]
    fn test_small_chunks_collect_everything() {
        let mut reader = AsyncReader::new(Scripted::new(&["hello world"]));
        reader.update(3).unwrap();
        assert_eq!(reader.contents(), "hello world");
        assert_eq!(reader.dump(), "hello world");
    }

    #[test]
    fn test_eof_stops_reading() {
        let mut source = Scripted::new(&["bye"]);
        source.closed = true;
        let mut reader = AsyncReader::new(source);
        assert_eq!(reader.update(DEFAULT_MAX_LEN).unwrap(), 3);
        assert!(reader.is_eof());
        assert_eq!(reader.update(DEFAULT_MAX_LEN).unwrap(), 0);
    }

    #[test]
    fn test_dump_to_writer() {
        let mut reader = AsyncReader::new(Scripted::new(&["Traceback\n"]));
        reader.update(DEFAULT_MAX_LEN).unwrap();
        let mut out = Vec::new();
        reader.dump_to(&mut out).unwrap();
        assert_eq!(out, b"Traceback\n");
        assert!(reader.is_empty());
    }
}
