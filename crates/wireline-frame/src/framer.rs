use std::io::{ErrorKind, Read};

use tracing::trace;

use crate::error::{FrameError, Result};

/// Upper bound on one header line, including the delimiter line.
///
/// The wire format puts no bound on line 1, so a hostile peer could
/// otherwise stream an arbitrarily long "id". 8 KiB is far beyond any
/// legitimate envelope.
pub const MAX_LINE_LEN: usize = 8 * 1024;

const READ_CHUNK_SIZE: usize = 8 * 1024;

enum Candidate {
    Matched,
    Mismatch,
    NeedMore,
}

/// Presents a sub-stream that ends exactly at the frame delimiter.
///
/// The delimiter terminates the frame only when it appears alone on its
/// own line (`\n` + delimiter); the terminator is consumed and
/// discarded, and any bytes read past it are retained as *overrun* for
/// the next frame on the same connection. A `\r` preceding the newline
/// is payload data, not part of the terminator, so payloads ending in
/// `\r` round-trip byte-exactly. The underlying source is borrowed,
/// never owned: closing it is the session's business, and the same
/// source is reused frame after frame.
///
/// Replay is position-based: one buffer holds pushed-back overrun and
/// read-ahead alike, with a cursor marking the next undelivered byte.
/// Receive-only — there is no write path through a framer.
pub struct DelimitedReader<'a, R: Read> {
    inner: &'a mut R,
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    pos: usize,
    finished: bool,
    eof: bool,
}

impl<'a, R: Read> DelimitedReader<'a, R> {
    /// Frame a stream with a known delimiter, seeding the buffer with the
    /// previous frame's overrun.
    pub fn new(inner: &'a mut R, delimiter: impl Into<Vec<u8>>, overrun: Vec<u8>) -> Self {
        Self {
            inner,
            delimiter: delimiter.into(),
            buf: overrun,
            pos: 0,
            finished: false,
            eof: false,
        }
    }

    /// Frame a stream whose first line carries the delimiter itself.
    ///
    /// Consumes line 1 and uses it as the frame delimiter; the caller
    /// never needs to know the delimiter length in advance. `Ok(None)`
    /// means the source was already exhausted with no bytes at all — a
    /// peer that closed cleanly between frames, not a framing error.
    pub fn from_stream(inner: &'a mut R, overrun: Vec<u8>) -> Result<Option<Self>> {
        let mut framer = Self::new(inner, Vec::new(), overrun);
        match framer.read_raw_line()? {
            Some(line) if !line.is_empty() => {
                trace!(len = line.len(), "frame delimiter read from stream");
                framer.delimiter = line;
                Ok(Some(framer))
            }
            Some(_) => Err(FrameError::MissingDelimiter),
            None => Ok(None),
        }
    }

    /// The delimiter bounding this frame.
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// True once the frame's closing delimiter has been matched.
    ///
    /// Distinguishes a clean end-of-frame from the underlying stream
    /// ending mid-frame — both surface as `Ok(0)` from `read`.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read one line, stripping the trailing `\r` if present.
    ///
    /// `Ok(None)` means end-of-frame (or end-of-stream) with no bytes
    /// available — distinct from an empty line, which is `Ok(Some(""))`.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        match self.read_raw_line()? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| FrameError::NonUtf8Line),
        }
    }

    fn read_raw_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.read(&mut byte)?;
            if n == 0 {
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
            if line.len() > MAX_LINE_LEN {
                return Err(FrameError::LineTooLong { max: MAX_LINE_LEN });
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Read and discard the rest of the frame, up to the terminator.
    pub fn skip_to_end(&mut self) -> Result<()> {
        let mut sink = [0u8; READ_CHUNK_SIZE];
        loop {
            if self.read(&mut sink)? == 0 {
                return Ok(());
            }
        }
    }

    /// Consume the framer, returning buffered bytes that belong to the
    /// next frame. Hand these to the next framer on the same connection.
    pub fn into_overrun(self) -> Vec<u8> {
        self.buf[self.pos..].to_vec()
    }

    /// Prepend bytes for replay; they are delivered before anything still
    /// buffered and before any further read of the source.
    pub fn push_overrun(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut replayed = Vec::with_capacity(bytes.len() + self.buf.len() - self.pos);
        replayed.extend_from_slice(bytes);
        replayed.extend_from_slice(&self.buf[self.pos..]);
        self.buf = replayed;
        self.pos = 0;
    }

    /// Append a fresh chunk from the source. Returns false at EOF.
    fn fill(&mut self) -> std::io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        if self.pos == self.buf.len() && self.pos != 0 {
            self.buf.clear();
            self.pos = 0;
        }
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Copy up to `n` pending bytes into `out`.
    fn deliver(&mut self, n: usize, out: &mut [u8]) -> usize {
        let n = n.min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Examine the candidate terminator at the cursor (which sits on a
    /// `\n`). Never consumes bytes on mismatch — the caller delivers the
    /// leading byte as data and rescans the rest.
    fn try_match(&mut self) -> Candidate {
        let avail = &self.buf[self.pos..];
        let have = avail.len() - 1;
        let cmp = have.min(self.delimiter.len());
        if avail[1..1 + cmp] != self.delimiter[..cmp] {
            return Candidate::Mismatch;
        }
        if have < self.delimiter.len() {
            return Candidate::NeedMore;
        }

        self.pos += 1 + self.delimiter.len();
        self.finished = true;
        trace!("frame terminator matched");
        Candidate::Matched
    }
}

impl<R: Read> std::fmt::Debug for DelimitedReader<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Buffer contents may be payload; show positions only.
        f.debug_struct("DelimitedReader")
            .field("delimiter_len", &self.delimiter.len())
            .field("buffered", &(self.buf.len() - self.pos))
            .field("finished", &self.finished)
            .field("eof", &self.eof)
            .finish()
    }
}

impl<R: Read> Read for DelimitedReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if self.finished || out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos == self.buf.len() && !self.fill()? {
                // Underlying EOF mid-frame; finished stays false.
                return Ok(0);
            }

            // No delimiter yet: raw pass-through (delimiter line phase).
            if self.delimiter.is_empty() {
                let pending = self.buf.len() - self.pos;
                return Ok(self.deliver(pending, out));
            }

            let start = self.buf[self.pos..].iter().position(|&b| b == b'\n');
            match start {
                // Plain data as far as buffered.
                None => {
                    let pending = self.buf.len() - self.pos;
                    return Ok(self.deliver(pending, out));
                }
                // Data before the candidate is deliverable as-is.
                Some(i) if i > 0 => return Ok(self.deliver(i, out)),
                Some(_) => match self.try_match() {
                    Candidate::Matched => return Ok(0),
                    // The candidate's leading byte is data; the rest is
                    // rescanned and may start a new candidate.
                    Candidate::Mismatch => return Ok(self.deliver(1, out)),
                    Candidate::NeedMore => {
                        if !self.fill()? {
                            // EOF with a partial candidate held: flush it
                            // back as data, never as a terminator.
                            return Ok(self.deliver(1, out));
                        }
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DELIM: &[u8] = b"--wl-testdelimiter";

    /// Returns at most `chunk` bytes per read, exercising arbitrary
    /// transport chunking.
    struct ChunkedReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl ChunkedReader {
        fn new(data: impl Into<Vec<u8>>, chunk: usize) -> Self {
            Self {
                data: data.into(),
                pos: 0,
                chunk,
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.data.len() {
                return Ok(0);
            }
            let n = (self.data.len() - self.pos).min(buf.len()).min(self.chunk);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut wire = payload.to_vec();
        wire.push(b'\n');
        wire.extend_from_slice(DELIM);
        wire
    }

    fn read_all<R: Read>(framer: &mut DelimitedReader<'_, R>) -> Vec<u8> {
        let mut out = Vec::new();
        framer.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn reads_payload_up_to_delimiter() {
        let mut source = Cursor::new(frame(b"hello world"));
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(read_all(&mut framer), b"hello world");
        assert!(framer.is_finished());
    }

    #[test]
    fn payload_with_embedded_newlines_roundtrips() {
        let payload = b"line one\nline two\r\nline three\r";
        let mut source = Cursor::new(frame(payload));
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(read_all(&mut framer), payload);
        assert!(framer.is_finished());
    }

    #[test]
    fn delimiter_prefix_in_payload_is_data() {
        // A line that starts like the delimiter but diverges must not
        // terminate the frame.
        let mut payload = b"before\n".to_vec();
        payload.extend_from_slice(&DELIM[..10]);
        payload.extend_from_slice(b"XYZ\nafter");
        let mut source = Cursor::new(frame(&payload));
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(read_all(&mut framer), payload);
        assert!(framer.is_finished());
    }

    #[test]
    fn delimiter_not_at_line_boundary_is_data() {
        // The exact delimiter bytes embedded mid-line are plain data.
        let mut payload = b"prefix".to_vec();
        payload.extend_from_slice(DELIM);
        payload.extend_from_slice(b"suffix");
        let mut source = Cursor::new(frame(&payload));
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(read_all(&mut framer), payload);
        assert!(framer.is_finished());
    }

    #[test]
    fn carriage_return_before_terminator_stays_in_payload() {
        // Only `\n` + delimiter terminates; the `\r` is payload.
        let mut wire = b"payload\r\n".to_vec();
        wire.extend_from_slice(DELIM);
        let mut source = Cursor::new(wire);
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(read_all(&mut framer), b"payload\r");
        assert!(framer.is_finished());
    }

    #[test]
    fn payload_ending_in_carriage_return_roundtrips() {
        let payload = b"ends with cr\r";
        for chunk in [1, 2, 5, 4096] {
            let mut source = ChunkedReader::new(frame(payload), chunk);
            let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
            assert_eq!(read_all(&mut framer), payload, "chunk size {chunk}");
            assert!(framer.is_finished());
        }
    }

    #[test]
    fn works_at_every_chunk_size() {
        let payload = b"some\npayload\nwith\nlines";
        for chunk in 1..=8 {
            let mut source = ChunkedReader::new(frame(payload), chunk);
            let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
            assert_eq!(read_all(&mut framer), payload, "chunk size {chunk}");
            assert!(framer.is_finished());
        }
    }

    #[test]
    fn eof_mid_frame_is_not_finished() {
        let mut source = Cursor::new(b"truncated without delim".to_vec());
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(read_all(&mut framer), b"truncated without delim");
        assert!(!framer.is_finished());
    }

    #[test]
    fn eof_with_partial_candidate_flushes_it_as_data() {
        // Stream ends inside a would-be terminator; those bytes are data.
        let mut wire = b"data\n".to_vec();
        wire.extend_from_slice(&DELIM[..5]);
        let mut source = Cursor::new(wire.clone());
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(read_all(&mut framer), wire);
        assert!(!framer.is_finished());
    }

    #[test]
    fn overrun_hand_off_recovers_back_to_back_frames() {
        let mut wire = frame(b"first frame");
        wire.extend_from_slice(&frame(b"second frame"));

        for chunk in [1, 3, 7, 64, 4096] {
            let mut source = ChunkedReader::new(wire.clone(), chunk);

            let mut first = DelimitedReader::new(&mut source, DELIM, Vec::new());
            assert_eq!(read_all(&mut first), b"first frame");
            assert!(first.is_finished());
            let overrun = first.into_overrun();

            let mut second = DelimitedReader::new(&mut source, DELIM, overrun);
            assert_eq!(read_all(&mut second), b"second frame", "chunk {chunk}");
            assert!(second.is_finished());
        }
    }

    #[test]
    fn from_stream_reads_delimiter_line() {
        let mut wire = b"tok-123\n".to_vec();
        wire.extend_from_slice(b"body bytes\ntok-123");
        let mut source = Cursor::new(wire);
        let mut framer = DelimitedReader::from_stream(&mut source, Vec::new())
            .unwrap()
            .unwrap();
        assert_eq!(framer.delimiter(), b"tok-123");
        assert_eq!(read_all(&mut framer), b"body bytes");
        assert!(framer.is_finished());
    }

    #[test]
    fn from_stream_on_exhausted_source_is_clean_end() {
        let mut source = Cursor::new(Vec::<u8>::new());
        let framer = DelimitedReader::from_stream(&mut source, Vec::new()).unwrap();
        assert!(framer.is_none());
    }

    #[test]
    fn from_stream_on_truncated_delimiter_line_fails() {
        // An empty first line is a malformed frame, not a clean close.
        let mut source = Cursor::new(b"\nrest".to_vec());
        let err = DelimitedReader::from_stream(&mut source, Vec::new()).unwrap_err();
        assert!(matches!(err, FrameError::MissingDelimiter));
    }

    #[test]
    fn read_line_strips_carriage_return() {
        let mut wire = b"alpha\r\nbeta\n\ngamma\n".to_vec();
        wire.extend_from_slice(DELIM);
        let mut source = Cursor::new(wire);
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(framer.read_line().unwrap().as_deref(), Some("alpha"));
        assert_eq!(framer.read_line().unwrap().as_deref(), Some("beta"));
        assert_eq!(framer.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(framer.read_line().unwrap().as_deref(), Some("gamma"));
        assert_eq!(framer.read_line().unwrap(), None);
        assert!(framer.is_finished());
    }

    #[test]
    fn read_line_rejects_oversized_line() {
        let mut wire = vec![b'a'; MAX_LINE_LEN + 10];
        wire.push(b'\n');
        wire.extend_from_slice(DELIM);
        let mut source = Cursor::new(wire);
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        let err = framer.read_line().unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { .. }));
    }

    #[test]
    fn skip_to_end_discards_rest_and_preserves_overrun() {
        let mut wire = frame(b"ignored payload");
        wire.extend_from_slice(b"NEXT");
        let mut source = Cursor::new(wire);
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        framer.skip_to_end().unwrap();
        assert!(framer.is_finished());
        assert_eq!(framer.into_overrun(), b"NEXT");
    }

    #[test]
    fn push_overrun_is_delivered_first() {
        let mut source = Cursor::new(frame(b" tail"));
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        framer.push_overrun(b"head");
        assert_eq!(read_all(&mut framer), b"head tail");
    }

    #[test]
    fn consecutive_newlines_before_delimiter() {
        // Only the final newline belongs to the terminator.
        let payload = b"trailing blank lines\n\n";
        let mut source = Cursor::new(frame(payload));
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(read_all(&mut framer), payload);
        assert!(framer.is_finished());
    }

    #[test]
    fn empty_payload_frame() {
        let mut source = Cursor::new(frame(b""));
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert_eq!(read_all(&mut framer), b"");
        assert!(framer.is_finished());
    }
}
