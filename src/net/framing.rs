use crate::error::ProtocolError;

/// Anything shorter cannot be classified yet.
pub const MIN_PACKAGE_SIZE: usize = 4;
/// Hard cap for a single framed packet.
pub const MAX_PACKAGE_SIZE: usize = 128 * 1024 * 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum PacketKind {
    /// Not HTTP; every read is a complete packet.
    #[default]
    Opaque,
    HttpGet,
    HttpPost,
    HttpPostChunked,
    HttpResp,
    HttpRespChunked,
}

/// Incremental HTTP packet framer over a connection's receive buffer.
///
/// `frame` returns the expected total packet length: equal to the
/// buffered length means one complete packet, greater means more bytes
/// are needed (and is a sensible grow target), less means a complete
/// packet with trailing pipelined bytes behind it.
///
/// Chunked transfer framing is collapsed in place as size lines become
/// parseable, so the buffer converges to header plus contiguous body.
#[derive(Debug, Default)]
pub struct HttpFramer {
    kind: PacketKind,
    header_len: usize,
    body_len: usize,
}

impl HttpFramer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    #[inline]
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    #[inline]
    pub fn body_len(&self) -> usize {
        self.body_len
    }

    /// Forgets the current packet. Called after delivery so the next
    /// bytes are classified from scratch.
    pub fn reset(&mut self) {
        self.kind = PacketKind::Opaque;
        self.header_len = 0;
        self.body_len = 0;
    }

    pub fn frame(&mut self, buf: &mut Vec<u8>, len: &mut usize) -> Result<usize, ProtocolError> {
        if self.header_len == 0 {
            if *len < MIN_PACKAGE_SIZE {
                return Ok(MIN_PACKAGE_SIZE);
            }
            self.kind = classify(&buf[..*len]);
            if self.kind == PacketKind::Opaque {
                return Ok(*len);
            }
            let header_len = http_header_len(&buf[..*len]);
            if header_len == 0 {
                if *len >= MAX_PACKAGE_SIZE {
                    return Err(ProtocolError::Oversized(*len));
                }
                return Ok((*len * 2).min(MAX_PACKAGE_SIZE));
            }
            self.header_len = header_len;
        }

        if self.body_len == 0 {
            match self.kind {
                PacketKind::HttpGet => return Ok(self.header_len),
                PacketKind::HttpPostChunked | PacketKind::HttpRespChunked => {
                    return self.calc_chunked(buf, len);
                }
                _ => {}
            }

            let header = &buf[..self.header_len];
            if let Some(value) = header_value(header, b"Content-Length") {
                let n = std::str::from_utf8(value)
                    .ok()
                    .and_then(|s| s.trim().parse::<usize>().ok())
                    .ok_or(ProtocolError::BadContentLength)?;
                if n > MAX_PACKAGE_SIZE {
                    return Err(ProtocolError::Oversized(n));
                }
                self.body_len = n;
                return Ok(self.header_len + self.body_len);
            }
            if let Some(value) = header_value(header, b"Transfer-Encoding") {
                if value.eq_ignore_ascii_case(b"chunked") {
                    self.kind = match self.kind {
                        PacketKind::HttpResp => PacketKind::HttpRespChunked,
                        _ => PacketKind::HttpPostChunked,
                    };
                    return self.calc_chunked(buf, len);
                }
            }
            // No body length markers; take what is buffered.
            return Ok(*len);
        }

        match self.kind {
            PacketKind::HttpPostChunked | PacketKind::HttpRespChunked => {
                self.calc_chunked(buf, len)
            }
            _ => Ok(self.header_len + self.body_len),
        }
    }

    /// Consumes complete chunk size lines, splicing their framing out of
    /// the buffer and growing `body_len` by the decoded payload.
    fn calc_chunked(&mut self, buf: &mut Vec<u8>, len: &mut usize) -> Result<usize, ProtocolError> {
        loop {
            let chunk = self.header_len + self.body_len;
            if chunk >= *len {
                // All buffered bytes belong to pending chunk data; ask
                // for the rest plus slack for the next size line.
                return Ok(chunk + 32);
            }

            // The previous chunk's trailing CRLF reads as whitespace here.
            let mut p = chunk;
            while p < *len && matches!(buf[p], b'\r' | b'\n' | b' ' | b'\t') {
                p += 1;
            }
            let digits_start = p;
            let mut size: usize = 0;
            while p < *len && buf[p].is_ascii_hexdigit() {
                size = size * 16 + hex_val(buf[p]);
                if size > MAX_PACKAGE_SIZE {
                    return Err(ProtocolError::Oversized(size));
                }
                p += 1;
            }
            if p >= *len {
                // Size line split across reads.
                return Ok(*len + 32);
            }
            if p == digits_start {
                return Err(ProtocolError::BadChunkSize);
            }
            let Some(line_end) = find_crlf(&buf[..*len], p) else {
                return Ok(*len + 32);
            };

            if size == 0 {
                let after = line_end + 4;
                if after > *len {
                    // Terminal chunk split right at the trailing CRLF.
                    return Ok(*len + 2);
                }
                if &buf[line_end + 2..after] != b"\r\n" {
                    return Err(ProtocolError::ChunkFraming);
                }
                buf.copy_within(after..*len, chunk);
                *len -= after - chunk;
                return Ok(self.header_len + self.body_len);
            }

            if self.body_len + size > MAX_PACKAGE_SIZE {
                return Err(ProtocolError::Oversized(self.body_len + size));
            }
            let data_start = line_end + 2;
            buf.copy_within(data_start..*len, chunk);
            *len -= data_start - chunk;
            self.body_len += size;
        }
    }
}

fn classify(buf: &[u8]) -> PacketKind {
    if buf.starts_with(b"GET ") {
        PacketKind::HttpGet
    } else if buf.starts_with(b"POST") {
        PacketKind::HttpPost
    } else if buf.starts_with(b"HTTP") {
        PacketKind::HttpResp
    } else {
        PacketKind::Opaque
    }
}

/// Length of the header block including its blank line, or 0 when the
/// terminator is not buffered yet. Real HTTP headers never fit under 36
/// bytes, so the scan starts at offset 32.
pub fn http_header_len(buf: &[u8]) -> usize {
    if buf.len() < 36 {
        return 0;
    }
    for i in 32..=buf.len() - 4 {
        if &buf[i..i + 4] == b"\r\n\r\n" {
            return i + 4;
        }
    }
    0
}

/// Value of the first header line named `name`, trimmed of leading
/// whitespace. Names compare case-insensitively.
pub fn header_value<'a>(header: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let mut i = 0;
    while i < header.len() {
        if header.len() - i >= name.len() && header[i..i + name.len()].eq_ignore_ascii_case(name) {
            let mut p = i + name.len();
            while p < header.len() && header[p] != b':' {
                if header[p] == b'\r' {
                    return None;
                }
                p += 1;
            }
            p += 1;
            while p < header.len() && (header[p] == b' ' || header[p] == b'\t') {
                p += 1;
            }
            let start = p;
            while p < header.len() && header[p] != b'\r' {
                p += 1;
            }
            return Some(&header[start..p]);
        }
        match find_crlf(header, i) {
            Some(end) => i = end + 2,
            None => break,
        }
    }
    None
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    (from..buf.len() - 1).find(|&i| buf[i] == b'\r' && buf[i + 1] == b'\n')
}

#[inline]
fn hex_val(c: u8) -> usize {
    match c {
        b'0'..=b'9' => (c - b'0') as usize,
        b'a'..=b'f' => (c - b'a' + 10) as usize,
        _ => (c - b'A' + 10) as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET_REQ: &[u8] = b"GET / HTTP/1.1\r\nUser-Agent: swarm\r\n\r\n";

    fn framed(raw: &[u8]) -> (HttpFramer, Vec<u8>, usize, Result<usize, ProtocolError>) {
        let mut framer = HttpFramer::new();
        let mut buf = raw.to_vec();
        let mut len = buf.len();
        let res = framer.frame(&mut buf, &mut len);
        (framer, buf, len, res)
    }

    #[test]
    fn get_is_header_only() {
        let (framer, _, len, res) = framed(GET_REQ);
        assert_eq!(res, Ok(len));
        assert_eq!(framer.kind(), PacketKind::HttpGet);
        assert_eq!(framer.header_len(), GET_REQ.len());
    }

    #[test]
    fn content_length_body() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (framer, _, len, res) = framed(raw);
        assert_eq!(res, Ok(len));
        assert_eq!(framer.body_len(), 5);
        assert_eq!(framer.kind(), PacketKind::HttpPost);
    }

    #[test]
    fn content_length_waits_for_body() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\nhel";
        let (framer, _, len, res) = framed(raw);
        assert_eq!(res, Ok(len + 7));
        assert_eq!(framer.body_len(), 10);
    }

    #[test]
    fn opaque_delivers_as_is() {
        let (framer, _, len, res) = framed(b"\x01\x02\x03\x04\x05");
        assert_eq!(res, Ok(len));
        assert_eq!(framer.kind(), PacketKind::Opaque);
    }

    #[test]
    fn chunked_collapses_to_plain_body() {
        let header = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut raw = header.to_vec();
        raw.extend_from_slice(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n");

        let mut framer = HttpFramer::new();
        let mut len = raw.len();
        let res = framer.frame(&mut raw, &mut len);
        assert_eq!(res, Ok(len));
        assert_eq!(framer.kind(), PacketKind::HttpRespChunked);
        assert_eq!(framer.body_len(), 9);
        assert_eq!(&raw[framer.header_len()..len], b"Wikipedia");
    }

    #[test]
    fn chunked_split_across_reads() {
        let header = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let tail = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let full: Vec<u8> = header.iter().chain(tail.iter()).copied().collect();

        // Feed the stream a few bytes at a time, growing the buffer the
        // way a socket read loop would.
        for step in [1usize, 3, 7] {
            let mut framer = HttpFramer::new();
            let mut buf: Vec<u8> = Vec::new();
            let mut len = 0usize;
            let mut fed = 0usize;
            let mut done = None;
            while fed < full.len() {
                let take = step.min(full.len() - fed);
                buf.truncate(len);
                buf.extend_from_slice(&full[fed..fed + take]);
                len += take;
                fed += take;
                let expected = framer.frame(&mut buf, &mut len).unwrap();
                if expected == len {
                    done = Some(expected);
                    break;
                }
                assert!(expected > len, "step {step}: lost bytes mid-stream");
            }
            let total = done.expect("packet never completed");
            assert_eq!(&buf[framer.header_len()..total], b"Wikipedia");
        }
    }

    #[test]
    fn malformed_chunk_size_is_rejected() {
        let header = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut raw = header.to_vec();
        raw.extend_from_slice(b"zz\r\nWiki\r\n");
        let mut framer = HttpFramer::new();
        let mut len = raw.len();
        assert_eq!(
            framer.frame(&mut raw, &mut len),
            Err(ProtocolError::BadChunkSize)
        );
    }

    #[test]
    fn bad_content_length_is_rejected() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: ten\r\n\r\n..";
        let (_, _, _, res) = framed(raw);
        assert_eq!(res, Err(ProtocolError::BadContentLength));
    }

    #[test]
    fn header_value_lookup() {
        let header = b"GET / HTTP/1.1\r\nHost: example.com\r\ncontent-length:  42\r\n\r\n";
        assert_eq!(header_value(header, b"Host"), Some(&b"example.com"[..]));
        assert_eq!(header_value(header, b"Content-Length"), Some(&b"42"[..]));
        assert_eq!(header_value(header, b"Cookie"), None);
    }

    #[test]
    fn incomplete_header_asks_for_more() {
        let raw = b"GET / HTTP/1.1\r\nUser-Agent: something-long\r\n";
        let (_, _, len, res) = framed(raw);
        let expected = res.unwrap();
        assert!(expected > len);
    }
}
