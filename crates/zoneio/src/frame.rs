use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

/// `b"GET "` read as a little-endian `u32`: the four bytes sitting where a
/// length prefix should be when a web browser opens the game port.
pub const HTTP_MAGIC: u32 = u32::from_le_bytes(*b"GET ");

/// One unit of inbound traffic.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// One frame payload with the length prefix stripped: a type byte plus the
    /// type-specific body.
    Frame(Bytes),
    /// The peer is speaking plaintext HTTP; carries everything buffered so far,
    /// verbatim. Detection only, not a parsed request.
    HttpProbe(Bytes),
}

#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_frame_len: usize,
}

impl<R> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            max_frame_len: 8 * 1024 * 1024,
        }
    }

    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max.max(1);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Pop one inbound item from the bytes buffered so far.
    ///
    /// Returns `Ok(None)` when the buffer holds less than one complete frame;
    /// the caller reads more and retries. A short buffer is never an error.
    pub fn pop_buffered(&mut self) -> std::io::Result<Option<Inbound>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let hdr = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if hdr == HTTP_MAGIC {
            // Checked at every frame boundary, and it wins over normal framing.
            return Ok(Some(Inbound::HttpProbe(self.buf.split().freeze())));
        }

        let len = hdr as usize;
        if len > self.max_frame_len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "frame too large",
            ));
        }

        if self.buf.len() < 4 + len {
            return Ok(None);
        }

        self.buf.advance(4);
        Ok(Some(Inbound::Frame(self.buf.split_to(len).freeze())))
    }

    /// Whether a complete inbound item is already sitting in the buffer.
    ///
    /// Lets the handshake notice that the client packed more than one message
    /// into its very first write.
    pub fn frame_buffered(&self) -> bool {
        if self.buf.len() < 4 {
            return false;
        }
        let hdr = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        hdr == HTTP_MAGIC || self.buf.len() >= 4 + hdr as usize
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the next frame or HTTP probe.
    ///
    /// Returns:
    /// - `Ok(Some(inbound))` for one decoded item,
    /// - `Ok(None)` on clean EOF with no buffered data.
    ///
    /// A declared length larger than what has arrived so far just waits for
    /// more bytes; EOF in the middle of a frame is an error.
    pub async fn read_inbound(&mut self) -> std::io::Result<Option<Inbound>> {
        loop {
            if let Some(inbound) = self.pop_buffered()? {
                return Ok(Some(inbound));
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof while reading frame",
                ));
            }
        }
    }
}

/// Frame a payload for the wire: `u32` little-endian length, then the payload.
///
/// Pre-encoding keeps per-connection writer tasks a dumb byte pump, which also
/// lets raw (unframed) HTTP answer text flow through the same channel.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let len = payload.len() as u32;
    let mut b = Vec::with_capacity(4 + payload.len());
    b.extend_from_slice(&len.to_le_bytes());
    b.extend_from_slice(payload);
    Bytes::from(b)
}

#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub async fn write_frame(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.write_frame_parts(&[payload]).await
    }

    /// Write a frame without concatenating payload parts.
    ///
    /// Avoids an extra copy when the payload already lives in separate buffers
    /// (e.g., a one-byte type code plus an encoded body).
    pub async fn write_frame_parts(&mut self, parts: &[&[u8]]) -> std::io::Result<()> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        let len_u32: u32 = len
            .try_into()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too big"))?;

        self.inner.write_all(&len_u32.to_le_bytes()).await?;
        for p in parts {
            if !p.is_empty() {
                self.inner.write_all(p).await?;
            }
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush().await
    }
}
