//! Seekable encrypt/decrypt views over a container's base stream.
//!
//! Both views work in the plaintext domain: offsets and lengths refer to
//! the virtual file, and the translation to physical offsets (header plus
//! interleaved integrity tags) happens here. The AES-CTR keystream is
//! positioned by seeking, so any chunk can be processed without touching
//! the bytes before it; that is what lets transfer workers own disjoint
//! ranges of one physical file.

use std::io::{self, Read, Seek, SeekFrom, Write};

use aes::Aes256;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use zeroize::Zeroizing;

use crate::config::{DEFAULT_CHUNK_SIZE, HEADER_LENGTH, KEY_LENGTH, TAG_LENGTH};
use crate::container::header::ContainerHeader;
use crate::error::{Result, TidelockError};
use crate::file::{RandomAccessStream, ReadStream};
use crate::integrity::{self, ChunkMac};
use crate::secret::DriveKeyMaterial;

type Aes256Ctr = Ctr128BE<Aes256>;

/// Keystream for this container positioned at a plaintext offset. The
/// 128-bit counter is the 8-byte nonce in the high half and the block
/// counter in the low half.
fn keystream_at(key: &[u8; KEY_LENGTH], nonce: u64, plain_offset: u64) -> Aes256Ctr {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&nonce.to_be_bytes());
    let mut cipher = Aes256Ctr::new(key.into(), (&iv).into());
    cipher.seek(plain_offset);
    cipher
}

fn seek_target(pos: SeekFrom, current: u64, len: u64) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
    };
    target.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before byte 0"))
}

/// Read-only plaintext view of a container.
///
/// The first access to a chunk validates its tag before any byte of that
/// chunk is released; skipping verification is an explicit, separately
/// constructed mode (see [`VaultFile::decrypt_stream_unverified`]), never
/// a fallback after a failure.
///
/// [`VaultFile::decrypt_stream_unverified`]: crate::vault::VaultFile::decrypt_stream_unverified
pub struct DecryptStream {
    base: Box<dyn ReadStream>,
    header: ContainerHeader,
    key: Zeroizing<[u8; KEY_LENGTH]>,
    mac: Option<ChunkMac>,
    verify: bool,
    virtual_len: u64,
    pos: u64,
    cached: Option<u64>,
    cache: Vec<u8>,
}

impl DecryptStream {
    pub fn new(mut base: Box<dyn ReadStream>, keys: &DriveKeyMaterial, verify: bool) -> Result<Self> {
        base.seek(SeekFrom::Start(0))?;
        let header = ContainerHeader::read_from(&mut base)?;

        let physical_len = base.seek(SeekFrom::End(0))?;
        let data_len = physical_len - HEADER_LENGTH as u64;
        let virtual_len = integrity::virtual_len(data_len, header.chunk_size())?;

        let mac = if header.integrity_enabled() {
            Some(ChunkMac::new(keys.hmac_key())?)
        } else {
            None
        };

        Ok(Self {
            base,
            header,
            key: Zeroizing::new(*keys.drive_key()),
            mac,
            verify,
            virtual_len,
            pos: 0,
            cached: None,
            cache: Vec::new(),
        })
    }

    /// Plaintext-visible length.
    pub fn virtual_len(&self) -> u64 {
        self.virtual_len
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Moves the read position in the plaintext domain. Positions past the
    /// end are allowed; reads there return 0 bytes.
    pub fn seek_to(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Chunk granularity for caching; the header chunk size, or a fixed
    /// window when integrity is off.
    fn window(&self) -> u64 {
        if self.header.integrity_enabled() {
            u64::from(self.header.chunk_size())
        } else {
            u64::from(DEFAULT_CHUNK_SIZE)
        }
    }

    fn load_chunk(&mut self, index: u64) -> Result<()> {
        let window = self.window();
        let start = index * window;
        let len = (self.virtual_len - start).min(window) as usize;

        let mut buf = vec![0u8; len];
        if self.header.integrity_enabled() {
            let group = TAG_LENGTH as u64 + window;
            self.base
                .seek(SeekFrom::Start(HEADER_LENGTH as u64 + index * group))?;

            let mut tag = [0u8; TAG_LENGTH];
            self.base.read_exact(&mut tag)?;
            self.base.read_exact(&mut buf)?;

            if self.verify {
                if let Some(mac) = &self.mac {
                    // Verified over the ciphertext, before a single
                    // plaintext byte leaves this chunk.
                    mac.verify(index, &buf, &tag)?;
                }
            }
        } else {
            self.base.seek(SeekFrom::Start(HEADER_LENGTH as u64 + start))?;
            self.base.read_exact(&mut buf)?;
        }

        keystream_at(&self.key, self.header.nonce(), start).apply_keystream(&mut buf);

        self.cache = buf;
        self.cached = Some(index);
        Ok(())
    }

    /// Reads plaintext at the current position.
    pub fn read_plain(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.pos >= self.virtual_len {
            return Ok(0);
        }

        let window = self.window();
        let index = self.pos / window;
        if self.cached != Some(index) {
            self.load_chunk(index)?;
        }

        let within = (self.pos % window) as usize;
        let n = buf.len().min(self.cache.len() - within);
        buf[..n].copy_from_slice(&self.cache[within..within + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Read for DecryptStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_plain(buf).map_err(TidelockError::into_io)
    }
}

impl Seek for DecryptStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = seek_target(pos, self.pos, self.virtual_len)?;
        Ok(self.pos)
    }
}

/// Write-only plaintext view of a container.
///
/// Writing to a byte range whose nonce has already produced ciphertext is
/// rejected unless the stream was opened with range rewriting enabled:
/// reusing a CTR position with different plaintext leaks the XOR of the
/// two plaintexts.
pub struct EncryptStream {
    base: Box<dyn RandomAccessStream>,
    header: ContainerHeader,
    key: Zeroizing<[u8; KEY_LENGTH]>,
    mac: Option<ChunkMac>,
    allow_range_rewrite: bool,
    virtual_len: u64,
    committed_len: u64,
    pos: u64,
    /// Plaintext offset where the write buffer begins. Always a chunk
    /// start when integrity is on; any offset when it is off, since there
    /// are no tag boundaries to respect.
    anchor: Option<u64>,
    chunk: Vec<u8>,
    dirty: bool,
}

impl EncryptStream {
    pub fn new(
        mut base: Box<dyn RandomAccessStream>,
        keys: &DriveKeyMaterial,
        allow_range_rewrite: bool,
    ) -> Result<Self> {
        base.seek(SeekFrom::Start(0))?;
        let header = ContainerHeader::read_from(&mut base)?;

        let physical_len = base.seek(SeekFrom::End(0))?;
        let data_len = physical_len - HEADER_LENGTH as u64;
        let committed_len = integrity::virtual_len(data_len, header.chunk_size())?;

        if committed_len > 0 && !allow_range_rewrite {
            return Err(TidelockError::OverwriteNotPermitted);
        }

        let mac = if header.integrity_enabled() {
            Some(ChunkMac::new(keys.hmac_key())?)
        } else {
            None
        };

        Ok(Self {
            base,
            header,
            key: Zeroizing::new(*keys.drive_key()),
            mac,
            allow_range_rewrite,
            virtual_len: committed_len,
            committed_len,
            pos: 0,
            anchor: None,
            chunk: Vec::new(),
            dirty: false,
        })
    }

    pub fn virtual_len(&self) -> u64 {
        self.virtual_len
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    fn window(&self) -> u64 {
        if self.header.integrity_enabled() {
            u64::from(self.header.chunk_size())
        } else {
            u64::from(DEFAULT_CHUNK_SIZE)
        }
    }

    /// Moves the write position in the plaintext domain.
    pub fn seek_to(&mut self, pos: u64) -> Result<()> {
        if pos < self.committed_len && !self.allow_range_rewrite {
            return Err(TidelockError::OverwriteNotPermitted);
        }
        self.flush_chunk()?;
        self.pos = pos;
        Ok(())
    }

    /// Re-anchors the buffer at chunk start `start`. Only the tagged path
    /// uses this; a rewrite that lands inside an existing chunk merges
    /// with its current plaintext so untouched bytes survive. A write
    /// covering the whole chunk (`full_cover`) replaces it outright with
    /// nothing read back, so fresh writes below a sibling's flushed range
    /// never verify the zeros of a sparse hole.
    fn switch_chunk(&mut self, start: u64, full_cover: bool) -> Result<()> {
        self.flush_chunk()?;

        let window = self.window();
        self.chunk = if full_cover || start >= self.committed_len {
            Vec::new()
        } else {
            let index = start / window;
            let len = (self.committed_len - start).min(window) as usize;
            let mut buf = vec![0u8; len];
            let group = TAG_LENGTH as u64 + window;
            self.base
                .seek(SeekFrom::Start(HEADER_LENGTH as u64 + index * group))?;
            let mut tag = [0u8; TAG_LENGTH];
            self.base.read_exact(&mut tag)?;
            self.base.read_exact(&mut buf)?;
            if let Some(mac) = &self.mac {
                mac.verify(index, &buf, &tag)?;
            }
            keystream_at(&self.key, self.header.nonce(), start).apply_keystream(&mut buf);
            buf
        };

        self.anchor = Some(start);
        self.dirty = false;
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<()> {
        let Some(start) = self.anchor else {
            return Ok(());
        };
        if !self.dirty || self.chunk.is_empty() {
            self.dirty = false;
            return Ok(());
        }

        let mut data = self.chunk.clone();
        keystream_at(&self.key, self.header.nonce(), start).apply_keystream(&mut data);

        if let Some(mac) = &self.mac {
            let window = self.window();
            let group = TAG_LENGTH as u64 + window;
            let index = start / window;
            let tag = mac.compute(index, &data);
            self.base
                .seek(SeekFrom::Start(HEADER_LENGTH as u64 + index * group))?;
            self.base.write_all(&tag)?;
            self.base.write_all(&data)?;
        } else {
            self.base.seek(SeekFrom::Start(HEADER_LENGTH as u64 + start))?;
            self.base.write_all(&data)?;
        }

        self.committed_len = self.committed_len.max(start + self.chunk.len() as u64);
        self.dirty = false;
        Ok(())
    }

    /// Writes plaintext at the current position.
    pub fn write_plain(&mut self, buf: &[u8]) -> Result<usize> {
        let window = self.window();
        let mut written = 0;

        while written < buf.len() {
            if self.mac.is_some() {
                let start = (self.pos / window) * window;
                let within = (self.pos - start) as usize;

                if self.anchor != Some(start) {
                    let full_cover = within == 0 && buf.len() - written >= window as usize;
                    self.switch_chunk(start, full_cover)?;
                }

                if within > self.chunk.len() {
                    return Err(TidelockError::Io(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "non-contiguous write inside a chunk",
                    )));
                }

                let n = (buf.len() - written).min(window as usize - within);
                let end = within + n;
                if end > self.chunk.len() {
                    self.chunk.resize(end, 0);
                }
                self.chunk[within..end].copy_from_slice(&buf[written..written + n]);

                self.dirty = true;
                self.pos += n as u64;
                written += n;
            } else {
                // No tags means no fixed boundaries; the buffer starts
                // wherever the write does and only batches I/O. Anything
                // that is not an append to it gets its own anchor.
                let append_at = self.anchor.map(|a| a + self.chunk.len() as u64);
                if append_at != Some(self.pos) || self.chunk.len() >= window as usize {
                    self.flush_chunk()?;
                    self.anchor = Some(self.pos);
                    self.chunk = Vec::new();
                }

                let n = (buf.len() - written).min(window as usize - self.chunk.len());
                self.chunk.extend_from_slice(&buf[written..written + n]);

                self.dirty = true;
                self.pos += n as u64;
                written += n;
            }

            self.virtual_len = self.virtual_len.max(self.pos);
        }

        Ok(written)
    }

    /// Flushes any buffered partial chunk and the base stream. Must be
    /// called before the container is read back.
    pub fn finish(&mut self) -> Result<()> {
        self.flush_chunk()?;
        self.base.flush()?;
        Ok(())
    }
}

impl Write for EncryptStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_plain(buf).map_err(TidelockError::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.finish().map_err(TidelockError::into_io)
    }
}

impl Seek for EncryptStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = seek_target(pos, self.pos, self.virtual_len)?;
        self.seek_to(target).map_err(TidelockError::into_io)?;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keystream_seek_matches_sequential() {
        let key = [9u8; KEY_LENGTH];
        let nonce = 0x1122_3344_5566_7788;

        let mut whole = vec![0xAB; 100];
        keystream_at(&key, nonce, 0).apply_keystream(&mut whole);

        let mut head = vec![0xAB; 37];
        let mut tail = vec![0xAB; 63];
        keystream_at(&key, nonce, 0).apply_keystream(&mut head);
        keystream_at(&key, nonce, 37).apply_keystream(&mut tail);

        assert_eq!(&whole[..37], &head[..]);
        assert_eq!(&whole[37..], &tail[..]);
    }

    #[test]
    fn test_keystream_differs_per_nonce() {
        let key = [9u8; KEY_LENGTH];
        let mut a = vec![0u8; 32];
        let mut b = vec![0u8; 32];
        keystream_at(&key, 1, 0).apply_keystream(&mut a);
        keystream_at(&key, 2, 0).apply_keystream(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_seek_target_bounds() {
        assert_eq!(seek_target(SeekFrom::Start(5), 0, 10).unwrap(), 5);
        assert_eq!(seek_target(SeekFrom::End(-3), 0, 10).unwrap(), 7);
        assert_eq!(seek_target(SeekFrom::Current(2), 4, 10).unwrap(), 6);
        assert!(seek_target(SeekFrom::End(-11), 0, 10).is_err());
    }
}
