//! Container header: `[magic:3][version:1][chunkSize:4][nonce:8]`.
//!
//! Written once when the container is created and immutable afterwards;
//! changing the chunk size or the nonce means recreating the file.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::config::{BLOCK_SIZE, HEADER_LENGTH, MAGIC, MAX_CHUNK_SIZE, VERSION};
use crate::error::{Result, TidelockError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    version: u8,
    chunk_size: u32,
    nonce: u64,
}

impl ContainerHeader {
    pub const LENGTH: usize = HEADER_LENGTH;

    pub fn new(chunk_size: u32, nonce: u64) -> Result<Self> {
        validate_chunk_size(chunk_size)?;
        Ok(Self { version: VERSION, chunk_size, nonce })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Ciphertext bytes covered by one integrity tag; 0 when integrity is
    /// disabled.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn integrity_enabled(&self) -> bool {
        self.chunk_size > 0
    }

    /// Minimum unit callers must align to when splitting this container
    /// into independently processed byte ranges.
    pub fn alignment_unit(&self) -> u64 {
        if self.chunk_size > 0 {
            u64::from(self.chunk_size)
        } else {
            BLOCK_SIZE as u64
        }
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u8(self.version)?;
        writer.write_u32::<BigEndian>(self.chunk_size)?;
        writer.write_u64::<BigEndian>(self.nonce)?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; MAGIC.len()];
        reader
            .read_exact(&mut magic)
            .map_err(|_| TidelockError::MalformedContainer("truncated header".into()))?;

        if magic != MAGIC {
            return Err(TidelockError::MalformedContainer("bad magic".into()));
        }

        let version = reader
            .read_u8()
            .map_err(|_| TidelockError::MalformedContainer("truncated header".into()))?;

        if version != VERSION {
            return Err(TidelockError::MalformedContainer(format!(
                "unsupported version {version}"
            )));
        }

        let chunk_size = reader
            .read_u32::<BigEndian>()
            .map_err(|_| TidelockError::MalformedContainer("truncated header".into()))?;

        validate_chunk_size(chunk_size)?;

        let nonce = reader
            .read_u64::<BigEndian>()
            .map_err(|_| TidelockError::MalformedContainer("truncated header".into()))?;

        Ok(Self { version, chunk_size, nonce })
    }
}

fn validate_chunk_size(chunk_size: u32) -> Result<()> {
    if chunk_size == 0 {
        return Ok(());
    }

    if chunk_size % BLOCK_SIZE as u32 != 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(TidelockError::MalformedContainer(format!(
            "chunk size must be a multiple of {BLOCK_SIZE} and at most {MAX_CHUNK_SIZE}, got {chunk_size}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let header = ContainerHeader::new(256 * 1024, 0xAABB_CCDD_0011_2233).unwrap();
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), ContainerHeader::LENGTH);

        let parsed = ContainerHeader::read_from(buf.as_slice()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_layout_is_bit_exact() {
        let header = ContainerHeader::new(32, 1).unwrap();
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..3], b"TLK");
        assert_eq!(buf[3], VERSION);
        assert_eq!(&buf[4..8], &[0, 0, 0, 32]);
        assert_eq!(&buf[8..16], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut buf = Vec::new();
        ContainerHeader::new(0, 7).unwrap().write_to(&mut buf).unwrap();
        buf[0] = b'X';
        assert!(matches!(
            ContainerHeader::read_from(buf.as_slice()),
            Err(TidelockError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_rejects_truncated() {
        let mut buf = Vec::new();
        ContainerHeader::new(0, 7).unwrap().write_to(&mut buf).unwrap();
        assert!(ContainerHeader::read_from(&buf[..10]).is_err());
    }

    #[test]
    fn test_rejects_unaligned_chunk_size() {
        assert!(ContainerHeader::new(100, 1).is_err());
        assert!(ContainerHeader::new(MAX_CHUNK_SIZE + 16, 1).is_err());
        assert!(ContainerHeader::new(0, 1).is_ok());
    }
}
