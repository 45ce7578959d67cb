//! Binary wire format for `.fdp` recordings.
//!
//! ```text
//! file   := header frame*
//! header := magic(6) version(u32 LE) created_at(i64 LE)
//! frame  := tick(u64 LE) kind(u8) destroy_log events header_chunks* component_chunks*
//! destroy_log     := count(u32 LE) (index(i32 LE) generation(u16 LE))*
//! events          := len(u32 LE) bytes[len]
//! header_chunks   := count(u32 LE) (chunk_idx(u32 LE) len(u32 LE) bytes[len])*
//! component_chunks:= count(u32 LE) (cid(u8) chunk_idx(u32 LE) len(u32 LE) bytes[len])*
//! ```
//! All multi-byte integers are little-endian throughout, matching the
//! teacher's `types/delta.rs` wire layout conventions.

use crate::constants::{FORMAT_MAGIC, FORMAT_VERSION};
use crate::error::{RecorderError, Result};

/// Frame kind tag.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum FrameKind {
    /// A full snapshot of every recordable chunk.
    Keyframe = 0,
    /// Only chunks that changed since the frame's `since_tick`.
    Delta = 1,
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(FrameKind::Keyframe),
            1 => Ok(FrameKind::Delta),
            _ => Err(RecorderError::WorkerFailed(format!("unknown frame kind byte {b}")).into()),
        }
    }
}

/// Write the file-level header.
pub fn write_file_header(buf: &mut Vec<u8>, created_at: i64) {
    buf.extend_from_slice(FORMAT_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&created_at.to_le_bytes());
}

/// Size in bytes of the file-level header.
pub const FILE_HEADER_LEN: usize = 6 + 4 + 8;

/// Validate and consume a file-level header from the front of `bytes`.
pub fn read_file_header(bytes: &[u8]) -> Result<i64> {
    if bytes.len() < FILE_HEADER_LEN {
        return Err(RecorderError::TruncatedFrame { expected: FILE_HEADER_LEN, actual: bytes.len() }.into());
    }
    if &bytes[0..6] != FORMAT_MAGIC.as_slice() {
        return Err(RecorderError::BadMagic.into());
    }
    let version = u32::from_le_bytes(bytes[6..10].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(RecorderError::VersionMismatch { found: version, expected: FORMAT_VERSION }.into());
    }
    let created_at = i64::from_le_bytes(bytes[10..18].try_into().unwrap());
    Ok(created_at)
}

/// A record of one component chunk within a frame.
pub struct ChunkRecord {
    pub cid: u8,
    pub chunk_idx: usize,
    pub payload: Vec<u8>,
}

/// A record of one entity-header chunk within a frame.
pub struct HeaderChunkRecord {
    pub chunk_idx: usize,
    pub payload: Vec<u8>,
}

/// A fully decoded frame.
pub struct Frame {
    pub tick: u64,
    pub kind: FrameKind,
    pub destroyed: Vec<(i32, u16)>,
    pub events: Vec<u8>,
    pub header_chunks: Vec<HeaderChunkRecord>,
    /// Maps the CID a component had in the *writing* process to its
    /// registered name, so a reader whose process registered component
    /// types in a different order can still locate the right column.
    pub names: Vec<(u8, String)>,
    pub component_chunks: Vec<ChunkRecord>,
}

/// Sequential little-endian reader over an in-memory byte slice, used to
/// decode one frame at a time.
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(RecorderError::TruncatedFrame { expected: n, actual: self.remaining() }.into());
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }
}

/// Decode one frame starting at the cursor's current position, advancing it
/// past the frame on success.
pub fn decode_frame(cursor: &mut ByteCursor<'_>) -> Result<Frame> {
    let tick = cursor.read_u64()?;
    let kind = FrameKind::from_byte(cursor.read_u8()?)?;

    let destroy_count = cursor.read_u32()? as usize;
    let mut destroyed = Vec::with_capacity(destroy_count);
    for _ in 0..destroy_count {
        let index = cursor.read_i32()?;
        let generation = cursor.read_u16()?;
        destroyed.push((index, generation));
    }

    let event_len = cursor.read_u32()? as usize;
    let events = cursor.read_bytes(event_len)?;

    let header_count = cursor.read_u32()? as usize;
    let mut header_chunks = Vec::with_capacity(header_count);
    for _ in 0..header_count {
        let chunk_idx = cursor.read_u32()? as usize;
        let len = cursor.read_u32()? as usize;
        let payload = cursor.read_bytes(len)?;
        header_chunks.push(HeaderChunkRecord { chunk_idx, payload });
    }

    let name_count = cursor.read_u32()? as usize;
    let mut names = Vec::with_capacity(name_count);
    for _ in 0..name_count {
        let cid = cursor.read_u8()?;
        let name_len = cursor.read_u16()? as usize;
        let name_bytes = cursor.read_bytes(name_len)?;
        let name = String::from_utf8(name_bytes)
            .map_err(|e| RecorderError::WorkerFailed(format!("invalid component name: {e}")))?;
        names.push((cid, name));
    }

    let component_count = cursor.read_u32()? as usize;
    let mut component_chunks = Vec::with_capacity(component_count);
    for _ in 0..component_count {
        let cid = cursor.read_u8()?;
        let chunk_idx = cursor.read_u32()? as usize;
        let len = cursor.read_u32()? as usize;
        let payload = cursor.read_bytes(len)?;
        component_chunks.push(ChunkRecord { cid, chunk_idx, payload });
    }

    Ok(Frame { tick, kind, destroyed, events, header_chunks, names, component_chunks })
}
