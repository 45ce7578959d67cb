//! Sequential reading and replay of `.fdp` recordings onto a repository.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::format::{decode_frame, read_file_header, ByteCursor, Frame, FILE_HEADER_LEN};
use crate::ecr::{ComponentTypeRegistry, Entity, EntityRepository};
use crate::error::Result;

/// Reads frames out of a `.fdp` file and applies them to a repository.
///
/// Grounded on the teacher's `storage/heap.rs` `get_delta`-style sequential
/// chunk consumption, adapted to whole-file buffering: recordings in this
/// system are expected to be read start-to-finish for deterministic replay
/// rather than randomly addressed like the teacher's per-delta heap.
pub struct RecordingReader {
    buf: Vec<u8>,
    pos: usize,
    pub created_at: i64,
}

impl RecordingReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let created_at = read_file_header(&buf)?;
        Ok(Self { buf, pos: FILE_HEADER_LEN, created_at })
    }

    /// Remaining unread bytes in the file.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Decode the next frame without applying it.
    pub fn read_next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let mut cursor = ByteCursor::new(&self.buf[self.pos..]);
        let frame = decode_frame(&mut cursor)?;
        self.pos += cursor.position();
        Ok(Some(frame))
    }

    /// Apply a decoded frame to `repo`: destructions first, then events,
    /// then header and component chunks, remapping each frame-local
    /// component ID to the reading process's own CID by name before
    /// restoring. Component chunks whose name isn't registered in this
    /// process are skipped (tolerant load): a consumer that only cares
    /// about a subset of recorded component types doesn't need to register
    /// all of them.
    pub fn apply_frame(repo: &EntityRepository, frame: &Frame) -> Result<()> {
        for &(index, generation) in &frame.destroyed {
            let e = Entity { index, generation };
            let _ = repo.destroy_entity_quiet(e, frame.tick);
        }

        // No event bus to dispatch into; `frame.events` is carried through
        // the wire format for a future consumer.
        let _ = &frame.events;

        for record in &frame.header_chunks {
            repo.restore_header_chunk(record.chunk_idx, &record.payload, frame.tick)?;
        }
        repo.rebuild_after_restore()?;

        let registry = ComponentTypeRegistry::global();
        for record in &frame.component_chunks {
            let Some(name) = frame.names.iter().find(|(cid, _)| *cid == record.cid).map(|(_, n)| n.as_str())
            else {
                tracing::warn!(cid = record.cid, "recorded chunk has no name entry, skipping");
                continue;
            };
            let Some(local_cid) = registry.cid_of_name(name) else {
                tracing::warn!(name, "component type not registered in this process, skipping chunk");
                continue;
            };
            repo.restore_component_chunk(local_cid, record.chunk_idx, &record.payload, frame.tick)?;
        }

        repo.set_global_version(frame.tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::async_recorder::AsyncRecorder;
    use crate::recorder::format::FrameKind;
    use tempfile::NamedTempFile;

    #[derive(Clone, Copy, Default, PartialEq, Debug)]
    struct Position(f32);

    #[test]
    fn reader_reconstructs_repository_state() {
        let tmp = NamedTempFile::new().unwrap();
        let recorder = AsyncRecorder::create(tmp.path(), 7).unwrap();

        let src = EntityRepository::new(64, 256, false);
        let cid = src.register_plain::<Position>("ReaderPosition");
        let e = src.create_entity().unwrap();
        src.add_component(e, cid, Position(3.5)).unwrap();
        recorder.capture_frame(&src, &[cid], FrameKind::Keyframe, 0, &[], true).unwrap();
        recorder.dispose().unwrap();

        let mut reader = RecordingReader::open(tmp.path()).unwrap();
        assert_eq!(reader.created_at, 7);
        let dst = EntityRepository::new(64, 256, false);
        dst.register_plain::<Position>("ReaderPosition");

        let frame = reader.read_next_frame().unwrap().expect("one frame");
        RecordingReader::apply_frame(&dst, &frame).unwrap();

        assert!(dst.index().is_alive(e));
        assert_eq!(dst.get_component::<Position>(e, cid).unwrap(), Position(3.5));
        assert!(reader.read_next_frame().unwrap().is_none());
    }
}
