//! Frame encoding: turns repository state into the bytes described in
//! [`super::format`].

use super::format::FrameKind;
use crate::ecr::EntityRepository;
use crate::error::Result;

/// Stateless encoder that reads repository state and produces frame bytes.
/// Grounded on the teacher's `delta/types.rs` `Delta`/`DeltaHeader`
/// construction, generalized from a single-operation delta to a
/// whole-tick, multi-chunk frame.
pub struct FrameEncoder;

impl FrameEncoder {
    /// Encode one frame. For [`FrameKind::Keyframe`], every recordable
    /// component's committed chunks are included (after sanitizing dead
    /// rows); `since_tick` is ignored. For [`FrameKind::Delta`], only
    /// chunks whose version is newer than `since_tick` are included.
    ///
    /// The repository's destruction log is drained as part of encoding:
    /// once a frame captures which entities died, those destructions don't
    /// need to be reported again.
    pub fn encode_frame(
        repo: &EntityRepository,
        recordable_cids: &[u8],
        kind: FrameKind,
        since_tick: u64,
        events: &[u8],
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let tick = repo.global_version();
        buf.extend_from_slice(&tick.to_le_bytes());
        buf.push(kind as u8);

        let destroyed = repo.drain_destruction_log();
        buf.extend_from_slice(&(destroyed.len() as u32).to_le_bytes());
        for e in &destroyed {
            buf.extend_from_slice(&e.index.to_le_bytes());
            buf.extend_from_slice(&e.generation.to_le_bytes());
        }

        buf.extend_from_slice(&(events.len() as u32).to_le_bytes());
        buf.extend_from_slice(events);

        let headers = repo.index().headers();
        let entities_per_chunk = repo.index().entities_per_chunk();
        let max_index = repo.index().max_issued_index();
        let last_chunk = if max_index < 0 { None } else { Some(max_index as usize / entities_per_chunk) };

        let mut header_records: Vec<(usize, Vec<u8>)> = Vec::new();
        if let Some(last) = last_chunk {
            for chunk_idx in 0..=last {
                let include = match kind {
                    FrameKind::Keyframe => headers.is_committed(chunk_idx),
                    FrameKind::Delta => headers.has_changes(chunk_idx, since_tick),
                };
                if !include {
                    continue;
                }
                let mut payload = Vec::new();
                headers.copy_chunk_to_buffer(chunk_idx, &mut payload)?;
                header_records.push((chunk_idx, payload));
            }
        }
        buf.extend_from_slice(&(header_records.len() as u32).to_le_bytes());
        for (chunk_idx, payload) in &header_records {
            buf.extend_from_slice(&(*chunk_idx as u32).to_le_bytes());
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(payload);
        }

        let mut used_cids: Vec<u8> = Vec::new();
        let mut component_records: Vec<(u8, usize, Vec<u8>)> = Vec::new();
        if let Some(last) = last_chunk {
            for &cid in recordable_cids {
                let Some(column) = repo.column_dyn(cid) else { continue };
                for chunk_idx in 0..=last {
                    let include = match kind {
                        FrameKind::Keyframe => headers.is_committed(chunk_idx),
                        FrameKind::Delta => column.has_changes_since(chunk_idx, since_tick),
                    };
                    if !include {
                        continue;
                    }
                    if kind == FrameKind::Keyframe {
                        let liveness = repo.index().get_chunk_liveness(chunk_idx)?;
                        column.sanitize_chunk(chunk_idx, &liveness, tick)?;
                    }
                    let mut payload = Vec::new();
                    column.copy_chunk_to_buffer(chunk_idx, &mut payload)?;
                    if !used_cids.contains(&cid) {
                        used_cids.push(cid);
                    }
                    component_records.push((cid, chunk_idx, payload));
                }
            }
        }

        buf.extend_from_slice(&(used_cids.len() as u32).to_le_bytes());
        for cid in &used_cids {
            buf.push(*cid);
            let name = crate::ecr::ComponentTypeRegistry::global().name_of(*cid).unwrap_or("");
            let name_bytes = name.as_bytes();
            buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            buf.extend_from_slice(name_bytes);
        }

        buf.extend_from_slice(&(component_records.len() as u32).to_le_bytes());
        for (cid, chunk_idx, payload) in &component_records {
            buf.push(*cid);
            buf.extend_from_slice(&(*chunk_idx as u32).to_le_bytes());
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(payload);
        }

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::format::{decode_frame, ByteCursor};

    #[derive(Clone, Copy, Default, PartialEq, Debug)]
    struct Position(f32, f32);

    #[test]
    fn keyframe_includes_header_and_component_chunks() {
        let repo = EntityRepository::new(64, 256, false);
        let cid = repo.register_plain::<Position>("Position");
        let e = repo.create_entity().unwrap();
        repo.add_component(e, cid, Position(1.0, 2.0)).unwrap();

        let bytes = FrameEncoder::encode_frame(&repo, &[cid], FrameKind::Keyframe, 0, &[]).unwrap();
        let mut cursor = ByteCursor::new(&bytes);
        let frame = decode_frame(&mut cursor).unwrap();
        assert!(matches!(frame.kind, FrameKind::Keyframe));
        assert!(!frame.header_chunks.is_empty());
        assert!(!frame.component_chunks.is_empty());
    }

    #[test]
    fn delta_frame_omits_unchanged_chunks() {
        let repo = EntityRepository::new(4096, 256, false);
        let cid = repo.register_plain::<Position>("Position2");
        let e = repo.create_entity().unwrap();
        repo.add_component(e, cid, Position(1.0, 2.0)).unwrap();
        let tick_after_setup = repo.global_version();

        let bytes =
            FrameEncoder::encode_frame(&repo, &[cid], FrameKind::Delta, tick_after_setup, &[]).unwrap();
        let mut cursor = ByteCursor::new(&bytes);
        let frame = decode_frame(&mut cursor).unwrap();
        assert!(frame.component_chunks.is_empty());
        assert!(frame.header_chunks.is_empty());
    }

    #[test]
    fn destruction_log_is_drained_into_frame() {
        let repo = EntityRepository::new(64, 256, false);
        let e = repo.create_entity().unwrap();
        repo.destroy_entity(e).unwrap();

        let bytes = FrameEncoder::encode_frame(&repo, &[], FrameKind::Delta, 0, &[]).unwrap();
        let mut cursor = ByteCursor::new(&bytes);
        let frame = decode_frame(&mut cursor).unwrap();
        assert_eq!(frame.destroyed, vec![(e.index, e.generation)]);
        assert!(repo.destruction_log_snapshot().is_empty());
    }
}
