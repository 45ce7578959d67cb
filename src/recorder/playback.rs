//! Random-access playback over a `.fdp` recording: seek by frame index or
//! simulation tick, step forward/backward, fast-forward, and full replay.

use std::path::Path;

use super::format::{decode_frame, ByteCursor, FrameKind, FILE_HEADER_LEN};
use super::reader::RecordingReader;
use crate::ecr::EntityRepository;
use crate::error::{Error, RecorderError, Result};

/// Offset and size of one frame within the recording file, discovered by a
/// single forward scan at open time.
#[derive(Clone, Copy, Debug)]
pub struct FrameMeta {
    pub offset: usize,
    pub len: usize,
    pub kind: FrameKind,
    pub tick: u64,
}

/// Indexes a recording's frame boundaries up front so arbitrary
/// seek/step/rewind operations don't require re-scanning from the start
/// each time.
pub struct PlaybackController {
    buf: Vec<u8>,
    frames: Vec<FrameMeta>,
    /// Index of the last frame applied to a repository, or `-1` if none
    /// has been applied yet.
    cursor: i64,
}

impl PlaybackController {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = RecordingReader::open(&path)?;
        let buf = std::fs::read(&path)?;

        let mut frames = Vec::new();
        let mut offset = FILE_HEADER_LEN;
        loop {
            let before = reader.remaining();
            let Some(frame) = reader.read_next_frame()? else { break };
            let after = reader.remaining();
            let len = before - after;
            frames.push(FrameMeta { offset, len, kind: frame.kind, tick: frame.tick });
            offset += len;
        }

        Ok(Self { buf, frames, cursor: -1 })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Index of the last frame applied, or `-1` if playback hasn't started.
    pub fn current_frame_index(&self) -> i64 {
        self.cursor
    }

    fn decode_at(&self, frame_idx: usize) -> Result<super::format::Frame> {
        let meta = self
            .frames
            .get(frame_idx)
            .ok_or_else(|| Error::out_of_range(format!("frame index {frame_idx} out of range")))?;
        let mut cursor = ByteCursor::new(&self.buf[meta.offset..meta.offset + meta.len]);
        decode_frame(&mut cursor)
    }

    /// Index of the nearest keyframe at or before `frame_idx`.
    fn nearest_keyframe_at_or_before(&self, frame_idx: usize) -> Option<usize> {
        (0..=frame_idx).rev().find(|&i| matches!(self.frames[i].kind, FrameKind::Keyframe))
    }

    /// Apply frames `[from, to]` (inclusive) to `repo` in order, without
    /// resetting prior state. Used internally to replay from the nearest
    /// keyframe forward to a target frame.
    fn replay_range(&self, repo: &EntityRepository, from: usize, to: usize) -> Result<()> {
        for i in from..=to {
            let frame = self.decode_at(i)?;
            RecordingReader::apply_frame(repo, &frame)?;
        }
        Ok(())
    }

    /// Seek to `frame_idx`, replaying from the nearest preceding keyframe.
    /// `repo` should be empty or freshly constructed; this does not reset
    /// existing state before replaying.
    pub fn seek_to_frame(&mut self, repo: &EntityRepository, frame_idx: usize) -> Result<()> {
        if frame_idx >= self.frames.len() {
            return Err(Error::out_of_range(format!("frame index {frame_idx} out of range")));
        }
        let keyframe = self.nearest_keyframe_at_or_before(frame_idx).ok_or_else(|| {
            Error::Recorder(RecorderError::WorkerFailed("no keyframe precedes requested frame".into()))
        })?;
        self.replay_range(repo, keyframe, frame_idx)?;
        self.cursor = frame_idx as i64;
        Ok(())
    }

    /// Seek to the first frame whose tick is `>= target_tick`, via binary
    /// search over the (monotonically increasing) frame tick sequence.
    pub fn seek_to_tick(&mut self, repo: &EntityRepository, target_tick: u64) -> Result<()> {
        let idx = self.frames.partition_point(|f| f.tick < target_tick);
        if idx >= self.frames.len() {
            return Err(Error::out_of_range(format!("no frame with tick >= {target_tick}")));
        }
        self.seek_to_frame(repo, idx)
    }

    /// Advance by one frame, applying it directly onto existing state
    /// (valid for both keyframes and deltas since both are self-applying).
    pub fn step_forward(&mut self, repo: &EntityRepository) -> Result<bool> {
        if self.cursor + 1 >= self.frames.len() as i64 {
            return Ok(false);
        }
        self.cursor += 1;
        let frame = self.decode_at(self.cursor as usize)?;
        RecordingReader::apply_frame(repo, &frame)?;
        Ok(true)
    }

    /// Step back one frame. Since deltas aren't invertible, this rewinds to
    /// the nearest keyframe and replays forward to `cursor - 1`.
    pub fn step_backward(&mut self, repo: &EntityRepository) -> Result<bool> {
        if self.cursor <= 0 {
            return Ok(false);
        }
        self.seek_to_frame(repo, (self.cursor - 1) as usize)?;
        Ok(true)
    }

    /// Jump `n` frames forward (clamped to the last frame), replaying every
    /// frame in between so deltas stay consistent.
    pub fn fast_forward(&mut self, repo: &EntityRepository, n: usize) -> Result<()> {
        let target = (self.cursor + n as i64).min(self.frames.len() as i64 - 1);
        for i in (self.cursor + 1)..=target {
            let frame = self.decode_at(i as usize)?;
            RecordingReader::apply_frame(repo, &frame)?;
        }
        self.cursor = target;
        Ok(())
    }

    /// Seek back to the very first frame.
    pub fn rewind(&mut self, repo: &EntityRepository) -> Result<()> {
        self.seek_to_frame(repo, 0)
    }

    /// Replay every remaining frame to the end, invoking `progress` after
    /// each one with `(frames_applied, total_frames)`.
    pub fn play_to_end(&mut self, repo: &EntityRepository, mut progress: impl FnMut(usize, usize)) -> Result<()> {
        let total = self.frames.len();
        while self.step_forward(repo)? {
            progress((self.cursor + 1) as usize, total);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::async_recorder::AsyncRecorder;
    use tempfile::NamedTempFile;

    #[derive(Clone, Copy, Default, PartialEq, Debug)]
    struct Counter(i32);

    fn build_recording(path: &std::path::Path, ticks: usize) -> u8 {
        let recorder = AsyncRecorder::create(path, 0).unwrap();
        let repo = EntityRepository::new(64, 256, false);
        let cid = repo.register_plain::<Counter>("PlaybackCounter");
        let e = repo.create_entity().unwrap();
        repo.add_component(e, cid, Counter(0)).unwrap();
        recorder.capture_frame(&repo, &[cid], FrameKind::Keyframe, 0, &[], true).unwrap();

        for i in 1..ticks as i32 {
            let since = repo.global_version();
            repo.tick();
            repo.set_component(e, cid, Counter(i)).unwrap();
            recorder
                .capture_frame(&repo, &[cid], FrameKind::Delta, since, &[], true)
                .unwrap();
        }
        recorder.dispose().unwrap();
        cid
    }

    #[test]
    fn random_seek_matches_sequential_replay() {
        let tmp = NamedTempFile::new().unwrap();
        let cid = build_recording(tmp.path(), 5);

        let mut pb = PlaybackController::open(tmp.path()).unwrap();
        assert_eq!(pb.frame_count(), 5);

        let repo_seq = EntityRepository::new(64, 256, false);
        repo_seq.register_plain::<Counter>("PlaybackCounter");
        pb.play_to_end(&repo_seq, |_, _| {}).unwrap();

        let mut pb2 = PlaybackController::open(tmp.path()).unwrap();
        let repo_jump = EntityRepository::new(64, 256, false);
        repo_jump.register_plain::<Counter>("PlaybackCounter");
        pb2.seek_to_frame(&repo_jump, 4).unwrap();

        let e = crate::ecr::Entity { index: 0, generation: 0 };
        assert_eq!(
            repo_seq.get_component::<Counter>(e, cid).unwrap(),
            repo_jump.get_component::<Counter>(e, cid).unwrap()
        );
    }

    #[test]
    fn rewind_returns_to_first_frame() {
        let tmp = NamedTempFile::new().unwrap();
        build_recording(tmp.path(), 3);
        let mut pb = PlaybackController::open(tmp.path()).unwrap();
        let repo = EntityRepository::new(64, 256, false);
        repo.register_plain::<Counter>("PlaybackCounter");
        pb.seek_to_frame(&repo, 2).unwrap();
        pb.rewind(&repo).unwrap();
        assert_eq!(pb.current_frame_index(), 0);
    }

    #[test]
    fn step_backward_from_start_returns_false() {
        let tmp = NamedTempFile::new().unwrap();
        build_recording(tmp.path(), 2);
        let mut pb = PlaybackController::open(tmp.path()).unwrap();
        let repo = EntityRepository::new(64, 256, false);
        repo.register_plain::<Counter>("PlaybackCounter");
        assert!(!pb.step_backward(&repo).unwrap());
    }
}
