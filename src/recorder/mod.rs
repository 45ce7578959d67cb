//! Flight recorder: binary keyframe/delta logging and deterministic replay.

pub mod async_recorder;
pub mod encoder;
pub mod format;
pub mod playback;
pub mod reader;

pub use async_recorder::AsyncRecorder;
pub use encoder::FrameEncoder;
pub use format::{Frame, FrameKind};
pub use playback::{FrameMeta, PlaybackController};
pub use reader::RecordingReader;
