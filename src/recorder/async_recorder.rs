//! Asynchronous flight recorder: a double-buffered single-writer-thread
//! pipeline so frame capture never blocks the simulation on disk I/O.
//!
//! Grounded on the teacher's `delta/processor.rs` `DeltaProcessor`: a
//! `std::thread::Builder`-spawned worker, an `Arc<AtomicBool>` shutdown
//! flag, and a `Drop` impl that signals shutdown and joins the thread. The
//! work-stealing deque there becomes a single `Mutex<Vec<u8>>` front buffer
//! here, since there is exactly one producer (the simulation loop) and one
//! consumer (the writer thread) rather than a worker pool pulling from a
//! shared injector.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::format::{write_file_header, FrameKind};
use crate::constants::WORKER_PARK_TIMEOUT_MS;
use crate::ecr::EntityRepository;
use crate::error::{Error, RecorderError, Result};
use crate::recorder::encoder::FrameEncoder;

struct Shared {
    front: Mutex<Vec<u8>>,
    wake: Condvar,
    shutdown: AtomicBool,
    worker_error: Mutex<Option<String>>,
    file: Mutex<BufWriter<File>>,
}

/// Double-buffered async recorder for a single `.fdp` file.
pub struct AsyncRecorder {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    recorded_frames: Arc<AtomicU64>,
    dropped_frames: Arc<AtomicU64>,
    bytes_written: Arc<AtomicU64>,
}

impl AsyncRecorder {
    /// Create a new recording at `path`, writing the file header
    /// immediately and spawning the background writer thread.
    pub fn create(path: impl AsRef<Path>, created_at: i64) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        let mut writer = BufWriter::new(file);
        let mut header = Vec::new();
        write_file_header(&mut header, created_at);
        writer.write_all(&header)?;
        writer.flush()?;

        let shared = Arc::new(Shared {
            front: Mutex::new(Vec::new()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            worker_error: Mutex::new(None),
            file: Mutex::new(writer),
        });

        let recorded_frames = Arc::new(AtomicU64::new(0));
        let dropped_frames = Arc::new(AtomicU64::new(0));
        let bytes_written = Arc::new(AtomicU64::new(0));

        let worker_shared = shared.clone();
        let worker_bytes_written = bytes_written.clone();
        let worker = std::thread::Builder::new()
            .name("fdprec-recorder".into())
            .spawn(move || Self::worker_loop(worker_shared, worker_bytes_written))
            .map_err(|e| Error::Recorder(RecorderError::WorkerFailed(e.to_string())))?;

        Ok(Self {
            shared,
            worker: Some(worker),
            recorded_frames,
            dropped_frames,
            bytes_written,
        })
    }

    fn worker_loop(shared: Arc<Shared>, bytes_written: Arc<AtomicU64>) {
        loop {
            let mut back = {
                let mut front = shared.front.lock().unwrap();
                if front.is_empty() {
                    let (guard, _timeout) = shared
                        .wake
                        .wait_timeout(front, Duration::from_millis(WORKER_PARK_TIMEOUT_MS))
                        .unwrap();
                    front = guard;
                }
                std::mem::take(&mut *front)
            };
            if !back.is_empty() {
                let mut file = shared.file.lock().unwrap();
                if let Err(e) = file.write_all(&back) {
                    *shared.worker_error.lock().unwrap() = Some(e.to_string());
                } else {
                    bytes_written.fetch_add(back.len() as u64, Ordering::Relaxed);
                }
                back.clear();
            }
            if shared.shutdown.load(Ordering::Acquire) {
                let front_empty = shared.front.lock().unwrap().is_empty();
                if front_empty {
                    let _ = shared.file.lock().unwrap().flush();
                    return;
                }
            }
        }
    }

    /// Encode and enqueue a keyframe or delta frame for `repo`.
    ///
    /// `blocking = true` always enqueues, waiting for the front-buffer lock
    /// if the worker happens to be mid-swap. `blocking = false` drops the
    /// frame (incrementing the dropped-frame counter) rather than wait.
    pub fn capture_frame(
        &self,
        repo: &EntityRepository,
        recordable_cids: &[u8],
        kind: FrameKind,
        since_tick: u64,
        events: &[u8],
        blocking: bool,
    ) -> Result<()> {
        let bytes = FrameEncoder::encode_frame(repo, recordable_cids, kind, since_tick, events)?;
        self.enqueue(bytes, blocking)
    }

    fn enqueue(&self, bytes: Vec<u8>, blocking: bool) -> Result<()> {
        self.check_worker_error()?;
        if blocking {
            let mut front = self.shared.front.lock().unwrap();
            front.extend_from_slice(&bytes);
            self.recorded_frames.fetch_add(1, Ordering::Relaxed);
            drop(front);
            self.shared.wake.notify_one();
            Ok(())
        } else {
            match self.shared.front.try_lock() {
                Ok(mut front) => {
                    front.extend_from_slice(&bytes);
                    self.recorded_frames.fetch_add(1, Ordering::Relaxed);
                    drop(front);
                    self.shared.wake.notify_one();
                    Ok(())
                }
                Err(_) => {
                    self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            }
        }
    }

    fn check_worker_error(&self) -> Result<()> {
        if let Some(msg) = self.shared.worker_error.lock().unwrap().clone() {
            return Err(Error::Recorder(RecorderError::WorkerFailed(msg)));
        }
        Ok(())
    }

    pub fn recorded_frames(&self) -> u64 {
        self.recorded_frames.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Flush all pending frames, stop the worker thread, and propagate any
    /// error it recorded while writing. After this call the recorder can no
    /// longer be used.
    pub fn dispose(mut self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_one();
        if let Some(handle) = self.worker.take() {
            handle.join().map_err(|_| {
                Error::Recorder(RecorderError::WorkerFailed("recorder worker panicked".into()))
            })?;
        }
        self.check_worker_error()
    }
}

impl Drop for AsyncRecorder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.wake.notify_one();
            if let Some(handle) = self.worker.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[derive(Clone, Copy, Default, PartialEq, Debug)]
    struct Position(f32);

    #[test]
    fn capture_and_dispose_writes_header_and_frames() {
        let tmp = NamedTempFile::new().unwrap();
        let recorder = AsyncRecorder::create(tmp.path(), 42).unwrap();

        let repo = EntityRepository::new(64, 256, false);
        let cid = repo.register_plain::<Position>("Position");
        let e = repo.create_entity().unwrap();
        repo.add_component(e, cid, Position(1.0)).unwrap();

        recorder
            .capture_frame(&repo, &[cid], FrameKind::Keyframe, 0, &[], true)
            .unwrap();
        assert_eq!(recorder.recorded_frames(), 1);
        recorder.dispose().unwrap();

        let bytes = std::fs::read(tmp.path()).unwrap();
        assert!(bytes.len() > crate::recorder::format::FILE_HEADER_LEN);
    }

    #[test]
    fn non_blocking_capture_never_errors() {
        let tmp = NamedTempFile::new().unwrap();
        let recorder = AsyncRecorder::create(tmp.path(), 0).unwrap();
        let repo = EntityRepository::new(64, 256, false);
        recorder
            .capture_frame(&repo, &[], FrameKind::Delta, 0, &[], false)
            .unwrap();
        recorder.dispose().unwrap();
    }
}
