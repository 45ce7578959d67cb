//! fdprec CLI: drive a demo repository through the flight recorder, either
//! recording a run or replaying one back.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fdprec::config;
use fdprec::ecr::EntityRepository;
use fdprec::recorder::{AsyncRecorder, FrameKind, PlaybackController};
use tracing::info;

#[derive(Parser)]
#[command(name = "fdprec", version, about = "Deterministic ECR + flight recorder kernel")]
struct Cli {
    /// Configuration file path (TOML).
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo simulation, recording it to a file.
    Record {
        /// Output `.fdp` file path.
        #[arg(long)]
        out: PathBuf,
        /// Number of ticks to simulate.
        #[arg(long, default_value_t = 100)]
        ticks: u32,
        /// Number of demo entities to create.
        #[arg(long, default_value_t = 1000)]
        entities: u32,
    },
    /// Replay a recorded file.
    Replay {
        /// Input `.fdp` file path.
        #[arg(long = "in")]
        input: PathBuf,
        /// Stop once this simulation tick has been reached.
        #[arg(long)]
        to_tick: Option<u64>,
        /// Stop after this many frames have been applied.
        #[arg(long)]
        to_frame: Option<usize>,
    },
}

/// Demo component used by the `record` subcommand to exercise the full
/// repository -> recorder -> playback pipeline without any domain-specific
/// component types.
#[derive(Clone, Copy, Default)]
#[repr(C)]
struct DemoPosition {
    x: f32,
    y: f32,
    z: f32,
}

fn run_record(cfg: &config::Config, out: PathBuf, ticks: u32, entities: u32) -> fdprec::Result<()> {
    let repo = EntityRepository::from_config(&cfg.repository);
    let cid = repo.register_plain::<DemoPosition>("DemoPosition");

    let handles: Vec<_> = (0..entities)
        .map(|i| {
            let e = repo.create_entity().expect("entity capacity exceeded");
            repo.add_component(e, cid, DemoPosition { x: i as f32, y: 0.0, z: 0.0 })
                .expect("add_component");
            e
        })
        .collect();

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let recorder = AsyncRecorder::create(&out, now)?;
    recorder.capture_frame(&repo, &[cid], FrameKind::Keyframe, 0, &[], true)?;
    info!(entities, "wrote initial keyframe");

    for tick in 1..=ticks {
        let since = repo.global_version();
        repo.tick();
        for (i, &e) in handles.iter().enumerate() {
            let pos = repo.get_component::<DemoPosition>(e, cid)?;
            repo.set_component(e, cid, DemoPosition { y: pos.y + 1.0, ..pos })?;
            let _ = i;
        }
        recorder.capture_frame(&repo, &[cid], FrameKind::Delta, since, &[], true)?;
        if tick % 10 == 0 {
            info!(tick, "recorded delta frame");
        }
    }

    recorder.dispose()?;
    info!(path = %out.display(), "recording complete");
    Ok(())
}

fn run_replay(
    cfg: &config::Config,
    input: PathBuf,
    to_tick: Option<u64>,
    to_frame: Option<usize>,
) -> fdprec::Result<()> {
    let repo = EntityRepository::from_config(&cfg.repository);
    repo.register_plain::<DemoPosition>("DemoPosition");

    let mut playback = PlaybackController::open(&input)?;
    info!(frames = playback.frame_count(), "opened recording");

    if let Some(tick) = to_tick {
        playback.seek_to_tick(&repo, tick)?;
    } else if let Some(frame) = to_frame {
        playback.seek_to_frame(&repo, frame)?;
    } else {
        playback.play_to_end(&repo, |applied, total| {
            if applied % 10 == 0 || applied == total {
                info!(applied, total, "replaying");
            }
        })?;
    }

    info!(
        entities = repo.entity_count(),
        frame = playback.current_frame_index(),
        "replay finished"
    );
    Ok(())
}

fn main() -> std::process::ExitCode {
    fdprec::init_logging();
    let cli = Cli::parse();
    let cfg = config::load_config_or_default(cli.config.as_deref());

    let result = match cli.command {
        Commands::Record { out, ticks, entities } => run_record(&cfg, out, ticks, entities),
        Commands::Replay { input, to_tick, to_frame } => run_replay(&cfg, input, to_tick, to_frame),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fdprec failed");
            std::process::ExitCode::FAILURE
        }
    }
}
