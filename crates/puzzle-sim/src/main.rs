//! Puzzle-Live Simulator
//!
//! Plays one full round between headless participants sharing a single
//! in-memory replicated field: selector changes, countdown, placing every
//! piece, a late join mid-game and the reset after the result.
//!
//! Usage: `puzzle-sim [catalog.json] [config.json]`

use std::path::Path;

use anyhow::{Context, ensure};
use glam::Vec3;
use puzzle_core::{
    Catalog, Difficulty, GamePhase, ResyncState, SessionConfig, ShuffleRails, SystemState,
    TargetArea, format_clock,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::room::Room;

mod room;

const PARTICIPANTS: usize = 3;
const FRAME: f64 = 1.0 / 30.0;

const BUILTIN_PIECES: &str = "\
0\tmain_00\t本島\tほんとう\t-\t諸島の中心となる島\t87.2\tkm²\t12480\t2020\t10\t1\t0\t0
1\tmain_01\t北島\tきたじま\t北部\t岬と灯台がある\\n冬は風が強い\t12.6\tkm²\t1533\t2020\t10\t1\t0\t0
2\tmain_02\t中島\tなかじま\t-\t港町\t9.8\tkm²\t4210\t2020\t10\t1\t0\t0
3\tmain_03\t南島\tみなみじま\t南部\t白い砂浜が続く\t15.1\tkm²\t2876\t2020\t10\t1\t0\t0
4\tremote_00\t東小島\tひがしこじま\t東諸島\t無人島\t0.4\tkm²\t-\t2020\t10\t1\t1\t1
5\tremote_01\t西小島\tにしこじま\t西諸島\t漁港がある\t1.9\tkm²\t312\t2020\t10\t1\t0\t1
6\tremote_02\t沖島\tおきじま\t-\t渡り鳥の休憩地\t0.9\tkm²\t41\t2020\t10\t1\t0\t1
";

const BUILTIN_MOVIES: &str = "\
島めぐり\t0,1,2,3
渡り鳥の季節\t4,6
港の朝\t2,5
";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let catalog = match args.next() {
        Some(path) => load_catalog(Path::new(&path))?,
        None => Catalog::from_rows(BUILTIN_PIECES, BUILTIN_MOVIES)?,
    };
    let config = match args.next() {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {path}"))?;
            SessionConfig::from_json(&json)?
        }
        None => default_config(),
    };
    tracing::info!("[sim] {} pieces, {} participants", catalog.len(), PARTICIPANTS);

    let mut room = Room::new(catalog, config, FRAME);
    for _ in 0..PARTICIPANTS {
        room.join()?;
    }
    room.run_until("initialization", 10.0, |room| {
        (0..room.participants()).all(|i| room.peer(i).session.game().system() == SystemState::Idle)
    })?;

    // Two participants touch the selector in the same frame; the field
    // keeps only one of the writes.
    room.peer_mut(1).session.select_difficulty(Difficulty::Normal);
    room.peer_mut(2).session.select_area(TargetArea::All);
    room.flush(1);
    room.flush(2);
    room.run_for(0.5);
    let selected = room.peer(0).session.game().selected_difficulty();
    tracing::info!(
        "[sim] selector after collision: {:?} / {:?}",
        selected,
        room.peer(0).session.game().selected_area()
    );

    let now = room.now_f32();
    room.peer_mut(0).session.press_start(now);
    room.flush(0);
    room.run_until("game start", 10.0, |room| {
        (0..room.participants()).all(|i| room.peer(i).session.game().phase() == GamePhase::InGame)
    })?;
    let start = room.peer(0).session.game().start_time();
    tracing::info!("[sim] game started at {start:.2}s");

    let mut late_joiner = None;
    let mut turn = 0;
    while room.peer(0).session.game().phase() == GamePhase::InGame {
        let peer = turn % room.participants();
        turn += 1;
        let Some(&piece) = room.open_pieces(peer).first() else {
            room.run_for(0.5);
            continue;
        };
        room.place(peer, piece)?;
        room.run_for(0.5);

        if late_joiner.is_none() && turn == 2 {
            let index = room.join()?;
            late_joiner = Some(index);
            room.run_until("late join resync", 10.0, |room| {
                room.peer(index).session.resync_state() == ResyncState::Satisfied
            })?;
            check_in_sync(&room, index)?;
            tracing::info!("[sim] late joiner {} caught up", index + 1);
        }
        ensure!(turn < 200, "round did not finish");
    }

    let clear_time = room
        .peer(0)
        .session
        .game()
        .clear_time()
        .context("round ended without a clear time")?;
    for i in 0..room.participants() {
        room.run_until("clear propagation", 5.0, |room| {
            room.peer(i).session.game().clear_time().is_some()
        })?;
        let text = room.peer(i).scene.timer_text();
        ensure!(
            text == format_clock(clear_time),
            "participant {} shows {text}, expected {}",
            i + 1,
            format_clock(clear_time)
        );
    }
    tracing::info!("[sim] cleared in {}", format_clock(clear_time));

    room.run_until("reset", 10.0, |room| {
        (0..room.participants()).all(|i| room.peer(i).session.game().system() == SystemState::Idle)
    })?;

    let ledger = room.peer(0).session.ledger();
    for (difficulty, area, time) in ledger.entries() {
        tracing::info!("[sim] best {difficulty:?}/{area:?}: {}", format_clock(time));
    }
    tracing::info!(
        "[sim] field: {} writes overwritten, {} dropped",
        room.field().overwritten_count(),
        room.field().dropped_count()
    );
    Ok(())
}

fn load_catalog(path: &Path) -> anyhow::Result<Catalog> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    Ok(Catalog::from_json(&json)?)
}

fn default_config() -> SessionConfig {
    SessionConfig {
        shuffle_rails: ShuffleRails {
            main: vec![
                Vec3::new(-1.0, 0.0, -3.0),
                Vec3::new(6.0, 0.0, -3.0),
                Vec3::new(6.0, 0.0, -5.0),
                Vec3::new(-1.0, 0.0, -5.0),
            ],
            remote: vec![Vec3::new(-1.0, 0.0, 11.0), Vec3::new(4.0, 0.0, 11.0)],
        },
        ..SessionConfig::default()
    }
}

/// The late joiner must agree with the authority on everything a
/// snapshot carries.
fn check_in_sync(room: &Room, index: usize) -> anyhow::Result<()> {
    let authority = &room.peer(0).session;
    let late = &room.peer(index).session;
    ensure!(late.game().system() == authority.game().system(), "system state differs");
    ensure!(late.game().phase() == authority.game().phase(), "phase differs");
    ensure!(late.game().difficulty() == authority.game().difficulty(), "difficulty differs");
    ensure!(late.game().area() == authority.game().area(), "target area differs");
    ensure!(
        late.pieces().correctness_bits() == authority.pieces().correctness_bits(),
        "correctness differs"
    );
    let now = room.now_f32();
    let drift = (late.game().elapsed(now) - authority.game().elapsed(now)).abs();
    ensure!(drift < 0.5, "elapsed time drifted by {drift:.3}s");
    Ok(())
}
