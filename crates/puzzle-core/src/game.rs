//! Game lifecycle: idle, countdown, running, finish, result.
//!
//! Every participant runs the same machine. Only transitions that start
//! on one participant (start, piece placed, clear, reset) are broadcast;
//! the countdown itself runs locally on every participant from the
//! moment `START_GAME` is seen.

use glam::{Quat, Vec3};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::catalog::Catalog;
use crate::clock::format_clock;
use crate::codec::Message;
use crate::config::SessionConfig;
use crate::ledger::ScoreLedger;
use crate::ownership::{PieceTransition, settle};
use crate::piece::PieceSet;
use crate::pose::Pose;
use crate::resync::SyncSnapshot;
use crate::scene::{Banner, Cue, Effect, Outbox, PieceColor, PieceLabel, Scene, SessionEvent};
use crate::state::{Difficulty, GamePhase, SystemState, TargetArea};

/// Countdown step on which the game starts.
pub const STEP_TO_START: u32 = 4;

/// Random yaw range of shuffled pieces, in degrees.
const SHUFFLE_YAW_DEGREES: std::ops::Range<f32> = 360.0..1080.0;

/// Everything the state machine reads and mutates besides itself.
#[derive(Debug)]
pub struct GameContext {
    pub config: SessionConfig,
    pub catalog: Catalog,
    pub pieces: PieceSet,
    pub ledger: ScoreLedger,
    pub rng: ChaCha8Rng,
    pub out: Outbox,
}

impl GameContext {
    fn each_valid(&self) -> Vec<usize> {
        self.pieces.iter_valid().map(|p| p.index).collect()
    }

    fn effect(&mut self, effect: Effect) {
        self.out.effect(effect);
    }
}

/// Session lifecycle of one participant.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    system: SystemState,
    phase: GamePhase,
    /// Settings of the current or last game.
    difficulty: Difficulty,
    area: TargetArea,
    /// Highlighted selector options, used by the next start.
    selected_difficulty: Difficulty,
    selected_area: TargetArea,
    selector_interactable: bool,
    start_time: f32,
    clear_time: Option<f32>,
    is_my_start: bool,
    is_best: bool,
    countdown_step: u32,
    next_action_at: f32,
    move_duration: f32,
    hints_cleared: bool,
    timer_text: String,
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl GameStateMachine {
    pub fn new() -> Self {
        Self {
            system: SystemState::Initialize,
            phase: GamePhase::Idle,
            difficulty: Difficulty::default(),
            area: TargetArea::default(),
            selected_difficulty: Difficulty::default(),
            selected_area: TargetArea::default(),
            selector_interactable: true,
            start_time: 0.0,
            clear_time: None,
            is_my_start: false,
            is_best: false,
            countdown_step: 0,
            next_action_at: 0.0,
            move_duration: SessionConfig::default().move_duration,
            hints_cleared: false,
            timer_text: String::new(),
        }
    }

    pub const fn system(&self) -> SystemState {
        self.system
    }

    pub const fn phase(&self) -> GamePhase {
        self.phase
    }

    pub const fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub const fn area(&self) -> TargetArea {
        self.area
    }

    pub const fn selected_difficulty(&self) -> Difficulty {
        self.selected_difficulty
    }

    pub const fn selected_area(&self) -> TargetArea {
        self.selected_area
    }

    pub const fn selector_interactable(&self) -> bool {
        self.selector_interactable
    }

    pub const fn start_time(&self) -> f32 {
        self.start_time
    }

    pub const fn clear_time(&self) -> Option<f32> {
        self.clear_time
    }

    pub const fn is_my_start(&self) -> bool {
        self.is_my_start
    }

    pub const fn is_best(&self) -> bool {
        self.is_best
    }

    pub const fn countdown_step(&self) -> u32 {
        self.countdown_step
    }

    pub fn timer_text(&self) -> &str {
        &self.timer_text
    }

    pub fn is_in_game(&self) -> bool {
        self.system == SystemState::InGame
    }

    /// Clock value: running time while playing, the clear time after a
    /// clear, zero otherwise.
    pub fn elapsed(&self, now: f32) -> f32 {
        if !self.is_in_game() {
            return 0.0;
        }
        match self.phase {
            GamePhase::InGame => now - self.start_time,
            GamePhase::Finish | GamePhase::Result => {
                self.clear_time.unwrap_or(now - self.start_time)
            }
            GamePhase::Idle | GamePhase::WaitStart => 0.0,
        }
    }

    fn set_state(&mut self, ctx: &mut GameContext, system: SystemState, phase: GamePhase) {
        if self.system == system && self.phase == phase {
            return;
        }
        tracing::debug!(
            "[game] {:?}/{:?} -> {:?}/{:?}",
            self.system,
            self.phase,
            system,
            phase
        );
        self.system = system;
        self.phase = phase;
        ctx.out.event(SessionEvent::PhaseChanged { system, phase });
    }

    /// Leaves `Initialize` and shows the idle presentation.
    pub fn finish_initialization(&mut self, ctx: &mut GameContext) {
        self.move_duration = ctx.config.move_duration;
        self.set_state(ctx, SystemState::Idle, GamePhase::Idle);
        self.highlight_difficulty(ctx, self.selected_difficulty);
        self.highlight_area(ctx, self.selected_area);
        self.set_selector_interactable(ctx, true);
        for piece in ctx.each_valid() {
            let hint = ctx.catalog.get(piece).map(|info| info.name.clone());
            ctx.effect(Effect::SetGrabHint { piece, hint });
            ctx.effect(Effect::SetPieceLabel {
                piece,
                label: PieceLabel::Simple { kana: false },
            });
        }
        tracing::info!("[game] initialized with {} pieces", ctx.pieces.len());
    }

    pub fn highlight_difficulty(&mut self, ctx: &mut GameContext, difficulty: Difficulty) {
        self.selected_difficulty = difficulty;
        ctx.effect(Effect::HighlightDifficulty(difficulty));
    }

    pub fn highlight_area(&mut self, ctx: &mut GameContext, area: TargetArea) {
        self.selected_area = area;
        ctx.effect(Effect::HighlightArea(area));
    }

    fn set_selector_interactable(&mut self, ctx: &mut GameContext, interactable: bool) {
        self.selector_interactable = interactable;
        ctx.effect(Effect::SelectorInteractable(interactable));
    }

    fn render_timer(&mut self, ctx: &mut GameContext, seconds: f32) {
        let text = format_clock(seconds);
        if text != self.timer_text {
            self.timer_text.clone_from(&text);
            ctx.effect(Effect::TimerText(text));
        }
    }

    /// Labels for the whole board at game start. The hardest difficulty
    /// hides names entirely.
    fn show_game_labels(&mut self, ctx: &mut GameContext) {
        let hide = self.difficulty.hides_labels();
        for piece in ctx.each_valid() {
            if hide {
                ctx.effect(Effect::SetGrabHint { piece, hint: None });
                ctx.effect(Effect::SetPieceLabel {
                    piece,
                    label: PieceLabel::Hidden,
                });
            } else {
                ctx.effect(Effect::SetPieceLabel {
                    piece,
                    label: PieceLabel::Simple { kana: false },
                });
            }
        }
        if hide {
            self.hints_cleared = true;
        }
    }

    fn move_to_anchor(&self, ctx: &mut GameContext, piece: usize, duration: f32) {
        if let Some(anchor) = ctx.pieces.valid(piece).and_then(|p| p.anchor) {
            ctx.effect(Effect::MovePiece {
                piece,
                pose: anchor,
                duration,
            });
        }
    }

    /// Enters the countdown. Called for the local start button and for a
    /// received `START_GAME`.
    pub fn begin_countdown(
        &mut self,
        ctx: &mut GameContext,
        is_local_initiator: bool,
        difficulty: Difficulty,
        area: TargetArea,
        now: f32,
    ) {
        self.highlight_difficulty(ctx, difficulty);
        self.highlight_area(ctx, area);
        self.difficulty = difficulty;
        self.area = area;
        self.is_my_start = is_local_initiator;
        self.is_best = false;
        self.clear_time = None;
        self.set_state(ctx, SystemState::InGame, GamePhase::WaitStart);
        self.countdown_step = 0;
        self.next_action_at = now;

        ctx.pieces.reset_correctness(&mut ctx.out);
        for piece in ctx.each_valid() {
            ctx.effect(Effect::SetPickupable {
                piece,
                pickupable: false,
            });
        }
        self.show_game_labels(ctx);
        self.set_selector_interactable(ctx, false);
        ctx.out.banner(Banner::CountDown);

        tracing::info!(
            "[game] countdown {:?}/{:?} (initiator: {})",
            difficulty,
            area,
            is_local_initiator
        );
    }

    /// Per-frame update.
    pub fn tick(&mut self, ctx: &mut GameContext, scene: &mut dyn Scene, now: f32) {
        if !self.is_in_game() {
            return;
        }
        match self.phase {
            GamePhase::Idle => {}
            GamePhase::WaitStart => {
                if now >= self.next_action_at {
                    self.countdown(ctx, scene, now);
                }
            }
            GamePhase::InGame => {
                let elapsed = self.elapsed(now);
                self.render_timer(ctx, elapsed);
            }
            GamePhase::Finish => {
                if now >= self.next_action_at {
                    self.set_state(ctx, SystemState::InGame, GamePhase::Result);
                }
            }
            GamePhase::Result => {
                if self.is_best {
                    ctx.out.cue(Cue::NewRecord);
                    ctx.out.banner(Banner::NewRecord);
                }
                self.reset_all(ctx);
            }
        }
    }

    fn countdown(&mut self, ctx: &mut GameContext, scene: &mut dyn Scene, now: f32) {
        let step = self.countdown_step;
        ctx.out.event(SessionEvent::CountdownTick(step));
        match step {
            0 => {}
            s if s >= STEP_TO_START => {
                ctx.out.cue(Cue::GameStart);
                self.start_game(ctx, now);
                return;
            }
            _ => {
                if step == 2 && self.is_my_start {
                    for piece in ctx.each_valid() {
                        scene.claim_ownership(piece);
                    }
                }
                if step == 3 {
                    if self.is_my_start {
                        self.shuffle(ctx);
                    }
                    self.recolor_by_scope(ctx);
                }
                ctx.out.cue(Cue::CountDown);
            }
        }
        self.countdown_step += 1;
        self.next_action_at = now + ctx.config.countdown_interval;
    }

    fn start_game(&mut self, ctx: &mut GameContext, now: f32) {
        self.set_state(ctx, SystemState::InGame, GamePhase::InGame);
        self.move_duration = ctx.config.move_duration;
        self.start_time = now;
        for piece in ctx.each_valid() {
            let pickupable = ctx.pieces.in_scope(piece, self.area);
            ctx.effect(Effect::SetPickupable { piece, pickupable });
        }
        self.render_timer(ctx, 0.0);
        tracing::info!("[game] started {:?}/{:?}", self.difficulty, self.area);
    }

    /// Scatters in-scope pieces along the rail and returns the others home.
    fn shuffle(&mut self, ctx: &mut GameContext) {
        self.move_duration = ctx.config.shuffle_move_duration;
        let floor = ctx.config.piece_floor_height;
        let duration = self.move_duration;
        for piece in ctx.each_valid() {
            if !ctx.pieces.in_scope(piece, self.area) {
                self.move_to_anchor(ctx, piece, duration);
                continue;
            }
            let Some(anchor) = ctx.pieces.valid(piece).and_then(|p| p.anchor) else {
                continue;
            };
            let rail = ctx.config.shuffle_rails.for_area(self.area);
            let position = random_rail_point(&mut ctx.rng, rail).unwrap_or(anchor.position)
                + Vec3::Y * floor;
            let yaw = ctx.rng.random_range(SHUFFLE_YAW_DEGREES).to_radians();
            ctx.effect(Effect::MovePiece {
                piece,
                pose: Pose::new(position, Quat::from_rotation_y(yaw)),
                duration,
            });
        }
        tracing::debug!("[game] shuffled pieces for {:?}", self.area);
    }

    fn recolor_by_scope(&self, ctx: &mut GameContext) {
        for piece in ctx.each_valid() {
            let color = if ctx.pieces.in_scope(piece, self.area) {
                PieceColor::Unplaced
            } else {
                PieceColor::Default
            };
            ctx.effect(Effect::SetPieceColor { piece, color });
        }
    }

    /// Reacts to a grab or release seen by the ownership scan. Returns a
    /// message to broadcast when the local participant placed a piece.
    pub fn on_transition(
        &mut self,
        ctx: &mut GameContext,
        scene: &dyn Scene,
        transition: PieceTransition,
        now: f32,
    ) -> Option<Message> {
        let local = scene.local_participant();
        match transition {
            PieceTransition::Held { piece, by } => {
                let mine = by == Some(local);
                if self.is_in_game() {
                    if mine {
                        ctx.out.cue(Cue::Pickup);
                    }
                    if !self.difficulty.hides_labels() {
                        ctx.effect(Effect::SetPieceLabel {
                            piece,
                            label: PieceLabel::Simple { kana: true },
                        });
                    }
                } else {
                    if mine {
                        ctx.effect(Effect::SetPieceLabel {
                            piece,
                            label: PieceLabel::Detail,
                        });
                    }
                    if let Some(card) = ctx.catalog.detail_card(piece) {
                        ctx.effect(Effect::ShowPieceDetail { piece, card });
                    }
                }
                None
            }
            PieceTransition::Released { piece, last_owner } => {
                self.on_released(ctx, scene, piece, last_owner == Some(local), now)
            }
        }
    }

    fn on_released(
        &mut self,
        ctx: &mut GameContext,
        scene: &dyn Scene,
        piece: usize,
        mine: bool,
        now: f32,
    ) -> Option<Message> {
        let pose = scene.current_pose(piece)?;
        let settled = settle(pose, ctx.config.piece_floor_height);
        ctx.effect(Effect::MovePiece {
            piece,
            pose: settled.upright,
            duration: 0.0,
        });
        if let Some(raised) = settled.raised {
            ctx.effect(Effect::MovePiece {
                piece,
                pose: raised,
                duration: self.move_duration,
            });
        }
        if !self.is_in_game() || !self.difficulty.hides_labels() {
            ctx.effect(Effect::SetPieceLabel {
                piece,
                label: PieceLabel::Simple { kana: false },
            });
        }

        if !mine || self.phase != GamePhase::InGame || !self.is_in_game() {
            return None;
        }
        let target = ctx.pieces.valid(piece)?;
        if target.on_right_position || !self.area.includes(target.island) {
            return None;
        }
        let anchor = target.anchor?;
        let tolerance = ctx.config.tolerances.for_difficulty(self.difficulty);
        if !tolerance.accepts(&settled.upright, &anchor) {
            return None;
        }
        ctx.out.cue(Cue::PieceCorrect);
        self.lock_piece(ctx, piece, true, now)
    }

    /// Locks a correctly placed piece. A local placement also decides
    /// whether the game is cleared and returns the message to broadcast.
    /// Invalid pieces are ignored.
    pub fn lock_piece(
        &mut self,
        ctx: &mut GameContext,
        piece: usize,
        local: bool,
        now: f32,
    ) -> Option<Message> {
        ctx.pieces.valid(piece)?;
        ctx.effect(Effect::SetPickupable {
            piece,
            pickupable: false,
        });
        ctx.pieces.set_correct(piece, true, &mut ctx.out);
        self.move_to_anchor(ctx, piece, self.move_duration);
        ctx.effect(Effect::SetPieceColor {
            piece,
            color: PieceColor::Default,
        });
        if self.difficulty.hides_labels() {
            ctx.effect(Effect::SetPieceLabel {
                piece,
                label: PieceLabel::Simple { kana: false },
            });
        }
        ctx.out.event(SessionEvent::PieceLocked(piece));
        tracing::debug!("[piece] locked {piece} (local: {local})");

        if !local {
            return None;
        }
        if ctx.pieces.is_clear(self.area) {
            let clear_time = self.elapsed(now);
            let is_best = ctx.ledger.is_new_best(self.difficulty, self.area, clear_time);
            self.finish(ctx, clear_time, is_best, now);
            Some(Message::ClearGame {
                clear_time,
                is_best,
                piece,
            })
        } else {
            Some(Message::PieceCorrect { piece })
        }
    }

    /// Applies a clear announced by another participant.
    pub fn apply_clear(
        &mut self,
        ctx: &mut GameContext,
        clear_time: f32,
        is_best: bool,
        piece: usize,
        now: f32,
    ) {
        self.lock_piece(ctx, piece, false, now);
        self.finish(ctx, clear_time, is_best, now);
    }

    fn finish(&mut self, ctx: &mut GameContext, clear_time: f32, is_best: bool, now: f32) {
        ctx.out.cue(Cue::GameClear);
        self.set_state(ctx, self.system, GamePhase::Finish);
        self.is_best = is_best;
        self.clear_time = Some(clear_time);
        if ctx.ledger.record(self.difficulty, self.area, clear_time) {
            show_score(ctx, self.difficulty, self.area, clear_time);
        }
        self.render_timer(ctx, clear_time);
        ctx.out.banner(Banner::GameClear);
        ctx.out.banner(Banner::Blink);
        self.next_action_at = now + ctx.config.finish_dwell;
        tracing::info!(
            "[game] cleared {:?}/{:?} in {} (best: {})",
            self.difficulty,
            self.area,
            format_clock(clear_time),
            is_best
        );
    }

    /// Universal abort back to idle. Safe to repeat.
    pub fn reset_all(&mut self, ctx: &mut GameContext) {
        self.set_state(ctx, SystemState::Idle, GamePhase::Idle);
        self.move_duration = ctx.config.move_duration;
        self.is_my_start = false;
        ctx.out.banner(Banner::Reset);
        let duration = self.move_duration;
        for piece in ctx.each_valid() {
            ctx.effect(Effect::SetPieceLabel {
                piece,
                label: PieceLabel::Simple { kana: false },
            });
            self.move_to_anchor(ctx, piece, duration);
            ctx.effect(Effect::SetPieceColor {
                piece,
                color: PieceColor::Default,
            });
            ctx.effect(Effect::SetPickupable {
                piece,
                pickupable: true,
            });
        }
        self.set_selector_interactable(ctx, true);
        if self.hints_cleared {
            for piece in ctx.each_valid() {
                let hint = ctx.catalog.get(piece).map(|info| info.name.clone());
                ctx.effect(Effect::SetGrabHint { piece, hint });
            }
            self.hints_cleared = false;
        }
        tracing::info!("[game] reset");
    }

    /// Snapshot answered to a resync request.
    pub fn snapshot(&self, ctx: &GameContext, now: f32) -> SyncSnapshot {
        let (difficulty, area) = if self.is_in_game() {
            (self.difficulty, self.area)
        } else {
            (self.selected_difficulty, self.selected_area)
        };
        SyncSnapshot {
            system: self.system,
            phase: self.phase,
            difficulty,
            area,
            elapsed: self.elapsed(now),
            correctness: ctx.pieces.correctness_bits(),
            ledger: ctx.ledger.serialize(),
        }
    }

    /// Overwrites local state with a snapshot from the authority.
    pub fn apply_snapshot(&mut self, ctx: &mut GameContext, snapshot: &SyncSnapshot, now: f32) {
        if self.is_in_game() && snapshot.system != SystemState::InGame {
            self.reset_all(ctx);
        }
        self.highlight_difficulty(ctx, snapshot.difficulty);
        self.highlight_area(ctx, snapshot.area);
        self.difficulty = snapshot.difficulty;
        self.area = snapshot.area;
        self.set_state(ctx, snapshot.system, snapshot.phase);

        if self.is_in_game() {
            self.is_my_start = false;
            self.start_time = now - snapshot.elapsed;
            ctx.pieces.apply_bits(&snapshot.correctness, &mut ctx.out);
            self.show_game_labels(ctx);
            self.set_selector_interactable(ctx, false);

            let counting_down = self.phase == GamePhase::WaitStart;
            for piece in ctx.each_valid() {
                let in_scope = ctx.pieces.in_scope(piece, self.area);
                let correct = ctx.pieces.get(piece).is_some_and(|p| p.on_right_position);
                ctx.effect(Effect::SetPickupable {
                    piece,
                    pickupable: in_scope && !correct && !counting_down,
                });
                let color = if in_scope && !correct {
                    PieceColor::Unplaced
                } else {
                    PieceColor::Default
                };
                ctx.effect(Effect::SetPieceColor { piece, color });
                if correct {
                    ctx.effect(Effect::SetPieceLabel {
                        piece,
                        label: PieceLabel::Simple { kana: false },
                    });
                }
            }

            match self.phase {
                GamePhase::WaitStart => {
                    self.countdown_step = 0;
                    self.next_action_at = now;
                }
                GamePhase::Finish | GamePhase::Result => {
                    self.clear_time = Some(snapshot.elapsed);
                    self.next_action_at = now + ctx.config.finish_dwell;
                    self.render_timer(ctx, snapshot.elapsed);
                }
                GamePhase::InGame => self.render_timer(ctx, snapshot.elapsed),
                GamePhase::Idle => {}
            }
        }

        for (difficulty, area, time) in ctx.ledger.merge_str(&snapshot.ledger) {
            show_score(ctx, difficulty, area, time);
        }
        tracing::info!(
            "[sync] applied snapshot {:?}/{:?} {:?}/{:?}",
            snapshot.system,
            snapshot.phase,
            snapshot.difficulty,
            snapshot.area
        );
    }
}

fn show_score(ctx: &mut GameContext, difficulty: Difficulty, area: TargetArea, time: f32) {
    ctx.effect(Effect::BestScoreText {
        difficulty,
        area,
        text: format_clock(time),
    });
    ctx.out.event(SessionEvent::ScoreImproved {
        difficulty,
        area,
        time,
    });
    tracing::info!("[ledger] best {:?}/{:?} = {}", difficulty, area, format_clock(time));
}

/// Random point on a closed polyline. `None` for an empty rail.
fn random_rail_point<R: Rng + ?Sized>(rng: &mut R, rail: &[Vec3]) -> Option<Vec3> {
    if rail.is_empty() {
        return None;
    }
    let i = rng.random_range(0..rail.len());
    let a = rail[i];
    let b = rail[(i + 1) % rail.len()];
    Some(a.lerp(b, rng.random::<f32>()))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::headless::HeadlessScene;
    use crate::test_utils::{demo_catalog, demo_config, demo_world};

    struct Fixture {
        game: GameStateMachine,
        ctx: GameContext,
        scene: HeadlessScene,
    }

    impl Fixture {
        fn new() -> Self {
            let catalog = demo_catalog();
            let world = demo_world(&catalog, &[]);
            let scene = world.scene(1, true);
            let pieces = PieceSet::from_catalog(&catalog, &scene);
            let mut fixture = Self {
                game: GameStateMachine::new(),
                ctx: GameContext {
                    config: demo_config(),
                    catalog,
                    pieces,
                    ledger: ScoreLedger::new(),
                    rng: ChaCha8Rng::seed_from_u64(42),
                    out: Outbox::new(),
                },
                scene,
            };
            fixture.game.finish_initialization(&mut fixture.ctx);
            fixture.flush();
            fixture
        }

        fn flush(&mut self) -> Vec<SessionEvent> {
            let effects = self.ctx.out.drain_effects();
            self.scene.apply(effects);
            self.ctx.out.drain_events()
        }

        fn tick(&mut self, now: f32) -> Vec<SessionEvent> {
            self.game.tick(&mut self.ctx, &mut self.scene, now);
            self.flush()
        }

        fn start(&mut self, difficulty: Difficulty, area: TargetArea, now: f32) {
            self.game
                .begin_countdown(&mut self.ctx, true, difficulty, area, now);
            self.flush();
            for step in 0..=STEP_TO_START {
                #[allow(clippy::cast_precision_loss)]
                self.tick(now + step as f32);
            }
        }

        fn release_at(&mut self, piece: usize, pose: Pose, now: f32) -> Option<Message> {
            self.scene.world().set_pose(piece, pose);
            let message = self.game.on_transition(
                &mut self.ctx,
                &self.scene,
                PieceTransition::Released {
                    piece,
                    last_owner: Some(1),
                },
                now,
            );
            self.flush();
            message
        }

        fn anchor(&self, piece: usize) -> Pose {
            self.ctx.pieces.get(piece).unwrap().anchor.unwrap()
        }
    }

    #[test]
    fn test_countdown_steps() {
        let mut f = Fixture::new();
        f.game
            .begin_countdown(&mut f.ctx, true, Difficulty::Easy, TargetArea::OnlyMain, 10.0);
        let events = f.flush();
        assert!(events.contains(&SessionEvent::PhaseChanged {
            system: SystemState::InGame,
            phase: GamePhase::WaitStart
        }));
        assert!(!f.scene.selector_interactable());
        assert!((0..6).all(|i| !f.scene.pickupable(i)));

        assert_eq!(f.tick(10.0), vec![SessionEvent::CountdownTick(0)]);
        assert!(f.tick(10.5).is_empty());
        assert_eq!(f.tick(11.0), vec![SessionEvent::CountdownTick(1)]);
        f.tick(12.0);
        assert_eq!(f.scene.world().owner(0), Some(1));
        f.tick(13.0);
        assert_eq!(f.scene.color(0), Some(PieceColor::Unplaced));
        assert_eq!(f.scene.color(4), Some(PieceColor::Default));
        assert_eq!(f.game.phase(), GamePhase::WaitStart);

        let events = f.tick(14.0);
        assert_eq!(events[0], SessionEvent::CountdownTick(4));
        assert_eq!(f.game.phase(), GamePhase::InGame);
        assert!((f.game.start_time() - 14.0).abs() < f32::EPSILON);
        assert!(f.scene.pickupable(0) && f.scene.pickupable(2));
        assert!(!f.scene.pickupable(3) && !f.scene.pickupable(5));
        assert_eq!(f.scene.timer_text(), "00:00.000");
        assert_eq!(
            f.scene.cues(),
            &[Cue::CountDown, Cue::CountDown, Cue::CountDown, Cue::GameStart]
        );
    }

    #[test]
    fn test_follower_does_not_shuffle_or_claim() {
        let mut f = Fixture::new();
        f.game
            .begin_countdown(&mut f.ctx, false, Difficulty::Easy, TargetArea::All, 0.0);
        for t in 0..5 {
            #[allow(clippy::cast_precision_loss)]
            f.tick(t as f32);
        }
        assert_eq!(f.game.phase(), GamePhase::InGame);
        assert_eq!(f.scene.world().owner(0), None);
        assert_eq!(f.scene.current_pose(0), Some(f.anchor(0)));
    }

    #[test]
    fn test_shuffle_scatters_only_targets() {
        let mut f = Fixture::new();
        f.start(Difficulty::Easy, TargetArea::OnlyRemote, 0.0);
        let floor = f.ctx.config.piece_floor_height;
        for piece in 3..6 {
            let pose = f.scene.current_pose(piece).unwrap();
            assert!((pose.position.z - 15.0).abs() < 1e-4);
            assert!((pose.position.y - floor).abs() < 1e-4);
            assert!(pose.up().abs_diff_eq(Vec3::Y, 1e-4));
        }
        for piece in 0..3 {
            assert_eq!(f.scene.current_pose(piece), Some(f.anchor(piece)));
        }
    }

    #[test]
    fn test_place_pieces_until_clear() {
        let mut f = Fixture::new();
        f.start(Difficulty::Normal, TargetArea::OnlyMain, 0.0);

        let near = Pose::new(
            f.anchor(0).position + Vec3::new(0.3, 0.0, 0.0),
            Quat::from_rotation_y(0.5),
        );
        assert_eq!(
            f.release_at(0, near, 5.0),
            Some(Message::PieceCorrect { piece: 0 })
        );
        assert_eq!(f.scene.current_pose(0), Some(f.anchor(0)));
        assert!(!f.scene.pickupable(0));

        let far = Pose::at(f.anchor(1).position + Vec3::X * 2.0);
        assert_eq!(f.release_at(1, far, 6.0), None);
        assert!(!f.ctx.pieces.get(1).unwrap().on_right_position);

        assert_eq!(
            f.release_at(1, f.anchor(1), 7.0),
            Some(Message::PieceCorrect { piece: 1 })
        );
        let message = f.release_at(2, f.anchor(2), 16.5);
        assert_eq!(
            message,
            Some(Message::ClearGame {
                clear_time: 12.5,
                is_best: false,
                piece: 2
            })
        );
        assert_eq!(f.game.phase(), GamePhase::Finish);
        assert_eq!(f.scene.timer_text(), "00:12.500");
        assert_eq!(f.ctx.ledger.get(Difficulty::Normal, TargetArea::OnlyMain), Some(12.5));
        assert_eq!(
            f.scene.best_score(Difficulty::Normal, TargetArea::OnlyMain),
            Some("00:12.500")
        );
        assert!(f.scene.banners().contains(&Banner::Blink));

        f.tick(17.0);
        assert_eq!(f.game.phase(), GamePhase::Finish);
        f.tick(18.5);
        assert_eq!(f.game.phase(), GamePhase::Result);
        f.tick(18.6);
        assert_eq!(f.game.system(), SystemState::Idle);
        assert!(!f.scene.cues().contains(&Cue::NewRecord));
        assert!(f.scene.selector_interactable());
    }

    #[test]
    fn test_faster_clear_is_best() {
        let mut f = Fixture::new();
        f.ctx.ledger.set(Difficulty::Easy, TargetArea::OnlyMain, 60.0);
        f.start(Difficulty::Easy, TargetArea::OnlyMain, 0.0);
        f.release_at(0, f.anchor(0), 5.0);
        f.release_at(1, f.anchor(1), 5.0);
        let message = f.release_at(2, f.anchor(2), 34.0);
        assert_eq!(
            message,
            Some(Message::ClearGame {
                clear_time: 30.0,
                is_best: true,
                piece: 2
            })
        );
        f.tick(36.0);
        f.tick(36.1);
        assert!(f.scene.cues().contains(&Cue::NewRecord));
        assert!(f.scene.banners().contains(&Banner::NewRecord));
        assert_eq!(f.ctx.ledger.get(Difficulty::Easy, TargetArea::OnlyMain), Some(30.0));
    }

    #[test]
    fn test_release_outside_game_only_settles() {
        let mut f = Fixture::new();
        let sunk = Pose::new(Vec3::new(3.0, -1.0, 3.0), Quat::from_rotation_x(0.8));
        assert_eq!(f.release_at(0, sunk, 1.0), None);
        let pose = f.scene.current_pose(0).unwrap();
        assert!((pose.position.y - f.ctx.config.piece_floor_height).abs() < 1e-6);
        assert!(pose.up().abs_diff_eq(Vec3::Y, 1e-4));
        assert!(!f.ctx.pieces.get(0).unwrap().on_right_position);
    }

    #[test]
    fn test_remote_release_is_not_evaluated() {
        let mut f = Fixture::new();
        f.start(Difficulty::Easy, TargetArea::All, 0.0);
        f.scene.world().set_pose(0, f.anchor(0));
        let message = f.game.on_transition(
            &mut f.ctx,
            &f.scene,
            PieceTransition::Released {
                piece: 0,
                last_owner: Some(9),
            },
            6.0,
        );
        assert_eq!(message, None);
        assert!(!f.ctx.pieces.get(0).unwrap().on_right_position);
    }

    #[test]
    fn test_difficult_hides_labels() {
        let mut f = Fixture::new();
        assert_eq!(f.scene.hint(0), Some("本島A"));
        f.start(Difficulty::Difficult, TargetArea::All, 0.0);
        assert_eq!(f.scene.label(0), Some(PieceLabel::Hidden));
        assert_eq!(f.scene.hint(0), None);

        f.game.on_transition(
            &mut f.ctx,
            &f.scene,
            PieceTransition::Held {
                piece: 0,
                by: Some(1),
            },
            5.0,
        );
        f.flush();
        assert_eq!(f.scene.label(0), Some(PieceLabel::Hidden));
        assert_eq!(f.scene.cues().last(), Some(&Cue::Pickup));

        f.game.reset_all(&mut f.ctx);
        f.flush();
        assert_eq!(f.scene.hint(0), Some("本島A"));
        assert_eq!(f.scene.label(0), Some(PieceLabel::Simple { kana: false }));
    }

    #[test]
    fn test_idle_pickup_shows_detail() {
        let mut f = Fixture::new();
        f.game.on_transition(
            &mut f.ctx,
            &f.scene,
            PieceTransition::Held {
                piece: 4,
                by: Some(1),
            },
            1.0,
        );
        f.flush();
        assert_eq!(f.scene.label(4), Some(PieceLabel::Detail));
        let (piece, card) = f.scene.detail().unwrap();
        assert_eq!(*piece, 4);
        assert_eq!(card.title, "離島B");
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut f = Fixture::new();
        f.start(Difficulty::Easy, TargetArea::All, 0.0);
        f.game.reset_all(&mut f.ctx);
        let first = f.flush();
        let snapshot = f.game.snapshot(&f.ctx, 9.0);
        f.game.reset_all(&mut f.ctx);
        let second = f.flush();
        assert!(first.contains(&SessionEvent::PhaseChanged {
            system: SystemState::Idle,
            phase: GamePhase::Idle
        }));
        assert!(second.is_empty());
        assert_eq!(f.game.snapshot(&f.ctx, 9.0), snapshot);
        for piece in 0..6 {
            assert_eq!(f.scene.current_pose(piece), Some(f.anchor(piece)));
            assert!(f.scene.pickupable(piece));
        }
    }

    #[test]
    fn test_snapshot_round_trip_between_machines() {
        let mut a = Fixture::new();
        a.start(Difficulty::Normal, TargetArea::All, 0.0);
        a.release_at(3, a.anchor(3), 6.0);
        a.ctx.ledger.set(Difficulty::Easy, TargetArea::All, 40.0);
        let snapshot = a.game.snapshot(&a.ctx, 10.0);
        assert!((snapshot.elapsed - 6.0).abs() < 1e-4);

        let mut b = Fixture::new();
        b.game.apply_snapshot(&mut b.ctx, &snapshot, 50.0);
        b.flush();
        assert_eq!(b.game.system(), SystemState::InGame);
        assert_eq!(b.game.phase(), GamePhase::InGame);
        assert_eq!(b.game.difficulty(), Difficulty::Normal);
        assert_eq!(b.game.area(), TargetArea::All);
        assert_eq!(b.ctx.pieces.correctness_bits(), a.ctx.pieces.correctness_bits());
        assert!((b.game.elapsed(50.0) - 6.0).abs() < 1e-4);
        assert!(!b.scene.pickupable(3));
        assert!(b.scene.pickupable(0));
        assert_eq!(b.scene.color(0), Some(PieceColor::Unplaced));
        assert_eq!(b.ctx.ledger.get(Difficulty::Easy, TargetArea::All), Some(40.0));
        assert_eq!(b.scene.best_score(Difficulty::Easy, TargetArea::All), Some("00:40.000"));
    }

    #[test]
    fn test_idle_snapshot_ends_local_game() {
        let idle = Fixture::new();
        let snapshot = idle.game.snapshot(&idle.ctx, 3.0);

        let mut f = Fixture::new();
        f.start(Difficulty::Difficult, TargetArea::All, 0.0);
        f.release_at(0, f.anchor(0), 5.0);
        assert!(!f.scene.selector_interactable());

        f.game.apply_snapshot(&mut f.ctx, &snapshot, 6.0);
        f.flush();
        assert_eq!(f.game.system(), SystemState::Idle);
        assert_eq!(f.game.phase(), GamePhase::Idle);
        assert!(f.game.selector_interactable());
        assert!(f.scene.selector_interactable());
        assert_eq!(f.scene.hint(0), Some("本島A"));
        for piece in 0..6 {
            assert!(f.scene.pickupable(piece));
            assert_eq!(f.scene.color(piece), Some(PieceColor::Default));
            assert_eq!(f.scene.current_pose(piece), Some(f.anchor(piece)));
        }
    }

    #[test]
    fn test_random_rail_point() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(random_rail_point(&mut rng, &[]), None);
        assert_eq!(random_rail_point(&mut rng, &[Vec3::ONE]), Some(Vec3::ONE));
        let rail = [Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)];
        for _ in 0..32 {
            let p = random_rail_point(&mut rng, &rail).unwrap();
            assert!((0.0..=4.0).contains(&p.x));
            assert!(p.y.abs() < f32::EPSILON && p.z.abs() < f32::EPSILON);
        }
    }
}
