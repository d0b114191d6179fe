//! Per-participant session: message dispatch over the replicated field.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::catalog::Catalog;
use crate::codec::{CodecError, Message, random_message_id};
use crate::config::SessionConfig;
use crate::game::{GameContext, GameStateMachine};
use crate::ledger::ScoreLedger;
use crate::ownership::PieceOwnershipTracker;
use crate::piece::PieceSet;
use crate::resync::{JoinOnly, ResyncPolicy, ResyncProtocol, ResyncState, SyncSnapshot};
use crate::scene::{Cue, Effect, Outbox, Scene, SessionEvent};
use crate::state::{Difficulty, SystemState, TargetArea};
use crate::transport::ReplicatedField;

/// Error type for inbound message handling.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("decode failed: {0}")]
    Codec(#[from] CodecError),
    #[error("piece {piece} out of range (have {count})")]
    PieceOutOfRange { piece: usize, count: usize },
}

/// One participant's view of the shared puzzle session.
pub struct Session<F: ReplicatedField> {
    game: GameStateMachine,
    ctx: GameContext,
    tracker: PieceOwnershipTracker,
    resync: ResyncProtocol,
    policy: Box<dyn ResyncPolicy>,
    field: F,
    ready_at: f32,
}

impl<F: ReplicatedField> Session<F> {
    /// Creates a session in `Initialize`. Piece anchors are captured from
    /// `scene` here.
    pub fn new(
        config: SessionConfig,
        catalog: Catalog,
        field: F,
        scene: &dyn Scene,
        now: f32,
    ) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.rng_seed.unwrap_or_else(rand::random));
        let pieces = PieceSet::from_catalog(&catalog, scene);
        let tracker = PieceOwnershipTracker::new(pieces.len());
        let ready_at = now + config.initialization_time;
        Self {
            game: GameStateMachine::new(),
            ctx: GameContext {
                config,
                catalog,
                pieces,
                ledger: ScoreLedger::new(),
                rng,
                out: Outbox::new(),
            },
            tracker,
            resync: ResyncProtocol::new(),
            policy: Box::new(JoinOnly),
            field,
            ready_at,
        }
    }

    pub fn with_resync_policy(mut self, policy: impl ResyncPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Per-frame update: ownership scan, then game tick, then resync policy.
    pub fn tick(&mut self, scene: &mut dyn Scene, now: f32) {
        if self.game.system() == SystemState::Initialize {
            if now < self.ready_at {
                return;
            }
            self.game.finish_initialization(&mut self.ctx);
            self.request_resync(scene);
            return;
        }

        for transition in self.tracker.scan(&mut self.ctx.pieces, scene) {
            if let Some(message) = self.game.on_transition(&mut self.ctx, scene, transition, now) {
                self.send(&message);
            }
        }
        self.game.tick(&mut self.ctx, scene, now);

        if self.policy.should_request(now, self.resync.state()) {
            self.request_resync(scene);
        }
    }

    /// Asks the authority for a full snapshot. The authority itself never
    /// asks.
    pub fn request_resync(&mut self, scene: &dyn Scene) -> bool {
        if self.game.system() == SystemState::Initialize {
            return false;
        }
        if !self.resync.request(scene.is_local_authority()) {
            return false;
        }
        tracing::info!("[sync] requesting state from authority");
        self.send(&Message::RequestSyncState);
        true
    }

    /// Handles a value-change notification of the replicated field.
    /// Failures leave state unchanged and are only logged.
    pub fn receive(
        &mut self,
        value: &str,
        scene: &mut dyn Scene,
        now: f32,
    ) -> Result<(), DispatchError> {
        if self.game.system() == SystemState::Initialize || value.is_empty() {
            return Ok(());
        }
        tracing::debug!("[sync] recv {value}");
        let result = Message::decode(value)
            .map_err(DispatchError::from)
            .and_then(|message| self.dispatch(message, scene, now));
        if let Err(e) = &result {
            tracing::warn!("[sync] ignored {value:?}: {e}");
        }
        result
    }

    fn dispatch(
        &mut self,
        message: Message,
        scene: &mut dyn Scene,
        now: f32,
    ) -> Result<(), DispatchError> {
        match message {
            Message::RequestSyncState => {
                if scene.is_local_authority() {
                    let snapshot = self.game.snapshot(&self.ctx, now);
                    tracing::info!("[sync] answering state request");
                    self.send(&Message::SyncState(snapshot));
                }
            }
            Message::SyncState(snapshot) => {
                if !self.resync.accepts_snapshot() {
                    tracing::debug!("[sync] snapshot ignored, none requested");
                    return Ok(());
                }
                self.game.apply_snapshot(&mut self.ctx, &snapshot, now);
                self.resync.satisfied();
            }
            Message::StartGame { difficulty, area } => {
                self.game
                    .begin_countdown(&mut self.ctx, false, difficulty, area, now);
            }
            Message::ClearGame {
                clear_time,
                is_best,
                piece,
            } => {
                self.check_piece(piece)?;
                self.game
                    .apply_clear(&mut self.ctx, clear_time, is_best, piece, now);
            }
            Message::Reset => self.game.reset_all(&mut self.ctx),
            Message::PieceCorrect { piece } => {
                self.check_piece(piece)?;
                self.game.lock_piece(&mut self.ctx, piece, false, now);
            }
            // The selector is frozen while a game runs.
            Message::ChangeDifficulty(_) | Message::ChangeTargetArea(_)
                if self.game.is_in_game() =>
            {
                tracing::debug!("[sync] selector change ignored in game");
            }
            Message::ChangeDifficulty(difficulty) => {
                self.game.highlight_difficulty(&mut self.ctx, difficulty);
            }
            Message::ChangeTargetArea(area) => self.game.highlight_area(&mut self.ctx, area),
        }
        Ok(())
    }

    fn check_piece(&self, piece: usize) -> Result<(), DispatchError> {
        let count = self.ctx.pieces.len();
        if piece >= count {
            return Err(DispatchError::PieceOutOfRange { piece, count });
        }
        Ok(())
    }

    /// Broadcasts a message. No-op while initializing.
    fn send(&mut self, message: &Message) {
        if self.game.system() == SystemState::Initialize {
            return;
        }
        if !self.field.is_owner() {
            self.field.claim();
        }
        let encoded = message.encode(random_message_id(&mut self.ctx.rng));
        tracing::debug!("[sync] send {encoded}");
        if let Err(e) = self.field.write(encoded) {
            tracing::warn!("[sync] send failed: {e}");
            return;
        }
        self.field.request_serialization();
    }

    /// Local start button. Uses the highlighted selector options.
    pub fn press_start(&mut self, now: f32) -> bool {
        if self.game.system() != SystemState::Idle {
            return false;
        }
        self.ctx.out.cue(Cue::GameStart);
        let difficulty = self.game.selected_difficulty();
        let area = self.game.selected_area();
        self.send(&Message::StartGame { difficulty, area });
        self.game
            .begin_countdown(&mut self.ctx, true, difficulty, area, now);
        true
    }

    /// Local reset button. Resets immediately and tells everyone else.
    pub fn press_reset(&mut self) -> bool {
        if self.game.system() == SystemState::Initialize {
            return false;
        }
        self.ctx.out.cue(Cue::Reset);
        self.send(&Message::Reset);
        self.game.reset_all(&mut self.ctx);
        true
    }

    /// Local difficulty tab. Ignored while the selector is locked.
    pub fn select_difficulty(&mut self, difficulty: Difficulty) -> bool {
        if !self.can_select() {
            return false;
        }
        self.ctx.out.cue(Cue::TabClick);
        self.game.highlight_difficulty(&mut self.ctx, difficulty);
        self.send(&Message::ChangeDifficulty(difficulty));
        true
    }

    /// Local target area tab. Ignored while the selector is locked.
    pub fn select_area(&mut self, area: TargetArea) -> bool {
        if !self.can_select() {
            return false;
        }
        self.ctx.out.cue(Cue::TabClick);
        self.game.highlight_area(&mut self.ctx, area);
        self.send(&Message::ChangeTargetArea(area));
        true
    }

    fn can_select(&self) -> bool {
        self.game.system() == SystemState::Idle && self.game.selector_interactable()
    }

    pub fn snapshot(&self, now: f32) -> SyncSnapshot {
        self.game.snapshot(&self.ctx, now)
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        self.ctx.out.drain_effects()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.ctx.out.drain_events()
    }

    pub const fn game(&self) -> &GameStateMachine {
        &self.game
    }

    pub const fn pieces(&self) -> &PieceSet {
        &self.ctx.pieces
    }

    pub const fn ledger(&self) -> &ScoreLedger {
        &self.ctx.ledger
    }

    pub const fn catalog(&self) -> &Catalog {
        &self.ctx.catalog
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.ctx.config
    }

    pub const fn resync_state(&self) -> ResyncState {
        self.resync.state()
    }

    pub const fn field(&self) -> &F {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut F {
        &mut self.field
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::format_clock;
    use crate::scene::PieceColor;
    use crate::state::GamePhase;
    use crate::test_utils::TestRoom;
    use crate::transport::DropPolicy;

    #[test]
    fn test_initialization_delay() {
        let mut room = TestRoom::new(2);
        room.run(1.5, 0.1);
        assert_eq!(room.session(0).game().system(), SystemState::Initialize);
        assert!(!room.session_mut(0).press_reset());
        assert!(room.field().committed_value().is_none());

        room.run(1.0, 0.1);
        assert_eq!(room.session(0).game().system(), SystemState::Idle);
        assert_eq!(room.session(1).game().system(), SystemState::Idle);
        assert_eq!(room.session(0).resync_state(), ResyncState::NotRequested);
        assert_eq!(room.session(1).resync_state(), ResyncState::Satisfied);
    }

    #[test]
    fn test_countdown_reaches_game_after_four_seconds() {
        let mut room = TestRoom::new(2);
        room.run(2.5, 0.1);
        let t0 = room.now_f32();
        assert!(room.session_mut(0).press_start(t0));
        room.flush(0);

        room.run(3.9, 0.02);
        for peer in 0..2 {
            assert_eq!(room.session(peer).game().phase(), GamePhase::WaitStart);
        }
        room.run(0.3, 0.02);
        for peer in 0..2 {
            let session = room.session(peer);
            assert_eq!(session.game().phase(), GamePhase::InGame);
            assert_eq!(session.game().difficulty(), Difficulty::Easy);
            assert_eq!(session.game().area(), TargetArea::OnlyMain);
            let scene = room.scene(peer);
            for piece in 0..3 {
                assert!(scene.pickupable(piece));
                assert_eq!(scene.color(piece), Some(PieceColor::Unplaced));
            }
            for piece in 3..6 {
                assert!(!scene.pickupable(piece));
            }
        }
        assert!(room.session(0).game().is_my_start());
        assert!(!room.session(1).game().is_my_start());
    }

    #[test]
    fn test_clear_is_shown_identically() {
        let mut room = TestRoom::new(2);
        room.run(2.5, 0.1);
        let now = room.now_f32();
        room.session_mut(0).press_start(now);
        room.flush(0);
        room.run(5.0, 0.1);
        let start = room.session(0).game().start_time();

        room.place(0, 0);
        room.place(0, 1);
        room.run(1.0, 0.1);
        assert!(room.session(1).pieces().get(1).unwrap().on_right_position);

        let anchor = room.anchor(2);
        assert!(room.scene_mut(0).grab(2));
        room.advance(0.1);
        room.scene_mut(0).move_held(2, anchor);
        room.scene_mut(0).release(2);
        room.advance(f64::from(start) + 12.34 - room.now());

        let clear_time = room.session(0).game().clear_time().unwrap();
        assert!((clear_time - 12.34).abs() < 1e-3);
        for peer in 0..2 {
            assert_eq!(room.session(peer).game().phase(), GamePhase::Finish);
            assert_eq!(room.scene(peer).timer_text(), "00:12.340");
            assert_eq!(room.scene(peer).timer_text(), format_clock(clear_time));
            assert_eq!(
                room.session(peer).ledger().get(Difficulty::Easy, TargetArea::OnlyMain),
                Some(clear_time)
            );
        }

        room.run(2.5, 0.1);
        for peer in 0..2 {
            assert_eq!(room.session(peer).game().system(), SystemState::Idle);
            assert_eq!(room.scene(peer).current_pose(2), Some(room.anchor(2)));
        }
    }

    #[test]
    fn test_late_join_while_idle() {
        let mut room = TestRoom::new(2);
        room.run(2.5, 0.1);
        room.session_mut(0).select_difficulty(Difficulty::Normal);
        room.flush(0);
        room.run(0.2, 0.1);
        room.session_mut(1).select_area(TargetArea::All);
        room.flush(1);
        room.run(0.2, 0.1);

        let joiner = room.join();
        assert_eq!(room.session(joiner).game().system(), SystemState::Initialize);
        room.run(2.5, 0.1);
        let late = room.session(joiner);
        assert_eq!(late.resync_state(), ResyncState::Satisfied);
        assert_eq!(late.game().system(), SystemState::Idle);
        assert_eq!(late.game().selected_difficulty(), Difficulty::Normal);
        assert_eq!(late.game().selected_area(), TargetArea::All);
        assert_eq!(room.scene(joiner).highlight(), (Difficulty::Normal, TargetArea::All));
    }

    #[test]
    fn test_late_join_mid_game() {
        let mut room = TestRoom::new(2);
        room.run(2.5, 0.1);
        room.session_mut(0).select_area(TargetArea::All);
        room.flush(0);
        room.run(0.2, 0.1);
        let now = room.now_f32();
        room.session_mut(1).press_start(now);
        room.flush(1);
        room.run(5.0, 0.1);
        room.place(1, 4);
        room.place(0, 0);
        room.run(0.5, 0.1);

        let joiner = room.join();
        room.run(2.5, 0.1);

        let authority = room.session(0);
        let late = room.session(joiner);
        assert_eq!(late.resync_state(), ResyncState::Satisfied);
        assert_eq!(late.game().system(), authority.game().system());
        assert_eq!(late.game().phase(), GamePhase::InGame);
        assert_eq!(late.game().phase(), authority.game().phase());
        assert_eq!(late.game().difficulty(), authority.game().difficulty());
        assert_eq!(late.game().area(), TargetArea::All);
        assert_eq!(late.pieces().correctness_bits(), authority.pieces().correctness_bits());
        assert_eq!(
            late.pieces().correctness_bits(),
            vec![true, false, false, false, true, false]
        );
        let now = room.now_f32();
        assert!((late.game().elapsed(now) - authority.game().elapsed(now)).abs() < 0.2);
        assert!(!room.scene(joiner).pickupable(0));
        assert!(room.scene(joiner).pickupable(1));
    }

    #[test]
    fn test_colliding_selector_changes() {
        let mut room = TestRoom::new(3);
        room.run(2.5, 0.1);
        let overwritten = room.field().overwritten_count();
        assert!(room.session_mut(1).select_difficulty(Difficulty::Normal));
        assert!(room.session_mut(2).select_difficulty(Difficulty::Difficult));
        room.flush(1);
        room.flush(2);
        room.run(0.3, 0.1);

        assert_eq!(room.field().overwritten_count(), overwritten + 1);
        for peer in 0..3 {
            let selected = room.session(peer).game().selected_difficulty();
            assert_eq!(selected, Difficulty::Difficult);
            assert_eq!(room.scene(peer).highlight().0, selected);
        }
    }

    #[test]
    fn test_selector_change_ignored_in_game() {
        let mut room = TestRoom::new(2);
        room.run(2.5, 0.1);
        let now = room.now_f32();
        room.session_mut(0).press_start(now);
        room.flush(0);
        room.run(5.0, 0.1);
        assert_eq!(room.session(1).game().phase(), GamePhase::InGame);

        let now = room.now_f32();
        let (session, scene) = room.peer_mut(1);
        assert!(session.receive("5:6:2", scene, now).is_ok());
        assert!(session.receive("5:7:2", scene, now).is_ok());
        room.flush(1);

        let game = room.session(1).game();
        assert_eq!(game.difficulty(), Difficulty::Easy);
        assert_eq!(game.selected_difficulty(), Difficulty::Easy);
        assert_eq!(game.selected_area(), TargetArea::OnlyMain);
        assert_eq!(room.scene(1).highlight(), (game.difficulty(), game.area()));
    }

    #[test]
    fn test_dropped_selector_change_stays_consistent() {
        let mut room = TestRoom::new(2);
        room.run(2.5, 0.1);
        room.field().set_drop_policy(DropPolicy::EveryNth(1));
        room.session_mut(0).select_difficulty(Difficulty::Normal);
        room.session_mut(1).select_difficulty(Difficulty::Difficult);
        room.flush(0);
        room.flush(1);
        room.run(0.3, 0.1);

        for peer in 0..2 {
            let selected = room.session(peer).game().selected_difficulty();
            assert!(matches!(selected, Difficulty::Normal | Difficulty::Difficult));
            assert_eq!(room.scene(peer).highlight().0, selected);
            assert!(room.scene(peer).selector_interactable());
        }
    }

    #[test]
    fn test_selector_locked_in_game() {
        let mut room = TestRoom::new(2);
        room.run(2.5, 0.1);
        let now = room.now_f32();
        room.session_mut(0).press_start(now);
        room.flush(0);
        room.run(0.5, 0.1);
        assert!(!room.session_mut(1).select_difficulty(Difficulty::Normal));
        let now = room.now_f32();
        assert!(!room.session_mut(1).press_start(now));
        assert!(!room.scene(1).selector_interactable());
    }

    #[test]
    fn test_reset_reaches_everyone() {
        let mut room = TestRoom::new(2);
        room.run(2.5, 0.1);
        let now = room.now_f32();
        room.session_mut(0).press_start(now);
        room.flush(0);
        room.run(5.0, 0.1);
        assert!(room.session_mut(1).press_reset());
        room.flush(1);
        room.run(0.2, 0.1);
        for peer in 0..2 {
            assert_eq!(room.session(peer).game().system(), SystemState::Idle);
            for piece in 0..6 {
                assert!(room.scene(peer).pickupable(piece));
                assert_eq!(room.scene(peer).current_pose(piece), Some(room.anchor(piece)));
            }
        }
        assert!(room.session_mut(0).press_reset());
        room.flush(0);
        room.run(0.2, 0.1);
        assert_eq!(room.session(1).game().system(), SystemState::Idle);
    }

    #[test]
    fn test_malformed_and_out_of_range_messages() {
        let mut room = TestRoom::new(1);
        room.run(2.5, 0.1);
        let before = room.session(0).snapshot(room.now_f32());
        let now = room.now_f32();

        let (session, scene) = room.peer_mut(0);
        assert!(matches!(
            session.receive("12", scene, now),
            Err(DispatchError::Codec(CodecError::TooShort(1)))
        ));
        assert!(session.receive("1:x", scene, now).is_err());
        assert!(session.receive("1:1:1:0:0:1:0:0", scene, now).is_err());
        assert_eq!(
            session.receive("1:5:99", scene, now),
            Err(DispatchError::PieceOutOfRange { piece: 99, count: 6 })
        );
        assert!(session.receive("1:3:1.5:0:42", scene, now).is_err());
        assert!(session.receive("", scene, now).is_ok());
        assert_eq!(session.snapshot(now), before);
    }

    #[test]
    fn test_unrequested_snapshot_is_ignored() {
        let mut room = TestRoom::new(1);
        room.run(2.5, 0.1);
        let now = room.now_f32();
        let (session, scene) = room.peer_mut(0);
        session.receive("7:1:2:2:1:0:50000:000000:0,0,9", scene, now).unwrap();
        assert_eq!(session.game().system(), SystemState::Idle);
        assert!(session.ledger().is_empty());
    }

    #[test]
    fn test_invalid_piece_is_skipped() {
        let mut room = TestRoom::with_missing(1, &[2]);
        room.run(2.5, 0.1);
        let now = room.now_f32();
        let (session, scene) = room.peer_mut(0);
        session.receive("1:5:2", scene, now).unwrap();
        assert!(!session.pieces().get(2).unwrap().on_right_position);
        assert!(session.drain_events().is_empty());
        assert!(session.pieces().get(2).unwrap().anchor.is_none());
    }
}
