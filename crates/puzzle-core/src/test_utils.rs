//! Test utilities for multi-participant session tests.
//!
//! Provides a small six-piece catalog and `TestRoom`, which runs several
//! sessions against one shared field and one shared world with an
//! explicit clock.

use glam::Vec3;

use crate::catalog::Catalog;
use crate::config::{SessionConfig, ShuffleRails};
use crate::headless::{HeadlessScene, SharedWorld};
use crate::pose::Pose;
use crate::session::Session;
use crate::state::{IslandType, ParticipantId};
use crate::transport::{FieldEndpoint, SharedField};

const DEMO_PIECES: &str = "\
p0,obj0,本島A,ほんとうえー,-,北の岬\\n灯台がある,10.5,km2,1200,2020,4,1,0,0
p1,obj1,本島B,ほんとうびー,中部,港町,8.2,km2,34000,2020,4,1,0,0
p2,obj2,本島C,ほんとうしー,中部,南の浜,3.1,km2,-,2020,4,1,1,0
p3,obj3,離島A,りとうえー,-,無人島,0.4,km2,0,2020,4,1,0,1
p4,obj4,離島B,りとうびー,諸島,漁港,1.9,km2,560,2020,4,1,0,1
p5,obj5,離島C,りとうしー,諸島,灯台の島,0.7,km2,88,2020,4,1,0,1
";

const DEMO_MOVIES: &str = "\
港めぐり\t1,4
灯台の話\t0,5,0
";

pub fn demo_catalog() -> Catalog {
    Catalog::from_rows(DEMO_PIECES, DEMO_MOVIES).expect("Failed to parse demo catalog")
}

/// World with one object per catalog row, main island pieces along z=0
/// and remote ones along z=10. Pieces listed in `missing` have no object.
pub fn demo_world(catalog: &Catalog, missing: &[usize]) -> SharedWorld {
    let anchors = catalog
        .pieces
        .iter()
        .enumerate()
        .map(|(i, info)| {
            if missing.contains(&i) {
                return None;
            }
            let z = match info.island {
                IslandType::Main => 0.0,
                IslandType::Remote => 10.0,
            };
            #[allow(clippy::cast_precision_loss)]
            let x = i as f32 * 2.0;
            Some(Pose::at(Vec3::new(x, 0.1, z)))
        })
        .collect();
    SharedWorld::new(anchors)
}

pub fn demo_config() -> SessionConfig {
    SessionConfig {
        rng_seed: Some(42),
        shuffle_rails: ShuffleRails {
            main: vec![Vec3::new(0.0, 0.0, -5.0), Vec3::new(6.0, 0.0, -5.0)],
            remote: vec![Vec3::new(0.0, 0.0, 15.0), Vec3::new(6.0, 0.0, 15.0)],
        },
        ..SessionConfig::default()
    }
}

/// Several participants sharing one field and one world.
///
/// Peer `i` is participant `i + 1`; peer 0 is the room authority.
/// Each [`TestRoom::advance`] ticks every session, commits at most one
/// field write and delivers it to everyone but the writer.
pub(crate) struct TestRoom {
    field: SharedField,
    world: SharedWorld,
    catalog: Catalog,
    config: SessionConfig,
    peers: Vec<(Session<FieldEndpoint>, HeadlessScene)>,
    now: f64,
}

impl TestRoom {
    pub fn new(n: usize) -> Self {
        Self::with_missing(n, &[])
    }

    /// Room whose world lacks objects for the listed pieces.
    pub fn with_missing(n: usize, missing: &[usize]) -> Self {
        let catalog = demo_catalog();
        let world = demo_world(&catalog, missing);
        let mut room = Self {
            field: SharedField::new(),
            world,
            catalog,
            config: demo_config(),
            peers: Vec::new(),
            now: 0.0,
        };
        for _ in 0..n {
            room.join();
        }
        room
    }

    /// Adds a participant at the current time. Returns its peer index.
    pub fn join(&mut self) -> usize {
        let index = self.peers.len();
        let participant = ParticipantId::try_from(index + 1).expect("Too many peers");
        let scene = self.world.scene(participant, index == 0);
        let session = Session::new(
            self.config.clone(),
            self.catalog.clone(),
            self.field.endpoint(participant),
            &scene,
            self.now_f32(),
        );
        self.peers.push((session, scene));
        index
    }

    /// Advances the clock by `dt` seconds and runs one frame.
    pub fn advance(&mut self, dt: f64) {
        self.now += dt;
        let now = self.now_f32();
        for i in 0..self.peers.len() {
            let (session, scene) = &mut self.peers[i];
            session.tick(scene, now);
            self.flush(i);
        }
        self.field.propagate();
        for i in 0..self.peers.len() {
            let (session, scene) = &mut self.peers[i];
            if let Some(value) = session.field_mut().poll() {
                let _ = session.receive(&value, scene, now);
            }
            self.flush(i);
        }
    }

    /// Runs frames of `dt` seconds until `seconds` have passed.
    pub fn run(&mut self, seconds: f64, dt: f64) {
        let end = self.now + seconds;
        while self.now + dt <= end + 1e-9 {
            self.advance(dt);
        }
    }

    /// Applies a peer's pending effects to its scene.
    pub fn flush(&mut self, i: usize) {
        let (session, scene) = &mut self.peers[i];
        scene.apply(session.drain_effects());
        session.drain_events();
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn now_f32(&self) -> f32 {
        self.now as f32
    }

    pub fn session(&self, i: usize) -> &Session<FieldEndpoint> {
        &self.peers[i].0
    }

    pub fn session_mut(&mut self, i: usize) -> &mut Session<FieldEndpoint> {
        &mut self.peers[i].0
    }

    pub fn scene(&self, i: usize) -> &HeadlessScene {
        &self.peers[i].1
    }

    pub fn scene_mut(&mut self, i: usize) -> &mut HeadlessScene {
        &mut self.peers[i].1
    }

    pub fn peer_mut(&mut self, i: usize) -> (&mut Session<FieldEndpoint>, &mut HeadlessScene) {
        let (session, scene) = &mut self.peers[i];
        (session, scene)
    }

    pub fn field(&self) -> &SharedField {
        &self.field
    }

    pub fn anchor(&self, piece: usize) -> Pose {
        self.world.anchor(piece).expect("Piece has no anchor")
    }

    /// Grabs a piece as `peer`, drops it on its anchor and lets both
    /// transitions be observed.
    pub fn place(&mut self, peer: usize, piece: usize) {
        let anchor = self.anchor(piece);
        assert!(self.scene_mut(peer).grab(piece), "Failed to grab piece {piece}");
        self.advance(0.1);
        self.scene_mut(peer).move_held(piece, anchor);
        self.scene_mut(peer).release(piece);
        self.advance(0.1);
    }
}
