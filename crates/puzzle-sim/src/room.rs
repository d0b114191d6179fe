//! A room of simulated participants sharing one field and one world.

use anyhow::{Context, bail};
use glam::Vec3;
use puzzle_core::{
    Catalog, FieldEndpoint, HeadlessScene, IslandType, ParticipantId, Pose, Scene, Session,
    SessionConfig, SharedField, SharedWorld,
};

pub struct Peer {
    pub session: Session<FieldEndpoint>,
    pub scene: HeadlessScene,
}

pub struct Room {
    field: SharedField,
    world: SharedWorld,
    catalog: Catalog,
    config: SessionConfig,
    peers: Vec<Peer>,
    now: f64,
    dt: f64,
}

impl Room {
    /// Lays the catalog's pieces out in two rows, main island at z=0 and
    /// remote islands at z=8.
    pub fn new(catalog: Catalog, config: SessionConfig, dt: f64) -> Self {
        let height = config.piece_floor_height + 0.05;
        let mut columns = [0u16; 2];
        let anchors = catalog
            .pieces
            .iter()
            .map(|info| {
                let (row, z) = match info.island {
                    IslandType::Main => (0, 0.0),
                    IslandType::Remote => (1, 8.0),
                };
                let x = f32::from(columns[row]) * 1.5;
                columns[row] += 1;
                Some(Pose::at(Vec3::new(x, height, z)))
            })
            .collect();
        Self {
            field: SharedField::new(),
            world: SharedWorld::new(anchors),
            catalog,
            config,
            peers: Vec::new(),
            now: 0.0,
            dt,
        }
    }

    /// Adds a participant; the first one is the room authority.
    pub fn join(&mut self) -> anyhow::Result<usize> {
        let index = self.peers.len();
        let participant = ParticipantId::try_from(index + 1).context("too many participants")?;
        let scene = self.world.scene(participant, index == 0);
        let session = Session::new(
            self.config.clone(),
            self.catalog.clone(),
            self.field.endpoint(participant),
            &scene,
            self.now_f32(),
        );
        tracing::info!("[room] participant {participant} joined at {:.2}s", self.now);
        self.peers.push(Peer { session, scene });
        Ok(index)
    }

    /// One frame: tick everyone, commit the field, deliver the change.
    pub fn step(&mut self) {
        self.now += self.dt;
        let now = self.now_f32();
        for peer in &mut self.peers {
            peer.session.tick(&mut peer.scene, now);
            flush(peer);
        }
        self.field.propagate();
        for peer in &mut self.peers {
            if let Some(value) = peer.session.field_mut().poll() {
                // Failures are logged by the session.
                let _ = peer.session.receive(&value, &mut peer.scene, now);
            }
            flush(peer);
        }
    }

    pub fn run_for(&mut self, seconds: f64) {
        let end = self.now + seconds;
        while self.now < end {
            self.step();
        }
    }

    /// Steps until `done` holds, failing after `limit` simulated seconds.
    pub fn run_until(
        &mut self,
        what: &str,
        limit: f64,
        done: impl Fn(&Self) -> bool,
    ) -> anyhow::Result<()> {
        let end = self.now + limit;
        while !done(self) {
            if self.now >= end {
                bail!("timed out after {limit}s waiting for {what}");
            }
            self.step();
        }
        Ok(())
    }

    /// Picks a piece up as `peer`, carries it to its anchor and drops it.
    pub fn place(&mut self, peer: usize, piece: usize) -> anyhow::Result<()> {
        let anchor = self
            .world
            .anchor(piece)
            .with_context(|| format!("piece {piece} has no object"))?;
        if !self.peers[peer].scene.grab(piece) {
            bail!("participant {} could not grab piece {piece}", peer + 1);
        }
        self.step();
        let scene = &mut self.peers[peer].scene;
        scene.move_held(piece, anchor);
        scene.release(piece);
        self.step();
        Ok(())
    }

    /// Pieces `peer` can still pick up and place.
    pub fn open_pieces(&self, peer: usize) -> Vec<usize> {
        let Peer { session, scene } = &self.peers[peer];
        let area = session.game().area();
        session
            .pieces()
            .iter_valid()
            .filter(|p| {
                session.pieces().in_scope(p.index, area)
                    && !p.on_right_position
                    && scene.pickupable(p.index)
                    && !scene.is_grasped(p.index)
            })
            .map(|p| p.index)
            .collect()
    }

    pub fn peer(&self, i: usize) -> &Peer {
        &self.peers[i]
    }

    pub fn peer_mut(&mut self, i: usize) -> &mut Peer {
        &mut self.peers[i]
    }

    pub fn participants(&self) -> usize {
        self.peers.len()
    }

    pub fn field(&self) -> &SharedField {
        &self.field
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn now_f32(&self) -> f32 {
        self.now as f32
    }

    /// Applies a participant's pending effects to its own scene.
    pub fn flush(&mut self, i: usize) {
        flush(&mut self.peers[i]);
    }
}

fn flush(peer: &mut Peer) {
    peer.scene.apply(peer.session.drain_effects());
    for event in peer.session.drain_events() {
        tracing::debug!("[room] {:?}", event);
    }
}
