//! Per-battle context.
//!
//! A [`BattleSession`] owns everything one battle needs: the simulator, the
//! recorder, and the deploy channel. The input layer talks to the session,
//! which validates deploys against the deployment mask, records them, and
//! forwards them to the simulator (and to the remote peer when attacking
//! over the network). Replays and spectating run through the same fixed-step
//! hook so they land on exactly the frames the live run used.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{Catalog, UnitKind};
use crate::channel::{DeployChannel, DeployMessage, LocalDeployChannel};
use crate::config::BattleConfig;
use crate::error::Result;
use crate::layout::BattleSnapshot;
use crate::math::{Fixed, Vec2Fixed};
use crate::replay::{EventRecorder, ReplayEventKind};
use crate::simulation::{BattleEndReason, BattleState, CombatSimulator, SimEvent};

/// How this session relates to the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkRole {
    /// Single-player; nothing is sent.
    #[default]
    Local,
    /// Accepted deploys are also sent to the peer.
    Attacker,
    /// Deploys come only from the peer.
    Spectator,
}

/// One battle and the pieces wired around it.
#[derive(Debug)]
pub struct BattleSession<C: DeployChannel = LocalDeployChannel> {
    simulator: CombatSimulator,
    recorder: EventRecorder,
    channel: C,
    role: NetworkRole,
    pending_remote: VecDeque<DeployMessage>,
    end_recorded: bool,
}

impl<C: DeployChannel> BattleSession<C> {
    /// Start a live battle against `snapshot`.
    ///
    /// Attackers and local players record a replay; spectators do not.
    pub fn new(
        config: BattleConfig,
        catalog: Catalog,
        snapshot: &BattleSnapshot,
        opponent_id: impl Into<String>,
        seed: u64,
        role: NetworkRole,
        channel: C,
    ) -> Result<Self> {
        let simulator =
            CombatSimulator::with_battle(config, catalog, &snapshot.layout, snapshot.army.clone())?;
        let mut recorder = EventRecorder::new();
        if role != NetworkRole::Spectator {
            recorder.start_recording(opponent_id, snapshot.to_json()?, seed);
        }

        Ok(Self {
            simulator,
            recorder,
            channel,
            role,
            pending_remote: VecDeque::new(),
            end_recorded: false,
        })
    }

    /// The simulator.
    #[must_use]
    pub const fn simulator(&self) -> &CombatSimulator {
        &self.simulator
    }

    /// The recorder.
    #[must_use]
    pub const fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// The deploy channel, e.g. to shuttle messages to a socket.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Network role.
    #[must_use]
    pub const fn role(&self) -> NetworkRole {
        self.role
    }

    /// Take pending simulator notifications.
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.simulator.drain_events()
    }

    /// Handle a deploy command from the input layer.
    ///
    /// Rejected (returns false) for spectators and during playback, outside
    /// READY/FIGHTING, on forbidden cells, and when none of `kind` are left.
    pub fn request_deploy(&mut self, kind: UnitKind, position: Vec2Fixed) -> bool {
        if self.role == NetworkRole::Spectator || self.recorder.is_replaying() {
            return false;
        }
        if !matches!(self.simulator.state(), BattleState::Ready | BattleState::Fighting) {
            return false;
        }
        if !self.simulator.can_deploy_at_position(position) {
            debug!(?kind, "Deploy rejected: forbidden cell");
            return false;
        }

        let frame = self.simulator.frame();
        if self.simulator.deploy_unit(kind, position).is_none() {
            debug!(?kind, "Deploy rejected: none left");
            return false;
        }

        self.recorder.record_deploy(frame, kind, position);
        if self.role == NetworkRole::Attacker {
            self.channel.send(DeployMessage {
                frame,
                unit: kind,
                position,
            });
        }
        true
    }

    /// Give up.
    pub fn surrender(&mut self) {
        self.simulator.surrender();
        self.note_finish();
    }

    /// End the battle because the peer went away.
    pub fn disconnect(&mut self) {
        self.simulator.end_battle(BattleEndReason::Disconnected);
        self.note_finish();
    }

    /// Advance by `dt` seconds of wall time.
    pub fn update(&mut self, dt: Fixed) {
        if self.role == NetworkRole::Spectator {
            while let Some(message) = self.channel.try_recv() {
                self.pending_remote.push_back(message);
            }
        }

        let recorder = &mut self.recorder;
        let pending = &mut self.pending_remote;
        self.simulator.advance(dt, |sim| {
            let frame = sim.frame();

            for event in recorder.update_frame(frame) {
                match event.kind {
                    ReplayEventKind::Deploy => {
                        sim.deploy_unit(event.unit, event.position);
                    }
                    ReplayEventKind::End => sim.end_battle(BattleEndReason::Surrender),
                }
            }

            while pending.front().is_some_and(|m| m.frame <= frame) {
                if let Some(message) = pending.pop_front() {
                    sim.deploy_remote(message.unit, message.position);
                }
            }
        });

        self.note_finish();
    }

    fn note_finish(&mut self) {
        if self.end_recorded || self.simulator.state() != BattleState::Finished {
            return;
        }
        self.end_recorded = true;
        self.recorder.record_end(self.simulator.frame());
        if let Some(outcome) = self.simulator.outcome() {
            info!(
                reason = ?outcome.reason,
                stars = outcome.stars,
                destruction = outcome.destruction_percent,
                "Session finished"
            );
        }
    }

    /// Stop recording and return the replay text, if this session recorded.
    pub fn finish(&mut self) -> Option<String> {
        self.recorder
            .is_recording()
            .then(|| self.recorder.stop_recording())
    }
}

impl BattleSession {
    /// Rebuild a battle from a serialized replay for playback.
    ///
    /// Deploys in the log are applied on their recorded frames as the
    /// session is updated.
    pub fn from_replay(config: BattleConfig, catalog: Catalog, serialized: &str) -> Result<Self> {
        let mut recorder = EventRecorder::new();
        recorder.load_replay(serialized);
        let snapshot = recorder.log().battle_snapshot()?;
        let simulator =
            CombatSimulator::with_battle(config, catalog, &snapshot.layout, snapshot.army)?;

        Ok(Self {
            simulator,
            recorder,
            channel: LocalDeployChannel::new(),
            role: NetworkRole::Local,
            pending_remote: VecDeque::new(),
            end_recorded: false,
        })
    }

    /// Play the loaded replay until the battle ends.
    pub fn run_to_end(&mut self) {
        let step = BattleConfig::fixed_step();
        while self.simulator.state() != BattleState::Finished {
            self.update(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BuildingKind;
    use crate::layout::{BaseLayout, LayoutRecord, LootPool, Roster};

    fn snapshot() -> BattleSnapshot {
        BattleSnapshot {
            layout: BaseLayout {
                owner: "defender".into(),
                buildings: vec![
                    LayoutRecord::new(BuildingKind::TownHall, 20, 20, 4, 4),
                    LayoutRecord::new(BuildingKind::Cannon, 14, 20, 3, 3),
                    LayoutRecord::new(BuildingKind::GoldMine, 26, 20, 3, 3),
                    LayoutRecord::new(BuildingKind::Wall, 20, 18, 1, 1),
                ],
                loot: LootPool {
                    gold: 2_000,
                    elixir: 1_000,
                },
            },
            army: Roster::from_counts([
                (UnitKind::Barbarian, 6),
                (UnitKind::Giant, 2),
                (UnitKind::WallBreaker, 1),
            ]),
        }
    }

    fn local() -> BattleSession {
        BattleSession::new(
            BattleConfig::default(),
            Catalog::standard(),
            &snapshot(),
            "defender",
            77,
            NetworkRole::Local,
            LocalDeployChannel::new(),
        )
        .unwrap()
    }

    fn step(session: &mut BattleSession, steps: u32) {
        for _ in 0..steps {
            session.update(BattleConfig::fixed_step());
        }
    }

    fn play(session: &mut BattleSession) {
        let cell = |x, y| session.simulator().grid().grid_to_position(x, y);
        let (a, b, c) = (cell(5, 5), cell(35, 35), cell(21, 12));
        assert!(session.request_deploy(UnitKind::Giant, a));
        step(session, 30);
        assert!(session.request_deploy(UnitKind::Barbarian, b));
        assert!(session.request_deploy(UnitKind::Barbarian, b));
        step(session, 90);
        assert!(session.request_deploy(UnitKind::WallBreaker, c));
        step(session, 600);
        assert!(session.request_deploy(UnitKind::Giant, a));
    }

    #[test]
    fn test_request_deploy_rejections() {
        let mut session = local();
        let inside = session.simulator().grid().grid_to_position(21, 21);
        assert!(!session.request_deploy(UnitKind::Barbarian, inside));

        let open = session.simulator().grid().grid_to_position(2, 2);
        assert!(!session.request_deploy(UnitKind::Archer, open));
        assert!(session.request_deploy(UnitKind::WallBreaker, open));
        assert!(!session.request_deploy(UnitKind::WallBreaker, open));
        assert_eq!(session.recorder().log().deploy_count(), 1);
    }

    #[test]
    fn test_replay_reproduces_battle() {
        let mut live = local();
        play(&mut live);
        step(&mut live, 60 * 60);
        live.surrender();
        let text = live.finish().unwrap();
        let expected = live.simulator().outcome().cloned().unwrap();

        let mut replay =
            BattleSession::from_replay(BattleConfig::default(), Catalog::standard(), &text).unwrap();
        replay.run_to_end();

        let outcome = replay.simulator().outcome().cloned().unwrap();
        assert_eq!(outcome, expected);
        assert_eq!(outcome.reason, BattleEndReason::Surrender);
        assert_eq!(
            replay.simulator().destroyed_buildings(),
            live.simulator().destroyed_buildings()
        );
        assert_eq!(replay.simulator().state_hash(), live.simulator().state_hash());
    }

    #[test]
    fn test_replay_rejects_manual_deploys() {
        let mut live = local();
        play(&mut live);
        let text = live.finish().unwrap();

        let mut replay =
            BattleSession::from_replay(BattleConfig::default(), Catalog::standard(), &text).unwrap();
        let open = replay.simulator().grid().grid_to_position(2, 2);
        assert!(!replay.request_deploy(UnitKind::Barbarian, open));
    }

    #[test]
    fn test_end_recorded_once() {
        let mut live = local();
        live.surrender();
        live.surrender();
        step(&mut live, 5);
        let text = live.finish().unwrap();
        let log = crate::replay::ReplayLog::parse(&text);
        assert_eq!(log.events.len(), 1);
        assert_eq!(log.events[0].kind, ReplayEventKind::End);
        assert!(live.finish().is_none());
    }

    #[test]
    fn test_replay_with_off_grid_deploy_plays_out() {
        let log = crate::replay::ReplayLog {
            opponent_id: "opp".into(),
            seed: 1,
            snapshot: snapshot().to_json().unwrap(),
            events: vec![crate::replay::ReplayEvent::deploy(
                0,
                UnitKind::Barbarian,
                Vec2Fixed::new(Fixed::MIN, Fixed::ZERO),
            )],
        };

        let text = log.serialize();
        let mut replay =
            BattleSession::from_replay(BattleConfig::default(), Catalog::standard(), &text).unwrap();
        step(&mut replay, 120);

        let sim = replay.simulator();
        assert!(sim.units().is_empty());
        assert!(!sim.has_deployed_any());
        assert_eq!(sim.roster().count(UnitKind::Barbarian), 6);
        assert_eq!(sim.state(), BattleState::Ready);
    }

    #[test]
    fn test_spectator_drops_off_grid_remote_deploy() {
        let mut spectator = BattleSession::new(
            BattleConfig::default(),
            Catalog::standard(),
            &snapshot(),
            "defender",
            1,
            NetworkRole::Spectator,
            LocalDeployChannel::new(),
        )
        .unwrap();
        spectator.channel_mut().push_incoming(DeployMessage {
            frame: 0,
            unit: UnitKind::Giant,
            position: Vec2Fixed::new(Fixed::MAX, Fixed::MIN),
        });

        step(&mut spectator, 60);
        assert!(spectator.simulator().units().is_empty());
        assert_eq!(spectator.simulator().roster().count(UnitKind::Giant), 2);
    }

    #[test]
    fn test_spectator_mirrors_attacker() {
        let mut attacker = BattleSession::new(
            BattleConfig::default(),
            Catalog::standard(),
            &snapshot(),
            "defender",
            1,
            NetworkRole::Attacker,
            LocalDeployChannel::new(),
        )
        .unwrap();
        let mut spectator = BattleSession::new(
            BattleConfig::default(),
            Catalog::standard(),
            &snapshot(),
            "defender",
            1,
            NetworkRole::Spectator,
            LocalDeployChannel::new(),
        )
        .unwrap();

        let open = attacker.simulator().grid().grid_to_position(5, 5);
        assert!(!spectator.request_deploy(UnitKind::Giant, open));

        for frame in 0..1200 {
            if frame == 10 || frame == 200 {
                assert!(attacker.request_deploy(UnitKind::Giant, open));
            }
            for message in attacker.channel_mut().drain_outgoing() {
                spectator.channel_mut().push_incoming(message);
            }
            attacker.update(BattleConfig::fixed_step());
            spectator.update(BattleConfig::fixed_step());
        }

        assert_eq!(spectator.simulator().units().len(), attacker.simulator().units().len());
        assert_eq!(spectator.simulator().state_hash(), attacker.simulator().state_hash());
        assert!(spectator.finish().is_none());
    }
}
