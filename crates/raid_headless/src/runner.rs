//! Single-battle runs, replays and replay verification.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use raid_core::catalog::Catalog;
use raid_core::channel::{DeployChannel, LocalDeployChannel};
use raid_core::config::BattleConfig;
use raid_core::layout::{BaseLayout, BattleSnapshot};
use raid_core::session::{BattleSession, NetworkRole};
use raid_core::simulation::{BattleOutcome, BattleState};

use crate::error::{HeadlessError, Result};
use crate::plan::AttackPlan;

/// Everything a finished battle reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Final result.
    pub outcome: BattleOutcome,
    /// Layout indices of destroyed buildings, ascending.
    pub destroyed: Vec<u32>,
    /// Simulator state hash after the last step.
    pub state_hash: u64,
    /// Planned deploys the session refused.
    pub rejected_deploys: usize,
    /// Replay text, empty for played-back battles.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub replay: String,
}

/// Result of replaying one log several times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Runs performed.
    pub runs: usize,
    /// Final state hash of each run.
    pub hashes: Vec<u64>,
    /// Whether every run matched.
    pub deterministic: bool,
    /// Outcome of the first run.
    pub outcome: Option<BattleOutcome>,
}

/// Battle rules and stat tables shared by every run.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    config: BattleConfig,
    catalog: Catalog,
}

impl Runner {
    /// Create a runner.
    #[must_use]
    pub const fn new(config: BattleConfig, catalog: Catalog) -> Self {
        Self { config, catalog }
    }

    /// Battle rules.
    #[must_use]
    pub const fn config(&self) -> &BattleConfig {
        &self.config
    }

    /// Stat tables.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Play `plan` against `layout` live and record a replay.
    ///
    /// Deploys are issued on their frames. If the battle is still running
    /// after `max_frames` frames the attacker surrenders.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout does not load.
    pub fn run(
        &self,
        layout: &BaseLayout,
        plan: &AttackPlan,
        seed: u64,
        max_frames: Option<u32>,
    ) -> Result<RunReport> {
        let snapshot = BattleSnapshot {
            layout: layout.clone(),
            army: plan.army.clone(),
        };
        let mut session = BattleSession::new(
            self.config.clone(),
            self.catalog.clone(),
            &snapshot,
            layout.owner.clone(),
            seed,
            NetworkRole::Local,
            LocalDeployChannel::new(),
        )?;

        let schedule = plan.schedule();
        let mut next = 0;
        let mut rejected = 0;
        let step = BattleConfig::fixed_step();
        let max_frames = max_frames.unwrap_or(u32::MAX);

        while session.simulator().state() != BattleState::Finished {
            let frame = session.simulator().frame();
            if frame >= max_frames {
                debug!(frame, "Frame limit reached, surrendering");
                session.surrender();
                break;
            }
            while let Some(deploy) = schedule.get(next).filter(|d| d.frame <= frame) {
                let pos = session
                    .simulator()
                    .grid()
                    .grid_to_position(deploy.cell.x, deploy.cell.y);
                if !session.request_deploy(deploy.unit, pos) {
                    rejected += 1;
                }
                next += 1;
            }
            session.update(step);
        }

        if next < schedule.len() {
            rejected += schedule.len() - next;
        }
        if rejected > 0 {
            warn!(rejected, "Some planned deploys were refused");
        }

        let replay = session.finish().unwrap_or_default();
        let mut report = report_of(&session)?;
        report.rejected_deploys = rejected;
        report.replay = replay;

        info!(
            seed,
            stars = report.outcome.stars,
            destruction = report.outcome.destruction_percent,
            frames = report.outcome.frames,
            "Battle complete"
        );
        Ok(report)
    }

    /// Play a serialized replay to the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded snapshot does not decode or load.
    pub fn replay(&self, text: &str) -> Result<RunReport> {
        let mut session =
            BattleSession::from_replay(self.config.clone(), self.catalog.clone(), text)?;
        debug!(
            events = session.recorder().log().events.len(),
            "Replay loaded"
        );
        session.run_to_end();
        report_of(&session)
    }

    /// Replay `text` `runs` times and compare final state hashes.
    ///
    /// # Errors
    ///
    /// Returns an error if the replay cannot be loaded.
    pub fn verify(&self, text: &str, runs: usize) -> Result<VerifyReport> {
        let mut hashes = Vec::with_capacity(runs);
        let mut outcome = None;
        for run in 0..runs {
            let report = self.replay(text)?;
            debug!(run, hash = report.state_hash, "Replay run finished");
            hashes.push(report.state_hash);
            outcome.get_or_insert(report.outcome);
        }

        let deterministic = hashes.windows(2).all(|w| w[0] == w[1]);
        if deterministic {
            info!(runs, "Replay is deterministic");
        } else {
            warn!(runs, ?hashes, "Replay diverged");
        }

        Ok(VerifyReport {
            runs,
            hashes,
            deterministic,
            outcome,
        })
    }
}

impl VerifyReport {
    /// Turn a divergent report into an error.
    ///
    /// # Errors
    ///
    /// Returns [`HeadlessError::ReplayDiverged`] if the runs disagreed.
    pub fn into_result(self) -> Result<Self> {
        if self.deterministic {
            return Ok(self);
        }
        let mut unique = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        Err(HeadlessError::ReplayDiverged {
            runs: self.runs,
            unique: unique.len(),
        })
    }
}

fn report_of<C: DeployChannel>(session: &BattleSession<C>) -> Result<RunReport> {
    let sim = session.simulator();
    let outcome = sim.outcome().cloned().ok_or(HeadlessError::Unfinished)?;
    Ok(RunReport {
        outcome,
        destroyed: sim.destroyed_buildings(),
        state_hash: sim.state_hash(),
        rejected_deploys: 0,
        replay: String::new(),
    })
}
