//! Deploy-log recording and playback.
//!
//! A replay is the opponent snapshot plus the frame-indexed list of deploys
//! (and the surrender, if any) issued during a battle. Because the
//! simulator is deterministic, feeding the same events to a fresh simulator
//! on the same frames reproduces the battle exactly.
//!
//! # Text format
//!
//! ```text
//! opponentId|seed|snapshotLength|snapshot|event;event;...
//! ```
//!
//! Each event is `frame,eventType,unitType,x,y`. `eventType` is 0 for a
//! deploy and 1 for an end marker; `x` and `y` are raw 32.32 fixed-point
//! bit patterns. `snapshotLength` is the snapshot's length in bytes, which
//! lets the snapshot itself contain `|`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::UnitKind;
use crate::error::{BattleError, Result};
use crate::layout::BattleSnapshot;
use crate::math::{Fixed, Vec2Fixed};

const FIELD_SEPARATOR: char = '|';
const EVENT_SEPARATOR: char = ';';

/// What a replay event does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplayEventKind {
    /// Spawn a unit.
    Deploy = 0,
    /// The attacker ended the battle.
    End = 1,
}

impl ReplayEventKind {
    /// Wire code for this kind.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Kind for a wire code. Anything but 1 reads as a deploy.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::End,
            _ => Self::Deploy,
        }
    }
}

/// One recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEvent {
    /// Steps completed when the event was applied.
    pub frame: u32,
    /// Deploy or end.
    pub kind: ReplayEventKind,
    /// Troop type; meaningless for end markers.
    pub unit: UnitKind,
    /// Deploy position; zero for end markers.
    pub position: Vec2Fixed,
}

impl ReplayEvent {
    /// A deploy event.
    #[must_use]
    pub const fn deploy(frame: u32, unit: UnitKind, position: Vec2Fixed) -> Self {
        Self {
            frame,
            kind: ReplayEventKind::Deploy,
            unit,
            position,
        }
    }

    /// An end marker.
    #[must_use]
    pub const fn end(frame: u32) -> Self {
        Self {
            frame,
            kind: ReplayEventKind::End,
            unit: UnitKind::Barbarian,
            position: Vec2Fixed::ZERO,
        }
    }

    fn encode(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.frame,
            self.kind.code(),
            self.unit.index(),
            self.position.x.to_bits(),
            self.position.y.to_bits()
        )
    }

    /// Decode one event; missing or invalid fields read as zero.
    fn decode(text: &str) -> Self {
        let mut fields = text.split(',').map(str::trim);
        let mut next = || fields.next().unwrap_or("");

        let frame = next().parse().unwrap_or(0);
        let kind = ReplayEventKind::from_code(next().parse().unwrap_or(0));
        let unit = next()
            .parse()
            .ok()
            .and_then(UnitKind::from_index)
            .unwrap_or(UnitKind::Barbarian);
        let x = Fixed::from_bits(next().parse().unwrap_or(0));
        let y = Fixed::from_bits(next().parse().unwrap_or(0));

        Self {
            frame,
            kind,
            unit,
            position: Vec2Fixed::new(x, y),
        }
    }
}

/// A complete replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayLog {
    /// Defender identifier.
    pub opponent_id: String,
    /// Seed recorded with the battle.
    pub seed: u64,
    /// JSON-encoded [`BattleSnapshot`].
    pub snapshot: String,
    /// Events in non-decreasing frame order.
    pub events: Vec<ReplayEvent>,
}

impl ReplayLog {
    /// Encode in the text format.
    #[must_use]
    pub fn serialize(&self) -> String {
        let events: Vec<String> = self.events.iter().map(ReplayEvent::encode).collect();
        format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.opponent_id,
            self.seed,
            self.snapshot.len(),
            self.snapshot,
            events.join(&EVENT_SEPARATOR.to_string()),
            sep = FIELD_SEPARATOR,
        )
    }

    /// Decode the text format.
    ///
    /// Never fails: missing or malformed fields fall back to zero or empty,
    /// and events are stably sorted by frame.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut head = text.splitn(3, FIELD_SEPARATOR);
        let opponent_id = head.next().unwrap_or("").to_string();
        let seed = head.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
        let rest = head.next().unwrap_or("");

        let (length, body) = rest.split_once(FIELD_SEPARATOR).unwrap_or((rest, ""));
        let (snapshot, event_text) = match length.trim().parse::<usize>() {
            Ok(len) if body.is_char_boundary(len) && len <= body.len() => {
                let (snapshot, tail) = body.split_at(len);
                match tail.strip_prefix(FIELD_SEPARATOR) {
                    Some(events) => (snapshot, events),
                    None if tail.is_empty() => (snapshot, ""),
                    None => split_last_field(body),
                }
            }
            _ => split_last_field(body),
        };

        let mut events: Vec<ReplayEvent> = event_text
            .split(EVENT_SEPARATOR)
            .filter(|e| !e.trim().is_empty())
            .map(ReplayEvent::decode)
            .collect();
        events.sort_by_key(|e| e.frame);

        Self {
            opponent_id,
            seed,
            snapshot: snapshot.to_string(),
            events,
        }
    }

    /// Decode the embedded snapshot.
    pub fn battle_snapshot(&self) -> Result<BattleSnapshot> {
        BattleSnapshot::from_json(&self.snapshot)
    }

    /// Frame of the last event, or 0.
    #[must_use]
    pub fn last_frame(&self) -> u32 {
        self.events.last().map_or(0, |e| e.frame)
    }

    /// Number of deploy events.
    #[must_use]
    pub fn deploy_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.kind == ReplayEventKind::Deploy)
            .count()
    }

    /// Write the text form to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.serialize()).map_err(|source| BattleError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read and parse a replay file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BattleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(text.trim_end()))
    }
}

/// Fallback split when the length prefix is unusable.
fn split_last_field(body: &str) -> (&str, &str) {
    body.rsplit_once(FIELD_SEPARATOR).unwrap_or((body, ""))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Idle,
    Recording,
    Replaying,
}

/// Records a live battle or feeds a loaded one back frame by frame.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    mode: Mode,
    log: ReplayLog,
    cursor: usize,
}

impl EventRecorder {
    /// Create an idle recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new recording, discarding anything held before.
    pub fn start_recording(&mut self, opponent_id: impl Into<String>, snapshot: String, seed: u64) {
        self.log = ReplayLog {
            opponent_id: opponent_id.into(),
            seed,
            snapshot,
            events: Vec::new(),
        };
        self.cursor = 0;
        self.mode = Mode::Recording;
        info!(opponent = %self.log.opponent_id, seed, "Recording started");
    }

    fn push(&mut self, mut event: ReplayEvent) {
        if self.mode != Mode::Recording {
            return;
        }
        let last = self.log.last_frame();
        if event.frame < last {
            warn!(frame = event.frame, last, "Out-of-order replay event clamped");
            event.frame = last;
        }
        self.log.events.push(event);
    }

    /// Record a deploy. Ignored unless recording.
    pub fn record_deploy(&mut self, frame: u32, unit: UnitKind, position: Vec2Fixed) {
        self.push(ReplayEvent::deploy(frame, unit, position));
    }

    /// Record the attacker ending the battle. Ignored unless recording.
    pub fn record_end(&mut self, frame: u32) {
        self.push(ReplayEvent::end(frame));
    }

    /// Stop recording and return the serialized log.
    pub fn stop_recording(&mut self) -> String {
        if self.mode == Mode::Recording {
            info!(events = self.log.events.len(), "Recording stopped");
            self.mode = Mode::Idle;
        }
        self.log.serialize()
    }

    /// Load a serialized log for playback.
    pub fn load_replay(&mut self, serialized: &str) {
        self.log = ReplayLog::parse(serialized);
        self.cursor = 0;
        self.mode = Mode::Replaying;
        info!(
            opponent = %self.log.opponent_id,
            events = self.log.events.len(),
            "Replay loaded"
        );
    }

    /// Events due at `current_frame` that have not fired yet, in order.
    ///
    /// Returns nothing unless a replay is loaded.
    pub fn update_frame(&mut self, current_frame: u32) -> Vec<ReplayEvent> {
        if self.mode != Mode::Replaying {
            return Vec::new();
        }
        let due = self.log.events[self.cursor..]
            .iter()
            .take_while(|e| e.frame <= current_frame)
            .count();
        let fired = self.log.events[self.cursor..self.cursor + due].to_vec();
        self.cursor += due;
        if !fired.is_empty() {
            debug!(frame = current_frame, count = fired.len(), "Replay events fired");
        }
        fired
    }

    /// Currently recording.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.mode == Mode::Recording
    }

    /// Currently playing back.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.mode == Mode::Replaying
    }

    /// Every loaded event has fired.
    #[must_use]
    pub fn playback_complete(&self) -> bool {
        self.cursor >= self.log.events.len()
    }

    /// The log being recorded or played.
    #[must_use]
    pub const fn log(&self) -> &ReplayLog {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> ReplayLog {
        ReplayLog {
            opponent_id: "base-42".into(),
            seed: 1234,
            snapshot: r#"{"a":"x|y"}"#.into(),
            events: vec![
                ReplayEvent::deploy(0, UnitKind::Giant, Vec2Fixed::from_int(100, 200)),
                ReplayEvent::deploy(5, UnitKind::Archer, Vec2Fixed::new(Fixed::from_bits(-3), Fixed::from_bits(7))),
                ReplayEvent::end(90),
            ],
        }
    }

    #[test]
    fn test_serialize_layout() {
        let log = ReplayLog {
            opponent_id: "opp".into(),
            seed: 9,
            snapshot: "{}".into(),
            events: vec![ReplayEvent::deploy(3, UnitKind::Goblin, Vec2Fixed::new(Fixed::from_bits(1), Fixed::from_bits(2)))],
        };
        assert_eq!(log.serialize(), "opp|9|2|{}|3,0,3,1,2");
    }

    #[test]
    fn test_parse_reads_back_pipes_in_snapshot() {
        let log = sample_log();
        assert_eq!(ReplayLog::parse(&log.serialize()), log);
    }

    #[test]
    fn test_parse_lenient_fields() {
        let log = ReplayLog::parse("who|notanumber|2|{}|7,x,99;;3,1");
        assert_eq!(log.opponent_id, "who");
        assert_eq!(log.seed, 0);
        assert_eq!(log.snapshot, "{}");
        assert_eq!(log.events.len(), 2);
        assert_eq!(log.events[0], ReplayEvent::end(3));
        assert_eq!(log.events[1].frame, 7);
        assert_eq!(log.events[1].kind, ReplayEventKind::Deploy);
        assert_eq!(log.events[1].unit, UnitKind::Barbarian);
        assert_eq!(log.events[1].position, Vec2Fixed::ZERO);
    }

    #[test]
    fn test_parse_bad_length_falls_back() {
        let log = ReplayLog::parse("who|1|999|{}|4,0,1,0,0");
        assert_eq!(log.snapshot, "{}");
        assert_eq!(log.events, vec![ReplayEvent::deploy(4, UnitKind::Archer, Vec2Fixed::ZERO)]);
    }

    #[test]
    fn test_parse_garbage() {
        let log = ReplayLog::parse("");
        assert_eq!(log, ReplayLog::default());
        let log = ReplayLog::parse("only-id");
        assert_eq!(log.opponent_id, "only-id");
        assert!(log.events.is_empty());
    }

    #[test]
    fn test_parse_sorts_stably() {
        let log = ReplayLog::parse("o|0|0||9,0,1,0,0;2,0,2,0,0;9,0,3,0,0");
        let order: Vec<_> = log.events.iter().map(|e| (e.frame, e.unit)).collect();
        assert_eq!(
            order,
            vec![(2, UnitKind::Giant), (9, UnitKind::Archer), (9, UnitKind::Goblin)]
        );
    }

    #[test]
    fn test_recorder_clamps_frames() {
        let mut recorder = EventRecorder::new();
        recorder.record_deploy(1, UnitKind::Giant, Vec2Fixed::ZERO);
        assert!(recorder.log().events.is_empty(), "idle recorder ignores events");

        recorder.start_recording("o", "{}".into(), 5);
        recorder.record_deploy(10, UnitKind::Giant, Vec2Fixed::ZERO);
        recorder.record_deploy(4, UnitKind::Archer, Vec2Fixed::ZERO);
        recorder.record_end(12);
        let text = recorder.stop_recording();
        assert!(!recorder.is_recording());

        let frames: Vec<u32> = ReplayLog::parse(&text).events.iter().map(|e| e.frame).collect();
        assert_eq!(frames, vec![10, 10, 12]);
    }

    #[test]
    fn test_update_frame_fires_each_event_once() {
        let mut recorder = EventRecorder::new();
        assert!(recorder.update_frame(100).is_empty());

        recorder.load_replay(&sample_log().serialize());
        assert!(recorder.is_replaying());

        let first = recorder.update_frame(0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].unit, UnitKind::Giant);
        assert!(recorder.update_frame(0).is_empty());
        assert!(recorder.update_frame(4).is_empty());

        let rest = recorder.update_frame(1000);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].kind, ReplayEventKind::End);
        assert!(recorder.playback_complete());
        assert!(recorder.update_frame(2000).is_empty());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("battle.replay");

        let log = sample_log();
        log.save(&path).unwrap();
        assert_eq!(ReplayLog::load(&path).unwrap(), log);
        assert!(ReplayLog::load(dir.path().join("missing.replay")).is_err());
    }
}
