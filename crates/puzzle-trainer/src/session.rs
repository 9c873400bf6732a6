//! Session orchestration: suspending and resuming puzzles with their timer
//! and hint progress, on top of one long-lived engine and state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chess_core::{Move, PromotionPiece, PuzzleRecord, Square};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TrainerConfig;
use crate::error::TrainerError;
use crate::machine::{MachineEvent, Phase, PuzzleMachine, ResumeState};
use crate::stockfish::StockfishEngine;
use crate::strategy::{EngineStrategy, RecordedSolution, Strategy};

/// Accumulating stopwatch.
#[derive(Debug, Default)]
pub struct PuzzleTimer {
    started: Option<Instant>,
    accumulated: Duration,
}

impl PuzzleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        match self.started {
            Some(started) => self.accumulated + started.elapsed(),
            None => self.accumulated,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Pause and return the total so far.
    pub fn stop(&mut self) -> Duration {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
        self.accumulated
    }

    pub fn reset(&mut self) {
        self.started = None;
        self.accumulated = Duration::ZERO;
    }

    /// Restore a saved reading.
    pub fn hydrate(&mut self, elapsed_ms: u64, running: bool) {
        self.accumulated = Duration::from_millis(elapsed_ms);
        self.started = running.then(Instant::now);
    }

    /// `MM:SS`, truncating partial seconds.
    pub fn format_time(ms: u64) -> String {
        let total_seconds = ms / 1000;
        format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
    }
}

/// Two-stage hint reveal: origin square first, then the full move, then the
/// move is played.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintStep {
    #[default]
    Hidden,
    Origin,
    Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintOutcome {
    /// Nothing to suggest right now.
    Unavailable,
    Origin(Square),
    Destination(Move),
    Played(Move),
}

/// A suspended puzzle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuzzleSession {
    pub resume: ResumeState,
    pub timer_ms: u64,
    pub timer_running: bool,
    pub hint_step: HintStep,
    pub hint_move: Option<Move>,
    pub saved_at: DateTime<Utc>,
}

/// Suspended sessions by puzzle id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionStore {
    sessions: HashMap<u32, PuzzleSession>,
}

impl SessionStore {
    pub fn get(&self, puzzle_id: u32) -> Option<&PuzzleSession> {
        self.sessions.get(&puzzle_id)
    }

    pub fn save(&mut self, puzzle_id: u32, session: PuzzleSession) {
        self.sessions.insert(puzzle_id, session);
    }

    pub fn remove(&mut self, puzzle_id: u32) -> Option<PuzzleSession> {
        self.sessions.remove(&puzzle_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn to_json(&self) -> Result<String, TrainerError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TrainerError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Transitions reported by [`Trainer::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PuzzleOutcome {
    Failed { puzzle_id: u32, time_ms: u64 },
    Completed { puzzle_id: u32, time_ms: u64, success: bool },
}

#[derive(Debug, Default)]
struct HintState {
    step: HintStep,
    mv: Option<Move>,
}

/// Owns the engine, the machine and every per-puzzle session for one run
/// of the app.
pub struct Trainer {
    config: TrainerConfig,
    engine: Option<Arc<StockfishEngine>>,
    machine: PuzzleMachine,
    store: SessionStore,
    timer: PuzzleTimer,
    hint: HintState,
    current: Option<PuzzleRecord>,
    last_phase: Phase,
    last_failed: bool,
}

impl Trainer {
    pub fn new(
        config: TrainerConfig,
        machine: PuzzleMachine,
        engine: Option<Arc<StockfishEngine>>,
    ) -> Self {
        Self {
            config,
            engine,
            machine,
            store: SessionStore::default(),
            timer: PuzzleTimer::new(),
            hint: HintState::default(),
            current: None,
            last_phase: Phase::Loading,
            last_failed: false,
        }
    }

    /// Build a trainer with its own machine over shakmaty rules.
    pub fn with_rules(
        config: TrainerConfig,
        engine: Option<Arc<StockfishEngine>>,
    ) -> (Self, mpsc::UnboundedReceiver<MachineEvent>) {
        let (machine, events) = PuzzleMachine::new(chess_core::ShakmatyRules, config.machine_config());
        (Self::new(config, machine, engine), events)
    }

    pub fn machine(&self) -> &PuzzleMachine {
        &self.machine
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SessionStore {
        &mut self.store
    }

    pub fn timer(&self) -> &PuzzleTimer {
        &self.timer
    }

    pub fn hint(&self) -> (HintStep, Option<Move>) {
        (self.hint.step, self.hint.mv)
    }

    pub fn current_puzzle(&self) -> Option<&PuzzleRecord> {
        self.current.as_ref()
    }

    /// Engine judging when the engine is up, else the recorded line rejoined
    /// at `index`.
    fn strategy_for(&self, record: &PuzzleRecord, index: usize) -> Strategy {
        if let Some(engine) = self.engine.as_ref().filter(|engine| engine.is_ready()) {
            match EngineStrategy::new(Arc::clone(engine), self.config.analysis_depth) {
                Ok(strategy) => return Strategy::Engine(strategy),
                Err(e) => warn!(error = %e, "Engine unavailable, using recorded solution"),
            }
        }
        Strategy::Recorded(RecordedSolution::resume_at(record.solution.clone(), index))
    }

    /// Show `record`, picking up where it was left if it was suspended.
    pub fn open_puzzle(&mut self, record: PuzzleRecord) {
        self.suspend_current();

        let saved = self.store.get(record.id).cloned();
        let index = saved
            .as_ref()
            .map_or(0, |session| session.resume.plies_played());
        let strategy = self.strategy_for(&record, index);

        match &saved {
            Some(session) => {
                let running = session.timer_running && session.resume.phase != Phase::Complete;
                self.timer.hydrate(session.timer_ms, running);
                self.hint = HintState {
                    step: session.hint_step,
                    mv: session.hint_move,
                };
            }
            None => {
                self.timer.reset();
                self.timer.start();
                self.hint = HintState::default();
            }
        }

        info!(puzzle_id = record.id, resumed = saved.is_some(), index, "Opening puzzle");
        self.current = Some(record.clone());
        self.machine
            .load_puzzle(record, strategy, saved.map(|session| session.resume));
        self.sync_observed();
    }

    /// Save the current puzzle's board, timer and hint into the store.
    pub fn suspend_current(&mut self) {
        let Some(puzzle_id) = self.current.as_ref().map(|record| record.id) else {
            return;
        };
        let Some(resume) = self.machine.resume_state() else {
            return;
        };

        let complete = resume.phase == Phase::Complete;
        let session = PuzzleSession {
            resume,
            timer_ms: self.timer.elapsed_ms(),
            timer_running: !complete && self.timer.is_running(),
            hint_step: if complete { HintStep::Hidden } else { self.hint.step },
            hint_move: if complete { None } else { self.hint.mv },
            saved_at: Utc::now(),
        };
        debug!(puzzle_id, timer_ms = session.timer_ms, "Suspending puzzle");
        self.store.save(puzzle_id, session);
    }

    /// Start the current puzzle over. The timer keeps its reading.
    pub fn reset_current(&mut self) {
        let Some(record) = self.current.clone() else {
            return;
        };
        self.store.remove(record.id);
        self.hint = HintState::default();

        let strategy = self.strategy_for(&record, 0);
        info!(puzzle_id = record.id, "Resetting puzzle");
        self.machine.load_puzzle(record, strategy, None);
        self.sync_observed();
    }

    pub async fn make_move(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<PromotionPiece>,
    ) -> Result<(), TrainerError> {
        self.hint = HintState::default();
        self.machine.make_move(from, to, promotion).await
    }

    /// Advance the hint: fetch and show the origin square, then the full
    /// move, then play it.
    pub async fn request_hint(&mut self) -> Result<HintOutcome, TrainerError> {
        if self.current.is_none() || self.machine.snapshot().phase == Phase::Complete {
            return Ok(HintOutcome::Unavailable);
        }

        match (self.hint.step, self.hint.mv) {
            (HintStep::Destination, Some(mv)) => {
                self.make_move(mv.from, mv.to, mv.promotion).await?;
                return Ok(HintOutcome::Played(mv));
            }
            (HintStep::Origin, Some(mv)) => {
                self.hint.step = HintStep::Destination;
                return Ok(HintOutcome::Destination(mv));
            }
            _ => {}
        }

        let generation = self.machine.generation();
        let suggestion = match self.machine.suggest_move().await {
            Ok(suggestion) => suggestion,
            Err(e) => {
                warn!(error = %e, "Hint request failed");
                return Err(e);
            }
        };
        if self.machine.generation() != generation {
            return Ok(HintOutcome::Unavailable);
        }

        match suggestion {
            Some(mv) => {
                self.hint = HintState {
                    step: HintStep::Origin,
                    mv: Some(mv),
                };
                Ok(HintOutcome::Origin(mv.from))
            }
            None => Ok(HintOutcome::Unavailable),
        }
    }

    /// Report failure and completion transitions since the last call, each
    /// once. Completion stops the timer.
    pub fn observe(&mut self) -> Vec<PuzzleOutcome> {
        let snapshot = self.machine.snapshot();
        let Some(puzzle_id) = snapshot.puzzle.as_ref().map(|record| record.id) else {
            return Vec::new();
        };
        let mut outcomes = Vec::new();

        if snapshot.is_failed && !self.last_failed {
            let time_ms = self.timer.elapsed_ms();
            info!(puzzle_id, time_ms, "Puzzle failed");
            outcomes.push(PuzzleOutcome::Failed { puzzle_id, time_ms });
        }
        if snapshot.phase == Phase::Complete && self.last_phase != Phase::Complete {
            let time_ms = self.timer.stop().as_millis() as u64;
            let success = !snapshot.is_failed;
            info!(
                puzzle_id,
                time = %PuzzleTimer::format_time(time_ms),
                success,
                "Puzzle complete"
            );
            outcomes.push(PuzzleOutcome::Completed {
                puzzle_id,
                time_ms,
                success,
            });
        }

        self.last_phase = snapshot.phase;
        self.last_failed = snapshot.is_failed;
        outcomes
    }

    fn sync_observed(&mut self) {
        let snapshot = self.machine.snapshot();
        self.last_phase = snapshot.phase;
        self.last_failed = snapshot.is_failed;
        if snapshot.phase == Phase::Complete {
            self.timer.stop();
        }
    }

    /// Suspend the current puzzle and release the machine and engine.
    pub async fn shutdown(&mut self) {
        self.suspend_current();
        self.machine.dispose();
        if let Some(engine) = &self.engine {
            engine.dispose().await;
        }
    }
}
