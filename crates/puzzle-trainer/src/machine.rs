//! Puzzle state machine.
//!
//! Drives one puzzle at a time through `playing → validating →
//! opponent_turn → playing | complete`. Every await captures the generation
//! counter first and re-checks it under the state lock on resume; loading a
//! new puzzle or disposing bumps it, so superseded continuations become
//! no-ops.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chess_core::{
    AppliedMove, BoardColor, Move, Position, PromotionPiece, PuzzleRecord, RulesAdapter, Square,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::MachineConfig;
use crate::error::TrainerError;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Loading,
    Playing,
    Validating,
    OpponentTurn,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMove {
    pub notation: String,
    pub was_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpponentMove {
    pub notation: String,
}

/// One history entry: a user move and the reply to it, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub ordinal: u32,
    pub user_move: UserMove,
    pub opponent_move: Option<OpponentMove>,
}

impl MoveRecord {
    /// Plies this record accounts for on the board.
    pub fn plies(&self) -> usize {
        1 + usize::from(self.opponent_move.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub sequence_id: u64,
    pub kind: FeedbackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    /// State changed; re-read the snapshot.
    Changed,
    Feedback(FeedbackEvent),
}

/// Everything needed to put a puzzle back on the board where it was left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    pub position: Position,
    /// `Playing` or `Complete`.
    pub phase: Phase,
    pub is_failed: bool,
    pub history: Vec<MoveRecord>,
    pub pending: Option<MoveRecord>,
    pub last_move: Option<(Square, Square)>,
}

impl ResumeState {
    pub fn plies_played(&self) -> usize {
        self.history
            .iter()
            .chain(self.pending.as_ref())
            .map(MoveRecord::plies)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineSnapshot {
    pub phase: Phase,
    pub position: Position,
    pub orientation: BoardColor,
    pub turn: BoardColor,
    pub legal_destinations: BTreeMap<Square, Vec<Square>>,
    pub last_move: Option<(Square, Square)>,
    pub is_failed: bool,
    pub is_interactive: bool,
    pub is_check: bool,
    pub history: Vec<MoveRecord>,
    pub pending: Option<MoveRecord>,
    pub puzzle: Option<PuzzleRecord>,
    pub last_feedback: Option<FeedbackEvent>,
    pub generation: u64,
}

/// State to restore if the strategy fails on a move.
#[derive(Debug, Clone)]
struct Checkpoint {
    position: Position,
    last_move: Option<(Square, Square)>,
    pending: Option<MoveRecord>,
    user_move_count: u32,
}

/// What an unfinished turn settles to if it is suspended right now.
#[derive(Debug, Clone)]
enum InFlight {
    /// Waiting on the strategy; the user's move is undone.
    Judging(Checkpoint),
    /// Reply known, waiting out the presentation delay.
    Reply(Move),
}

struct MachineState {
    puzzle: Option<PuzzleRecord>,
    strategy: Option<Arc<Strategy>>,
    position: Position,
    phase: Phase,
    is_failed: bool,
    history: Vec<MoveRecord>,
    pending: Option<MoveRecord>,
    last_move: Option<(Square, Square)>,
    user_move_count: u32,
    total_mate_depth: u32,
    feedback_sequence: u64,
    last_feedback: Option<FeedbackEvent>,
    generation: u64,
    in_flight: Option<InFlight>,
}

impl MachineState {
    fn new() -> Self {
        Self {
            puzzle: None,
            strategy: None,
            position: Position::default(),
            phase: Phase::Loading,
            is_failed: false,
            history: Vec::new(),
            pending: None,
            last_move: None,
            user_move_count: 0,
            total_mate_depth: 0,
            feedback_sequence: 0,
            last_feedback: None,
            generation: 0,
            in_flight: None,
        }
    }

    fn open_record(&mut self, notation: String, was_correct: bool) {
        self.pending = Some(MoveRecord {
            ordinal: self.history.len() as u32 + 1,
            user_move: UserMove {
                notation,
                was_correct,
            },
            opponent_move: None,
        });
    }

    fn finalize_record(&mut self) {
        if let Some(record) = self.pending.take() {
            self.history.push(record);
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            position: self.position.clone(),
            last_move: self.last_move,
            pending: self.pending.clone(),
            user_move_count: self.user_move_count,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.position = checkpoint.position;
        self.last_move = checkpoint.last_move;
        self.pending = checkpoint.pending;
        self.user_move_count = checkpoint.user_move_count;
        self.phase = Phase::Playing;
        self.in_flight = None;
    }

    fn orientation(&self) -> BoardColor {
        self.puzzle
            .as_ref()
            .map_or(BoardColor::White, |puzzle| puzzle.side_to_move)
    }

    fn puzzle_id(&self) -> u32 {
        self.puzzle.as_ref().map_or(0, |puzzle| puzzle.id)
    }
}

/// Async work a move hands off after its synchronous part.
enum FollowUp {
    Validate {
        strategy: Arc<Strategy>,
        position: Position,
        user_move: Move,
        remaining: u32,
    },
    FetchReply {
        strategy: Arc<Strategy>,
        position: Position,
    },
}

struct Inner {
    rules: Box<dyn RulesAdapter>,
    config: MachineConfig,
    state: Mutex<MachineState>,
    generation: watch::Sender<u64>,
    events: mpsc::UnboundedSender<MachineEvent>,
}

/// Cloneable handle; all clones drive the same puzzle.
#[derive(Clone)]
pub struct PuzzleMachine {
    inner: Arc<Inner>,
}

impl PuzzleMachine {
    pub fn new(
        rules: impl RulesAdapter + 'static,
        config: MachineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<MachineEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (generation, _) = watch::channel(0);
        let machine = Self {
            inner: Arc::new(Inner {
                rules: Box::new(rules),
                config,
                state: Mutex::new(MachineState::new()),
                generation,
                events,
            }),
        };
        (machine, receiver)
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: MachineEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.inner.events.send(event);
    }

    fn bump_generation(&self, state: &mut MachineState) {
        state.generation += 1;
        state.in_flight = None;
        self.inner.generation.send_replace(state.generation);
    }

    fn feedback(&self, state: &mut MachineState, kind: FeedbackKind) {
        state.feedback_sequence += 1;
        let event = FeedbackEvent {
            sequence_id: state.feedback_sequence,
            kind,
        };
        state.last_feedback = Some(event);
        self.emit(MachineEvent::Feedback(event));
    }

    /// Put `record` on the board, abandoning any work in flight. With
    /// `resume`, the board, history and failure flag are restored from it.
    pub fn load_puzzle(&self, record: PuzzleRecord, strategy: Strategy, resume: Option<ResumeState>) {
        let mut state = self.lock();
        self.bump_generation(&mut state);

        let resumed = resume.is_some();
        match resume {
            Some(resume) => {
                state.position = resume.position;
                state.phase = match resume.phase {
                    Phase::Complete => Phase::Complete,
                    _ => Phase::Playing,
                };
                state.is_failed = resume.is_failed;
                state.user_move_count =
                    (resume.history.len() + usize::from(resume.pending.is_some())) as u32;
                state.history = resume.history;
                state.pending = resume.pending;
                state.last_move = resume.last_move;
            }
            None => {
                state.position = record.start_position.clone();
                state.phase = Phase::Playing;
                state.is_failed = false;
                state.user_move_count = 0;
                state.history = Vec::new();
                state.pending = None;
                state.last_move = None;
            }
        }
        state.total_mate_depth = record.mate_depth.moves();
        state.last_feedback = None;

        info!(
            puzzle_id = record.id,
            mate_depth = state.total_mate_depth,
            strategy = strategy.name(),
            resumed,
            generation = state.generation,
            "Puzzle loaded"
        );
        state.strategy = Some(Arc::new(strategy));
        state.puzzle = Some(record);
        self.emit(MachineEvent::Changed);
    }

    /// Play a user move. Moves outside `playing` and illegal moves are
    /// ignored. Errors only when the strategy fails, after the move has been
    /// taken back.
    pub async fn make_move(
        &self,
        from: Square,
        to: Square,
        promotion: Option<PromotionPiece>,
    ) -> Result<(), TrainerError> {
        let (generation, checkpoint, follow_up) = {
            let mut state = self.lock();
            if state.phase != Phase::Playing {
                debug!(phase = ?state.phase, %from, %to, "Move ignored outside playing phase");
                return Ok(());
            }
            let Some(strategy) = state.strategy.clone() else {
                return Ok(());
            };
            let Some((user_move, applied)) = self.resolve_move(&state.position, from, to, promotion)
            else {
                debug!(%from, %to, "Illegal move ignored");
                return Ok(());
            };

            let generation = state.generation;
            let checkpoint = state.checkpoint();
            let mover = self.inner.rules.side_to_move(&state.position);
            state.position = applied.position;
            state.last_move = Some((from, to));
            debug!(san = %applied.san, is_failed = state.is_failed, "User move");

            let follow_up = if state.is_failed {
                self.free_play_move(&mut state, strategy, applied.san, mover, &checkpoint)
            } else {
                self.judged_move(&mut state, strategy, applied.san, user_move, &checkpoint)
            };
            self.emit(MachineEvent::Changed);
            (generation, checkpoint, follow_up)
        };

        match follow_up {
            None => Ok(()),
            Some(FollowUp::Validate {
                strategy,
                position,
                user_move,
                remaining,
            }) => {
                let verdict = strategy
                    .validate_move(&position, &user_move, remaining)
                    .await;
                let reply = {
                    let mut state = self.lock();
                    if state.generation != generation {
                        debug!(generation, "Discarding stale validation");
                        return Ok(());
                    }
                    let verdict = match verdict {
                        Ok(verdict) => verdict,
                        Err(e) => {
                            state.restore(checkpoint);
                            self.emit(MachineEvent::Changed);
                            return Err(e.into());
                        }
                    };

                    if let Some(record) = state.pending.as_mut() {
                        record.user_move.was_correct = verdict.is_correct;
                    }
                    if verdict.is_correct {
                        self.feedback(&mut state, FeedbackKind::Correct);
                    } else {
                        state.is_failed = true;
                        info!(puzzle_id = state.puzzle_id(), "Puzzle failed");
                        self.feedback(&mut state, FeedbackKind::Incorrect);
                    }

                    match verdict.opponent_reply {
                        Some(reply) => {
                            state.phase = Phase::OpponentTurn;
                            state.in_flight = Some(InFlight::Reply(reply));
                            self.emit(MachineEvent::Changed);
                            reply
                        }
                        None => {
                            state.finalize_record();
                            state.phase = Phase::Playing;
                            state.in_flight = None;
                            self.emit(MachineEvent::Changed);
                            return Ok(());
                        }
                    }
                };
                self.play_reply(generation, reply).await;
                Ok(())
            }
            Some(FollowUp::FetchReply { strategy, position }) => {
                let fetched = strategy.opponent_move(&position).await;
                let reply = {
                    let mut state = self.lock();
                    if state.generation != generation {
                        debug!(generation, "Discarding stale opponent move");
                        return Ok(());
                    }
                    match fetched {
                        Err(e) => {
                            state.restore(checkpoint);
                            self.emit(MachineEvent::Changed);
                            return Err(e.into());
                        }
                        Ok(Some(reply)) => {
                            state.in_flight = Some(InFlight::Reply(reply));
                            reply
                        }
                        Ok(None) => {
                            state.finalize_record();
                            state.phase = Phase::Playing;
                            state.in_flight = None;
                            self.emit(MachineEvent::Changed);
                            return Ok(());
                        }
                    }
                };
                self.play_reply(generation, reply).await;
                Ok(())
            }
        }
    }

    /// Play `(from, to)`, promoting to a queen when the bare move is only
    /// legal as a promotion.
    fn resolve_move(
        &self,
        position: &Position,
        from: Square,
        to: Square,
        promotion: Option<PromotionPiece>,
    ) -> Option<(Move, AppliedMove)> {
        let rules = &self.inner.rules;
        let requested = Move::new(from, to, promotion);
        if let Some(applied) = rules.apply_move(position, &requested) {
            return Some((requested, applied));
        }
        if promotion.is_some() {
            return None;
        }
        let queened = Move::new(from, to, Some(PromotionPiece::Queen));
        rules
            .apply_move(position, &queened)
            .map(|applied| (queened, applied))
    }

    fn judged_move(
        &self,
        state: &mut MachineState,
        strategy: Arc<Strategy>,
        san: String,
        user_move: Move,
        checkpoint: &Checkpoint,
    ) -> Option<FollowUp> {
        state.user_move_count += 1;

        if self.inner.rules.is_checkmate(&state.position) {
            state.open_record(san, true);
            self.feedback(state, FeedbackKind::Correct);
            state.finalize_record();
            state.phase = Phase::Complete;
            info!(puzzle_id = state.puzzle_id(), "Puzzle solved");
            return None;
        }

        state.open_record(san, false);
        state.phase = Phase::Validating;
        state.in_flight = Some(InFlight::Judging(checkpoint.clone()));
        let remaining = state.total_mate_depth.saturating_sub(state.user_move_count);
        debug!(
            total = state.total_mate_depth,
            remaining, "Validating move"
        );
        Some(FollowUp::Validate {
            strategy,
            position: state.position.clone(),
            user_move,
            remaining,
        })
    }

    fn free_play_move(
        &self,
        state: &mut MachineState,
        strategy: Arc<Strategy>,
        san: String,
        mover: Option<BoardColor>,
        checkpoint: &Checkpoint,
    ) -> Option<FollowUp> {
        let mated = self.inner.rules.is_checkmate(&state.position);

        if strategy.free_play_both_sides() {
            if mover == Some(state.orientation()) {
                state.open_record(san, false);
                if mated {
                    state.finalize_record();
                }
            } else if let Some(mut record) = state.pending.take() {
                record.opponent_move = Some(OpponentMove { notation: san });
                state.pending = Some(record);
                state.finalize_record();
            } else if let Some(record) = state
                .history
                .last_mut()
                .filter(|record| record.opponent_move.is_none())
            {
                record.opponent_move = Some(OpponentMove { notation: san });
            } else {
                debug!(san = %san, "Opponent-side move with no record to attach to");
            }
            if mated {
                state.phase = Phase::Complete;
            }
            return None;
        }

        state.open_record(san, false);
        if mated {
            state.finalize_record();
            state.phase = Phase::Complete;
            return None;
        }
        state.phase = Phase::OpponentTurn;
        state.in_flight = Some(InFlight::Judging(checkpoint.clone()));
        Some(FollowUp::FetchReply {
            strategy,
            position: state.position.clone(),
        })
    }

    /// Wait out the presentation delay. `false` if the puzzle was replaced
    /// meanwhile.
    async fn pause(&self, generation: u64) -> bool {
        let mut watcher = self.inner.generation.subscribe();
        let superseded = async move {
            let _ = watcher.wait_for(|current| *current != generation).await;
        };
        tokio::select! {
            _ = tokio::time::sleep(self.inner.config.opponent_delay) => true,
            _ = superseded => false,
        }
    }

    async fn play_reply(&self, generation: u64, reply: Move) {
        if !self.pause(generation).await {
            debug!(generation, "Reply cancelled during delay");
            return;
        }

        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        self.apply_reply(&mut state, &reply);
        self.emit(MachineEvent::Changed);
    }

    fn apply_reply(&self, state: &mut MachineState, reply: &Move) {
        match self.inner.rules.apply_move(&state.position, reply) {
            Some(applied) => {
                state.position = applied.position;
                state.last_move = Some((reply.from, reply.to));
                if let Some(record) = state.pending.as_mut() {
                    record.opponent_move = Some(OpponentMove {
                        notation: applied.san,
                    });
                }
            }
            None => warn!(reply = %reply, "Opponent reply is not legal, skipping"),
        }
        state.finalize_record();
        state.in_flight = None;
        state.phase = if self.inner.rules.is_checkmate(&state.position) {
            Phase::Complete
        } else {
            Phase::Playing
        };
    }

    /// Suggestion for the side to move, without touching the puzzle state.
    /// `None` outside `playing` or if the puzzle changed while waiting.
    pub async fn suggest_move(&self) -> Result<Option<Move>, TrainerError> {
        let (generation, strategy, position) = {
            let state = self.lock();
            if state.phase != Phase::Playing {
                return Ok(None);
            }
            let Some(strategy) = state.strategy.clone() else {
                return Ok(None);
            };
            (state.generation, strategy, state.position.clone())
        };

        let suggestion = strategy.suggest_move(&position).await?;
        if self.generation() != generation {
            return Ok(None);
        }
        Ok(suggestion)
    }

    pub fn promotion_options(&self, from: Square, to: Square) -> Vec<PromotionPiece> {
        let state = self.lock();
        self.inner.rules.promotion_options(&state.position, from, to)
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        let state = self.lock();
        let rules = &self.inner.rules;
        let orientation = state.orientation();
        let turn = rules.side_to_move(&state.position).unwrap_or(BoardColor::White);
        let free_play_both_sides = state
            .strategy
            .as_ref()
            .is_some_and(|strategy| strategy.free_play_both_sides());
        let is_interactive = state.phase == Phase::Playing
            && (turn == orientation || (state.is_failed && free_play_both_sides));

        MachineSnapshot {
            phase: state.phase,
            position: state.position.clone(),
            orientation,
            turn,
            legal_destinations: rules.legal_destinations(&state.position),
            last_move: state.last_move,
            is_failed: state.is_failed,
            is_interactive,
            is_check: rules.is_check(&state.position),
            history: state.history.clone(),
            pending: state.pending.clone(),
            puzzle: state.puzzle.clone(),
            last_feedback: state.last_feedback,
            generation: state.generation,
        }
    }

    /// Serializable state for suspending the current puzzle. A move still
    /// being judged is taken back; a reply still waiting out its delay is
    /// played.
    pub fn resume_state(&self) -> Option<ResumeState> {
        let state = self.lock();
        state.puzzle.as_ref()?;

        let mut settled = MachineState {
            puzzle: None,
            strategy: None,
            position: state.position.clone(),
            phase: state.phase,
            is_failed: state.is_failed,
            history: state.history.clone(),
            pending: state.pending.clone(),
            last_move: state.last_move,
            ..MachineState::new()
        };
        match state.in_flight.clone() {
            Some(InFlight::Judging(checkpoint)) => settled.restore(checkpoint),
            Some(InFlight::Reply(reply)) => self.apply_reply(&mut settled, &reply),
            None => {}
        }

        Some(ResumeState {
            position: settled.position,
            phase: match settled.phase {
                Phase::Complete => Phase::Complete,
                _ => Phase::Playing,
            },
            is_failed: settled.is_failed,
            history: settled.history,
            pending: settled.pending,
            last_move: settled.last_move,
        })
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Abandon any work in flight. Safe to call repeatedly.
    pub fn dispose(&self) {
        let mut state = self.lock();
        self.bump_generation(&mut state);
        debug!(generation = state.generation, "Puzzle machine disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ordinal: u32, reply: Option<&str>) -> MoveRecord {
        MoveRecord {
            ordinal,
            user_move: UserMove {
                notation: "Rb7".to_string(),
                was_correct: true,
            },
            opponent_move: reply.map(|notation| OpponentMove {
                notation: notation.to_string(),
            }),
        }
    }

    #[test]
    fn test_plies_played_counts_pending() {
        let resume = ResumeState {
            position: Position::from("7k/1R6/8/8/8/2K5/8/R7 b - - 1 1"),
            phase: Phase::Playing,
            is_failed: true,
            history: vec![record(1, Some("Kg8")), record(2, None)],
            pending: Some(record(3, None)),
            last_move: None,
        };
        assert_eq!(resume.plies_played(), 4);
    }

    #[test]
    fn test_resume_state_json_shape() {
        let resume = ResumeState {
            position: Position::from("7k/8/8/8/8/2K5/1R6/R7 w - - 0 1"),
            phase: Phase::OpponentTurn,
            is_failed: false,
            history: vec![record(1, Some("Kg8"))],
            pending: None,
            last_move: Some(("h8".parse().unwrap(), "g8".parse().unwrap())),
        };
        let json = serde_json::to_value(&resume).unwrap();
        assert_eq!(json["phase"], "opponent_turn");
        assert_eq!(json["history"][0]["opponent_move"]["notation"], "Kg8");
        assert_eq!(json["last_move"], serde_json::json!(["h8", "g8"]));

        let back: ResumeState = serde_json::from_value(json).unwrap();
        assert_eq!(back, resume);
    }
}
