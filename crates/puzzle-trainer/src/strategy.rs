//! Move-judging strategies.
//!
//! A puzzle is judged either against its recorded solution line or by live
//! engine analysis. Both expose the same operations; the state machine does
//! not care which one it holds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chess_core::{Move, Position};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::stockfish::StockfishEngine;
use crate::uci::Score;

/// Verdict on a user move, plus the reply to play if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub is_correct: bool,
    pub opponent_reply: Option<Move>,
}

/// A move keeps the announced mate iff the side now to move (the opponent)
/// is getting mated within `remaining` moves.
pub fn is_mating_score(score: Option<Score>, remaining: u32) -> bool {
    match score {
        Some(Score::Mate(n)) => n < 0 && n.unsigned_abs() <= remaining,
        _ => false,
    }
}

pub enum Strategy {
    Recorded(RecordedSolution),
    Engine(EngineStrategy),
}

impl Strategy {
    /// Judge `user_move`, already played, leaving `position` on the board.
    pub async fn validate_move(
        &self,
        position: &Position,
        user_move: &Move,
        remaining_mate_depth: u32,
    ) -> Result<Validation, EngineError> {
        match self {
            Self::Recorded(recorded) => Ok(recorded.validate(user_move)),
            Self::Engine(engine) => engine.validate(position, remaining_mate_depth).await,
        }
    }

    pub async fn opponent_move(&self, position: &Position) -> Result<Option<Move>, EngineError> {
        match self {
            Self::Recorded(recorded) => Ok(recorded.next_move()),
            Self::Engine(engine) => engine.best_move(position).await,
        }
    }

    /// Best move for the side to move in `position`, for hints.
    pub async fn suggest_move(&self, position: &Position) -> Result<Option<Move>, EngineError> {
        self.opponent_move(position).await
    }

    /// Once failed, whether the human also plays the opponent's side.
    pub fn free_play_both_sides(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Recorded(_) => "recorded",
            Self::Engine(_) => "engine",
        }
    }
}

/// Compares user moves with the puzzle's recorded line.
pub struct RecordedSolution {
    moves: Vec<Move>,
    cursor: AtomicUsize,
}

impl RecordedSolution {
    pub fn new(moves: Vec<Move>) -> Self {
        Self::resume_at(moves, 0)
    }

    /// Rejoin a line with `index` plies already played.
    pub fn resume_at(moves: Vec<Move>, index: usize) -> Self {
        Self {
            moves,
            cursor: AtomicUsize::new(index),
        }
    }

    pub fn solution_index(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn next_move(&self) -> Option<Move> {
        self.moves.get(self.solution_index()).copied()
    }

    fn validate(&self, user_move: &Move) -> Validation {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let is_correct = self
            .moves
            .get(index)
            .is_some_and(|expected| user_move.matches(expected));

        if !is_correct {
            debug!(index, user_move = %user_move, "Move deviates from solution");
            return Validation {
                is_correct: false,
                opponent_reply: None,
            };
        }

        let opponent_reply = self.moves.get(index + 1).copied();
        if opponent_reply.is_some() {
            self.cursor.fetch_add(1, Ordering::SeqCst);
        }
        Validation {
            is_correct: true,
            opponent_reply,
        }
    }
}

/// Delegates judging and replies to the shared engine.
pub struct EngineStrategy {
    engine: Arc<StockfishEngine>,
    depth: u32,
}

impl EngineStrategy {
    pub fn new(engine: Arc<StockfishEngine>, depth: u32) -> Result<Self, EngineError> {
        if !engine.is_ready() {
            return Err(EngineError::NotReady);
        }
        Ok(Self { engine, depth })
    }

    async fn validate(
        &self,
        position: &Position,
        remaining_mate_depth: u32,
    ) -> Result<Validation, EngineError> {
        let result = self
            .engine
            .analyze(position.as_str(), self.depth)
            .await
            .inspect_err(|e| warn!(error = %e, "Engine validation failed"))?;

        let is_correct = is_mating_score(result.score, remaining_mate_depth);
        debug!(
            remaining_mate_depth,
            is_correct,
            score = ?result.score,
            reply = ?result.best_move,
            "Engine verdict"
        );

        Ok(Validation {
            is_correct,
            opponent_reply: result.best_move,
        })
    }

    async fn best_move(&self, position: &Position) -> Result<Option<Move>, EngineError> {
        let result = self
            .engine
            .analyze(position.as_str(), self.depth)
            .await
            .inspect_err(|e| warn!(error = %e, "Engine move request failed"))?;
        Ok(result.best_move)
    }
}
