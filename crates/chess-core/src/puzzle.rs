//! Puzzle records: an immutable starting position plus the recorded solution.

use std::fmt;

use serde::{Deserialize, Serialize};
use shakmaty::{Color, Position as _};

use crate::error::ChessCoreError;
use crate::rules::ShakmatyRules;
use crate::types::{BoardColor, Move, Position};

const MOVE_SEPARATOR: char = ';';

/// Number of user moves needed to deliver mate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MateDepth {
    One,
    Two,
    Three,
}

impl MateDepth {
    pub fn moves(self) -> u32 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Parse the puzzle-file type label, e.g. `"Mate in Two"`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Mate in One" => Some(Self::One),
            "Mate in Two" => Some(Self::Two),
            "Mate in Three" => Some(Self::Three),
            _ => None,
        }
    }
}

impl TryFrom<u8> for MateDepth {
    type Error = ChessCoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            n => Err(ChessCoreError::InvalidPuzzle(format!("unsupported mate depth {n}"))),
        }
    }
}

impl From<MateDepth> for u8 {
    fn from(depth: MateDepth) -> Self {
        depth.moves() as u8
    }
}

impl fmt::Display for MateDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mate in {}", self.moves())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleRecord {
    pub id: u32,
    pub side_to_move: BoardColor,
    pub mate_depth: MateDepth,
    pub start_position: Position,
    /// User moves at even indices, opponent replies at odd indices.
    pub solution: Vec<Move>,
}

impl PuzzleRecord {
    pub fn new(
        id: u32,
        side_to_move: BoardColor,
        mate_depth: MateDepth,
        start_position: Position,
        solution: Vec<Move>,
    ) -> Result<Self, ChessCoreError> {
        if id == 0 {
            return Err(ChessCoreError::InvalidPuzzle("id must be positive".into()));
        }
        if solution.is_empty() {
            return Err(ChessCoreError::InvalidPuzzle(format!("puzzle {id} has no solution")));
        }
        let Some(board) = ShakmatyRules::load(&start_position) else {
            return Err(ChessCoreError::InvalidPuzzle(format!(
                "puzzle {id} has malformed position {start_position}"
            )));
        };
        let fen_side = match board.turn() {
            Color::White => BoardColor::White,
            Color::Black => BoardColor::Black,
        };
        if fen_side != side_to_move {
            return Err(ChessCoreError::InvalidPuzzle(format!(
                "puzzle {id} is {side_to_move} to move but its position has {fen_side} to move"
            )));
        }
        Ok(Self {
            id,
            side_to_move,
            mate_depth,
            start_position,
            solution,
        })
    }

    /// Build a record from puzzle-file fields: `"White to Move"`,
    /// `"Mate in Two"`, the FEN and a `;`-separated move list.
    pub fn from_fields(
        id: u32,
        first: &str,
        puzzle_type: &str,
        fen: &str,
        moves: &str,
    ) -> Result<Self, ChessCoreError> {
        let side_to_move = match first {
            "White to Move" => BoardColor::White,
            "Black to Move" => BoardColor::Black,
            other => {
                return Err(ChessCoreError::InvalidPuzzle(format!(
                    "unknown side to move {other:?}"
                )))
            }
        };
        let mate_depth = MateDepth::from_label(puzzle_type).ok_or_else(|| {
            ChessCoreError::InvalidPuzzle(format!("unknown puzzle type {puzzle_type:?}"))
        })?;
        Self::new(id, side_to_move, mate_depth, Position::from(fen), parse_solution(moves)?)
    }
}

/// Parse a `;`-separated solution such as `"b2-b7;h8-g8;a1-a8"`.
pub fn parse_solution(raw: &str) -> Result<Vec<Move>, ChessCoreError> {
    raw.split(MOVE_SEPARATOR)
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}
