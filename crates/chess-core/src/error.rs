//! Parse and validation errors for chess value types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChessCoreError {
    #[error("Invalid square: {0:?}")]
    InvalidSquare(String),

    #[error("Invalid move: {0:?}")]
    InvalidMove(String),

    #[error("Invalid promotion piece: {0:?}")]
    InvalidPromotion(char),

    #[error("Invalid puzzle: {0}")]
    InvalidPuzzle(String),
}
