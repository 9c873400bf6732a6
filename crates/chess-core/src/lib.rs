//! Chess value types, puzzle records and the rules adapter used by the
//! puzzle trainer.

pub mod error;
pub mod puzzle;
pub mod rules;
pub mod types;

pub use error::ChessCoreError;
pub use puzzle::{MateDepth, PuzzleRecord};
pub use rules::{AppliedMove, RulesAdapter, ShakmatyRules};
pub use types::{BoardColor, Move, Position, PromotionPiece, Square};
