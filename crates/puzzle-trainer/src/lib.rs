//! Mate-in-N puzzle trainer: the puzzle state machine, its judging
//! strategies and the UCI engine adapter they share.

pub use chess_core;

pub mod config;
pub mod error;
pub mod machine;
pub mod session;
pub mod stockfish;
pub mod strategy;
pub mod uci;

pub use config::{EngineConfig, MachineConfig, TrainerConfig};
pub use error::{EngineError, TrainerError};
pub use machine::{
    FeedbackEvent, FeedbackKind, MachineEvent, MachineSnapshot, MoveRecord, OpponentMove, Phase,
    PuzzleMachine, ResumeState, UserMove,
};
pub use session::{
    HintOutcome, HintStep, PuzzleOutcome, PuzzleSession, PuzzleTimer, SessionStore, Trainer,
};
pub use stockfish::{EngineStatus, StockfishEngine};
pub use strategy::{is_mating_score, EngineStrategy, RecordedSolution, Strategy, Validation};
pub use uci::{AnalysisResult, Score};
