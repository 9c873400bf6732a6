//! Mate Trainer
//!
//! Plays one mate-in-N puzzle on the terminal. Moves are read from stdin in
//! UCI form (`e2e4`, `a7a8q`); `hint`, `reset` and `quit` are also accepted.

use std::sync::Arc;

use anyhow::{bail, Context};
use puzzle_trainer::chess_core::{BoardColor, MateDepth, Move, Position, PuzzleRecord};
use puzzle_trainer::{
    FeedbackKind, HintOutcome, MachineEvent, Phase, PuzzleOutcome, PuzzleTimer, StockfishEngine,
    Trainer, TrainerConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

struct CliArgs {
    fen: String,
    moves: String,
    mate: Option<u8>,
    side: Option<BoardColor>,
    id: u32,
    engine: bool,
}

fn usage() -> &'static str {
    "usage: mate-trainer --fen <FEN> --moves <e2e4;e7e5;...> [--mate N] [--side white|black] [--id N] [--engine]"
}

fn take_value(args: &[String], i: usize) -> anyhow::Result<String> {
    args.get(i + 1).cloned().context(usage())
}

/// Parse CLI args
fn parse_args() -> anyhow::Result<CliArgs> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut fen = None;
    let mut moves = None;
    let mut parsed = CliArgs {
        fen: String::new(),
        moves: String::new(),
        mate: None,
        side: None,
        id: 1,
        engine: false,
    };

    let mut i = 0;
    while i < args.len() {
        let value = || take_value(&args, i);
        match args[i].as_str() {
            "--fen" => fen = Some(value()?),
            "--moves" => moves = Some(value()?),
            "--mate" => parsed.mate = Some(value()?.parse().context("--mate takes 1, 2 or 3")?),
            "--id" => parsed.id = value()?.parse().context("--id takes a positive number")?,
            "--side" => {
                parsed.side = Some(match value()?.as_str() {
                    "white" => BoardColor::White,
                    "black" => BoardColor::Black,
                    other => bail!("unknown side {other:?}"),
                })
            }
            "--engine" => parsed.engine = true,
            other => bail!("unexpected argument {other:?}\n{}", usage()),
        }
        i += if args[i] == "--engine" { 1 } else { 2 };
    }

    parsed.fen = fen.context(usage())?;
    parsed.moves = moves.context(usage())?;
    Ok(parsed)
}

fn build_puzzle(args: &CliArgs) -> anyhow::Result<PuzzleRecord> {
    let solution = puzzle_trainer::chess_core::puzzle::parse_solution(&args.moves)?;
    let mate = args.mate.unwrap_or_else(|| solution.len().div_ceil(2) as u8);
    let side = args.side.unwrap_or_else(|| {
        match args.fen.split_whitespace().nth(1) {
            Some("b") => BoardColor::Black,
            _ => BoardColor::White,
        }
    });
    Ok(PuzzleRecord::new(
        args.id,
        side,
        MateDepth::try_from(mate)?,
        Position::from(args.fen.as_str()),
        solution,
    )?)
}

fn print_board(trainer: &Trainer) {
    let snapshot = trainer.machine().snapshot();
    let moves: Vec<String> = snapshot
        .history
        .iter()
        .chain(snapshot.pending.as_ref())
        .map(|record| match &record.opponent_move {
            Some(reply) => format!("{}. {} {}", record.ordinal, record.user_move.notation, reply.notation),
            None => format!("{}. {}", record.ordinal, record.user_move.notation),
        })
        .collect();

    println!("{}", snapshot.position);
    println!(
        "phase={:?} turn={} failed={} time={}",
        snapshot.phase,
        snapshot.turn,
        snapshot.is_failed,
        PuzzleTimer::format_time(trainer.timer().elapsed_ms())
    );
    if !moves.is_empty() {
        println!("{}", moves.join("  "));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let args = parse_args()?;
    let config = TrainerConfig::from_env()?;
    let record = build_puzzle(&args)?;

    let engine = if args.engine {
        let engine = Arc::new(StockfishEngine::new(config.engine_config()));
        if let Err(e) = engine.initialize().await {
            warn!(error = %e, "Continuing with the recorded solution");
        }
        Some(engine)
    } else {
        None
    };

    let (mut trainer, mut events) = Trainer::with_rules(config, engine);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let MachineEvent::Feedback(feedback) = event {
                match feedback.kind {
                    FeedbackKind::Correct => println!("✓ correct"),
                    FeedbackKind::Incorrect => println!("✗ incorrect"),
                }
            }
        }
    });

    trainer.open_puzzle(record);
    print_board(&trainer);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "quit" => break,
            "reset" => trainer.reset_current(),
            "hint" => match trainer.request_hint().await {
                Ok(HintOutcome::Origin(square)) => println!("hint: move the piece on {square}"),
                Ok(HintOutcome::Destination(mv)) => println!("hint: {mv}"),
                Ok(HintOutcome::Played(mv)) => println!("played {mv}"),
                Ok(HintOutcome::Unavailable) => println!("no hint available"),
                Err(e) => warn!(error = %e, "Hint failed"),
            },
            input => match input.parse::<Move>() {
                Ok(mv) => {
                    if let Err(e) = trainer.make_move(mv.from, mv.to, mv.promotion).await {
                        warn!(error = %e, "Move could not be judged, try again");
                    }
                }
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            },
        }

        for outcome in trainer.observe() {
            match outcome {
                PuzzleOutcome::Failed { .. } => println!("Puzzle failed; keep playing it out."),
                PuzzleOutcome::Completed { success, time_ms, .. } => println!(
                    "Puzzle complete ({}) in {}",
                    if success { "solved" } else { "not solved" },
                    PuzzleTimer::format_time(time_ms)
                ),
            }
        }
        print_board(&trainer);
        if trainer.machine().snapshot().phase == Phase::Complete {
            break;
        }
    }

    trainer.shutdown().await;
    info!("Mate trainer exiting");
    Ok(())
}
