#![allow(dead_code)]

//! Shared fixtures: a scripted in-process UCI engine and a few puzzles.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chess_core::{BoardColor, MateDepth, Move, Position, PuzzleRecord, ShakmatyRules, Square};
use puzzle_trainer::{
    EngineConfig, FeedbackEvent, MachineConfig, MachineEvent, MachineSnapshot, PuzzleMachine,
    StockfishEngine,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Notify};

// ---------------------------------------------------------------------------
// Fake engine
// ---------------------------------------------------------------------------

/// Output for one `go` command.
#[derive(Clone, Debug)]
pub struct Reply {
    info: Vec<String>,
    terminal: Option<String>,
    held: bool,
}

impl Reply {
    /// Arbitrary output lines; the last `bestmove` line terminates.
    pub fn lines(lines: &[&str]) -> Self {
        let mut info: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        let terminal = match info.last() {
            Some(last) if last.starts_with("bestmove") => info.pop(),
            _ => None,
        };
        Self {
            info,
            terminal,
            held: false,
        }
    }

    pub fn mate(n: i32, best: &str) -> Self {
        Self::lines(&[
            &format!("info depth 12 seldepth 14 score mate {n} nodes 4096 pv {best}"),
            &format!("bestmove {best}"),
        ])
    }

    pub fn cp(cp: i32, best: &str) -> Self {
        Self::lines(&[
            &format!("info depth 12 score cp {cp} pv {best}"),
            &format!("bestmove {best}"),
        ])
    }

    /// Close the engine's output instead of answering.
    pub fn exit() -> Self {
        Self {
            info: Vec::new(),
            terminal: None,
            held: false,
        }
    }

    /// Withhold the `bestmove` line until `stop` or [`FakeEngine::release`].
    pub fn held(mut self) -> Self {
        self.held = true;
        self
    }
}

/// Handle on the scripted engine's side of the pipe.
#[derive(Clone)]
pub struct FakeEngine {
    commands: Arc<Mutex<Vec<String>>>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    release: Arc<Notify>,
}

impl FakeEngine {
    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    /// Let a held `bestmove` through without a `stop`.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Wait until at least `n` commands starting with `prefix` arrived.
    pub async fn wait_for_command(&self, prefix: &str, n: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.count(prefix) < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "engine never received {n} x {prefix:?}; got {:?}",
            self.commands()
        );
    }

    /// Commands after the uci/isready handshake.
    pub fn search_commands(&self) -> Vec<String> {
        let commands = self.commands();
        let start = commands
            .iter()
            .position(|c| c == "isready")
            .map_or(0, |i| i + 1);
        commands[start..].to_vec()
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        path: "fake-stockfish".to_string(),
        threads: 1,
        hash_mb: 16,
        init_timeout: Duration::from_secs(2),
    }
}

/// Adapter wired to a fake engine. With `answer_handshake = false` the fake
/// never acknowledges `uci`.
pub fn fake_engine(answer_handshake: bool, config: EngineConfig) -> (Arc<StockfishEngine>, FakeEngine) {
    let (adapter_side, engine_side) = tokio::io::duplex(64 * 1024);
    let (adapter_read, adapter_write) = tokio::io::split(adapter_side);
    let engine = Arc::new(StockfishEngine::with_transport(adapter_read, adapter_write, config));

    let fake = FakeEngine {
        commands: Arc::new(Mutex::new(Vec::new())),
        script: Arc::new(Mutex::new(VecDeque::new())),
        release: Arc::new(Notify::new()),
    };
    tokio::spawn(run_fake(engine_side, fake.clone(), answer_handshake));
    (engine, fake)
}

/// Ready adapter plus its fake engine.
pub async fn ready_engine() -> (Arc<StockfishEngine>, FakeEngine) {
    let (engine, fake) = fake_engine(true, engine_config());
    engine.initialize().await.expect("fake engine handshake");
    (engine, fake)
}

async fn run_fake(stream: tokio::io::DuplexStream, fake: FakeEngine, answer_handshake: bool) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut held: Option<String> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                fake.commands.lock().unwrap().push(line.clone());

                let mut out: Vec<String> = Vec::new();
                match line.as_str() {
                    "uci" if answer_handshake => {
                        out.push("id name FakeFish".into());
                        out.push("uciok".into());
                    }
                    "isready" if answer_handshake => out.push("readyok".into()),
                    "quit" => break,
                    "stop" => out.extend(held.take()),
                    cmd if cmd.starts_with("go") => {
                        let reply = fake.script.lock().unwrap().pop_front();
                        match reply {
                            None => out.push("bestmove (none)".into()),
                            Some(reply) if reply.terminal.is_none() && reply.info.is_empty() => break,
                            Some(reply) => {
                                out.extend(reply.info);
                                if reply.held {
                                    held = reply.terminal;
                                } else {
                                    out.extend(reply.terminal);
                                }
                            }
                        }
                    }
                    _ => {}
                }
                for line in out {
                    if writer.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
            _ = fake.release.notified(), if held.is_some() => {
                if let Some(line) = held.take() {
                    let _ = writer.write_all(format!("{line}\n").as_bytes()).await;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Puzzles and machine helpers
// ---------------------------------------------------------------------------

pub fn sq(s: &str) -> Square {
    s.parse().unwrap()
}

pub fn mv(s: &str) -> Move {
    Move::from_uci(s).unwrap()
}

/// Qe7# in one.
pub fn mate_in_one() -> PuzzleRecord {
    PuzzleRecord::new(
        1,
        BoardColor::White,
        MateDepth::One,
        Position::from("4k3/8/3K4/8/7Q/8/8/8 w - - 0 1"),
        vec![mv("h4e7")],
    )
    .unwrap()
}

/// Rb7 Kg8 Ra8#.
pub fn mate_in_two() -> PuzzleRecord {
    PuzzleRecord::from_fields(
        2,
        "White to Move",
        "Mate in Two",
        "7k/8/8/8/8/2K5/1R6/R7 w - - 0 1",
        "b2-b7;h8-g8;a1-a8",
    )
    .unwrap()
}

/// A pawn one step from promoting; the line only accepts a queen.
pub fn promotion_puzzle() -> PuzzleRecord {
    PuzzleRecord::new(
        3,
        BoardColor::White,
        MateDepth::Two,
        Position::from("8/P6k/8/8/8/8/8/K7 w - - 0 1"),
        vec![mv("a7a8q"), mv("h7g7")],
    )
    .unwrap()
}

pub fn machine_with_delay(
    opponent_delay: Duration,
) -> (PuzzleMachine, mpsc::UnboundedReceiver<MachineEvent>) {
    PuzzleMachine::new(ShakmatyRules, MachineConfig { opponent_delay })
}

pub fn machine() -> (PuzzleMachine, mpsc::UnboundedReceiver<MachineEvent>) {
    machine_with_delay(Duration::ZERO)
}

/// Everything queued on the event channel so far.
pub fn drain(events: &mut mpsc::UnboundedReceiver<MachineEvent>) -> Vec<MachineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn feedback(events: &[MachineEvent]) -> Vec<FeedbackEvent> {
    events
        .iter()
        .filter_map(|event| match event {
            MachineEvent::Feedback(feedback) => Some(*feedback),
            MachineEvent::Changed => None,
        })
        .collect()
}

/// Plies the move history accounts for, pending record included.
pub fn recorded_plies(snapshot: &MachineSnapshot) -> usize {
    snapshot
        .history
        .iter()
        .chain(snapshot.pending.as_ref())
        .map(|record| record.plies())
        .sum()
}

/// Poll until `check` holds for the machine's snapshot.
pub async fn wait_until(machine: &PuzzleMachine, check: impl Fn(&MachineSnapshot) -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check(&machine.snapshot()) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "machine never reached the expected state");
}

pub async fn wait_for_status(engine: &StockfishEngine, status: puzzle_trainer::EngineStatus) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while engine.status() != status {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "engine never reached {status:?}");
}
