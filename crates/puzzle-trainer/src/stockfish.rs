//! Stockfish engine wrapper using UCI protocol (async I/O)
//!
//! One adapter instance owns one engine for the whole app session. Requests
//! are answered one at a time: a new `analyze` stops the in-flight search and
//! waits for it to consume its own `bestmove` line before sending anything.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::uci::{parse_best_move, parse_info_line, AnalysisResult, BestMoveLine, InfoLine};

type EngineReader = Box<dyn AsyncRead + Send + Unpin>;
type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Initializing,
    Ready,
    Analyzing,
    Disposed,
    /// Initialization failed; terminal.
    Error,
}

struct EngineOutput {
    lines: Lines<BufReader<EngineReader>>,
    /// A `go` was sent and its `bestmove` has not been consumed yet.
    awaiting_bestmove: bool,
}

/// Stockfish engine instance
pub struct StockfishEngine {
    config: EngineConfig,
    status: StdMutex<EngineStatus>,
    stdin: Mutex<Option<EngineWriter>>,
    stdout: Mutex<Option<EngineOutput>>,
    process: StdMutex<Option<Child>>,
    transport: StdMutex<Option<(EngineReader, EngineWriter)>>,
    /// Held for a whole handshake so concurrent callers share its outcome.
    init_guard: Mutex<()>,
    analysis_seq: AtomicU64,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StockfishEngine {
    /// Adapter for the binary at `config.path`; nothing is spawned until
    /// `initialize`.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            status: StdMutex::new(EngineStatus::Idle),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
            process: StdMutex::new(None),
            transport: StdMutex::new(None),
            init_guard: Mutex::new(()),
            analysis_seq: AtomicU64::new(0),
        }
    }

    /// Adapter speaking UCI over an existing line channel instead of a child
    /// process.
    pub fn with_transport<R, W>(reader: R, writer: W, config: EngineConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let engine = Self::new(config);
        *lock(&engine.transport) = Some((Box::new(reader), Box::new(writer)));
        engine
    }

    pub fn status(&self) -> EngineStatus {
        *lock(&self.status)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status(), EngineStatus::Ready | EngineStatus::Analyzing)
    }

    pub fn is_disposed(&self) -> bool {
        self.status() == EngineStatus::Disposed
    }

    /// Start the engine and run the uci/isready handshake. A call made while
    /// another handshake is running waits for it and reports its outcome.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let _init = self.init_guard.lock().await;
        {
            let mut status = lock(&self.status);
            match *status {
                EngineStatus::Idle | EngineStatus::Initializing => {
                    *status = EngineStatus::Initializing
                }
                EngineStatus::Ready | EngineStatus::Analyzing => return Ok(()),
                EngineStatus::Disposed => return Err(EngineError::Disposed),
                EngineStatus::Error => {
                    return Err(EngineError::InitFailed("previous initialization failed".into()))
                }
            }
        }

        let outcome = match tokio::time::timeout(self.config.init_timeout, self.handshake()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ EngineError::InitFailed(_))) => Err(e),
            Ok(Err(e)) => Err(EngineError::InitFailed(e.to_string())),
            Err(_) => Err(EngineError::InitFailed(format!(
                "no acknowledgement within {:?}",
                self.config.init_timeout
            ))),
        };

        if outcome.is_err() {
            if let Some(process) = lock(&self.process).as_mut() {
                let _ = process.start_kill();
            }
        }

        let mut status = lock(&self.status);
        if *status == EngineStatus::Disposed {
            return Err(EngineError::Disposed);
        }
        match outcome {
            Ok(()) => {
                *status = EngineStatus::Ready;
                info!("Stockfish engine ready");
                Ok(())
            }
            Err(e) => {
                *status = EngineStatus::Error;
                warn!(error = %e, "Stockfish engine failed to start");
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<(), EngineError> {
        self.attach()?;

        self.send("uci").await?;
        self.wait_for("uciok").await?;

        self.send(&format!("setoption name Threads value {}", self.config.threads))
            .await?;
        self.send(&format!("setoption name Hash value {}", self.config.hash_mb))
            .await?;
        self.send("isready").await?;
        self.wait_for("readyok").await?;
        Ok(())
    }

    /// Connect stdin/stdout, spawning the process unless a transport was
    /// supplied.
    fn attach(&self) -> Result<(), EngineError> {
        let (reader, writer) = match lock(&self.transport).take() {
            Some(transport) => transport,
            None => {
                let mut process = Command::new(&self.config.path)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| {
                        EngineError::InitFailed(format!(
                            "Failed to spawn Stockfish at {}: {e}",
                            self.config.path
                        ))
                    })?;
                let stdin = process
                    .stdin
                    .take()
                    .ok_or_else(|| EngineError::InitFailed("stdin not captured".into()))?;
                let stdout = process
                    .stdout
                    .take()
                    .ok_or_else(|| EngineError::InitFailed("stdout not captured".into()))?;
                *lock(&self.process) = Some(process);
                (Box::new(stdout) as EngineReader, Box::new(stdin) as EngineWriter)
            }
        };

        // Uncontended: nothing else touches the streams before `Ready`.
        let mut stdin = self.stdin.try_lock().map_err(|_| EngineError::NotReady)?;
        let mut stdout = self.stdout.try_lock().map_err(|_| EngineError::NotReady)?;
        *stdin = Some(writer);
        *stdout = Some(EngineOutput {
            lines: BufReader::new(reader).lines(),
            awaiting_bestmove: false,
        });
        Ok(())
    }

    /// Send a command to Stockfish
    async fn send(&self, cmd: &str) -> Result<(), EngineError> {
        debug!(cmd, "SF <");
        let mut stdin = self.stdin.lock().await;
        let writer = stdin.as_mut().ok_or(EngineError::Disposed)?;
        writer.write_all(format!("{cmd}\n").as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Wait for a specific response line
    async fn wait_for(&self, expected: &str) -> Result<(), EngineError> {
        let mut stdout = self.stdout.lock().await;
        let output = stdout.as_mut().ok_or(EngineError::NotReady)?;
        loop {
            if next_line(output).await? == expected {
                return Ok(());
            }
        }
    }

    fn ensure_ready(&self) -> Result<(), EngineError> {
        match self.status() {
            EngineStatus::Ready | EngineStatus::Analyzing => Ok(()),
            EngineStatus::Disposed => Err(EngineError::Disposed),
            _ => Err(EngineError::NotReady),
        }
    }

    /// Search `fen` to `depth` and return the best move with its evaluation.
    pub async fn analyze(&self, fen: &str, depth: u32) -> Result<AnalysisResult, EngineError> {
        self.ensure_ready()?;

        if self.status() == EngineStatus::Analyzing {
            debug!("Stopping previous analysis");
            self.send("stop").await?;
        }

        let mut stdout = self.stdout.lock().await;
        self.ensure_ready()?;
        let output = stdout.as_mut().ok_or(EngineError::NotReady)?;

        if output.awaiting_bestmove {
            // The previous caller went away mid-search; its lines are still queued.
            debug!("Draining abandoned analysis");
            self.send("stop").await?;
            self.read_search(output).await?;
        }

        let id = self.analysis_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_status_unless_disposed(EngineStatus::Analyzing);
        debug!(id, depth, fen, "Starting analysis");

        self.send(&format!("position fen {fen}")).await?;
        self.send(&format!("go depth {depth}")).await?;
        output.awaiting_bestmove = true;

        let outcome = self.read_search(output).await;
        self.set_status_unless_disposed(EngineStatus::Ready);

        let (best, terminal) = outcome?;
        let result = AnalysisResult::from_lines(best, terminal);
        debug!(
            id,
            best_move = ?result.best_move,
            score = ?result.score,
            depth = result.depth,
            "Analysis complete"
        );
        Ok(result)
    }

    /// Read one search through its `bestmove` line, keeping the deepest
    /// scored info line (later lines win ties).
    async fn read_search(
        &self,
        output: &mut EngineOutput,
    ) -> Result<(Option<InfoLine>, BestMoveLine), EngineError> {
        let mut best: Option<InfoLine> = None;
        loop {
            let line = match next_line(output).await {
                Ok(line) => line,
                Err(EngineError::Exited) if self.is_disposed() => return Err(EngineError::Disposed),
                Err(e) => return Err(e),
            };

            if let Some(info) = parse_info_line(&line) {
                let deeper = match &best {
                    Some(kept) => info.depth >= kept.depth,
                    None => true,
                };
                if info.score.is_some() && deeper {
                    best = Some(info);
                }
            } else if let Some(terminal) = parse_best_move(&line) {
                output.awaiting_bestmove = false;
                return Ok((best, terminal));
            }
        }
    }

    fn set_status_unless_disposed(&self, next: EngineStatus) {
        let mut status = lock(&self.status);
        if *status != EngineStatus::Disposed {
            *status = next;
        }
    }

    /// Ask the engine to cut the current search short. The pending `analyze`
    /// still resolves with what was found so far.
    pub async fn cancel_current_analysis(&self) {
        if self.status() != EngineStatus::Analyzing {
            return;
        }
        if let Err(e) = self.send("stop").await {
            warn!(error = %e, "Failed to send stop");
        }
    }

    /// Stop any search, quit the engine and release the process. Idempotent.
    pub async fn dispose(&self) {
        let previous = std::mem::replace(&mut *lock(&self.status), EngineStatus::Disposed);
        if previous == EngineStatus::Disposed {
            return;
        }

        if previous == EngineStatus::Analyzing {
            let _ = self.send("stop").await;
        }
        let _ = self.send("quit").await;
        *self.stdin.lock().await = None;
        lock(&self.transport).take();

        let process = lock(&self.process).take();
        if let Some(mut process) = process {
            let _ = process.start_kill();
            let _ = process.wait().await;
        }
        info!("Stockfish engine disposed");
    }
}

impl Drop for StockfishEngine {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        if let Some(process) = lock(&self.process).as_mut() {
            let _ = process.start_kill();
        }
    }
}

async fn next_line(output: &mut EngineOutput) -> Result<String, EngineError> {
    match output.lines.next_line().await? {
        Some(line) => {
            let trimmed = line.trim().to_string();
            debug!(line = %trimmed, "SF >");
            Ok(trimmed)
        }
        None => Err(EngineError::Exited),
    }
}
