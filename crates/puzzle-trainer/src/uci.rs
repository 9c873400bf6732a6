//! UCI response parsing (pure functions)

use chess_core::Move;
use serde::{Deserialize, Serialize};

/// Engine evaluation from the side-to-move's perspective.
///
/// Mate: positive N = side to move mates in N,
/// negative N = side to move gets mated in N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Score {
    Mate(i32),
    #[serde(rename = "cp")]
    Centipawns(i32),
}

/// A parsed `info` line that carries a search depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: u32,
    pub score: Option<Score>,
    pub pv: Vec<Move>,
}

/// The terminal line of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BestMoveLine {
    Move(Move),
    /// `bestmove (none)`: the position is already mate or stalemate.
    NoMove,
}

/// Outcome of one `analyze` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub best_move: Option<Move>,
    pub score: Option<Score>,
    pub principal_variation: Vec<Move>,
    pub depth: u32,
}

impl AnalysisResult {
    pub(crate) fn from_lines(best: Option<InfoLine>, terminal: BestMoveLine) -> Self {
        let best_move = match terminal {
            BestMoveLine::Move(mv) => Some(mv),
            BestMoveLine::NoMove => None,
        };
        match best {
            Some(info) => Self {
                best_move,
                score: info.score,
                principal_variation: info.pv,
                depth: info.depth,
            },
            None => Self {
                best_move,
                ..Self::default()
            },
        }
    }
}

/// `None` if the line is not a bestmove line at all.
pub fn parse_best_move(line: &str) -> Option<BestMoveLine> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some("bestmove") {
        return None;
    }
    Some(
        parts
            .next()
            .and_then(Move::from_uci)
            .map_or(BestMoveLine::NoMove, BestMoveLine::Move),
    )
}

/// Parse an `info` line. Lines without a depth (e.g. `info string ...`) are
/// not search progress and yield `None`.
pub fn parse_info_line(line: &str) -> Option<InfoLine> {
    if !line.starts_with("info ") {
        return None;
    }
    let parts: Vec<&str> = line.split_whitespace().collect();
    let depth = value_after(&parts, "depth")?;

    let score = match (value_after(&parts, "mate"), value_after(&parts, "cp")) {
        (Some(mate), _) if follows_score(&parts, "mate") => Some(Score::Mate(mate)),
        (_, Some(cp)) if follows_score(&parts, "cp") => Some(Score::Centipawns(cp)),
        _ => None,
    };

    Some(InfoLine {
        depth,
        score,
        pv: parse_pv(&parts),
    })
}

/// Parse the token following `key`.
fn value_after<T: std::str::FromStr>(parts: &[&str], key: &str) -> Option<T> {
    let i = parts.iter().position(|part| *part == key)?;
    parts.get(i + 1)?.parse().ok()
}

fn follows_score(parts: &[&str], kind: &str) -> bool {
    parts
        .windows(2)
        .any(|pair| pair[0] == "score" && pair[1] == kind)
}

/// PV moves run to the end of the line; stop at the first non-move token.
fn parse_pv(parts: &[&str]) -> Vec<Move> {
    let Some(start) = parts.iter().position(|part| *part == "pv") else {
        return Vec::new();
    };
    parts[start + 1..]
        .iter()
        .map_while(|token| Move::from_uci(token))
        .collect()
}
