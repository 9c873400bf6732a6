//! Board value types shared by the rules adapter, the engine adapter and the
//! puzzle state machine.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ChessCoreError;

/// Accepts UCI (`e2e4`, `a7a8q`) and the dashed puzzle-file form (`e2-e4`).
static MOVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-h][1-8])-?([a-h][1-8])([qrbn])?$").expect("move pattern compiles")
});

/// A serialized board state (FEN). Treated as an opaque value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    pub fn new(fen: impl Into<String>) -> Self {
        Self(fen.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Position {
    fn from(fen: &str) -> Self {
        Self(fen.to_string())
    }
}

impl From<String> for Position {
    fn from(fen: String) -> Self {
        Self(fen)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardColor {
    White,
    Black,
}

impl fmt::Display for BoardColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => f.write_str("white"),
            Self::Black => f.write_str("black"),
        }
    }
}

/// A board square, `a1`..`h8`. File and rank are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && rank < 8).then_some(Self { file, rank })
    }
}

impl FromStr for Square {
    type Err = ChessCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(ChessCoreError::InvalidSquare(s.to_string()));
        }
        let file = bytes[0].wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        Square::new(file, rank).ok_or_else(|| ChessCoreError::InvalidSquare(s.to_string()))
    }
}

impl TryFrom<String> for Square {
    type Error = ChessCoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Square> for String {
    fn from(square: Square) -> Self {
        square.to_string()
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file) as char, (b'1' + self.rank) as char)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionPiece {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl PromotionPiece {
    /// Display order for promotion pickers.
    pub const ALL: [PromotionPiece; 4] = [Self::Queen, Self::Rook, Self::Bishop, Self::Knight];

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'q' => Some(Self::Queen),
            'r' => Some(Self::Rook),
            'b' => Some(Self::Bishop),
            'n' => Some(Self::Knight),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Queen => 'q',
            Self::Rook => 'r',
            Self::Bishop => 'b',
            Self::Knight => 'n',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PromotionPiece>,
}

impl Move {
    pub fn new(from: Square, to: Square, promotion: Option<PromotionPiece>) -> Self {
        Self { from, to, promotion }
    }

    /// Convert an engine move string. An unrecognised promotion suffix is
    /// dropped rather than rejected; `(none)` and other garbage yield `None`.
    pub fn from_uci(uci: &str) -> Option<Self> {
        let from = uci.get(0..2)?.parse().ok()?;
        let to = uci.get(2..4)?.parse().ok()?;
        let promotion = uci.chars().nth(4).and_then(PromotionPiece::from_char);
        Some(Self { from, to, promotion })
    }

    pub fn to_uci(&self) -> String {
        match self.promotion {
            Some(piece) => format!("{}{}{}", self.from, self.to, piece.as_char()),
            None => format!("{}{}", self.from, self.to),
        }
    }

    /// Whether this move satisfies `expected`. A promotion on `self` is not
    /// compared when `expected` names none.
    pub fn matches(&self, expected: &Move) -> bool {
        self.from == expected.from
            && self.to == expected.to
            && (expected.promotion.is_none() || expected.promotion == self.promotion)
    }
}

impl FromStr for Move {
    type Err = ChessCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let caps = MOVE_RE
            .captures(raw)
            .ok_or_else(|| ChessCoreError::InvalidMove(raw.to_string()))?;
        let from = caps[1].parse()?;
        let to = caps[2].parse()?;
        let promotion = match caps.get(3) {
            Some(m) => {
                let c = m.as_str().chars().next().unwrap_or('?');
                Some(PromotionPiece::from_char(c).ok_or(ChessCoreError::InvalidPromotion(c))?)
            }
            None => None,
        };
        Ok(Self { from, to, promotion })
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uci())
    }
}
