//! Rules adapter: legality, check detection and SAN generation.
//!
//! The puzzle machine never implements chess rules itself; it consumes the
//! `RulesAdapter` capability. `ShakmatyRules` backs it with shakmaty.

use std::collections::BTreeMap;

use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position as _};

use crate::types::{BoardColor, Move, Position, PromotionPiece, Square};

/// Result of playing a legal move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    /// Standard notation, with `+`/`#` suffix.
    pub san: String,
    pub position: Position,
}

pub trait RulesAdapter: Send + Sync {
    /// Legal destination squares keyed by origin square.
    fn legal_destinations(&self, position: &Position) -> BTreeMap<Square, Vec<Square>>;

    fn is_checkmate(&self, position: &Position) -> bool;

    fn is_check(&self, position: &Position) -> bool;

    /// `None` if the position cannot be parsed.
    fn side_to_move(&self, position: &Position) -> Option<BoardColor>;

    /// Play `mv`, or `None` if it is not legal in `position`.
    fn apply_move(&self, position: &Position, mv: &Move) -> Option<AppliedMove>;

    fn promotion_options(&self, position: &Position, from: Square, to: Square)
        -> Vec<PromotionPiece>;
}

/// Standard chess via shakmaty. Positions are re-parsed on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyRules;

impl ShakmatyRules {
    pub(crate) fn load(position: &Position) -> Option<Chess> {
        let fen: Fen = position.as_str().parse().ok()?;
        fen.into_position(CastlingMode::Standard).ok()
    }

    /// Legal moves of `pos` in our own move representation.
    fn legal_moves(pos: &Chess) -> Vec<Move> {
        pos.legal_moves()
            .iter()
            .filter_map(|m| Move::from_uci(&m.to_uci(CastlingMode::Standard).to_string()))
            .collect()
    }
}

impl RulesAdapter for ShakmatyRules {
    fn legal_destinations(&self, position: &Position) -> BTreeMap<Square, Vec<Square>> {
        let mut dests: BTreeMap<Square, Vec<Square>> = BTreeMap::new();
        let Some(pos) = Self::load(position) else {
            return dests;
        };
        for mv in Self::legal_moves(&pos) {
            let targets = dests.entry(mv.from).or_default();
            if !targets.contains(&mv.to) {
                targets.push(mv.to);
            }
        }
        dests
    }

    fn is_checkmate(&self, position: &Position) -> bool {
        Self::load(position).is_some_and(|pos| pos.is_checkmate())
    }

    fn is_check(&self, position: &Position) -> bool {
        Self::load(position).is_some_and(|pos| pos.is_check())
    }

    fn side_to_move(&self, position: &Position) -> Option<BoardColor> {
        Self::load(position).map(|pos| match pos.turn() {
            Color::White => BoardColor::White,
            Color::Black => BoardColor::Black,
        })
    }

    fn apply_move(&self, position: &Position, mv: &Move) -> Option<AppliedMove> {
        let mut pos = Self::load(position)?;
        let uci: UciMove = mv.to_uci().parse().ok()?;
        let legal = uci.to_move(&pos).ok()?;

        let mut san = San::from_move(&pos, legal).to_string();
        pos.play_unchecked(legal);
        if pos.is_checkmate() {
            san.push('#');
        } else if pos.is_check() {
            san.push('+');
        }

        let fen = Fen::from_position(&pos, EnPassantMode::Legal).to_string();
        Some(AppliedMove {
            san,
            position: Position::new(fen),
        })
    }

    fn promotion_options(
        &self,
        position: &Position,
        from: Square,
        to: Square,
    ) -> Vec<PromotionPiece> {
        let Some(pos) = Self::load(position) else {
            return Vec::new();
        };
        let found: Vec<PromotionPiece> = Self::legal_moves(&pos)
            .into_iter()
            .filter(|mv| mv.from == from && mv.to == to)
            .filter_map(|mv| mv.promotion)
            .collect();
        PromotionPiece::ALL
            .into_iter()
            .filter(|piece| found.contains(piece))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEEN_MATE: &str = "4k3/8/3K4/8/7Q/8/8/8 w - - 0 1";
    const PROMOTION: &str = "8/P6k/8/8/8/8/8/K7 w - - 0 1";

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    #[test]
    fn test_apply_mating_move_reports_checkmate() {
        let rules = ShakmatyRules;
        let start = Position::from(QUEEN_MATE);
        let applied = rules.apply_move(&start, &mv("h4e7")).unwrap();
        assert_eq!(applied.san, "Qe7#");
        assert!(rules.is_checkmate(&applied.position));
        assert_eq!(rules.side_to_move(&applied.position), Some(BoardColor::Black));
    }

    #[test]
    fn test_illegal_move_is_none() {
        let rules = ShakmatyRules;
        let start = Position::from(QUEEN_MATE);
        assert!(rules.apply_move(&start, &mv("h4a1")).is_none());
        assert!(rules.apply_move(&start, &mv("e8e7")).is_none());
    }

    #[test]
    fn test_check_suffix() {
        let rules = ShakmatyRules;
        let start = Position::from(QUEEN_MATE);
        let applied = rules.apply_move(&start, &mv("h4h8")).unwrap();
        assert_eq!(applied.san, "Qh8+");
        assert!(rules.is_check(&applied.position));
        assert!(!rules.is_checkmate(&applied.position));
    }

    #[test]
    fn test_legal_destinations_groups_by_origin() {
        let rules = ShakmatyRules;
        let dests = rules.legal_destinations(&Position::from(QUEEN_MATE));
        assert!(dests[&sq("h4")].contains(&sq("e7")));
        assert!(dests.contains_key(&sq("d6")));
        assert!(!dests.contains_key(&sq("e8")));
    }

    #[test]
    fn test_promotion_options() {
        let rules = ShakmatyRules;
        let pos = Position::from(PROMOTION);
        assert_eq!(rules.promotion_options(&pos, sq("a7"), sq("a8")), PromotionPiece::ALL.to_vec());
        assert!(rules.promotion_options(&pos, sq("a1"), sq("a2")).is_empty());
        assert!(rules.apply_move(&pos, &mv("a7a8")).is_none());
        assert_eq!(rules.apply_move(&pos, &mv("a7a8q")).unwrap().san, "a8=Q");
    }

    #[test]
    fn test_garbage_position_is_inert() {
        let rules = ShakmatyRules;
        let garbage = Position::from("not a fen");
        assert!(rules.legal_destinations(&garbage).is_empty());
        assert!(!rules.is_checkmate(&garbage));
        assert_eq!(rules.side_to_move(&garbage), None);
        assert!(rules.apply_move(&garbage, &mv("e2e4")).is_none());
    }
}
