//! Online draughts
//!
//! Only the move travels over the wire. Each peer re-applies it to its own
//! board with the same rule function, so the two copies stay identical as long
//! as every move arrives.

use super::GameMode;
use crate::config::BoardConfig;
use crate::error::ActionError;
use crate::host::ContentGenerator;
use crate::phase::{MatchOutcome, PlayerId, RoundAdapter};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const BOARD_SIZE: usize = 8;

/// Seat 0 moves first, starting on the bottom three rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seat {
    First,
    Second,
}

impl Seat {
    pub fn index(self) -> usize {
        match self {
            Seat::First => 0,
            Seat::Second => 1,
        }
    }

    pub fn opponent(self) -> Seat {
        match self {
            Seat::First => Seat::Second,
            Seat::Second => Seat::First,
        }
    }

    fn forward(self) -> i8 {
        match self {
            Seat::First => -1,
            Seat::Second => 1,
        }
    }

    fn promotion_row(self) -> u8 {
        match self {
            Seat::First => 0,
            Seat::Second => (BOARD_SIZE - 1) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub seat: Seat,
    pub king: bool,
}

impl Piece {
    pub fn man(seat: Seat) -> Self {
        Self { seat, king: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Square {
    pub row: u8,
    pub col: u8,
}

impl Square {
    pub fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    fn offset(self, dr: i8, dc: i8) -> Option<Square> {
        let row = self.row as i8 + dr;
        let col = self.col as i8 + dc;
        let range = 0..BOARD_SIZE as i8;
        if range.contains(&row) && range.contains(&col) {
            Some(Square::new(row as u8, col as u8))
        } else {
            None
        }
    }

    fn in_bounds(self) -> bool {
        (self.row as usize) < BOARD_SIZE && (self.col as usize) < BOARD_SIZE
    }
}

/// A `MOVE` as sent between peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
}

impl Move {
    pub fn new(from: (u8, u8), to: (u8, u8)) -> Self {
        Self {
            from: Square::new(from.0, from.1),
            to: Square::new(to.0, to.1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    cells: [[Option<Piece>; BOARD_SIZE]; BOARD_SIZE],
    turn: Seat,
    captured: [u32; 2],
}

impl Board {
    pub fn empty(turn: Seat) -> Self {
        Self {
            cells: [[None; BOARD_SIZE]; BOARD_SIZE],
            turn,
            captured: [0; 2],
        }
    }

    /// Standard opening: twelve men per side on the dark squares
    pub fn new() -> Self {
        let mut board = Self::empty(Seat::First);
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                if (row + col) % 2 == 0 {
                    continue;
                }
                let seat = match row {
                    0..=2 => Seat::Second,
                    5..=7 => Seat::First,
                    _ => continue,
                };
                board.cells[row][col] = Some(Piece::man(seat));
            }
        }
        board
    }

    pub fn turn(&self) -> Seat {
        self.turn
    }

    pub fn piece(&self, square: Square) -> Option<Piece> {
        if !square.in_bounds() {
            return None;
        }
        self.cells[square.row as usize][square.col as usize]
    }

    pub fn place(&mut self, square: Square, piece: Option<Piece>) {
        self.cells[square.row as usize][square.col as usize] = piece;
    }

    /// Opponent pieces taken by `seat`
    pub fn captured(&self, seat: Seat) -> u32 {
        self.captured[seat.index()]
    }

    pub fn count(&self, seat: Seat) -> u32 {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| matches!(cell, Some(p) if p.seat == seat))
            .count() as u32
    }

    /// Checks a move for `seat`, returning the jumped square if it captures
    fn check(&self, seat: Seat, mv: &Move) -> Result<Option<Square>, ActionError> {
        if !mv.from.in_bounds() || !mv.to.in_bounds() {
            return Err(ActionError::Illegal("off the board".to_string()));
        }
        let piece = self
            .piece(mv.from)
            .ok_or_else(|| ActionError::Illegal("no piece on the source square".to_string()))?;
        if piece.seat != seat {
            return Err(ActionError::Illegal("not your piece".to_string()));
        }
        if self.piece(mv.to).is_some() {
            return Err(ActionError::Illegal("target square occupied".to_string()));
        }

        let dr = mv.to.row as i8 - mv.from.row as i8;
        let dc = mv.to.col as i8 - mv.from.col as i8;
        if dr.abs() != dc.abs() || !(1..=2).contains(&dr.abs()) {
            return Err(ActionError::Illegal("not a diagonal step or jump".to_string()));
        }
        if !piece.king && dr.signum() != seat.forward() {
            return Err(ActionError::Illegal("men only move forward".to_string()));
        }

        if dr.abs() == 1 {
            return Ok(None);
        }
        let jumped = mv
            .from
            .offset(dr.signum(), dc.signum())
            .ok_or_else(|| ActionError::Illegal("off the board".to_string()))?;
        match self.piece(jumped) {
            Some(p) if p.seat != seat => Ok(Some(jumped)),
            _ => Err(ActionError::Illegal("nothing to jump".to_string())),
        }
    }

    pub fn validate(&self, mv: &Move) -> Result<(), ActionError> {
        self.check(self.turn, mv).map(|_| ())
    }

    /// Applies a move for the side to move and hands the turn over
    pub fn apply_move(&mut self, mv: &Move) -> Result<(), ActionError> {
        let seat = self.turn;
        let jumped = self.check(seat, mv)?;

        let mut piece = self.piece(mv.from).ok_or(ActionError::NotActive)?;
        self.place(mv.from, None);
        if let Some(square) = jumped {
            self.place(square, None);
            self.captured[seat.index()] += 1;
        }
        if mv.to.row == seat.promotion_row() {
            piece.king = true;
        }
        self.place(mv.to, Some(piece));

        self.turn = seat.opponent();
        Ok(())
    }

    pub fn pass_turn(&mut self) {
        self.turn = self.turn.opponent();
    }

    pub fn legal_moves(&self, seat: Seat) -> Vec<Move> {
        let mut moves = Vec::new();
        for row in 0..BOARD_SIZE as u8 {
            for col in 0..BOARD_SIZE as u8 {
                let from = Square::new(row, col);
                if !matches!(self.piece(from), Some(p) if p.seat == seat) {
                    continue;
                }
                for (dr, dc) in [(-1, -1), (-1, 1), (1, -1), (1, 1)] {
                    for distance in 1..=2 {
                        let Some(to) = from.offset(dr * distance, dc * distance) else {
                            continue;
                        };
                        let mv = Move { from, to };
                        if self.check(seat, &mv).is_ok() {
                            moves.push(mv);
                        }
                    }
                }
            }
        }
        moves
    }

    /// A side with no pieces, or none that can move on its turn, has lost
    pub fn winner(&self) -> Option<Seat> {
        for seat in [Seat::First, Seat::Second] {
            if self.count(seat) == 0 {
                return Some(seat.opponent());
            }
        }
        if self.legal_moves(self.turn).is_empty() {
            return Some(self.turn.opponent());
        }
        None
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-chosen seating: `seats[0]` moves first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardContent {
    pub seats: [PlayerId; 2],
}

pub struct SeatDraw;

impl ContentGenerator for SeatDraw {
    type Content = BoardContent;

    fn generate<R: Rng + ?Sized>(&self, participants: &[String], rng: &mut R) -> BoardContent {
        let mut seats = participants.to_vec();
        seats.shuffle(rng);
        let mut seats = seats.into_iter();
        let first = seats.next().unwrap_or_default();
        let second = seats.next().unwrap_or_default();
        BoardContent {
            seats: [first, second],
        }
    }
}

pub struct BoardAdapter {
    config: BoardConfig,
    seats: [PlayerId; 2],
    board: Board,
}

impl BoardAdapter {
    pub fn new(config: BoardConfig, content: &BoardContent) -> Self {
        Self {
            config,
            seats: content.seats.clone(),
            board: Board::new(),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn seat_of(&self, player: &str) -> Option<Seat> {
        if self.seats[0] == player {
            Some(Seat::First)
        } else if self.seats[1] == player {
            Some(Seat::Second)
        } else {
            None
        }
    }

    pub fn mover(&self) -> &PlayerId {
        &self.seats[self.board.turn().index()]
    }
}

impl RoundAdapter for BoardAdapter {
    type Action = Move;
    type Effect = Move;

    fn round_secs(&self, _round: u32) -> u32 {
        self.config.turn_secs
    }

    fn required_players(&self, _round: u32, _participants: &[PlayerId]) -> Vec<PlayerId> {
        vec![self.mover().clone()]
    }

    fn on_player_action(
        &mut self,
        player: &str,
        _round: u32,
        mv: Move,
        _remaining_secs: u32,
    ) -> Result<Move, ActionError> {
        if self.mover() != player {
            return Err(ActionError::NotYourTurn);
        }
        self.board.validate(&mv)?;
        Ok(mv)
    }

    fn apply_effect(&mut self, player: &str, round: u32, mv: &Move) {
        if self.mover() != player {
            warn!("Turn {}: move from {} out of turn", round, player);
        }
        if let Err(e) = self.board.apply_move(mv) {
            // Keep turn order aligned with the sender even if the boards diverged
            warn!("Turn {}: ignoring move {:?} from {}: {}", round, mv, player, e);
            self.board.pass_turn();
        }
    }

    fn on_timeout(&mut self, player: &str, round: u32) {
        debug!("Turn {}: {} passes", round, player);
        self.board.pass_turn();
    }

    fn is_terminal(&self, rounds_completed: u32) -> bool {
        rounds_completed >= self.config.max_turns || self.board.winner().is_some()
    }

    fn outcome(&self, local_id: &str) -> MatchOutcome {
        let Some(seat) = self.seat_of(local_id) else {
            return MatchOutcome {
                won: false,
                score: 0,
            };
        };
        let won = match self.board.winner() {
            Some(winner) => winner == seat,
            None => self.board.count(seat) > self.board.count(seat.opponent()),
        };
        info!(
            "Board over: {} holds {} pieces against {}",
            local_id,
            self.board.count(seat),
            self.board.count(seat.opponent())
        );
        MatchOutcome {
            won,
            score: self.board.captured(seat),
        }
    }
}

pub struct BoardMode {
    pub config: BoardConfig,
}

impl BoardMode {
    pub fn new(config: BoardConfig) -> Self {
        Self { config }
    }
}

impl GameMode for BoardMode {
    type Generator = SeatDraw;
    type Content = BoardContent;
    type Adapter = BoardAdapter;

    fn name(&self) -> &'static str {
        "board"
    }

    fn generator(&self) -> SeatDraw {
        SeatDraw
    }

    fn build_adapter(
        &self,
        content: &BoardContent,
        _participants: &[PlayerId],
        _local_id: &str,
    ) -> BoardAdapter {
        BoardAdapter::new(self.config.clone(), content)
    }
}
