pub mod position;


pub use position::{IllegalMove, Position};

use std::fmt::{self, Display};

#[cfg(not(feature = "board-19"))]
pub const N: usize = 9;
#[cfg(feature = "board-19")]
pub const N: usize = 19;

pub const NUM_POINTS: usize = N * N;

/// All board points plus pass
pub const NUM_MOVES: usize = NUM_POINTS + 1;

pub const DEFAULT_KOMI: f32 = 7.5;

/// The whole-board pass-alive check is skipped for positions with fewer moves than this
pub const MIN_PASS_ALIVE_MOVES: u32 = (N * N / 3) as u32;

const GTP_COLUMNS: &[u8] = b"ABCDEFGHJKLMNOPQRST";

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Color {
    Black,
    White,
}

impl Color {
    pub fn other(&self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// +1 for black, -1 for white
    pub fn sign(&self) -> f32 {
        match self {
            Color::Black => 1.0,
            Color::White => -1.0,
        }
    }

    pub fn to_sgf(&self) -> &'static str {
        match self {
            Color::Black => "B",
            Color::White => "W",
        }
    }
}

/// A move on the board, or one of the two special moves
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Coord(u16);

impl Coord {
    pub const PASS: Coord = Coord(NUM_POINTS as u16);
    pub const RESIGN: Coord = Coord(NUM_POINTS as u16 + 1);

    pub fn new(row: usize, col: usize) -> Self {
        assert!(row < N && col < N, "coord out of board: ({row}, {col})");
        Coord((row * N + col) as u16)
    }

    pub fn from_idx(idx: usize) -> Self {
        assert!(idx <= NUM_POINTS + 1, "invalid coord index {idx}");
        Coord(idx as u16)
    }

    /// Index into the policy vector, pass is the last entry
    pub fn to_idx(&self) -> usize {
        self.0 as usize
    }

    pub fn is_point(&self) -> bool {
        (self.0 as usize) < NUM_POINTS
    }

    pub fn row(&self) -> usize {
        debug_assert!(self.is_point());
        self.0 as usize / N
    }

    pub fn col(&self) -> usize {
        debug_assert!(self.is_point());
        self.0 as usize % N
    }

    /// GTP vertex, rows are counted from the bottom and the column letters skip 'I'
    pub fn to_gtp(&self) -> String {
        match *self {
            Coord::PASS => String::from("pass"),
            Coord::RESIGN => String::from("resign"),
            c => format!("{}{}", GTP_COLUMNS[c.col()] as char, N - c.row()),
        }
    }

    pub fn from_gtp(s: &str) -> Option<Coord> {
        let s = s.trim().to_uppercase();
        match s.as_str() {
            "PASS" => return Some(Coord::PASS),
            "RESIGN" => return Some(Coord::RESIGN),
            _ => {}
        }
        let mut chars = s.chars();
        let col_char = chars.next().filter(char::is_ascii)? as u8;
        let col = GTP_COLUMNS[..N].iter().position(|&c| c == col_char)?;
        let row = chars.as_str();
        if !row.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let row_from_bottom: usize = row.parse().ok()?;
        if !(1..=N).contains(&row_from_bottom) {
            return None;
        }
        Some(Coord::new(N - row_from_bottom, col))
    }

    /// SGF point, empty for pass
    pub fn to_sgf(&self) -> String {
        match *self {
            Coord::PASS => String::new(),
            Coord::RESIGN => panic!("resign has no SGF point"),
            c => {
                let col = (b'a' + c.col() as u8) as char;
                let row = (b'a' + c.row() as u8) as char;
                format!("{col}{row}")
            }
        }
    }
}

impl Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_gtp())
    }
}
