use itertools::Itertools;
use std::fmt::{self, Display};

use crate::go::{Color, Coord, DEFAULT_KOMI, GTP_COLUMNS, N, NUM_POINTS};

/// Number of previous boards kept for the model input features
pub const HISTORY_LEN: usize = 7;

type Board = [Option<Color>; NUM_POINTS];

#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
pub enum IllegalMove {
    #[error("point {0} is occupied")]
    Occupied(Coord),
    #[error("point {0} is a ko")]
    Ko(Coord),
    #[error("playing {0} is suicide")]
    Suicide(Coord),
    #[error("resign is not a board move")]
    Resign,
    #[error("the game is already over")]
    GameOver,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Position {
    stones: Board,
    /// Previous boards, most recent first
    history: [Board; HISTORY_LEN],
    to_play: Color,
    ko: Option<usize>,
    n: u32,
    consecutive_passes: u8,
    komi: f32,
}

impl Default for Position {
    fn default() -> Self {
        Self::new(DEFAULT_KOMI)
    }
}

impl Position {
    pub fn new(komi: f32) -> Self {
        Self {
            stones: [None; NUM_POINTS],
            history: [[None; NUM_POINTS]; HISTORY_LEN],
            to_play: Color::Black,
            ko: None,
            n: 0,
            consecutive_passes: 0,
            komi,
        }
    }

    /// Build a position from a textual board, 'X' black, 'O' white, '.' empty.
    /// Whitespace is ignored.
    pub fn from_board(board: &str, to_play: Color, n: u32, komi: f32) -> Self {
        let stones = board
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| match c {
                'X' => Some(Color::Black),
                'O' => Some(Color::White),
                '.' => None,
                other => panic!("unknown board char '{other}'"),
            })
            .collect::<Vec<_>>();
        let stones: Board = stones
            .try_into()
            .unwrap_or_else(|v: Vec<_>| panic!("expected {} points, got {}", NUM_POINTS, v.len()));
        Self {
            stones,
            to_play,
            n,
            ..Self::new(komi)
        }
    }

    pub fn n(&self) -> u32 {
        self.n
    }

    pub fn to_play(&self) -> Color {
        self.to_play
    }

    pub fn komi(&self) -> f32 {
        self.komi
    }

    pub fn stone_at(&self, c: Coord) -> Option<Color> {
        self.stones[c.to_idx()]
    }

    /// The board `age` moves ago, 0 is the current board
    pub fn board_at(&self, age: usize) -> &[Option<Color>; NUM_POINTS] {
        if age == 0 {
            &self.stones
        } else {
            &self.history[age - 1]
        }
    }

    pub fn is_game_over(&self) -> bool {
        self.consecutive_passes >= 2
    }

    pub fn is_legal(&self, c: Coord) -> bool {
        if c == Coord::RESIGN || self.is_game_over() {
            return false;
        }
        if c == Coord::PASS {
            return true;
        }
        let p = c.to_idx();
        self.stones[p].is_none() && self.ko != Some(p) && !self.is_suicide(p)
    }

    /// All legal board moves followed by pass
    pub fn legal_moves(&self) -> Vec<Coord> {
        if self.is_game_over() {
            return vec![];
        }
        (0..NUM_POINTS)
            .map(Coord::from_idx)
            .filter(|c| self.is_legal(*c))
            .chain(std::iter::once(Coord::PASS))
            .collect()
    }

    pub fn play(&mut self, c: Coord) -> Result<(), IllegalMove> {
        if c == Coord::RESIGN {
            return Err(IllegalMove::Resign);
        }
        if self.is_game_over() {
            return Err(IllegalMove::GameOver);
        }

        let prev = self.stones;
        if c == Coord::PASS {
            self.ko = None;
            self.consecutive_passes += 1;
        } else {
            let p = c.to_idx();
            if self.stones[p].is_some() {
                return Err(IllegalMove::Occupied(c));
            }
            if self.ko == Some(p) {
                return Err(IllegalMove::Ko(c));
            }

            let color = self.to_play;
            self.stones[p] = Some(color);
            let mut captured = Vec::new();
            for nb in neighbors(p) {
                if self.stones[nb] == Some(color.other()) {
                    let (group, liberties) = self.group(nb);
                    if liberties == 0 {
                        for s in group {
                            self.stones[s] = None;
                            captured.push(s);
                        }
                    }
                }
            }

            let (own_group, own_liberties) = self.group(p);
            if own_liberties == 0 {
                self.stones = prev;
                return Err(IllegalMove::Suicide(c));
            }
            self.ko = if captured.len() == 1 && own_group.len() == 1 && own_liberties == 1 {
                Some(captured[0])
            } else {
                None
            };
            self.consecutive_passes = 0;
        }

        self.history.copy_within(0..HISTORY_LEN - 1, 1);
        self.history[0] = prev;
        self.to_play = self.to_play.other();
        self.n += 1;
        Ok(())
    }

    fn is_suicide(&self, p: usize) -> bool {
        let color = self.to_play;
        for nb in neighbors(p) {
            match self.stones[nb] {
                None => return false,
                Some(c) if c == color => {
                    if self.group(nb).1 > 1 {
                        return false;
                    }
                }
                Some(_) => {
                    if self.group(nb).1 == 1 {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// The chain containing p and its number of distinct liberties
    fn group(&self, p: usize) -> (Vec<usize>, usize) {
        let color = self.stones[p];
        debug_assert!(color.is_some());
        let mut visited = [false; NUM_POINTS];
        let mut liberty = [false; NUM_POINTS];
        let mut liberties = 0;
        let mut group = vec![];
        let mut stack = vec![p];
        visited[p] = true;
        while let Some(q) = stack.pop() {
            group.push(q);
            for nb in neighbors(q) {
                match self.stones[nb] {
                    None => {
                        if !liberty[nb] {
                            liberty[nb] = true;
                            liberties += 1;
                        }
                    }
                    c if c == color && !visited[nb] => {
                        visited[nb] = true;
                        stack.push(nb);
                    }
                    _ => {}
                }
            }
        }
        (group, liberties)
    }

    /// Tromp-Taylor area score, positive means black wins
    pub fn calculate_score(&self) -> f32 {
        let mut score = 0i32;
        let mut visited = [false; NUM_POINTS];
        for p in 0..NUM_POINTS {
            match self.stones[p] {
                Some(c) => score += c.sign() as i32,
                None if !visited[p] => {
                    let (region, borders) = self.empty_region(p, &mut visited);
                    match (borders.black, borders.white) {
                        (true, false) => score += region as i32,
                        (false, true) => score -= region as i32,
                        _ => {}
                    }
                }
                None => {}
            }
        }
        score as f32 - self.komi
    }

    fn empty_region(&self, p: usize, visited: &mut [bool; NUM_POINTS]) -> (usize, Borders) {
        let mut borders = Borders::default();
        let mut size = 0;
        let mut stack = vec![p];
        visited[p] = true;
        while let Some(q) = stack.pop() {
            size += 1;
            for nb in neighbors(q) {
                match self.stones[nb] {
                    Some(Color::Black) => borders.black = true,
                    Some(Color::White) => borders.white = true,
                    None if !visited[nb] => {
                        visited[nb] = true;
                        stack.push(nb);
                    }
                    None => {}
                }
            }
        }
        (size, borders)
    }

    /// True when every point is either part of a pass-alive chain or of an empty pass-alive
    /// region of either color, so no sequence of moves can change the score.
    pub fn calculate_whole_board_pass_alive(&self) -> bool {
        let mut settled = [false; NUM_POINTS];
        for color in [Color::Black, Color::White] {
            self.mark_pass_alive(color, &mut settled);
        }
        settled.iter().all(|s| *s)
    }

    /// Benson's algorithm for unconditionally alive chains of `color`
    fn mark_pass_alive(&self, color: Color, settled: &mut [bool; NUM_POINTS]) {
        const NONE: usize = usize::MAX;

        /* Label the chains of `color` */
        let mut chain_of = [NONE; NUM_POINTS];
        let mut chains: Vec<Vec<usize>> = vec![];
        for p in 0..NUM_POINTS {
            if self.stones[p] == Some(color) && chain_of[p] == NONE {
                let (group, _) = self.group(p);
                for &s in &group {
                    chain_of[s] = chains.len();
                }
                chains.push(group);
            }
        }

        /* Label the regions, maximal connected sets of points not occupied by `color` */
        let mut region_of = [NONE; NUM_POINTS];
        let mut regions: Vec<Region> = vec![];
        for p in 0..NUM_POINTS {
            if self.stones[p] == Some(color) || region_of[p] != NONE {
                continue;
            }
            let region_id = regions.len();
            let mut region = Region::default();
            let mut stack = vec![p];
            region_of[p] = region_id;
            while let Some(q) = stack.pop() {
                region.points.push(q);
                if self.stones[q].is_some() {
                    region.has_stones = true;
                }
                for nb in neighbors(q) {
                    if self.stones[nb] == Some(color) {
                        if !region.chains.contains(&chain_of[nb]) {
                            region.chains.push(chain_of[nb]);
                        }
                    } else if region_of[nb] == NONE {
                        region_of[nb] = region_id;
                        stack.push(nb);
                    }
                }
            }
            regions.push(region);
        }

        /* A region is vital to a chain if all its empty points are liberties of the chain */
        let vital_to = regions
            .iter()
            .map(|region| {
                region
                    .chains
                    .iter()
                    .copied()
                    .filter(|&chain| {
                        region.points.iter().all(|&q| {
                            self.stones[q].is_some() || neighbors(q).any(|nb| chain_of[nb] == chain)
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut chain_alive = vec![true; chains.len()];
        let mut region_alive = regions.iter().map(|r| !r.chains.is_empty()).collect::<Vec<_>>();
        loop {
            let mut changed = false;
            for chain in 0..chains.len() {
                if !chain_alive[chain] {
                    continue;
                }
                let vital_count = (0..regions.len())
                    .filter(|&r| region_alive[r] && vital_to[r].contains(&chain))
                    .count();
                if vital_count < 2 {
                    chain_alive[chain] = false;
                    changed = true;
                }
            }
            for (r, region) in regions.iter().enumerate() {
                if region_alive[r] && region.chains.iter().any(|&chain| !chain_alive[chain]) {
                    region_alive[r] = false;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for (chain, points) in chains.iter().enumerate() {
            if chain_alive[chain] {
                points.iter().for_each(|&p| settled[p] = true);
            }
        }
        for (r, region) in regions.iter().enumerate() {
            if region_alive[r] && !region.has_stones {
                region.points.iter().for_each(|&p| settled[p] = true);
            }
        }
    }
}

#[derive(Default)]
struct Borders {
    black: bool,
    white: bool,
}

#[derive(Default)]
struct Region {
    points: Vec<usize>,
    /// Chains of the enclosing color adjacent to the region
    chains: Vec<usize>,
    has_stones: bool,
}

fn neighbors(p: usize) -> impl Iterator<Item = usize> {
    let (row, col) = (p / N, p % N);
    [
        (row > 0).then(|| p - N),
        (row + 1 < N).then(|| p + N),
        (col > 0).then(|| p - 1),
        (col + 1 < N).then(|| p + 1),
    ]
    .into_iter()
    .flatten()
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = GTP_COLUMNS[..N].iter().map(|&c| c as char).join(" ");
        writeln!(f, "   {columns}")?;
        for row in 0..N {
            write!(f, "{:>2} ", N - row)?;
            for col in 0..N {
                let p = row * N + col;
                let c = match self.stones[p] {
                    Some(Color::Black) => 'X',
                    Some(Color::White) => 'O',
                    None if self.ko == Some(p) => '*',
                    None => '.',
                };
                write!(f, "{c}")?;
                if col + 1 < N {
                    write!(f, " ")?;
                }
            }
            writeln!(f)?;
        }
        write!(
            f,
            "move {}, {:?} to play, komi {}",
            self.n, self.to_play, self.komi
        )
    }
}
