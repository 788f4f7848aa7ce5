use std::fmt::Write as _;

use crate::game::{Game, GameOverReason};
use crate::go::Color;

/// Wins of one model with one color
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColorStats {
    pub both_passed: u32,
    pub opponent_resigned: u32,
    /// Sum of the score margins of the games won by passing
    pub total_margin: f32,
}

impl ColorStats {
    pub fn total(&self) -> u32 {
        self.both_passed + self.opponent_resigned
    }

    fn update(&mut self, game: &Game) {
        match game.game_over_reason() {
            Some(GameOverReason::BothPassed) => {
                self.both_passed += 1;
                self.total_margin += game.result().abs();
            }
            Some(GameOverReason::OpponentResigned) => self.opponent_resigned += 1,
            None => panic!("game is not over"),
        }
    }

    fn to_json(self) -> json::JsonValue {
        json::object! {
            total: self.total(),
            both_passed: self.both_passed,
            opponent_resigned: self.opponent_resigned,
            total_margin: self.total_margin,
        }
    }
}

/// Wins of one model
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WinStats {
    pub black_wins: ColorStats,
    pub white_wins: ColorStats,
}

impl WinStats {
    /// Count a finished game won by the model these stats belong to
    pub fn update(&mut self, game: &Game) {
        match game.winner() {
            Some(Color::Black) => self.black_wins.update(game),
            Some(Color::White) => self.white_wins.update(game),
            None => panic!("game is not over"),
        }
    }

    pub fn total(&self) -> u32 {
        self.black_wins.total() + self.white_wins.total()
    }

    pub fn to_json(&self) -> json::JsonValue {
        json::object! {
            total_wins: self.total(),
            black_wins: self.black_wins.to_json(),
            white_wins: self.white_wins.to_json(),
        }
    }
}

/// A fixed width table of the wins of each model, split by color and by how the game ended
pub fn format_win_stats_table(stats: &[(String, WinStats)]) -> String {
    let name_width = stats
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut table = String::new();
    let _ = writeln!(
        table,
        "{:name_width$}  {:>5} | {:^22} | {:^22}",
        "",
        "",
        "Black wins",
        "White wins",
    );
    let _ = write!(
        table,
        "{:name_width$}  {:>5} | {:>6} {:>6} {:>8} | {:>6} {:>6} {:>8}",
        "Name", "Total", "Total", "Passes", "Resigns", "Total", "Passes", "Resigns",
    );
    for (name, s) in stats {
        let _ = write!(
            table,
            "\n{:name_width$}  {:>5} | {:>6} {:>6} {:>8} | {:>6} {:>6} {:>8}",
            name,
            s.total(),
            s.black_wins.total(),
            s.black_wins.both_passed,
            s.black_wins.opponent_resigned,
            s.white_wins.total(),
            s.white_wins.both_passed,
            s.white_wins.opponent_resigned,
        );
    }
    table
}
