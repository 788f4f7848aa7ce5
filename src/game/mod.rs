pub mod sgf;


use crate::go::{Color, Coord, IllegalMove, Position, DEFAULT_KOMI};

#[derive(Clone, Copy, Debug)]
pub struct GameOptions {
    pub resign_enabled: bool,
    /// Resign when the root value from the mover's perspective drops below this, always <= 0
    pub resign_threshold: f32,
    pub komi: f32,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            resign_enabled: true,
            resign_threshold: -0.999,
            komi: DEFAULT_KOMI,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GameOverReason {
    BothPassed,
    OpponentResigned,
}

#[derive(Clone, Debug)]
pub struct GameMove {
    pub color: Color,
    pub c: Coord,
    pub comment: String,
}

/// The record of a single match between two named players
pub struct Game {
    black_name: String,
    white_name: String,
    options: GameOptions,
    position: Position,
    moves: Vec<GameMove>,
    comments: Vec<String>,
    game_over_reason: Option<GameOverReason>,
    /// Positive favors black. The score for finished games, +-1 for resignations.
    result: f32,
}

impl Game {
    pub fn new(black_name: impl Into<String>, white_name: impl Into<String>, options: GameOptions) -> Self {
        let position = Position::new(options.komi);
        Self::from_position(black_name, white_name, options, position)
    }

    pub fn from_position(
        black_name: impl Into<String>,
        white_name: impl Into<String>,
        options: GameOptions,
        position: Position,
    ) -> Self {
        Self {
            black_name: black_name.into(),
            white_name: white_name.into(),
            options,
            position,
            moves: vec![],
            comments: vec![],
            game_over_reason: None,
            result: 0.0,
        }
    }

    /// Commit a move for the color to play. Resign ends the game without touching the board.
    pub fn add_move(&mut self, c: Coord, comment: impl Into<String>) -> Result<(), IllegalMove> {
        if self.game_over() {
            return Err(IllegalMove::GameOver);
        }
        let color = self.position.to_play();
        if c == Coord::RESIGN {
            self.set_game_over_because_of_resign(color);
            return Ok(());
        }

        self.position.play(c)?;
        self.moves.push(GameMove {
            color,
            c,
            comment: comment.into(),
        });
        if self.position.is_game_over() {
            self.result = self.position.calculate_score();
            self.game_over_reason = Some(GameOverReason::BothPassed);
        }
        Ok(())
    }

    fn set_game_over_because_of_resign(&mut self, loser: Color) {
        self.result = -loser.sign();
        self.game_over_reason = Some(GameOverReason::OpponentResigned);
    }

    pub fn add_comment(&mut self, comment: impl Into<String>) {
        self.comments.push(comment.into());
    }

    pub fn game_over(&self) -> bool {
        self.game_over_reason.is_some()
    }

    pub fn game_over_reason(&self) -> Option<GameOverReason> {
        self.game_over_reason
    }

    pub fn result(&self) -> f32 {
        self.result
    }

    pub fn winner(&self) -> Option<Color> {
        if !self.game_over() {
            None
        } else if self.result > 0.0 {
            Some(Color::Black)
        } else {
            Some(Color::White)
        }
    }

    pub fn result_string(&self) -> String {
        let Some(winner) = self.winner() else {
            return String::from("?");
        };
        match self.game_over_reason {
            Some(GameOverReason::OpponentResigned) => format!("{}+R", winner.to_sgf()),
            _ => format!("{}+{:.1}", winner.to_sgf(), self.result.abs()),
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn moves(&self) -> &[GameMove] {
        &self.moves
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn options(&self) -> &GameOptions {
        &self.options
    }

    pub fn black_name(&self) -> &str {
        &self.black_name
    }

    pub fn white_name(&self) -> &str {
        &self.white_name
    }
}
