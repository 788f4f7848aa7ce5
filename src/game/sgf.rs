use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::game::Game;
use crate::go::N;

const PROGRAM_NAME: &str = "go-arena";

/// Render a finished game as an SGF FF[4] record
pub fn to_sgf(game: &Game, write_comments: bool) -> String {
    let mut sgf = String::new();
    // Writing into a String can not fail
    let _ = write!(
        sgf,
        "(;GM[1]FF[4]CA[UTF-8]AP[{}]RU[Chinese]SZ[{}]KM[{}]PB[{}]PW[{}]RE[{}]",
        PROGRAM_NAME,
        N,
        game.position().komi(),
        escape(game.black_name()),
        escape(game.white_name()),
        game.result_string(),
    );
    if write_comments && !game.comments().is_empty() {
        let _ = write!(sgf, "C[{}]", escape(&game.comments().join("\n")));
    }
    for m in game.moves() {
        let _ = write!(sgf, "\n;{}[{}]", m.color.to_sgf(), m.c.to_sgf());
        if write_comments && !m.comment.is_empty() {
            let _ = write!(sgf, "C[{}]", escape(&m.comment));
        }
    }
    sgf.push_str(")\n");
    sgf
}

/// Write the game to `<dir>/<name>.sgf`, creating the directory if needed
pub fn write_sgf(dir: impl AsRef<Path>, name: &str, game: &Game, write_comments: bool) -> std::io::Result<PathBuf> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        fs::create_dir_all(dir)?;
    }
    let path = dir.join(format!("{name}.sgf"));
    fs::write(&path, to_sgf(game, write_comments))?;
    log::debug!("Wrote SGF {}", path.display());
    Ok(path)
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if c == ']' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
