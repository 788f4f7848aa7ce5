use ndarray::Array4;

use crate::go::position::HISTORY_LEN;
use crate::go::{Color, Position, N, NUM_POINTS};

/// Own and opponent stones for the current board and each history board, plus the color to play
pub const NUM_PLANES: usize = 2 * (HISTORY_LEN + 1) + 1;

/// Encode a batch of positions as a (batch, planes, N, N) tensor.
///
/// Stones are encoded relative to the player to move, the last plane is all ones when black is to
/// play.
pub fn positions_to_tensor(positions: &[Position]) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((positions.len(), NUM_PLANES, N, N));

    for (b, position) in positions.iter().enumerate() {
        let me = position.to_play();
        for age in 0..=HISTORY_LEN {
            let board = position.board_at(age);
            for p in 0..NUM_POINTS {
                let plane = match board[p] {
                    Some(color) if color == me => 2 * age,
                    Some(_) => 2 * age + 1,
                    None => continue,
                };
                tensor[(b, plane, p / N, p % N)] = 1.0;
            }
        }
        if me == Color::Black {
            tensor
                .slice_mut(ndarray::s![b, NUM_PLANES - 1, .., ..])
                .fill(1.0);
        }
    }

    tensor
}

/// Softmax over raw move scores, non finite scores are treated as the lowest possible score
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let scores = scores
        .iter()
        .map(|s| if s.is_finite() { *s } else { f32::MIN })
        .collect::<Vec<_>>();
    let max_s = scores.iter().cloned().fold(f32::MIN, f32::max);
    let exps = scores.iter().map(|s| (s - max_s).exp()).collect::<Vec<_>>();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
