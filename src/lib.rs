pub mod eval;
pub mod game;
pub mod go;
pub mod mcts;
pub mod model;
pub mod util;
