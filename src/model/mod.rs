pub mod backend;
pub mod batching;
pub mod features;

#[cfg(test)]
mod batching_test;

use std::path::Path;

use crate::go::Position;

/// The result of evaluating a single position
#[derive(Clone, Debug, PartialEq)]
pub struct ModelOutput {
    /// One probability per move, indexed by `Coord::to_idx`, pass last
    pub policy: Vec<f32>,
    /// In range [-1, 1], from the perspective of the player to move
    pub value: f32,
}

/// A per-caller handle used by the search to evaluate positions.
///
/// Each caller owns its own handle; implementations may funnel the requests of many handles into
/// shared batches, in which case `run_many` blocks until the batch containing the request is done.
pub trait Model: Send {
    fn name(&self) -> &str;

    /// Returns one output per input position, in order
    fn run_many(&mut self, positions: Vec<Position>) -> Vec<ModelOutput>;
}

/// A loaded model instance that evaluates a whole batch in a single call
pub trait InferenceModel: Send {
    fn name(&self) -> &str;

    fn run(&mut self, positions: &[Position]) -> Vec<ModelOutput>;
}

pub trait ModelLoader: Sync + Send {
    fn load(&self, path: &str, device: &str) -> anyhow::Result<Box<dyn InferenceModel>>;
}

/// The file stem of a model path, "model" for paths without one
pub fn model_name_from_path(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("model"))
}
