use std::sync::{Arc, Mutex};

use crate::go::{Position, NUM_MOVES, NUM_POINTS};
use crate::model::{model_name_from_path, InferenceModel, Model, ModelLoader, ModelOutput};

/// A model that strongly prefers passing and evaluates every position with `value_fn`.
///
/// Clones share the record of batch sizes, so a test can keep one clone and observe the calls
/// made through the others.
#[derive(Clone)]
pub struct StubModel {
    name: String,
    pass_prior: f32,
    value_fn: fn(&Position) -> f32,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl StubModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pass_prior: 0.9,
            value_fn: |_| 0.0,
            batch_sizes: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn with_value_fn(mut self, value_fn: fn(&Position) -> f32) -> Self {
        self.value_fn = value_fn;
        self
    }

    pub fn with_pass_prior(mut self, pass_prior: f32) -> Self {
        self.pass_prior = pass_prior;
        self
    }

    fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    pub fn calls(&self) -> usize {
        self.batch_sizes.lock().unwrap().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    fn outputs(&self, positions: &[Position]) -> Vec<ModelOutput> {
        self.batch_sizes.lock().unwrap().push(positions.len());
        let mut policy = vec![(1.0 - self.pass_prior) / NUM_POINTS as f32; NUM_MOVES];
        policy[NUM_MOVES - 1] = self.pass_prior;
        positions
            .iter()
            .map(|position| ModelOutput {
                policy: policy.clone(),
                value: (self.value_fn)(position),
            })
            .collect()
    }
}

impl Model for StubModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_many(&mut self, positions: Vec<Position>) -> Vec<ModelOutput> {
        self.outputs(&positions)
    }
}

impl InferenceModel for StubModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, positions: &[Position]) -> Vec<ModelOutput> {
        self.outputs(positions)
    }
}

/// Loads clones of a template model named after the path. Paths containing "missing" fail.
pub struct StubLoader {
    template: StubModel,
    devices: Mutex<Vec<String>>,
}

impl StubLoader {
    pub fn new(template: StubModel) -> Arc<Self> {
        Arc::new(Self {
            template,
            devices: Mutex::new(vec![]),
        })
    }

    /// The device of every successful load, in order
    pub fn loaded_devices(&self) -> Vec<String> {
        self.devices.lock().unwrap().clone()
    }
}

impl ModelLoader for StubLoader {
    fn load(&self, path: &str, device: &str) -> anyhow::Result<Box<dyn InferenceModel>> {
        if path.contains("missing") {
            anyhow::bail!("no such model file: {path}");
        }
        self.devices.lock().unwrap().push(device.to_string());
        Ok(Box::new(self.template.renamed(&model_name_from_path(path))))
    }
}

/// A position with a single black stone on point `idx`, white to play
pub fn position_with_stone(idx: usize) -> Position {
    let mut position = Position::default();
    position
        .play(crate::go::Coord::from_idx(idx))
        .unwrap();
    position
}
