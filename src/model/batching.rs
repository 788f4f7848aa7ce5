use anyhow::Context;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::go::Position;
use crate::model::{InferenceModel, Model, ModelLoader, ModelOutput};
use crate::util::metrics::RunningAverage;

/// Identifies a model loaded into a factory
pub type ModelKey = usize;

struct Request {
    ticket: u64,
    model: ModelKey,
    positions: Vec<Position>,
}

struct BatchState {
    /// Games registered with `start_game` and not yet ended
    live_games: usize,
    /// Live games whose current request is waiting in another factory
    away_games: usize,
    /// Requests submitted and not yet returned to their caller
    in_flight: usize,
    pending: Vec<Request>,
    results: HashMap<u64, Vec<ModelOutput>>,
    next_ticket: u64,
    stats: BatchStats,
}

impl BatchState {
    /// A batch is full once it holds a request from every live game that is not waiting
    /// elsewhere, split between `buffer_count` concurrent batches.
    fn batch_ready(&self, buffer_count: usize) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let expected = self.live_games.saturating_sub(self.away_games);
        let batch_size = expected.div_ceil(buffer_count).max(1);
        self.pending.len() >= batch_size
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct BatchStats {
    /// Number of model calls
    pub batches: usize,
    pub requests: usize,
    pub positions: usize,
}

impl BatchStats {
    pub fn merge(&self, other: &BatchStats) -> BatchStats {
        BatchStats {
            batches: self.batches + other.batches,
            requests: self.requests + other.requests,
            positions: self.positions + other.positions,
        }
    }

    pub fn average_batch_size(&self) -> f32 {
        if self.batches == 0 {
            0.0
        } else {
            self.positions as f32 / self.batches as f32
        }
    }
}

struct LoadedModel {
    path: String,
    name: String,
    model: Mutex<Box<dyn InferenceModel>>,
}

/// Multiplexes the inference requests of many concurrent games over the models of one device.
///
/// Every caller gets its own `BatchingModel` proxy. A request blocks the calling thread until a
/// batch containing it was run; the batch is run by whichever waiting thread notices it is full.
/// The batch size follows the number of live games, so games must be registered with
/// `start_game` before their first request and deregistered with `end_game` exactly once.
pub struct BatchingModelFactory {
    device: String,
    buffer_count: usize,
    loader: Arc<dyn ModelLoader>,
    models: Mutex<Vec<Arc<LoadedModel>>>,
    state: Mutex<BatchState>,
    state_changed: Condvar,
    run_duration_metric: Mutex<RunningAverage>,
}

impl BatchingModelFactory {
    pub fn new(device: &str, buffer_count: usize, loader: Arc<dyn ModelLoader>) -> Arc<Self> {
        assert!(buffer_count > 0);
        let run_duration_metric_name = "batching.run_duration";
        metrics::describe_gauge!(
            run_duration_metric_name,
            metrics::Unit::Seconds,
            "Duration of a batched model call"
        );
        Arc::new(Self {
            device: device.to_string(),
            buffer_count,
            loader,
            models: Mutex::new(vec![]),
            state: Mutex::new(BatchState {
                live_games: 0,
                away_games: 0,
                in_flight: 0,
                pending: vec![],
                results: HashMap::new(),
                next_ticket: 0,
                stats: BatchStats::default(),
            }),
            state_changed: Condvar::new(),
            run_duration_metric: Mutex::new(RunningAverage::new(
                0.99,
                metrics::gauge!(run_duration_metric_name, "device" => device.to_string()),
            )),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Load the model at `path` on this factory's device. Loading the same path twice returns the
    /// same key and shares the underlying model.
    pub fn load(&self, path: &str) -> anyhow::Result<ModelKey> {
        let mut models = self.models.lock().unwrap();
        if let Some(key) = models.iter().position(|m| m.path == path) {
            return Ok(key);
        }
        let model = self
            .loader
            .load(path, &self.device)
            .with_context(|| format!("loading model '{}' on device '{}'", path, self.device))?;
        log::info!("Loaded model {} from '{}' on device '{}'", model.name(), path, self.device);
        models.push(Arc::new(LoadedModel {
            path: path.to_string(),
            name: model.name().to_string(),
            model: Mutex::new(model),
        }));
        Ok(models.len() - 1)
    }

    pub fn model_name(&self, key: ModelKey) -> String {
        self.models.lock().unwrap()[key].name.clone()
    }

    /// A new caller-local proxy for a loaded model
    pub fn new_model(self: &Arc<Self>, key: ModelKey) -> BatchingModel {
        BatchingModel {
            factory: Arc::clone(self),
            key,
            name: self.model_name(key),
            in_game: false,
            opponent_factory: None,
        }
    }

    /// Register a game between the two proxies. Must be called before the first request of the
    /// game.
    pub fn start_game(model_a: &mut BatchingModel, model_b: &mut BatchingModel) {
        assert!(
            !model_a.in_game && !model_b.in_game,
            "models {} and {} are already registered in a live game",
            model_a.name,
            model_b.name
        );
        if Arc::ptr_eq(&model_a.factory, &model_b.factory) {
            model_a.factory.register_game();
        } else {
            model_a.factory.register_game();
            model_b.factory.register_game();
            model_a.opponent_factory = Some(Arc::clone(&model_b.factory));
            model_b.opponent_factory = Some(Arc::clone(&model_a.factory));
        }
        model_a.in_game = true;
        model_b.in_game = true;
    }

    /// Deregister a game registered with `start_game`. Must be called exactly once per game.
    pub fn end_game(model_a: &mut BatchingModel, model_b: &mut BatchingModel) {
        assert!(
            model_a.in_game && model_b.in_game,
            "models {} and {} are not registered in a live game",
            model_a.name,
            model_b.name
        );
        model_a.factory.unregister_game();
        if !Arc::ptr_eq(&model_a.factory, &model_b.factory) {
            model_b.factory.unregister_game();
        }
        model_a.opponent_factory = None;
        model_b.opponent_factory = None;
        model_a.in_game = false;
        model_b.in_game = false;
    }

    /// Run all pending requests now, regardless of the batch size
    pub fn flush(&self) {
        let state = self.state.lock().unwrap();
        if !state.pending.is_empty() {
            drop(self.run_batch(state));
        }
    }

    pub fn live_games(&self) -> usize {
        self.state.lock().unwrap().live_games
    }

    pub fn stats(&self) -> BatchStats {
        self.state.lock().unwrap().stats
    }

    fn register_game(&self) {
        let mut state = self.state.lock().unwrap();
        state.live_games += 1;
        metrics::gauge!("batching.live_games", "device" => self.device.clone()).set(state.live_games as f64);
    }

    fn unregister_game(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(state.live_games > 0, "end_game without a matching start_game");
        state.live_games -= 1;
        assert!(
            state.in_flight <= state.live_games && state.away_games <= state.live_games,
            "inconsistent live game bookkeeping: {} live, {} in flight, {} away",
            state.live_games,
            state.in_flight,
            state.away_games
        );
        metrics::gauge!("batching.live_games", "device" => self.device.clone()).set(state.live_games as f64);
        /* Waiting requests may form a full batch now */
        self.state_changed.notify_all();
    }

    /// A game registered here is now blocked on another factory
    fn leave(&self) {
        let mut state = self.state.lock().unwrap();
        state.away_games += 1;
        assert!(state.away_games <= state.live_games, "game left a factory it is not registered in");
        self.state_changed.notify_all();
    }

    fn rejoin(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(state.away_games > 0);
        state.away_games -= 1;
    }

    fn submit(&self, model: ModelKey, positions: Vec<Position>) -> Vec<ModelOutput> {
        let mut state = self.state.lock().unwrap();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.in_flight += 1;
        assert!(
            state.in_flight <= state.live_games,
            "more requests in flight ({}) than live games ({})",
            state.in_flight,
            state.live_games
        );
        state.pending.push(Request {
            ticket,
            model,
            positions,
        });

        loop {
            if let Some(outputs) = state.results.remove(&ticket) {
                state.in_flight -= 1;
                return outputs;
            }
            if state.batch_ready(self.buffer_count) {
                state = self.run_batch(state);
                continue;
            }
            state = self.state_changed.wait(state).unwrap();
        }
    }

    /// Take all pending requests, run them without holding the state lock and publish the results
    fn run_batch<'a>(&'a self, mut state: MutexGuard<'a, BatchState>) -> MutexGuard<'a, BatchState> {
        let requests = std::mem::take(&mut state.pending);
        drop(state);

        let mut results = Vec::with_capacity(requests.len());
        let mut stats = BatchStats::default();
        for (key, requests) in requests.into_iter().into_group_map_by(|r| r.model) {
            let model = Arc::clone(&self.models.lock().unwrap()[key]);

            let mut tickets = Vec::with_capacity(requests.len());
            let mut positions = Vec::new();
            for request in requests {
                tickets.push((request.ticket, request.positions.len()));
                positions.extend(request.positions);
            }

            let run_begin = Instant::now();
            let outputs = model.model.lock().unwrap().run(&positions);
            self.run_duration_metric
                .lock()
                .unwrap()
                .set(run_begin.elapsed().as_secs_f64());
            assert_eq!(
                outputs.len(),
                positions.len(),
                "model {} returned a wrong number of outputs",
                model.name
            );
            metrics::counter!("batching.batches", "device" => self.device.clone()).increment(1);
            metrics::histogram!("batching.batch_size", "device" => self.device.clone())
                .record(positions.len() as f64);

            stats.batches += 1;
            stats.requests += tickets.len();
            stats.positions += positions.len();

            let mut outputs = outputs.into_iter();
            for (ticket, len) in tickets {
                results.push((ticket, outputs.by_ref().take(len).collect_vec()));
            }
        }

        let mut state = self.state.lock().unwrap();
        state.stats = state.stats.merge(&stats);
        state.results.extend(results);
        self.state_changed.notify_all();
        state
    }
}

/// A caller-local proxy funnelling requests into the shared queue of its factory
pub struct BatchingModel {
    factory: Arc<BatchingModelFactory>,
    key: ModelKey,
    name: String,
    in_game: bool,
    /// The factory of the opponent's model when it differs from ours
    opponent_factory: Option<Arc<BatchingModelFactory>>,
}

impl Model for BatchingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_many(&mut self, positions: Vec<Position>) -> Vec<ModelOutput> {
        assert!(self.in_game, "model {} used outside of a registered game", self.name);
        if positions.is_empty() {
            return vec![];
        }

        /* While we wait here, the opponent's factory must not wait for this game */
        if let Some(opponent_factory) = &self.opponent_factory {
            opponent_factory.leave();
        }
        let outputs = self.factory.submit(self.key, positions);
        if let Some(opponent_factory) = &self.opponent_factory {
            opponent_factory.rejoin();
        }
        outputs
    }
}
