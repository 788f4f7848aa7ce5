pub mod config;
pub mod eval_cmd;
pub mod table;
pub mod win_stats;


use itertools::Itertools;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::eval::config::{EvalConfig, EvalError};
use crate::eval::table::{JsonTableStore, RecordStore, TableSpec, NO_SGF_SAVED};
use crate::eval::win_stats::{format_win_stats_table, WinStats};
use crate::game::{sgf, Game, GameOptions};
use crate::go::{Color, Coord, Position, DEFAULT_KOMI, MIN_PASS_ALIVE_MOVES};
use crate::mcts::{MctsPlayer, PlayerOptions};
use crate::model::batching::{BatchStats, BatchingModel, BatchingModelFactory, ModelKey};
use crate::model::{Model, ModelLoader};

/// A model taking part in the evaluation, with the tally of its wins
pub struct EvaluatedModel {
    factory: Arc<BatchingModelFactory>,
    key: ModelKey,
    name: String,
    player_options: PlayerOptions,
    win_stats: Mutex<WinStats>,
}

impl EvaluatedModel {
    fn load(
        factory: &Arc<BatchingModelFactory>,
        path: &str,
        player_options: PlayerOptions,
    ) -> Result<Self, EvalError> {
        let key = factory.load(path).map_err(|err| EvalError::ModelLoad {
            path: path.to_string(),
            reason: format!("{err:#}"),
        })?;
        Ok(Self {
            factory: Arc::clone(factory),
            key,
            name: factory.model_name(key),
            player_options,
            win_stats: Mutex::new(WinStats::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn new_model(&self) -> BatchingModel {
        self.factory.new_model(self.key)
    }

    pub fn update_win_stats(&self, game: &Game) {
        self.win_stats.lock().unwrap().update(game);
    }

    pub fn win_stats(&self) -> WinStats {
        *self.win_stats.lock().unwrap()
    }
}

/// Plays `parallel_games` games between two models, alternating colors, and tallies the wins
pub struct Evaluator<'a> {
    config: &'a EvalConfig,
    batchers: Vec<Arc<BatchingModelFactory>>,
    eval_model: EvaluatedModel,
    target_model: EvaluatedModel,
    record_store: Box<dyn RecordStore>,
    game_id: AtomicU64,
}

impl<'a> Evaluator<'a> {
    /// Create the batching factories and load both models. Models on the same device share a
    /// factory.
    pub fn new(config: &'a EvalConfig, loader: Arc<dyn ModelLoader>) -> Result<Self, EvalError> {
        if config.buffer_count == 0 {
            return Err(EvalError::NoBuffers);
        }
        if config.virtual_losses == 0 {
            return Err(EvalError::NoVirtualLosses);
        }

        let eval_factory = BatchingModelFactory::new(&config.eval_device, config.buffer_count, Arc::clone(&loader));
        let mut batchers = vec![Arc::clone(&eval_factory)];
        let target_factory = if config.target_device == config.eval_device {
            eval_factory
        } else {
            let factory = BatchingModelFactory::new(&config.target_device, config.buffer_count, loader);
            batchers.push(Arc::clone(&factory));
            factory
        };

        let player_options = |num_readouts| PlayerOptions {
            num_readouts,
            virtual_losses: config.virtual_losses,
            inject_noise: false,
            value_init_penalty: config.value_init_penalty,
            ..PlayerOptions::default()
        };
        let eval_model = EvaluatedModel::load(
            &batchers[0],
            &config.eval_model,
            player_options(config.num_eval_readouts),
        )?;
        let target_model = EvaluatedModel::load(
            &target_factory,
            &config.target_model,
            player_options(config.num_target_readouts),
        )?;

        Ok(Self {
            config,
            batchers,
            eval_model,
            target_model,
            record_store: Box::new(JsonTableStore::new(&config.table_root)),
            game_id: AtomicU64::new(0),
        })
    }

    pub fn with_record_store(mut self, record_store: Box<dyn RecordStore>) -> Self {
        self.record_store = record_store;
        self
    }

    /// Play all games and return the win stats of the eval model followed by the target model
    pub fn run(&self) -> Result<Vec<(String, WinStats)>, EvalError> {
        let table_spec = TableSpec::parse(&self.config.output_bigtable)?;
        if self.config.parallel_games == 0 {
            return Err(EvalError::NoGames);
        }
        if !self.config.sgf_dir.is_empty() {
            std::fs::create_dir_all(&self.config.sgf_dir)?;
        }

        let game_options = GameOptions {
            resign_enabled: self.config.resign_enabled,
            resign_threshold: -self.config.resign_threshold.abs(),
            komi: DEFAULT_KOMI,
        };
        let seed = match self.config.seed {
            0 => seed_from_clock(),
            seed => seed,
        };
        log::info!(
            "Evaluating {} against {} in {} parallel games, seed {}",
            self.eval_model.name,
            self.target_model.name,
            self.config.parallel_games,
            seed
        );

        let start_time = Instant::now();
        std::thread::scope(|s| {
            let threads = (0..self.config.parallel_games)
                .map(|thread_id| {
                    let table_spec = table_spec.as_ref();
                    s.spawn(move || self.thread_run(thread_id, seed, game_options, table_spec))
                })
                .collect_vec();
            for t in threads {
                t.join().unwrap_or_else(|err| std::panic::resume_unwind(err));
            }
        });

        let results = vec![
            (self.eval_model.name.clone(), self.eval_model.win_stats()),
            (self.target_model.name.clone(), self.target_model.win_stats()),
        ];
        let batch_stats = self.batch_stats();
        log::info!(
            "Evaluated {} games in {:.2}s, {} batches of {:.2} positions on average",
            self.config.parallel_games,
            start_time.elapsed().as_secs_f64(),
            batch_stats.batches,
            batch_stats.average_batch_size(),
        );
        log::info!("\n{}", format_win_stats_table(&results));
        Ok(results)
    }

    /// Batching statistics summed over all factories
    pub fn batch_stats(&self) -> BatchStats {
        self.batchers
            .iter()
            .fold(BatchStats::default(), |stats, factory| stats.merge(&factory.stats()))
    }

    fn thread_run(&self, thread_id: usize, seed: u64, game_options: GameOptions, table_spec: Option<&TableSpec>) {
        /* Alternate colors between threads */
        let (black, white) = if thread_id % 2 == 1 {
            (&self.target_model, &self.eval_model)
        } else {
            (&self.eval_model, &self.target_model)
        };
        let verbose = self.config.verbose && thread_id == 0;

        let position = Position::new(game_options.komi);
        let mut game = Game::from_position(black.name(), white.name(), game_options, position.clone());

        let mut black_model = black.new_model();
        let mut white_model = white.new_model();
        BatchingModelFactory::start_game(&mut black_model, &mut white_model);

        let player_options = |model: &EvaluatedModel, color| PlayerOptions {
            random_seed: player_seed(seed, thread_id, color),
            ..model.player_options.clone()
        };
        let mut black_player = MctsPlayer::new(black_model, player_options(black, Color::Black), &position);
        let mut white_player = MctsPlayer::new(white_model, player_options(white, Color::White), &position);

        play_game(&mut game, &mut black_player, &mut white_player, verbose);

        BatchingModelFactory::end_game(black_player.model_mut(), white_player.model_mut());

        let winner = match game.winner() {
            Some(Color::Black) => black,
            Some(Color::White) => white,
            None => panic!("thread {thread_id} finished a game that is not over"),
        };
        winner.update_win_stats(&game);

        if verbose {
            log::info!("Black was: {}", black.name());
            log::info!("White was: {}", white.name());
            log::info!("Final score: {}", game.result_string());
        }

        let game_id = self.game_id.fetch_add(1, Ordering::SeqCst);
        let output_name = if self.config.sgf_dir.is_empty() {
            NO_SGF_SAVED.to_string()
        } else {
            game.add_comment(format!("B inferences: {}", black_player.inference_summary()));
            game.add_comment(format!("W inferences: {}", white_player.inference_summary()));
            let output_name = format!(
                "{}-{}-{}-{}-{}",
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
                std::process::id(),
                game_id,
                black.name(),
                white.name()
            );
            sgf::write_sgf(&self.config.sgf_dir, &output_name, &game, true)
                .unwrap_or_else(|err| panic!("failed to write SGF {output_name}: {err}"));
            output_name
        };

        if let Some(spec) = table_spec {
            self.record_store
                .write_eval_record(spec, &game, &output_name, &self.config.bigtable_tag)
                .unwrap_or_else(|err| panic!("failed to write eval record of {output_name}: {err}"));
        }

        log::info!("Thread {} stopping", thread_id);
    }
}

/// Drive a game between the two players until it is over.
///
/// Once the board is pass-alive both players pass without searching.
pub fn play_game<M: Model>(game: &mut Game, black: &mut MctsPlayer<M>, white: &mut MctsPlayer<M>, verbose: bool) {
    while !game.game_over() {
        let (player, opponent) = match game.position().to_play() {
            Color::Black => (&mut *black, &mut *white),
            Color::White => (&mut *white, &mut *black),
        };

        let c = if should_pass_race(game.position()) {
            Coord::PASS
        } else {
            let num_readouts = player.options().num_readouts;
            player.suggest_move(game, num_readouts)
        };
        if verbose {
            log::info!("{}", player.describe());
        }

        player
            .play_move(game, c)
            .unwrap_or_else(|err| panic!("{} played an illegal move {c}: {err}", player.name()));
        if c != Coord::RESIGN {
            opponent
                .play_opponents_move(c)
                .unwrap_or_else(|err| panic!("{} can not follow move {c}: {err}", opponent.name()));
        }

        if verbose {
            log::info!(
                "{}: {} by {}\nQ: {:.4}\n{}",
                game.moves().len(),
                c,
                player.name(),
                player.root_q(),
                game.position()
            );
        }
    }
}

/// Whether no move can change the outcome anymore, so both sides may simply pass
pub fn should_pass_race(position: &Position) -> bool {
    position.n() >= MIN_PASS_ALIVE_MOVES && position.calculate_whole_board_pass_alive()
}

/// Seed of one player's RNG, distinct for every thread and color
pub fn player_seed(base: u64, thread_id: usize, color: Color) -> u64 {
    let stream = 2 * thread_id as u64
        + match color {
            Color::Black => 0,
            Color::White => 1,
        };
    base.wrapping_add(stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn seed_from_clock() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos.max(1)
}
