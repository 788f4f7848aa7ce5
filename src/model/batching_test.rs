#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::go::Position;
    use crate::model::batching::{BatchStats, BatchingModel, BatchingModelFactory};
    use crate::model::Model;
    use crate::util::test_util::{position_with_stone, StubLoader, StubModel};

    fn first_stone(position: &Position) -> f32 {
        position
            .board_at(0)
            .iter()
            .position(|s| s.is_some())
            .map(|idx| idx as f32)
            .unwrap_or(-1.0)
    }

    #[test]
    fn one_batch_per_round_of_live_games() {
        let stub = StubModel::new("stub").with_value_fn(first_stone);
        let factory = BatchingModelFactory::new("cpu", 1, StubLoader::new(stub.clone()));
        let key = factory.load("a.onnx").unwrap();

        const GAMES: usize = 4;
        let mut games = (0..GAMES)
            .map(|_| {
                let mut black = factory.new_model(key);
                let mut white = factory.new_model(key);
                BatchingModelFactory::start_game(&mut black, &mut white);
                (black, white)
            })
            .collect::<Vec<_>>();
        assert_eq!(factory.live_games(), GAMES);

        std::thread::scope(|s| {
            for (game_idx, (black, _white)) in games.iter_mut().enumerate() {
                s.spawn(move || {
                    let outputs = black.run_many(vec![position_with_stone(game_idx)]);
                    assert_eq!(outputs.len(), 1);
                    assert_eq!(outputs[0].value, game_idx as f32);
                });
            }
        });

        assert_eq!(stub.batch_sizes(), vec![GAMES]);
        assert_eq!(
            factory.stats(),
            BatchStats {
                batches: 1,
                requests: GAMES,
                positions: GAMES,
            }
        );

        for (black, white) in games.iter_mut() {
            BatchingModelFactory::end_game(black, white);
        }
        assert_eq!(factory.live_games(), 0);
    }

    #[test]
    fn results_follow_their_request() {
        let stub = StubModel::new("stub").with_value_fn(first_stone);
        let factory = BatchingModelFactory::new("cpu", 1, StubLoader::new(stub.clone()));
        let key = factory.load("a.onnx").unwrap();

        let mut games = (0..3)
            .map(|_| {
                let mut black = factory.new_model(key);
                let mut white = factory.new_model(key);
                BatchingModelFactory::start_game(&mut black, &mut white);
                (black, white)
            })
            .collect::<Vec<_>>();

        std::thread::scope(|s| {
            for (game_idx, (black, _white)) in games.iter_mut().enumerate() {
                s.spawn(move || {
                    /* Requests of different sizes in the same batch */
                    let stones = (0..=game_idx).map(|i| 10 * game_idx + i).collect::<Vec<_>>();
                    let positions = stones.iter().map(|idx| position_with_stone(*idx)).collect();
                    let outputs = black.run_many(positions);
                    let values = outputs.iter().map(|o| o.value).collect::<Vec<_>>();
                    let expected = stones.iter().map(|idx| *idx as f32).collect::<Vec<_>>();
                    assert_eq!(values, expected);
                });
            }
        });
        assert_eq!(stub.batch_sizes(), vec![1 + 2 + 3]);

        for (black, white) in games.iter_mut() {
            BatchingModelFactory::end_game(black, white);
        }
    }

    #[test]
    fn request_waits_for_unstarted_game_until_end() {
        let stub = StubModel::new("stub");
        let factory = BatchingModelFactory::new("cpu", 1, StubLoader::new(stub.clone()));
        let key = factory.load("a.onnx").unwrap();

        let mut idle_black = factory.new_model(key);
        let mut idle_white = factory.new_model(key);
        BatchingModelFactory::start_game(&mut idle_black, &mut idle_white);
        let mut black = factory.new_model(key);
        let mut white = factory.new_model(key);
        BatchingModelFactory::start_game(&mut black, &mut white);

        let (tx, rx) = mpsc::channel();
        let worker = std::thread::spawn(move || {
            let outputs = black.run_many(vec![Position::default()]);
            tx.send(outputs.len()).unwrap();
            (black, white)
        });

        /* Two live games, only one request */
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(stub.calls(), 0);

        BatchingModelFactory::end_game(&mut idle_black, &mut idle_white);
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)), Ok(1));
        let (mut black, mut white) = worker.join().unwrap();
        BatchingModelFactory::end_game(&mut black, &mut white);
        assert_eq!(stub.batch_sizes(), vec![1]);
    }

    #[test]
    fn flush_runs_partial_batch() {
        let stub = StubModel::new("stub");
        let factory = BatchingModelFactory::new("cpu", 1, StubLoader::new(stub.clone()));
        let key = factory.load("a.onnx").unwrap();

        let mut games = (0..3)
            .map(|_| {
                let mut black = factory.new_model(key);
                let mut white = factory.new_model(key);
                BatchingModelFactory::start_game(&mut black, &mut white);
                (black, white)
            })
            .collect::<Vec<_>>();
        let (mut black, mut white) = games.pop().unwrap();

        let (tx, rx) = mpsc::channel();
        let worker = std::thread::spawn(move || {
            let outputs = black.run_many(vec![Position::default(), Position::default()]);
            tx.send(outputs.len()).unwrap();
            black
        });
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        factory.flush();
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)), Ok(2));
        let mut black = worker.join().unwrap();
        assert_eq!(stub.batch_sizes(), vec![2]);

        /* Nothing pending */
        factory.flush();
        assert_eq!(stub.calls(), 1);

        BatchingModelFactory::end_game(&mut black, &mut white);
        for (black, white) in games.iter_mut() {
            BatchingModelFactory::end_game(black, white);
        }
    }

    #[test]
    fn buffer_count_splits_batches() {
        let stub = StubModel::new("stub");
        let factory = BatchingModelFactory::new("cpu", 2, StubLoader::new(stub.clone()));
        let key = factory.load("a.onnx").unwrap();

        let mut games = (0..4)
            .map(|_| {
                let mut black = factory.new_model(key);
                let mut white = factory.new_model(key);
                BatchingModelFactory::start_game(&mut black, &mut white);
                (black, white)
            })
            .collect::<Vec<_>>();

        std::thread::scope(|s| {
            for (black, _white) in games.iter_mut() {
                s.spawn(move || {
                    black.run_many(vec![Position::default()]);
                });
            }
        });

        let batch_sizes = stub.batch_sizes();
        assert_eq!(batch_sizes.iter().sum::<usize>(), 4);
        assert!(batch_sizes.iter().all(|size| *size >= 2), "{batch_sizes:?}");

        for (black, white) in games.iter_mut() {
            BatchingModelFactory::end_game(black, white);
        }
    }

    #[test]
    fn one_backend_call_per_model() {
        let stub = StubModel::new("stub");
        let factory = BatchingModelFactory::new("cpu", 1, StubLoader::new(stub.clone()));
        let key_a = factory.load("a.onnx").unwrap();
        let key_b = factory.load("b.onnx").unwrap();
        assert_ne!(key_a, key_b);
        assert_eq!(factory.load("a.onnx").unwrap(), key_a);
        assert_eq!(factory.model_name(key_b), "b");

        let mut game1 = (factory.new_model(key_a), factory.new_model(key_b));
        let mut game2 = (factory.new_model(key_a), factory.new_model(key_b));
        BatchingModelFactory::start_game(&mut game1.0, &mut game1.1);
        BatchingModelFactory::start_game(&mut game2.0, &mut game2.1);

        std::thread::scope(|s| {
            let a = &mut game1.0;
            let b = &mut game2.1;
            s.spawn(move || {
                assert_eq!(a.name(), "a");
                a.run_many(vec![Position::default()]);
            });
            s.spawn(move || {
                assert_eq!(b.name(), "b");
                b.run_many(vec![Position::default()]);
            });
        });

        assert_eq!(stub.batch_sizes(), vec![1, 1]);
        assert_eq!(
            factory.stats(),
            BatchStats {
                batches: 2,
                requests: 2,
                positions: 2,
            }
        );
        BatchingModelFactory::end_game(&mut game1.0, &mut game1.1);
        BatchingModelFactory::end_game(&mut game2.0, &mut game2.1);
    }

    #[test]
    fn cross_device_games_do_not_deadlock() {
        let stub = StubModel::new("stub");
        let loader = StubLoader::new(stub.clone());
        let factory1 = BatchingModelFactory::new("gpu0", 1, loader.clone());
        let factory2 = BatchingModelFactory::new("gpu1", 1, loader.clone());
        let key1 = factory1.load("eval.onnx").unwrap();
        let key2 = factory2.load("target.onnx").unwrap();
        assert_eq!(loader.loaded_devices(), vec!["gpu0", "gpu1"]);

        let mut game1 = (factory1.new_model(key1), factory2.new_model(key2));
        let mut game2 = (factory2.new_model(key2), factory1.new_model(key1));
        BatchingModelFactory::start_game(&mut game1.0, &mut game1.1);
        BatchingModelFactory::start_game(&mut game2.0, &mut game2.1);
        assert_eq!(factory1.live_games(), 2);
        assert_eq!(factory2.live_games(), 2);

        /* Game 1 waits on factory 1 while game 2 waits on factory 2, then each game ends */
        let (tx, rx) = mpsc::channel();
        let workers = [(1, game1), (2, game2)].map(|(game_id, (mut black, mut white))| {
            let tx = tx.clone();
            std::thread::spawn(move || {
                black.run_many(vec![Position::default()]);
                BatchingModelFactory::end_game(&mut black, &mut white);
                tx.send(game_id).unwrap();
            })
        });

        let mut done = vec![
            rx.recv_timeout(Duration::from_secs(10)).unwrap(),
            rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        ];
        done.sort();
        assert_eq!(done, vec![1, 2]);
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(stub.batch_sizes(), vec![1, 1]);
        assert_eq!(factory1.stats().batches, 1);
        assert_eq!(factory2.stats().batches, 1);
        assert_eq!(factory1.live_games(), 0);
        assert_eq!(factory2.live_games(), 0);
    }

    #[test]
    fn game_counts_again_after_its_remote_request() {
        let stub = StubModel::new("stub");
        let loader = StubLoader::new(stub.clone());
        let gpu0 = BatchingModelFactory::new("gpu0", 1, loader.clone());
        let gpu1 = BatchingModelFactory::new("gpu1", 1, loader);
        let key0 = gpu0.load("eval.onnx").unwrap();
        let key1 = gpu1.load("target.onnx").unwrap();

        /* Game A is local to gpu0, game C is local to gpu1 and idle, game B spans both */
        let mut game_a = (gpu0.new_model(key0), gpu0.new_model(key0));
        let mut game_b = (gpu1.new_model(key1), gpu0.new_model(key0));
        let mut game_c = (gpu1.new_model(key1), gpu1.new_model(key1));
        for game in [&mut game_a, &mut game_b, &mut game_c] {
            BatchingModelFactory::start_game(&mut game.0, &mut game.1);
        }

        let (b_tx, b_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let (mut black_b, mut white_b) = game_b;
        let worker_b = std::thread::spawn(move || {
            black_b.run_many(vec![Position::default()]);
            b_tx.send(()).unwrap();
            go_rx.recv().unwrap();
            white_b.run_many(vec![Position::default()]);
            (black_b, white_b)
        });

        let request = |mut model: BatchingModel| {
            let (tx, rx) = mpsc::channel();
            let worker = std::thread::spawn(move || {
                model.run_many(vec![Position::default()]);
                tx.send(()).unwrap();
                model
            });
            (worker, rx)
        };

        /* B waits on gpu1 behind the idle game, gpu0 runs A alone */
        assert!(b_rx.recv_timeout(Duration::from_millis(200)).is_err());
        let (mut black_a, white_a) = game_a;
        let (worker_a, a_rx) = request(black_a);
        a_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        black_a = worker_a.join().unwrap();

        /* Once the idle game ends B's request runs and B is present on gpu0 again */
        BatchingModelFactory::end_game(&mut game_c.0, &mut game_c.1);
        b_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let (worker_a, a_rx) = request(black_a);
        assert!(a_rx.recv_timeout(Duration::from_millis(200)).is_err());

        /* B's next request on gpu0 completes the batch */
        go_tx.send(()).unwrap();
        a_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let mut game_a = (worker_a.join().unwrap(), white_a);
        let mut game_b = worker_b.join().unwrap();
        assert_eq!(stub.batch_sizes(), vec![1, 1, 2]);
        assert_eq!(
            gpu0.stats(),
            BatchStats {
                batches: 2,
                requests: 3,
                positions: 3,
            }
        );

        BatchingModelFactory::end_game(&mut game_a.0, &mut game_a.1);
        BatchingModelFactory::end_game(&mut game_b.0, &mut game_b.1);
        assert_eq!(gpu0.live_games(), 0);
        assert_eq!(gpu1.live_games(), 0);
    }

    #[test]
    fn load_failure() {
        let factory = BatchingModelFactory::new("cpu", 1, StubLoader::new(StubModel::new("stub")));
        assert!(factory.load("missing.onnx").is_err());
    }

    #[test]
    #[should_panic]
    fn end_game_without_start() {
        let factory = BatchingModelFactory::new("cpu", 1, StubLoader::new(StubModel::new("stub")));
        let key = factory.load("a.onnx").unwrap();
        let mut black = factory.new_model(key);
        let mut white = factory.new_model(key);
        BatchingModelFactory::end_game(&mut black, &mut white);
    }

    #[test]
    #[should_panic]
    fn start_game_twice() {
        let factory = BatchingModelFactory::new("cpu", 1, StubLoader::new(StubModel::new("stub")));
        let key = factory.load("a.onnx").unwrap();
        let mut black = factory.new_model(key);
        let mut white = factory.new_model(key);
        BatchingModelFactory::start_game(&mut black, &mut white);
        BatchingModelFactory::start_game(&mut black, &mut white);
    }

    #[test]
    #[should_panic]
    fn request_outside_of_game() {
        let factory = BatchingModelFactory::new("cpu", 1, StubLoader::new(StubModel::new("stub")));
        let key = factory.load("a.onnx").unwrap();
        let mut model = factory.new_model(key);
        model.run_many(vec![Position::default()]);
    }
}
