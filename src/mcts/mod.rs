
use itertools::Itertools;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Dirichlet, Distribution};
use std::time::Instant;

use crate::game::Game;
use crate::go::{Coord, IllegalMove, Position, NUM_MOVES};
use crate::model::Model;
use crate::util::metrics::RunningAverage;

#[derive(Clone, Debug)]
pub struct PlayerOptions {
    /// Readouts per move
    pub num_readouts: u32,
    /// Number of leaves selected and evaluated together in a single search
    pub virtual_losses: u32,
    /// Mix Dirichlet noise into the root priors
    pub inject_noise: bool,
    pub random_seed: u64,
    /// Subtracted from the parent's Q to get the Q of an unvisited child
    pub value_init_penalty: f32,
    pub explore_factor: f32,
    pub noise_alpha: f32,
    pub noise_epsilon: f32,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            num_readouts: 100,
            virtual_losses: 8,
            inject_noise: false,
            random_seed: 0,
            value_init_penalty: 2.0,
            explore_factor: std::f32::consts::SQRT_2,
            noise_alpha: 0.03,
            noise_epsilon: 0.25,
        }
    }
}

#[derive(Clone)]
struct MctsNode {
    /// Computed when the node is first visited
    position: Option<Position>,

    /// In range [0, 1], "probability"
    prior: f32,

    /// This is the variable n from UCT formula
    n: u32,

    /// Sum of the values backed up through this node, from black's perspective
    w: f32,

    virtual_losses: u32,
    expanded: bool,
}

impl MctsNode {
    fn new(prior: f32) -> Self {
        Self {
            position: None,
            prior,
            n: 0,
            w: 0.0,
            virtual_losses: 0,
            expanded: false,
        }
    }

    fn from_position(position: Position) -> Self {
        Self {
            position: Some(position),
            ..Self::new(1.0)
        }
    }

    /// Q from black's perspective, 0 for unvisited nodes
    fn q(&self) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            self.w / self.n as f32
        }
    }
}

/// Monte Carlo Tree Search player over a single `Model` handle.
///
/// The player keeps its own copy of the game position at the root of its tree. Moves of both
/// sides must be relayed through `play_move` and `play_opponents_move` to keep it in sync.
pub struct MctsPlayer<M: Model> {
    model: M,
    options: PlayerOptions,
    tree: DiGraph<MctsNode, Coord>,
    root: NodeIndex,
    rng: StdRng,
    /// Number of positions evaluated by the model
    inferences: usize,
    search_duration_metric: RunningAverage,
}

impl<M: Model> MctsPlayer<M> {
    pub fn new(model: M, options: PlayerOptions, position: &Position) -> Self {
        assert!(options.virtual_losses > 0);
        assert!(options.explore_factor >= 0.0);
        assert!(options.noise_alpha >= 0.0);
        assert!((0.0..=1.0).contains(&options.noise_epsilon));

        let search_duration_metric_name = "mcts.search_duration";
        metrics::describe_gauge!(
            search_duration_metric_name,
            metrics::Unit::Seconds,
            "Duration of MCTS search"
        );
        let search_duration_metric = RunningAverage::new(0.99, metrics::gauge!(search_duration_metric_name));

        let mut tree = DiGraph::new();
        let root = tree.add_node(MctsNode::from_position(position.clone()));
        Self {
            model,
            rng: StdRng::seed_from_u64(options.random_seed),
            options,
            tree,
            root,
            inferences: 0,
            search_duration_metric,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn root_position(&self) -> &Position {
        self.position(self.root)
    }

    pub fn root_n(&self) -> u32 {
        self.tree[self.root].n
    }

    /// The root's Q from black's perspective
    pub fn root_q(&self) -> f32 {
        self.tree[self.root].q()
    }

    /// The root's Q from the perspective of the player to move
    pub fn root_q_perspective(&self) -> f32 {
        self.root_q() * self.root_position().to_play().sign()
    }

    /// Search for `num_readouts` more readouts and return the best move, or `Coord::RESIGN` if
    /// the position is hopeless and resignation is enabled.
    pub fn suggest_move(&mut self, game: &Game, num_readouts: u32) -> Coord {
        debug_assert_eq!(game.position(), self.root_position());
        let search_start_time = Instant::now();

        /* The first search only expands the root */
        if !self.tree[self.root].expanded {
            self.tree_search();
        }
        let target = self.root_n() + num_readouts;
        while self.root_n() < target {
            self.tree_search();
        }

        self.search_duration_metric
            .set(search_start_time.elapsed().as_secs_f64());

        let options = game.options();
        if options.resign_enabled && self.root_q_perspective() < options.resign_threshold {
            return Coord::RESIGN;
        }

        let (_, c) = self
            .children(self.root)
            .into_iter()
            .max_by(|(child1, _), (child2, _)| {
                let (child1, child2) = (&self.tree[*child1], &self.tree[*child2]);
                child1
                    .n
                    .cmp(&child2.n)
                    .then(child1.prior.total_cmp(&child2.prior))
            })
            .unwrap_or_else(|| panic!("expanded root has no children"));
        c
    }

    /// Commit our own move to the game and advance the tree
    pub fn play_move(&mut self, game: &mut Game, c: Coord) -> Result<(), IllegalMove> {
        let comment = format!("N: {}, Q: {:.4}", self.root_n(), self.root_q());
        game.add_move(c, comment)?;
        if c != Coord::RESIGN {
            self.advance_root(c)?;
        }
        Ok(())
    }

    /// Advance the tree by a move the opponent already committed to the game
    pub fn play_opponents_move(&mut self, c: Coord) -> Result<(), IllegalMove> {
        if c == Coord::RESIGN {
            return Err(IllegalMove::Resign);
        }
        self.advance_root(c)
    }

    /// A short summary of the search at the root
    pub fn describe(&self) -> String {
        let root = &self.tree[self.root];
        let mut desc = format!(
            "{:.4} ({} readouts), {} inferences",
            root.q(),
            root.n,
            self.inferences
        );
        let best = self
            .children(self.root)
            .into_iter()
            .map(|(child, c)| (&self.tree[child], c))
            .sorted_by(|(child1, _), (child2, _)| {
                child2
                    .n
                    .cmp(&child1.n)
                    .then(child2.prior.total_cmp(&child1.prior))
            })
            .take(5);
        for (child, c) in best {
            desc.push_str(&format!(
                "\n{:>6}: N {:>5} Q {:>7.4} P {:.4}",
                c.to_gtp(),
                child.n,
                child.q(),
                child.prior
            ));
        }
        desc
    }

    /// `<model>(<positions evaluated>)`
    pub fn inference_summary(&self) -> String {
        format!("{}({})", self.model.name(), self.inferences)
    }

    fn position(&self, node: NodeIndex) -> &Position {
        self.tree[node]
            .position
            .as_ref()
            .unwrap_or_else(|| panic!("node {} was never visited", node.index()))
    }

    fn children(&self, node: NodeIndex) -> Vec<(NodeIndex, Coord)> {
        self.tree
            .edges(node)
            .map(|edge| (edge.target(), *edge.weight()))
            .collect_vec()
    }

    /// Select up to `virtual_losses` leaves, evaluate them in a single model call and back up the
    /// results
    fn tree_search(&mut self) {
        let mut leaves: Vec<Vec<NodeIndex>> = vec![];
        for _ in 0..self.options.virtual_losses {
            let path = self.select_leaf();
            let leaf = *path.last().unwrap_or(&self.root);

            let position = self.position(leaf);
            if position.is_game_over() {
                let score = position.calculate_score();
                let value = if score > 0.0 {
                    1.0
                } else if score < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                self.backup(&path, value);
                continue;
            }

            /* Selection converged on an already chosen leaf */
            if leaves.iter().any(|l| l.last() == Some(&leaf)) {
                break;
            }
            self.add_virtual_loss(&path);
            leaves.push(path);
        }
        if leaves.is_empty() {
            return;
        }

        let positions = leaves
            .iter()
            .map(|path| self.position(path[path.len() - 1]).clone())
            .collect_vec();
        let outputs = self.model.run_many(positions);
        assert_eq!(
            outputs.len(),
            leaves.len(),
            "model {} returned a wrong number of outputs",
            self.model.name()
        );
        self.inferences += leaves.len();

        for (path, output) in leaves.into_iter().zip(outputs) {
            self.revert_virtual_loss(&path);
            let leaf = path[path.len() - 1];
            self.expand(leaf, &output.policy);
            let value = output.value * self.position(leaf).to_play().sign();
            self.backup(&path, value);
        }
    }

    /* Return path from the root to the selected leaf node */
    fn select_leaf(&mut self) -> Vec<NodeIndex> {
        let mut path = vec![self.root];
        let mut node_id = self.root;
        loop {
            let node = &self.tree[node_id];
            if !node.expanded || self.position(node_id).is_game_over() {
                return path;
            }

            let (edge_id, child_id) = self
                .tree
                .edges(node_id)
                .map(|edge| (edge.id(), edge.target()))
                .max_by(|(_, c1), (_, c2)| {
                    let val1 = self.calc_selection_heuristic(node_id, *c1);
                    let val2 = self.calc_selection_heuristic(node_id, *c2);
                    val1.total_cmp(&val2)
                })
                .unwrap_or_else(|| panic!("expanded node has no children"));

            self.materialize(node_id, edge_id, child_id);
            path.push(child_id);
            node_id = child_id;
        }
    }

    fn materialize(&mut self, parent_id: NodeIndex, edge_id: EdgeIndex, child_id: NodeIndex) {
        if self.tree[child_id].position.is_some() {
            return;
        }
        let c = self.tree[edge_id];
        let mut position = self.position(parent_id).clone();
        position
            .play(c)
            .unwrap_or_else(|err| panic!("illegal move in search tree: {err}"));
        self.tree[child_id].position = Some(position);
    }

    fn calc_selection_heuristic(&self, parent_id: NodeIndex, child_id: NodeIndex) -> f32 {
        let parent = &self.tree[parent_id];
        let child = &self.tree[child_id];
        let sign = self.position(parent_id).to_play().sign();

        let child_n = child.n + child.virtual_losses;
        let exploit = if child_n == 0 {
            (parent.q() * sign - self.options.value_init_penalty).clamp(-1.0, 1.0)
        } else {
            (child.w * sign - child.virtual_losses as f32) / child_n as f32
        };

        let parent_n = (parent.n + parent.virtual_losses).max(1);
        let explore = self.options.explore_factor * child.prior * ((parent_n as f32).sqrt() / (1 + child_n) as f32);

        exploit + explore
    }

    fn expand(&mut self, node_id: NodeIndex, policy: &[f32]) {
        if self.tree[node_id].expanded {
            return;
        }
        assert_eq!(policy.len(), NUM_MOVES, "unexpected policy length");

        let moves = self.position(node_id).legal_moves();
        let mut priors = moves
            .iter()
            .map(|c| {
                let p = policy[c.to_idx()];
                if p.is_finite() {
                    p.max(0.0)
                } else {
                    0.0
                }
            })
            .collect_vec();
        let priors_sum: f32 = priors.iter().sum();
        if priors_sum > 0.0 {
            priors.iter_mut().for_each(|p| *p /= priors_sum);
        } else {
            let uniform = 1.0 / priors.len() as f32;
            priors.iter_mut().for_each(|p| *p = uniform);
        }

        for (c, prior) in moves.into_iter().zip(priors) {
            let child_id = self.tree.add_node(MctsNode::new(prior));
            self.tree.add_edge(node_id, child_id, c);
        }
        self.tree[node_id].expanded = true;

        if node_id == self.root {
            self.add_dirichlet_noise(node_id);
        }
    }

    fn backup(&mut self, path: &[NodeIndex], value: f32) {
        for node_id in path {
            let node = &mut self.tree[*node_id];
            node.n += 1;
            node.w += value;
        }
    }

    fn add_virtual_loss(&mut self, path: &[NodeIndex]) {
        for node_id in path {
            self.tree[*node_id].virtual_losses += 1;
        }
    }

    fn revert_virtual_loss(&mut self, path: &[NodeIndex]) {
        for node_id in path {
            let node = &mut self.tree[*node_id];
            assert!(node.virtual_losses > 0);
            node.virtual_losses -= 1;
        }
    }

    fn advance_root(&mut self, c: Coord) -> Result<(), IllegalMove> {
        let child = self
            .tree
            .edges(self.root)
            .find(|edge| *edge.weight() == c)
            .map(|edge| (edge.id(), edge.target()));
        match child {
            Some((edge_id, child_id)) => {
                self.materialize(self.root, edge_id, child_id);
                self.remove_all_but_subtree(child_id);
            }
            None => {
                let mut position = self.root_position().clone();
                position.play(c)?;
                self.tree.clear();
                self.root = self.tree.add_node(MctsNode::from_position(position));
            }
        }
        Ok(())
    }

    fn remove_all_but_subtree(&mut self, sub_tree_root: NodeIndex) {
        // In petgraph, when you remove a node, the indices of the other nodes
        // change. So instead of removing nodes from the current tree, we copy
        // the sub tree to a new graph
        let mut new_tree = DiGraph::new();
        let new_root = new_tree.add_node(self.tree[sub_tree_root].clone());
        let mut nodes = vec![(sub_tree_root, new_root)];

        while let Some((parent_old, parent_new)) = nodes.pop() {
            for edge in self.tree.edges(parent_old) {
                let child_old = edge.target();
                let child_new = new_tree.add_node(self.tree[child_old].clone());
                new_tree.add_edge(parent_new, child_new, *edge.weight());
                nodes.push((child_old, child_new));
            }
        }

        self.tree = new_tree;
        self.root = new_root;

        /* If the prior probabilities of the new root were already calculated, add a Dirichlet noise */
        if self.tree[new_root].expanded {
            self.add_dirichlet_noise(new_root);
        }
    }

    fn add_dirichlet_noise(&mut self, node_id: NodeIndex) {
        if !self.options.inject_noise || self.options.noise_alpha == 0.0 || self.options.noise_epsilon == 0.0 {
            return;
        }

        let children = self.tree.neighbors(node_id).collect_vec();
        if children.len() < 2 {
            return;
        }

        let dist = match Dirichlet::new(&vec![self.options.noise_alpha; children.len()]) {
            Ok(dist) => dist,
            Err(err) => {
                log::warn!("Invalid Dirichlet noise parameters: {err}");
                return;
            }
        };
        /* Keep drawing random noises until valid values are achieved */
        let noise_vec = loop {
            let noise_vec = dist.sample(&mut self.rng);
            if noise_vec.iter().all(|n| n.is_finite()) {
                break noise_vec;
            }
        };

        let epsilon = self.options.noise_epsilon;
        for (child_id, noise) in children.into_iter().zip(noise_vec) {
            let child = &mut self.tree[child_id];
            child.prior = (1.0 - epsilon) * child.prior + epsilon * noise;
        }
    }
}
