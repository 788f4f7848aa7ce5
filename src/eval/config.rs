use std::path::PathBuf;

/// Options of an evaluation run, parsed once from the command line
#[derive(clap::Args, Clone, Debug)]
pub struct EvalConfig {
    /// Path of the model being evaluated, `uniform` for the built-in model
    #[clap(long)]
    pub eval_model: String,
    #[clap(long, default_value = "")]
    pub eval_device: String,
    #[clap(long, default_value = "100")]
    pub num_eval_readouts: u32,

    /// Path of the model to evaluate against
    #[clap(long)]
    pub target_model: String,
    #[clap(long, default_value = "")]
    pub target_device: String,
    #[clap(long, default_value = "100")]
    pub num_target_readouts: u32,

    /// Number of games played concurrently, one thread per game
    #[clap(long, default_value = "32")]
    pub parallel_games: usize,
    #[clap(long, default_value = "8")]
    pub virtual_losses: u32,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub resign_enabled: bool,
    #[clap(long, default_value = "-0.999", allow_negative_numbers = true)]
    pub resign_threshold: f32,
    #[clap(long, default_value = "2.0")]
    pub value_init_penalty: f32,

    /// Base random seed, 0 picks one from the clock
    #[clap(long, default_value = "0")]
    pub seed: u64,

    /// Directory for SGF records, empty to skip writing them
    #[clap(long, default_value = "")]
    pub sgf_dir: String,
    /// Table to append game records to, `project,instance,table`
    #[clap(long, default_value = "")]
    pub output_bigtable: String,
    #[clap(long, default_value = "")]
    pub bigtable_tag: String,
    /// Local directory holding the table record files
    #[clap(long, default_value = "tables")]
    pub table_root: PathBuf,

    /// Number of batches a factory may run concurrently
    #[clap(long, default_value = "1")]
    pub buffer_count: usize,

    #[clap(long)]
    pub verbose: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            eval_model: String::new(),
            eval_device: String::new(),
            num_eval_readouts: 100,
            target_model: String::new(),
            target_device: String::new(),
            num_target_readouts: 100,
            parallel_games: 32,
            virtual_losses: 8,
            resign_enabled: true,
            resign_threshold: -0.999,
            value_init_penalty: 2.0,
            seed: 0,
            sgf_dir: String::new(),
            output_bigtable: String::new(),
            bigtable_tag: String::new(),
            table_root: PathBuf::from("tables"),
            buffer_count: 1,
            verbose: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("invalid table spec '{0}', expected 'project,instance,table'")]
    InvalidTableSpec(String),
    #[error("failed to load model '{path}': {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("parallel games must be positive")]
    NoGames,
    #[error("buffer count must be positive")]
    NoBuffers,
    #[error("virtual losses must be positive")]
    NoVirtualLosses,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
