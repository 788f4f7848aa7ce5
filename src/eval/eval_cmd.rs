use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::eval::config::EvalConfig;
use crate::eval::win_stats::WinStats;
use crate::eval::Evaluator;
use crate::model::backend::DefaultLoader;
use crate::util;

#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
struct EvalArgs {
    #[clap(flatten)]
    config: EvalConfig,
    /// Write the win stats of both models to this file as JSON
    #[clap(long)]
    summary_file: Option<PathBuf>,
}

pub fn run_main() -> anyhow::Result<()> {
    util::init_globals();
    let args = EvalArgs::parse();

    let evaluator = Evaluator::new(&args.config, Arc::new(DefaultLoader))?;
    let results = evaluator.run()?;

    if let Some(summary_file) = args.summary_file {
        let model_summary = |(name, stats): &(String, WinStats)| {
            let mut summary = stats.to_json();
            summary["name"] = name.as_str().into();
            summary
        };
        let batch_stats = evaluator.batch_stats();
        fs::write(
            &summary_file,
            json::object! {
                eval: model_summary(&results[0]),
                target: model_summary(&results[1]),
                games: args.config.parallel_games,
                batches: batch_stats.batches,
                batch_size_average: batch_stats.average_batch_size(),
            }
            .dump(),
        )?;
        log::info!("Wrote summary to {}", summary_file.display());
    }

    Ok(())
}
