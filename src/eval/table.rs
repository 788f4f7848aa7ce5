use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::eval::config::EvalError;
use crate::game::Game;

/// Output name of games for which no SGF record was written
pub const NO_SGF_SAVED: &str = "NO_SGF_SAVED";

/// Destination table of game records
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub project: String,
    pub instance: String,
    pub table: String,
}

impl TableSpec {
    /// Parse `project,instance,table`. An empty string means no table.
    pub fn parse(spec: &str) -> Result<Option<Self>, EvalError> {
        if spec.is_empty() {
            return Ok(None);
        }
        let fields = spec.split(',').map(str::trim).collect::<Vec<_>>();
        match fields[..] {
            [project, instance, table] if fields.iter().all(|f| !f.is_empty()) => Ok(Some(Self {
                project: project.to_string(),
                instance: instance.to_string(),
                table: table.to_string(),
            })),
            _ => Err(EvalError::InvalidTableSpec(spec.to_string())),
        }
    }
}

/// A sink for per-game evaluation records
pub trait RecordStore: Send + Sync {
    fn write_eval_record(&self, spec: &TableSpec, game: &Game, output_name: &str, tag: &str) -> std::io::Result<()>;
}

/// Appends one JSON object per line to `<root>/<project>/<instance>/<table>.jsonl`
pub struct JsonTableStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl JsonTableStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn table_path(&self, spec: &TableSpec) -> PathBuf {
        self.root
            .join(&spec.project)
            .join(&spec.instance)
            .join(format!("{}.jsonl", spec.table))
    }
}

impl RecordStore for JsonTableStore {
    fn write_eval_record(&self, spec: &TableSpec, game: &Game, output_name: &str, tag: &str) -> std::io::Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let row = json::object! {
            black: game.black_name(),
            white: game.white_name(),
            result: game.result_string(),
            length: game.moves().len(),
            sgf: output_name,
            tag: tag,
            timestamp: timestamp,
        };

        let path = self.table_path(spec);
        let _guard = self.lock.lock().unwrap();
        if let Some(dir) = path.parent() {
            if !dir.is_dir() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", row.dump())?;
        log::debug!("Wrote eval record of {} to {}", output_name, path.display());
        Ok(())
    }
}
