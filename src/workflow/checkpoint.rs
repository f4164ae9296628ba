//! Optional per-turn checkpointing: the complete [`TurnState`] is written
//! after every applied node output, keyed by turn id, so a crashed turn can
//! be inspected or resumed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::workflow::state::TurnState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub turn_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub state: TurnState,
}

pub trait CheckpointStore: Send + Sync {
    fn save(&self, turn_id: Uuid, state: &TurnState) -> Result<()>;
    fn load(&self, turn_id: Uuid) -> Result<Option<Checkpoint>>;
}

/// File-per-turn checkpoint store with atomic writes (temp file + rename).
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir).context("Failed to create checkpoint directory")?;
        Ok(Self { dir })
    }

    fn path_for(&self, turn_id: Uuid) -> PathBuf {
        self.dir.join(format!("{turn_id}.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, turn_id: Uuid, state: &TurnState) -> Result<()> {
        let checkpoint = Checkpoint {
            turn_id,
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let data = serde_json::to_string(&checkpoint)?;
        let path = self.path_for(turn_id);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &data).context("Failed to write checkpoint")?;
        std::fs::rename(&tmp_path, &path).context("Failed to finalize checkpoint")?;
        Ok(())
    }

    fn load(&self, turn_id: Uuid) -> Result<Option<Checkpoint>> {
        let path = self.path_for(turn_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path).context("Failed to read checkpoint")?;
        Ok(Some(serde_json::from_str(&data)?))
    }
}
