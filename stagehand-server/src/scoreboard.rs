use log::warn;
use serde_json::Value;
use stagehand_core::Scoreboard;
use std::sync::{Arc, RwLock};

use crate::error::EngineError;
use crate::file_output::FileOutputs;
use crate::push::{Push, ScoreboardMessage};

pub const SCOREBOARD_JSON: &str = "scoreboard.json";
pub const SCOREBOARD_TXT: &str = "scoreboard.txt";

/// The live scoreboard. Also the metadata source for recordings.
#[derive(Clone)]
pub struct ScoreboardStore {
    current: Arc<RwLock<Scoreboard>>,
    outputs: FileOutputs,
    push: Push,
}

impl ScoreboardStore {
    pub fn new(outputs: FileOutputs, push: Push) -> ScoreboardStore {
        ScoreboardStore {
            current: Arc::new(RwLock::new(Scoreboard::default())),
            outputs,
            push,
        }
    }

    pub fn get(&self) -> Scoreboard {
        self.current.read().unwrap().clone()
    }

    /// Metadata attached to a recording when it stops.
    pub fn snapshot(&self) -> Scoreboard {
        self.get()
    }

    pub fn set(&self, scoreboard: Scoreboard) -> Scoreboard {
        let mut current = self.current.write().unwrap();
        *current = scoreboard;
        self.publish(&current);
        current.clone()
    }

    pub fn patch(&self, patch: &Value) -> Result<Scoreboard, EngineError> {
        let mut current = self.current.write().unwrap();
        current
            .patch(patch)
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        self.publish(&current);
        Ok(current.clone())
    }

    fn publish(&self, scoreboard: &Scoreboard) {
        self.push.send(&ScoreboardMessage { scoreboard });

        let written = serde_json::to_value(scoreboard)
            .map_err(std::io::Error::from)
            .and_then(|value| self.outputs.write_json(SCOREBOARD_JSON, &value))
            .and_then(|_| self.outputs.write_text(SCOREBOARD_TXT, &scoreboard.display_name()));
        if let Err(e) = written {
            warn!("Cannot write scoreboard outputs: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_patch_publishes_and_writes() {
        let temp = TempDir::new().unwrap();
        let push = Push::new();
        let mut rx = push.subscribe();
        let store = ScoreboardStore::new(FileOutputs::new(temp.path()), push);

        let board = store
            .patch(&json!({
                "game": "melee",
                "round": "Grand Final",
                "players": [{"name": "Alice", "score": 2}, {"name": "Bob", "score": 1}]
            }))
            .unwrap();
        assert_eq!(board.display_name(), "Alice vs Bob - Grand Final");
        assert_eq!(store.snapshot(), board);

        let message: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(message["scoreboard"]["game"], "melee");

        let text = fs::read_to_string(temp.path().join(SCOREBOARD_TXT)).unwrap();
        assert_eq!(text, "Alice vs Bob - Grand Final");
        let json: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join(SCOREBOARD_JSON)).unwrap()).unwrap();
        assert_eq!(json["players"][1]["name"], "Bob");
    }

    #[test]
    fn test_bad_patch_is_rejected() {
        let temp = TempDir::new().unwrap();
        let store = ScoreboardStore::new(FileOutputs::new(temp.path()), Push::new());
        store.patch(&json!({"round": "Pools"})).unwrap();

        let result = store.patch(&json!({"players": "not a list"}));
        assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
        assert_eq!(store.get().round.as_deref(), Some("Pools"));
    }
}
