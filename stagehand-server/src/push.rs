//! Push channel to connected observers.
//!
//! Every mutation publishes a full snapshot of the affected collection; there
//! is no delta protocol. Callers publish while still holding the write lock of
//! the collection they mutated, so observers see snapshots in mutation order.

use log::trace;
use serde::Serialize;
use stagehand_core::recording::GroupView;
use stagehand_core::{ClipView, Recording, RecordingGroup, Scoreboard};
use tokio::sync::broadcast;

const PUSH_CHANNEL_CAPACITY: usize = 64;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipsMessage<'a> {
    pub clips: &'a [ClipView],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingsMessage<'a> {
    pub recordings: &'a [Recording],
    pub recording_groups: &'a [RecordingGroup],
    pub grouped: &'a [GroupView],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreboardMessage<'a> {
    pub scoreboard: &'a Scoreboard,
}

#[derive(Clone, Debug)]
pub struct Push {
    tx: broadcast::Sender<String>,
}

impl Default for Push {
    fn default() -> Self {
        Self::new()
    }
}

impl Push {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Push { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn send<T: Serialize>(&self, message: &T) {
        match serde_json::to_string(message) {
            Ok(text) => {
                // No observers is not an error
                let receivers = self.tx.send(text).unwrap_or(0);
                trace!("Pushed update to {} observers", receivers);
            }
            Err(e) => log::error!("Cannot serialize push message: {}", e),
        }
    }
}
