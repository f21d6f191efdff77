//! Scoreboard and commentary state.
//!
//! This is the metadata snapshot attached to a recording when it stops and
//! the source of the bracket identifiers that end up in the archival log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::merge::merge_patch;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default)]
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scoreboard {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_of: Option<u32>,
    pub players: Vec<Player>,
    pub commentators: Vec<String>,
}

impl Scoreboard {
    /// Human readable set name, e.g. `"Alice vs Bob - Winners Final"`.
    pub fn display_name(&self) -> String {
        let names: Vec<&str> = self
            .players
            .iter()
            .map(|p| p.name.trim())
            .filter(|n| !n.is_empty())
            .collect();
        let round = self.round.as_deref().map(str::trim).filter(|r| !r.is_empty());

        match (names.is_empty(), round) {
            (true, None) => String::new(),
            (true, Some(round)) => round.to_string(),
            (false, None) => names.join(" vs "),
            (false, Some(round)) => format!("{} - {}", names.join(" vs "), round),
        }
    }

    /// Apply a JSON merge patch. `null` removes optional fields; lists are
    /// replaced wholesale. On error `self` is left untouched.
    pub fn patch(&mut self, patch: &Value) -> Result<(), serde_json::Error> {
        let mut current = serde_json::to_value(&*self)?;
        merge_patch(&mut current, patch);
        *self = serde_json::from_value(current)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn board() -> Scoreboard {
        Scoreboard {
            game: Some("melee".to_string()),
            round: Some("Winners Final".to_string()),
            players: vec![
                Player { name: "Alice".to_string(), team: None, score: 2 },
                Player { name: "Bob".to_string(), team: Some("TSM".to_string()), score: 1 },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(board().display_name(), "Alice vs Bob - Winners Final");

        let mut b = board();
        b.round = None;
        assert_eq!(b.display_name(), "Alice vs Bob");

        b.players.clear();
        assert_eq!(b.display_name(), "");
        b.round = Some("Pools".to_string());
        assert_eq!(b.display_name(), "Pools");
    }

    #[test]
    fn test_patch() {
        let mut b = board();
        b.patch(&json!({"round": null, "bestOf": 5, "phaseId": "p1"})).unwrap();
        assert_eq!(b.round, None);
        assert_eq!(b.best_of, Some(5));
        assert_eq!(b.phase_id.as_deref(), Some("p1"));
        assert_eq!(b.players.len(), 2);

        let before = b.clone();
        assert!(b.patch(&json!({"bestOf": "three"})).is_err());
        assert_eq!(b, before);
    }

    #[test]
    fn test_lenient_deserialize() {
        let b: Scoreboard = serde_json::from_value(json!({"game": "ssbu"})).unwrap();
        assert_eq!(b.game.as_deref(), Some("ssbu"));
        assert!(b.players.is_empty());
    }
}
