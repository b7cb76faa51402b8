//! Game-end records as emitted by the log server.
//!
//! Fields are optional on the wire so one broken game is skipped instead of
//! rejecting the whole request. Unknown fields are ignored.

use serde::{Deserialize, Serialize};

use crate::constants::{BALANCE_SEGMENT_INDEX, DRAFT_ROUNDS, PATCH_VERSION_SEGMENTS};

/// One ingestion request: a batch of finished games.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub data: Vec<GameEndRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndRecord {
    #[serde(default)]
    pub game_id: Option<String>,
    #[serde(default)]
    pub patch_version: Option<String>,
    #[serde(default)]
    pub map_id: Option<i32>,
    #[serde(default)]
    pub player_count: Option<i32>,
    #[serde(default)]
    pub player_logs: Vec<PlayerLog>,
}

impl GameEndRecord {
    /// Identifier used in log lines.
    #[must_use]
    pub fn label(&self) -> &str {
        self.game_id.as_deref().unwrap_or("<unknown>")
    }

    /// Third dot-separated segment of the client patch string, if present.
    #[must_use]
    pub fn balance_patch(&self) -> Option<&str> {
        let raw = self.patch_version.as_deref()?;
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() < PATCH_VERSION_SEGMENTS {
            return None;
        }
        segments.get(BALANCE_SEGMENT_INDEX).copied()
    }

    /// Highest total score among the players.
    #[must_use]
    pub fn winner_score(&self) -> Option<i64> {
        self.player_logs.iter().map(PlayerLog::total_score).max()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLog {
    #[serde(default)]
    pub class_code: Option<i32>,
    #[serde(default)]
    pub round1_set: Vec<i32>,
    #[serde(default)]
    pub round2_set: Vec<i32>,
    #[serde(default)]
    pub round3_set: Vec<i32>,
    #[serde(default)]
    pub round_rank: Vec<i32>,
    #[serde(default)]
    pub round_score: Vec<i32>,
}

impl PlayerLog {
    #[must_use]
    pub fn total_score(&self) -> i64 {
        self.round_score.iter().map(|&score| i64::from(score)).sum()
    }

    /// Card ids drafted in each round, in round order.
    #[must_use]
    pub fn rounds(&self) -> [&[i32]; DRAFT_ROUNDS] {
        [
            self.round1_set.as_slice(),
            self.round2_set.as_slice(),
            self.round3_set.as_slice(),
        ]
    }
}
