//! Wave history and the single current-wave state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{UserId, WaveId};

/// Status of the current distribution cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    Idle,
    /// Tickets are being uploaded; awaiting operator confirmation.
    Preparing,
    Active,
}

impl WaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveStatus::Idle => "idle",
            WaveStatus::Preparing => "awaiting_confirm",
            WaveStatus::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(WaveStatus::Idle),
            "awaiting_confirm" | "preparing" => Some(WaveStatus::Preparing),
            "active" => Some(WaveStatus::Active),
            _ => None,
        }
    }
}

impl fmt::Display for WaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single current-wave state row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveState {
    pub status: WaveStatus,
    /// When the current preparation began.
    pub prepared_at: Option<u64>,
    /// Start time of the active wave.
    pub wave_start: Option<u64>,
    /// Id of the active wave.
    pub wave_id: Option<WaveId>,
}

impl WaveState {
    pub fn idle() -> Self {
        Self {
            status: WaveStatus::Idle,
            prepared_at: None,
            wave_start: None,
            wave_id: None,
        }
    }

    /// Active wave id and start, if a wave is active.
    pub fn active(&self) -> Option<(WaveId, u64)> {
        match (self.status, self.wave_id, self.wave_start) {
            (WaveStatus::Active, Some(id), Some(start)) => Some((id, start)),
            _ => None,
        }
    }
}

/// A historical wave record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub id: WaveId,
    pub started_at: u64,
    pub created_by: UserId,
    pub confirmed_at: u64,
}
