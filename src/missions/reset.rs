//! Mission reset policy
//!
//! Decides when freshly assigned missions expire and prunes the ones that have.
//!
//! Modes:
//! * `per_map`: no expiry timestamp; every map change wipes and refills the set.
//! * `instant`: no expiry timestamp; a completed mission is replaced right away.
//! * `daily` / `weekly` / `monthly`: expiry is "assignment time + interval".
//!
//! The periodic scan itself is driven by the engine timers; this module only
//! holds the math and the storage sweep.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::missions::errors::MissionError;
use crate::missions::storage::MissionStorage;
use crate::missions::types::{MissionId, PlayerMission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    PerMap,
    Instant,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl ResetMode {
    /// Expiration timestamp for a mission assigned at `now`.
    pub fn expiration_for(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ResetMode::PerMap | ResetMode::Instant => None,
            ResetMode::Daily => Some(now + Duration::days(1)),
            ResetMode::Weekly => Some(now + Duration::days(7)),
            ResetMode::Monthly => Some(
                now.checked_add_months(Months::new(1))
                    .unwrap_or_else(|| now + Duration::days(30)),
            ),
        }
    }

    pub fn uses_expiration(self) -> bool {
        !matches!(self, ResetMode::PerMap | ResetMode::Instant)
    }

    /// Whether the overview should show days as well as hours and minutes.
    pub fn shows_days(self) -> bool {
        matches!(self, ResetMode::Weekly | ResetMode::Monthly)
    }
}

impl fmt::Display for ResetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResetMode::PerMap => "per_map",
            ResetMode::Instant => "instant",
            ResetMode::Daily => "daily",
            ResetMode::Weekly => "weekly",
            ResetMode::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

impl FromStr for ResetMode {
    type Err = MissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_map" | "permap" | "map" => Ok(ResetMode::PerMap),
            "instant" => Ok(ResetMode::Instant),
            "daily" => Ok(ResetMode::Daily),
            "weekly" => Ok(ResetMode::Weekly),
            "monthly" => Ok(ResetMode::Monthly),
            other => Err(MissionError::Internal(format!("unknown reset mode '{}'", other))),
        }
    }
}

/// Time left until a deadline, clamped at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRemaining {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

pub fn time_until_expiration(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> TimeRemaining {
    let left = (expires_at - now).max(Duration::zero());
    TimeRemaining {
        days: left.num_days(),
        hours: left.num_hours() % 24,
        minutes: left.num_minutes() % 60,
    }
}

/// Remove missions whose deadline passed from `missions`, returning them.
pub fn take_expired(missions: &mut Vec<PlayerMission>, now: DateTime<Utc>) -> Vec<PlayerMission> {
    let mut expired = Vec::new();
    missions.retain(|mission| {
        if mission.is_expired(now) {
            expired.push(mission.clone());
            false
        } else {
            true
        }
    });
    expired
}

/// Statistics for one storage sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired_found: usize,
    pub removed: usize,
}

/// Delete every stored mission whose deadline passed, including those of
/// players that are not online.
pub fn sweep_expired(storage: &dyn MissionStorage, now: DateTime<Utc>) -> Result<SweepStats, MissionError> {
    let expired = storage.list_expired(now)?;
    let mut stats = SweepStats {
        expired_found: expired.len(),
        ..SweepStats::default()
    };
    if expired.is_empty() {
        debug!("expiry sweep: nothing to remove");
        return Ok(stats);
    }
    let ids: Vec<MissionId> = expired.iter().map(|record| record.id).collect();
    storage.remove(&ids)?;
    stats.removed = ids.len();
    info!("expiry sweep: removed {} expired missions", stats.removed);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::missions::types::MissionDefinition;
    use chrono::TimeZone;

    #[test]
    fn per_map_and_instant_never_expire() {
        let now = Utc::now();
        assert_eq!(ResetMode::PerMap.expiration_for(now), None);
        assert_eq!(ResetMode::Instant.expiration_for(now), None);
        assert!(!ResetMode::Instant.uses_expiration());
    }

    #[test]
    fn interval_modes_add_their_interval() {
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        assert_eq!(ResetMode::Daily.expiration_for(now), Some(now + Duration::days(1)));
        assert_eq!(ResetMode::Weekly.expiration_for(now), Some(now + Duration::days(7)));
        // month arithmetic clamps to the last day of February
        assert_eq!(
            ResetMode::Monthly.expiration_for(now),
            Some(Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("per-map".parse::<ResetMode>().unwrap(), ResetMode::PerMap);
        assert_eq!("Weekly".parse::<ResetMode>().unwrap(), ResetMode::Weekly);
        assert!("hourly".parse::<ResetMode>().is_err());
        assert_eq!(ResetMode::PerMap.to_string(), "per_map");
    }

    #[test]
    fn remaining_time_splits_and_clamps() {
        let now = Utc::now();
        let left = time_until_expiration(now + Duration::days(2) + Duration::hours(3) + Duration::minutes(4), now);
        assert_eq!(left, TimeRemaining { days: 2, hours: 3, minutes: 4 });
        let past = time_until_expiration(now - Duration::hours(1), now);
        assert_eq!(past, TimeRemaining { days: 0, hours: 0, minutes: 0 });
    }

    #[test]
    fn take_expired_keeps_live_missions() {
        let now = Utc::now();
        let def = MissionDefinition::new("PlayTime", "UserId", 10, "play");
        let mut missions = vec![
            def.instantiate(Some(now - Duration::minutes(1))),
            def.instantiate(Some(now + Duration::minutes(1))),
            def.instantiate(None),
        ];
        let expired = take_expired(&mut missions, now);
        assert_eq!(expired.len(), 1);
        assert_eq!(missions.len(), 2);
    }
}
