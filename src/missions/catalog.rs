//! Mission catalog loading
//!
//! The catalog is a JSON array of mission definitions read once at startup.
//! After loading it is shared read-only between the router and the assignment code.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::missions::errors::MissionError;
use crate::missions::types::MissionDefinition;

/// Immutable, ordered set of mission templates.
#[derive(Debug, Clone, Default)]
pub struct MissionCatalog {
    definitions: Vec<MissionDefinition>,
}

impl MissionCatalog {
    /// Build a catalog from already-parsed definitions, rejecting invalid entries.
    pub fn new(definitions: Vec<MissionDefinition>) -> Result<Self, MissionError> {
        for (index, def) in definitions.iter().enumerate() {
            validate_definition(index, def)?;
        }
        Ok(Self { definitions })
    }

    /// Load missions from a JSON file (e.g. `missions.json`).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, MissionError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let catalog = Self::from_json(&contents).map_err(|e| match e {
            MissionError::Json(err) => {
                MissionError::Catalog(format!("failed to parse {}: {}", path.display(), err))
            }
            other => other,
        })?;
        info!(
            "Loaded {} mission definitions from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_json(contents: &str) -> Result<Self, MissionError> {
        let definitions: Vec<MissionDefinition> = serde_json::from_str(contents)?;
        Self::new(definitions)
    }

    pub fn definitions(&self) -> &[MissionDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Distinct event identifiers referenced by the catalog, in first-seen order.
    pub fn event_names(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.definitions
            .iter()
            .filter(|def| seen.insert(def.event.as_str()))
            .map(|def| def.event.as_str())
            .collect()
    }

    /// Definitions a player may be handed right now: permission flag granted
    /// (via `has_flag`) and map restriction equal to `current_map`.
    pub fn available_for<'a, F>(&'a self, current_map: &str, mut has_flag: F) -> Vec<&'a MissionDefinition>
    where
        F: FnMut(&str) -> bool,
    {
        let available: Vec<&MissionDefinition> = self
            .definitions
            .iter()
            .filter(|def| def.map_name.as_deref().map_or(true, |map| map == current_map))
            .filter(|def| def.flag.as_deref().map_or(true, &mut has_flag))
            .collect();
        debug!(
            "{} of {} catalog missions available on map '{}'",
            available.len(),
            self.definitions.len(),
            current_map
        );
        available
    }
}

fn validate_definition(index: usize, def: &MissionDefinition) -> Result<(), MissionError> {
    let label = || format!("mission #{} ({}/{})", index, def.event, def.target);
    if def.event.trim().is_empty() {
        return Err(MissionError::Catalog(format!("mission #{} has an empty event", index)));
    }
    if def.target.trim().is_empty() {
        return Err(MissionError::Catalog(format!("{} has an empty target", label())));
    }
    if def.phrase.trim().is_empty() {
        return Err(MissionError::Catalog(format!("{} has an empty phrase", label())));
    }
    if def.amount == 0 {
        return Err(MissionError::Catalog(format!("{} requires an amount of at least 1", label())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"[
        {"event": "EventPlayerDeath", "target": "Attacker", "amount": 10, "phrase": "missions.kill10", "reward_phrase": "500 credits", "reward_commands": ["credits_give {steamid64} 500"]},
        {"event": "EventBombPlanted", "target": "UserId", "amount": 2, "phrase": "missions.plant2", "map_name": "de_dust2"},
        {"event": "EventPlayerDeath", "target": "Attacker", "amount": 3, "phrase": "missions.hs3", "event_properties": {"Headshot": true}, "flag": "@missions/vip"}
    ]"#;

    #[test]
    fn parses_sample_catalog() {
        let catalog = MissionCatalog::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.event_names(), vec!["EventPlayerDeath", "EventBombPlanted"]);
    }

    #[test]
    fn rejects_zero_amount() {
        let err = MissionCatalog::from_json(
            r#"[{"event":"EventPlayerDeath","target":"Attacker","amount":0,"phrase":"x"}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, MissionError::Catalog(_)));
    }

    #[test]
    fn availability_respects_map_and_flag() {
        let catalog = MissionCatalog::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.available_for("de_inferno", |_| false).len(), 1);
        assert_eq!(catalog.available_for("de_dust2", |_| false).len(), 2);
        assert_eq!(catalog.available_for("de_dust2", |flag| flag == "@missions/vip").len(), 3);
    }

    #[test]
    fn load_from_file_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = MissionCatalog::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }
}
