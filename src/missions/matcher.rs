/// Event-to-mission matching
///
/// Pure predicates deciding whether an observed event advances a mission.
/// Nothing here touches player state or storage.
use crate::missions::types::{FilterValue, PlayerMission, PropertyBag, PropertyValue};

/// Check whether `mission` is advanced by an event of `event_type` on `target`.
///
/// Rules short-circuit in order: completed missions never match, event and
/// target compare case-insensitively, the map restriction must equal
/// `current_map`, and every property filter must be satisfied by `properties`.
pub fn matches(
    mission: &PlayerMission,
    event_type: &str,
    target: &str,
    current_map: &str,
    properties: &PropertyBag,
) -> bool {
    if mission.completed {
        return false;
    }

    if !mission.event.eq_ignore_ascii_case(event_type) || !mission.target.eq_ignore_ascii_case(target) {
        return false;
    }

    if let Some(ref map_name) = mission.map_name {
        if map_name != current_map {
            return false;
        }
    }

    match mission.event_properties {
        Some(ref filters) => filters
            .iter()
            .all(|(key, filter)| match lookup(properties, key) {
                Some(observed) if !observed.is_null() => compare_property(filter, observed),
                _ => false,
            }),
        None => true,
    }
}

/// Exact key first, then a case-insensitive scan.
fn lookup<'a>(properties: &'a PropertyBag, key: &str) -> Option<&'a PropertyValue> {
    properties.get(key).or_else(|| {
        properties
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    })
}

/// Compare one observed value against a mission threshold.
///
/// Booleans need equality, numbers need `observed >= threshold`, strings need
/// case-insensitive containment of the threshold. Mismatched types never match.
pub fn compare_property(filter: &FilterValue, observed: &PropertyValue) -> bool {
    match filter {
        FilterValue::Bool(expected) => matches!(observed, PropertyValue::Bool(b) if b == expected),
        FilterValue::Int(threshold) => match observed {
            PropertyValue::Int(v) => i128::from(*v) >= i128::from(*threshold),
            PropertyValue::UInt(v) => i128::from(*v) >= i128::from(*threshold),
            PropertyValue::Float(v) => *v >= *threshold as f64,
            _ => false,
        },
        FilterValue::Float(threshold) => match observed {
            PropertyValue::Float(v) => *v >= *threshold,
            PropertyValue::Int(v) => *v as f64 >= *threshold,
            PropertyValue::UInt(v) => *v as f64 >= *threshold,
            _ => false,
        },
        FilterValue::Text(needle) => match observed {
            PropertyValue::Text(haystack) => haystack.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
    }
}
