//! Switch rule resolution
//!
//! A switch request names some elements of a switch vector with the state
//! the client wants. Resolution turns that partial request into the complete
//! set of switch states the property would hold afterwards, or rejects it.
//! Violations are rejected and never corrected, so a rejected request leaves
//! the property exactly as it was.

use crate::error::{ModelError, Result};
use crate::state::{SwitchRule, SwitchState};

/// Resolve a partial switch request against the current states
///
/// `requested` holds `(index, state)` pairs into `current`. Indices are
/// assumed valid and a later entry for the same index wins.
pub fn resolve(
    property: &str,
    rule: SwitchRule,
    current: &[SwitchState],
    requested: &[(usize, SwitchState)],
) -> Result<Vec<SwitchState>> {
    let mut merged = current.to_vec();
    for &(index, state) in requested {
        merged[index] = state;
    }

    if rule == SwitchRule::AnyOfMany {
        return Ok(merged);
    }

    let mut turned_on: Vec<usize> = requested
        .iter()
        .filter(|(index, _)| merged[*index].is_on())
        .map(|(index, _)| *index)
        .collect();
    turned_on.sort_unstable();
    turned_on.dedup();

    let resolved = match turned_on.as_slice() {
        [] => merged,
        [selected] => (0..current.len())
            .map(|i| SwitchState::from(i == *selected))
            .collect(),
        _ => {
            return Err(violation(
                property,
                rule,
                format!("{} elements requested On", turned_on.len()),
            ))
        }
    };

    let on = resolved.iter().filter(|s| s.is_on()).count();
    match rule {
        SwitchRule::OneOfMany if on != 1 => Err(violation(
            property,
            rule,
            if on == 0 {
                "no element left On".to_string()
            } else {
                format!("{on} elements left On")
            },
        )),
        SwitchRule::AtMostOne if on > 1 => {
            Err(violation(property, rule, format!("{on} elements left On")))
        }
        _ => Ok(resolved),
    }
}

fn violation(property: &str, rule: SwitchRule, reason: String) -> ModelError {
    ModelError::SwitchRule {
        property: property.to_string(),
        rule,
        reason,
    }
}
