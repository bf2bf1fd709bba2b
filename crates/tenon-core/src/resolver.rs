//! Dependency-ordered component construction.
//!
//! Component specs declare `depends_on` by name; the resolver walks the
//! graph depth-first so every dependency is constructed before its
//! dependents. Cycles in `depends_on` abort startup with a config error
//! naming the path.

use std::collections::HashMap;

use tenon_types::spec::ComponentSpec;
use tenon_types::{Result, TenonError};

enum VisitState {
    InProgress,
    Done,
}

/// Compute a construction order over `specs`, children first.
///
/// References to names not present in `specs` are reported as config
/// errors; so are dependency cycles.
pub fn resolve_order(specs: &HashMap<String, ComponentSpec>) -> Result<Vec<String>> {
    let mut states: HashMap<String, VisitState> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    // Deterministic iteration keeps error messages and construction
    // order stable across runs.
    let mut names: Vec<&String> = specs.keys().collect();
    names.sort();

    for name in names {
        visit(name, specs, &mut states, &mut order, &mut Vec::new())?;
    }
    Ok(order)
}

fn visit(
    name: &str,
    specs: &HashMap<String, ComponentSpec>,
    states: &mut HashMap<String, VisitState>,
    order: &mut Vec<String>,
    path: &mut Vec<String>,
) -> Result<()> {
    match states.get(name) {
        Some(VisitState::Done) => return Ok(()),
        Some(VisitState::InProgress) => {
            let cycle_start = path.iter().position(|p| p == name).unwrap_or(0);
            let mut cycle: Vec<String> = path[cycle_start..].to_vec();
            cycle.push(name.to_string());
            return Err(TenonError::ConfigInvalid {
                reason: format!("dependency cycle: {}", cycle.join(" -> ")),
            });
        }
        None => {}
    }

    let spec = specs.get(name).ok_or_else(|| TenonError::ConfigInvalid {
        reason: format!(
            "component '{}' depends on '{}', which is not declared",
            path.last().map(String::as_str).unwrap_or("?"),
            name
        ),
    })?;

    states.insert(name.to_string(), VisitState::InProgress);
    path.push(name.to_string());

    for dep in &spec.depends_on {
        visit(dep, specs, states, order, path)?;
    }

    path.pop();
    states.insert(name.to_string(), VisitState::Done);
    order.push(name.to_string());
    Ok(())
}
