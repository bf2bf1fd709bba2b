//! Declarative routing.
//!
//! The routing table maps a source component to the ordered list of
//! targets named in its `to` configuration. Components without an
//! explicit `to` get inferred routes:
//!
//! - an input-kind source routes to the agent, when exactly one
//!   agent-kind component exists;
//! - an agent-kind source routes to all output-kind components, or to
//!   the reserved `_console_output` sink when none are declared.
//!
//! Explicit routes always win; inference never overwrites a non-empty
//! list. Validation reports routing cycles and unreachable targets as
//! errors (startup fails) and orphan components as warnings.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use tenon_types::spec::{CONSOLE_OUTPUT, ComponentKind, ComponentSpec};

/// Severity of a routing diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Fatal: the routing graph is invalid and the runtime cannot start.
    Error,
    /// Non-fatal: logged at WARN during startup.
    Warning,
}

/// A single diagnostic produced by [`Router::validate`].
#[derive(Debug, Clone)]
pub struct RouteDiagnostic {
    /// Human-readable description of the problem.
    pub message: String,
    /// Whether this aborts startup.
    pub severity: Severity,
}

impl std::fmt::Display for RouteDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        write!(f, "[{}] {}", level, self.message)
    }
}

/// Counters exposed by [`Router::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Deliveries handed to the dispatcher.
    pub routes_processed: u64,
    /// Deliveries that failed (queue full, handler error).
    pub routing_failures: u64,
}

/// Owns the source -> targets table.
pub struct Router {
    table: RwLock<HashMap<String, Vec<String>>>,
    kinds: RwLock<HashMap<String, ComponentKind>>,
    routes_processed: AtomicU64,
    routing_failures: AtomicU64,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            kinds: RwLock::new(HashMap::new()),
            routes_processed: AtomicU64::new(0),
            routing_failures: AtomicU64::new(0),
        }
    }

    /// Build the table from component specs, then apply inference.
    pub fn configure(&self, specs: &HashMap<String, ComponentSpec>) {
        let mut table = HashMap::new();
        let mut kinds = HashMap::new();

        for (name, spec) in specs {
            kinds.insert(name.clone(), spec.kind);
            let targets = spec.route_targets();
            if !targets.is_empty() {
                debug!(component = %name, targets = ?targets, "explicit route");
            }
            table.insert(name.clone(), targets);
        }

        infer_routes(&mut table, &kinds);

        let total: usize = table.values().map(Vec::len).sum();
        info!(
            components = table.len(),
            routes = total,
            "routing configured"
        );

        *self.table.write().expect("router lock poisoned") = table;
        *self.kinds.write().expect("router lock poisoned") = kinds;
    }

    /// Targets of a source component, in declaration order.
    pub fn targets_of(&self, source: &str) -> Vec<String> {
        self.table
            .read()
            .expect("router lock poisoned")
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Declared kind of a component, when known to the router.
    pub fn kind_of(&self, name: &str) -> Option<ComponentKind> {
        self.kinds
            .read()
            .expect("router lock poisoned")
            .get(name)
            .copied()
    }

    /// Add a routing edge. Not used during steady-state traffic.
    pub fn add_route(&self, source: impl Into<String>, target: impl Into<String>) {
        let source = source.into();
        let target = target.into();
        let mut table = self.table.write().expect("router lock poisoned");
        let targets = table.entry(source.clone()).or_default();
        if !targets.contains(&target) {
            debug!(source = %source, target = %target, "route added");
            targets.push(target);
        }
    }

    /// Remove a routing edge. Returns whether it existed.
    pub fn remove_route(&self, source: &str, target: &str) -> bool {
        let mut table = self.table.write().expect("router lock poisoned");
        if let Some(targets) = table.get_mut(source)
            && let Some(pos) = targets.iter().position(|t| t == target)
        {
            targets.remove(pos);
            debug!(source = %source, target = %target, "route removed");
            return true;
        }
        false
    }

    /// Record a delivery handed to the dispatcher.
    pub(crate) fn count_processed(&self) {
        self.routes_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed delivery.
    pub(crate) fn count_failure(&self) {
        self.routing_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the routing counters.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            routes_processed: self.routes_processed.load(Ordering::Relaxed),
            routing_failures: self.routing_failures.load(Ordering::Relaxed),
        }
    }

    /// Validate the routing graph.
    ///
    /// Cycles and unresolvable targets are errors; components with no
    /// inbound or outbound routes are warnings.
    pub fn validate(&self) -> Vec<RouteDiagnostic> {
        let table = self.table.read().expect("router lock poisoned");
        let kinds = self.kinds.read().expect("router lock poisoned");
        let mut diagnostics = Vec::new();

        // Unreachable targets: referenced but neither declared nor the
        // reserved sink.
        let declared: HashSet<&str> = kinds.keys().map(String::as_str).collect();
        for (source, targets) in table.iter() {
            for target in targets {
                if target != CONSOLE_OUTPUT && !declared.contains(target.as_str()) {
                    diagnostics.push(RouteDiagnostic {
                        message: format!(
                            "component '{source}' routes to '{target}', which is not registered"
                        ),
                        severity: Severity::Error,
                    });
                }
            }
        }

        // Cycles: depth-first walk from every node.
        let mut sources: Vec<&String> = table.keys().collect();
        sources.sort();
        let mut reported: HashSet<String> = HashSet::new();
        for source in sources {
            let mut path = Vec::new();
            if let Some(cycle) = find_cycle(source, &table, &mut path, &mut HashSet::new()) {
                // Report each distinct cycle once, regardless of the
                // node the walk started from.
                let mut key: Vec<&String> = cycle.iter().collect();
                key.sort();
                let key = key
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                if reported.insert(key) {
                    diagnostics.push(RouteDiagnostic {
                        message: format!("circular routing detected: {}", cycle.join(" -> ")),
                        severity: Severity::Error,
                    });
                }
            }
        }

        // Orphans: no inbound and no outbound routes at all.
        let mut inbound: HashSet<&str> = HashSet::new();
        for targets in table.values() {
            for target in targets {
                inbound.insert(target.as_str());
            }
        }
        let mut names: Vec<&String> = kinds.keys().collect();
        names.sort();
        for name in names {
            if name == CONSOLE_OUTPUT {
                continue;
            }
            let has_outbound = table.get(name.as_str()).is_some_and(|t| !t.is_empty());
            let has_inbound = inbound.contains(name.as_str());
            if !has_outbound && !has_inbound {
                diagnostics.push(RouteDiagnostic {
                    message: format!("component '{name}' has no inbound or outbound routes"),
                    severity: Severity::Warning,
                });
            }
        }

        for diagnostic in &diagnostics {
            if diagnostic.severity == Severity::Warning {
                warn!("{diagnostic}");
            }
        }

        diagnostics
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn infer_routes(table: &mut HashMap<String, Vec<String>>, kinds: &HashMap<String, ComponentKind>) {
    let mut of_kind = |kind: ComponentKind| {
        let mut names: Vec<&String> = kinds
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(n, _)| n)
            .collect();
        names.sort();
        names
    };
    let inputs = of_kind(ComponentKind::Input);
    let agents = of_kind(ComponentKind::Agent);
    let outputs = of_kind(ComponentKind::Output);

    // input -> the agent, when the choice is unambiguous.
    if agents.len() == 1 {
        for input in &inputs {
            let targets = table.entry((*input).clone()).or_default();
            if targets.is_empty() {
                debug!(source = %input, target = %agents[0], "inferred route");
                targets.push(agents[0].clone());
            }
        }
    }

    // agent -> all outputs, or the console sink.
    for agent in &agents {
        let targets = table.entry((*agent).clone()).or_default();
        if targets.is_empty() {
            if outputs.is_empty() {
                debug!(source = %agent, target = CONSOLE_OUTPUT, "inferred route");
                targets.push(CONSOLE_OUTPUT.to_string());
            } else {
                debug!(source = %agent, targets = ?outputs, "inferred route");
                targets.extend(outputs.iter().map(|o| (*o).clone()));
            }
        }
    }
}

fn find_cycle(
    node: &str,
    table: &HashMap<String, Vec<String>>,
    path: &mut Vec<String>,
    visited: &mut HashSet<String>,
) -> Option<Vec<String>> {
    if let Some(pos) = path.iter().position(|p| p == node) {
        let mut cycle = path[pos..].to_vec();
        cycle.push(node.to_string());
        return Some(cycle);
    }
    if !visited.insert(node.to_string()) {
        return None;
    }

    path.push(node.to_string());
    if let Some(targets) = table.get(node) {
        for target in targets {
            if let Some(cycle) = find_cycle(target, table, path, visited) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs(entries: &[(&str, ComponentKind, Option<serde_json::Value>)]) -> HashMap<String, ComponentSpec> {
        entries
            .iter()
            .map(|(name, kind, to)| {
                let mut spec = ComponentSpec::new(*name, *kind, "test");
                if let Some(to) = to {
                    spec = spec.with_config("to", to.clone());
                }
                (name.to_string(), spec)
            })
            .collect()
    }

    #[test]
    fn explicit_routes_build_table() {
        let router = Router::new();
        router.configure(&specs(&[
            ("inp", ComponentKind::Input, Some(json!("ag"))),
            ("ag", ComponentKind::Agent, Some(json!(["out"]))),
            ("out", ComponentKind::Output, None),
        ]));

        assert_eq!(router.targets_of("inp"), vec!["ag"]);
        assert_eq!(router.targets_of("ag"), vec!["out"]);
        assert!(router.targets_of("out").is_empty());
    }

    #[test]
    fn inference_fills_missing_routes() {
        let router = Router::new();
        router.configure(&specs(&[
            ("inp", ComponentKind::Input, None),
            ("ag", ComponentKind::Agent, None),
            ("out", ComponentKind::Output, None),
        ]));

        assert_eq!(router.targets_of("inp"), vec!["ag"]);
        assert_eq!(router.targets_of("ag"), vec!["out"]);
    }

    #[test]
    fn inference_skips_ambiguous_agent_choice() {
        let router = Router::new();
        router.configure(&specs(&[
            ("inp", ComponentKind::Input, None),
            ("ag1", ComponentKind::Agent, None),
            ("ag2", ComponentKind::Agent, None),
        ]));

        assert!(router.targets_of("inp").is_empty());
    }

    #[test]
    fn agents_fall_back_to_console_sink() {
        let router = Router::new();
        router.configure(&specs(&[("ag", ComponentKind::Agent, None)]));
        assert_eq!(router.targets_of("ag"), vec![CONSOLE_OUTPUT]);
    }

    #[test]
    fn explicit_route_is_never_overwritten() {
        let router = Router::new();
        router.configure(&specs(&[
            ("inp", ComponentKind::Input, Some(json!("special"))),
            ("ag", ComponentKind::Agent, None),
            ("special", ComponentKind::Other, None),
        ]));
        assert_eq!(router.targets_of("inp"), vec!["special"]);
    }

    #[test]
    fn cycle_detection_names_participants() {
        let router = Router::new();
        router.configure(&specs(&[
            ("a", ComponentKind::Tool, Some(json!("b"))),
            ("b", ComponentKind::Tool, Some(json!("a"))),
        ]));

        let diagnostics = router.validate();
        let errors: Vec<&RouteDiagnostic> = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1, "diagnostics: {diagnostics:?}");
        assert!(errors[0].message.contains("circular"));
        assert!(errors[0].message.contains('a') && errors[0].message.contains('b'));
    }

    #[test]
    fn unreachable_target_is_error() {
        let router = Router::new();
        router.configure(&specs(&[(
            "inp",
            ComponentKind::Input,
            Some(json!("nowhere")),
        )]));

        let diagnostics = router.validate();
        assert!(diagnostics.iter().any(|d| {
            d.severity == Severity::Error && d.message.contains("nowhere")
        }));
    }

    #[test]
    fn console_sink_is_always_reachable() {
        let router = Router::new();
        router.configure(&specs(&[("ag", ComponentKind::Agent, None)]));
        let errors: Vec<RouteDiagnostic> = router
            .validate()
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .collect();
        assert!(errors.is_empty(), "errors: {errors:?}");
    }

    #[test]
    fn orphan_component_is_warning() {
        let router = Router::new();
        router.configure(&specs(&[
            ("inp", ComponentKind::Input, Some(json!("ag"))),
            ("ag", ComponentKind::Agent, Some(json!("_console_output"))),
            ("loner", ComponentKind::Tool, None),
        ]));

        let diagnostics = router.validate();
        let warnings: Vec<&RouteDiagnostic> = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("loner"));
    }

    #[test]
    fn add_and_remove_route() {
        let router = Router::new();
        router.add_route("a", "b");
        router.add_route("a", "b");
        assert_eq!(router.targets_of("a"), vec!["b"]);

        assert!(router.remove_route("a", "b"));
        assert!(!router.remove_route("a", "b"));
        assert!(router.targets_of("a").is_empty());
    }

    #[test]
    fn valid_linear_graph_has_no_errors() {
        let router = Router::new();
        router.configure(&specs(&[
            ("inp", ComponentKind::Input, Some(json!("ag"))),
            ("ag", ComponentKind::Agent, Some(json!("out"))),
            ("out", ComponentKind::Output, None),
        ]));
        let errors: Vec<RouteDiagnostic> = router
            .validate()
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .collect();
        assert!(errors.is_empty(), "errors: {errors:?}");
    }
}
