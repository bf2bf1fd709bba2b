//! Blocking-initialization coordination.
//!
//! Components that must discover remote capabilities before peers read
//! their `description` implement `async_startup`. The coordinator runs
//! every component's startup in parallel, each bounded by a per-component
//! timeout, and records the outcome. Success, timeout, and failure are
//! all tolerated: a component that timed out simply stays in its
//! degraded not-ready state (its `description` returns a loading
//! sentinel) while the rest of the pipeline proceeds.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::registry::ComponentRegistry;

/// Default per-component startup timeout.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// How one component's blocking initialization ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// `async_startup` returned `Ok` within the timeout.
    Completed,
    /// The timeout elapsed; the component keeps a best-effort degraded
    /// state.
    TimedOut,
    /// `async_startup` returned an error or panicked.
    Failed(String),
}

/// Per-component outcomes of the startup phase.
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    outcomes: HashMap<String, StartupOutcome>,
}

impl StartupReport {
    /// Outcome for one component, if it participated.
    pub fn outcome_of(&self, name: &str) -> Option<&StartupOutcome> {
        self.outcomes.get(name)
    }

    /// Whether a component completed startup successfully.
    pub fn completed(&self, name: &str) -> bool {
        matches!(self.outcomes.get(name), Some(StartupOutcome::Completed))
    }

    /// Names of components that did not complete.
    pub fn degraded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !matches!(outcome, StartupOutcome::Completed))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Run every registered component's `async_startup` in parallel with a
/// per-component timeout. Returns once all have completed, timed out, or
/// failed; only then may the main loop begin.
pub async fn run_startup(registry: &ComponentRegistry, timeout: Duration) -> StartupReport {
    let names = registry.names();
    info!(components = names.len(), "running blocking initialization");

    let mut tasks = Vec::with_capacity(names.len());
    for name in names {
        let Some(component) = registry.get(&name) else {
            continue;
        };
        let task = tokio::spawn(async move {
            tokio::time::timeout(timeout, component.async_startup()).await
        });
        tasks.push((name, task));
    }

    let mut report = StartupReport::default();
    for (name, task) in tasks {
        let outcome = match task.await {
            Ok(Ok(Ok(()))) => {
                debug!(component = %name, "startup completed");
                StartupOutcome::Completed
            }
            Ok(Ok(Err(e))) => {
                warn!(component = %name, error = %e, "startup failed");
                StartupOutcome::Failed(e.to_string())
            }
            Ok(Err(_elapsed)) => {
                warn!(
                    component = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "startup timed out"
                );
                StartupOutcome::TimedOut
            }
            Err(join_err) => {
                warn!(component = %name, error = %join_err, "startup panicked");
                StartupOutcome::Failed(join_err.to_string())
            }
        };
        report.outcomes.insert(name, outcome);
    }

    let degraded = report.degraded();
    if degraded.is_empty() {
        info!("all components ready");
    } else {
        warn!(components = ?degraded, "components in degraded state after startup");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentInput};
    use crate::runtime::Runtime;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tenon_types::Result;
    use tenon_types::spec::ComponentKind;

    struct SlowStarter {
        name: String,
        delay: Duration,
        fail: bool,
        ready: AtomicBool,
    }

    #[async_trait]
    impl Component for SlowStarter {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> ComponentKind {
            ComponentKind::ToolServer
        }
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
        async fn async_startup(&self) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(tenon_types::TenonError::Channel("no route".into()));
            }
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn input(&self, _input: ComponentInput) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    fn starter(name: &str, delay: Duration, fail: bool) -> Arc<SlowStarter> {
        Arc::new(SlowStarter {
            name: name.into(),
            delay,
            fail,
            ready: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn fast_component_completes() {
        let runtime = Runtime::empty();
        let component = starter("fast", Duration::from_millis(5), false);
        runtime.registry().register(
            component.clone(),
            runtime
                .handle()
                .component_handle("fast", ComponentKind::ToolServer),
        );

        let report = run_startup(runtime.registry(), Duration::from_millis(500)).await;
        assert!(report.completed("fast"));
        assert!(component.is_ready());
    }

    #[tokio::test]
    async fn slow_component_times_out_but_phase_finishes() {
        let runtime = Runtime::empty();
        let slow = starter("slow", Duration::from_secs(10), false);
        let fast = starter("fast", Duration::from_millis(5), false);
        runtime.registry().register(
            slow.clone(),
            runtime
                .handle()
                .component_handle("slow", ComponentKind::ToolServer),
        );
        runtime.registry().register(
            fast.clone(),
            runtime
                .handle()
                .component_handle("fast", ComponentKind::ToolServer),
        );

        let report = run_startup(runtime.registry(), Duration::from_millis(100)).await;

        assert_eq!(report.outcome_of("slow"), Some(&StartupOutcome::TimedOut));
        assert!(report.completed("fast"));
        assert!(!slow.is_ready());
        assert_eq!(report.degraded(), vec!["slow"]);
    }

    #[tokio::test]
    async fn failing_component_is_tolerated() {
        let runtime = Runtime::empty();
        let failing = starter("broken", Duration::from_millis(1), true);
        runtime.registry().register(
            failing,
            runtime
                .handle()
                .component_handle("broken", ComponentKind::ToolServer),
        );

        let report = run_startup(runtime.registry(), Duration::from_millis(500)).await;
        match report.outcome_of("broken") {
            Some(StartupOutcome::Failed(message)) => assert!(message.contains("no route")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn startups_run_in_parallel() {
        let runtime = Runtime::empty();
        for name in ["a", "b", "c"] {
            runtime.registry().register(
                starter(name, Duration::from_millis(80), false),
                runtime
                    .handle()
                    .component_handle(name, ComponentKind::ToolServer),
            );
        }

        let begin = std::time::Instant::now();
        let report = run_startup(runtime.registry(), Duration::from_secs(1)).await;
        let elapsed = begin.elapsed();

        for name in ["a", "b", "c"] {
            assert!(report.completed(name));
        }
        // Three 80ms startups in parallel finish well under 3x80ms.
        assert!(elapsed < Duration::from_millis(200), "took {elapsed:?}");
    }
}
