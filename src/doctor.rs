use std::path::Path;
use std::sync::Arc;

use flowdag_core::config::{PoolSizing, MIN_POOL_TUNABLE_MS};
use flowdag_core::{EngineState, FlowConfig};
use flowdag_engine::{ExecutorRuntimes, Executors, FlowRunner, RunOptions};

use crate::demos::{self, Request};

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub async fn run_doctor(path: &Path) {
    let mut checks = Vec::new();

    // 1. Config file parses (or is absent)
    let (config_check, config) = check_config(path);
    checks.push(config_check);

    // 2. Pool sizing
    checks.push(check_pool("Context pool", &config.pool.context));
    checks.push(check_pool("Collection pool", &config.pool.collection));

    // 3. Eviction tunables above the floor
    checks.push(check_eviction(&config));

    // 4. Executor runtimes start
    let (executor_check, runtimes) = check_executors(&config);
    checks.push(executor_check);

    // 5. Demo workflows validate and run
    let executors = runtimes
        .as_ref()
        .and_then(ExecutorRuntimes::executors)
        .or_else(Executors::try_current);
    match executors {
        Some(executors) => checks.push(check_workflows(&config, executors).await),
        None => checks.push(CheckResult {
            label: "Workflows".into(),
            ok: false,
            detail: "No executors available".into(),
        }),
    }

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn check_config(path: &Path) -> (CheckResult, FlowConfig) {
    if !path.exists() {
        let check = CheckResult {
            label: "Config".into(),
            ok: true,
            detail: format!("{} not found, using defaults", path.display()),
        };
        return (check, FlowConfig::default());
    }
    match FlowConfig::load(path) {
        Ok(config) => (
            CheckResult {
                label: "Config".into(),
                ok: true,
                detail: format!(
                    "{} (timeout {}ms, callbacks {})",
                    path.display(),
                    config.engine.timeout_ms,
                    if config.engine.enable_callbacks { "on" } else { "off" }
                ),
            },
            config,
        ),
        Err(e) => (
            CheckResult {
                label: "Config".into(),
                ok: false,
                detail: format!("{}: {} (checking defaults instead)", path.display(), e),
            },
            FlowConfig::default(),
        ),
    }
}

fn check_pool(label: &str, sizing: &PoolSizing) -> CheckResult {
    if sizing.max_size == 0 {
        return CheckResult {
            label: label.into(),
            ok: false,
            detail: "max_size is 0, nothing will ever be pooled".into(),
        };
    }
    CheckResult {
        label: label.into(),
        ok: true,
        detail: format!(
            "max {}, prewarm {}, min idle {}",
            sizing.max_size, sizing.initial_size, sizing.min_idle
        ),
    }
}

fn check_eviction(config: &FlowConfig) -> CheckResult {
    let eviction = &config.pool.eviction;
    let interval = eviction.eviction_interval().as_millis() as u64;
    let idle = eviction.evictable_idle().as_millis() as u64;

    let mut clamped = Vec::new();
    if interval < MIN_POOL_TUNABLE_MS {
        clamped.push(format!("eviction interval {}ms", interval));
    }
    if idle < MIN_POOL_TUNABLE_MS {
        clamped.push(format!("evictable idle {}ms", idle));
    }

    if clamped.is_empty() {
        CheckResult {
            label: "Eviction".into(),
            ok: true,
            detail: format!(
                "{:?}: every {}ms, idle after {}ms, {} samples per run",
                eviction.preset, interval, idle, eviction.samples_per_run
            ),
        }
    } else {
        CheckResult {
            label: "Eviction".into(),
            ok: false,
            detail: format!(
                "{} below {}ms floor, will be clamped",
                clamped.join(", "),
                MIN_POOL_TUNABLE_MS
            ),
        }
    }
}

fn check_executors(config: &FlowConfig) -> (CheckResult, Option<ExecutorRuntimes>) {
    let cpu = config.executors.cpu_threads();
    let io = config.executors.io_threads();
    match ExecutorRuntimes::build(&config.executors) {
        Ok(runtimes) => (
            CheckResult {
                label: "Executors".into(),
                ok: true,
                detail: format!("{} cpu threads, {} io threads", cpu, io),
            },
            Some(runtimes),
        ),
        Err(e) => (
            CheckResult {
                label: "Executors".into(),
                ok: false,
                detail: format!("Failed to start runtimes: {}", e),
            },
            None,
        ),
    }
}

async fn check_workflows(config: &FlowConfig, executors: Executors) -> CheckResult {
    let runner = FlowRunner::new(config, executors);
    if let Err(e) = demos::register_all(&runner) {
        return CheckResult {
            label: "Workflows".into(),
            ok: false,
            detail: format!("Validation failed: {}", e),
        };
    }

    let mut failures = Vec::new();
    for name in demos::WORKFLOWS {
        match runner
            .run(name, Arc::new(Request::new("doctor", 4)), RunOptions::new())
            .await
        {
            Ok(outcome) if outcome.state == EngineState::Finish => {}
            Ok(outcome) => failures.push(format!(
                "{} ended {}{}",
                name,
                outcome.state,
                outcome
                    .error
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default()
            )),
            Err(e) => failures.push(format!("{}: {}", name, e)),
        }
    }
    runner.stop_evictors();

    if failures.is_empty() {
        CheckResult {
            label: "Workflows".into(),
            ok: true,
            detail: format!("{} validated and ran", demos::WORKFLOWS.join(", ")),
        }
    } else {
        CheckResult {
            label: "Workflows".into(),
            ok: false,
            detail: failures.join("; "),
        }
    }
}
