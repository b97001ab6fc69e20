use std::io;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::info;

use flowdag_core::config::ExecutorConfig;
use flowdag_core::types::NodeKind;

/// The two execution resources nodes are dispatched onto.
///
/// Handles are cheap to clone. Both may point at the same runtime.
#[derive(Debug, Clone)]
pub struct Executors {
    pub cpu: Handle,
    pub io: Handle,
}

impl Executors {
    pub fn new(cpu: Handle, io: Handle) -> Self {
        Self { cpu, io }
    }

    /// Use the ambient runtime for both kinds. `None` outside a Tokio runtime.
    pub fn try_current() -> Option<Self> {
        let handle = Handle::try_current().ok()?;
        Some(Self {
            cpu: handle.clone(),
            io: handle,
        })
    }

    pub fn for_kind(&self, kind: NodeKind) -> &Handle {
        match kind {
            NodeKind::Cpu => &self.cpu,
            NodeKind::Io => &self.io,
        }
    }
}

/// Owns two dedicated multi-thread runtimes, one per node kind.
///
/// Dropping shuts both down in the background, so it is safe to drop from
/// inside async code.
pub struct ExecutorRuntimes {
    cpu: Option<Runtime>,
    io: Option<Runtime>,
}

impl ExecutorRuntimes {
    pub fn build(config: &ExecutorConfig) -> io::Result<Self> {
        let cpu_threads = config.cpu_threads();
        let io_threads = config.io_threads();

        let cpu = Builder::new_multi_thread()
            .worker_threads(cpu_threads)
            .thread_name("flowdag-cpu")
            .enable_all()
            .build()?;
        let io = Builder::new_multi_thread()
            .worker_threads(io_threads)
            .thread_name("flowdag-io")
            .enable_all()
            .build()?;

        info!(cpu_threads, io_threads, "Executor runtimes started");
        Ok(Self {
            cpu: Some(cpu),
            io: Some(io),
        })
    }

    pub fn executors(&self) -> Option<Executors> {
        match (&self.cpu, &self.io) {
            (Some(cpu), Some(io)) => Some(Executors::new(cpu.handle().clone(), io.handle().clone())),
            _ => None,
        }
    }
}

impl Drop for ExecutorRuntimes {
    fn drop(&mut self) {
        if let Some(rt) = self.cpu.take() {
            rt.shutdown_background();
        }
        if let Some(rt) = self.io.take() {
            rt.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_current_inside_runtime() {
        let executors = Executors::try_current().unwrap();
        let out = executors.for_kind(NodeKind::Io).spawn(async { 2 + 2 }).await.unwrap();
        assert_eq!(out, 4);
    }

    #[test]
    fn test_try_current_outside_runtime() {
        assert!(Executors::try_current().is_none());
    }

    #[tokio::test]
    async fn test_dedicated_runtimes_route_by_kind() {
        let runtimes = ExecutorRuntimes::build(&ExecutorConfig {
            cpu_threads: Some(1),
            io_threads: Some(2),
        })
        .unwrap();
        let executors = runtimes.executors().unwrap();

        let name = executors
            .for_kind(NodeKind::Io)
            .spawn(async { std::thread::current().name().map(str::to_string) })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("flowdag-io"));

        let name = executors
            .for_kind(NodeKind::Cpu)
            .spawn(async { std::thread::current().name().map(str::to_string) })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("flowdag-cpu"));
        // Dropped inside an async context.
        drop(runtimes);
    }
}
