//! `WorkerFactory`: the broker's narrow contract with whatever external
//! collaborator knows how to spawn worker processes.

use meshbroker_protocol::JobType;
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

/// The external collaborator the broker depends on to create new worker
/// processes. Deliberately narrow: the broker never inspects how a worker
/// is spawned, only whether one was.
pub trait WorkerFactory: Send {
    /// Does the factory know how to produce a worker for `job_type`?
    fn have_support(&self, job_type: JobType) -> bool;

    /// Current count of live spawned workers.
    fn current_count(&self) -> usize;

    /// Liveness accounting cap.
    fn cap(&self) -> usize;

    /// Attempt to spawn a worker. Returns whether a new process was
    /// actually created (`false` if cap reached or spawn failed).
    fn create_worker(&mut self, job_type: JobType) -> bool;

    /// Reap finished child processes. Called once per tick.
    fn update_count(&mut self);

    /// Record the broker's externally reachable address so spawned
    /// workers can connect back.
    fn add_endpoint(&mut self, uri: &str);
}

/// A factory with no backing command: reports no support for anything and
/// never spawns. Useful for tests and for brokers fed only by
/// pre-registered workers.
#[derive(Debug, Default)]
pub struct NoopWorkerFactory;

impl WorkerFactory for NoopWorkerFactory {
    fn have_support(&self, _job_type: JobType) -> bool {
        false
    }

    fn current_count(&self) -> usize {
        0
    }

    fn cap(&self) -> usize {
        0
    }

    fn create_worker(&mut self, _job_type: JobType) -> bool {
        false
    }

    fn update_count(&mut self) {}

    fn add_endpoint(&mut self, _uri: &str) {}
}

/// Spawns a configured external command per worker, passing the broker's
/// published endpoint and the requested job type through the environment.
/// Reaps exited children with `Child::try_wait` on `update_count`.
pub struct ProcessWorkerFactory {
    command: String,
    cap: usize,
    children: Vec<Child>,
    endpoints: Vec<String>,
}

impl ProcessWorkerFactory {
    pub fn new(command: String, cap: usize) -> Self {
        Self {
            command,
            cap,
            children: Vec::new(),
            endpoints: Vec::new(),
        }
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    fn have_support(&self, _job_type: JobType) -> bool {
        // The factory's configured command is opaque to the broker; it is
        // the spawned worker, not the broker, that ultimately validates
        // whether it can handle a given job type (it self-reports via
        // CanMesh once connected).
        true
    }

    fn current_count(&self) -> usize {
        self.children.len()
    }

    fn cap(&self) -> usize {
        self.cap
    }

    fn create_worker(&mut self, job_type: JobType) -> bool {
        if self.current_count() >= self.cap {
            debug!(cap = self.cap, "worker cap reached, refusing to spawn");
            return false;
        }

        let mut parts = self.command.split_whitespace();
        let Some(program) = parts.next() else {
            warn!("worker-cmd is empty, cannot spawn");
            return false;
        };
        let args: Vec<&str> = parts.collect();

        let endpoint = self.endpoints.last().cloned().unwrap_or_default();
        match Command::new(program)
            .args(&args)
            .env("MESHBROKER_WORKER_ENDPOINT", &endpoint)
            .env(
                "MESHBROKER_JOB_TYPE",
                format!("{} {}", job_type.input_format, job_type.output_format),
            )
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                self.children.push(child);
                true
            }
            Err(e) => {
                warn!(error = %e, command = %self.command, "failed to spawn worker process");
                false
            }
        }
    }

    fn update_count(&mut self) {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(_status)) => false,
            Ok(None) => true,
            Err(_) => false,
        });
    }

    fn add_endpoint(&mut self, uri: &str) {
        self.endpoints.push(uri.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_factory_reports_no_support() {
        let factory = NoopWorkerFactory;
        assert!(!factory.have_support(JobType::new(1, 1)));
        assert_eq!(factory.cap(), 0);
    }

    #[test]
    fn process_factory_refuses_above_cap() {
        let mut factory = ProcessWorkerFactory::new("true".to_string(), 0);
        assert!(!factory.create_worker(JobType::new(1, 1)));
    }

    #[test]
    fn process_factory_spawns_and_reaps() {
        let mut factory = ProcessWorkerFactory::new("true".to_string(), 1);
        assert!(factory.create_worker(JobType::new(1, 1)));
        assert_eq!(factory.current_count(), 1);
        // Give the spawned `true` process a moment to exit.
        std::thread::sleep(std::time::Duration::from_millis(100));
        factory.update_count();
        assert_eq!(factory.current_count(), 0);
    }
}
