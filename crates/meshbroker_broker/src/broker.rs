//! The broker event loop: dispatch, matching, and liveness sweeps.

use crate::active_jobs::ActiveJobs;
use crate::factory::{NoopWorkerFactory, ProcessWorkerFactory, WorkerFactory};
use crate::job_queue::JobQueue;
use crate::metrics::METRICS;
use crate::worker_pool::WorkerPool;
use anyhow::{Context, Result};
use meshbroker_protocol::codec::{self, IncomingMessage, ServiceType};
use meshbroker_protocol::{BrokerConfig, Job, JobIdGenerator, JobType, PeerIdentity, Status};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// The broker server: two ROUTER sockets, the job queue, the worker pool,
/// the active-job registry, and the worker factory, all owned exclusively
/// by a single-threaded event loop.
pub struct Broker {
    client_socket: zmq::Socket,
    worker_socket: zmq::Socket,
    config: BrokerConfig,
    queue: JobQueue,
    pool: WorkerPool,
    active: ActiveJobs,
    factory: Box<dyn WorkerFactory>,
    id_gen: JobIdGenerator,
    running: bool,
}

impl Broker {
    /// Binds both router sockets, determines the worker socket's actual
    /// bound port, and advertises it to the worker factory built from
    /// `config.worker_cmd` (a no-op factory if unset).
    pub fn bind(config: BrokerConfig) -> Result<Self> {
        let factory: Box<dyn WorkerFactory> = match &config.worker_cmd {
            Some(cmd) => Box::new(ProcessWorkerFactory::new(cmd.clone(), config.worker_cap)),
            None => Box::new(NoopWorkerFactory),
        };
        Self::bind_with_factory(config, factory)
    }

    /// Binds both router sockets against a caller-supplied factory instead
    /// of the one `config.worker_cmd` would build. Lets tests and
    /// alternative deployments (e.g. a factory backed by a job scheduler
    /// rather than `std::process::Command`) observe or drive spawn
    /// behavior directly rather than through the process-global metrics.
    pub fn bind_with_factory(config: BrokerConfig, mut factory: Box<dyn WorkerFactory>) -> Result<Self> {
        let ctx = zmq::Context::new();

        let client_socket = ctx
            .socket(zmq::ROUTER)
            .context("failed to create client ROUTER socket")?;
        client_socket
            .set_rcvtimeo(config.heartbeat_interval.as_millis() as i32)
            .context("failed to set client socket rcvtimeo")?;
        client_socket
            .bind(&config.client_bind_addr)
            .with_context(|| format!("failed to bind client socket to {}", config.client_bind_addr))?;

        let worker_socket = ctx
            .socket(zmq::ROUTER)
            .context("failed to create worker ROUTER socket")?;
        worker_socket
            .set_rcvtimeo(config.heartbeat_interval.as_millis() as i32)
            .context("failed to set worker socket rcvtimeo")?;
        worker_socket
            .bind(&config.worker_bind_addr)
            .with_context(|| format!("failed to bind worker socket to {}", config.worker_bind_addr))?;

        let worker_endpoint = bound_endpoint(&worker_socket, &config.advertised_host)?;
        factory.add_endpoint(&worker_endpoint);

        info!(
            client_bind = %config.client_bind_addr,
            worker_endpoint = %worker_endpoint,
            "broker bound"
        );

        Ok(Self {
            client_socket,
            worker_socket,
            config,
            queue: JobQueue::new(),
            pool: WorkerPool::new(),
            active: ActiveJobs::new(),
            factory,
            id_gen: JobIdGenerator::new(),
            running: false,
        })
    }

    /// Runs the event loop until the process is killed. Never returns
    /// under normal operation.
    pub fn run(&mut self) -> Result<()> {
        self.run_with_shutdown(None)
    }

    /// Runs the event loop, checking `stop_rx` once per tick for a
    /// graceful-shutdown signal.
    pub fn run_with_shutdown(&mut self, stop_rx: Option<mpsc::Receiver<()>>) -> Result<()> {
        self.running = true;
        info!("broker event loop started");

        while self.running {
            if let Some(rx) = stop_rx.as_ref() {
                match rx.try_recv() {
                    Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                        info!("broker received stop signal");
                        self.running = false;
                        break;
                    }
                    Err(mpsc::TryRecvError::Empty) => {}
                }
            }

            if let Err(e) = self.tick() {
                error!(error = %e, "tick failed");
            }
        }

        info!("broker stopped");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// One iteration of the loop: poll both sockets (bounded by the
    /// heartbeat interval), handle at most one message per socket, sweep
    /// liveness, then dispatch.
    fn tick(&mut self) -> Result<()> {
        let timeout_ms = self.config.heartbeat_interval.as_millis() as i64;

        let (client_ready, worker_ready) = {
            let mut items = [
                self.client_socket.as_poll_item(zmq::POLLIN),
                self.worker_socket.as_poll_item(zmq::POLLIN),
            ];
            zmq::poll(&mut items, timeout_ms).context("zmq poll failed")?;
            (items[0].is_readable(), items[1].is_readable())
        };

        if client_ready {
            if let Some(parts) = try_recv(&self.client_socket)? {
                self.handle_client_frames(parts);
            }
        }

        if worker_ready {
            if let Some(parts) = try_recv(&self.worker_socket)? {
                self.handle_worker_frames(parts);
            }
        }

        let now = Instant::now();
        self.sweep(now);
        self.dispatch();

        Ok(())
    }

    // ------------------------------------------------------------------
    // Client socket handling
    // ------------------------------------------------------------------

    fn handle_client_frames(&mut self, parts: Vec<Vec<u8>>) {
        let Some(identity_bytes) = parts.first().cloned() else {
            return;
        };
        let identity = PeerIdentity(identity_bytes);
        let body = parts.get(1).map(Vec::as_slice).unwrap_or(&[]);

        match IncomingMessage::decode(body) {
            Ok(msg) => self.handle_client_message(identity, msg),
            Err(e) => {
                warn!(error = %e, "malformed client frame");
                METRICS.inc_protocol_errors();
                let _ = self.send_to_client(&identity, invalid_reply(JobType::new(0, 0)));
            }
        }
    }

    fn handle_client_message(&mut self, identity: PeerIdentity, msg: IncomingMessage) {
        METRICS.inc_messages_received();
        let reply = match msg.service {
            ServiceType::CanMesh => {
                let supported = self.can_mesh(msg.job_type);
                IncomingMessage::new(ServiceType::CanMesh, msg.job_type, codec::encode_bool(supported))
            }
            ServiceType::MeshStatus => self.handle_mesh_status(msg),
            ServiceType::MakeMesh => self.handle_make_mesh(msg),
            ServiceType::RetrieveMesh => self.handle_retrieve_mesh(msg),
            ServiceType::Shutdown => self.handle_client_shutdown(msg),
            ServiceType::Invalid => invalid_reply(msg.job_type),
        };
        let _ = self.send_to_client(&identity, reply);
    }

    fn can_mesh(&self, job_type: JobType) -> bool {
        self.factory.have_support(job_type) || self.pool.have_waiting_worker(job_type)
    }

    fn handle_mesh_status(&mut self, msg: IncomingMessage) -> IncomingMessage {
        let Ok(id) = codec::decode_job_id(&msg.payload) else {
            return invalid_reply(msg.job_type);
        };
        let status = if self.queue.have_id(id) {
            Status::Queued
        } else {
            self.active.status(id).unwrap_or(Status::Invalid)
        };
        IncomingMessage::new(ServiceType::MeshStatus, msg.job_type, codec::encode_job_status(id, status))
    }

    fn handle_make_mesh(&mut self, msg: IncomingMessage) -> IncomingMessage {
        if !self.can_mesh(msg.job_type) {
            METRICS.inc_jobs_rejected();
            return invalid_reply(msg.job_type);
        }
        let id = self.id_gen.next();
        let payload: Arc<[u8]> = Arc::from(msg.payload.as_slice());
        self.queue.add_job(id, msg.job_type, payload.clone());
        METRICS.inc_jobs_queued();
        IncomingMessage::new(
            ServiceType::MakeMesh,
            msg.job_type,
            codec::encode_job_descriptor(id, msg.job_type, &payload),
        )
    }

    /// RetrieveMesh is one-shot and terminal: the job is removed from
    /// `ActiveJobs` after every reply, whether or not a result was present.
    fn handle_retrieve_mesh(&mut self, msg: IncomingMessage) -> IncomingMessage {
        let Ok(id) = codec::decode_job_id(&msg.payload) else {
            return invalid_reply(msg.job_type);
        };
        let result = self.active.result(id).ok().flatten();
        self.active.remove(id);
        let bytes = result.as_deref().unwrap_or(&[]);
        IncomingMessage::new(ServiceType::RetrieveMesh, msg.job_type, codec::encode_job_result(id, bytes))
    }

    fn handle_client_shutdown(&mut self, msg: IncomingMessage) -> IncomingMessage {
        let Ok(id) = codec::decode_job_id(&msg.payload) else {
            return invalid_reply(msg.job_type);
        };

        if self.queue.remove(id) {
            return IncomingMessage::new(
                ServiceType::Shutdown,
                msg.job_type,
                codec::encode_job_status(id, Status::Failed),
            );
        }

        if let Some(job) = self.active.remove(id) {
            let envelope = IncomingMessage::new(ServiceType::Shutdown, JobType::new(0, 0), codec::encode_job_id(id));
            let _ = self.send_to_worker(&job.worker, envelope);
            return IncomingMessage::new(
                ServiceType::Shutdown,
                msg.job_type,
                codec::encode_job_status(id, Status::Failed),
            );
        }

        invalid_reply(msg.job_type)
    }

    // ------------------------------------------------------------------
    // Worker socket handling
    // ------------------------------------------------------------------

    fn handle_worker_frames(&mut self, parts: Vec<Vec<u8>>) {
        let Some(identity_bytes) = parts.first().cloned() else {
            return;
        };
        let identity = PeerIdentity(identity_bytes);
        let body = parts.get(1).map(Vec::as_slice).unwrap_or(&[]);

        match IncomingMessage::decode(body) {
            Ok(msg) => self.handle_worker_message(identity, msg),
            Err(e) => {
                warn!(error = %e, "malformed worker frame");
                METRICS.inc_protocol_errors();
                let _ = self.send_to_worker(&identity, invalid_reply(JobType::new(0, 0)));
            }
        }
    }

    fn handle_worker_message(&mut self, identity: PeerIdentity, msg: IncomingMessage) {
        METRICS.inc_messages_received();
        match msg.service {
            ServiceType::CanMesh => {
                self.pool.add_worker(identity.clone(), msg.job_type, self.config.expiry_span());
                METRICS.inc_workers_registered();
            }
            ServiceType::MakeMesh => {
                // "Ready to receive a job": ensure registration, then mark
                // ReadyForWork.
                if !self.pool.have_worker(&identity) {
                    self.pool.add_worker(identity.clone(), msg.job_type, self.config.expiry_span());
                }
                let _ = self.pool.ready_for_work(&identity);
            }
            ServiceType::MeshStatus => {
                if let Ok((id, status)) = codec::decode_job_status(&msg.payload) {
                    self.active.update_status(id, status);
                    match status {
                        Status::Failed => METRICS.inc_jobs_failed(),
                        Status::Finished => METRICS.inc_jobs_finished(),
                        _ => {}
                    }
                }
            }
            ServiceType::RetrieveMesh => {
                if let Ok((id, result)) = codec::decode_job_result(&msg.payload) {
                    self.active.update_result(id, Arc::from(result));
                    METRICS.inc_jobs_finished();
                }
            }
            ServiceType::Shutdown | ServiceType::Invalid => {}
        }

        // Any worker message refreshes its expiry and its active jobs'
        // expiry.
        self.active.refresh(&identity, self.config.expiry_span());
        self.pool.refresh_worker(&identity, self.config.expiry_span());
    }

    // ------------------------------------------------------------------
    // Liveness sweep and dispatch
    // ------------------------------------------------------------------

    fn sweep(&mut self, now: Instant) {
        self.active.mark_expired(now);
        for dead in self.pool.purge_dead(now) {
            self.active.fail_all_for_worker(&dead);
            METRICS.inc_workers_purged();
        }
    }

    fn dispatch(&mut self) {
        self.factory.update_count();

        // Phase A — drain "waiting-for-worker".
        for job_type in self.queue.waiting_for_worker_types() {
            self.assign_one(job_type);
        }

        // Phase B — opportunistic match.
        for job_type in self.queue.queued_job_types() {
            self.assign_one(job_type);
        }

        // Phase C — request creation, suppressing spawn storms for types
        // already awaiting a factory-provided worker.
        let waiting = self.queue.waiting_for_worker_types();
        for job_type in self.queue.queued_job_types() {
            if self.pool.have_waiting_worker(job_type) || waiting.contains(&job_type) {
                continue;
            }
            METRICS.inc_spawn_attempts();
            if self.factory.create_worker(job_type) {
                self.queue.worker_dispatched(job_type);
            } else {
                METRICS.inc_spawn_failures();
            }
        }
    }

    /// Takes one queued job of `job_type` and hands it to one ready
    /// worker of that type, if both exist. No-op otherwise.
    fn assign_one(&mut self, job_type: JobType) {
        if !self.pool.have_waiting_worker(job_type) {
            return;
        }
        let Ok(job) = self.queue.take_job(job_type) else {
            return;
        };
        let worker = self
            .pool
            .take_worker(job_type)
            .expect("have_waiting_worker just confirmed a ready worker of this type");
        self.assign_job_to_worker(worker, job);
    }

    /// The handoff primitive: insert into `ActiveJobs`,
    /// then transmit a MakeMesh envelope carrying the job to the worker.
    fn assign_job_to_worker(&mut self, worker: PeerIdentity, job: Job) {
        self.active.add(worker.clone(), job.id, job.job_type, self.config.expiry_span());
        let envelope = IncomingMessage::new(
            ServiceType::MakeMesh,
            job.job_type,
            codec::encode_job_descriptor(job.id, job.job_type, &job.payload),
        );
        let _ = self.send_to_worker(&worker, envelope);
        METRICS.inc_jobs_dispatched();
    }

    // ------------------------------------------------------------------
    // Socket I/O
    // ------------------------------------------------------------------

    fn send_to_client(&self, identity: &PeerIdentity, msg: IncomingMessage) -> Result<()> {
        self.client_socket
            .send_multipart([identity.as_bytes().to_vec(), msg.encode()], 0)
            .context("failed to send client reply")?;
        METRICS.inc_messages_sent();
        Ok(())
    }

    fn send_to_worker(&self, identity: &PeerIdentity, msg: IncomingMessage) -> Result<()> {
        self.worker_socket
            .send_multipart([identity.as_bytes().to_vec(), msg.encode()], 0)
            .context("failed to send worker message")?;
        METRICS.inc_messages_sent();
        Ok(())
    }
}

fn invalid_reply(job_type: JobType) -> IncomingMessage {
    IncomingMessage::new(ServiceType::Invalid, job_type, Vec::new())
}

fn try_recv(socket: &zmq::Socket) -> Result<Option<Vec<Vec<u8>>>> {
    match socket.recv_multipart(zmq::DONTWAIT) {
        Ok(parts) => Ok(Some(parts)),
        Err(zmq::Error::EAGAIN) => Ok(None),
        Err(e) => Err(anyhow::anyhow!("zmq recv error: {e}")),
    }
}

/// Rewrites the ROUTER socket's ephemeral bound port onto
/// `advertised_host`, so spawned workers connect to a reachable address
/// rather than whatever interface ZMQ bound to.
fn bound_endpoint(socket: &zmq::Socket, advertised_host: &str) -> Result<String> {
    let endpoint = socket
        .get_last_endpoint()
        .context("failed to query bound endpoint")?
        .map_err(|_| anyhow::anyhow!("bound endpoint is not valid UTF-8"))?;
    let port = endpoint
        .rsplit(':')
        .next()
        .ok_or_else(|| anyhow::anyhow!("bound endpoint {endpoint} has no port"))?;
    Ok(format!("tcp://{advertised_host}:{port}"))
}
