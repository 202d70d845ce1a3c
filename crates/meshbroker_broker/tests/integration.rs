//! End-to-end tests driving a live `Broker` over real ZMQ sockets.
//!
//! Each test plays a client and/or worker as a bare DEALER socket, exactly
//! as a real client or spawned worker would, and asserts on the wire
//! replies — no internal broker state is touched directly.

use meshbroker_broker::{Broker, ProcessWorkerFactory, WorkerFactory};
use meshbroker_protocol::codec::{self, IncomingMessage, ServiceType};
use meshbroker_protocol::{BrokerConfig, JobType, Status};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use zmq::Context;

fn free_tcp_addr() -> String {
    use std::net::TcpListener;
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephem port");
    let addr = listener.local_addr().expect("local addr");
    format!("tcp://127.0.0.1:{}", addr.port())
}

struct TestBroker {
    stop_tx: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    client_addr: String,
    worker_addr: String,
}

impl TestBroker {
    fn spawn(config_fn: impl FnOnce(&mut BrokerConfig)) -> Self {
        Self::spawn_inner(config_fn, None)
    }

    /// Like `spawn`, but binds against a caller-supplied factory instead of
    /// the one `config.worker_cmd` would build, so a test can observe spawn
    /// attempts on that factory alone rather than through the
    /// process-global metrics (which every `TestBroker` in this binary
    /// shares, including ones left ticking in the background by other
    /// concurrently-running tests).
    fn spawn_with_factory(
        config_fn: impl FnOnce(&mut BrokerConfig),
        factory: Box<dyn WorkerFactory>,
    ) -> Self {
        Self::spawn_inner(config_fn, Some(factory))
    }

    fn spawn_inner(
        config_fn: impl FnOnce(&mut BrokerConfig),
        factory: Option<Box<dyn WorkerFactory>>,
    ) -> Self {
        let client_addr = free_tcp_addr();
        let worker_addr = free_tcp_addr();

        let mut config = BrokerConfig {
            client_bind_addr: client_addr.clone(),
            worker_bind_addr: worker_addr.clone(),
            heartbeat_interval: Duration::from_millis(50),
            ..BrokerConfig::default()
        };
        config_fn(&mut config);

        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut broker = match factory {
                Some(factory) => Broker::bind_with_factory(config, factory).expect("bind broker"),
                None => Broker::bind(config).expect("bind broker"),
            };
            broker.run_with_shutdown(Some(stop_rx)).expect("run broker");
        });

        // Give the ROUTER sockets a moment to bind before dialing.
        thread::sleep(Duration::from_millis(50));

        Self {
            stop_tx,
            handle: Some(handle),
            client_addr,
            worker_addr,
        }
    }
}

/// Wraps a `ProcessWorkerFactory`, counting `create_worker` calls
/// independently of the shared `meshbroker_broker::METRICS` counters so a
/// test can assert on spawn attempts for its own broker alone.
struct CountingFactory {
    inner: ProcessWorkerFactory,
    attempts: Arc<AtomicUsize>,
}

impl CountingFactory {
    fn new(command: String, cap: usize) -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: ProcessWorkerFactory::new(command, cap),
                attempts: attempts.clone(),
            },
            attempts,
        )
    }
}

impl WorkerFactory for CountingFactory {
    fn have_support(&self, job_type: JobType) -> bool {
        self.inner.have_support(job_type)
    }

    fn current_count(&self) -> usize {
        self.inner.current_count()
    }

    fn cap(&self) -> usize {
        self.inner.cap()
    }

    fn create_worker(&mut self, job_type: JobType) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.create_worker(job_type)
    }

    fn update_count(&mut self) {
        self.inner.update_count()
    }

    fn add_endpoint(&mut self, uri: &str) {
        self.inner.add_endpoint(uri)
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

struct Peer {
    socket: zmq::Socket,
}

impl Peer {
    fn connect(ctx: &Context, addr: &str) -> Self {
        let socket = ctx.socket(zmq::DEALER).unwrap();
        socket.set_rcvtimeo(2000).unwrap();
        socket.connect(addr).unwrap();
        thread::sleep(Duration::from_millis(20));
        Self { socket }
    }

    fn send(&self, msg: IncomingMessage) {
        self.socket.send(msg.encode(), 0).unwrap();
    }

    fn recv(&self) -> IncomingMessage {
        let frame = self.socket.recv_bytes(0).expect("expected a reply within timeout");
        IncomingMessage::decode(&frame).expect("reply did not decode")
    }
}

/// S1 — happy path: a worker registers and goes ready, a client submits a
/// job, the broker dispatches it, the worker reports completion, and the
/// client retrieves the result.
#[test]
fn s1_happy_path_end_to_end() {
    let broker = TestBroker::spawn(|_| {});
    let ctx = Context::new();
    let jt = JobType::new(1, 1);

    let worker = Peer::connect(&ctx, &broker.worker_addr);
    worker.send(IncomingMessage::new(ServiceType::CanMesh, jt, Vec::new()));
    worker.send(IncomingMessage::new(ServiceType::MakeMesh, jt, Vec::new()));

    // Give the registration a tick to land before the client submits.
    thread::sleep(Duration::from_millis(100));

    let client = Peer::connect(&ctx, &broker.client_addr);
    client.send(IncomingMessage::new(ServiceType::CanMesh, jt, Vec::new()));
    let can_mesh_reply = client.recv();
    assert_eq!(can_mesh_reply.service, ServiceType::CanMesh);
    assert!(codec::decode_bool(&can_mesh_reply.payload).unwrap());

    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"mesh-payload".to_vec()));
    let make_mesh_reply = client.recv();
    assert_eq!(make_mesh_reply.service, ServiceType::MakeMesh);
    let (job_id, decoded_type, payload) = codec::decode_job_descriptor(&make_mesh_reply.payload).unwrap();
    assert_eq!(decoded_type, jt);
    assert_eq!(payload, b"mesh-payload");

    // The worker should now receive the dispatched job.
    let dispatched = worker.recv();
    assert_eq!(dispatched.service, ServiceType::MakeMesh);
    let (dispatched_id, _, dispatched_payload) = codec::decode_job_descriptor(&dispatched.payload).unwrap();
    assert_eq!(dispatched_id, job_id);
    assert_eq!(dispatched_payload, b"mesh-payload");

    // Worker reports progress, then completion with a result.
    worker.send(IncomingMessage::new(
        ServiceType::MeshStatus,
        jt,
        codec::encode_job_status(job_id, Status::InProgress),
    ));
    worker.send(IncomingMessage::new(
        ServiceType::RetrieveMesh,
        jt,
        codec::encode_job_result(job_id, b"mesh-result"),
    ));

    thread::sleep(Duration::from_millis(100));

    client.send(IncomingMessage::new(
        ServiceType::MeshStatus,
        jt,
        codec::encode_job_id(job_id),
    ));
    let status_reply = client.recv();
    let (status_id, status) = codec::decode_job_status(&status_reply.payload).unwrap();
    assert_eq!(status_id, job_id);
    assert_eq!(status, Status::Finished);

    client.send(IncomingMessage::new(
        ServiceType::RetrieveMesh,
        jt,
        codec::encode_job_id(job_id),
    ));
    let result_reply = client.recv();
    let (result_id, result) = codec::decode_job_result(&result_reply.payload).unwrap();
    assert_eq!(result_id, job_id);
    assert_eq!(result, b"mesh-result");

    // A second retrieval of the same (now-removed) job comes back with an
    // empty result rather than an error or a hang.
    client.send(IncomingMessage::new(
        ServiceType::RetrieveMesh,
        jt,
        codec::encode_job_id(job_id),
    ));
    let second_result_reply = client.recv();
    let (second_result_id, second_result) = codec::decode_job_result(&second_result_reply.payload).unwrap();
    assert_eq!(second_result_id, job_id);
    assert!(second_result.is_empty());
}

/// S2 — no worker anywhere supports the job type: CanMesh says no, and a
/// MakeMesh submission is rejected as Invalid rather than queued.
#[test]
fn s2_unsupported_job_type_is_rejected() {
    let broker = TestBroker::spawn(|_| {});
    let ctx = Context::new();
    let jt = JobType::new(9, 9);

    let client = Peer::connect(&ctx, &broker.client_addr);
    client.send(IncomingMessage::new(ServiceType::CanMesh, jt, Vec::new()));
    let reply = client.recv();
    assert!(!codec::decode_bool(&reply.payload).unwrap());

    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"x".to_vec()));
    let reply = client.recv();
    assert_eq!(reply.service, ServiceType::Invalid);
}

/// S3 — a worker dies mid-job (stops heartbeating) and its active job is
/// marked Failed rather than staying InProgress forever.
#[test]
fn s3_dead_worker_fails_its_active_job() {
    let broker = TestBroker::spawn(|cfg| {
        cfg.heartbeat_interval = Duration::from_millis(30);
        cfg.expiry_multiplier = 3;
    });
    let ctx = Context::new();
    let jt = JobType::new(2, 2);

    let worker = Peer::connect(&ctx, &broker.worker_addr);
    worker.send(IncomingMessage::new(ServiceType::CanMesh, jt, Vec::new()));
    worker.send(IncomingMessage::new(ServiceType::MakeMesh, jt, Vec::new()));
    thread::sleep(Duration::from_millis(80));

    let client = Peer::connect(&ctx, &broker.client_addr);
    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"y".to_vec()));
    let reply = client.recv();
    let (job_id, _, _) = codec::decode_job_descriptor(&reply.payload).unwrap();

    // The worker receives the dispatch but never heartbeats again.
    let _dispatched = worker.recv();
    drop(worker);

    // Wait well past heartbeat_interval * expiry_multiplier.
    thread::sleep(Duration::from_millis(300));

    client.send(IncomingMessage::new(
        ServiceType::MeshStatus,
        jt,
        codec::encode_job_id(job_id),
    ));
    let status_reply = client.recv();
    let (status_id, status) = codec::decode_job_status(&status_reply.payload).unwrap();
    assert_eq!(status_id, job_id);
    assert_eq!(status, Status::Failed);
}

/// S4 — a client shuts down its own job while it's still active; the
/// client sees Failed and the worker receives an out-of-band cancellation.
#[test]
fn s4_client_shutdown_of_active_job() {
    let broker = TestBroker::spawn(|_| {});
    let ctx = Context::new();
    let jt = JobType::new(3, 3);

    let worker = Peer::connect(&ctx, &broker.worker_addr);
    worker.send(IncomingMessage::new(ServiceType::CanMesh, jt, Vec::new()));
    worker.send(IncomingMessage::new(ServiceType::MakeMesh, jt, Vec::new()));
    thread::sleep(Duration::from_millis(80));

    let client = Peer::connect(&ctx, &broker.client_addr);
    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"z".to_vec()));
    let reply = client.recv();
    let (job_id, _, _) = codec::decode_job_descriptor(&reply.payload).unwrap();

    let _dispatched = worker.recv();

    client.send(IncomingMessage::new(
        ServiceType::Shutdown,
        jt,
        codec::encode_job_id(job_id),
    ));
    let shutdown_reply = client.recv();
    assert_eq!(shutdown_reply.service, ServiceType::Shutdown);
    let (reply_id, status) = codec::decode_job_status(&shutdown_reply.payload).unwrap();
    assert_eq!(reply_id, job_id);
    assert_eq!(status, Status::Failed);

    // The worker should receive an out-of-band cancellation envelope.
    let cancellation = worker.recv();
    assert_eq!(cancellation.service, ServiceType::Shutdown);
    let cancelled_id = codec::decode_job_id(&cancellation.payload).unwrap();
    assert_eq!(cancelled_id, job_id);
}

/// S4b — shutting down a job still sitting in the queue (never dispatched)
/// also reports Failed, without touching any worker.
#[test]
fn s4b_client_shutdown_of_queued_job() {
    let broker = TestBroker::spawn(|_| {});
    let ctx = Context::new();
    let jt = JobType::new(4, 4);

    // Register a worker so CanMesh passes, but never let it go ready, so
    // the submitted job sits in the queue.
    let worker = Peer::connect(&ctx, &broker.worker_addr);
    worker.send(IncomingMessage::new(ServiceType::CanMesh, jt, Vec::new()));
    thread::sleep(Duration::from_millis(80));

    let client = Peer::connect(&ctx, &broker.client_addr);
    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"q".to_vec()));
    let reply = client.recv();
    let (job_id, _, _) = codec::decode_job_descriptor(&reply.payload).unwrap();

    client.send(IncomingMessage::new(
        ServiceType::Shutdown,
        jt,
        codec::encode_job_id(job_id),
    ));
    let shutdown_reply = client.recv();
    let (reply_id, status) = codec::decode_job_status(&shutdown_reply.payload).unwrap();
    assert_eq!(reply_id, job_id);
    assert_eq!(status, Status::Failed);
}

/// S5 — with a real spawn-capable factory, only one spawn attempt should
/// ever be in flight for a job type at a time; a second submission of the
/// same type before the first worker reports in must not trigger a second
/// spawn.
#[test]
fn s5_spawn_is_suppressed_while_a_worker_is_already_requested() {
    // Counted on this test's own factory instance rather than the
    // process-global METRICS: that counter is shared by every broker in
    // this test binary, including ones other tests (e.g. s6) leave
    // ticking in the background against a permanently-queued job type, so
    // it is not a reliable signal for a single test's spawn count under
    // parallel test execution.
    let (factory, attempts) = CountingFactory::new("sleep 5".to_string(), 4);
    let broker = TestBroker::spawn_with_factory(|_| {}, Box::new(factory));
    let ctx = Context::new();
    let jt = JobType::new(5, 5);

    let client = Peer::connect(&ctx, &broker.client_addr);
    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"a".to_vec()));
    let first = client.recv();
    assert_eq!(first.service, ServiceType::MakeMesh);

    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"b".to_vec()));
    let second = client.recv();
    assert_eq!(second.service, ServiceType::MakeMesh);

    thread::sleep(Duration::from_millis(150));

    assert_eq!(
        attempts.load(Ordering::SeqCst),
        1,
        "a second queued job of the same type must not trigger a second spawn \
         while one is already outstanding"
    );
}

/// S6 — dispatch ordering. Three jobs of the same type are submitted in
/// order A, B, C; two workers become ready. A goes to the first worker to
/// go ready, B to the second, and C remains queued until a third worker
/// shows up.
#[test]
fn s6_dispatch_ordering_across_two_workers_and_three_jobs() {
    let broker = TestBroker::spawn(|_| {});
    let ctx = Context::new();
    let jt = JobType::new(6, 6);

    let client = Peer::connect(&ctx, &broker.client_addr);

    // Two workers register (so CanMesh passes) but neither goes ready
    // until all three jobs are already queued.
    let worker_one = Peer::connect(&ctx, &broker.worker_addr);
    worker_one.send(IncomingMessage::new(ServiceType::CanMesh, jt, Vec::new()));
    let worker_two = Peer::connect(&ctx, &broker.worker_addr);
    worker_two.send(IncomingMessage::new(ServiceType::CanMesh, jt, Vec::new()));
    thread::sleep(Duration::from_millis(80));

    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"A".to_vec()));
    let reply_a = client.recv();
    let (id_a, _, _) = codec::decode_job_descriptor(&reply_a.payload).unwrap();

    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"B".to_vec()));
    let reply_b = client.recv();
    let (id_b, _, _) = codec::decode_job_descriptor(&reply_b.payload).unwrap();

    client.send(IncomingMessage::new(ServiceType::MakeMesh, jt, b"C".to_vec()));
    let reply_c = client.recv();
    let (id_c, _, _) = codec::decode_job_descriptor(&reply_c.payload).unwrap();

    // Both workers go ready in the same tick window.
    worker_one.send(IncomingMessage::new(ServiceType::MakeMesh, jt, Vec::new()));
    worker_two.send(IncomingMessage::new(ServiceType::MakeMesh, jt, Vec::new()));

    let dispatched_to_one = worker_one.recv();
    let (id_to_one, _, payload_to_one) = codec::decode_job_descriptor(&dispatched_to_one.payload).unwrap();
    let dispatched_to_two = worker_two.recv();
    let (id_to_two, _, payload_to_two) = codec::decode_job_descriptor(&dispatched_to_two.payload).unwrap();

    // A and B (the two oldest) go out, in submission order, one per
    // worker; C is not among them and stays queued.
    assert_eq!(id_to_one, id_a);
    assert_eq!(payload_to_one, b"A");
    assert_eq!(id_to_two, id_b);
    assert_eq!(payload_to_two, b"B");
    assert_ne!(id_to_one, id_c);
    assert_ne!(id_to_two, id_c);

    client.send(IncomingMessage::new(
        ServiceType::MeshStatus,
        jt,
        codec::encode_job_id(id_c),
    ));
    let status_reply = client.recv();
    let (status_id, status) = codec::decode_job_status(&status_reply.payload).unwrap();
    assert_eq!(status_id, id_c);
    assert_eq!(status, Status::Queued);
}

/// Property test: MeshStatus for a job id the broker has never seen comes
/// back Invalid, not a panic or a hang.
#[test]
fn unknown_job_id_reports_invalid_status() {
    let broker = TestBroker::spawn(|_| {});
    let ctx = Context::new();
    let jt = JobType::new(7, 7);

    let client = Peer::connect(&ctx, &broker.client_addr);
    let fake_id = meshbroker_protocol::JobIdGenerator::new().next();
    client.send(IncomingMessage::new(
        ServiceType::MeshStatus,
        jt,
        codec::encode_job_id(fake_id),
    ));
    let reply = client.recv();
    let (reply_id, status) = codec::decode_job_status(&reply.payload).unwrap();
    assert_eq!(reply_id, fake_id);
    assert_eq!(status, Status::Invalid);
}

/// Malformed envelopes never crash the broker; they come back Invalid and
/// subsequent well-formed traffic on the same socket still works.
#[test]
fn malformed_envelope_yields_invalid_reply_and_broker_survives() {
    let broker = TestBroker::spawn(|_| {});
    let ctx = Context::new();

    let client = Peer::connect(&ctx, &broker.client_addr);
    client.socket.send(vec![0xFFu8; 3], 0).unwrap();
    let frame = client.socket.recv_bytes(0).expect("reply to malformed frame");
    let reply = IncomingMessage::decode(&frame).unwrap();
    assert_eq!(reply.service, ServiceType::Invalid);

    // The broker should still answer ordinary traffic afterward.
    let jt = JobType::new(8, 8);
    client.send(IncomingMessage::new(ServiceType::CanMesh, jt, Vec::new()));
    let reply = client.recv();
    assert_eq!(reply.service, ServiceType::CanMesh);
}
