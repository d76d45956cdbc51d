//! End-to-end play scenarios against the in-memory runtime.

use std::sync::{Arc, Mutex};

use armada_core::checks::LifecycleChecks;
use armada_core::container::ContainerSpec;
use armada_core::environment::Environment;
use armada_core::image::ImageRef;
use armada_core::port::{PortDef, PortSpec};
use armada_core::service::Service;
use armada_core::ship::Ship;

use armada_orchestrator::audit::{AuditTrail, Auditor, PlaySummary};
use armada_orchestrator::progress::{ProgressReporter, TaskProgress};
use armada_orchestrator::runtime::testing::{FakeProvider, RpcCall};
use armada_orchestrator::runtime::RuntimeProvider;
use armada_orchestrator::{Action, FailureKind, Play, PlayOptions, TaskOutcome};

/// Progress recorder keeping the global event order.
struct EventLog {
    events: Mutex<Vec<(String, String)>>,
}

impl EventLog {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }

    fn position(&self, container: &str, event: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|(c, e)| c == container && e.starts_with(event))
    }
}

impl ProgressReporter for EventLog {
    fn update(&self, container: &str, progress: TaskProgress) {
        let label = match progress {
            TaskProgress::Pending => "pending".to_string(),
            TaskProgress::Working { stage } => format!("working: {}", stage),
            TaskProgress::Finished(outcome) => format!("finished: {}", outcome),
        };
        self.events
            .lock()
            .unwrap()
            .push((container.to_string(), label));
    }
}

/// Auditor recording terminal container events.
struct RecordingAuditor {
    ended: Arc<Mutex<Vec<(String, TaskOutcome)>>>,
}

impl Auditor for RecordingAuditor {
    fn play_started(&self, _action: &str, _targets: &[String]) -> armada_orchestrator::Result<()> {
        Ok(())
    }

    fn container_started(&self, _action: &str, _container: &str) -> armada_orchestrator::Result<()> {
        Ok(())
    }

    fn container_ended(
        &self,
        _action: &str,
        container: &str,
        outcome: &TaskOutcome,
    ) -> armada_orchestrator::Result<()> {
        self.ended
            .lock()
            .unwrap()
            .push((container.to_string(), outcome.clone()));
        Ok(())
    }

    fn play_ended(&self, _action: &str, _summary: &PlaySummary) -> armada_orchestrator::Result<()> {
        Ok(())
    }
}

fn tcp_check(port_name: &str) -> LifecycleChecks {
    serde_yaml::from_str(&format!(
        "running: [{{type: tcp, port: {}, attempts: 3}}]",
        port_name
    ))
    .unwrap()
}

/// zookeeper (zk on ship alpha) <- kafka (kafka-1 on ship beta), with real
/// TCP listeners backing the lifecycle checks.
fn kafka_environment(
    zk_port: u16,
    broker_port: u16,
    with_checks: bool,
) -> Arc<Environment> {
    let mut zookeeper = Service::new("zookeeper", "acme/zookeeper:3.9");
    zookeeper.instances = vec!["zk".to_string()];
    let mut kafka = Service::new("kafka", "acme/kafka:3");
    kafka.instances = vec!["kafka-1".to_string()];
    kafka.requires.insert("zookeeper".to_string());

    let mut zk_builder = ContainerSpec::builder(
        "zk",
        "zookeeper",
        "alpha",
        ImageRef::parse("acme/zookeeper:3.9").unwrap(),
    )
    .port(PortSpec::parse("client", &PortDef::Number(zk_port as u32)).unwrap());
    if with_checks {
        zk_builder = zk_builder.checks(tcp_check("client"));
    }

    let mut kafka_builder = ContainerSpec::builder(
        "kafka-1",
        "kafka",
        "beta",
        ImageRef::parse("acme/kafka:3").unwrap(),
    )
    .port(PortSpec::parse("broker", &PortDef::Number(broker_port as u32)).unwrap());
    if with_checks {
        kafka_builder = kafka_builder.checks(tcp_check("broker"));
    }

    Arc::new(
        Environment::new(
            "scenario",
            vec![
                Ship::new("alpha", "127.0.0.1"),
                Ship::new("beta", "127.0.0.1"),
            ],
            vec![],
            vec![zookeeper, kafka],
            vec![zk_builder.build(), kafka_builder.build()],
        )
        .unwrap(),
    )
}

fn independent_environment(count: usize) -> Arc<Environment> {
    let mut services = Vec::new();
    let mut containers = Vec::new();
    for i in 0..count {
        let name = format!("svc-{}", i);
        let image = format!("acme/svc-{}:1", i);
        let mut service = Service::new(&name, &image);
        let instance = format!("svc-{}-1", i);
        service.instances = vec![instance.clone()];
        services.push(service);
        containers.push(
            ContainerSpec::builder(&instance, &name, "alpha", ImageRef::parse(&image).unwrap())
                .build(),
        );
    }

    Arc::new(
        Environment::new(
            "independent",
            vec![Ship::new("alpha", "127.0.0.1")],
            vec![],
            services,
            containers,
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn s1_cascading_start_respects_order_and_projects_env() {
    let zk_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let broker_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let zk_port = zk_listener.local_addr().unwrap().port();
    let broker_port = broker_listener.local_addr().unwrap().port();

    let environment = kafka_environment(zk_port, broker_port, true);
    let provider = Arc::new(FakeProvider::new());
    let events = EventLog::new();

    let play = Play::new(environment, provider.clone() as Arc<dyn RuntimeProvider>)
        .with_progress(events.clone());
    let report = play
        .run(
            Action::Start {
                refresh_images: false,
            },
            &["kafka".to_string()],
            &PlayOptions {
                with_dependencies: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!report.failed());
    assert_eq!(report.result_of("zk").unwrap().outcome, TaskOutcome::Done);
    assert_eq!(
        report.result_of("kafka-1").unwrap().outcome,
        TaskOutcome::Done
    );

    // zookeeper finished before kafka was even scheduled.
    let zk_done = events.position("zk", "finished").unwrap();
    let kafka_pending = events.position("kafka-1", "pending").unwrap();
    assert!(zk_done < kafka_pending);

    // kafka's container was created with the projected discovery variables.
    let beta = provider.fake("beta");
    let requests = beta.create_requests();
    assert_eq!(requests.len(), 1);
    let env = &requests[0].env;
    assert!(env.contains(&"ZOOKEEPER_ZK_HOST=127.0.0.1".to_string()));
    assert!(env.contains(&format!("ZOOKEEPER_ZK_CLIENT_PORT={}", zk_port)));
    assert!(env.contains(&format!("ZOOKEEPER_ZK_CLIENT_INTERNAL_PORT={}", zk_port)));
}

#[tokio::test]
async fn s2_start_when_already_up_is_a_noop() {
    let zk_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let broker_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let zk_port = zk_listener.local_addr().unwrap().port();
    let broker_port = broker_listener.local_addr().unwrap().port();

    let environment = kafka_environment(zk_port, broker_port, true);
    let provider = Arc::new(FakeProvider::new());
    provider.fake("alpha").seed_running("zk", "acme/zookeeper:3.9");
    provider.fake("beta").seed_running("kafka-1", "acme/kafka:3");

    let play = Play::new(environment, provider.clone() as Arc<dyn RuntimeProvider>);
    let report = play
        .run(
            Action::Start {
                refresh_images: false,
            },
            &["kafka".to_string()],
            &PlayOptions {
                with_dependencies: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!report.failed());
    assert_eq!(report.result_of("zk").unwrap().outcome, TaskOutcome::Already);
    assert_eq!(
        report.result_of("kafka-1").unwrap().outcome,
        TaskOutcome::Already
    );

    for ship in ["alpha", "beta"] {
        let fake = provider.fake(ship);
        assert_eq!(fake.count(|c| matches!(c, RpcCall::Create(_))), 0);
        assert_eq!(fake.count(|c| matches!(c, RpcCall::Start(_))), 0);
    }
}

#[test]
fn s3_dependency_cycle_fails_at_load() {
    let mut a = Service::new("a", "acme/a:1");
    a.instances = vec!["a-1".to_string()];
    a.requires.insert("b".to_string());
    let mut b = Service::new("b", "acme/b:1");
    b.instances = vec!["b-1".to_string()];
    b.requires.insert("a".to_string());

    let err = Environment::new(
        "cycle",
        vec![Ship::new("alpha", "127.0.0.1")],
        vec![],
        vec![a, b],
        vec![
            ContainerSpec::builder("a-1", "a", "alpha", ImageRef::parse("acme/a:1").unwrap())
                .build(),
            ContainerSpec::builder("b-1", "b", "alpha", ImageRef::parse("acme/b:1").unwrap())
                .build(),
        ],
    )
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("cycle"));
    assert!(message.contains(" -> "));
}

#[tokio::test]
async fn s4_partial_failure_drains_layer_and_reports_both() {
    let mut x = Service::new("x", "acme/x:1");
    x.instances = vec!["x-1".to_string()];
    let mut y = Service::new("y", "acme/y:1");
    y.instances = vec!["y-1".to_string()];

    let environment = Arc::new(
        Environment::new(
            "partial",
            vec![
                Ship::new("alpha", "127.0.0.1"),
                Ship::new("beta", "127.0.0.1"),
            ],
            vec![],
            vec![x, y],
            vec![
                ContainerSpec::builder("x-1", "x", "alpha", ImageRef::parse("acme/x:1").unwrap())
                    .build(),
                ContainerSpec::builder("y-1", "y", "beta", ImageRef::parse("acme/y:1").unwrap())
                    .build(),
            ],
        )
        .unwrap(),
    );

    let provider = Arc::new(FakeProvider::new());
    provider.fake("alpha").set_image("acme/x:1", "sha256:x");
    let beta = provider.fake("beta");
    beta.set_image("acme/y:1", "sha256:y");
    beta.fail_next("create", "y-1", 500);

    let ended = Arc::new(Mutex::new(Vec::new()));
    let mut audit = AuditTrail::new();
    audit.register(
        Box::new(RecordingAuditor {
            ended: ended.clone(),
        }),
        false,
    );

    let play =
        Play::new(environment, provider.clone() as Arc<dyn RuntimeProvider>).with_audit(audit);
    let report = play
        .run(
            Action::Start {
                refresh_images: false,
            },
            &[],
            &PlayOptions::default(),
        )
        .await
        .unwrap();

    assert!(report.failed());
    assert_eq!(report.result_of("x-1").unwrap().outcome, TaskOutcome::Done);
    match &report.result_of("y-1").unwrap().outcome {
        TaskOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Daemon),
        other => panic!("expected failure, got {other:?}"),
    }

    // x-1 is actually running despite y-1's failure.
    assert!(provider.fake("alpha").state_of("x-1").unwrap().is_running());

    // The audit trail received both terminal events.
    let ended = ended.lock().unwrap();
    assert_eq!(ended.len(), 2);
}

#[tokio::test]
async fn s5_stop_traverses_reverse_order() {
    let environment = kafka_environment(12181, 19092, false);
    let provider = Arc::new(FakeProvider::new());
    provider.fake("alpha").seed_running("zk", "acme/zookeeper:3.9");
    provider.fake("beta").seed_running("kafka-1", "acme/kafka:3");

    let events = EventLog::new();
    let play = Play::new(environment, provider.clone() as Arc<dyn RuntimeProvider>)
        .with_progress(events.clone());
    let report = play
        .run(
            Action::Stop,
            &["kafka".to_string(), "zookeeper".to_string()],
            &PlayOptions::default(),
        )
        .await
        .unwrap();

    assert!(!report.failed());

    // kafka reached its terminal state before zookeeper was scheduled.
    let kafka_done = events.position("kafka-1", "finished").unwrap();
    let zk_pending = events.position("zk", "pending").unwrap();
    assert!(kafka_done < zk_pending);

    // The stop honored the container's stop timeout.
    assert_eq!(
        provider
            .fake("beta")
            .count(|c| matches!(c, RpcCall::Stop(_, 10))),
        1
    );
    assert!(!provider.fake("alpha").state_of("zk").unwrap().is_running());
}

#[tokio::test]
async fn s6_concurrent_starts_coalesce_pulls_per_ship() {
    let image = "acme/worker:1";
    let mut service = Service::new("worker", image);
    service.instances = vec![
        "worker-1".to_string(),
        "worker-2".to_string(),
        "worker-3".to_string(),
    ];

    let containers: Vec<ContainerSpec> = (1..=3)
        .map(|i| {
            ContainerSpec::builder(
                format!("worker-{}", i),
                "worker",
                "alpha",
                ImageRef::parse(image).unwrap(),
            )
            .build()
        })
        .collect();

    let environment = Arc::new(
        Environment::new(
            "coalesce",
            vec![Ship::new("alpha", "127.0.0.1")],
            vec![],
            vec![service],
            containers,
        )
        .unwrap(),
    );

    let provider = Arc::new(FakeProvider::new());
    provider.fake("alpha").set_pull_delay_ms(50);

    let play = Play::new(environment, provider.clone() as Arc<dyn RuntimeProvider>);
    let report = play
        .run(
            Action::Start {
                refresh_images: true,
            },
            &[],
            &PlayOptions::default(),
        )
        .await
        .unwrap();

    assert!(!report.failed());
    assert_eq!(
        provider.fake("alpha").count(|c| matches!(c, RpcCall::Pull(_))),
        1
    );
    for i in 1..=3 {
        assert!(provider
            .fake("alpha")
            .state_of(&format!("worker-{}", i))
            .unwrap()
            .is_running());
    }
}

/// Tracks the maximum number of concurrently in-flight tasks.
struct InFlightTracker {
    active: Mutex<usize>,
    max: Mutex<usize>,
}

impl InFlightTracker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(0),
            max: Mutex::new(0),
        })
    }

    fn max_seen(&self) -> usize {
        *self.max.lock().unwrap()
    }
}

impl ProgressReporter for InFlightTracker {
    fn update(&self, _container: &str, progress: TaskProgress) {
        match progress {
            TaskProgress::Working { ref stage } if stage == "checking container..." => {
                let mut active = self.active.lock().unwrap();
                *active += 1;
                let mut max = self.max.lock().unwrap();
                *max = (*max).max(*active);
            }
            TaskProgress::Finished(_) => {
                let mut active = self.active.lock().unwrap();
                *active = active.saturating_sub(1);
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn concurrency_cap_bounds_in_flight_tasks() {
    let environment = independent_environment(6);
    let provider = Arc::new(FakeProvider::new());
    provider.fake("alpha").set_pull_delay_ms(20);

    let tracker = InFlightTracker::new();
    let play = Play::new(environment, provider.clone() as Arc<dyn RuntimeProvider>)
        .with_progress(tracker.clone());
    let report = play
        .run(
            Action::Start {
                refresh_images: false,
            },
            &[],
            &PlayOptions {
                concurrency: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!report.failed());
    assert!(tracker.max_seen() <= 2, "saw {} in flight", tracker.max_seen());
    assert!(tracker.max_seen() >= 1);
}

#[tokio::test]
async fn ignore_order_collapses_layers() {
    let environment = kafka_environment(12181, 19092, false);
    let provider = Arc::new(FakeProvider::new());

    let play = Play::new(environment, provider.clone() as Arc<dyn RuntimeProvider>);
    let report = play
        .run(
            Action::Start {
                refresh_images: false,
            },
            &[],
            &PlayOptions {
                ignore_order: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Both containers ran even though kafka's dependency ordering was
    // skipped; nothing failed.
    assert!(!report.failed());
    assert_eq!(report.results.len(), 2);
}

#[tokio::test]
async fn failed_layer_aborts_following_layers() {
    let environment = kafka_environment(12181, 19092, false);
    let provider = Arc::new(FakeProvider::new());
    // zookeeper's start will fail; kafka must never be attempted.
    provider.fake("alpha").fail_next("create", "zk", 500);

    let play = Play::new(environment, provider.clone() as Arc<dyn RuntimeProvider>);
    let report = play
        .run(
            Action::Start {
                refresh_images: false,
            },
            &[],
            &PlayOptions {
                with_dependencies: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(report.failed());
    match &report.result_of("kafka-1").unwrap().outcome {
        TaskOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Cancelled),
        other => panic!("expected cancelled outcome, got {other:?}"),
    }
    assert_eq!(
        provider.fake("beta").count(|c| matches!(c, RpcCall::Create(_))),
        0
    );
}

#[tokio::test]
async fn cancellation_prevents_new_layers() {
    let environment = kafka_environment(12181, 19092, false);
    let provider = Arc::new(FakeProvider::new());

    let play = Play::new(environment, provider.clone() as Arc<dyn RuntimeProvider>);
    play.cancel_flag().cancel();

    let report = play
        .run(
            Action::Start {
                refresh_images: false,
            },
            &[],
            &PlayOptions::default(),
        )
        .await
        .unwrap();

    assert!(report.failed());
    for result in &report.results {
        match &result.outcome {
            TaskOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Cancelled),
            other => panic!("expected cancelled outcome, got {other:?}"),
        }
    }
}
