/// Integration tests for named port allocation
///
/// Ports are allocated before anything is spawned: reserved ports and ports
/// that fail to bind are skipped, names are allocated in lexical order, and
/// allocated ports flow into templated environment values.
mod common;

use bundle_runtime::{Error, Supervisor};
use common::{Behavior, FakeNetwork, FakeRunner, TestBundle};
use serde_json::json;
use std::time::Duration;

fn port_manifest() -> bundle_runtime::Manifest {
    common::manifest(json!({
        "app": {"name": "demo", "version": "1.0.0"},
        "ports": {"default_range": {"min": 41000, "max": 41010}, "reserved": [41000]},
        "services": [
            {
                "id": "api",
                "binaries": {"default": {"path": "bin/api"}},
                "ports": {"requested": [{"name": "http"}, {"name": "admin"}]}
            },
            {
                "id": "web",
                "binaries": {"default": {
                    "path": "bin/web",
                    "args": ["--port", "${web.http}"],
                    "env": {"API_URL": "http://127.0.0.1:${api.http}"}
                }},
                "dependencies": ["api"],
                "ports": {"requested": [{"name": "http", "range": {"min": 41005, "max": 41006}}]}
            }
        ]
    }))
}

#[tokio::test]
async fn test_ports_skip_reserved_and_busy() {
    let bundle = TestBundle::new(&["api", "web"]);
    let runner = FakeRunner::new();
    let mut caps = common::capabilities(runner.clone());
    caps.network = FakeNetwork::with_busy([41001]);

    let supervisor = Supervisor::builder()
        .manifest(port_manifest())
        .paths(bundle.paths())
        .capabilities(caps)
        .start()
        .await
        .unwrap();

    let ports = supervisor.ports();
    // 41000 reserved, 41001 busy, "admin" sorts before "http"
    assert_eq!(ports["api"]["admin"], 41002);
    assert_eq!(ports["api"]["http"], 41003);
    assert_eq!(ports["web"]["http"], 41005);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_ports_are_rendered_into_env_and_args() {
    let bundle = TestBundle::new(&["api", "web"]);
    let runner = FakeRunner::new();
    let supervisor = common::start(&bundle, port_manifest(), runner.clone())
        .await
        .unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || supervisor.all_ready()).await);

    let web = runner
        .spawned()
        .into_iter()
        .find(|spec| spec.program.ends_with("bin/web"))
        .expect("web was spawned");
    let api_port = supervisor.ports()["api"]["http"];
    let web_port = supervisor.ports()["web"]["http"];
    assert_eq!(web.env["API_URL"], format!("http://127.0.0.1:{}", api_port));
    assert_eq!(web.args, vec!["--port".to_string(), web_port.to_string()]);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_range_fails_before_spawning() {
    let bundle = TestBundle::new(&["api"]);
    let runner = FakeRunner::new();
    runner.set("api", Behavior::LongRunning);
    let mut caps = common::capabilities(runner.clone());
    caps.network = FakeNetwork::with_busy([42000, 42001]);

    let manifest = common::manifest(json!({
        "app": {"name": "demo", "version": "1.0.0"},
        "services": [{
            "id": "api",
            "binaries": {"default": {"path": "bin/api"}},
            "ports": {"requested": [{"name": "http", "range": {"min": 42000, "max": 42001}}]}
        }]
    }));

    let result = Supervisor::builder()
        .manifest(manifest)
        .paths(bundle.paths())
        .capabilities(caps)
        .start()
        .await;

    match result {
        Err(Error::Port { service, port_name, .. }) => {
            assert_eq!(service, "api");
            assert_eq!(port_name, "http");
        }
        other => panic!("expected a port error, got {:?}", other.map(|_| ())),
    }
    assert!(runner.spawned_programs().is_empty());
    assert!(!bundle.data_dir().exists());
}

#[tokio::test]
async fn test_malformed_range_is_rejected() {
    let bundle = TestBundle::new(&["api"]);
    let manifest = common::manifest(json!({
        "app": {"name": "demo", "version": "1.0.0"},
        "services": [{
            "id": "api",
            "binaries": {"default": {"path": "bin/api"}},
            "ports": {"requested": [{"name": "http", "range": {"min": 5000, "max": 4000}}]}
        }]
    }));

    let result = common::start(&bundle, manifest, FakeRunner::new()).await;
    assert!(matches!(result, Err(Error::Port { .. })));
}

mod proptests {
    use super::*;
    use bundle_runtime::parameter::PortAllocator;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Allocated ports are unique, inside their range and never reserved.
        #[test]
        fn prop_ports_unique_in_range(
            requests in prop::collection::vec(1usize..4, 1..6),
            reserved in prop::collection::btree_set(43000u16..43040, 0..10),
            busy in prop::collection::hash_set(43000u16..43040, 0..10),
        ) {
            let services: Vec<_> = requests
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    let names: Vec<_> = (0..*n).map(|p| json!({"name": format!("p{}", p)})).collect();
                    json!({"id": format!("svc-{}", i), "ports": {"requested": names}})
                })
                .collect();
            let manifest = common::manifest(json!({
                "app": {"name": "demo", "version": "1.0.0"},
                "ports": {"default_range": {"min": 43000, "max": 43040}, "reserved": reserved},
                "services": services,
            }));

            let allocator = PortAllocator::new(&manifest, FakeNetwork::with_busy(busy.iter().copied()));
            let total: usize = requests.iter().sum();
            let free = (43000u16..=43040)
                .filter(|p| !reserved.contains(p) && !busy.contains(p))
                .count();

            match allocator.allocate(&manifest) {
                Ok(map) => {
                    let ports: Vec<u16> = map.values().flat_map(|m| m.values().copied()).collect();
                    prop_assert_eq!(ports.len(), total);
                    let unique: HashSet<u16> = ports.iter().copied().collect();
                    prop_assert_eq!(unique.len(), total);
                    for port in ports {
                        prop_assert!((43000..=43040).contains(&port));
                        prop_assert!(!reserved.contains(&port));
                        prop_assert!(!busy.contains(&port));
                    }
                    prop_assert_eq!(allocator.map(), map);
                }
                Err(e) => {
                    prop_assert!(total > free, "failed with {} free ports: {}", free, e);
                    prop_assert!(
                        matches!(e, Error::Port { .. }),
                        "expected a port error, got {}",
                        e
                    );
                    prop_assert!(allocator.map().is_empty());
                }
            }
        }
    }
}
