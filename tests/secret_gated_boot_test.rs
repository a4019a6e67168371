/// Integration tests for secret-gated boot
///
/// With a required secret missing, boot allocates ports but defers the
/// launch. A rejected submission stores nothing; an accepted one persists the
/// values and starts the launch exactly once.
mod common;

use bundle_runtime::parameter::SecretValues;
use bundle_runtime::service::WAITING_FOR_SECRETS;
use bundle_runtime::{Error, Manifest};
use common::{FakeRunner, TestBundle};
use serde_json::json;
use std::time::Duration;

fn secret_manifest() -> Manifest {
    common::manifest(json!({
        "app": {"name": "demo", "version": "1.0.0"},
        "secrets": [
            {"id": "api-key", "class": "api_key", "description": "Provider key"},
            {"id": "tls-cert", "required": false, "target": {"type": "file", "path": "certs/tls.pem"}}
        ],
        "services": [{
            "id": "api",
            "binaries": {"default": {"path": "bin/api"}},
            "secrets": ["api-key", "tls-cert"],
            "ports": {"requested": [{"name": "http"}]}
        }]
    }))
}

fn values(pairs: &[(&str, &str)]) -> SecretValues {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_launch_waits_for_required_secret() {
    let bundle = TestBundle::new(&["api"]);
    let runner = FakeRunner::new();
    let supervisor = common::start(&bundle, secret_manifest(), runner.clone())
        .await
        .unwrap();

    assert!(!supervisor.launch_started());
    let status = supervisor.status("api").unwrap();
    assert!(!status.ready);
    assert_eq!(status.message, WAITING_FOR_SECRETS);
    // Ports are allocated even while deferred
    assert!(supervisor.ports()["api"].contains_key("http"));
    assert!(bundle.telemetry_events().contains(&"launch_deferred".to_string()));

    // Optional secret alone is not enough
    let err = supervisor
        .submit_secrets(values(&[("tls-cert", "PEM")]))
        .unwrap_err();
    assert!(matches!(err, Error::MissingSecrets(ref ids) if ids == &vec!["api-key".to_string()]));
    assert!(!bundle.data_dir().join("secrets.json").exists());
    assert!(!supervisor.launch_started());

    let summaries = supervisor.secret_summaries();
    assert!(summaries.iter().all(|s| !s.has_value));

    supervisor
        .submit_secrets(values(&[("api-key", "sk-test"), ("tls-cert", "PEM")]))
        .unwrap();
    assert!(supervisor.launch_started());
    assert!(common::wait_until(Duration::from_secs(5), || supervisor.is_ready("api")).await);

    let spawned = runner.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].env["API_KEY"], "sk-test");
    let cert_path = bundle.bundle_root().join("certs").join("tls.pem");
    assert_eq!(
        spawned[0].env["SECRET_FILE_TLS_CERT"],
        cert_path.to_string_lossy()
    );
    assert_eq!(std::fs::read_to_string(&cert_path).unwrap(), "PEM");

    // A later update does not launch twice
    supervisor
        .submit_secrets(values(&[("api-key", "sk-rotated")]))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runner.spawned().len(), 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_persisted_secrets_launch_on_next_boot() {
    let bundle = TestBundle::new(&["api"]);

    let first = common::start(&bundle, secret_manifest(), FakeRunner::new())
        .await
        .unwrap();
    first.submit_secrets(values(&[("api-key", "sk-test")])).unwrap();
    first.shutdown().await;

    let secrets_file = bundle.data_dir().join("secrets.json");
    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&secrets_file).unwrap()).unwrap();
    assert_eq!(stored["secrets"]["api-key"], "sk-test");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&secrets_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let runner = FakeRunner::new();
    let second = common::start(&bundle, secret_manifest(), runner.clone())
        .await
        .unwrap();
    assert!(second.launch_started());
    assert!(common::wait_until(Duration::from_secs(5), || second.is_ready("api")).await);
    assert_eq!(runner.spawned()[0].env["API_KEY"], "sk-test");

    second.shutdown().await;
}

#[tokio::test]
async fn test_blank_value_counts_as_missing() {
    let bundle = TestBundle::new(&["api"]);
    let supervisor = common::start(&bundle, secret_manifest(), FakeRunner::new())
        .await
        .unwrap();

    let err = supervisor
        .submit_secrets(values(&[("api-key", "   ")]))
        .unwrap_err();
    assert!(matches!(err, Error::MissingSecrets(_)));
    assert!(!supervisor.launch_started());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_secrets_file_is_treated_as_empty() {
    let bundle = TestBundle::new(&["api"]);
    std::fs::create_dir_all(bundle.data_dir()).unwrap();
    std::fs::write(bundle.data_dir().join("secrets.json"), "{{{").unwrap();

    let supervisor = common::start(&bundle, secret_manifest(), FakeRunner::new())
        .await
        .unwrap();
    assert!(!supervisor.launch_started());
    assert_eq!(supervisor.status("api").unwrap().message, WAITING_FOR_SECRETS);

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_submissions_keep_every_value() {
    let bundle = TestBundle::new(&["api"]);
    let runner = FakeRunner::new();
    let supervisor = common::start(&bundle, secret_manifest(), runner.clone())
        .await
        .unwrap();

    let barrier = std::sync::Arc::new(std::sync::Barrier::new(16));
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let supervisor = supervisor.clone();
            let barrier = barrier.clone();
            tokio::task::spawn_blocking(move || {
                barrier.wait();
                supervisor.submit_secrets(values(&[
                    ("api-key", "sk-test"),
                    (&format!("opt{}", i), "v0"),
                ]))
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let raw = std::fs::read_to_string(bundle.data_dir().join("secrets.json")).unwrap();
    let stored: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let stored = stored["secrets"].as_object().unwrap();
    assert!((0..16).all(|i| stored.contains_key(&format!("opt{}", i))));

    assert!(common::wait_until(Duration::from_secs(5), || supervisor.is_ready("api")).await);
    assert_eq!(runner.spawned().len(), 1);

    supervisor.shutdown().await;
}
