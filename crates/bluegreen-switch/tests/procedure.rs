//! Switch procedure against the local backend and real loopback services.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;

use bluegreen_cluster::{Cluster, ClusterError, LocalCluster};
use bluegreen_core::{BgConfig, Environment};
use bluegreen_demo::{AppState, DemoConfig};
use bluegreen_state::StateStore;
use bluegreen_switch::{ReleasePhase, SwitchError, Switcher};

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

async fn demo(env: &str) -> String {
    let config = DemoConfig::for_environment(env, "v1");
    serve(bluegreen_demo::router(AppState::new(config))).await
}

async fn broken() -> String {
    serve(
        Router::new()
            .route("/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route("/api/info", get(|| async { "{}" })),
    )
    .await
}

/// Healthy for the first health check only.
async fn degrading() -> String {
    let calls = Arc::new(AtomicUsize::new(0));
    serve(
        Router::new()
            .route(
                "/health",
                get(move || {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            StatusCode::OK
                        } else {
                            StatusCode::SERVICE_UNAVAILABLE
                        }
                    }
                }),
            )
            .route("/api/info", get(|| async { "{}" })),
    )
    .await
}

struct Harness {
    cluster: Arc<LocalCluster>,
    switcher: Switcher,
}

fn harness_with(blue: &str, green: &str, tweak: impl FnOnce(&mut BgConfig)) -> Harness {
    let mut config = BgConfig::default();
    config.health.timeout = "2s".to_string();
    config
        .cluster
        .endpoints
        .insert("blue".to_string(), blue.to_string());
    config
        .cluster
        .endpoints
        .insert("green".to_string(), green.to_string());
    tweak(&mut config);

    let cluster = Arc::new(LocalCluster::new(
        StateStore::open_in_memory().unwrap(),
        &config,
    ));
    let dyn_cluster: Arc<dyn Cluster> = cluster.clone();
    Harness {
        cluster,
        switcher: Switcher::new(dyn_cluster, config),
    }
}

fn harness(blue: &str, green: &str) -> Harness {
    harness_with(blue, green, |_| {})
}

#[tokio::test]
async fn unset_selector_defaults_to_blue() {
    let h = harness("127.0.0.1:1", "127.0.0.1:1");
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Blue);
    let status = h.switcher.status().await.unwrap();
    assert!(!status.selector_set);
    assert!(status.environments.iter().all(|e| e.deployment.is_none()));
}

#[tokio::test]
async fn get_active_reads_back_every_switch() {
    let h = harness(&demo("blue").await, &demo("green").await);
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    h.switcher.deploy(Environment::Green, "v1").await.unwrap();

    for env in [Environment::Green, Environment::Blue, Environment::Green] {
        h.switcher.switch(env, false).await.unwrap();
        assert_eq!(h.switcher.get_active().await.unwrap(), env);
    }
}

#[tokio::test]
async fn switching_to_active_environment_is_a_noop() {
    let h = harness(&demo("blue").await, &demo("green").await);
    h.switcher.deploy(Environment::Green, "v1").await.unwrap();
    let first = h.switcher.switch(Environment::Green, false).await.unwrap();
    assert!(first.changed);

    let second = h.switcher.switch(Environment::Green, false).await.unwrap();
    assert!(!second.changed);
    assert_eq!(second.revision, first.revision);
    assert_eq!(h.cluster.selector().await.unwrap().revision, first.revision);
}

#[tokio::test]
async fn deploy_test_switch_scenario() {
    let h = harness(&demo("blue").await, &demo("green").await);
    h.switcher.deploy(Environment::Green, "v0").await.unwrap();
    h.switcher.switch(Environment::Green, false).await.unwrap();

    let record = h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    assert_eq!(record.image.tag(), "v1");

    let verdict = h.switcher.test(Environment::Blue).await.unwrap();
    assert!(verdict.healthy, "{}", verdict.summary());

    let outcome = h.switcher.switch(Environment::Blue, false).await.unwrap();
    assert_eq!(outcome.from, Some(Environment::Green));
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Blue);
}

#[tokio::test]
async fn rollback_refuses_unhealthy_target() {
    let h = harness(&demo("blue").await, &broken().await);
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    h.switcher.deploy(Environment::Green, "v1").await.unwrap();
    h.switcher.switch(Environment::Blue, false).await.unwrap();

    let verdict = h.switcher.test(Environment::Green).await.unwrap();
    assert!(!verdict.healthy);

    let err = h.switcher.rollback().await.unwrap_err();
    assert!(
        matches!(err, SwitchError::RollbackAborted { target: Environment::Green, .. }),
        "{err}"
    );
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Blue);
}

#[tokio::test]
async fn rollback_refuses_undeployed_target() {
    let h = harness(&demo("blue").await, &demo("green").await);
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    h.switcher.switch(Environment::Blue, false).await.unwrap();

    let err = h.switcher.rollback().await.unwrap_err();
    assert!(matches!(err, SwitchError::RollbackAborted { .. }), "{err}");
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Blue);
}

#[tokio::test]
async fn rollback_switches_to_healthy_target() {
    let h = harness(&demo("blue").await, &demo("green").await);
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    h.switcher.deploy(Environment::Green, "v2").await.unwrap();
    h.switcher.switch(Environment::Green, false).await.unwrap();

    let outcome = h.switcher.rollback().await.unwrap();
    assert_eq!(outcome.to, Environment::Blue);
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Blue);
}

#[tokio::test]
async fn switch_requires_ready_replicas_unless_forced() {
    let h = harness(&demo("blue").await, &demo("green").await);

    let err = h
        .switcher
        .switch(Environment::Green, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchError::NotReady { env: Environment::Green }));

    let outcome = h.switcher.switch(Environment::Green, true).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Green);
}

#[tokio::test]
async fn stale_revision_loses() {
    let h = harness(&demo("blue").await, &demo("green").await);
    h.switcher.deploy(Environment::Green, "v1").await.unwrap();

    let stale = h.cluster.selector().await.unwrap();
    h.switcher.switch(Environment::Green, false).await.unwrap();

    let err = h
        .cluster
        .swap_selector(&stale.revision, Environment::Blue)
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Conflict { .. }));
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Green);
}

#[tokio::test]
async fn deploy_fails_when_rollout_never_completes() {
    let h = harness_with("127.0.0.1:1", "127.0.0.1:1", |config| {
        config.cluster.auto_ready = false;
        config.deploy.rollout_timeout_secs = 1;
    });

    let err = h
        .switcher
        .deploy(Environment::Green, "v1")
        .await
        .unwrap_err();
    assert!(
        matches!(err, SwitchError::Cluster(ClusterError::RolloutTimeout { .. })),
        "{err}"
    );
}

#[tokio::test]
async fn scale_refuses_to_empty_active_environment() {
    let h = harness(&demo("blue").await, &demo("green").await);
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    h.switcher.deploy(Environment::Green, "v1").await.unwrap();
    h.switcher.switch(Environment::Blue, false).await.unwrap();

    let err = h.switcher.scale(Environment::Blue, 0).await.unwrap_err();
    assert!(matches!(err, SwitchError::ActiveScaleDown { .. }));

    h.switcher.scale(Environment::Green, 0).await.unwrap();
    let green = h.cluster.deployment(Environment::Green).await.unwrap().unwrap();
    assert_eq!(green.replicas, 0);
}

#[tokio::test]
async fn release_moves_traffic_and_shrinks_previous() {
    let h = harness(&demo("blue").await, &demo("green").await);
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    h.switcher.switch(Environment::Blue, false).await.unwrap();

    let release = h.switcher.release("v2").await.unwrap();
    assert_eq!(release.to, Environment::Green);
    assert_eq!(release.phase, ReleasePhase::Completed);
    assert!(release.history.contains(&ReleasePhase::Verifying));
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Green);

    let status = h.switcher.status().await.unwrap();
    let blue = status.environments[0].deployment.as_ref().unwrap();
    let green = status.environments[1].deployment.as_ref().unwrap();
    assert_eq!(blue.replicas, 1);
    assert_eq!(green.image.tag(), "v2");
    assert_eq!(green.replicas, 3);

    let last = status.recent_switches.last().unwrap();
    assert_eq!(last.from, Some(Environment::Blue));
    assert_eq!(last.to, Environment::Green);
    assert_eq!(last.revision, status.revision);
}

#[tokio::test]
async fn release_loses_to_switch_made_during_rollout() {
    let h = harness_with(&demo("blue").await, &demo("green").await, |config| {
        config.cluster.auto_ready = false;
    });

    let release = h.switcher.release("v2");
    let interfere = async {
        // Wait for the release to apply green, then move traffic under it.
        while h.cluster.deployment(Environment::Green).await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        h.switcher.switch(Environment::Green, true).await.unwrap();
        h.cluster.mark_ready(Environment::Green, 3).unwrap();
    };
    let (result, ()) = tokio::join!(release, interfere);

    let err = result.unwrap_err();
    assert!(
        matches!(
            &err,
            SwitchError::Cluster(ClusterError::Conflict { expected, .. }) if expected == "0"
        ),
        "{err}"
    );
    // The concurrent switch stands.
    let selector = h.cluster.selector().await.unwrap();
    assert_eq!(selector.active, Some(Environment::Green));
    assert_eq!(selector.revision, "1");
}

#[tokio::test]
async fn release_without_verification_skips_verifying() {
    // Green fails every health check after the first, so a verification
    // step would roll the release back.
    let h = harness_with(&demo("blue").await, &degrading().await, |config| {
        config.release.verify_after_switch = false;
    });
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    h.switcher.switch(Environment::Blue, false).await.unwrap();

    let release = h.switcher.release("v2").await.unwrap();
    assert_eq!(release.phase, ReleasePhase::Completed);
    assert!(!release.history.contains(&ReleasePhase::Verifying));
    assert_eq!(
        release.history,
        vec![
            ReleasePhase::Pending,
            ReleasePhase::Deploying,
            ReleasePhase::Testing,
            ReleasePhase::Switching,
            ReleasePhase::ScalingDown,
            ReleasePhase::Completed,
        ]
    );
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Green);
}

#[tokio::test]
async fn release_aborts_before_switching_on_failed_gate() {
    let h = harness(&demo("blue").await, &broken().await);
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    let before = h.switcher.switch(Environment::Blue, false).await.unwrap();

    let err = h.switcher.release("v2").await.unwrap_err();
    assert!(
        matches!(err, SwitchError::Unhealthy { env: Environment::Green, .. }),
        "{err}"
    );

    let selector = h.cluster.selector().await.unwrap();
    assert_eq!(selector.active, Some(Environment::Blue));
    assert_eq!(selector.revision, before.revision);
    let blue = h.cluster.deployment(Environment::Blue).await.unwrap().unwrap();
    assert_eq!(blue.replicas, 3);
}

#[tokio::test]
async fn release_rolls_back_when_verification_fails() {
    let h = harness(&demo("blue").await, &degrading().await);
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    h.switcher.switch(Environment::Blue, false).await.unwrap();

    let err = h.switcher.release("v2").await.unwrap_err();
    match err {
        SwitchError::RolledBack { restored, .. } => assert_eq!(restored, Environment::Blue),
        other => panic!("expected rollback, got {other}"),
    }
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Blue);
    // Previous environment kept its capacity.
    let blue = h.cluster.deployment(Environment::Blue).await.unwrap().unwrap();
    assert_eq!(blue.replicas, 3);
}

#[tokio::test]
async fn release_rolls_back_when_traffic_reaches_wrong_environment() {
    // Green's address answers as blue: healthy status codes, wrong identity.
    let h = harness(&demo("blue").await, &demo("blue").await);
    h.switcher.deploy(Environment::Blue, "v1").await.unwrap();
    h.switcher.switch(Environment::Blue, false).await.unwrap();

    assert!(h.switcher.test(Environment::Green).await.unwrap().healthy);

    let err = h.switcher.release("v2").await.unwrap_err();
    match err {
        SwitchError::RolledBack { restored, reason, .. } => {
            assert_eq!(restored, Environment::Blue);
            assert!(reason.contains("wrong environment"), "{reason}");
        }
        other => panic!("expected rollback, got {other}"),
    }
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Blue);
}

#[tokio::test]
async fn failed_rollback_keeps_verification_context() {
    // Nothing to roll back to: blue was never deployed.
    let h = harness(&demo("blue").await, &degrading().await);

    let err = h.switcher.release("v2").await.unwrap_err();
    match &err {
        SwitchError::RollbackFailed { tag, reason, source } => {
            assert_eq!(tag, "v2");
            assert!(reason.contains("HTTP 503"), "{reason}");
            assert!(
                matches!(**source, SwitchError::RollbackAborted { target: Environment::Blue, .. }),
                "{source}"
            );
        }
        other => panic!("expected failed rollback, got {other}"),
    }
    assert!(err.to_string().contains("failed verification"));
    // Traffic stays where the switch put it.
    assert_eq!(h.switcher.get_active().await.unwrap(), Environment::Green);
}

#[tokio::test]
async fn bootstrap_keeps_current_active() {
    let h = harness(&demo("blue").await, &demo("green").await);
    h.switcher.deploy(Environment::Green, "v1").await.unwrap();
    h.switcher.switch(Environment::Green, false).await.unwrap();

    let manifests = h.switcher.bootstrap().await.unwrap();
    let main = manifests
        .iter()
        .find(|m| m.name == "demo-app")
        .unwrap();
    assert_eq!(main.body["spec"]["selector"]["environment"], "green");
}
