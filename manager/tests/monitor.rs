mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use manager::daemon::{ProcessEventKind, ProcessStatus};
use manager::services::CrashMonitor;
use serde_json::json;
use shared::entity::notifications::KIND_SYSTEM_ALERT;

fn monitor(env: &TestEnv) -> Arc<CrashMonitor> {
    Arc::new(CrashMonitor::new(
        env.connection.clone(),
        env.instances.clone(),
        env.templates.clone(),
        env.notifications.clone(),
        env.notifier.clone(),
        TEST_PREFIX.to_string(),
    ))
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn test_crash_notifies_exactly_once() {
    let env = setup().await;
    let template = env.seed_template(json!({})).await;
    let instance = env
        .seed_instance(
            template.id,
            InstanceSeed {
                running: true,
                ..Default::default()
            },
        )
        .await;
    let monitor = monitor(&env);
    let name = env.process_name(&instance.id);

    let crash = event(ProcessEventKind::RestartOverlimit, &name, ProcessStatus::Errored, 5);
    monitor.handle_event(&crash).await.unwrap();

    assert!(!env.reload(&instance.id).await.running);

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 1);
    let (user_id, kind, payload) = &sent[0];
    assert_eq!(*user_id, 7);
    assert_eq!(kind, "bot_status_update");
    assert_eq!(payload["instanceId"], json!(instance.id));
    assert_eq!(payload["status"], json!("CRASHED"));
    assert_eq!(payload["running"], json!(false));
    assert_eq!(payload["botName"], json!(template.name));

    let stored = env.notifications.list_for_user(7).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].kind, KIND_SYSTEM_ALERT);
    assert!(!stored[0].read);
    assert!(stored[0].message.contains(&template.name));

    // The daemon reports exit and overlimit for the same death; neither adds anything.
    let exit = event(ProcessEventKind::Exit, &name, ProcessStatus::Errored, 5);
    monitor.handle_event(&exit).await.unwrap();
    monitor.handle_event(&crash).await.unwrap();
    assert_eq!(env.notifier.sent().len(), 1);
    assert_eq!(env.notifications.list_for_user(7).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_transient_exit_is_ignored() {
    let env = setup().await;
    let template = env.seed_template(json!({})).await;
    let instance = env
        .seed_instance(
            template.id,
            InstanceSeed {
                running: true,
                ..Default::default()
            },
        )
        .await;
    let monitor = monitor(&env);
    let name = env.process_name(&instance.id);

    monitor
        .handle_event(&event(ProcessEventKind::Exit, &name, ProcessStatus::WaitingRestart, 1))
        .await
        .unwrap();
    monitor
        .handle_event(&event(ProcessEventKind::Stop, &name, ProcessStatus::Stopped, 1))
        .await
        .unwrap();

    assert!(env.reload(&instance.id).await.running);
    assert!(env.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_foreign_and_unknown_processes_are_ignored() {
    let env = setup().await;
    let monitor = monitor(&env);

    monitor
        .handle_event(&event(ProcessEventKind::Exit, "nginx", ProcessStatus::Errored, 0))
        .await
        .unwrap();
    monitor
        .handle_event(&event(
            ProcessEventKind::Exit,
            &env.process_name("no-such-instance"),
            ProcessStatus::Errored,
            0,
        ))
        .await
        .unwrap();

    assert!(env.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_online_after_restart_marks_recovered() {
    let env = setup().await;
    let template = env.seed_template(json!({})).await;
    let instance = env.seed_instance(template.id, InstanceSeed::default()).await;
    let monitor = monitor(&env);
    let name = env.process_name(&instance.id);

    monitor
        .handle_event(&event(ProcessEventKind::Online, &name, ProcessStatus::Online, 2))
        .await
        .unwrap();

    assert!(env.reload(&instance.id).await.running);
    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].2["status"], json!("RUNNING"));
    // Recovery is real-time only.
    assert!(env.notifications.list_for_user(7).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_consumes_bus_until_closed() {
    let env = setup().await;
    let template = env.seed_template(json!({})).await;
    let instance = env
        .seed_instance(
            template.id,
            InstanceSeed {
                running: true,
                ..Default::default()
            },
        )
        .await;
    let monitor = monitor(&env);

    let handle = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.run().await })
    };
    wait_for(|| {
        let monitor = monitor.clone();
        async move { monitor.is_initialized() }
    })
    .await;
    // Give the subscription a moment to attach before publishing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A second run while the first is active is a no-op.
    monitor.run().await.unwrap();

    env.daemon.emit(event(
        ProcessEventKind::Exit,
        &env.process_name(&instance.id),
        ProcessStatus::Errored,
        5,
    ));
    wait_for(|| {
        let instances = env.instances.clone();
        let id = instance.id.clone();
        async move { !instances.find_by_id(&id).await.unwrap().unwrap().running }
    })
    .await;
    assert_eq!(env.notifier.sent().len(), 1);

    env.daemon.close_bus();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!monitor.is_initialized());
}
