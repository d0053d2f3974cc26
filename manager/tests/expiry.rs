mod common;

use std::sync::Arc;

use chrono::Utc;
use common::*;
use manager::services::ExpiryScheduler;
use serde_json::json;
use shared::entity::bot_instances::ACCOUNT_PAID;
use shared::SchedulerSettings;

fn scheduler(env: &TestEnv) -> ExpiryScheduler {
    ExpiryScheduler::new(
        env.supervisor.clone(),
        env.instances.clone(),
        env.notifier.clone(),
        SchedulerSettings::default(),
    )
}

fn expired() -> chrono::DateTime<Utc> {
    Utc::now() - chrono::Duration::hours(2)
}

#[tokio::test]
async fn test_sweep_stops_and_deactivates_expired_demos() {
    let env = setup().await;
    let template = env.seed_template(json!({})).await;

    let demo = env.seed_instance(template.id, InstanceSeed::default()).await;
    env.supervisor.start(&demo.id).await.unwrap();
    env.set_expiry(&demo.id, expired()).await;

    let paid = env
        .seed_instance(
            template.id,
            InstanceSeed {
                account_type: ACCOUNT_PAID,
                expiry_date: expired(),
                ..Default::default()
            },
        )
        .await;
    let fresh = env.seed_instance(template.id, InstanceSeed::default()).await;

    let report = scheduler(&env).sweep().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.stopped, vec![demo.id.clone()]);
    assert!(report.failed.is_empty());

    let reloaded = env.reload(&demo.id).await;
    assert!(!reloaded.active);
    assert!(!reloaded.running);
    assert!(env.daemon.process(&env.process_name(&demo.id)).is_none());

    assert!(env.reload(&paid.id).await.active);
    assert!(env.reload(&fresh.id).await.active);

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "demo_expired");
    assert_eq!(sent[0].2["instanceId"], json!(demo.id));
    assert!(sent[0].2["message"].as_str().unwrap().contains("Binance"));

    // Already deactivated, so the next sweep finds nothing.
    let again = scheduler(&env).sweep().await.unwrap();
    assert_eq!(again.expired, 0);
    assert_eq!(env.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_sweep_continues_after_a_failure() {
    let env = setup().await;
    let template = env.seed_template(json!({})).await;
    let seed = || InstanceSeed {
        expiry_date: expired(),
        running: true,
        ..Default::default()
    };
    let stuck = env.seed_instance(template.id, seed()).await;
    let ok = env.seed_instance(template.id, seed()).await;
    env.daemon.fail_stop_for(&env.process_name(&stuck.id));

    let report = scheduler(&env).sweep().await.unwrap();
    assert_eq!(report.expired, 2);
    assert_eq!(report.stopped, vec![ok.id.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, stuck.id);

    let stuck_row = env.reload(&stuck.id).await;
    assert!(!stuck_row.running);
    assert!(stuck_row.active);
    assert!(!env.reload(&ok.id).await.active);

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].2["instanceId"], json!(ok.id));
}

#[tokio::test]
async fn test_sweep_with_nothing_expired() {
    let env = setup().await;
    let template = env.seed_template(json!({})).await;
    env.seed_instance(template.id, InstanceSeed::default()).await;

    let report = Arc::new(scheduler(&env)).sweep().await.unwrap();
    assert_eq!(report.expired, 0);
    assert!(env.notifier.sent().is_empty());
}
