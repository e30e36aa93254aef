//! Deployer admission tests.
//!
//! Cover acknowledgment on every branch, dedup, the rect filter, destination
//! routing, error classification and backpressure.

use std::sync::Arc;
use std::time::Duration;

use herald_bridge::{Deployer, DeployerConfig, JobQueue, JobQueueConfig, Topics};
use herald_core::RectFilter;
use herald_test_utils::{
    AckProbe, LedgerOp, RecordingLedger, RecordingPublisher, ScriptedScheduler, content_servers,
    emote, init_test_logging, profile, scene, scene_without_pointers, wearable,
};

struct Harness {
    ledger: RecordingLedger,
    scheduler: ScriptedScheduler,
    scenes: RecordingPublisher,
    wearable_emotes: RecordingPublisher,
    deployer: Arc<Deployer>,
}

fn harness(rect_filter: Option<&str>, with_wearable_emotes: bool) -> Harness {
    init_test_logging();
    harness_with_ledger(RecordingLedger::new(), rect_filter, with_wearable_emotes)
}

fn harness_with_ledger(
    ledger: RecordingLedger,
    rect_filter: Option<&str>,
    with_wearable_emotes: bool,
) -> Harness {
    let scheduler = ScriptedScheduler::new();
    let scenes = RecordingPublisher::new("scenes");
    let wearable_emotes = RecordingPublisher::new("wearable-emotes");

    let deployer = Deployer::new(
        Arc::new(ledger.clone()),
        Arc::new(scheduler.clone()),
        Topics {
            scenes: Some(Arc::new(scenes.clone())),
            wearable_emotes: with_wearable_emotes
                .then(|| Arc::new(wearable_emotes.clone()) as Arc<dyn herald_bridge::Publisher>),
        },
        DeployerConfig {
            rect_filter: rect_filter.map(|rect| rect.parse::<RectFilter>().expect("rect")),
            ..DeployerConfig::default()
        },
    );

    Harness {
        ledger,
        scheduler,
        scenes,
        wearable_emotes,
        deployer: Arc::new(deployer),
    }
}

// ============================================================================
// Acknowledgment and dedup
// ============================================================================

#[tokio::test]
async fn admitted_scene_is_touched_published_then_acknowledged() {
    let h = harness(None, false);
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), Some(probe.handle()))
        .await;

    // Admission returns before the job runs.
    assert_eq!(h.scheduler.scheduled(), 1);
    assert_eq!(probe.count(), 0);

    assert_eq!(h.scheduler.run_pending().await, 1);
    assert_eq!(probe.count(), 1);
    assert_eq!(
        h.ledger.operations(),
        vec![
            LedgerOp::Exists("bafy1".into()),
            LedgerOp::Touch("bafy1".into())
        ]
    );

    let published = h.scenes.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].entity.entity_id, "bafy1");
    assert_eq!(published[0].content_server_urls, content_servers());
}

#[tokio::test]
async fn duplicate_entity_is_acknowledged_without_side_effects() {
    init_test_logging();
    let h = harness_with_ledger(RecordingLedger::with_keys(["bafy1"]), None, false);
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), Some(probe.handle()))
        .await;

    assert_eq!(probe.count(), 1);
    assert_eq!(h.scheduler.scheduled(), 0);
    assert!(h.ledger.touches().is_empty());
    assert!(h.scenes.published().is_empty());
}

#[tokio::test]
async fn second_delivery_of_same_entity_is_deduplicated() {
    let h = harness(None, false);
    let first = AckProbe::new();
    let second = AckProbe::new();

    h.deployer
        .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), Some(first.handle()))
        .await;
    h.scheduler.run_pending().await;
    h.deployer
        .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), Some(second.handle()))
        .await;

    assert_eq!(first.count(), 1);
    assert_eq!(second.count(), 1);
    assert_eq!(h.scheduler.scheduled(), 1);
    assert_eq!(h.scenes.published_ids(), vec!["bafy1"]);
    assert_eq!(h.ledger.touches(), vec!["bafy1"]);
}

#[tokio::test]
async fn missing_callback_behaves_as_noop() {
    let h = harness(None, false);

    h.deployer
        .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), None)
        .await;
    h.scheduler.run_pending().await;

    assert_eq!(h.scenes.published_ids(), vec!["bafy1"]);
}

// ============================================================================
// Rect filter
// ============================================================================

#[tokio::test]
async fn scene_with_a_pointer_inside_the_rect_passes() {
    let h = harness(Some("0,0,15,15"), false);
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(
            scene("bafy1", ["10,10", "20,20"]),
            content_servers(),
            Some(probe.handle()),
        )
        .await;
    h.scheduler.run_pending().await;

    assert_eq!(h.scenes.published_ids(), vec!["bafy1"]);
    assert_eq!(probe.count(), 1);
}

#[tokio::test]
async fn scene_outside_the_rect_is_filtered_without_touching_the_ledger() {
    let h = harness(Some("100,100,200,200"), false);
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(
            scene("bafy1", ["10,10", "20,20"]),
            content_servers(),
            Some(probe.handle()),
        )
        .await;

    assert_eq!(probe.count(), 1);
    assert_eq!(h.scheduler.scheduled(), 0);
    assert!(h.ledger.operations().is_empty());
    assert!(h.scenes.published().is_empty());
}

#[tokio::test]
async fn scene_without_pointers_is_not_filtered() {
    let h = harness(Some("100,100,200,200"), false);

    h.deployer
        .deploy_entity(scene_without_pointers("bafy1"), content_servers(), None)
        .await;
    h.scheduler.run_pending().await;

    assert_eq!(h.scenes.published_ids(), vec!["bafy1"]);
}

#[tokio::test]
async fn scene_with_an_empty_pointer_list_is_filtered() {
    let h = harness(Some("0,0,15,15"), false);
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(
            scene("bafy1", Vec::<String>::new()),
            content_servers(),
            Some(probe.handle()),
        )
        .await;

    assert_eq!(probe.count(), 1);
    assert_eq!(h.scheduler.scheduled(), 0);
    assert!(h.ledger.operations().is_empty());
    assert!(h.scenes.published().is_empty());
}

#[tokio::test]
async fn rect_filter_only_applies_to_scenes() {
    let h = harness(Some("100,100,200,200"), true);

    h.deployer
        .deploy_entity(wearable("w1"), content_servers(), None)
        .await;
    h.scheduler.run_pending().await;

    assert_eq!(h.wearable_emotes.published_ids(), vec!["w1"]);
}

// ============================================================================
// Destinations
// ============================================================================

#[tokio::test]
async fn wearable_without_its_topic_is_acknowledged_immediately() {
    let h = harness(None, false);
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(wearable("w1"), content_servers(), Some(probe.handle()))
        .await;

    assert_eq!(probe.count(), 1);
    assert_eq!(h.scheduler.scheduled(), 0);
    assert!(h.scenes.published().is_empty());
    assert!(h.wearable_emotes.published().is_empty());
}

#[tokio::test]
async fn wearables_and_emotes_go_to_their_topic() {
    let h = harness(None, true);

    h.deployer
        .deploy_entity(wearable("w1"), content_servers(), None)
        .await;
    h.deployer
        .deploy_entity(emote("e1"), content_servers(), None)
        .await;
    h.deployer
        .deploy_entity(scene("s1", ["0,0"]), content_servers(), None)
        .await;
    h.scheduler.run_pending().await;

    assert_eq!(h.wearable_emotes.published_ids(), vec!["w1", "e1"]);
    assert_eq!(h.scenes.published_ids(), vec!["s1"]);
}

#[tokio::test]
async fn unrouted_entity_types_are_acknowledged() {
    let h = harness(None, true);
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(profile("p1"), content_servers(), Some(probe.handle()))
        .await;

    assert_eq!(probe.count(), 1);
    assert_eq!(h.scheduler.scheduled(), 0);
}

// ============================================================================
// Error classification
// ============================================================================

#[tokio::test]
async fn client_error_on_publish_is_acknowledged() {
    let h = harness(None, false);
    h.scenes.fail_with_status(404);
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), Some(probe.handle()))
        .await;
    h.scheduler.run_pending().await;

    assert_eq!(probe.count(), 1);
}

#[tokio::test]
async fn server_error_on_publish_is_left_for_redelivery() {
    let h = harness(None, false);
    h.scenes.fail_with_status(500);
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), Some(probe.handle()))
        .await;
    h.scheduler.run_pending().await;

    assert_eq!(probe.count(), 0);
}

#[tokio::test]
async fn transport_error_without_status_is_left_for_redelivery() {
    let h = harness(None, false);
    h.scenes.fail_with_message("connection reset by peer");
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), Some(probe.handle()))
        .await;
    h.scheduler.run_pending().await;

    assert_eq!(probe.count(), 0);
}

#[tokio::test]
async fn ledger_errors_are_classified_by_status() {
    let h = harness(None, false);
    h.ledger.fail_exists("head request failed with status: 404");
    let permanent = AckProbe::new();

    h.deployer
        .deploy_entity(
            scene("bafy1", ["0,0"]),
            content_servers(),
            Some(permanent.handle()),
        )
        .await;
    assert_eq!(permanent.count(), 1);

    h.ledger.fail_exists("head request failed with status: 500");
    let transient = AckProbe::new();
    h.deployer
        .deploy_entity(
            scene("bafy2", ["0,0"]),
            content_servers(),
            Some(transient.handle()),
        )
        .await;
    assert_eq!(transient.count(), 0);

    assert_eq!(h.scheduler.scheduled(), 0);
}

#[tokio::test]
async fn failed_touch_skips_publishing() {
    let h = harness(None, false);
    h.ledger.fail_touch("disk unavailable");
    let probe = AckProbe::new();

    h.deployer
        .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), Some(probe.handle()))
        .await;
    h.scheduler.run_pending().await;

    assert!(h.scenes.published().is_empty());
    assert_eq!(probe.count(), 0);
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn admission_waits_while_the_scheduler_is_full() {
    let h = harness(None, false);
    h.scheduler.set_size(1000);

    let blocked = {
        let deployer = Arc::clone(&h.deployer);
        tokio::spawn(async move {
            deployer
                .deploy_entity(scene("first", ["0,0"]), content_servers(), None)
                .await;
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());
    assert_eq!(h.scheduler.scheduled(), 0);

    h.scheduler.set_size(999);
    tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .expect("admission resumes once capacity frees up")
        .expect("deploy task");
    assert_eq!(h.scheduler.scheduled(), 1);

    h.deployer
        .deploy_entity(scene("second", ["0,0"]), content_servers(), None)
        .await;
    h.scheduler.run_pending().await;

    assert_eq!(h.scenes.published_ids(), vec!["first", "second"]);
}

#[tokio::test]
async fn zero_max_queue_size_still_admits_into_an_empty_scheduler() {
    init_test_logging();
    let scheduler = ScriptedScheduler::new();
    let scenes = RecordingPublisher::new("scenes");
    let deployer = Deployer::new(
        Arc::new(RecordingLedger::new()),
        Arc::new(scheduler.clone()),
        Topics {
            scenes: Some(Arc::new(scenes.clone())),
            wearable_emotes: None,
        },
        DeployerConfig {
            max_queue_size: 0,
            ..DeployerConfig::default()
        },
    );

    tokio::time::timeout(
        Duration::from_secs(5),
        deployer.deploy_entity(scene("bafy1", ["0,0"]), content_servers(), None),
    )
    .await
    .expect("admission does not block forever");

    assert_eq!(scheduler.scheduled(), 1);
    scheduler.run_pending().await;
    assert_eq!(scenes.published_ids(), vec!["bafy1"]);
}

#[tokio::test]
async fn duplicates_are_acknowledged_even_while_the_scheduler_is_full() {
    init_test_logging();
    let h = harness_with_ledger(RecordingLedger::with_keys(["bafy1"]), None, false);
    h.scheduler.set_size(5000);
    let probe = AckProbe::new();

    tokio::time::timeout(
        Duration::from_secs(5),
        h.deployer
            .deploy_entity(scene("bafy1", ["0,0"]), content_servers(), Some(probe.handle())),
    )
    .await
    .expect("duplicates never wait for capacity");

    assert_eq!(probe.count(), 1);
}

// ============================================================================
// Job queue end to end
// ============================================================================

#[tokio::test]
async fn job_queue_runs_admitted_deployments() {
    init_test_logging();
    let ledger = RecordingLedger::new();
    let scenes = RecordingPublisher::new("scenes");
    let queue = JobQueue::new(
        "deployments",
        JobQueueConfig {
            concurrency: 3,
            timeout: Duration::from_secs(5),
        },
    );
    let deployer = Deployer::new(
        Arc::new(ledger.clone()),
        Arc::new(queue.clone()),
        Topics {
            scenes: Some(Arc::new(scenes.clone())),
            wearable_emotes: None,
        },
        DeployerConfig {
            max_queue_size: 4,
            ..DeployerConfig::default()
        },
    );
    let probe = AckProbe::new();

    for i in 0..20 {
        deployer
            .deploy_entity(
                scene(&format!("bafy{i}"), ["0,0"]),
                content_servers(),
                Some(probe.handle()),
            )
            .await;
    }
    tokio::time::timeout(Duration::from_secs(5), queue.on_idle())
        .await
        .expect("queue drains");
    deployer.on_idle().await;

    assert_eq!(probe.count(), 20);
    assert_eq!(scenes.published().len(), 20);
    assert_eq!(ledger.touches().len(), 20);
}
