//! Redis Streams queue integration tests.

use std::time::Duration;

use pixq_queue::{JobQueue, QueueConfig, QueueMessage, WorkQueue};

fn isolated_queue(visibility_timeout: Duration) -> JobQueue {
    dotenvy::dotenv().ok();

    let suffix = uuid::Uuid::new_v4();
    let config = QueueConfig {
        stream_name: format!("pixq:test:{}:jobs", suffix),
        consumer_group: format!("pixq:test:{}:workers", suffix),
        dlq_stream_name: format!("pixq:test:{}:dlq", suffix),
        visibility_timeout,
        block_ms: 200,
        ..QueueConfig::from_env()
    };
    JobQueue::new(config).expect("Failed to create queue")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_receive_ack() {
    let queue = isolated_queue(Duration::from_secs(600));
    queue.init().await.expect("Failed to initialize queue");

    queue.publish(&QueueMessage::encode("clip.mp4")).await.expect("publish");

    let delivery = queue.receive("c1").await.expect("receive").expect("a message");
    assert_eq!(delivery.attempt, 1);
    assert_eq!(delivery.decode().unwrap(), QueueMessage::encode("clip.mp4"));

    queue.ack(&delivery).await.expect("ack");
    assert_eq!(queue.depth().await.unwrap(), 0);
    assert!(queue.receive("c1").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_messages_published_before_init_are_delivered() {
    let queue = isolated_queue(Duration::from_secs(600));

    queue.publish(&QueueMessage::encode("early.mp4")).await.expect("publish");
    queue.init().await.expect("Failed to initialize queue");

    let delivery = queue.receive("c1").await.unwrap().expect("early message");
    queue.ack(&delivery).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_requeue_then_discard() {
    let queue = isolated_queue(Duration::from_secs(600));
    queue.init().await.unwrap();
    queue.publish(&QueueMessage::encode("retry.mp4")).await.unwrap();

    let first = queue.receive("c1").await.unwrap().unwrap();
    queue.requeue(&first).await.unwrap();

    let second = queue.receive("c1").await.unwrap().unwrap();
    assert_eq!(second.attempt, 2);

    queue.discard(&second, "gave up").await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 0);
    assert_eq!(queue.dlq_depth().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_claim_stale_counts_redelivery() {
    let queue = isolated_queue(Duration::from_millis(50));
    queue.init().await.unwrap();
    queue.publish(&QueueMessage::encode("stale.mp4")).await.unwrap();

    let lost = queue.receive("crashed").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let claimed = queue.claim_stale("rescuer").await.unwrap().unwrap();
    assert_eq!(claimed.id, lost.id);
    assert_eq!(claimed.attempt, 2);
    assert!(queue.claim_stale("rescuer").await.unwrap().is_none());

    queue.ack(&claimed).await.unwrap();
}
