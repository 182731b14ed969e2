use std::time::Duration;

use tracing::info;

use crate::queue::Queue;

const QUEUES: [&str; 3] = ["build", "deploy", "cleanup"];

/// Once-per-minute dead-letter / queue-depth observability. Only reads
/// queue depths; does not contend with workers for task rows. Runs
/// until the process exits — there is no automatic recovery from
/// dead-letter.
pub async fn run(queue: Queue) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        for name in QUEUES {
            match (queue.depth(name).await, queue.dead_letter_depth(name).await) {
                (Ok(depth), Ok(dead)) => {
                    info!(queue = name, depth, dead_letter_count = dead, "queue depth");
                }
                (depth, dead) => {
                    tracing::warn!(queue = name, ?depth, ?dead, "failed to read queue depth");
                }
            }
        }
    }
}
