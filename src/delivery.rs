use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::sink::{BatchAttempt, DynSink};

/// Firehose accepts at most 500 records per PutRecordBatch call.
pub const MAX_BATCH_RECORDS: usize = 500;
/// Firehose caps a PutRecordBatch request at 4 MiB.
pub const MAX_BATCH_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_batch_records: usize,
    pub max_batch_bytes: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_batch_records: MAX_BATCH_RECORDS,
            max_batch_bytes: MAX_BATCH_BYTES,
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt` (1-based): `base_delay * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "status",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum DeliveryOutcome {
    Delivered {
        records: usize,
    },
    /// `failed` holds positions in the delivered record list.
    Partial {
        delivered: usize,
        failed: Vec<usize>,
    },
    /// `attempts` is the most any single batch used.
    Exhausted {
        attempts: u32,
        failed: Vec<usize>,
        last_error: String,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn delivered(&self) -> usize {
        match self {
            DeliveryOutcome::Delivered { records } => *records,
            DeliveryOutcome::Partial { delivered, .. } => *delivered,
            DeliveryOutcome::Exhausted { .. } => 0,
        }
    }
}

// payloads paired with their position in the caller's record list
type Batch = Vec<(usize, Vec<u8>)>;

#[derive(Debug, Default)]
struct BatchReport {
    delivered: usize,
    attempts: u32,
    failed: Vec<usize>,
    last_error: Option<String>,
}

/// Writes `records` to `stream_name` as newline-terminated JSON lines.
///
/// Records are split into batches bounded by the policy's record and byte
/// limits and sent in order. Each batch gets up to `max_retries` attempts with
/// a `base_delay * 2^attempt` pause after every failed one; on a partial
/// rejection only the rejected records are sent again. Failures are reported
/// through the returned [`DeliveryOutcome`], never as an error.
pub async fn deliver<T: Serialize>(
    sink: &DynSink,
    stream_name: &str,
    records: &[T],
    policy: &RetryPolicy,
) -> DeliveryOutcome {
    if records.is_empty() {
        info!("No records to send");
        return DeliveryOutcome::Delivered { records: 0 };
    }

    let start_time = Instant::now();
    let mut failed = Vec::new();
    let mut last_error = None;
    let mut payloads = Vec::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        match serde_json::to_vec(record) {
            Ok(mut line) => {
                line.push(b'\n');
                payloads.push((position, line));
            }
            Err(e) => {
                error!("failed to serialize record {} - {}", position, e);
                failed.push(position);
                last_error = Some(e.to_string());
            }
        }
    }

    let batches = into_batches(payloads, policy);
    info!(
        "Will send {} records to {} in {} batches",
        records.len(),
        stream_name,
        batches.len()
    );

    let mut delivered = 0;
    let mut attempts = 0;
    for batch in batches {
        let report = deliver_batch(sink, stream_name, batch, policy).await;
        delivered += report.delivered;
        attempts = attempts.max(report.attempts);
        failed.extend(report.failed);
        if report.last_error.is_some() {
            last_error = report.last_error;
        }
    }
    failed.sort_unstable();

    info!(
        "Delivered {} of {} records to {} in {}ms",
        delivered,
        records.len(),
        stream_name,
        start_time.elapsed().as_millis()
    );

    if failed.is_empty() {
        DeliveryOutcome::Delivered { records: delivered }
    } else if delivered > 0 {
        DeliveryOutcome::Partial { delivered, failed }
    } else {
        DeliveryOutcome::Exhausted {
            attempts,
            failed,
            last_error: last_error.unwrap_or_default(),
        }
    }
}

async fn deliver_batch(
    sink: &DynSink,
    stream_name: &str,
    batch: Batch,
    policy: &RetryPolicy,
) -> BatchReport {
    let (mut positions, mut payloads): (Vec<usize>, Vec<Vec<u8>>) = batch.into_iter().unzip();
    let mut report = BatchReport::default();

    for attempt in 1..=policy.max_retries {
        report.attempts = attempt;
        match sink.put_record_batch(stream_name, &payloads).await {
            BatchAttempt::Accepted => {
                report.delivered += payloads.len();
                return report;
            }
            BatchAttempt::PartiallyRejected { failed } => {
                let mut rejected = vec![false; payloads.len()];
                let len = rejected.len();
                for i in failed.into_iter().filter(|i| *i < len) {
                    rejected[i] = true;
                }
                let before = payloads.len();
                let mut flags = rejected.iter();
                positions.retain(|_| *flags.next().unwrap_or(&false));
                let mut flags = rejected.iter();
                payloads.retain(|_| *flags.next().unwrap_or(&false));
                report.delivered += before - payloads.len();

                if payloads.is_empty() {
                    return report;
                }
                report.last_error = Some(format!(
                    "{} of {} records rejected by {}",
                    payloads.len(),
                    before,
                    stream_name
                ));
            }
            BatchAttempt::Retryable(reason) => {
                report.last_error = Some(reason);
            }
            BatchAttempt::Permanent(reason) => {
                error!(
                    "Giving up on {} records for {} - {}",
                    payloads.len(),
                    stream_name,
                    reason
                );
                report.last_error = Some(reason);
                report.failed = positions;
                return report;
            }
        }

        let delay = policy.delay_for(attempt);
        warn!(
            "Attempt {} of {} to {} failed: {}. Backing off for {:?}",
            attempt,
            policy.max_retries,
            stream_name,
            report.last_error.as_deref().unwrap_or_default(),
            delay
        );
        tokio::time::sleep(delay).await;
    }

    error!(
        "Max retries reached. Failed to send {} records to {}",
        payloads.len(),
        stream_name
    );
    report.failed = positions;
    report
}

fn into_batches(payloads: Batch, policy: &RetryPolicy) -> Vec<Batch> {
    let (mut batches, batch, _) = payloads.into_iter().fold(
        (Vec::new(), Vec::new(), 0usize),
        |(mut batches, mut batch, size): (Vec<Batch>, Batch, usize), (position, line)| {
            let new_size = size + line.len();
            if batch.is_empty()
                || (batch.len() < policy.max_batch_records && new_size <= policy.max_batch_bytes)
            {
                batch.push((position, line));
                (batches, batch, new_size)
            } else {
                batches.push(std::mem::take(&mut batch));
                let new_size = line.len();
                batch.push((position, line));
                (batches, batch, new_size)
            }
        },
    );
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}
