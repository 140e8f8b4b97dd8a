use async_trait::async_trait;
use aws_sdk_firehose::error::DisplayErrorContext;
use aws_sdk_firehose::operation::put_record_batch::PutRecordBatchError;
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record;
use aws_sdk_firehose::Client as FirehoseClient;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Result of a single batch write, as seen by the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAttempt {
    Accepted,
    /// `failed` holds positions within the submitted slice.
    PartiallyRejected { failed: Vec<usize> },
    Retryable(String),
    Permanent(String),
}

/// A destination that accepts batches of opaque payloads for a named stream.
#[async_trait]
pub trait IngestionSink {
    async fn put_record_batch(&self, stream_name: &str, records: &[Vec<u8>]) -> BatchAttempt;
}

pub type DynSink = Arc<dyn IngestionSink + Send + Sync>;

#[derive(Clone)]
pub struct FirehoseSink {
    client: FirehoseClient,
}

impl FirehoseSink {
    pub fn new(client: FirehoseClient) -> Self {
        FirehoseSink { client }
    }
}

#[async_trait]
impl IngestionSink for FirehoseSink {
    async fn put_record_batch(&self, stream_name: &str, records: &[Vec<u8>]) -> BatchAttempt {
        let start_time = Instant::now();
        let records = match records
            .iter()
            .map(|data| Record::builder().data(Blob::new(data.clone())).build())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(records) => records,
            Err(e) => return BatchAttempt::Permanent(format!("failed to build record - {}", e)),
        };
        let submitted = records.len();

        let response = self
            .client
            .put_record_batch()
            .delivery_stream_name(stream_name)
            .set_records(Some(records))
            .send()
            .await;

        match response {
            Ok(output) => {
                let failed: Vec<usize> = output
                    .request_responses()
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.error_code().is_some())
                    .map(|(i, entry)| {
                        debug!(
                            "record {} rejected by {}: {} - {}",
                            i,
                            stream_name,
                            entry.error_code().unwrap_or_default(),
                            entry.error_message().unwrap_or_default()
                        );
                        i
                    })
                    .collect();

                tracing::info!(
                    "PutRecordBatch to {} returned in {}ms ({} submitted, {} rejected)",
                    stream_name,
                    start_time.elapsed().as_millis(),
                    submitted,
                    failed.len()
                );

                if failed.is_empty() {
                    BatchAttempt::Accepted
                } else {
                    BatchAttempt::PartiallyRejected { failed }
                }
            }
            Err(err) => {
                let reason = format!("{}", DisplayErrorContext(&err));
                match err.as_service_error() {
                    Some(PutRecordBatchError::ResourceNotFoundException(_))
                    | Some(PutRecordBatchError::InvalidArgumentException(_)) => {
                        warn!("PutRecordBatch to {} failed permanently: {}", stream_name, reason);
                        BatchAttempt::Permanent(reason)
                    }
                    _ => BatchAttempt::Retryable(reason),
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use aws_sdk_firehose::config::retry::RetryConfig;
    use aws_sdk_firehose::config::{BehaviorVersion, Credentials, Region};
    use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
    use aws_smithy_types::body::SdkBody;

    fn replay_sink(status: u16, body: &str) -> FirehoseSink {
        let event = ReplayEvent::new(
            http::Request::builder().body(SdkBody::from("")).unwrap(),
            http::Response::builder()
                .status(status)
                .header("content-type", "application/x-amz-json-1.1")
                .body(SdkBody::from(body.to_string()))
                .unwrap(),
        );

        let conf = aws_sdk_firehose::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(Credentials::new(
                "SOMETESTKEYID",
                "somesecretkey",
                Some("somesessiontoken".to_string()),
                None,
                "",
            ))
            .region(Region::new("eu-central-1"))
            .retry_config(RetryConfig::disabled())
            .http_client(StaticReplayClient::new(vec![event]))
            .build();

        FirehoseSink::new(FirehoseClient::from_conf(conf))
    }

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            b"{\"id\":0}\n".to_vec(),
            b"{\"id\":1}\n".to_vec(),
            b"{\"id\":2}\n".to_vec(),
        ]
    }

    #[tokio::test]
    async fn test_all_records_accepted() {
        let sink = replay_sink(
            200,
            r#"{"FailedPutCount": 0, "Encrypted": false, "RequestResponses": [
                {"RecordId": "r-0"}, {"RecordId": "r-1"}, {"RecordId": "r-2"}
            ]}"#,
        );

        let attempt = sink.put_record_batch("stream", &payloads()).await;
        assert_eq!(attempt, BatchAttempt::Accepted);
    }

    #[tokio::test]
    async fn test_rejected_entries_are_reported_by_position() {
        let sink = replay_sink(
            200,
            r#"{"FailedPutCount": 1, "Encrypted": false, "RequestResponses": [
                {"RecordId": "r-0"},
                {"ErrorCode": "ServiceUnavailableException", "ErrorMessage": "Slow down."},
                {"RecordId": "r-2"}
            ]}"#,
        );

        let attempt = sink.put_record_batch("stream", &payloads()).await;
        assert_eq!(attempt, BatchAttempt::PartiallyRejected { failed: vec![1] });
    }

    #[tokio::test]
    async fn test_missing_stream_is_permanent() {
        let sink = replay_sink(
            400,
            r#"{"__type": "ResourceNotFoundException", "message": "Firehose missing not found."}"#,
        );

        match sink.put_record_batch("missing", &payloads()).await {
            BatchAttempt::Permanent(reason) => {
                assert!(reason.contains("ResourceNotFoundException"), "{}", reason)
            }
            other => panic!("unexpected attempt {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unavailable_service_is_retryable() {
        let sink = replay_sink(
            500,
            r#"{"__type": "ServiceUnavailableException", "message": "Slow down."}"#,
        );

        match sink.put_record_batch("stream", &payloads()).await {
            BatchAttempt::Retryable(reason) => {
                assert!(reason.contains("ServiceUnavailableException"), "{}", reason)
            }
            other => panic!("unexpected attempt {:?}", other),
        }
    }
}
