use aws_lambda_events::event::s3::S3Event;
use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent};
use aws_sdk_s3::Client as S3Client;
use lambda_runtime::{Error, LambdaEvent};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::string::String;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::delivery::DeliveryOutcome;
use crate::events::{
    MessageBatchEvent, ResultCode, S3BatchJobEvent, S3BatchJobResponse, S3BatchJobResult,
    S3BatchJobTask,
};
use crate::sink::DynSink;

pub mod clients;
pub mod config;
pub mod delivery;
pub mod events;
pub mod process;
pub mod sink;
pub mod transform;

pub use clients::AwsClients;

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
}

/// What one S3 object turned into.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectReport {
    pub bucket: String,
    pub key: String,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Objects(Vec<ObjectReport>),
    BatchJob(S3BatchJobResponse),
    Sqs(SqsBatchResponse),
}

// lambda handler
pub async fn function_handler(
    s3_client: &S3Client,
    sink: DynSink,
    config: &Config,
    evt: LambdaEvent<events::Combined>,
) -> Result<Response, Error> {
    info!("Handling lambda invocation");
    debug!("Handling event payload: {:?}", evt.payload);

    let response = match evt.payload {
        events::Combined::S3(s3_event) => {
            info!("S3 EVENT Detected");
            let reports = s3_notification(s3_client, &sink, config, s3_event).await?;
            Response::Objects(reports)
        }
        events::Combined::BatchJob(batch_event) => {
            info!("S3 BATCH JOB EVENT Detected");
            Response::BatchJob(batch_job(s3_client, &sink, config, batch_event).await)
        }
        events::Combined::MessageBatch(message_event) => {
            info!("MESSAGE BATCH EVENT Detected");
            Response::BatchJob(message_batch(s3_client, &sink, config, message_event).await)
        }
        events::Combined::Sqs(sqs_event) => {
            info!("SQS EVENT Detected");
            Response::Sqs(sqs(s3_client, &sink, config, sqs_event).await)
        }
    };

    Ok(response)
}

/// Returns the (bucket, key) pairs named by an S3 notification, with keys URL-decoded.
pub fn handle_s3_event(s3_event: S3Event) -> Result<Vec<(String, String)>, Error> {
    debug!("S3 Event: {:?}", s3_event);
    s3_event
        .records
        .into_iter()
        .map(|record| -> Result<(String, String), Error> {
            let bucket = record
                .s3
                .bucket
                .name
                .ok_or("s3 notification has no bucket name")?;
            let key = record
                .s3
                .object
                .key
                .ok_or("s3 notification has no object key")?;

            // notification keys encode spaces as '+'
            let decoded_key = percent_decode_str(&key.replace('+', " "))
                .decode_utf8()?
                .to_string();
            Ok((bucket, decoded_key))
        })
        .collect()
}

/// `arn:aws:s3:::bucket` -> `bucket`
pub fn bucket_from_arn(arn: &str) -> Option<&str> {
    arn.rsplit(":::").next().filter(|bucket| !bucket.is_empty())
}

async fn s3_notification(
    s3_client: &S3Client,
    sink: &DynSink,
    config: &Config,
    s3_event: S3Event,
) -> Result<Vec<ObjectReport>, Error> {
    let mut reports = Vec::new();
    for (bucket, key) in handle_s3_event(s3_event)? {
        let outcome =
            process::s3(s3_client, sink, config, bucket.clone(), key.clone()).await?;
        if !outcome.is_delivered() {
            warn!("s3://{}/{} was not fully delivered: {:?}", bucket, key, outcome);
        }
        reports.push(ObjectReport {
            bucket,
            key,
            outcome,
        });
    }
    Ok(reports)
}

/// Turns an outcome into a result string, or an error when anything was left behind.
fn delivery_summary(stream_name: &str, outcome: &DeliveryOutcome) -> Result<String, Error> {
    match outcome {
        DeliveryOutcome::Delivered { records } => {
            Ok(format!("Delivered {} records to {}", records, stream_name))
        }
        DeliveryOutcome::Partial { delivered, failed } => Err(format!(
            "Delivered {} records to {} but {} were rejected after retries (positions {:?})",
            delivered,
            stream_name,
            failed.len(),
            failed
        )
        .into()),
        DeliveryOutcome::Exhausted {
            attempts,
            last_error,
            ..
        } => Err(format!(
            "Max retries reached. Failed to send messages to {} after {} attempts: {}",
            stream_name, attempts, last_error
        )
        .into()),
    }
}

async fn batch_job(
    s3_client: &S3Client,
    sink: &DynSink,
    config: &Config,
    event: S3BatchJobEvent,
) -> S3BatchJobResponse {
    let mut results = Vec::with_capacity(event.tasks.len());
    for task in &event.tasks {
        let (result_code, result_string) =
            match batch_task(s3_client, sink, config, task).await {
                Ok(summary) => (ResultCode::Succeeded, summary),
                Err(e) => {
                    error!("task {} failed: {}", task.task_id, e);
                    (ResultCode::PermanentFailure, e.to_string())
                }
            };
        results.push(S3BatchJobResult {
            task_id: task.task_id.clone(),
            result_code,
            result_string,
        });
    }

    S3BatchJobResponse {
        invocation_schema_version: event.invocation_schema_version,
        treat_missing_keys_as: ResultCode::PermanentFailure,
        invocation_id: event.invocation_id,
        results,
    }
}

async fn batch_task(
    s3_client: &S3Client,
    sink: &DynSink,
    config: &Config,
    task: &S3BatchJobTask,
) -> Result<String, Error> {
    let bucket = task
        .s3_bucket_arn
        .as_deref()
        .and_then(bucket_from_arn)
        .ok_or_else(|| format!("Bucket name not found in task: {}", task.task_id))?;
    let key = task
        .s3_key
        .as_deref()
        .ok_or_else(|| format!("Object key not found in task: {}", task.task_id))?;
    let key = percent_decode_str(key).decode_utf8()?.to_string();
    info!("Calling json parser with bucket: {} and key: {}", bucket, key);

    if !config.fetch_delay.is_zero() {
        tokio::time::sleep(config.fetch_delay).await;
    }

    let outcome = process::s3(s3_client, sink, config, bucket.to_string(), key).await?;
    delivery_summary(&config.delivery_stream_name, &outcome)
}

async fn message_batch(
    s3_client: &S3Client,
    sink: &DynSink,
    config: &Config,
    event: MessageBatchEvent,
) -> S3BatchJobResponse {
    let mut results = Vec::with_capacity(event.invocation.input_messages.len());
    for (i, message) in event.invocation.input_messages.iter().enumerate() {
        let task_id = message
            .message_id
            .clone()
            .unwrap_or_else(|| format!("message-{}", i));
        let (result_code, result_string) =
            match embedded_notification(s3_client, sink, config, &message.body).await {
                Ok(summary) => (ResultCode::Succeeded, summary),
                Err(e) => {
                    error!("message {} failed: {}", task_id, e);
                    (ResultCode::PermanentFailure, e.to_string())
                }
            };
        results.push(S3BatchJobResult {
            task_id,
            result_code,
            result_string,
        });
    }

    S3BatchJobResponse {
        invocation_schema_version: event.invocation_schema_version,
        treat_missing_keys_as: ResultCode::PermanentFailure,
        invocation_id: event.invocation_id,
        results,
    }
}

async fn sqs(
    s3_client: &S3Client,
    sink: &DynSink,
    config: &Config,
    event: SqsEvent,
) -> SqsBatchResponse {
    let mut batch_item_failures = Vec::new();
    for record in event.records {
        let body = record.body.as_deref().unwrap_or_default();
        if let Err(e) = embedded_notification(s3_client, sink, config, body).await {
            match record.message_id {
                Some(message_id) => {
                    error!("sqs message {} failed: {}", message_id, e);
                    batch_item_failures.push(BatchItemFailure {
                        item_identifier: message_id,
                    });
                }
                None => error!("sqs message without id failed: {}", e),
            }
        }
    }

    SqsBatchResponse {
        batch_item_failures,
    }
}

/// Processes the S3 notification carried in a message body. Succeeds only if
/// every referenced object was fully delivered.
async fn embedded_notification(
    s3_client: &S3Client,
    sink: &DynSink,
    config: &Config,
    body: &str,
) -> Result<String, Error> {
    let s3_event = serde_json::from_str::<S3Event>(body)?;
    let reports = s3_notification(s3_client, sink, config, s3_event).await?;
    if reports.is_empty() {
        return Err("message carries no s3 records".into());
    }

    let summaries = reports
        .iter()
        .map(|report| delivery_summary(&config.delivery_stream_name, &report.outcome))
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(summaries.join("; "))
}
