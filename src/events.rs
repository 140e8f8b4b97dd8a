use aws_lambda_events::event::s3::S3Event;
use aws_lambda_events::event::sqs::SqsEvent;

use serde::de::{self, Deserialize, Deserializer};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// S3 Batch Operations invocation. Keys arrive URL-encoded.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3BatchJobEvent {
    pub invocation_schema_version: String,
    pub invocation_id: String,
    #[serde(default)]
    pub job: Option<Value>,
    pub tasks: Vec<S3BatchJobTask>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3BatchJobTask {
    pub task_id: String,
    #[serde(default, alias = "objectKey")]
    pub s3_key: Option<String>,
    #[serde(default)]
    pub s3_version_id: Option<String>,
    #[serde(default, alias = "bucketArn")]
    pub s3_bucket_arn: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Serialize)]
pub enum ResultCode {
    Succeeded,
    PermanentFailure,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3BatchJobResponse {
    pub invocation_schema_version: String,
    pub treat_missing_keys_as: ResultCode,
    pub invocation_id: String,
    pub results: Vec<S3BatchJobResult>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3BatchJobResult {
    pub task_id: String,
    pub result_code: ResultCode,
    pub result_string: String,
}

/// Pre-fetched messages whose bodies each embed an S3 notification.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatchEvent {
    pub invocation_id: String,
    #[serde(default = "default_schema_version")]
    pub invocation_schema_version: String,
    pub invocation: MessageBatchInvocation,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatchInvocation {
    pub input_messages: Vec<InputMessage>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    pub body: String,
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

#[derive(Debug)]
pub enum Combined {
    S3(S3Event),
    BatchJob(S3BatchJobEvent),
    MessageBatch(MessageBatchEvent),
    Sqs(SqsEvent),
}

impl<'de> Deserialize<'de> for Combined {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw_value: Value = Deserialize::deserialize(deserializer)?;
        debug!("raw_value: {:?}", raw_value);

        if let Ok(event) = S3BatchJobEvent::deserialize(&raw_value) {
            tracing::info!("s3 batch job event detected");
            return Ok(Combined::BatchJob(event));
        }

        if let Ok(event) = MessageBatchEvent::deserialize(&raw_value) {
            tracing::info!("message batch event detected");
            return Ok(Combined::MessageBatch(event));
        }

        if let Ok(event) = S3Event::deserialize(&raw_value) {
            if !event.records.is_empty() {
                tracing::info!("s3 event detected");
                return Ok(Combined::S3(event));
            }
        }

        // sqs records are made of optional fields only, so it goes last
        if let Ok(event) = SqsEvent::deserialize(&raw_value) {
            if event.records.is_empty() {
                return Err(de::Error::custom(format!(
                    "unsupported or bad event type: {raw_value}"
                )));
            }
            tracing::info!("sqs event detected");
            return Ok(Combined::Sqs(event));
        }

        Err(de::Error::custom(format!(
            "unsupported event type: {raw_value}"
        )))
    }
}
