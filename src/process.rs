use aws_sdk_s3::Client;
use flate2::read::MultiGzDecoder;
use lambda_runtime::Error;
use serde_json::Value;
use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::delivery::{self, DeliveryOutcome};
use crate::sink::DynSink;
use crate::transform::{self, TransformError};

#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("failed to read s3://{bucket}/{key} - {reason}")]
    Fetch {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("failed to decode {key} - {reason}")]
    Decode { key: String, reason: String },
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Fetches one object, transforms its events and delivers the result.
pub async fn s3(
    s3_client: &Client,
    sink: &DynSink,
    config: &Config,
    bucket: String,
    key: String,
) -> Result<DeliveryOutcome, ProcessError> {
    info!("Processing s3://{}/{}", bucket, key);
    let raw_data = get_bytes_from_s3(s3_client, bucket.clone(), key.clone())
        .await
        .map_err(|e| ProcessError::Fetch {
            bucket: bucket.clone(),
            key: key.clone(),
            reason: e.to_string(),
        })?;

    let document = parse_document(raw_data, &key)?;
    let records = transform::transform(document, &config.transform_options())?;
    info!("{} records selected from {}", records.len(), key);

    Ok(delivery::deliver(
        sink,
        &config.delivery_stream_name,
        &records,
        &config.retry_policy(),
    )
    .await)
}

pub fn parse_document(raw_data: Vec<u8>, key: &str) -> Result<Value, ProcessError> {
    let decode_error = |reason: String| ProcessError::Decode {
        key: key.to_string(),
        reason,
    };

    let raw_data = if Path::new(key).extension() == Some(OsStr::new("gz")) {
        gunzip(raw_data).map_err(|e| decode_error(e.to_string()))?
    } else {
        raw_data
    };
    let s = String::from_utf8(raw_data).map_err(|e| decode_error(e.to_string()))?;
    debug!("S3 object: {}", s);

    serde_json::from_str(&s).map_err(|e| decode_error(e.to_string()))
}

pub async fn get_bytes_from_s3(
    s3_client: &Client,
    bucket: String,
    key: String,
) -> Result<Vec<u8>, Error> {
    let start_time = Instant::now();
    let request = s3_client
        .get_object()
        .bucket(bucket.clone())
        .key(key.clone())
        .response_content_type("application/json");
    let response = request.send().await?;
    tracing::info!(
        "Received response from S3 in {}ms",
        start_time.elapsed().as_millis()
    );

    let mut data = Vec::with_capacity(response.content_length.unwrap_or(64 * 1024) as usize);
    let mut body = response.body;
    while let Some(result) = body.next().await {
        let bytes = result?;
        data.extend_from_slice(&bytes[..])
    }

    tracing::info!(
        "Downloaded file from S3 in {}ms. Actual size: {} bytes. Name of the file: {}",
        start_time.elapsed().as_millis(),
        data.len(),
        key
    );

    Ok(data)
}

fn gunzip(compressed_data: Vec<u8>) -> Result<Vec<u8>, Error> {
    if compressed_data.is_empty() {
        tracing::warn!("Input data is empty, cannot ungzip a zero-byte file.");
        return Ok(Vec::new());
    }
    let mut decoder = MultiGzDecoder::new(&compressed_data[..]);
    let mut output = Vec::new();
    decoder.read_to_end(&mut output)?;
    Ok(output)
}
