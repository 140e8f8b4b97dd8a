use std::env;
use std::str::FromStr;
use std::string::String;
use std::time::Duration;

use crate::delivery::RetryPolicy;
use crate::transform::TransformOptions;

pub const DEFAULT_DELIVERY_STREAM: &str = "demo-json-blob-ingestion-firehose";

pub struct Config {
    pub delivery_stream_name: String,
    pub events_field: String,
    pub mask_leakage_threshold: i64,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_batch_records: usize,
    pub max_batch_bytes: usize,
    pub fetch_delay: Duration,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Error parsing {name} - {value:?} is not a valid value: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("{name} must be at least 1")]
    MustBePositive { name: &'static str },
}

fn var_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::InvalidValue {
                name,
                reason: e.to_string(),
                value,
            })
        }
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn load_from_env() -> Result<Config, ConfigError> {
        let conf = Config {
            delivery_stream_name: env::var("DELIVERY_STREAM_NAME")
                .unwrap_or(DEFAULT_DELIVERY_STREAM.to_string()),
            events_field: env::var("EVENTS_FIELD").unwrap_or("events".to_string()),
            mask_leakage_threshold: var_or("MASK_LEAKAGE_THRESHOLD", 40)?,
            max_retries: var_or("MAX_RETRIES", 5)?,
            base_delay: Duration::from_millis(var_or("BASE_DELAY_MS", 100)?),
            max_batch_records: var_or("MAX_BATCH_RECORDS", 500)?,
            max_batch_bytes: var_or("MAX_BATCH_BYTES", 4 * 1024 * 1024)?,
            fetch_delay: Duration::from_millis(var_or("FETCH_DELAY_MS", 1000)?),
        };

        if conf.max_retries == 0 {
            return Err(ConfigError::MustBePositive {
                name: "MAX_RETRIES",
            });
        }
        if conf.max_batch_records == 0 {
            return Err(ConfigError::MustBePositive {
                name: "MAX_BATCH_RECORDS",
            });
        }
        if conf.max_batch_bytes == 0 {
            return Err(ConfigError::MustBePositive {
                name: "MAX_BATCH_BYTES",
            });
        }

        Ok(conf)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_batch_records: self.max_batch_records,
            max_batch_bytes: self.max_batch_bytes,
        }
    }

    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            events_field: self.events_field.clone(),
            threshold: self.mask_leakage_threshold,
        }
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Config {
            delivery_stream_name: self.delivery_stream_name.clone(),
            events_field: self.events_field.clone(),
            mask_leakage_threshold: self.mask_leakage_threshold,
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_batch_records: self.max_batch_records,
            max_batch_bytes: self.max_batch_bytes,
            fetch_delay: self.fetch_delay,
        }
    }
}
