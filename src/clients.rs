use aws_config::SdkConfig;
use aws_sdk_firehose::Client as FirehoseClient;
use aws_sdk_s3::Client as S3Client;
use std::sync::Arc;

use crate::sink::{DynSink, FirehoseSink};

/// A type used to hold the AWS clients required to interact with AWS services
/// used by the lambda function. Built once per execution environment.
#[derive(Clone)]
pub struct AwsClients {
    pub s3: S3Client,
    pub firehose: FirehoseClient,
}

impl AwsClients {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        AwsClients {
            s3: S3Client::new(sdk_config),
            firehose: FirehoseClient::new(sdk_config),
        }
    }

    pub fn firehose_sink(&self) -> DynSink {
        Arc::new(FirehoseSink::new(self.firehose.clone()))
    }
}
