use aws_config::BehaviorVersion;
use json_blob_ingestion::config::Config;
use json_blob_ingestion::events;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    json_blob_ingestion::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let clients = json_blob_ingestion::AwsClients::new(&aws_config);
    let config = Config::load_from_env()?;
    let sink = clients.firehose_sink();

    info!(
        "Delivering to {} (max retries {}, base delay {:?})",
        config.delivery_stream_name, config.max_retries, config.base_delay
    );

    run(service_fn(|request: LambdaEvent<events::Combined>| {
        json_blob_ingestion::function_handler(&clients.s3, sink.clone(), &config, request)
    }))
    .await
}
