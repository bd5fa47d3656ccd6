//! Seed a Kafka topic with sample CDC change events.
//!
//! To run this producer:
//! 1. Start Kafka with Docker:
//!    docker run -d --name kafka -p 9092:9092 apache/kafka:latest
//! 2. Run the producer:
//!    cargo run -p cdc-log-kafka-producer -- --brokers localhost:9092
//! 3. Run the consumer in another terminal:
//!    cargo run -- --brokers localhost:9092

use cdc_log_kafka_producer::{publish_sample_change_events, publish_scenario_bodies, KafkaTestProducer};
use clap::Parser;

#[derive(Parser)]
#[command(name = "kafka-producer")]
#[command(about = "Publish sample change events to a Kafka topic")]
struct Args {
    /// Kafka broker address
    #[arg(long, env = "KAFKA_BROKER", default_value = "localhost:9092")]
    brokers: String,

    /// Topic to publish to
    #[arg(long, env = "KAFKA_TOPIC", default_value = "tidb_cdc")]
    topic: String,

    /// Partitions to create the topic with
    #[arg(long, default_value_t = 3)]
    partitions: i32,

    /// Number of change events to publish
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Publish the fixed three-message scenario (including a non-JSON body) instead
    #[arg(long)]
    scenario: bool,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run_main(Args::parse()).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run_main(args: Args) -> anyhow::Result<()> {
    let producer = KafkaTestProducer::new(&args.brokers).await?;
    producer
        .create_topic_if_not_exists(&args.topic, args.partitions)
        .await?;

    if args.scenario {
        publish_scenario_bodies(&producer, &args.topic).await?;
        println!("Published scenario messages to '{}'", args.topic);
    } else {
        let count = publish_sample_change_events(&producer, &args.topic, args.count).await?;
        println!("Successfully published {count} messages to '{}'", args.topic);
    }

    Ok(())
}
