use std::future::Future;

use kafka_types::{DispatchOutcome, InboundMessage};
use tracing::info;

use crate::consumer::{ConsumerConfig, KafkaTransport, Subscription};
use crate::delivery::{DeliveryLoop, DeliverySummary, StopHandle};
use crate::error::{Error, Result};

/// Lifecycle of a [`ConsumerGroupClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Connected,
    Subscribed,
    Running,
    Stopped,
}

/// Consumer group member for one topic
///
/// `connect`, `subscribe` and `run` are called in that order. `stop` may be
/// called from anywhere at any time through the [`StopHandle`].
pub struct ConsumerGroupClient {
    config: ConsumerConfig,
    stop: StopHandle,
    state: ClientState,
    transport: Option<KafkaTransport>,
}

impl ConsumerGroupClient {
    pub fn new(config: ConsumerConfig, stop: StopHandle) -> Self {
        Self {
            config,
            stop,
            state: ClientState::Created,
            transport: None,
        }
    }

    /// Establish that the brokers are reachable.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != ClientState::Created {
            return Err(Error::NotReady("connect called twice"));
        }
        info!(
            "Connecting to Kafka brokers {} as {}",
            self.config.endpoint.bootstrap_servers(),
            self.config.identity.client_id
        );
        let brokers = crate::consumer::probe_cluster(&self.config).await?;
        info!("Connected to Kafka cluster with {brokers} broker(s)");
        self.state = ClientState::Connected;
        Ok(())
    }

    /// Join the consumer group for the subscription's topic.
    ///
    /// Fails if the topic does not exist; topics are never auto-created.
    pub async fn subscribe(&mut self, subscription: Subscription) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(Error::NotReady("subscribe called before connect"));
        }
        let transport = KafkaTransport::subscribe(&self.config, &subscription).await?;
        info!(
            "Subscribed to topic {} in group {} (start offset: {:?})",
            subscription.topic, self.config.identity.group_id, subscription.start_offset
        );
        self.transport = Some(transport);
        self.state = ClientState::Subscribed;
        Ok(())
    }

    /// Deliver messages to `on_message` until stopped.
    ///
    /// Each message's offset is committed once `on_message` has returned for
    /// it, whatever the outcome. Returns after the group has been left.
    pub async fn run<F, Fut>(&mut self, on_message: F) -> Result<DeliverySummary>
    where
        F: Fn(InboundMessage) -> Fut,
        Fut: Future<Output = DispatchOutcome> + Send + 'static,
    {
        let transport = self
            .transport
            .take()
            .ok_or(Error::NotReady("run called before subscribe"))?;
        self.state = ClientState::Running;

        let delivery = DeliveryLoop::new(transport, self.config.concurrency, self.stop.clone());
        let result = delivery.run(on_message).await;
        self.state = ClientState::Stopped;
        result
    }

    /// Request a graceful stop. Calling it more than once has no further effect.
    pub fn stop(&self) {
        if !self.stop.is_stopped() {
            info!("Stop requested, finishing in-flight messages");
        }
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{BrokerEndpoint, ConsumerGroupIdentity, StartOffset};

    fn client() -> ConsumerGroupClient {
        let config = ConsumerConfig::new(
            BrokerEndpoint::new(["localhost:9092"]).unwrap(),
            ConsumerGroupIdentity {
                client_id: "sre-consumer".to_string(),
                group_id: "sre-consumer-group".to_string(),
            },
        );
        ConsumerGroupClient::new(config, StopHandle::new())
    }

    #[tokio::test]
    async fn test_run_before_subscribe_is_rejected() {
        let mut client = client();
        let err = client
            .run(|_| async { DispatchOutcome::Delivered })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
        assert_eq!(client.state(), ClientState::Created);
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_rejected() {
        let mut client = client();
        let err = client
            .subscribe(Subscription {
                topic: "tidb_cdc".to_string(),
                start_offset: StartOffset::FromEarliest,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let client = client();
        let handle = client.stop_handle();
        client.stop();
        client.stop();
        assert!(handle.is_stopped());
    }
}
