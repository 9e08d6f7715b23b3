use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend};

use crate::error::EisenbahnError;
use crate::message::Message;
use crate::traits::{PipelineReceiver, PipelineSender};
use crate::transport::Transport;

/// Default ZeroMQ high-water mark (max queued messages before backpressure).
pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;

/// Default time allowed for reaching a peer's PULL socket.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Socket behaviour for pipeline endpoints.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of messages queued before `send()` waits.
    pub high_water_mark: usize,
    /// ZeroMQ keeps retrying a refused connection; give up after this long.
    pub connect_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

/// PUSH socket used to ship requests to a peer node's PULL socket.
pub struct ZmqPipelineSender {
    socket: Mutex<PushSocket>,
    endpoint: String,
}

impl ZmqPipelineSender {
    /// Connect to a peer's stable PULL endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(
        transport: &Transport,
        config: &PipelineConfig,
    ) -> Result<Self, EisenbahnError> {
        let mut socket = PushSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, hwm = config.high_water_mark, "connecting PUSH socket");
        match tokio::time::timeout(config.connect_timeout, socket.connect(&endpoint)).await {
            Ok(result) => result?,
            Err(_) => return Err(EisenbahnError::ConnectTimeout(endpoint)),
        }
        Ok(Self {
            socket: Mutex::new(socket),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send several messages under one socket lock.
    pub async fn send_batch(&self, messages: &[Message]) -> Result<usize, EisenbahnError> {
        let mut socket = self.socket.lock().await;
        for msg in messages {
            socket.send(msg.to_bytes()?.into()).await?;
        }
        debug!(count = messages.len(), "batch sent");
        Ok(messages.len())
    }
}

#[async_trait]
impl PipelineSender for ZmqPipelineSender {
    async fn send(&self, message: Message) -> Result<(), EisenbahnError> {
        let bytes = message.to_bytes()?;
        self.socket.lock().await.send(bytes.into()).await?;
        Ok(())
    }
}

/// PULL socket bound on a node's own endpoint; every peer pushes into it.
pub struct ZmqPipelineReceiver {
    socket: Mutex<PullSocket>,
}

impl ZmqPipelineReceiver {
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, EisenbahnError> {
        transport.prepare_bind()?;
        let mut socket = PullSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PULL socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl PipelineReceiver for ZmqPipelineReceiver {
    async fn recv(&self) -> Result<Message, EisenbahnError> {
        let mut socket = self.socket.lock().await;
        let raw = socket.recv().await?;
        let bytes = raw
            .get(0)
            .ok_or_else(|| EisenbahnError::Transport("empty ZMQ frame".into()))?;
        Ok(Message::from_bytes(bytes.as_ref())?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn push_pull_single_message() {
        let transport = Transport::tcp("127.0.0.1", 15700);

        let receiver = ZmqPipelineReceiver::bind(&transport).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sender = ZmqPipelineSender::connect(&transport, &PipelineConfig::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let msg = Message::new("weave.test", &"hello".to_string()).unwrap();
        let correlation_id = msg.correlation_id;
        sender.send(msg).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.topic, "weave.test");
        assert_eq!(received.correlation_id, correlation_id);
        assert_eq!(received.decode::<String>().unwrap(), "hello");
    }

    #[tokio::test]
    async fn batch_arrives_in_order() {
        let transport = Transport::tcp("127.0.0.1", 15701);

        let receiver = ZmqPipelineReceiver::bind(&transport).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sender = ZmqPipelineSender::connect(&transport, &PipelineConfig::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages: Vec<Message> = (0..5u32)
            .map(|i| Message::new("weave.batch", &i).unwrap())
            .collect();
        assert_eq!(sender.send_batch(&messages).await.unwrap(), 5);

        for i in 0..5u32 {
            let received = receiver.recv().await.unwrap();
            assert_eq!(received.decode::<u32>().unwrap(), i);
        }
    }

    #[tokio::test]
    async fn connect_to_unbound_endpoint_times_out() {
        let transport = Transport::tcp("127.0.0.1", 15702);
        let config = PipelineConfig {
            connect_timeout: Duration::from_millis(200),
            ..PipelineConfig::default()
        };
        let err = ZmqPipelineSender::connect(&transport, &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EisenbahnError::ConnectTimeout(ref e) if e.contains("15702")));
    }
}
