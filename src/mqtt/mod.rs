use std::{future::Future, time::Duration};

use rumqttc::{AsyncClient, ClientError, ConnectionError, Event, EventLoop, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::{settings::Settings, x10::Address};

pub mod discovery;

/// how long to wait before polling again after the connection dropped
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// The part of an MQTT client the bridge needs
pub trait MqttLink {
    fn subscribe(&self, filter: String) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

impl MqttLink for AsyncClient {
    async fn subscribe(&self, filter: String) -> Result<(), ClientError> {
        AsyncClient::subscribe(self, filter, QoS::AtLeastOnce).await
    }

    async fn publish(&self, topic: String, payload: Vec<u8>, retain: bool) -> Result<(), ClientError> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, retain, payload).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// broker accepted the connection, subscriptions must be (re)made
    Connected,
    Message { topic: String, payload: Vec<u8> },
}

/// Drives the rumqttc event loop, forwarding what the bridge cares about.
///
/// Failing to reach the broker the first time is fatal. Once connected,
/// errors are logged and polling continues, which makes rumqttc reconnect.
/// Returns `Ok` when the receiving side has gone away.
pub async fn poll_events(
    eventloop: EventLoop,
    tx: mpsc::Sender<LinkEvent>,
) -> Result<(), ConnectionError> {
    poll_with_retry(eventloop, tx, RECONNECT_DELAY).await
}

async fn poll_with_retry(
    mut eventloop: EventLoop,
    tx: mpsc::Sender<LinkEvent>,
    retry_delay: Duration,
) -> Result<(), ConnectionError> {
    let mut connected_once = false;

    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("connected to MQTT broker ({:?})", ack.code);
                connected_once = true;
                LinkEvent::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!("received {} ({} bytes)", publish.topic, publish.payload.len());
                LinkEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                }
            }
            Ok(other) => {
                trace!("{other:?}");
                continue;
            }
            Err(e) if !connected_once => return Err(e),
            Err(e) => {
                error!("MQTT connection: {e}, retrying in {retry_delay:?}");
                tokio::time::sleep(retry_delay).await;
                continue;
            }
        };

        if tx.send(event).await.is_err() {
            debug!("event receiver closed, stopping MQTT polling");
            return Ok(());
        }
    }
}

/// Topic layout shared by commands, status updates and discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub cmd: String,
    pub stat: String,
    pub discovery: String,
}

impl Topics {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            cmd: settings.cmd_topic.clone(),
            stat: settings.stat_topic.clone(),
            discovery: settings.discovery_topic.clone(),
        }
    }

    /// `x10/cmd/+`, one level so every address lands here
    pub fn command_filter(&self) -> String {
        format!("{}/+", self.cmd)
    }

    pub fn command(&self, address: &Address) -> String {
        format!("{}/{}", self.cmd, address.topic_id())
    }

    pub fn status(&self, address: &Address) -> String {
        format!("{}/{}", self.stat, address.topic_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let topics = Topics {
            cmd: "x10/cmd".to_string(),
            stat: "x10/stat".to_string(),
            discovery: "homeassistant".to_string(),
        };
        let addr: Address = "B7".parse().unwrap();

        assert_eq!(topics.command_filter(), "x10/cmd/+");
        assert_eq!(topics.command(&addr), "x10/cmd/b7");
        assert_eq!(topics.status(&addr), "x10/stat/b7");
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_fatal() {
        // nothing listens on port 1 of localhost
        let mut opts = rumqttc::MqttOptions::new("x10mqtt_test", "127.0.0.1", 1);
        opts.set_keep_alive(Duration::from_secs(5));
        let (_client, eventloop) = AsyncClient::new(opts, 10);
        let (tx, _rx) = mpsc::channel(1);

        let res = poll_events(eventloop, tx).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_reconnects_after_connection_drops() {
        use tokio::{
            io::{AsyncReadExt, AsyncWriteExt},
            net::TcpListener,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // accepts the client, acknowledges its CONNECT and hangs up, twice
        let broker = tokio::spawn(async move {
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut connect = [0u8; 256];
                let n = socket.read(&mut connect).await.unwrap();
                assert_eq!(connect[0] >> 4, 1, "expected CONNECT, got {:?}", &connect[..n]);
                socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let mut opts = rumqttc::MqttOptions::new("x10mqtt_test", "127.0.0.1", port);
        opts.set_keep_alive(Duration::from_secs(5));
        let (_client, eventloop) = AsyncClient::new(opts, 10);
        let (tx, mut rx) = mpsc::channel(4);
        let polling = tokio::spawn(poll_with_retry(eventloop, tx, Duration::from_millis(50)));

        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap();
            assert_eq!(event, Some(LinkEvent::Connected));
        }

        // the second drop must not have ended polling either
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!polling.is_finished());

        polling.abort();
        broker.await.unwrap();
    }
}
