use rumqttc::AsyncClient;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    heyu::{Heyu, X10Controller, monitor},
    mqtt::{self, LinkEvent, MqttLink, Topics, discovery},
    settings::Settings,
    x10::{Address, Command, HouseCode, StatusChange, SwitchState},
};

pub mod error;

pub use error::BridgeError;

/// fits a full discovery burst (16 house codes x 16 units) without waiting on the event loop
const CLIENT_CAPACITY: usize = 512;
const EVENT_CAPACITY: usize = 64;

/// Translates between MQTT messages and X10 commands
pub struct Bridge<C, L> {
    topics: Topics,
    houses: Vec<HouseCode>,
    controller: C,
    link: L,
}

impl<C: X10Controller, L: MqttLink> Bridge<C, L> {
    pub fn new(topics: Topics, houses: Vec<HouseCode>, controller: C, link: L) -> Self {
        Self {
            topics,
            houses,
            controller,
            link,
        }
    }

    /// Called on every (re)connect, the broker may have forgotten us
    pub async fn on_connected(&self) -> Result<(), BridgeError> {
        let filter = self.topics.command_filter();
        self.link.subscribe(filter.clone()).await?;
        info!("subscribed to {filter}");

        for house in &self.houses {
            info!("announcing house code {house} for Home Assistant discovery");
        }

        for ann in discovery::announcements(&self.topics, &self.houses) {
            debug!("publishing discovery at {}", ann.topic);
            let payload = ann.payload()?;
            self.link.publish(ann.topic, payload, true).await?;
        }

        Ok(())
    }

    /// Switches the module named by the topic and reports its new state.
    /// The state is reported even when heyu fails.
    pub async fn handle_command(&self, topic: &str, payload: &[u8]) -> Result<Command, BridgeError> {
        let cmd = Command::from_message(topic, payload)?;

        info!("sending X10 {} to {}", cmd.state, cmd.address);
        if let Err(e) = self.controller.execute(cmd.address, cmd.state).await {
            error!("switching {}: {e}", cmd.address);
        }

        self.publish_state(cmd.address, cmd.state).await?;
        Ok(cmd)
    }

    /// Reports a change seen by `heyu monitor`
    pub async fn handle_status(&self, change: StatusChange) -> Result<(), BridgeError> {
        info!("remote status change, {} is now {}", change.address, change.state);
        self.publish_state(change.address, change.state).await
    }

    async fn publish_state(&self, address: Address, state: SwitchState) -> Result<(), BridgeError> {
        let topic = self.topics.status(&address);
        debug!("status update {topic} = {state}");
        self.link
            .publish(topic, state.payload().as_bytes().to_vec(), true)
            .await?;
        Ok(())
    }

    async fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                if let Err(e) = self.on_connected().await {
                    error!("setting up subscriptions: {e}");
                }
            }
            LinkEvent::Message { topic, payload } => {
                info!("received {topic} {}", String::from_utf8_lossy(&payload));
                match self.handle_command(&topic, &payload).await {
                    Ok(_) => {}
                    Err(BridgeError::InvalidCommand(e)) => warn!("ignoring {topic}: {e}"),
                    Err(e) => error!("handling {topic}: {e}"),
                }
            }
        }
    }
}

/// Runs the bridge until the broker can't be reached or heyu monitor stops
pub async fn run(settings: Settings) -> Result<(), BridgeError> {
    let options = settings.mqtt_options()?;
    check_device(&settings);

    let (host, port) = settings.broker()?;
    info!("establishing MQTT to {host} port {port}");
    if settings.has_credentials() {
        info!("using MQTT username {}", settings.mqtt_user);
    }
    if settings.use_cm17 {
        info!("CM17 is in use");
    }

    let (client, eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CAPACITY);
    let mut mqtt_task =
        tokio::spawn(mqtt::poll_events(eventloop, event_tx).instrument(info_span!("mqtt")));

    let heyu = Heyu::from_settings(&settings);
    let (status_tx, mut status_rx) = mpsc::channel(EVENT_CAPACITY);
    let mut monitor_task =
        tokio::spawn(monitor::run(heyu.clone(), status_tx).instrument(info_span!("monitor")));

    let bridge = Bridge::new(
        Topics::from_settings(&settings),
        settings.discovery_housecodes.clone(),
        heyu,
        client,
    );

    info!("waiting for MQTT messages and monitoring for remote changes");

    let res = loop {
        tokio::select! {
            Some(event) = event_rx.recv() => bridge.handle_event(event).await,
            Some(change) = status_rx.recv() => {
                if let Err(e) = bridge.handle_status(change).await {
                    error!("publishing status: {e}");
                }
            }
            res = &mut mqtt_task => break match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(BridgeError::Connect(e)),
                Err(e) => Err(e.into()),
            },
            res = &mut monitor_task => break match res {
                Ok(r) => r,
                Err(e) => Err(e.into()),
            },
        }
    };

    mqtt_task.abort();
    monitor_task.abort();
    res
}

fn check_device(settings: &Settings) {
    let Some(device) = &settings.device else {
        return;
    };
    if device.exists() {
        info!("using serial device {}", device.display());
    } else {
        warn!(
            "serial device {} does not exist, heyu will fail to reach the controller",
            device.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Mutex};

    use rumqttc::ClientError;

    use super::*;
    use crate::heyu::HeyuError;

    #[derive(Default)]
    struct FakeController {
        calls: Mutex<Vec<(Address, SwitchState)>>,
        fail: bool,
    }

    impl X10Controller for FakeController {
        async fn execute(&self, address: Address, state: SwitchState) -> Result<(), HeyuError> {
            self.calls.lock().unwrap().push((address, state));
            if self.fail {
                return Err(HeyuError::Io(io::Error::other("no controller")));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLink {
        subscriptions: Mutex<Vec<String>>,
        published: Mutex<Vec<(String, String, bool)>>,
    }

    impl MqttLink for FakeLink {
        async fn subscribe(&self, filter: String) -> Result<(), ClientError> {
            self.subscriptions.lock().unwrap().push(filter);
            Ok(())
        }

        async fn publish(&self, topic: String, payload: Vec<u8>, retain: bool) -> Result<(), ClientError> {
            let payload = String::from_utf8(payload).unwrap();
            self.published.lock().unwrap().push((topic, payload, retain));
            Ok(())
        }
    }

    fn topics() -> Topics {
        Topics {
            cmd: "x10/cmd".to_string(),
            stat: "x10/stat".to_string(),
            discovery: "homeassistant".to_string(),
        }
    }

    fn bridge(controller: FakeController, houses: &str) -> Bridge<FakeController, FakeLink> {
        Bridge::new(
            topics(),
            HouseCode::parse_list(houses),
            controller,
            FakeLink::default(),
        )
    }

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn published(b: &Bridge<FakeController, FakeLink>) -> Vec<(String, String, bool)> {
        b.link.published.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_command_switches_and_reports() {
        let b = bridge(FakeController::default(), "");

        let cmd = b.handle_command("x10/cmd/A1", b"ON").await.unwrap();
        assert_eq!(cmd.address, addr("A1"));

        b.handle_command("x10/cmd/b12", b"off").await.unwrap();

        assert_eq!(
            *b.controller.calls.lock().unwrap(),
            vec![(addr("A1"), SwitchState::On), (addr("B12"), SwitchState::Off)]
        );
        assert_eq!(
            published(&b),
            vec![
                ("x10/stat/a1".to_string(), "ON".to_string(), true),
                ("x10/stat/b12".to_string(), "OFF".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_command_is_ignored() {
        let b = bridge(FakeController::default(), "");

        for (topic, payload) in [
            ("x10/cmd/a1", &b"DIM"[..]),
            ("x10/cmd/q1", &b"ON"[..]),
            ("x10/cmd/a17", &b"ON"[..]),
            ("x10/cmd/lamp", &b"OFF"[..]),
        ] {
            let res = b.handle_command(topic, payload).await;
            assert!(matches!(res, Err(BridgeError::InvalidCommand(_))), "{topic}");
        }

        assert!(b.controller.calls.lock().unwrap().is_empty());
        assert!(published(&b).is_empty());
    }

    #[tokio::test]
    async fn test_failed_heyu_still_reports() {
        let controller = FakeController {
            fail: true,
            ..Default::default()
        };
        let b = bridge(controller, "");

        b.handle_command("x10/cmd/c3", b"ON").await.unwrap();

        assert_eq!(
            published(&b),
            vec![("x10/stat/c3".to_string(), "ON".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_connect_subscribes_and_announces() {
        let b = bridge(FakeController::default(), "ab");

        b.on_connected().await.unwrap();
        // reconnect repeats everything
        b.on_connected().await.unwrap();

        assert_eq!(
            *b.link.subscriptions.lock().unwrap(),
            vec!["x10/cmd/+".to_string(), "x10/cmd/+".to_string()]
        );

        let published = published(&b);
        assert_eq!(published.len(), 64);
        assert!(published.iter().all(|(_, _, retain)| *retain));
        assert_eq!(published[0].0, "homeassistant/switch/x10mqtt/x10_a1/config");
        assert_eq!(published[31].0, "homeassistant/switch/x10mqtt/x10_b16/config");

        let config: serde_json::Value = serde_json::from_str(&published[16].1).unwrap();
        assert_eq!(config["command_topic"], "x10/cmd/b1");
        assert_eq!(config["state_topic"], "x10/stat/b1");
    }

    #[tokio::test]
    async fn test_connect_without_discovery() {
        let b = bridge(FakeController::default(), "");
        b.on_connected().await.unwrap();

        assert_eq!(b.link.subscriptions.lock().unwrap().len(), 1);
        assert!(published(&b).is_empty());
    }

    #[tokio::test]
    async fn test_status_change_is_retained() {
        let b = bridge(FakeController::default(), "");

        b.handle_status(StatusChange {
            address: addr("P16"),
            state: SwitchState::Off,
        })
        .await
        .unwrap();

        assert_eq!(
            published(&b),
            vec![("x10/stat/p16".to_string(), "OFF".to_string(), true)]
        );
        assert!(b.controller.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_event_runs_command() {
        let b = bridge(FakeController::default(), "");

        b.handle_event(LinkEvent::Message {
            topic: "x10/cmd/d2".to_string(),
            payload: b"on".to_vec(),
        })
        .await;
        b.handle_event(LinkEvent::Message {
            topic: "x10/cmd/d2".to_string(),
            payload: b"bogus".to_vec(),
        })
        .await;

        assert_eq!(
            *b.controller.calls.lock().unwrap(),
            vec![(addr("D2"), SwitchState::On)]
        );
        assert_eq!(published(&b).len(), 1);
    }

    #[tokio::test]
    async fn test_connected_event_resubscribes() {
        let b = bridge(FakeController::default(), "c");

        b.handle_event(LinkEvent::Connected).await;
        b.handle_event(LinkEvent::Connected).await;

        assert_eq!(
            *b.link.subscriptions.lock().unwrap(),
            vec!["x10/cmd/+".to_string(), "x10/cmd/+".to_string()]
        );
        let published = published(&b);
        assert_eq!(published.len(), 32);
        assert_eq!(published[0].0, "homeassistant/switch/x10mqtt/x10_c1/config");
        assert_eq!(published[16].0, "homeassistant/switch/x10mqtt/x10_c1/config");
        assert!(b.controller.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_needs_broker() {
        let settings = Settings::load_from(None, Default::default()).unwrap();

        let res = run(settings).await;
        assert!(matches!(
            res,
            Err(BridgeError::Config(crate::settings::ConfigError::MissingHost))
        ));
    }
}
