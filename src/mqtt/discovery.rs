//! Home Assistant MQTT discovery, every unit of a house code is announced as a switch.

use serde::Serialize;

use crate::{
    mqtt::Topics,
    x10::{Address, HouseCode, UNITS},
};

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SwitchConfig {
    pub name: String,
    pub state_topic: String,
    pub command_topic: String,
    pub unique_id: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Announcement {
    pub topic: String,
    pub config: SwitchConfig,
}

impl Announcement {
    pub fn new(topics: &Topics, address: Address) -> Self {
        let id = address.topic_id();
        Self {
            topic: format!("{}/switch/x10mqtt/x10_{id}/config", topics.discovery),
            config: SwitchConfig {
                name: format!("X10 Module {address}"),
                state_topic: topics.status(&address),
                command_topic: topics.command(&address),
                unique_id: format!("x10mqtt_x10_{id}"),
            },
        }
    }

    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.config)
    }
}

/// All 16 units of every house code, in order
pub fn announcements(topics: &Topics, houses: &[HouseCode]) -> Vec<Announcement> {
    houses
        .iter()
        .flat_map(|house| {
            UNITS.filter_map(move |unit| Address::new(*house, unit).ok())
        })
        .map(|address| Announcement::new(topics, address))
        .collect()
}
