use std::{fmt, str::FromStr};

pub mod error;

pub use error::{AddressError, CommandError};

pub const UNITS: std::ops::RangeInclusive<u8> = 1..=16;

/// X10 house code, `A` through `P`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HouseCode(char);

impl HouseCode {
    pub fn new(c: char) -> Result<Self, AddressError> {
        let upper = c.to_ascii_uppercase();
        match upper {
            'A'..='P' => Ok(Self(upper)),
            _ => Err(AddressError::BadHouseCode(c)),
        }
    }

    /// Keeps only valid house code letters, upper-cased, first occurrence wins
    pub fn parse_list(s: &str) -> Vec<Self> {
        let mut res: Vec<Self> = Vec::new();
        for hc in s.chars().filter_map(|c| Self::new(c).ok()) {
            if !res.contains(&hc) {
                res.push(hc);
            }
        }
        res
    }

    pub fn letter(&self) -> char {
        self.0
    }

    pub fn lower(&self) -> char {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for HouseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single module address, ie. `A1` or `p16`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub house: HouseCode,
    pub unit: u8,
}

impl Address {
    pub fn new(house: HouseCode, unit: u8) -> Result<Self, AddressError> {
        if !UNITS.contains(&unit) {
            return Err(AddressError::BadUnit(unit.to_string()));
        }
        Ok(Self { house, unit })
    }

    /// used in topics, ie. `x10/stat/a1`
    pub fn topic_id(&self) -> String {
        format!("{}{}", self.house.lower(), self.unit)
    }

    pub fn heyu_arg(&self) -> String {
        self.topic_id()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let house = HouseCode::new(chars.next().ok_or(AddressError::Empty)?)?;

        let rest = chars.as_str();
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddressError::BadUnit(rest.to_string()));
        }
        let unit = rest
            .parse::<u8>()
            .map_err(|_| AddressError::BadUnit(rest.to_string()))?;

        Self::new(house, unit)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.house, self.unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn payload(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

impl FromStr for SwitchState {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("on") {
            Ok(Self::On)
        } else if trimmed.eq_ignore_ascii_case("off") {
            Ok(Self::Off)
        } else {
            Err(CommandError::BadState(trimmed.to_string()))
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.payload())
    }
}

/// A request to switch one module, decoded from an MQTT message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub address: Address,
    pub state: SwitchState,
}

impl Command {
    /// The address is the last segment of the topic (`x10/cmd/A1` -> `A1`)
    pub fn from_message(topic: &str, payload: &[u8]) -> Result<Self, CommandError> {
        let payload = std::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)?;
        let state = payload.parse()?;

        let last = topic.rsplit('/').next().unwrap_or(topic);
        let address = last
            .parse()
            .map_err(|e| CommandError::BadAddress(last.to_string(), e))?;

        Ok(Self { address, state })
    }
}

/// An X10 event seen on the power line, not necessarily caused by us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub address: Address,
    pub state: SwitchState,
}
