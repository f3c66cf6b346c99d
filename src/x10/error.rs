use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("unknown house code `{0}`, expected A through P")]
    BadHouseCode(char),
    #[error("bad unit `{0}`, expected 1 through 16")]
    BadUnit(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("unknown state `{0}`, expected ON or OFF")]
    BadState(String),
    #[error("invalid address `{0}`: {1}")]
    BadAddress(String, AddressError),
}
