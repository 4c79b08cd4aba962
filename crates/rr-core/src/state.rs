//! Machine state enum as the single source of truth for state strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The state a machine switched into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    /// Start of a production run.
    On,
    /// End of a production run.
    Off,
}

impl MachineState {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MachineState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "start" => Ok(Self::On),
            "off" | "stop" => Ok(Self::Off),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

impl Serialize for MachineState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MachineState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown machine state strings.
#[derive(Debug, Clone)]
pub struct UnknownState(String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown machine state: {}", self.0)
    }
}

impl std::error::Error for UnknownState {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("ON".parse::<MachineState>().unwrap(), MachineState::On);
        assert_eq!(" off ".parse::<MachineState>().unwrap(), MachineState::Off);
    }

    #[test]
    fn legacy_aliases_parse() {
        let start: MachineState = "start".parse().expect("should parse");
        assert_eq!(start, MachineState::On);

        let stop: MachineState = "stop".parse().expect("should parse");
        assert_eq!(stop, MachineState::Off);
    }

    #[test]
    fn unknown_state_errors() {
        let err = "paused".parse::<MachineState>().unwrap_err();
        assert_eq!(err.to_string(), "unknown machine state: paused");
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&MachineState::Off).unwrap();
        assert_eq!(json, "\"off\"");
        let parsed: MachineState = serde_json::from_str("\"ON\"").unwrap();
        assert_eq!(parsed, MachineState::On);
    }
}
