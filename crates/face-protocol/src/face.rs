use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} must be one of {allowed}")]
pub struct UnknownValue {
    pub field: &'static str,
    pub allowed: String,
    pub value: String,
}

/// Expression shown by every face renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
}

impl Mood {
    pub const ALL: [Mood; 4] = [Mood::Neutral, Mood::Happy, Mood::Sad, Mood::Angry];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|mood| mood.as_str()).collect()
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mood| mood.as_str() == value)
            .ok_or_else(|| UnknownValue {
                field: "mood",
                allowed: Self::names().join("|"),
                value: value.to_string(),
            })
    }
}

/// The renderer a tab shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceName {
    #[default]
    Baxter,
    Hal,
    Eve,
}

impl FaceName {
    /// Cycle order used by the face switcher.
    pub const ALL: [FaceName; 3] = [FaceName::Baxter, FaceName::Hal, FaceName::Eve];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baxter => "baxter",
            Self::Hal => "hal",
            Self::Eve => "eve",
        }
    }

    pub const fn next(self) -> Self {
        match self {
            Self::Baxter => Self::Hal,
            Self::Hal => Self::Eve,
            Self::Eve => Self::Baxter,
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|face| face.as_str()).collect()
    }
}

impl fmt::Display for FaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaceName {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|face| face.as_str() == value)
            .ok_or_else(|| UnknownValue {
                field: "name",
                allowed: Self::names().join("|"),
                value: value.to_string(),
            })
    }
}
