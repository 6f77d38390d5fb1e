//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::SwarmError;

/// One of the two opposing sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Swarm {
    Red,
    Blue,
}

impl Swarm {
    pub const ALL: [Swarm; 2] = [Swarm::Red, Swarm::Blue];

    pub fn opponent(self) -> Self {
        match self {
            Swarm::Red => Swarm::Blue,
            Swarm::Blue => Swarm::Red,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Swarm::Red => "red",
            Swarm::Blue => "blue",
        }
    }
}

impl fmt::Display for Swarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for agents
///
/// Rendered as `red-3` / `blue-1`. Oracle replies name attack targets with
/// this form, so it round-trips through `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId {
    pub swarm: Swarm,
    pub number: u32,
}

impl AgentId {
    pub fn new(swarm: Swarm, number: u32) -> Self {
        Self { swarm, number }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.swarm, self.number)
    }
}

impl FromStr for AgentId {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SwarmError::InvalidTarget(format!("malformed agent id '{}'", s));
        let (side, number) = s.trim().rsplit_once('-').ok_or_else(invalid)?;
        let swarm = match side.to_ascii_lowercase().as_str() {
            "red" => Swarm::Red,
            "blue" => Swarm::Blue,
            _ => return Err(invalid()),
        };
        let number = number.parse().map_err(|_| invalid())?;
        Ok(Self { swarm, number })
    }
}

impl Serialize for AgentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Simulation tick counter
pub type Tick = u64;

/// 2D position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Self) -> f32 {
        (*other - *self).length()
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > 0.0001 {
            Self { x: self.x / len, y: self.y / len }
        } else {
            Self::default()
        }
    }

    /// Clamp both components into `[0, width] x [0, height]`
    pub fn clamp_to(&self, width: f32, height: f32) -> Self {
        Self {
            x: self.x.clamp(0.0, width),
            y: self.y.clamp(0.0, height),
        }
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.0}, {:.0})", self.x, self.y)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self { x: self.x + rhs.x, y: self.y + rhs.y }
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self { x: self.x - rhs.x, y: self.y - rhs.y }
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self { x: self.x * rhs, y: self.y * rhs }
    }
}
