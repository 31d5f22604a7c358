//! Transport events and coordinator activity
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  TransportEvent: what a transport hands to its listeners        │
//! │  ├── Message: path + raw bytes from one node                    │
//! │  └── DataChanged: path + materialized fields of a data item     │
//! │                                                                 │
//! │  CycleState: phone responder state machine                      │
//! │  └── Idle → Building → Publishing → Idle                        │
//! │                                                                 │
//! │  SyncEvent: coordinator activity, for logs and observers        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::types::{CorrelationId, ItemId, NodeId};

use super::protocol::DataMap;

/// A message received on the message channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub from: NodeId,
    pub path: String,
    pub data: Vec<u8>,
}

/// A data item that changed on some device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEvent {
    pub origin: NodeId,
    pub item_id: ItemId,
    pub path: String,
    pub fields: DataMap,
}

/// Inbound traffic delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(MessageEvent),
    DataChanged(DataEvent),
}

impl TransportEvent {
    pub fn path(&self) -> &str {
        match self {
            TransportEvent::Message(m) => &m.path,
            TransportEvent::DataChanged(d) => &d.path,
        }
    }
}

/// Phone responder state for a single cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    /// Reading the store and rendering the icon
    Building,
    /// Handing the payload to a channel
    Publishing,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Idle => write!(f, "Idle"),
            CycleState::Building => write!(f, "Building"),
            CycleState::Publishing => write!(f, "Publishing"),
        }
    }
}

/// Why a sync cycle ended without delivering anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ConnectionTimeout,
    NoPeerReachable,
    NoWeatherData,
    PoolSaturated,
    Failed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ConnectionTimeout => write!(f, "connection timeout"),
            SkipReason::NoPeerReachable => write!(f, "no peer reachable"),
            SkipReason::NoWeatherData => write!(f, "no weather data"),
            SkipReason::PoolSaturated => write!(f, "worker pool saturated"),
            SkipReason::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Events emitted by the coordinators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Phone responder moved between states
    StateChanged { state: CycleState },
    /// Watch sent a weather request
    RequestSent {
        node: NodeId,
        request_id: CorrelationId,
    },
    /// Phone handed a payload to a channel
    Published {
        path: String,
        request_id: Option<CorrelationId>,
    },
    /// Watch applied a response to its cached snapshot
    UpdateApplied { request_id: Option<CorrelationId> },
    /// Watch dropped a response that matched no outstanding request
    ResponseDiscarded { request_id: CorrelationId },
    /// A cycle ended early; the next trigger tries again
    CycleSkipped { reason: SkipReason },
}
