//! Channel-facing surfaces: the serialized inbound pipeline. Adapters that
//! speak the platform protocols live outside the core; webhooks parse into
//! [`InboundMessage`] and everything downstream is channel-agnostic.

pub mod pipeline;

pub use pipeline::{
    InboundMessage, InboundPipeline, LogDelivery, OutboundDelivery, TurnService,
};
