//! `sfu-protocol`: the event-bus wire schema shared by the session
//! reconciler and the rule materializer.
//!
//! Every message carries a top-level `api` tag for discriminated
//! deserialization, mirroring the `kind`-tagged `WsMessage` union used
//! elsewhere in this codebase for service-to-service JSON framing.

use serde::{Deserialize, Serialize};

/// Meeting identity, scoped by the session reconciler.
pub type MeetingId = u32;

/// An RTP synchronization source.
pub type Ssrc = u32;

/// The hardware egress port index (L2-XID), identity-mapped to an eport.
pub type EgressPort = u16;

/// A destination quality tier for a receive stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Base,
    Mid,
    High,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::High
    }
}

/// Rule materializer's notification that a receive stream should be
/// installed in hardware.
///
/// `ssrc_rtx` and `eport` are carried here rather than looked up again on
/// the materializer side because the reconciler already resolved them
/// (from the send stream and the destination participant, respectively)
/// at recompose time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddStream {
    pub mid: MeetingId,
    pub sip: String,
    pub sport: u16,
    pub ssrc: Ssrc,
    pub ssrc_rtx: Ssrc,
    pub dip: String,
    pub dport: u16,
    pub eport: EgressPort,
}

/// Rule materializer's notification that a receive stream should be torn
/// down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveStream {
    pub mid: MeetingId,
    pub sip: String,
    pub sport: u16,
    pub ssrc: Ssrc,
    pub ssrc_rtx: Ssrc,
    pub dip: String,
    pub dport: u16,
}

/// A quality change for one already-installed receive stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetQuality {
    pub mid: MeetingId,
    pub sip: String,
    pub sport: u16,
    pub ssrc: Ssrc,
    pub dip: String,
    pub dport: u16,
    pub quality: Quality,
}

/// Switches the AV1 SVC structure the rule materializer assumes when
/// modulating template IDs. `structure` is carried as a string rather
/// than an enum here because unknown values must be rejected with a log
/// at the materializer, not refused at deserialization time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAv1SvcStructure {
    pub structure: String,
}

/// The full event-bus message union: session reconciler (server) to rule
/// materializer (client).
///
/// ```json
/// { "api": "add_stream", "mid": 0, "sip": "10.0.211.2", ... }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "api")]
#[serde(rename_all = "snake_case")]
pub enum EbMessage {
    AddStream(AddStream),
    RemoveStream(RemoveStream),
    SetQuality(SetQuality),
    UpdateAv1SvcStructure(UpdateAv1SvcStructure),
}
