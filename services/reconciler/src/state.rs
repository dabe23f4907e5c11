//! The session reconciler's in-memory topology: meetings, participants,
//! send streams, and receive streams.

use std::collections::HashMap;

use sfu_protocol::{MeetingId, Quality, Ssrc};

/// Media kind carried by a send/receive stream. Tracked throughout the
/// topology but never changes how the rule materializer installs rules —
/// hardware forwarding treats every stream the same way regardless of
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
    Screenshare,
}

/// A participant's network address: source address when sending, or
/// destination address when on the receiving end of some other
/// participant's stream. Participants are a single set per meeting, not
/// split into senders and receivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr {
    pub ip: String,
    pub port: u16,
}

impl Addr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Addr {
            ip: ip.into(),
            port,
        }
    }
}

/// A meeting participant, resolved to the egress port its destination
/// traffic should be routed to.
#[derive(Debug, Clone)]
pub struct Participant {
    pub egress_port: u16,
}

/// One media stream a participant is sending into the meeting.
#[derive(Debug, Clone)]
pub struct SendStream {
    pub ssrc_rtx: Ssrc,
    pub media_type: MediaType,
}

/// Identifies a send stream: the sender's address plus its SSRC. A sender
/// may have more than one send stream (e.g. separate video and
/// screenshare SSRCs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendStreamKey {
    pub sender: Addr,
    pub ssrc: Ssrc,
}

/// Identifies a receive stream: one send stream routed to one
/// destination participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiveStreamKey {
    pub sender: Addr,
    pub dest: Addr,
    pub ssrc: Ssrc,
}

/// A receive stream derived by recompose: a copy of the send stream's
/// media identity, routed to the destination's egress port, at some
/// quality tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveStream {
    pub ssrc_rtx: Ssrc,
    pub media_type: MediaType,
    pub egress_port: u16,
    pub quality: Quality,
}

/// One meeting's full topology.
#[derive(Debug, Clone, Default)]
pub struct Meeting {
    pub participants: HashMap<Addr, Participant>,
    pub send_streams: HashMap<SendStreamKey, SendStream>,
    pub receive_streams: HashMap<ReceiveStreamKey, ReceiveStream>,
}

impl Meeting {
    /// True once this meeting has no participants left, i.e. it should be
    /// dropped entirely.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Every meeting the reconciler currently knows about.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub meetings: HashMap<MeetingId, Meeting>,
}
