//! Session reconciler: the WS-server half of the control plane.
//!
//! Maintains meeting/participant/send-stream/receive-stream state and
//! recomposes the receive-stream set on every topology mutation,
//! broadcasting the resulting `add_stream` / `remove_stream` /
//! `set_quality` deltas to every connected rule materializer.
//!
//! The external event API (`add_stream`, `remove_stream`, `set_quality`,
//! `update_av1_svc_structure`) is a set of plain Rust methods on
//! [`Reconciler`], not a second wire protocol — whatever drives the
//! topology (a test harness, a signaling-plane adapter) calls these
//! directly, the same way the reference source's `SFUSwitchAgent` is
//! driven by direct method calls rather than its own listener.

pub mod recompose;
pub mod state;
pub mod ws_server;

use std::sync::Mutex;

use sfu_protocol::{
    AddStream, EbMessage, MeetingId, RemoveStream, SetQuality, Ssrc, UpdateAv1SvcStructure,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use recompose::{recompose, Delta};
use state::{Addr, MediaType, Participant, SendStream, SendStreamKey, Topology};

/// Errors raised by [`Reconciler::add_stream`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddStreamError {
    #[error("port name '{0}' does not resolve to a dev-port")]
    UnknownPort(String),
}

/// Capacity of the broadcast channel fanning deltas out to connected
/// materializer clients. Generous relative to any single recompose's
/// output, which is bounded by participant count squared per meeting.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct Reconciler {
    topology: Mutex<Topology>,
    tx: broadcast::Sender<EbMessage>,
}

impl Reconciler {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            topology: Mutex::new(Topology::default()),
            tx,
        }
    }

    /// Subscribe to the outgoing event-bus stream. Each connected
    /// materializer client holds one of these.
    pub fn subscribe(&self) -> broadcast::Receiver<EbMessage> {
        self.tx.subscribe()
    }

    fn publish(&self, msg: EbMessage) {
        // No receivers yet (materializer not connected) is not an error;
        // the broadcast is simply dropped. A reconnecting materializer
        // only ever sees the topology state as of whenever it (re)connects.
        let _ = self.tx.send(msg);
    }

    /// Implicitly creates the meeting and sender participant (resolving
    /// `port_name` to an egress port via [`sfu_common::resolve_eport`]),
    /// then inserts the send stream. Triggers recompose.
    ///
    /// Returns [`AddStreamError::UnknownPort`] and makes no change if
    /// `port_name` does not resolve to a dev-port.
    pub fn add_stream(
        &self,
        meeting: MeetingId,
        sip: impl Into<String>,
        sport: u16,
        ssrc: Ssrc,
        ssrc_rtx: Ssrc,
        port_name: &str,
        media_type: MediaType,
    ) -> Result<(), AddStreamError> {
        let egress_port = sfu_common::resolve_eport(port_name)
            .ok_or_else(|| AddStreamError::UnknownPort(port_name.to_owned()))?;
        let sender = Addr::new(sip, sport);
        let deltas = {
            let mut topology = self.topology.lock().unwrap();
            let meeting_state = topology.meetings.entry(meeting).or_default();
            let stream_key = SendStreamKey {
                sender: sender.clone(),
                ssrc,
            };
            if meeting_state.send_streams.contains_key(&stream_key) {
                debug!(
                    meeting,
                    sip = %stream_key.sender.ip,
                    sport = stream_key.sender.port,
                    ssrc,
                    "add_stream: stream already exists, ignoring"
                );
                return Ok(());
            }
            meeting_state
                .participants
                .entry(sender)
                .or_insert(Participant { egress_port });
            meeting_state.send_streams.insert(
                stream_key,
                SendStream {
                    ssrc_rtx,
                    media_type,
                },
            );
            recompose(meeting_state)
        };
        self.emit_deltas(meeting, deltas);
        Ok(())
    }

    /// Removes the send stream; if the sender has no remaining send
    /// streams in the meeting, removes the participant; if the meeting
    /// has no remaining participants, removes the meeting. Triggers
    /// recompose.
    pub fn remove_stream(&self, meeting: MeetingId, sip: impl Into<String>, sport: u16, ssrc: Ssrc) {
        let sender = Addr::new(sip, sport);
        let mut deltas = Vec::new();
        let mut drop_meeting = false;
        {
            let mut topology = self.topology.lock().unwrap();
            let Some(meeting_state) = topology.meetings.get_mut(&meeting) else {
                warn!(meeting, "remove_stream: unknown meeting");
                return;
            };
            meeting_state.send_streams.remove(&SendStreamKey {
                sender: sender.clone(),
                ssrc,
            });

            let sender_has_streams = meeting_state
                .send_streams
                .keys()
                .any(|k| k.sender == sender);
            if !sender_has_streams {
                meeting_state.participants.remove(&sender);
            }

            deltas = recompose(meeting_state);
            if meeting_state.is_empty() {
                drop_meeting = true;
            }
            if drop_meeting {
                topology.meetings.remove(&meeting);
            }
        }
        self.emit_deltas(meeting, deltas);
    }

    /// Updates the quality attribute of the addressed receive stream and
    /// emits a `set_quality` delta. Fails silently (log only) if the
    /// receive stream is absent.
    pub fn set_quality(
        &self,
        meeting: MeetingId,
        sip: impl Into<String>,
        sport: u16,
        ssrc: Ssrc,
        dip: impl Into<String>,
        dport: u16,
        quality: sfu_protocol::Quality,
    ) {
        let sender = Addr::new(sip, sport);
        let dest = Addr::new(dip, dport);
        let key = state::ReceiveStreamKey {
            sender: sender.clone(),
            dest: dest.clone(),
            ssrc,
        };
        let updated = {
            let mut topology = self.topology.lock().unwrap();
            match topology.meetings.get_mut(&meeting) {
                Some(meeting_state) => match meeting_state.receive_streams.get_mut(&key) {
                    Some(rs) => {
                        rs.quality = quality;
                        true
                    }
                    None => false,
                },
                None => false,
            }
        };
        if !updated {
            debug!(
                meeting,
                sip = %sender.ip,
                sport = sender.port,
                dip = %dest.ip,
                dport = dest.port,
                ssrc,
                "set_quality: receive stream not found"
            );
            return;
        }
        self.publish(EbMessage::SetQuality(SetQuality {
            mid: meeting,
            sip: sender.ip,
            sport: sender.port,
            ssrc,
            dip: dest.ip,
            dport: dest.port,
            quality,
        }));
    }

    /// Broadcasts an `update_av1_svc_structure` message. Does not touch
    /// topology state — the SVC structure is a materializer-side concern.
    pub fn update_av1_svc_structure(&self, structure: impl Into<String>) {
        self.publish(EbMessage::UpdateAv1SvcStructure(UpdateAv1SvcStructure {
            structure: structure.into(),
        }));
    }

    fn emit_deltas(&self, meeting: MeetingId, deltas: Vec<Delta>) {
        for delta in deltas {
            match delta {
                Delta::Remove(key, rs) => self.publish(EbMessage::RemoveStream(RemoveStream {
                    mid: meeting,
                    sip: key.sender.ip,
                    sport: key.sender.port,
                    ssrc: key.ssrc,
                    ssrc_rtx: rs.ssrc_rtx,
                    dip: key.dest.ip,
                    dport: key.dest.port,
                })),
                Delta::Add(key, rs) => self.publish(EbMessage::AddStream(AddStream {
                    mid: meeting,
                    sip: key.sender.ip,
                    sport: key.sender.port,
                    ssrc: key.ssrc,
                    ssrc_rtx: rs.ssrc_rtx,
                    dip: key.dest.ip,
                    dport: key.dest.port,
                    eport: rs.egress_port,
                })),
            }
        }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}
