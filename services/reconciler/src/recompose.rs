//! The recompose algorithm: derives the receive-stream set for a meeting
//! as the cross product of its send streams and participants, minus
//! self-pairs, and produces the ordered remove-then-add deltas needed to
//! move the meeting's installed receive streams to that target set.

use std::collections::HashSet;

use sfu_protocol::Quality;

use crate::state::{Meeting, ReceiveStream, ReceiveStreamKey, SendStreamKey};

/// One step of a recompose result: either a receive stream that no
/// longer belongs, or a brand-new one that needs to be installed.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// The removed stream is carried along so a consumer building a wire
    /// message (which needs `ssrc_rtx`) doesn't have to look it back up
    /// from state that has already been deleted.
    Remove(ReceiveStreamKey, ReceiveStream),
    Add(ReceiveStreamKey, ReceiveStream),
}

/// Recompute `meeting.receive_streams` against its current send streams
/// and participants, mutating it in place and returning the deltas that
/// took it there.
///
/// Removes are always emitted (and applied) before adds, so a consumer
/// that processes deltas in order never sees two receive streams
/// momentarily occupying the same hardware resource. Receive streams that
/// belong in both the old and new set are left untouched — in particular
/// their `quality` is preserved (see `set_quality`).
pub fn recompose(meeting: &mut Meeting) -> Vec<Delta> {
    let mut target: HashSet<ReceiveStreamKey> = HashSet::new();
    for send_key in meeting.send_streams.keys() {
        for dest in meeting.participants.keys() {
            if *dest == send_key.sender {
                continue;
            }
            target.insert(ReceiveStreamKey {
                sender: send_key.sender.clone(),
                dest: dest.clone(),
                ssrc: send_key.ssrc,
            });
        }
    }

    let mut deltas = Vec::new();

    let mut stale: Vec<ReceiveStreamKey> = meeting
        .receive_streams
        .keys()
        .filter(|k| !target.contains(*k))
        .cloned()
        .collect();
    stale.sort();
    for key in stale {
        let removed = meeting
            .receive_streams
            .remove(&key)
            .expect("stale keys come from receive_streams itself");
        deltas.push(Delta::Remove(key, removed));
    }

    let mut missing: Vec<ReceiveStreamKey> = target
        .into_iter()
        .filter(|k| !meeting.receive_streams.contains_key(k))
        .collect();
    missing.sort();
    for key in missing {
        let send = meeting
            .send_streams
            .get(&SendStreamKey {
                sender: key.sender.clone(),
                ssrc: key.ssrc,
            })
            .expect("target keys are derived from currently-present send streams");
        let participant = meeting
            .participants
            .get(&key.dest)
            .expect("target keys are derived from currently-present participants");
        let receive_stream = ReceiveStream {
            ssrc_rtx: send.ssrc_rtx,
            media_type: send.media_type,
            egress_port: participant.egress_port,
            quality: Quality::High,
        };
        meeting
            .receive_streams
            .insert(key.clone(), receive_stream.clone());
        deltas.push(Delta::Add(key, receive_stream));
    }

    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Addr, MediaType, Participant, SendStream};

    fn addr(ip: &str, port: u16) -> Addr {
        Addr::new(ip, port)
    }

    fn meeting_with(participants: &[(&str, u16, u16)], streams: &[(&str, u16, u32, u32)]) -> Meeting {
        let mut m = Meeting::default();
        for (ip, port, egress_port) in participants {
            m.participants
                .insert(addr(ip, *port), Participant { egress_port: *egress_port });
        }
        for (ip, port, ssrc, ssrc_rtx) in streams {
            m.send_streams.insert(
                SendStreamKey { sender: addr(ip, *port), ssrc: *ssrc },
                SendStream { ssrc_rtx: *ssrc_rtx, media_type: MediaType::Video },
            );
        }
        m
    }

    #[test]
    fn three_senders_produce_six_receive_streams() {
        let mut m = meeting_with(
            &[
                ("10.0.211.2", 1111, 2),
                ("10.0.211.2", 2222, 3),
                ("10.0.211.2", 3333, 3),
            ],
            &[
                ("10.0.211.2", 1111, 110, 111),
                ("10.0.211.2", 2222, 210, 211),
                ("10.0.211.2", 3333, 310, 311),
            ],
        );
        let deltas = recompose(&mut m);
        let adds = deltas.iter().filter(|d| matches!(d, Delta::Add(..))).count();
        assert_eq!(adds, 6);
        assert_eq!(m.receive_streams.len(), 6);
    }

    #[test]
    fn no_self_pairs_are_created() {
        let mut m = meeting_with(&[("10.0.0.1", 1, 0)], &[("10.0.0.1", 1, 1, 2)]);
        let deltas = recompose(&mut m);
        assert!(deltas.is_empty());
        assert!(m.receive_streams.is_empty());
    }

    #[test]
    fn recompose_is_idempotent_once_converged() {
        let mut m = meeting_with(
            &[("a", 1, 0), ("b", 1, 1)],
            &[("a", 1, 10, 11)],
        );
        let first = recompose(&mut m);
        assert_eq!(first.len(), 1);
        let second = recompose(&mut m);
        assert!(second.is_empty());
    }

    #[test]
    fn removing_a_participant_removes_its_inbound_receive_streams() {
        let mut m = meeting_with(
            &[("a", 1, 0), ("b", 1, 1), ("c", 1, 2)],
            &[("a", 1, 10, 11)],
        );
        recompose(&mut m);
        assert_eq!(m.receive_streams.len(), 2);

        m.participants.remove(&addr("b", 1));
        let deltas = recompose(&mut m);
        assert_eq!(deltas.len(), 1);
        assert!(matches!(&deltas[0], Delta::Remove(k, _) if k.dest == addr("b", 1)));
        assert_eq!(m.receive_streams.len(), 1);
    }

    #[test]
    fn untouched_receive_streams_keep_their_quality() {
        let mut m = meeting_with(
            &[("a", 1, 0), ("b", 1, 1), ("c", 1, 2)],
            &[("a", 1, 10, 11)],
        );
        recompose(&mut m);
        let key = ReceiveStreamKey {
            sender: addr("a", 1),
            dest: addr("b", 1),
            ssrc: 10,
        };
        m.receive_streams.get_mut(&key).unwrap().quality = Quality::Base;

        // Adding an unrelated participant triggers another recompose pass.
        m.participants.insert(addr("d", 1), Participant { egress_port: 3 });
        recompose(&mut m);

        assert_eq!(m.receive_streams[&key].quality, Quality::Base);
    }
}
