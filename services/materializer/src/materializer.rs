//! The rule materializer: owns the six hardware ID maps and five
//! installed-rule sets described in the control-plane data model, and
//! translates each event-bus message into idempotent writes through a
//! [`RuntimeClient`].
//!
//! Grounded in `tofino_interface.py`'s `PRE` class. That source fully
//! implements `add_stream`'s five-stage install; `remove_stream` and
//! `set_quality` are not realized there at all (§9 open question in the
//! control-plane spec). The reverse-of-`add_stream` teardown and the
//! `video_layer_suppression` writes below are this project's own design,
//! built to keep the six ID bijections convergent — see DESIGN.md.

use std::collections::{BTreeSet, HashMap, HashSet};

use sfu_hw::{Action, DataField, HwError, KeyField, Match, RuntimeClient};
use sfu_ids::ScopedIdMap;
use sfu_protocol::{AddStream, EbMessage, MeetingId, RemoveStream, SetQuality, Ssrc};
use tracing::{debug, info, warn};

use crate::tables::{
    av1_structure, NO_RTX_SSRC, TBL_AV1_TEMPLATE_ID_MOD_LOOKUP, TBL_IPV4_ROUTE,
    TBL_NACK_PLI_FORWARDING, TBL_PACKET_REPLICATION, TBL_PRE_MGID, TBL_PRE_NODE, TBL_PRE_PORT,
    TBL_PRE_PRUNE, TBL_RECV_REPORT_FORWARDING, TBL_VIDEO_LAYER_SUPPRESSION,
};

/// Capacities from §3 of the control-plane spec.
const MGID_CAPACITY: u32 = 64_000;
const NID_CAPACITY: u32 = u32::MAX;
const RID_CAPACITY: u32 = (1 << 16) - 1;

/// A participant's network address, scoped entirely to the materializer —
/// the reconciler has its own `Addr` on the other side of the event bus,
/// and the two are never shared in-process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr {
    pub ip: String,
    pub port: u16,
}

impl Addr {
    fn new(ip: impl Into<String>, port: u16) -> Self {
        Addr {
            ip: ip.into(),
            port,
        }
    }
}

fn ipv4_to_u32(ip: &str) -> u64 {
    let addr: std::net::Ipv4Addr = ip.parse().expect("reconciler only emits valid IPv4 literals");
    u32::from(addr) as u64
}

fn exact(name: &str, value: u64) -> KeyField {
    KeyField::Exact {
        name: name.to_owned(),
        value,
    }
}

fn int_data(name: &str, value: u64) -> DataField {
    DataField::Int {
        name: name.to_owned(),
        value,
    }
}

fn int_array_data(name: &str, values: Vec<u64>) -> DataField {
    DataField::IntArray {
        name: name.to_owned(),
        value: values,
    }
}

fn bool_array_data(name: &str, values: Vec<bool>) -> DataField {
    DataField::BoolArray {
        name: name.to_owned(),
        value: values,
    }
}

/// One meeting's NID/RID participant list, in the stable `(ip, port)`
/// order §4.4 stage 5c requires for `pre.mgid`'s node/exclusion-id
/// arrays.
#[derive(Default)]
struct MeetingBook {
    participants: BTreeSet<Addr>,
    /// Receive streams (as sender or destination) currently referencing
    /// each participant in this meeting. Drops to zero exactly when the
    /// participant has left every send/receive stream in the meeting.
    refs: HashMap<Addr, u32>,
}

/// Sender-side installs (packet_replication, pre.prune, and the sender's
/// own pre.node entry) that are waiting on the sender's egress port.
///
/// The EB `add_stream` schema (§4.5) carries only the *destination*
/// participant's egress port — the one the reconciler resolved while
/// building that particular receive stream. A sender's own egress port
/// only reaches the materializer once the sender itself is addressed as
/// a destination, which the receive-stream law (§3) guarantees happens
/// in the same recompose batch for any meeting with two or more
/// participants (each sends, so each also receives every other sender's
/// stream). Until that reciprocal message arrives, the sender-scoped
/// writes below are queued here and flushed the moment the sender's
/// egress port becomes known.
struct PendingSenderInstall {
    sip: String,
    sport: u16,
    ssrc: Ssrc,
    ssrc_rtx: Ssrc,
    mgid: u32,
    nid: u32,
    rid: u32,
}

/// The rule materializer. Generic over the runtime client so tests can
/// swap in a bare in-memory backend while a real binary wires up the
/// gRPC-based switch-agent client behind the same trait.
pub struct RuleMaterializer<R: RuntimeClient> {
    rc: R,
    svc_structure: String,

    meeting_mgid: ScopedIdMap<MeetingId>,
    participant_nid: ScopedIdMap<Addr>,
    mp_rid: ScopedIdMap<(MeetingId, Addr)>,

    meetings: HashMap<MeetingId, MeetingBook>,
    /// Meetings each participant currently belongs to, across the whole
    /// switch — drives NID release, since NID is participant-global.
    participant_meetings: HashMap<Addr, HashSet<MeetingId>>,
    /// The egress port learned for a participant the first time it was
    /// addressed as a receive stream's destination.
    participant_eport: HashMap<Addr, u16>,
    pending_sender_installs: HashMap<Addr, Vec<PendingSenderInstall>>,
    /// Destinations still depending on one sender's packet_replication
    /// entry, keyed by the sender's send-stream identity.
    send_stream_destinations: HashMap<(MeetingId, Addr, Ssrc), HashSet<Addr>>,
    /// Reference count of sender-side packet_replication installs using
    /// a given egress port, driving `pre.prune` teardown.
    eport_prune_refs: HashMap<u16, u32>,

    installed_replication: HashSet<(String, u16, Ssrc, u32, u32, u16)>,
    installed_nodes: HashSet<(u32, u32, u16)>,
    installed_mgid: HashMap<u32, (Vec<u32>, Vec<u32>)>,
    installed_prune: HashSet<u16>,
    installed_routes: HashSet<(String, u16, Ssrc, u32, String, u16)>,
    installed_suppression: HashSet<(u32, u8)>,
}

impl<R: RuntimeClient> RuleMaterializer<R> {
    /// Load and flush every hardware table, install the CPU-port entry,
    /// and install the default (`L1T2`) AV1 template-id modulation table —
    /// mirroring `PRE.__init__`. Fatal (per §7) if any `load_table` call
    /// fails; the caller should exit the process.
    pub fn start(mut rc: R, hardware_mode: bool) -> Result<Self, HwError> {
        for table in crate::tables::ALL_TABLES {
            rc.load_table(table)?;
            rc.flush(table)?;
        }

        let cpu_port = if hardware_mode {
            crate::tables::CPU_PORT_HARDWARE
        } else {
            crate::tables::CPU_PORT_MODEL
        };
        rc.add(
            TBL_PRE_PORT,
            &Match::new(vec![exact("$DEV_PORT", u64::from(cpu_port))]),
            &Action::new(vec![DataField::Bool {
                name: "$COPY_TO_CPU_PORT_ENABLE".to_owned(),
                value: true,
            }]),
        )?;
        info!(cpu_port, "configured CPU port");

        let mut rm = RuleMaterializer {
            rc,
            svc_structure: String::new(),
            meeting_mgid: ScopedIdMap::new(MGID_CAPACITY),
            participant_nid: ScopedIdMap::new(NID_CAPACITY),
            mp_rid: ScopedIdMap::new(RID_CAPACITY),
            meetings: HashMap::new(),
            participant_meetings: HashMap::new(),
            participant_eport: HashMap::new(),
            pending_sender_installs: HashMap::new(),
            send_stream_destinations: HashMap::new(),
            eport_prune_refs: HashMap::new(),
            installed_replication: HashSet::new(),
            installed_nodes: HashSet::new(),
            installed_mgid: HashMap::new(),
            installed_prune: HashSet::new(),
            installed_routes: HashSet::new(),
            installed_suppression: HashSet::new(),
        };
        rm.update_av1_svc_structure("L1T2");
        Ok(rm)
    }

    /// Direct access to the underlying runtime client, for integration
    /// tests that need to inspect installed table state from outside the
    /// crate.
    pub fn runtime_client(&mut self) -> &mut R {
        &mut self.rc
    }

    /// Dispatch one event-bus message. Mirrors the dynamic `api` dispatch
    /// of `tofino_client_agent`, replaced here by a `match` on the
    /// decoded tag (§9 design note).
    pub fn handle(&mut self, msg: EbMessage) -> Result<(), HwError> {
        match msg {
            EbMessage::AddStream(m) => self.add_stream(m),
            EbMessage::RemoveStream(m) => self.remove_stream(m),
            EbMessage::SetQuality(m) => self.set_quality(m),
            EbMessage::UpdateAv1SvcStructure(m) => {
                self.update_av1_svc_structure(&m.structure);
                Ok(())
            }
        }
    }

    /// §4.4's five-stage `add_stream` decomposition.
    fn add_stream(&mut self, m: AddStream) -> Result<(), HwError> {
        let sender = Addr::new(m.sip.clone(), m.sport);
        let dest = Addr::new(m.dip.clone(), m.dport);

        // Stage 1 — meeting -> MGID.
        let mgid = match self.meeting_mgid.get_or_assign(m.mid) {
            Ok(id) => id,
            Err(_) => {
                warn!(meeting = m.mid, "MGID capacity reached, dropping add_stream");
                return Ok(());
            }
        };

        // Stage 2 — participant -> NID, for both endpoints.
        let sender_nid = match self.participant_nid.get_or_assign(sender.clone()) {
            Ok(id) => id,
            Err(_) => {
                warn!(ip = %sender.ip, port = sender.port, "NID capacity reached, dropping add_stream");
                return Ok(());
            }
        };
        let dest_nid = match self.participant_nid.get_or_assign(dest.clone()) {
            Ok(id) => id,
            Err(_) => {
                warn!(ip = %dest.ip, port = dest.port, "NID capacity reached, dropping add_stream");
                return Ok(());
            }
        };

        // Stage 3 — meeting-participant -> RID (L1-XID := RID).
        let sender_rid = match self.mp_rid.get_or_assign((m.mid, sender.clone())) {
            Ok(id) => id,
            Err(_) => {
                warn!(meeting = m.mid, ip = %sender.ip, port = sender.port, "RID capacity reached, dropping add_stream");
                return Ok(());
            }
        };
        let dest_rid = match self.mp_rid.get_or_assign((m.mid, dest.clone())) {
            Ok(id) => id,
            Err(_) => {
                warn!(meeting = m.mid, ip = %dest.ip, port = dest.port, "RID capacity reached, dropping add_stream");
                return Ok(());
            }
        };

        // Stage 4 — egress port -> L2-XID (identity). The destination's
        // egress port travels on the wire; the sender's own is learned
        // lazily (see `PendingSenderInstall`).
        self.learn_eport(&dest, m.eport)?;

        // Bookkeeping used to know when it's safe to tear rules/IDs back
        // down, kept in lockstep with the installs below.
        for addr in [&sender, &dest] {
            let book = self.meetings.entry(m.mid).or_default();
            book.participants.insert(addr.clone());
            *book.refs.entry(addr.clone()).or_insert(0) += 1;
            self.participant_meetings
                .entry(addr.clone())
                .or_default()
                .insert(m.mid);
        }

        // Stage 5b — pre.node for the destination (always known now).
        self.install_node(dest_nid, dest_rid, m.eport)?;

        // Stage 5a/5b(sender)/5d — depend on the sender's own egress
        // port. Install now if known, else queue.
        if let Some(&sender_eport) = self.participant_eport.get(&sender) {
            self.install_node(sender_nid, sender_rid, sender_eport)?;
            self.install_sender_side(&m.sip, m.sport, m.ssrc, m.ssrc_rtx, mgid, sender_rid, sender_eport)?;
        } else {
            self.pending_sender_installs
                .entry(sender.clone())
                .or_default()
                .push(PendingSenderInstall {
                    sip: m.sip.clone(),
                    sport: m.sport,
                    ssrc: m.ssrc,
                    ssrc_rtx: m.ssrc_rtx,
                    mgid,
                    nid: sender_nid,
                    rid: sender_rid,
                });
        }

        // Stage 5c — pre.mgid, sorted by (ip, port).
        self.install_mgid(m.mid, mgid)?;

        // Stage 5e — ipv4_route, for ssrc and (if present) ssrc_rtx, keyed
        // on the destination's RID.
        self.install_route(&m.sip, m.sport, m.ssrc, dest_rid, &m.dip, m.dport)?;
        if m.ssrc_rtx != NO_RTX_SSRC {
            self.install_route(&m.sip, m.sport, m.ssrc_rtx, dest_rid, &m.dip, m.dport)?;
        }

        self.track_destination(m.mid, &sender, m.ssrc, &dest);
        Ok(())
    }

    /// Record that `dest`'s egress port is `eport`; if this is the first
    /// time it's been learned, flush any sender-side installs that were
    /// waiting on it.
    fn learn_eport(&mut self, dest: &Addr, eport: u16) -> Result<(), HwError> {
        if self.participant_eport.insert(dest.clone(), eport).is_some() {
            return Ok(());
        }
        let Some(pending) = self.pending_sender_installs.remove(dest) else {
            return Ok(());
        };
        for p in pending {
            self.install_node(p.nid, p.rid, eport)?;
            self.install_sender_side(&p.sip, p.sport, p.ssrc, p.ssrc_rtx, p.mgid, p.rid, eport)?;
        }
        Ok(())
    }

    fn install_sender_side(
        &mut self,
        sip: &str,
        sport: u16,
        ssrc: Ssrc,
        ssrc_rtx: Ssrc,
        mgid: u32,
        rid: u32,
        eport: u16,
    ) -> Result<(), HwError> {
        let l2_xid = eport;
        let newly = self.install_replication(sip, sport, ssrc, mgid, rid, l2_xid)?;
        if ssrc_rtx != NO_RTX_SSRC {
            self.install_replication(sip, sport, ssrc_rtx, mgid, rid, l2_xid)?;
        }
        if newly {
            *self.eport_prune_refs.entry(eport).or_insert(0) += 1;
        }
        self.install_prune(eport)
    }

    fn track_destination(&mut self, mid: MeetingId, sender: &Addr, ssrc: Ssrc, dest: &Addr) {
        self.send_stream_destinations
            .entry((mid, sender.clone(), ssrc))
            .or_default()
            .insert(dest.clone());
    }

    /// Installs `packet_replication` for one ssrc if not already present.
    /// Returns whether this call actually installed a new entry.
    fn install_replication(
        &mut self,
        sip: &str,
        sport: u16,
        ssrc: Ssrc,
        mgid: u32,
        rid: u32,
        l2_xid: u16,
    ) -> Result<bool, HwError> {
        let key = (sip.to_owned(), sport, ssrc, mgid, rid, l2_xid);
        if self.installed_replication.contains(&key) {
            return Ok(false);
        }
        let m = Match::new(vec![
            exact("hdr.ipv4.src_addr", ipv4_to_u32(sip)),
            exact("hdr.udp.src_port", u64::from(sport)),
            exact("ig_md.rtp_rtcp_ssrc", u64::from(ssrc)),
        ]);
        let a = Action::with_func(
            "setup_replication",
            vec![
                int_data("mgid", u64::from(mgid)),
                int_data("packet_rid", u64::from(rid)),
                int_data("l2_xid", u64::from(l2_xid)),
            ],
        );
        self.rc.add(TBL_PACKET_REPLICATION, &m, &a)?;
        self.installed_replication.insert(key);
        Ok(true)
    }

    fn install_node(&mut self, nid: u32, rid: u32, eport: u16) -> Result<(), HwError> {
        let key = (nid, rid, eport);
        if self.installed_nodes.contains(&key) {
            return Ok(());
        }
        let m = Match::new(vec![exact("$MULTICAST_NODE_ID", u64::from(nid))]);
        let a = Action::new(vec![
            int_data("$MULTICAST_RID", u64::from(rid)),
            int_array_data("$DEV_PORT", vec![u64::from(eport)]),
        ]);
        self.rc.add(TBL_PRE_NODE, &m, &a)?;
        self.installed_nodes.insert(key);
        Ok(())
    }

    fn install_mgid(&mut self, mid: MeetingId, mgid: u32) -> Result<(), HwError> {
        let book = self.meetings.get(&mid).expect("meeting exists mid-add_stream");
        let mut nids = Vec::with_capacity(book.participants.len());
        let mut l1_xids = Vec::with_capacity(book.participants.len());
        for addr in &book.participants {
            nids.push(self.participant_nid.get(addr).expect("NID assigned above"));
            l1_xids.push(self.mp_rid.get(&(mid, addr.clone())).expect("RID assigned above"));
        }
        let validity = vec![false; nids.len()];

        let already = self.installed_mgid.get(&mgid);
        if already == Some(&(nids.clone(), l1_xids.clone())) {
            return Ok(());
        }
        let is_new = already.is_none();

        let m = Match::new(vec![exact("$MGID", u64::from(mgid))]);
        let a = Action::new(vec![
            int_array_data("$MULTICAST_NODE_ID", nids.iter().map(|&n| u64::from(n)).collect()),
            int_array_data(
                "$MULTICAST_NODE_L1_XID",
                l1_xids.iter().map(|&x| u64::from(x)).collect(),
            ),
            bool_array_data("$MULTICAST_NODE_L1_XID_VALID", validity),
        ]);
        if is_new {
            self.rc.add(TBL_PRE_MGID, &m, &a)?;
        } else {
            self.rc.modify(TBL_PRE_MGID, &m, &a)?;
        }
        self.installed_mgid.insert(mgid, (nids, l1_xids));
        Ok(())
    }

    fn install_prune(&mut self, eport: u16) -> Result<(), HwError> {
        if self.installed_prune.contains(&eport) {
            return Ok(());
        }
        let m = Match::new(vec![exact("$MULTICAST_L2_XID", u64::from(eport))]);
        let a = Action::new(vec![int_array_data("$DEV_PORT", vec![u64::from(eport)])]);
        self.rc.add(TBL_PRE_PRUNE, &m, &a)?;
        self.installed_prune.insert(eport);
        Ok(())
    }

    fn install_route(
        &mut self,
        sip: &str,
        sport: u16,
        ssrc: Ssrc,
        rid: u32,
        dip: &str,
        dport: u16,
    ) -> Result<(), HwError> {
        let key = (sip.to_owned(), sport, ssrc, rid, dip.to_owned(), dport);
        if self.installed_routes.contains(&key) {
            return Ok(());
        }
        let m = Match::new(vec![
            exact("hdr.ipv4.src_addr", ipv4_to_u32(sip)),
            exact("hdr.udp.src_port", u64::from(sport)),
            exact("eg_md.rtp_rtcp_ssrc", u64::from(ssrc)),
            exact("eg_intr_md.egress_rid", u64::from(rid)),
        ]);
        let a = Action::with_func(
            "set_destination_headers",
            vec![
                int_data("ip_dst_addr", ipv4_to_u32(dip)),
                int_data("udp_dst_port", u64::from(dport)),
            ],
        );
        self.rc.add(TBL_IPV4_ROUTE, &m, &a)?;
        self.installed_routes.insert(key);
        Ok(())
    }

    /// Reverse of `add_stream`: tears down the ipv4_route pair for this
    /// receive stream immediately, then releases sender- and
    /// participant-scoped rules/IDs only once nothing else in the
    /// meeting still references them. See the module doc comment — this
    /// teardown sequencing has no counterpart in the original source.
    fn remove_stream(&mut self, m: RemoveStream) -> Result<(), HwError> {
        let sender = Addr::new(m.sip.clone(), m.sport);
        let dest = Addr::new(m.dip.clone(), m.dport);

        let Some(dest_rid) = self.mp_rid.get(&(m.mid, dest.clone())) else {
            warn!(meeting = m.mid, "remove_stream: destination has no RID, ignoring");
            return Ok(());
        };
        self.uninstall_route(&m.sip, m.sport, m.ssrc, dest_rid, &m.dip, m.dport)?;
        if m.ssrc_rtx != NO_RTX_SSRC {
            self.uninstall_route(&m.sip, m.sport, m.ssrc_rtx, dest_rid, &m.dip, m.dport)?;
        }

        if let Some(dests) = self
            .send_stream_destinations
            .get_mut(&(m.mid, sender.clone(), m.ssrc))
        {
            dests.remove(&dest);
            if dests.is_empty() {
                self.send_stream_destinations.remove(&(m.mid, sender.clone(), m.ssrc));
                if let (Some(mgid), Some(rid)) = (
                    self.meeting_mgid.get(&m.mid),
                    self.mp_rid.get(&(m.mid, sender.clone())),
                ) {
                    if let Some(&eport) = self.participant_eport.get(&sender) {
                        self.uninstall_replication(&m.sip, m.sport, m.ssrc, mgid, rid, eport)?;
                        if m.ssrc_rtx != NO_RTX_SSRC {
                            self.uninstall_replication(&m.sip, m.sport, m.ssrc_rtx, mgid, rid, eport)?;
                        }
                        self.decrement_eport_prune(eport)?;
                    }
                }
            }
        }

        self.drop_participant_ref(m.mid, &sender)?;
        self.drop_participant_ref(m.mid, &dest)?;

        self.maybe_retire_meeting(m.mid)?;
        Ok(())
    }

    fn uninstall_replication(
        &mut self,
        sip: &str,
        sport: u16,
        ssrc: Ssrc,
        mgid: u32,
        rid: u32,
        l2_xid: u16,
    ) -> Result<(), HwError> {
        let key = (sip.to_owned(), sport, ssrc, mgid, rid, l2_xid);
        if !self.installed_replication.remove(&key) {
            return Ok(());
        }
        let m = Match::new(vec![
            exact("hdr.ipv4.src_addr", ipv4_to_u32(sip)),
            exact("hdr.udp.src_port", u64::from(sport)),
            exact("ig_md.rtp_rtcp_ssrc", u64::from(ssrc)),
        ]);
        self.rc.delete(TBL_PACKET_REPLICATION, &m)
    }

    fn uninstall_route(
        &mut self,
        sip: &str,
        sport: u16,
        ssrc: Ssrc,
        rid: u32,
        dip: &str,
        dport: u16,
    ) -> Result<(), HwError> {
        let key = (sip.to_owned(), sport, ssrc, rid, dip.to_owned(), dport);
        if !self.installed_routes.remove(&key) {
            return Ok(());
        }
        let m = Match::new(vec![
            exact("hdr.ipv4.src_addr", ipv4_to_u32(sip)),
            exact("hdr.udp.src_port", u64::from(sport)),
            exact("eg_md.rtp_rtcp_ssrc", u64::from(ssrc)),
            exact("eg_intr_md.egress_rid", u64::from(rid)),
        ]);
        self.rc.delete(TBL_IPV4_ROUTE, &m)
    }

    fn decrement_eport_prune(&mut self, eport: u16) -> Result<(), HwError> {
        if let Some(count) = self.eport_prune_refs.get_mut(&eport) {
            *count -= 1;
            if *count == 0 {
                self.eport_prune_refs.remove(&eport);
                if self.installed_prune.remove(&eport) {
                    let m = Match::new(vec![exact("$MULTICAST_L2_XID", u64::from(eport))]);
                    self.rc.delete(TBL_PRE_PRUNE, &m)?;
                }
            }
        }
        Ok(())
    }

    /// Drop one receive-stream reference to `addr` within meeting `mid`;
    /// once the count reaches zero the participant has left every
    /// send/receive stream in the meeting, so its `pre.node` entry, RID,
    /// and (once it's left every meeting) NID are released.
    fn drop_participant_ref(&mut self, mid: MeetingId, addr: &Addr) -> Result<(), HwError> {
        let Some(book) = self.meetings.get_mut(&mid) else {
            return Ok(());
        };
        let Some(count) = book.refs.get_mut(addr) else {
            return Ok(());
        };
        *count -= 1;
        if *count > 0 {
            return Ok(());
        }
        book.refs.remove(addr);
        book.participants.remove(addr);

        let released_rid = self.mp_rid.release(&(mid, addr.clone()));
        if let Some(rid) = released_rid {
            debug!(meeting = mid, ip = %addr.ip, port = addr.port, rid, "released RID/L1-XID");
        }

        let meetings = self.participant_meetings.entry(addr.clone()).or_default();
        meetings.remove(&mid);
        if meetings.is_empty() {
            self.participant_meetings.remove(addr);
            self.participant_eport.remove(addr);
            self.pending_sender_installs.remove(addr);
            if let Some(nid) = self.participant_nid.release(addr) {
                if let Some(entry) = self
                    .installed_nodes
                    .iter()
                    .find(|(n, _, _)| *n == nid)
                    .cloned()
                {
                    self.installed_nodes.remove(&entry);
                    let m = Match::new(vec![exact("$MULTICAST_NODE_ID", u64::from(nid))]);
                    self.rc.delete(TBL_PRE_NODE, &m)?;
                }
            }
        }
        Ok(())
    }

    fn maybe_retire_meeting(&mut self, mid: MeetingId) -> Result<(), HwError> {
        let Some(book) = self.meetings.get(&mid) else {
            return Ok(());
        };
        if !book.participants.is_empty() {
            // Still-live participants need pre.mgid updated to drop
            // whoever just left.
            if let Some(mgid) = self.meeting_mgid.get(&mid) {
                self.install_mgid(mid, mgid)?;
            }
            return Ok(());
        }
        self.meetings.remove(&mid);
        if let Some(mgid) = self.meeting_mgid.release(&mid) {
            if self.installed_mgid.remove(&mgid).is_some() {
                let m = Match::new(vec![exact("$MGID", u64::from(mgid))]);
                self.rc.delete(TBL_PRE_MGID, &m)?;
            }
            info!(meeting = mid, mgid, "meeting retired, MGID released");
        }
        Ok(())
    }

    /// `set_quality`: install/clear `video_layer_suppression` validity
    /// for the destination's L1-XID across the current SVC structure's
    /// template-id-mod classes, per §4.4.
    fn set_quality(&mut self, m: SetQuality) -> Result<(), HwError> {
        let dest = Addr::new(m.dip.clone(), m.dport);
        let Some(l1_xid) = self.mp_rid.get(&(m.mid, dest)) else {
            warn!(meeting = m.mid, "set_quality: destination has no RID, ignoring");
            return Ok(());
        };
        let Some(structure) = av1_structure(&self.svc_structure) else {
            warn!(structure = %self.svc_structure, "set_quality: no active SVC structure");
            return Ok(());
        };

        let allowed: HashSet<u8> = structure
            .key
            .iter()
            .chain(structure.allowed_classes(m.quality))
            .copied()
            .collect();

        for class in 0..structure.divisor {
            let suppressed = !allowed.contains(&class);
            self.write_suppression(l1_xid, class, suppressed)?;
        }
        Ok(())
    }

    fn write_suppression(&mut self, l1_xid: u32, class: u8, suppressed: bool) -> Result<(), HwError> {
        let key = (l1_xid, class);
        let currently_installed = self.installed_suppression.contains(&key);
        if currently_installed == suppressed {
            return Ok(());
        }
        let m = Match::new(vec![
            exact("l1_xid", u64::from(l1_xid)),
            exact("hdr.av1.dep_template_id_mod", u64::from(class)),
        ]);
        let a = Action::new(vec![DataField::Bool {
            name: "suppressed".to_owned(),
            value: suppressed,
        }]);
        if suppressed {
            self.rc.add(TBL_VIDEO_LAYER_SUPPRESSION, &m, &a)?;
            self.installed_suppression.insert(key);
        } else if self.installed_suppression.remove(&key) {
            self.rc.delete(TBL_VIDEO_LAYER_SUPPRESSION, &m)?;
        }
        Ok(())
    }

    /// Flush and repopulate `av1_template_id_mod_lookup` for every 6-bit
    /// template id. Unknown structure names are rejected with a log,
    /// matching `update_av1_svc_structure`'s behavior in the original
    /// source.
    fn update_av1_svc_structure(&mut self, structure: &str) {
        let Some(params) = av1_structure(structure) else {
            warn!(structure, "unknown SVC structure, ignoring");
            return;
        };
        if let Err(e) = self.rc.flush(TBL_AV1_TEMPLATE_ID_MOD_LOOKUP) {
            warn!(error = %e, "failed to flush av1_template_id_mod_lookup");
            return;
        }
        for template_id in 0u64..64 {
            let m = Match::new(vec![exact("hdr.av1.dep_template_id", template_id)]);
            let a = Action::with_func(
                "set_av1_template_id_mod",
                vec![int_data("mod", template_id % u64::from(params.divisor))],
            );
            if let Err(e) = self.rc.add(TBL_AV1_TEMPLATE_ID_MOD_LOOKUP, &m, &a) {
                warn!(error = %e, template_id, "failed to install av1 template-id-mod entry");
            }
        }
        self.svc_structure = structure.to_owned();
        self.installed_suppression.clear();
        info!(structure, "AV1 SVC structure updated");
    }
}

/// The startup sequence also loads (and leaves empty) these two
/// planned-but-unrealized tables — see §9's open question. No EB message
/// addresses them.
#[allow(dead_code)]
const PLANNED_UNUSED_TABLES: [&str; 2] = [TBL_RECV_REPORT_FORWARDING, TBL_NACK_PLI_FORWARDING];

#[cfg(test)]
mod tests {
    use super::*;
    use sfu_hw::InMemoryRuntimeClient;
    use sfu_protocol::Quality;

    fn rm() -> RuleMaterializer<InMemoryRuntimeClient> {
        RuleMaterializer::start(InMemoryRuntimeClient::new(), false).unwrap()
    }

    fn add(mid: MeetingId, sip: &str, sport: u16, ssrc: u32, ssrc_rtx: u32, dip: &str, dport: u16, eport: u16) -> EbMessage {
        EbMessage::AddStream(AddStream {
            mid,
            sip: sip.to_owned(),
            sport,
            ssrc,
            ssrc_rtx,
            dip: dip.to_owned(),
            dport,
            eport,
        })
    }

    fn remove(mid: MeetingId, sip: &str, sport: u16, ssrc: u32, ssrc_rtx: u32, dip: &str, dport: u16) -> EbMessage {
        EbMessage::RemoveStream(RemoveStream {
            mid,
            sip: sip.to_owned(),
            sport,
            ssrc,
            ssrc_rtx,
            dip: dip.to_owned(),
            dport,
        })
    }

    #[test]
    fn startup_installs_cpu_port_and_default_av1_table() {
        let mut m = rm();
        assert_eq!(m.rc.get_all(TBL_PRE_PORT).unwrap().len(), 1);
        assert_eq!(m.rc.get_all(TBL_AV1_TEMPLATE_ID_MOD_LOOKUP).unwrap().len(), 64);
        assert_eq!(m.svc_structure, "L1T2");
    }

    #[test]
    fn reciprocal_add_stream_pair_installs_both_senders_pre_node_entries() {
        let mut m = rm();
        m.handle(add(0, "10.0.211.2", 1111, 110, 111, "10.0.211.2", 2222, 3)).unwrap();
        m.handle(add(0, "10.0.211.2", 2222, 210, 211, "10.0.211.2", 1111, 2)).unwrap();

        assert_eq!(m.rc.get_all(TBL_PRE_NODE).unwrap().len(), 2);
        assert_eq!(m.rc.get_all(TBL_PACKET_REPLICATION).unwrap().len(), 4); // 2 senders x (ssrc+ssrc_rtx)
        assert_eq!(m.rc.get_all(TBL_IPV4_ROUTE).unwrap().len(), 4);
        assert_eq!(m.rc.get_all(TBL_PRE_MGID).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_add_stream_is_idempotent() {
        let mut m = rm();
        let msg = add(0, "10.0.211.2", 1111, 110, 111, "10.0.211.2", 2222, 3);
        m.handle(msg.clone()).unwrap();
        m.handle(add(0, "10.0.211.2", 2222, 210, 211, "10.0.211.2", 1111, 2)).unwrap();
        let before = m.rc.get_all(TBL_PACKET_REPLICATION).unwrap().len();
        m.handle(msg).unwrap();
        assert_eq!(m.rc.get_all(TBL_PACKET_REPLICATION).unwrap().len(), before);
    }

    #[test]
    fn meeting_retirement_releases_mgid_for_reuse() {
        let mut m = rm();
        m.handle(add(0, "10.0.0.1", 1, 10, 11, "10.0.0.2", 1, 0)).unwrap();
        m.handle(add(0, "10.0.0.2", 1, 20, 21, "10.0.0.1", 1, 0)).unwrap();
        let first_mgid = m.meeting_mgid.get(&0).unwrap();

        m.handle(remove(0, "10.0.0.1", 1, 10, 11, "10.0.0.2", 1)).unwrap();
        m.handle(remove(0, "10.0.0.2", 1, 20, 21, "10.0.0.1", 1)).unwrap();

        assert!(m.meeting_mgid.get(&0).is_none());
        assert_eq!(m.rc.get_all(TBL_PRE_MGID).unwrap().len(), 0);
        assert_eq!(m.rc.get_all(TBL_PRE_NODE).unwrap().len(), 0);
        assert_eq!(m.rc.get_all(TBL_PACKET_REPLICATION).unwrap().len(), 0);

        m.handle(add(0, "10.0.0.3", 1, 30, 31, "10.0.0.4", 1, 0)).unwrap();
        m.handle(add(0, "10.0.0.4", 1, 40, 41, "10.0.0.3", 1, 0)).unwrap();
        assert_eq!(m.meeting_mgid.get(&0).unwrap(), first_mgid);
    }

    #[test]
    fn set_quality_suppresses_higher_template_id_classes_for_base() {
        let mut m = rm();
        m.handle(add(0, "10.0.0.1", 1, 10, 0, "10.0.0.2", 1, 0)).unwrap();
        m.handle(add(0, "10.0.0.2", 1, 20, 0, "10.0.0.1", 1, 0)).unwrap();

        m.handle(EbMessage::SetQuality(SetQuality {
            mid: 0,
            sip: "10.0.0.1".to_owned(),
            sport: 1,
            ssrc: 10,
            dip: "10.0.0.2".to_owned(),
            dport: 1,
            quality: Quality::Base,
        }))
        .unwrap();

        // L1T2: divisor 3, base allows {0 (key), 1}; class 2 must be suppressed.
        assert_eq!(m.rc.get_all(TBL_VIDEO_LAYER_SUPPRESSION).unwrap().len(), 1);
    }

    #[test]
    fn set_quality_high_clears_suppressions() {
        let mut m = rm();
        m.handle(add(0, "10.0.0.1", 1, 10, 0, "10.0.0.2", 1, 0)).unwrap();
        m.handle(add(0, "10.0.0.2", 1, 20, 0, "10.0.0.1", 1, 0)).unwrap();
        let base = SetQuality {
            mid: 0,
            sip: "10.0.0.1".to_owned(),
            sport: 1,
            ssrc: 10,
            dip: "10.0.0.2".to_owned(),
            dport: 1,
            quality: Quality::Base,
        };
        m.handle(EbMessage::SetQuality(base.clone())).unwrap();
        assert_eq!(m.rc.get_all(TBL_VIDEO_LAYER_SUPPRESSION).unwrap().len(), 1);

        m.handle(EbMessage::SetQuality(SetQuality {
            quality: Quality::High,
            ..base
        }))
        .unwrap();
        assert_eq!(m.rc.get_all(TBL_VIDEO_LAYER_SUPPRESSION).unwrap().len(), 0);
    }

    #[test]
    fn update_av1_svc_structure_rejects_unknown_names() {
        let mut m = rm();
        let before = m.rc.get_all(TBL_AV1_TEMPLATE_ID_MOD_LOOKUP).unwrap().len();
        m.handle(EbMessage::UpdateAv1SvcStructure(
            sfu_protocol::UpdateAv1SvcStructure {
                structure: "L1T99".to_owned(),
            },
        ))
        .unwrap();
        assert_eq!(m.svc_structure, "L1T2");
        assert_eq!(m.rc.get_all(TBL_AV1_TEMPLATE_ID_MOD_LOOKUP).unwrap().len(), before);
    }

    #[test]
    fn update_av1_svc_structure_to_l1t3_installs_64_mod_5_entries() {
        let mut m = rm();
        m.handle(EbMessage::UpdateAv1SvcStructure(
            sfu_protocol::UpdateAv1SvcStructure {
                structure: "L1T3".to_owned(),
            },
        ))
        .unwrap();
        assert_eq!(m.svc_structure, "L1T3");
        assert_eq!(m.rc.get_all(TBL_AV1_TEMPLATE_ID_MOD_LOOKUP).unwrap().len(), 64);
    }
}
