//! Table names and the AV1 template-id modulation maps, lifted verbatim
//! (field names included) from the original Tofino control-plane source
//! so the installed match/action shapes line up with the P4 program's
//! declared schema.

/// Dev-port the model (software switch) exposes as its CPU port.
pub const CPU_PORT_MODEL: u16 = 64;
/// Dev-port the physical switch exposes as its CPU port.
pub const CPU_PORT_HARDWARE: u16 = 192;

/// Sentinel `ssrc_rtx` value meaning "no retransmission stream" — relevant
/// for non-video send streams.
pub const NO_RTX_SSRC: u32 = 0;

pub const TBL_AV1_TEMPLATE_ID_MOD_LOOKUP: &str = "SwitchIngress.av1_template_id_mod_lookup";
pub const TBL_PACKET_REPLICATION: &str = "SwitchIngress.packet_replication";
pub const TBL_RECV_REPORT_FORWARDING: &str = "SwitchIngress.recv_report_forwarding";
pub const TBL_NACK_PLI_FORWARDING: &str = "SwitchIngress.nack_pli_forwarding";
pub const TBL_VIDEO_LAYER_SUPPRESSION: &str = "SwitchIngress.video_layer_suppression";
pub const TBL_PRE_NODE: &str = "$pre.node";
pub const TBL_PRE_MGID: &str = "$pre.mgid";
pub const TBL_PRE_PRUNE: &str = "$pre.prune";
pub const TBL_PRE_PORT: &str = "$pre.port";
pub const TBL_IPV4_ROUTE: &str = "SwitchEgress.ipv4_route";

/// All tables flushed on materializer startup, in load order.
pub const ALL_TABLES: &[&str] = &[
    TBL_AV1_TEMPLATE_ID_MOD_LOOKUP,
    TBL_PACKET_REPLICATION,
    TBL_RECV_REPORT_FORWARDING,
    TBL_NACK_PLI_FORWARDING,
    TBL_VIDEO_LAYER_SUPPRESSION,
    TBL_PRE_NODE,
    TBL_PRE_MGID,
    TBL_PRE_PRUNE,
    TBL_IPV4_ROUTE,
    TBL_PRE_PORT,
];

/// One SVC structure's AV1 template-id modulation parameters: the
/// divisor used to fold the 6-bit `dep_template_id` down to a small mod
/// class, and the per-quality sets of mod classes that tier is allowed to
/// see.
pub struct Av1Structure {
    pub divisor: u8,
    pub key: &'static [u8],
    pub base: &'static [u8],
    pub mid: Option<&'static [u8]>,
    pub high: &'static [u8],
}

/// Look up the AV1 template-id modulation parameters for a named SVC
/// structure (`"L1T2"` or `"L1T3"`). Unknown names return `None` — the
/// caller logs and rejects the `update_av1_svc_structure` message.
pub fn av1_structure(name: &str) -> Option<Av1Structure> {
    match name {
        "L1T2" => Some(Av1Structure {
            divisor: 3,
            key: &[0],
            base: &[1],
            mid: None,
            high: &[1, 2],
        }),
        "L1T3" => Some(Av1Structure {
            divisor: 5,
            key: &[0],
            base: &[1],
            mid: Some(&[1, 2]),
            high: &[1, 2, 3, 4],
        }),
        _ => None,
    }
}

impl Av1Structure {
    /// The mod classes visible at `quality`. `L1T2` defines no `mid`
    /// tier; a `mid` request against it falls back to `base`'s set (see
    /// DESIGN.md).
    pub fn allowed_classes(&self, quality: sfu_protocol::Quality) -> &'static [u8] {
        use sfu_protocol::Quality;
        match quality {
            Quality::High => self.high,
            Quality::Mid => self.mid.unwrap_or(self.base),
            Quality::Base => self.base,
        }
    }
}
