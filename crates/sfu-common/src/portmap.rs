//! Deterministic `port_name` → hardware dev-port resolution.
//!
//! `add_stream`'s `port_name` argument (e.g. `"veth4"`) names a kernel
//! veth interface; the session reconciler resolves it to the switch
//! dev-port the participant's packets actually egress on before handing
//! the result to the rule materializer as an `eport`.

/// Highest veth index (inclusive) covered by the even-step mapping.
const MAX_STEPPED_VETH: u32 = 32;

/// The dedicated CPU-facing port, outside the stepped range.
const CPU_VETH: u32 = 250;

/// Resolve a `veth{N}` port name to its dev-port index.
///
/// `veth0..veth32` map to dev-ports `0..16`, stepping by 2 in the
/// interface name and by 1 in the dev-port (`veth4` → 2, `veth6` → 3).
/// `veth250` maps to the fixed CPU dev-port, 64. Any other name is
/// unresolvable.
pub fn resolve_eport(port_name: &str) -> Option<u16> {
    let n: u32 = port_name.strip_prefix("veth")?.parse().ok()?;
    if n == CPU_VETH {
        return Some(64);
    }
    if n <= MAX_STEPPED_VETH && n % 2 == 0 {
        return Some((n / 2) as u16);
    }
    None
}
