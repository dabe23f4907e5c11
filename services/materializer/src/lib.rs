//! Rule materializer: the hardware-facing half of the control plane.
//!
//! Owns the switch's match-action tables through a [`sfu_hw::RuntimeClient`]
//! and the six bounded ID bijections (MGID, NID, RID/L1-XID, L2-XID), and
//! keeps both convergent with whatever topology the session reconciler
//! broadcasts over the event bus.

pub mod materializer;
pub mod tables;
pub mod ws_client;

pub use materializer::RuleMaterializer;
