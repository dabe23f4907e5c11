//! Workspace root crate.
//!
//! Carries no runtime code of its own — it exists to host the
//! cross-service integration test suite under `tests/integration/`,
//! which drives a [`reconciler::Reconciler`] and a
//! [`materializer::RuleMaterializer`] together over a real loopback
//! WebSocket, the way `services/reconciler` and `services/materializer`
//! talk to each other in production.
