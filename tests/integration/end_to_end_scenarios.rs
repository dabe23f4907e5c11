//! Drives a real session reconciler and rule materializer over a loopback
//! WebSocket, the same way the two production binaries talk to each
//! other, through the literal scenario walked in the control-plane
//! overview: three participants join with video, one receive stream's
//! quality is lowered, a participant leaves, the meeting is torn down,
//! and the AV1 SVC structure is switched.

use std::sync::Arc;
use std::time::Duration;

use materializer::RuleMaterializer;
use reconciler::state::MediaType;
use reconciler::Reconciler;
use sfu_hw::{InMemoryRuntimeClient, RuntimeClient};
use sfu_protocol::Quality;
use tokio::net::TcpListener;
use tokio::sync::watch;

const SETTLE: Duration = Duration::from_millis(100);

async fn start_reconciler() -> (Arc<Reconciler>, String, watch::Sender<bool>) {
    let reconciler = Arc::new(Reconciler::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(reconciler::ws_server::serve(
        Arc::clone(&reconciler),
        listener,
        shutdown_rx,
    ));
    (reconciler, format!("ws://{addr}"), shutdown_tx)
}

type RmHandle = tokio::task::JoinHandle<RuleMaterializer<InMemoryRuntimeClient>>;

/// Spawns the materializer client against `url` and waits `SETTLE` so its
/// broadcast subscription is registered before the caller drives any
/// reconciler events — `publish` is a no-op with zero subscribers and
/// never replays (`services/reconciler/src/lib.rs`), so connecting after
/// the events have already fired would silently install nothing.
async fn spawn_materializer(
    url: String,
    mut rm: RuleMaterializer<InMemoryRuntimeClient>,
) -> (RmHandle, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        materializer::ws_client::run(&url, &mut rm, shutdown_rx).await;
        rm
    });
    tokio::time::sleep(SETTLE).await;
    (handle, shutdown_tx)
}

/// Lets in-flight events settle, then shuts the materializer client down
/// and hands back the owned [`RuleMaterializer`] so the test can inspect
/// its installed tables.
async fn stop_materializer(handle: RmHandle, shutdown_tx: watch::Sender<bool>) -> RuleMaterializer<InMemoryRuntimeClient> {
    tokio::time::sleep(SETTLE).await;
    let _ = shutdown_tx.send(true);
    handle.await.unwrap()
}

#[tokio::test]
async fn three_participants_join_then_quality_drops_then_participants_leave() {
    let (reconciler, url, _reconciler_shutdown) = start_reconciler().await;
    let rm = RuleMaterializer::start(InMemoryRuntimeClient::new(), false).unwrap();
    let (rm_handle, shutdown_tx) = spawn_materializer(url, rm).await;

    // Three participants join meeting 0 with video on.
    reconciler
        .add_stream(0, "10.0.211.2", 1111, 110, 111, "veth4", MediaType::Video)
        .unwrap();
    reconciler
        .add_stream(0, "10.0.211.2", 2222, 210, 211, "veth6", MediaType::Video)
        .unwrap();
    reconciler
        .add_stream(0, "10.0.211.2", 3333, 310, 311, "veth6", MediaType::Video)
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    // Lower P1's quality towards P3.
    reconciler.set_quality(0, "10.0.211.2", 1111, 110, "10.0.211.2", 3333, Quality::Base);
    tokio::time::sleep(SETTLE).await;

    // P2 leaves.
    reconciler.remove_stream(0, "10.0.211.2", 2222, 210);
    tokio::time::sleep(SETTLE).await;

    // Meeting ends: P1 and P3 also leave.
    reconciler.remove_stream(0, "10.0.211.2", 1111, 110);
    reconciler.remove_stream(0, "10.0.211.2", 3333, 310);

    let mut rm = stop_materializer(rm_handle, shutdown_tx).await;

    // Every meeting-scoped rule has been torn back down.
    assert_eq!(rm.runtime_client().get_all("$pre.mgid").unwrap().len(), 0);
    assert_eq!(rm.runtime_client().get_all("$pre.node").unwrap().len(), 0);
    assert_eq!(
        rm.runtime_client()
            .get_all("SwitchIngress.packet_replication")
            .unwrap()
            .len(),
        0
    );
    assert_eq!(
        rm.runtime_client().get_all("SwitchEgress.ipv4_route").unwrap().len(),
        0
    );
}

#[tokio::test]
async fn six_receive_streams_materialize_hardware_entries_for_three_senders() {
    let (reconciler, url, _reconciler_shutdown) = start_reconciler().await;
    let rm = RuleMaterializer::start(InMemoryRuntimeClient::new(), false).unwrap();
    let (rm_handle, shutdown_tx) = spawn_materializer(url, rm).await;

    reconciler
        .add_stream(0, "10.0.211.2", 1111, 110, 111, "veth4", MediaType::Video)
        .unwrap();
    reconciler
        .add_stream(0, "10.0.211.2", 2222, 210, 211, "veth6", MediaType::Video)
        .unwrap();
    reconciler
        .add_stream(0, "10.0.211.2", 3333, 310, 311, "veth6", MediaType::Video)
        .unwrap();

    let mut rm = stop_materializer(rm_handle, shutdown_tx).await;

    // Three senders, each with a video ssrc + rtx ssrc => 6 replication entries.
    assert_eq!(
        rm.runtime_client()
            .get_all("SwitchIngress.packet_replication")
            .unwrap()
            .len(),
        6
    );
    // One pre.node entry per participant.
    assert_eq!(rm.runtime_client().get_all("$pre.node").unwrap().len(), 3);
    // Single meeting => single pre.mgid row.
    assert_eq!(rm.runtime_client().get_all("$pre.mgid").unwrap().len(), 1);
    // Six receive streams, each with a primary + rtx route.
    assert_eq!(
        rm.runtime_client().get_all("SwitchEgress.ipv4_route").unwrap().len(),
        12
    );
}

#[tokio::test]
async fn retiring_a_meeting_frees_its_mgid_for_reuse() {
    let (reconciler, url, _reconciler_shutdown) = start_reconciler().await;
    let rm = RuleMaterializer::start(InMemoryRuntimeClient::new(), false).unwrap();

    let (rm_handle, shutdown_tx) = spawn_materializer(url.clone(), rm).await;
    reconciler
        .add_stream(0, "10.0.0.1", 1, 10, 11, "veth0", MediaType::Video)
        .unwrap();
    reconciler
        .add_stream(0, "10.0.0.2", 1, 20, 21, "veth2", MediaType::Video)
        .unwrap();
    let mut rm = stop_materializer(rm_handle, shutdown_tx).await;
    let first_mgid = rm
        .runtime_client()
        .get_all("$pre.mgid")
        .unwrap()
        .into_iter()
        .next()
        .map(|(key, _)| key);
    assert!(first_mgid.is_some());

    let (rm_handle, shutdown_tx) = spawn_materializer(url.clone(), rm).await;
    reconciler.remove_stream(0, "10.0.0.1", 1, 10);
    reconciler.remove_stream(0, "10.0.0.2", 1, 20);
    let mut rm = stop_materializer(rm_handle, shutdown_tx).await;
    assert_eq!(rm.runtime_client().get_all("$pre.mgid").unwrap().len(), 0);

    let (rm_handle, shutdown_tx) = spawn_materializer(url, rm).await;
    reconciler
        .add_stream(0, "10.0.0.3", 1, 30, 31, "veth0", MediaType::Video)
        .unwrap();
    reconciler
        .add_stream(0, "10.0.0.4", 1, 40, 41, "veth2", MediaType::Video)
        .unwrap();
    let mut rm = stop_materializer(rm_handle, shutdown_tx).await;
    let second_mgid = rm
        .runtime_client()
        .get_all("$pre.mgid")
        .unwrap()
        .into_iter()
        .next()
        .map(|(key, _)| key);
    assert_eq!(first_mgid, second_mgid);
}

#[tokio::test]
async fn updating_the_svc_structure_repopulates_the_template_id_mod_table() {
    let (reconciler, url, _reconciler_shutdown) = start_reconciler().await;
    let rm = RuleMaterializer::start(InMemoryRuntimeClient::new(), false).unwrap();
    let (rm_handle, shutdown_tx) = spawn_materializer(url, rm).await;

    reconciler.update_av1_svc_structure("L1T3");

    let mut rm = stop_materializer(rm_handle, shutdown_tx).await;
    assert_eq!(
        rm.runtime_client()
            .get_all("SwitchIngress.av1_template_id_mod_lookup")
            .unwrap()
            .len(),
        64
    );
}
