//! Shared test harness for the event-bus client/server pair: a mock client
//! for exercising the session reconciler's WS server, and a mock server
//! for exercising the rule materializer's reconnecting WS client.

pub mod mock_eb_client;
pub mod mock_eb_server;

pub use mock_eb_client::MockEbClient;
pub use mock_eb_server::{MockEbConnection, MockEbServer};

#[cfg(test)]
mod tests {
    use super::*;
    use sfu_protocol::{EbMessage, UpdateAv1SvcStructure};

    #[tokio::test]
    async fn mock_server_hands_out_connections_in_order() {
        let mut server = MockEbServer::start().await.unwrap();
        let url = server.url();

        let _client = MockEbClient::connect(&url).await.unwrap();
        let conn = server.accept().await;
        assert!(conn.is_some());
    }

    #[tokio::test]
    async fn mock_server_can_send_a_message_the_client_receives() {
        let mut server = MockEbServer::start().await.unwrap();
        let url = server.url();

        let mut client = MockEbClient::connect(&url).await.unwrap();
        let mut conn = server.accept().await.unwrap();

        conn.send(&EbMessage::UpdateAv1SvcStructure(UpdateAv1SvcStructure {
            structure: "L1T3".to_owned(),
        }))
        .await
        .unwrap();

        let msg = client.recv().await.unwrap();
        assert_eq!(
            msg,
            EbMessage::UpdateAv1SvcStructure(UpdateAv1SvcStructure {
                structure: "L1T3".to_owned(),
            })
        );
    }

    #[tokio::test]
    async fn dropping_a_connection_lets_the_server_accept_a_new_one() {
        let mut server = MockEbServer::start().await.unwrap();
        let url = server.url();

        let client1 = MockEbClient::connect(&url).await.unwrap();
        let conn1 = server.accept().await.unwrap();
        drop(conn1);
        drop(client1);

        let _client2 = MockEbClient::connect(&url).await.unwrap();
        let conn2 = server.accept().await;
        assert!(conn2.is_some());
    }
}
