//! Pairing a client session with a published server.

use std::time::Duration;

use crate::client::{ClientSession, McpClient};
use crate::error::ClientError;
use crate::loopback::ClientEndpoint;
use crate::server::{PublishedServer, ServerBinding};

/// Open a loopback pair, serve `server` on one end and connect `session`
/// on the other.
///
/// Both sides of the handshake run concurrently and must finish within
/// `timeout`; on expiry the pair is torn down.
///
/// # Errors
///
/// [`ClientError::Timeout`] when the handshake does not finish in time,
/// and whatever either side of the handshake reports otherwise.
pub async fn connect(
    server: &PublishedServer,
    session: ClientSession,
    timeout: Duration,
) -> Result<(McpClient, ServerBinding), ClientError> {
    let (client_end, server_end) = ClientEndpoint::pair();
    let guard = client_end.clone();
    let handshake = async {
        tokio::try_join!(session.connect(client_end), server.serve(server_end))
    };
    match tokio::time::timeout(timeout, handshake).await {
        Ok(Ok(pair)) => Ok(pair),
        Ok(Err(e)) => {
            let _ = guard.close();
            Err(e)
        }
        Err(_) => {
            let _ = guard.close();
            tracing::warn!(?timeout, "handshake timed out");
            Err(ClientError::Timeout(timeout))
        }
    }
}
