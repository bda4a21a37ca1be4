//! Bidirectional relay between a client and its upstream.
//!
//! # Responsibilities
//! - Pump bytes in both directions without inspecting them
//! - Propagate close: when one direction ends, shut down its destination
//! - Report per-direction byte counts for the connection log
//!
//! # Design Decisions
//! - Two symmetric one-way pumps joined in one task; each pump half-closes
//!   its destination when its source ends, so a close on either side winds
//!   the whole pair down

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes moved in each direction by a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Relay bytes between `client` and `upstream` until both directions end.
///
/// IO errors after handover are terminal for their direction and are logged,
/// not surfaced; a reset mid-relay is an ordinary way for a tunnel to die.
pub async fn pair<C, U>(client: C, upstream: U) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + Unpin,
    U: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);

    let (client_to_upstream, upstream_to_client) = tokio::join!(
        pump("client_to_upstream", &mut client_rd, &mut upstream_wr),
        pump("upstream_to_client", &mut upstream_rd, &mut client_wr),
    );

    RelayStats {
        client_to_upstream,
        upstream_to_client,
    }
}

/// Copy `from` into `to` until EOF or error, then half-close `to`.
///
/// Counts only delivered bytes, and keeps the count when the direction
/// dies mid-transfer.
async fn pump<R, W>(direction: &'static str, from: &mut R, to: &mut W) -> u64
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let mut buf = [0u8; 8 * 1024];
    let mut copied = 0u64;

    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(error) => {
                tracing::debug!(direction, %error, copied, "Relay direction ended with error");
                break;
            }
        };
        if let Err(error) = to.write_all(&buf[..n]).await {
            tracing::debug!(direction, %error, copied, "Relay direction ended with error");
            break;
        }
        copied += n as u64;
    }

    let _ = to.shutdown().await;
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn relays_both_directions_and_counts_bytes() {
        let (client_near, mut client_far) = duplex(4096);
        let (upstream_near, mut upstream_far) = duplex(4096);

        let relay = tokio::spawn(pair(client_near, upstream_near));

        client_far.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream_far.write_all(b"pong!!").await.unwrap();
        let mut buf = [0u8; 6];
        client_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!!");

        drop(client_far);
        drop(upstream_far);

        let stats = relay.await.unwrap();
        assert_eq!(stats.client_to_upstream, 4);
        assert_eq!(stats.upstream_to_client, 6);
    }

    #[tokio::test]
    async fn stats_keep_bytes_delivered_before_a_direction_dies() {
        let (client_near, mut client_far) = duplex(4096);
        let (upstream_near, mut upstream_far) = duplex(4096);

        let relay = tokio::spawn(pair(client_near, upstream_near));

        client_far.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        // The destination vanishes; the next client write can't be delivered
        // but the four bytes already moved must stay counted.
        drop(upstream_far);
        let _ = client_far.write_all(b"more").await;
        drop(client_far);

        let stats = tokio::time::timeout(std::time::Duration::from_secs(1), relay)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.client_to_upstream, 4);
        assert_eq!(stats.upstream_to_client, 0);
    }

    #[tokio::test]
    async fn close_on_one_side_winds_down_the_pair() {
        let (client_near, client_far) = duplex(4096);
        let (upstream_near, mut upstream_far) = duplex(4096);

        let relay = tokio::spawn(pair(client_near, upstream_near));

        // Client goes away; the upstream side should see EOF and the relay
        // should finish without the upstream ever closing.
        drop(client_far);
        let mut buf = Vec::new();
        upstream_far.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        drop(upstream_far);

        let stats = tokio::time::timeout(std::time::Duration::from_secs(1), relay)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, RelayStats::default());
    }
}
