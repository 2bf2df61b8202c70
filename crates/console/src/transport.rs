//! TCP bridge between the game server and the session.
//!
//! Each line on the socket is one JSON envelope `{"event": ..., "data": ...}`.
//! Connecting reports `Connected` to the session; EOF or an I/O error reports
//! `Disconnected` and ends the bridge. There is no reconnection.

use anyhow::{Context, Result};
use api::{TransportEvent, decode_line, encode_line};
use backend::TransportPeer;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::{debug, info, warn};

/// Why the bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The server closed the connection or the socket failed.
    ServerClosed,
    /// The session dropped its side of the link.
    SessionClosed,
}

/// Connect to `addr` and bridge it to the session until either side closes.
pub async fn run_bridge(addr: String, peer: TransportPeer) -> Result<BridgeExit> {
    info!("transport: connecting to {}", addr);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = peer.inbound.send(TransportEvent::Disconnected);
            return Err(e).with_context(|| format!("Failed to connect to {}", addr));
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("transport: set_nodelay failed: {}", e);
    }
    info!("transport: connected to {}", addr);

    let (reader, writer) = stream.into_split();
    Ok(bridge_stream(reader, writer, peer).await)
}

/// Bridge an already-connected byte stream.
pub async fn bridge_stream<R, W>(reader: R, mut writer: W, mut peer: TransportPeer) -> BridgeExit
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if peer.inbound.send(TransportEvent::Connected).is_err() {
        return BridgeExit::SessionClosed;
    }

    let mut lines = BufReader::new(reader).lines();
    let exit = loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let decoded = decode_line(&line).and_then(TransportEvent::from_envelope);
                        let event = match decoded {
                            Ok(event) => event,
                            Err(e) => {
                                warn!("transport: ignoring line: {}", e);
                                continue;
                            }
                        };
                        if peer.inbound.send(event).is_err() {
                            break BridgeExit::SessionClosed;
                        }
                    }
                    Ok(None) => {
                        info!("transport: server closed the connection");
                        break BridgeExit::ServerClosed;
                    }
                    Err(e) => {
                        warn!("transport: read failed: {}", e);
                        break BridgeExit::ServerClosed;
                    }
                }
            }

            outbound = peer.outbound.recv() => {
                let Some(event) = outbound else {
                    break BridgeExit::SessionClosed;
                };
                let line = match encode_line(&event.to_envelope()) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("transport: failed to encode {}: {}", event.name(), e);
                        continue;
                    }
                };
                debug!("transport: sending {}", event.name());
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    warn!("transport: write failed: {}", e);
                    break BridgeExit::ServerClosed;
                }
                if let Err(e) = writer.flush().await {
                    warn!("transport: flush failed: {}", e);
                    break BridgeExit::ServerClosed;
                }
            }
        }
    };

    if exit == BridgeExit::ServerClosed {
        let _ = peer.inbound.send(TransportEvent::Disconnected);
    }
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{InboundEvent, OutboundEvent, SpeakerId};
    use backend::transport_pair;
    use std::time::Duration;
    use tokio::{io::AsyncBufReadExt, net::TcpListener};

    async fn next_inbound(link: &mut backend::TransportLink) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), link.inbound.recv())
            .await
            .expect("timed out waiting for inbound event")
            .expect("bridge dropped the link")
    }

    #[tokio::test]
    async fn test_bridge_forwards_both_directions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (mut link, peer) = transport_pair();

        let bridge = tokio::spawn(run_bridge(addr, peer));
        let (server, _) = listener.accept().await.unwrap();
        let (server_read, mut server_write) = server.into_split();
        let mut server_lines = BufReader::new(server_read).lines();

        assert_eq!(next_inbound(&mut link).await, TransportEvent::Connected);

        server_write
            .write_all(concat!(
                "{\"event\":\"game_started\"}\n",
                "not json\n\n",
                "{\"event\":\"start_voting\",\"data\":null}\n",
            ).as_bytes())
            .await
            .unwrap();
        assert_eq!(
            next_inbound(&mut link).await,
            TransportEvent::Event(InboundEvent::GameStarted)
        );
        // The malformed line is skipped.
        assert_eq!(
            next_inbound(&mut link).await,
            TransportEvent::Event(InboundEvent::StartVoting)
        );

        link.outbound
            .send(OutboundEvent::SendVote { target: SpeakerId(4) })
            .unwrap();
        let line = server_lines.next_line().await.unwrap().unwrap();
        let envelope = decode_line(&line).unwrap();
        assert_eq!(envelope.event, "send_vote");
        assert_eq!(envelope.data["target"], 4);

        drop(server_write);
        drop(server_lines);
        assert_eq!(next_inbound(&mut link).await, TransportEvent::Disconnected);
        assert_eq!(bridge.await.unwrap().unwrap(), BridgeExit::ServerClosed);
    }

    #[tokio::test]
    async fn test_bridge_stops_when_session_closes() {
        let (client, _server) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client);
        let (link, peer) = transport_pair();
        drop(link);

        assert_eq!(bridge_stream(reader, writer, peer).await, BridgeExit::SessionClosed);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_disconnect() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (mut link, peer) = transport_pair();
        assert!(run_bridge(addr, peer).await.is_err());
        assert_eq!(next_inbound(&mut link).await, TransportEvent::Disconnected);
    }
}
