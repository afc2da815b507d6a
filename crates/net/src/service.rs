//! UDP gossip service: one receive loop parsing datagrams and dispatching
//! into the node's handler, plus typed send helpers.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::*;

use weave_primitives::params::NetworkParams;
use weave_state::{Block, Tx, Vote};

use crate::message::{Keepalive, Message, MessageParser, NodeIdHandshake};
use crate::peers::reserved_address;

/// Largest datagram we accept; anything bigger is a framing error anyway.
const RECV_BUFFER_SIZE: usize = 16 * 1024;

/// Where parsed datagrams land.  Implementations must not block for long;
/// heavy work goes through the processors' queues.
pub trait MessageHandler: Send + Sync {
    fn keepalive(&self, from: SocketAddr, message: Keepalive);
    fn publish(&self, from: SocketAddr, block: Block);
    fn confirm_req(&self, from: SocketAddr, block: Block);
    fn confirm_ack(&self, from: SocketAddr, vote: Vote);
    fn node_id_handshake(&self, from: SocketAddr, message: NodeIdHandshake);
    fn transaction(&self, from: SocketAddr, tx: Tx);
    /// A message parsed but was dropped (wrong transport, bad work, ...).
    fn bad_message(&self, from: SocketAddr);
}

/// Datagram socket bound to the peering port.
pub struct UdpService {
    socket: UdpSocket,
    params: NetworkParams,
    parser: MessageParser,
    local: SocketAddr,
}

impl UdpService {
    pub async fn bind(addr: SocketAddr, params: NetworkParams) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local = socket.local_addr()?;
        info!(%local, "udp service bound");
        Ok(Self {
            socket,
            parser: MessageParser::new(params.clone()),
            params,
            local,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Receive loop; returns when `stop` flips true or the socket dies.
    pub async fn run(
        self: Arc<Self>,
        handler: Arc<dyn MessageHandler>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, from) = tokio::select! {
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(err = %e, "udp receive failed");
                        continue;
                    }
                },
                _ = stop.changed() => {
                    if *stop.borrow() {
                        debug!("udp service stopping");
                        return;
                    }
                    continue;
                }
            };
            if reserved_address(&from) {
                continue;
            }
            match self.parser.parse(&buffer[..len]) {
                Ok(Message::Keepalive(body)) => handler.keepalive(from, body),
                Ok(Message::Publish(block)) => handler.publish(from, block),
                Ok(Message::ConfirmReq(block)) => handler.confirm_req(from, block),
                Ok(Message::ConfirmAck(vote)) => handler.confirm_ack(from, vote),
                Ok(Message::NodeIdHandshake(body)) => handler.node_id_handshake(from, body),
                Ok(Message::Transaction(tx)) => handler.transaction(from, tx),
                Ok(_) => {
                    // Bootstrap requests belong on the TCP listener.
                    trace!(%from, "bootstrap message on datagram socket");
                    handler.bad_message(from);
                }
                Err(status) => {
                    trace!(%from, ?status, "datagram dropped");
                    handler.bad_message(from);
                }
            }
        }
    }

    async fn send(&self, to: SocketAddr, message: &Message) {
        let bytes = message.serialize(&self.params);
        if let Err(e) = self.socket.send_to(&bytes, to).await {
            trace!(%to, err = %e, "udp send failed");
        }
    }

    pub async fn send_keepalive(&self, to: SocketAddr, listed: &[SocketAddr]) {
        self.send(to, &Message::Keepalive(Keepalive::new(listed)))
            .await;
    }

    pub async fn send_publish(&self, to: SocketAddr, block: Block) {
        self.send(to, &Message::Publish(block)).await;
    }

    pub async fn send_confirm_req(&self, to: SocketAddr, block: Block) {
        self.send(to, &Message::ConfirmReq(block)).await;
    }

    pub async fn send_confirm_ack(&self, to: SocketAddr, vote: Vote) {
        self.send(to, &Message::ConfirmAck(vote)).await;
    }

    pub async fn send_handshake(&self, to: SocketAddr, body: NodeIdHandshake) {
        self.send(to, &Message::NodeIdHandshake(body)).await;
    }

    pub async fn send_transaction(&self, to: SocketAddr, tx: Tx) {
        self.send(to, &Message::Transaction(tx)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use weave_primitives::params::Network;

    #[derive(Default)]
    struct Recorder {
        keepalives: Mutex<Vec<(SocketAddr, usize)>>,
        handshakes: Mutex<Vec<SocketAddr>>,
    }

    impl MessageHandler for Recorder {
        fn keepalive(&self, from: SocketAddr, message: Keepalive) {
            self.keepalives.lock().push((from, message.listed().count()));
        }
        fn publish(&self, _: SocketAddr, _: Block) {}
        fn confirm_req(&self, _: SocketAddr, _: Block) {}
        fn confirm_ack(&self, _: SocketAddr, _: Vote) {}
        fn node_id_handshake(&self, from: SocketAddr, _: NodeIdHandshake) {
            self.handshakes.lock().push(from);
        }
        fn transaction(&self, _: SocketAddr, _: Tx) {}
        fn bad_message(&self, _: SocketAddr) {}
    }

    #[tokio::test]
    async fn test_datagram_roundtrip() {
        let params = NetworkParams::new(Network::Test);
        let a = Arc::new(
            UdpService::bind("127.0.0.1:0".parse().unwrap(), params.clone())
                .await
                .unwrap(),
        );
        let b = Arc::new(
            UdpService::bind("127.0.0.1:0".parse().unwrap(), params.clone())
                .await
                .unwrap(),
        );

        let recorder = Arc::new(Recorder::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(b.clone().run(recorder.clone(), stop_rx));

        a.send_keepalive(b.local_addr(), &[a.local_addr()]).await;
        a.send_handshake(
            b.local_addr(),
            NodeIdHandshake {
                query: Some(weave_primitives::Buf32::from(1u64)),
                response: None,
            },
        )
        .await;

        // Wait for both datagrams to arrive.
        for _ in 0..100 {
            if !recorder.handshakes.lock().is_empty() && !recorder.keepalives.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.keepalives.lock().as_slice(), &[(a.local_addr(), 1)]);
        assert_eq!(recorder.handshakes.lock().as_slice(), &[a.local_addr()]);

        stop_tx.send(true).unwrap();
        run.await.unwrap();
    }
}
