//! `Pipe`: a duplex heartbeated byte transport bound to one interface,
//! implemented as a PUB/SUB socket pair (both sides bind their publisher and
//! connect their subscriber, ZeroMQ-style).
//!
//! Frames carry a one-byte level tag (see `adanet_core::wire`): `USER`
//! frames are surfaced to the `Adapter`; `SYSTEM` frames are heartbeats used
//! to compute `is_connected`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use adanet_core::types::Message;
use adanet_core::wire;

use crate::error::{Error, Result};

/// Required per §4.4: no buffering toward a disconnected peer, prefer the
/// freshest frame over a backlog.
const SEND_HWM: i32 = 1;
const RECV_HWM: i32 = 1;
const LINGER_MS: i32 = 0;

pub struct Pipe {
    publisher: Mutex<zmq::Socket>,
    subscriber: Mutex<zmq::Socket>,
    last_rx: AtomicU64,
    start: Instant,
}

impl Pipe {
    pub fn new(ctx: &zmq::Context) -> Result<Self> {
        let publisher = ctx.socket(zmq::PUB).map_err(zmq_err)?;
        configure_socket(&publisher)?;

        let subscriber = ctx.socket(zmq::SUB).map_err(zmq_err)?;
        configure_socket(&subscriber)?;
        subscriber.set_subscribe(b"").map_err(zmq_err)?;

        Ok(Pipe {
            publisher: Mutex::new(publisher),
            subscriber: Mutex::new(subscriber),
            last_rx: AtomicU64::new(0),
            start: Instant::now(),
        })
    }

    /// Bind the publisher to `bind_addr` (e.g. `"tcp://0.0.0.0:0"` for an
    /// ephemeral port) and return the address ZeroMQ actually bound to.
    pub fn bind(&self, bind_addr: &str) -> Result<String> {
        let publisher = self.publisher.lock().unwrap();
        publisher.bind(bind_addr).map_err(zmq_err)?;
        publisher
            .get_last_endpoint()
            .map_err(zmq_err)?
            .map_err(|_| Error::Socket("non-utf8 last_endpoint".into()))
    }

    /// Connect the subscriber to the peer's publisher address.
    pub fn connect(&self, peer_addr: &str) -> Result<()> {
        let subscriber = self.subscriber.lock().unwrap();
        subscriber.connect(peer_addr).map_err(zmq_err)
    }

    pub fn send_user(&self, msg: &Message) -> Result<()> {
        let frame = wire::encode_message(msg);
        let publisher = self.publisher.lock().unwrap();
        publisher.send(&frame[..], 0).map_err(zmq_err)
    }

    pub fn send_heartbeat(&self) -> Result<()> {
        let frame = wire::encode_heartbeat();
        let publisher = self.publisher.lock().unwrap();
        publisher.send(&frame[..], 0).map_err(zmq_err)
    }

    /// Non-blocking receive. `Ok(None)` covers both "nothing pending" and a
    /// well-formed heartbeat frame (the latter still refreshes `last_rx`).
    pub fn try_recv(&self) -> Result<Option<Message>> {
        let subscriber = self.subscriber.lock().unwrap();
        match subscriber.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => {
                self.last_rx.store(self.now_nanos(), Ordering::Relaxed);
                match wire::decode_frame(bytes.as_slice()) {
                    Ok(msg) => Ok(msg),
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding malformed frame");
                        Ok(None)
                    }
                }
            }
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(zmq_err(e)),
        }
    }

    /// True iff a frame (user or heartbeat) arrived within `2 * heartbeat_period`.
    pub fn is_connected(&self, heartbeat_period: Duration) -> bool {
        let last = self.last_rx.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let elapsed_nanos = self.now_nanos().saturating_sub(last);
        elapsed_nanos <= 2 * heartbeat_period.as_nanos() as u64
    }

    fn now_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

fn configure_socket(socket: &zmq::Socket) -> Result<()> {
    socket.set_linger(LINGER_MS).map_err(zmq_err)?;
    socket.set_immediate(true).map_err(zmq_err)?;
    socket.set_sndhwm(SEND_HWM).map_err(zmq_err)?;
    socket.set_rcvhwm(RECV_HWM).map_err(zmq_err)?;
    Ok(())
}

fn zmq_err(e: zmq::Error) -> Error {
    Error::Socket(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn loopback_round_trip() {
        let ctx = zmq::Context::new();
        let a = Pipe::new(&ctx).unwrap();
        let b = Pipe::new(&ctx).unwrap();

        let addr = a.bind("tcp://127.0.0.1:*").unwrap();
        b.connect(&addr).unwrap();

        // Give the subscription time to propagate before sending.
        std::thread::sleep(Duration::from_millis(200));

        let msg = Message::new("telemetry", 1.0, Bytes::from_static(b"hi"));
        for _ in 0..20 {
            a.send_user(&msg).unwrap();
            if let Some(received) = b.try_recv().unwrap() {
                assert_eq!(received, msg);
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("did not receive message over loopback pipe");
    }

    #[test]
    fn is_connected_false_before_any_frame() {
        let ctx = zmq::Context::new();
        let pipe = Pipe::new(&ctx).unwrap();
        assert!(!pipe.is_connected(Duration::from_secs(1)));
    }
}
