use crate::transport::transport::Transport;
use serde_json::Value;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

/// Messages a [`ChannelTransport`] delivers to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message {
        transport_cookie: u64,
        request_id: Option<String>,
        admin: bool,
        message: Value,
    },
    SessionCreated {
        transport_cookie: u64,
        session_id: u64,
    },
    SessionOver {
        transport_cookie: u64,
        session_id: u64,
        timeout: bool,
    },
}

/// In-process transport backed by an mpsc channel.
///
/// Whatever the core sends to a client shows up on the receiver; tests and
/// embedders drive the core directly via `TransportCallbacks` and read the
/// replies here.
pub struct ChannelTransport {
    tx: Mutex<Sender<TransportEvent>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, Receiver<TransportEvent>) {
        let (tx, rx) = channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl Transport for ChannelTransport {
    fn name(&self) -> &'static str {
        "In-process channel transport"
    }

    fn package(&self) -> &'static str {
        "gate.transport.channel"
    }

    fn send_message(
        &self,
        transport_cookie: u64,
        request_id: Option<&str>,
        admin: bool,
        message: Value,
    ) -> Result<(), String> {
        self.tx
            .lock()
            .unwrap()
            .send(TransportEvent::Message {
                transport_cookie,
                request_id: request_id.map(String::from),
                admin,
                message,
            })
            .map_err(|_| "transport receiver is gone".to_string())
    }

    fn session_created(&self, transport_cookie: u64, session_id: u64) {
        let _ = self.tx.lock().unwrap().send(TransportEvent::SessionCreated {
            transport_cookie,
            session_id,
        });
    }

    fn session_over(&self, transport_cookie: u64, session_id: u64, timeout: bool) {
        let _ = self.tx.lock().unwrap().send(TransportEvent::SessionOver {
            transport_cookie,
            session_id,
            timeout,
        });
    }
}
