//! SCTP DataChannels, tunneled over the established DTLS connection.
//!
//! `sctp_proto` is sans-IO: the worker feeds it the SCTP datagrams arriving
//! as DTLS application data, pumps the transmits it produces back into the
//! DTLS stream, and surfaces inbound messages to the plugin's
//! `incoming_data`. One worker per handle, started when DTLS completes and a
//! DataChannel m-line was negotiated.

use crate::log::log_sink::LogSink;
use crate::{sink_debug, sink_info, sink_warn};
use bytes::Bytes;
use sctp_proto::{
    Association, AssociationHandle, ClientConfig, DatagramEvent, Endpoint, EndpointConfig, Event,
    Payload, PayloadProtocolIdentifier, ServerConfig, StreamEvent,
};
use std::{
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

/// Stream id used for the default negotiated channel.
const DATA_STREAM_ID: u16 = 0;

/// What the association produced after feeding it input.
pub enum DataChannelEvent {
    /// The association is up; data can flow.
    Connected,
    /// An inbound message for the plugin.
    Message(Vec<u8>),
    /// SCTP datagrams to push into the DTLS stream.
    Transmit(Vec<Vec<u8>>),
    /// The association died.
    Closed,
}

/// Sans-IO SCTP association driver for one handle.
pub struct DataChannelSession {
    logger: Arc<dyn LogSink>,
    endpoint: Endpoint,
    association: Option<(AssociationHandle, Association)>,
    /// Dummy address: SCTP is tunneled, there is no real peer address.
    tunnel_addr: SocketAddr,
    connected: bool,
}

impl DataChannelSession {
    /// `client` follows the DTLS role: the active DTLS side initiates the
    /// SCTP association too.
    pub fn new(logger: Arc<dyn LogSink>, client: bool) -> Self {
        let endpoint = Endpoint::new(
            Arc::new(EndpointConfig::default()),
            Some(Arc::new(ServerConfig::default())),
        );
        let tunnel_addr: SocketAddr = "127.0.0.1:5000".parse().expect("static address");
        let mut session = Self {
            logger,
            endpoint,
            association: None,
            tunnel_addr,
            connected: false,
        };
        if client {
            session.connect();
        }
        session
    }

    fn connect(&mut self) {
        match self
            .endpoint
            .connect(ClientConfig::default(), self.tunnel_addr)
        {
            Ok((handle, assoc)) => {
                sink_info!(&self.logger, "[SCTP] initiating association");
                self.association = Some((handle, assoc));
            }
            Err(e) => {
                sink_warn!(&self.logger, "[SCTP] connect failed: {e:?}");
            }
        }
    }

    /// Feed one inbound SCTP datagram (DTLS application data).
    pub fn handle_inbound(&mut self, datagram: &[u8], events: &mut Vec<DataChannelEvent>) {
        let now = Instant::now();
        match self.endpoint.handle(
            now,
            self.tunnel_addr,
            None,
            None,
            Bytes::copy_from_slice(datagram),
        ) {
            Some((handle, DatagramEvent::NewAssociation(assoc))) => {
                sink_info!(&self.logger, "[SCTP] new inbound association");
                self.association = Some((handle, assoc));
            }
            Some((_, DatagramEvent::AssociationEvent(event))) => {
                if let Some((_, assoc)) = self.association.as_mut() {
                    assoc.handle_event(event);
                }
            }
            None => {}
        }
        self.poll(events);
    }

    /// Queue an outbound DataChannel message from the plugin.
    pub fn send(&mut self, data: &[u8], events: &mut Vec<DataChannelEvent>) {
        let Some((_, assoc)) = self.association.as_mut() else {
            sink_warn!(&self.logger, "[SCTP] dropping data: no association");
            return;
        };
        let stream = match assoc.stream(DATA_STREAM_ID) {
            Ok(s) => Ok(s),
            Err(_) => assoc.open_stream(DATA_STREAM_ID, PayloadProtocolIdentifier::Binary),
        };
        match stream {
            Ok(mut s) => {
                if let Err(e) = s.write(&Bytes::copy_from_slice(data)) {
                    sink_warn!(&self.logger, "[SCTP] write failed: {e:?}");
                }
            }
            Err(e) => {
                sink_warn!(&self.logger, "[SCTP] cannot open stream: {e:?}");
            }
        }
        self.poll(events);
    }

    /// Drive timers; call on the worker's tick.
    pub fn handle_timeout(&mut self, events: &mut Vec<DataChannelEvent>) {
        let now = Instant::now();
        if let Some((_, assoc)) = self.association.as_mut()
            && let Some(deadline) = assoc.poll_timeout()
            && now >= deadline
        {
            assoc.handle_timeout(now);
        }
        self.poll(events);
    }

    fn poll(&mut self, events: &mut Vec<DataChannelEvent>) {
        let Some((_, assoc)) = self.association.as_mut() else {
            return;
        };
        let now = Instant::now();

        let mut outbound = Vec::new();
        while let Some(transmit) = assoc.poll_transmit(now) {
            if let Payload::RawEncode(chunks) = transmit.payload {
                let mut datagram = Vec::new();
                for chunk in chunks {
                    datagram.extend_from_slice(&chunk);
                }
                outbound.push(datagram);
            }
        }
        if !outbound.is_empty() {
            events.push(DataChannelEvent::Transmit(outbound));
        }

        while let Some(event) = assoc.poll() {
            match event {
                Event::Connected => {
                    self.connected = true;
                    events.push(DataChannelEvent::Connected);
                }
                Event::AssociationLost { reason } => {
                    sink_warn!(&self.logger, "[SCTP] association lost: {reason:?}");
                    events.push(DataChannelEvent::Closed);
                }
                Event::Stream(StreamEvent::Readable { id }) => {
                    if let Ok(mut stream) = assoc.stream(id)
                        && let Ok(Some(chunks)) = stream.read_sctp()
                    {
                        let mut buf = vec![0u8; 65535];
                        if let Ok(len) = chunks.read(&mut buf) {
                            buf.truncate(len);
                            sink_debug!(&self.logger, "[SCTP] inbound message ({len} bytes)");
                            events.push(DataChannelEvent::Message(buf));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
