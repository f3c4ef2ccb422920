use serde_json::Value;

/// Version of the transport API; `api_compatibility` must return it.
pub const TRANSPORT_API_VERSION: u32 = 6;

/// What a signaling transport implements so the core can talk back to its
/// clients. Mirrors the plugin interface, but carries signaling JSON rather
/// than media.
pub trait Transport: Send + Sync {
    fn api_compatibility(&self) -> u32 {
        TRANSPORT_API_VERSION
    }
    fn name(&self) -> &'static str;
    /// Unique package identifier, e.g. "gate.transport.channel".
    fn package(&self) -> &'static str;

    /// Send a response or an event to the client identified by
    /// `transport_cookie` (the opaque id the transport passed in
    /// `incoming_request`). `request_id` correlates responses to requests
    /// where the wire protocol needs it.
    fn send_message(
        &self,
        transport_cookie: u64,
        request_id: Option<&str>,
        admin: bool,
        message: Value,
    ) -> Result<(), String>;

    /// A gateway session was created by one of this transport's requests.
    fn session_created(&self, transport_cookie: u64, session_id: u64);

    /// One of this transport's sessions is over (destroyed or timed out).
    fn session_over(&self, transport_cookie: u64, session_id: u64, timeout: bool);
}

/// What the core implements so transports can hand it requests.
pub trait TransportCallbacks: Send + Sync {
    /// Feed one inbound signaling request into the core. The reply (or an
    /// error) comes back through [`Transport::send_message`].
    fn incoming_request(
        &self,
        transport_package: &str,
        transport_cookie: u64,
        request_id: Option<String>,
        admin: bool,
        message: Value,
    );
}
