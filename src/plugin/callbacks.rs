use crate::plugin::{jsep::Jsep, plugin_session::PluginSession};
use serde_json::Value;

/// The capability surface the core offers to plugins.
///
/// Plugins receive an `Arc<dyn GatewayCallbacks>` in `init` and use it from
/// their own worker threads; every method is safe to call reentrantly while
/// a core callback into the plugin is still on the stack.
pub trait GatewayCallbacks: Send + Sync {
    /// Deliver a JSON event to the client behind `session`, optionally with
    /// a JSEP offer/answer to (re)negotiate. Returns an API error code on
    /// failure, 0 on success.
    fn push_event(
        &self,
        session: &PluginSession,
        plugin_package: &str,
        transaction: Option<&str>,
        message: Value,
        jsep: Option<Jsep>,
    ) -> i32;

    /// Queue an RTP packet towards the peer.
    fn relay_rtp(&self, session: &PluginSession, video: bool, buf: &[u8]);

    /// Queue an RTCP message towards the peer.
    fn relay_rtcp(&self, session: &PluginSession, video: bool, buf: &[u8]);

    /// Queue a DataChannel message towards the peer.
    fn relay_data(&self, session: &PluginSession, buf: &[u8]);

    /// Ask the core to close the PeerConnection; the core will invoke the
    /// plugin's `hangup_media` when done.
    fn close_pc(&self, session: &PluginSession);

    /// Ask the core to destroy the handle entirely; the core will invoke the
    /// plugin's `destroy_session` when done.
    fn end_session(&self, session: &PluginSession);

    /// Whether the event-handler fan-out is on; when false, `notify_event`
    /// should not be called.
    fn events_is_enabled(&self) -> bool;

    /// Hand an event to the registered event handlers.
    fn notify_event(&self, plugin_package: &str, session: Option<&PluginSession>, event: Value);

    /// Check a signed token (with the plugin package as realm).
    fn auth_is_signature_valid(&self, plugin_package: &str, token: &str) -> bool;

    /// Check a signed token grants a descriptor.
    fn auth_signature_contains(&self, plugin_package: &str, token: &str, descriptor: &str) -> bool;
}
