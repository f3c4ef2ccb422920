use crate::plugin::{
    callbacks::GatewayCallbacks, jsep::Jsep, plugin_session::PluginSession, result::PluginResult,
};
use serde_json::Value;
use std::sync::Arc;

/// Version of the plugin API; `api_compatibility` must return it.
pub const PLUGIN_API_VERSION: u32 = 9;

/// The interface every application plugin implements.
///
/// Metadata methods, lifecycle, and `create_session` / `handle_message` /
/// `query_session` / `destroy_session` are mandatory. The media callbacks
/// are optional and default to no-ops, so a DataChannel-only plugin can skip
/// `incoming_rtp` entirely.
///
/// Plugins are registered at compile time (see
/// [`PluginRegistry`](crate::plugin::registry::PluginRegistry)); there is no
/// shared-object loading.
pub trait Plugin: Send + Sync {
    /// Called once at startup; `callbacks` is the core's capability surface
    /// and `config_dir` the directory holding per-plugin config files.
    fn init(&self, callbacks: Arc<dyn GatewayCallbacks>, config_dir: Option<&str>)
    -> Result<(), String>;

    /// Called once at shutdown.
    fn destroy(&self);

    fn api_compatibility(&self) -> u32 {
        PLUGIN_API_VERSION
    }
    fn version(&self) -> u32;
    fn version_string(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn author(&self) -> &'static str;
    /// Unique package identifier, e.g. "gate.plugin.echotest".
    fn package(&self) -> &'static str;

    /// A handle attached to this plugin; set up plugin-side state on the
    /// session mapping.
    fn create_session(&self, session: &Arc<PluginSession>) -> Result<(), i32>;

    /// A signaling message from the client. Synchronous on the signaling
    /// thread; long work should return `OkWait` and answer via `push_event`.
    fn handle_message(
        &self,
        session: &Arc<PluginSession>,
        transaction: &str,
        message: Value,
        jsep: Option<Jsep>,
    ) -> PluginResult;

    /// Plugin-specific info about one session, for the admin surface.
    fn query_session(&self, session: &Arc<PluginSession>) -> Value;

    /// The handle is going away; release plugin-side state.
    fn destroy_session(&self, session: &Arc<PluginSession>) -> Result<(), i32>;

    // --- optional callbacks ---

    /// The PeerConnection is up and media can flow.
    fn setup_media(&self, _session: &Arc<PluginSession>) {}

    /// An RTP packet arrived from the peer.
    fn incoming_rtp(&self, _session: &Arc<PluginSession>, _video: bool, _buf: &[u8]) {}

    /// An RTCP message arrived from the peer.
    fn incoming_rtcp(&self, _session: &Arc<PluginSession>, _video: bool, _buf: &[u8]) {}

    /// A DataChannel message arrived from the peer.
    fn incoming_data(&self, _session: &Arc<PluginSession>, _buf: &[u8]) {}

    /// Lots of NACKs lately on this path; the link may be congested.
    fn slow_link(&self, _session: &Arc<PluginSession>, _uplink: bool, _video: bool) {}

    /// The PeerConnection was torn down (DTLS alert, hangup request, ...).
    fn hangup_media(&self, _session: &Arc<PluginSession>) {}
}
