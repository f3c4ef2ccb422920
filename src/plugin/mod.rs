//! The plugin boundary: the capability trait the core offers plugins, the
//! trait plugins implement, the session mapping between them, and the
//! compile-time registry plugins are exposed through.

pub mod callbacks;
pub mod echo;
pub mod jsep;
pub mod plugin;
pub mod plugin_session;
pub mod registry;
pub mod result;

pub use callbacks::GatewayCallbacks;
pub use jsep::{Jsep, JsepType};
pub use plugin::{PLUGIN_API_VERSION, Plugin};
pub use plugin_session::PluginSession;
pub use registry::PluginRegistry;
pub use result::PluginResult;
