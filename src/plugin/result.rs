use serde_json::Value;

/// What a plugin's `handle_message` produced.
#[derive(Debug, Clone)]
pub enum PluginResult {
    /// The request was handled and a response payload is available now.
    Ok(Value),
    /// The request was accepted; the answer will arrive later as an event.
    /// The optional text hints at why the handling is asynchronous.
    OkWait(Option<String>),
    /// A severe, non-application error (application-level failures should be
    /// returned as an `Ok` payload describing them).
    Error(String),
}

impl PluginResult {
    pub fn ok(content: Value) -> Self {
        PluginResult::Ok(content)
    }

    pub fn ok_wait(hint: impl Into<String>) -> Self {
        PluginResult::OkWait(Some(hint.into()))
    }

    pub fn error(text: impl Into<String>) -> Self {
        PluginResult::Error(text.into())
    }
}
