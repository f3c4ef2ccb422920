//! The session/handle/stream/component tree, the per-handle media engine,
//! and the gateway server that ties sessions, plugins and transports
//! together.

pub mod api_error;
pub mod component;
pub mod events;
pub mod flags;
pub mod handle;
pub mod retransmit;
pub mod seq_window;
pub mod server;
pub mod session;
pub mod stats;
pub mod stream;
pub mod watchdog;

pub use handle::Handle;
pub use server::GatewayCore;
pub use session::Session;

use rand::{Rng, rngs::OsRng};

/// Random non-zero 64-bit identifier for sessions and handles.
pub fn random_id() -> u64 {
    loop {
        let id: u64 = OsRng.r#gen();
        // Keep ids positive when seen as i64: some client stacks parse them
        // as signed integers.
        let id = id & 0x7FFF_FFFF_FFFF_FFFF;
        if id != 0 {
            return id;
        }
    }
}
