// Key-derivation labels (RFC 3711 §4.3.1/§4.3.2)
pub const SRTP_LABEL_ENCRYPTION: u8 = 0x00;
pub const SRTP_LABEL_AUTH: u8 = 0x01;
pub const SRTP_LABEL_SALT: u8 = 0x02;
pub const SRTCP_LABEL_ENCRYPTION: u8 = 0x03;
pub const SRTCP_LABEL_AUTH: u8 = 0x04;
pub const SRTCP_LABEL_SALT: u8 = 0x05;

// SRTP_AES128_CM_SHA1_80 sizes
pub const SESSION_KEY_LEN: usize = 16; // 128 bits
pub const SESSION_AUTH_LEN: usize = 20; // 160 bits (SHA1)
pub const SESSION_SALT_LEN: usize = 14; // 112 bits
pub const AUTH_TAG_LEN: usize = 10; // 80 bits truncated
pub const MASTER_KEY_LEN: usize = 16;
pub const MASTER_SALT_LEN: usize = 14;

// SRTCP trailer: 1-bit E flag + 31-bit index
pub const SRTCP_INDEX_LEN: usize = 4;

// Replay protection window size (64 packets)
pub const REPLAY_WINDOW_SIZE: u64 = 64;
