//! Minimal STUN codec (RFC 5389) covering what ICE connectivity checks
//! need: binding requests/responses, XOR-MAPPED-ADDRESS, USERNAME,
//! MESSAGE-INTEGRITY (HMAC-SHA1), FINGERPRINT, and the ICE attributes.

use crate::ice::ice_error::IceError;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

type HmacSha1 = Hmac<Sha1>;

pub const MAGIC_COOKIE: u32 = 0x2112_A442;

pub const BINDING_REQUEST: u16 = 0x0001;
pub const BINDING_SUCCESS: u16 = 0x0101;
pub const BINDING_ERROR: u16 = 0x0111;

pub const ATTR_USERNAME: u16 = 0x0006;
pub const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
pub const ATTR_ERROR_CODE: u16 = 0x0009;
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
pub const ATTR_PRIORITY: u16 = 0x0024;
pub const ATTR_USE_CANDIDATE: u16 = 0x0025;
pub const ATTR_FINGERPRINT: u16 = 0x8028;
pub const ATTR_ICE_CONTROLLED: u16 = 0x8029;
pub const ATTR_ICE_CONTROLLING: u16 = 0x802A;

/// Quick check that a datagram looks like STUN: two top bits zero and the
/// magic cookie in place.
pub fn is_stun(buf: &[u8]) -> bool {
    buf.len() >= 20
        && buf[0] & 0xC0 == 0
        && u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) == MAGIC_COOKIE
}

/// A parsed (or under-construction) STUN message.
#[derive(Debug, Clone)]
pub struct StunMessage {
    pub msg_type: u16,
    pub transaction_id: [u8; 12],
    pub attributes: Vec<(u16, Vec<u8>)>,
}

impl StunMessage {
    pub fn new(msg_type: u16, transaction_id: [u8; 12]) -> Self {
        Self {
            msg_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IceError> {
        if !is_stun(buf) {
            return Err(IceError::BadStun("not a STUN message".into()));
        }
        let msg_type = u16::from_be_bytes([buf[0], buf[1]]);
        let msg_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 20 + msg_len {
            return Err(IceError::BadStun("length beyond buffer".into()));
        }
        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&buf[8..20]);

        let mut attributes = Vec::new();
        let mut idx = 20usize;
        while idx + 4 <= 20 + msg_len {
            let atype = u16::from_be_bytes([buf[idx], buf[idx + 1]]);
            let alen = u16::from_be_bytes([buf[idx + 2], buf[idx + 3]]) as usize;
            idx += 4;
            if idx + alen > buf.len() {
                return Err(IceError::BadStun("attribute beyond buffer".into()));
            }
            attributes.push((atype, buf[idx..idx + alen].to_vec()));
            idx += alen + ((4 - alen % 4) % 4); // attributes are 32-bit aligned
        }

        Ok(Self {
            msg_type,
            transaction_id,
            attributes,
        })
    }

    pub fn attribute(&self, atype: u16) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|(t, _)| *t == atype)
            .map(|(_, v)| v.as_slice())
    }

    pub fn add_attribute(&mut self, atype: u16, value: Vec<u8>) {
        self.attributes.push((atype, value));
    }

    pub fn add_username(&mut self, username: &str) {
        self.add_attribute(ATTR_USERNAME, username.as_bytes().to_vec());
    }

    pub fn add_priority(&mut self, priority: u32) {
        self.add_attribute(ATTR_PRIORITY, priority.to_be_bytes().to_vec());
    }

    pub fn add_use_candidate(&mut self) {
        self.add_attribute(ATTR_USE_CANDIDATE, Vec::new());
    }

    pub fn add_ice_role(&mut self, controlling: bool, tie_breaker: u64) {
        let attr = if controlling {
            ATTR_ICE_CONTROLLING
        } else {
            ATTR_ICE_CONTROLLED
        };
        self.add_attribute(attr, tie_breaker.to_be_bytes().to_vec());
    }

    pub fn add_xor_mapped_address(&mut self, addr: SocketAddr) {
        let mut value = Vec::with_capacity(8);
        value.push(0);
        let xport = addr.port() ^ ((MAGIC_COOKIE >> 16) as u16);
        match addr.ip() {
            IpAddr::V4(ip) => {
                value.push(0x01);
                value.extend_from_slice(&xport.to_be_bytes());
                let magic = MAGIC_COOKIE.to_be_bytes();
                for (o, m) in ip.octets().iter().zip(magic.iter()) {
                    value.push(o ^ m);
                }
            }
            IpAddr::V6(ip) => {
                value.push(0x02);
                value.extend_from_slice(&xport.to_be_bytes());
                let mut key = [0u8; 16];
                key[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                key[4..16].copy_from_slice(&self.transaction_id);
                for (o, k) in ip.octets().iter().zip(key.iter()) {
                    value.push(o ^ k);
                }
            }
        }
        self.add_attribute(ATTR_XOR_MAPPED_ADDRESS, value);
    }

    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        let value = self.attribute(ATTR_XOR_MAPPED_ADDRESS)?;
        if value.len() < 8 {
            return None;
        }
        let xport = u16::from_be_bytes([value[2], value[3]]);
        let port = xport ^ ((MAGIC_COOKIE >> 16) as u16);
        match value[1] {
            0x01 => {
                let magic = MAGIC_COOKIE.to_be_bytes();
                let mut octets = [0u8; 4];
                for i in 0..4 {
                    octets[i] = value[4 + i] ^ magic[i];
                }
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            0x02 => {
                if value.len() < 20 {
                    return None;
                }
                let mut key = [0u8; 16];
                key[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                key[4..16].copy_from_slice(&self.transaction_id);
                let mut octets = [0u8; 16];
                for i in 0..16 {
                    octets[i] = value[4 + i] ^ key[i];
                }
                Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            _ => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.attribute(ATTR_USERNAME)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn has_use_candidate(&self) -> bool {
        self.attribute(ATTR_USE_CANDIDATE).is_some()
    }

    /// Serialize; when `integrity_key` is set a MESSAGE-INTEGRITY attribute
    /// is appended (computed per RFC 5389 §15.4), then a FINGERPRINT.
    pub fn encode(&self, integrity_key: Option<&[u8]>) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.msg_type.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // length, patched below
        out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        out.extend_from_slice(&self.transaction_id);

        for (atype, value) in &self.attributes {
            out.extend_from_slice(&atype.to_be_bytes());
            out.extend_from_slice(&(value.len() as u16).to_be_bytes());
            out.extend_from_slice(value);
            let pad = (4 - value.len() % 4) % 4;
            out.extend(std::iter::repeat_n(0u8, pad));
        }

        if let Some(key) = integrity_key {
            // Length covers the MI attribute itself while computing the HMAC.
            let claimed = (out.len() - 20 + 24) as u16;
            out[2..4].copy_from_slice(&claimed.to_be_bytes());
            let mut mac = HmacSha1::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(&out);
            let digest = mac.finalize().into_bytes();
            out.extend_from_slice(&ATTR_MESSAGE_INTEGRITY.to_be_bytes());
            out.extend_from_slice(&20u16.to_be_bytes());
            out.extend_from_slice(&digest);
        }

        // FINGERPRINT covers everything before it, length included.
        let claimed = (out.len() - 20 + 8) as u16;
        out[2..4].copy_from_slice(&claimed.to_be_bytes());
        let crc = crc32(&out) ^ 0x5354_554E; // XOR with "STUN"
        out.extend_from_slice(&ATTR_FINGERPRINT.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&crc.to_be_bytes());

        let final_len = (out.len() - 20) as u16;
        out[2..4].copy_from_slice(&final_len.to_be_bytes());
        out
    }

    /// Verify the MESSAGE-INTEGRITY of a raw message against `key`.
    pub fn verify_integrity(buf: &[u8], key: &[u8]) -> bool {
        // Locate the MI attribute in the raw bytes.
        let Some(msg_len) = buf.get(2..4).map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        else {
            return false;
        };
        if buf.len() < 20 + msg_len {
            return false;
        }
        let mut idx = 20usize;
        while idx + 4 <= 20 + msg_len {
            let atype = u16::from_be_bytes([buf[idx], buf[idx + 1]]);
            let alen = u16::from_be_bytes([buf[idx + 2], buf[idx + 3]]) as usize;
            if atype == ATTR_MESSAGE_INTEGRITY {
                if alen != 20 || buf.len() < idx + 4 + 20 {
                    return false;
                }
                // Recompute over the message up to this attribute, with the
                // length field claiming to end right after it.
                let mut covered = buf[..idx].to_vec();
                let claimed = (idx - 20 + 24) as u16;
                covered[2..4].copy_from_slice(&claimed.to_be_bytes());
                let mut mac = HmacSha1::new_from_slice(key).expect("hmac accepts any key length");
                mac.update(&covered);
                let digest = mac.finalize().into_bytes();
                return digest[..] == buf[idx + 4..idx + 24];
            }
            idx += 4 + alen + ((4 - alen % 4) % 4);
        }
        false
    }
}

/// CRC32 (IEEE) for the FINGERPRINT attribute.
fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid() -> [u8; 12] {
        [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn encode_decode_binding_request() {
        let mut msg = StunMessage::new(BINDING_REQUEST, txid());
        msg.add_username("remote:local");
        msg.add_priority(12345);
        msg.add_ice_role(true, 99);
        let wire = msg.encode(Some(b"secretpwd"));

        assert!(is_stun(&wire));
        let back = StunMessage::decode(&wire).unwrap();
        assert_eq!(back.msg_type, BINDING_REQUEST);
        assert_eq!(back.transaction_id, txid());
        assert_eq!(back.username(), Some("remote:local"));
        assert!(back.attribute(ATTR_MESSAGE_INTEGRITY).is_some());
        assert!(back.attribute(ATTR_FINGERPRINT).is_some());
    }

    #[test]
    fn integrity_verifies_with_right_key_only() {
        let mut msg = StunMessage::new(BINDING_REQUEST, txid());
        msg.add_username("a:b");
        let wire = msg.encode(Some(b"right"));
        assert!(StunMessage::verify_integrity(&wire, b"right"));
        assert!(!StunMessage::verify_integrity(&wire, b"wrong"));
    }

    #[test]
    fn xor_mapped_address_round_trip_v4() {
        let addr: SocketAddr = "203.0.113.7:54321".parse().unwrap();
        let mut msg = StunMessage::new(BINDING_SUCCESS, txid());
        msg.add_xor_mapped_address(addr);
        let wire = msg.encode(None);
        let back = StunMessage::decode(&wire).unwrap();
        assert_eq!(back.xor_mapped_address(), Some(addr));
    }

    #[test]
    fn xor_mapped_address_round_trip_v6() {
        let addr: SocketAddr = "[2001:db8::17]:443".parse().unwrap();
        let mut msg = StunMessage::new(BINDING_SUCCESS, txid());
        msg.add_xor_mapped_address(addr);
        let wire = msg.encode(None);
        let back = StunMessage::decode(&wire).unwrap();
        assert_eq!(back.xor_mapped_address(), Some(addr));
    }

    #[test]
    fn rejects_non_stun() {
        assert!(StunMessage::decode(&[0x80, 0x60, 0, 0]).is_err());
    }
}
