use super::{
    common_header::{CommonHeader, finish_packet},
    packet_type::{PT_SDES, RtcpPacketType},
    rtcp::RtcpPacket,
    rtcp_error::RtcpError,
};

/// SDES item types. Only CNAME matters to the gateway; the rest is carried
/// opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdesItem {
    Cname(String),        // type=1
    Other(u8, Vec<u8>),   // everything else, kept as-is
}

impl SdesItem {
    fn type_code(&self) -> u8 {
        match self {
            SdesItem::Cname(_) => 1,
            SdesItem::Other(t, _) => *t,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            SdesItem::Cname(s) => s.as_bytes().to_vec(),
            SdesItem::Other(_, v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

impl SdesChunk {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for item in &self.items {
            let data = item.payload();
            if data.len() > u8::MAX as usize {
                return Err(RtcpError::SdesItemTooLong);
            }
            out.push(item.type_code());
            out.push(data.len() as u8);
            out.extend_from_slice(&data);
        }
        out.push(0); // END
        let rem = (out.len() - start) % 4;
        if rem != 0 {
            out.extend(std::iter::repeat_n(0u8, 4 - rem));
        }
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), RtcpError> {
        if buf.len() < 4 {
            return Err(RtcpError::TooShort);
        }
        let ssrc = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let mut idx = 4usize;
        let mut items = Vec::new();

        while idx < buf.len() {
            let t = buf[idx];
            idx += 1;
            if t == 0 {
                // END: chunk is padded to a 4-byte boundary
                let pad = (4 - (idx % 4)) % 4;
                if buf.len() < idx + pad {
                    return Err(RtcpError::Truncated);
                }
                idx += pad;
                break;
            }
            if buf.len() < idx + 1 {
                return Err(RtcpError::SdesItemTooShort);
            }
            let len = buf[idx] as usize;
            idx += 1;
            if buf.len() < idx + len {
                return Err(RtcpError::SdesItemTooShort);
            }
            let data = &buf[idx..idx + len];
            idx += len;

            items.push(match t {
                1 => SdesItem::Cname(String::from_utf8_lossy(data).into_owned()),
                _ => SdesItem::Other(t, data.to_vec()),
            });
        }

        Ok((Self { ssrc, items }, idx))
    }

    /// The CNAME item, if this chunk carries one.
    pub fn cname(&self) -> Option<&str> {
        self.items.iter().find_map(|i| match i {
            SdesItem::Cname(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sdes {
    pub chunks: Vec<SdesChunk>,
}

impl Sdes {
    pub fn cname(ssrc: u32, cname: impl Into<String>) -> Self {
        Self {
            chunks: vec![SdesChunk {
                ssrc,
                items: vec![SdesItem::Cname(cname.into())],
            }],
        }
    }
}

impl RtcpPacketType for Sdes {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        CommonHeader::new(self.chunks.len() as u8, PT_SDES, false).encode_into(out);
        for ch in &self.chunks {
            ch.encode_into(out)?;
        }
        finish_packet(out, start);
        Ok(())
    }

    fn decode(_hdr: &CommonHeader, payload: &[u8]) -> Result<RtcpPacket, RtcpError> {
        let mut chunks = Vec::new();
        let mut idx = 0usize;
        while idx + 4 <= payload.len() {
            let (chunk, used) = SdesChunk::decode(&payload[idx..])?;
            chunks.push(chunk);
            idx += used;
        }
        Ok(RtcpPacket::Sdes(Sdes { chunks }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcp::common_header::CommonHeader;

    #[test]
    fn cname_round_trip() {
        let sdes = Sdes::cname(0xCAFE, "user@rtcgate");
        let mut buf = Vec::new();
        sdes.encode_into(&mut buf).unwrap();

        let (hdr, total) = CommonHeader::decode(&buf).unwrap();
        assert_eq!(total, buf.len());
        let RtcpPacket::Sdes(back) = Sdes::decode(&hdr, &buf[4..]).unwrap() else {
            panic!("not an SDES");
        };
        assert_eq!(back.chunks.len(), 1);
        assert_eq!(back.chunks[0].cname(), Some("user@rtcgate"));
    }
}
