use super::{
    bye::Bye,
    common_header::CommonHeader,
    fir::FullIntraRequest,
    generic_nack::GenericNack,
    packet_type::{
        self, PSFB_FMT_AFB, PSFB_FMT_FIR, PSFB_FMT_PLI, RTPFB_FMT_NACK, RTPFB_FMT_TWCC,
        RtcpPacketType,
    },
    picture_loss::PictureLossIndication,
    receiver_report::ReceiverReport,
    remb::Remb,
    rtcp_error::RtcpError,
    sdes::Sdes,
    sender_report::SenderReport,
    twcc::TwccFeedback,
};

/// The union of RTCP packets the gateway understands.
///
/// Types we have no use for (APP, unknown feedback formats) are preserved as
/// [`RtcpPacket::Other`] so compound parsing stays tolerant: a report we do
/// not understand must never take down the ones around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    Sr(SenderReport),
    Rr(ReceiverReport),
    Sdes(Sdes),
    Bye(Bye),
    Nack(GenericNack),
    Pli(PictureLossIndication),
    Fir(FullIntraRequest),
    Remb(Remb),
    Twcc(TwccFeedback),
    /// Valid but unhandled packet (pt, fmt).
    Other(u8, u8),
}

impl RtcpPacket {
    /// Decode a *compound* RTCP buffer into individual packets.
    pub fn decode_compound(buf: &[u8]) -> Result<Vec<RtcpPacket>, RtcpError> {
        let mut out = Vec::new();
        let mut idx = 0usize;
        while idx + 4 <= buf.len() {
            let (hdr, total) = CommonHeader::decode(&buf[idx..])?;
            let payload = &buf[idx + 4..idx + total];

            let pkt = match (hdr.pt(), hdr.rc_or_fmt()) {
                (packet_type::PT_SR, _) => SenderReport::decode(&hdr, payload)?,
                (packet_type::PT_RR, _) => ReceiverReport::decode(&hdr, payload)?,
                (packet_type::PT_SDES, _) => Sdes::decode(&hdr, payload)?,
                (packet_type::PT_BYE, _) => Bye::decode(&hdr, payload)?,
                (packet_type::PT_RTPFB, RTPFB_FMT_NACK) => GenericNack::decode(&hdr, payload)?,
                (packet_type::PT_RTPFB, RTPFB_FMT_TWCC) => TwccFeedback::decode(&hdr, payload)?,
                (packet_type::PT_PSFB, PSFB_FMT_PLI) => {
                    PictureLossIndication::decode(&hdr, payload)?
                }
                (packet_type::PT_PSFB, PSFB_FMT_FIR) => FullIntraRequest::decode(&hdr, payload)?,
                (packet_type::PT_PSFB, PSFB_FMT_AFB) => {
                    // AFB may be REMB or something else entirely
                    Remb::decode(&hdr, payload)
                        .unwrap_or(RtcpPacket::Other(hdr.pt(), hdr.rc_or_fmt()))
                }
                (pt, fmt) => RtcpPacket::Other(pt, fmt),
            };
            out.push(pkt);
            idx += total;
        }
        if idx != buf.len() {
            // trailing garbage / partial packet
            return Err(RtcpError::TooShort);
        }
        Ok(out)
    }

    /// Encode a compound RTCP packet (concatenation of packets).
    pub fn encode_compound(pkts: &[RtcpPacket]) -> Result<Vec<u8>, RtcpError> {
        let mut out = Vec::new();
        for pkt in pkts {
            pkt.encode_into(&mut out)?;
        }
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        match self {
            RtcpPacket::Sr(p) => p.encode_into(out),
            RtcpPacket::Rr(p) => p.encode_into(out),
            RtcpPacket::Sdes(p) => p.encode_into(out),
            RtcpPacket::Bye(p) => p.encode_into(out),
            RtcpPacket::Nack(p) => p.encode_into(out),
            RtcpPacket::Pli(p) => p.encode_into(out),
            RtcpPacket::Fir(p) => p.encode_into(out),
            RtcpPacket::Remb(p) => p.encode_into(out),
            RtcpPacket::Twcc(p) => p.encode_into(out),
            RtcpPacket::Other(..) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcp::{report_block::ReportBlock, sender_info::SenderInfo};

    #[test]
    fn splits_compound_packets() {
        let sr = SenderReport::new(
            0x11,
            SenderInfo::new(1, 2, 3, 4, 5),
            vec![ReportBlock::default()],
        );
        let rr = ReceiverReport::new(0x22, vec![]);
        let sdes = Sdes::cname(0x11, "a@b");

        let buf = RtcpPacket::encode_compound(&[
            RtcpPacket::Sr(sr.clone()),
            RtcpPacket::Rr(rr.clone()),
            RtcpPacket::Sdes(sdes),
        ])
        .unwrap();

        let pkts = RtcpPacket::decode_compound(&buf).unwrap();
        assert_eq!(pkts.len(), 3);
        assert!(matches!(&pkts[0], RtcpPacket::Sr(s) if *s == sr));
        assert!(matches!(&pkts[1], RtcpPacket::Rr(r) if *r == rr));
        assert!(matches!(&pkts[2], RtcpPacket::Sdes(_)));
    }

    #[test]
    fn unknown_type_does_not_poison_the_compound() {
        let mut buf = RtcpPacket::encode_compound(&[RtcpPacket::Rr(ReceiverReport::new(
            0x22,
            vec![],
        ))])
        .unwrap();
        // append a well-formed packet of unhandled type 207 (XR)
        buf.extend_from_slice(&[0x80, 207, 0x00, 0x01, 0, 0, 0, 9]);

        let pkts = RtcpPacket::decode_compound(&buf).unwrap();
        assert_eq!(pkts.len(), 2);
        assert!(matches!(pkts[1], RtcpPacket::Other(207, _)));
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        let mut buf =
            RtcpPacket::encode_compound(&[RtcpPacket::Rr(ReceiverReport::new(0x22, vec![]))])
                .unwrap();
        buf.extend_from_slice(&[0x80, 200]); // half a header
        assert!(RtcpPacket::decode_compound(&buf).is_err());
    }
}
