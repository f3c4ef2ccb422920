use crate::ice::{candidate_type::CandidateType, ice_error::IceError};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

const MAX_LOCAL_PREF: u32 = 65_535;

/// One ICE candidate, ours or the peer's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub foundation: String,
    pub component: u8,
    pub transport: String,
    pub priority: u32,
    pub address: SocketAddr,
    pub cand_type: CandidateType,
    pub related_address: Option<SocketAddr>,
}

impl Candidate {
    pub fn new(
        component: u8,
        transport: &str,
        address: SocketAddr,
        cand_type: CandidateType,
        related_address: Option<SocketAddr>,
    ) -> Self {
        Self {
            foundation: Self::compute_foundation(cand_type, transport, address),
            component,
            transport: transport.to_string(),
            priority: Self::compute_priority(cand_type, component),
            address,
            cand_type,
            related_address,
        }
    }

    pub fn host(address: SocketAddr, component: u8) -> Self {
        Self::new(component, "udp", address, CandidateType::Host, None)
    }

    pub fn server_reflexive(address: SocketAddr, base: SocketAddr, component: u8) -> Self {
        Self::new(
            component,
            "udp",
            address,
            CandidateType::ServerReflexive,
            Some(base),
        )
    }

    /// RFC 8445 §5.1.2.1: (2^24)·type-pref + (2^8)·local-pref + (256 − component).
    fn compute_priority(cand_type: CandidateType, component: u8) -> u32 {
        (cand_type.preference() << 24)
            + (MAX_LOCAL_PREF << 8)
            + (256 - u32::from(component))
    }

    /// Stable per (type, transport, base-address) so related candidates pair.
    fn compute_foundation(cand_type: CandidateType, transport: &str, address: SocketAddr) -> String {
        let mut hasher = DefaultHasher::new();
        cand_type.preference().hash(&mut hasher);
        transport.hash(&mut hasher);
        address.ip().hash(&mut hasher);
        format!("{}", hasher.finish() % 1_000_000_000)
    }

    /// Parse the value of an SDP `a=candidate:` attribute (the part after
    /// the colon): `foundation component transport priority ip port typ type
    /// [raddr ip rport port] ...`.
    pub fn from_sdp_value(value: &str) -> Result<Self, IceError> {
        let fields: Vec<&str> = value.split_whitespace().collect();
        if fields.len() < 8 || fields[6] != "typ" {
            return Err(IceError::BadCandidate(value.to_string()));
        }

        let component: u8 = fields[1]
            .parse()
            .map_err(|_| IceError::BadCandidate(value.to_string()))?;
        let priority: u32 = fields[3]
            .parse()
            .map_err(|_| IceError::BadCandidate(value.to_string()))?;
        let address: SocketAddr = format!("{}:{}", fields[4], fields[5])
            .parse()
            .map_err(|_| IceError::BadCandidate(value.to_string()))?;
        let cand_type = CandidateType::from_sdp(fields[7])
            .ok_or_else(|| IceError::BadCandidate(value.to_string()))?;

        let mut related_address = None;
        let mut raddr: Option<&str> = None;
        let mut rport: Option<&str> = None;
        let mut rest = fields[8..].iter();
        while let Some(key) = rest.next() {
            match *key {
                "raddr" => raddr = rest.next().copied(),
                "rport" => rport = rest.next().copied(),
                _ => {}
            }
        }
        if let (Some(ip), Some(port)) = (raddr, rport) {
            related_address = format!("{ip}:{port}").parse().ok();
        }

        Ok(Self {
            foundation: fields[0].to_string(),
            component,
            transport: fields[2].to_ascii_lowercase(),
            priority,
            address,
            cand_type,
            related_address,
        })
    }
}

impl fmt::Display for Candidate {
    /// Renders the SDP attribute value (without the `a=candidate:` prefix).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.transport,
            self.priority,
            self.address.ip(),
            self.address.port(),
            self.cand_type
        )?;
        if let Some(rel) = self.related_address {
            write!(f, " raddr {} rport {}", rel.ip(), rel.port())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_candidate_line() {
        let c =
            Candidate::from_sdp_value("842163049 1 udp 1677729535 192.168.0.10 46000 typ host")
                .unwrap();
        assert_eq!(c.component, 1);
        assert_eq!(c.transport, "udp");
        assert_eq!(c.priority, 1_677_729_535);
        assert_eq!(c.address, "192.168.0.10:46000".parse().unwrap());
        assert_eq!(c.cand_type, CandidateType::Host);
        assert!(c.related_address.is_none());
    }

    #[test]
    fn parses_srflx_with_related_address() {
        let c = Candidate::from_sdp_value(
            "1 1 udp 1686052607 203.0.113.5 50000 typ srflx raddr 10.0.0.2 rport 46000 generation 0",
        )
        .unwrap();
        assert_eq!(c.cand_type, CandidateType::ServerReflexive);
        assert_eq!(c.related_address, Some("10.0.0.2:46000".parse().unwrap()));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Candidate::from_sdp_value("not a candidate").is_err());
    }

    #[test]
    fn display_round_trips() {
        let c = Candidate::host("10.1.2.3:9999".parse().unwrap(), 1);
        let line = c.to_string();
        let back = Candidate::from_sdp_value(&line).unwrap();
        assert_eq!(back.address, c.address);
        assert_eq!(back.cand_type, c.cand_type);
        assert_eq!(back.priority, c.priority);
    }

    #[test]
    fn host_outranks_srflx() {
        let host = Candidate::host("10.1.2.3:1000".parse().unwrap(), 1);
        let srflx = Candidate::server_reflexive(
            "203.0.113.1:1000".parse().unwrap(),
            "10.1.2.3:1000".parse().unwrap(),
            1,
        );
        assert!(host.priority > srflx.priority);
    }
}
