//! Candidate gathering: local interface discovery, port-range binding, and
//! server-reflexive discovery through a STUN server.

use crate::ice::{
    candidate::Candidate,
    ice_error::IceError,
    stun::{BINDING_REQUEST, BINDING_SUCCESS, StunMessage},
};
use rand::{Rng, RngCore, rngs::OsRng};
use std::{
    net::{IpAddr, SocketAddr, UdpSocket},
    time::Duration,
};

const STUN_QUERY_TIMEOUT: Duration = Duration::from_secs(3);
const STUN_QUERY_RETRIES: u32 = 3;

/// Discover the primary local IP by probing the default route with a
/// throwaway socket, honoring the enforce/ignore interface lists.
pub fn discover_local_ip(
    enforce: &[String],
    ignore: &[String],
    ipv6: bool,
) -> Result<IpAddr, IceError> {
    // An enforce entry that parses as an address wins outright.
    for entry in enforce {
        if let Ok(ip) = entry.parse::<IpAddr>() {
            return Ok(ip);
        }
    }

    let probe = UdpSocket::bind(if ipv6 { "[::]:0" } else { "0.0.0.0:0" })?;
    // No packet leaves the host; connect() just resolves the route.
    let target = if ipv6 {
        "[2001:4860:4860::8888]:80"
    } else {
        "8.8.8.8:80"
    };
    let _ = probe.connect(target);
    let local_ip = probe.local_addr()?.ip();
    drop(probe);

    if local_ip.is_loopback() || local_ip.is_unspecified() {
        return Err(IceError::NoUsableInterface);
    }
    let as_text = local_ip.to_string();
    if ignore.iter().any(|prefix| as_text.starts_with(prefix.as_str())) {
        return Err(IceError::NoUsableInterface);
    }
    if !enforce.is_empty()
        && !enforce
            .iter()
            .any(|prefix| as_text.starts_with(prefix.as_str()))
    {
        return Err(IceError::NoUsableInterface);
    }
    Ok(local_ip)
}

/// Bind a UDP socket on `ip` inside the configured RTP port range, starting
/// from a random port so concurrent handles spread out.
pub fn bind_in_range(ip: IpAddr, min: u16, max: u16) -> Result<UdpSocket, IceError> {
    debug_assert!(min <= max);
    let span = u32::from(max - min) + 1;
    let start: u32 = OsRng.gen_range(0..span);
    for i in 0..span {
        let port = min + ((start + i) % span) as u16;
        if let Ok(sock) = UdpSocket::bind(SocketAddr::new(ip, port)) {
            return Ok(sock);
        }
    }
    Err(IceError::NoPortAvailable { min, max })
}

/// Ask a STUN server how it sees us. Blocking with retries, meant for the
/// gathering phase only.
pub fn stun_query(sock: &UdpSocket, server: SocketAddr) -> Result<SocketAddr, IceError> {
    let mut transaction_id = [0u8; 12];
    OsRng.fill_bytes(&mut transaction_id);
    let request = StunMessage::new(BINDING_REQUEST, transaction_id).encode(None);

    let old_timeout = sock.read_timeout().ok().flatten();
    sock.set_read_timeout(Some(STUN_QUERY_TIMEOUT))?;
    let result = (|| {
        let mut buf = [0u8; 1500];
        for _ in 0..STUN_QUERY_RETRIES {
            sock.send_to(&request, server)?;
            match sock.recv_from(&mut buf) {
                Ok((n, from)) if from == server => {
                    let msg = StunMessage::decode(&buf[..n])?;
                    if msg.msg_type == BINDING_SUCCESS && msg.transaction_id == transaction_id {
                        return msg
                            .xor_mapped_address()
                            .ok_or_else(|| IceError::BadStun("no XOR-MAPPED-ADDRESS".into()));
                    }
                }
                Ok(_) => continue, // someone else's packet, ignore
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => return Err(IceError::Io(e)),
            }
        }
        Err(IceError::BadStun("no STUN response".into()))
    })();
    let _ = sock.set_read_timeout(old_timeout);
    result
}

/// Gather the candidates for one component: a host candidate (rewritten by
/// the NAT 1-1 mapping when configured) plus a server-reflexive one when a
/// STUN server is configured and sees a different address.
pub fn gather(
    sock: &UdpSocket,
    nat_1_1: Option<IpAddr>,
    stun_server: Option<SocketAddr>,
    component: u8,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    let Ok(local) = sock.local_addr() else {
        return out;
    };

    match nat_1_1 {
        Some(public_ip) => {
            // Advertise the public mapping instead of the private host address.
            out.push(Candidate::host(
                SocketAddr::new(public_ip, local.port()),
                component,
            ));
        }
        None => out.push(Candidate::host(local, component)),
    }

    if let Some(server) = stun_server
        && let Ok(mapped) = stun_query(sock, server)
        && mapped != local
        && nat_1_1.is_none()
    {
        out.push(Candidate::server_reflexive(mapped, local, component));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_inside_the_range() {
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let sock = bind_in_range(ip, 40_000, 40_100).unwrap();
        let port = sock.local_addr().unwrap().port();
        assert!((40_000..=40_100).contains(&port));
    }

    #[test]
    fn enforce_list_with_literal_address_wins() {
        let ip = discover_local_ip(&["127.0.0.1".into()], &[], false).unwrap();
        assert_eq!(ip, "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn nat_mapping_rewrites_the_host_candidate() {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        let cands = gather(&sock, Some("203.0.113.9".parse().unwrap()), None, 1);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].address.ip(), "203.0.113.9".parse::<IpAddr>().unwrap());
        assert_eq!(
            cands[0].address.port(),
            sock.local_addr().unwrap().port()
        );
    }
}
