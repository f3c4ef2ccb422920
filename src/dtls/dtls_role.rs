/// DTLS role for one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsRole {
    /// Active side: we send ClientHello.
    Client,
    /// Passive side: we wait for the peer's ClientHello.
    Server,
}

impl DtlsRole {
    /// Map the remote SDP `a=setup` attribute to our role: if the remote is
    /// active we are passive, if passive we are active, and on actpass we
    /// pick active.
    pub fn from_remote_setup(setup: &str) -> Self {
        match setup {
            "active" => DtlsRole::Server,
            "passive" => DtlsRole::Client,
            _ => DtlsRole::Client, // actpass (or anything else): we go active
        }
    }

    /// The `a=setup` value we advertise for this role.
    pub fn setup_attribute(self) -> &'static str {
        match self {
            DtlsRole::Client => "active",
            DtlsRole::Server => "passive",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_follows_remote_setup() {
        assert_eq!(DtlsRole::from_remote_setup("active"), DtlsRole::Server);
        assert_eq!(DtlsRole::from_remote_setup("passive"), DtlsRole::Client);
        assert_eq!(DtlsRole::from_remote_setup("actpass"), DtlsRole::Client);
    }
}
