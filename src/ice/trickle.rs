use crate::ice::{candidate::Candidate, ice_error::IceError};
use serde_json::Value;
use std::time::Instant;

/// A trickled ICE candidate, buffered while the handle is still processing
/// the offer and drained once the agent exists.
#[derive(Debug, Clone)]
pub struct TrickleCandidate {
    /// Transaction of the original trickle request (for error reporting).
    pub transaction: String,
    /// The raw JSON candidate object, kept as received.
    pub candidate: Value,
    /// When the trickle arrived.
    pub received: Instant,
}

impl TrickleCandidate {
    pub fn new(transaction: impl Into<String>, candidate: Value) -> Self {
        Self {
            transaction: transaction.into(),
            candidate,
            received: Instant::now(),
        }
    }
}

/// What a trickle JSON object turned out to contain.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTrickle {
    Candidate(Candidate),
    /// The end-of-candidates sentinel (`{"completed": true}` or a null
    /// candidate line).
    EndOfCandidates,
}

/// Parse a trickle candidate object: either `{"completed": true}`, or an
/// object with a `candidate` SDP attribute value plus `sdpMid` /
/// `sdpMLineIndex` (which we ignore: everything is bundled on one stream).
pub fn parse_trickle(candidate: &Value) -> Result<ParsedTrickle, IceError> {
    if candidate.is_null() {
        return Ok(ParsedTrickle::EndOfCandidates);
    }
    if candidate
        .get("completed")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Ok(ParsedTrickle::EndOfCandidates);
    }

    let line = candidate
        .get("candidate")
        .and_then(Value::as_str)
        .ok_or_else(|| IceError::BadCandidate(candidate.to_string()))?;

    if line.is_empty() {
        // Browsers signal end-of-candidates as an empty candidate line too.
        return Ok(ParsedTrickle::EndOfCandidates);
    }

    let value = line.strip_prefix("candidate:").unwrap_or(line);
    Ok(ParsedTrickle::Candidate(Candidate::from_sdp_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_browser_trickle() {
        let v = json!({
            "candidate": "candidate:842163049 1 udp 1677729535 192.168.0.10 46000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        });
        let ParsedTrickle::Candidate(c) = parse_trickle(&v).unwrap() else {
            panic!("expected a candidate");
        };
        assert_eq!(c.address, "192.168.0.10:46000".parse().unwrap());
    }

    #[test]
    fn completed_and_null_and_empty_are_sentinels() {
        assert_eq!(
            parse_trickle(&json!({"completed": true})).unwrap(),
            ParsedTrickle::EndOfCandidates
        );
        assert_eq!(
            parse_trickle(&Value::Null).unwrap(),
            ParsedTrickle::EndOfCandidates
        );
        assert_eq!(
            parse_trickle(&json!({"candidate": ""})).unwrap(),
            ParsedTrickle::EndOfCandidates
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_trickle(&json!({"candidate": 42})).is_err());
        assert!(parse_trickle(&json!({"candidate": "candidate:nope"})).is_err());
    }
}
