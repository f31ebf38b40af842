//! Path obfuscation through SDP candidate rewriting.
//!
//! To route a peer connection through an obfuscation relay, the signalling
//! layer strips or rewrites the ICE candidates it exchanges:
//!
//! 1. **Filtering**: drop every candidate so none of the real addresses
//!    leave the host
//! 2. **Redirection**: point every host candidate at the relay, so the peer
//!    sends its traffic there instead
//!
//! ```text
//!  local SDP ──▶ rewrite host candidates ──▶ signalling ──▶ peer
//!                (addr:port → relay)
//! ```

pub mod candidate;

pub use candidate::{
    candidate_lines, extract_endpoint_from_candidate_line, filter_candidates_from_sdp,
    rewrite_host_candidates, set_candidate_line_endpoint, CandidateLine, Protocol,
};

use crate::net::Endpoint;

/// Point every host candidate of `sdp` at `relay`.
pub fn redirect_host_candidates(sdp: &str, relay: &Endpoint) -> String {
    rewrite_host_candidates(sdp, |original| {
        tracing::debug!("redirecting host candidate {} to {}", original, relay);
        Some(relay.clone())
    })
}

/// Endpoints of every host candidate in `sdp`, in order. Lines that fail
/// to parse are skipped.
pub fn host_endpoints(sdp: &str) -> Vec<Endpoint> {
    candidate_lines(sdp)
        .filter_map(|line| extract_endpoint_from_candidate_line(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\n\
        a=candidate:1 1 udp 2122260223 192.168.1.20 54321 typ host generation 0\r\n\
        a=candidate:2 1 udp 1686052607 203.0.113.9 54321 typ srflx raddr 192.168.1.20 rport 54321\r\n\
        a=candidate:3 1 tcp 1518280447 192.168.1.20 0 typ host tcptype active\r\n\
        a=ice-pwd:secret\r\n";

    #[test]
    fn test_redirect() {
        let relay = Endpoint::new("198.51.100.7", 3478);
        let redirected = redirect_host_candidates(SDP, &relay);

        assert_eq!(host_endpoints(&redirected), vec![relay.clone(), relay]);
        // srflx untouched, CRLF kept
        assert!(redirected.contains("203.0.113.9 54321 typ srflx"));
        assert!(redirected.ends_with("a=ice-pwd:secret\r\n"));
        assert_eq!(redirected.matches("\r\n").count(), 5);
    }

    #[test]
    fn test_host_endpoints() {
        assert_eq!(
            host_endpoints(SDP),
            vec![
                Endpoint::new("192.168.1.20", 54321),
                Endpoint::new("192.168.1.20", 0)
            ]
        );
    }
}
