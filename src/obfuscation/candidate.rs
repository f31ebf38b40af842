//! SDP candidate lines.
//!
//! Grammar (RFC 5245 §15.1, space separated, first eight fields fixed):
//!
//! ```text
//! a=candidate:<foundation> <component> <proto> <priority> <address> <port> typ <type> [...]
//! ```
//!
//! Only `typ host` candidates can be parsed into an endpoint or rewritten.
//! tcp-active candidates (RFC 6544) carry port `0`, which is accepted.

use std::fmt;

use crate::error::{Error, Result};
use crate::net::Endpoint;

/// Attribute prefix of a candidate line.
pub const CANDIDATE_PREFIX: &str = "a=candidate:";

const ADDRESS: usize = 4;
const PORT: usize = 5;
const MIN_FIELDS: usize = 8;

/// Transport protocol of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// The fixed fields of one candidate line, borrowed from the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLine<'a> {
    pub foundation: &'a str,
    pub component: u32,
    pub protocol: Protocol,
    pub priority: u32,
    pub address: &'a str,
    pub port: u16,
    /// Candidate type: host, srflx, prflx, relay
    pub kind: &'a str,
}

impl<'a> CandidateLine<'a> {
    /// Parse a candidate line of any type. A trailing `\r` is ignored.
    pub fn parse(line: &'a str) -> Result<Self> {
        let fields = split(line)?;
        let foundation = &fields[0][CANDIDATE_PREFIX.len()..];
        if foundation.is_empty() {
            return Err(Error::candidate(format!("missing foundation: {:?}", line)));
        }
        let protocol = match fields[2].to_ascii_lowercase().as_str() {
            "udp" => Protocol::Udp,
            "tcp" => Protocol::Tcp,
            other => {
                return Err(Error::candidate(format!("unknown protocol {:?}", other)));
            }
        };

        Ok(Self {
            foundation,
            component: number(fields[1], "component")?,
            protocol,
            priority: number(fields[3], "priority")?,
            address: fields[ADDRESS],
            port: port(fields[PORT])?,
            kind: fields[7],
        })
    }

    pub fn is_host(&self) -> bool {
        self.kind == "host"
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.address, self.port)
    }
}

fn split(line: &str) -> Result<Vec<&str>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let fields: Vec<&str> = line.split(' ').collect();
    if fields.len() < MIN_FIELDS || !fields[0].starts_with(CANDIDATE_PREFIX) || fields[6] != "typ"
    {
        return Err(Error::candidate(format!("not a candidate line: {:?}", line)));
    }
    Ok(fields)
}

fn digits(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn number(token: &str, what: &str) -> Result<u32> {
    if !digits(token) {
        return Err(Error::candidate(format!("bad {} {:?}", what, token)));
    }
    token
        .parse()
        .map_err(|_| Error::candidate(format!("bad {} {:?}", what, token)))
}

fn port(token: &str) -> Result<u16> {
    if !digits(token) {
        return Err(Error::candidate(format!("bad port {:?}", token)));
    }
    token
        .parse()
        .map_err(|_| Error::candidate(format!("port out of range {:?}", token)))
}

fn host(line: &str) -> Result<CandidateLine<'_>> {
    let candidate = CandidateLine::parse(line)?;
    if !candidate.is_host() {
        return Err(Error::candidate(format!(
            "not a host candidate (typ {})",
            candidate.kind
        )));
    }
    Ok(candidate)
}

/// Remove every candidate line, keeping all other lines and their
/// terminators in order.
pub fn filter_candidates_from_sdp(sdp: &str) -> String {
    sdp.split_inclusive('\n')
        .filter(|line| !line.starts_with(CANDIDATE_PREFIX))
        .collect()
}

/// Address and port of a host candidate line.
pub fn extract_endpoint_from_candidate_line(line: &str) -> Result<Endpoint> {
    Ok(host(line)?.endpoint())
}

/// Replace the address and port of a host candidate line, leaving every
/// other byte of the line as it was.
pub fn set_candidate_line_endpoint(line: &str, endpoint: &Endpoint) -> Result<String> {
    host(line)?;
    if endpoint.address.is_empty() || endpoint.address.contains(char::is_whitespace) {
        return Err(Error::candidate(format!(
            "invalid address {:?}",
            endpoint.address
        )));
    }
    let (body, cr) = match line.strip_suffix('\r') {
        Some(body) => (body, "\r"),
        None => (line, ""),
    };

    let port = endpoint.port.to_string();
    let mut fields: Vec<&str> = body.split(' ').collect();
    fields[ADDRESS] = endpoint.address.as_str();
    fields[PORT] = port.as_str();
    Ok(format!("{}{}", fields.join(" "), cr))
}

/// Candidate lines of an SDP body, without terminators.
pub fn candidate_lines(sdp: &str) -> impl Iterator<Item = &str> {
    sdp.lines().filter(|line| line.starts_with(CANDIDATE_PREFIX))
}

/// Rewrite host candidates for which `rewrite` returns a new endpoint.
/// Every other line is copied verbatim.
pub fn rewrite_host_candidates<F>(sdp: &str, mut rewrite: F) -> String
where
    F: FnMut(&Endpoint) -> Option<Endpoint>,
{
    let mut out = String::with_capacity(sdp.len());
    for line in sdp.split_inclusive('\n') {
        let (body, newline) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };
        let replaced = extract_endpoint_from_candidate_line(body)
            .ok()
            .and_then(|current| rewrite(&current))
            .and_then(|endpoint| set_candidate_line_endpoint(body, &endpoint).ok());
        match replaced {
            Some(rewritten) => {
                out.push_str(&rewritten);
                out.push_str(newline);
            }
            None => out.push_str(line),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELAY: &str =
        "a=candidate:9097 1 udp 4175 127.0.0.1 50840 typ relay raddr 172.26.108.25 rport 56635";
    const HOST: &str =
        "a=candidate:129713316 2 udp 2122129151 172.26.108.25 40762 typ host generation 0";
    const TCP_ACTIVE: &str =
        "a=candidate:1302982778 1 tcp 1518214911 172.29.18.131 0 typ host tcptype active generation 0";

    fn sdp() -> String {
        format!(
            "o=- 3055156452807570418 3 IN IP4 127.0.0.1\n\
             a=group:BUNDLE audio data\n\
             a=rtcp:40762 IN IP4 172.26.108.25\n\
             {}\n\
             {}\n\
             a=ice-ufrag:ETnQpTTSTgfXZ6HZ\n",
            RELAY, HOST
        )
    }

    #[test]
    fn test_filter_candidates() {
        assert_eq!(
            filter_candidates_from_sdp(&sdp()),
            "o=- 3055156452807570418 3 IN IP4 127.0.0.1\n\
             a=group:BUNDLE audio data\n\
             a=rtcp:40762 IN IP4 172.26.108.25\n\
             a=ice-ufrag:ETnQpTTSTgfXZ6HZ\n"
        );
    }

    #[test]
    fn test_filter_keeps_crlf_and_unterminated_tail() {
        let sdp = format!("v=0\r\n{}\r\na=end", HOST);
        assert_eq!(filter_candidates_from_sdp(&sdp), "v=0\r\na=end");
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(extract_endpoint_from_candidate_line("abc def").is_err());
        assert!(extract_endpoint_from_candidate_line("").is_err());
    }

    #[test]
    fn test_extract_rejects_non_host() {
        assert!(extract_endpoint_from_candidate_line(RELAY).is_err());
    }

    #[test]
    fn test_extract_rejects_bad_ports() {
        for line in [
            "a=candidate:9097 1 udp 4175 xxx yyy typ host generation 0",
            "a=candidate:9097 1 udp 4175 10.0.0.1 65536 typ host generation 0",
            "a=candidate:9097 1 udp 4175 10.0.0.1 -1 typ host generation 0",
            "a=candidate:9097 1 udp 4175 10.0.0.1 +80 typ host generation 0",
        ] {
            assert!(
                extract_endpoint_from_candidate_line(line).is_err(),
                "accepted {}",
                line
            );
        }
    }

    #[test]
    fn test_extract_host() {
        let endpoint = extract_endpoint_from_candidate_line(HOST).unwrap();
        assert_eq!(endpoint, Endpoint::new("172.26.108.25", 40762));

        let with_cr = format!("{}\r", HOST);
        assert_eq!(
            extract_endpoint_from_candidate_line(&with_cr).unwrap(),
            endpoint
        );
    }

    #[test]
    fn test_extract_tcp_active_port_zero() {
        let endpoint = extract_endpoint_from_candidate_line(TCP_ACTIVE).unwrap();
        assert_eq!(endpoint, Endpoint::new("172.29.18.131", 0));
    }

    #[test]
    fn test_parse_fields() {
        let candidate = CandidateLine::parse(TCP_ACTIVE).unwrap();
        assert_eq!(candidate.foundation, "1302982778");
        assert_eq!(candidate.component, 1);
        assert_eq!(candidate.protocol, Protocol::Tcp);
        assert_eq!(candidate.priority, 1518214911);
        assert!(candidate.is_host());

        let relay = CandidateLine::parse(RELAY).unwrap();
        assert_eq!(relay.kind, "relay");
        assert!(CandidateLine::parse("a=candidate:1 1 sctp 1 1.2.3.4 5 typ host").is_err());
    }

    #[test]
    fn test_set_endpoint() {
        let relay = Endpoint::new("127.0.0.1", 5000);
        assert!(set_candidate_line_endpoint("abc def", &relay).is_err());
        assert!(set_candidate_line_endpoint(RELAY, &relay).is_err());

        let rewritten = set_candidate_line_endpoint(HOST, &relay).unwrap();
        assert_eq!(
            rewritten,
            "a=candidate:129713316 2 udp 2122129151 127.0.0.1 5000 typ host generation 0"
        );
        // Idempotent
        assert_eq!(
            set_candidate_line_endpoint(&rewritten, &relay).unwrap(),
            rewritten
        );
    }

    #[test]
    fn test_set_endpoint_keeps_cr() {
        let line = format!("{}\r", HOST);
        let rewritten = set_candidate_line_endpoint(&line, &Endpoint::new("::1", 9)).unwrap();
        assert_eq!(
            rewritten,
            "a=candidate:129713316 2 udp 2122129151 ::1 9 typ host generation 0\r"
        );
    }

    #[test]
    fn test_set_endpoint_rejects_bad_address() {
        for address in ["", "10.0.0.1 typ", "host\tname"] {
            let err = set_candidate_line_endpoint(HOST, &Endpoint::new(address, 9)).unwrap_err();
            assert!(matches!(err, Error::Candidate(_)), "accepted {:?}", address);
        }
        // Rewriting keeps the original line when the new endpoint is unusable
        let sdp = sdp();
        assert_eq!(
            rewrite_host_candidates(&sdp, |_| Some(Endpoint::new("", 1))),
            sdp
        );
    }

    #[test]
    fn test_candidate_lines() {
        let sdp = sdp();
        let lines: Vec<&str> = candidate_lines(&sdp).collect();
        assert_eq!(lines, vec![RELAY, HOST]);
    }

    #[test]
    fn test_rewrite_host_candidates() {
        let relay = Endpoint::new("127.0.0.1", 5000);
        let rewritten = rewrite_host_candidates(&sdp(), |_| Some(relay.clone()));

        let expected = sdp().replace(
            "172.26.108.25 40762 typ host",
            "127.0.0.1 5000 typ host",
        );
        assert_eq!(rewritten, expected);
        // The relay candidate and the rtcp attribute are untouched
        assert!(rewritten.contains(RELAY));
        assert!(rewritten.contains("a=rtcp:40762 IN IP4 172.26.108.25\n"));
    }

    #[test]
    fn test_rewrite_can_skip() {
        let sdp = sdp();
        assert_eq!(rewrite_host_candidates(&sdp, |_| None), sdp);
    }
}
