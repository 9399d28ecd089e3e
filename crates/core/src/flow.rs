use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether the proxy classified the intercepted connection as HTTP or raw TCP.
///
/// The flow kind selects the matcher variant: domain-based rules only apply
/// to HTTP flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Http,
    Tcp,
}

/// Transport protocol of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

/// The request half of an intercepted flow.
#[derive(Debug, Clone, Default)]
pub struct FlowRequest {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl FlowRequest {
    /// First header value for `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace all values of `name` with a single value, or append if absent.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value.into()));
    }
}

/// The response half of an intercepted flow, populated during the response
/// phase.
#[derive(Debug, Clone)]
pub struct FlowResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl FlowResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    /// First header value for `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One intercepted request/response round.
///
/// Created by the proxy master when the engine yields a connection, passed
/// `&mut` through the hook chains (hooks may modify any field), and dropped
/// after response hooks complete or on connection error.
#[derive(Debug, Clone)]
pub struct Flow {
    pub id: Uuid,
    pub kind: FlowKind,
    pub transport: Transport,
    pub request: FlowRequest,
    pub response: Option<FlowResponse>,
    /// Client-side peer address, when known.
    pub client_addr: Option<SocketAddr>,
    /// Upstream server peer address, when known.
    pub server_addr: Option<SocketAddr>,
    /// Set when the flow terminated with a connection error.
    pub error: Option<String>,
}

impl Flow {
    /// Create an HTTP flow for the given host. Remaining request fields start
    /// at their defaults and can be filled in by the caller.
    #[must_use]
    pub fn http(host: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: FlowKind::Http,
            transport: Transport::Tcp,
            request: FlowRequest {
                method: "GET".to_owned(),
                scheme: "https".to_owned(),
                host: host.into(),
                port: 443,
                path: "/".to_owned(),
                query: None,
                headers: Vec::new(),
                body: None,
            },
            response: None,
            client_addr: None,
            server_addr: None,
            error: None,
        }
    }

    /// Create a raw TCP flow.
    #[must_use]
    pub fn tcp() -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: FlowKind::Tcp,
            transport: Transport::Tcp,
            request: FlowRequest::default(),
            response: None,
            client_addr: None,
            server_addr: None,
            error: None,
        }
    }

    /// The host all domain rules match against.
    #[must_use]
    pub fn pretty_host(&self) -> &str {
        &self.request.host
    }

    /// Destination port of the request.
    #[must_use]
    pub fn dst_port(&self) -> u16 {
        self.request.port
    }

    #[must_use]
    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_server_addr(mut self, addr: SocketAddr) -> Self {
        self.server_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.request.port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_flow_defaults() {
        let flow = Flow::http("example.com");
        assert_eq!(flow.kind, FlowKind::Http);
        assert_eq!(flow.pretty_host(), "example.com");
        assert_eq!(flow.dst_port(), 443);
        assert!(flow.response.is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut flow = Flow::http("example.com");
        flow.request.set_header("Content-Type", "application/json");
        assert_eq!(
            flow.request.header("content-type"),
            Some("application/json")
        );
        flow.request.set_header("content-type", "text/html");
        assert_eq!(flow.request.header("Content-Type"), Some("text/html"));
        assert_eq!(
            flow.request
                .headers
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                .count(),
            1
        );
    }

    #[test]
    fn builder_addrs() {
        let flow = Flow::http("example.com")
            .with_client_addr("10.0.0.1:55000".parse().unwrap())
            .with_server_addr("93.184.216.34:443".parse().unwrap());
        assert!(flow.client_addr.is_some());
        assert!(flow.server_addr.is_some());
    }
}
