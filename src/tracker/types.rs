//! Connection identity derived from raw unidirectional flow tuples.

use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// One unidirectional TCP flow as reported by the capture collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FlowTuple {
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

impl FlowTuple {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self { src, dst }
    }

    /// The same physical connection observed in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl fmt::Display for FlowTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Which side of a tracked connection a byte stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "C->S"),
            Direction::Response => write!(f, "S->C"),
        }
    }
}

/// Canonical identity of a tracked connection.
///
/// The endpoint with the numerically larger port is labeled client. This is
/// a heuristic (ephemeral client ports are usually above well-known server
/// ports), not something the protocols guarantee: a client bound to a low
/// port is tracked with its roles swapped.
///
/// Immutable once built; [`ConnectionIdentity::key`] is the stable pool key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionIdentity {
    client_ip: IpAddr,
    client_port: u16,
    server_ip: IpAddr,
    server_port: u16,
}

impl ConnectionIdentity {
    pub fn new(client: SocketAddr, server: SocketAddr) -> Self {
        Self {
            client_ip: client.ip(),
            client_port: client.port(),
            server_ip: server.ip(),
            server_port: server.port(),
        }
    }

    /// Canonicalizes a raw flow and reports whether it runs client to server.
    ///
    /// Both directions of one connection resolve to the same identity with
    /// complementary directions. The higher port is taken as the client; equal
    /// ports fall back to comparing addresses.
    pub fn resolve(flow: &FlowTuple) -> (Self, Direction) {
        if (flow.src.port(), flow.src.ip()) > (flow.dst.port(), flow.dst.ip()) {
            (Self::new(flow.src, flow.dst), Direction::Request)
        } else {
            (Self::new(flow.dst, flow.src), Direction::Response)
        }
    }

    pub fn client(&self) -> SocketAddr {
        SocketAddr::new(self.client_ip, self.client_port)
    }

    pub fn server(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.server_port)
    }

    pub fn client_port(&self) -> u16 {
        self.client_port
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// Direction of a raw flow belonging to this connection.
    pub fn direction_of(&self, flow: &FlowTuple) -> Direction {
        if flow.src == self.client() {
            Direction::Request
        } else {
            Direction::Response
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.client(), self.server())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(src: &str, dst: &str) -> FlowTuple {
        FlowTuple::new(src.parse().unwrap(), dst.parse().unwrap())
    }

    #[test]
    fn resolve_is_symmetric() {
        let c2s = flow("10.0.0.7:51432", "10.0.0.1:3306");
        let s2c = c2s.reversed();

        let (a, dir_a) = ConnectionIdentity::resolve(&c2s);
        let (b, dir_b) = ConnectionIdentity::resolve(&s2c);

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_eq!(dir_a, Direction::Request);
        assert_eq!(dir_b, Direction::Response);
        assert_eq!(a.client(), "10.0.0.7:51432".parse().unwrap());
        assert_eq!(a.server_port(), 3306);
    }

    #[test]
    fn direction_of_matches_resolve() {
        let c2s = flow("192.168.1.20:40000", "192.168.1.2:80");
        let (identity, dir) = ConnectionIdentity::resolve(&c2s);
        assert_eq!(identity.direction_of(&c2s), dir);
        assert_eq!(identity.direction_of(&c2s.reversed()), Direction::Response);
    }

    #[test]
    fn key_distinguishes_connections() {
        let (a, _) = ConnectionIdentity::resolve(&flow("10.0.0.7:51432", "10.0.0.1:3306"));
        let (b, _) = ConnectionIdentity::resolve(&flow("10.0.0.7:51433", "10.0.0.1:3306"));
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), "10.0.0.7:51432 10.0.0.1:3306");
    }

    #[test]
    fn equal_ports_stay_symmetric() {
        let a_to_b = flow("10.0.0.2:5000", "10.0.0.1:5000");
        let (a, dir_a) = ConnectionIdentity::resolve(&a_to_b);
        let (b, dir_b) = ConnectionIdentity::resolve(&a_to_b.reversed());

        assert_eq!(a, b);
        assert_ne!(dir_a, dir_b);
        assert_eq!(a.direction_of(&a_to_b), dir_a);
        assert_eq!(a.direction_of(&a_to_b.reversed()), dir_b);
    }

    #[test]
    fn ipv6_endpoints_are_supported() {
        let (identity, dir) = ConnectionIdentity::resolve(&flow("[::1]:3306", "[::1]:60000"));
        assert_eq!(dir, Direction::Response);
        assert_eq!(identity.key(), "[::1]:60000 [::1]:3306");
    }
}
