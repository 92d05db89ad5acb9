use std::net::{Ipv4Addr, TcpListener};

/// Whether nothing is listening on `port`, on loopback or the wildcard address
pub fn is_port_available(port: u16) -> bool {
    [Ipv4Addr::LOCALHOST, Ipv4Addr::UNSPECIFIED]
        .into_iter()
        .all(|addr| TcpListener::bind((addr, port)).is_ok())
}
