use std::net::{IpAddr, SocketAddr};
use tokio::net::{lookup_host, UdpSocket};

/// Local address the OS would use to reach `target`.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub async fn outbound_ip(target: SocketAddr) -> std::io::Result<IpAddr> {
    let bind: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}

/// Resolves `address` (`host:port`, optionally with a scheme) and returns the
/// outbound IP towards it. Failures are logged and yield `None`.
pub async fn preferred_ip(address: &str) -> Option<IpAddr> {
    let host_port = address
        .split_once("://")
        .map_or(address, |(_, rest)| rest)
        .trim_end_matches('/');
    let target = match lookup_host(host_port).await {
        Ok(mut addrs) => addrs.next()?,
        Err(e) => {
            tracing::warn!(address = %host_port, error = %e, "Cannot resolve server address");
            return None;
        }
    };
    match outbound_ip(target).await {
        Ok(ip) => Some(ip),
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "Cannot determine outbound IP");
            None
        }
    }
}
