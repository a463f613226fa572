use mac_address::get_mac_address;
use std::net::{IpAddr, Ipv4Addr};
use tokio::net::UdpSocket;

// Any routable address works; nothing is actually sent.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

/// Stable per-host identifier formatted as six lowercase colon-separated hex octets.
///
/// Returns an empty string when the host has no usable interface.
pub fn resolve_device_id() -> String {
    match get_mac_address() {
        Ok(Some(mac)) => mac.to_string().to_lowercase(),
        Ok(None) => {
            log::warn!("No network interface with a MAC address found");
            String::new()
        }
        Err(e) => {
            log::warn!("MAC address lookup failed: {}", e);
            String::new()
        }
    }
}

/// Local address of the interface carrying the default route, or loopback.
pub async fn resolve_local_ip() -> IpAddr {
    match probe_local_ip().await {
        Ok(ip) => ip,
        Err(e) => {
            log::debug!("Local IP probe failed ({}), using loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

async fn probe_local_ip() -> std::io::Result<IpAddr> {
    // UDP connect only selects a route, no packet leaves the host.
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(ROUTE_PROBE_ADDR).await?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_mac_shaped_or_empty() {
        let id = resolve_device_id();
        if id.is_empty() {
            return;
        }
        let octets: Vec<&str> = id.split(':').collect();
        assert_eq!(octets.len(), 6);
        for octet in octets {
            assert_eq!(octet.len(), 2);
            assert!(octet.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn device_id_is_deterministic() {
        assert_eq!(resolve_device_id(), resolve_device_id());
    }

    #[tokio::test]
    async fn local_ip_always_resolves() {
        let ip = resolve_local_ip().await;
        assert!(ip.is_ipv4());
    }
}
