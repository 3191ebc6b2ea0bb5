//! Host filter that keeps the title fetcher away from internal networks.

use std::net::IpAddr;

/// Returns `false` for `localhost` and for literal addresses inside the
/// blocked ranges. A non-numeric hostname is accepted — name resolution is
/// the HTTP client's problem.
pub fn acceptable_netloc(host: &str) -> bool {
    match host.parse::<IpAddr>() {
        Ok(ip) => !blocked(ip),
        Err(_) => host != "localhost",
    }
}

fn blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => blocked_v4(v4.octets()),
        IpAddr::V6(v6) => {
            // IPv4-mapped addresses get the IPv4 rules.
            if let Some(v4) = v6.to_ipv4_mapped() {
                return blocked_v4(v4.octets());
            }
            let segments = v6.segments();
            v6.is_loopback() || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

fn blocked_v4(octets: [u8; 4]) -> bool {
    match octets {
        [127, ..] => true,                               // 127.0.0.0/8
        [10, ..] => true,                                // 10.0.0.0/8
        [172, b, ..] if (16..=31).contains(&b) => true,  // 172.16.0.0/12
        [192, 168, ..] => true,                          // 192.168.0.0/16
        _ => false,
    }
}
