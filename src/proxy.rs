//! Trusted reverse proxies and client address resolution.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::Error;

/// Networks whose `X-Forwarded-For` headers are believed.
///
/// Empty by default: the client address is always the TCP peer.
#[derive(Clone, Debug, Default)]
pub struct TrustedProxies {
    nets: Vec<IpNet>,
}

impl TrustedProxies {
    /// Parses addresses (`10.0.0.1`) and networks (`10.0.0.0/8`). An empty
    /// list trusts nobody.
    pub fn parse<I, S>(entries: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let nets = entries.into_iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                entry.parse::<IpNet>()
                    .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                    .map_err(|_| Error::InvalidProxy(entry.to_owned()))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { nets })
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.nets.iter().any(|net| net.contains(ip))
    }

    /// The originating client of a request that arrived from `peer`.
    ///
    /// Only a trusted peer's `X-Forwarded-For` is read. It is walked right to
    /// left and the first hop that is not itself a trusted proxy wins. A
    /// malformed hop stops the walk and the peer address is used.
    pub fn client_ip(&self, peer: IpAddr, forwarded_for: Option<&str>) -> IpAddr {
        let Some(header) = forwarded_for.filter(|_| self.contains(&peer)) else {
            return peer;
        };

        let mut leftmost = peer;
        for hop in header.rsplit(',') {
            let Ok(ip) = hop.trim().parse::<IpAddr>() else {
                return peer;
            };
            if !self.contains(&ip) {
                return ip;
            }
            leftmost = ip;
        }
        leftmost
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn accepts_addresses_and_networks() {
        let proxies = TrustedProxies::parse(["10.0.0.0/8", "192.168.1.7", "::1"]).unwrap();
        assert!(proxies.contains(&ip("10.1.2.3")));
        assert!(proxies.contains(&ip("192.168.1.7")));
        assert!(!proxies.contains(&ip("192.168.1.8")));
        assert!(proxies.contains(&ip("::1")));
    }

    #[test]
    fn rejects_garbage() {
        let err = TrustedProxies::parse(["10.0.0.0/8", "proxy.local"]).unwrap_err();
        assert_eq!(err.to_string(), "invalid trusted proxy `proxy.local`");
    }

    #[rstest]
    #[case::untrusted_peer("203.0.113.9", Some("1.2.3.4"), "203.0.113.9")]
    #[case::no_header("10.0.0.2", None, "10.0.0.2")]
    #[case::single_hop("10.0.0.2", Some("1.2.3.4"), "1.2.3.4")]
    #[case::skips_trusted_hops("10.0.0.2", Some("1.2.3.4, 10.0.0.5"), "1.2.3.4")]
    #[case::rightmost_untrusted("10.0.0.2", Some("9.9.9.9, 1.2.3.4"), "1.2.3.4")]
    #[case::all_trusted("10.0.0.2", Some("10.0.0.7, 10.0.0.5"), "10.0.0.7")]
    #[case::malformed("10.0.0.2", Some("nonsense"), "10.0.0.2")]
    fn resolves_client_ip(#[case] peer: &str, #[case] header: Option<&str>, #[case] expected: &str) {
        let proxies = TrustedProxies::parse(["10.0.0.0/8"]).unwrap();
        assert_eq!(proxies.client_ip(ip(peer), header), ip(expected));
    }

    #[test]
    fn empty_list_trusts_nobody() {
        let proxies = TrustedProxies::parse(Vec::<String>::new()).unwrap();
        assert!(proxies.is_empty());
        assert_eq!(proxies.client_ip(ip("10.0.0.2"), Some("1.2.3.4")), ip("10.0.0.2"));
    }
}
