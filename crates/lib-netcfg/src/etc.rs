use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;

use crate::MacAddr;

/// Point-in-time snapshot of the `/etc` files the daemon consumes.
///
/// Read once at startup; the DHCP server re-reads it to pick up edits to
/// `/etc/ethers` and `/etc/hosts`.
#[derive(Debug, Clone)]
pub struct EtcSnapshot {
    /// `/etc/hosts`: IP to list of aliases.
    pub hosts: BTreeMap<Ipv4Addr, Vec<String>>,
    /// `/etc/ethers`: MAC to IP (hostnames resolved through `hosts`).
    pub ethers: BTreeMap<MacAddr, Ipv4Addr>,
    /// `/etc/resolv.conf` nameservers.
    pub resolv: Vec<Ipv4Addr>,
    /// First line of `/etc/hostname`.
    pub hostname: String,
}

impl Default for EtcSnapshot {
    fn default() -> Self {
        EtcSnapshot {
            hosts: BTreeMap::new(),
            ethers: BTreeMap::new(),
            resolv: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            hostname: "localhost".to_string(),
        }
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

impl EtcSnapshot {
    /// Read `/etc/hosts`, `/etc/ethers`, `/etc/resolv.conf` and
    /// `/etc/hostname`. Missing or malformed files fall back to defaults.
    pub fn read() -> Self {
        let mut snapshot = EtcSnapshot::default();
        if let Ok(content) = fs::read_to_string("/etc/hosts") {
            snapshot.parse_hosts(&content);
        }
        if let Ok(content) = fs::read_to_string("/etc/ethers") {
            snapshot.parse_ethers(&content);
        }
        if let Ok(content) = fs::read_to_string("/etc/resolv.conf") {
            snapshot.parse_resolv(&content);
        }
        if let Ok(content) = fs::read_to_string("/etc/hostname") {
            if let Some(line) = content.lines().next() {
                let line = line.trim();
                if !line.is_empty() {
                    snapshot.hostname = line.to_string();
                }
            }
        }
        snapshot
    }

    pub fn parse_hosts(&mut self, content: &str) {
        for line in content.lines() {
            let mut fields = strip_comment(line).split_whitespace();
            let Some(ip) = fields.next().and_then(|s| s.parse::<Ipv4Addr>().ok()) else {
                continue;
            };
            for alias in fields {
                self.hosts.entry(ip).or_default().push(alias.to_string());
            }
        }
    }

    /// `/etc/ethers` maps MACs either to literal IPs or to hostnames that
    /// must resolve through `/etc/hosts`. Parse hosts first.
    pub fn parse_ethers(&mut self, content: &str) {
        for line in content.lines() {
            let mut fields = strip_comment(line).split_whitespace();
            let (Some(mac_str), Some(addr_str)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Ok(mac) = mac_str.parse::<MacAddr>() else {
                continue;
            };
            if let Ok(ip) = addr_str.parse::<Ipv4Addr>() {
                self.ethers.insert(mac, ip);
            } else if let Some((ip, _)) = self
                .hosts
                .iter()
                .find(|(_, aliases)| aliases.iter().any(|a| a == addr_str))
            {
                self.ethers.insert(mac, *ip);
            }
        }
    }

    pub fn parse_resolv(&mut self, content: &str) {
        let mut servers = Vec::new();
        for line in content.lines() {
            let mut fields = strip_comment(line).split_whitespace();
            if fields.next() != Some("nameserver") {
                continue;
            }
            if let Some(ip) = fields.next().and_then(|s| s.parse::<Ipv4Addr>().ok()) {
                servers.push(ip);
            }
        }
        if !servers.is_empty() {
            self.resolv = servers;
        }
    }

    /// `/etc/hosts` aliases for a MAC address, resolved via `/etc/ethers`.
    pub fn hosts_for_mac(&self, mac: MacAddr) -> Option<&Vec<String>> {
        self.ethers.get(&mac).and_then(|ip| self.hosts.get(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_with_comments_and_aliases() {
        let mut snapshot = EtcSnapshot::default();
        snapshot.parse_hosts(
            "127.0.0.1 localhost\n\
             192.168.1.10 printer laser # office\n\
             not-an-ip broken\n",
        );
        assert_eq!(
            snapshot.hosts.get(&Ipv4Addr::new(192, 168, 1, 10)).unwrap(),
            &vec!["printer".to_string(), "laser".to_string()]
        );
    }

    #[test]
    fn ethers_resolves_hostnames_through_hosts() {
        let mut snapshot = EtcSnapshot::default();
        snapshot.parse_hosts("192.168.1.10 printer\n");
        snapshot.parse_ethers(
            "aa:bb:cc:00:00:01 192.168.1.2\n\
             aa:bb:cc:00:00:02 printer\n\
             aa:bb:cc:00:00:03 unknown-host\n",
        );
        let mac1: MacAddr = "aa:bb:cc:00:00:01".parse().unwrap();
        let mac2: MacAddr = "aa:bb:cc:00:00:02".parse().unwrap();
        let mac3: MacAddr = "aa:bb:cc:00:00:03".parse().unwrap();
        assert_eq!(snapshot.ethers.get(&mac1), Some(&Ipv4Addr::new(192, 168, 1, 2)));
        assert_eq!(snapshot.ethers.get(&mac2), Some(&Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(snapshot.ethers.get(&mac3), None);
        assert_eq!(
            snapshot.hosts_for_mac(mac2).unwrap(),
            &vec!["printer".to_string()]
        );
    }

    #[test]
    fn resolv_keeps_defaults_when_empty() {
        let mut snapshot = EtcSnapshot::default();
        snapshot.parse_resolv("# nothing here\nsearch example.com\n");
        assert_eq!(snapshot.resolv, vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)]);

        snapshot.parse_resolv("nameserver 1.1.1.1\nnameserver 9.9.9.9\n");
        assert_eq!(snapshot.resolv, vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(9, 9, 9, 9)]);
    }
}
