//! WireGuard tunnel configuration model.
//!
//! Parses and renders the INI-like format used by `wg-quick`: one
//! `[Interface]` section followed by any number of `[Peer]` sections.
//! Keys are case-insensitive, `#` starts a comment, and list keys
//! (`Address`, `DNS`, `AllowedIPs`) accumulate across repeated lines.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors produced while parsing or validating a WireGuard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WgConfigError {
    /// Malformed line
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// A key that must be present is missing
    #[error("missing required key {key} in [{section}]")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },

    /// A key has a value that cannot be used
    #[error("line {line}: invalid value for {key}: {message}")]
    InvalidValue {
        line: usize,
        key: String,
        message: String,
    },
}

/// Returns true when `name` is usable as a network interface name.
///
/// Mirrors the kernel limit of 15 bytes and the character set `wg-quick`
/// accepts.
pub fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'))
}

/// Returns true when `key` is a base64 encoded 32 byte key.
pub fn is_valid_key(key: &str) -> bool {
    STANDARD.decode(key).map(|k| k.len() == 32).unwrap_or(false)
}

/// An address with a prefix length, e.g. `10.0.0.1/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpCidr {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl IpCidr {
    fn max_prefix(addr: &IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    /// True for `0.0.0.0/0` and `::/0`.
    pub fn is_default_route(&self) -> bool {
        self.prefix == 0
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }
}

impl FromStr for IpCidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr = addr
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| format!("'{}': {}", s, e))?;
        let max = Self::max_prefix(&addr);
        let prefix = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .map_err(|e| format!("'{}': bad prefix length: {}", s, e))?,
            None => max,
        };
        if prefix > max {
            return Err(format!("'{}': prefix length {} exceeds {}", s, prefix, max));
        }
        Ok(IpCidr { addr, prefix })
    }
}

impl fmt::Display for IpCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Peer endpoint, `host:port` or `[v6]:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| format!("'{}': unterminated '['", s))?;
            let port = rest
                .strip_prefix(':')
                .ok_or_else(|| format!("'{}': missing port", s))?;
            (host, port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| format!("'{}': missing port", s))?
        };
        if host.is_empty() {
            return Err(format!("'{}': missing host", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("'{}': bad port: {}", s, e))?;
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A `[Peer]` section.
#[derive(Debug, Clone)]
pub struct VpnPeer {
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub endpoint: Option<Endpoint>,
    pub allowed_ips: Vec<IpCidr>,
    pub persistent_keepalive: Option<u16>,
}

impl VpnPeer {
    fn new(public_key: String) -> Self {
        VpnPeer {
            public_key,
            preshared_key: None,
            endpoint: None,
            allowed_ips: Vec::new(),
            persistent_keepalive: None,
        }
    }
}

// Peers are identified by their public key alone.
impl PartialEq for VpnPeer {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for VpnPeer {}

/// A complete tunnel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpnConfiguration {
    pub private_key: String,
    pub listen_port: Option<u16>,
    pub fw_mark: Option<u32>,
    pub addresses: Vec<IpCidr>,
    pub dns_servers: Vec<IpAddr>,
    pub dns_search: Vec<String>,
    pub mtu: Option<u32>,
    pub table: Option<String>,
    pub pre_up: Vec<String>,
    pub post_up: Vec<String>,
    pub pre_down: Vec<String>,
    pub post_down: Vec<String>,
    pub save_config: bool,
    pub peers: Vec<VpnPeer>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Interface,
    Peer,
}

/// Partially-read peer, validated once its section ends.
struct PendingPeer {
    line: usize,
    public_key: Option<String>,
    peer: VpnPeer,
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|v| !v.is_empty())
}

fn invalid(line: usize, key: &str, message: impl Into<String>) -> WgConfigError {
    WgConfigError::InvalidValue {
        line,
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_number<T: FromStr>(line: usize, key: &str, value: &str) -> Result<T, WgConfigError>
where
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| invalid(line, key, format!("'{}': {}", value, e)))
}

fn parse_key(line: usize, key: &str, value: &str) -> Result<String, WgConfigError> {
    if is_valid_key(value) {
        Ok(value.to_string())
    } else {
        Err(invalid(line, key, "expected a base64 encoded 32 byte key"))
    }
}

fn parse_fw_mark(line: usize, value: &str) -> Result<Option<u32>, WgConfigError> {
    if value.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map_err(|e| e.to_string()),
        None => value.parse::<u32>().map_err(|e| e.to_string()),
    };
    match parsed {
        Ok(0) => Ok(None),
        Ok(mark) => Ok(Some(mark)),
        Err(e) => Err(invalid(line, "FwMark", format!("'{}': {}", value, e))),
    }
}

fn parse_bool(line: usize, key: &str, value: &str) -> Result<bool, WgConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(invalid(line, key, format!("'{}' is not a boolean", value))),
    }
}

impl VpnConfiguration {
    /// Parse configuration text.
    pub fn parse(content: &str) -> Result<Self, WgConfigError> {
        let mut cfg = VpnConfiguration::default();
        let mut section: Option<Section> = None;
        let mut seen_interface = false;
        let mut private_key: Option<String> = None;
        let mut pending: Option<PendingPeer> = None;

        for (idx, raw) in content.lines().enumerate() {
            let line = idx + 1;
            let text = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if text.is_empty() {
                continue;
            }

            if let Some(name) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                if let Some(done) = pending.take() {
                    cfg.peers.push(Self::finish_peer(done)?);
                }
                match name.trim().to_ascii_lowercase().as_str() {
                    "interface" => {
                        if seen_interface {
                            return Err(WgConfigError::Syntax {
                                line,
                                message: "duplicate [Interface] section".to_string(),
                            });
                        }
                        seen_interface = true;
                        section = Some(Section::Interface);
                    }
                    "peer" => {
                        section = Some(Section::Peer);
                        pending = Some(PendingPeer {
                            line,
                            public_key: None,
                            peer: VpnPeer::new(String::new()),
                        });
                    }
                    other => {
                        return Err(WgConfigError::Syntax {
                            line,
                            message: format!("unknown section [{}]", other),
                        });
                    }
                }
                continue;
            }

            let (key, value) = text.split_once('=').ok_or_else(|| WgConfigError::Syntax {
                line,
                message: format!("expected 'Key = Value', got '{}'", text),
            })?;
            let key = key.trim();
            let value = value.trim();

            match section {
                None => {
                    return Err(WgConfigError::Syntax {
                        line,
                        message: format!("'{}' appears before any section", key),
                    });
                }
                Some(Section::Interface) => {
                    Self::read_interface_key(&mut cfg, &mut private_key, line, key, value)?
                }
                Some(Section::Peer) => {
                    if let Some(p) = pending.as_mut() {
                        Self::read_peer_key(p, line, key, value)?;
                    }
                }
            }
        }

        if let Some(done) = pending.take() {
            cfg.peers.push(Self::finish_peer(done)?);
        }

        cfg.private_key = private_key.ok_or(WgConfigError::MissingKey {
            section: "Interface",
            key: "PrivateKey",
        })?;
        Ok(cfg)
    }

    fn read_interface_key(
        cfg: &mut VpnConfiguration,
        private_key: &mut Option<String>,
        line: usize,
        key: &str,
        value: &str,
    ) -> Result<(), WgConfigError> {
        match key.to_ascii_lowercase().as_str() {
            "privatekey" => *private_key = Some(parse_key(line, key, value)?),
            "listenport" => cfg.listen_port = Some(parse_number(line, key, value)?),
            "fwmark" => cfg.fw_mark = parse_fw_mark(line, value)?,
            "address" => {
                for item in split_list(value) {
                    cfg.addresses
                        .push(item.parse().map_err(|e: String| invalid(line, key, e))?);
                }
            }
            "dns" => {
                for item in split_list(value) {
                    match item.parse::<IpAddr>() {
                        Ok(ip) => cfg.dns_servers.push(ip),
                        Err(_) => cfg.dns_search.push(item.to_string()),
                    }
                }
            }
            "mtu" => cfg.mtu = Some(parse_number(line, key, value)?),
            "table" => cfg.table = Some(value.to_string()),
            "preup" => cfg.pre_up.push(value.to_string()),
            "postup" => cfg.post_up.push(value.to_string()),
            "predown" => cfg.pre_down.push(value.to_string()),
            "postdown" => cfg.post_down.push(value.to_string()),
            "saveconfig" => cfg.save_config = parse_bool(line, key, value)?,
            _ => debug!(line, key, "Ignoring unknown [Interface] key"),
        }
        Ok(())
    }

    fn read_peer_key(
        pending: &mut PendingPeer,
        line: usize,
        key: &str,
        value: &str,
    ) -> Result<(), WgConfigError> {
        let peer = &mut pending.peer;
        match key.to_ascii_lowercase().as_str() {
            "publickey" => pending.public_key = Some(parse_key(line, key, value)?),
            "presharedkey" => peer.preshared_key = Some(parse_key(line, key, value)?),
            "endpoint" => {
                peer.endpoint = Some(value.parse().map_err(|e: String| invalid(line, key, e))?)
            }
            "allowedips" => {
                for item in split_list(value) {
                    peer.allowed_ips
                        .push(item.parse().map_err(|e: String| invalid(line, key, e))?);
                }
            }
            "persistentkeepalive" => {
                peer.persistent_keepalive = if value.eq_ignore_ascii_case("off") {
                    None
                } else {
                    match parse_number::<u16>(line, key, value)? {
                        0 => None,
                        n => Some(n),
                    }
                }
            }
            _ => debug!(line, key, "Ignoring unknown [Peer] key"),
        }
        Ok(())
    }

    fn finish_peer(pending: PendingPeer) -> Result<VpnPeer, WgConfigError> {
        let public_key = pending.public_key.ok_or(WgConfigError::MissingKey {
            section: "Peer",
            key: "PublicKey",
        })?;
        debug!(line = pending.line, "Parsed [Peer] section");
        Ok(VpnPeer {
            public_key,
            ..pending.peer
        })
    }

    /// Render the full configuration, including the `wg-quick` keys.
    pub fn write(&self) -> String {
        let mut out = String::from("[Interface]\n");
        self.write_wg_interface_keys(&mut out);
        if !self.addresses.is_empty() {
            out.push_str(&format!("Address = {}\n", join(&self.addresses)));
        }
        if !self.dns_servers.is_empty() || !self.dns_search.is_empty() {
            let mut dns: Vec<String> = self.dns_servers.iter().map(|d| d.to_string()).collect();
            dns.extend(self.dns_search.iter().cloned());
            out.push_str(&format!("DNS = {}\n", dns.join(", ")));
        }
        if let Some(mtu) = self.mtu {
            out.push_str(&format!("MTU = {}\n", mtu));
        }
        if let Some(table) = &self.table {
            out.push_str(&format!("Table = {}\n", table));
        }
        for (key, hooks) in [
            ("PreUp", &self.pre_up),
            ("PostUp", &self.post_up),
            ("PreDown", &self.pre_down),
            ("PostDown", &self.post_down),
        ] {
            for hook in hooks {
                out.push_str(&format!("{} = {}\n", key, hook));
            }
        }
        if self.save_config {
            out.push_str("SaveConfig = true\n");
        }
        self.write_peers(&mut out);
        out
    }

    /// Render only what `wg setconf` understands.
    pub fn strip(&self) -> String {
        let mut out = String::from("[Interface]\n");
        self.write_wg_interface_keys(&mut out);
        self.write_peers(&mut out);
        out
    }

    fn write_wg_interface_keys(&self, out: &mut String) {
        out.push_str(&format!("PrivateKey = {}\n", self.private_key));
        if let Some(port) = self.listen_port {
            out.push_str(&format!("ListenPort = {}\n", port));
        }
        if let Some(mark) = self.fw_mark {
            out.push_str(&format!("FwMark = {}\n", mark));
        }
    }

    fn write_peers(&self, out: &mut String) {
        for peer in &self.peers {
            out.push_str("\n[Peer]\n");
            out.push_str(&format!("PublicKey = {}\n", peer.public_key));
            if let Some(psk) = &peer.preshared_key {
                out.push_str(&format!("PresharedKey = {}\n", psk));
            }
            if let Some(endpoint) = &peer.endpoint {
                out.push_str(&format!("Endpoint = {}\n", endpoint));
            }
            if !peer.allowed_ips.is_empty() {
                out.push_str(&format!("AllowedIPs = {}\n", join(&peer.allowed_ips)));
            }
            if let Some(keepalive) = peer.persistent_keepalive {
                out.push_str(&format!("PersistentKeepalive = {}\n", keepalive));
            }
        }
    }

    /// Merge the state a running interface reports (keys, port, mark and
    /// peers, as printed by `wg showconf`) into this configuration. The
    /// `wg-quick` keys are kept from `self`.
    pub fn with_runtime_state(&self, running: &VpnConfiguration) -> VpnConfiguration {
        VpnConfiguration {
            private_key: running.private_key.clone(),
            listen_port: running.listen_port,
            fw_mark: running.fw_mark,
            peers: running.peers.clone(),
            ..self.clone()
        }
    }

    /// All allowed IPs across peers, deduplicated, in declaration order.
    pub fn allowed_ips(&self) -> Vec<IpCidr> {
        let mut all: Vec<IpCidr> = Vec::new();
        for ip in self.peers.iter().flat_map(|p| p.allowed_ips.iter()) {
            if !all.contains(ip) {
                all.push(*ip);
            }
        }
        all
    }
}

impl FromStr for VpnConfiguration {
    type Err = WgConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE: &str = "OMX3U47NyJYiSdkIHAv/J3H46ERMhRaAOozcbfMjRZE=";
    const PEER_A: &str = "dmSZae1jaLWArRrESamuHRWqUjkYvEGNzwsdTNGWv1k=";
    const PEER_B: &str = "ZBghpub+AJO+8ESZrSX/wLkAzZpynms2NtulNk7B8YE=";

    fn sample() -> String {
        format!(
            r#"
# office link
[Interface]
PrivateKey = {PRIVATE}
Address = 172.16.11.1/24, fd00::1/64
DNS = 172.16.1.101, corp.example
MTU = 1380
PostUp = iptables -A FORWARD -i %i -j ACCEPT
PostUp = echo up
ListenPort = 51820

[Peer]
PublicKey = {PEER_A}
Endpoint = 203.0.113.7:51820
AllowedIPs = 172.16.11.0/24
AllowedIPs = 172.16.1.0/24
PersistentKeepalive = 25

[peer]
publickey = {PEER_B}
Endpoint = [2001:db8::1]:51820
AllowedIPs = 0.0.0.0/0, ::/0
"#
        )
    }

    #[test]
    fn parses_interface_and_peers() {
        let cfg = VpnConfiguration::parse(&sample()).unwrap();
        assert_eq!(cfg.private_key, PRIVATE);
        assert_eq!(cfg.listen_port, Some(51820));
        assert_eq!(cfg.addresses.len(), 2);
        assert_eq!(cfg.addresses[0].to_string(), "172.16.11.1/24");
        assert!(cfg.addresses[1].is_ipv6());
        assert_eq!(cfg.dns_servers, vec!["172.16.1.101".parse::<IpAddr>().unwrap()]);
        assert_eq!(cfg.dns_search, vec!["corp.example".to_string()]);
        assert_eq!(cfg.mtu, Some(1380));
        assert_eq!(cfg.post_up.len(), 2);

        assert_eq!(cfg.peers.len(), 2);
        let a = &cfg.peers[0];
        assert_eq!(a.public_key, PEER_A);
        assert_eq!(a.endpoint.as_ref().unwrap().port, 51820);
        assert_eq!(a.allowed_ips.len(), 2);
        assert_eq!(a.persistent_keepalive, Some(25));

        let b = &cfg.peers[1];
        assert_eq!(b.endpoint.as_ref().unwrap().host, "2001:db8::1");
        assert!(b.allowed_ips.iter().all(IpCidr::is_default_route));
    }

    #[test]
    fn strip_keeps_only_wg_keys() {
        let cfg = VpnConfiguration::parse(&sample()).unwrap();
        let stripped = cfg.strip();
        assert!(stripped.contains("PrivateKey = "));
        assert!(stripped.contains("ListenPort = 51820"));
        assert!(stripped.contains("Endpoint = [2001:db8::1]:51820"));
        assert!(!stripped.contains("Address"));
        assert!(!stripped.contains("DNS"));
        assert!(!stripped.contains("PostUp"));
    }

    #[test]
    fn written_configuration_parses_back() {
        let cfg = VpnConfiguration::parse(&sample()).unwrap();
        let again = VpnConfiguration::parse(&cfg.write()).unwrap();
        assert_eq!(cfg, again);
        assert_eq!(again.dns_search, cfg.dns_search);
        assert_eq!(again.post_up, cfg.post_up);
    }

    #[test]
    fn missing_private_key_is_reported() {
        let err = VpnConfiguration::parse("[Interface]\nAddress = 10.0.0.1/24\n").unwrap_err();
        assert_eq!(
            err,
            WgConfigError::MissingKey {
                section: "Interface",
                key: "PrivateKey"
            }
        );
    }

    #[test]
    fn peer_without_public_key_is_reported() {
        let text = format!("[Interface]\nPrivateKey = {PRIVATE}\n[Peer]\nAllowedIPs = 10.0.0.0/8\n");
        let err = VpnConfiguration::parse(&text).unwrap_err();
        assert!(matches!(err, WgConfigError::MissingKey { key: "PublicKey", .. }));
    }

    #[test]
    fn errors_carry_line_numbers() {
        let text = format!("[Interface]\nPrivateKey = {PRIVATE}\nMTU = lots\n");
        match VpnConfiguration::parse(&text).unwrap_err() {
            WgConfigError::InvalidValue { line, key, .. } => {
                assert_eq!(line, 3);
                assert_eq!(key, "MTU");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = VpnConfiguration::parse("PrivateKey = x\n").unwrap_err();
        assert!(matches!(err, WgConfigError::Syntax { line: 1, .. }));

        let err = VpnConfiguration::parse("[Interface]\n[Bogus]\n").unwrap_err();
        assert!(matches!(err, WgConfigError::Syntax { line: 2, .. }));
    }

    #[test]
    fn rejects_bad_keys_and_endpoints() {
        let text = "[Interface]\nPrivateKey = not-a-key\n";
        assert!(VpnConfiguration::parse(text).is_err());

        assert!("example.com".parse::<Endpoint>().is_err());
        assert!("[::1]51820".parse::<Endpoint>().is_err());
        assert!(":51820".parse::<Endpoint>().is_err());
        assert_eq!(
            "vpn.example.com:4433".parse::<Endpoint>().unwrap(),
            Endpoint {
                host: "vpn.example.com".to_string(),
                port: 4433
            }
        );
    }

    #[test]
    fn cidr_defaults_to_host_prefix() {
        assert_eq!("10.1.2.3".parse::<IpCidr>().unwrap().prefix, 32);
        assert_eq!("fd00::2".parse::<IpCidr>().unwrap().prefix, 128);
        assert!("10.0.0.0/33".parse::<IpCidr>().is_err());
    }

    #[test]
    fn fw_mark_and_keepalive_off() {
        let text = format!(
            "[Interface]\nPrivateKey = {PRIVATE}\nFwMark = 0x1f\n[Peer]\nPublicKey = {PEER_A}\nPersistentKeepalive = off\n"
        );
        let cfg = VpnConfiguration::parse(&text).unwrap();
        assert_eq!(cfg.fw_mark, Some(31));
        assert_eq!(cfg.peers[0].persistent_keepalive, None);
    }

    #[test]
    fn peers_compare_by_public_key() {
        let mut a = VpnPeer::new(PEER_A.to_string());
        let b = VpnPeer::new(PEER_A.to_string());
        a.persistent_keepalive = Some(10);
        assert_eq!(a, b);
        assert_ne!(a, VpnPeer::new(PEER_B.to_string()));
    }

    #[test]
    fn interface_names() {
        assert!(is_valid_interface_name("wg0"));
        assert!(is_valid_interface_name("office.vpn-1"));
        assert!(!is_valid_interface_name(""));
        assert!(!is_valid_interface_name("a/b"));
        assert!(!is_valid_interface_name("sixteen-chars-xx"));
    }

    #[test]
    fn runtime_state_replaces_peers_and_keeps_wg_quick_keys() {
        let file = VpnConfiguration::parse(&sample()).unwrap();
        let running = VpnConfiguration::parse(&format!(
            "[Interface]\nPrivateKey = {PRIVATE}\nListenPort = 41000\n\n\
             [Peer]\nPublicKey = {PEER_B}\nAllowedIPs = 10.9.0.0/16\n"
        ))
        .unwrap();

        let merged = file.with_runtime_state(&running);
        assert_eq!(merged.listen_port, Some(41000));
        assert_eq!(merged.peers.len(), 1);
        assert_eq!(merged.peers[0].public_key, PEER_B);
        assert_eq!(merged.addresses, file.addresses);
        assert_eq!(merged.post_up, file.post_up);
        assert_eq!(merged.save_config, file.save_config);
    }

    #[test]
    fn allowed_ips_are_deduplicated() {
        let text = format!(
            "[Interface]\nPrivateKey = {PRIVATE}\n[Peer]\nPublicKey = {PEER_A}\nAllowedIPs = 10.0.0.0/8\n[Peer]\nPublicKey = {PEER_B}\nAllowedIPs = 10.0.0.0/8, 192.168.0.0/16\n"
        );
        let cfg = VpnConfiguration::parse(&text).unwrap();
        assert_eq!(cfg.allowed_ips().len(), 2);
    }
}
