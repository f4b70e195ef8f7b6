//! Linux kernel WireGuard backend.
//!
//! Drives `ip`, `wg` and `resolvconf` the same way `wg-quick` does.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::commands::{HostCommands, SystemCommands};
use super::{AdapterInfo, PlatformError, PlatformResult, PlatformService, StartRequest};
use crate::config::VpnConfiguration;
use crate::config::wireguard::IpCidr;

/// MTU used when neither the configuration nor the settings name one.
pub const DEFAULT_MTU: u32 = 1420;

/// Kernel backend
pub struct KernelPlatform {
    commands: Arc<dyn SystemCommands>,
    run_hooks: bool,
}

impl KernelPlatform {
    /// Create a backend that runs commands on the host
    pub fn new(run_hooks: bool) -> Self {
        Self::with_commands(Arc::new(HostCommands::new()), run_hooks)
    }

    /// Create a backend with a custom command runner
    pub fn with_commands(commands: Arc<dyn SystemCommands>, run_hooks: bool) -> Self {
        Self {
            commands,
            run_hooks,
        }
    }

    async fn cmd(&self, program: &str, args: &[&str]) -> PlatformResult<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.commands.run(program, &args, None).await
    }

    async fn cmd_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
    ) -> PlatformResult<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.commands.run(program, &args, Some(input)).await
    }

    async fn run_hooks(&self, hooks: &[String], interface: &str) -> PlatformResult<()> {
        if !self.run_hooks {
            if !hooks.is_empty() {
                debug!(interface, count = hooks.len(), "Hooks disabled, skipping");
            }
            return Ok(());
        }
        for hook in hooks {
            let script = hook.replace("%i", interface);
            self.cmd("sh", &["-c", &script]).await?;
        }
        Ok(())
    }

    /// Everything after link creation, PostUp hooks included. Whatever
    /// succeeded is noted in `applied` so a failure can be undone.
    async fn bring_up(
        &self,
        request: &StartRequest,
        mtu: u32,
        applied: &mut Applied,
    ) -> PlatformResult<()> {
        let name = request.interface_name.as_str();
        let config = &request.configuration;

        self.cmd_with_input("wg", &["setconf", name, "/dev/stdin"], &config.strip())
            .await?;

        for address in &config.addresses {
            let cidr = address.to_string();
            self.cmd("ip", &[family(address.addr), "address", "add", &cidr, "dev", name])
                .await?;
        }

        let mtu = mtu.to_string();
        self.cmd("ip", &["link", "set", "mtu", &mtu, "up", "dev", name])
            .await?;

        if has_dns(config) {
            self.cmd_with_input(
                "resolvconf",
                &["-a", name, "-m", "0", "-x"],
                &resolvconf_input(config),
            )
            .await?;
            applied.dns = true;
        }

        self.add_routes(name, config, applied).await?;
        self.run_hooks(&config.post_up, name).await
    }

    /// Undo a partial `bring_up`. Every step is attempted.
    async fn roll_back(&self, name: &str, applied: &Applied) {
        if applied.dns {
            self.remove_dns(name).await;
        }
        if let Err(e) = self.cmd("ip", &["link", "delete", "dev", name]).await {
            warn!(interface = name, error = %e, "Failed to remove interface");
        }
        for route in &applied.endpoint_routes {
            self.remove_endpoint_route(name, route).await;
        }
    }

    async fn remove_dns(&self, name: &str) {
        // The entry may already be gone; keep tearing down
        if let Err(e) = self.cmd("resolvconf", &["-d", name, "-f"]).await {
            warn!(interface = name, error = %e, "Failed to remove DNS entry");
        }
    }

    async fn add_routes(
        &self,
        name: &str,
        config: &VpnConfiguration,
        applied: &mut Applied,
    ) -> PlatformResult<()> {
        let table = config.table.as_deref().map(str::trim);
        if table.is_some_and(|t| t.eq_ignore_ascii_case("off")) {
            debug!(interface = name, "Table = off, not adding routes");
            return Ok(());
        }
        let table = table.filter(|t| !t.eq_ignore_ascii_case("auto"));

        if route_table_is_main(config) {
            for endpoint in split_default_endpoints(config).await {
                if let Some(route) = self.pin_endpoint(name, endpoint).await? {
                    applied.endpoint_routes.push(route);
                }
            }
        }

        for route in route_targets(&config.allowed_ips()) {
            let cidr = route.to_string();
            let mut args = vec![family(route.addr), "route", "add", cidr.as_str(), "dev", name];
            if let Some(t) = table {
                args.push("table");
                args.push(t);
            }
            self.cmd("ip", &args).await?;
        }
        Ok(())
    }

    /// Route `endpoint` over the path it uses now, so encrypted traffic does
    /// not loop back into the tunnel once the default route is split.
    async fn pin_endpoint(&self, name: &str, endpoint: IpAddr) -> PlatformResult<Option<IpCidr>> {
        let addr = endpoint.to_string();
        let lookup = match self
            .cmd("ip", &[family(endpoint), "route", "get", &addr])
            .await
        {
            Ok(out) => out,
            Err(PlatformError::SystemCommand(e)) => {
                warn!(interface = name, endpoint = %endpoint, error = %e, "Cannot look up route to peer endpoint");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(path) = CurrentPath::parse(&lookup) else {
            warn!(interface = name, endpoint = %endpoint, "No route to peer endpoint, not pinning it");
            return Ok(None);
        };
        if path.dev == name {
            return Ok(None);
        }

        let target = host_route(endpoint);
        let cidr = target.to_string();
        let mut args = vec![family(endpoint), "route", "add", cidr.as_str()];
        let via = path.via.map(|v| v.to_string());
        if let Some(via) = &via {
            args.extend(["via", via.as_str()]);
        }
        args.extend(["dev", path.dev.as_str()]);
        self.cmd("ip", &args).await?;
        Ok(Some(target))
    }

    async fn remove_endpoint_route(&self, name: &str, route: &IpCidr) {
        let cidr = route.to_string();
        if let Err(e) = self
            .cmd("ip", &[family(route.addr), "route", "delete", &cidr])
            .await
        {
            warn!(interface = name, route = %cidr, error = %e, "Failed to remove endpoint route");
        }
    }
}

/// What `bring_up` changed on the host so far.
#[derive(Debug, Default)]
struct Applied {
    dns: bool,
    endpoint_routes: Vec<IpCidr>,
}

/// Next hop of an existing route, from `ip route get`.
#[derive(Debug, PartialEq, Eq)]
struct CurrentPath {
    via: Option<IpAddr>,
    dev: String,
}

impl CurrentPath {
    fn parse(output: &str) -> Option<CurrentPath> {
        let first = output.lines().next()?;
        let tokens: Vec<&str> = first.split_whitespace().collect();
        let after = |key: &str| {
            tokens
                .iter()
                .position(|t| *t == key)
                .and_then(|i| tokens.get(i + 1))
                .copied()
        };
        Some(CurrentPath {
            via: after("via").and_then(|v| v.parse().ok()),
            dev: after("dev")?.to_string(),
        })
    }
}

fn family(addr: IpAddr) -> &'static str {
    if addr.is_ipv6() { "-6" } else { "-4" }
}

fn host_route(addr: IpAddr) -> IpCidr {
    IpCidr {
        addr,
        prefix: if addr.is_ipv6() { 128 } else { 32 },
    }
}

fn has_dns(config: &VpnConfiguration) -> bool {
    !config.dns_servers.is_empty() || !config.dns_search.is_empty()
}

/// Routes go to the main table unless `Table` names another one or `off`.
fn route_table_is_main(config: &VpnConfiguration) -> bool {
    config
        .table
        .as_deref()
        .map(str::trim)
        .is_none_or(|t| t.eq_ignore_ascii_case("auto"))
}

/// Peer endpoint addresses whose family has its default route split into
/// the tunnel. Host names are resolved; unresolvable ones are skipped.
async fn split_default_endpoints(config: &VpnConfiguration) -> Vec<IpAddr> {
    let defaults: Vec<bool> = config
        .allowed_ips()
        .iter()
        .filter(|c| c.is_default_route())
        .map(|c| c.is_ipv6())
        .collect();
    if defaults.is_empty() {
        return Vec::new();
    }

    let mut addrs = Vec::new();
    for endpoint in config.peers.iter().filter_map(|p| p.endpoint.as_ref()) {
        let resolved = match endpoint.host.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => match tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port)).await {
                Ok(mut found) => found.next().map(|sock| sock.ip()),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Cannot resolve peer endpoint");
                    None
                }
            },
        };
        if let Some(ip) = resolved {
            if defaults.contains(&ip.is_ipv6()) && !addrs.contains(&ip) {
                addrs.push(ip);
            }
        }
    }
    addrs
}

impl Default for KernelPlatform {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Routes to install for the allowed IPs.
///
/// A default route is split into its two halves so it takes precedence over
/// the existing default route without replacing it.
fn route_targets(allowed: &[IpCidr]) -> Vec<IpCidr> {
    let mut routes = Vec::new();
    for cidr in allowed {
        if cidr.is_default_route() {
            let halves = if cidr.is_ipv6() {
                [
                    IpCidr {
                        addr: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                        prefix: 1,
                    },
                    IpCidr {
                        addr: IpAddr::V6(Ipv6Addr::new(0x8000, 0, 0, 0, 0, 0, 0, 0)),
                        prefix: 1,
                    },
                ]
            } else {
                [
                    IpCidr {
                        addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                        prefix: 1,
                    },
                    IpCidr {
                        addr: IpAddr::V4(Ipv4Addr::new(128, 0, 0, 0)),
                        prefix: 1,
                    },
                ]
            };
            for half in halves {
                if !routes.contains(&half) {
                    routes.push(half);
                }
            }
        } else if !routes.contains(cidr) {
            routes.push(*cidr);
        }
    }
    routes
}

fn resolvconf_input(config: &VpnConfiguration) -> String {
    let mut out = String::new();
    for server in &config.dns_servers {
        out.push_str(&format!("nameserver {}\n", server));
    }
    if !config.dns_search.is_empty() {
        out.push_str(&format!("search {}\n", config.dns_search.join(" ")));
    }
    out
}

#[async_trait]
impl PlatformService for KernelPlatform {
    fn name(&self) -> &'static str {
        "kernel"
    }

    async fn start(&self, request: &StartRequest) -> PlatformResult<AdapterInfo> {
        let name = request.interface_name.as_str();
        let config = &request.configuration;

        if self.is_up(name).await? {
            return Err(PlatformError::AdapterExists(name.to_string()));
        }

        self.run_hooks(&config.pre_up, name).await?;
        self.cmd("ip", &["link", "add", name, "type", "wireguard"])
            .await?;

        let mtu = config.mtu.unwrap_or(DEFAULT_MTU);
        let mut applied = Applied::default();
        if let Err(e) = self.bring_up(request, mtu, &mut applied).await {
            warn!(interface = name, error = %e, "Bringing up failed, removing interface");
            self.roll_back(name, &applied).await;
            return Err(e);
        }

        info!(interface = name, mtu, peers = config.peers.len(), "Interface is up");
        Ok(AdapterInfo::from_request(request, Some(mtu)))
    }

    async fn stop(
        &self,
        interface: &str,
        configuration: Option<&VpnConfiguration>,
    ) -> PlatformResult<()> {
        if !self.is_up(interface).await? {
            return Err(PlatformError::NotFound(interface.to_string()));
        }

        if let Some(config) = configuration {
            self.run_hooks(&config.pre_down, interface).await?;
            if has_dns(config) {
                self.remove_dns(interface).await;
            }
        }

        self.cmd("ip", &["link", "delete", "dev", interface]).await?;

        if let Some(config) = configuration {
            if route_table_is_main(config) {
                for endpoint in split_default_endpoints(config).await {
                    self.remove_endpoint_route(interface, &host_route(endpoint)).await;
                }
            }
            self.run_hooks(&config.post_down, interface).await?;
        }

        info!(interface, "Interface is down");
        Ok(())
    }

    async fn is_up(&self, interface: &str) -> PlatformResult<bool> {
        match self.cmd("ip", &["link", "show", "dev", interface]).await {
            Ok(_) => Ok(true),
            // `ip` ran and found no such device
            Err(PlatformError::SystemCommand(_)) | Err(PlatformError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn running_configuration(&self, interface: &str) -> PlatformResult<VpnConfiguration> {
        let shown = self.cmd("wg", &["showconf", interface]).await?;
        VpnConfiguration::parse(&shown).map_err(|e| {
            PlatformError::Other(format!("unreadable `wg showconf {}` output: {}", interface, e))
        })
    }

    async fn adapters(&self) -> PlatformResult<Vec<String>> {
        let listing = self
            .cmd("ip", &["-o", "link", "show", "type", "wireguard"])
            .await?;
        Ok(parse_link_listing(&listing))
    }
}

/// Extract interface names from `ip -o link show` output.
fn parse_link_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim().split('@').next().unwrap_or_default().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn cidr(s: &str) -> IpCidr {
        IpCidr::from_str(s).unwrap()
    }

    #[test]
    fn default_routes_are_split() {
        let routes = route_targets(&[cidr("0.0.0.0/0"), cidr("10.0.0.0/8"), cidr("::/0")]);
        let rendered: Vec<String> = routes.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["0.0.0.0/1", "128.0.0.0/1", "10.0.0.0/8", "::/1", "8000::/1"]
        );
    }

    #[test]
    fn reads_next_hop_from_route_get() {
        let via = CurrentPath::parse("203.0.113.1 via 192.0.2.1 dev eth0 src 192.0.2.10 uid 0 \n    cache \n");
        assert_eq!(
            via,
            Some(CurrentPath {
                via: Some("192.0.2.1".parse().unwrap()),
                dev: "eth0".to_string(),
            })
        );

        let direct = CurrentPath::parse("192.0.2.7 dev eth0 src 192.0.2.10 uid 0\n");
        assert_eq!(direct.unwrap().via, None);
        assert_eq!(CurrentPath::parse(""), None);
        assert_eq!(CurrentPath::parse("unreachable 203.0.113.1"), None);
    }

    #[test]
    fn parses_ip_link_listing() {
        let listing = "5: wg0: <POINTOPOINT,NOARP,UP,LOWER_UP> mtu 1420 qdisc noqueue\n\
                       7: office: <POINTOPOINT,NOARP> mtu 1380\n";
        assert_eq!(parse_link_listing(listing), vec!["wg0", "office"]);
    }
}
