//! Wires every subsystem to the reactor and runs the event loop.

use std::time::Instant;

use anyhow::{Context, Result};
use netcfg::{EtcSnapshot, Interface};
use nft::{Firewall, FirewallConfig};
use nix::sys::signal::Signal;
use reactor::{Reactor, SignalListener, TimerListener};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::netpick;
use crate::systemd;

const LOCAL_DOMAIN: &str = "lan";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Signal,
    Watchdog,
    DhcpServer,
    DnsServer,
    DnsClient,
    WifiMlme,
    WifiEapol,
}

struct Daemon {
    reactor: Reactor<Endpoint>,
    signals: SignalListener,
    watchdog: Option<TimerListener>,
    firewall: Option<Firewall>,
    dhcp: dhcp::Server,
    dns: dns::DnsService,
    wifi: Option<wifi::WifiService>,
    stopping: bool,
}

pub fn run(config: Config) -> Result<()> {
    // Signals are blocked and routed through the reactor before anything
    // else happens, so a Ctrl+C mid-startup still lands in the loop.
    let signals = SignalListener::new(&[Signal::SIGINT, Signal::SIGTERM, Signal::SIGABRT])
        .context("couldn't install signal handlers")?;

    let wan = netpick::pick_wan(config.wan).context("couldn't pick the WAN interface")?;
    let wan_ip = wan
        .ip()
        .with_context(|| format!("WAN interface {} has no IPv4 address", wan.name))?;
    info!(interface = %wan.name, ip = %wan_ip, "found WAN");

    let lan = netpick::pick_lan(config.lan).context("couldn't pick the LAN interface")?;
    let (lan_ip, lan_network, deconfigure_on_exit) =
        netpick::configure_lan(&lan).context("couldn't bring up the LAN interface")?;

    let etc = EtcSnapshot::read();

    // The firewall needs both sides configured before it can be started.
    let firewall = Firewall::start(FirewallConfig {
        lan_ifindex: lan.index,
        lan_network,
        lan_ip,
        wan_ip,
    })
    .context("couldn't set up the firewall")?;

    let dhcp = dhcp::Server::start(
        dhcp::ServerConfig {
            lan_ip,
            lan_network,
            device: Some(lan.name.clone()),
            port: dhcp::SERVER_PORT,
            domain: LOCAL_DOMAIN.to_string(),
            install_arp_entries: true,
        },
        &etc,
    )
    .context("failed to start the DHCP server")?;

    let dns = dns::DnsService::start(
        dns::DnsConfig {
            lan_ip,
            lan_network,
            device: Some(lan.name.clone()),
            server_port: 53,
            client_port: 338,
            upstream_port: 53,
            resolv: etc.resolv.clone(),
            domain: LOCAL_DOMAIN.to_string(),
        },
        &etc,
    )
    .context("failed to start the DNS server")?;

    let wifi = match config.wifi {
        Some(section) if section.enabled => Some(
            wifi::WifiService::start(wifi::WifiConfig {
                interface: section.interface,
                ssid: section.ssid,
                password: section.password,
            })
            .context("failed to start the access point")?,
        ),
        _ => None,
    };

    let mut daemon = Daemon {
        reactor: Reactor::new()?,
        signals,
        watchdog: None,
        firewall: Some(firewall),
        dhcp,
        dns,
        wifi,
        stopping: false,
    };

    daemon
        .reactor
        .add(Endpoint::Signal, daemon.signals.fd(), false)?;
    daemon
        .reactor
        .add(Endpoint::DhcpServer, daemon.dhcp.fd(), false)?;
    daemon
        .reactor
        .add(Endpoint::DnsServer, daemon.dns.server_fd(), false)?;
    daemon
        .reactor
        .add(Endpoint::DnsClient, daemon.dns.client_fd(), false)?;
    if let Some(wifi) = &daemon.wifi {
        daemon.reactor.add(Endpoint::WifiMlme, wifi.mlme_fd(), false)?;
        daemon.reactor.add(Endpoint::WifiEapol, wifi.eapol_fd(), false)?;
    }

    if systemd::running_under_systemd() {
        if let Some(interval) = systemd::watchdog_interval() {
            let timer = TimerListener::interval(interval)?;
            daemon.reactor.add(Endpoint::Watchdog, timer.fd(), false)?;
            daemon.watchdog = Some(timer);
        }
    }

    info!(lan = %lan.name, ip = %lan_ip, network = %lan_network, "gatekeeper running");
    systemd::notify_ready();

    let result = daemon.event_loop();

    if deconfigure_on_exit {
        if let Err(err) = lan.deconfigure() {
            error!(%err, interface = %lan.name, "couldn't deconfigure the LAN interface");
        }
    }
    result
}

impl Daemon {
    /// Run until the listener count reaches zero.
    fn event_loop(&mut self) -> Result<()> {
        while !self.reactor.is_empty() {
            let now = Instant::now();
            self.expire(now);
            let timeout = self
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now));
            self.reactor.poll(timeout)?;
            while let Some(event) = self.reactor.next_event() {
                if event.readable {
                    self.dispatch(event.key);
                }
            }
        }
        Ok(())
    }

    /// The single time axis: the earliest deadline across every
    /// subsystem's expiration queue bounds the poll.
    fn next_deadline(&self) -> Option<Instant> {
        let mut deadline = self.dhcp.next_deadline();
        for candidate in [
            self.dns.next_deadline(),
            self.wifi.as_ref().and_then(|w| w.next_deadline()),
        ]
        .into_iter()
        .flatten()
        {
            deadline = Some(deadline.map_or(candidate, |d| d.min(candidate)));
        }
        deadline
    }

    fn expire(&mut self, now: Instant) {
        self.dhcp.expire(now);
        self.dns.expire(now);
        if let Some(wifi) = &mut self.wifi {
            wifi.expire(now);
        }
    }

    fn dispatch(&mut self, key: Endpoint) {
        match key {
            Endpoint::Signal => {
                if let Some(signal) = self.signals.take_signal() {
                    info!(%signal, "received stop signal");
                    self.begin_shutdown();
                }
            }
            Endpoint::Watchdog => {
                if let Some(watchdog) = &self.watchdog {
                    watchdog.drain();
                }
                systemd::notify_watchdog();
            }
            Endpoint::DhcpServer => self.dhcp.on_readable(),
            Endpoint::DnsServer => self.dns.on_server_readable(),
            Endpoint::DnsClient => self.dns.on_client_readable(),
            Endpoint::WifiMlme => {
                if let Some(wifi) = &mut self.wifi {
                    wifi.on_mlme_readable();
                }
            }
            Endpoint::WifiEapol => {
                if let Some(wifi) = &mut self.wifi {
                    wifi.on_eapol_readable();
                }
            }
        }
    }

    /// Cooperative, idempotent shutdown: every listener is deregistered
    /// (also invalidating events already dequeued in this batch), the
    /// firewall worker joined, the nftables artifacts removed. The loop
    /// then exits on its own.
    fn begin_shutdown(&mut self) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        systemd::notify_stopping();
        info!("stopping gatekeeper");

        let mut del = |fd| {
            if let Err(err) = self.reactor.del(fd) {
                warn!(%err, "couldn't remove listener");
            }
        };
        del(self.dns.server_fd());
        del(self.dns.client_fd());
        del(self.dhcp.fd());
        if let Some(wifi) = &self.wifi {
            del(wifi.mlme_fd());
            del(wifi.eapol_fd());
        }
        if let Some(watchdog) = &self.watchdog {
            del(watchdog.fd());
        }
        del(self.signals.fd());

        if let Some(mut wifi) = self.wifi.take() {
            wifi.stop();
        }
        if let Some(mut firewall) = self.firewall.take() {
            firewall.stop();
        }
        self.watchdog = None;
    }
}
