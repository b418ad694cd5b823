use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use netcfg::Ipv4Net;
use tracing::{debug, error};

use crate::{translate, NatTable, NfqueueSocket, NftError, NftablesHook, Translation};

#[derive(Debug, Clone, Copy)]
pub struct FirewallConfig {
    pub lan_ifindex: u32,
    pub lan_network: Ipv4Net,
    pub lan_ip: Ipv4Addr,
    pub wan_ip: Ipv4Addr,
}

/// The userspace NAT: nftables hook plus the nfqueue worker thread.
///
/// The worker owns the queue socket and the NAT table outright; the
/// reactor thread only ever clears the stop flag and joins.
pub struct Firewall {
    hook: Option<NftablesHook>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Firewall {
    pub fn start(config: FirewallConfig) -> Result<Self, NftError> {
        let hook = NftablesHook::install(config.lan_ifindex, config.lan_network, config.wan_ip)?;

        let queue = NfqueueSocket::open()?;
        queue.set_receive_timeout(Duration::from_millis(500))?;

        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();
        let worker = std::thread::Builder::new()
            .name("firewall".to_string())
            .spawn(move || worker_loop(queue, worker_running, config))
            .map_err(|e| {
                NftError::Netlink(netlink::NetlinkError::Io { call: "spawn", source: e })
            })?;

        Ok(Firewall {
            hook: Some(hook),
            running,
            worker: Some(worker),
        })
    }

    /// Stop the worker, join it and remove the nftables artifacts.
    /// Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("firewall worker panicked");
            }
        }
        self.hook.take();
    }
}

impl Drop for Firewall {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(mut queue: NfqueueSocket, running: Arc<AtomicBool>, config: FirewallConfig) {
    let mut nat = NatTable::new();
    while running.load(Ordering::SeqCst) {
        let result = {
            let queue_ref = &queue;
            let mut verdicts: Vec<(u32, Option<Vec<u8>>)> = Vec::new();
            let r = queue_ref.receive_packets(|mut packet| {
                let translation = translate(
                    &mut packet.payload,
                    &mut nat,
                    config.lan_network,
                    config.lan_ip,
                    config.wan_ip,
                );
                match translation {
                    Translation::Untouched => verdicts.push((packet.packet_id_be, None)),
                    Translation::Rewritten => {
                        verdicts.push((packet.packet_id_be, Some(packet.payload)))
                    }
                }
            });
            (r, verdicts)
        };
        let (recv_result, verdicts) = result;
        for (packet_id_be, payload) in verdicts {
            let sent = match payload {
                None => queue.verdict(packet_id_be, true),
                Some(payload) => queue.verdict_with_payload(packet_id_be, &payload),
            };
            if let Err(err) = sent {
                error!(%err, "couldn't send nfqueue verdict");
            }
        }
        if let Err(err) = recv_result {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            if recoverable(&err) {
                continue;
            }
            error!(%err, "firewall failed to receive from the kernel");
        }
    }
    debug!("firewall worker stopped");
}

/// Receive timeouts and interrupted reads just mean "check the flag".
fn recoverable(err: &NftError) -> bool {
    match err {
        NftError::Netlink(netlink::NetlinkError::Io { source, .. }) => matches!(
            source.raw_os_error(),
            Some(errno) if errno == libc::EAGAIN || errno == libc::EINTR
        ),
        _ => false,
    }
}
