//! Finding other processes that hold an `ETH_P_PAE` packet socket.
//!
//! A running `wpa_supplicant` would race this daemon for EAPOL frames, so
//! any conflicting holder is killed before the AP binds its own socket.

use std::collections::HashSet;
use std::fs;

use tracing::info;

use crate::eapol::ETH_P_PAE;
use crate::WifiError;

/// Socket inodes of every ETH_P_PAE packet socket on the system, from
/// `/proc/net/packet`.
fn pae_socket_inodes() -> Result<HashSet<u64>, WifiError> {
    let content = fs::read_to_string("/proc/net/packet")?;
    let mut inodes = HashSet::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // sk RefCnt Type Proto Iface R Rmem User Inode
        let (Some(proto), Some(inode)) = (fields.get(3), fields.get(8)) else {
            continue;
        };
        if u32::from_str_radix(proto, 16) == Ok(ETH_P_PAE as u32) {
            if let Ok(inode) = inode.parse() {
                inodes.insert(inode);
            }
        }
    }
    Ok(inodes)
}

/// Pids whose fd table references one of `inodes`.
fn pids_holding(inodes: &HashSet<u64>) -> Vec<u32> {
    let mut pids = Vec::new();
    let Ok(proc_entries) = fs::read_dir("/proc") else {
        return pids;
    };
    for entry in proc_entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            let Ok(target) = fs::read_link(fd.path()) else {
                continue;
            };
            let target = target.to_string_lossy();
            let Some(inode) = target
                .strip_prefix("socket:[")
                .and_then(|s| s.strip_suffix(']'))
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            if inodes.contains(&inode) {
                pids.push(pid);
                break;
            }
        }
    }
    pids
}

fn process_name(pid: u32) -> String {
    fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "?".to_string())
}

/// Kill every other process holding an ETH_P_PAE packet socket. The
/// typical conflict is `wpa_supplicant`. Erroring out when the holder is
/// this very process guards against killing ourselves.
pub fn kill_conflicting_eapol_listeners() -> Result<(), WifiError> {
    let inodes = pae_socket_inodes()?;
    if inodes.is_empty() {
        return Ok(());
    }
    let pids = pids_holding(&inodes);
    let own_pid = std::process::id();
    if pids.contains(&own_pid) {
        return Err(WifiError::ListenerConflict);
    }
    for pid in pids {
        info!(pid, name = %process_name(pid), "killing conflicting EAPOL listener");
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    Ok(())
}
