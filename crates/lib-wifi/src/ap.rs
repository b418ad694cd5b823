use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::process::Command;
use std::time::{Duration, Instant};

use netcfg::{Interface, MacAddr};
use nl80211::consts::*;
use nl80211::{pick_channel, Channel, DisconnectReason, Nl80211};
use rand::RngCore;
use reactor::ExpireQueue;
use tracing::{debug, error, info, warn};

use crate::crypto::derive_pmk;
use crate::eapol::ETH_P_PAE;
use crate::elements;
use crate::handshake::{Handshake, HandshakeAction};
use crate::procscan::kill_conflicting_eapol_listeners;
use crate::WifiError;

/// Handshakes that don't complete within this window are destroyed.
const HANDSHAKE_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WifiConfig {
    /// Wireless interface to run the AP on.
    pub interface: String,
    pub ssid: String,
    pub password: String,
}

/// Keeps `wpa_supplicant` masked while the AP runs. Best effort: on
/// systems without systemd the commands just fail quietly.
struct MaskGuard {
    unit: &'static str,
}

impl MaskGuard {
    fn mask(unit: &'static str) -> MaskGuard {
        let _ = Command::new("systemctl")
            .args(["mask", "--runtime", "--now", unit])
            .status();
        MaskGuard { unit }
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        let _ = Command::new("systemctl")
            .args(["unmask", "--runtime", self.unit])
            .status();
    }
}

/// The raw `AF_PACKET` socket EAPOL frames arrive on.
struct EapolSocket {
    fd: OwnedFd,
}

impl EapolSocket {
    fn open() -> Result<EapolSocket, WifiError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                (ETH_P_PAE as u16).to_be() as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(WifiError::syscall("socket(AF_PACKET, SOCK_DGRAM, ETH_P_PAE)"));
        }
        Ok(EapolSocket { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// One frame plus the station MAC it came from, or `None` once
    /// drained.
    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, MacAddr)>, WifiError> {
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        let mut addr_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        let r = unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if r < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(WifiError::Io(err));
        }
        let mut mac = [0u8; 6];
        for (dst, src) in mac.iter_mut().zip(addr.sll_addr.iter()) {
            *dst = *src;
        }
        Ok(Some((r as usize, MacAddr(mac))))
    }

    fn send(&self, ifindex: u32, dest: MacAddr, frame: &[u8]) -> Result<(), WifiError> {
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::sa_family_t;
        addr.sll_protocol = (ETH_P_PAE as u16).to_be();
        addr.sll_ifindex = ifindex as libc::c_int;
        addr.sll_halen = 6;
        addr.sll_addr[..6].copy_from_slice(dest.bytes());
        let r = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if r < 0 {
            return Err(WifiError::syscall("sendto(AF_PACKET)"));
        }
        Ok(())
    }
}

/// One running access point: the nl80211 connection that owns it, the
/// interface, and the key material shared by every station.
pub struct AccessPoint {
    nl: Nl80211,
    pub ifindex: u32,
    pub mac: MacAddr,
    pub channel: Channel,
    psk: [u8; 32],
    gtk: [u8; 16],
}

impl AccessPoint {
    /// Bring the AP up: pick a channel, build the beacon, start beaconing,
    /// install the GTK and deauthenticate any leftover stations.
    fn start(config: &WifiConfig) -> Result<AccessPoint, WifiError> {
        let mut nl = Nl80211::connect()?;

        let iface = Interface::by_name(&config.interface)?;
        let mut info = nl.interface(iface.index)?;

        let wiphys = nl.wiphys()?;
        let wiphy = wiphys
            .iter()
            .find(|w| w.index == info.wiphy)
            .ok_or(nl80211::Nl80211Error::NoWiphy)?;
        wiphy
            .band(BAND_5GHZ)
            .ok_or(nl80211::Nl80211Error::NoBand("5 GHz"))?;

        let regulation = nl.regulation()?;
        let channel = pick_channel(wiphy, &regulation).ok_or(nl80211::Nl80211Error::NoChannel)?;
        info!(
            frequency = channel.frequency_mhz,
            width = channel.width,
            center = channel.center1_mhz,
            "selected channel"
        );

        if info.iftype != IFTYPE_AP {
            nl.set_interface_type(info.index, IFTYPE_AP)?;
            info.iftype = IFTYPE_AP;
        }

        let psk = derive_pmk(&config.password, config.ssid.as_bytes());
        let mut gtk = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut gtk);

        let band = wiphy.band(BAND_5GHZ).expect("checked above");
        let channel_number = ((channel.frequency_mhz - 5000) / 5) as u8;

        let mut beacon_head = elements::beacon_header(info.mac);
        elements::element(&mut beacon_head, elements::EID_SSID, config.ssid.as_bytes());
        elements::element(
            &mut beacon_head,
            elements::EID_SUPPORTED_RATES,
            &elements::SUPPORTED_RATES,
        );
        elements::element(
            &mut beacon_head,
            elements::EID_DSSS_PARAMETER_SET,
            &[channel_number],
        );

        let mut beacon_tail = elements::rsne();
        if let Some(ht) = &band.ht {
            elements::ht_capabilities_element(&mut beacon_tail, ht);
            elements::ht_operation_element(&mut beacon_tail, channel_number);
        }
        elements::extended_capabilities_element(&mut beacon_tail);
        if let Some(vht) = &band.vht {
            elements::vht_capabilities_element(&mut beacon_tail, vht);
            elements::vht_operation_element(&mut beacon_tail);
        }
        elements::tx_power_envelope_element(&mut beacon_tail);
        elements::wmm_parameter_element(&mut beacon_tail);

        let mut extra_ies = Vec::new();
        elements::extended_capabilities_element(&mut extra_ies);

        iface.bring_up()?;
        nl.set_channel(info.index, &channel)?;
        nl.start_ap(
            info.index,
            &beacon_head,
            &beacon_tail,
            100, // beacon interval
            2,   // DTIM period
            config.ssid.as_bytes(),
            true, // privacy
            &extra_ies,
            &extra_ies,
            &extra_ies,
            true, // socket owner: the AP dies with this socket
        )?;

        // Clean slate: whoever thinks it is still associated must
        // re-authenticate.
        nl.del_station(
            info.index,
            Some(MacAddr::BROADCAST),
            Some(DisconnectReason::Deauthentication {
                reason_code: REASON_PREV_AUTH_NOT_VALID,
            }),
        )?;

        nl.new_key(info.index, None, &gtk, CIPHER_CCMP, 1)?;
        nl.set_key(info.index, 1, true, true, true)?;

        Ok(AccessPoint {
            nl,
            ifindex: info.index,
            mac: info.mac,
            channel,
            psk,
            gtk,
        })
    }
}

/// The Wi-Fi subsystem: the AP, the EAPOL socket, the MLME notification
/// socket and the per-station handshakes.
pub struct WifiService {
    ap: AccessPoint,
    mlme: Nl80211,
    eapol: EapolSocket,
    handshakes: HashMap<MacAddr, Handshake>,
    expiry: ExpireQueue<MacAddr>,
    _wpa_supplicant_mask: MaskGuard,
}

impl WifiService {
    pub fn start(config: WifiConfig) -> Result<Self, WifiError> {
        let mask = MaskGuard::mask("wpa_supplicant");

        kill_conflicting_eapol_listeners()?;
        let eapol = EapolSocket::open()?;

        let mlme = Nl80211::connect()?;
        mlme.join_mlme()?;

        let ap = AccessPoint::start(&config)?;
        info!(ssid = %config.ssid, interface = %config.interface, "access point running");

        Ok(WifiService {
            ap,
            mlme,
            eapol,
            handshakes: HashMap::new(),
            expiry: ExpireQueue::new(),
            _wpa_supplicant_mask: mask,
        })
    }

    pub fn mlme_fd(&self) -> RawFd {
        self.mlme.fd()
    }

    pub fn eapol_fd(&self) -> RawFd {
        self.eapol.fd()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.expiry.next_deadline()
    }

    /// Destroy handshakes that did not complete in time.
    pub fn expire(&mut self, now: Instant) {
        while let Some(mac) = self.expiry.pop_expired(now) {
            if self.handshakes.remove(&mac).is_some() {
                debug!(station = %mac, "handshake timed out");
            }
        }
    }

    /// NEW_STATION etc. arriving on the MLME multicast group.
    pub fn on_mlme_readable(&mut self) {
        self.expire(Instant::now());
        let mut events = Vec::new();
        let result = self.mlme.receive_notifications(|cmd, attrs| {
            if cmd == CMD_NEW_STATION {
                let mac = attrs
                    .get(ATTR_MAC)
                    .filter(|m| m.len() >= 6)
                    .map(|m| MacAddr(m[..6].try_into().unwrap()));
                let ifindex = attrs.get_u32(ATTR_IFINDEX);
                match (mac, ifindex) {
                    (Some(mac), Some(ifindex)) => events.push((mac, ifindex)),
                    _ => warn!("NEW_STATION without MAC or ifindex"),
                }
            }
            Ok(())
        });
        if let Err(err) = result {
            error!(%err, "MLME receive failed");
        }
        for (mac, ifindex) in events {
            if let Err(err) = self.on_new_station(ifindex, mac) {
                error!(%err, station = %mac, "couldn't start handshake");
            }
        }
    }

    /// A station associated: strip its flags, allocate a handshake and
    /// send message 1/4.
    fn on_new_station(&mut self, ifindex: u32, mac: MacAddr) -> Result<(), WifiError> {
        if ifindex != self.ap.ifindex {
            return Ok(());
        }
        self.ap.nl.set_station(
            ifindex,
            mac,
            &[],
            &[
                STA_FLAG_AUTHORIZED,
                STA_FLAG_SHORT_PREAMBLE,
                STA_FLAG_WME,
                STA_FLAG_MFP,
            ],
        )?;

        let mut anonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut anonce);
        let handshake = Handshake::new(anonce);
        let msg1 = handshake.message_1();
        self.handshakes.insert(mac, handshake);
        self.expiry.update(mac, Instant::now() + HANDSHAKE_TTL);

        self.eapol.send(self.ap.ifindex, mac, &msg1)?;
        debug!(station = %mac, "sent handshake 1/4");
        Ok(())
    }

    /// EAPOL frames from stations working through the handshake.
    pub fn on_eapol_readable(&mut self) {
        self.expire(Instant::now());
        let mut buf = [0u8; 2048];
        loop {
            match self.eapol.recv(&mut buf) {
                Ok(Some((len, mac))) => {
                    if let Err(err) = self.handle_eapol(&buf[..len], mac) {
                        error!(%err, station = %mac, "handshake failed");
                        self.handshakes.remove(&mac);
                        self.expiry.remove(&mac);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!(%err, "EAPOL recv failed");
                    break;
                }
            }
        }
    }

    fn handle_eapol(&mut self, frame: &[u8], mac: MacAddr) -> Result<(), WifiError> {
        let Some(handshake) = self.handshakes.get_mut(&mac) else {
            return Err(WifiError::UnknownStation(mac));
        };
        let action = handshake.handle_frame(frame, &self.ap.psk, self.ap.mac, mac, &self.ap.gtk)?;
        match action {
            HandshakeAction::Reply(msg3) => {
                self.expiry.update(mac, Instant::now() + HANDSHAKE_TTL);
                self.eapol.send(self.ap.ifindex, mac, &msg3)?;
                debug!(station = %mac, "sent handshake 3/4");
            }
            HandshakeAction::Install { tk } => {
                self.ap
                    .nl
                    .new_key(self.ap.ifindex, Some(mac), &tk, CIPHER_CCMP, 0)?;
                self.ap
                    .nl
                    .set_station(self.ap.ifindex, mac, &[STA_FLAG_AUTHORIZED], &[])?;
                self.handshakes.remove(&mac);
                self.expiry.remove(&mac);
                info!(station = %mac, "station authorized");
            }
        }
        Ok(())
    }

    /// Tear the AP down: destroy the handshakes first, then stop
    /// beaconing.
    pub fn stop(&mut self) {
        self.handshakes.clear();
        self.expiry.clear();
        if let Err(err) = self.ap.nl.stop_ap(self.ap.ifindex) {
            warn!(%err, "couldn't stop the AP cleanly");
        }
    }
}
