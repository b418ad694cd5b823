use std::collections::BTreeMap;
use std::os::fd::RawFd;

use netcfg::MacAddr;
use netlink::consts::NLM_F_ACK;
use netlink::{AttrSet, GenlFamily, NetlinkError};

use crate::consts::*;
use crate::parse;
use crate::types::{Channel, InterfaceInfo, Regulation, Wiphy};
use crate::Nl80211Error;

/// How a station is kicked off the BSS.
#[derive(Debug, Clone, Copy)]
pub enum DisconnectReason {
    Deauthentication { reason_code: u16 },
    Disassociation { reason_code: u16 },
}

/// One connection to the nl80211 generic netlink family.
pub struct Nl80211 {
    family: GenlFamily,
}

impl Nl80211 {
    pub fn connect() -> Result<Self, Nl80211Error> {
        Ok(Nl80211 { family: GenlFamily::resolve(FAMILY_NAME)? })
    }

    pub fn fd(&self) -> RawFd {
        self.family.fd()
    }

    /// Join the MLME multicast group to receive NEW_STATION/DEL_STATION
    /// notifications.
    pub fn join_mlme(&self) -> Result<(), Nl80211Error> {
        self.family.add_membership("mlme").map_err(Nl80211Error::from)
    }

    /// Dispatch queued notifications; `callback` gets the command and
    /// attributes of each.
    pub fn receive_notifications<F>(&self, callback: F) -> Result<(), Nl80211Error>
    where
        F: FnMut(u8, &AttrSet) -> Result<(), NetlinkError>,
    {
        self.family
            .receive_notifications(callback)
            .map_err(Nl80211Error::from)
    }

    /// Enumerate all radios. Wiphy dumps arrive split over several
    /// messages per radio; they are merged by index.
    pub fn wiphys(&mut self) -> Result<Vec<Wiphy>, Nl80211Error> {
        let mut by_index: BTreeMap<u32, Wiphy> = BTreeMap::new();
        self.family.dump(CMD_GET_WIPHY, |_| {}, |attrs| {
            if let Some(index) = attrs.get_u32(ATTR_WIPHY) {
                let wiphy = by_index.entry(index).or_default();
                parse::merge_wiphy(wiphy, attrs);
            }
            Ok(())
        })?;
        Ok(by_index.into_values().collect())
    }

    pub fn interfaces(&mut self) -> Result<Vec<InterfaceInfo>, Nl80211Error> {
        let mut out = Vec::new();
        self.family.dump(CMD_GET_INTERFACE, |_| {}, |attrs| {
            out.push(parse::parse_interface(attrs));
            Ok(())
        })?;
        Ok(out)
    }

    pub fn interface(&mut self, ifindex: u32) -> Result<InterfaceInfo, Nl80211Error> {
        self.interfaces()?
            .into_iter()
            .find(|iface| iface.index == ifindex)
            .ok_or(Nl80211Error::NoSuchInterface(ifindex))
    }

    pub fn regulation(&mut self) -> Result<Regulation, Nl80211Error> {
        let mut reg = Regulation::default();
        self.family.query(CMD_GET_REG, |_| {}, |attrs| {
            parse::parse_regulation(&mut reg, attrs);
            Ok(())
        })?;
        Ok(reg)
    }

    pub fn set_interface_type(&mut self, ifindex: u32, iftype: u32) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_SET_INTERFACE, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        msg.attr_u32(ATTR_IFTYPE, iftype);
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    /// Subscribe to a management frame subtype on this interface.
    pub fn register_frame(&mut self, ifindex: u32, frame_type: u16) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_REGISTER_FRAME, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        msg.attr_u16(ATTR_FRAME_TYPE, frame_type);
        msg.attr(ATTR_FRAME_MATCH, &[]);
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    /// Kick a station; `mac` of `None` addresses every station.
    pub fn del_station(
        &mut self,
        ifindex: u32,
        mac: Option<MacAddr>,
        reason: Option<DisconnectReason>,
    ) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_DEL_STATION, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        if let Some(mac) = mac {
            msg.attr(ATTR_MAC, mac.bytes());
        }
        if let Some(reason) = reason {
            let (subtype, reason_code) = match reason {
                DisconnectReason::Deauthentication { reason_code } => {
                    (MGMT_SUBTYPE_DEAUTH, reason_code)
                }
                DisconnectReason::Disassociation { reason_code } => {
                    (MGMT_SUBTYPE_DISASSOC, reason_code)
                }
            };
            msg.attr_u8(ATTR_MGMT_SUBTYPE, subtype);
            msg.attr_u16(ATTR_REASON_CODE, reason_code);
        }
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    /// See nl80211_parse_chandef in the kernel's nl80211.c.
    pub fn set_channel(&mut self, ifindex: u32, channel: &Channel) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_SET_CHANNEL, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        msg.attr_u32(ATTR_WIPHY_FREQ, channel.frequency_mhz);
        msg.attr_u32(ATTR_CHANNEL_WIDTH, channel.width);
        if matches!(
            channel.width,
            CHAN_WIDTH_40 | CHAN_WIDTH_80 | CHAN_WIDTH_80P80 | CHAN_WIDTH_160
        ) {
            msg.attr_u32(ATTR_CENTER_FREQ1, channel.center1_mhz);
            if channel.width == CHAN_WIDTH_80P80 {
                if let Some(center2) = channel.center2_mhz {
                    msg.attr_u32(ATTR_CENTER_FREQ2, center2);
                }
            }
        }
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn start_ap(
        &mut self,
        ifindex: u32,
        beacon_head: &[u8],
        beacon_tail: &[u8],
        beacon_interval: u32,
        dtim_period: u32,
        ssid: &[u8],
        privacy: bool,
        ie: &[u8],
        ie_probe_resp: &[u8],
        ie_assoc_resp: &[u8],
        socket_owner: bool,
    ) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_START_AP, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        msg.attr(ATTR_BEACON_HEAD, beacon_head);
        msg.attr(ATTR_BEACON_TAIL, beacon_tail);
        msg.attr_u32(ATTR_BEACON_INTERVAL, beacon_interval);
        msg.attr_u32(ATTR_DTIM_PERIOD, dtim_period);
        msg.attr(ATTR_SSID, ssid);
        msg.attr_u32(ATTR_HIDDEN_SSID, HIDDEN_SSID_NOT_IN_USE);
        if privacy {
            msg.attr_flag(ATTR_PRIVACY);
        }
        msg.attr_u32(ATTR_AUTH_TYPE, AUTHTYPE_OPEN_SYSTEM);
        msg.attr_u32(ATTR_WPA_VERSIONS, WPA_VERSION_2);
        msg.attr(ATTR_AKM_SUITES, &AKM_PSK.to_ne_bytes());
        msg.attr(ATTR_CIPHER_SUITES_PAIRWISE, &CIPHER_CCMP.to_ne_bytes());
        msg.attr_u32(ATTR_CIPHER_SUITE_GROUP, CIPHER_CCMP);
        msg.attr(ATTR_IE, ie);
        msg.attr(ATTR_IE_PROBE_RESP, ie_probe_resp);
        msg.attr(ATTR_IE_ASSOC_RESP, ie_assoc_resp);
        if socket_owner {
            // The kernel tears the AP down if this socket closes.
            msg.attr_flag(ATTR_SOCKET_OWNER);
        }
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    pub fn stop_ap(&mut self, ifindex: u32) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_STOP_AP, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    pub fn set_bss(
        &mut self,
        ifindex: u32,
        cts_protection: bool,
        short_preamble: bool,
        ht_opmode: u16,
        ap_isolate: bool,
        basic_rates: &[u8],
    ) -> Result<(), Nl80211Error> {
        const ATTR_BSS_CTS_PROT: u16 = 28;
        const ATTR_BSS_SHORT_PREAMBLE: u16 = 29;
        const ATTR_BSS_BASIC_RATES: u16 = 36;
        const ATTR_BSS_HT_OPMODE: u16 = 108;
        const ATTR_AP_ISOLATE: u16 = 95;

        let (mut msg, m) = self.family.request(CMD_SET_BSS, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        msg.attr_u8(ATTR_BSS_CTS_PROT, cts_protection as u8);
        msg.attr_u8(ATTR_BSS_SHORT_PREAMBLE, short_preamble as u8);
        msg.attr_u16(ATTR_BSS_HT_OPMODE, ht_opmode);
        msg.attr_u8(ATTR_AP_ISOLATE, ap_isolate as u8);
        msg.attr(ATTR_BSS_BASIC_RATES, basic_rates);
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    pub fn set_multicast_to_unicast(
        &mut self,
        ifindex: u32,
        enable: bool,
    ) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_SET_MULTICAST_TO_UNICAST, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        if enable {
            msg.attr_flag(ATTR_MULTICAST_TO_UNICAST_ENABLED);
        }
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    /// Install key material; a pairwise key carries the station MAC, the
    /// GTK doesn't.
    pub fn new_key(
        &mut self,
        ifindex: u32,
        mac: Option<MacAddr>,
        key_data: &[u8],
        cipher: u32,
        key_index: u8,
    ) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_NEW_KEY, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        if let Some(mac) = mac {
            msg.attr(ATTR_MAC, mac.bytes());
        }
        let key = msg.begin_nested(ATTR_KEY);
        msg.attr(KEY_DATA, key_data);
        msg.attr_u32(KEY_CIPHER, cipher);
        msg.attr_u8(KEY_IDX, key_index);
        msg.end_nested(key);
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    /// Mark a key index as the default for unicast and/or multicast.
    pub fn set_key(
        &mut self,
        ifindex: u32,
        key_index: u8,
        default: bool,
        default_unicast: bool,
        default_multicast: bool,
    ) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_SET_KEY, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        let key = msg.begin_nested(ATTR_KEY);
        msg.attr_u8(KEY_IDX, key_index);
        if default {
            msg.attr_flag(KEY_DEFAULT);
        }
        let types = msg.begin_nested(KEY_DEFAULT_TYPES);
        if default_unicast {
            msg.attr_flag(KEY_DEFAULT_TYPE_UNICAST);
        }
        if default_multicast {
            msg.attr_flag(KEY_DEFAULT_TYPE_MULTICAST);
        }
        msg.end_nested(types);
        msg.end_nested(key);
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }

    /// Update station flags: `set` flags are raised, `clear` flags are
    /// lowered, everything else is left alone.
    pub fn set_station(
        &mut self,
        ifindex: u32,
        mac: MacAddr,
        set: &[u32],
        clear: &[u32],
    ) -> Result<(), Nl80211Error> {
        let (mut msg, m) = self.family.request(CMD_SET_STATION, NLM_F_ACK);
        msg.attr_u32(ATTR_IFINDEX, ifindex);
        msg.attr(ATTR_MAC, mac.bytes());
        // struct nl80211_sta_flag_update { mask, set }.
        let mut mask = 0u32;
        let mut set_bits = 0u32;
        for flag in set {
            mask |= 1 << flag;
            set_bits |= 1 << flag;
        }
        for flag in clear {
            mask |= 1 << flag;
        }
        let mut update = [0u8; 8];
        update[..4].copy_from_slice(&mask.to_ne_bytes());
        update[4..].copy_from_slice(&set_bits.to_ne_bytes());
        msg.attr(ATTR_STA_FLAGS2, &update);
        msg.finish(m);
        self.family.request_ack(msg)?;
        Ok(())
    }
}
