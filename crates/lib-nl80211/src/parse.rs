//! Parsers turning nl80211's nested attribute trees into typed records.

use netcfg::MacAddr;
use netlink::{AttrSet, NestedIter};

use crate::consts::*;
use crate::types::*;

fn ne_u16(payload: &[u8]) -> u16 {
    payload
        .get(..2)
        .map_or(0, |b| u16::from_ne_bytes(b.try_into().unwrap()))
}

fn ne_u32(payload: &[u8]) -> u32 {
    payload
        .get(..4)
        .map_or(0, |b| u32::from_ne_bytes(b.try_into().unwrap()))
}

fn c_string(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

fn parse_bitrate(payload: &[u8]) -> Bitrate {
    let mut bitrate = Bitrate::default();
    for (atype, data) in NestedIter::new(payload) {
        match atype {
            BITRATE_ATTR_RATE => bitrate.rate = ne_u32(data),
            BITRATE_ATTR_2GHZ_SHORTPREAMBLE => bitrate.short_preamble = true,
            _ => {}
        }
    }
    bitrate
}

fn parse_frequency(payload: &[u8]) -> Frequency {
    let mut freq = Frequency::default();
    for (atype, data) in NestedIter::new(payload) {
        match atype {
            FREQUENCY_ATTR_FREQ => freq.mhz = ne_u32(data),
            FREQUENCY_ATTR_DISABLED => freq.disabled = true,
            FREQUENCY_ATTR_NO_IR => freq.no_ir = true,
            FREQUENCY_ATTR_RADAR => freq.radar = true,
            FREQUENCY_ATTR_MAX_TX_POWER => freq.max_tx_power = ne_u32(data),
            FREQUENCY_ATTR_NO_HT40_MINUS => freq.no_ht40_minus = true,
            FREQUENCY_ATTR_NO_HT40_PLUS => freq.no_ht40_plus = true,
            FREQUENCY_ATTR_NO_80MHZ => freq.no_80mhz = true,
            FREQUENCY_ATTR_NO_160MHZ => freq.no_160mhz = true,
            FREQUENCY_ATTR_INDOOR_ONLY => freq.indoor_only = true,
            _ => {}
        }
    }
    freq
}

fn parse_band(band_id: u16, payload: &[u8]) -> Band {
    let mut band = Band {
        band_id: band_id as u32,
        ..Band::default()
    };
    let mut ht = HtCapabilities::default();
    let mut have_ht = false;
    let mut vht = VhtCapabilities::default();
    let mut have_vht = false;
    for (atype, data) in NestedIter::new(payload) {
        match atype {
            BAND_ATTR_FREQS => {
                for (_, freq_attrs) in NestedIter::new(data) {
                    band.frequencies.push(parse_frequency(freq_attrs));
                }
            }
            BAND_ATTR_RATES => {
                for (_, rate_attrs) in NestedIter::new(data) {
                    band.bitrates.push(parse_bitrate(rate_attrs));
                }
            }
            BAND_ATTR_HT_MCS_SET => {
                if data.len() >= 16 {
                    ht.mcs_set.copy_from_slice(&data[..16]);
                    have_ht = true;
                }
            }
            BAND_ATTR_HT_CAPA => {
                ht.capa = ne_u16(data);
                have_ht = true;
            }
            BAND_ATTR_HT_AMPDU_FACTOR => {
                ht.ampdu_factor = data.first().copied().unwrap_or(0);
            }
            BAND_ATTR_HT_AMPDU_DENSITY => {
                ht.ampdu_density = data.first().copied().unwrap_or(0);
            }
            BAND_ATTR_VHT_MCS_SET => {
                if data.len() >= 8 {
                    vht.mcs_set.copy_from_slice(&data[..8]);
                    have_vht = true;
                }
            }
            BAND_ATTR_VHT_CAPA => {
                vht.capa = ne_u32(data);
                have_vht = true;
            }
            _ => {}
        }
    }
    if have_ht {
        band.ht = Some(ht);
    }
    if have_vht {
        band.vht = Some(vht);
    }
    band
}

/// Merge one GET_WIPHY dump message into `wiphy`. Wiphy dumps arrive as a
/// series of messages all carrying the same index.
pub fn merge_wiphy(wiphy: &mut Wiphy, attrs: &AttrSet) {
    if let Some(index) = attrs.get_u32(ATTR_WIPHY) {
        wiphy.index = index;
    }
    if let Some(name) = attrs.get(ATTR_WIPHY_NAME) {
        wiphy.name = c_string(name);
    }
    if let Some(bands) = attrs.get(ATTR_WIPHY_BANDS) {
        for (band_id, band_attrs) in NestedIter::new(bands) {
            wiphy.bands.push(parse_band(band_id, band_attrs));
        }
    }
    if let Some(suites) = attrs.get(ATTR_CIPHER_SUITES) {
        wiphy.cipher_suites = suites
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
            .collect();
    }
    if let Some(iftypes) = attrs.get(ATTR_SUPPORTED_IFTYPES) {
        for (iftype, _) in NestedIter::new(iftypes) {
            wiphy.supported_iftypes.push(iftype as u32);
        }
    }
    if let Some(commands) = attrs.get(ATTR_SUPPORTED_COMMANDS) {
        for (_, data) in NestedIter::new(commands) {
            wiphy.supported_commands.push(ne_u32(data));
        }
    }
    if let Some(combinations) = attrs.get(ATTR_INTERFACE_COMBINATIONS) {
        for (_, comb_attrs) in NestedIter::new(combinations) {
            let mut combination = InterfaceCombination::default();
            for (atype, data) in NestedIter::new(comb_attrs) {
                match atype {
                    IFACE_COMB_MAXNUM => combination.max_interfaces = ne_u32(data),
                    IFACE_COMB_NUM_CHANNELS => combination.num_channels = ne_u32(data),
                    _ => {}
                }
            }
            wiphy.interface_combinations.push(combination);
        }
    }
}

pub fn parse_interface(attrs: &AttrSet) -> InterfaceInfo {
    let mut info = InterfaceInfo::default();
    if let Some(index) = attrs.get_u32(ATTR_IFINDEX) {
        info.index = index;
    }
    if let Some(name) = attrs.get(ATTR_IFNAME) {
        info.name = c_string(name);
    }
    if let Some(wiphy) = attrs.get_u32(ATTR_WIPHY) {
        info.wiphy = wiphy;
    }
    if let Some(iftype) = attrs.get_u32(ATTR_IFTYPE) {
        info.iftype = iftype;
    }
    if let Some(mac) = attrs.get(ATTR_MAC) {
        if mac.len() >= 6 {
            info.mac = MacAddr(mac[..6].try_into().unwrap());
        }
    }
    info
}

pub fn parse_regulation(reg: &mut Regulation, attrs: &AttrSet) {
    if let Some(alpha2) = attrs.get(ATTR_REG_ALPHA2) {
        if alpha2.len() >= 2 {
            reg.alpha2 = [alpha2[0], alpha2[1]];
        }
    }
    if let Some(region) = attrs.get_u8(ATTR_DFS_REGION) {
        reg.dfs_region = region;
    }
    if let Some(rules) = attrs.get(ATTR_REG_RULES) {
        for (_, rule_attrs) in NestedIter::new(rules) {
            let mut rule = RegRule::default();
            for (atype, data) in NestedIter::new(rule_attrs) {
                match atype {
                    REG_RULE_ATTR_FLAGS => rule.flags = ne_u32(data),
                    REG_RULE_ATTR_FREQ_RANGE_START => rule.start_khz = ne_u32(data),
                    REG_RULE_ATTR_FREQ_RANGE_END => rule.end_khz = ne_u32(data),
                    REG_RULE_ATTR_FREQ_RANGE_MAX_BW => rule.max_bandwidth_khz = ne_u32(data),
                    REG_RULE_ATTR_POWER_RULE_MAX_EIRP => rule.max_eirp_mbm = ne_u32(data),
                    REG_RULE_ATTR_POWER_RULE_MAX_ANT_GAIN | REG_RULE_ATTR_DFS_CAC_TIME => {}
                    _ => {}
                }
            }
            reg.rules.push(rule);
        }
    }
}
