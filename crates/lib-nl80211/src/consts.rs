//! nl80211 commands and attributes, from linux/nl80211.h.
#![allow(missing_docs)]

pub const FAMILY_NAME: &str = "nl80211";

// Commands.
pub const CMD_GET_WIPHY: u8 = 1;
pub const CMD_NEW_WIPHY: u8 = 3;
pub const CMD_GET_INTERFACE: u8 = 5;
pub const CMD_SET_INTERFACE: u8 = 6;
pub const CMD_NEW_INTERFACE: u8 = 7;
pub const CMD_NEW_KEY: u8 = 11;
pub const CMD_SET_KEY: u8 = 10;
pub const CMD_START_AP: u8 = 15;
pub const CMD_STOP_AP: u8 = 16;
pub const CMD_SET_STATION: u8 = 18;
pub const CMD_NEW_STATION: u8 = 19;
pub const CMD_DEL_STATION: u8 = 20;
pub const CMD_SET_BSS: u8 = 25;
pub const CMD_GET_REG: u8 = 31;
pub const CMD_REGISTER_FRAME: u8 = 58;
pub const CMD_SET_CHANNEL: u8 = 65;
pub const CMD_SET_MULTICAST_TO_UNICAST: u8 = 121;

// Attributes.
pub const ATTR_WIPHY: u16 = 1;
pub const ATTR_WIPHY_NAME: u16 = 2;
pub const ATTR_IFINDEX: u16 = 3;
pub const ATTR_IFNAME: u16 = 4;
pub const ATTR_IFTYPE: u16 = 5;
pub const ATTR_MAC: u16 = 6;
pub const ATTR_BEACON_INTERVAL: u16 = 12;
pub const ATTR_DTIM_PERIOD: u16 = 13;
pub const ATTR_BEACON_HEAD: u16 = 14;
pub const ATTR_BEACON_TAIL: u16 = 15;
pub const ATTR_STA_INFO: u16 = 21;
pub const ATTR_WIPHY_BANDS: u16 = 22;
pub const ATTR_REG_ALPHA2: u16 = 33;
pub const ATTR_REG_RULES: u16 = 34;
pub const ATTR_WIPHY_FREQ: u16 = 38;
pub const ATTR_MGMT_SUBTYPE: u16 = 40;
pub const ATTR_IE: u16 = 41;
pub const ATTR_GENERATION: u16 = 45;
pub const ATTR_SUPPORTED_COMMANDS: u16 = 49;
pub const ATTR_SSID: u16 = 51;
pub const ATTR_AUTH_TYPE: u16 = 52;
pub const ATTR_REASON_CODE: u16 = 53;
pub const ATTR_CIPHER_SUITES: u16 = 56;
pub const ATTR_STA_FLAGS2: u16 = 66;
pub const ATTR_CIPHER_SUITES_PAIRWISE: u16 = 72;
pub const ATTR_CIPHER_SUITE_GROUP: u16 = 73;
pub const ATTR_WPA_VERSIONS: u16 = 74;
pub const ATTR_AKM_SUITES: u16 = 75;
pub const ATTR_KEY: u16 = 79;
pub const ATTR_FRAME_MATCH: u16 = 90;
pub const ATTR_FRAME_TYPE: u16 = 100;
pub const ATTR_SUPPORTED_IFTYPES: u16 = 32;
pub const ATTR_PRIVACY: u16 = 69;
pub const ATTR_INTERFACE_COMBINATIONS: u16 = 119;
pub const ATTR_HIDDEN_SSID: u16 = 125;
pub const ATTR_IE_PROBE_RESP: u16 = 126;
pub const ATTR_IE_ASSOC_RESP: u16 = 127;
pub const ATTR_DFS_REGION: u16 = 145;
pub const ATTR_CHANNEL_WIDTH: u16 = 158;
pub const ATTR_CENTER_FREQ1: u16 = 159;
pub const ATTR_CENTER_FREQ2: u16 = 160;
pub const ATTR_SOCKET_OWNER: u16 = 203;
pub const ATTR_MULTICAST_TO_UNICAST_ENABLED: u16 = 243;

// Band attributes.
pub const BAND_ATTR_FREQS: u16 = 1;
pub const BAND_ATTR_RATES: u16 = 2;
pub const BAND_ATTR_HT_MCS_SET: u16 = 3;
pub const BAND_ATTR_HT_CAPA: u16 = 4;
pub const BAND_ATTR_HT_AMPDU_FACTOR: u16 = 5;
pub const BAND_ATTR_HT_AMPDU_DENSITY: u16 = 6;
pub const BAND_ATTR_VHT_MCS_SET: u16 = 7;
pub const BAND_ATTR_VHT_CAPA: u16 = 8;

// Frequency attributes.
pub const FREQUENCY_ATTR_FREQ: u16 = 1;
pub const FREQUENCY_ATTR_DISABLED: u16 = 2;
pub const FREQUENCY_ATTR_NO_IR: u16 = 3;
pub const FREQUENCY_ATTR_RADAR: u16 = 5;
pub const FREQUENCY_ATTR_MAX_TX_POWER: u16 = 6;
pub const FREQUENCY_ATTR_DFS_STATE: u16 = 7;
pub const FREQUENCY_ATTR_NO_HT40_MINUS: u16 = 9;
pub const FREQUENCY_ATTR_NO_HT40_PLUS: u16 = 10;
pub const FREQUENCY_ATTR_NO_80MHZ: u16 = 11;
pub const FREQUENCY_ATTR_NO_160MHZ: u16 = 12;
pub const FREQUENCY_ATTR_INDOOR_ONLY: u16 = 14;

// Bitrate attributes.
pub const BITRATE_ATTR_RATE: u16 = 1;
pub const BITRATE_ATTR_2GHZ_SHORTPREAMBLE: u16 = 2;

// Regulatory rule attributes.
pub const REG_RULE_ATTR_FLAGS: u16 = 1;
pub const REG_RULE_ATTR_FREQ_RANGE_START: u16 = 2;
pub const REG_RULE_ATTR_FREQ_RANGE_END: u16 = 3;
pub const REG_RULE_ATTR_FREQ_RANGE_MAX_BW: u16 = 4;
pub const REG_RULE_ATTR_POWER_RULE_MAX_ANT_GAIN: u16 = 5;
pub const REG_RULE_ATTR_POWER_RULE_MAX_EIRP: u16 = 6;
pub const REG_RULE_ATTR_DFS_CAC_TIME: u16 = 7;

// Interface combination attributes.
pub const IFACE_COMB_LIMITS: u16 = 1;
pub const IFACE_COMB_MAXNUM: u16 = 2;
pub const IFACE_COMB_NUM_CHANNELS: u16 = 4;
pub const IFACE_LIMIT_MAX: u16 = 1;
pub const IFACE_LIMIT_TYPES: u16 = 2;

// NL80211_ATTR_KEY nested attributes.
pub const KEY_DATA: u16 = 1;
pub const KEY_IDX: u16 = 2;
pub const KEY_CIPHER: u16 = 3;
pub const KEY_DEFAULT: u16 = 5;
pub const KEY_DEFAULT_TYPES: u16 = 8;
pub const KEY_DEFAULT_TYPE_UNICAST: u16 = 1;
pub const KEY_DEFAULT_TYPE_MULTICAST: u16 = 2;

// Station flags (nl80211_sta_flags).
pub const STA_FLAG_AUTHORIZED: u32 = 1;
pub const STA_FLAG_SHORT_PREAMBLE: u32 = 2;
pub const STA_FLAG_WME: u32 = 3;
pub const STA_FLAG_MFP: u32 = 4;

// Interface types (nl80211_iftype).
pub const IFTYPE_STATION: u32 = 2;
pub const IFTYPE_AP: u32 = 3;

// Channel widths (nl80211_chan_width).
pub const CHAN_WIDTH_20_NOHT: u32 = 0;
pub const CHAN_WIDTH_20: u32 = 1;
pub const CHAN_WIDTH_40: u32 = 2;
pub const CHAN_WIDTH_80: u32 = 3;
pub const CHAN_WIDTH_80P80: u32 = 4;
pub const CHAN_WIDTH_160: u32 = 5;

// Bands (nl80211_band).
pub const BAND_2GHZ: u32 = 0;
pub const BAND_5GHZ: u32 = 1;

pub const AUTHTYPE_OPEN_SYSTEM: u32 = 0;
pub const HIDDEN_SSID_NOT_IN_USE: u32 = 0;
pub const WPA_VERSION_2: u32 = 2;

// RSN cipher/AKM suite selectors (00-0F-AC OUI).
pub const CIPHER_CCMP: u32 = 0x000f_ac04;
pub const AKM_PSK: u32 = 0x000f_ac02;

// 802.11 management frame subtypes used with DEL_STATION.
pub const MGMT_SUBTYPE_DISASSOC: u8 = 0x0a;
pub const MGMT_SUBTYPE_DEAUTH: u8 = 0x0c;

// 802.11 reason codes.
pub const REASON_PREV_AUTH_NOT_VALID: u16 = 2;
