//! Information elements for the beacon and for EAPOL key data.

use netcfg::MacAddr;
use nl80211::{HtCapabilities, VhtCapabilities};

// Element IDs.
pub const EID_SSID: u8 = 0;
pub const EID_SUPPORTED_RATES: u8 = 1;
pub const EID_DSSS_PARAMETER_SET: u8 = 3;
pub const EID_HT_CAPABILITIES: u8 = 45;
pub const EID_RSN: u8 = 48;
pub const EID_HT_OPERATION: u8 = 61;
pub const EID_EXTENDED_CAPABILITIES: u8 = 127;
pub const EID_VHT_CAPABILITIES: u8 = 191;
pub const EID_VHT_OPERATION: u8 = 192;
pub const EID_TX_POWER_ENVELOPE: u8 = 195;
pub const EID_VENDOR_SPECIFIC: u8 = 221;

/// Append one `id, length, payload` element.
pub fn element(out: &mut Vec<u8>, id: u8, payload: &[u8]) {
    out.push(id);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
}

/// RSNE advertising CCMP pairwise, CCMP group and PSK key management,
/// with 16 GTKSA replay counters (required by WMM). Section 9.4.2.25.
pub fn rsne() -> Vec<u8> {
    let mut payload = Vec::with_capacity(20);
    payload.extend_from_slice(&1u16.to_le_bytes()); // version
    payload.extend_from_slice(&[0x00, 0x0f, 0xac, 0x04]); // group: CCMP
    payload.extend_from_slice(&1u16.to_le_bytes()); // pairwise count
    payload.extend_from_slice(&[0x00, 0x0f, 0xac, 0x04]); // pairwise: CCMP
    payload.extend_from_slice(&1u16.to_le_bytes()); // AKM count
    payload.extend_from_slice(&[0x00, 0x0f, 0xac, 0x02]); // AKM: PSK
    payload.extend_from_slice(&0x0030u16.to_le_bytes()); // 16 GTKSA replay counters

    let mut out = Vec::with_capacity(22);
    element(&mut out, EID_RSN, &payload);
    out
}

/// The fixed 802.11 management header of a beacon frame, up to the
/// capability field.
pub fn beacon_header(ap_mac: MacAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&0x0080u16.to_le_bytes()); // frame control: beacon
    out.extend_from_slice(&0u16.to_le_bytes()); // duration
    out.extend_from_slice(MacAddr::BROADCAST.bytes()); // DA
    out.extend_from_slice(ap_mac.bytes()); // SA
    out.extend_from_slice(ap_mac.bytes()); // BSSID
    out.extend_from_slice(&0u16.to_le_bytes()); // sequence control
    out.extend_from_slice(&0u64.to_le_bytes()); // timestamp
    out.extend_from_slice(&100u16.to_le_bytes()); // beacon interval
    out.extend_from_slice(&0x0011u16.to_le_bytes()); // capability: ESS, privacy
    out
}

/// 5 GHz OFDM rates: 6, 9, 12, 18, 24, 36, 48, 54 Mb/s, 6/12/24 basic.
pub const SUPPORTED_RATES: [u8; 8] = [0x8c, 0x12, 0x98, 0x24, 0xb0, 0x48, 0x60, 0x6c];

pub fn ht_capabilities_element(out: &mut Vec<u8>, ht: &HtCapabilities) {
    let mut payload = Vec::with_capacity(26);
    payload.extend_from_slice(&ht.capa.to_le_bytes());
    payload.push(ht.ampdu_factor | (ht.ampdu_density << 2));
    payload.extend_from_slice(&ht.mcs_set);
    payload.extend_from_slice(&0u16.to_le_bytes()); // HT extended capabilities
    payload.extend_from_slice(&0u32.to_le_bytes()); // TX beamforming
    payload.push(0); // antenna selection
    element(out, EID_HT_CAPABILITIES, &payload);
}

pub fn ht_operation_element(out: &mut Vec<u8>, channel: u8) {
    let mut payload = Vec::with_capacity(22);
    payload.push(channel);
    payload.push(0x05); // secondary channel above, any channel width
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(&[0u8; 16]); // blank basic HT-MCS set
    element(out, EID_HT_OPERATION, &payload);
}

pub fn extended_capabilities_element(out: &mut Vec<u8>) {
    element(out, EID_EXTENDED_CAPABILITIES, &[0x00, 0x00, 0x00, 0x02]); // SSID list
}

pub fn vht_capabilities_element(out: &mut Vec<u8>, vht: &VhtCapabilities) {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&vht.capa.to_le_bytes());
    payload.extend_from_slice(&vht.mcs_set);
    element(out, EID_VHT_CAPABILITIES, &payload);
}

pub fn vht_operation_element(out: &mut Vec<u8>) {
    let mut payload = Vec::with_capacity(5);
    payload.push(1); // 80 MHz channel width
    payload.push(0); // center frequency segment 0 (from SET_CHANNEL)
    payload.push(0); // center frequency segment 1
    // Basic MCS set: MCS 0-7 on one spatial stream, the rest unsupported.
    payload.extend_from_slice(&0xfffcu16.to_le_bytes());
    element(out, EID_VHT_OPERATION, &payload);
}

pub fn tx_power_envelope_element(out: &mut Vec<u8>) {
    // 20/40/80 MHz at the maximum regulatory power.
    element(out, EID_TX_POWER_ENVELOPE, &[2, 127, 127, 127]);
}

/// WMM Parameter element with the standard BE/BK/VI/VO EDCA parameters.
pub fn wmm_parameter_element(out: &mut Vec<u8>) {
    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(&[0x00, 0x50, 0xf2]); // Microsoft OUI
    payload.push(2); // WMM
    payload.push(1); // parameter subtype
    payload.push(1); // version 1.0
    payload.push(0x01); // QoS info: EDCA parameter set count 1
    payload.push(0); // reserved
    // Per-AC records: ACI/AIFSN, ECWmin/max, TXOP limit.
    payload.extend_from_slice(&[0x03, 0xa4, 0x00, 0x00]); // BE: AIFSN 3
    payload.extend_from_slice(&[0x27, 0xa4, 0x00, 0x00]); // BK: AIFSN 7
    payload.extend_from_slice(&[0x42, 0x43, 0x5e, 0x00]); // VI: TXOP 94
    payload.extend_from_slice(&[0x62, 0x32, 0x2f, 0x00]); // VO: TXOP 47
    element(out, EID_VENDOR_SPECIFIC, &payload);
}

/// GTK KDE wrapped into the vendor-specific element used in EAPOL key
/// data: OUI 00-0F-AC, data type 1, key id 1.
pub fn gtk_kde(out: &mut Vec<u8>, gtk: &[u8; 16]) {
    let mut payload = Vec::with_capacity(22);
    payload.extend_from_slice(&[0x00, 0x0f, 0xac]); // OUI
    payload.push(0x01); // GTK KDE
    payload.push(0x01); // key id 1
    payload.push(0x00); // reserved
    payload.extend_from_slice(gtk);
    element(out, EID_VENDOR_SPECIFIC, &payload);
}

/// Pad EAPOL key data to the 8-byte boundary the key wrap needs: a 0xdd
/// marker followed by zeroes.
pub fn pad_key_data(data: &mut Vec<u8>) {
    if data.len() % 8 != 0 {
        data.push(0xdd);
        while data.len() % 8 != 0 {
            data.push(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsne_layout() {
        let rsne = rsne();
        assert_eq!(rsne.len(), 22);
        assert_eq!(rsne[0], EID_RSN);
        assert_eq!(rsne[1], 20);
        assert_eq!(&rsne[2..4], &[1, 0]); // version, little endian
        assert_eq!(&rsne[4..8], &[0x00, 0x0f, 0xac, 0x04]);
        assert_eq!(&rsne[14..18], &[0x00, 0x0f, 0xac, 0x02]);
    }

    #[test]
    fn beacon_header_is_36_bytes() {
        let header = beacon_header(MacAddr([2, 0, 0, 0, 0, 1]));
        assert_eq!(header.len(), 36);
        assert_eq!(&header[..2], &[0x80, 0x00]);
        assert_eq!(&header[4..10], &[0xff; 6]);
    }

    #[test]
    fn gtk_kde_layout() {
        let mut out = Vec::new();
        gtk_kde(&mut out, &[9u8; 16]);
        assert_eq!(out.len(), 24);
        assert_eq!(out[0], EID_VENDOR_SPECIFIC);
        assert_eq!(out[1], 22);
        assert_eq!(&out[2..6], &[0x00, 0x0f, 0xac, 0x01]);
        assert_eq!(out[6], 0x01); // key id 1
    }

    #[test]
    fn key_data_padding() {
        let mut data = vec![0u8; 22 + 24]; // RSNE + GTK KDE sizes
        pad_key_data(&mut data);
        assert_eq!(data.len() % 8, 0);
        assert_eq!(data[46], 0xdd);

        let mut aligned = vec![0u8; 48];
        pad_key_data(&mut aligned);
        assert_eq!(aligned.len(), 48);
    }

    #[test]
    fn wmm_element_length() {
        let mut out = Vec::new();
        wmm_parameter_element(&mut out);
        assert_eq!(out.len(), 26);
        assert_eq!(out[1], 24);
    }
}
