use netcfg::MacAddr;

#[derive(Debug, Clone, Default)]
pub struct Bitrate {
    /// Bitrate in units of 100 kbps.
    pub rate: u32,
    /// Short preamble supported in the 2.4 GHz band.
    pub short_preamble: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Frequency {
    /// Center frequency in MHz.
    pub mhz: u32,
    /// Disabled in the current regulatory domain.
    pub disabled: bool,
    /// No mechanisms that initiate radiation are permitted, which rules
    /// out beaconing.
    pub no_ir: bool,
    /// Radar detection is mandatory here.
    pub radar: bool,
    pub indoor_only: bool,
    pub no_ht40_minus: bool,
    pub no_ht40_plus: bool,
    pub no_80mhz: bool,
    pub no_160mhz: bool,
    /// Maximum transmission power in mBm (100 * dBm).
    pub max_tx_power: u32,
}

/// HT capabilities as advertised per band, the raw ingredients of the HT
/// Capabilities information element.
#[derive(Debug, Clone, Default)]
pub struct HtCapabilities {
    pub capa: u16,
    pub ampdu_factor: u8,
    pub ampdu_density: u8,
    /// 16-byte MCS set as defined in 802.11n.
    pub mcs_set: [u8; 16],
}

#[derive(Debug, Clone, Default)]
pub struct VhtCapabilities {
    pub capa: u32,
    /// struct ieee80211_vht_mcs_info.
    pub mcs_set: [u8; 8],
}

#[derive(Debug, Clone, Default)]
pub struct Band {
    /// nl80211_band id of this band.
    pub band_id: u32,
    pub bitrates: Vec<Bitrate>,
    pub frequencies: Vec<Frequency>,
    pub ht: Option<HtCapabilities>,
    pub vht: Option<VhtCapabilities>,
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceCombination {
    pub max_interfaces: u32,
    pub num_channels: u32,
}

/// One physical radio.
#[derive(Debug, Clone, Default)]
pub struct Wiphy {
    pub index: u32,
    pub name: String,
    pub bands: Vec<Band>,
    pub cipher_suites: Vec<u32>,
    pub supported_iftypes: Vec<u32>,
    pub supported_commands: Vec<u32>,
    pub interface_combinations: Vec<InterfaceCombination>,
}

impl Wiphy {
    pub fn band(&self, band_id: u32) -> Option<&Band> {
        self.bands.iter().find(|band| band.band_id == band_id)
    }
}

/// One virtual interface on a wiphy.
#[derive(Debug, Clone, Default)]
pub struct InterfaceInfo {
    pub index: u32,
    pub name: String,
    pub wiphy: u32,
    pub iftype: u32,
    pub mac: MacAddr,
}

#[derive(Debug, Clone, Default)]
pub struct RegRule {
    pub flags: u32,
    pub start_khz: u32,
    pub end_khz: u32,
    pub max_bandwidth_khz: u32,
    pub max_eirp_mbm: u32,
}

/// The active regulatory domain.
#[derive(Debug, Clone, Default)]
pub struct Regulation {
    pub alpha2: [u8; 2],
    pub dfs_region: u8,
    pub rules: Vec<RegRule>,
}

impl Regulation {
    /// Whether a transmission centered on `center_mhz` spanning
    /// `bandwidth_mhz` fits entirely inside contiguous rules that each
    /// allow at least that bandwidth.
    pub fn permits(&self, center_mhz: u32, bandwidth_mhz: u32) -> bool {
        let low = center_mhz * 1000 - bandwidth_mhz * 500;
        let high = center_mhz * 1000 + bandwidth_mhz * 500;
        let bandwidth_khz = bandwidth_mhz * 1000;

        let Some(first) = self
            .rules
            .iter()
            .position(|r| r.start_khz <= low && r.end_khz >= low)
        else {
            return false;
        };
        let Some(last) = self
            .rules
            .iter()
            .rposition(|r| r.start_khz <= high && r.end_khz >= high)
        else {
            return false;
        };
        if last < first {
            return false;
        }
        for i in first..=last {
            if i > first && self.rules[i].start_khz != self.rules[i - 1].end_khz {
                // A hole in the regulated range.
                return false;
            }
            if self.rules[i].max_bandwidth_khz < bandwidth_khz {
                return false;
            }
        }
        true
    }
}

/// One transmittable channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    /// nl80211_chan_width.
    pub width: u32,
    /// Control channel frequency in MHz.
    pub frequency_mhz: u32,
    /// First segment center frequency (40 MHz and up).
    pub center1_mhz: u32,
    /// Second segment center for 80+80 MHz.
    pub center2_mhz: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn etsi_5ghz() -> Regulation {
        Regulation {
            alpha2: *b"PL",
            dfs_region: 1,
            rules: vec![
                RegRule {
                    start_khz: 5_170_000,
                    end_khz: 5_250_000,
                    max_bandwidth_khz: 80_000,
                    ..RegRule::default()
                },
                RegRule {
                    start_khz: 5_250_000,
                    end_khz: 5_330_000,
                    max_bandwidth_khz: 80_000,
                    ..RegRule::default()
                },
                RegRule {
                    start_khz: 5_490_000,
                    end_khz: 5_710_000,
                    max_bandwidth_khz: 160_000,
                    ..RegRule::default()
                },
            ],
        }
    }

    #[test]
    fn permits_inside_one_rule() {
        let reg = etsi_5ghz();
        assert!(reg.permits(5_530, 80)); // 5490..5570, inside the third rule
        assert!(reg.permits(5_500, 20));
    }

    #[test]
    fn permits_across_contiguous_rules() {
        let reg = etsi_5ghz();
        // 5210..5290 spans the first two rules, which touch at 5250.
        assert!(reg.permits(5_250, 80));
    }

    #[test]
    fn rejects_unregulated_and_holes() {
        let reg = etsi_5ghz();
        // 5330..5490 is a hole.
        assert!(!reg.permits(5_410, 160));
        // Entirely outside.
        assert!(!reg.permits(2_437, 20));
    }

    #[test]
    fn rejects_rules_too_narrow() {
        let mut reg = etsi_5ghz();
        reg.rules[2].max_bandwidth_khz = 40_000;
        assert!(!reg.permits(5_530, 80));
        assert!(reg.permits(5_530, 40));
    }
}
