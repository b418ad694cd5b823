use crate::consts::*;
use crate::types::{Channel, Regulation, Wiphy};

impl Wiphy {
    /// Every `(frequency, width)` combination this radio may transmit on
    /// under `reg`: for each candidate, all 20 MHz slices covering the
    /// requested bandwidth must fall inside contiguous, sufficiently wide
    /// rules.
    pub fn channels(&self, reg: &Regulation) -> Vec<Channel> {
        let mut out = Vec::new();
        for band in &self.bands {
            for freq in &band.frequencies {
                if freq.disabled || freq.no_ir {
                    continue;
                }
                if !reg.permits(freq.mhz, 20) {
                    continue;
                }
                out.push(Channel {
                    width: CHAN_WIDTH_20_NOHT,
                    frequency_mhz: freq.mhz,
                    center1_mhz: freq.mhz,
                    center2_mhz: None,
                });
                if band.ht.is_none() {
                    continue;
                }
                out.push(Channel {
                    width: CHAN_WIDTH_20,
                    frequency_mhz: freq.mhz,
                    center1_mhz: freq.mhz,
                    center2_mhz: None,
                });
                if !freq.no_ht40_minus && reg.permits(freq.mhz - 10, 40) {
                    out.push(Channel {
                        width: CHAN_WIDTH_40,
                        frequency_mhz: freq.mhz,
                        center1_mhz: freq.mhz - 10,
                        center2_mhz: None,
                    });
                }
                if !freq.no_ht40_plus && reg.permits(freq.mhz + 10, 40) {
                    out.push(Channel {
                        width: CHAN_WIDTH_40,
                        frequency_mhz: freq.mhz,
                        center1_mhz: freq.mhz + 10,
                        center2_mhz: None,
                    });
                }
                if band.vht.is_some() && !freq.no_80mhz {
                    for off in [-30i32, -10, 10, 30] {
                        let center1 = (freq.mhz as i32 + off) as u32;
                        if reg.permits(center1, 80) {
                            out.push(Channel {
                                width: CHAN_WIDTH_80,
                                frequency_mhz: freq.mhz,
                                center1_mhz: center1,
                                center2_mhz: None,
                            });
                        }
                    }
                }
                if band.vht.is_some() && !freq.no_160mhz {
                    for off in [-70i32, -50, -30, -10, 10, 30, 50, 70] {
                        let center1 = (freq.mhz as i32 + off) as u32;
                        if reg.permits(center1, 160) {
                            out.push(Channel {
                                width: CHAN_WIDTH_160,
                                frequency_mhz: freq.mhz,
                                center1_mhz: center1,
                                center2_mhz: None,
                            });
                        }
                    }
                }
            }
        }
        out
    }
}

/// Pick the widest 5 GHz channel the radio and regulation allow,
/// preferring the 5500/80/5530 configuration the AP defaults to.
pub fn pick_channel(wiphy: &Wiphy, reg: &Regulation) -> Option<Channel> {
    let channels = wiphy.channels(reg);
    let preferred = Channel {
        width: CHAN_WIDTH_80,
        frequency_mhz: 5500,
        center1_mhz: 5530,
        center2_mhz: None,
    };
    if channels.contains(&preferred) {
        return Some(preferred);
    }
    channels
        .into_iter()
        .filter(|c| c.frequency_mhz >= 5000)
        .max_by_key(|c| (c.width, c.frequency_mhz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, Frequency, HtCapabilities, RegRule, VhtCapabilities};

    fn radio() -> Wiphy {
        let frequencies = [5500u32, 5520, 5540, 5560]
            .iter()
            .map(|&mhz| Frequency { mhz, ..Frequency::default() })
            .collect();
        Wiphy {
            index: 0,
            bands: vec![Band {
                band_id: BAND_5GHZ,
                frequencies,
                ht: Some(HtCapabilities::default()),
                vht: Some(VhtCapabilities::default()),
                ..Band::default()
            }],
            ..Wiphy::default()
        }
    }

    fn wide_reg() -> Regulation {
        Regulation {
            rules: vec![RegRule {
                start_khz: 5_470_000,
                end_khz: 5_730_000,
                max_bandwidth_khz: 160_000,
                ..RegRule::default()
            }],
            ..Regulation::default()
        }
    }

    #[test]
    fn default_80mhz_channel_is_picked() {
        let channel = pick_channel(&radio(), &wide_reg()).unwrap();
        assert_eq!(channel.width, CHAN_WIDTH_80);
        assert_eq!(channel.frequency_mhz, 5500);
        assert_eq!(channel.center1_mhz, 5530);
    }

    #[test]
    fn narrow_regulation_falls_back_to_20mhz() {
        let reg = Regulation {
            rules: vec![RegRule {
                start_khz: 5_490_000,
                end_khz: 5_510_000,
                max_bandwidth_khz: 20_000,
                ..RegRule::default()
            }],
            ..Regulation::default()
        };
        let channel = pick_channel(&radio(), &reg).unwrap();
        assert_eq!(channel.width, CHAN_WIDTH_20);
        assert_eq!(channel.frequency_mhz, 5500);
    }

    #[test]
    fn disabled_frequencies_are_skipped() {
        let mut wiphy = radio();
        for freq in &mut wiphy.bands[0].frequencies {
            freq.disabled = true;
        }
        assert!(pick_channel(&wiphy, &wide_reg()).is_none());
    }

    #[test]
    fn no_ir_frequencies_are_skipped() {
        let mut wiphy = radio();
        for freq in &mut wiphy.bands[0].frequencies {
            freq.no_ir = true;
        }
        assert!(wiphy.channels(&wide_reg()).is_empty());
    }
}
