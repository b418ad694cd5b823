//! EAPOL-Key frames, IEEE 802.11-2016 section 12.7.2.

use crate::crypto::key_mic;
use crate::WifiError;

/// Ethertype of 802.1X authentication frames.
pub const ETH_P_PAE: u16 = 0x888e;

/// Size of the frame up to and including the Key Data Length field.
pub const FIXED_LEN: usize = 99;

const PROTOCOL_VERSION: u8 = 2; // IEEE 802.1X-2004
const PACKET_TYPE_KEY: u8 = 3;
const DESCRIPTOR_TYPE_RSN: u8 = 2;

// Key Information bits.
pub const KI_KDV_MASK: u16 = 0x0007;
pub const KI_KDV_CCMP: u16 = 2; // HMAC-SHA1 MIC, AES key wrap
pub const KI_PAIRWISE: u16 = 1 << 3;
pub const KI_INSTALL: u16 = 1 << 6;
pub const KI_ACK: u16 = 1 << 7;
pub const KI_MIC: u16 = 1 << 8;
pub const KI_SECURE: u16 = 1 << 9;
pub const KI_ENCRYPTED_KEY_DATA: u16 = 1 << 12;

/// A decoded EAPOL-Key frame. `raw` keeps the original bytes for MIC
/// verification.
#[derive(Debug, Clone)]
pub struct EapolKeyFrame {
    pub key_information: u16,
    pub key_length: u16,
    pub replay_counter: u64,
    pub nonce: [u8; 32],
    pub key_mic: [u8; 16],
    pub key_data: Vec<u8>,
    raw: Vec<u8>,
}

impl EapolKeyFrame {
    pub fn parse(frame: &[u8]) -> Result<EapolKeyFrame, WifiError> {
        if frame.len() < FIXED_LEN {
            return Err(WifiError::FrameTooShort);
        }
        if frame[1] != PACKET_TYPE_KEY {
            return Err(WifiError::InvalidFrame("packet type should equal 3"));
        }
        let length = u16::from_be_bytes(frame[2..4].try_into().unwrap());
        if length as usize != frame.len() - 4 {
            return Err(WifiError::InvalidFrame("wrong packet body length"));
        }
        if frame[4] != DESCRIPTOR_TYPE_RSN {
            return Err(WifiError::InvalidFrame("descriptor type should equal 2"));
        }
        let key_data_length =
            u16::from_be_bytes(frame[FIXED_LEN - 2..FIXED_LEN].try_into().unwrap());
        if key_data_length as usize != frame.len() - FIXED_LEN {
            return Err(WifiError::InvalidFrame("wrong key data length"));
        }
        Ok(EapolKeyFrame {
            key_information: u16::from_be_bytes(frame[5..7].try_into().unwrap()),
            key_length: u16::from_be_bytes(frame[7..9].try_into().unwrap()),
            replay_counter: u64::from_be_bytes(frame[9..17].try_into().unwrap()),
            nonce: frame[17..49].try_into().unwrap(),
            key_mic: frame[81..97].try_into().unwrap(),
            key_data: frame[FIXED_LEN..].to_vec(),
            raw: frame.to_vec(),
        })
    }

    /// Verify the MIC: HMAC-SHA1-128 over the frame with the MIC field
    /// zeroed.
    pub fn check_mic(&self, kck: &[u8; 16]) -> bool {
        let mut copy = self.raw.clone();
        copy[81..97].fill(0);
        key_mic(kck, &copy) == self.key_mic
    }
}

/// Assemble an EAPOL-Key frame. When `kck` is given, the MIC field is
/// filled in over the assembled frame.
pub fn build_key_frame(
    key_information: u16,
    replay_counter: u64,
    nonce: &[u8; 32],
    key_data: &[u8],
    kck: Option<&[u8; 16]>,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FIXED_LEN + key_data.len());
    frame.push(PROTOCOL_VERSION);
    frame.push(PACKET_TYPE_KEY);
    frame.extend_from_slice(&((FIXED_LEN - 4 + key_data.len()) as u16).to_be_bytes());
    frame.push(DESCRIPTOR_TYPE_RSN);
    frame.extend_from_slice(&key_information.to_be_bytes());
    frame.extend_from_slice(&16u16.to_be_bytes()); // Key Length (CCMP)
    frame.extend_from_slice(&replay_counter.to_be_bytes());
    frame.extend_from_slice(nonce);
    frame.extend_from_slice(&[0u8; 16]); // Key IV
    frame.extend_from_slice(&[0u8; 8]); // Key RSC
    frame.extend_from_slice(&[0u8; 8]); // Key ID
    frame.extend_from_slice(&[0u8; 16]); // Key MIC, filled below
    frame.extend_from_slice(&(key_data.len() as u16).to_be_bytes());
    frame.extend_from_slice(key_data);

    if let Some(kck) = kck {
        let mic = key_mic(kck, &frame);
        frame[81..97].copy_from_slice(&mic);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_parse_round_trip() {
        let nonce = [7u8; 32];
        let frame = build_key_frame(
            KI_KDV_CCMP | KI_PAIRWISE | KI_ACK,
            1,
            &nonce,
            &[],
            None,
        );
        assert_eq!(frame.len(), FIXED_LEN);
        let parsed = EapolKeyFrame::parse(&frame).unwrap();
        assert_eq!(parsed.key_information, KI_KDV_CCMP | KI_PAIRWISE | KI_ACK);
        assert_eq!(parsed.replay_counter, 1);
        assert_eq!(parsed.nonce, nonce);
        assert_eq!(parsed.key_length, 16);
        assert!(parsed.key_data.is_empty());
    }

    #[test]
    fn mic_round_trip() {
        let kck = [0x42u8; 16];
        let frame = build_key_frame(
            KI_KDV_CCMP | KI_PAIRWISE | KI_MIC,
            2,
            &[1u8; 32],
            b"keydata8",
            Some(&kck),
        );
        let parsed = EapolKeyFrame::parse(&frame).unwrap();
        assert!(parsed.check_mic(&kck));
        assert!(!parsed.check_mic(&[0u8; 16]));

        // Flipping any payload bit invalidates the MIC.
        let mut tampered = frame.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        assert!(!EapolKeyFrame::parse(&tampered).unwrap().check_mic(&kck));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(
            EapolKeyFrame::parse(&[0u8; 10]),
            Err(WifiError::FrameTooShort)
        ));

        let good = build_key_frame(KI_KDV_CCMP, 1, &[0u8; 32], &[], None);
        let mut wrong_length = good.clone();
        wrong_length[3] += 1;
        assert!(EapolKeyFrame::parse(&wrong_length).is_err());
        let mut wrong_descriptor = good.clone();
        wrong_descriptor[4] = 1;
        assert!(EapolKeyFrame::parse(&wrong_descriptor).is_err());
    }
}
