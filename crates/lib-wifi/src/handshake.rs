//! The per-station WPA2 4-way handshake state machine.

use netcfg::MacAddr;

use crate::crypto::{derive_ptk, key_wrap};
use crate::eapol::{
    build_key_frame, EapolKeyFrame, KI_ACK, KI_ENCRYPTED_KEY_DATA, KI_INSTALL, KI_KDV_CCMP,
    KI_MIC, KI_PAIRWISE, KI_SECURE,
};
use crate::elements::{gtk_kde, pad_key_data, rsne};
use crate::WifiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    ExpectMsg2,
    ExpectMsg4,
}

/// What the caller must do after a handled frame.
#[derive(Debug)]
pub enum HandshakeAction {
    /// Send message 3/4 back to the station.
    Reply(Vec<u8>),
    /// The handshake completed: install `tk` as the station's pairwise
    /// key and mark it authorized. The handshake is finished.
    Install { tk: [u8; 16] },
}

const PTK_KCK: std::ops::Range<usize> = 0..16;
const PTK_KEK: std::ops::Range<usize> = 16..32;
const PTK_TK: std::ops::Range<usize> = 32..48;

/// Authenticator-side handshake for one station.
pub struct Handshake {
    pub state: HandshakeState,
    pub anonce: [u8; 32],
    ptk: Option<[u8; 48]>,
}

fn expected(frame: &EapolKeyFrame, expected: u16) -> Result<(), WifiError> {
    if frame.key_information != expected {
        return Err(WifiError::UnexpectedKeyInformation {
            got: frame.key_information,
            expected,
        });
    }
    Ok(())
}

impl Handshake {
    pub fn new(anonce: [u8; 32]) -> Self {
        Handshake {
            state: HandshakeState::ExpectMsg2,
            anonce,
            ptk: None,
        }
    }

    /// Message 1/4: ANonce, Key-Ack, Pairwise, replay counter 1.
    pub fn message_1(&self) -> Vec<u8> {
        build_key_frame(KI_KDV_CCMP | KI_PAIRWISE | KI_ACK, 1, &self.anonce, &[], None)
    }

    fn kck(&self) -> [u8; 16] {
        self.ptk.expect("PTK derived")[PTK_KCK].try_into().unwrap()
    }

    fn kek(&self) -> [u8; 16] {
        self.ptk.expect("PTK derived")[PTK_KEK].try_into().unwrap()
    }

    fn tk(&self) -> [u8; 16] {
        self.ptk.expect("PTK derived")[PTK_TK].try_into().unwrap()
    }

    /// Feed one EAPOL-Key frame from the station through the state
    /// machine. An error means the handshake failed and must be
    /// destroyed; the station is never authorized.
    pub fn handle_frame(
        &mut self,
        frame: &[u8],
        pmk: &[u8; 32],
        ap_mac: MacAddr,
        sta_mac: MacAddr,
        gtk: &[u8; 16],
    ) -> Result<HandshakeAction, WifiError> {
        let frame = EapolKeyFrame::parse(frame)?;
        match self.state {
            HandshakeState::ExpectMsg2 => self.handle_msg2(&frame, pmk, ap_mac, sta_mac, gtk),
            HandshakeState::ExpectMsg4 => self.handle_msg4(&frame),
        }
    }

    /// Message 2/4 carries the SNonce. Derive the PTK, verify the MIC and
    /// answer with message 3/4: RSNE plus the key-wrapped GTK.
    fn handle_msg2(
        &mut self,
        frame: &EapolKeyFrame,
        pmk: &[u8; 32],
        ap_mac: MacAddr,
        sta_mac: MacAddr,
        gtk: &[u8; 16],
    ) -> Result<HandshakeAction, WifiError> {
        expected(frame, KI_KDV_CCMP | KI_PAIRWISE | KI_MIC)?;

        let snonce = frame.nonce;
        self.ptk = Some(derive_ptk(pmk, ap_mac, sta_mac, &self.anonce, &snonce));
        if !frame.check_mic(&self.kck()) {
            self.ptk = None;
            return Err(WifiError::InvalidMic);
        }

        self.state = HandshakeState::ExpectMsg4;

        let mut key_data = rsne();
        gtk_kde(&mut key_data, gtk);
        pad_key_data(&mut key_data);
        let wrapped = key_wrap(&self.kek(), &key_data);

        let reply = build_key_frame(
            KI_KDV_CCMP | KI_PAIRWISE | KI_MIC | KI_SECURE | KI_INSTALL | KI_ACK
                | KI_ENCRYPTED_KEY_DATA,
            2,
            &self.anonce,
            &wrapped,
            Some(&self.kck()),
        );
        Ok(HandshakeAction::Reply(reply))
    }

    /// Message 4/4 confirms the station installed the keys.
    fn handle_msg4(&mut self, frame: &EapolKeyFrame) -> Result<HandshakeAction, WifiError> {
        expected(frame, KI_KDV_CCMP | KI_PAIRWISE | KI_MIC | KI_SECURE)?;
        if !frame.check_mic(&self.kck()) {
            return Err(WifiError::InvalidMic);
        }
        Ok(HandshakeAction::Install { tk: self.tk() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_pmk;
    use crate::eapol::build_key_frame;

    const AP: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const STA: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);

    /// The supplicant side of the exchange, enough of it to exercise the
    /// authenticator.
    struct Supplicant {
        pmk: [u8; 32],
        snonce: [u8; 32],
        ptk: Option<[u8; 48]>,
    }

    impl Supplicant {
        fn new(password: &str, ssid: &[u8]) -> Self {
            Supplicant {
                pmk: derive_pmk(password, ssid),
                snonce: [0x5au8; 32],
                ptk: None,
            }
        }

        fn kck(&self) -> [u8; 16] {
            self.ptk.unwrap()[0..16].try_into().unwrap()
        }

        fn msg2(&mut self, msg1: &[u8]) -> Vec<u8> {
            let msg1 = EapolKeyFrame::parse(msg1).unwrap();
            assert_eq!(msg1.key_information, KI_KDV_CCMP | KI_PAIRWISE | KI_ACK);
            self.ptk = Some(derive_ptk(&self.pmk, STA, AP, &self.snonce, &msg1.nonce));
            build_key_frame(
                KI_KDV_CCMP | KI_PAIRWISE | KI_MIC,
                1,
                &self.snonce,
                &[],
                Some(&self.kck()),
            )
        }

        fn msg4(&self, msg3: &[u8]) -> Vec<u8> {
            let msg3 = EapolKeyFrame::parse(msg3).unwrap();
            assert!(msg3.check_mic(&self.kck()));
            assert_eq!(msg3.key_information & KI_INSTALL, KI_INSTALL);
            assert_eq!(msg3.key_information & KI_ENCRYPTED_KEY_DATA, KI_ENCRYPTED_KEY_DATA);
            // IV block + at least the RSNE and GTK KDE.
            assert!(msg3.key_data.len() >= 8 + 48);
            assert_eq!(msg3.key_data.len() % 8, 0);
            build_key_frame(
                KI_KDV_CCMP | KI_PAIRWISE | KI_MIC | KI_SECURE,
                2,
                &[0u8; 32],
                &[],
                Some(&self.kck()),
            )
        }
    }

    #[test]
    fn full_handshake_authorizes_station() {
        let pmk = derive_pmk("password", b"test");
        let gtk = [0x33u8; 16];
        let mut authenticator = Handshake::new([0xa5u8; 32]);
        let mut supplicant = Supplicant::new("password", b"test");

        let msg1 = authenticator.message_1();
        let msg2 = supplicant.msg2(&msg1);
        let action = authenticator
            .handle_frame(&msg2, &pmk, AP, STA, &gtk)
            .unwrap();
        let HandshakeAction::Reply(msg3) = action else {
            panic!("expected message 3");
        };
        assert_eq!(authenticator.state, HandshakeState::ExpectMsg4);

        let msg4 = supplicant.msg4(&msg3);
        let action = authenticator
            .handle_frame(&msg4, &pmk, AP, STA, &gtk)
            .unwrap();
        let HandshakeAction::Install { tk } = action else {
            panic!("expected key installation");
        };
        // Both sides agree on the temporal key.
        assert_eq!(tk.to_vec(), supplicant.ptk.unwrap()[32..48].to_vec());
    }

    #[test]
    fn wrong_password_fails_the_mic_check() {
        let pmk = derive_pmk("password", b"test");
        let gtk = [0x33u8; 16];
        let mut authenticator = Handshake::new([0xa5u8; 32]);
        let mut supplicant = Supplicant::new("hunter2", b"test");

        let msg1 = authenticator.message_1();
        let msg2 = supplicant.msg2(&msg1);
        assert!(matches!(
            authenticator.handle_frame(&msg2, &pmk, AP, STA, &gtk),
            Err(WifiError::InvalidMic)
        ));
        assert_eq!(authenticator.state, HandshakeState::ExpectMsg2);
    }

    #[test]
    fn msg2_with_wrong_flags_is_rejected() {
        let pmk = derive_pmk("password", b"test");
        let mut authenticator = Handshake::new([0xa5u8; 32]);
        // Key-Ack must not be set by the supplicant.
        let bogus = build_key_frame(
            KI_KDV_CCMP | KI_PAIRWISE | KI_MIC | KI_ACK,
            1,
            &[0u8; 32],
            &[],
            None,
        );
        assert!(matches!(
            authenticator.handle_frame(&bogus, &pmk, AP, STA, &[0u8; 16]),
            Err(WifiError::UnexpectedKeyInformation { .. })
        ));
    }

    #[test]
    fn tampered_msg4_never_authorizes() {
        let pmk = derive_pmk("password", b"test");
        let gtk = [0x33u8; 16];
        let mut authenticator = Handshake::new([0xa5u8; 32]);
        let mut supplicant = Supplicant::new("password", b"test");

        let msg2 = supplicant.msg2(&authenticator.message_1());
        let HandshakeAction::Reply(msg3) =
            authenticator.handle_frame(&msg2, &pmk, AP, STA, &gtk).unwrap()
        else {
            panic!();
        };
        let mut msg4 = supplicant.msg4(&msg3);
        msg4[9] ^= 1; // replay counter bit flip
        assert!(matches!(
            authenticator.handle_frame(&msg4, &pmk, AP, STA, &gtk),
            Err(WifiError::InvalidMic)
        ));
    }
}
