//! Key derivation for WPA2-Personal, composed from HMAC-SHA1 and AES-128.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use netcfg::MacAddr;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// PBKDF2-HMAC-SHA1 with the WPA2 parameters: 4096 iterations, 32 bytes.
/// PMK = PBKDF2(passphrase, ssid).
pub fn derive_pmk(passphrase: &str, ssid: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (block_index, chunk) in out.chunks_mut(20).enumerate() {
        let mut salt = ssid.to_vec();
        salt.extend_from_slice(&(block_index as u32 + 1).to_be_bytes());
        let mut u = hmac_sha1(passphrase.as_bytes(), &salt);
        let mut t = u;
        for _ in 1..4096 {
            u = hmac_sha1(passphrase.as_bytes(), &u);
            for (t, u) in t.iter_mut().zip(u.iter()) {
                *t ^= u;
            }
        }
        chunk.copy_from_slice(&t[..chunk.len()]);
    }
    out
}

/// IEEE 802.11 PRF: HMAC-SHA1 over `label || 0x00 || data || counter`,
/// iterated until `out` is filled.
fn prf(out: &mut [u8], key: &[u8], label: &str, data: &[u8]) {
    let mut message = Vec::with_capacity(label.len() + 1 + data.len() + 1);
    message.extend_from_slice(label.as_bytes());
    message.push(0);
    message.extend_from_slice(data);
    message.push(0); // counter, patched per iteration

    let counter_at = message.len() - 1;
    for (i, chunk) in out.chunks_mut(20).enumerate() {
        message[counter_at] = i as u8;
        let hash = hmac_sha1(key, &message);
        chunk.copy_from_slice(&hash[..chunk.len()]);
    }
}

/// PRF-512 pairwise key expansion. The MAC pair and the nonce pair enter
/// in lexicographic order, so either side derives the same PTK.
pub fn derive_ptk(
    pmk: &[u8; 32],
    mac_a: MacAddr,
    mac_b: MacAddr,
    nonce_a: &[u8; 32],
    nonce_b: &[u8; 32],
) -> [u8; 48] {
    let (mac_min, mac_max) = if mac_a.bytes() < mac_b.bytes() {
        (mac_a, mac_b)
    } else {
        (mac_b, mac_a)
    };
    let (nonce_min, nonce_max) = if nonce_a < nonce_b {
        (nonce_a, nonce_b)
    } else {
        (nonce_b, nonce_a)
    };
    let mut data = [0u8; 6 * 2 + 32 * 2];
    data[..6].copy_from_slice(mac_min.bytes());
    data[6..12].copy_from_slice(mac_max.bytes());
    data[12..44].copy_from_slice(nonce_min);
    data[44..76].copy_from_slice(nonce_max);

    let mut ptk = [0u8; 48];
    prf(&mut ptk, pmk, "Pairwise key expansion", &data);
    ptk
}

/// AES key wrap per RFC 3394, in place over 64-bit blocks. Returns the
/// ciphertext: one IV block followed by the wrapped key blocks.
pub fn key_wrap(kek: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    debug_assert_eq!(plaintext.len() % 8, 0);
    let n = plaintext.len() / 8;
    let cipher = Aes128::new_from_slice(kek).expect("16-byte KEK");

    let mut a = [0xa6u8; 8];
    let mut r: Vec<[u8; 8]> = plaintext
        .chunks_exact(8)
        .map(|c| <[u8; 8]>::try_from(c).unwrap())
        .collect();

    for j in 0..6u64 {
        for (i, block) in r.iter_mut().enumerate() {
            let mut b = [0u8; 16];
            b[..8].copy_from_slice(&a);
            b[8..].copy_from_slice(block);
            cipher.encrypt_block(aes::Block::from_mut_slice(&mut b));
            let t = (n as u64) * j + (i as u64 + 1);
            a.copy_from_slice(&b[..8]);
            for (a, t) in a.iter_mut().zip(t.to_be_bytes()) {
                *a ^= t;
            }
            block.copy_from_slice(&b[8..]);
        }
    }

    let mut out = Vec::with_capacity((n + 1) * 8);
    out.extend_from_slice(&a);
    for block in r {
        out.extend_from_slice(&block);
    }
    out
}

/// HMAC-SHA1-128: the EAPOL-Key MIC for Key Descriptor Version 2.
pub fn key_mic(kck: &[u8; 16], frame: &[u8]) -> [u8; 16] {
    let hash = hmac_sha1(kck, frame);
    hash[..16].try_into().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn pmk_matches_ieee_reference_vector() {
        // IEEE 802.11i Annex H.4: passphrase "password", SSID "IEEE".
        let pmk = derive_pmk("password", b"IEEE");
        assert_eq!(
            pmk.to_vec(),
            hex("f42c6fc52df0ebef9ebb4b90b38a5f902e83fe1b135a70e23aed762e9710a12e")
        );
    }

    #[test]
    fn pmk_second_reference_vector() {
        // IEEE 802.11i Annex H.4: "ThisIsAPassword" / "ThisIsASSID".
        let pmk = derive_pmk("ThisIsAPassword", b"ThisIsASSID");
        assert_eq!(
            pmk.to_vec(),
            hex("0dc0d6eb90555ed6419756b9a15ec3e3209b63df707dd508d14581f8982721af")
        );
    }

    #[test]
    fn key_wrap_matches_rfc_3394_vector() {
        // RFC 3394 section 4.1: 128-bit key with 128-bit KEK.
        let kek: [u8; 16] = hex("000102030405060708090a0b0c0d0e0f").try_into().unwrap();
        let key = hex("00112233445566778899aabbccddeeff");
        assert_eq!(
            key_wrap(&kek, &key),
            hex("1fa68b0a8112b447aef34bd8fb5a7b829d3e862371d2cfe5")
        );
    }

    #[test]
    fn ptk_is_symmetric_under_role_swap() {
        let pmk = derive_pmk("password", b"test");
        let ap = MacAddr([0x02, 0, 0, 0, 0, 1]);
        let sta = MacAddr([0x02, 0, 0, 0, 0, 2]);
        let anonce = [0x11u8; 32];
        let snonce = [0x22u8; 32];
        let from_ap = derive_ptk(&pmk, ap, sta, &anonce, &snonce);
        let from_sta = derive_ptk(&pmk, sta, ap, &snonce, &anonce);
        assert_eq!(from_ap, from_sta);
    }

    #[test]
    fn ptk_depends_on_every_input() {
        let pmk = derive_pmk("password", b"test");
        let ap = MacAddr([0x02, 0, 0, 0, 0, 1]);
        let sta = MacAddr([0x02, 0, 0, 0, 0, 2]);
        let anonce = [0x11u8; 32];
        let base = derive_ptk(&pmk, ap, sta, &anonce, &[0x22u8; 32]);
        assert_ne!(base, derive_ptk(&pmk, ap, sta, &anonce, &[0x23u8; 32]));
        let other_pmk = derive_pmk("password2", b"test");
        assert_ne!(base, derive_ptk(&other_pmk, ap, sta, &anonce, &[0x22u8; 32]));
    }
}
