//! SWTLLP: a 1-byte protocol tag that lets a SWTP frame carry either an IPv4
//! or an IPv6 payload, so a TUN device (which prefixes every frame it hands
//! out with a 4-byte `{reserved[2], ethertype[2]}` header, §6) can use SWTP
//! as its datalink.

use crate::error::{Result, SwtpError};

pub const TAG_IPV4: u8 = 0x01;
pub const TAG_IPV6: u8 = 0x02;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;

const TUN_PREFIX_LEN: usize = 4;

/// Strip a TUN device's 4-byte prefix and prepend the SWTLLP tag, producing
/// the bytes that become a SWTP data frame's payload.
pub fn encapsulate(tun_frame: &[u8]) -> Result<Vec<u8>> {
    if tun_frame.len() < TUN_PREFIX_LEN {
        return Err(SwtpError::MalformedFrame("tun frame shorter than its prefix"));
    }
    let ethertype = u16::from_be_bytes([tun_frame[2], tun_frame[3]]);
    let tag = match ethertype {
        ETHERTYPE_IPV4 => TAG_IPV4,
        ETHERTYPE_IPV6 => TAG_IPV6,
        other => return Err(SwtpError::UnknownProtocol(other)),
    };

    let l3 = &tun_frame[TUN_PREFIX_LEN..];
    let mut out = Vec::with_capacity(1 + l3.len());
    out.push(tag);
    out.extend_from_slice(l3);
    Ok(out)
}

/// Reconstitute a TUN frame from a SWTP payload (tag byte + L3 bytes). Unknown
/// tags are silently dropped (return `Ok(None)`), per §4.7.
pub fn decapsulate(payload: &[u8]) -> Result<Option<Vec<u8>>> {
    let Some((&tag, l3)) = payload.split_first() else {
        return Err(SwtpError::MalformedFrame("empty SWTLLP payload"));
    };

    let ethertype = match tag {
        TAG_IPV4 => ETHERTYPE_IPV4,
        TAG_IPV6 => ETHERTYPE_IPV6,
        _ => return Ok(None),
    };

    let mut out = Vec::with_capacity(TUN_PREFIX_LEN + l3.len());
    out.extend_from_slice(&[0x00, 0x00]);
    out.extend_from_slice(&ethertype.to_be_bytes());
    out.extend_from_slice(l3);
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_round_trips() {
        let tun_frame = [0x00, 0x00, 0x08, 0x00, 1, 2, 3, 4];
        let payload = encapsulate(&tun_frame).unwrap();
        assert_eq!(payload[0], TAG_IPV4);
        let back = decapsulate(&payload).unwrap().unwrap();
        assert_eq!(back, tun_frame);
    }

    #[test]
    fn ipv6_round_trips() {
        let tun_frame = [0x00, 0x00, 0x86, 0xdd, 9, 9];
        let payload = encapsulate(&tun_frame).unwrap();
        assert_eq!(payload[0], TAG_IPV6);
        let back = decapsulate(&payload).unwrap().unwrap();
        assert_eq!(back, tun_frame);
    }

    #[test]
    fn unknown_ethertype_fails_on_egress() {
        let tun_frame = [0x00, 0x00, 0x08, 0x06, 1, 2]; // ARP
        assert!(matches!(
            encapsulate(&tun_frame),
            Err(SwtpError::UnknownProtocol(0x0806))
        ));
    }

    #[test]
    fn unknown_tag_is_silently_dropped_on_ingress() {
        let payload = [0xffu8, 1, 2, 3];
        assert!(decapsulate(&payload).unwrap().is_none());
    }

    #[test]
    fn short_tun_frame_is_rejected() {
        assert!(encapsulate(&[0, 0, 0]).is_err());
    }
}
