//! ICMPv6 RPL messages (type 155) and their fixed headers, per RFC 6550 §6.
//! Grounded on the struct-field codec style of `hr-dhcp/src/packet.rs`;
//! layouts from `original_source/RPL/icmp.py`.

use crate::error::CodecError;
use rpl_common::Lollipop;
use std::net::Ipv6Addr;

pub const ICMPV6_TYPE_RPL: u8 = 155;

pub const CODE_DIS: u8 = 0x00;
pub const CODE_DIO: u8 = 0x01;
pub const CODE_DAO: u8 = 0x02;
pub const CODE_DAO_ACK: u8 = 0x03;
pub const CODE_CC: u8 = 0x8a;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dis {
    pub flags: u8,
    pub reserved: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dio {
    pub instance_id: u8,
    pub version: Lollipop,
    pub rank: u16,
    pub grounded: bool,
    pub mop: u8,
    pub prf: u8,
    pub dtsn: Lollipop,
    pub dodag_id: Ipv6Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dao {
    pub instance_id: u8,
    pub k: bool,
    pub d: bool,
    pub dao_sequence: Lollipop,
    pub dodag_id: Option<Ipv6Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaoAck {
    pub instance_id: u8,
    pub d: bool,
    pub dao_sequence: u8,
    pub status: u8,
    pub dodag_id: Option<Ipv6Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cc {
    pub instance_id: u8,
    pub r: bool,
    pub cc_nonce: u16,
    pub dodag_id: Ipv6Addr,
    pub destination_counter: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RplBody {
    Dis(Dis),
    Dio(Dio),
    Dao(Dao),
    DaoAck(DaoAck),
    Cc(Cc),
}

/// A decoded ICMPv6 RPL datagram: the body plus the trailing option area,
/// which the caller walks with `option::get_all_options`/`find_option`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RplMessage {
    pub body: RplBody,
    pub options: Vec<u8>,
}

impl RplMessage {
    /// Encode the full ICMPv6 datagram (type, code, checksum placeholder,
    /// body, options). The checksum is left zero: it is the link sender's
    /// responsibility to compute the ICMPv6 pseudo-header checksum, which
    /// needs the source/destination addresses this codec does not have.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(16 + self.options.len());
        buf.push(ICMPV6_TYPE_RPL);
        buf.push(self.code());
        buf.extend_from_slice(&0u16.to_be_bytes()); // checksum placeholder

        match &self.body {
            RplBody::Dis(dis) => {
                buf.push(dis.flags);
                buf.push(dis.reserved);
            }
            RplBody::Dio(dio) => {
                buf.push(dio.instance_id);
                buf.push(dio.version.value());
                buf.extend_from_slice(&dio.rank.to_be_bytes());
                let compound = (if dio.grounded { 0x80 } else { 0 })
                    | ((dio.mop & 0x07) << 3)
                    | (dio.prf & 0x07);
                buf.push(compound);
                buf.push(dio.dtsn.value());
                buf.push(0); // flags (unused per reference layout)
                buf.push(0); // reserved
                buf.extend_from_slice(&dio.dodag_id.octets());
            }
            RplBody::Dao(dao) => {
                buf.push(dao.instance_id);
                let compound = (if dao.k { 0x80 } else { 0 }) | (if dao.d { 0x40 } else { 0 });
                buf.push(compound);
                buf.push(0); // reserved
                buf.push(dao.dao_sequence.value());
                if dao.d {
                    let id = dao.dodag_id.ok_or(CodecError::FieldRange("dodag_id"))?;
                    buf.extend_from_slice(&id.octets());
                }
            }
            RplBody::DaoAck(ack) => {
                buf.push(ack.instance_id);
                let compound = if ack.d { 0x40 } else { 0 };
                buf.push(compound);
                buf.push(ack.dao_sequence);
                buf.push(ack.status);
                if ack.d {
                    let id = ack.dodag_id.ok_or(CodecError::FieldRange("dodag_id"))?;
                    buf.extend_from_slice(&id.octets());
                }
            }
            RplBody::Cc(cc) => {
                buf.push(cc.instance_id);
                let compound = if cc.r { 0x80 } else { 0 };
                buf.push(compound);
                buf.extend_from_slice(&cc.cc_nonce.to_be_bytes());
                buf.extend_from_slice(&cc.dodag_id.octets());
                buf.extend_from_slice(&cc.destination_counter.to_be_bytes());
            }
        }

        buf.extend_from_slice(&self.options);
        Ok(buf)
    }

    fn code(&self) -> u8 {
        match &self.body {
            RplBody::Dis(_) => CODE_DIS,
            RplBody::Dio(_) => CODE_DIO,
            RplBody::Dao(_) => CODE_DAO,
            RplBody::DaoAck(_) => CODE_DAO_ACK,
            RplBody::Cc(_) => CODE_CC,
        }
    }

    /// Decode a full ICMPv6 RPL datagram starting at the ICMPv6 header.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::Truncated { need: 4, have: buf.len() });
        }
        if buf[0] != ICMPV6_TYPE_RPL {
            return Err(CodecError::UnknownCode(buf[0]));
        }
        let code = buf[1];
        let rest = &buf[4..];

        let (body, consumed) = match code {
            CODE_DIS => {
                if rest.len() < 2 {
                    return Err(CodecError::Truncated { need: 2, have: rest.len() });
                }
                (RplBody::Dis(Dis { flags: rest[0], reserved: rest[1] }), 2)
            }
            CODE_DIO => {
                if rest.len() < 24 {
                    return Err(CodecError::Truncated { need: 24, have: rest.len() });
                }
                let version = Lollipop::new(rest[1] as u16).map_err(|_| CodecError::FieldRange("version"))?;
                let rank = u16::from_be_bytes([rest[2], rest[3]]);
                let compound = rest[4];
                let dtsn = Lollipop::new(rest[5] as u16).map_err(|_| CodecError::FieldRange("dtsn"))?;
                let mut dodag_id = [0u8; 16];
                dodag_id.copy_from_slice(&rest[8..24]);
                (
                    RplBody::Dio(Dio {
                        instance_id: rest[0],
                        version,
                        rank,
                        grounded: compound & 0x80 != 0,
                        mop: (compound >> 3) & 0x07,
                        prf: compound & 0x07,
                        dtsn,
                        dodag_id: Ipv6Addr::from(dodag_id),
                    }),
                    24,
                )
            }
            CODE_DAO => {
                if rest.len() < 4 {
                    return Err(CodecError::Truncated { need: 4, have: rest.len() });
                }
                let compound = rest[1];
                let d = compound & 0x40 != 0;
                let dao_sequence = Lollipop::new(rest[3] as u16).map_err(|_| CodecError::FieldRange("dao_sequence"))?;
                let (dodag_id, consumed) = if d {
                    if rest.len() < 20 {
                        return Err(CodecError::Truncated { need: 20, have: rest.len() });
                    }
                    let mut id = [0u8; 16];
                    id.copy_from_slice(&rest[4..20]);
                    (Some(Ipv6Addr::from(id)), 20)
                } else {
                    (None, 4)
                };
                (
                    RplBody::Dao(Dao {
                        instance_id: rest[0],
                        k: compound & 0x80 != 0,
                        d,
                        dao_sequence,
                        dodag_id,
                    }),
                    consumed,
                )
            }
            CODE_DAO_ACK => {
                if rest.len() < 4 {
                    return Err(CodecError::Truncated { need: 4, have: rest.len() });
                }
                let d = rest[1] & 0x40 != 0;
                let (dodag_id, consumed) = if d {
                    if rest.len() < 20 {
                        return Err(CodecError::Truncated { need: 20, have: rest.len() });
                    }
                    let mut id = [0u8; 16];
                    id.copy_from_slice(&rest[4..20]);
                    (Some(Ipv6Addr::from(id)), 20)
                } else {
                    (None, 4)
                };
                (
                    RplBody::DaoAck(DaoAck {
                        instance_id: rest[0],
                        d,
                        dao_sequence: rest[2],
                        status: rest[3],
                        dodag_id,
                    }),
                    consumed,
                )
            }
            CODE_CC => {
                if rest.len() < 24 {
                    return Err(CodecError::Truncated { need: 24, have: rest.len() });
                }
                let mut dodag_id = [0u8; 16];
                dodag_id.copy_from_slice(&rest[4..20]);
                (
                    RplBody::Cc(Cc {
                        instance_id: rest[0],
                        r: rest[1] & 0x80 != 0,
                        cc_nonce: u16::from_be_bytes([rest[2], rest[3]]),
                        dodag_id: Ipv6Addr::from(dodag_id),
                        destination_counter: u32::from_be_bytes([rest[20], rest[21], rest[22], rest[23]]),
                    }),
                    24,
                )
            }
            other => return Err(CodecError::UnknownCode(other)),
        };

        Ok(RplMessage { body, options: rest[consumed..].to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dis_roundtrip_from_scratch() {
        let msg = RplMessage { body: RplBody::Dis(Dis { flags: 0, reserved: 0 }), options: vec![] };
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded, vec![0x9b, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let decoded = RplMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn dio_roundtrip_with_prefix_information_option() {
        let dio = Dio {
            instance_id: 0,
            version: Lollipop::new(240).unwrap(),
            rank: 256,
            grounded: true,
            mop: 2,
            prf: 0,
            dtsn: Lollipop::new(240).unwrap(),
            dodag_id: "2001:db8::1".parse().unwrap(),
        };
        let mut options = Vec::new();
        crate::option::RplOption::PrefixInformation {
            prefix_len: 64,
            on_link: false,
            autonomous: true,
            router_address: false,
            valid_lifetime: u32::MAX,
            preferred_lifetime: u32::MAX,
            prefix: "2001:db8::".parse().unwrap(),
        }
        .encode(&mut options)
        .unwrap();

        let msg = RplMessage { body: RplBody::Dio(dio), options };
        let encoded = msg.encode().unwrap();
        let decoded = RplMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn dao_with_d_flag_carries_dodag_id() {
        let dao = Dao {
            instance_id: 0,
            k: true,
            d: true,
            dao_sequence: Lollipop::new(1).unwrap(),
            dodag_id: Some("2001:db8::1".parse().unwrap()),
        };
        let msg = RplMessage { body: RplBody::Dao(dao), options: vec![] };
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded.len(), 4 + 4 + 16);
        let decoded = RplMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn dao_without_d_flag_omits_dodag_id() {
        let dao = Dao { instance_id: 0, k: false, d: false, dao_sequence: Lollipop::new(1).unwrap(), dodag_id: None };
        let msg = RplMessage { body: RplBody::Dao(dao), options: vec![] };
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded.len(), 8);
        let decoded = RplMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn dao_ack_roundtrip() {
        let ack = DaoAck { instance_id: 0, d: false, dao_sequence: 5, status: 0, dodag_id: None };
        let msg = RplMessage { body: RplBody::DaoAck(ack), options: vec![] };
        let encoded = msg.encode().unwrap();
        let decoded = RplMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn cc_roundtrip() {
        let cc = Cc {
            instance_id: 0,
            r: true,
            cc_nonce: 0x1234,
            dodag_id: "2001:db8::1".parse().unwrap(),
            destination_counter: 42,
        };
        let msg = RplMessage { body: RplBody::Cc(cc), options: vec![] };
        let encoded = msg.encode().unwrap();
        let decoded = RplMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn truncated_dio_is_rejected() {
        let buf = [0x9b, 0x01, 0, 0, 0];
        assert!(matches!(RplMessage::decode(&buf), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn wrong_icmpv6_type_is_rejected() {
        let buf = [134, 0, 0, 0];
        assert!(matches!(RplMessage::decode(&buf), Err(CodecError::UnknownCode(134))));
    }
}
