//! RPL option TLVs (RFC 6550 §6.7). Grounded on the TLV-loop shape of
//! `hr-dhcp/src/options.rs`, with layouts from `original_source/RPL/icmp.py`
//! replaced by tagged variants per SPEC_FULL §9 ("Dynamic field bags").

use crate::error::CodecError;
use rpl_common::Lollipop;
use std::net::Ipv6Addr;

pub const OPT_PAD1: u8 = 0x00;
pub const OPT_PADN: u8 = 0x01;
pub const OPT_DAG_METRIC_CONTAINER: u8 = 0x02;
pub const OPT_ROUTING_INFORMATION: u8 = 0x03;
pub const OPT_DODAG_CONFIGURATION: u8 = 0x04;
pub const OPT_RPL_TARGET: u8 = 0x05;
pub const OPT_TRANSIT_INFORMATION: u8 = 0x06;
pub const OPT_SOLICITED_INFORMATION: u8 = 0x07;
pub const OPT_PREFIX_INFORMATION: u8 = 0x08;
pub const OPT_TARGET_DESCRIPTOR: u8 = 0x09;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RplOption {
    Pad1,
    PadN { len: u8 },
    DagMetricContainer { data: Vec<u8> },
    RoutingInformation {
        prefix_len: u8,
        prf: u8,
        route_lifetime: u32,
        prefix: Vec<u8>,
    },
    DodagConfiguration {
        authenticated: bool,
        pcs: u8,
        dio_int_doublings: u8,
        dio_int_min: u8,
        dio_redundancy_const: u8,
        max_rank_increase: u16,
        min_hop_rank_increase: u16,
        ocp: u16,
        default_lifetime: u8,
        lifetime_unit: u16,
    },
    RplTarget {
        flags: u8,
        prefix_len: u8,
        target_prefix: Vec<u8>,
    },
    TransitInformation {
        external: bool,
        path_control: u8,
        path_sequence: Lollipop,
        path_lifetime: u8,
        parent_address: Option<Ipv6Addr>,
    },
    SolicitedInformation {
        instance_id: u8,
        version_predicate: bool,
        instance_predicate: bool,
        dodag_predicate: bool,
        dodag_id: Ipv6Addr,
        version: Lollipop,
    },
    PrefixInformation {
        prefix_len: u8,
        on_link: bool,
        autonomous: bool,
        router_address: bool,
        valid_lifetime: u32,
        preferred_lifetime: u32,
        prefix: Ipv6Addr,
    },
    TargetDescriptor {
        descriptor: u32,
    },
}

impl RplOption {
    pub fn option_type(&self) -> u8 {
        match self {
            Self::Pad1 => OPT_PAD1,
            Self::PadN { .. } => OPT_PADN,
            Self::DagMetricContainer { .. } => OPT_DAG_METRIC_CONTAINER,
            Self::RoutingInformation { .. } => OPT_ROUTING_INFORMATION,
            Self::DodagConfiguration { .. } => OPT_DODAG_CONFIGURATION,
            Self::RplTarget { .. } => OPT_RPL_TARGET,
            Self::TransitInformation { .. } => OPT_TRANSIT_INFORMATION,
            Self::SolicitedInformation { .. } => OPT_SOLICITED_INFORMATION,
            Self::PrefixInformation { .. } => OPT_PREFIX_INFORMATION,
            Self::TargetDescriptor { .. } => OPT_TARGET_DESCRIPTOR,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            Self::Pad1 => {
                buf.push(OPT_PAD1);
            }
            Self::PadN { len } => {
                buf.push(OPT_PADN);
                buf.push(*len);
                buf.extend(std::iter::repeat(0u8).take(*len as usize));
            }
            Self::DagMetricContainer { data } => {
                buf.push(OPT_DAG_METRIC_CONTAINER);
                buf.push(data.len() as u8);
                buf.extend_from_slice(data);
            }
            Self::RoutingInformation { prefix_len, prf, route_lifetime, prefix } => {
                buf.push(OPT_ROUTING_INFORMATION);
                buf.push((prefix.len() + 6) as u8);
                buf.push(*prefix_len);
                buf.push((*prf & 0x03) << 3);
                buf.extend_from_slice(&route_lifetime.to_be_bytes());
                buf.extend_from_slice(prefix);
            }
            Self::DodagConfiguration {
                authenticated,
                pcs,
                dio_int_doublings,
                dio_int_min,
                dio_redundancy_const,
                max_rank_increase,
                min_hop_rank_increase,
                ocp,
                default_lifetime,
                lifetime_unit,
            } => {
                buf.push(OPT_DODAG_CONFIGURATION);
                buf.push(14);
                let flags = (if *authenticated { 0x80 } else { 0 }) | (pcs & 0x07);
                buf.push(flags);
                buf.push(*dio_int_doublings);
                buf.push(*dio_int_min);
                buf.push(*dio_redundancy_const);
                buf.extend_from_slice(&max_rank_increase.to_be_bytes());
                buf.extend_from_slice(&min_hop_rank_increase.to_be_bytes());
                buf.extend_from_slice(&ocp.to_be_bytes());
                buf.push(0); // reserved
                buf.push(*default_lifetime);
                buf.extend_from_slice(&lifetime_unit.to_be_bytes());
            }
            Self::RplTarget { flags, prefix_len, target_prefix } => {
                buf.push(OPT_RPL_TARGET);
                buf.push((target_prefix.len() + 2) as u8);
                buf.push(*flags);
                buf.push(*prefix_len);
                buf.extend_from_slice(target_prefix);
            }
            Self::TransitInformation { external, path_control, path_sequence, path_lifetime, parent_address } => {
                buf.push(OPT_TRANSIT_INFORMATION);
                let addr_len = if parent_address.is_some() { 16 } else { 0 };
                buf.push((addr_len + 4) as u8);
                let flags = if *external { 0x80 } else { 0 };
                buf.push(flags);
                buf.push(*path_control);
                buf.push(path_sequence.value());
                buf.push(*path_lifetime);
                if let Some(addr) = parent_address {
                    buf.extend_from_slice(&addr.octets());
                }
            }
            Self::SolicitedInformation {
                instance_id,
                version_predicate,
                instance_predicate,
                dodag_predicate,
                dodag_id,
                version,
            } => {
                buf.push(OPT_SOLICITED_INFORMATION);
                buf.push(19);
                buf.push(*instance_id);
                let flags = (if *version_predicate { 0x80 } else { 0 })
                    | (if *instance_predicate { 0x40 } else { 0 })
                    | (if *dodag_predicate { 0x20 } else { 0 });
                buf.push(flags);
                buf.extend_from_slice(&dodag_id.octets());
                buf.push(version.value());
            }
            Self::PrefixInformation {
                prefix_len,
                on_link,
                autonomous,
                router_address,
                valid_lifetime,
                preferred_lifetime,
                prefix,
            } => {
                buf.push(OPT_PREFIX_INFORMATION);
                buf.push(30);
                buf.push(*prefix_len);
                let flags = (if *on_link { 0x80 } else { 0 })
                    | (if *autonomous { 0x40 } else { 0 })
                    | (if *router_address { 0x20 } else { 0 });
                buf.push(flags);
                buf.extend_from_slice(&valid_lifetime.to_be_bytes());
                buf.extend_from_slice(&preferred_lifetime.to_be_bytes());
                buf.extend_from_slice(&0u32.to_be_bytes());
                buf.extend_from_slice(&prefix.octets());
            }
            Self::TargetDescriptor { descriptor } => {
                buf.push(OPT_TARGET_DESCRIPTOR);
                buf.push(4);
                buf.extend_from_slice(&descriptor.to_be_bytes());
            }
        }
        Ok(())
    }

    /// Decode one option starting at `buf[0]`. Returns the option and the
    /// number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.is_empty() {
            return Err(CodecError::Truncated { need: 1, have: 0 });
        }
        let opt_type = buf[0];
        if opt_type == OPT_PAD1 {
            return Ok((Self::Pad1, 1));
        }
        if buf.len() < 2 {
            return Err(CodecError::Truncated { need: 2, have: buf.len() });
        }
        let len = buf[1] as usize;
        let total = 2 + len;
        if buf.len() < total {
            return Err(CodecError::Truncated { need: total, have: buf.len() });
        }
        let body = &buf[2..total];

        let opt = match opt_type {
            OPT_PADN => Self::PadN { len: len as u8 },
            OPT_DAG_METRIC_CONTAINER => Self::DagMetricContainer { data: body.to_vec() },
            OPT_ROUTING_INFORMATION => {
                if len < 6 {
                    return Err(CodecError::LengthUnderflow { declared: len, min: 6 });
                }
                Self::RoutingInformation {
                    prefix_len: body[0],
                    prf: (body[1] >> 3) & 0x03,
                    route_lifetime: u32::from_be_bytes([body[2], body[3], body[4], body[5]]),
                    prefix: body[6..].to_vec(),
                }
            }
            OPT_DODAG_CONFIGURATION => {
                if len < 14 {
                    return Err(CodecError::LengthUnderflow { declared: len, min: 14 });
                }
                Self::DodagConfiguration {
                    authenticated: body[0] & 0x80 != 0,
                    pcs: body[0] & 0x07,
                    dio_int_doublings: body[1],
                    dio_int_min: body[2],
                    dio_redundancy_const: body[3],
                    max_rank_increase: u16::from_be_bytes([body[4], body[5]]),
                    min_hop_rank_increase: u16::from_be_bytes([body[6], body[7]]),
                    ocp: u16::from_be_bytes([body[8], body[9]]),
                    default_lifetime: body[11],
                    lifetime_unit: u16::from_be_bytes([body[12], body[13]]),
                }
            }
            OPT_RPL_TARGET => {
                if len < 2 {
                    return Err(CodecError::LengthUnderflow { declared: len, min: 2 });
                }
                Self::RplTarget {
                    flags: body[0],
                    prefix_len: body[1],
                    target_prefix: body[2..].to_vec(),
                }
            }
            OPT_TRANSIT_INFORMATION => {
                if len < 4 {
                    return Err(CodecError::LengthUnderflow { declared: len, min: 4 });
                }
                let parent_address = if len >= 4 + 16 {
                    let mut o = [0u8; 16];
                    o.copy_from_slice(&body[4..20]);
                    Some(Ipv6Addr::from(o))
                } else {
                    None
                };
                Self::TransitInformation {
                    external: body[0] & 0x80 != 0,
                    path_control: body[1],
                    path_sequence: Lollipop::new(body[2] as u16).map_err(|_| CodecError::FieldRange("path_sequence"))?,
                    path_lifetime: body[3],
                    parent_address,
                }
            }
            OPT_SOLICITED_INFORMATION => {
                if len < 19 {
                    return Err(CodecError::LengthUnderflow { declared: len, min: 19 });
                }
                let mut dodag_id = [0u8; 16];
                dodag_id.copy_from_slice(&body[2..18]);
                Self::SolicitedInformation {
                    instance_id: body[0],
                    version_predicate: body[1] & 0x80 != 0,
                    instance_predicate: body[1] & 0x40 != 0,
                    dodag_predicate: body[1] & 0x20 != 0,
                    dodag_id: Ipv6Addr::from(dodag_id),
                    version: Lollipop::new(body[18] as u16).map_err(|_| CodecError::FieldRange("version"))?,
                }
            }
            OPT_PREFIX_INFORMATION => {
                if len < 30 {
                    return Err(CodecError::LengthUnderflow { declared: len, min: 30 });
                }
                let mut prefix = [0u8; 16];
                prefix.copy_from_slice(&body[13..29]);
                Self::PrefixInformation {
                    prefix_len: body[0],
                    on_link: body[1] & 0x80 != 0,
                    autonomous: body[1] & 0x40 != 0,
                    router_address: body[1] & 0x20 != 0,
                    valid_lifetime: u32::from_be_bytes([body[2], body[3], body[4], body[5]]),
                    preferred_lifetime: u32::from_be_bytes([body[6], body[7], body[8], body[9]]),
                    prefix: Ipv6Addr::from(prefix),
                }
            }
            OPT_TARGET_DESCRIPTOR => {
                if len < 4 {
                    return Err(CodecError::LengthUnderflow { declared: len, min: 4 });
                }
                Self::TargetDescriptor {
                    descriptor: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
                }
            }
            other => return Err(CodecError::UnknownOption(other)),
        };
        Ok((opt, total))
    }
}

/// Walk the option TLV area and decode every option in order.
/// Unknown option types fail the whole walk (SPEC_FULL §4.2).
pub fn get_all_options(buf: &[u8]) -> Result<Vec<RplOption>, CodecError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let (opt, consumed) = RplOption::decode(&buf[pos..])?;
        out.push(opt);
        pos += consumed;
    }
    Ok(out)
}

/// Find the `position`-th (0-indexed) occurrence of option type `opt_type`
/// in the TLV area.
pub fn find_option(buf: &[u8], opt_type: u8, position: usize) -> Result<Option<RplOption>, CodecError> {
    let mut seen = 0;
    let mut pos = 0;
    while pos < buf.len() {
        let (opt, consumed) = RplOption::decode(&buf[pos..])?;
        if opt.option_type() == opt_type {
            if seen == position {
                return Ok(Some(opt));
            }
            seen += 1;
        }
        pos += consumed;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(opt: RplOption) {
        let mut buf = Vec::new();
        opt.encode(&mut buf).unwrap();
        let (decoded, consumed) = RplOption::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, opt);
    }

    #[test]
    fn pad1_roundtrip() {
        roundtrip(RplOption::Pad1);
    }

    #[test]
    fn padn_roundtrip() {
        roundtrip(RplOption::PadN { len: 3 });
    }

    #[test]
    fn dodag_configuration_roundtrip() {
        roundtrip(RplOption::DodagConfiguration {
            authenticated: false,
            pcs: 0,
            dio_int_doublings: 20,
            dio_int_min: 3,
            dio_redundancy_const: 10,
            max_rank_increase: 0,
            min_hop_rank_increase: 256,
            ocp: 0,
            default_lifetime: 30,
            lifetime_unit: 60,
        });
    }

    #[test]
    fn prefix_information_roundtrip() {
        roundtrip(RplOption::PrefixInformation {
            prefix_len: 64,
            on_link: false,
            autonomous: true,
            router_address: false,
            valid_lifetime: u32::MAX,
            preferred_lifetime: u32::MAX,
            prefix: "2001:db8::".parse().unwrap(),
        });
    }

    #[test]
    fn transit_information_with_parent_roundtrip() {
        roundtrip(RplOption::TransitInformation {
            external: false,
            path_control: 0,
            path_sequence: Lollipop::new(240).unwrap(),
            path_lifetime: 30,
            parent_address: Some("fe80::1".parse().unwrap()),
        });
    }

    #[test]
    fn rpl_target_roundtrip() {
        roundtrip(RplOption::RplTarget {
            flags: 0,
            prefix_len: 128,
            target_prefix: vec![0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x42],
        });
    }

    #[test]
    fn solicited_information_roundtrip() {
        roundtrip(RplOption::SolicitedInformation {
            instance_id: 0,
            version_predicate: true,
            instance_predicate: true,
            dodag_predicate: true,
            dodag_id: "2001:db8::1".parse().unwrap(),
            version: Lollipop::new(240).unwrap(),
        });
    }

    #[test]
    fn get_all_options_walks_sequence_and_stops_on_unknown() {
        let mut buf = Vec::new();
        RplOption::Pad1.encode(&mut buf).unwrap();
        RplOption::PadN { len: 2 }.encode(&mut buf).unwrap();
        let opts = get_all_options(&buf).unwrap();
        assert_eq!(opts.len(), 2);

        buf.push(0x7f); // unknown type
        buf.push(0x00);
        assert!(get_all_options(&buf).is_err());
    }

    #[test]
    fn find_option_returns_nth_match() {
        let mut buf = Vec::new();
        RplOption::RplTarget { flags: 0, prefix_len: 128, target_prefix: vec![1; 16] }
            .encode(&mut buf)
            .unwrap();
        RplOption::RplTarget { flags: 0, prefix_len: 128, target_prefix: vec![2; 16] }
            .encode(&mut buf)
            .unwrap();
        let second = find_option(&buf, OPT_RPL_TARGET, 1).unwrap().unwrap();
        match second {
            RplOption::RplTarget { target_prefix, .. } => assert_eq!(target_prefix, vec![2; 16]),
            _ => panic!("wrong option"),
        }
    }

    #[test]
    fn truncated_option_is_rejected() {
        let buf = [OPT_DODAG_CONFIGURATION, 14, 0, 0];
        assert!(matches!(RplOption::decode(&buf), Err(CodecError::Truncated { .. })));
    }
}
