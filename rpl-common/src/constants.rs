//! RFC 6550 default constants, grounded on `original_source/RPL/rpl_constants.py`.

use std::net::Ipv6Addr;

/// All-RPL-nodes multicast address, `ff02::1a`.
pub const ALL_RPL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x1a);

/// RFC 6550 §6.3.1, the default DIO `Imin` exponent: `Imin = 2^DEFAULT_DIO_INTERVAL_MIN` ms.
pub const DEFAULT_DIO_INTERVAL_MIN: u8 = 3;
/// RFC 6550 §6.3.1, `Imax` doublings.
pub const DEFAULT_DIO_INTERVAL_DOUBLINGS: u8 = 20;
/// RFC 6550 §6.3.1, Trickle's redundancy constant `k`.
pub const DEFAULT_DIO_REDUNDANCY_CONSTANT: u8 = 10;

/// RFC 6550 §6.7.6, OF0's `MinHopRankIncrease` default.
pub const DEFAULT_MIN_HOP_RANK_INCREASE: u16 = 256;
/// Rank advertised by the DODAG root.
pub const ROOT_RANK: u16 = DEFAULT_MIN_HOP_RANK_INCREASE;
/// RFC 6550 §6.7.6, the poison/unreachable rank.
pub const INFINITE_RANK: u16 = 0xFFFF;
/// RFC 6550 §8.2.2.4, OF0's `MaxRankIncrease`: beyond this a DIO's rank
/// increase is not "legit" and the candidate parent is rejected.
pub const DEFAULT_MAX_RANK_INCREASE: u16 = 3 * DEFAULT_MIN_HOP_RANK_INCREASE;

/// RFC 6550 §9.5, seconds before a newly computed DAO is sent upward.
pub const DEFAULT_DAO_DELAY_SECS: u64 = 1;
/// Seconds before expecting a DAO-ACK once a DAO has been sent.
pub const DEFAULT_DAO_ACK_DELAY_SECS: u64 = 2;
/// Maximum number of times an unacknowledged DAO is retransmitted.
pub const DEFAULT_DAO_MAX_TRANS_RETRY: u8 = 3;
/// Maximum number of times a No-Path DAO is retransmitted before the
/// route is dropped from the no-path retransmission queue outright.
pub const DEFAULT_DAO_NO_PATH_TRANS: u8 = 3;

/// Minimum number of seconds between two unsolicited DIS broadcasts, RFC 6550 §8.3.
pub const DEFAULT_INTERVAL_BETWEEN_DIS_SECS: u64 = 300;

/// RFC 6550 §6.3.1, Mode of Operation this implementation supports:
/// Storing Mode of Operation with no multicast support.
pub const MOP_STORING_NO_MULTICAST: u8 = 2;

/// Default RPLInstanceID used for the single global instance rpld runs, per
/// SPEC_FULL's single-instance scope.
pub const RPL_DEFAULT_INSTANCE: u8 = 0;
