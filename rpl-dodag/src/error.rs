use rpl_common::Lollipop;
use std::net::Ipv6Addr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DodagError {
    #[error("a DODAG with instanceID={instance_id} version={version} dodagID={dodag_id} is already tracked")]
    Duplicate { instance_id: u8, version: Lollipop, dodag_id: Ipv6Addr },
}
