//! Generational handles shared between `rpl-dodag` and `rpl-neighbor`.
//!
//! A `Dodag` references its preferred parent by `NodeHandle` and a `Node`
//! references its owning DODAG by `DodagHandle`; defining both here, rather
//! than in whichever of those two crates "owns" the type, avoids a
//! dependency cycle between them (SPEC_FULL §9 "Cyclic references" — the
//! stable-handle idea applies just as much between these two sibling
//! crates as it does within either one's internal cache).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DodagHandle {
    pub index: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub index: usize,
    pub generation: u64,
}
