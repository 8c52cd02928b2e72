//! Indirection over `std::sync` vs `loom`'s mocked equivalents, so the
//! hand-rolled refcounting in [`crate::control`] can be exhaustively
//! model-checked under `loom` without duplicating its logic. Mirrors the
//! `not_loom`/`with_loom` split used elsewhere in the ecosystem for the
//! same reason.
#[cfg(not(loom))]
mod not_loom {
    pub(crate) use std::sync::atomic::*;
    pub(crate) use std::sync::Arc;
}

#[cfg(not(loom))]
pub(crate) use not_loom::*;

#[cfg(loom)]
mod with_loom {
    pub(crate) use loom::sync::atomic::*;
    pub(crate) use loom::sync::Arc;
}

#[cfg(loom)]
pub(crate) use with_loom::*;
