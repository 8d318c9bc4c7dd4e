//! Strongly-typed identifiers.
//!
//! Caller-supplied request ids are plain strings and may repeat across
//! namespaces (or even within one, when deduplication is disabled). Every
//! submission therefore also gets a `TicketId`: a ULID wrapped in a phantom
//! typed `Id<T>` so it cannot be mixed up with other id kinds.
//!
//! ## Phantom Type パターン
//! `Id<T>` は共通実装を持ち、`T` は実行時には使わないマーカー型。
//! コンパイル時の型安全性だけを提供する。

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Marker trait for each id kind. Provides the `Display` prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Allocate a fresh id.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Ticket のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ticket {}

impl IdMarker for Ticket {
    fn prefix() -> &'static str {
        "ticket-"
    }
}

/// Identifier of one submission tracked by an orchestrator.
pub type TicketId = Id<Ticket>;
