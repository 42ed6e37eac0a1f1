//! Slot booking and conflict engine for football pitches.
//!
//! A reservation occupies one pitch for whole hours on one date. The
//! [`engine::Engine`] decides whether a booking may be created, moved or
//! cancelled without two confirmed reservations overlapping, and drives the
//! pending → confirmed → cancelled lifecycle around online payment.
//!
//! Storage, pricing lookup and payment are trait boundaries
//! ([`store::ReservationStore`], [`catalog::Catalog`],
//! [`payment::PaymentGateway`]). [`store::WalStore`] is the bundled durable
//! store: a write-ahead log replayed into an in-memory index.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod payment;
pub mod reaper;
pub mod store;
pub mod wal;
