//! # halftunnel-core — split-path tunneling session protocol
//!
//! The shared protocol library behind `halftunnel-entry` and
//! `halftunnel-exit`: a bidirectional stream is split across two
//! independently dialed carrier connections (an *upstream* carrying
//! client→server bytes and a *downstream* carrying server→client bytes),
//! correlated by a 128-bit session id, with many logical streams
//! multiplexed inside each session.
//!
//! ## Wire format
//!
//! | Field | Topic | How this crate uses it |
//! |-------|-------|-------------------------|
//! | [`packet`] | 34-byte framed packet header | Codec, flag predicates, packet-kind labeling |
//! | [`dest`] | CONNECT destination encoding | ATYP/address/port payload carried in the handshake packet |
//! | [`carrier`] | Message-framed duplex transport | `MessageConn`/`CarrierDialer`/`CarrierAcceptor` abstraction + one TCP implementation |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  entry / exit orchestrators (own crates)      │
//! ├──────────────────────────────────────────────┤
//! │  mux          — stream multiplexing, routing │
//! │  session      — session/stream registry      │
//! │  reassembly   — per-stream ordered delivery   │
//! │  keepalive    — keepalive/stall primitives    │
//! ├──────────────────────────────────────────────┤
//! │  packet       — wire codec                    │
//! │  carrier      — transport abstraction         │
//! │  dest         — CONNECT destination encoding  │
//! │  config       — shared config types           │
//! │  clock        — logical clock abstraction     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use halftunnel_core::clock::SystemClock;
//! use halftunnel_core::packet::SessionId;
//! use halftunnel_core::session::SessionStore;
//! use halftunnel_core::mux::Multiplexer;
//!
//! let store = SessionStore::new(Arc::new(SystemClock), 1 << 20);
//! let session = store.get_or_create(SessionId::random());
//! let mux = Multiplexer::new(session);
//! let stream_id = mux.open_stream().unwrap();
//! ```
//!
//! ## Crate layout
//!
//! - [`packet`] — [`packet::Packet`] wire codec and [`packet::SessionId`].
//! - [`dest`] — [`dest::Destination`] CONNECT encoding/decoding.
//! - [`session`] — [`session::SessionStore`], [`session::Session`], [`session::Stream`].
//! - [`reassembly`] — [`reassembly::ReassemblyBuffer`].
//! - [`mux`] — [`mux::Multiplexer`] stream routing and sequencing.
//! - [`carrier`] — [`carrier::MessageConn`] abstraction and its TCP implementation.
//! - [`keepalive`] — [`keepalive::KeepaliveMonitor`], [`keepalive::StallMonitor`].
//! - [`config`] — [`config::CoreConfig`] and related YAML-loadable structs.
//! - [`clock`] — [`clock::Clock`] abstraction and [`clock::SystemClock`]/[`clock::FakeClock`].
//! - [`error`] — [`error::HtError`] enum and [`error::Result`] alias.

pub mod carrier;
pub mod clock;
pub mod config;
pub mod dest;
pub mod error;
pub mod keepalive;
pub mod mux;
pub mod packet;
pub mod reassembly;
pub mod session;

pub use error::{HtError, Result};
pub use mux::Multiplexer;
pub use packet::{Packet, SessionId};
pub use session::{Session, SessionStore, Stream, StreamState};
