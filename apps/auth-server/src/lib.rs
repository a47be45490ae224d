// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Heron Auth Server - Google login with server-side sessions
//!
//! Delegates identity to Google's OpenID Connect endpoints and keeps its own
//! revocable sessions in an embedded database.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Login handshake, sessions and the request guard
//! - `config` - Settings read from the environment
//! - `storage` - Challenge, session, identity and allow-list stores (redb or memory)
//! - `sweeper` - Background purge of expired challenges and sessions

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod state;
pub mod storage;
pub mod sweeper;
