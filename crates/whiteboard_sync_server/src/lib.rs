//! Whiteboard Sync Server
//!
//! The realtime gateway of the collaborative whiteboard: authenticates
//! WebSocket clients, tracks board membership and presence, arbitrates
//! concurrent shape edits through TTL-bounded shape locks, and fans every
//! accepted edit out to the other members of the board.
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3030)
//! - `REDIS_URL`: Redis connection URL for the ephemeral store
//!   (absent: in-process memory store)
//! - `TOKEN_SECRET`: Shared secret for bearer-token verification
//! - `LOCK_TTL_SECONDS`: Shape lock expiry (default: 120)
//! - `SESSION_TTL_SECONDS`: Client session record expiry (default: 43200)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins

pub mod auth;
pub mod config;
pub mod handlers;
pub mod locks;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod sync;

pub use config::Config;
