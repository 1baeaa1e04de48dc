//! Confidential uniform-price auction module.
//!
//! This module implements on-chain logic for sealed-quantity auctions:
//!
//! - Auction deployment with a linear price grid and configurable widths
//! - Encrypted bid quantities accumulated in an encrypted Fenwick tree
//! - Soft validation that never reveals whether a bid was accepted
//! - Clearing tick search driven by asynchronous decryption callbacks
//! - Escrow with first-come-first-served partial fills at the clearing tick
//!
//! # Architecture
//!
//! - `call`: Message types for state-changing operations
//! - `handlers`: Business logic for processing calls
//! - `queries`: Read-only state access
//! - `state`: On-chain state structures
//! - `genesis`: Initial configuration
//! - `pricing`: Price to tick conversion
//! - `locks`: Time locks guarding the externally stepped search
//! - `error_log`: Encrypted soft-failure codes
//! - `relay`: Delivery of gateway responses
//! - `error`: Error types
//!
//! # Example
//!
//! ```ignore
//! use auction_module::{handlers, relay, ModuleState};
//!
//! let mut state = ModuleState::default();
//! let mut host = handlers::Host::new(MockFhe::new());
//! let ctx = handlers::CallContext { ... };
//!
//! // Deploy and fund an auction
//! let auction_id = handlers::handle_deploy(&mut state, &mut host, &ctx, params)?;
//! handlers::handle_deposit_auction(&mut state, &mut host, &ctx, auction_id)?;
//! relay::relay_pending_decryptions(&mut state, &mut host, &ctx, 0);
//!
//! // Submit a bid
//! handlers::handle_bid(&mut state, &mut host, &ctx, auction_id, price, &input)?;
//! ```

pub mod call;
pub mod error;
pub mod error_log;
pub mod genesis;
pub mod handlers;
pub mod locks;
pub mod pricing;
pub mod queries;
pub mod relay;
pub mod state;

pub use call::{handle_call, AuctionCall, CallOutcome};
pub use error::AuctionError;
pub use genesis::{AuctionGenesisConfig, AuctionLimits, GenesisValidationError, SettlementParams};
pub use handlers::{AuctionCallback, CallContext, CallbackKind, DeployParams, HandlerResult, Host};
pub use locks::{LockTag, TimeLocks};
pub use pricing::{LinearDiscretization, PriceDiscretization, PricingError};
pub use queries::{handle_query, AuctionQuery, AuctionQueryResponse};
pub use relay::{deliver_decryption, relay_pending_decryptions, RelayOutcome};
pub use state::{Auction, ModuleState};
