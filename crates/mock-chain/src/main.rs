//! Mock chain server for local testing of confidential auctions.
//!
//! This provides a JSON-RPC server that simulates on-chain state management
//! for the auction module without requiring a real blockchain. The server
//! owns chain time, the token registry, the in-memory coprocessor and the
//! decryption gateway. A background relayer delivers decryptions back to
//! the module, standing in for the off-chain gateway service.

use anyhow::{Context, Result};
use clap::Parser;
use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::Server;
use jsonrpsee::types::ErrorObjectOwned;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use auction_fhe::{Decryptor, EncryptedInput, Fhe, MockFhe};
use auction_module::{
    handle_call, handle_query, relay_pending_decryptions, AuctionCall, AuctionGenesisConfig,
    AuctionQuery, AuctionQueryResponse, CallContext, CallOutcome, DeployParams, Host,
    ModuleState,
};
use auction_token::ConfidentialLedger;
use auction_types::{compute_token_id, Address, AuctionEvent, Handle, Width};

mod types;
use types::*;

/// Sender recorded for calls made by the relayer.
const RELAYER: Address = [0u8; 32];

/// Command line options.
#[derive(Debug, Parser)]
#[command(name = "mock-chain", about = "JSON-RPC mock chain for confidential auctions")]
struct Args {
    /// Address to serve JSON-RPC on
    #[arg(long, default_value = "127.0.0.1:9944")]
    listen: SocketAddr,

    /// Genesis configuration (JSON); defaults apply when omitted
    #[arg(long)]
    genesis: Option<PathBuf>,

    /// Simulated seconds a decryption waits before the relayer delivers it
    #[arg(long, default_value_t = 0)]
    relay_delay: u64,

    /// Relayer polling interval in milliseconds; 0 disables the relayer
    #[arg(long, default_value_t = 500)]
    relay_interval_ms: u64,

    /// Chain timestamp at startup
    #[arg(long, default_value_t = 1_700_000_000)]
    initial_timestamp: u64,
}

/// Shared chain state.
struct ChainState {
    /// Module state
    module: ModuleState,
    /// Coprocessor, gateway and tokens
    host: Host<MockFhe>,
    /// Current block height (simulated)
    block_height: u64,
    /// Current timestamp (simulated, can be advanced)
    timestamp: u64,
}

impl ChainState {
    fn new(config: AuctionGenesisConfig, timestamp: u64) -> Self {
        Self {
            module: ModuleState::new(config),
            host: Host::new(MockFhe::new()),
            block_height: 0,
            timestamp,
        }
    }

    fn advance_block(&mut self) {
        self.block_height += 1;
        self.timestamp += 12; // ~12 second blocks
    }

    fn context(&self, sender: Address) -> CallContext {
        CallContext {
            sender,
            block_height: self.block_height,
            timestamp: self.timestamp,
        }
    }

    fn block_info(&self) -> BlockInfo {
        BlockInfo {
            height: self.block_height,
            timestamp: self.timestamp,
        }
    }
}

/// RPC API definition for the mock chain.
#[rpc(server)]
pub trait MockChainApi {
    // ============ Admin Methods ============

    /// Advance the chain by one block.
    #[method(name = "admin_advanceBlock")]
    async fn admin_advance_block(&self) -> Result<BlockInfo, ErrorObjectOwned>;

    /// Set the current timestamp (for testing time-dependent logic).
    #[method(name = "admin_setTimestamp")]
    async fn admin_set_timestamp(&self, timestamp: u64) -> Result<BlockInfo, ErrorObjectOwned>;

    /// Move the clock forward without producing a block.
    #[method(name = "admin_advanceTime")]
    async fn admin_advance_time(&self, seconds: u64) -> Result<BlockInfo, ErrorObjectOwned>;

    // ============ Token Methods ============

    /// Register a confidential token; returns its id.
    #[method(name = "token_create")]
    async fn token_create(&self, params: CreateTokenParams) -> Result<String, ErrorObjectOwned>;

    #[method(name = "token_mint")]
    async fn token_mint(
        &self,
        token: String,
        to: String,
        amount: u128,
    ) -> Result<bool, ErrorObjectOwned>;

    /// Approve `spender` (typically an auction escrow) for a cleartext amount.
    #[method(name = "token_approve")]
    async fn token_approve(
        &self,
        token: String,
        owner: String,
        spender: String,
        amount: u128,
    ) -> Result<bool, ErrorObjectOwned>;

    /// Handle of an account's encrypted balance.
    #[method(name = "token_balanceOf")]
    async fn token_balance_of(
        &self,
        token: String,
        account: String,
    ) -> Result<Option<String>, ErrorObjectOwned>;

    // ============ Coprocessor Methods ============

    /// Encrypt a value client-side for `owner`.
    #[method(name = "fhe_encryptInput")]
    async fn fhe_encrypt_input(
        &self,
        owner: String,
        value: u128,
        width: Width,
    ) -> Result<EncryptedInputRpc, ErrorObjectOwned>;

    /// Decrypt a handle `account` has been granted access to.
    #[method(name = "fhe_userDecrypt")]
    async fn fhe_user_decrypt(
        &self,
        account: String,
        handle: String,
    ) -> Result<u128, ErrorObjectOwned>;

    // ============ Auction Methods ============

    /// Deploy a new auction.
    #[method(name = "auction_deploy")]
    async fn auction_deploy(&self, params: DeployAuctionParams) -> Result<u64, ErrorObjectOwned>;

    /// Escrow the supply; returns the decryption request id.
    #[method(name = "auction_depositAuction")]
    async fn auction_deposit_auction(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<String, ErrorObjectOwned>;

    /// Submit an encrypted bid; returns the bid index.
    #[method(name = "auction_bid")]
    async fn auction_bid(&self, params: SubmitBidParams) -> Result<u64, ErrorObjectOwned>;

    #[method(name = "auction_cancel")]
    async fn auction_cancel(&self, sender: String, auction_id: u64)
        -> Result<bool, ErrorObjectOwned>;

    /// Start or restart the clearing search.
    #[method(name = "auction_startWithdrawalDecryption")]
    async fn auction_start_withdrawal_decryption(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<String, ErrorObjectOwned>;

    /// Request the next search step; returns the decryption request id.
    #[method(name = "auction_stepWithdrawalDecryption")]
    async fn auction_step_withdrawal_decryption(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<String, ErrorObjectOwned>;

    #[method(name = "auction_pullAuctioneer")]
    async fn auction_pull_auctioneer(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<bool, ErrorObjectOwned>;

    #[method(name = "auction_pullBid")]
    async fn auction_pull_bid(
        &self,
        sender: String,
        auction_id: u64,
        bidder: String,
        index: u64,
    ) -> Result<bool, ErrorObjectOwned>;

    #[method(name = "auction_recoverAuctioneer")]
    async fn auction_recover_auctioneer(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<bool, ErrorObjectOwned>;

    #[method(name = "auction_recoverBidder")]
    async fn auction_recover_bidder(
        &self,
        sender: String,
        auction_id: u64,
        bidder: String,
    ) -> Result<bool, ErrorObjectOwned>;

    /// Take the events an auction emitted since the last call.
    #[method(name = "auction_drainEvents")]
    async fn auction_drain_events(
        &self,
        auction_id: u64,
    ) -> Result<Vec<AuctionEvent>, ErrorObjectOwned>;

    // ============ Gateway Methods ============

    #[method(name = "gateway_pendingRequests")]
    async fn gateway_pending_requests(&self) -> Result<Vec<String>, ErrorObjectOwned>;

    /// Deliver pending decryptions at least `min_age` seconds old.
    #[method(name = "gateway_relay")]
    async fn gateway_relay(&self, min_age: u64) -> Result<Vec<RelayOutcomeRpc>, ErrorObjectOwned>;

    /// Discard a request, simulating a lost callback.
    #[method(name = "gateway_dropRequest")]
    async fn gateway_drop_request(&self, request_id: String) -> Result<bool, ErrorObjectOwned>;

    // ============ Query Methods ============

    /// Get current block info.
    #[method(name = "chain_getBlockInfo")]
    async fn chain_get_block_info(&self) -> Result<BlockInfo, ErrorObjectOwned>;

    #[method(name = "query_auction")]
    async fn query_auction(
        &self,
        query: AuctionQuery,
    ) -> Result<AuctionQueryResponse, ErrorObjectOwned>;
}

/// Implementation of the mock chain RPC server.
struct MockChainServer {
    state: Arc<RwLock<ChainState>>,
}

impl MockChainServer {
    fn new(state: Arc<RwLock<ChainState>>) -> Self {
        Self { state }
    }

    /// Run an auction call as `sender` at the current block.
    fn execute(&self, sender: &str, call: AuctionCall) -> Result<CallOutcome, ErrorObjectOwned> {
        let sender = parse_hex32(sender, "sender")?;
        let mut guard = self.state.write();
        let chain = &mut *guard;
        let ctx = chain.context(sender);
        handle_call(&mut chain.module, &mut chain.host, &ctx, call)
            .map_err(|e| rpc_error(&e.to_string()))
    }

    fn execute_done(&self, sender: &str, call: AuctionCall) -> Result<bool, ErrorObjectOwned> {
        match self.execute(sender, call)? {
            CallOutcome::Done => Ok(true),
            other => Err(unexpected(other)),
        }
    }

    fn execute_request(&self, sender: &str, call: AuctionCall) -> Result<String, ErrorObjectOwned> {
        match self.execute(sender, call)? {
            CallOutcome::DecryptionRequested(request_id) => Ok(hex::encode(request_id)),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(outcome: CallOutcome) -> ErrorObjectOwned {
    rpc_error(&format!("Unexpected call outcome {:?}", outcome))
}

#[async_trait]
impl MockChainApiServer for MockChainServer {
    async fn admin_advance_block(&self) -> Result<BlockInfo, ErrorObjectOwned> {
        let mut state = self.state.write();
        state.advance_block();
        Ok(state.block_info())
    }

    async fn admin_set_timestamp(&self, timestamp: u64) -> Result<BlockInfo, ErrorObjectOwned> {
        let mut state = self.state.write();
        state.timestamp = timestamp;
        info!("Timestamp set to {}", timestamp);
        Ok(state.block_info())
    }

    async fn admin_advance_time(&self, seconds: u64) -> Result<BlockInfo, ErrorObjectOwned> {
        let mut state = self.state.write();
        state.timestamp = state.timestamp.saturating_add(seconds);
        debug!(timestamp = state.timestamp, "Clock advanced");
        Ok(state.block_info())
    }

    async fn token_create(&self, params: CreateTokenParams) -> Result<String, ErrorObjectOwned> {
        let mut state = self.state.write();
        let id = compute_token_id(&params.symbol);
        let width = params.width.unwrap_or(Width::U64);
        state
            .host
            .tokens
            .register(id, Box::new(ConfidentialLedger::new(params.symbol.clone(), width)))
            .map_err(|e| rpc_error(&e.to_string()))?;
        info!(symbol = %params.symbol, id = hex::encode(id), "Created token");
        Ok(hex::encode(id))
    }

    async fn token_mint(
        &self,
        token: String,
        to: String,
        amount: u128,
    ) -> Result<bool, ErrorObjectOwned> {
        let token = parse_hex32(&token, "token")?;
        let to = parse_hex32(&to, "recipient")?;
        let mut guard = self.state.write();
        let host = &mut guard.host;
        host.tokens
            .get_mut(&token)
            .map_err(|e| rpc_error(&e.to_string()))?
            .mint(&mut host.fhe, &to, amount)
            .map_err(|e| rpc_error(&format!("Failed to mint: {}", e)))?;
        Ok(true)
    }

    async fn token_approve(
        &self,
        token: String,
        owner: String,
        spender: String,
        amount: u128,
    ) -> Result<bool, ErrorObjectOwned> {
        let token = parse_hex32(&token, "token")?;
        let owner = parse_hex32(&owner, "owner")?;
        let spender = parse_hex32(&spender, "spender")?;
        let mut guard = self.state.write();
        let host = &mut guard.host;
        let ledger = host
            .tokens
            .get_mut(&token)
            .map_err(|e| rpc_error(&e.to_string()))?;
        let allowance = host.fhe.trivial(amount, ledger.amount_width());
        ledger
            .approve(&mut host.fhe, &owner, &spender, allowance)
            .map_err(|e| rpc_error(&format!("Failed to approve: {}", e)))?;
        Ok(true)
    }

    async fn token_balance_of(
        &self,
        token: String,
        account: String,
    ) -> Result<Option<String>, ErrorObjectOwned> {
        let token = parse_hex32(&token, "token")?;
        let account = parse_hex32(&account, "account")?;
        let state = self.state.read();
        let ledger = state
            .host
            .tokens
            .get(&token)
            .map_err(|e| rpc_error(&e.to_string()))?;
        Ok(ledger.balance_of(&account).map(|b| b.handle.to_hex()))
    }

    async fn fhe_encrypt_input(
        &self,
        owner: String,
        value: u128,
        width: Width,
    ) -> Result<EncryptedInputRpc, ErrorObjectOwned> {
        let owner = parse_hex32(&owner, "owner")?;
        let mut state = self.state.write();
        let input = state.host.fhe.encrypt_input(value, width, &owner);
        Ok(EncryptedInputRpc::from(&input))
    }

    async fn fhe_user_decrypt(
        &self,
        account: String,
        handle: String,
    ) -> Result<u128, ErrorObjectOwned> {
        let account = parse_hex32(&account, "account")?;
        let handle = Handle(parse_hex32(&handle, "handle")?);
        let state = self.state.read();
        state
            .host
            .fhe
            .user_decrypt(&handle, &account)
            .map_err(|e| rpc_error(&e.to_string()))
    }

    async fn auction_deploy(&self, params: DeployAuctionParams) -> Result<u64, ErrorObjectOwned> {
        let call = AuctionCall::Deploy(DeployParams {
            auction_token: parse_hex32(&params.auction_token, "auction token")?,
            supply: params.supply,
            base_token: parse_hex32(&params.base_token, "base token")?,
            end_time: params.end_time,
            min_price: params.min_price,
            max_price: params.max_price,
            settlement: params.settlement,
        });
        match self.execute(&params.sender, call)? {
            CallOutcome::Deployed(auction_id) => {
                info!("Deployed auction {}", auction_id);
                Ok(auction_id)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn auction_deposit_auction(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<String, ErrorObjectOwned> {
        self.execute_request(&sender, AuctionCall::DepositAuction { auction_id })
    }

    async fn auction_bid(&self, params: SubmitBidParams) -> Result<u64, ErrorObjectOwned> {
        let quantity = EncryptedInput::try_from(&params.quantity)?;
        let call = AuctionCall::Bid {
            auction_id: params.auction_id,
            price: params.price,
            quantity,
        };
        match self.execute(&params.sender, call)? {
            CallOutcome::BidPlaced(index) => {
                info!(
                    "Bid {} submitted for auction {} by {}",
                    index, params.auction_id, params.sender
                );
                Ok(index)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn auction_cancel(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<bool, ErrorObjectOwned> {
        self.execute_done(&sender, AuctionCall::Cancel { auction_id })
    }

    async fn auction_start_withdrawal_decryption(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<String, ErrorObjectOwned> {
        match self.execute(&sender, AuctionCall::StartWithdrawalDecryption { auction_id })? {
            CallOutcome::State(state) => Ok(state.as_str().to_string()),
            other => Err(unexpected(other)),
        }
    }

    async fn auction_step_withdrawal_decryption(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<String, ErrorObjectOwned> {
        self.execute_request(&sender, AuctionCall::StepWithdrawalDecryption { auction_id })
    }

    async fn auction_pull_auctioneer(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<bool, ErrorObjectOwned> {
        self.execute_done(&sender, AuctionCall::PullAuctioneer { auction_id })
    }

    async fn auction_pull_bid(
        &self,
        sender: String,
        auction_id: u64,
        bidder: String,
        index: u64,
    ) -> Result<bool, ErrorObjectOwned> {
        let bidder = parse_hex32(&bidder, "bidder")?;
        self.execute_done(
            &sender,
            AuctionCall::PullBid {
                auction_id,
                bidder,
                index,
            },
        )
    }

    async fn auction_recover_auctioneer(
        &self,
        sender: String,
        auction_id: u64,
    ) -> Result<bool, ErrorObjectOwned> {
        self.execute_done(&sender, AuctionCall::RecoverAuctioneer { auction_id })
    }

    async fn auction_recover_bidder(
        &self,
        sender: String,
        auction_id: u64,
        bidder: String,
    ) -> Result<bool, ErrorObjectOwned> {
        let bidder = parse_hex32(&bidder, "bidder")?;
        self.execute_done(&sender, AuctionCall::RecoverBidder { auction_id, bidder })
    }

    async fn auction_drain_events(
        &self,
        auction_id: u64,
    ) -> Result<Vec<AuctionEvent>, ErrorObjectOwned> {
        let mut state = self.state.write();
        Ok(state.module.drain_events(auction_id))
    }

    async fn gateway_pending_requests(&self) -> Result<Vec<String>, ErrorObjectOwned> {
        let state = self.state.read();
        Ok(state
            .host
            .gateway
            .pending_requests()
            .iter()
            .map(hex::encode)
            .collect())
    }

    async fn gateway_relay(&self, min_age: u64) -> Result<Vec<RelayOutcomeRpc>, ErrorObjectOwned> {
        let mut guard = self.state.write();
        let chain = &mut *guard;
        let ctx = chain.context(RELAYER);
        let outcomes = relay_pending_decryptions(&mut chain.module, &mut chain.host, &ctx, min_age);
        Ok(outcomes.into_iter().map(RelayOutcomeRpc::from).collect())
    }

    async fn gateway_drop_request(&self, request_id: String) -> Result<bool, ErrorObjectOwned> {
        let request_id = parse_hex32(&request_id, "request id")?;
        let mut state = self.state.write();
        Ok(state.host.gateway.drop_request(&request_id).is_some())
    }

    async fn chain_get_block_info(&self) -> Result<BlockInfo, ErrorObjectOwned> {
        let state = self.state.read();
        Ok(state.block_info())
    }

    async fn query_auction(
        &self,
        query: AuctionQuery,
    ) -> Result<AuctionQueryResponse, ErrorObjectOwned> {
        let state = self.state.read();
        handle_query(&state.module, query).map_err(|e| rpc_error(&e.to_string()))
    }
}

/// Deliver decryptions in the background, like the off-chain gateway would.
fn spawn_relayer(
    state: Arc<RwLock<ChainState>>,
    delay: u64,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let outcomes = {
                let mut guard = state.write();
                let chain = &mut *guard;
                let ctx = chain.context(RELAYER);
                relay_pending_decryptions(&mut chain.module, &mut chain.host, &ctx, delay)
            };
            if !outcomes.is_empty() {
                let rejected = outcomes.iter().filter(|o| o.result.is_err()).count();
                debug!(delivered = outcomes.len(), rejected, "Relayer pass");
            }
        }
    })
}

fn load_genesis(path: Option<&PathBuf>) -> Result<AuctionGenesisConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading genesis {}", path.display()))?;
            serde_json::from_str(&raw).context("parsing genesis")?
        }
        None => AuctionGenesisConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mock_chain=info".parse()?)
                .add_directive("jsonrpsee=warn".parse()?),
        )
        .init();

    let args = Args::parse();
    let genesis = load_genesis(args.genesis.as_ref())?;
    let state = Arc::new(RwLock::new(ChainState::new(genesis, args.initial_timestamp)));

    let relayer = (args.relay_interval_ms > 0).then(|| {
        info!(
            delay = args.relay_delay,
            interval_ms = args.relay_interval_ms,
            "Starting decryption relayer"
        );
        spawn_relayer(
            state.clone(),
            args.relay_delay,
            Duration::from_millis(args.relay_interval_ms),
        )
    });

    info!("Starting mock chain server on {}", args.listen);

    let server = Server::builder().build(args.listen).await?;
    let handle = server.start(MockChainServer::new(state).into_rpc());

    info!("Mock chain server running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    if let Some(relayer) = relayer {
        relayer.abort();
    }
    handle.stop()?;
    handle.stopped().await;

    Ok(())
}
