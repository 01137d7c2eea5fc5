//! Shared test helpers for swap coordinator tests
//!
//! Constants, an in-memory chain implementing `ChainConnector` with HTLC escrow
//! and resolver semantics, and a scripted order API.

#![allow(dead_code)]

use async_trait::async_trait;
use ethereum_types::{H160, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swap_coordinator::chains::abi::{encode_args, event_topic, keccak256};
use swap_coordinator::chains::evm::parse_evm_address;
use swap_coordinator::chains::{AbiValue, CallOptions, ChainConnector, ContractCall, LogEntry, Receipt, TxRef};
use swap_coordinator::config::ServiceConfig;
use swap_coordinator::crypto::{hash_commitment, Secret};
use swap_coordinator::error::{ChainError, SwapError};
use swap_coordinator::intent::{Amount, SwapIntent, TokenId};
use swap_coordinator::order_client::{
    FillEvent, OrderApi, OrderStatus, OrderSubmission, PlacedOrder, Quote, QuotePreset, QuoteRequest,
};
use swap_coordinator::service::escrow::HTLC_CREATED_EVENT;

// ============================================================================
// CONSTANTS
// ============================================================================

// -------------------------------- CHAINS --------------------------------

pub const SOURCE_CHAIN_ID: u64 = 11155111;
pub const DESTINATION_CHAIN_ID: u64 = 3448148188;

/// Chain time of both mock chains when the test starts
pub const GENESIS_TIME: u64 = 1_700_000_000;

/// Flat fee charged by the mock chains per transaction
pub const MOCK_TX_FEE: u64 = 21_000;

// -------------------------------- USERS ---------------------------------

/// Swap initiator (source-chain signer)
pub const INITIATOR_ADDR: &str = "0x0000000000000000000000000000000000000001";

/// Resolver operator (destination-chain signer)
pub const OPERATOR_ADDR: &str = "0x0000000000000000000000000000000000000002";

/// Resolver's account on the source chain, beneficiary of the lock
pub const COUNTERPARTY_ADDR: &str = "0x0000000000000000000000000000000000000003";

/// Destination-chain beneficiary of the swap
pub const BENEFICIARY_ADDR: &str = "0x0000000000000000000000000000000000000004";

// ------------------------- TOKENS AND CONTRACTS -------------------------

pub const ESCROW_ADDR: &str = "0x000000000000000000000000000000000000000e";
pub const RESOLVER_ADDR: &str = "0x000000000000000000000000000000000000000f";
pub const SOURCE_TOKEN_ADDR: &str = "0x000000000000000000000000000000000000000a";

/// Hardhat account #0 private key
pub const TEST_PRIVATE_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Address derived from `TEST_PRIVATE_KEY`
pub const TEST_SIGNER_ADDR: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

pub const DUMMY_TX_HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

pub const DUMMY_ORDER_HASH: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

/// 5,000,000 smallest units
pub const SWAP_AMOUNT: u64 = 5_000_000;

pub const ONE_HOUR: u64 = 3600;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

pub fn addr(value: &str) -> H160 {
    parse_evm_address(value).unwrap()
}

pub fn amount(value: u64) -> Amount {
    Amount::from(value)
}

/// Service settings with fast retries for tests.
pub fn test_service_config() -> ServiceConfig {
    ServiceConfig {
        poll_interval_ms: 100,
        max_retry_attempts: 3,
        backoff_base_ms: 10,
        confirmation_timeout_secs: 5,
        receipt_poll_interval_ms: 10,
        ..ServiceConfig::default()
    }
}

/// Native-to-native intent for `SWAP_AMOUNT` with a one hour timelock.
pub fn native_intent() -> SwapIntent {
    SwapIntent::new(
        SOURCE_CHAIN_ID,
        DESTINATION_CHAIN_ID,
        TokenId::Native,
        TokenId::Native,
        amount(SWAP_AMOUNT),
        BENEFICIARY_ADDR,
        ONE_HOUR,
    )
    .unwrap()
}

fn pad_address(address: &H160) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

// ============================================================================
// MOCK CHAIN
// ============================================================================

#[derive(Debug, Clone)]
pub struct MockHtlc {
    pub escrow: H160,
    pub sender: H160,
    pub beneficiary: H160,
    pub token: H160,
    pub amount: Amount,
    pub hashlock: [u8; 32],
    pub timelock: u64,
    pub claimed: bool,
    pub refunded: bool,
}

#[derive(Default)]
struct MockState {
    native: HashMap<H160, Amount>,
    tokens: HashMap<(H160, H160), Amount>,
    allowances: HashMap<(H160, H160, H160), Amount>,
    htlcs: HashMap<[u8; 32], MockHtlc>,
    receipts: HashMap<String, Receipt>,
    tx_count: u64,
    time_offset: u64,
    /// Method names of every submitted transaction, in order
    sent: Vec<String>,
    /// Remaining transient failures per operation key
    failures: HashMap<String, u32>,
    /// Attempts per operation key, failed ones included
    attempts: HashMap<String, u32>,
    reject_claims: bool,
    /// Withheld from every resolver payout
    skim: Amount,
    /// Extra logs emitted before the lock event
    noise_logs: bool,
}

/// In-memory chain with an HTLC escrow and a resolver contract.
///
/// A destination mock linked to a source mock settles claims against the
/// source's HTLC table, the way a resolver would redeem the lock.
pub struct MockChain {
    chain_id: u64,
    name: String,
    signer: H160,
    epoch: tokio::time::Instant,
    fee: Amount,
    source: Option<Arc<MockChain>>,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_id: u64, name: &str, signer: &str) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            signer: addr(signer),
            epoch: tokio::time::Instant::now(),
            fee: amount(MOCK_TX_FEE),
            source: None,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Source chain signed by `INITIATOR_ADDR`.
    pub fn source() -> Arc<Self> {
        Arc::new(Self::new(SOURCE_CHAIN_ID, "mock-source", INITIATOR_ADDR))
    }

    /// Destination chain signed by `OPERATOR_ADDR`, settling against `source`.
    pub fn destination(source: Arc<MockChain>) -> Arc<Self> {
        let mut chain = Self::new(DESTINATION_CHAIN_ID, "mock-destination", OPERATOR_ADDR);
        chain.source = Some(source);
        Arc::new(chain)
    }

    pub fn now(&self) -> u64 {
        let state = self.state.lock().unwrap();
        GENESIS_TIME + self.epoch.elapsed().as_secs() + state.time_offset
    }

    pub fn advance_time(&self, secs: u64) {
        self.state.lock().unwrap().time_offset += secs;
    }

    pub fn set_native(&self, owner: &str, value: u64) {
        self.state.lock().unwrap().native.insert(addr(owner), amount(value));
    }

    pub fn native_of(&self, owner: &str) -> Amount {
        self.state
            .lock()
            .unwrap()
            .native
            .get(&addr(owner))
            .copied()
            .unwrap_or_default()
    }

    pub fn credit_native(&self, owner: &str, value: Amount) {
        let mut state = self.state.lock().unwrap();
        let entry = state.native.entry(addr(owner)).or_default();
        *entry = entry.saturating_add(value);
    }

    pub fn debit_native(&self, owner: &str, value: Amount) {
        let mut state = self.state.lock().unwrap();
        let entry = state.native.entry(addr(owner)).or_default();
        *entry = entry.saturating_sub(value);
    }

    pub fn set_token(&self, token: &str, owner: &str, value: u64) {
        self.state
            .lock()
            .unwrap()
            .tokens
            .insert((addr(token), addr(owner)), amount(value));
    }

    pub fn token_of(&self, token: &str, owner: &str) -> Amount {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(&(addr(token), addr(owner)))
            .copied()
            .unwrap_or_default()
    }

    pub fn htlc(&self, swap_id: &[u8; 32]) -> Option<MockHtlc> {
        self.state.lock().unwrap().htlcs.get(swap_id).cloned()
    }

    pub fn htlc_count(&self) -> usize {
        self.state.lock().unwrap().htlcs.len()
    }

    /// Fails the next `times` calls of `key` with a transport error.
    ///
    /// Keys: `chain_time`, `get_balance`, `send_native`, `wait_for_confirmation`,
    /// or a contract method name such as `claim`.
    pub fn fail_next(&self, key: &str, times: u32) {
        self.state.lock().unwrap().failures.insert(key.to_string(), times);
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.state.lock().unwrap().attempts.get(key).copied().unwrap_or(0)
    }

    /// Number of submitted transactions calling `method`.
    pub fn sent(&self, method: &str) -> usize {
        self.state.lock().unwrap().sent.iter().filter(|m| m.as_str() == method).count()
    }

    pub fn reject_claims(&self) {
        self.state.lock().unwrap().reject_claims = true;
    }

    /// Makes the resolver pay out `value` less than the claimed amount.
    pub fn skim_payouts(&self, value: u64) {
        self.state.lock().unwrap().skim = amount(value);
    }

    /// Emits unrelated logs ahead of the lock event.
    pub fn emit_noise_logs(&self) {
        self.state.lock().unwrap().noise_logs = true;
    }

    fn take_failure(&self, key: &str) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(key.to_string()).or_default() += 1;
        if let Some(remaining) = state.failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChainError::Transport(format!("injected {} failure", key)));
            }
        }
        Ok(())
    }

    fn now_locked(&self, state: &MockState) -> u64 {
        GENESIS_TIME + self.epoch.elapsed().as_secs() + state.time_offset
    }

    fn record_tx(&self, state: &mut MockState, method: &str, logs: Vec<LogEntry>) -> TxRef {
        state.tx_count += 1;
        let tx = TxRef(format!("0x{:064x}", (self.chain_id << 20) + state.tx_count));
        let signer_balance = state.native.entry(self.signer).or_default();
        *signer_balance = signer_balance.saturating_sub(self.fee);
        state.sent.push(method.to_string());
        let block_timestamp = self.now_locked(state);
        state.receipts.insert(
            tx.0.clone(),
            Receipt {
                tx: tx.clone(),
                success: true,
                block_number: state.tx_count,
                block_timestamp,
                fee_paid: self.fee,
                logs,
            },
        );
        tx
    }

    fn move_asset(state: &mut MockState, token: H160, from: H160, to: H160, value: Amount) -> Result<(), ChainError> {
        if !token.is_zero() {
            return Self::move_token(state, token, from, to, value);
        }
        let have = state.native.get(&from).copied().unwrap_or_default();
        if have < value {
            return Err(ChainError::Reverted("insufficient balance".into()));
        }
        state.native.insert(from, have - value);
        let entry = state.native.entry(to).or_default();
        *entry = entry.saturating_add(value);
        Ok(())
    }

    fn move_token(state: &mut MockState, token: H160, from: H160, to: H160, value: Amount) -> Result<(), ChainError> {
        let have = state.tokens.get(&(token, from)).copied().unwrap_or_default();
        if have < value {
            return Err(ChainError::Reverted("ERC20: transfer amount exceeds balance".into()));
        }
        state.tokens.insert((token, from), have - value);
        let entry = state.tokens.entry((token, to)).or_default();
        *entry = entry.saturating_add(value);
        Ok(())
    }

    fn create_htlc(
        &self,
        state: &mut MockState,
        escrow: H160,
        call: &ContractCall,
        options: &CallOptions,
    ) -> Result<Vec<LogEntry>, ChainError> {
        let (beneficiary, token, value, hashlock, timelock) = match call.args.as_slice() {
            [AbiValue::Address(b), AbiValue::Address(t), AbiValue::Uint(a), AbiValue::Bytes32(h), AbiValue::Uint(tl)] => {
                (*b, *t, *a, *h, tl.as_u64())
            }
            _ => return Err(ChainError::Reverted("bad createHTLC arguments".into())),
        };
        if value.is_zero() {
            return Err(ChainError::Reverted("amount must be positive".into()));
        }
        if timelock <= self.now_locked(state) {
            return Err(ChainError::Reverted("timelock in the past".into()));
        }

        let mut logs = Vec::new();
        if token.is_zero() {
            if options.value != value {
                return Err(ChainError::Reverted("msg.value does not match amount".into()));
            }
            Self::move_asset(state, H160::zero(), self.signer, escrow, value)?;
        } else {
            let key = (token, self.signer, escrow);
            let allowance = state.allowances.get(&key).copied().unwrap_or_default();
            if allowance < value {
                return Err(ChainError::Reverted("ERC20: insufficient allowance".into()));
            }
            Self::move_token(state, token, self.signer, escrow, value)?;
            state.allowances.insert(key, allowance - value);
            logs.push(LogEntry {
                address: token,
                topics: vec![
                    event_topic("Transfer(address,address,uint256)"),
                    pad_address(&self.signer),
                    pad_address(&escrow),
                ],
                data: encode_args(&[AbiValue::Uint(value)]),
            });
        }

        let mut seed = hashlock.to_vec();
        seed.extend_from_slice(&(state.tx_count + 1).to_be_bytes());
        let swap_id = keccak256(&seed);

        if state.noise_logs {
            // same event for another lock from an unrelated contract
            logs.push(LogEntry {
                address: H160::from_low_u64_be(0xdead),
                topics: vec![event_topic(HTLC_CREATED_EVENT), [0xaa; 32], [0u8; 32], [0u8; 32]],
                data: encode_args(&[
                    AbiValue::Address(H160::zero()),
                    AbiValue::Uint(value),
                    AbiValue::Bytes32(hashlock),
                    AbiValue::Uint(U256::from(timelock)),
                ]),
            });
        }
        logs.push(LogEntry {
            address: escrow,
            topics: vec![
                event_topic(HTLC_CREATED_EVENT),
                swap_id,
                pad_address(&self.signer),
                pad_address(&beneficiary),
            ],
            data: encode_args(&[
                AbiValue::Address(token),
                AbiValue::Uint(value),
                AbiValue::Bytes32(hashlock),
                AbiValue::Uint(U256::from(timelock)),
            ]),
        });

        state.htlcs.insert(
            swap_id,
            MockHtlc {
                escrow,
                sender: self.signer,
                beneficiary,
                token,
                amount: value,
                hashlock,
                timelock,
                claimed: false,
                refunded: false,
            },
        );
        Ok(logs)
    }

    fn refund_htlc(&self, state: &mut MockState, escrow: H160, call: &ContractCall) -> Result<Vec<LogEntry>, ChainError> {
        let swap_id = match call.args.as_slice() {
            [AbiValue::Bytes32(id)] => *id,
            _ => return Err(ChainError::Reverted("bad refund arguments".into())),
        };
        let now = self.now_locked(state);
        let htlc = state
            .htlcs
            .get(&swap_id)
            .cloned()
            .ok_or_else(|| ChainError::Reverted("unknown swap".into()))?;
        if htlc.claimed || htlc.refunded {
            return Err(ChainError::Reverted("swap already settled".into()));
        }
        if now <= htlc.timelock {
            return Err(ChainError::Reverted("timelock not expired".into()));
        }
        if htlc.sender != self.signer {
            return Err(ChainError::Reverted("only sender".into()));
        }
        Self::move_asset(state, htlc.token, escrow, htlc.sender, htlc.amount)?;
        if let Some(stored) = state.htlcs.get_mut(&swap_id) {
            stored.refunded = true;
        }
        Ok(Vec::new())
    }

    fn claim(&self, state: &mut MockState, resolver: H160, call: &ContractCall) -> Result<Vec<LogEntry>, ChainError> {
        if state.reject_claims {
            return Err(ChainError::Reverted("resolver: claims paused".into()));
        }
        let (swap_id, secret, beneficiary, token, value) = match call.args.as_slice() {
            [AbiValue::Bytes32(id), AbiValue::Bytes32(s), AbiValue::Address(b), AbiValue::Address(t), AbiValue::Uint(a)] => {
                (*id, *s, *b, *t, *a)
            }
            _ => return Err(ChainError::Reverted("bad claim arguments".into())),
        };
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| ChainError::Reverted("resolver has no source chain".into()))?;

        // redeem the source lock with the revealed secret
        {
            let mut src = source.state.lock().unwrap();
            let now = source.now_locked(&src);
            let htlc = src
                .htlcs
                .get(&swap_id)
                .cloned()
                .ok_or_else(|| ChainError::Reverted("unknown swap".into()))?;
            if htlc.claimed || htlc.refunded {
                return Err(ChainError::Reverted("swap already settled".into()));
            }
            if keccak256(&secret) != htlc.hashlock {
                return Err(ChainError::Reverted("invalid secret".into()));
            }
            if now > htlc.timelock {
                return Err(ChainError::Reverted("timelock expired".into()));
            }
            Self::move_asset(&mut src, htlc.token, htlc.escrow, htlc.beneficiary, htlc.amount)?;
            if let Some(stored) = src.htlcs.get_mut(&swap_id) {
                stored.claimed = true;
            }
        }

        let payout = value.saturating_sub(state.skim);
        Self::move_asset(state, token, resolver, beneficiary, payout)?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl ChainConnector for MockChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> String {
        self.format_address(&self.signer)
    }

    fn parse_address(&self, address: &str) -> Result<H160, ChainError> {
        parse_evm_address(address)
    }

    fn format_address(&self, address: &H160) -> String {
        format!("0x{}", hex::encode(address.as_bytes()))
    }

    async fn chain_time(&self) -> Result<u64, ChainError> {
        self.take_failure("chain_time")?;
        Ok(self.now())
    }

    async fn get_balance(&self, address: Option<&str>) -> Result<Amount, ChainError> {
        self.take_failure("get_balance")?;
        let owner = match address {
            Some(a) => parse_evm_address(a)?,
            None => self.signer,
        };
        Ok(self.state.lock().unwrap().native.get(&owner).copied().unwrap_or_default())
    }

    async fn get_token_balance(&self, token: &str, owner: &str) -> Result<Amount, ChainError> {
        self.take_failure("get_token_balance")?;
        let key = (parse_evm_address(token)?, parse_evm_address(owner)?);
        Ok(self.state.lock().unwrap().tokens.get(&key).copied().unwrap_or_default())
    }

    async fn send_native(&self, to: &str, value: Amount) -> Result<TxRef, ChainError> {
        self.take_failure("send_native")?;
        let to = parse_evm_address(to)?;
        let mut state = self.state.lock().unwrap();
        Self::move_asset(&mut state, H160::zero(), self.signer, to, value)?;
        Ok(self.record_tx(&mut state, "transfer", Vec::new()))
    }

    async fn call_contract(&self, contract: &str, call: &ContractCall) -> Result<Vec<u8>, ChainError> {
        let contract = parse_evm_address(contract)?;
        let state = self.state.lock().unwrap();
        let value = match (call.method_name(), call.args.as_slice()) {
            ("balanceOf", [AbiValue::Address(owner)]) => {
                state.tokens.get(&(contract, *owner)).copied().unwrap_or_default()
            }
            ("allowance", [AbiValue::Address(owner), AbiValue::Address(spender)]) => state
                .allowances
                .get(&(contract, *owner, *spender))
                .copied()
                .unwrap_or_default(),
            (other, _) => return Err(ChainError::Reverted(format!("unknown view {}", other))),
        };
        Ok(encode_args(&[AbiValue::Uint(value)]))
    }

    async fn send_contract(
        &self,
        contract: &str,
        call: &ContractCall,
        options: &CallOptions,
    ) -> Result<TxRef, ChainError> {
        let method = call.method_name().to_string();
        self.take_failure(&method)?;
        let target = parse_evm_address(contract)?;
        let mut state = self.state.lock().unwrap();
        let logs = match method.as_str() {
            "createHTLC" => self.create_htlc(&mut state, target, call, options)?,
            "refund" => self.refund_htlc(&mut state, target, call)?,
            "claim" => self.claim(&mut state, target, call)?,
            "approve" => match call.args.as_slice() {
                [AbiValue::Address(spender), AbiValue::Uint(value)] => {
                    state.allowances.insert((target, self.signer, *spender), *value);
                    Vec::new()
                }
                _ => return Err(ChainError::Reverted("bad approve arguments".into())),
            },
            other => return Err(ChainError::Reverted(format!("unknown method {}", other))),
        };
        Ok(self.record_tx(&mut state, &method, logs))
    }

    async fn wait_for_confirmation(
        &self,
        tx: &TxRef,
        _confirmations: u64,
        timeout: Duration,
    ) -> Result<Receipt, ChainError> {
        self.take_failure("wait_for_confirmation")?;
        self.state
            .lock()
            .unwrap()
            .receipts
            .get(tx.as_str())
            .cloned()
            .ok_or_else(|| ChainError::ConfirmationTimeout {
                tx: tx.to_string(),
                waited: timeout,
            })
    }
}

// ============================================================================
// MOCK ORDER API
// ============================================================================

#[derive(Default)]
struct OrderState {
    quotes: u32,
    placed: Vec<OrderSubmission>,
    /// HTTP-400 rejections still to hand out for order placement
    reject_orders: u32,
    status_polls: u32,
    /// Remaining transient failures of the status endpoint
    status_failures: u32,
    /// Indices that received a secret, in submission order
    submitted: Vec<usize>,
    settled: bool,
}

/// Settlement applied once an order executes
pub struct Settlement {
    pub source: Arc<MockChain>,
    pub destination: Arc<MockChain>,
    pub maker: String,
    pub receiver: String,
    pub maker_amount: Amount,
    pub taker_amount: Amount,
}

/// Relayer that releases `fills_per_poll` more fills on every status poll.
///
/// Ready-fill listings are cumulative, so already-served indices reappear and
/// must be skipped by the caller. The order executes on the first poll after
/// every secret has been received.
pub struct MockOrderApi {
    secrets_count: usize,
    dst_amount: Amount,
    fills_per_poll: usize,
    /// Never executes and never releases fills
    stuck: bool,
    settlement: Option<Settlement>,
    state: Mutex<OrderState>,
}

impl MockOrderApi {
    pub fn new(secrets_count: usize, dst_amount: Amount) -> Self {
        Self {
            secrets_count,
            dst_amount,
            fills_per_poll: 1,
            stuck: false,
            settlement: None,
            state: Mutex::new(OrderState::default()),
        }
    }

    pub fn fills_per_poll(mut self, count: usize) -> Self {
        self.fills_per_poll = count;
        self
    }

    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    pub fn with_settlement(mut self, settlement: Settlement) -> Self {
        self.settlement = Some(settlement);
        self
    }

    pub fn reject_next_orders(&self, times: u32) {
        self.state.lock().unwrap().reject_orders = times;
    }

    pub fn fail_status_polls(&self, times: u32) {
        self.state.lock().unwrap().status_failures = times;
    }

    /// Registers an order directly, bypassing `place_order`.
    pub fn seed_order(&self, secret_hashes: Vec<String>) {
        self.state.lock().unwrap().placed.push(OrderSubmission {
            quote_id: None,
            preset: "fast".to_string(),
            src_chain_id: SOURCE_CHAIN_ID,
            dst_chain_id: DESTINATION_CHAIN_ID,
            wallet_address: INITIATOR_ADDR.to_string(),
            receiver: BENEFICIARY_ADDR.to_string(),
            hash_lock: String::new(),
            secret_hashes,
        });
    }

    pub fn quotes(&self) -> u32 {
        self.state.lock().unwrap().quotes
    }

    pub fn placed(&self) -> Vec<OrderSubmission> {
        self.state.lock().unwrap().placed.clone()
    }

    pub fn submitted(&self) -> Vec<usize> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn status_polls(&self) -> u32 {
        self.state.lock().unwrap().status_polls
    }

    fn released(&self, polls: u32) -> usize {
        if self.stuck {
            return 0;
        }
        (polls as usize * self.fills_per_poll).min(self.secrets_count)
    }
}

#[async_trait]
impl OrderApi for MockOrderApi {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, SwapError> {
        self.state.lock().unwrap().quotes += 1;
        let mut presets = HashMap::new();
        presets.insert(
            "fast".to_string(),
            QuotePreset {
                secrets_count: self.secrets_count,
                allow_partial_fills: self.secrets_count > 1,
            },
        );
        Ok(Quote {
            quote_id: Some(format!("quote-{}", self.quotes())),
            src_token_amount: request.amount.to_string(),
            dst_token_amount: self.dst_amount.to_string(),
            presets,
            recommended_preset: Some("fast".to_string()),
        })
    }

    async fn place_order(&self, order: &OrderSubmission) -> Result<PlacedOrder, SwapError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_orders > 0 {
            state.reject_orders -= 1;
            return Err(SwapError::OrderRejected {
                status: 400,
                message: "quote expired".to_string(),
            });
        }
        state.placed.push(order.clone());
        Ok(PlacedOrder {
            order_hash: DUMMY_ORDER_HASH.to_string(),
        })
    }

    async fn get_order_status(&self, _order_hash: &str) -> Result<OrderStatus, SwapError> {
        let mut state = self.state.lock().unwrap();
        if state.status_failures > 0 {
            state.status_failures -= 1;
            return Err(SwapError::Transport("relayer returned HTTP 503".to_string()));
        }
        state.status_polls += 1;

        let done = !self.stuck && state.submitted.len() == self.secrets_count;
        if done && !state.settled {
            state.settled = true;
            if let Some(s) = &self.settlement {
                s.source.debit_native(&s.maker, s.maker_amount);
                s.destination.credit_native(&s.receiver, s.taker_amount);
            }
        }
        Ok(OrderStatus {
            status: if done { "executed" } else { "pending" }.to_string(),
        })
    }

    async fn get_ready_to_accept_secret_fills(&self, _order_hash: &str) -> Result<Vec<FillEvent>, SwapError> {
        let polls = self.state.lock().unwrap().status_polls;
        Ok((0..self.released(polls))
            .map(|idx| FillEvent {
                idx,
                src_escrow_deploy_tx_hash: Some(DUMMY_TX_HASH.to_string()),
                dst_escrow_deploy_tx_hash: Some(DUMMY_TX_HASH.to_string()),
            })
            .collect())
    }

    async fn submit_secret(&self, _order_hash: &str, secret: &Secret) -> Result<(), SwapError> {
        let mut state = self.state.lock().unwrap();
        let hash = format!("0x{}", hex::encode(hash_commitment(secret)));
        let idx = state
            .placed
            .last()
            .and_then(|order| order.secret_hashes.iter().position(|h| h == &hash))
            .ok_or_else(|| SwapError::OrderRejected {
                status: 400,
                message: "secret does not match any fill".to_string(),
            })?;
        state.submitted.push(idx);
        Ok(())
    }
}
