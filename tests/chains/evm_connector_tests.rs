//! Unit tests for the EVM chain connector
//!
//! JSON-RPC is served by a wiremock server; each mock matches on the request's
//! `method` field.

use ethereum_types::U256;
use serde_json::{json, Value};
use swap_coordinator::chains::{CallOptions, ChainConnector, ContractCall, AbiValue, EvmConnector, TxRef};
use swap_coordinator::config::EvmChainConfig;
use swap_coordinator::error::ChainError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[path = "../helpers.rs"]
mod test_helpers;
use test_helpers::{
    addr, amount, test_service_config, BENEFICIARY_ADDR, DUMMY_TX_HASH, ESCROW_ADDR, SOURCE_CHAIN_ID,
    SOURCE_TOKEN_ADDR, TEST_PRIVATE_KEY, TEST_SIGNER_ADDR,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn create_test_evm_config(rpc_url: &str) -> EvmChainConfig {
    EvmChainConfig {
        name: "test-evm".to_string(),
        rpc_url: rpc_url.to_string(),
        chain_id: SOURCE_CHAIN_ID,
        private_key_env: "TEST_PRIVATE_KEY".to_string(),
        escrow_contract_addr: Some(ESCROW_ADDR.to_string()),
        counterparty_addr: None,
        resolver_contract_addr: None,
        escrow_registry_key: None,
        resolver_registry_key: None,
        escrow_artifact: None,
        gas_limit: None,
    }
}

fn connector(rpc_url: &str) -> EvmConnector {
    EvmConnector::new(&create_test_evm_config(rpc_url), &test_service_config(), TEST_PRIVATE_KEY).unwrap()
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message }
    }))
}

async fn mock_rpc(server: &MockServer, rpc_method: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Mocks the nonce, gas price and gas estimate queries of a transaction submission.
async fn mock_submission(server: &MockServer) {
    mock_rpc(server, "eth_getTransactionCount", rpc_result(json!("0x7"))).await;
    mock_rpc(server, "eth_gasPrice", rpc_result(json!("0x3b9aca00"))).await;
    mock_rpc(server, "eth_estimateGas", rpc_result(json!("0x5208"))).await;
}

/// Raw transaction bytes of the first `eth_sendRawTransaction` request.
async fn sent_raw_transaction(server: &MockServer) -> Vec<u8> {
    let requests = server.received_requests().await.unwrap();
    let raw = requests
        .iter()
        .map(|r| serde_json::from_slice::<Value>(&r.body).unwrap())
        .find(|body| body["method"] == "eth_sendRawTransaction")
        .map(|body| body["params"][0].as_str().unwrap().to_string())
        .unwrap();
    hex::decode(raw.trim_start_matches("0x")).unwrap()
}

fn topic_of(address: &str) -> String {
    format!("0x000000000000000000000000{}", address.trim_start_matches("0x"))
}

// ============================================================================
// CONNECTOR INITIALIZATION
// ============================================================================

/// 1. Test: Signer Address Derivation
/// Verifies that the connector derives the signer address from the private key.
/// Why: Every balance snapshot and nonce query uses this address. A wrong
/// derivation would read balances of an unrelated account.
#[test]
fn test_evm_connector_derives_signer_address() {
    let connector = connector("http://127.0.0.1:8545");
    assert_eq!(connector.address(), TEST_SIGNER_ADDR);
    assert_eq!(connector.chain_id(), SOURCE_CHAIN_ID);
    assert_eq!(connector.name(), "test-evm");
}

/// 2. Test: Invalid Private Key Rejected
/// Verifies that a malformed key fails connector construction.
/// Why: A bad key must surface at startup, not at the first signature.
#[test]
fn test_evm_connector_rejects_invalid_key() {
    let config = create_test_evm_config("http://127.0.0.1:8545");
    assert!(EvmConnector::new(&config, &test_service_config(), "0x1234").is_err());
}

/// 3. Test: Address Format Round Trip
/// Verifies that parse_address accepts 0x-prefixed addresses and rejects Tron ones.
/// Why: Addresses cross chain boundaries in the swap; mixing formats must fail early.
#[test]
fn test_evm_connector_address_format() {
    let connector = connector("http://127.0.0.1:8545");
    let parsed = connector.parse_address(BENEFICIARY_ADDR).unwrap();
    assert_eq!(connector.format_address(&parsed), BENEFICIARY_ADDR);
    assert!(matches!(
        connector.parse_address("TLa2f6VPqDgRE67v1736s7bJ8Ray5wYjU7"),
        Err(ChainError::InvalidAddress { .. })
    ));
}

// ============================================================================
// QUERIES
// ============================================================================

/// 4. Test: Native Balance Query
/// Verifies that get_balance() parses the hex quantity from eth_getBalance.
/// Why: Balance snapshots drive the post-swap consistency check.
#[tokio::test]
async fn test_evm_get_balance() {
    let server = MockServer::start().await;
    mock_rpc(&server, "eth_getBalance", rpc_result(json!("0x4c4b40"))).await;

    let connector = connector(&server.uri());
    let balance = connector.get_balance(Some(BENEFICIARY_ADDR)).await.unwrap();
    assert_eq!(balance, amount(5_000_000));
}

/// 5. Test: Balance Above u64
/// Verifies that balances beyond 64 bits are kept without truncation.
/// Why: 18-decimal token amounts routinely exceed u64::MAX.
#[tokio::test]
async fn test_evm_get_balance_large_value() {
    let server = MockServer::start().await;
    // 10^21
    mock_rpc(&server, "eth_getBalance", rpc_result(json!("0x3635c9adc5dea00000"))).await;

    let connector = connector(&server.uri());
    let balance = connector.get_balance(None).await.unwrap();
    assert_eq!(balance, U256::exp10(21));
}

/// 6. Test: Token Balance via eth_call
/// Verifies that get_token_balance() decodes the uint256 returned by balanceOf.
/// Why: Token swaps snapshot ERC20 balances instead of native ones.
#[tokio::test]
async fn test_evm_get_token_balance() {
    let server = MockServer::start().await;
    mock_rpc(
        &server,
        "eth_call",
        rpc_result(json!(format!("0x{:064x}", 1_000_000u64))),
    )
    .await;

    let connector = connector(&server.uri());
    let balance = connector
        .get_token_balance(SOURCE_TOKEN_ADDR, BENEFICIARY_ADDR)
        .await
        .unwrap();
    assert_eq!(balance, amount(1_000_000));
}

/// 7. Test: Chain Time From Latest Block
/// Verifies that chain_time() reads the timestamp of the latest block.
/// Why: Timelock expiry is judged against chain time, never the local clock.
#[tokio::test]
async fn test_evm_chain_time() {
    let server = MockServer::start().await;
    mock_rpc(
        &server,
        "eth_getBlockByNumber",
        rpc_result(json!({ "number": "0x10", "timestamp": "0x6553f100" })),
    )
    .await;

    let connector = connector(&server.uri());
    assert_eq!(connector.chain_time().await.unwrap(), 1_700_000_000);
}

// ============================================================================
// TRANSACTION SUBMISSION
// ============================================================================

/// 8. Test: Native Transfer Submission
/// Verifies that send_native() signs with the pending nonce and an estimate
/// padded by 20%, and returns the node's transaction hash.
/// Why: Underestimated gas makes lock transactions fail after paying fees.
#[tokio::test]
async fn test_evm_send_native_uses_pending_nonce_and_padded_gas() {
    let server = MockServer::start().await;
    mock_submission(&server).await;
    mock_rpc(&server, "eth_sendRawTransaction", rpc_result(json!(DUMMY_TX_HASH))).await;

    let connector = connector(&server.uri());
    let tx = connector.send_native(BENEFICIARY_ADDR, amount(1000)).await.unwrap();
    assert_eq!(tx, TxRef(DUMMY_TX_HASH.to_string()));

    let raw = sent_raw_transaction(&server).await;
    let decoded = rlp::Rlp::new(&raw);
    assert_eq!(decoded.item_count().unwrap(), 9);
    let nonce: U256 = decoded.val_at(0).unwrap();
    let gas_price: U256 = decoded.val_at(1).unwrap();
    let gas_limit: U256 = decoded.val_at(2).unwrap();
    let value: U256 = decoded.val_at(4).unwrap();
    assert_eq!(nonce, U256::from(7));
    assert_eq!(gas_price, U256::from(1_000_000_000u64));
    assert_eq!(gas_limit, U256::from(21_000 + 4_200));
    assert_eq!(value, U256::from(1000));
}

/// 9. Test: Fixed Fee Limit Skips Estimation
/// Verifies that a caller-supplied gas limit is used as-is.
/// Why: Estimation against a reverting call would block submission entirely.
#[tokio::test]
async fn test_evm_send_contract_with_fee_limit_skips_estimate() {
    let server = MockServer::start().await;
    mock_rpc(&server, "eth_getTransactionCount", rpc_result(json!("0x0"))).await;
    mock_rpc(&server, "eth_gasPrice", rpc_result(json!("0x1"))).await;
    mock_rpc(&server, "eth_sendRawTransaction", rpc_result(json!(DUMMY_TX_HASH))).await;

    let connector = connector(&server.uri());
    let call = ContractCall::new("refund(bytes32)", vec![AbiValue::Bytes32([0x11; 32])]);
    let options = CallOptions {
        value: amount(0),
        fee_limit: Some(150_000),
    };
    connector.send_contract(ESCROW_ADDR, &call, &options).await.unwrap();

    let raw = sent_raw_transaction(&server).await;
    let gas_limit: U256 = rlp::Rlp::new(&raw).val_at(2).unwrap();
    assert_eq!(gas_limit, U256::from(150_000));
}

/// 10. Test: Execution Reverted Maps to Reverted
/// Verifies that JSON-RPC error code 3 becomes ChainError::Reverted.
/// Why: Reverts are contract rejections and must not be retried.
#[tokio::test]
async fn test_evm_revert_is_not_retryable() {
    let server = MockServer::start().await;
    mock_rpc(&server, "eth_getTransactionCount", rpc_result(json!("0x0"))).await;
    mock_rpc(&server, "eth_gasPrice", rpc_result(json!("0x1"))).await;
    mock_rpc(&server, "eth_estimateGas", rpc_error(3, "execution reverted: timelock in the past")).await;

    let connector = connector(&server.uri());
    let call = ContractCall::new("refund(bytes32)", vec![AbiValue::Bytes32([0x11; 32])]);
    let err = connector
        .send_contract(ESCROW_ADDR, &call, &CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Reverted(ref msg) if msg.contains("timelock in the past")));
    assert!(!err.is_retryable());
}

/// 11. Test: Other RPC Errors Are Transient
/// Verifies that non-revert JSON-RPC errors map to a retryable transport error.
/// Why: Rate limits and node hiccups should be retried by the orchestrator.
#[tokio::test]
async fn test_evm_rpc_error_is_transport() {
    let server = MockServer::start().await;
    mock_rpc(&server, "eth_getBalance", rpc_error(-32005, "rate limited")).await;

    let connector = connector(&server.uri());
    let err = connector.get_balance(None).await.unwrap_err();
    assert!(matches!(err, ChainError::Transport(_)));
    assert!(err.is_retryable());
}

/// 12. Test: HTTP Failure Is Transient
/// Verifies that a non-2xx HTTP status maps to a retryable transport error.
/// Why: Load balancers in front of RPC nodes return 502/503 under load.
#[tokio::test]
async fn test_evm_http_error_is_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let connector = connector(&server.uri());
    let err = connector.chain_time().await.unwrap_err();
    assert!(matches!(err, ChainError::Transport(ref msg) if msg.contains("503")));
}

// ============================================================================
// CONFIRMATIONS
// ============================================================================

/// 13. Test: Receipt Parsing
/// Verifies that wait_for_confirmation() returns status, fee, block time and logs.
/// Why: The swap id is decoded from the receipt logs and fees feed the
/// balance check; both must come through intact.
#[tokio::test]
async fn test_evm_wait_for_confirmation_parses_receipt() {
    let server = MockServer::start().await;
    let topic = format!("0x{}", hex::encode([0xab; 32]));
    mock_rpc(
        &server,
        "eth_getTransactionReceipt",
        rpc_result(json!({
            "transactionHash": DUMMY_TX_HASH,
            "blockNumber": "0x10",
            "status": "0x1",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "logs": [{
                "address": ESCROW_ADDR,
                "topics": [topic, topic_of(TEST_SIGNER_ADDR)],
                "data": "0x0102"
            }]
        })),
    )
    .await;
    mock_rpc(
        &server,
        "eth_getBlockByNumber",
        rpc_result(json!({ "number": "0x10", "timestamp": "0x6553f100" })),
    )
    .await;

    let connector = connector(&server.uri());
    let tx = TxRef(DUMMY_TX_HASH.to_string());
    let receipt = connector
        .wait_for_confirmation(&tx, 1, Duration::from_secs(5))
        .await
        .unwrap();

    assert!(receipt.success);
    assert_eq!(receipt.block_number, 16);
    assert_eq!(receipt.block_timestamp, 1_700_000_000);
    assert_eq!(receipt.fee_paid, U256::from(21_000u64) * U256::from(1_000_000_000u64));
    assert_eq!(receipt.logs.len(), 1);
    assert_eq!(receipt.logs[0].address, addr(ESCROW_ADDR));
    assert_eq!(receipt.logs[0].topics[0], [0xab; 32]);
    assert_eq!(receipt.logs[0].data, vec![1, 2]);
}

/// 14. Test: Reverted Receipt
/// Verifies that status 0x0 yields a receipt with success = false.
/// Why: A mined-but-reverted lock must not be treated as a lock.
#[tokio::test]
async fn test_evm_wait_for_confirmation_reverted_receipt() {
    let server = MockServer::start().await;
    mock_rpc(
        &server,
        "eth_getTransactionReceipt",
        rpc_result(json!({
            "blockNumber": "0x10",
            "status": "0x0",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x1",
            "logs": []
        })),
    )
    .await;
    mock_rpc(
        &server,
        "eth_getBlockByNumber",
        rpc_result(json!({ "timestamp": "0x6553f100" })),
    )
    .await;

    let connector = connector(&server.uri());
    let receipt = connector
        .wait_for_confirmation(&TxRef(DUMMY_TX_HASH.to_string()), 1, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(!receipt.success);
    assert_eq!(receipt.fee_paid, U256::from(21_000u64));
}

/// 15. Test: Confirmation Timeout
/// Verifies that a receipt that never appears ends in ConfirmationTimeout.
/// Why: An unbounded wait would hang the swap past its timelock.
#[tokio::test]
async fn test_evm_wait_for_confirmation_times_out() {
    let server = MockServer::start().await;
    mock_rpc(&server, "eth_getTransactionReceipt", rpc_result(Value::Null)).await;

    let connector = connector(&server.uri());
    let err = connector
        .wait_for_confirmation(&TxRef(DUMMY_TX_HASH.to_string()), 1, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::ConfirmationTimeout { ref tx, .. } if tx == DUMMY_TX_HASH));
    assert!(err.is_retryable());
}

// ============================================================================
// CONCURRENT SUBMISSION
// ============================================================================

/// Node whose pending nonce is the number of raw transactions it has accepted.
///
/// Nonce reads answer slowly so that unserialized submissions would both read
/// the same count.
#[derive(Clone, Default)]
struct NonceTrackingNode {
    accepted: Arc<AtomicU64>,
    nonces: Arc<Mutex<Vec<U256>>>,
}

impl Respond for NonceTrackingNode {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        match body["method"].as_str().unwrap_or_default() {
            "eth_getTransactionCount" => {
                let pending = self.accepted.load(Ordering::SeqCst);
                rpc_result(json!(format!("0x{:x}", pending))).set_delay(Duration::from_millis(50))
            }
            "eth_gasPrice" => rpc_result(json!("0x1")),
            "eth_estimateGas" => rpc_result(json!("0x5208")),
            "eth_sendRawTransaction" => {
                let raw = hex::decode(body["params"][0].as_str().unwrap().trim_start_matches("0x")).unwrap();
                let nonce: U256 = rlp::Rlp::new(&raw).val_at(0).unwrap();
                self.nonces.lock().unwrap().push(nonce);
                self.accepted.fetch_add(1, Ordering::SeqCst);
                rpc_result(json!(format!("0x{:064x}", nonce.low_u64() + 1)))
            }
            other => rpc_error(-32601, &format!("unexpected method {}", other)),
        }
    }
}

/// 16. Test: Concurrent Sends Share One Nonce Sequence
/// Verifies that two send_native() calls racing on one shared connector are
/// signed with consecutive nonces.
/// Why: Two swaps signing with the same key would otherwise read the same
/// pending nonce and one transaction would replace the other.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_evm_concurrent_sends_get_distinct_nonces() {
    let server = MockServer::start().await;
    let node = NonceTrackingNode::default();
    Mock::given(method("POST"))
        .respond_with(node.clone())
        .mount(&server)
        .await;

    let connector = Arc::new(connector(&server.uri()));
    let first = {
        let connector = Arc::clone(&connector);
        tokio::spawn(async move { connector.send_native(BENEFICIARY_ADDR, amount(1)).await })
    };
    let second = {
        let connector = Arc::clone(&connector);
        tokio::spawn(async move { connector.send_native(BENEFICIARY_ADDR, amount(2)).await })
    };
    let first_tx = first.await.unwrap().unwrap();
    let second_tx = second.await.unwrap().unwrap();

    assert_ne!(first_tx, second_tx);
    let mut nonces = node.nonces.lock().unwrap().clone();
    nonces.sort();
    assert_eq!(nonces, vec![U256::zero(), U256::one()]);
}
