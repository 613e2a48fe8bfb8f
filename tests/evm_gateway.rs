use axum::{extract::State, routing::post, Json, Router};
use p2p_escrow_client::{
    chains::{ChainGateway, EvmGateway},
    types::ChainConfig,
    Address, ChainError, ChainId, SessionState,
};
use primitive_types::U256;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Default)]
struct Node {
    /// Receipt polls answered with null before the receipt appears.
    pending_polls: u32,
    /// `None` never produces a receipt.
    receipt_status: Option<&'static str>,
    sent: Vec<Value>,
    calls: Vec<Value>,
    escrowed_result: &'static str,
}

type SharedNode = Arc<Mutex<Node>>;

const ACCOUNT: &str = "0x00000000000000000000000000000000000000aa";
const TOKEN: &str = "0x0000000000000000000000000000000000000070";
const ORDER_BOOK: &str = "0x00000000000000000000000000000000000000b0";
const TX_HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

async fn rpc(State(node): State<SharedNode>, Json(request): Json<Value>) -> Json<Value> {
    let id = request["id"].clone();
    let params = request["params"].clone();
    let mut node = node.lock().unwrap();

    let result = match request["method"].as_str().unwrap_or_default() {
        "eth_requestAccounts" | "eth_accounts" => json!([ACCOUNT]),
        "eth_chainId" => json!("0x13882"),
        "eth_sendTransaction" => {
            node.sent.push(params[0].clone());
            json!(TX_HASH)
        }
        "eth_getTransactionReceipt" => {
            if node.pending_polls > 0 {
                node.pending_polls -= 1;
                Value::Null
            } else {
                match node.receipt_status {
                    Some(status) => json!({
                        "transactionHash": TX_HASH,
                        "blockNumber": "0x2a",
                        "gasUsed": "0xb411",
                        "status": status,
                    }),
                    None => Value::Null,
                }
            }
        }
        "eth_call" => {
            node.calls.push(params[0].clone());
            let data = params[0]["data"].as_str().unwrap_or_default();
            if data.starts_with("0x313ce567") {
                json!(format!("0x{:064x}", 6))
            } else if data.starts_with("0x70a08231") {
                json!(format!("0x{:064x}", 10_500_000u64))
            } else {
                json!(node.escrowed_result)
            }
        }
        other => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method {} not found", other) },
            }))
        }
    };

    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

async fn spawn_node(node: Node) -> (String, SharedNode) {
    let shared = Arc::new(Mutex::new(node));
    let app = Router::new()
        .route("/", post(rpc))
        .with_state(shared.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/", addr), shared)
}

async fn connected_gateway(url: String, confirmation_timeout_secs: u64) -> EvmGateway {
    let session = Arc::new(SessionState::new(
        ChainId(80002),
        "Polygon Amoy".to_string(),
        Address::parse(ORDER_BOOK).unwrap(),
    ));
    let gateway = EvmGateway::new(
        url,
        &ChainConfig {
            confirmation_timeout_secs,
            poll_interval_ms: 10,
            request_timeout_secs: 5,
        },
        session.clone(),
    )
    .unwrap();

    let handle = session.connect(&gateway).await.unwrap();
    assert_eq!(handle.chain_id, Some(ChainId(80002)));
    gateway
}

fn token() -> Address {
    Address::parse(TOKEN).unwrap()
}

#[tokio::test]
async fn test_approve_waits_for_receipt() {
    let (url, node) = spawn_node(Node {
        pending_polls: 3,
        receipt_status: Some("0x1"),
        ..Node::default()
    })
    .await;
    let gateway = connected_gateway(url, 5).await;

    let receipt = gateway
        .approve(&token(), &Address::parse(ORDER_BOOK).unwrap(), U256::from(10_500_000u64))
        .await
        .unwrap();

    assert!(receipt.success);
    assert_eq!(receipt.tx_hash.0, TX_HASH);
    assert_eq!(receipt.block_number, 42);
    assert_eq!(receipt.gas_used, Some(46_097));

    let node = node.lock().unwrap();
    assert_eq!(node.pending_polls, 0);
    assert_eq!(node.sent.len(), 1);
    assert_eq!(node.sent[0]["from"], ACCOUNT);
    assert_eq!(node.sent[0]["to"], TOKEN);
    let data = node.sent[0]["data"].as_str().unwrap();
    assert!(data.starts_with("0x095ea7b3"));
    assert!(data.ends_with("a037a0"));
}

#[tokio::test]
async fn test_deposit_goes_to_order_book() {
    let (url, node) = spawn_node(Node {
        receipt_status: Some("0x1"),
        ..Node::default()
    })
    .await;
    let gateway = connected_gateway(url, 5).await;

    gateway.deposit(&token(), U256::from(1u64)).await.unwrap();

    let node = node.lock().unwrap();
    assert_eq!(node.sent[0]["to"], ORDER_BOOK);
}

#[tokio::test]
async fn test_reverted_transaction() {
    let (url, _) = spawn_node(Node {
        receipt_status: Some("0x0"),
        ..Node::default()
    })
    .await;
    let gateway = connected_gateway(url, 5).await;

    let err = gateway.deposit(&token(), U256::from(1u64)).await.unwrap_err();
    assert_eq!(
        err,
        ChainError::Reverted {
            tx_hash: p2p_escrow_client::TransactionHash(TX_HASH.to_string())
        }
    );
}

#[tokio::test]
async fn test_unconfirmed_transaction_times_out() {
    let (url, _) = spawn_node(Node::default()).await;
    let gateway = connected_gateway(url, 1).await;

    let err = gateway
        .approve(&token(), &Address::parse(ORDER_BOOK).unwrap(), U256::from(1u64))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Timeout { secs: 1, .. }));
}

#[tokio::test]
async fn test_reads() {
    let (url, node) = spawn_node(Node {
        escrowed_result: "0x",
        ..Node::default()
    })
    .await;
    let gateway = connected_gateway(url, 5).await;
    let account = Address::parse(ACCOUNT).unwrap();

    assert_eq!(gateway.decimals_of(&token()).await.unwrap(), 6);
    assert_eq!(
        gateway.balance_of(&account, &token()).await.unwrap(),
        U256::from(10_500_000u64)
    );
    assert_eq!(gateway.escrowed_funds(&account, &token()).await.unwrap(), None);

    let calls = node.lock().unwrap().calls.clone();
    assert_eq!(calls[0]["to"], TOKEN);
    assert_eq!(calls[2]["to"], ORDER_BOOK);
}

#[tokio::test]
async fn test_empty_call_result_is_decode_error() {
    let (url, _) = spawn_node(Node::default()).await;
    let gateway = connected_gateway(url, 5).await;

    let err = gateway
        .allowance(&token(), &Address::parse(ACCOUNT).unwrap(), &Address::parse(ORDER_BOOK).unwrap())
        .await;
    assert!(matches!(err, Err(ChainError::Decode(_))));
}
