use credit_session::{
    DigitCanvas, MockWallet, PredictionClient, RelayClient, Sender, SessionError,
    SessionManager, SessionState, WalletProvider,
};
use serde_json::json;
use service_core::identity::Identity;
use service_core::ledger::InMemoryLedger;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

fn identity() -> Identity {
    ADDRESS.parse().unwrap()
}

struct TestSession {
    session: Arc<SessionManager>,
    ledger: Arc<InMemoryLedger>,
    server: MockServer,
}

async fn session_with(wallet: Option<MockWallet>, balance: u64) -> TestSession {
    let server = MockServer::start().await;
    let ledger = Arc::new(InMemoryLedger::new().with_signer(identity()));
    ledger.set_balance(identity(), balance);

    let wallet = wallet.map(|w| Arc::new(w) as Arc<dyn WalletProvider>);
    let session = SessionManager::new(
        wallet,
        ledger.clone(),
        RelayClient::new(server.uri(), Duration::from_secs(5)).unwrap(),
        PredictionClient::new(server.uri(), Duration::from_secs(5)).unwrap(),
    );

    TestSession {
        session: Arc::new(session),
        ledger,
        server,
    }
}

async fn connected_session(balance: u64) -> TestSession {
    let test = session_with(Some(MockWallet::authorized(vec![identity()])), balance).await;
    test.session.connect().await.unwrap();
    test
}

fn relay_ok(result: &str, billing: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"result": result, "billing": billing}))
}

#[tokio::test]
async fn connect_reads_balance_of_first_account() {
    let other = Identity::new(ethers::types::Address::from_low_u64_be(42));
    let test = session_with(Some(MockWallet::unauthorized(vec![identity(), other])), 3).await;

    let snapshot = test.session.connect().await.unwrap();

    assert_eq!(
        snapshot.state,
        SessionState::Connected {
            identity: identity(),
            balance: 3
        }
    );
    assert!(matches!(
        test.session.connect().await,
        Err(SessionError::AlreadyConnected)
    ));
}

#[tokio::test]
async fn failed_connections_leave_session_disconnected() {
    let rejected = session_with(Some(MockWallet::rejecting()), 3).await;
    assert!(matches!(
        rejected.session.connect().await,
        Err(SessionError::ConnectionRejected(_))
    ));
    assert_eq!(rejected.session.snapshot().await.state, SessionState::Disconnected);

    let empty = session_with(Some(MockWallet::unauthorized(vec![])), 3).await;
    assert!(matches!(
        empty.session.connect().await,
        Err(SessionError::NoAccounts)
    ));
    assert_eq!(empty.session.snapshot().await.state, SessionState::Disconnected);

    let no_wallet = session_with(None, 3).await;
    assert!(matches!(
        no_wallet.session.connect().await,
        Err(SessionError::NoWalletProvider)
    ));

    let unreadable = session_with(Some(MockWallet::authorized(vec![identity()])), 3).await;
    unreadable.ledger.fail_reads(true);
    assert!(matches!(
        unreadable.session.connect().await,
        Err(SessionError::Ledger(_))
    ));
    assert_eq!(
        unreadable.session.snapshot().await.state,
        SessionState::Disconnected
    );
}

#[tokio::test]
async fn restore_never_prompts() {
    let unauthorized = MockWallet::unauthorized(vec![identity()]);
    let test = session_with(Some(unauthorized), 3).await;

    let snapshot = test.session.restore().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Disconnected);

    let authorized = session_with(Some(MockWallet::authorized(vec![identity()])), 3).await;
    let snapshot = authorized.session.restore().await.unwrap();
    assert_eq!(snapshot.balance(), 3);
    assert_eq!(snapshot.identity(), Some(identity()));
}

#[tokio::test]
async fn gated_actions_are_refused_locally() {
    let test = session_with(Some(MockWallet::authorized(vec![identity()])), 0).await;
    Mock::given(method("POST"))
        .respond_with(relay_ok("never", "recorded"))
        .expect(0)
        .mount(&test.server)
        .await;

    assert!(matches!(
        test.session.send_chat("hello").await,
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        test.session.predict_digit(&DigitCanvas::new()).await,
        Err(SessionError::NotConnected)
    ));

    test.session.connect().await.unwrap();
    assert!(matches!(
        test.session.send_chat("hello").await,
        Err(SessionError::InsufficientBalance)
    ));
    assert!(matches!(
        test.session.send_chat("   ").await,
        Err(SessionError::EmptyMessage)
    ));
    assert_eq!(test.ledger.usage_writes(), 0);
    assert!(test.session.conversation().await.is_empty());
}

#[tokio::test]
async fn balance_drops_before_relay_answers_then_reconciles() {
    let test = connected_session(3).await;
    Mock::given(method("POST"))
        .and(path("/query-ai"))
        .and(body_partial_json(json!({"query": "hello", "ethAddress": ADDRESS})))
        .respond_with(relay_ok("hi there", "recorded").set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&test.server)
        .await;

    let session = test.session.clone();
    let chat = tokio::spawn(async move { session.send_chat("hello").await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(test.session.snapshot().await.balance(), 2);

    // the relay bills the identity while the response is in flight
    test.ledger.set_balance(identity(), 2);

    let reply = chat.await.unwrap().unwrap();
    assert_eq!(reply, "hi there");
    assert_eq!(
        test.session.snapshot().await.balance(),
        test.ledger.peek_balance(&identity())
    );

    let conversation = test.session.conversation().await;
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation[0].sender, Sender::User);
    assert_eq!(conversation[0].content, "hello");
    assert_eq!(conversation[1].sender, Sender::Ai);
    assert_eq!(conversation[1].content, "hi there");
}

#[tokio::test]
async fn reconciliation_replaces_optimistic_value() {
    let test = connected_session(3).await;
    Mock::given(method("POST"))
        .and(path("/query-ai"))
        .respond_with(relay_ok("answer", "recorded"))
        .mount(&test.server)
        .await;

    // another device spent credits meanwhile
    test.ledger.set_balance(identity(), 1);

    test.session.send_chat("question").await.unwrap();
    assert_eq!(test.session.snapshot().await.balance(), 1);
}

#[tokio::test]
async fn unbilled_reply_keeps_optimistic_balance() {
    let test = connected_session(3).await;
    Mock::given(method("POST"))
        .and(path("/query-ai"))
        .respond_with(relay_ok("free answer", "unbilled"))
        .mount(&test.server)
        .await;

    test.session.send_chat("question").await.unwrap();
    assert_eq!(test.session.snapshot().await.balance(), 2);
    assert_eq!(test.ledger.balance_reads(), 1);
}

#[tokio::test]
async fn relay_error_is_recorded_verbatim_in_conversation() {
    let test = connected_session(3).await;
    Mock::given(method("POST"))
        .and(path("/query-ai"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "Insufficient credits."})))
        .mount(&test.server)
        .await;

    let err = test.session.send_chat("question").await.unwrap_err();
    assert!(matches!(err, SessionError::Relay { status: 403, .. }));

    let conversation = test.session.conversation().await;
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation[1].content, "Error: Insufficient credits.");
    assert_eq!(test.session.snapshot().await.balance(), 2);
}

#[tokio::test]
async fn unreadable_relay_error_uses_generic_message() {
    let test = connected_session(3).await;
    Mock::given(method("POST"))
        .and(path("/query-ai"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&test.server)
        .await;

    test.session.send_chat("question").await.unwrap_err();

    let conversation = test.session.conversation().await;
    assert_eq!(
        conversation[1].content,
        "Error: An error occurred. Please try again."
    );
}

#[tokio::test]
async fn prediction_records_usage_then_classifies() {
    let test = connected_session(2).await;
    let mut canvas = DigitCanvas::new();
    canvas.set(14, 14, true);

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prediction": 7})))
        .expect(1)
        .mount(&test.server)
        .await;

    let digit = test.session.predict_digit(&canvas).await.unwrap();

    assert_eq!(digit, 7);
    assert_eq!(test.ledger.peek_balance(&identity()), 1);
    assert_eq!(test.session.snapshot().await.balance(), 1);

    let requests = test.server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body.as_array().unwrap().len(), 28);
    assert_eq!(body[14][14], 1);
}

#[tokio::test]
async fn failed_usage_write_skips_prediction() {
    let test = connected_session(2).await;
    test.ledger.fail_writes(true);

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prediction": 1})))
        .expect(0)
        .mount(&test.server)
        .await;

    let err = test.session.predict_digit(&DigitCanvas::new()).await.unwrap_err();
    assert!(matches!(err, SessionError::Ledger(_)));
    assert_eq!(test.session.snapshot().await.balance(), 1);
}

#[tokio::test]
async fn prediction_service_error_is_surfaced() {
    let test = connected_session(2).await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(400).set_body_json(
            json!({"error": "Invalid input shape. Expected a 28x28 matrix."}),
        ))
        .mount(&test.server)
        .await;

    let err = test.session.predict_digit(&DigitCanvas::new()).await.unwrap_err();
    match err {
        SessionError::Prediction(message) => {
            assert_eq!(message, "Invalid input shape. Expected a 28x28 matrix.")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn purchase_adds_credits_and_refreshes() {
    let test = connected_session(1).await;

    let snapshot = test.session.purchase(3).await.unwrap();

    assert_eq!(snapshot.balance(), 4);
    assert_eq!(test.ledger.peek_balance(&identity()), 4);
}

#[tokio::test]
async fn purchase_requires_connection() {
    let test = session_with(Some(MockWallet::authorized(vec![identity()])), 1).await;
    assert!(matches!(
        test.session.purchase(1).await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn disconnect_resets_state_and_history() {
    let test = connected_session(3).await;
    Mock::given(method("POST"))
        .and(path("/query-ai"))
        .respond_with(relay_ok("answer", "recorded"))
        .mount(&test.server)
        .await;
    test.session.send_chat("question").await.unwrap();

    test.session.disconnect().await;

    assert_eq!(test.session.snapshot().await.state, SessionState::Disconnected);
    assert!(test.session.conversation().await.is_empty());
    assert!(test.session.connect().await.is_ok());
}

#[tokio::test]
async fn refresh_balance_reads_ledger() {
    let test = connected_session(3).await;
    test.ledger.set_balance(identity(), 9);

    assert_eq!(test.session.refresh_balance().await.unwrap(), 9);
    assert_eq!(test.session.snapshot().await.balance(), 9);
}

#[tokio::test]
async fn reply_arriving_after_disconnect_is_discarded() {
    let test = connected_session(3).await;
    Mock::given(method("POST"))
        .and(path("/query-ai"))
        .respond_with(relay_ok("old answer", "recorded").set_delay(Duration::from_millis(300)))
        .mount(&test.server)
        .await;

    let session = test.session.clone();
    let chat = tokio::spawn(async move { session.send_chat("hello").await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    test.session.disconnect().await;

    let reply = chat.await.unwrap().unwrap();
    assert_eq!(reply, "old answer");
    assert_eq!(test.session.snapshot().await.state, SessionState::Disconnected);
    assert!(test.session.conversation().await.is_empty());

    test.ledger.set_balance(identity(), 7);
    test.session.connect().await.unwrap();
    assert!(test.session.conversation().await.is_empty());
    assert_eq!(test.session.snapshot().await.balance(), 7);
}
