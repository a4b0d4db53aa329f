//! Integration tests for lendmark-wallet
//!
//! These drive the orchestrator end to end against a mocked backend and
//! ledger node, with seeds and passkeys on disk in a temporary directory:
//! - First connect creates, funds and backs up a wallet
//! - Returning users only authenticate
//! - Backend record conflicts and divergence
//! - Restore from the backend backup
//! - Signing, submission and degraded ledger behavior

use lendmark_wallet::{
    keys::{verify_message, WalletKeys},
    keystore::KeyStore,
    ledger::LedgerConfig,
    passkey::PasskeyGate,
    storage::{decode_backup, FileSeedStore},
    FixedPresence, LedgerClient, LedgerTransaction, LocalAuthenticator, Network,
    OrchestratorSettings, UserIdentity, WalletConfig, WalletError, WalletOrchestrator,
    WalletRecordClient,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

const RECORD_PATH: &str = "/api/wallet";
const RPC_PATH: &str = "/rpc";

fn alice() -> UserIdentity {
    UserIdentity {
        user_id: "alice".to_string(),
        label: "alice@example.com".to_string(),
        api_token: "alice-token".to_string(),
    }
}

/// A device: one data directory talking to one mocked backend and node
struct Device {
    server: MockServer,
    _dir: TempDir,
    config: WalletConfig,
}

impl Device {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let config = WalletConfig {
            network: Network::Testnet,
            rpc_url: Some(format!("{}{}", server.uri(), RPC_PATH)),
            faucet_url: Some(format!("{}/faucet", server.uri())),
            api_base: format!("{}/api", server.uri()),
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        Self { server, _dir: dir, config }
    }

    fn ledger(&self) -> Arc<LedgerClient> {
        let mut config: LedgerConfig = self.config.ledger_config();
        config.poll_interval = Duration::from_millis(5);
        config.submit_timeout = Duration::from_secs(5);
        Arc::new(LedgerClient::new(config).unwrap())
    }

    fn authenticator(&self) -> Arc<LocalAuthenticator> {
        let presence = FixedPresence {
            approve: true,
            verified: true,
        };
        Arc::new(LocalAuthenticator::open(&self.config.passkey_path(), Arc::new(presence)).unwrap())
    }

    /// Register a passkey without going through the orchestrator
    async fn enroll_passkey(&self) {
        let gate = PasskeyGate::new(self.authenticator(), &self.config.origin, &self.config.rp_name)
            .unwrap();
        assert!(gate.register("alice@example.com").await);
    }

    fn keystore(&self) -> KeyStore {
        KeyStore::new(Arc::new(FileSeedStore::open(&self.config.seed_dir()).unwrap()))
    }

    /// A fresh process on this device
    fn launch(&self) -> (WalletOrchestrator, Arc<LedgerClient>, Arc<LocalAuthenticator>) {
        let authenticator = self.authenticator();
        let ledger = self.ledger();
        let gate = PasskeyGate::new(authenticator.clone(), &self.config.origin, &self.config.rp_name)
            .unwrap();
        let orchestrator = WalletOrchestrator::new(
            gate,
            self.keystore(),
            ledger.clone(),
            Arc::new(WalletRecordClient::new(&self.config.api_base).unwrap()),
            OrchestratorSettings::default(),
        );
        (orchestrator, ledger, authenticator)
    }

    async fn requests(&self, http_method: &str, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
            .collect()
    }

    async fn record_posts(&self) -> Vec<Value> {
        self.requests("POST", RECORD_PATH)
            .await
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    async fn rpc_calls(&self, rpc_method: &str) -> usize {
        self.requests("POST", RPC_PATH)
            .await
            .iter()
            .filter(|r| {
                serde_json::from_slice::<Value>(&r.body)
                    .map(|body| body["method"] == rpc_method)
                    .unwrap_or(false)
            })
            .count()
    }
}

fn rpc_ok(mut result: Value) -> ResponseTemplate {
    result["status"] = json!("success");
    ResponseTemplate::new(200).set_body_json(json!({ "result": result }))
}

fn rpc_error(code: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "result": { "error": code, "status": "error" }
    }))
}

async fn mount_rpc(server: &MockServer, rpc_method: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(RPC_PATH))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Healthy node holding `balance` drops for every account
async fn mount_ledger(server: &MockServer, balance: &str) {
    mount_rpc(server, "server_info", rpc_ok(json!({ "info": {} }))).await;
    mount_rpc(
        server,
        "account_info",
        rpc_ok(json!({ "account_data": { "Balance": balance, "Sequence": 7 } })),
    )
    .await;
    mount_rpc(
        server,
        "fee",
        rpc_ok(json!({ "drops": { "base_fee": "10", "open_ledger_fee": "10" } })),
    )
    .await;
    mount_rpc(server, "ledger_current", rpc_ok(json!({ "ledger_current_index": 500 }))).await;
}

async fn mount_faucet(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/faucet/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "amount": 1000 })))
        .mount(server)
        .await;
}

async fn mount_remote_record(server: &MockServer, address: &str, seed: Option<&str>) {
    let mut data = json!({
        "address": address,
        "label": "alice@example.com",
        "is_primary": true,
        "is_verified": false,
        "verified_at": null
    });
    if let Some(seed) = seed {
        data["seed"] = json!(seed);
    }
    Mock::given(method("GET"))
        .and(path(RECORD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data })))
        .mount(server)
        .await;
}

/// Creates succeed, except the first `conflicts` which answer 409
async fn mount_record_writes(server: &MockServer, conflicts: u64) {
    if conflicts > 0 {
        Mock::given(method("POST"))
            .and(path(RECORD_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "success": false, "message": "wallet already exists"
            })))
            .up_to_n_times(conflicts)
            .with_priority(1)
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path(RECORD_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "success": true, "data": null })))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(RECORD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(server)
        .await;
}

// ============================================================================
// Wallet Lifecycle Tests
// ============================================================================

mod wallet_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_first_connect_creates_funds_and_backs_up() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_faucet(&device.server).await;
        mount_record_writes(&device.server, 0).await;

        let (orchestrator, ledger, authenticator) = device.launch();
        orchestrator.initialize(Some(alice())).await;
        assert_eq!(orchestrator.state().address, None);

        let address = orchestrator.connect().await.expect("connect");

        // one credential, one local seed, one backend record carrying it
        assert_eq!(authenticator.credential_count("app.lendmark.io").await, 1);
        let local = device.keystore().load_wallet("alice").await.unwrap();
        assert_eq!(local.address(), address);

        let posts = device.record_posts().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["address"], address.as_str());
        assert_eq!(posts[0]["seed"], local.seed());
        assert_eq!(posts[0]["label"], "alice@example.com");
        assert!(device.requests("DELETE", RECORD_PATH).await.is_empty());

        let posts = device.requests("POST", RECORD_PATH).await;
        assert_eq!(
            posts[0].headers.get("authorization").unwrap().to_str().unwrap(),
            "Bearer alice-token"
        );

        assert_eq!(device.requests("POST", "/faucet/accounts").await.len(), 1);

        let state = orchestrator.state();
        assert!(state.unlocked);
        assert!(!state.is_connecting);
        assert_eq!(state.remote_record.unwrap().address, address);
        assert_eq!(ledger.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_returning_user_only_authenticates() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_faucet(&device.server).await;
        mount_record_writes(&device.server, 0).await;

        let first = {
            let (orchestrator, _, _) = device.launch();
            orchestrator.initialize(Some(alice())).await;
            orchestrator.connect().await.unwrap()
        };
        let seed_before = device.keystore().load_wallet("alice").await.unwrap().seed().to_string();

        // process restart on the same device
        mount_remote_record(&device.server, &first, None).await;
        let (orchestrator, _, authenticator) = device.launch();
        orchestrator.initialize(Some(alice())).await;
        assert_eq!(orchestrator.state().address.as_deref(), Some(first.as_str()));
        assert!(!orchestrator.state().unlocked);

        let second = orchestrator.connect().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(authenticator.credential_count("app.lendmark.io").await, 1);
        assert_eq!(device.record_posts().await.len(), 1);
        assert_eq!(device.requests("POST", "/faucet/accounts").await.len(), 1);
        assert_eq!(
            device.keystore().load_wallet("alice").await.unwrap().seed(),
            seed_before
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_not_destructive() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_faucet(&device.server).await;
        mount_record_writes(&device.server, 0).await;

        let (orchestrator, _, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;
        let address = orchestrator.connect().await.unwrap();

        orchestrator.disconnect().await;
        let state = orchestrator.state();
        assert_eq!(state.address, None);
        assert!(!state.unlocked);
        assert!(matches!(
            orchestrator.sign_message(b"after disconnect"),
            Err(WalletError::NotConnected)
        ));
        assert!(device.requests("DELETE", RECORD_PATH).await.is_empty());

        assert!(device.keystore().has_wallet("alice").await);
        assert_eq!(orchestrator.connect().await.as_deref(), Some(address.as_str()));
        assert_eq!(device.record_posts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_logout_and_switch_user() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_faucet(&device.server).await;
        mount_record_writes(&device.server, 0).await;

        let (orchestrator, _, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;
        let alice_address = orchestrator.connect().await.unwrap();

        orchestrator.initialize(None).await;
        assert_eq!(orchestrator.state().address, None);
        assert_eq!(orchestrator.connect().await, None);

        let bob = UserIdentity {
            user_id: "bob".to_string(),
            label: "bob@example.com".to_string(),
            api_token: "bob-token".to_string(),
        };
        orchestrator.initialize(Some(bob)).await;
        let bob_address = orchestrator.connect().await.unwrap();

        assert_ne!(alice_address, bob_address);
        let keystore = device.keystore();
        assert_eq!(keystore.load_wallet("alice").await.unwrap().address(), alice_address);
        assert_eq!(keystore.load_wallet("bob").await.unwrap().address(), bob_address);
    }

    #[tokio::test]
    async fn test_concurrent_connects_create_one_wallet() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_faucet(&device.server).await;
        mount_record_writes(&device.server, 0).await;

        let (orchestrator, _, authenticator) = device.launch();
        orchestrator.initialize(Some(alice())).await;

        let (a, b, c) = tokio::join!(orchestrator.connect(), orchestrator.connect(), orchestrator.connect());

        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(authenticator.credential_count("app.lendmark.io").await, 1);
        assert_eq!(device.record_posts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_declined_ceremony_creates_nothing() {
        let device = Device::new().await;
        mount_record_writes(&device.server, 0).await;

        let presence = FixedPresence {
            approve: false,
            verified: true,
        };
        let authenticator =
            LocalAuthenticator::open(&device.config.passkey_path(), Arc::new(presence)).unwrap();
        let orchestrator = WalletOrchestrator::from_config(&device.config, Arc::new(authenticator)).unwrap();

        orchestrator.initialize(Some(alice())).await;
        assert_eq!(orchestrator.connect().await, None);

        assert!(!device.keystore().has_wallet("alice").await);
        assert!(device.record_posts().await.is_empty());
        assert!(!orchestrator.state().is_connecting);
    }
}

// ============================================================================
// Backend Record Tests
// ============================================================================

mod backend_records {
    use super::*;

    #[tokio::test]
    async fn test_conflict_on_create_leaves_single_record() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_faucet(&device.server).await;
        let stale = WalletKeys::generate();
        mount_remote_record(&device.server, stale.address(), None).await;
        mount_record_writes(&device.server, 1).await;

        let (orchestrator, _, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;
        assert_eq!(orchestrator.state().address.as_deref(), Some(stale.address()));

        let address = orchestrator.connect().await.unwrap();

        // create, delete the stale record, create again with ours
        let posts = device.record_posts().await;
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|p| p["address"] == address.as_str()));
        assert_eq!(device.requests("DELETE", RECORD_PATH).await.len(), 1);
        assert_eq!(orchestrator.state().remote_record.unwrap().address, address);
    }

    #[tokio::test]
    async fn test_persistent_conflict_fails_connect() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_faucet(&device.server).await;
        mount_record_writes(&device.server, 5).await;

        let (orchestrator, _, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;

        assert_eq!(orchestrator.connect().await, None);
        // one retry by default
        assert_eq!(device.record_posts().await.len(), 2);
        assert!(!orchestrator.state().unlocked);
    }

    #[tokio::test]
    async fn test_divergent_remote_is_left_alone_until_reconciled() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        let local = device.keystore().create_wallet("alice").await.unwrap();
        device.enroll_passkey().await;
        let other = WalletKeys::generate();
        mount_remote_record(&device.server, other.address(), None).await;
        mount_record_writes(&device.server, 1).await;

        let (orchestrator, _, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;
        let state = orchestrator.state();
        assert_eq!(state.address.as_deref(), Some(local.address()));
        assert!(state.reconciliation_pending);

        assert_eq!(orchestrator.connect().await.as_deref(), Some(local.address()));
        assert!(device.record_posts().await.is_empty());
        assert!(device.requests("DELETE", RECORD_PATH).await.is_empty());

        let record = orchestrator.reconcile().await.unwrap();
        assert_eq!(record.address, local.address());
        assert_eq!(device.record_posts().await.len(), 2);
        assert_eq!(device.requests("DELETE", RECORD_PATH).await.len(), 1);
        assert!(!orchestrator.state().reconciliation_pending);
    }

    #[tokio::test]
    async fn test_reconcile_requires_unlocked_wallet() {
        let device = Device::new().await;
        let (orchestrator, _, _) = device.launch();
        assert!(matches!(orchestrator.reconcile().await, Err(WalletError::NoIdentity)));

        orchestrator.initialize(Some(alice())).await;
        assert!(matches!(orchestrator.reconcile().await, Err(WalletError::NotConnected)));
    }

    #[tokio::test]
    async fn test_backend_outage_blocks_wallet_creation() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_record_writes(&device.server, 0).await;
        Mock::given(method("GET"))
            .and(path(RECORD_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&device.server)
            .await;

        let (orchestrator, _, authenticator) = device.launch();
        orchestrator.initialize(Some(alice())).await;

        let state = orchestrator.state();
        assert!(state.is_initialized);
        assert!(!state.remote_resolved);
        assert_eq!(state.address, None);
        assert_eq!(state.remote_record, None);

        assert_eq!(orchestrator.connect().await, None);
        assert_eq!(device.requests("GET", RECORD_PATH).await.len(), 2);
        assert!(device.record_posts().await.is_empty());
        assert!(device.requests("DELETE", RECORD_PATH).await.is_empty());
        assert_eq!(authenticator.credential_count("app.lendmark.io").await, 0);
        assert!(device.keystore().load_wallet("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_connect_after_outage_restores_backup() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_record_writes(&device.server, 0).await;
        device.enroll_passkey().await;

        let keys = WalletKeys::generate();
        Mock::given(method("GET"))
            .and(path(RECORD_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&device.server)
            .await;
        mount_remote_record(&device.server, keys.address(), Some(keys.seed())).await;

        let (orchestrator, _, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;
        assert_eq!(orchestrator.state().address, None);

        let address = orchestrator.connect().await.expect("connect");

        assert_eq!(address, keys.address());
        assert!(device.record_posts().await.is_empty());
        assert!(device.requests("DELETE", RECORD_PATH).await.is_empty());
        let restored = device.keystore().load_wallet("alice").await.unwrap();
        assert_eq!(restored.seed(), keys.seed());

        let state = orchestrator.state();
        assert!(state.unlocked);
        assert!(state.remote_resolved);
        assert_eq!(state.remote_record.unwrap().address, keys.address());
    }
}

// ============================================================================
// Restore Tests
// ============================================================================

mod restore {
    use super::*;

    #[tokio::test]
    async fn test_new_device_restores_from_backup() {
        let device = Device::new().await;
        let keys = WalletKeys::generate();
        mount_remote_record(&device.server, keys.address(), Some(keys.seed())).await;

        let (orchestrator, _, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;

        assert_eq!(orchestrator.state().address.as_deref(), Some(keys.address()));
        let restored = device.keystore().load_wallet("alice").await.unwrap();
        assert_eq!(restored.seed(), keys.seed());
        assert!(!orchestrator.state().unlocked);
    }

    #[tokio::test]
    async fn test_local_wallet_takes_precedence_over_backup() {
        let device = Device::new().await;
        let local = device.keystore().create_wallet("alice").await.unwrap();
        let remote = WalletKeys::generate();
        mount_remote_record(&device.server, remote.address(), Some(remote.seed())).await;

        let (orchestrator, _, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;

        assert_eq!(orchestrator.state().address.as_deref(), Some(local.address()));
        let kept = device.keystore().load_wallet("alice").await.unwrap();
        assert_eq!(kept.seed(), local.seed());
    }

    #[tokio::test]
    async fn test_sealed_backup_round_trip() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        mount_faucet(&device.server).await;
        mount_record_writes(&device.server, 0).await;

        let mut config = device.config.clone();
        config.backup_passphrase = Some("correct horse".to_string());
        let presence = FixedPresence {
            approve: true,
            verified: true,
        };
        let authenticator = LocalAuthenticator::open(&config.passkey_path(), Arc::new(presence)).unwrap();
        let orchestrator = WalletOrchestrator::from_config(&config, Arc::new(authenticator)).unwrap();
        orchestrator.initialize(Some(alice())).await;
        orchestrator.connect().await.unwrap();

        let posts = device.record_posts().await;
        let backup = posts[0]["seed"].as_str().unwrap();
        let local = device.keystore().load_wallet("alice").await.unwrap();

        assert!(!backup.contains(local.seed()));
        assert!(decode_backup(backup, None).is_err());
        let opened = decode_backup(backup, Some("correct horse")).unwrap();
        assert_eq!(opened.expose(), local.seed());
    }
}

// ============================================================================
// Signing and Ledger Tests
// ============================================================================

mod signing {
    use super::*;

    async fn connected(device: &Device) -> (WalletOrchestrator, Arc<LedgerClient>, String) {
        mount_faucet(&device.server).await;
        mount_record_writes(&device.server, 0).await;
        let (orchestrator, ledger, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;
        let address = orchestrator.connect().await.unwrap();
        (orchestrator, ledger, address)
    }

    #[tokio::test]
    async fn test_sign_message() {
        let device = Device::new().await;
        mount_ledger(&device.server, "0").await;
        let (orchestrator, _, address) = connected(&device).await;

        let signed = orchestrator.sign_message(b"I accept loan #42").unwrap();
        assert_eq!(signed.address, address);

        let signature = hex::decode(&signed.signature).unwrap();
        assert!(verify_message(&signed.public_key, b"I accept loan #42", &signature).unwrap());
        assert!(!verify_message(&signed.public_key, b"I accept loan #43", &signature).unwrap());
    }

    #[tokio::test]
    async fn test_payment_validated() {
        let device = Device::new().await;
        mount_ledger(&device.server, "50000000").await;
        mount_rpc(&device.server, "submit", rpc_ok(json!({ "engine_result": "tesSUCCESS" }))).await;
        mount_rpc(
            &device.server,
            "tx",
            rpc_ok(json!({ "validated": true, "meta": { "TransactionResult": "tesSUCCESS" } })),
        )
        .await;
        let (orchestrator, ledger, _) = connected(&device).await;

        assert_eq!(orchestrator.get_balance().await, 50_000_000);

        let tx = LedgerTransaction::payment(WalletKeys::generate().address(), 1_500_000, Some(9)).unwrap();
        let result = orchestrator.sign_and_send_transaction(&tx).await.unwrap();

        assert!(result.success);
        assert_eq!(result.result_code, "tesSUCCESS");
        assert_eq!(result.hash.len(), 64);
        assert_eq!(device.rpc_calls("submit").await, 1);
        assert_eq!(ledger.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_rejection_reports_result_code() {
        let device = Device::new().await;
        mount_ledger(&device.server, "50000000").await;
        mount_rpc(&device.server, "submit", rpc_ok(json!({ "engine_result": "temBAD_FEE" }))).await;
        let (orchestrator, ledger, _) = connected(&device).await;

        let tx = LedgerTransaction::account_set(Some("lendmark.io")).unwrap();
        let err = orchestrator.sign_and_send_transaction(&tx).await.unwrap_err();

        assert_eq!(err.result_code(), Some("temBAD_FEE"));
        assert_eq!(device.rpc_calls("tx").await, 0);
        assert_eq!(ledger.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let device = Device::new().await;
        mount_ledger(&device.server, "50000000").await;
        let (orchestrator, _, _) = device.launch();
        orchestrator.initialize(Some(alice())).await;

        let tx = LedgerTransaction::payment(WalletKeys::generate().address(), 1, None).unwrap();
        assert!(matches!(
            orchestrator.sign_and_send_transaction(&tx).await,
            Err(WalletError::NotConnected)
        ));
        assert_eq!(device.rpc_calls("submit").await, 0);
    }

    #[tokio::test]
    async fn test_balance_degrades_to_zero() {
        let device = Device::new().await;
        mount_rpc(&device.server, "server_info", rpc_ok(json!({ "info": {} }))).await;
        mount_rpc(&device.server, "account_info", rpc_error("actNotFound")).await;
        let (orchestrator, ledger, address) = connected(&device).await;

        assert_eq!(orchestrator.get_balance().await, 0);
        assert!(orchestrator.explorer_url().unwrap().ends_with(&address));
        assert_eq!(ledger.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_node_does_not_block_connect() {
        let device = Device::new().await;
        Mock::given(method("POST"))
            .and(path(RPC_PATH))
            .respond_with(ResponseTemplate::new(502))
            .mount(&device.server)
            .await;
        let (orchestrator, ledger, _) = connected(&device).await;

        assert!(orchestrator.state().unlocked);
        assert_eq!(orchestrator.get_balance().await, 0);
        assert_eq!(ledger.open_sessions(), 0);
    }
}
