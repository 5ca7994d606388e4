use chrono::{Duration as ChronoDuration, Utc};
use ezbooks_auth::{JwtClaims, PrincipalId, Role};
use ezbooks_core::TenantId;
use ezbooks_infra::AppConfig;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let config = AppConfig {
            jwt_secret: JWT_SECRET.to_string(),
            ..AppConfig::default()
        };
        let app = ezbooks_api::app::build_app(&config).expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap()
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// The read side is eventually consistent; poll until `ready` holds.
    async fn get_eventually(&self, token: &str, path: &str, ready: impl Fn(&Value) -> bool) -> Value {
        for _ in 0..100 {
            let res = self.get(token, path).await;
            if res.status() == StatusCode::OK {
                let body: Value = res.json().await.unwrap();
                if ready(&body) {
                    return body;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("{path} did not reach the expected state within timeout");
    }

    async fn open_account(&self, token: &str, name: &str, kind: &str) -> String {
        let res = self
            .post(token, "/accounts", json!({ "name": name, "kind": kind, "is_business": true }))
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let id = res.json::<Value>().await.unwrap()["id"].as_str().unwrap().to_string();
        self.get_eventually(token, &format!("/accounts/{id}"), |_| true).await;
        id
    }

    async fn record_transaction(&self, token: &str, account_id: &str, external_id: &str) -> String {
        let res = self
            .post(
                token,
                "/transactions",
                json!({
                    "account_id": account_id,
                    "external_id": external_id,
                    "amount": -4250,
                    "date": "2024-05-02",
                    "merchant": "Staples",
                    "description": "STAPLES #1234",
                    "category": ["Office Supplies"],
                    "is_business": true,
                }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let id = res.json::<Value>().await.unwrap()["id"].as_str().unwrap().to_string();
        self.get_eventually(token, &format!("/transactions/{id}"), |_| true).await;
        id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(tenant_id: TenantId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        tenant_id,
        roles,
        issued_at: now - ChronoDuration::seconds(1),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

/// Checking, card, office supplies and sales accounts for one tenant.
async fn open_chart(srv: &TestServer, token: &str) -> (String, String) {
    let checking = srv.open_account(token, "Business Checking", "asset").await;
    srv.open_account(token, "Amex Credit Card", "liability").await;
    let office = srv.open_account(token, "Office Supplies", "expense").await;
    srv.open_account(token, "Sales Income", "income").await;
    (checking, office)
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.get("not-a-jwt", "/transactions").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_context_is_derived_from_token() {
    let srv = TestServer::spawn().await;

    let tenant_id = TenantId::new();
    let token = mint_jwt(tenant_id, vec![Role::OWNER]);

    let res = srv.get(&token, "/whoami").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["tenant_id"].as_str().unwrap(), tenant_id.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "owner"));
}

#[tokio::test]
async fn suggested_entry_is_approved_into_the_journal() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(TenantId::new(), vec![Role::BOOKKEEPER]);
    let (checking, office) = open_chart(&srv, &token).await;
    let txn = srv.record_transaction(&token, &checking, "ext-1").await;

    let res = srv.post(&token, &format!("/transactions/{txn}/suggest"), json!({})).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let proposal: Value = res.json().await.unwrap();
    assert_eq!(proposal["status"], "pending");
    assert_eq!(proposal["debit_account_id"], office.as_str());
    assert_eq!(proposal["amount"], 4250);
    let pid = proposal["id"].as_str().unwrap().to_string();

    let res = srv
        .post(&token, &format!("/transactions/{txn}/proposals/{pid}/approve"), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let entry: Value = res.json().await.unwrap();
    let lines = entry["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l["amount"] == 4250));
    assert_eq!(entry["transaction_id"], txn.as_str());
    let entry_id = entry["entry_id"].as_str().unwrap().to_string();

    let journal = srv
        .get_eventually(&token, "/ledger/entries", |b| b["items"].as_array().is_some_and(|i| i.len() == 1))
        .await;
    assert_eq!(journal["items"][0]["entry_id"], entry_id.as_str());

    let balances = srv
        .get_eventually(&token, "/ledger/balances", |b| {
            b["items"]
                .as_array()
                .is_some_and(|i| i.iter().any(|x| x["account_id"] == office.as_str() && x["balance"] == 4250))
        })
        .await;
    let total: i64 = balances["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|x| x["balance"].as_i64().unwrap())
        .sum();
    assert_eq!(total, 0);

    let detail = srv
        .get_eventually(&token, &format!("/transactions/{txn}"), |b| !b["entry"].is_null())
        .await;
    // The background runner may have proposed too; only ours is approved.
    let ours = detail["proposals"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["id"] == pid.as_str())
        .unwrap();
    assert_eq!(ours["status"], "approved");
    assert_eq!(detail["entry"]["entry_id"], entry_id.as_str());
}

#[tokio::test]
async fn second_approval_is_a_conflict() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(TenantId::new(), vec![Role::OWNER]);
    let (checking, _) = open_chart(&srv, &token).await;
    let txn = srv.record_transaction(&token, &checking, "ext-2").await;

    let proposal: Value = srv
        .post(&token, &format!("/transactions/{txn}/suggest"), json!({}))
        .await
        .json()
        .await
        .unwrap();
    let approve = format!("/transactions/{txn}/proposals/{}/approve", proposal["id"].as_str().unwrap());

    assert_eq!(srv.post(&token, &approve, json!({})).await.status(), StatusCode::OK);
    let res = srv.post(&token, &approve, json!({})).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let reject = approve.replace("/approve", "/reject");
    assert_eq!(srv.post(&token, &reject, json!({})).await.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn viewer_cannot_approve_or_record() {
    let srv = TestServer::spawn().await;
    let tenant_id = TenantId::new();
    let owner = mint_jwt(tenant_id, vec![Role::OWNER]);
    let viewer = mint_jwt(tenant_id, vec![Role::VIEWER]);
    let (checking, _) = open_chart(&srv, &owner).await;
    let txn = srv.record_transaction(&owner, &checking, "ext-3").await;

    let proposal: Value = srv
        .post(&owner, &format!("/transactions/{txn}/suggest"), json!({}))
        .await
        .json()
        .await
        .unwrap();
    let pid = proposal["id"].as_str().unwrap();

    let res = srv
        .post(&viewer, &format!("/transactions/{txn}/proposals/{pid}/approve"), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .post(&viewer, "/accounts", json!({ "name": "Petty Cash", "kind": "asset" }))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Reading is fine.
    assert_eq!(srv.get(&viewer, &format!("/transactions/{txn}")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenants_cannot_see_each_others_transactions() {
    let srv = TestServer::spawn().await;
    let a = mint_jwt(TenantId::new(), vec![Role::OWNER]);
    let b = mint_jwt(TenantId::new(), vec![Role::OWNER]);
    let (checking, _) = open_chart(&srv, &a).await;
    let txn = srv.record_transaction(&a, &checking, "ext-4").await;

    assert_eq!(srv.get(&b, &format!("/transactions/{txn}")).await.status(), StatusCode::NOT_FOUND);
    let res = srv.post(&b, &format!("/transactions/{txn}/suggest"), json!({})).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let listed: Value = srv.get(&b, "/transactions").await.json().await.unwrap();
    assert_eq!(listed["items"], json!([]));
}

#[tokio::test]
async fn deleting_a_transaction_discards_its_proposals() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(TenantId::new(), vec![Role::BOOKKEEPER]);
    let (checking, _) = open_chart(&srv, &token).await;
    let txn = srv.record_transaction(&token, &checking, "ext-5").await;

    let proposal: Value = srv
        .post(&token, &format!("/transactions/{txn}/suggest"), json!({}))
        .await
        .json()
        .await
        .unwrap();

    let res = srv
        .client
        .delete(srv.url(&format!("/transactions/{txn}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body["discarded_proposals"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p == &proposal["id"]));

    srv.get_eventually(&token, "/proposals?status=pending", |b| b["items"] == json!([]))
        .await;
}

#[tokio::test]
async fn garbage_ids_and_bodies_are_rejected() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(TenantId::new(), vec![Role::OWNER]);

    assert_eq!(srv.get(&token, "/transactions/not-a-uuid").await.status(), StatusCode::BAD_REQUEST);

    let (checking, office) = open_chart(&srv, &token).await;
    let res = srv
        .post(
            &token,
            "/ledger/entries",
            json!({
                "date": "2024-05-31",
                "debit_account_id": office,
                "credit_account_id": office,
                "amount": 100,
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv
        .post(
            &token,
            "/ledger/entries",
            json!({
                "date": "2024-05-31",
                "memo": "month-end accrual",
                "debit_account_id": office,
                "credit_account_id": checking,
                "amount": 100,
                "adjustment": true,
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn ledger_reports_stay_balanced() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(TenantId::new(), vec![Role::OWNER]);
    let (checking, office) = open_chart(&srv, &token).await;
    let capital = srv.open_account(&token, "Owner Capital", "equity").await;

    for (date, debit, credit, amount) in [
        ("2024-01-02", &checking, &capital, 500_000),
        ("2024-05-31", &office, &checking, 4_250),
    ] {
        let res = srv
            .post(
                &token,
                "/ledger/entries",
                json!({ "date": date, "debit_account_id": debit, "credit_account_id": credit, "amount": amount }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let tb = srv
        .get_eventually(&token, "/ledger/trial-balance?as_of=2024-12-31", |b| {
            b["lines"]
                .as_array()
                .is_some_and(|l| l.iter().any(|x| x["account_id"] == office.as_str() && x["debit"] == 4_250))
        })
        .await;
    assert_eq!(tb["total_debits"], 500_000);
    assert_eq!(tb["total_debits"], tb["total_credits"]);

    let early = srv.get(&token, "/ledger/trial-balance?as_of=2024-03-01").await;
    let early: Value = early.json().await.unwrap();
    assert_eq!(early["total_credits"], 500_000);

    let pnl = srv
        .get(&token, "/ledger/profit-and-loss?from=2024-05-01&to=2024-05-31")
        .await
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(pnl["total_expenses"], 4_250);
    assert_eq!(pnl["net_income"], -4_250);

    let bs: Value = srv
        .get(&token, "/ledger/balance-sheet?as_of=2024-12-31")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(bs["total_assets"], 495_750);
    assert_eq!(bs["total_equity"], 500_000);
    assert_eq!(bs["retained_earnings"], -4_250);

    let gl: Value = srv
        .get(&token, &format!("/ledger/accounts/{checking}/general-ledger?from=2024-01-01&to=2024-12-31"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(gl["lines"].as_array().unwrap().len(), 2);
    assert_eq!(gl["closing_balance"], 495_750);

    let res = srv
        .get(&token, "/ledger/profit-and-loss?from=2024-06-01&to=2024-05-01")
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let res = srv
        .get(&token, &format!("/ledger/accounts/{}/general-ledger", uuid::Uuid::now_v7()))
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
