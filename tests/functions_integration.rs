//! End-to-end tests: registry directory → service → gate → coordinator → pool

use async_trait::async_trait;
use functions_engine::functions::{FunctionRegistry, FunctionService, ServiceConfig};
use functions_engine::host::{
    ApiArea, CurrentUser, HostApi, HostError, HostServices, HyperHttpClient, Identity, LogEmailer,
    Organization,
};
use functions_engine::runtime::{ConcurrencyGate, EnginePool, ExecutionCoordinator, ExecutionResult};
use functions_engine::EngineError;
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Host API that records how many calls are in flight at once
#[derive(Default)]
struct SlowCatalog {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl HostApi for SlowCatalog {
    async fn call(
        &self,
        area: ApiArea,
        method: &str,
        args: Vec<JsonValue>,
    ) -> Result<JsonValue, HostError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match (area, method) {
            (ApiArea::ContentItems, "get") => Ok(json!({
                "id": args.first().cloned().unwrap_or(JsonValue::Null),
                "title": "Spring collection",
                "tags": ["new", "featured"],
            })),
            (ApiArea::Navigation, "menu") => Ok(json!(["Home", "Shop", "About"])),
            _ => Err(HostError::NotFound(format!("{}.{}", area, method))),
        }
    }
}

const SCRIPTS: &[(&str, &str)] = &[
    (
        "product",
        r#"
        function get(q) {
            const item = api.contentItems.get(q.id);
            return new JsonResult(item);
        }
        "#,
    ),
    (
        "menu",
        r#"
        function get() {
            const links = api.navigation.menu();
            return new HtmlResult("<ul>" + links.map(l => "<li>" + l + "</li>").join("") + "</ul>");
        }
        "#,
    ),
    (
        "greeting",
        r#"
        function get() {
            return "Hello " + (currentUser ? currentUser.name : "guest") +
                " from " + (currentOrganization ? currentOrganization.id : "nowhere");
        }
        "#,
    ),
    (
        "signup",
        r#"
        function post(payload) {
            if (!payload.email) {
                return new StatusCodeResult(422, { error: "email required" });
            }
            return new RedirectResult("/welcome?u=" + encodeURIComponent(payload.email), 303);
        }
        "#,
    ),
    (
        "spin",
        "function get() { for (;;) {} }",
    ),
    (
        "cleanup",
        "async function run(payload) { await null; return payload.days; }",
    ),
];

const MANIFEST: &str = r#"
functions:
  spin:
    timeout_ms: 100
  cleanup:
    description: Nightly cleanup
"#;

struct Harness {
    _dir: TempDir,
    service: Arc<FunctionService>,
    catalog: Arc<SlowCatalog>,
}

async fn harness(max_concurrent: usize) -> Harness {
    let dir = TempDir::new().unwrap();
    for (name, code) in SCRIPTS {
        fs::write(dir.path().join(format!("{}.js", name)), code).unwrap();
    }
    fs::write(dir.path().join("functions.yaml"), MANIFEST).unwrap();

    let registry = Arc::new(FunctionRegistry::new());
    assert_eq!(registry.load_directory(dir.path()).await.unwrap(), SCRIPTS.len());

    let catalog = Arc::new(SlowCatalog::default());
    let host = HostServices::new(
        catalog.clone(),
        Arc::new(LogEmailer::new()),
        Arc::new(HyperHttpClient::new(Duration::from_secs(2))),
    );

    let service = Arc::new(FunctionService::new(
        registry,
        Arc::new(ConcurrencyGate::new(max_concurrent).unwrap()),
        ExecutionCoordinator::new(Arc::new(EnginePool::new(4).unwrap())),
        host,
        ServiceConfig {
            default_timeout: Duration::from_secs(5),
            gate_timeout: Duration::from_secs(10),
        },
    ));

    Harness {
        _dir: dir,
        service,
        catalog,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_host_content_round_trip() {
    let h = harness(4).await;

    let result = h
        .service
        .get("product", &json!({"id": "sku-1"}), &Identity::anonymous(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        result.to_wire(),
        json!({
            "contentType": "application/json",
            "body": {"id": "sku-1", "title": "Spring collection", "tags": ["new", "featured"]},
            "statusCode": 200,
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_render_for_templates() {
    let h = harness(4).await;

    let html = h
        .service
        .render("menu", &json!({}), &Identity::anonymous(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(html, "<ul><li>Home</li><li>Shop</li><li>About</li></ul>");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identity_is_per_request() {
    let h = harness(4).await;
    let token = CancellationToken::new();

    let signed_in = Identity::anonymous()
        .with_user(CurrentUser::new("u-1").with_name("Ada"))
        .with_organization(Organization::new("acme"));

    let first = h.service.get("greeting", &json!({}), &signed_in, &token).await.unwrap();
    let second = h
        .service
        .get("greeting", &json!({}), &Identity::anonymous(), &token)
        .await
        .unwrap();

    assert_eq!(first, ExecutionResult::Value(json!("Hello Ada from acme")));
    assert_eq!(second, ExecutionResult::Value(json!("Hello guest from nowhere")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_post_structured_shapes() {
    let h = harness(4).await;
    let token = CancellationToken::new();
    let identity = Identity::anonymous();

    let rejected = h
        .service
        .post("signup", &json!({}), &json!({}), &identity, &token)
        .await
        .unwrap();
    let rejected = rejected.as_structured().unwrap();
    assert_eq!(rejected.status_code, 422);
    assert_eq!(rejected.body, json!({"error": "email required"}));

    let accepted = h
        .service
        .post("signup", &json!({"email": "a@b.co"}), &json!({}), &identity, &token)
        .await
        .unwrap();
    let accepted = accepted.as_structured().unwrap();
    assert_eq!(accepted.status_code, 303);
    assert_eq!(accepted.redirect_location(), Some("/welcome?u=a%40b.co"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manifest_timeout_applies() {
    let h = harness(2).await;
    let started = std::time::Instant::now();

    let err = h
        .service
        .get("spin", &json!({}), &Identity::anonymous(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Timeout(t) if t == Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_secs(2));

    // The interrupted engine is handed back shortly after
    let pool = h.service.coordinator().pool();
    for _ in 0..200 {
        if pool.stats().active_engines == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.stats().active_engines, 0);
    assert!(pool.stats().idle_engines <= 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gate_bounds_concurrent_executions() {
    let h = harness(3).await;

    let calls: Vec<_> = (0..10)
        .map(|i| {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move {
                service
                    .get(
                        "product",
                        &json!({"id": format!("sku-{}", i)}),
                        &Identity::anonymous(),
                        &CancellationToken::new(),
                    )
                    .await
            })
        })
        .collect();

    for outcome in futures::future::join_all(calls).await {
        assert!(outcome.unwrap().is_ok());
    }

    assert!(h.catalog.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(h.service.gate().active(), 0);
    assert_eq!(h.service.coordinator().pool().stats().active_engines, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_internal_run_and_shutdown() {
    let h = harness(2).await;

    h.service
        .run("cleanup", &json!({"days": 30}), &Identity::anonymous(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        h.service.registry().get("cleanup").unwrap().description.as_deref(),
        Some("Nightly cleanup")
    );

    h.service.shutdown().await;
    h.service.shutdown().await;

    let err = h
        .service
        .run("cleanup", &json!({"days": 1}), &Identity::anonymous(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::GateClosed));
    assert!(h.service.coordinator().pool().is_disposed());
}
