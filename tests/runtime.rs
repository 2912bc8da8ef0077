mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use common::{issued_token, spawn_host, ORIGIN};
use embed_auth::{install_global, global_channel, AppConfig, EmbedRuntime, LocalBus};

/// API that only accepts the most recently issued host token.
async fn start_api(accepted: String) -> (String, Arc<Mutex<Vec<String>>>) {
    let bearers = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&bearers);
    let app = Router::new().route(
        "/reports",
        get(move |headers: HeaderMap| {
            let seen = Arc::clone(&seen);
            let accepted = accepted.clone();
            async move {
                let bearer = headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                seen.lock().unwrap().push(bearer.clone());
                if bearer == format!("Bearer {}", accepted) {
                    StatusCode::OK
                } else {
                    StatusCode::UNAUTHORIZED
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), bearers)
}

fn config(api_base_url: String) -> AppConfig {
    AppConfig {
        allowed_origins: vec![ORIGIN.to_string()],
        api_base_url: Some(api_base_url),
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn expired_session_is_refreshed_through_the_host() {
    // The API only knows the second token the host will issue.
    let (base, bearers) = start_api(issued_token(1)).await;
    let (bus, host) = LocalBus::pair();
    let runtime = EmbedRuntime::from_config(config(base), bus).unwrap();
    let (refreshes, _host) = spawn_host(host);

    let response = runtime.api.get("/reports").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(
        *bearers.lock().unwrap(),
        vec![
            format!("Bearer {}", issued_token(0)),
            format!("Bearer {}", issued_token(1)),
        ]
    );
    assert!(runtime.channel.state().is_authenticated());
    assert_eq!(runtime.channel.cached_token(), Some(issued_token(1)));
}

#[tokio::test]
async fn static_token_bypasses_the_host() {
    let (base, bearers) = start_api("launch-token-0123456789".into()).await;
    let (bus, mut host) = LocalBus::pair();
    let cfg = AppConfig {
        static_token: Some("launch-token-0123456789".into()),
        ..config(base)
    };
    let runtime = EmbedRuntime::from_config(cfg, bus).unwrap();

    assert!(!runtime.mount());
    assert_eq!(runtime.token().await.unwrap(), "launch-token-0123456789");
    let response = runtime.api.get("reports").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(bearers.lock().unwrap().len(), 1);
    assert!(host.try_recv().is_none());
}

#[tokio::test]
async fn global_channel_is_installed_once() {
    let (bus, _host) = LocalBus::pair();
    let first = EmbedRuntime::from_config(config("http://localhost:1".into()), bus).unwrap();
    let (bus, _host2) = LocalBus::pair();
    let second = EmbedRuntime::from_config(config("http://localhost:1".into()), bus).unwrap();

    let installed = install_global(first.channel.clone());
    assert!(Arc::ptr_eq(&installed, &first.channel));
    let again = install_global(second.channel.clone());
    assert!(Arc::ptr_eq(&again, &first.channel));
    assert!(Arc::ptr_eq(&global_channel().unwrap(), &first.channel));
}
