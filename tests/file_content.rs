mod common;

use std::time::Duration;

use common::{channel, ORIGIN};
use embed_auth::messages::now_millis;
use embed_auth::{AuthState, InboundOutcome, OutboundMessage, ProtocolError};
use serde_json::json;

#[tokio::test]
async fn file_content_is_correlated_by_nonce() {
    let (channel, mut host) = channel();
    let c = channel.clone();
    let pending = tokio::spawn(async move { c.request_file_content("src/widgets/Table.tsx").await });

    let (file_path, nonce) = match host.recv().await.unwrap() {
        OutboundMessage::RequestFileContent { file_path, nonce } => (file_path, nonce),
        other => panic!("unexpected message {:?}", other),
    };
    assert_eq!(file_path, "src/widgets/Table.tsx");

    host.deliver(
        ORIGIN,
        json!({
            "type": "FILE_CONTENT",
            "filePath": file_path,
            "content": "export const Table = () => null;\n",
            "timestamp": now_millis(),
            "nonce": nonce,
        }),
    );
    assert_eq!(
        pending.await.unwrap().unwrap(),
        "export const Table = () => null;\n"
    );
    // File traffic never touches the session.
    assert_eq!(channel.state(), AuthState::Idle);
    assert_eq!(channel.cached_token(), None);
}

#[tokio::test]
async fn file_error_rejects_only_its_own_request() {
    let (channel, mut host) = channel();
    let c1 = channel.clone();
    let c2 = channel.clone();
    let missing = tokio::spawn(async move { c1.request_file_content("missing.ts").await });
    let first = host.recv().await.unwrap();
    let present = tokio::spawn(async move { c2.request_file_content("present.ts").await });
    let second = host.recv().await.unwrap();

    let outcome = channel.handle_message(embed_auth::Envelope::new(
        ORIGIN,
        json!({
            "type": "FILE_CONTENT_ERROR",
            "filePath": "missing.ts",
            "error": "ENOENT",
            "timestamp": now_millis(),
            "nonce": first.nonce().unwrap(),
        }),
    ));
    assert_eq!(outcome, InboundOutcome::FileContentError { rejected: true });
    assert_eq!(
        missing.await.unwrap(),
        Err(ProtocolError::FileUnavailable {
            path: "missing.ts".into(),
            reason: "ENOENT".into()
        })
    );

    host.deliver(
        ORIGIN,
        json!({
            "type": "FILE_CONTENT",
            "filePath": "present.ts",
            "content": "ok",
            "timestamp": now_millis(),
            "nonce": second.nonce().unwrap(),
        }),
    );
    assert_eq!(present.await.unwrap().unwrap(), "ok");
}

#[tokio::test]
async fn file_content_from_untrusted_origin_is_ignored() {
    let (channel, mut host) = channel();
    let c = channel.clone();
    let _pending = tokio::spawn(async move { c.request_file_content("a.ts").await });
    let nonce = host.recv().await.unwrap().nonce().unwrap().to_string();
    let outcome = channel.handle_message(embed_auth::Envelope::new(
        "https://evil.example.com",
        json!({
            "type": "FILE_CONTENT",
            "filePath": "a.ts",
            "content": "malicious",
            "timestamp": now_millis(),
            "nonce": nonce,
        }),
    ));
    assert_eq!(outcome, InboundOutcome::OriginRejected);
}

#[tokio::test(start_paused = true)]
async fn unanswered_file_request_times_out() {
    let (channel, mut host) = channel();
    let c = channel.clone();
    let pending = tokio::spawn(async move { c.request_file_content("slow.ts").await });
    host.recv().await.unwrap();
    assert_eq!(
        pending.await.unwrap(),
        Err(ProtocolError::Timeout(Duration::from_millis(5000)))
    );
    // Unlike token requests, a file timeout leaves the session alone.
    assert_eq!(channel.state(), AuthState::Idle);
}
