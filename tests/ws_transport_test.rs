//! CDP over a real WebSocket, against a scripted in-process browser.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use nodemark::browser::{resolve_endpoint, CdpConnection, Controller, Transport};
use nodemark::{NodemarkError, ProtocolVersion, TabId};

const SLOW_ATTACH: Duration = Duration::from_millis(200);

/// Requests the scripted browser received, in order.
type Received = Arc<Mutex<Vec<Value>>>;

/// Serve one WebSocket client that speaks just enough CDP for these tests.
///
/// `Page.close` answers after emitting `Target.detachedFromTarget` for the
/// calling session; `Browser.close` drops the socket without answering.
/// Attaching to target `SLOW` takes [`SLOW_ATTACH`] to answer.
async fn spawn_browser(protocol_version: &'static str) -> (String, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let request: Value = serde_json::from_str(text.as_str()).unwrap();
            log.lock().unwrap().push(request.clone());

            let id = request["id"].clone();
            let ok = |result: Value| json!({"id": id, "result": result});
            let fail = |code: i64, message: &str| {
                json!({"id": id, "error": {"code": code, "message": message}})
            };

            let reply = match request["method"].as_str().unwrap_or_default() {
                "Browser.getVersion" => ok(json!({
                    "protocolVersion": protocol_version,
                    "product": "HeadlessChrome/130.0",
                    "userAgent": "Mozilla/5.0",
                })),
                "Target.getTargets" => ok(json!({"targetInfos": [
                    {"targetId": "P1", "type": "page", "title": "One", "url": "https://a.test/", "attached": false},
                    {"targetId": "W1", "type": "service_worker", "title": "sw", "url": "https://a.test/sw.js", "attached": false},
                    {"targetId": "P2", "type": "page", "title": "Two", "url": "https://b.test/", "attached": true},
                ]})),
                "Target.attachToTarget" => match request["params"]["targetId"].as_str() {
                    Some("GONE") => fail(-32602, "No target with given id found"),
                    Some("SLOW") => {
                        tokio::time::sleep(SLOW_ATTACH).await;
                        ok(json!({"sessionId": "S-SLOW"}))
                    }
                    Some(target) => ok(json!({"sessionId": format!("S-{}", target)})),
                    None => fail(-32602, "Invalid parameters"),
                },
                "Target.detachFromTarget" => ok(json!({})),
                "DOM.enable" | "DOM.disable" => ok(json!({})),
                "DOM.resolveNode" => fail(-32000, "No node with given id found"),
                "Page.close" => {
                    let event = json!({
                        "method": "Target.detachedFromTarget",
                        "params": {"sessionId": request["sessionId"], "targetId": "P1"},
                    });
                    ws.send(Message::Text(event.to_string().into())).await.unwrap();
                    ok(json!({}))
                }
                "Browser.close" => {
                    let _ = ws.close(None).await;
                    break;
                }
                other => fail(-32601, &format!("'{}' wasn't found", other)),
            };
            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                break;
            }
        }
    });

    (url, received)
}

fn methods(received: &Received) -> Vec<String> {
    received
        .lock()
        .unwrap()
        .iter()
        .filter_map(|r| r["method"].as_str().map(str::to_string))
        .collect()
}

/// Wait until the browser has seen a `method` request.
async fn seen(received: &Received, method: &str) {
    while !methods(received).iter().any(|m| m == method) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn last_request(received: &Received, method: &str) -> Value {
    received
        .lock()
        .unwrap()
        .iter()
        .rev()
        .find(|r| r["method"] == method)
        .cloned()
        .unwrap()
}

mod sessions {
    use super::*;

    #[tokio::test]
    async fn attach_uses_flattened_sessions() {
        let (url, received) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();
        let tab = TabId::from("P1");

        conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap();
        conn.send(&tab, "DOM.enable", json!({})).await.unwrap();

        assert_eq!(
            methods(&received),
            vec!["Browser.getVersion", "Target.attachToTarget", "DOM.enable"]
        );
        let attach = last_request(&received, "Target.attachToTarget");
        assert_eq!(attach["params"], json!({"targetId": "P1", "flatten": true}));
        assert!(attach.get("sessionId").is_none());
        assert_eq!(last_request(&received, "DOM.enable")["sessionId"], "S-P1");
    }

    #[tokio::test]
    async fn host_errors_keep_their_code() {
        let (url, _) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();
        let tab = TabId::from("P1");
        conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap();

        let err = conn
            .send(&tab, "DOM.resolveNode", json!({"backendNodeId": 7}))
            .await
            .unwrap_err();

        match err {
            NodemarkError::Protocol {
                method,
                code,
                message,
            } => {
                assert_eq!(method, "DOM.resolveNode");
                assert_eq!(code, Some(-32000));
                assert!(message.contains("No node"));
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn newer_version_than_browser_is_attach_error() {
        let (url, received) = spawn_browser("1.2").await;
        let conn = CdpConnection::connect(&url).await.unwrap();

        let err = conn
            .attach(&TabId::from("P1"), &ProtocolVersion::DEFAULT)
            .await
            .unwrap_err();

        assert!(err.is_attach_error(), "{err:?}");
        assert!(!methods(&received).contains(&"Target.attachToTarget".to_string()));
    }

    #[tokio::test]
    async fn rejected_attach_is_attach_error() {
        let (url, _) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();

        let err = conn
            .attach(&TabId::from("GONE"), &ProtocolVersion::DEFAULT)
            .await
            .unwrap_err();

        match err {
            NodemarkError::Attach { tab, reason } => {
                assert_eq!(tab, "GONE");
                assert!(reason.contains("No target"));
            }
            other => panic!("expected Attach, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_attach_on_one_connection_fails() {
        let (url, received) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();
        let tab = TabId::from("P1");
        conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap();

        let err = conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap_err();

        assert!(err.is_attach_error());
        assert_eq!(
            methods(&received)
                .iter()
                .filter(|m| *m == "Target.attachToTarget")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn send_without_attach_is_session_error() {
        let (url, received) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();

        let err = conn
            .send(&TabId::from("P1"), "DOM.enable", json!({}))
            .await
            .unwrap_err();

        assert!(err.is_session_error());
        assert!(methods(&received).is_empty());
    }

    #[tokio::test]
    async fn detach_releases_the_session() {
        let (url, received) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();
        let tab = TabId::from("P1");
        conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap();

        conn.detach(&tab).await.unwrap();

        assert_eq!(
            last_request(&received, "Target.detachFromTarget")["params"],
            json!({"sessionId": "S-P1"})
        );
        assert!(conn
            .send(&tab, "DOM.enable", json!({}))
            .await
            .unwrap_err()
            .is_session_error());
        // Attaching again works.
        conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap();
    }

    #[tokio::test]
    async fn browser_side_detach_forgets_the_session() {
        let (url, _) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();
        let tab = TabId::from("P1");
        conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap();

        conn.send(&tab, "Page.close", json!({})).await.unwrap();

        let err = conn.send(&tab, "DOM.enable", json!({})).await.unwrap_err();
        assert!(err.is_session_error(), "{err:?}");
        assert!(!conn.is_attached(&tab).await);
    }

    #[tokio::test]
    async fn abandoned_attach_can_still_be_detached() {
        let (url, received) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();
        let tab = TabId::from("SLOW");

        // Give up on the attach once the browser has the request.
        tokio::select! {
            result = conn.attach(&tab, &ProtocolVersion::DEFAULT) => {
                panic!("attach answered early: {result:?}")
            }
            _ = seen(&received, "Target.attachToTarget") => {}
        }

        conn.detach(&tab).await.unwrap();

        assert_eq!(
            last_request(&received, "Target.detachFromTarget")["params"],
            json!({"sessionId": "S-SLOW"})
        );
        assert!(!conn.is_attached(&tab).await);
        // The tab is free again.
        conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap();
        assert!(conn.is_attached(&tab).await);
    }

    #[tokio::test]
    async fn detach_waits_for_an_attach_in_flight() {
        let (url, received) = spawn_browser("1.3").await;
        let conn = Arc::new(CdpConnection::connect(&url).await.unwrap());
        let tab = TabId::from("SLOW");

        let attaching = {
            let conn = conn.clone();
            let tab = tab.clone();
            tokio::spawn(async move { conn.attach(&tab, &ProtocolVersion::DEFAULT).await })
        };
        seen(&received, "Target.attachToTarget").await;

        let err = conn.send(&tab, "DOM.enable", json!({})).await.unwrap_err();
        assert!(err.is_session_error(), "{err:?}");
        assert!(!conn.is_attached(&tab).await);

        conn.detach(&tab).await.unwrap();
        attaching.await.unwrap().unwrap();

        assert_eq!(
            methods(&received),
            vec!["Browser.getVersion", "Target.attachToTarget", "Target.detachFromTarget"]
        );
        assert!(!conn.is_attached(&tab).await);
    }

    #[tokio::test]
    async fn second_attach_while_one_is_in_flight_fails() {
        let (url, received) = spawn_browser("1.3").await;
        let conn = Arc::new(CdpConnection::connect(&url).await.unwrap());
        let tab = TabId::from("SLOW");

        let attaching = {
            let conn = conn.clone();
            let tab = tab.clone();
            tokio::spawn(async move { conn.attach(&tab, &ProtocolVersion::DEFAULT).await })
        };
        seen(&received, "Target.attachToTarget").await;

        let err = conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap_err();
        assert!(err.is_attach_error(), "{err:?}");
        attaching.await.unwrap().unwrap();
        assert!(conn.is_attached(&tab).await);
    }
}

mod connection {
    use super::*;

    #[tokio::test]
    async fn list_tabs_returns_pages_only() {
        let (url, _) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();

        let tabs = conn.list_tabs().await.unwrap();

        let ids: Vec<&str> = tabs.iter().map(|t| t.target_id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2"]);
        assert_eq!(tabs[1].title, "Two");
        assert!(tabs[1].attached);
    }

    #[tokio::test]
    async fn protocol_version_is_parsed() {
        let (url, _) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();

        assert_eq!(conn.protocol_version().await.unwrap(), ProtocolVersion::DEFAULT);
    }

    #[tokio::test]
    async fn closed_socket_fails_pending_and_later_commands() {
        let (url, _) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();
        let tab = TabId::from("P1");
        conn.attach(&tab, &ProtocolVersion::DEFAULT).await.unwrap();

        let err = conn.send(&tab, "Browser.close", json!({})).await.unwrap_err();
        assert!(matches!(err, NodemarkError::CdpConnectionFailed(_)), "{err:?}");
        assert!(conn.is_closed());

        let err = conn.list_tabs().await.unwrap_err();
        assert!(matches!(err, NodemarkError::CdpConnectionFailed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn controller_round_trip_over_websocket() {
        let (url, received) = spawn_browser("1.3").await;
        let conn = CdpConnection::connect(&url).await.unwrap();
        let controller = Controller::new(Arc::new(conn));
        let tab = TabId::from("P2");

        controller.attach(&tab).await.unwrap();
        let err = controller
            .resolve_selector(&tab, nodemark::BackendNodeId(3))
            .await
            .unwrap_err();
        assert!(err.is_stale_node(), "{err:?}");
        controller.detach(&tab).await;

        assert_eq!(
            methods(&received),
            vec![
                "Browser.getVersion",
                "Target.attachToTarget",
                "DOM.enable",
                "DOM.resolveNode",
                "DOM.disable",
                "Target.detachFromTarget",
            ]
        );
    }
}

mod endpoints {
    use super::*;

    /// Answer one HTTP request with `body` as JSON.
    async fn spawn_json_endpoint(body: Value) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let body = body.to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        base
    }

    #[tokio::test]
    async fn websocket_urls_pass_through() {
        let url = "ws://127.0.0.1:9222/devtools/browser/abc";
        assert_eq!(resolve_endpoint(url).await.unwrap(), url);
        assert_eq!(
            resolve_endpoint("  wss://remote.test/cdp ").await.unwrap(),
            "wss://remote.test/cdp"
        );
    }

    #[tokio::test]
    async fn http_base_is_asked_for_the_browser_socket() {
        let base = spawn_json_endpoint(json!({
            "Browser": "HeadlessChrome/130.0",
            "Protocol-Version": "1.3",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/xyz",
        }))
        .await;

        let ws = resolve_endpoint(&format!("{}/", base)).await.unwrap();
        assert_eq!(ws, "ws://127.0.0.1:9222/devtools/browser/xyz");
    }

    #[tokio::test]
    async fn missing_socket_url_is_connection_error() {
        let base = spawn_json_endpoint(json!({"Browser": "Something"})).await;

        let err = resolve_endpoint(&base).await.unwrap_err();
        assert!(matches!(err, NodemarkError::CdpConnectionFailed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn garbage_endpoint_is_rejected() {
        let err = resolve_endpoint("chrome please").await.unwrap_err();
        assert!(err.to_string().contains("Invalid endpoint"), "{err}");
    }
}
