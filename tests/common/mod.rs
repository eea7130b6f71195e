//! In-process mock device for end-to-end tests.
//!
//! Accepts WebSocket connections, greets each one with a scripted list of
//! events, records every inbound message and answers through a responder.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use tvremote::{Config, MemoryTokenStore, Session, TokenStore};

/// Events sent right after the upgrade: `(connection index, request uri)`
pub type Greeter = Arc<dyn Fn(usize, &str) -> Vec<Value> + Send + Sync>;

/// Replies to one inbound message
pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

enum Outbound {
    Message(Value),
    Close,
}

#[derive(Default)]
struct Shared {
    close_after_greeting: bool,
    uris: Mutex<Vec<String>>,
    received: Mutex<Vec<Value>>,
    pushers: Mutex<Vec<mpsc::UnboundedSender<Outbound>>>,
}

/// Mock device handle
#[derive(Clone)]
pub struct MockTv {
    pub port: u16,
    shared: Arc<Shared>,
}

impl MockTv {
    pub async fn start(greeter: Greeter, responder: Responder) -> Self {
        Self::spawn(greeter, responder, false).await
    }

    /// Device that sends its greeting and then closes the connection
    pub async fn hanging_up(greeter: Greeter) -> Self {
        Self::spawn(greeter, silent(), true).await
    }

    async fn spawn(greeter: Greeter, responder: Responder, close_after_greeting: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared {
            close_after_greeting,
            ..Shared::default()
        });

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let shared = accept_shared.clone();
                let greeter = greeter.clone();
                let responder = responder.clone();
                let conn = index;
                index += 1;
                tokio::spawn(async move {
                    serve(conn, stream, shared, greeter, responder).await;
                });
            }
        });

        Self { port, shared }
    }

    /// Device that pairs with `token` and answers nothing
    pub async fn pairing(token: &'static str) -> Self {
        Self::start(greet(vec![connect_event(token), ready_event()]), silent()).await
    }

    pub fn uris(&self) -> Vec<String> {
        self.shared.uris.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<Value> {
        self.shared.received.lock().unwrap().clone()
    }

    /// Application requests received so far (decoded `params.data`)
    pub fn requests(&self) -> Vec<Value> {
        self.received()
            .iter()
            .filter(|m| m["method"] == "ms.channel.emit")
            .filter_map(|m| m["params"]["data"].as_str())
            .filter_map(|d| serde_json::from_str(d).ok())
            .collect()
    }

    /// Send an unsolicited message on every open connection
    pub fn push(&self, message: Value) {
        for tx in self.shared.pushers.lock().unwrap().iter() {
            let _ = tx.send(Outbound::Message(message.clone()));
        }
    }

    /// Close every open connection from the device side
    pub fn close_all(&self) {
        for tx in self.shared.pushers.lock().unwrap().drain(..) {
            let _ = tx.send(Outbound::Close);
        }
    }

    /// Wait until `count` application requests have arrived
    pub async fn wait_for_requests(&self, count: usize) {
        wait_until(|| self.requests().len() >= count).await;
    }
}

async fn serve(
    conn: usize,
    stream: tokio::net::TcpStream,
    shared: Arc<Shared>,
    greeter: Greeter,
    responder: Responder,
) {
    let mut uri = String::new();
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        uri = req.uri().to_string();
        Ok(resp)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    shared.uris.lock().unwrap().push(uri.clone());

    let (tx, mut outbound) = mpsc::unbounded_channel();
    shared.pushers.lock().unwrap().push(tx);

    let (mut write, mut read) = ws.split();
    for event in greeter(conn, &uri) {
        if write.send(Message::Text(event.to_string())).await.is_err() {
            return;
        }
    }
    if shared.close_after_greeting {
        let _ = write.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
                    shared.received.lock().unwrap().push(value.clone());
                    for reply in responder(&value) {
                        if write.send(Message::Text(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {},
            },
            out = outbound.recv() => match out {
                Some(Outbound::Message(value)) => {
                    if write.send(Message::Text(value.to_string())).await.is_err() {
                        return;
                    }
                },
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                },
            },
        }
    }
}

pub fn greet(events: Vec<Value>) -> Greeter {
    Arc::new(move |_, _| events.clone())
}

pub fn silent() -> Responder {
    Arc::new(|_| Vec::new())
}

/// Responder answering application requests by their `request` name
pub fn answering<F>(f: F) -> Responder
where
    F: Fn(&str, &Value) -> Vec<Value> + Send + Sync + 'static,
{
    Arc::new(move |message| {
        if message["method"] != "ms.channel.emit" {
            return Vec::new();
        }
        let Some(data) = message["params"]["data"]
            .as_str()
            .and_then(|d| serde_json::from_str::<Value>(d).ok())
        else {
            return Vec::new();
        };
        match data["request"].as_str() {
            Some(request) => f(request, &data),
            None => Vec::new(),
        }
    })
}

pub fn connect_event(token: &str) -> Value {
    json!({
        "event": "ms.channel.connect",
        "data": {"id": "c7a0a5d0", "token": token, "clients": []},
    })
}

pub fn ready_event() -> Value {
    json!({"event": "ms.channel.ready", "data": {}})
}

/// Application reply with its payload JSON-encoded in `data`
pub fn d2d(data: Value) -> Value {
    json!({"event": "d2d_service_message", "data": data.to_string()})
}

pub fn config_for(tv: &MockTv) -> Config {
    let mut config = Config::default();
    config.device.host = "127.0.0.1".to_string();
    config.device.port = tv.port;
    config.timeouts.connect_secs = 2;
    config.timeouts.request_secs = 5;
    config.timeouts.pairing_secs = 5;
    config.timeouts.handshake_secs = 5;
    config.timeouts.transfer_secs = 5;
    config
}

pub fn session_for(tv: &MockTv) -> (Session, Arc<MemoryTokenStore>) {
    let store = Arc::new(MemoryTokenStore::new());
    let tokens: Arc<dyn TokenStore> = store.clone();
    (Session::new(config_for(tv), tokens), store)
}

/// Poll `condition` for up to five seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
