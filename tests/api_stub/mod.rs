use std::collections::{HashMap, VecDeque};
use std::io::Read as _;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Behavior of the stub course API.
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Assets present before the test starts, by display name.
    pub existing: Vec<String>,
    /// Bodies for consecutive `GET /link_check` calls; the last one repeats.
    pub link_check_sequence: Vec<Value>,
    /// Status for `POST /link_check`.
    pub start_status: u16,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            existing: Vec::new(),
            link_check_sequence: vec![json!({ "linkCheckStatus": "Succeeded" })],
            start_status: 200,
        }
    }
}

#[allow(dead_code)]
pub fn broken_link_tree() -> Value {
    json!({
        "sections": [{
            "id": "s1",
            "displayName": "Week 1",
            "subsections": [{
                "id": "ss1",
                "displayName": "Getting started",
                "units": [{
                    "id": "u1",
                    "displayName": "Welcome",
                    "blocks": [{
                        "id": "b1",
                        "url": "https://studio.example/b1",
                        "brokenLinks": ["https://gone.example/a"],
                        "lockedLinks": ["https://studio.example/static/locked.pdf"]
                    }]
                }]
            }]
        }]
    })
}

#[derive(Debug)]
struct State {
    assets: Vec<Value>,
    polls: VecDeque<Value>,
    last_poll: Value,
    requests: Vec<String>,
    next_id: u32,
    /// Download bodies by asset id, served under `/static/{id}`.
    files: HashMap<String, Vec<u8>>,
}

pub struct ApiStub {
    pub base_url: String,
    state: Arc<Mutex<State>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl ApiStub {
    pub fn spawn(config: StubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start course api stub");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/api");

        let assets = config
            .existing
            .iter()
            .enumerate()
            .map(|(i, name)| asset_json(&format!("existing-{i}"), name, 1, false))
            .collect();
        // Names containing "gone" have a url but no body behind it.
        let files = config
            .existing
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.contains("gone"))
            .map(|(i, name)| (format!("existing-{i}"), format!("contents of {name}").into_bytes()))
            .collect();
        let mut polls: VecDeque<Value> = config.link_check_sequence.into_iter().collect();
        let last_poll = polls.back().cloned().unwrap_or(json!({}));
        if polls.is_empty() {
            polls.push_back(last_poll.clone());
        }
        let state = Arc::new(Mutex::new(State {
            assets,
            polls,
            last_poll,
            requests: Vec::new(),
            next_id: 1,
            files,
        }));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_state = Arc::clone(&state);
        let start_status = config.start_status;

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let method = request.method().to_string().to_ascii_uppercase();
                let url = request.url().to_string();
                let (path, query) = match url.split_once('?') {
                    Some((path, query)) => (path.to_owned(), query.to_owned()),
                    None => (url.clone(), String::new()),
                };
                let mut body = Vec::new();
                if request.as_reader().read_to_end(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let segments: Vec<&str> = path
                    .trim_start_matches("/api/")
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .collect();

                let mut state = thread_state.lock().expect("stub state");
                state.requests.push(format!("{method} {path}"));
                if let ("GET", ["static", id]) = (method.as_str(), segments.as_slice()) {
                    let file = state.files.get(*id).cloned();
                    drop(state);
                    let response = match file {
                        Some(bytes) => tiny_http::Response::from_data(bytes),
                        None => tiny_http::Response::from_data(b"no such file".to_vec())
                            .with_status_code(404),
                    };
                    let _ = request.respond(response);
                    continue;
                }
                let (status, response) =
                    route(&mut state, &method, &segments, &query, &body, start_status);
                drop(state);

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let text = response.map(|v| v.to_string()).unwrap_or_default();
                let _ = request.respond(
                    tiny_http::Response::from_string(text)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });

        Self {
            base_url,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// `"METHOD /path"` of every request received so far.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().expect("stub state").requests.clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.requests().iter().filter(|r| r.starts_with(needle)).count()
    }
}

impl Drop for ApiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn asset_json(id: &str, name: &str, size: usize, locked: bool) -> Value {
    let content_type = if name.ends_with(".mp4") {
        "video/mp4"
    } else {
        "application/octet-stream"
    };
    json!({
        "id": id,
        "displayName": name,
        "fileSize": size,
        "contentType": content_type,
        "locked": locked,
        "url": format!("/api/static/{id}"),
    })
}

fn multipart_file_name(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let start = text.find("filename=\"")? + "filename=\"".len();
    let end = text[start..].find('"')?;
    Some(text[start..start + end].to_owned())
}

fn error(status: u16, message: &str) -> (u16, Option<Value>) {
    (status, Some(json!({ "error": message })))
}

fn route(
    state: &mut State,
    method: &str,
    segments: &[&str],
    query: &str,
    body: &[u8],
    start_status: u16,
) -> (u16, Option<Value>) {
    match (method, segments) {
        ("GET", ["courses", _, "assets"]) => (200, Some(json!({ "assets": state.assets }))),
        ("POST", ["courses", _, "assets"]) => {
            let Some(name) = multipart_file_name(body) else {
                return error(400, "missing file part");
            };
            if name.contains("forbidden") {
                return error(403, "not allowed to upload");
            }
            if name.contains("reject") {
                return (
                    422,
                    Some(json!({ "error": "file rejected", "reasons": ["virus_scan"] })),
                );
            }
            let overwrite = query.contains("overwrite=true");
            let existing = state
                .assets
                .iter()
                .position(|a| a["displayName"] == name.as_str());
            match (existing, overwrite) {
                (Some(_), false) => error(409, "duplicate file"),
                (Some(index), true) => {
                    let id = state.assets[index]["id"].as_str().unwrap_or_default().to_owned();
                    let asset = asset_json(&id, &name, body.len(), false);
                    state.assets[index] = asset.clone();
                    state.files.insert(id, format!("contents of {name}").into_bytes());
                    (200, Some(json!({ "asset": asset })))
                }
                (None, _) => {
                    let id = format!("asset-{}", state.next_id);
                    state.next_id += 1;
                    let asset = asset_json(&id, &name, body.len(), false);
                    state.assets.push(asset.clone());
                    state.files.insert(id, format!("contents of {name}").into_bytes());
                    (201, Some(json!({ "asset": asset })))
                }
            }
        }
        ("DELETE", ["courses", _, "assets", id]) => {
            if *id == "protected" {
                return error(403, "cannot delete");
            }
            let before = state.assets.len();
            state.assets.retain(|a| a["id"] != *id);
            if state.assets.len() == before {
                return error(404, "no such asset");
            }
            (204, None)
        }
        ("PATCH", ["courses", _, "assets", id]) => {
            let Ok(patch) = serde_json::from_slice::<Value>(body) else {
                return error(400, "invalid json");
            };
            let Some(asset) = state.assets.iter_mut().find(|a| a["id"] == *id) else {
                return error(404, "no such asset");
            };
            if let Some(locked) = patch.get("locked").and_then(Value::as_bool) {
                asset["locked"] = Value::Bool(locked);
            }
            if let Some(order) = patch.get("sortOrder") {
                asset["sortOrder"] = order.clone();
            }
            (200, Some(asset.clone()))
        }
        ("GET", ["courses", _, "assets", _, "usage"]) => (
            200,
            Some(json!({
                "usageLocations": [
                    { "displayLocation": "Week 1 / Welcome", "url": "/container/u1" }
                ]
            })),
        ),
        ("POST", ["courses", _, "assets", id, "thumbnail"]) => {
            (200, Some(json!({ "imageUrl": format!("/static/{id}-thumb.jpg") })))
        }
        ("POST", ["courses", _, "link_check"]) => {
            if start_status != 200 {
                return error(start_status, "cannot start link check");
            }
            (200, Some(json!({ "linkCheckStatus": "Pending" })))
        }
        ("GET", ["courses", _, "link_check"]) => {
            let next = state.polls.pop_front().unwrap_or_else(|| state.last_poll.clone());
            (200, Some(next))
        }
        _ => error(404, "not found"),
    }
}
