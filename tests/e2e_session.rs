//! End-to-end session tests.
//!
//! These drive a full session through the public API: handshake, the
//! configure/compute pipeline, inspection, and the failure paths.

use std::path::Path;
use std::sync::Arc;

use buildconf::engine::FilesystemEngineFactory;
use buildconf::protocol::{Outbox, PipelineState, RequestEnvelope, ServerMessage, Session};
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

struct Client {
    session: Session,
    rx: UnboundedReceiver<ServerMessage>,
    next_cookie: u32,
}

impl Client {
    fn new(experimental: bool) -> Self {
        let (outbox, rx) = Outbox::channel();
        let session =
            Session::new(outbox, Arc::new(FilesystemEngineFactory)).with_experimental(experimental);
        Self {
            session,
            rx,
            next_cookie: 0,
        }
    }

    /// Dispatch a request and return everything it produced, response last
    fn send(&mut self, request_type: &str, data: Value) -> Vec<Value> {
        self.next_cookie += 1;
        let cookie = self.next_cookie.to_string();
        self.session
            .dispatch(RequestEnvelope::new(request_type, &cookie, data));

        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg.to_value().unwrap());
        }
        let last = out.last().unwrap();
        assert_eq!(last["cookie"], cookie.as_str());
        assert_eq!(last["inReplyTo"], request_type);
        out
    }

    fn request(&mut self, request_type: &str, data: Value) -> Value {
        self.send(request_type, data).pop().unwrap()
    }

    fn handshake(&mut self, source: &Path, build: &Path, version: Value) -> Value {
        self.request(
            "handshake",
            json!({
                "protocolVersion": version,
                "sourceDirectory": source.display().to_string(),
                "buildDirectory": build.display().to_string(),
            }),
        )
    }

    fn state(&self) -> Option<PipelineState> {
        self.session.pipeline_state()
    }
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(src.join("lib")).unwrap();
    std::fs::write(
        src.join("CMakeLists.txt"),
        "cmake_minimum_required(VERSION 3.10)\nproject(Demo C)\n\
         add_subdirectory(lib)\nadd_executable(demo main.c)\n",
    )
    .unwrap();
    std::fs::write(src.join("lib/CMakeLists.txt"), "add_library(util STATIC util.c)\n").unwrap();
    dir
}

/// Full pipeline: handshake, settings, configure, compute, inspect
#[test]
fn test_full_pipeline() {
    let dir = project();
    let src = dir.path().join("src");
    let build = dir.path().join("build");
    let mut client = Client::new(false);

    let reply = client.handshake(&src, &build, json!({"major": 1, "minor": 0}));
    assert_eq!(reply["type"], "reply");
    assert_eq!(client.state(), Some(PipelineState::Active));

    let reply = client.request("setGlobalSettings", json!({"generator": "Ninja"}));
    assert_eq!(reply["type"], "reply");
    assert_eq!(client.state(), Some(PipelineState::Active));

    let settings = client.request("globalSettings", json!({}));
    assert_eq!(settings["generator"], "Ninja");
    assert_eq!(settings["sourceDirectory"], src.display().to_string());

    let messages = client.send(
        "configure",
        json!({"cacheArguments": ["-DCMAKE_BUILD_TYPE=Debug"]}),
    );
    let (reply, reports) = messages.split_last().unwrap();
    assert_eq!(reply["type"], "reply");
    assert!(reports.iter().all(|m| m["type"] == "progress" || m["type"] == "message"));
    assert!(!reports.is_empty());
    assert_eq!(client.state(), Some(PipelineState::Configured));

    let inputs = client.request("cmakeInputs", json!({}));
    let sources: Vec<&str> = inputs["buildFiles"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|g| g["sources"].as_array().unwrap())
        .filter_map(Value::as_str)
        .collect();
    assert!(sources.contains(&"CMakeLists.txt"));
    assert!(sources.iter().any(|s| s.ends_with("CMakeLists.txt") && s.starts_with("lib")));

    let reply = client.request("compute", json!({}));
    assert_eq!(reply["type"], "reply");
    assert_eq!(client.state(), Some(PipelineState::Computed));

    let model = client.request("codemodel", json!({}));
    let configuration = &model["configurations"][0];
    assert_eq!(configuration["name"], "Debug");
    assert_eq!(configuration["projects"][0]["name"], "Demo");
    let targets: Vec<&str> = configuration["projects"][0]["targets"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(targets, vec!["demo", "util"]);

    let rejected = client.request("setGlobalSettings", json!({}));
    assert_eq!(rejected["type"], "error");
    assert!(rejected["errorMessage"]
        .as_str()
        .unwrap()
        .contains("configure already performed"));
    assert_eq!(client.state(), Some(PipelineState::Computed));
}

/// compute right after activation is a state violation
#[test]
fn test_compute_before_configure() {
    let dir = project();
    let mut client = Client::new(false);
    client.handshake(&dir.path().join("src"), &dir.path().join("build"), json!({"major": 1}));

    let reply = client.request("compute", json!({}));
    assert_eq!(reply["type"], "error");
    assert!(reply["errorMessage"]
        .as_str()
        .unwrap()
        .contains("configure has not been performed"));
    assert_eq!(client.state(), Some(PipelineState::Active));

    let reply = client.request("codemodel", json!({}));
    assert_eq!(reply["type"], "error");
}

/// Reconfigure keeps CONFIGURED and raises the dirty signal
#[test]
fn test_reconfigure_emits_dirty_signal() {
    let dir = project();
    let mut client = Client::new(false);
    client.handshake(&dir.path().join("src"), &dir.path().join("build"), json!({"major": 1}));

    let first = client.send("configure", json!({}));
    assert!(first.iter().all(|m| m["type"] != "signal"));

    let second = client.send("configure", json!({}));
    let signal = second.iter().find(|m| m["type"] == "signal").unwrap();
    assert_eq!(signal["name"], "dirty");
    assert_eq!(signal["cookie"], "");
    assert_eq!(second.last().unwrap()["type"], "reply");
    assert_eq!(client.state(), Some(PipelineState::Configured));
}

/// A broken script fails configure without moving the pipeline
#[test]
fn test_engine_failure_is_request_scoped() {
    let dir = project();
    let src = dir.path().join("src");
    let mut client = Client::new(false);
    client.handshake(&src, &dir.path().join("build"), json!({"major": 1}));

    std::fs::write(src.join("CMakeLists.txt"), "project(Demo)\nadd_subdirectory(nope)\n").unwrap();
    let reply = client.request("configure", json!({}));
    assert_eq!(reply["type"], "error");
    assert!(reply["errorMessage"].as_str().unwrap().contains("nope"));
    assert_eq!(client.state(), Some(PipelineState::Active));

    std::fs::write(src.join("CMakeLists.txt"), "project(Demo)\n").unwrap();
    let reply = client.request("configure", json!({}));
    assert_eq!(reply["type"], "reply");
}

/// Experimental-only version without opt-in ends the session
#[test]
fn test_experimental_without_opt_in() {
    let dir = project();
    let mut client = Client::new(true);
    let reply = client.handshake(
        &dir.path().join("src"),
        &dir.path().join("build"),
        json!({"major": 1, "minor": 1}),
    );
    assert_eq!(reply["type"], "error");
    assert!(client.state().is_none());

    let reply = client.request("globalSettings", json!({}));
    assert_eq!(reply["type"], "error");
    assert!(reply["errorMessage"]
        .as_str()
        .unwrap()
        .starts_with("No active protocol"));
}

/// Opting in to 1.1 unlocks the cache request
#[test]
fn test_experimental_cache_request() {
    let dir = project();
    let mut client = Client::new(true);
    let reply = client.handshake(
        &dir.path().join("src"),
        &dir.path().join("build"),
        json!({"major": 1, "isExperimental": true}),
    );
    assert_eq!(reply["protocolVersion"]["minor"], 1);

    client.request("configure", json!({"cacheArguments": ["-DWITH_TESTS:BOOL=OFF"]}));
    let cache = client.request("cache", json!({}));
    let entry = cache["cache"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["key"] == "WITH_TESTS")
        .unwrap();
    assert_eq!(entry["type"], "BOOL");
    assert_eq!(entry["value"], "OFF");
}

/// Unknown request types are errors in every state
#[test]
fn test_unknown_request_type() {
    let dir = project();
    let mut client = Client::new(false);
    client.handshake(&dir.path().join("src"), &dir.path().join("build"), json!({"major": 1}));

    let reply = client.request("fileSystemWatchers", json!({}));
    assert_eq!(reply["type"], "error");
    assert!(reply["errorMessage"]
        .as_str()
        .unwrap()
        .contains("Unknown request type"));
    assert_eq!(client.state(), Some(PipelineState::Active));
}

proptest! {
    /// Every response is sealed with exactly one payload and mirrors the request
    #[test]
    fn prop_responses_are_sealed_and_mirror_request(
        request_type in "[a-zA-Z]{1,16}",
        cookie in "[ -~]{0,12}",
        handshake_first in any::<bool>(),
    ) {
        let (outbox, _rx) = Outbox::channel();
        let mut session = Session::new(outbox, Arc::new(FilesystemEngineFactory));
        if handshake_first {
            session.handle(RequestEnvelope::new(
                "handshake",
                "",
                json!({"sourceDirectory": "/src", "buildDirectory": "/build"}),
            ));
        }

        let response = session.handle(RequestEnvelope::new(&request_type, &cookie, json!({})));
        prop_assert!(response.is_complete());
        prop_assert_ne!(response.is_error(), response.data().is_ok());
        prop_assert_eq!(response.is_error(), response.error_message().is_ok());
        prop_assert_eq!(response.cookie(), cookie.as_str());
        prop_assert_eq!(response.request_type(), request_type.as_str());
    }
}
