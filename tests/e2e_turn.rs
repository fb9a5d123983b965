//! End-to-end turn tests against a mock HTTP server.
//!
//! Exercises the real HTTP stack: the chat client's request/response
//! handling, the tool proxy transport with placeholder substitution, and
//! the remote speech backend.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use serde_json::json;
use sibyl::config::{LlmConfig, ProxyConfig, TtsConfig};
use sibyl::engine::{ConversationEngine, Role};
use sibyl::error::VoiceError;
use sibyl::llm::ChatClient;
use sibyl::output::remote::{AudioPlayer, RemoteTts};
use sibyl::output::Synthesizer;
use sibyl::tools::http::HttpInvoker;
use sibyl::tools::{HttpBinding, ToolDefinition, ToolRegistry};
use sibyl::vars::SystemVariables;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn llm_config(base_url: &str) -> LlmConfig {
    LlmConfig {
        api_url: base_url.to_owned(),
        api_key: "sk-test".to_owned(),
        ..LlmConfig::default()
    }
}

fn chat_answer(text: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    })
}

fn empty_registry() -> ToolRegistry {
    ToolRegistry::new(HttpInvoker::new(&ProxyConfig::default()))
}

#[tokio::test]
async fn direct_answer_makes_exactly_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_answer("São 14:30")))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = Arc::new(ChatClient::new(&llm_config(&server.uri())));
    let mut engine = ConversationEngine::new(endpoint, &llm_config(&server.uri()));
    let registry = empty_registry();

    let outcome = engine
        .run_turn("que horas são", &registry, &SystemVariables::new())
        .await
        .unwrap();

    assert_eq!(outcome.final_text, "São 14:30");
    assert!(!outcome.used_tools);
    assert_eq!(engine.history().len(), 2);
}

#[tokio::test]
async fn tool_cycle_with_failing_tool_still_answers() {
    let chat = MockServer::start().await;
    let proxy = MockServer::start().await;

    // First completion: the model requests a tool call.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc123",
                        "type": "function",
                        "function": {
                            "name": "get_weather",
                            "arguments": "{\"city\": \"SP\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .up_to_n_times(1)
        .mount(&chat)
        .await;

    // Second completion: final answer after the tool result.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_answer("Não consegui consultar o clima agora.")),
        )
        .mount(&chat)
        .await;

    // The proxy reaches the weather API, which fails with HTTP 500.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 500,
            "statusText": "Internal Server Error",
            "ok": false,
            "data": {"error": "upstream exploded"}
        })))
        .mount(&proxy)
        .await;

    let mut registry = ToolRegistry::new(HttpInvoker::new(&ProxyConfig {
        base_url: proxy.uri(),
        request_timeout_s: 5,
    }));
    registry
        .register(ToolDefinition {
            name: "get_weather".to_owned(),
            description: "Consulta o clima".to_owned(),
            parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
            binding: HttpBinding {
                url: "https://api.example.com/weather?city={city}".to_owned(),
                method: "GET".to_owned(),
                headers: HashMap::new(),
                body: String::new(),
            },
        })
        .unwrap();

    let endpoint = Arc::new(ChatClient::new(&llm_config(&chat.uri())));
    let mut engine = ConversationEngine::new(endpoint, &llm_config(&chat.uri()));

    let outcome = engine
        .run_turn("clima em sp", &registry, &SystemVariables::new())
        .await
        .unwrap();

    // The failure was serialized into a tool result, never thrown.
    assert_eq!(outcome.final_text, "Não consegui consultar o clima agora.");
    assert!(outcome.used_tools);

    let history = engine.history();
    assert_eq!(history.len(), 4);
    let tool_msg = history.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_abc123"));
    assert!(tool_msg.content.contains("error"));
}

#[tokio::test]
async fn tool_invocation_substitutes_arguments_and_variables() {
    let proxy = MockServer::start().await;

    // The proxy should receive the fully substituted request description:
    // the `city` argument and the `api_token` system variable, with the
    // unknown placeholder left literal.
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "url": "https://api.example.com/weather?city=SP&key=tok-123",
            "method": "GET",
            "headers": {"x-trace": "{unknown}"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "statusText": "OK",
            "ok": true,
            "data": {"temp": 25}
        })))
        .expect(1)
        .mount(&proxy)
        .await;

    let mut registry = ToolRegistry::new(HttpInvoker::new(&ProxyConfig {
        base_url: proxy.uri(),
        request_timeout_s: 5,
    }));
    registry
        .register(ToolDefinition {
            name: "get_weather".to_owned(),
            description: "Consulta o clima".to_owned(),
            parameters: json!({"type": "object"}),
            binding: HttpBinding {
                url: "https://api.example.com/weather?city={city}&key={api_token}".to_owned(),
                method: "GET".to_owned(),
                headers: HashMap::from([("x-trace".to_owned(), "{unknown}".to_owned())]),
                body: String::new(),
            },
        })
        .unwrap();

    // System variables come from a pre-execution pass; build one from a
    // registry-backed startup tool.
    let vars_proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200, "ok": true, "data": "tok-123"
        })))
        .mount(&vars_proxy)
        .await;
    let mut vars_registry = ToolRegistry::new(HttpInvoker::new(&ProxyConfig {
        base_url: vars_proxy.uri(),
        request_timeout_s: 5,
    }));
    vars_registry
        .register(ToolDefinition {
            name: "api_token".to_owned(),
            description: "Token de acesso".to_owned(),
            parameters: json!({"type": "object"}),
            binding: HttpBinding {
                url: "https://auth.example.com/token".to_owned(),
                method: "POST".to_owned(),
                headers: HashMap::new(),
                body: String::new(),
            },
        })
        .unwrap();
    let vars =
        sibyl::vars::run_startup_pass(&vars_registry, &["api_token".to_owned()]).await;
    assert_eq!(vars.len(), 1);

    let mut args = serde_json::Map::new();
    args.insert("city".to_owned(), json!("SP"));
    let data = registry.invoke("get_weather", &args, &vars).await.unwrap();
    assert_eq!(data["temp"], 25);
}

#[tokio::test]
async fn llm_error_status_carries_parsed_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "rate limited"}
        })))
        .mount(&server)
        .await;

    let endpoint = Arc::new(ChatClient::new(&llm_config(&server.uri())));
    let mut engine = ConversationEngine::new(endpoint, &llm_config(&server.uri()));
    let registry = empty_registry();

    let err = engine
        .run_turn("oi tudo bem", &registry, &SystemVariables::new())
        .await
        .unwrap_err();
    match err {
        VoiceError::Llm { status, message } => {
            assert_eq!(status, 429);
            assert_eq!(message, "rate limited");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The user message stays in history; no assistant message was added.
    assert_eq!(engine.history().len(), 1);
}

// ── Remote speech backend ───────────────────────────────────────────

struct CapturingPlayer {
    played: Mutex<Vec<Vec<u8>>>,
}

#[async_trait::async_trait]
impl AudioPlayer for CapturingPlayer {
    async fn play(
        &self,
        audio: Vec<u8>,
        _levels: tokio::sync::mpsc::UnboundedSender<f32>,
    ) -> sibyl::Result<()> {
        self.played.lock().unwrap().push(audio);
        Ok(())
    }
}

#[tokio::test]
async fn remote_tts_fetches_and_plays_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .and(body_partial_json(json!({
            "model": "tts-1",
            "voice": "alloy",
            "input": "bem-vindo"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
        .expect(1)
        .mount(&server)
        .await;

    let player = Arc::new(CapturingPlayer {
        played: Mutex::new(Vec::new()),
    });
    let config = TtsConfig {
        api_url: server.uri(),
        api_key: "sk-tts".to_owned(),
        ..TtsConfig::default()
    };
    let backend = RemoteTts::new(&config, player.clone());

    let (levels_tx, _levels_rx) = tokio::sync::mpsc::unbounded_channel();
    backend.speak("bem-vindo", levels_tx).await.unwrap();

    let played = player.played.lock().unwrap();
    assert_eq!(played.as_slice(), &[vec![1u8, 2, 3, 4]]);
}

#[tokio::test]
async fn remote_tts_non_success_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let player = Arc::new(CapturingPlayer {
        played: Mutex::new(Vec::new()),
    });
    let config = TtsConfig {
        api_url: server.uri(),
        ..TtsConfig::default()
    };
    let backend = RemoteTts::new(&config, player.clone());

    let (levels_tx, _levels_rx) = tokio::sync::mpsc::unbounded_channel();
    let err = backend.speak("oi", levels_tx).await.unwrap_err();
    assert!(matches!(err, VoiceError::Output(_)));
    assert!(player.played.lock().unwrap().is_empty());
}
