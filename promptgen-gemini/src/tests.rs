use super::*;
use mockito::{Matcher, Server};
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Instant;

const TEST_MODEL: &str = "gemini-2.0-flash";
const ENDPOINT_PATH: &str = "/gemini-2.0-flash:generateContent";

fn client_for(server_url: &str, timeout: Option<Duration>) -> GeminiClient {
    GeminiClient::new("secret", TEST_MODEL, timeout)
        .expect("build client")
        .with_base_url(server_url)
}

/// Accepts connections and never answers them.
fn silent_listener() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let address = listener.local_addr().expect("listener address");
    thread::spawn(move || {
        let mut held: Vec<TcpStream> = Vec::new();
        for mut stream in listener.incoming().flatten() {
            let mut buffer = [0_u8; 1024];
            let _ = stream.read(&mut buffer);
            held.push(stream);
        }
    });
    format!("http://{address}")
}

#[test]
fn instruction_prefixes_prompt() {
    let instruction = build_instruction("a tiny http server in Go");
    assert_eq!(
        instruction,
        "Based on the following request, generate the necessary code files:\n\na tiny http server in Go"
    );
}

#[test]
fn empty_prompt_is_forwarded() {
    let request = GenerationRequest::for_prompt("");
    assert!(request.instruction.ends_with("code files:\n\n"));
}

#[test]
fn schema_does_not_depend_on_prompt() {
    let first = GenerationRequest::for_prompt("one");
    let second = GenerationRequest::for_prompt("two");
    assert_eq!(first.config, second.config);
}

#[test]
fn file_list_schema_serializes_expected_shape() {
    let value = serde_json::to_value(file_list_schema()).expect("serialize schema");

    assert_eq!(value["type"], "ARRAY");
    let items = &value["items"];
    assert_eq!(items["type"], "OBJECT");
    assert_eq!(items["properties"]["file_name"]["type"], "STRING");
    assert_eq!(items["properties"]["source_code"]["type"], "STRING");
    assert_eq!(
        items["required"],
        serde_json::json!(["file_name", "source_code"])
    );
    assert_eq!(
        items["propertyOrdering"],
        serde_json::json!(["file_name", "source_code"])
    );
    assert!(value.get("required").is_none());
    assert!(value.get("properties").is_none());
}

#[test]
fn text_request_with_schema_serializes_correctly() {
    let request = GenerationRequest::for_prompt("Test prompt");
    let body = TextRequest::with_schema(&request.instruction, &request.config);
    let value = serde_json::to_value(body).expect("serialize request");

    assert!(value["contents"].is_array());
    assert_eq!(
        value["contents"][0]["parts"][0]["text"],
        request.instruction.as_str()
    );
    assert_eq!(
        value["generationConfig"]["responseMimeType"],
        "application/json"
    );
    assert_eq!(value["generationConfig"]["responseSchema"]["type"], "ARRAY");
}

#[test]
fn empty_api_key_is_rejected() {
    let error = GeminiClient::new("   ", TEST_MODEL, None).expect_err("missing key");
    assert!(matches!(error, GeminiError::MissingApiKey));
}

#[test]
fn first_text_is_extracted_from_response() {
    let json = r#"
    {
        "candidates": [
            {
                "content": {
                    "parts": [{ "text": "[{\"file_name\":\"a.txt\",\"source_code\":\"hi\"}]" }],
                    "role": "model"
                },
                "finishReason": "STOP"
            }
        ]
    }
    "#;

    let response: TextResponse = serde_json::from_str(json).expect("parse response");
    let text = response.into_first_text().expect("text part present");
    assert_eq!(text, r#"[{"file_name":"a.txt","source_code":"hi"}]"#);
}

#[test]
fn response_without_candidates_is_rejected() {
    let response: TextResponse = serde_json::from_str("{}").expect("parse empty response");
    let error = response.into_first_text().expect_err("no candidates");
    assert!(matches!(error, GeminiError::NoCandidates));
}

#[test]
fn candidate_without_parts_is_rejected() {
    let json = r#"{ "candidates": [ { "content": { "parts": [] } } ] }"#;
    let response: TextResponse = serde_json::from_str(json).expect("parse response");
    let error = response.into_first_text().expect_err("no parts");
    assert!(matches!(error, GeminiError::NoParts));
}

#[test]
fn candidate_without_content_is_rejected() {
    let json = r#"{ "candidates": [ { "finishReason": "SAFETY" } ] }"#;
    let response: TextResponse = serde_json::from_str(json).expect("parse response");
    let error = response.into_first_text().expect_err("no content");
    assert!(matches!(error, GeminiError::NoParts));
}

#[test]
fn endpoint_includes_model() {
    let client = GeminiClient::new("secret", "gemini-1.5-pro", None).expect("build client");
    assert_eq!(
        client.endpoint_url(),
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent"
    );
}

#[test]
fn generate_posts_schema_with_api_key_header() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", ENDPOINT_PATH)
        .match_header("x-goog-api-key", "secret")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "contents": [{ "parts": [{ "text": build_instruction("a cli") }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"candidates":[{"content":{"parts":[{"text":"[{\"file_name\":\"a.rs\",\"source_code\":\"\"}]"}]}}]}"#,
        )
        .create();

    let client = client_for(&server.url(), Some(Duration::from_secs(10)));
    let text = client
        .generate(&GenerationRequest::for_prompt("a cli"))
        .expect("generation succeeds");

    mock.assert();
    assert_eq!(text, r#"[{"file_name":"a.rs","source_code":""}]"#);
}

#[test]
fn unauthorized_response_is_http_error() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", ENDPOINT_PATH)
        .with_status(401)
        .with_body(r#"{"error":{"code":401,"message":"API key not valid"}}"#)
        .create();

    let client = client_for(&server.url(), Some(Duration::from_secs(10)));
    let error = client
        .generate(&GenerationRequest::for_prompt("anything"))
        .expect_err("401 is fatal");

    mock.assert();
    match error {
        GeminiError::Http(inner) => {
            assert_eq!(inner.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[test]
fn empty_candidate_list_is_no_candidates() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", ENDPOINT_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates":[]}"#)
        .create();

    let client = client_for(&server.url(), Some(Duration::from_secs(10)));
    let error = client
        .generate(&GenerationRequest::for_prompt("anything"))
        .expect_err("no candidates");

    mock.assert();
    assert!(matches!(error, GeminiError::NoCandidates));
}

#[test]
fn configured_timeout_expires_against_silent_server() {
    let client = client_for(&silent_listener(), Some(Duration::from_millis(300)));
    let started = Instant::now();

    let error = client
        .generate(&GenerationRequest::for_prompt("anything"))
        .expect_err("request times out");

    assert!(started.elapsed() < Duration::from_secs(10));
    match error {
        GeminiError::Http(inner) => assert!(inner.is_timeout()),
        other => panic!("expected Http timeout, got {other:?}"),
    }
}

#[test]
fn disabled_timeout_outlasts_builder_default() {
    // reqwest's blocking builder otherwise gives up after 30s.
    let client = client_for(&silent_listener(), None);
    let request = thread::spawn(move || client.generate(&GenerationRequest::for_prompt("slow")));

    thread::sleep(Duration::from_secs(32));

    assert!(!request.is_finished());
}
