//! AnkiConnect client tests
//!
//! Runs the client against an in-process axum server on an ephemeral port
//! that records request bodies and answers from a per-test closure.

use anki_helper::config::AnkiConfig;
use anki_helper::services::AnkiConnectClient;
use anki_helper::types::{CardTemplate, NewNoteType, NoteStore, NoteStoreError};
use anki_helper::utils::retry::RetryPolicy;
use anki_helper_common::{CardId, FieldUpdate, NoteId};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = dyn Fn(usize, &Value) -> (StatusCode, String) + Send + Sync;

struct ServerState {
    requests: Mutex<Vec<Value>>,
    respond: Box<Responder>,
    /// Delay before answering the first request
    stall_first: Duration,
}

struct TestServer {
    state: Arc<ServerState>,
    url: String,
}

impl TestServer {
    /// Start a server answering with `respond(request_index, body)`
    async fn start<F>(respond: F) -> Self
    where
        F: Fn(usize, &Value) -> (StatusCode, String) + Send + Sync + 'static,
    {
        Self::start_stalling_first(Duration::ZERO, respond).await
    }

    async fn start_stalling_first<F>(stall_first: Duration, respond: F) -> Self
    where
        F: Fn(usize, &Value) -> (StatusCode, String) + Send + Sync + 'static,
    {
        let state = Arc::new(ServerState {
            requests: Mutex::new(Vec::new()),
            respond: Box::new(respond),
            stall_first,
        });
        let app = Router::new()
            .route("/", post(handle))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            url: format!("http://{}/", addr),
        }
    }

    /// Answer every request with `{"result": result, "error": null}`
    async fn returning(result: Value) -> Self {
        Self::start(move |_, _| ok(result.clone())).await
    }

    fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }

    fn client(&self) -> AnkiConnectClient {
        self.client_with_timeout(Duration::from_secs(5))
    }

    fn client_with_timeout(&self, request_timeout: Duration) -> AnkiConnectClient {
        AnkiConnectClient::new(&AnkiConfig {
            connect_url: self.url.clone(),
            request_timeout,
            log_requests: true,
        })
        .unwrap()
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            multiplier: 1.0,
        })
    }
}

async fn handle(State(state): State<Arc<ServerState>>, Json(body): Json<Value>) -> (StatusCode, String) {
    let index = {
        let mut requests = state.requests.lock().unwrap();
        requests.push(body.clone());
        requests.len() - 1
    };
    if index == 0 && !state.stall_first.is_zero() {
        tokio::time::sleep(state.stall_first).await;
    }
    (state.respond)(index, &body)
}

fn ok(result: Value) -> (StatusCode, String) {
    (StatusCode::OK, json!({ "result": result, "error": null }).to_string())
}

#[tokio::test]
async fn test_request_envelope() {
    let server = TestServer::returning(json!([3, 1])).await;

    let ids = server.client().find_notes("deck:German").await.unwrap();

    assert_eq!(ids, vec![NoteId(3), NoteId(1)]);
    assert_eq!(
        server.requests(),
        vec![json!({
            "action": "findNotes",
            "version": 6,
            "params": { "query": "deck:German" }
        })]
    );
}

#[tokio::test]
async fn test_remote_error_is_reported() {
    let server = TestServer::start(|_, _| {
        (
            StatusCode::OK,
            json!({ "result": null, "error": "model was not found" }).to_string(),
        )
    })
    .await;

    let err = server.client().find_cards("note:Missing").await.unwrap_err();

    assert!(matches!(err, NoteStoreError::Remote(ref msg) if msg == "model was not found"));
    // Remote errors are not transient
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_bad_status_is_reported() {
    let server = TestServer::start(|_, _| (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string())).await;

    let err = server.client().list_note_type_names().await.unwrap_err();

    assert!(matches!(err, NoteStoreError::Status(500, ref body) if body == "boom"));
}

#[tokio::test]
async fn test_notes_info_skips_deleted_notes() {
    let server = TestServer::returning(json!([
        {
            "noteId": 1,
            "tags": ["noun"],
            "fields": {
                "Word": { "value": "Haus", "order": 0 },
                "Plural": { "value": "", "order": 1 }
            }
        },
        {}
    ]))
    .await;

    let notes = server
        .client()
        .fetch_notes(&[NoteId(1), NoteId(2)])
        .await
        .unwrap();

    assert_eq!(notes.len(), 1);
    let note = &notes[&NoteId(1)];
    assert_eq!(note.field("Word"), Some("Haus"));
    assert!(note.is_field_empty("Plural"));
    assert!(note.tags.contains("noun"));
}

#[tokio::test]
async fn test_empty_inputs_send_no_request() {
    let server = TestServer::returning(Value::Null).await;
    let client = server.client();

    assert!(client.fetch_notes(&[]).await.unwrap().is_empty());
    client.update_fields(NoteId(1), BTreeMap::new()).await.unwrap();
    client.add_tags(&[], &["x".to_string()]).await.unwrap();
    client.add_tags(&[NoteId(1)], &[]).await.unwrap();
    client.change_deck("Deck", &[]).await.unwrap();

    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_update_fields_attaches_audio() {
    let server = TestServer::returning(Value::Null).await;
    let updates = BTreeMap::from([
        ("Plural".to_string(), FieldUpdate::Value("Häuser".to_string())),
        ("Voiceover".to_string(), FieldUpdate::Audio(b"mp3".to_vec())),
    ]);

    server.client().update_fields(NoteId(9), updates).await.unwrap();

    let request = &server.requests()[0];
    assert_eq!(request["action"], "updateNoteFields");
    let note = &request["params"]["note"];
    assert_eq!(note["id"], 9);
    assert_eq!(note["fields"], json!({ "Plural": "Häuser", "Voiceover": "" }));
    let audio = &note["audio"][0];
    assert_eq!(audio["data"], "bXAz");
    assert_eq!(audio["fields"], json!(["Voiceover"]));
    let filename = audio["filename"].as_str().unwrap();
    assert!(filename.ends_with(".mp3"));
    assert_eq!(filename.len(), 64 + 4);
}

#[tokio::test]
async fn test_add_tags_joins_with_spaces() {
    let server = TestServer::returning(Value::Null).await;

    server
        .client()
        .add_tags(&[NoteId(1), NoteId(2)], &["noun".to_string(), "checked".to_string()])
        .await
        .unwrap();

    assert_eq!(
        server.requests()[0]["params"],
        json!({ "notes": [1, 2], "tags": "noun checked" })
    );
}

#[tokio::test]
async fn test_change_deck_and_store_media_params() {
    let server = TestServer::returning(Value::Null).await;
    let client = server.client();

    client.change_deck("German::Nouns", &[CardId(5)]).await.unwrap();
    client.store_media_file("_font.ttf", b"font", true).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0]["params"], json!({ "deck": "German::Nouns", "cards": [5] }));
    assert_eq!(
        requests[1]["params"],
        json!({ "filename": "_font.ttf", "data": "Zm9udA==", "deleteExisting": true })
    );
}

#[tokio::test]
async fn test_create_model_params() {
    let server = TestServer::returning(json!({ "id": 1 })).await;
    let note_type = NewNoteType {
        name: "German".to_string(),
        fields: vec!["Word".to_string(), "WordVoiceover".to_string()],
        css: ".card {}".to_string(),
        card_templates: vec![CardTemplate {
            name: "WordCard".to_string(),
            front: "{{Word}}".to_string(),
            back: "{{FrontSide}}".to_string(),
        }],
    };

    server.client().create_note_type(&note_type).await.unwrap();

    assert_eq!(
        server.requests()[0]["params"],
        json!({
            "modelName": "German",
            "inOrderFields": ["Word", "WordVoiceover"],
            "css": ".card {}",
            "isCloze": false,
            "cardTemplates": [
                { "Name": "WordCard", "Front": "{{Word}}", "Back": "{{FrontSide}}" }
            ]
        })
    );
}

/// First request stalls past the client timeout, later ones answer
async fn slow_first_server() -> TestServer {
    TestServer::start_stalling_first(Duration::from_millis(600), |_, _| ok(json!([42]))).await
}

#[tokio::test]
async fn test_idempotent_action_retried_after_timeout() {
    let server = slow_first_server().await;

    let ids = server
        .client_with_timeout(Duration::from_millis(200))
        .find_notes("deck:German")
        .await
        .unwrap();

    assert_eq!(ids, vec![NoteId(42)]);
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_create_model_never_retried() {
    let server = slow_first_server().await;
    let note_type = NewNoteType {
        name: "German".to_string(),
        fields: vec!["Word".to_string()],
        css: String::new(),
        card_templates: Vec::new(),
    };

    let err = server
        .client_with_timeout(Duration::from_millis(200))
        .create_note_type(&note_type)
        .await
        .unwrap_err();

    assert!(matches!(err, NoteStoreError::Timeout(_)), "unexpected error: {:?}", err);
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_unreachable_store_exhausts_retries() {
    // Bind and drop a listener to get a port nobody listens on
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = AnkiConnectClient::new(&AnkiConfig {
        connect_url: format!("http://{}/", addr),
        request_timeout: Duration::from_secs(1),
        log_requests: false,
    })
    .unwrap()
    .with_retry_policy(RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        multiplier: 1.0,
    });

    let err = client.find_notes("deck:German").await.unwrap_err();

    assert!(matches!(
        err,
        NoteStoreError::RetriesExhausted { action: "findNotes", attempts: 2, .. }
    ));
}
