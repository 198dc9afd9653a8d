//! End-to-end turn orchestration against in-memory fakes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use shared_types::{
    Chat, ChatTurnRequest, Message, MessagePart, Role, StreamEvent, TurnMessage,
};

use ripple_server::artifacts::Artifacts;
use ripple_server::chat::store::ChatStore;
use ripple_server::chat::{TurnEngine, MAX_TOOL_STEPS};
use ripple_server::config::{Config, DEFAULT_CHAT_MODEL};
use ripple_server::error::TurnError;
use ripple_server::observe::TracingObserver;
use ripple_server::provider::{ChatRequest, LanguageModel, ModelEvent, ModelStream, ToolCall};
use ripple_server::search::error_log::SearchErrorLog;
use ripple_server::search::WebSearch;
use ripple_server::tools::ToolRegistry;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeStore {
    chats: Mutex<Vec<Chat>>,
    messages: Mutex<Vec<Message>>,
}

impl FakeStore {
    fn chat_count(&self) -> usize {
        self.chats.lock().unwrap().len()
    }

    fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    fn saved_messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatStore for FakeStore {
    async fn chat(&self, id: Uuid) -> Result<Option<Chat>, TurnError> {
        Ok(self.chats.lock().unwrap().iter().find(|c| c.id == id).cloned())
    }

    async fn create_chat(&self, chat: &Chat) -> Result<(), TurnError> {
        self.chats.lock().unwrap().push(chat.clone());
        Ok(())
    }

    async fn chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>, TurnError> {
        Ok(self
            .chats
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn save_message(&self, message: &Message) -> Result<(), TurnError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn messages(&self, chat_id: Uuid) -> Result<Vec<Message>, TurnError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn delete_chat(&self, id: Uuid) -> Result<bool, TurnError> {
        let mut chats = self.chats.lock().unwrap();
        let before = chats.len();
        chats.retain(|c| c.id != id);
        let removed = chats.len() < before;
        if removed {
            self.messages.lock().unwrap().retain(|m| m.chat_id != id);
        }
        Ok(removed)
    }
}

/// Scripted model: emits fixed text deltas, then Done.
struct FakeModel {
    deltas: Vec<&'static str>,
    title_calls: AtomicUsize,
}

impl FakeModel {
    fn saying(deltas: Vec<&'static str>) -> Self {
        Self {
            deltas,
            title_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn stream_chat(&self, _request: ChatRequest) -> Result<ModelStream, TurnError> {
        let events: Vec<Result<ModelEvent, TurnError>> = self
            .deltas
            .iter()
            .map(|d| Ok(ModelEvent::TextDelta(d.to_string())))
            .chain(std::iter::once(Ok(ModelEvent::Done)))
            .collect();
        Ok(stream::iter(events).boxed())
    }

    async fn complete(
        &self,
        _model: &str,
        _system: &str,
        _prompt: &str,
    ) -> Result<String, TurnError> {
        Ok("completion".to_string())
    }

    async fn generate_title(&self, _user_text: &str) -> Result<String, TurnError> {
        self.title_calls.fetch_add(1, Ordering::SeqCst);
        Ok("Scripted title".to_string())
    }
}

/// Scripted model that answers each invocation with the next event batch,
/// falling back to a repeating batch once the script runs out.
struct ToolCallingModel {
    script: Mutex<VecDeque<Vec<ModelEvent>>>,
    repeat: Vec<ModelEvent>,
    invocations: AtomicUsize,
}

impl ToolCallingModel {
    fn new(script: Vec<Vec<ModelEvent>>, repeat: Vec<ModelEvent>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat,
            invocations: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for ToolCallingModel {
    async fn stream_chat(&self, _request: ChatRequest) -> Result<ModelStream, TurnError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let events = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.repeat.clone());
        Ok(stream::iter(events.into_iter().map(Ok).collect::<Vec<_>>()).boxed())
    }

    async fn complete(
        &self,
        _model: &str,
        _system: &str,
        _prompt: &str,
    ) -> Result<String, TurnError> {
        Ok("completion".to_string())
    }

    async fn generate_title(&self, _user_text: &str) -> Result<String, TurnError> {
        Ok("Scripted title".to_string())
    }
}

fn web_search_call(id: &str) -> ModelEvent {
    ModelEvent::ToolCalls(vec![ToolCall {
        id: id.to_string(),
        name: "webSearch".to_string(),
        arguments: serde_json::json!({ "query": "rust" }),
    }])
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn test_config() -> Config {
    Config {
        port: 0,
        database_url: String::new(),
        search_api_key: None,
        search_engine_id: None,
        search_quota: 100,
        search_window: Duration::from_secs(60),
        llm_base_url: String::new(),
        llm_api_key: None,
        llm_model: "fake-model".to_string(),
        llm_reasoning_model: "fake-reasoning".to_string(),
        llm_title_model: "fake-title".to_string(),
    }
}

struct Harness {
    store: Arc<FakeStore>,
    model: Arc<FakeModel>,
    engine: Arc<TurnEngine>,
    error_log: Arc<SearchErrorLog>,
}

fn build_engine(
    model: Arc<dyn LanguageModel>,
) -> (Arc<FakeStore>, Arc<TurnEngine>, Arc<SearchErrorLog>) {
    let config = Arc::new(test_config());
    let store = Arc::new(FakeStore::default());
    let http = reqwest::Client::new();

    let error_log = Arc::new(SearchErrorLog::new());
    let search = Arc::new(WebSearch::new(&config, http.clone(), Arc::clone(&error_log)));
    let artifacts = Arc::new(Artifacts::new(Arc::clone(&model), "fake-title".to_string()));
    let tools = Arc::new(ToolRegistry::new(Arc::clone(&search), artifacts, http));

    let engine = Arc::new(TurnEngine::new(
        store.clone(),
        model,
        search,
        tools,
        Arc::new(TracingObserver),
        config,
    ));

    (store, engine, error_log)
}

fn harness(deltas: Vec<&'static str>) -> Harness {
    let model = Arc::new(FakeModel::saying(deltas));
    let (store, engine, error_log) = build_engine(model.clone());
    Harness {
        store,
        model,
        engine,
        error_log,
    }
}

fn turn_request(chat_id: Uuid, text: &str) -> ChatTurnRequest {
    ChatTurnRequest {
        id: chat_id,
        messages: vec![TurnMessage {
            id: Uuid::new_v4(),
            role: Role::User,
            parts: vec![MessagePart::Text {
                text: text.to_string(),
            }],
            attachments: vec![],
        }],
        selected_chat_model: DEFAULT_CHAT_MODEL.to_string(),
    }
}

/// Prepare and stream one turn, draining all events until the channel
/// closes.
async fn run_turn(
    engine: &Arc<TurnEngine>,
    user_id: Option<&str>,
    request: ChatTurnRequest,
) -> Result<Vec<StreamEvent>, TurnError> {
    let turn = engine.prepare(user_id, request).await?;

    let (tx, mut rx) = mpsc::channel(64);
    let engine = Arc::clone(engine);
    let worker = tokio::spawn(async move { engine.stream(turn, tx).await });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    worker.await.unwrap();
    Ok(events)
}

fn streamed_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unauthorized_turn_performs_no_writes() {
    let h = harness(vec!["Hi there"]);
    let result = h.engine.prepare(None, turn_request(Uuid::new_v4(), "hello")).await;

    assert!(matches!(result, Err(TurnError::Unauthorized)));
    assert_eq!(h.store.chat_count(), 0);
    assert_eq!(h.store.message_count(), 0);
}

#[tokio::test]
async fn turn_without_user_message_is_rejected() {
    let h = harness(vec![]);
    let mut request = turn_request(Uuid::new_v4(), "hello");
    request.messages[0].role = Role::Assistant;

    let result = h.engine.prepare(Some("user-a"), request).await;
    assert!(matches!(result, Err(TurnError::NoUserMessage)));
    assert_eq!(h.store.message_count(), 0);
}

#[tokio::test]
async fn first_turn_creates_the_chat_with_a_generated_title() {
    let h = harness(vec!["Hi there"]);
    let chat_id = Uuid::new_v4();

    run_turn(&h.engine, Some("user-a"), turn_request(chat_id, "hello"))
        .await
        .unwrap();

    assert_eq!(h.store.chat_count(), 1);
    assert_eq!(h.model.title_calls.load(Ordering::SeqCst), 1);
    let chat = h.store.chat(chat_id).await.unwrap().unwrap();
    assert_eq!(chat.title, "Scripted title");
    assert_eq!(chat.user_id, "user-a");
}

#[tokio::test]
async fn second_turn_reuses_the_chat_without_retitling() {
    let h = harness(vec!["Hi there"]);
    let chat_id = Uuid::new_v4();

    run_turn(&h.engine, Some("user-a"), turn_request(chat_id, "hello"))
        .await
        .unwrap();
    run_turn(&h.engine, Some("user-a"), turn_request(chat_id, "and again"))
        .await
        .unwrap();

    assert_eq!(h.store.chat_count(), 1);
    assert_eq!(h.model.title_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn turn_against_another_users_chat_is_rejected_before_any_write() {
    let h = harness(vec!["Hi there"]);
    let chat_id = Uuid::new_v4();
    h.store
        .create_chat(&Chat {
            id: chat_id,
            user_id: "user-a".to_string(),
            title: "Theirs".to_string(),
            visibility: shared_types::ChatVisibility::Private,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let result = h
        .engine
        .prepare(Some("user-b"), turn_request(chat_id, "hello"))
        .await;
    assert!(matches!(result, Err(TurnError::Unauthorized)));
    assert_eq!(h.store.message_count(), 0);
}

#[tokio::test]
async fn completed_turn_persists_user_then_assistant_and_streams_text() {
    let h = harness(vec!["Hi ", "there"]);
    let chat_id = Uuid::new_v4();

    let events = run_turn(&h.engine, Some("user-a"), turn_request(chat_id, "hello"))
        .await
        .unwrap();

    assert_eq!(streamed_text(&events), "Hi there");
    assert!(matches!(events.last(), Some(StreamEvent::Finish)));

    let saved = h.store.saved_messages();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].role, Role::User);
    assert_eq!(saved[0].parts[0].as_text(), Some("hello"));
    assert_eq!(saved[1].role, Role::Assistant);
    assert_eq!(saved[1].parts[0].as_text(), Some("Hi there"));
    assert_eq!(saved[0].chat_id, chat_id);
    assert_eq!(saved[1].chat_id, chat_id);
}

#[tokio::test]
async fn search_trigger_is_stripped_and_surfaced_as_a_tool_round_trip() {
    let h = harness(vec!["Summarized."]);
    let chat_id = Uuid::new_v4();

    let events = run_turn(&h.engine, Some("user-a"), turn_request(chat_id, "/web rust news"))
        .await
        .unwrap();

    // Unconfigured credentials degrade to synthetic results; the round
    // trip is still announced on the stream.
    let call = events.iter().find_map(|e| match e {
        StreamEvent::ToolCall { tool_name, args } => Some((tool_name.clone(), args.clone())),
        _ => None,
    });
    let (tool_name, args) = call.expect("search turn must announce a tool call");
    assert_eq!(tool_name, "webSearch");
    assert_eq!(args["query"], "rust news");
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::ToolResult { .. })));

    // The persisted user message carries the bare query, not the trigger.
    let saved = h.store.saved_messages();
    assert_eq!(saved[0].parts[0].as_text(), Some("rust news"));
}

#[tokio::test]
async fn delete_chat_enforces_ownership() {
    let h = harness(vec!["Hi there"]);
    let chat_id = Uuid::new_v4();
    run_turn(&h.engine, Some("user-a"), turn_request(chat_id, "hello"))
        .await
        .unwrap();

    assert!(matches!(
        h.engine.delete_chat(None, chat_id).await,
        Err(TurnError::Unauthorized)
    ));
    assert!(matches!(
        h.engine.delete_chat(Some("user-b"), chat_id).await,
        Err(TurnError::Unauthorized)
    ));
    assert!(matches!(
        h.engine.delete_chat(Some("user-a"), Uuid::new_v4()).await,
        Err(TurnError::NotFound)
    ));

    h.engine.delete_chat(Some("user-a"), chat_id).await.unwrap();
    assert_eq!(h.store.chat_count(), 0);
    assert_eq!(h.store.message_count(), 0);
}

#[tokio::test]
async fn abandoned_client_stops_the_turn_without_an_assistant_row() {
    let h = harness(vec!["Hi ", "there ", "this ", "is ", "long "]);
    let chat_id = Uuid::new_v4();
    let turn = h
        .engine
        .prepare(Some("user-a"), turn_request(chat_id, "hello"))
        .await
        .unwrap();

    // Capacity 1 and an immediately dropped receiver: the first send that
    // observes the closed channel aborts the turn.
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    h.engine.stream(turn, tx).await;

    let saved = h.store.saved_messages();
    assert_eq!(saved.len(), 1, "only the user message survives");
    assert_eq!(saved[0].role, Role::User);
}

#[tokio::test]
async fn search_quota_is_not_spent_on_a_rejected_caller() {
    let h = harness(vec!["Hi there"]);
    let chat_id = Uuid::new_v4();
    h.store
        .create_chat(&Chat {
            id: chat_id,
            user_id: "user-a".to_string(),
            title: "Theirs".to_string(),
            visibility: shared_types::ChatVisibility::Private,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let result = h
        .engine
        .prepare(Some("user-b"), turn_request(chat_id, "/web secret query"))
        .await;

    assert!(matches!(result, Err(TurnError::Unauthorized)));
    // Unconfigured credentials make every executed search leave a log
    // entry, so an empty log proves the search pipeline never ran.
    assert!(h.error_log.is_empty());
    assert_eq!(h.store.message_count(), 0);
}

#[tokio::test]
async fn tool_call_round_trip_is_executed_and_persisted() {
    let model = Arc::new(ToolCallingModel::new(
        vec![
            vec![web_search_call("call_1"), ModelEvent::Done],
            vec![
                ModelEvent::TextDelta("Here is what I found.".to_string()),
                ModelEvent::Done,
            ],
        ],
        vec![ModelEvent::Done],
    ));
    let (store, engine, _) = build_engine(model.clone());
    let chat_id = Uuid::new_v4();

    let events = run_turn(&engine, Some("user-a"), turn_request(chat_id, "look this up"))
        .await
        .unwrap();

    assert_eq!(model.invocations.load(Ordering::SeqCst), 2);
    assert!(events.iter().any(
        |e| matches!(e, StreamEvent::ToolCall { tool_name, .. } if tool_name == "webSearch")
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::ToolResult { .. })));
    assert_eq!(streamed_text(&events), "Here is what I found.");

    let saved = store.saved_messages();
    assert_eq!(saved.len(), 2);
    let assistant = &saved[1];
    match &assistant.parts[0] {
        MessagePart::ToolInvocation {
            tool_name, result, ..
        } => {
            assert_eq!(tool_name, "webSearch");
            assert!(result.is_some());
        }
        other => panic!("expected a tool invocation part, got {other:?}"),
    }
    assert_eq!(
        assistant.parts.last().unwrap().as_text(),
        Some("Here is what I found.")
    );
}

#[tokio::test]
async fn tool_loop_terminates_at_the_step_cap() {
    // The repeating script calls a tool on every invocation; without the
    // cap this turn would never finish.
    let model = Arc::new(ToolCallingModel::new(
        vec![],
        vec![web_search_call("call_n"), ModelEvent::Done],
    ));
    let (store, engine, _) = build_engine(model.clone());

    let events = run_turn(
        &engine,
        Some("user-a"),
        turn_request(Uuid::new_v4(), "loop forever"),
    )
    .await
    .unwrap();

    assert_eq!(model.invocations.load(Ordering::SeqCst), MAX_TOOL_STEPS);
    assert!(matches!(events.last(), Some(StreamEvent::Finish)));
    let announced = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::ToolCall { .. }))
        .count();
    assert_eq!(announced, MAX_TOOL_STEPS);

    // Every executed step is persisted as a tool invocation part.
    let saved = store.saved_messages();
    assert_eq!(saved[1].parts.len(), MAX_TOOL_STEPS);
    assert!(saved[1]
        .parts
        .iter()
        .all(|p| matches!(p, MessagePart::ToolInvocation { .. })));
}
