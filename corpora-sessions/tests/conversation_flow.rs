//! End-to-end conversation scenarios: turns, coreference, locking,
//! cancellation, tombstones, and export.

use corpora_config::ConfigService;
use corpora_core::error::Error;
use corpora_core::identity::UserId;
use corpora_core::traits::metadata_store::MetadataStore;
use corpora_core::types::collection::{Collection, Privacy};
use corpora_core::types::conversation::{
    ConversationSession, MessageKind, SessionSettings, DEFAULT_SESSION_NAME,
};
use corpora_jobs::{Scheduler, SchedulerConfig};
use corpora_providers::mock::{MockCompletionProvider, MockEmbeddingProvider, SlowCompletionProvider};
use corpora_providers::{CompletionProvider, ProviderRegistry};
use corpora_rag::ingest::IngestionConfig;
use corpora_rag::parse::PlainTextParser;
use corpora_rag::pipeline::SearchService;
use corpora_rag::{CollectionService, CreateCollectionRequest, IngestRequest, IngestionService};
use corpora_sessions::export::ExportFormat;
use corpora_sessions::{
    ContextManager, ConversationService, ConversationServiceConfig, TurnRequest,
};
use corpora_storage::{MemoryBlobStore, MemoryMetadataStore, MemoryVectorStore};
use std::sync::Arc;
use std::time::Duration;

struct Stack {
    collections: Arc<CollectionService>,
    ingestion: Arc<IngestionService>,
    conversations: Arc<ConversationService>,
    metadata: Arc<MemoryMetadataStore>,
    scheduler: Arc<Scheduler>,
    /// The scripted mock handed to every service (unless `build` was
    /// given a different completion provider)
    llm: Arc<MockCompletionProvider>,
    owner: UserId,
}

fn build(llm: Arc<dyn CompletionProvider>, mock: Arc<MockCompletionProvider>, lock_timeout: Duration) -> Stack {
    let metadata = Arc::new(MemoryMetadataStore::new());
    let vectors = Arc::new(MemoryVectorStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(Arc::new(MockEmbeddingProvider::new(256)));
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let collections = CollectionService::new(
        metadata.clone(),
        vectors.clone(),
        blobs.clone(),
        providers.clone(),
        scheduler.clone(),
    );
    let ingestion = IngestionService::new(
        metadata.clone(),
        vectors.clone(),
        blobs,
        providers.clone(),
        Arc::new(PlainTextParser::new()),
        scheduler.clone(),
        IngestionConfig::default(),
    );
    let config = Arc::new(ConfigService::new(metadata.clone()));
    let search = Arc::new(SearchService::new(
        metadata.clone(),
        vectors,
        providers.clone(),
        llm.clone(),
        config.clone(),
    ));
    let context = Arc::new(ContextManager::new(
        metadata.clone(),
        providers,
        llm.clone(),
    ));
    let conversations = ConversationService::new(
        metadata.clone(),
        search,
        context,
        llm,
        config,
        &scheduler,
        ConversationServiceConfig {
            lock_timeout,
            ..ConversationServiceConfig::default()
        },
    );
    Stack {
        collections,
        ingestion,
        conversations,
        metadata,
        scheduler,
        llm: mock,
        owner: UserId::new(),
    }
}

fn stack() -> Stack {
    let llm = Arc::new(MockCompletionProvider::new());
    build(llm.clone(), llm, Duration::from_secs(5))
}

async fn seeded_collection(stack: &Stack, body: &str) -> Collection {
    let collection = stack
        .collections
        .create(CreateCollectionRequest {
            owner: stack.owner,
            name: "ai-research".to_string(),
            chunk_size: 48,
            overlap: 4,
            embedding_model: "mock-embed-256".to_string(),
            privacy: Privacy::Private,
        })
        .await
        .unwrap();

    let response = stack
        .ingestion
        .submit(IngestRequest {
            collection_id: collection.id,
            requester: stack.owner,
            filename: "papers.txt".to_string(),
            bytes: body.as_bytes().to_vec(),
            mime_type: None,
        })
        .await
        .unwrap();
    let job = response.job_id.unwrap();
    stack
        .scheduler
        .wait(&job, Duration::from_secs(10))
        .await
        .unwrap();
    collection
}

async fn make_session(stack: &Stack, collection: &Collection) -> ConversationSession {
    stack
        .conversations
        .create_session(stack.owner, collection.id, SessionSettings::default())
        .await
        .unwrap()
}

const CNN_CORPUS: &str = "Convolutional neural networks learn visual features \
through stacked convolution layers. They excel at pattern detection.\u{c}\
Convolutional neural networks power image recognition, medical imaging, \
and autonomous driving applications across the industry.\u{c}\
Recurrent networks handle sequences while transformers rely on attention \
mechanisms for language understanding tasks.";

#[tokio::test]
async fn coreference_turn_rewrites_the_query_with_tracked_entities() {
    let stack = stack();
    let collection = seeded_collection(&stack, CNN_CORPUS).await;
    let session = make_session(&stack, &collection).await;

    stack.llm.push_response(
        "Convolutional neural networks are layered models for visual feature learning.",
    );
    stack.llm.push_response("CNN Basics"); // auto-naming
    let first = stack
        .conversations
        .turn(TurnRequest::new(
            session.id,
            stack.owner,
            "Tell me about convolutional neural networks.",
        ))
        .await
        .unwrap();
    assert_eq!(first.user_message.ordinal, 1);
    assert_eq!(first.assistant_message.ordinal, 2);
    assert_eq!(first.user_message.kind, MessageKind::Question);

    stack.llm.push_response(
        "Convolutional neural networks are applied to image recognition and medical imaging.",
    );
    let second = stack
        .conversations
        .turn(TurnRequest::new(
            session.id,
            stack.owner,
            "What are their main applications?",
        ))
        .await
        .unwrap();

    // the pronoun resolved against the tracker
    assert_eq!(second.user_message.kind, MessageKind::FollowUp);

    // the rewritten query carried the anchor into generation
    let prompts = stack.llm.prompts();
    let generation_prompt = prompts.last().unwrap();
    assert!(
        generation_prompt.contains("convolutional neural networks"),
        "generation prompt missing anchor: {generation_prompt}"
    );

    // ordinals are strictly increasing with no gaps
    let messages = stack.metadata.list_messages(&session.id).await.unwrap();
    let ordinals: Vec<u64> = messages.iter().map(|m| m.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3, 4]);
    stack.scheduler.stop();
}

#[tokio::test]
async fn first_completed_turn_names_the_session() {
    let stack = stack();
    let collection = seeded_collection(&stack, CNN_CORPUS).await;
    let session = make_session(&stack, &collection).await;
    assert_eq!(session.name, DEFAULT_SESSION_NAME);

    stack.llm.push_response("Convolutional neural networks learn visual features.");
    stack.llm.push_response("Convolutional Network Basics");
    stack
        .conversations
        .turn(TurnRequest::new(
            session.id,
            stack.owner,
            "Tell me about convolutional neural networks.",
        ))
        .await
        .unwrap();

    let renamed = stack
        .conversations
        .get_session(&session.id, &stack.owner)
        .await
        .unwrap();
    assert_eq!(renamed.name, "Convolutional Network Basics");
    assert!(renamed.name.split_whitespace().count() <= 6);
    stack.scheduler.stop();
}

#[tokio::test]
async fn cancelled_turn_persists_nothing() {
    let stack = stack();
    let collection = seeded_collection(&stack, CNN_CORPUS).await;
    let session = make_session(&stack, &collection).await;

    let mut request = TurnRequest::new(session.id, stack.owner, "Tell me something.");
    request.cancel.cancel();
    let err = stack.conversations.turn(request).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    assert!(stack
        .metadata
        .list_messages(&session.id)
        .await
        .unwrap()
        .is_empty());
    let unchanged = stack
        .conversations
        .get_session(&session.id, &stack.owner)
        .await
        .unwrap();
    assert_eq!(unchanged.message_count, 0);
    stack.scheduler.stop();
}

#[tokio::test]
async fn contended_session_lock_reports_busy() {
    let slow: Arc<dyn CompletionProvider> =
        Arc::new(SlowCompletionProvider::new(Duration::from_millis(400)));
    let stack = build(
        slow,
        Arc::new(MockCompletionProvider::new()),
        Duration::from_millis(50),
    );
    let collection = seeded_collection(&stack, CNN_CORPUS).await;
    let session = make_session(&stack, &collection).await;

    let first = stack.conversations.turn(TurnRequest::new(
        session.id,
        stack.owner,
        "Tell me about convolutional neural networks.",
    ));
    let second = stack.conversations.turn(TurnRequest::new(
        session.id,
        stack.owner,
        "And another question right away?",
    ));
    let (first, second) = tokio::join!(first, second);

    let busy = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(Error::SessionBusy { .. })))
        .count();
    assert_eq!(busy, 1, "exactly one turn should lose the lock");
    assert_eq!(
        [&first, &second].iter().filter(|r| r.is_ok()).count(),
        1,
        "the other should complete: {first:?} / {second:?}"
    );
    stack.scheduler.stop();
}

#[tokio::test]
async fn deleted_collection_leaves_the_session_readable_but_unsearchable() {
    let stack = stack();
    let collection = seeded_collection(&stack, CNN_CORPUS).await;
    let session = make_session(&stack, &collection).await;

    stack.llm.push_response("Convolutional neural networks learn visual features.");
    stack.llm.push_response("CNN Basics");
    stack
        .conversations
        .turn(TurnRequest::new(
            session.id,
            stack.owner,
            "Tell me about convolutional neural networks.",
        ))
        .await
        .unwrap();

    stack
        .collections
        .delete(&collection.id, &stack.owner)
        .await
        .unwrap();

    // searching fails with the tombstone error
    let err = stack
        .conversations
        .turn(TurnRequest::new(session.id, stack.owner, "More please?"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CollectionDeleted { .. }));

    // but the session's own messages remain readable
    let export = stack
        .conversations
        .export(&session.id, &stack.owner)
        .await
        .unwrap();
    assert_eq!(export.messages.len(), 2);
    stack.scheduler.stop();
}

#[tokio::test]
async fn export_reproduces_the_message_sequence() {
    let stack = stack();
    let collection = seeded_collection(&stack, CNN_CORPUS).await;
    let session = make_session(&stack, &collection).await;

    stack.llm.push_response("Convolutional neural networks learn visual features.");
    stack.llm.push_response("CNN Basics");
    stack
        .conversations
        .turn(TurnRequest::new(
            session.id,
            stack.owner,
            "Tell me about convolutional neural networks.",
        ))
        .await
        .unwrap();
    stack
        .llm
        .push_response("They are used in image recognition and medical imaging.");
    stack
        .conversations
        .turn(TurnRequest::new(
            session.id,
            stack.owner,
            "What are their main applications?",
        ))
        .await
        .unwrap();

    let export = stack
        .conversations
        .export(&session.id, &stack.owner)
        .await
        .unwrap();
    let json = export.render(ExportFormat::Json).unwrap();
    let parsed: corpora_sessions::SessionExport = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.messages.len(), 4);
    assert!(parsed
        .messages
        .windows(2)
        .all(|pair| pair[1].ordinal == pair[0].ordinal + 1));
    // assistant messages carry their source metadata
    assert!(parsed.messages[1].metadata.contains_key("sources"));

    let markdown = export.render(ExportFormat::Markdown).unwrap();
    assert!(markdown.contains("## User (1)"));
    stack.scheduler.stop();
}

#[tokio::test]
async fn archived_sessions_reject_turns_until_restored() {
    let stack = stack();
    let collection = seeded_collection(&stack, CNN_CORPUS).await;
    let session = make_session(&stack, &collection).await;

    stack
        .conversations
        .archive_session(&session.id, &stack.owner)
        .await
        .unwrap();
    let err = stack
        .conversations
        .turn(TurnRequest::new(session.id, stack.owner, "Hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));

    stack
        .conversations
        .restore_session(&session.id, &stack.owner)
        .await
        .unwrap();
    stack.llm.push_response("Convolutional neural networks learn visual features.");
    stack.llm.push_response("CNN Basics");
    stack
        .conversations
        .turn(TurnRequest::new(
            session.id,
            stack.owner,
            "Tell me about convolutional neural networks.",
        ))
        .await
        .unwrap();
    stack.scheduler.stop();
}
