//! Sign-up and login against the in-process event stream.

use auth::{
    AuthConfig, AuthError, AuthService, HashCost, InMemoryStorage, NewUser, Storage, UserProfile,
};
use event_messages::UserEvent;
use event_streamer::{Cluster, Envelope, EventStream, MemoryBroker, StreamConfig};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const CHEAP: HashCost = HashCost {
    memory_kib: 8,
    iterations: 1,
    parallelism: 1,
};

fn stream(broker: &MemoryBroker) -> EventStream<UserEvent> {
    let config = StreamConfig::new("memory", "user-events", "search-ingestor-group")
        .with_poll_interval(Duration::from_millis(50));
    EventStream::connect(&Cluster::Memory(broker.clone()), config).unwrap()
}

fn service(stream: &EventStream<UserEvent>, storage: Arc<InMemoryStorage>) -> AuthService {
    let config = AuthConfig::new("jwt_secret").with_hash_cost(CHEAP);
    AuthService::new(&config, storage, stream.publisher()).unwrap()
}

async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    true
}

#[tokio::test]
async fn test_sign_up_then_login() -> anyhow::Result<()> {
    let broker = MemoryBroker::new();
    let stream = stream(&broker);
    let storage = Arc::new(InMemoryStorage::new());
    let service = service(&stream, storage.clone());

    let user = service
        .sign_up(NewUser::new("ada@example.com", "ada", "correct horse"))
        .await?;
    assert_ne!(user.id, 0);
    assert_ne!(user.password_hash, "correct horse");
    assert_eq!(storage.find_user("ada").await?, user);

    let token = service.login("ada", "correct horse").await?;
    let claims = service.verify_token(&token)?;
    assert_eq!(claims.sub, user.id.to_string());
    Ok(())
}

#[tokio::test]
async fn test_login_errors_are_distinct() -> anyhow::Result<()> {
    let broker = MemoryBroker::new();
    let stream = stream(&broker);
    let service = service(&stream, Arc::new(InMemoryStorage::new()));
    service
        .sign_up(NewUser::new("ada@example.com", "ada", "correct horse"))
        .await?;

    let wrong = service.login("ada", "battery staple").await.unwrap_err();
    assert!(matches!(wrong, AuthError::WrongPassword));

    let unknown = service.login("grace", "correct horse").await.unwrap_err();
    assert!(matches!(unknown, AuthError::UserNotFound(ref name) if name == "grace"));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_username_is_rejected() -> anyhow::Result<()> {
    let broker = MemoryBroker::new();
    let stream = stream(&broker);
    let service = service(&stream, Arc::new(InMemoryStorage::new()));
    service
        .sign_up(NewUser::new("ada@example.com", "ada", "pw"))
        .await?;

    let err = service
        .sign_up(NewUser::new("other@example.com", "ada", "pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UsernameTaken(_)));
    Ok(())
}

#[tokio::test]
async fn test_sign_up_publishes_user_event() -> anyhow::Result<()> {
    let broker = MemoryBroker::new();
    let stream = stream(&broker);
    let service = service(&stream, Arc::new(InMemoryStorage::new()));

    let seen: Arc<Mutex<Vec<Envelope<UserEvent>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = stream
        .register_handler(move |envelope| {
            sink.lock().unwrap().push(envelope);
            std::future::ready(anyhow::Ok(()))
        })
        .start_consuming(CancellationToken::new())?;

    let user = service
        .sign_up(NewUser::new("ada@example.com", "ada", "correct horse"))
        .await?;

    assert!(wait_until(|| seen.lock().unwrap().len() == 1).await);
    let envelope = seen.lock().unwrap()[0].clone();
    assert_eq!(envelope.subject_id(), user.id);

    let profile: UserProfile = envelope.event().payload.to_json()?;
    assert_eq!(profile, user.profile());
    let raw = String::from_utf8(envelope.event().payload.as_bytes().to_vec())?;
    assert!(!raw.contains("argon2"));

    handle.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_sign_up_reports_unpublished_event() -> anyhow::Result<()> {
    let broker = MemoryBroker::new();
    let config = StreamConfig::new("memory", "user-events", "search-ingestor-group")
        .with_max_attempts(2)
        .with_initial_backoff(Duration::from_millis(1));
    let stream: EventStream<UserEvent> =
        EventStream::connect(&Cluster::Memory(broker.clone()), config)?;
    let storage = Arc::new(InMemoryStorage::new());
    let service = service(&stream, storage.clone());

    broker.set_available(false);
    let err = service
        .sign_up(NewUser::new("ada@example.com", "ada", "pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Publish(_)));
    assert!(storage.find_user("ada").await.is_ok());
    Ok(())
}
