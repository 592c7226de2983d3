use std::env;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use collabdoc::config::AppConfig;
use collabdoc::db::{self, PgPool};
use collabdoc::notify::{EventPublisher, Update};
use collabdoc::routes::{self, AGENT_HEADER};
use collabdoc::state::AppState;
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Keeps every update instead of sending it to a hub.
#[derive(Default)]
pub struct FakePublisher {
    updates: StdMutex<Vec<Update>>,
}

impl EventPublisher for FakePublisher {
    fn publish(&self, update: Update) {
        if let Ok(mut guard) = self.updates.lock() {
            guard.push(update);
        }
    }
}

impl FakePublisher {
    #[allow(dead_code)]
    pub fn events(&self) -> Vec<&'static str> {
        self.updates
            .lock()
            .map(|guard| guard.iter().map(|update| update.event).collect())
            .unwrap_or_default()
    }

    #[allow(dead_code)]
    pub fn updates(&self) -> Vec<Update> {
        self.updates
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    publisher: Arc<FakePublisher>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            public_base_url: Some("https://docs.test/".to_string()),
            mercure: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let publisher = Arc::new(FakePublisher::default());
        let publisher_for_state: Arc<dyn EventPublisher> = publisher.clone();
        let state = AppState::new(pool, config, publisher_for_state);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            publisher,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn publisher(&self) -> Arc<FakePublisher> {
        self.publisher.clone()
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        agent: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(agent) = agent {
            builder = builder.header(AGENT_HEADER, agent.to_string());
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        agent: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::POST, path, Some(body), agent).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        agent: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::PATCH, path, Some(body), agent).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        agent: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::PUT, path, Some(body), agent).await
    }

    pub async fn get(&self, path: &str, agent: Option<Uuid>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, None, agent).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, agent: Option<Uuid>) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path, None, agent).await
    }

    /// Decodes a JSON answer after checking its status.
    #[allow(dead_code)]
    pub async fn expect_json(
        &self,
        response: hyper::Response<Body>,
        status: StatusCode,
    ) -> Result<Value> {
        let actual = response.status();
        let body = body_to_vec(response.into_body()).await?;
        anyhow::ensure!(
            actual == status,
            "expected {status}, got {actual}: {}",
            String::from_utf8_lossy(&body)
        );
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Creates a session and joins it as `pseudo`. Returns the session JSON
    /// and the participant id.
    #[allow(dead_code)]
    pub async fn session_with_participant(&self, title: &str, pseudo: &str) -> Result<(Value, Uuid)> {
        let created = self
            .post_json("/api/sessions", &serde_json::json!({ "title": title }), None)
            .await?;
        let session = self.expect_json(created, StatusCode::CREATED).await?;
        let code = session["invite_code"]
            .as_str()
            .context("session without invite code")?
            .to_string();

        let joined = self
            .post_json(
                &format!("/api/sessions/join/{code}"),
                &serde_json::json!({ "pseudo": pseudo }),
                None,
            )
            .await?;
        let joined = self.expect_json(joined, StatusCode::OK).await?;
        let participant_id = uuid_at(&joined, "/participant/id")?;
        Ok((session, participant_id))
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub fn uuid_at(value: &Value, pointer: &str) -> Result<Uuid> {
    let raw = value
        .pointer(pointer)
        .and_then(Value::as_str)
        .with_context(|| format!("missing {pointer} in {value}"))?;
    Ok(Uuid::parse_str(raw)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE votes, decisions, annotations, document_versions, documents, participants, sessions CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
