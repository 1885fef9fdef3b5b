//! Shared test helpers.

use std::sync::Arc;

use crate::auth::{redeem_token, sign_up, SignUp};
use crate::config::{AuthConfig, Config, MailConfig, NodeConfig, StorageConfig, UploadConfig};
use crate::context::{Caller, RequestContext};
use crate::mail::{Mailer, MemoryMailer};
use crate::object_store::{LocalStore, ObjectStore, UrlSigner};
use crate::storage::Database;
use crate::AppState;

pub const TEST_PUBLIC_URL: &str = "http://drive.test";

pub fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    let data_dir = temp_dir.path().join("data");
    let files_dir = temp_dir.path().join("files");

    Config {
        auth: AuthConfig::default(),
        mail: MailConfig::default(),
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            local_storage_path: files_dir.to_string_lossy().to_string(),
            public_url: TEST_PUBLIC_URL.to_string(),
            local_signing_secret: Some("test-secret".to_string()),
            ..StorageConfig::default()
        },
        uploads: UploadConfig {
            max_upload_size: 1024 * 1024, // 1MB for tests
            ..UploadConfig::default()
        },
        test_mode: true,
    }
}

/// Create a test AppState with a temporary database, local object store and
/// a mailer whose outbox can be read back.
pub fn test_state(temp_dir: &tempfile::TempDir) -> (Arc<AppState>, Arc<MemoryMailer>) {
    let mailer = Arc::new(MemoryMailer::new());
    let state = test_state_with_mailer(temp_dir, mailer.clone());
    (state, mailer)
}

pub fn test_state_with_mailer(
    temp_dir: &tempfile::TempDir,
    mailer: Arc<dyn Mailer>,
) -> Arc<AppState> {
    let config = test_config(temp_dir);
    let signer = test_signer(&config);
    let object_store = LocalStore::new(
        &config.storage.local_storage_path,
        &config.storage.bucket,
        signer.clone(),
    )
    .expect("Failed to create test object store");

    build_state(config, Arc::new(object_store), mailer, Some(signer))
}

/// A test AppState backed by the given object store instead of the local one.
pub fn test_state_with_store(
    temp_dir: &tempfile::TempDir,
    object_store: Arc<dyn ObjectStore>,
) -> (Arc<AppState>, Arc<MemoryMailer>) {
    let mailer = Arc::new(MemoryMailer::new());
    let state = build_state(test_config(temp_dir), object_store, mailer.clone(), None);
    (state, mailer)
}

fn test_signer(config: &Config) -> UrlSigner {
    let secret = config.storage.local_signing_secret.as_deref().unwrap_or("");
    UrlSigner::new(secret.as_bytes(), &config.storage.public_url)
}

fn build_state(
    config: Config,
    object_store: Arc<dyn ObjectStore>,
    mailer: Arc<dyn Mailer>,
    url_signer: Option<UrlSigner>,
) -> Arc<AppState> {
    let db = Database::open(&config.node.data_dir).expect("Failed to open test database");

    Arc::new(AppState {
        config,
        db,
        object_store,
        mailer,
        url_signer,
        uploads_in_flight: Default::default(),
    })
}

pub fn sign_up_request(email: &str, organisation: &str) -> SignUp {
    SignUp {
        email: email.to_string(),
        first_name: "A".to_string(),
        last_name: "B".to_string(),
        organisation: organisation.to_string(),
    }
}

/// Sign up a new organisation owner and return an authenticated context for them.
pub async fn sign_in(
    state: &AppState,
    mailer: &MemoryMailer,
    email: &str,
    organisation: &str,
) -> RequestContext {
    sign_up(state, &sign_up_request(email, organisation))
        .await
        .expect("sign up failed");
    let token = mailer
        .last_token_for(email)
        .expect("no one-time token was sent");
    let signed_in = redeem_token(state, &token)
        .await
        .expect("token redemption failed");

    let user = state
        .db
        .find_user_by_id(&signed_in.user.id)
        .unwrap()
        .unwrap();
    RequestContext::authenticated(Caller::from(&user), signed_in.token)
}
