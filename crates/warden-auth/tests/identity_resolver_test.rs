//! Integration tests for identity resolution and token issuing.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use warden_auth::token::{self, TokenSources};
use warden_auth::{AuthConfig, AuthError, IdentityResolver, IssueToken, TokenService};
use warden_core::ids::ClusterId;
use warden_core::models::api_client::CreateApiClient;
use warden_core::models::user::{CreateUser, User};
use warden_core::repository::{ApiClientRepository, AuthorizationRepository, UserRepository};
use warden_db::repository::{
    SurrealApiClientRepository, SurrealAuthorizationRepository, SurrealGraphStore,
    SurrealUserRepository,
};

type Resolver = IdentityResolver<
    SurrealUserRepository<Db>,
    SurrealApiClientRepository<Db>,
    SurrealAuthorizationRepository<Db>,
>;

struct Fixture {
    users: SurrealUserRepository<Db>,
    clients: SurrealApiClientRepository<Db>,
    authorizations: SurrealAuthorizationRepository<Db>,
    tokens: TokenService<SurrealAuthorizationRepository<Db>>,
    resolver: Resolver,
    alice: User,
}

fn config() -> AuthConfig {
    AuthConfig {
        cluster: ClusterId::new("zzzzz").unwrap(),
        system_root_token: Some("systemroottoken".into()),
        ..AuthConfig::default()
    }
}

async fn setup_with(config: AuthConfig) -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    warden_db::run_migrations(&db).await.unwrap();

    let graph = SurrealGraphStore::new(db.clone(), config.cluster.clone());
    let users = SurrealUserRepository::new(graph);
    users.ensure_system_user().await.unwrap();
    let alice = users.create(CreateUser::active("alice@example.com")).await.unwrap();

    let clients = SurrealApiClientRepository::new(db.clone(), config.cluster.clone());
    let authorizations = SurrealAuthorizationRepository::new(db, config.cluster.clone());
    let tokens = TokenService::new(authorizations.clone(), config.clone());
    let resolver = IdentityResolver::new(
        users.clone(),
        clients.clone(),
        authorizations.clone(),
        config,
    );

    Fixture {
        users,
        clients,
        authorizations,
        tokens,
        resolver,
        alice,
    }
}

async fn setup() -> Fixture {
    setup_with(config()).await
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

impl Fixture {
    async fn issue(&self, expires_at: Option<DateTime<Utc>>) -> warden_auth::IssuedToken {
        self.tokens
            .issue(
                IssueToken {
                    user_uuid: self.alice.uuid.clone(),
                    expires_at,
                    ..IssueToken::default()
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn valid_token_resolves_to_its_user() {
    let f = setup().await;
    let issued = f.issue(None).await;

    let identity = f.resolver.resolve(&issued.token, Utc::now(), None).await.unwrap();
    assert_eq!(identity.user.uuid, f.alice.uuid);
    assert_eq!(identity.authorization.uuid, issued.authorization.uuid);
    assert!(identity.api_client.is_none());
    assert!(!identity.trusted);

    // The bare secret is accepted as a V1 token too.
    let identity = f.resolver.resolve(&issued.secret, Utc::now(), None).await.unwrap();
    assert_eq!(identity.user.uuid, f.alice.uuid);
}

#[tokio::test]
async fn expired_token_is_unauthenticated() {
    let f = setup().await;
    let issued = f.issue(Some(at(2024, 1, 1))).await;

    let before = f.resolver.resolve(&issued.token, at(2023, 12, 31), None).await;
    assert!(before.is_ok());

    let after = f.resolver.resolve(&issued.token, at(2024, 1, 2), None).await;
    assert!(matches!(after, Err(AuthError::Unauthenticated)));

    // Expiry is exclusive.
    let exact = f.resolver.resolve(&issued.token, at(2024, 1, 1), None).await;
    assert!(matches!(exact, Err(AuthError::Unauthenticated)));
}

#[tokio::test]
async fn unknown_and_malformed_tokens_are_unauthenticated() {
    let f = setup().await;
    let issued = f.issue(None).await;

    for bad in [
        "nosuchtoken".to_string(),
        "not a token".to_string(),
        String::new(),
        format!("v2/{}/wrongsecret", issued.authorization.uuid),
        format!("v2/zzzzz-gj3su-000000000000009/{}", issued.secret),
        issued.secret.to_uppercase(),
    ] {
        let result = f.resolver.resolve(&bad, Utc::now(), None).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)), "{bad:?}");
    }
}

#[tokio::test]
async fn orphaned_token_is_unauthenticated() {
    let f = setup().await;
    let secret = token::generate_secret();
    f.authorizations
        .create(warden_core::models::authorization::CreateAuthorization {
            uuid: None,
            user_uuid: "zzzzz-tpzed-nosuchuser00000".into(),
            api_client_uuid: None,
            token_hash: token::hash_token(&secret),
            scopes: vec!["all".into()],
            expires_at: None,
            default_owner_uuid: None,
            created_by_ip_address: None,
        })
        .await
        .unwrap();

    let result = f.resolver.resolve(&secret, Utc::now(), None).await;
    assert!(matches!(result, Err(AuthError::Unauthenticated)));
}

#[tokio::test]
async fn trusted_client_is_reported() {
    let f = setup().await;
    let client = f
        .clients
        .create(CreateApiClient {
            uuid: None,
            name: "workbench".into(),
            url_prefix: "https://workbench.example.com/".into(),
            is_trusted: true,
        })
        .await
        .unwrap();
    assert!(client.uuid.starts_with("zzzzz-ozdt8-"));

    let issued = f
        .tokens
        .issue(
            IssueToken {
                user_uuid: f.alice.uuid.clone(),
                api_client_uuid: Some(client.uuid.clone()),
                ..IssueToken::default()
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let identity = f.resolver.resolve(&issued.token, Utc::now(), None).await.unwrap();
    assert!(identity.trusted);
    assert_eq!(identity.api_client.unwrap().uuid, client.uuid);
}

#[tokio::test]
async fn system_root_token_resolves_to_system_user() {
    let f = setup().await;
    let identity = f
        .resolver
        .resolve("systemroottoken", Utc::now(), None)
        .await
        .unwrap();
    assert_eq!(identity.user.uuid, "zzzzz-tpzed-000000000000000");
    assert!(identity.user.is_admin);
    assert!(identity.trusted);

    for near_miss in ["systemroottoke", "systemroottokenx", "Systemroottoken"] {
        let result = f.resolver.resolve(near_miss, Utc::now(), None).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)), "{near_miss}");
    }

    // The header scan skips an empty first OAuth2 value.
    let ctx = f
        .resolver
        .resolve_context(
            TokenSources {
                authorization: Some("OAuth2 , OAuth2 systemroottoken"),
                ..TokenSources::default()
            },
            Utc::now(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(ctx.user_uuid(), Some("zzzzz-tpzed-000000000000000"));
}

#[tokio::test]
async fn usage_is_recorded_in_the_background() {
    let f = setup().await;
    let issued = f.issue(None).await;
    let now = Utc::now();

    f.resolver
        .resolve(&issued.token, now, Some("10.0.0.7"))
        .await
        .unwrap();

    let mut recorded = None;
    for _ in 0..50 {
        let current = f
            .authorizations
            .get_by_uuid(&issued.authorization.uuid)
            .await
            .unwrap();
        if current.last_used_at.is_some() {
            recorded = Some(current);
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    let recorded = recorded.expect("usage was never recorded");
    assert_eq!(recorded.last_used_by_ip_address.as_deref(), Some("10.0.0.7"));
}

#[tokio::test]
async fn usage_recording_can_be_disabled() {
    let f = setup_with(AuthConfig {
        record_usage: false,
        ..config()
    })
    .await;
    let issued = f.issue(None).await;
    f.resolver.resolve(&issued.token, Utc::now(), None).await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(50)).await;
    let current = f
        .authorizations
        .get_by_uuid(&issued.authorization.uuid)
        .await
        .unwrap();
    assert!(current.last_used_at.is_none());
}

#[tokio::test]
async fn revoked_tokens_stop_resolving_but_remain_stored() {
    let f = setup().await;
    let first = f.issue(None).await;
    let second = f.issue(None).await;
    let now = Utc::now();

    f.tokens.revoke(&first.authorization.uuid, now).await.unwrap();
    let result = f.resolver.resolve(&first.token, now + Duration::seconds(1), None).await;
    assert!(matches!(result, Err(AuthError::Unauthenticated)));
    assert!(
        f.authorizations
            .get_by_uuid(&first.authorization.uuid)
            .await
            .is_ok()
    );
    assert!(f.resolver.resolve(&second.token, now, None).await.is_ok());

    let revoked = f.tokens.revoke_all(&f.alice.uuid, now).await.unwrap();
    assert_eq!(revoked, 1);
    let result = f.resolver.resolve(&second.token, now + Duration::seconds(1), None).await;
    assert!(matches!(result, Err(AuthError::Unauthenticated)));
}

#[tokio::test]
async fn context_falls_back_to_anonymous() {
    let f = setup().await;
    let issued = f.issue(None).await;
    let header = format!("Bearer {}", issued.token);

    let ctx = f
        .resolver
        .resolve_context(
            TokenSources {
                authorization: Some(&header),
                ..TokenSources::default()
            },
            Utc::now(),
            Some("10.0.0.7"),
        )
        .await
        .unwrap();
    assert_eq!(ctx.user_uuid(), Some(f.alice.uuid.as_str()));
    assert_eq!(ctx.remote_addr(), Some("10.0.0.7"));

    let ctx = f
        .resolver
        .resolve_context(
            TokenSources {
                api_token: Some("bogus"),
                ..TokenSources::default()
            },
            Utc::now(),
            None,
        )
        .await
        .unwrap();
    assert!(ctx.is_anonymous());

    let ctx = f
        .resolver
        .resolve_context(TokenSources::default(), Utc::now(), None)
        .await
        .unwrap();
    assert!(ctx.is_anonymous());
}

#[tokio::test]
async fn deactivated_user_still_resolves() {
    let f = setup().await;
    let issued = f.issue(None).await;
    f.users
        .update(
            &f.alice.uuid,
            warden_core::models::user::UpdateUser {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let identity = f.resolver.resolve(&issued.token, Utc::now(), None).await.unwrap();
    assert!(!identity.user.is_active);
}
