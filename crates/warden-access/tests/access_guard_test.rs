//! Write authorization tests, driven through resolved request contexts.

use chrono::Utc;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use warden_access::{AccessConfig, AccessEngine, AccessGuard};
use warden_auth::token::TokenSources;
use warden_auth::{AuthConfig, IdentityResolver, IssueToken, TokenService};
use warden_core::RequestContext;
use warden_core::error::WardenError;
use warden_core::ids::ClusterId;
use warden_core::models::api_client::CreateApiClient;
use warden_core::models::link::{CreateLink, CreateMembership};
use warden_core::models::permission::PermissionLevel;
use warden_core::models::resource::{CreateResource, GroupClass, ResourceKind, TrashUpdate};
use warden_core::models::user::{CreateUser, UpdateUser, User};
use warden_core::repository::{ApiClientRepository, GraphStore, UserRepository};
use warden_db::repository::{
    SurrealApiClientRepository, SurrealAuthorizationRepository, SurrealGraphStore,
    SurrealUserRepository,
};

type Engine = AccessEngine<SurrealGraphStore<Db>, SurrealUserRepository<Db>>;
type Resolver = IdentityResolver<
    SurrealUserRepository<Db>,
    SurrealApiClientRepository<Db>,
    SurrealAuthorizationRepository<Db>,
>;

struct Fixture {
    graph: SurrealGraphStore<Db>,
    users: SurrealUserRepository<Db>,
    engine: Engine,
    tokens: TokenService<SurrealAuthorizationRepository<Db>>,
    clients: SurrealApiClientRepository<Db>,
    resolver: Resolver,
    root: User,
}

async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    warden_db::run_migrations(&db).await.unwrap();

    let cluster = ClusterId::new("zzzzz").unwrap();
    let config = AuthConfig {
        cluster: cluster.clone(),
        record_usage: false,
        ..AuthConfig::default()
    };

    let graph = SurrealGraphStore::new(db.clone(), cluster.clone());
    let users = SurrealUserRepository::new(graph.clone());
    let root = users.ensure_system_user().await.unwrap();
    let clients = SurrealApiClientRepository::new(db.clone(), cluster.clone());
    let authorizations = SurrealAuthorizationRepository::new(db, cluster);

    Fixture {
        engine: AccessEngine::new(graph.clone(), users.clone(), AccessConfig::default()),
        tokens: TokenService::new(authorizations.clone(), config.clone()),
        resolver: IdentityResolver::new(users.clone(), clients.clone(), authorizations, config),
        clients,
        graph,
        users,
        root,
    }
}

impl Fixture {
    fn guard(&self) -> AccessGuard<'_, SurrealGraphStore<Db>, SurrealUserRepository<Db>> {
        AccessGuard::new(&self.engine)
    }

    async fn user(&self, email: &str) -> User {
        self.users.create(CreateUser::active(email)).await.unwrap()
    }

    /// Context of a request presenting a fresh token for `user`.
    async fn login(&self, user: &User, default_owner: Option<&str>) -> RequestContext {
        self.login_with(IssueToken {
            user_uuid: user.uuid.clone(),
            default_owner_uuid: default_owner.map(str::to_string),
            ..IssueToken::default()
        })
        .await
    }

    async fn login_with(&self, request: IssueToken) -> RequestContext {
        let user_uuid = request.user_uuid.clone();
        let issued = self.tokens.issue(request, Utc::now()).await.unwrap();
        let header = format!("Bearer {}", issued.token);
        let ctx = self
            .resolver
            .resolve_context(
                TokenSources {
                    authorization: Some(&header),
                    ..TokenSources::default()
                },
                Utc::now(),
                Some("10.0.0.1"),
            )
            .await
            .unwrap();
        assert_eq!(ctx.user_uuid(), Some(user_uuid.as_str()));
        ctx
    }
}

fn is_not_found(err: &WardenError) -> bool {
    matches!(err, WardenError::NotFound { .. })
}

#[tokio::test]
async fn create_defaults_owner_to_the_user() {
    let f = setup().await;
    let u1 = f.user("u1@example.com").await;
    let ctx = f.login(&u1, None).await;

    let project = f
        .guard()
        .create_resource(&ctx, CreateResource::project("home"))
        .await
        .unwrap();
    assert_eq!(project.owner_uuid, u1.uuid);
}

#[tokio::test]
async fn create_uses_the_token_default_owner() {
    let f = setup().await;
    let u1 = f.user("u1@example.com").await;
    let home = f
        .graph
        .create_resource(CreateResource::project("home").owned_by(&u1.uuid))
        .await
        .unwrap();
    let ctx = f.login(&u1, Some(&home.uuid)).await;

    let c1 = f
        .guard()
        .create_resource(&ctx, CreateResource::new(ResourceKind::Collection, "c1"))
        .await
        .unwrap();
    assert_eq!(c1.owner_uuid, home.uuid);
}

#[tokio::test]
async fn create_needs_write_on_the_owner() {
    let f = setup().await;
    let u1 = f.user("u1@example.com").await;
    let u2 = f.user("u2@example.com").await;
    let g1 = f
        .graph
        .create_resource(CreateResource::project("g1").owned_by(&u1.uuid))
        .await
        .unwrap();
    f.graph
        .create_link(CreateLink::permission(
            &f.root.uuid,
            &u2.uuid,
            &g1.uuid,
            PermissionLevel::Read,
        ))
        .await
        .unwrap();
    let ctx = f.login(&u2, None).await;

    let err = f
        .guard()
        .create_resource(
            &ctx,
            CreateResource::new(ResourceKind::Collection, "c1").owned_by(&g1.uuid),
        )
        .await
        .unwrap_err();
    assert!(is_not_found(&err), "{err:?}");

    f.graph
        .create_link(CreateLink::permission(
            &f.root.uuid,
            &u2.uuid,
            &g1.uuid,
            PermissionLevel::Write,
        ))
        .await
        .unwrap();
    let c1 = f
        .guard()
        .create_resource(
            &ctx,
            CreateResource::new(ResourceKind::Collection, "c1").owned_by(&g1.uuid),
        )
        .await
        .unwrap();
    assert_eq!(c1.owner_uuid, g1.uuid);
}

#[tokio::test]
async fn anonymous_and_inactive_users_cannot_create() {
    let f = setup().await;
    let anonymous = RequestContext::anonymous(None, Utc::now());
    let err = f
        .guard()
        .create_resource(&anonymous, CreateResource::project("p"))
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::Unauthenticated));

    let u1 = f.user("u1@example.com").await;
    f.users
        .update(
            &u1.uuid,
            UpdateUser {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // Inactive users still resolve; they just cannot write.
    let ctx = f.login(&u1, None).await;
    let err = f
        .guard()
        .create_resource(&ctx, CreateResource::project("p"))
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::Forbidden { .. }));
}

#[tokio::test]
async fn token_scopes_limit_writes() {
    let f = setup().await;
    let u1 = f.user("u1@example.com").await;
    let home = f.login(&u1, None).await;
    let project = f
        .guard()
        .create_resource(&home, CreateResource::project("home"))
        .await
        .unwrap();

    let read_only = f
        .login_with(IssueToken {
            user_uuid: u1.uuid.clone(),
            scopes: Some(vec!["GET /arvados/v1/users/current".into()]),
            ..IssueToken::default()
        })
        .await;
    let err = f
        .guard()
        .create_resource(
            &read_only,
            CreateResource::new(ResourceKind::Collection, "c").owned_by(&project.uuid),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::Forbidden { .. }), "{err:?}");
    let err = f
        .guard()
        .set_trash(&read_only, &project.uuid, TrashUpdate::trash())
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::Forbidden { .. }), "{err:?}");

    // An exact scope admits that one call and nothing else.
    let collections_only = f
        .login_with(IssueToken {
            user_uuid: u1.uuid.clone(),
            scopes: Some(vec!["POST /arvados/v1/collections".into()]),
            ..IssueToken::default()
        })
        .await;
    f.guard()
        .create_resource(
            &collections_only,
            CreateResource::new(ResourceKind::Collection, "c").owned_by(&project.uuid),
        )
        .await
        .unwrap();
    let err = f
        .guard()
        .create_resource(
            &collections_only,
            CreateResource::project("sub").owned_by(&project.uuid),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::Forbidden { .. }), "{err:?}");
    let path = format!("/arvados/v1/groups/{}", project.uuid);
    assert!(!collections_only.identity().unwrap().allows("PATCH", &path));
    assert!(home.identity().unwrap().allows("PATCH", &path));
}

#[tokio::test]
async fn trusted_clients_are_not_held_to_scopes() {
    let f = setup().await;
    let u1 = f.user("u1@example.com").await;
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

    let ctx = f
        .login_with(IssueToken {
            user_uuid: u1.uuid.clone(),
            api_client_uuid: Some(client.uuid.clone()),
            scopes: Some(vec!["GET /arvados/v1/users/current".into()]),
            ..IssueToken::default()
        })
        .await;
    assert!(ctx.identity().unwrap().trusted);
    f.guard()
        .create_resource(&ctx, CreateResource::project("home"))
        .await
        .unwrap();
}

#[tokio::test]
async fn granting_needs_manage_on_the_head() {
    let f = setup().await;
    let u1 = f.user("u1@example.com").await;
    let u2 = f.user("u2@example.com").await;
    let u3 = f.user("u3@example.com").await;
    let g1 = f
        .graph
        .create_resource(CreateResource::project("g1").owned_by(&u1.uuid))
        .await
        .unwrap();
    f.graph
        .create_link(CreateLink::permission(
            &f.root.uuid,
            &u2.uuid,
            &g1.uuid,
            PermissionLevel::Write,
        ))
        .await
        .unwrap();

    let as_u2 = f.login(&u2, None).await;
    let err = f
        .guard()
        .create_link(
            &as_u2,
            CreateLink::permission(&u2.uuid, &u3.uuid, &g1.uuid, PermissionLevel::Read),
        )
        .await
        .unwrap_err();
    assert!(is_not_found(&err), "{err:?}");

    // Starring only needs read on the head.
    let star = f
        .guard()
        .create_link(
            &as_u2,
            CreateLink {
                name: "star".into(),
                ..CreateLink::permission(&u2.uuid, &u2.uuid, &g1.uuid, PermissionLevel::Read)
            },
        )
        .await
        .unwrap();
    assert_eq!(star.grant(), None);

    let as_u1 = f.login(&u1, None).await;
    let link = f
        .guard()
        .create_link(
            &as_u1,
            CreateLink::permission(&u1.uuid, &u3.uuid, &g1.uuid, PermissionLevel::Read),
        )
        .await
        .unwrap();
    assert!(
        f.engine
            .can_access(&u3.uuid, &g1.uuid, PermissionLevel::Read, Utc::now())
            .await
            .unwrap()
    );

    // u2 neither manages g1 nor writes to the link's owner.
    let err = f.guard().delete_link(&as_u2, &link.uuid).await.unwrap_err();
    assert!(is_not_found(&err));

    f.guard().delete_link(&as_u1, &link.uuid).await.unwrap();
    assert!(
        !f.engine
            .can_access(&u3.uuid, &g1.uuid, PermissionLevel::Read, Utc::now())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn owner_change_needs_write_on_both_owners() {
    let f = setup().await;
    let u1 = f.user("u1@example.com").await;
    let u2 = f.user("u2@example.com").await;
    let mine = f
        .graph
        .create_resource(CreateResource::project("mine").owned_by(&u1.uuid))
        .await
        .unwrap();
    let theirs = f
        .graph
        .create_resource(CreateResource::project("theirs").owned_by(&u2.uuid))
        .await
        .unwrap();
    let c1 = f
        .graph
        .create_resource(CreateResource::new(ResourceKind::Collection, "c1").owned_by(&mine.uuid))
        .await
        .unwrap();
    let ctx = f.login(&u1, None).await;

    let err = f
        .guard()
        .change_owner(&ctx, &c1.uuid, &theirs.uuid)
        .await
        .unwrap_err();
    assert!(is_not_found(&err));

    f.graph
        .create_link(CreateLink::permission(
            &f.root.uuid,
            &u1.uuid,
            &theirs.uuid,
            PermissionLevel::Write,
        ))
        .await
        .unwrap();
    let moved = f
        .guard()
        .change_owner(&ctx, &c1.uuid, &theirs.uuid)
        .await
        .unwrap();
    assert_eq!(moved.owner_uuid, theirs.uuid);
}

#[tokio::test]
async fn trashed_objects_can_be_restored_by_their_manager() {
    let f = setup().await;
    let u1 = f.user("u1@example.com").await;
    let u2 = f.user("u2@example.com").await;
    let g1 = f
        .graph
        .create_resource(CreateResource::project("g1").owned_by(&u1.uuid))
        .await
        .unwrap();
    let as_u1 = f.login(&u1, None).await;
    let as_u2 = f.login(&u2, None).await;

    let err = f
        .guard()
        .set_trash(&as_u2, &g1.uuid, TrashUpdate::trash())
        .await
        .unwrap_err();
    assert!(is_not_found(&err));

    let trashed = f
        .guard()
        .set_trash(&as_u1, &g1.uuid, TrashUpdate::trash())
        .await
        .unwrap();
    assert!(trashed.is_trashed);

    // Trashed objects take no updates, but can be brought back.
    let err = f.guard().authorize_update(&as_u1, &g1.uuid).await.unwrap_err();
    assert!(is_not_found(&err));
    let restored = f
        .guard()
        .set_trash(&as_u1, &g1.uuid, TrashUpdate::untrash())
        .await
        .unwrap();
    assert!(!restored.is_trashed);
    f.guard().authorize_update(&as_u1, &g1.uuid).await.unwrap();
}

#[tokio::test]
async fn membership_changes_need_manage_on_the_group() {
    let f = setup().await;
    let lead = f.user("lead@example.com").await;
    let member = f.user("member@example.com").await;
    let team = f
        .graph
        .create_resource(CreateResource {
            group_class: Some(GroupClass::Role),
            ..CreateResource::new(ResourceKind::Group, "team").owned_by(&lead.uuid)
        })
        .await
        .unwrap();
    let as_lead = f.login(&lead, None).await;
    let as_member = f.login(&member, None).await;

    let input = CreateMembership {
        owner_uuid: lead.uuid.clone(),
        user_uuid: member.uuid.clone(),
        group_uuid: team.uuid.clone(),
        level: PermissionLevel::Read,
    };
    let err = f
        .guard()
        .add_membership(&as_member, input.clone())
        .await
        .unwrap_err();
    assert!(is_not_found(&err));

    f.guard().add_membership(&as_lead, input).await.unwrap();
    assert!(
        f.engine
            .can_access(&member.uuid, &team.uuid, PermissionLevel::Read, Utc::now())
            .await
            .unwrap()
    );

    // A read member cannot remove itself; the lead can.
    let err = f
        .guard()
        .remove_membership(&as_member, &member.uuid, &team.uuid)
        .await
        .unwrap_err();
    assert!(is_not_found(&err));
    f.guard()
        .remove_membership(&as_lead, &member.uuid, &team.uuid)
        .await
        .unwrap();
}

#[tokio::test]
async fn check_hides_denials_as_missing_objects() {
    let f = setup().await;
    let u1 = f.user("u1@example.com").await;
    let u2 = f.user("u2@example.com").await;
    let secret = f
        .graph
        .create_resource(CreateResource::project("secret").owned_by(&u1.uuid))
        .await
        .unwrap();
    let ctx = f.login(&u2, None).await;

    let denied = f
        .engine
        .check(&ctx, &secret.uuid, PermissionLevel::Read)
        .await
        .unwrap_err();
    let missing = f
        .engine
        .check(&ctx, "zzzzz-j7d0g-doesnotexist000", PermissionLevel::Read)
        .await
        .unwrap_err();
    assert!(is_not_found(&denied));
    assert!(is_not_found(&missing));

    let visible = f
        .engine
        .visible_resources(&ctx, PermissionLevel::Read)
        .await
        .unwrap();
    assert!(!visible.contains(&secret.uuid));
    let anonymous = RequestContext::anonymous(None, Utc::now());
    assert!(
        f.engine
            .visible_resources(&anonymous, PermissionLevel::Read)
            .await
            .unwrap()
            .is_empty()
    );
}
