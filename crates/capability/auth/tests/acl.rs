use domain::{ClientType, ThingAddr};
use hub_auth::{
    ALL_GROUP, AuthError, AuthService, Authenticator, Credentials, Role, ThingAuthorizer,
    certificate_identity,
};
use hub_bucketstore::{BucketStore, MemBucketStore};
use std::sync::Arc;

async fn open_service() -> (Arc<dyn BucketStore>, AuthService) {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let service = AuthService::open(store.clone()).await.expect("open auth");
    (store, service)
}

#[tokio::test]
async fn password_login_and_admin_ops() {
    let (_store, service) = open_service().await;
    service
        .add_client("alice", "Alice", ClientType::User, "pw1")
        .await
        .expect("add client");

    let identity = service
        .authenticate(&Credentials::Password {
            login_id: "alice".to_string(),
            password: "pw1".to_string(),
        })
        .await
        .expect("login");
    assert_eq!(identity.client_id, "alice");
    assert_eq!(identity.client_type, ClientType::User);

    let err = service.login("alice", "wrong").await.expect_err("bad password");
    assert!(matches!(err, AuthError::InvalidCredentials));

    service.set_password("alice", "pw2").await.expect("set password");
    service.login("alice", "pw2").await.expect("login with new password");

    service.remove_client("alice").await.expect("remove");
    assert!(service.login("alice", "pw2").await.is_err());

    let err = service.set_password("ghost", "x").await.expect_err("unknown");
    assert!(matches!(err, AuthError::UnknownClient(_)));
}

#[tokio::test]
async fn group_roles_gate_view_and_operate() {
    let (store, service) = open_service().await;
    let thing = ThingAddr::new("dev1", "sensor1");
    let other = ThingAddr::new("dev2", "sensor9");

    service.add_thing("lab", &thing).await.expect("add thing");
    service.set_role("lab", "viewer1", Role::Viewer).await.expect("role");
    service.set_role("lab", "op1", Role::Operator).await.expect("role");
    service.set_role(ALL_GROUP, "boss", Role::Manager).await.expect("role");

    let acl = service.acl();
    assert!(acl.can_view("viewer1", &thing).await);
    assert!(!acl.can_operate("viewer1", &thing).await);
    assert!(acl.can_operate("op1", &thing).await);
    assert!(!acl.can_view("op1", &other).await);
    assert!(acl.can_view("boss", &other).await);
    assert!(acl.can_operate("boss", &other).await);
    assert!(!acl.can_view("nobody", &thing).await);

    // 重新打开后分组仍在
    let reopened = AuthService::open(store).await.expect("reopen");
    assert_eq!(reopened.acl().role_for("op1", &thing), Some(Role::Operator));

    service.remove_client("op1").await.expect("remove");
    assert!(!acl.can_view("op1", &thing).await);
}

#[tokio::test]
async fn bootstrap_admin_is_idempotent() {
    let (_store, service) = open_service().await;
    service.bootstrap_admin("first").await.expect("bootstrap");
    service.bootstrap_admin("second").await.expect("bootstrap again");
    service.login("admin", "second").await.expect("admin login");
    let role = service
        .acl()
        .role_for("admin", &ThingAddr::new("any", "thing"));
    assert_eq!(role, Some(Role::Admin));
}

#[test]
fn certificate_ou_selects_client_type() {
    let device = certificate_identity("dev1", Some("device")).expect("device");
    assert_eq!(device.client_type, ClientType::Device);
    let service = certificate_identity("historian", Some("service")).expect("service");
    assert_eq!(service.client_type, ClientType::Service);
    let user = certificate_identity("bob", None).expect("user");
    assert_eq!(user.client_type, ClientType::User);
    assert!(certificate_identity("", Some("device")).is_err());
}
