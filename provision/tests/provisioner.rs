use async_trait::async_trait;
use jit_groups_policy::group_id::JitGroupId;
use jit_groups_policy::policy::{EnvironmentPolicy, JitGroupPolicy, JitGroupView, SystemPolicy};
use jit_groups_policy::privilege::{Privilege, ResourceId};
use jit_groups_provision::cloud_identity::{
    AccessProfile, CloudIdentity, Group, GroupKey, Membership,
};
use jit_groups_provision::error::ApiError;
use jit_groups_provision::iam::parse_description;
use jit_groups_provision::provisioner::{Provisioner, ProvisionerOptions};
use jit_groups_provision::resource_manager::{IamPolicy, IamPolicyTransform, ResourceManager};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};

#[derive(Default)]
struct FakeCloudIdentity {
    groups: Mutex<BTreeMap<String, Group>>,
    memberships: Mutex<Vec<Membership>>,
    permanent_members: Mutex<Vec<(GroupKey, String)>>,
    next_key: AtomicUsize,
    fail_create_with_already_exists: bool,
}

impl FakeCloudIdentity {
    fn seed_group(&self, email: &str, description: &str) {
        let key = GroupKey(format!("groups/seeded-{email}"));
        self.groups.lock().unwrap().insert(
            email.to_string(),
            Group {
                key,
                email: email.to_string(),
                description: description.to_string(),
            },
        );
    }

    fn description_of(&self, email: &str) -> String {
        self.groups.lock().unwrap()[email].description.clone()
    }
}

#[async_trait]
impl CloudIdentity for FakeCloudIdentity {
    async fn get_group(&self, email: &str) -> Result<Group, ApiError> {
        self.groups
            .lock()
            .unwrap()
            .get(email)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(email.to_string()))
    }

    async fn lookup_group(&self, email: &str) -> Result<GroupKey, ApiError> {
        self.get_group(email).await.map(|g| g.key)
    }

    async fn create_group(
        &self,
        email: &str,
        description: &str,
        _owner_email: &str,
        _access_profile: AccessProfile,
    ) -> Result<GroupKey, ApiError> {
        if self.fail_create_with_already_exists {
            // Simulate a racing writer: the group appears, creation reports
            // a conflict.
            self.seed_group(email, description);
            return Err(ApiError::AlreadyExists(email.to_string()));
        }
        let mut groups = self.groups.lock().unwrap();
        if groups.contains_key(email) {
            return Err(ApiError::AlreadyExists(email.to_string()));
        }
        let key = GroupKey(format!(
            "groups/{}",
            self.next_key.fetch_add(1, Ordering::SeqCst)
        ));
        groups.insert(
            email.to_string(),
            Group {
                key: key.clone(),
                email: email.to_string(),
                description: description.to_string(),
            },
        );
        Ok(key)
    }

    async fn patch_group(&self, key: &GroupKey, description: &str) -> Result<(), ApiError> {
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .values_mut()
            .find(|g| g.key == *key)
            .ok_or_else(|| ApiError::NotFound(key.0.clone()))?;
        group.description = description.to_string();
        Ok(())
    }

    async fn add_membership(
        &self,
        _key: &GroupKey,
        user_email: &str,
        expiry: OffsetDateTime,
    ) -> Result<Membership, ApiError> {
        let membership = Membership {
            member_email: user_email.to_string(),
            expiry: Some(expiry),
        };
        self.memberships.lock().unwrap().push(membership.clone());
        Ok(membership)
    }

    async fn add_permanent_membership(
        &self,
        host_key: &GroupKey,
        member_email: &str,
    ) -> Result<(), ApiError> {
        self.permanent_members
            .lock()
            .unwrap()
            .push((host_key.clone(), member_email.to_string()));
        Ok(())
    }

    async fn delete_membership(&self, _key: &GroupKey, member_email: &str) -> Result<(), ApiError> {
        self.memberships
            .lock()
            .unwrap()
            .retain(|m| m.member_email != member_email);
        Ok(())
    }

    async fn search_groups_by_prefix(
        &self,
        prefix: &str,
        _expand_members: bool,
    ) -> Result<Vec<Group>, ApiError> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .values()
            .filter(|g| g.email.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct FakeResourceManager {
    policies: Mutex<BTreeMap<ResourceId, IamPolicy>>,
    denied: BTreeSet<ResourceId>,
    writes: AtomicUsize,
}

#[async_trait]
impl ResourceManager for FakeResourceManager {
    async fn modify_iam_policy(
        &self,
        resource: &ResourceId,
        transform: IamPolicyTransform,
    ) -> Result<(), ApiError> {
        if self.denied.contains(resource) {
            return Err(ApiError::AccessDenied(resource.to_string()));
        }
        let mut policies = self.policies.lock().unwrap();
        let current = policies.get(resource).cloned().unwrap_or_default();
        policies.insert(resource.clone(), transform(current));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn group_view(privileges: Vec<Privilege>, gke_enabled: bool) -> JitGroupView {
    let mut system = SystemPolicy::new("billing", "Billing stack");
    system
        .add_group(JitGroupPolicy {
            name: "admins".to_string(),
            description: "Billing administrators".to_string(),
            gke_enabled,
            privileges,
            ..JitGroupPolicy::default()
        })
        .unwrap();
    let mut environment = EnvironmentPolicy::new("prod", "Production");
    environment.add_system(system).unwrap();
    JitGroupView::resolve(
        Arc::new(environment),
        &JitGroupId::new("prod", "billing", "admins").unwrap(),
    )
    .unwrap()
}

fn role_binding(resource: &str, role: &str) -> Privilege {
    Privilege::IamRoleBinding {
        resource: resource.parse().unwrap(),
        role: role.to_string(),
        description: None,
        condition: None,
    }
}

fn provisioner(
    identity: Arc<FakeCloudIdentity>,
    resource_manager: Arc<FakeResourceManager>,
) -> Provisioner {
    Provisioner::new(
        identity,
        resource_manager,
        ProvisionerOptions {
            primary_domain: "example.com".to_string(),
            owner_email: "broker@example.com".to_string(),
            gke_security_group: Some("gke-security-groups@example.com".to_string()),
        },
    )
}

#[tokio::test]
async fn provision_membership_creates_group_membership_and_bindings() {
    let identity = Arc::new(FakeCloudIdentity::default());
    let resource_manager = Arc::new(FakeResourceManager::default());
    let provisioner = provisioner(identity.clone(), resource_manager.clone());
    let view = group_view(vec![role_binding("projects/p1", "roles/billing.admin")], false);

    let expiry = OffsetDateTime::now_utc() + Duration::minutes(30);
    provisioner
        .provision_membership(&view, "alice@example.com", expiry)
        .await
        .unwrap();

    let email = "jit.prod.billing.admins@example.com";
    assert!(provisioner.is_provisioned(&view.id()).await.unwrap());
    let (text, checksum) = {
        let description = identity.description_of(email);
        let (t, c) = parse_description(&description);
        (t.to_string(), c)
    };
    assert_eq!(text, "Billing administrators");
    assert_ne!(checksum, 0);

    let memberships = identity.memberships.lock().unwrap();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].member_email, "alice@example.com");
    assert_eq!(memberships[0].expiry, Some(expiry));

    let policies = resource_manager.policies.lock().unwrap();
    let policy = &policies[&"projects/p1".parse::<ResourceId>().unwrap()];
    assert_eq!(policy.bindings.len(), 1);
    assert_eq!(policy.bindings[0].role, "roles/billing.admin");
    assert_eq!(policy.bindings[0].members, [format!("group:{email}")]);
}

#[tokio::test]
async fn reconcile_without_changes_writes_nothing() {
    let identity = Arc::new(FakeCloudIdentity::default());
    let resource_manager = Arc::new(FakeResourceManager::default());
    let provisioner = provisioner(identity.clone(), resource_manager.clone());
    let view = group_view(vec![role_binding("projects/p1", "roles/billing.admin")], false);

    let expiry = OffsetDateTime::now_utc() + Duration::minutes(30);
    provisioner
        .provision_membership(&view, "alice@example.com", expiry)
        .await
        .unwrap();
    let writes_after_provision = resource_manager.writes.load(Ordering::SeqCst);
    assert_eq!(writes_after_provision, 1);

    // Checksum matches, so a reconcile performs no IAM writes.
    provisioner.reconcile(&view).await.unwrap();
    assert_eq!(
        resource_manager.writes.load(Ordering::SeqCst),
        writes_after_provision
    );
}

#[tokio::test]
async fn reconcile_skips_groups_that_were_never_provisioned() {
    let identity = Arc::new(FakeCloudIdentity::default());
    let resource_manager = Arc::new(FakeResourceManager::default());
    let provisioner = provisioner(identity.clone(), resource_manager.clone());
    let view = group_view(vec![role_binding("projects/p1", "roles/billing.admin")], false);

    provisioner.reconcile(&view).await.unwrap();
    assert_eq!(resource_manager.writes.load(Ordering::SeqCst), 0);
    assert!(!provisioner.is_provisioned(&view.id()).await.unwrap());
}

#[tokio::test]
async fn failed_resource_update_withholds_the_checksum() {
    let identity = Arc::new(FakeCloudIdentity::default());
    identity.seed_group("jit.prod.billing.admins@example.com", "Billing administrators");
    let resource_manager = Arc::new(FakeResourceManager {
        denied: ["projects/locked".parse().unwrap()].into(),
        ..FakeResourceManager::default()
    });
    let provisioner = provisioner(identity.clone(), resource_manager.clone());
    let view = group_view(
        vec![
            role_binding("projects/p1", "roles/viewer"),
            role_binding("projects/locked", "roles/viewer"),
        ],
        false,
    );

    let err = provisioner.reconcile(&view).await.unwrap_err();
    assert!(err.is_access_denied(), "unexpected error: {err}");

    // The reachable resource was updated, but the checksum stays absent so
    // the next reconcile still sees drift.
    assert_eq!(resource_manager.writes.load(Ordering::SeqCst), 1);
    let description = identity.description_of("jit.prod.billing.admins@example.com");
    assert_eq!(parse_description(&description).1, 0);
}

#[tokio::test]
async fn losing_the_creation_race_degrades_to_a_lookup() {
    let identity = Arc::new(FakeCloudIdentity {
        fail_create_with_already_exists: true,
        ..FakeCloudIdentity::default()
    });
    let resource_manager = Arc::new(FakeResourceManager::default());
    let provisioner = provisioner(identity.clone(), resource_manager.clone());
    let view = group_view(vec![], false);

    let expiry = OffsetDateTime::now_utc() + Duration::minutes(5);
    provisioner
        .provision_membership(&view, "alice@example.com", expiry)
        .await
        .unwrap();
    assert_eq!(identity.memberships.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn gke_groups_join_the_security_host_group() {
    let identity = Arc::new(FakeCloudIdentity::default());
    identity.seed_group("gke-security-groups@example.com", "GKE security groups");
    let resource_manager = Arc::new(FakeResourceManager::default());
    let provisioner = provisioner(identity.clone(), resource_manager.clone());
    let view = group_view(vec![], true);

    let expiry = OffsetDateTime::now_utc() + Duration::minutes(5);
    provisioner
        .provision_membership(&view, "alice@example.com", expiry)
        .await
        .unwrap();

    let permanent = identity.permanent_members.lock().unwrap();
    assert_eq!(permanent.len(), 1);
    assert_eq!(permanent[0].1, "jit.prod.billing.admins@example.com");
}

#[tokio::test]
async fn provisioned_groups_parses_and_skips_malformed_emails() {
    let identity = Arc::new(FakeCloudIdentity::default());
    identity.seed_group("jit.prod.billing.admins@example.com", "");
    identity.seed_group("jit.prod.compute.operators@example.com", "");
    identity.seed_group("jit.prod.not-a-triple@example.com", "");
    let resource_manager = Arc::new(FakeResourceManager::default());
    let provisioner = provisioner(identity.clone(), resource_manager);

    let mut groups = provisioner.provisioned_groups("prod").await.unwrap();
    groups.sort_by(|a, b| a.email.cmp(&b.email));
    assert_eq!(groups.len(), 2);
    assert_eq!(
        groups[0].id,
        JitGroupId::new("prod", "billing", "admins").unwrap()
    );
    assert_eq!(
        groups[1].id,
        JitGroupId::new("prod", "compute", "operators").unwrap()
    );
}
