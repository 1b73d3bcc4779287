//! # jit-groups-provision
//!
//! Provisioning engine for the JIT group broker. Turns a group policy into
//! cloud state: the backing cloud identity group, time-bounded memberships,
//! and IAM role bindings on the resources the group grants access to.
//!
//! The cloud APIs are reached exclusively through the [`CloudIdentity`] and
//! [`ResourceManager`] capability traits, so the engine stays testable and
//! transport-agnostic.
//!
//! [`CloudIdentity`]: cloud_identity::CloudIdentity
//! [`ResourceManager`]: resource_manager::ResourceManager

pub mod cloud_identity;
pub mod error;
pub mod iam;
pub mod mapping;
pub mod provisioner;
pub mod resource_manager;
