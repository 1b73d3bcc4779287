//! # jit-groups-catalog
//!
//! The user-facing half of the JIT group broker: a per-subject catalog of
//! environments, systems, and groups (filtered by VIEW permission), the
//! access analysis that combines ACL checks with constraint evaluation,
//! and the join/approval workflow that drives the provisioner.
//!
//! A request materializes a [`catalog::Catalog`] from a [`Subject`] and the
//! shared [`source::PolicyStore`]; navigating to a group yields a
//! [`context::JitGroupContext`] whose [`join`] and [`approve`] entry points
//! produce single-use operations.
//!
//! [`Subject`]: jit_groups_policy::principal::Subject
//! [`join`]: context::JitGroupContext::join
//! [`approve`]: context::JitGroupContext::approve

pub mod analysis;
pub mod catalog;
pub mod context;
pub mod error;
pub mod operation;
pub mod proposal;
pub mod reconcile;
pub mod source;
