//! # cmdb-core
//!
//! The mainline topology and association consistency engine of a
//! configuration management database.
//!
//! Configuration items are instances of user-definable object types. One
//! privileged chain of object types, the mainline, arranges them into a
//! tree: Business, optional custom levels, Set, Module, Host. This crate
//! keeps that tree and every typed association consistent while the schema
//! and the data change underneath it.
//!
//! ## What lives here
//!
//! - The document store abstraction (`store`) and two backends (`storage`)
//! - The schema registry (`registry`)
//! - Mainline level insertion and removal (`mainline`)
//! - Association mapping and deletion guards (`association`)
//! - Topology reads with statistics (`topology`)
//! - Business creation, archiving and staged teardown (`business`)
//!
//! ## Architectural Constraints
//!
//! - Synchronous and single-threaded: every store call is a round trip
//! - No cached schema: the mainline chain is loaded fresh per operation
//! - Every write is audited; a lost audit entry fails the operation
//! - Multi-step operations report the step they stopped at

// =============================================================================
// MODULES
// =============================================================================

pub mod association;
pub mod audit;
pub mod business;
pub mod config;
pub mod filter;
pub mod instance;
pub mod mainline;
pub mod primitives;
pub mod registry;
pub mod service;
pub mod storage;
pub mod store;
pub mod topology;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    AssociationKind, Attribute, AttributeGroup, CmdbError, Document, DocumentExt,
    InstAssociation, InstId, Mapping, ModelAssociation, ObjectType, OnDelete, UniqueConstraint,
    Value, document,
};

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use filter::{CmpOp, Filter};
pub use registry::ModelRegistry;
pub use storage::{MemoryStore, RedbStore, StorageBackend};
pub use store::{Collection, FindResult, InstanceSource, InstanceStore, Page};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use association::NewAssociation;
pub use audit::{AuditAction, AuditEntry, AuditLog, AuditTrail};
pub use business::{BusinessSkeleton, BusinessTeardown, DeleteStage, TeardownReport};
pub use config::{CmdbConfig, IdlePoolNames};
pub use mainline::{LevelInsertion, LevelRemoval, MainlineChain, MainlineObjectTopo, NewLevel};
pub use service::{Cmdb, RESOURCE_POOL_NAME};
pub use topology::{AssociatedObject, LinkedInstance, SubtreeOptions, TopoNode};
