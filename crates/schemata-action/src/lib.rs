//! Action outcome execution engine for Schemata.
//!
//! Turns a declarative action definition into an ordered sequence of entity
//! operations and performer calls, threading each step's result into the
//! next through the expression language.

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod expression;
pub mod performer;
pub mod permission;
pub mod pipeline;
pub mod sandbox;
pub mod store;
pub mod validation;

pub use context::{ContextBuilder, ExecutionContext};
pub use dispatcher::{DispatchResult, Dispatcher, ResolvedModel};
pub use error::{ActionError, InvocationError, ScriptBudget};
pub use expression::Evaluator;
pub use performer::{ActionPerformer, IntegrationPerformer, PerformerOutput, PerformerRegistry};
pub use permission::{PermissionEvaluator, StaticPermissions};
pub use pipeline::ActionPipeline;
pub use sandbox::{RhaiSandbox, ScriptSandbox};
pub use store::{EntityStore, ListQuery, MemoryStore, StoreError};
