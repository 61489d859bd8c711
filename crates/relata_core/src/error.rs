//! Error types for the relata core engine.
//!
//! Structural problems (unknown fields, schema construction mistakes,
//! registry misses) are reported as errors. Mutation-time business
//! failures (read-only targets, cancelled "before" events) are reported
//! through `Ok(false)` return values instead, with the ambient
//! transaction rolled back as the sole recovery action.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in relata core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Field name is not declared on the schema.
    #[error("unknown field \"{field}\" on schema \"{schema}\"")]
    UnknownField {
        /// Schema name.
        schema: String,
        /// The undeclared field name.
        field: String,
    },

    /// Relation name is not declared on the schema.
    #[error("unknown relation \"{relation}\" on schema \"{schema}\"")]
    UnknownRelation {
        /// Schema name.
        schema: String,
        /// The undeclared relation name.
        relation: String,
    },

    /// Wrong kind of object assigned to a relation slot.
    #[error("relation \"{relation}\" expects {expected}, got {actual}")]
    RelationTypeMismatch {
        /// Relation name.
        relation: String,
        /// Description of the expected target.
        expected: String,
        /// Description of what was assigned.
        actual: String,
    },

    /// Attempt to join a second, distinct, unfinished transaction.
    #[error("transaction {active} already active, can't join {requested}")]
    TransactionAlreadyActive {
        /// Uuid of the currently active transaction.
        active: String,
        /// Uuid of the transaction that was requested.
        requested: String,
    },

    /// Attempt to join or reuse a finished transaction.
    #[error("transaction {uuid} already finished")]
    TransactionFinished {
        /// Uuid of the finished transaction.
        uuid: String,
    },

    /// Outcome of a transaction queried before it finished.
    #[error("transaction {uuid} not finished, outcome unknown")]
    TransactionNotFinished {
        /// Uuid of the unfinished transaction.
        uuid: String,
    },

    /// Serialization requested while a transaction is open on the target.
    #[error("transaction {uuid} must finish before \"{target}\" can be serialized")]
    TransactionInProgress {
        /// Uuid of the open transaction.
        uuid: String,
        /// Description of the serialization target.
        target: String,
    },

    /// Duplicate field declaration at schema construction.
    #[error("duplicate field \"{field}\" on schema \"{schema}\"")]
    DuplicateSchemaField {
        /// Schema name.
        schema: String,
        /// The duplicated field name.
        field: String,
    },

    /// Duplicate relation declaration at schema construction.
    #[error("duplicate relation \"{relation}\" on schema \"{schema}\"")]
    DuplicateSchemaRelation {
        /// Schema name.
        schema: String,
        /// The duplicated relation name.
        relation: String,
    },

    /// Relation declared with the same name as a field.
    #[error("relation \"{name}\" collides with a field of the same name on schema \"{schema}\"")]
    NameCollision {
        /// Schema name.
        schema: String,
        /// The colliding name.
        name: String,
    },

    /// Primary key names a field that is not declared.
    #[error("primary key field \"{field}\" not declared on schema \"{schema}\"")]
    PrimaryKeyMismatch {
        /// Schema name.
        schema: String,
        /// The missing field name.
        field: String,
    },

    /// Foreign key references a field that does not exist.
    #[error("foreign key field \"{field}\" of relation \"{relation}\" not declared on schema \"{schema}\"")]
    UnknownForeignKeyField {
        /// Schema the field was expected on.
        schema: String,
        /// Relation owning the foreign key.
        relation: String,
        /// The missing field name.
        field: String,
    },

    /// Schema or field type lookup miss without deferral.
    #[error("{kind} \"{name}\" is not registered")]
    NotRegistered {
        /// What kind of descriptor was looked up.
        kind: &'static str,
        /// The name that missed.
        name: String,
    },

    /// Non-forced double registration.
    #[error("{kind} \"{name}\" is already registered")]
    AlreadyRegistered {
        /// What kind of descriptor was registered.
        kind: &'static str,
        /// The name that clashed.
        name: String,
    },
}

impl CoreError {
    /// Creates an unknown field error.
    pub fn unknown_field(schema: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            schema: schema.into(),
            field: field.into(),
        }
    }

    /// Creates an unknown relation error.
    pub fn unknown_relation(schema: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::UnknownRelation {
            schema: schema.into(),
            relation: relation.into(),
        }
    }

    /// Creates a relation type mismatch error.
    pub fn relation_type_mismatch(
        relation: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::RelationTypeMismatch {
            relation: relation.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a transaction already active error.
    pub fn transaction_already_active(
        active: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::TransactionAlreadyActive {
            active: active.into(),
            requested: requested.into(),
        }
    }

    /// Creates a transaction finished error.
    pub fn transaction_finished(uuid: impl Into<String>) -> Self {
        Self::TransactionFinished { uuid: uuid.into() }
    }

    /// Creates a transaction not finished error.
    pub fn transaction_not_finished(uuid: impl Into<String>) -> Self {
        Self::TransactionNotFinished { uuid: uuid.into() }
    }

    /// Creates a transaction in progress error.
    pub fn transaction_in_progress(uuid: impl Into<String>, target: impl Into<String>) -> Self {
        Self::TransactionInProgress {
            uuid: uuid.into(),
            target: target.into(),
        }
    }

    /// Creates a not registered error.
    pub fn not_registered(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotRegistered {
            kind,
            name: name.into(),
        }
    }

    /// Creates an already registered error.
    pub fn already_registered(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyRegistered {
            kind,
            name: name.into(),
        }
    }
}
