//! Value generation policies.
//!
//! Describes how a column's value is produced when an entity is written. A
//! value might be generated in memory, or by the database:
//!
//! - In-memory generation runs an attached [`ValueGenerator`] and the result
//!   is written to the database like any other attribute value, through a
//!   bound parameter.
//! - Database generation happens implicitly (a trigger, a column default, an
//!   identity column) or through a SQL expression emitted verbatim into the
//!   generated `INSERT`/`UPDATE`. Either way the generated value has to be
//!   read back after the statement executes.
//!
//! The policy logic (`generated_by_database`, `write_property_value`,
//! `referenced_column_value`) is pure and state-free, so it lives in free
//! functions over the policy record rather than trait methods.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::value::Value;
use crate::sql::dialect::Dialect;

// ============================================================================
// Timing and origin
// ============================================================================

/// When a generated value is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTiming {
    /// Never generated: an ordinary user-supplied column.
    #[default]
    Never,
    /// Generated when the entity is inserted.
    Insert,
    /// Generated when the entity is updated.
    Update,
    /// Generated on both insert and update.
    Always,
}

impl GenerationTiming {
    /// Does this timing apply to INSERT statements?
    pub fn includes_insert(&self) -> bool {
        matches!(self, GenerationTiming::Insert | GenerationTiming::Always)
    }

    /// Does this timing apply to UPDATE statements?
    pub fn includes_update(&self) -> bool {
        matches!(self, GenerationTiming::Update | GenerationTiming::Always)
    }
}

/// Where a generated value is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationOrigin {
    /// Produced in application memory by a [`ValueGenerator`].
    #[default]
    InMemory,
    /// Produced by the database.
    Database,
}

// ============================================================================
// In-memory generators
// ============================================================================

/// An in-memory value generator attached to a column with
/// [`GenerationOrigin::InMemory`].
pub trait ValueGenerator: fmt::Debug + Send + Sync {
    /// Produce the value to write. `current` is the attribute's present
    /// value, for generators that derive from it (e.g. version counters).
    fn generate(&self, current: Option<&Value>) -> Value;
}

/// Generator returning a fixed value. Mostly useful in tests and defaults.
#[derive(Debug, Clone)]
pub struct FixedValue(pub Value);

impl ValueGenerator for FixedValue {
    fn generate(&self, _current: Option<&Value>) -> Value {
        self.0.clone()
    }
}

/// Monotonically increasing integer generator (a process-local sequence).
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    next: AtomicI64,
}

impl SequenceGenerator {
    pub fn starting_at(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }
}

impl ValueGenerator for SequenceGenerator {
    fn generate(&self, _current: Option<&Value>) -> Value {
        Value::Int(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Version-increment generator: integer bump from the current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionIncrement;

impl ValueGenerator for VersionIncrement {
    fn generate(&self, current: Option<&Value>) -> Value {
        match current {
            Some(Value::Int(n)) => Value::Int(n + 1),
            _ => Value::Int(0),
        }
    }
}

// ============================================================================
// Referenced column expression
// ============================================================================

/// The SQL expression emitted for a database-generated column that is
/// referenced in the statement. Either a fixed string, or a per-dialect
/// function for expressions whose spelling varies (current-timestamp et al.).
#[derive(Clone)]
pub enum GeneratedColumnValue {
    Fixed(String),
    PerDialect(fn(Dialect) -> String),
}

impl fmt::Debug for GeneratedColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratedColumnValue::Fixed(s) => write!(f, "Fixed({:?})", s),
            GeneratedColumnValue::PerDialect(_) => write!(f, "PerDialect(..)"),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Per-column value generation policy.
///
/// Invariants (enforced at registry build time):
/// - `origin == Database` requires `generator == None`
///   ([`crate::model::MappingError::GenerationPolicyConflict`]).
/// - `origin == InMemory` with a timing other than `Never` requires a
///   generator.
///
/// `column_value` is only consulted for database-generated columns that are
/// referenced in SQL; a `None` there means "bind a plain parameter", which is
/// a valid configuration, not an error.
#[derive(Debug, Clone, Default)]
pub struct ValueGenerationPolicy {
    pub timing: GenerationTiming,
    pub origin: GenerationOrigin,
    pub generator: Option<Arc<dyn ValueGenerator>>,
    /// Whether the column appears in the column list of generated
    /// INSERT/UPDATE statements.
    pub reference_column_in_sql: bool,
    /// Expression text for referenced database-generated columns.
    pub column_value: Option<GeneratedColumnValue>,
}

impl ValueGenerationPolicy {
    /// An ordinary, never-generated column.
    pub fn none() -> Self {
        Self {
            reference_column_in_sql: true,
            ..Self::default()
        }
    }

    /// In-memory generation with the given timing and generator.
    pub fn in_memory(timing: GenerationTiming, generator: Arc<dyn ValueGenerator>) -> Self {
        Self {
            timing,
            origin: GenerationOrigin::InMemory,
            generator: Some(generator),
            reference_column_in_sql: true,
            column_value: None,
        }
    }

    /// Database generation with no column reference: the database fills the
    /// column on its own (trigger, identity, column default); the statement
    /// neither names the column nor binds a value.
    pub fn database(timing: GenerationTiming) -> Self {
        Self {
            timing,
            origin: GenerationOrigin::Database,
            generator: None,
            reference_column_in_sql: false,
            column_value: None,
        }
    }

    /// Database generation through an expression emitted into the statement,
    /// e.g. `current_timestamp` or `nextval('mysequence')`.
    pub fn database_expression(timing: GenerationTiming, expression: &str) -> Self {
        Self {
            timing,
            origin: GenerationOrigin::Database,
            generator: None,
            reference_column_in_sql: true,
            column_value: Some(GeneratedColumnValue::Fixed(expression.into())),
        }
    }

    /// Database generation through a dialect-dependent expression.
    pub fn database_expression_for(
        timing: GenerationTiming,
        expression: fn(Dialect) -> String,
    ) -> Self {
        Self {
            timing,
            origin: GenerationOrigin::Database,
            generator: None,
            reference_column_in_sql: true,
            column_value: Some(GeneratedColumnValue::PerDialect(expression)),
        }
    }

    /// Database generation where the column is referenced but the value is
    /// bound as a plain parameter (no expression text).
    pub fn database_parameter(timing: GenerationTiming) -> Self {
        Self {
            timing,
            origin: GenerationOrigin::Database,
            generator: None,
            reference_column_in_sql: true,
            column_value: None,
        }
    }
}

// ============================================================================
// Policy logic (free functions)
// ============================================================================

/// Is the value generated by the database (as opposed to in memory)?
pub fn generated_by_database(policy: &ValueGenerationPolicy) -> bool {
    policy.origin == GenerationOrigin::Database
}

/// Is the property's current value written to the statement as the argument
/// of a bound parameter?
///
/// True when either:
/// - the value is generated in memory (or not generated at all), or
/// - it is database-generated, referenced in SQL, and no expression text is
///   configured - the reference is a plain placeholder.
///
/// A database-generated column that is referenced with an expression emits
/// the expression text itself; the in-memory value is never written then.
pub fn write_property_value(policy: &ValueGenerationPolicy) -> bool {
    !generated_by_database(policy)
        || (policy.reference_column_in_sql && policy.column_value.is_none())
}

/// The SQL expression to emit for a referenced database-generated column, in
/// dialect-specific spelling where the mapping provides one.
///
/// `None` signals "bind a plain parameter", per [`write_property_value`].
pub fn referenced_column_value(
    policy: &ValueGenerationPolicy,
    dialect: Dialect,
) -> Option<String> {
    match &policy.column_value {
        Some(GeneratedColumnValue::Fixed(s)) => Some(s.clone()),
        Some(GeneratedColumnValue::PerDialect(f)) => Some(f(dialect)),
        None => None,
    }
}

/// Does a statement of the given kind need to read this column back after
/// executing? True exactly for database-generated columns whose timing covers
/// the statement.
pub fn needs_refresh_after(policy: &ValueGenerationPolicy, is_insert: bool) -> bool {
    generated_by_database(policy)
        && if is_insert {
            policy.timing.includes_insert()
        } else {
            policy.timing.includes_update()
        }
}

// ============================================================================
// Tests
// ============================================================================
