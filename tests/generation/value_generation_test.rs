//! The value generation policy contract.

use std::sync::Arc;

use strata::generation::{
    generated_by_database, needs_refresh_after, referenced_column_value, write_property_value,
    FixedValue, GenerationOrigin, GenerationTiming, ValueGenerationPolicy, VersionIncrement,
};
use strata::model::{
    AttributeDescriptor, ColumnDescriptor, EntityDescriptor, MappingError, MetadataRegistry, Value,
};
use strata::sql::dialect::Dialect;

#[test]
fn write_property_value_truth_table() {
    // 1. plain user-supplied column: written
    assert!(write_property_value(&ValueGenerationPolicy::none()));

    // 2. generated in memory: written like any other value
    let in_memory = ValueGenerationPolicy::in_memory(
        GenerationTiming::Insert,
        Arc::new(FixedValue(Value::Int(1))),
    );
    assert!(!generated_by_database(&in_memory));
    assert!(write_property_value(&in_memory));

    // 3. database-generated, referenced, with expression text: the
    //    expression is emitted, the property value is not written
    let with_expression =
        ValueGenerationPolicy::database_expression(GenerationTiming::Insert, "current_timestamp");
    assert!(generated_by_database(&with_expression));
    assert!(!write_property_value(&with_expression));

    // 4. database-generated, referenced, no expression: placeholder mode
    let placeholder = ValueGenerationPolicy::database_parameter(GenerationTiming::Insert);
    assert!(write_property_value(&placeholder));

    // 5. database-generated, not referenced at all: nothing written
    let unreferenced = ValueGenerationPolicy::database(GenerationTiming::Insert);
    assert!(!write_property_value(&unreferenced));
}

#[test]
fn missing_expression_text_is_not_an_error() {
    let placeholder = ValueGenerationPolicy::database_parameter(GenerationTiming::Update);
    assert_eq!(referenced_column_value(&placeholder, Dialect::Postgres), None);
    // ...and the policy still asks for the property value to be bound
    assert!(write_property_value(&placeholder));
}

#[test]
fn dialect_aware_expression_is_preferred() {
    let policy =
        ValueGenerationPolicy::database_expression_for(GenerationTiming::Always, |dialect| {
            match dialect {
                Dialect::TSql => "GETDATE()".into(),
                Dialect::MySql => "NOW()".into(),
                _ => "current_timestamp".into(),
            }
        });
    assert_eq!(
        referenced_column_value(&policy, Dialect::Postgres).as_deref(),
        Some("current_timestamp")
    );
    assert_eq!(
        referenced_column_value(&policy, Dialect::MySql).as_deref(),
        Some("NOW()")
    );
    assert_eq!(
        referenced_column_value(&policy, Dialect::TSql).as_deref(),
        Some("GETDATE()")
    );
}

#[test]
fn fixed_expression_is_the_fallback_form() {
    let policy =
        ValueGenerationPolicy::database_expression(GenerationTiming::Insert, "nextval('doc_seq')");
    for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::Sqlite, Dialect::TSql] {
        assert_eq!(
            referenced_column_value(&policy, dialect).as_deref(),
            Some("nextval('doc_seq')")
        );
    }
}

#[test]
fn refresh_is_needed_exactly_for_database_generation_in_timing() {
    let insert_only = ValueGenerationPolicy::database(GenerationTiming::Insert);
    assert!(needs_refresh_after(&insert_only, true));
    assert!(!needs_refresh_after(&insert_only, false));

    let update_only =
        ValueGenerationPolicy::database_expression(GenerationTiming::Update, "current_timestamp");
    assert!(!needs_refresh_after(&update_only, true));
    assert!(needs_refresh_after(&update_only, false));

    let always = ValueGenerationPolicy::database(GenerationTiming::Always);
    assert!(needs_refresh_after(&always, true));
    assert!(needs_refresh_after(&always, false));

    let in_memory = ValueGenerationPolicy::in_memory(
        GenerationTiming::Always,
        Arc::new(VersionIncrement),
    );
    assert!(!needs_refresh_after(&in_memory, true));
    assert!(!needs_refresh_after(&in_memory, false));
}

#[test]
fn timing_statement_coverage() {
    assert!(!GenerationTiming::Never.includes_insert());
    assert!(!GenerationTiming::Never.includes_update());
    assert!(GenerationTiming::Insert.includes_insert());
    assert!(!GenerationTiming::Insert.includes_update());
    assert!(!GenerationTiming::Update.includes_insert());
    assert!(GenerationTiming::Update.includes_update());
    assert!(GenerationTiming::Always.includes_insert());
    assert!(GenerationTiming::Always.includes_update());
}

#[test]
fn conflicting_policy_is_fatal_at_mapping_build() {
    let mut policy = ValueGenerationPolicy::database(GenerationTiming::Insert);
    policy.generator = Some(Arc::new(FixedValue(Value::Int(1))));
    assert_eq!(policy.origin, GenerationOrigin::Database);

    let entity = EntityDescriptor::new("Document")
        .with_id(AttributeDescriptor::basic("id", ColumnDescriptor::new("id")))
        .with_attribute(AttributeDescriptor::basic(
            "created_at",
            ColumnDescriptor::new("created_at").generated(policy),
        ));

    let err = MetadataRegistry::builder()
        .register(entity)
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        MappingError::GenerationPolicyConflict {
            entity: "Document".into(),
            column: "created_at".into(),
        }
    );
}

#[test]
fn version_increment_derives_from_current_value() {
    let g = VersionIncrement;
    use strata::generation::ValueGenerator;
    assert_eq!(g.generate(None), Value::Int(0));
    assert_eq!(g.generate(Some(&Value::Int(41))), Value::Int(42));
}
