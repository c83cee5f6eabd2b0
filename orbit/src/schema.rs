use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Int64Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use itertools::Itertools;
use orbit_error::{OrbitResult, orbit_bail, orbit_err};
use rustc_hash::FxHashSet;

use crate::SpaceOption;

/// Name of the synthetic column that records each scalar row's position within its write batch.
pub const OFFSET_COLUMN: &str = "offset";

/// The four schema views derived from a space's full schema.
///
/// * `full` is what users write and read.
/// * `scalar` is `full` without the vector column, followed by [`OFFSET_COLUMN`].
/// * `vector` holds only the vector column, and has no fields when the space has none.
/// * `delete` is the primary-key column followed by the version column, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceSchema {
    full: SchemaRef,
    scalar: SchemaRef,
    vector: SchemaRef,
    delete: SchemaRef,
    primary_index: usize,
    version_index: Option<usize>,
    vector_index: Option<usize>,
}

impl SpaceSchema {
    /// Validate `option` against `schema` and derive the views.
    pub fn try_new(schema: SchemaRef, option: &SpaceOption) -> OrbitResult<Self> {
        let mut names = FxHashSet::default();
        for field in schema.fields() {
            if field.name() == OFFSET_COLUMN {
                orbit_bail!(InvalidArgument: "column name {OFFSET_COLUMN} is reserved");
            }
            if !names.insert(field.name().as_str()) {
                orbit_bail!(InvalidArgument: "duplicate column {}", field.name());
            }
        }

        let primary_index = column_index(&schema, &option.primary_column, "primary")?;
        let primary = schema.field(primary_index);
        if !matches!(primary.data_type(), DataType::Int64 | DataType::Utf8) {
            orbit_bail!(
                InvalidArgument: "primary column {} must be Int64 or Utf8, found {}",
                primary.name(),
                primary.data_type()
            );
        }

        let version_index = option
            .version_column
            .as_deref()
            .map(|name| column_index(&schema, name, "version"))
            .transpose()?;
        if let Some(idx) = version_index {
            let version = schema.field(idx);
            if idx == primary_index {
                orbit_bail!(InvalidArgument: "version column cannot be the primary column");
            }
            if version.data_type() != &DataType::Int64 {
                orbit_bail!(
                    InvalidArgument: "version column {} must be Int64, found {}",
                    version.name(),
                    version.data_type()
                );
            }
        }

        let vector_index = option
            .vector_column
            .as_deref()
            .map(|name| column_index(&schema, name, "vector"))
            .transpose()?;
        if let Some(idx) = vector_index {
            let vector = schema.field(idx);
            if idx == primary_index || Some(idx) == version_index {
                orbit_bail!(
                    InvalidArgument: "vector column {} cannot also be the primary or version column",
                    vector.name()
                );
            }
            if !matches!(
                vector.data_type(),
                DataType::FixedSizeBinary(_) | DataType::FixedSizeList(..)
            ) {
                orbit_bail!(
                    InvalidArgument: "vector column {} must be FixedSizeBinary or FixedSizeList, found {}",
                    vector.name(),
                    vector.data_type()
                );
            }
        }

        let scalar_fields = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != vector_index)
            .map(|(_, field)| field.clone())
            .chain([Arc::new(Field::new(OFFSET_COLUMN, DataType::Int64, false))])
            .collect_vec();
        let vector_fields = vector_index
            .map(|idx| schema.field(idx).clone())
            .into_iter()
            .collect_vec();
        let delete_fields = [Some(primary_index), version_index]
            .into_iter()
            .flatten()
            .map(|idx| schema.field(idx).clone())
            .collect_vec();

        Ok(Self {
            full: schema,
            scalar: Arc::new(Schema::new(scalar_fields)),
            vector: Arc::new(Schema::new(vector_fields)),
            delete: Arc::new(Schema::new(delete_fields)),
            primary_index,
            version_index,
            vector_index,
        })
    }

    pub fn full(&self) -> &SchemaRef {
        &self.full
    }

    pub fn scalar(&self) -> &SchemaRef {
        &self.scalar
    }

    pub fn vector(&self) -> &SchemaRef {
        &self.vector
    }

    pub fn delete(&self) -> &SchemaRef {
        &self.delete
    }

    /// Whether rows are split into a vector partition.
    pub fn has_vector(&self) -> bool {
        self.vector_index.is_some()
    }

    pub fn has_version(&self) -> bool {
        self.version_index.is_some()
    }

    pub fn primary_field(&self) -> &Field {
        self.full.field(self.primary_index)
    }

    pub fn version_field(&self) -> Option<&Field> {
        self.version_index.map(|idx| self.full.field(idx))
    }

    pub fn vector_field(&self) -> Option<&Field> {
        self.vector_index.map(|idx| self.full.field(idx))
    }

    /// Split a batch of the full schema into its scalar part, numbered by [`OFFSET_COLUMN`], and
    /// its vector part.
    pub fn split(&self, batch: &RecordBatch) -> OrbitResult<(RecordBatch, Option<RecordBatch>)> {
        check_schema(&self.full, batch.schema_ref(), "written batch")?;
        check_no_nulls(batch.column(self.primary_index), self.primary_field().name())?;
        check_required(&self.full, batch)?;

        let offsets: ArrayRef = Arc::new(Int64Array::from_iter_values(
            (0..batch.num_rows()).map(|row| row as i64),
        ));
        let scalar_columns = batch
            .columns()
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != self.vector_index)
            .map(|(_, column)| column.clone())
            .chain([offsets])
            .collect_vec();
        let scalar = RecordBatch::try_new(self.scalar.clone(), scalar_columns)?;

        let vector = self
            .vector_index
            .map(|idx| RecordBatch::try_new(self.vector.clone(), vec![batch.column(idx).clone()]))
            .transpose()?;

        Ok((scalar, vector))
    }

    /// Rebind a delete batch to the delete schema after checking its shape.
    pub fn delete_batch(&self, batch: &RecordBatch) -> OrbitResult<RecordBatch> {
        check_schema(&self.delete, batch.schema_ref(), "delete batch")?;
        check_no_nulls(batch.column(0), self.primary_field().name())?;
        check_required(&self.delete, batch)?;
        Ok(RecordBatch::try_new(
            self.delete.clone(),
            batch.columns().to_vec(),
        )?)
    }
}

fn column_index(schema: &Schema, name: &str, role: &str) -> OrbitResult<usize> {
    schema
        .index_of(name)
        .map_err(|_| orbit_err!(InvalidArgument: "{role} column {name} is not in the schema"))
}

fn check_no_nulls(array: &ArrayRef, name: &str) -> OrbitResult<()> {
    if array.null_count() > 0 {
        orbit_bail!(InvalidArgument: "primary column {name} contains nulls");
    }
    Ok(())
}

/// Nulls in a column the space declares non-nullable.
fn check_required(expected: &Schema, batch: &RecordBatch) -> OrbitResult<()> {
    for (field, column) in expected.fields().iter().zip(batch.columns()) {
        if !field.is_nullable() && column.null_count() > 0 {
            orbit_bail!(
                SchemaMismatch: "column {} is not nullable but contains {} nulls",
                field.name(),
                column.null_count()
            );
        }
    }
    Ok(())
}

/// Whether two schemas have the same column names and types, in the same order.
///
/// Nullability and metadata are not compared.
pub fn schemas_match(expected: &Schema, actual: &Schema) -> bool {
    expected.fields().len() == actual.fields().len()
        && expected
            .fields()
            .iter()
            .zip(actual.fields())
            .all(|(e, a)| e.name() == a.name() && e.data_type() == a.data_type())
}

pub(crate) fn check_schema(expected: &Schema, actual: &Schema, what: &str) -> OrbitResult<()> {
    if !schemas_match(expected, actual) {
        orbit_bail!(
            SchemaMismatch: "{what} has columns [{}], expected [{}]",
            describe(actual),
            describe(expected)
        );
    }
    Ok(())
}

fn describe(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name(), f.data_type()))
        .join(", ")
}

#[cfg(test)]
mod tests {
    use arrow_array::{FixedSizeBinaryArray, StringArray};
    use orbit_error::OrbitError;
    use rstest::rstest;

    use super::*;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("pk", DataType::Int64, false),
            Field::new("ts", DataType::Int64, false),
            Field::new("vec", DataType::FixedSizeBinary(4), false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    fn option() -> SpaceOption {
        SpaceOption::new("memory://schema", "pk")
            .with_version_column("ts")
            .with_vector_column("vec")
    }

    fn names(schema: &Schema) -> Vec<&str> {
        schema.fields().iter().map(|f| f.name().as_str()).collect()
    }

    #[test]
    fn derived_views() {
        let views = SpaceSchema::try_new(schema(), &option()).unwrap();
        assert_eq!(names(views.scalar()), vec!["pk", "ts", "name", "offset"]);
        assert_eq!(names(views.vector()), vec!["vec"]);
        assert_eq!(names(views.delete()), vec!["pk", "ts"]);
        assert!(views.has_vector());
        assert!(views.has_version());
    }

    #[test]
    fn no_vector_column() {
        let views =
            SpaceSchema::try_new(schema(), &SpaceOption::new("memory://schema", "pk")).unwrap();
        assert_eq!(names(views.scalar()), vec!["pk", "ts", "vec", "name", "offset"]);
        assert!(views.vector().fields().is_empty());
        assert_eq!(names(views.delete()), vec!["pk"]);
    }

    #[rstest]
    #[case(SpaceOption::new("memory://x", "missing"))]
    #[case(SpaceOption::new("memory://x", "vec"))]
    #[case(SpaceOption::new("memory://x", "pk").with_version_column("name"))]
    #[case(SpaceOption::new("memory://x", "pk").with_version_column("pk"))]
    #[case(SpaceOption::new("memory://x", "pk").with_vector_column("name"))]
    #[case(SpaceOption::new("memory://x", "pk").with_vector_column("missing"))]
    #[case(SpaceOption::new("memory://x", "pk").with_version_column("ts").with_vector_column("ts"))]
    fn invalid_options(#[case] option: SpaceOption) {
        let err = SpaceSchema::try_new(schema(), &option).unwrap_err();
        assert!(matches!(err, OrbitError::InvalidArgument(..)), "{err}");
    }

    #[test]
    fn offset_is_reserved() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("pk", DataType::Int64, false),
            Field::new(OFFSET_COLUMN, DataType::Int64, false),
        ]));
        let err = SpaceSchema::try_new(schema, &SpaceOption::new("memory://x", "pk")).unwrap_err();
        assert!(matches!(err, OrbitError::InvalidArgument(..)));
    }

    #[test]
    fn split_numbers_rows() {
        let views = SpaceSchema::try_new(schema(), &option()).unwrap();
        let batch = RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Int64Array::from(vec![1, 1, 1])),
                Arc::new(
                    FixedSizeBinaryArray::try_from_iter(
                        [b"aaaa", b"bbbb", b"cccc"].into_iter(),
                    )
                    .unwrap(),
                ),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .unwrap();

        let (scalar, vector) = views.split(&batch).unwrap();
        let offsets = scalar
            .column_by_name(OFFSET_COLUMN)
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(offsets.values().to_vec(), vec![0, 1, 2]);
        assert_eq!(scalar.num_columns(), 4);
        assert_eq!(vector.unwrap().num_rows(), 3);
    }

    #[test]
    fn split_rejects_other_schemas() {
        let views = SpaceSchema::try_new(schema(), &option()).unwrap();
        let batch = RecordBatch::try_from_iter([(
            "pk",
            Arc::new(Int64Array::from(vec![1])) as ArrayRef,
        )])
        .unwrap();
        assert!(matches!(
            views.split(&batch).unwrap_err(),
            OrbitError::SchemaMismatch(..)
        ));
    }

    #[test]
    fn nullability_is_ignored_when_matching() {
        let relaxed = Schema::new(
            schema()
                .fields()
                .iter()
                .map(|f| f.as_ref().clone().with_nullable(true))
                .collect_vec(),
        );
        assert!(schemas_match(&schema(), &relaxed));
    }

    #[test]
    fn nulls_in_required_columns_are_a_mismatch() {
        let views = SpaceSchema::try_new(schema(), &option()).unwrap();
        let relaxed = Arc::new(Schema::new(
            schema()
                .fields()
                .iter()
                .map(|f| f.as_ref().clone().with_nullable(true))
                .collect_vec(),
        ));
        let batch = RecordBatch::try_new(
            relaxed,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(Int64Array::from(vec![Some(1), None])),
                Arc::new(
                    FixedSizeBinaryArray::try_from_iter([b"aaaa", b"bbbb"].into_iter()).unwrap(),
                ),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .unwrap();

        let err = views.split(&batch).unwrap_err();
        assert!(matches!(err, OrbitError::SchemaMismatch(..)), "{err}");
    }
}
