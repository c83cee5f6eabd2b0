use std::sync::Arc;

use arrow_array::{FixedSizeBinaryArray, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use object_store::memory::InMemory;
use orbit_error::OrbitError;
use orbit_io::{FileSystem, ObjectStoreFileSystem, Path};

use crate::{FileReader, FileReaderOptions, FileWriter, FileWriterOptions, WrittenFile};

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("vec", DataType::FixedSizeBinary(4), false),
    ]))
}

fn batch(ids: &[i64]) -> RecordBatch {
    let names: Vec<String> = ids.iter().map(|id| format!("row-{id}")).collect();
    let vectors: Vec<[u8; 4]> = ids.iter().map(|id| (*id as u32).to_le_bytes()).collect();
    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(StringArray::from(names)),
            Arc::new(FixedSizeBinaryArray::try_from_iter(vectors.into_iter()).unwrap()),
        ],
    )
    .unwrap()
}

fn memory_fs() -> ObjectStoreFileSystem {
    ObjectStoreFileSystem::new(Arc::new(InMemory::new()))
}

#[tokio::test]
async fn write_then_read() {
    let fs = memory_fs();
    let path = Path::from("scalar/0.parquet");

    let mut writer = FileWriter::try_new(&fs, path.clone(), schema(), &FileWriterOptions::default())
        .await
        .unwrap();
    writer.write(&batch(&[1, 2, 3])).await.unwrap();
    writer.write(&batch(&[4, 5])).await.unwrap();
    assert_eq!(writer.count(), 5);
    assert!(!fs.exists(&path).await.unwrap());

    let written = writer.close().await.unwrap();
    assert_eq!(written, WrittenFile { path: path.clone(), rows: 5 });

    let reader = FileReader::try_open(&fs, &path, FileReaderOptions::default())
        .await
        .unwrap();
    assert_eq!(reader.num_rows(), 5);
    assert_eq!(reader.schema().fields(), schema().fields());

    let batches: Vec<RecordBatch> = reader.collect::<Result<_, _>>().unwrap();
    let ids: Vec<i64> = batches
        .iter()
        .flat_map(|b| {
            b.column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap()
                .values()
                .to_vec()
        })
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn projection_and_batch_size() {
    let fs = memory_fs();
    let path = Path::from("p.parquet");

    let mut writer = FileWriter::try_new(&fs, path.clone(), schema(), &FileWriterOptions::default())
        .await
        .unwrap();
    writer.write(&batch(&[1, 2, 3, 4, 5])).await.unwrap();
    writer.close().await.unwrap();

    let mut reader = FileReader::try_open(
        &fs,
        &path,
        FileReaderOptions::default()
            .with_projection(["vec", "id"])
            .with_batch_size(2),
    )
    .await
    .unwrap();

    // projected columns keep file order
    let names: Vec<&str> = reader
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .collect();
    assert_eq!(names, vec!["id", "vec"]);

    let mut sizes = vec![];
    while let Some(batch) = reader.next_batch().unwrap() {
        sizes.push(batch.num_rows());
    }
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn unknown_projection_column() {
    let fs = memory_fs();
    let path = Path::from("p.parquet");
    let mut writer = FileWriter::try_new(&fs, path.clone(), schema(), &FileWriterOptions::default())
        .await
        .unwrap();
    writer.write(&batch(&[1])).await.unwrap();
    writer.close().await.unwrap();

    let result = FileReader::try_open(
        &fs,
        &path,
        FileReaderOptions::default().with_projection(["missing"]),
    )
    .await;
    assert!(matches!(result, Err(OrbitError::ArrowError(_))));
}

#[tokio::test]
async fn mismatched_batch_is_rejected() {
    let fs = memory_fs();
    let other = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
    let mut writer = FileWriter::try_new(&fs, Path::from("x.parquet"), other, &FileWriterOptions::default())
        .await
        .unwrap();

    let err = writer.write(&batch(&[1])).await.unwrap_err();
    assert!(matches!(err, OrbitError::SchemaMismatch(..)));
    assert_eq!(writer.count(), 0);
}

#[tokio::test]
async fn aborted_writer_publishes_nothing() {
    let fs = memory_fs();
    let path = Path::from("gone.parquet");
    let mut writer = FileWriter::try_new(&fs, path.clone(), schema(), &FileWriterOptions::default())
        .await
        .unwrap();
    writer.write(&batch(&[1, 2])).await.unwrap();
    writer.abort().await.unwrap();

    assert!(!fs.exists(&path).await.unwrap());
}
