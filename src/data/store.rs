use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Array, Float64Builder, ListArray, ListBuilder, StringArray,
    StringBuilder, UInt64Array, UInt64Builder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

use crate::error::{StageError, StoreError};

/// Schema metadata tag written into every container.
pub const STORE_FORMAT: &str = "ophys-dff/dataset-store";
pub const STORE_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// Dataset – one named N-d array inside a container
// ---------------------------------------------------------------------------

/// Element storage of a dataset, flattened in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetValues {
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl DatasetValues {
    pub fn len(&self) -> usize {
        match self {
            DatasetValues::Float(v) => v.len(),
            DatasetValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named array with an explicit shape. Zero extents are legal.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: DatasetValues,
}

impl Dataset {
    pub fn float(name: impl Into<String>, shape: Vec<usize>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            shape,
            values: DatasetValues::Float(values),
        }
    }

    pub fn text(name: impl Into<String>, shape: Vec<usize>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            shape,
            values: DatasetValues::Text(values),
        }
    }

    /// Number of elements implied by `shape`; `None` if it overflows.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Extent of the leading axis (0 for a scalar).
    pub fn leading_len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match &self.values {
            DatasetValues::Float(v) => Some(v),
            DatasetValues::Text(_) => None,
        }
    }

    fn check_shape(&self) -> Result<(), StoreError> {
        if self.element_count() != Some(self.values.len()) {
            return Err(StoreError::schema(format!(
                "dataset `{}` declares shape {:?} but holds {} values",
                self.name,
                self.shape,
                self.values.len()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DatasetStore – a container of datasets keyed by name
// ---------------------------------------------------------------------------

/// Key/value dataset container persisted as a single file.
///
/// Supported encodings, picked by extension:
/// * `.parquet` / `.pq` – one row per dataset (recommended)
/// * `.json`            – `{"datasets": [{"name", "shape", "float_values" | "text_values"}]}`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetStore {
    datasets: BTreeMap<String, Dataset>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a dataset, replacing any previous one with the same name.
    pub fn insert(&mut self, dataset: Dataset) {
        self.datasets.insert(dataset.name.clone(), dataset);
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Look up a dataset that must be present in the container read from `path`.
    pub fn require(&self, name: &str, path: &Path) -> Result<&Dataset, StageError> {
        self.get(name).ok_or_else(|| StageError::MissingField {
            path: path.to_path_buf(),
            field: name.to_string(),
        })
    }

    /// Read a container, dispatching on the file extension.
    pub fn read(path: &Path) -> Result<Self, StageError> {
        let result = match Encoding::of(path) {
            Some(Encoding::Parquet) => read_parquet(path),
            Some(Encoding::Json) => read_json(path),
            None => Err(unsupported(path)),
        };
        result.map_err(|e| StageError::read(path, e))
    }

    /// Write the container, truncating any existing file at `path`.
    pub fn write(&self, path: &Path) -> Result<(), StageError> {
        let result = match Encoding::of(path) {
            Some(Encoding::Parquet) => self.write_parquet(path),
            Some(Encoding::Json) => self.write_json(path),
            None => Err(unsupported(path)),
        };
        result.map_err(|e| StageError::write(path, e))
    }

    fn from_datasets(datasets: Vec<Dataset>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for ds in datasets {
            ds.check_shape()?;
            if store.contains(&ds.name) {
                return Err(StoreError::schema(format!("duplicate dataset `{}`", ds.name)));
            }
            store.insert(ds);
        }
        Ok(store)
    }
}

#[derive(Debug, Clone, Copy)]
enum Encoding {
    Parquet,
    Json,
}

impl Encoding {
    fn of(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "parquet" | "pq" => Some(Encoding::Parquet),
            "json" => Some(Encoding::Json),
            _ => None,
        }
    }
}

fn unsupported(path: &Path) -> StoreError {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    StoreError::schema(format!("unsupported container extension: .{ext}"))
}

// ---------------------------------------------------------------------------
// Parquet encoding
// ---------------------------------------------------------------------------

fn store_schema() -> Schema {
    let list_of = |inner: DataType| DataType::List(Arc::new(Field::new("item", inner, true)));
    let metadata = HashMap::from([
        ("format".to_string(), STORE_FORMAT.to_string()),
        ("version".to_string(), STORE_VERSION.to_string()),
    ]);
    Schema::new(vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("shape", list_of(DataType::UInt64), false),
        Field::new("float_values", list_of(DataType::Float64), true),
        Field::new("text_values", list_of(DataType::Utf8), true),
    ])
    .with_metadata(metadata)
}

impl DatasetStore {
    fn write_parquet(&self, path: &Path) -> Result<(), StoreError> {
        let mut names = StringBuilder::new();
        let mut shapes = ListBuilder::new(UInt64Builder::new());
        let mut floats = ListBuilder::new(Float64Builder::new());
        let mut texts = ListBuilder::new(StringBuilder::new());

        for ds in self.datasets.values() {
            ds.check_shape()?;
            names.append_value(&ds.name);

            let dims = shapes.values();
            for &d in &ds.shape {
                dims.append_value(d as u64);
            }
            shapes.append(true);

            match &ds.values {
                DatasetValues::Float(values) => {
                    floats.values().append_slice(values);
                    floats.append(true);
                    texts.append(false);
                }
                DatasetValues::Text(values) => {
                    let inner = texts.values();
                    for v in values {
                        inner.append_value(v);
                    }
                    texts.append(true);
                    floats.append(false);
                }
            }
        }

        let schema = Arc::new(store_schema());
        let columns: Vec<ArrayRef> = vec![
            Arc::new(names.finish()),
            Arc::new(shapes.finish()),
            Arc::new(floats.finish()),
            Arc::new(texts.finish()),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns)?;

        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }
}

fn read_parquet(path: &Path) -> Result<DatasetStore, StoreError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut datasets = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;
        let names = column::<StringArray>(&batch, "name")?;
        let shapes = column::<ListArray>(&batch, "shape")?;
        let floats = column::<ListArray>(&batch, "float_values")?;
        let texts = column::<ListArray>(&batch, "text_values")?;

        for row in 0..batch.num_rows() {
            let name = names.value(row).to_string();
            let shape = extract_u64_list(shapes, row)
                .map_err(|e| StoreError::schema(format!("dataset `{name}`: {e}")))?
                .into_iter()
                .map(|d| d as usize)
                .collect();

            let values = if !floats.is_null(row) {
                DatasetValues::Float(extract_f64_list(floats, row)?)
            } else if !texts.is_null(row) {
                DatasetValues::Text(extract_string_list(texts, row)?)
            } else {
                return Err(StoreError::schema(format!("dataset `{name}` has no values")));
            };

            datasets.push(Dataset {
                name,
                shape,
                values,
            });
        }
    }

    DatasetStore::from_datasets(datasets)
}

// -- Arrow helpers --

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, StoreError> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| StoreError::schema(format!("container missing '{name}' column")))?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| {
            StoreError::schema(format!(
                "column '{name}' has unexpected type {:?}",
                batch.column(idx).data_type()
            ))
        })
}

fn list_values(col: &ListArray, row: usize) -> Result<ArrayRef, StoreError> {
    if col.is_null(row) {
        return Err(StoreError::schema("null value in list column"));
    }
    Ok(col.value(row))
}

fn extract_u64_list(col: &ListArray, row: usize) -> Result<Vec<u64>, StoreError> {
    let values = list_values(col, row)?;
    let arr = values
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| StoreError::schema("shape list is not UInt64"))?;
    Ok(arr.values().to_vec())
}

fn extract_f64_list(col: &ListArray, row: usize) -> Result<Vec<f64>, StoreError> {
    let values = list_values(col, row)?;
    let arr = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| {
            StoreError::schema(format!(
                "float list inner type is {:?}, expected Float64",
                values.data_type()
            ))
        })?;
    Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn extract_string_list(col: &ListArray, row: usize) -> Result<Vec<String>, StoreError> {
    let values = list_values(col, row)?;
    let arr = values
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| StoreError::schema("text list is not Utf8"))?;
    Ok(arr
        .iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

// ---------------------------------------------------------------------------
// JSON encoding
// ---------------------------------------------------------------------------

/// Non-finite floats have no JSON form; they are written as `null` and read
/// back as NaN.
#[derive(Debug, Serialize, Deserialize)]
struct JsonDataset {
    name: String,
    shape: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    float_values: Option<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text_values: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonStore {
    datasets: Vec<JsonDataset>,
}

impl DatasetStore {
    fn write_json(&self, path: &Path) -> Result<(), StoreError> {
        let datasets = self
            .datasets
            .values()
            .map(|ds| {
                ds.check_shape()?;
                let (float_values, text_values) = match &ds.values {
                    DatasetValues::Float(v) => (
                        Some(v.iter().map(|x| x.is_finite().then_some(*x)).collect()),
                        None,
                    ),
                    DatasetValues::Text(v) => (None, Some(v.clone())),
                };
                Ok(JsonDataset {
                    name: ds.name.clone(),
                    shape: ds.shape.clone(),
                    float_values,
                    text_values,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &JsonStore { datasets })?;
        Ok(())
    }
}

fn read_json(path: &Path) -> Result<DatasetStore, StoreError> {
    let text = std::fs::read_to_string(path)?;
    let root: JsonStore = serde_json::from_str(&text)?;

    let datasets = root
        .datasets
        .into_iter()
        .map(|ds| {
            let values = match (ds.float_values, ds.text_values) {
                (Some(v), None) => {
                    DatasetValues::Float(v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect())
                }
                (None, Some(v)) => DatasetValues::Text(v),
                _ => {
                    return Err(StoreError::schema(format!(
                        "dataset `{}` must carry exactly one of float_values/text_values",
                        ds.name
                    )))
                }
            };
            Ok(Dataset {
                name: ds.name,
                shape: ds.shape,
                values,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    DatasetStore::from_datasets(datasets)
}
