//! Saving and loading checkpoint [Dictionary]s as `.safetensors` files.
//!
//! Every [NDArray] in the dictionary becomes one tensor of the file; the rest
//! of the dictionary is stored as JSON under the `stepwise.dictionary`
//! metadata key, with each array replaced by the name of its tensor.
//!
//! ```rust
//! # use stepwise::prelude::*;
//! let w = Parameter::new("w", Tensor::<f32>::zeros([3], Device::Cpu));
//! let config = LearnerConfig::from_json(
//!     r#"{ "type": "momentum_sgd", "learningRate": { "values": [0.1] }, "momentum": { "values": [0.9] } }"#,
//! )
//! .unwrap();
//! let learner = config.build(vec![w]).unwrap();
//!
//! let dir = std::env::temp_dir().join("stepwise-checkpoint-doc.safetensors");
//! save_checkpoint(&learner.create_checkpoint(), &dir).unwrap();
//! assert_eq!(load_checkpoint(&dir).unwrap(), learner.create_checkpoint());
//! # std::fs::remove_file(&dir).ok();
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use memmap2::MmapOptions;
use safetensors::{
    serialize_to_file,
    tensor::{Dtype as SDtype, SafeTensors, TensorView},
};
use serde::{Deserialize, Serialize};
use stepwise_core::{
    dictionary::{Dictionary, DictionaryValue},
    dtypes::DataType,
    tensor::{Device, NDArray},
    Error, Result,
};

const METADATA_KEY: &str = "stepwise.dictionary";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
enum StoredValue {
    Bool(bool),
    SizeT(u64),
    Double(f64),
    String(String),
    Vector(Vec<StoredValue>),
    Dictionary(BTreeMap<String, StoredValue>),
    #[serde(rename = "ndarray")]
    NDArray { tensor: String, device: String },
}

struct TensorData {
    dtype: SDtype,
    shape: Vec<usize>,
    data: Vec<u8>,
}

#[derive(Default)]
struct Writer {
    tensors: BTreeMap<String, TensorData>,
}

impl Writer {
    fn add(&mut self, array: &NDArray) -> String {
        let name = format!("t{}", self.tensors.len());
        let dtype = array.data_type().safetensors_dtype();
        let shape = array.shape().dims().to_vec();
        let data = array.to_le_bytes();
        self.tensors.insert(name.clone(), TensorData { dtype, shape, data });
        name
    }

    fn store(&mut self, key: &str, value: &DictionaryValue) -> Result<StoredValue> {
        Ok(match value {
            DictionaryValue::Bool(b) => StoredValue::Bool(*b),
            DictionaryValue::SizeT(v) => StoredValue::SizeT(*v),
            DictionaryValue::Double(v) => {
                if !v.is_finite() {
                    return Err(Error::InvalidArgument(format!(
                        "checkpoint entry '{key}' holds the non-finite value {v}"
                    )));
                }
                StoredValue::Double(*v)
            }
            DictionaryValue::String(s) => StoredValue::String(s.clone()),
            DictionaryValue::Vector(items) => StoredValue::Vector(
                items
                    .iter()
                    .map(|item| self.store(key, item))
                    .collect::<Result<_>>()?,
            ),
            DictionaryValue::Dictionary(dict) => StoredValue::Dictionary(self.store_all(dict)?),
            DictionaryValue::NDArray(array) => StoredValue::NDArray {
                tensor: self.add(array),
                device: array.device().to_string(),
            },
        })
    }

    fn store_all(&mut self, dict: &Dictionary) -> Result<BTreeMap<String, StoredValue>> {
        dict.iter()
            .map(|(k, v)| Ok((k.clone(), self.store(k, v)?)))
            .collect()
    }

    fn save(&self, metadata: String, path: &Path) -> Result<()> {
        let views = self
            .tensors
            .iter()
            .map(|(k, t)| Ok((k.clone(), TensorView::new(t.dtype, t.shape.clone(), &t.data)?)))
            .collect::<Result<BTreeMap<String, TensorView>>>()?;
        let metadata = Some(HashMap::from([(METADATA_KEY.to_string(), metadata)]));
        serialize_to_file(&views, &metadata, path)?;
        Ok(())
    }
}

/// Writes `checkpoint` to the `.safetensors` file at `path`.
pub fn save_checkpoint<P: AsRef<Path>>(checkpoint: &Dictionary, path: P) -> Result<()> {
    let mut writer = Writer::default();
    let stored = writer.store_all(checkpoint)?;
    let metadata = serde_json::to_string(&stored)?;
    writer.save(metadata, path.as_ref())?;
    tracing::debug!(
        path = %path.as_ref().display(),
        tensors = writer.tensors.len(),
        "saved checkpoint"
    );
    Ok(())
}

fn restore(tensors: &SafeTensors, value: StoredValue) -> Result<DictionaryValue> {
    Ok(match value {
        StoredValue::Bool(b) => DictionaryValue::Bool(b),
        StoredValue::SizeT(v) => DictionaryValue::SizeT(v),
        StoredValue::Double(v) => DictionaryValue::Double(v),
        StoredValue::String(s) => DictionaryValue::String(s),
        StoredValue::Vector(items) => DictionaryValue::Vector(
            items
                .into_iter()
                .map(|item| restore(tensors, item))
                .collect::<Result<_>>()?,
        ),
        StoredValue::Dictionary(entries) => DictionaryValue::Dictionary(restore_all(tensors, entries)?),
        StoredValue::NDArray { tensor, device } => {
            let view = tensors.tensor(&tensor)?;
            let data_type = DataType::from_safetensors_dtype(view.dtype()).ok_or_else(|| {
                Error::CheckpointMismatch {
                    reason: format!("tensor '{tensor}' has unsupported element type {:?}", view.dtype()),
                }
            })?;
            let device = Device::parse(&device).ok_or_else(|| Error::CheckpointMismatch {
                reason: format!("tensor '{tensor}' names unknown device '{device}'"),
            })?;
            DictionaryValue::NDArray(NDArray::from_le_bytes(
                data_type,
                view.shape().to_vec(),
                view.data(),
                device,
            )?)
        }
    })
}

fn restore_all(tensors: &SafeTensors, entries: BTreeMap<String, StoredValue>) -> Result<Dictionary> {
    entries
        .into_iter()
        .map(|(k, v)| Ok((k, restore(tensors, v)?)))
        .collect()
}

/// Reads a checkpoint written by [save_checkpoint].
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Dictionary> {
    let f = std::fs::File::open(path.as_ref())?;
    let buffer = unsafe { MmapOptions::new().map(&f)? };

    let (_, metadata) = SafeTensors::read_metadata(&buffer)?;
    let json = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(METADATA_KEY))
        .ok_or_else(|| Error::MissingCheckpointKey {
            key: METADATA_KEY.to_string(),
        })?;
    let entries: BTreeMap<String, StoredValue> = serde_json::from_str(json)?;

    let tensors = SafeTensors::deserialize(&buffer)?;
    let checkpoint = restore_all(&tensors, entries)?;
    tracing::debug!(path = %path.as_ref().display(), entries = checkpoint.len(), "loaded checkpoint");
    Ok(checkpoint)
}
