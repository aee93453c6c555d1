//! # Dictionary memo
//!
//! Registry of the dictionaries a schema references: which field positions use each
//! id, the value type of each id, and the value array currently in force.
//!
//! Schema and memo are owned separately. Record columns find their dictionary through
//! the position-to-id map instead of the schema holding pointers into the memo.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::enums::DictionaryUpdate;
use crate::error::{IpcError, Result};
use crate::models::types::array_data::ArrayData;
use crate::models::types::concat::concat;
use crate::models::types::datatype::DataType;
use crate::models::types::schema::{FieldPosition, Schema};

#[derive(Debug, Clone, Default)]
pub struct DictionaryMemo {
    types: HashMap<i64, DataType>,
    positions: HashMap<i64, Vec<FieldPosition>>,
    ids_by_position: HashMap<FieldPosition, i64>,
    arrays: HashMap<i64, Arc<ArrayData>>,
}

impl DictionaryMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every dictionary-encoded field of `schema`.
    pub fn from_schema(schema: &Schema) -> Result<Self> {
        let mut memo = Self::new();
        for field in schema.dictionary_fields() {
            memo.register_field(field.position, field.id, field.value_type)?;
        }
        Ok(memo)
    }

    /// Records that `position` is encoded with dictionary `id` holding `value_type`.
    ///
    /// Registering the same pair twice is allowed as long as the value type agrees.
    pub fn register_field(&mut self, position: FieldPosition, id: i64, value_type: &DataType) -> Result<()> {
        if let Some(existing) = self.types.get(&id) {
            if existing != value_type {
                return Err(IpcError::InvalidData(format!(
                    "dictionary {id} registered as {existing} and as {value_type}"
                )));
            }
        }
        if let Some(other) = self.ids_by_position.get(&position) {
            if *other != id {
                return Err(IpcError::InvalidData(format!(
                    "field {:?} is bound to dictionary {other}, not {id}",
                    position.path()
                )));
            }
            return Ok(());
        }
        self.types.insert(id, value_type.clone());
        self.positions.entry(id).or_default().push(position.clone());
        self.ids_by_position.insert(position, id);
        Ok(())
    }

    pub fn get_type(&self, id: i64) -> Option<&DataType> {
        self.types.get(&id)
    }

    pub fn get_array(&self, id: i64) -> Option<&Arc<ArrayData>> {
        self.arrays.get(&id)
    }

    pub fn id_for_position(&self, position: &FieldPosition) -> Option<i64> {
        self.ids_by_position.get(position).copied()
    }

    /// Positions using `id`, in registration order.
    pub fn positions_for_id(&self, id: i64) -> &[FieldPosition] {
        self.positions.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Distinct dictionary ids referenced by the schema.
    pub fn num_dictionaries(&self) -> usize {
        self.types.len()
    }

    /// Ids that currently hold a value array.
    pub fn num_loaded(&self) -> usize {
        self.arrays.len()
    }

    pub fn has_array(&self, id: i64) -> bool {
        self.arrays.contains_key(&id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.types.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Stores the first value array for `id`.
    pub fn apply_new(&mut self, id: i64, array: Arc<ArrayData>) -> Result<()> {
        self.check_type(id, &array)?;
        if self.arrays.contains_key(&id) {
            return Err(IpcError::InvalidData(format!("dictionary {id} is already loaded")));
        }
        debug!(id, len = array.len, "dictionary loaded");
        self.arrays.insert(id, array);
        Ok(())
    }

    /// Replaces the value array for `id`.
    pub fn apply_replace(&mut self, id: i64, array: Arc<ArrayData>) -> Result<()> {
        self.check_type(id, &array)?;
        if !self.arrays.contains_key(&id) {
            return Err(IpcError::MissingDictionary(id));
        }
        debug!(id, len = array.len, "dictionary replaced");
        self.arrays.insert(id, array);
        Ok(())
    }

    /// Appends `delta` to the value array for `id`.
    pub fn apply_delta(&mut self, id: i64, delta: &ArrayData) -> Result<()> {
        self.check_type(id, delta)?;
        let current = self.arrays.get(&id).ok_or(IpcError::MissingDictionary(id))?;
        let merged = concat(current, delta)?;
        debug!(id, delta_len = delta.len, len = merged.len, "dictionary delta applied");
        self.arrays.insert(id, Arc::new(merged));
        Ok(())
    }

    /// Applies a dictionary batch, choosing new, replace or delta.
    pub fn apply(&mut self, id: i64, array: ArrayData, is_delta: bool) -> Result<DictionaryUpdate> {
        if is_delta {
            self.apply_delta(id, &array)?;
            Ok(DictionaryUpdate::Delta)
        } else if self.has_array(id) {
            self.apply_replace(id, Arc::new(array))?;
            Ok(DictionaryUpdate::Replaced)
        } else {
            self.apply_new(id, Arc::new(array))?;
            Ok(DictionaryUpdate::New)
        }
    }

    fn check_type(&self, id: i64, array: &ArrayData) -> Result<()> {
        match self.types.get(&id) {
            None => Err(IpcError::InvalidData(format!(
                "dictionary batch for id {id}, which no schema field references"
            ))),
            Some(dt) if *dt != array.data_type => Err(IpcError::InvalidData(format!(
                "dictionary {id} expects {dt}, got {}",
                array.data_type
            ))),
            Some(_) => Ok(()),
        }
    }
}
