use crate::{Result, Value};
use std::{borrow::Cow, fmt::Debug, sync::Arc};

/// How a field is stored relative to its row.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Regular column.
    #[default]
    Plain,
    /// Flattened member of a sub-object, behaves as a plain column.
    Flat,
    /// Collection stored in a detail table, no SQL column in the parent.
    Detail,
    /// Single column payload passed through the column codec.
    Xml,
    Json,
    Compressed,
}

impl StorageMode {
    pub fn is_payload(&self) -> bool {
        matches!(
            self,
            StorageMode::Xml | StorageMode::Json | StorageMode::Compressed
        )
    }
}

/// Serializer for `Xml`, `Json` and `Compressed` columns.
///
/// `encode` receives the entity value and returns what is sent to the database,
/// `decode` does the inverse on read.
pub trait PayloadCodec: Debug + Send + Sync {
    fn encode(&self, value: Value) -> Result<Value>;
    fn decode(&self, value: Value) -> Result<Value>;
}

/// Metadata of one mapped field.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Entity field name.
    pub field: Cow<'static, str>,
    /// SQL column name.
    pub name: Cow<'static, str>,
    /// Position in the entity column table, assigned by the metadata builder.
    pub ordinal: usize,
    /// Wire type prototype.
    pub value: Value,
    pub size: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub nullable: bool,
    pub default: Option<Value>,
    pub key: bool,
    pub auto_increment: bool,
    pub concurrency_token: bool,
    /// Populated by the server (identity, computed, row version).
    pub generated: bool,
    pub insert: bool,
    pub update: bool,
    pub select: bool,
    /// Partial load bit, `0` means always loaded.
    pub partial: u64,
    pub storage: StorageMode,
    pub codec: Option<Arc<dyn PayloadCodec>>,
}

impl ColumnDef {
    pub fn new(field: impl Into<Cow<'static, str>>, value: Value) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            field,
            ordinal: 0,
            value: value.as_null(),
            size: None,
            precision: None,
            scale: None,
            nullable: false,
            default: None,
            key: false,
            auto_increment: false,
            concurrency_token: false,
            generated: false,
            insert: true,
            update: true,
            select: true,
            partial: 0,
            storage: StorageMode::Plain,
            codec: None,
        }
    }
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }
    pub fn key(mut self) -> Self {
        self.key = true;
        self.update = false;
        self
    }
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.generated = true;
        self.insert = false;
        self.update = false;
        self
    }
    pub fn concurrency_token(mut self) -> Self {
        self.concurrency_token = true;
        self
    }
    /// Value maintained by the server, never written by the engine.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self.insert = false;
        self.update = false;
        self
    }
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }
    pub fn precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        if let Value::Decimal(v, ..) = self.value {
            self.value = Value::Decimal(v, precision, scale);
        }
        self
    }
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
    pub fn read_only(mut self) -> Self {
        self.insert = false;
        self.update = false;
        self
    }
    pub fn no_update(mut self) -> Self {
        self.update = false;
        self
    }
    pub fn write_only(mut self) -> Self {
        self.select = false;
        self
    }
    pub fn partial(mut self, bit: u64) -> Self {
        self.partial = bit;
        self
    }
    pub fn storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        if storage == StorageMode::Detail {
            self.value = Value::Null;
            self.insert = false;
            self.update = false;
        }
        self
    }
    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn is_detail(&self) -> bool {
        self.storage == StorageMode::Detail
    }
    /// A concurrency token whose value the engine maintains itself.
    pub fn is_engine_token(&self) -> bool {
        self.concurrency_token && !self.generated
    }
    /// Whether the column is loaded by a select using `mask`.
    pub fn is_loaded(&self, mask: u64) -> bool {
        self.partial == 0 || self.partial & mask != 0
    }

    /// Value sent to the database.
    pub fn encode(&self, value: Value) -> Result<Value> {
        match &self.codec {
            Some(codec) if self.storage.is_payload() => codec.encode(value),
            _ => Ok(value),
        }
    }
    /// Value handed back to the entity.
    pub fn decode(&self, value: Value) -> Result<Value> {
        match &self.codec {
            Some(codec) if self.storage.is_payload() => codec.decode(value),
            _ => Ok(value),
        }
    }
}
