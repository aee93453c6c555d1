//! # Array data
//!
//! The decoded unit handed to callers: a tagged `{type, len, null_count, offset, buffers,
//! children}` record, plus the dictionary values for dictionary-encoded arrays.
//!
//! Buffers are reference-counted slices over 64-byte aligned [`Vec64`] allocations, so
//! decoding a message body hands out views of the same allocation rather than copies.
//!
//! ## Buffer slots
//! | Type | Slots |
//! | --- | --- |
//! | null, run-end encoded | none |
//! | fixed width, boolean | validity, values |
//! | binary / utf8 (+ large) | validity, offsets, values |
//! | binary / utf8 view | validity, views, data buffers... |
//! | list / large list / map | validity, offsets |
//! | list view (+ large) | validity, offsets, sizes |
//! | fixed size list, struct | validity |
//! | sparse union | type ids |
//! | dense union | type ids, offsets |
//! | dictionary | validity, indices |
//!
//! An absent validity bitmap is stored as `None` and means every slot is valid.

use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use minarrow::Vec64;

use crate::error::{IpcError, Result};
use crate::models::types::datatype::{DataType, NativeType, UnionMode};
use crate::models::types::schema::Field;
use crate::utils::{bytes_for_bits, count_unset_bits, get_bit, pack_bits};

/// Length of one binary/utf8 view descriptor.
pub const VIEW_LEN: usize = 16;
/// Longest value stored inline in a view descriptor.
pub const MAX_INLINE_VIEW_LEN: usize = 12;

// ------------------------------------------------------------------------------------ //
// Buffer
// ------------------------------------------------------------------------------------ //

/// Shared, immutable byte region.
///
/// Cloning and slicing only bump a reference count.
#[derive(Clone)]
pub struct Buffer {
    data: Arc<Vec64<u8>>,
    offset: usize,
    len: usize,
}

impl Buffer {
    pub fn from_vec64(data: Vec64<u8>) -> Self {
        let len = data.0.len();
        Self {
            data: Arc::new(data),
            offset: 0,
            len,
        }
    }

    /// Copies `bytes` into a fresh 64-byte aligned allocation.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::from_vec64(Vec64::from_slice(bytes))
    }

    /// Copies native-endian element bytes into a new buffer.
    pub fn from_values<T: bytemuck::Pod>(values: &[T]) -> Self {
        Self::from_slice(bytemuck::cast_slice(values))
    }

    pub fn empty() -> Self {
        Self::from_vec64(Vec64::default())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data.0[self.offset..self.offset + self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zero-copy sub-range, or `None` when it runs past the end.
    pub fn slice(&self, offset: usize, len: usize) -> Option<Buffer> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(Self {
            data: Arc::clone(&self.data),
            offset: self.offset + offset,
            len,
        })
    }

    /// Views the bytes as `T`, copying only if the region is misaligned for `T`.
    pub fn typed<T: bytemuck::Pod>(&self) -> Cow<'_, [T]> {
        match bytemuck::try_cast_slice(self.as_slice()) {
            Ok(values) => Cow::Borrowed(values),
            Err(_) => Cow::Owned(bytemuck::pod_collect_to_vec(self.as_slice())),
        }
    }

    /// True when both buffers view the same bytes of the same allocation.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data) && self.offset == other.offset && self.len == other.len
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.as_slice()[..self.len.min(16)];
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("head", &head)
            .finish()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(v: Vec<u8>) -> Self {
        Buffer::from_slice(&v)
    }
}

// ------------------------------------------------------------------------------------ //
// Layout
// ------------------------------------------------------------------------------------ //

/// Physical shape of a logical type: what its buffer slots and children hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Null,
    Boolean,
    /// Fixed-width elements of the given byte width.
    FixedWidth(usize),
    /// Offsets of the given width into a values buffer.
    VarBinary { offset_width: usize },
    View,
    List { offset_width: usize },
    ListView { offset_width: usize },
    FixedSizeList(usize),
    Struct,
    Union(UnionMode),
    RunEndEncoded,
    /// Integer indices of the given byte width into a dictionary.
    Dictionary { index_width: usize },
}

impl Layout {
    pub fn of(data_type: &DataType) -> Result<Layout> {
        use DataType::*;
        let dt = data_type.storage_type();
        Ok(match dt {
            Null => Layout::Null,
            Boolean => Layout::Boolean,
            Binary | Utf8 => Layout::VarBinary { offset_width: 4 },
            LargeBinary | LargeUtf8 => Layout::VarBinary { offset_width: 8 },
            BinaryView | Utf8View => Layout::View,
            List(_) | Map(..) => Layout::List { offset_width: 4 },
            LargeList(_) => Layout::List { offset_width: 8 },
            ListView(_) => Layout::ListView { offset_width: 4 },
            LargeListView(_) => Layout::ListView { offset_width: 8 },
            FixedSizeList(_, n) => Layout::FixedSizeList(non_negative(*n, "list size")?),
            Struct(_) => Layout::Struct,
            Union(_, _, mode) => Layout::Union(*mode),
            RunEndEncoded(..) => Layout::RunEndEncoded,
            Dictionary { index, .. } => {
                if !index.is_integer() {
                    return Err(IpcError::InvalidData(format!(
                        "dictionary index type must be an integer, found {index}"
                    )));
                }
                Layout::Dictionary {
                    index_width: index.primitive_width().unwrap_or(0),
                }
            }
            FixedSizeBinary(w) => Layout::FixedWidth(non_negative(*w, "fixed size binary width")?),
            Extension { .. } => unreachable!("storage_type strips extensions"),
            other => match other.primitive_width() {
                Some(w) => Layout::FixedWidth(w),
                None => return Err(IpcError::UnknownType(other.to_string())),
            },
        })
    }

    /// Number of in-memory buffer slots, excluding variadic view data buffers.
    pub fn fixed_slots(self) -> usize {
        match self {
            Layout::Null | Layout::RunEndEncoded => 0,
            Layout::FixedSizeList(_) | Layout::Struct | Layout::Union(UnionMode::Sparse) => 1,
            Layout::Boolean
            | Layout::FixedWidth(_)
            | Layout::View
            | Layout::List { .. }
            | Layout::Union(UnionMode::Dense)
            | Layout::Dictionary { .. } => 2,
            Layout::VarBinary { .. } | Layout::ListView { .. } => 3,
        }
    }
}

fn non_negative(v: i32, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| IpcError::InvalidData(format!("negative {what}: {v}")))
}

// ------------------------------------------------------------------------------------ //
// ArrayData
// ------------------------------------------------------------------------------------ //

/// A decoded (or caller-built) Arrow array.
#[derive(Debug, Clone)]
pub struct ArrayData {
    pub data_type: DataType,
    pub len: usize,
    pub null_count: usize,
    /// Logical start within the buffers and children.
    pub offset: usize,
    pub buffers: Vec<Option<Buffer>>,
    pub children: Vec<ArrayData>,
    /// Dictionary values for dictionary-encoded arrays.
    pub dictionary: Option<Arc<ArrayData>>,
}

impl ArrayData {
    /// Builds and validates an array from its parts. The null count is derived.
    pub fn try_new(
        data_type: DataType,
        len: usize,
        buffers: Vec<Option<Buffer>>,
        children: Vec<ArrayData>,
        dictionary: Option<Arc<ArrayData>>,
    ) -> Result<Self> {
        let mut arr = Self {
            data_type,
            len,
            null_count: 0,
            offset: 0,
            buffers,
            children,
            dictionary,
        };
        arr.validate()?;
        arr.null_count = arr.compute_null_count();
        Ok(arr)
    }

    /// An all-null array of type `Null`.
    pub fn new_null(len: usize) -> Self {
        Self {
            data_type: DataType::Null,
            len,
            null_count: len,
            offset: 0,
            buffers: Vec::new(),
            children: Vec::new(),
            dictionary: None,
        }
    }

    /// Non-null primitive array with the canonical type of `T`.
    pub fn from_primitive<T: NativeType>(values: &[T]) -> Self {
        Self::primitive_with_type(T::DATA_TYPE, values, None)
    }

    /// Nullable primitive array; `None` slots are zeroed and marked invalid.
    pub fn from_options<T: NativeType>(values: &[Option<T>]) -> Self {
        let data: Vec<T> = values.iter().map(|v| v.unwrap_or_else(T::zeroed)).collect();
        let validity = validity_from(values.iter().map(Option::is_some), values.len());
        Self::primitive_with_type(T::DATA_TYPE, &data, validity)
    }

    /// Primitive array tagged with an explicit type (timestamps, decimals, intervals, ...).
    pub fn primitive_with_type<T: bytemuck::Pod>(
        data_type: DataType,
        values: &[T],
        validity: Option<Buffer>,
    ) -> Self {
        let mut arr = Self {
            data_type,
            len: values.len(),
            null_count: 0,
            offset: 0,
            buffers: vec![validity, Some(Buffer::from_values(values))],
            children: Vec::new(),
            dictionary: None,
        };
        arr.null_count = arr.compute_null_count();
        arr
    }

    pub fn from_bools(values: &[Option<bool>]) -> Self {
        let bits = pack_bits(values.iter().map(|v| v.unwrap_or(false)), values.len());
        let validity = validity_from(values.iter().map(Option::is_some), values.len());
        let mut arr = Self {
            data_type: DataType::Boolean,
            len: values.len(),
            null_count: 0,
            offset: 0,
            buffers: vec![validity, Some(Buffer::from(bits))],
            children: Vec::new(),
            dictionary: None,
        };
        arr.null_count = arr.compute_null_count();
        arr
    }

    /// Non-null `Utf8` array.
    pub fn from_strs<S: AsRef<str>>(values: &[S]) -> Self {
        Self::var_width(
            DataType::Utf8,
            values.iter().map(|s| Some(s.as_ref().as_bytes())),
            values.len(),
        )
    }

    /// Nullable `Utf8` array.
    pub fn from_str_options(values: &[Option<&str>]) -> Self {
        Self::var_width(
            DataType::Utf8,
            values.iter().map(|s| s.map(str::as_bytes)),
            values.len(),
        )
    }

    /// Nullable `LargeUtf8` array.
    pub fn from_large_str_options(values: &[Option<&str>]) -> Self {
        Self::var_width(
            DataType::LargeUtf8,
            values.iter().map(|s| s.map(str::as_bytes)),
            values.len(),
        )
    }

    /// Nullable `Binary` array.
    pub fn from_binary(values: &[Option<&[u8]>]) -> Self {
        Self::var_width(DataType::Binary, values.iter().copied(), values.len())
    }

    fn var_width<'a>(
        data_type: DataType,
        values: impl Iterator<Item = Option<&'a [u8]>> + Clone,
        len: usize,
    ) -> Self {
        let large = matches!(data_type, DataType::LargeUtf8 | DataType::LargeBinary);
        let validity = validity_from(values.clone().map(|v| v.is_some()), len);
        let mut data = Vec::new();
        let mut offsets32 = Vec::with_capacity(if large { 0 } else { len + 1 });
        let mut offsets64 = Vec::with_capacity(if large { len + 1 } else { 0 });
        offsets32.push(0i32);
        offsets64.push(0i64);
        for v in values {
            data.extend_from_slice(v.unwrap_or_default());
            offsets32.push(data.len() as i32);
            offsets64.push(data.len() as i64);
        }
        let offsets = if large {
            Buffer::from_values(&offsets64)
        } else {
            Buffer::from_values(&offsets32)
        };
        let mut arr = Self {
            data_type,
            len,
            null_count: 0,
            offset: 0,
            buffers: vec![validity, Some(offsets), Some(Buffer::from(data))],
            children: Vec::new(),
            dictionary: None,
        };
        arr.null_count = arr.compute_null_count();
        arr
    }

    /// Nullable `Utf8View` array; values longer than 12 bytes go to one data buffer.
    pub fn from_string_views(values: &[Option<&str>]) -> Self {
        let validity = validity_from(values.iter().map(Option::is_some), values.len());
        let mut views = Vec::with_capacity(values.len() * VIEW_LEN);
        let mut data = Vec::new();
        for v in values {
            let bytes = v.map(str::as_bytes).unwrap_or_default();
            let mut view = [0u8; VIEW_LEN];
            view[..4].copy_from_slice(&(bytes.len() as i32).to_ne_bytes());
            if bytes.len() <= MAX_INLINE_VIEW_LEN {
                view[4..4 + bytes.len()].copy_from_slice(bytes);
            } else {
                view[4..8].copy_from_slice(&bytes[..4]);
                view[8..12].copy_from_slice(&0i32.to_ne_bytes());
                view[12..16].copy_from_slice(&(data.len() as i32).to_ne_bytes());
                data.extend_from_slice(bytes);
            }
            views.extend_from_slice(&view);
        }
        let mut buffers = vec![validity, Some(Buffer::from(views))];
        if !data.is_empty() {
            buffers.push(Some(Buffer::from(data)));
        }
        let mut arr = Self {
            data_type: DataType::Utf8View,
            len: values.len(),
            null_count: 0,
            offset: 0,
            buffers,
            children: Vec::new(),
            dictionary: None,
        };
        arr.null_count = arr.compute_null_count();
        arr
    }

    /// `List<item>` from 32-bit offsets into `values`.
    pub fn list(
        item: Field,
        offsets: &[i32],
        values: ArrayData,
        validity: Option<&[bool]>,
    ) -> Result<Self> {
        let len = offsets.len().saturating_sub(1);
        let validity = validity.and_then(|v| validity_from(v.iter().copied(), len));
        Self::try_new(
            DataType::List(Box::new(item)),
            len,
            vec![validity, Some(Buffer::from_values(offsets))],
            vec![values],
            None,
        )
    }

    /// `LargeList<item>` from 64-bit offsets into `values`.
    pub fn large_list(
        item: Field,
        offsets: &[i64],
        values: ArrayData,
        validity: Option<&[bool]>,
    ) -> Result<Self> {
        let len = offsets.len().saturating_sub(1);
        let validity = validity.and_then(|v| validity_from(v.iter().copied(), len));
        Self::try_new(
            DataType::LargeList(Box::new(item)),
            len,
            vec![validity, Some(Buffer::from_values(offsets))],
            vec![values],
            None,
        )
    }

    /// Struct array over equally long children.
    pub fn struct_array(
        fields: Vec<Field>,
        children: Vec<ArrayData>,
        validity: Option<&[bool]>,
    ) -> Result<Self> {
        let len = children.first().map(|c| c.len).unwrap_or(0);
        let validity = validity.and_then(|v| validity_from(v.iter().copied(), len));
        Self::try_new(DataType::Struct(fields), len, vec![validity], children, None)
    }

    /// Dictionary array from integer `indices` into `values`.
    pub fn dictionary_array(id: i64, indices: ArrayData, values: Arc<ArrayData>) -> Result<Self> {
        if !indices.data_type.is_integer() {
            return Err(IpcError::InvalidArgument(format!(
                "dictionary indices must be integers, found {}",
                indices.data_type
            )));
        }
        let data_type = DataType::Dictionary {
            id,
            index: Box::new(indices.data_type.clone()),
            value: Box::new(values.data_type.clone()),
            ordered: false,
        };
        let mut arr = Self {
            data_type,
            len: indices.len,
            null_count: indices.null_count,
            offset: indices.offset,
            buffers: indices.buffers,
            children: Vec::new(),
            dictionary: Some(values),
        };
        arr.validate()?;
        arr.null_count = arr.compute_null_count();
        Ok(arr)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zero-copy logical slice. Children are shared; the offset applies through them.
    ///
    /// # Panics
    /// When `offset + len` exceeds the array length.
    pub fn slice(&self, offset: usize, len: usize) -> ArrayData {
        assert!(
            offset + len <= self.len,
            "slice [{offset}, {}) out of bounds for length {}",
            offset + len,
            self.len
        );
        let mut out = self.clone();
        out.offset = self.offset + offset;
        out.len = len;
        out.null_count = out.compute_null_count();
        out
    }

    /// Validity bitmap, if this type has one and it is present.
    pub fn validity(&self) -> Option<&Buffer> {
        if self.data_type.has_validity_slot() {
            self.buffers.first().and_then(Option::as_ref)
        } else {
            None
        }
    }

    /// Buffer in slot `i`, if present.
    pub fn buffer(&self, i: usize) -> Option<&Buffer> {
        self.buffers.get(i).and_then(Option::as_ref)
    }

    pub(crate) fn compute_null_count(&self) -> usize {
        match self.data_type.storage_type() {
            DataType::Null => self.len,
            DataType::Union(..) | DataType::RunEndEncoded(..) => 0,
            _ => match self.validity() {
                Some(v) => count_unset_bits(v, self.offset, self.len),
                None => 0,
            },
        }
    }

    /// Whether logical slot `i` holds a value.
    pub fn is_valid(&self, i: usize) -> bool {
        match self.data_type.storage_type() {
            DataType::Null => false,
            DataType::Union(..) => true,
            DataType::RunEndEncoded(..) => {
                let p = self.run_index(i);
                self.children.get(1).is_some_and(|values| values.is_valid(p))
            }
            _ => match self.validity() {
                Some(v) => get_bit(v, self.offset + i),
                None => true,
            },
        }
    }

    pub fn is_null(&self, i: usize) -> bool {
        !self.is_valid(i)
    }

    /// Values of a fixed-width array (or dictionary indices) as `T`, honouring the offset.
    ///
    /// `T` must match the element width of the type.
    pub fn values<T: bytemuck::Pod>(&self) -> Cow<'_, [T]> {
        let width = std::mem::size_of::<T>();
        let range = self.offset * width..(self.offset + self.len) * width;
        let Some(bytes) = self.buffer(1).and_then(|b| b.get(range)) else {
            return Cow::Owned(Vec::new());
        };
        match bytemuck::try_cast_slice(bytes) {
            Ok(values) => Cow::Borrowed(values),
            Err(_) => Cow::Owned(bytemuck::pod_collect_to_vec(bytes)),
        }
    }

    /// Boolean values, with nulls reported as `None`.
    pub fn bool_values(&self) -> Vec<Option<bool>> {
        (0..self.len)
            .map(|i| self.is_valid(i).then(|| self.bool_at(i)))
            .collect()
    }

    /// String values of utf8, binary and view arrays, resolving dictionaries.
    ///
    /// Binary payloads are decoded lossily.
    pub fn string_values(&self) -> Vec<Option<String>> {
        if let (DataType::Dictionary { .. }, Some(dict)) = (self.data_type.storage_type(), &self.dictionary) {
            let resolved = dict.string_values();
            return (0..self.len)
                .map(|i| {
                    if !self.is_valid(i) {
                        return None;
                    }
                    self.index_at(i).and_then(|k| resolved.get(k).cloned().flatten())
                })
                .collect();
        }
        (0..self.len)
            .map(|i| {
                self.is_valid(i)
                    .then(|| String::from_utf8_lossy(self.value_bytes(i)).into_owned())
            })
            .collect()
    }

    #[inline]
    pub(crate) fn bool_at(&self, i: usize) -> bool {
        self.buffer(1).is_some_and(|b| get_bit(b, self.offset + i))
    }

    /// Raw bytes of element `i` for fixed-width, variable-width and view arrays.
    pub fn value_bytes(&self, i: usize) -> &[u8] {
        let p = self.offset + i;
        let Ok(layout) = Layout::of(&self.data_type) else {
            return &[];
        };
        match layout {
            Layout::FixedWidth(w) => self
                .buffer(1)
                .and_then(|b| b.get(p * w..(p + 1) * w))
                .unwrap_or_default(),
            Layout::VarBinary { offset_width } => {
                let (Some(offsets), Some(values)) = (self.buffer(1), self.buffer(2)) else {
                    return &[];
                };
                let start = read_offset(offsets, p, offset_width);
                let end = read_offset(offsets, p + 1, offset_width);
                values.get(start..end).unwrap_or_default()
            }
            Layout::View => self.view_bytes(p),
            _ => &[],
        }
    }

    fn view_bytes(&self, p: usize) -> &[u8] {
        let Some(view) = self.buffer(1).and_then(|b| b.get(p * VIEW_LEN..(p + 1) * VIEW_LEN)) else {
            return &[];
        };
        let len = read_i32(view, 0).max(0) as usize;
        if len <= MAX_INLINE_VIEW_LEN {
            return &view[4..4 + len];
        }
        let buf_index = read_i32(view, 2).max(0) as usize;
        let start = read_i32(view, 3).max(0) as usize;
        self.buffer(2 + buf_index)
            .and_then(|b| b.get(start..start + len))
            .unwrap_or_default()
    }

    /// Dictionary index of slot `i`, or `None` if negative.
    pub fn index_at(&self, i: usize) -> Option<usize> {
        let DataType::Dictionary { index, .. } = self.data_type.storage_type() else {
            return None;
        };
        let width = index.primitive_width()?;
        let signed = matches!(
            index.as_ref(),
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        );
        let buf = self.buffer(1)?;
        let v = read_int(buf, self.offset + i, width, signed)?;
        usize::try_from(v).ok()
    }

    /// Child range `(start, len)` of list-like slot `i`, in child logical indices.
    pub(crate) fn list_range(&self, i: usize) -> (usize, usize) {
        let p = self.offset + i;
        match Layout::of(&self.data_type) {
            Ok(Layout::List { offset_width }) => match self.buffer(1) {
                Some(offsets) => {
                    let start = read_offset(offsets, p, offset_width);
                    let end = read_offset(offsets, p + 1, offset_width);
                    (start, end.saturating_sub(start))
                }
                None => (0, 0),
            },
            Ok(Layout::ListView { offset_width }) => match (self.buffer(1), self.buffer(2)) {
                (Some(offsets), Some(sizes)) => (
                    read_offset(offsets, p, offset_width),
                    read_offset(sizes, p, offset_width),
                ),
                _ => (0, 0),
            },
            Ok(Layout::FixedSizeList(n)) => (p * n, n),
            _ => (0, 0),
        }
    }

    /// Union type id of slot `i`.
    pub(crate) fn type_id_at(&self, i: usize) -> i8 {
        self.buffer(0)
            .and_then(|b| b.get(self.offset + i).copied())
            .map(|b| b as i8)
            .unwrap_or(0)
    }

    /// Child index and child logical index of union slot `i`.
    pub(crate) fn union_child(&self, i: usize) -> Option<(usize, usize)> {
        let DataType::Union(_, type_ids, mode) = self.data_type.storage_type() else {
            return None;
        };
        let tid = self.type_id_at(i) as i32;
        let child = if type_ids.is_empty() {
            usize::try_from(tid).ok()?
        } else {
            type_ids.iter().position(|t| *t == tid)?
        };
        let idx = match mode {
            UnionMode::Sparse => self.offset + i,
            UnionMode::Dense => {
                let offsets = self.buffer(1)?;
                usize::try_from(read_int(offsets, self.offset + i, 4, true)?).ok()?
            }
        };
        Some((child, idx))
    }

    /// Physical index into the values child for logical slot `i` of a run-end encoded array.
    pub(crate) fn run_index(&self, i: usize) -> usize {
        let Some(run_ends) = self.children.first() else {
            return 0;
        };
        let logical = (self.offset + i) as i64;
        let (mut lo, mut hi) = (0usize, run_ends.len);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if run_end_at(run_ends, mid) <= logical {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Structural checks that make the accessors above safe to call.
    pub fn validate(&self) -> Result<()> {
        let layout = Layout::of(&self.data_type)?;
        let bad = |msg: String| Err(IpcError::InvalidData(format!("{}: {msg}", self.data_type)));
        let Some(end) = self.offset.checked_add(self.len) else {
            return bad(format!("offset {} plus length {} overflows", self.offset, self.len));
        };
        // True when a buffer of `have` bytes cannot hold `end` elements of `width` bytes.
        let short = |have: usize, width: usize| end.checked_mul(width).is_none_or(|need| have < need);

        let min_slots = layout.fixed_slots();
        if self.buffers.len() < min_slots || (layout != Layout::View && self.buffers.len() != min_slots) {
            return bad(format!(
                "expected {min_slots} buffers, found {}",
                self.buffers.len()
            ));
        }
        if let Some(v) = self.validity() {
            if v.len() < bytes_for_bits(end) {
                return bad(format!("validity bitmap of {} bytes is too short", v.len()));
            }
        }
        let required = |slot: usize, what: &str| -> Result<&Buffer> {
            self.buffer(slot)
                .ok_or_else(|| IpcError::InvalidData(format!("{}: missing {what} buffer", self.data_type)))
        };
        let expected_children = self.data_type.children().len();
        if self.children.len() != expected_children {
            return bad(format!(
                "expected {expected_children} children, found {}",
                self.children.len()
            ));
        }

        match layout {
            Layout::Null => {}
            Layout::Boolean => {
                let values = required(1, "values")?;
                if values.len() < bytes_for_bits(end) {
                    return bad("values bitmap is too short".into());
                }
            }
            Layout::FixedWidth(w) | Layout::Dictionary { index_width: w } => {
                let values = required(1, "values")?;
                if short(values.len(), w) {
                    return bad(format!("values buffer of {} bytes holds fewer than {end} elements", values.len()));
                }
            }
            Layout::VarBinary { offset_width } => {
                let values = required(2, "values")?;
                self.check_offsets(required(1, "offsets")?, offset_width, values.len())?;
            }
            Layout::View => {
                let views = required(1, "views")?;
                if short(views.len(), VIEW_LEN) {
                    return bad("views buffer is too short".into());
                }
                for p in self.offset..end {
                    let view = &views[p * VIEW_LEN..(p + 1) * VIEW_LEN];
                    let len = read_i32(view, 0);
                    if len < 0 {
                        return bad(format!("negative view length {len}"));
                    }
                    if len as usize > MAX_INLINE_VIEW_LEN {
                        let idx = read_i32(view, 2);
                        let start = read_i32(view, 3);
                        let data = usize::try_from(idx).ok().and_then(|k| self.buffer(2 + k));
                        match (data, usize::try_from(start)) {
                            (Some(d), Ok(s)) if s.checked_add(len as usize).is_some_and(|e| e <= d.len()) => {}
                            _ => return bad(format!("view {p} points outside its data buffer")),
                        }
                    }
                }
            }
            Layout::List { offset_width } => {
                self.check_offsets(required(1, "offsets")?, offset_width, self.children[0].len)?;
            }
            Layout::ListView { offset_width } => {
                let offsets = required(1, "offsets")?;
                let sizes = required(2, "sizes")?;
                if short(offsets.len(), offset_width) || short(sizes.len(), offset_width) {
                    return bad("list view offsets or sizes are too short".into());
                }
                for p in self.offset..end {
                    let o = read_signed(offsets, p, offset_width);
                    let s = read_signed(sizes, p, offset_width);
                    let fits = o
                        .checked_add(s)
                        .and_then(|e| usize::try_from(e).ok())
                        .is_some_and(|e| e <= self.children[0].len);
                    if o < 0 || s < 0 || !fits {
                        return bad(format!("list view slot {p} is out of range"));
                    }
                }
            }
            Layout::FixedSizeList(n) => {
                if short(self.children[0].len, n) {
                    return bad("child is shorter than the list sizes require".into());
                }
            }
            Layout::Struct => {
                if self.children.iter().any(|c| c.len < end) {
                    return bad("child is shorter than the struct".into());
                }
            }
            Layout::Union(mode) => {
                let type_ids = required(0, "type ids")?;
                if type_ids.len() < end {
                    return bad("type ids buffer is too short".into());
                }
                if mode == UnionMode::Dense && short(required(1, "offsets")?.len(), 4) {
                    return bad("dense union offsets are too short".into());
                }
                for i in 0..self.len {
                    match self.union_child(i) {
                        Some((c, k)) if k < self.children[c].len => {}
                        _ => return bad(format!("union slot {i} has no matching child value")),
                    }
                }
            }
            Layout::RunEndEncoded => {
                let run_ends = &self.children[0];
                if !matches!(run_ends.data_type, DataType::Int16 | DataType::Int32 | DataType::Int64) {
                    return bad(format!("run ends must be Int16, Int32 or Int64, found {}", run_ends.data_type));
                }
                if run_ends.len != self.children[1].len {
                    return bad("run ends and values differ in length".into());
                }
                let mut prev = 0i64;
                for k in 0..run_ends.len {
                    let e = run_end_at(run_ends, k);
                    if e <= prev {
                        return bad("run ends must be strictly increasing and positive".into());
                    }
                    prev = e;
                }
                if self.len > 0 && !i64::try_from(end).is_ok_and(|e| prev >= e) {
                    return bad("run ends do not cover the array".into());
                }
            }
        }

        if let Layout::Dictionary { .. } = layout {
            let Some(dict) = &self.dictionary else {
                return bad("dictionary values missing".into());
            };
            for i in 0..self.len {
                if self.is_valid(i) && !self.index_at(i).is_some_and(|k| k < dict.len) {
                    return bad(format!("index at slot {i} is outside the dictionary of {}", dict.len));
                }
            }
        }
        for child in &self.children {
            child.validate()?;
        }
        Ok(())
    }

    fn check_offsets(&self, offsets: &Buffer, width: usize, limit: usize) -> Result<()> {
        let end = self.offset + self.len;
        if self.len == 0 && offsets.is_empty() {
            return Ok(());
        }
        let need = end.checked_add(1).and_then(|n| n.checked_mul(width));
        if need.is_none_or(|need| offsets.len() < need) {
            return Err(IpcError::InvalidData(format!(
                "{}: offsets buffer of {} bytes is too short",
                self.data_type,
                offsets.len()
            )));
        }
        let mut prev = read_signed(offsets, self.offset, width);
        if prev < 0 {
            return Err(IpcError::InvalidData(format!("{}: negative offset", self.data_type)));
        }
        for p in self.offset + 1..=end {
            let o = read_signed(offsets, p, width);
            if o < prev || o as usize > limit {
                return Err(IpcError::InvalidData(format!(
                    "{}: offset {o} at {p} is out of order or past {limit}",
                    self.data_type
                )));
            }
            prev = o;
        }
        Ok(())
    }
}

/// Column-wise logical equality: types, lengths, null counts and the value at every slot.
///
/// Physical details that do not change values (offsets, padding, absent versus all-set
/// bitmaps, bytes under null slots) are ignored.
impl PartialEq for ArrayData {
    fn eq(&self, other: &Self) -> bool {
        self.data_type == other.data_type
            && self.len == other.len
            && self.null_count == other.null_count
            && (0..self.len).all(|i| elem_eq(self, i, other, i))
    }
}

/// Compares slot `i` of `a` with slot `j` of `b`, both in logical indices.
pub(crate) fn elem_eq(a: &ArrayData, i: usize, b: &ArrayData, j: usize) -> bool {
    let valid = a.is_valid(i);
    if valid != b.is_valid(j) {
        return false;
    }
    if !valid {
        return true;
    }
    let Ok(layout) = Layout::of(&a.data_type) else {
        return false;
    };
    match layout {
        Layout::Null => true,
        Layout::Boolean => a.bool_at(i) == b.bool_at(j),
        Layout::FixedWidth(_) | Layout::VarBinary { .. } | Layout::View => {
            a.value_bytes(i) == b.value_bytes(j)
        }
        Layout::List { .. } | Layout::ListView { .. } | Layout::FixedSizeList(_) => {
            let (sa, la) = a.list_range(i);
            let (sb, lb) = b.list_range(j);
            la == lb
                && match (a.children.first(), b.children.first()) {
                    (Some(ca), Some(cb)) => (0..la).all(|k| elem_eq(ca, sa + k, cb, sb + k)),
                    _ => false,
                }
        }
        Layout::Struct => {
            a.children.len() == b.children.len()
                && a.children
                    .iter()
                    .zip(&b.children)
                    .all(|(ca, cb)| elem_eq(ca, a.offset + i, cb, b.offset + j))
        }
        Layout::Union(_) => {
            a.type_id_at(i) == b.type_id_at(j)
                && match (a.union_child(i), b.union_child(j)) {
                    (Some((c, ia)), Some((d, ib))) => {
                        c == d && elem_eq(&a.children[c], ia, &b.children[d], ib)
                    }
                    _ => false,
                }
        }
        Layout::RunEndEncoded => match (a.children.get(1), b.children.get(1)) {
            (Some(va), Some(vb)) => elem_eq(va, a.run_index(i), vb, b.run_index(j)),
            _ => false,
        },
        Layout::Dictionary { .. } => match (&a.dictionary, &b.dictionary, a.index_at(i), b.index_at(j)) {
            (Some(da), Some(db), Some(ia), Some(ib)) if ia < da.len && ib < db.len => {
                elem_eq(da, ia, db, ib)
            }
            _ => false,
        },
    }
}

/// Bitmap for `len` validity flags, or `None` when all are set.
pub(crate) fn validity_from(flags: impl Iterator<Item = bool> + Clone, len: usize) -> Option<Buffer> {
    if flags.clone().take(len).all(|v| v) {
        None
    } else {
        Some(Buffer::from(pack_bits(flags, len)))
    }
}

#[inline]
fn read_i32(bytes: &[u8], word: usize) -> i32 {
    bytemuck::pod_read_unaligned(&bytes[word * 4..word * 4 + 4])
}

/// Reads a native-endian integer of `width` bytes at element `idx`.
pub(crate) fn read_int(bytes: &[u8], idx: usize, width: usize, signed: bool) -> Option<i64> {
    let raw = bytes.get(idx * width..(idx + 1) * width)?;
    Some(match (width, signed) {
        (1, true) => raw[0] as i8 as i64,
        (1, false) => raw[0] as i64,
        (2, true) => bytemuck::pod_read_unaligned::<i16>(raw) as i64,
        (2, false) => bytemuck::pod_read_unaligned::<u16>(raw) as i64,
        (4, true) => bytemuck::pod_read_unaligned::<i32>(raw) as i64,
        (4, false) => bytemuck::pod_read_unaligned::<u32>(raw) as i64,
        (8, true) => bytemuck::pod_read_unaligned::<i64>(raw),
        (8, false) => bytemuck::pod_read_unaligned::<u64>(raw) as i64,
        _ => return None,
    })
}

#[inline]
pub(crate) fn read_signed(bytes: &[u8], idx: usize, width: usize) -> i64 {
    read_int(bytes, idx, width, true).unwrap_or(0)
}

#[inline]
pub(crate) fn read_offset(bytes: &[u8], idx: usize, width: usize) -> usize {
    read_signed(bytes, idx, width).max(0) as usize
}

/// Run end at child logical index `k`.
pub(crate) fn run_end_at(run_ends: &ArrayData, k: usize) -> i64 {
    let width = run_ends.data_type.primitive_width().unwrap_or(4);
    run_ends
        .buffer(1)
        .map(|b| read_signed(b, run_ends.offset + k, width))
        .unwrap_or(0)
}
