//! Query parameters and binding.
//!
//! Applications describe parameters with [`Param`]. Drivers resolve them
//! against a statement's parameter signature with [`bind`]: named
//! parameters match a slot by name, unnamed ones fill the remaining slots
//! in the order they were given.
//!
//! Output parameters carry an [`Output`] handle. The handle stays
//! unreadable until every result set of the query has been consumed, at
//! which point the value written by the backend is published into it.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rdb_types::{FromSql, SqlType, SqlValue, ToSql};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::cancel;
use crate::error::{Error, Result};

/// The value of an input parameter.
pub enum ParamValue {
    /// An in-memory value.
    Value(SqlValue),
    /// A stream read to the end when the query is bound.
    ///
    /// Text parameters must be valid UTF-8; anything else binds as binary.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

#[derive(Debug, Default)]
struct OutputSlot {
    ready: bool,
    value: SqlValue,
}

/// Destination of an output parameter.
///
/// Clones share the same slot. Reads fail with [`Error::OutputNotReady`]
/// until the query that owns the parameter has been fully drained.
#[derive(Debug, Clone, Default)]
pub struct Output {
    slot: Arc<Mutex<OutputSlot>>,
}

impl Output {
    /// Create an empty, not-ready output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the value has been published.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slot.lock().ready
    }

    /// Get the raw value.
    pub fn value(&self) -> Result<SqlValue> {
        let slot = self.slot.lock();
        if !slot.ready {
            return Err(Error::OutputNotReady);
        }
        Ok(slot.value.clone())
    }

    /// Get the value converted to `T`.
    pub fn get<T: FromSql>(&self) -> Result<T> {
        let slot = self.slot.lock();
        if !slot.ready {
            return Err(Error::OutputNotReady);
        }
        Ok(T::from_sql(&slot.value)?)
    }

    fn publish(&self, value: SqlValue) {
        let mut slot = self.slot.lock();
        slot.value = value;
        slot.ready = true;
    }

    fn reset(&self) {
        let mut slot = self.slot.lock();
        slot.value = SqlValue::Null;
        slot.ready = false;
    }
}

/// One parameter of a query.
///
/// # Example
///
/// ```rust,ignore
/// let total = Output::new();
/// let params = vec![
///     Param::named("customer", 42),
///     Param::new("2024-01-01"),
///     Param::named("total", SqlValue::Null).with_output(&total),
/// ];
/// ```
#[derive(Debug)]
pub struct Param {
    name: Option<String>,
    sql_type: SqlType,
    length: Option<usize>,
    value: ParamValue,
    out: bool,
    output: Option<Output>,
}

impl Param {
    /// Create a positional parameter.
    #[must_use]
    pub fn new(value: impl Into<SqlValue>) -> Self {
        Self {
            name: None,
            sql_type: SqlType::Unknown,
            length: None,
            value: ParamValue::Value(value.into()),
            out: false,
            output: None,
        }
    }

    /// Create a named parameter.
    #[must_use]
    pub fn named(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(value).with_name(name)
    }

    /// Create a positional parameter from any [`ToSql`] value, taking its
    /// declared type from the value.
    pub fn from_value<T: ToSql + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::new(value.to_sql()?).with_type(value.sql_type()))
    }

    /// Create a positional parameter whose value is streamed from `reader`.
    #[must_use]
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            value: ParamValue::Reader(Box::new(reader)),
            ..Self::new(SqlValue::Null)
        }
    }

    /// Set the parameter name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the declared type.
    #[must_use]
    pub fn with_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = sql_type;
        self
    }

    /// Set the declared length used for truncation checks.
    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Mark the parameter as output without a destination.
    ///
    /// Binding fails unless a destination is attached with
    /// [`Param::with_output`].
    #[must_use]
    pub fn out(mut self, out: bool) -> Self {
        self.out = out;
        self
    }

    /// Mark the parameter as output and attach its destination.
    #[must_use]
    pub fn with_output(mut self, output: &Output) -> Self {
        self.out = true;
        self.output = Some(output.clone());
        self
    }

    /// Get the parameter name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Get the declared type.
    #[must_use]
    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    /// Get the declared length.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        self.length
    }

    /// Check if this is an output parameter.
    #[must_use]
    pub fn is_out(&self) -> bool {
        self.out
    }
}

/// A parameter position in a statement's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSlot {
    /// Parameter name, without any `@` or `:` prefix.
    pub name: String,
    /// Declared type.
    pub sql_type: SqlType,
    /// Declared length for variable-length types.
    pub length: Option<usize>,
}

impl ParamSlot {
    /// Create a slot with an unknown type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: SqlType::Unknown,
            length: None,
        }
    }

    /// Set the declared type.
    #[must_use]
    pub fn with_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = sql_type;
        self
    }

    /// Set the declared length.
    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

/// A parameter value resolved to its slot.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    /// Slot name.
    pub name: String,
    /// Effective type.
    pub sql_type: SqlType,
    /// Input value (NULL for unbound slots).
    pub value: SqlValue,
    /// Whether the backend should write a value back.
    pub out: bool,
}

#[derive(Debug, Clone)]
struct OutputBinding {
    slot: usize,
    name: String,
    max: Option<usize>,
    output: Output,
}

/// Output destinations of a bound query, keyed by slot position.
#[derive(Debug, Clone, Default)]
pub struct OutputBindings {
    bindings: Vec<OutputBinding>,
}

impl OutputBindings {
    /// Check if there are no output parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Number of output parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Publish backend values into the destinations.
    ///
    /// `values` holds `(slot, value)` pairs; an output with no value gets
    /// NULL. Values longer than the declared length are truncated when
    /// `trunc_long_text` is set. Otherwise that output stays unpublished and
    /// the first such failure is returned after the rest are published.
    pub fn publish(self, mut values: Vec<(usize, SqlValue)>, trunc_long_text: bool) -> Result<()> {
        let mut first_err = None;
        for binding in self.bindings {
            let value = values
                .iter()
                .position(|(slot, _)| *slot == binding.slot)
                .map(|i| values.swap_remove(i).1)
                .unwrap_or_default();
            match fit_length(value, &binding.name, binding.max, trunc_long_text) {
                Ok(value) => binding.output.publish(value),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// The result of [`bind`].
#[derive(Debug)]
pub struct Bound {
    /// One value per slot, in signature order.
    pub values: Vec<BoundParam>,
    /// Output destinations to publish once the query is drained.
    pub outputs: OutputBindings,
}

/// Resolve `params` against a statement signature.
///
/// Named parameters are matched to slots by name (ignoring case and a
/// leading `@` or `:`); unnamed parameters then fill the remaining slots
/// in order. Slots left unbound are NULL. Stream parameters are read to the
/// end, honouring `cancel`. Values longer than their declared length are
/// truncated when `trunc_long_text` is set and rejected with
/// [`Error::TextTruncated`] otherwise.
pub async fn bind(
    cancel: &CancellationToken,
    slots: &[ParamSlot],
    params: Vec<Param>,
    trunc_long_text: bool,
) -> Result<Bound> {
    let mut assigned: Vec<Option<Param>> = Vec::with_capacity(slots.len());
    assigned.resize_with(slots.len(), || None);

    let (named, positional): (Vec<Param>, Vec<Param>) =
        params.into_iter().partition(|p| p.name.is_some());

    for param in named {
        let name = param.name.as_deref().unwrap_or_default();
        let index = slots
            .iter()
            .position(|slot| same_name(&slot.name, name))
            .ok_or_else(|| Error::Bind(format!("unknown parameter: {name}")))?;
        if assigned[index].is_some() {
            return Err(Error::Bind(format!("parameter bound twice: {name}")));
        }
        assigned[index] = Some(param);
    }

    let mut free = assigned
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_none())
        .map(|(i, _)| i)
        .collect::<Vec<_>>()
        .into_iter();
    for param in positional {
        let index = free.next().ok_or_else(|| {
            Error::Bind(format!(
                "too many parameters: statement takes {}",
                slots.len()
            ))
        })?;
        assigned[index] = Some(param);
    }

    let mut values = Vec::with_capacity(slots.len());
    let mut outputs = OutputBindings::default();
    for (index, (slot, param)) in slots.iter().zip(assigned).enumerate() {
        let Some(param) = param else {
            values.push(BoundParam {
                name: slot.name.clone(),
                sql_type: slot.sql_type,
                value: SqlValue::Null,
                out: false,
            });
            continue;
        };

        let max = param.length.or(slot.length);
        let declared = if param.sql_type == SqlType::Unknown {
            slot.sql_type
        } else {
            param.sql_type
        };

        if param.out {
            let output = param.output.clone().ok_or_else(|| {
                Error::Bind(format!("output parameter {} has no destination", slot.name))
            })?;
            output.reset();
            outputs.bindings.push(OutputBinding {
                slot: index,
                name: slot.name.clone(),
                max,
                output,
            });
        }

        let value = match param.value {
            ParamValue::Value(value) => value,
            ParamValue::Reader(mut reader) => {
                let mut buf = Vec::new();
                cancel::run(cancel, async {
                    reader.read_to_end(&mut buf).await.map_err(|e| {
                        Error::Bind(format!("reading parameter {}: {e}", slot.name))
                    })
                })
                .await?;
                if declared == SqlType::Text {
                    let text = String::from_utf8(buf).map_err(|e| {
                        Error::Bind(format!("parameter {} is not UTF-8: {e}", slot.name))
                    })?;
                    SqlValue::Text(text)
                } else {
                    SqlValue::Binary(Bytes::from(buf))
                }
            }
        };
        let value = fit_length(value, &slot.name, max, trunc_long_text)?;

        let sql_type = if declared == SqlType::Unknown {
            value.sql_type()
        } else {
            declared
        };
        values.push(BoundParam {
            name: slot.name.clone(),
            sql_type,
            value,
            out: param.out,
        });
    }

    Ok(Bound { values, outputs })
}

fn same_name(slot: &str, param: &str) -> bool {
    let strip = |s: &str| s.trim_start_matches(['@', ':']).to_string();
    strip(slot).eq_ignore_ascii_case(&strip(param))
}

fn fit_length(
    mut value: SqlValue,
    name: &str,
    max: Option<usize>,
    trunc_long_text: bool,
) -> Result<SqlValue> {
    let (Some(max), Some(length)) = (max, value.length()) else {
        return Ok(value);
    };
    if length <= max {
        return Ok(value);
    }
    if !trunc_long_text {
        return Err(Error::TextTruncated {
            name: name.to_string(),
            length,
            max,
        });
    }
    tracing::trace!(param = name, length, max, "truncating long value");
    value.truncate(max);
    Ok(value)
}
