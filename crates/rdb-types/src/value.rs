//! The value currency between callers and drivers.

use bytes::Bytes;

use crate::sql_type::SqlType;

/// One column or parameter value.
///
/// Optional kinds (decimal, uuid, dates, JSON) exist only when the matching
/// crate feature is on.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// NULL value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// 16-bit signed integer.
    SmallInt(i16),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 32-bit floating point.
    Real(f32),
    /// 64-bit floating point.
    Double(f64),
    /// Character data.
    Text(String),
    /// Binary data.
    Binary(Bytes),
    /// Exact numeric.
    #[cfg(feature = "decimal")]
    Decimal(rust_decimal::Decimal),
    /// UUID.
    #[cfg(feature = "uuid")]
    Uuid(uuid::Uuid),
    /// Calendar date.
    #[cfg(feature = "chrono")]
    Date(chrono::NaiveDate),
    /// Time of day.
    #[cfg(feature = "chrono")]
    Time(chrono::NaiveTime),
    /// Date and time without offset.
    #[cfg(feature = "chrono")]
    Timestamp(chrono::NaiveDateTime),
    /// Date and time with a UTC offset.
    #[cfg(feature = "chrono")]
    TimestampTz(chrono::DateTime<chrono::FixedOffset>),
    /// JSON document.
    #[cfg(feature = "json")]
    Json(serde_json::Value),
}

impl SqlValue {
    /// True for NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Floating point kinds, widened to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Real(v) => Some(f64::from(v)),
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow binary data.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// The declared type this value binds as. NULL has no type of its own
    /// and reports [`SqlType::Unknown`].
    #[must_use]
    pub fn sql_type(&self) -> SqlType {
        match self {
            Self::Null => SqlType::Unknown,
            Self::Bool(_) => SqlType::Bool,
            Self::SmallInt(_) => SqlType::SmallInt,
            Self::Int(_) => SqlType::Int,
            Self::BigInt(_) => SqlType::BigInt,
            Self::Real(_) => SqlType::Real,
            Self::Double(_) => SqlType::Double,
            Self::Text(_) => SqlType::Text,
            Self::Binary(_) => SqlType::Binary,
            #[cfg(feature = "decimal")]
            Self::Decimal(_) => SqlType::Decimal,
            #[cfg(feature = "uuid")]
            Self::Uuid(_) => SqlType::Uuid,
            #[cfg(feature = "chrono")]
            Self::Date(_) => SqlType::Date,
            #[cfg(feature = "chrono")]
            Self::Time(_) => SqlType::Time,
            #[cfg(feature = "chrono")]
            Self::Timestamp(_) => SqlType::Timestamp,
            #[cfg(feature = "chrono")]
            Self::TimestampTz(_) => SqlType::TimestampTz,
            #[cfg(feature = "json")]
            Self::Json(_) => SqlType::Json,
        }
    }

    /// Name used in conversion errors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            other => other.sql_type().name(),
        }
    }

    /// Length of a variable-length value: characters for text, bytes for binary.
    ///
    /// Returns `None` for fixed-size values and NULL.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        match self {
            Self::Text(v) => Some(v.chars().count()),
            Self::Binary(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Shorten a variable-length value to at most `max` characters or bytes.
    ///
    /// Returns `true` if anything was cut off.
    pub fn truncate(&mut self, max: usize) -> bool {
        match self {
            Self::Text(v) => match v.char_indices().nth(max) {
                Some((cut, _)) => {
                    v.truncate(cut);
                    true
                }
                None => false,
            },
            Self::Binary(v) if v.len() > max => {
                v.truncate(max);
                true
            }
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($(#[$attr:meta])* $ty:ty => $variant:ident;)*) => {
        $(
            $(#[$attr])*
            impl From<$ty> for SqlValue {
                #[allow(clippy::useless_conversion)]
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool;
    i16 => SmallInt;
    i32 => Int;
    i64 => BigInt;
    f32 => Real;
    f64 => Double;
    String => Text;
    &str => Text;
    Vec<u8> => Binary;
    Bytes => Binary;
    #[cfg(feature = "uuid")]
    uuid::Uuid => Uuid;
    #[cfg(feature = "decimal")]
    rust_decimal::Decimal => Decimal;
    #[cfg(feature = "chrono")]
    chrono::NaiveDate => Date;
    #[cfg(feature = "chrono")]
    chrono::NaiveTime => Time;
    #[cfg(feature = "chrono")]
    chrono::NaiveDateTime => Timestamp;
    #[cfg(feature = "chrono")]
    chrono::DateTime<chrono::FixedOffset> => TimestampTz;
    #[cfg(feature = "json")]
    serde_json::Value => Json;
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
