//! Driver values coming out as Rust types.

use crate::error::TypeError;
use crate::value::SqlValue;

/// A Rust type that a column or output parameter can be read into.
///
/// Conversions accept the value's own kind plus lossless neighbours:
/// integers widen freely and narrow only when the value fits.
pub trait FromSql: Sized {
    /// Read `value`. NULL fails with [`TypeError::UnexpectedNull`].
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Read `value`, mapping NULL to `None`.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        match value {
            SqlValue::Null => Ok(None),
            other => Self::from_sql(other).map(Some),
        }
    }
}

/// The error for a value that `expected` does not accept.
fn reject(expected: &'static str, value: &SqlValue) -> TypeError {
    if value.is_null() {
        return TypeError::UnexpectedNull;
    }
    TypeError::TypeMismatch {
        expected,
        actual: value.type_name().to_owned(),
    }
}

/// Fit any integer kind into `T`.
fn narrow<T>(target: &'static str, value: &SqlValue) -> Result<T, TypeError>
where
    T: TryFrom<i64>,
{
    let wide = match value {
        SqlValue::SmallInt(v) => i64::from(*v),
        SqlValue::Int(v) => i64::from(*v),
        SqlValue::BigInt(v) => *v,
        other => return Err(reject(target, other)),
    };
    T::try_from(wide).map_err(|_| TypeError::OutOfRange { target })
}

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        if let SqlValue::Bool(b) = value {
            return Ok(*b);
        }
        narrow::<i64>("bool", value).map(|n| n != 0)
    }
}

impl FromSql for i16 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        narrow("i16", value)
    }
}

impl FromSql for i32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        narrow("i32", value)
    }
}

impl FromSql for i64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        narrow("i64", value)
    }
}

impl FromSql for f32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        if let SqlValue::Real(v) = value {
            Ok(*v)
        } else {
            Err(reject("f32", value))
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value.as_f64().ok_or_else(|| reject("f64", value))
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| reject("String", value))
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Binary(b) => Ok(b.to_vec()),
            SqlValue::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(reject("Vec<u8>", other)),
        }
    }
}

impl FromSql for bytes::Bytes {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Binary(b) => Ok(b.clone()),
            other => Err(reject("Bytes", other)),
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}

#[cfg(feature = "uuid")]
impl FromSql for uuid::Uuid {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        let parsed = match value {
            SqlValue::Uuid(u) => return Ok(*u),
            SqlValue::Binary(b) => uuid::Uuid::from_slice(b),
            SqlValue::Text(s) => uuid::Uuid::parse_str(s),
            other => return Err(reject("Uuid", other)),
        };
        parsed.map_err(|e| TypeError::InvalidUuid(e.to_string()))
    }
}

#[cfg(feature = "decimal")]
impl FromSql for rust_decimal::Decimal {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Decimal(d) => Ok(*d),
            SqlValue::Text(s) => s
                .parse::<rust_decimal::Decimal>()
                .map_err(|e| TypeError::InvalidDecimal(e.to_string())),
            other => narrow::<i64>("Decimal", other).map(rust_decimal::Decimal::from),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveDate {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Date(d) => Ok(*d),
            SqlValue::Timestamp(ts) => Ok(ts.date()),
            other => Err(reject("NaiveDate", other)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Time(t) => Ok(*t),
            SqlValue::Timestamp(ts) => Ok(ts.time()),
            other => Err(reject("NaiveTime", other)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveDateTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Timestamp(ts) => Ok(*ts),
            SqlValue::TimestampTz(ts) => Ok(ts.naive_utc()),
            other => Err(reject("NaiveDateTime", other)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::DateTime<chrono::FixedOffset> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::TimestampTz(ts) => Ok(*ts),
            other => Err(reject("DateTime<FixedOffset>", other)),
        }
    }
}

// NULL reads as JSON null rather than failing.
#[cfg(feature = "json")]
impl FromSql for serde_json::Value {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Null => Ok(Self::Null),
            SqlValue::Json(j) => Ok(j.clone()),
            SqlValue::Text(s) => serde_json::from_str(s).map_err(|e| TypeError::TypeMismatch {
                expected: "JSON",
                actual: format!("text that is not JSON ({e})"),
            }),
            other => Err(reject("JSON", other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_widen_and_narrow() {
        assert_eq!(i64::from_sql(&SqlValue::SmallInt(-3)).unwrap(), -3);
        assert_eq!(i32::from_sql(&SqlValue::BigInt(40_000)).unwrap(), 40_000);
        assert!(matches!(
            i32::from_sql(&SqlValue::BigInt(i64::MAX)),
            Err(TypeError::OutOfRange { target: "i32" })
        ));
    }

    #[test]
    fn test_null_needs_option() {
        assert!(matches!(i32::from_sql(&SqlValue::Null), Err(TypeError::UnexpectedNull)));
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Int(5)).unwrap(), Some(5));
    }

    #[test]
    fn test_text() {
        let value = SqlValue::Text("hello".to_string());
        assert_eq!(String::from_sql(&value).unwrap(), "hello");
        assert_eq!(Vec::<u8>::from_sql(&value).unwrap(), b"hello");
    }

    #[test]
    fn test_mismatch_names_both_types() {
        let err = i64::from_sql(&SqlValue::Text("1".into())).unwrap_err();
        assert_eq!(err.to_string(), "cannot convert TEXT to i64");
    }
}
