//! Rust values going into the driver as parameters.

use crate::error::TypeError;
use crate::sql_type::SqlType;
use crate::value::SqlValue;

/// A Rust value that can be bound as a parameter.
///
/// `sql_type` is the declared type the driver uses when the parameter is
/// NULL or when it needs a type before it has the value.
pub trait ToSql {
    /// The value to bind.
    fn to_sql(&self) -> Result<SqlValue, TypeError>;

    /// The declared parameter type.
    fn sql_type(&self) -> SqlType;
}

/// Infallible conversions: `$ty => $variant($expr), $sql_type`.
macro_rules! infallible_to_sql {
    ($($ty:ty => |$v:ident| $make:expr, $kind:ident;)*) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> Result<SqlValue, TypeError> {
                    let $v = self;
                    Ok($make)
                }

                fn sql_type(&self) -> SqlType {
                    SqlType::$kind
                }
            }
        )*
    };
}

infallible_to_sql! {
    bool => |v| SqlValue::Bool(*v), Bool;
    i16 => |v| SqlValue::SmallInt(*v), SmallInt;
    i32 => |v| SqlValue::Int(*v), Int;
    i64 => |v| SqlValue::BigInt(*v), BigInt;
    u32 => |v| SqlValue::BigInt(i64::from(*v)), BigInt;
    f32 => |v| SqlValue::Real(*v), Real;
    f64 => |v| SqlValue::Double(*v), Double;
    str => |v| SqlValue::Text(v.to_owned()), Text;
    String => |v| SqlValue::Text(v.clone()), Text;
    [u8] => |v| SqlValue::Binary(bytes::Bytes::copy_from_slice(v)), Binary;
    Vec<u8> => |v| SqlValue::Binary(bytes::Bytes::copy_from_slice(v)), Binary;
    bytes::Bytes => |v| SqlValue::Binary(v.clone()), Binary;
}

#[cfg(feature = "uuid")]
infallible_to_sql! {
    uuid::Uuid => |v| SqlValue::Uuid(*v), Uuid;
}

#[cfg(feature = "decimal")]
infallible_to_sql! {
    rust_decimal::Decimal => |v| SqlValue::Decimal(*v), Decimal;
}

#[cfg(feature = "chrono")]
infallible_to_sql! {
    chrono::NaiveDate => |v| SqlValue::Date(*v), Date;
    chrono::NaiveTime => |v| SqlValue::Time(*v), Time;
    chrono::NaiveDateTime => |v| SqlValue::Timestamp(*v), Timestamp;
    chrono::DateTime<chrono::FixedOffset> => |v| SqlValue::TimestampTz(*v), TimestampTz;
}

#[cfg(feature = "json")]
infallible_to_sql! {
    serde_json::Value => |v| SqlValue::Json(v.clone()), Json;
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(self.clone())
    }

    fn sql_type(&self) -> SqlType {
        SqlValue::sql_type(self)
    }
}

// BIGINT is the widest integer every driver accepts.
impl ToSql for u64 {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        match i64::try_from(*self) {
            Ok(v) => Ok(SqlValue::BigInt(v)),
            Err(_) => Err(TypeError::OutOfRange { target: "BIGINT" }),
        }
    }

    fn sql_type(&self) -> SqlType {
        SqlType::BigInt
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        self.as_ref().map_or(Ok(SqlValue::Null), ToSql::to_sql)
    }

    fn sql_type(&self) -> SqlType {
        self.as_ref().map_or(SqlType::Unknown, ToSql::sql_type)
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        T::to_sql(self)
    }

    fn sql_type(&self) -> SqlType {
        T::sql_type(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(42i32.to_sql().unwrap(), SqlValue::Int(42));
        assert_eq!(42i32.sql_type(), SqlType::Int);
        assert_eq!(9u32.to_sql().unwrap(), SqlValue::BigInt(9));
        assert_eq!("hi".to_sql().unwrap(), SqlValue::Text("hi".into()));
        assert_eq!(String::from("hi").sql_type(), SqlType::Text);
    }

    #[test]
    fn test_option_binds_null_with_unknown_type() {
        assert_eq!(Some(3i16).to_sql().unwrap(), SqlValue::SmallInt(3));
        assert_eq!(Some(3i16).sql_type(), SqlType::SmallInt);

        let none: Option<i16> = None;
        assert_eq!(none.to_sql().unwrap(), SqlValue::Null);
        assert_eq!(none.sql_type(), SqlType::Unknown);
    }

    #[test]
    fn test_u64_beyond_bigint() {
        assert!(matches!(
            u64::MAX.to_sql(),
            Err(TypeError::OutOfRange { target: "BIGINT" })
        ));
        assert_eq!(7u64.to_sql().unwrap(), SqlValue::BigInt(7));
    }
}
