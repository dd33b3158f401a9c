//! Declared SQL types for columns and parameters.

use std::fmt;

/// The declared type of a column or parameter.
///
/// Types are advisory: a driver may infer the type of a parameter declared
/// as [`SqlType::Unknown`] from its value, and may map several backend types
/// onto the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SqlType {
    /// Let the driver infer the type from the value.
    #[default]
    Unknown,
    /// Boolean.
    Bool,
    /// 16-bit signed integer.
    SmallInt,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// 32-bit floating point.
    Real,
    /// 64-bit floating point.
    Double,
    /// Exact numeric.
    Decimal,
    /// Character data.
    Text,
    /// Binary data.
    Binary,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date and time without offset.
    Timestamp,
    /// Date and time with a UTC offset.
    TimestampTz,
    /// UUID.
    Uuid,
    /// JSON document.
    Json,
}

impl SqlType {
    /// Get the canonical type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Bool => "BOOLEAN",
            Self::SmallInt => "SMALLINT",
            Self::Int => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Real => "REAL",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::TimestampTz => "TIMESTAMPTZ",
            Self::Uuid => "UUID",
            Self::Json => "JSON",
        }
    }

    /// Check if values of this type have a length subject to truncation.
    #[must_use]
    pub fn is_variable_length(&self) -> bool {
        matches!(self, Self::Text | Self::Binary | Self::Json)
    }

    /// Parse a type name, accepting common aliases.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let ty = match name.trim().to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" | "BIT" => Self::Bool,
            "SMALLINT" | "INT2" => Self::SmallInt,
            "INT" | "INTEGER" | "INT4" => Self::Int,
            "BIGINT" | "INT8" => Self::BigInt,
            "REAL" | "FLOAT4" => Self::Real,
            "DOUBLE" | "FLOAT" | "FLOAT8" => Self::Double,
            "DECIMAL" | "NUMERIC" => Self::Decimal,
            "TEXT" | "VARCHAR" | "NVARCHAR" | "CHAR" => Self::Text,
            "BINARY" | "VARBINARY" | "BLOB" | "BYTEA" => Self::Binary,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "TIMESTAMP" | "DATETIME" => Self::Timestamp,
            "TIMESTAMPTZ" | "DATETIMEOFFSET" => Self::TimestampTz,
            "UUID" | "UNIQUEIDENTIFIER" => Self::Uuid,
            "JSON" | "JSONB" => Self::Json,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(SqlType::parse("int"), Some(SqlType::Int));
        assert_eq!(SqlType::parse(" NVARCHAR "), Some(SqlType::Text));
        assert_eq!(SqlType::parse("bytea"), Some(SqlType::Binary));
        assert_eq!(SqlType::parse("geometry"), None);
    }

    #[test]
    fn test_variable_length() {
        assert!(SqlType::Text.is_variable_length());
        assert!(SqlType::Binary.is_variable_length());
        assert!(!SqlType::Int.is_variable_length());
    }

    #[test]
    fn test_display_uses_canonical_name() {
        assert_eq!(SqlType::Timestamp.to_string(), "TIMESTAMP");
        assert_eq!(SqlType::default(), SqlType::Unknown);
    }
}
