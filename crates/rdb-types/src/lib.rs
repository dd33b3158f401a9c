//! # rdb-types
//!
//! The value model shared by every rdb driver.
//!
//! Drivers translate their wire representations into [`SqlValue`] and
//! describe columns and parameters with [`SqlType`]. Applications convert
//! between Rust types and SQL values through [`ToSql`] and [`FromSql`].
//!
//! ## Features
//!
//! - `chrono` (default): date/time values via chrono
//! - `uuid` (default): UUID values
//! - `decimal` (default): exact numerics via rust_decimal
//! - `json`: JSON documents via serde_json
//!
//! ## Type Mappings
//!
//! | SqlType | Rust Type |
//! |---------|-----------|
//! | `Bool` | `bool` |
//! | `SmallInt` | `i16` |
//! | `Int` | `i32` |
//! | `BigInt` | `i64` |
//! | `Real` | `f32` |
//! | `Double` | `f64` |
//! | `Decimal` | `rust_decimal::Decimal` |
//! | `Text` | `String` |
//! | `Binary` | `Vec<u8>` / `bytes::Bytes` |
//! | `Date` | `chrono::NaiveDate` |
//! | `Time` | `chrono::NaiveTime` |
//! | `Timestamp` | `chrono::NaiveDateTime` |
//! | `TimestampTz` | `chrono::DateTime<FixedOffset>` |
//! | `Uuid` | `uuid::Uuid` |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod from_sql;
pub mod sql_type;
pub mod to_sql;
pub mod value;

pub use error::TypeError;
pub use from_sql::FromSql;
pub use sql_type::SqlType;
pub use to_sql::ToSql;
pub use value::SqlValue;
