//! Shared types for particulate-matter sensor sampling.
//!
//! This crate has no I/O. It defines the normalized [`Sample`] produced by
//! the sampling engine, the untyped [`RawValue`] responses returned by
//! legacy drivers, and the normalization rules between them.
//!
//! # Example
//!
//! ```
//! use pmsense_types::{normalize, RawValue};
//!
//! let raw = RawValue::numbers([1.0, 2.5, 3.0, 4.0]);
//! let [pm1, pm25, _, _] = normalize(&raw).unwrap();
//! assert_eq!(pm1, 1.0);
//! assert_eq!(pm25, 2.5);
//! ```

pub mod error;
pub mod raw;
pub mod sample;

pub use error::{ParseError, ParseResult};
pub use raw::{RECORD_FIELDS, RawValue, ScalingPolicy, normalize};
pub use sample::{CHANNEL_COUNT, Channel, Sample};
