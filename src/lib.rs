//! Read and write the text inputs of MODFLOW-style groundwater models.
//!
//! The crate has three layers:
//!
//! - numeric fields: Fortran `I`, `F`, `E`, `D` and `G` edit descriptors ([`format_specs`],
//!   `parsing` and [`ser`]),
//! - array blocks: a control record followed by values stored inline, in another file or
//!   as a constant ([`array`], [`header`], [`storage`] and [`array_codec`]),
//! - options: keyword declarations per package, a parser for option blocks and single
//!   option lines, and a writer that produces them again ([`options`], [`option_parser`],
//!   [`option_writer`] and [`packages`]).
//!
//! [`package`] puts these together to load and write whole package files.
extern crate pest;
#[macro_use]
extern crate pest_derive;
pub mod fort_error;
pub mod format_specs;
pub(crate) mod parsing;
pub mod ser;
pub mod codec_error;
pub mod binary;
pub mod array;
pub mod header;
pub mod storage;
pub mod array_codec;
pub mod options;
pub mod option_parser;
pub mod option_writer;
pub mod packages;
pub mod package;
