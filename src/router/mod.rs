//! Path normalization and route template matching.
//!
//! Templates are `/`-delimited; a segment starting with `:` captures the
//! corresponding request segment. There are no wildcards, optional segments
//! or catch-alls, so a template only matches paths with the same number of
//! segments.

mod path;

pub use path::{match_path, normalize_path, parse_query, split_path_and_query, PathParams};
