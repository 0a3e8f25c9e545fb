//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings that
//! appear in machine-readable I/O: the annotated tree consumed and produced by the
//! engine, the mono map, diagnostics and the CLI report.

pub const GOMONO_TREE_SCHEMA_VERSION: &str = "gomono.tree@0.1.0";
pub const GOMONO_MONO_MAP_SCHEMA_VERSION: &str = "gomono.mono-map@0.1.0";
pub const GOMONO_DIAG_SCHEMA_VERSION: &str = "gomono.diag@0.1.0";
pub const GOMONO_REPORT_SCHEMA_VERSION: &str = "gomono.report@0.1.0";

/// Schema versions of the annotated tree this build accepts as input.
pub const GOMONO_TREE_SCHEMA_VERSIONS_SUPPORTED: &[&str] = &[GOMONO_TREE_SCHEMA_VERSION];
