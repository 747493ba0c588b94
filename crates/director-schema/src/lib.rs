//! Director file parsing, interpolation, resolution and ordering.
//!
//! This crate defines the schema layer: the YAML Director file model
//! (`DirectorFile`), `!ENV` interpolation against a pluggable `EnvLookup`,
//! resolution into a fully-typed `ProjectSpec` with all defaults applied,
//! priority ordering of services, and the configuration digest used for
//! change detection.

pub mod document;
pub mod identity;
pub mod interpolate;
pub mod order;
pub mod resolve;
pub mod types;

pub use document::{
    parse_director_file, parse_director_str, DirectorFile, KeyValue, RawOci, RawScript,
    RawService, RawVolume, SpecError,
};
pub use identity::compute_config_digest;
pub use interpolate::{interpolate, EnvLookup, ProcessEnv};
pub use order::{execution_order, teardown_order};
pub use resolve::{
    is_directory_backed, resolve_file, resolve_str, Argument, IdOrName, OciSpec, ProjectSpec,
    Script, ScriptKind, ServiceSpec, VolumeBinding, VolumeSpec, DEFAULT_MAKEJAIL,
    DEFAULT_PRIORITY, DEFAULT_SHELL, DEFAULT_VOLUME_OPTIONS, DEFAULT_VOLUME_TYPE,
};
pub use types::{validate_jail_name, validate_service_name, ConfigDigest, JailName, ServiceId};
