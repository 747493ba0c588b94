use crate::resolve::{ProjectSpec, ServiceSpec, VolumeSpec};
use crate::types::ConfigDigest;
use serde::Serialize;

#[derive(Serialize)]
struct DigestInput<'a> {
    service: &'a ServiceSpec,
    volumes: Vec<&'a VolumeSpec>,
}

/// Deterministic digest of everything that shapes a service's jail.
///
/// Covers the resolved service (with merged global options) and the
/// definitions of the volumes it mounts. `serial` is zeroed out so that a
/// serial bump is reported as its own rebuild reason.
pub fn compute_config_digest(
    project: &ProjectSpec,
    service: &ServiceSpec,
) -> Result<ConfigDigest, serde_json::Error> {
    let mut normalized = service.clone();
    normalized.serial = 0;

    let input = DigestInput {
        volumes: project.volumes_for(service),
        service: &normalized,
    };
    let json = serde_json::to_string(&input)?;

    Ok(ConfigDigest::new(
        blake3::hash(json.as_bytes()).to_hex().to_string(),
    ))
}
