use super::{require_project, EXIT_FAILURE, EXIT_SUCCESS};
use director_core::{DotEnv, Engine};

pub fn run(engine: &Engine, env: &DotEnv, project: Option<&str>) -> Result<u8, String> {
    let project = require_project(project, env)?;
    Ok(if engine.exists(&project) {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
