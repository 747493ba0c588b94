use super::{finish_progress, json_pretty, progress, resolve_project, service_line};
use super::{EXIT_FAILURE, EXIT_SUCCESS};
use director_core::{random_project_name, DotEnv, Engine, ProjectSource, UpOptions};
use std::path::Path;

pub fn run(
    engine: &Engine,
    env: &DotEnv,
    file: &Path,
    project: Option<&str>,
    options: UpOptions,
    json: bool,
) -> Result<u8, String> {
    let project = resolve_project(project, env).unwrap_or_else(random_project_name);
    let source = ProjectSource::load(file, env).map_err(|e| e.to_string())?;

    let pb = if json {
        None
    } else {
        println!("Starting Director (project:{project}) ...");
        Some(progress(&format!(
            "applying {} service(s)...",
            source.spec.services.len()
        )))
    };

    let report = match engine.up(&project, &source, options) {
        Ok(report) => {
            if let Some(ref pb) = pb {
                if report.success() {
                    finish_progress(pb, true, &format!("project {project} is up"));
                } else if report.interrupted {
                    finish_progress(pb, false, &format!("project {project} interrupted"));
                } else {
                    finish_progress(pb, false, &format!("project {project} failed"));
                }
            }
            report
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                finish_progress(pb, false, "up failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        for service in report.removed.iter().chain(&report.services) {
            println!("{}", service_line(service));
        }
        println!("logs: {}", report.log_dir.display());
    }

    Ok(if report.success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
