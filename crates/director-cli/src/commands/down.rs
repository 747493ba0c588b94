use super::{finish_progress, json_pretty, progress, require_project};
use super::{EXIT_FAILURE, EXIT_SUCCESS};
use director_core::{DotEnv, DownOptions, Engine};

pub fn run(
    engine: &Engine,
    env: &DotEnv,
    project: Option<&str>,
    options: DownOptions,
    json: bool,
) -> Result<u8, String> {
    let project = require_project(project, env)?;

    let pb = if json {
        None
    } else {
        println!("Starting Director (project:{project}) ...");
        Some(progress(if options.destroy {
            "destroying project..."
        } else {
            "stopping project..."
        }))
    };

    let report = match engine.down(&project, options) {
        Ok(report) => {
            if let Some(ref pb) = pb {
                if !report.success() {
                    finish_progress(pb, false, &format!("project {project} was not fully torn down"));
                } else if report.project_removed {
                    finish_progress(pb, true, &format!("project {project} destroyed"));
                } else {
                    finish_progress(pb, true, &format!("project {project} stopped"));
                }
            }
            report
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                finish_progress(pb, false, "down failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        for entry in &report.services {
            let (symbol, status) = match &entry.error {
                Some(error) => ('!', error.as_str()),
                None if entry.destroyed => ('x', "destroyed"),
                None if entry.stopped => ('-', "stopped"),
                None => (' ', "not running"),
            };
            println!(" {symbol} {} ({}): {status}", entry.service, entry.jail);
        }
    }

    Ok(if report.success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
