use super::{colorize_state, json_pretty, require_project, EXIT_SUCCESS};
use director_core::{DotEnv, Engine, JailStatus};

pub fn run(
    engine: &Engine,
    env: &DotEnv,
    project: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let project = require_project(project, env)?;
    let info = engine.info(&project).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&info)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("{}:", info.name);
    println!(" state: {}", colorize_state(info.state));
    println!(" last log: {}", info.last_log.as_deref().unwrap_or("(none)"));
    println!(" locked: {}", info.locked);
    if info.services.is_empty() {
        println!(" services: (none)");
        return Ok(EXIT_SUCCESS);
    }
    println!(" services:");
    for service in &info.services {
        let symbol = if service.outcome.is_success() {
            service.status.symbol()
        } else {
            '!'
        };
        let status = match service.status {
            JailStatus::Running => "running",
            JailStatus::Stopped => "stopped",
            JailStatus::Missing => "missing",
            JailStatus::Unknown => "unknown",
        };
        if service.outcome.is_success() {
            println!("  {symbol} {} ({}): {status}", service.service, service.jail);
        } else {
            println!(
                "  {symbol} {} ({}): {status}, {}",
                service.service, service.jail, service.outcome
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
