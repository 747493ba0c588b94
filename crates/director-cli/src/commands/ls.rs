use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use director_core::Engine;
use director_store::ProjectState;

pub fn run(engine: &Engine, states: &[ProjectState], json: bool) -> Result<u8, String> {
    let projects = engine.list(states).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&projects)?);
    } else if projects.is_empty() {
        println!("No project has been created.");
    } else {
        println!("Projects:");
        for project in &projects {
            println!(
                " {} {:<24} {}",
                project.state.symbol(),
                project.name,
                colorize_state(project.state)
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
