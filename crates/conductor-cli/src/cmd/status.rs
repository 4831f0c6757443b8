use crate::output;
use conductor_core::checkpoint::CheckpointStore;
use conductor_core::ConductorError;
use std::path::Path;

/// Show the folded checkpoint state of one run, or list persisted runs.
pub fn run(root: &Path, run_id: Option<&str>, json: bool) -> anyhow::Result<i32> {
    let store = CheckpointStore::new(root);

    let Some(run_id) = run_id else {
        let runs = store.list_runs()?;
        if json {
            output::print_json(&runs)?;
        } else if runs.is_empty() {
            println!("no runs");
        } else {
            let rows: Vec<Vec<String>> = runs
                .iter()
                .map(|id| {
                    let state = store.load(id)?;
                    Ok(vec![
                        id.clone(),
                        state.outcomes.len().to_string(),
                        state.records.to_string(),
                    ])
                })
                .collect::<anyhow::Result<_>>()?;
            output::print_table(&["run", "nodes", "records"], rows);
        }
        return Ok(0);
    };

    let state = store.load(run_id)?;
    if state.records == 0 {
        return Err(ConductorError::RunNotFound(run_id.to_string()).into());
    }

    if json {
        output::print_json(&state)?;
    } else {
        let rows: Vec<Vec<String>> = state
            .outcomes
            .iter()
            .map(|(id, outcome)| {
                vec![
                    id.clone(),
                    outcome.status.to_string(),
                    format!("{}ms", outcome.duration_ms),
                    state.reset_count(id).to_string(),
                ]
            })
            .collect();
        output::print_table(&["node", "status", "duration", "resets"], rows);
    }
    Ok(0)
}
