use conductor_core::{io, paths};
use std::path::Path;

const DEFAULT_STYLESHEET: &str = "\
# Model stylesheet: maps workflow classes to model configs.
# Loaded once at engine start; nodes reference classes by name via `model:`.
default:
  provider: agent-cli
  model: claude-sonnet-4-6
  effort: medium
  tool_profile: standard
  timeout_seconds: 300
classes:
  planning:
    provider: agent-cli
    model: claude-opus-4-6
    effort: high
    tool_profile: read_only
    timeout_seconds: 600
  review:
    provider: agent-cli
    model: claude-sonnet-4-6
    effort: medium
    tool_profile: read_only
    timeout_seconds: 300
";

const EXAMPLE_GRAPH: &str = "\
# Example workflow: plan, implement, gate on the result, then ship.
# Uses the hermetic `script` provider so it runs without any agent CLI.
nodes:
  - id: plan
    prompt: Draft a short implementation plan.
    model:
      provider: script
      model: \"echo '{\\\"output\\\": \\\"plan ready\\\", \\\"complexity\\\": \\\"low\\\"}'\"
  - id: implement
    domain: software
    fidelity: full
    prompt: Apply the planned change.
    model:
      provider: script
      model: \"echo '{\\\"output\\\": \\\"change applied\\\", \\\"tests_passed\\\": true}'\"
  - id: quality
    kind: gate
    criteria:
      - field: tests_passed
        op: eq
        expected: true
    retry_target: implement
    max_retries: 2
  - id: ship
    prompt: Summarize what shipped.
    model:
      provider: script
      model: \"echo shipped\"
edges:
  - from: plan
    to: implement
  - from: implement
    to: quality
  - from: quality
    to: ship
    condition: gate_passed
";

/// Scaffold `.conductor/` with a default stylesheet and an example graph.
/// Idempotent: existing files are left untouched.
pub fn run(root: &Path) -> anyhow::Result<i32> {
    io::ensure_dir(&paths::conductor_dir(root))?;
    io::ensure_dir(&paths::runs_dir(root))?;
    io::ensure_dir(&root.join(".conductor/graphs"))?;

    let wrote_sheet = io::write_if_missing(
        &paths::stylesheet_path(root),
        DEFAULT_STYLESHEET.as_bytes(),
    )?;
    let wrote_graph = io::write_if_missing(
        &root.join(".conductor/graphs/example.yaml"),
        EXAMPLE_GRAPH.as_bytes(),
    )?;

    println!(
        "initialized .conductor/ (stylesheet: {}, example graph: {})",
        if wrote_sheet { "created" } else { "kept" },
        if wrote_graph { "created" } else { "kept" },
    );
    Ok(0)
}
