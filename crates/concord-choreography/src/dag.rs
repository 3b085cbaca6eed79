//! Dependency graph validation
//!
//! Three-color depth-first search: unvisited → visiting → visited. A
//! back-edge to a node still in the visiting state is a cycle.

use std::collections::HashMap;

use concord_types::{ConcordError, Result, Step, StepId, Workflow};

#[derive(Clone, Copy, PartialEq)]
enum Color {
    Unvisited,
    Visiting,
    Visited,
}

/// Validate that the step dependency graph is acyclic
///
/// Also rejects dependencies on step ids the workflow does not define.
pub fn validate_acyclic(workflow: &Workflow) -> Result<()> {
    let steps: HashMap<&StepId, &Step> = workflow.steps.iter().map(|s| (&s.id, s)).collect();
    let mut colors: HashMap<&StepId, Color> =
        workflow.steps.iter().map(|s| (&s.id, Color::Unvisited)).collect();

    for step in &workflow.steps {
        if colors[&step.id] == Color::Unvisited {
            visit(&step.id, &steps, &mut colors, workflow)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    step_id: &'a StepId,
    steps: &HashMap<&'a StepId, &'a Step>,
    colors: &mut HashMap<&'a StepId, Color>,
    workflow: &Workflow,
) -> Result<()> {
    colors.insert(step_id, Color::Visiting);

    let step = steps[step_id];
    for dep in &step.dependencies {
        let Some((dep_id, _)) = steps.get_key_value(dep) else {
            return Err(ConcordError::invalid(format!(
                "step {} depends on unknown step {}",
                step_id, dep
            )));
        };
        match colors[dep_id] {
            Color::Visiting => {
                return Err(ConcordError::CircularDependency {
                    workflow_id: workflow.id.to_string(),
                    step_id: step_id.to_string(),
                });
            }
            Color::Unvisited => visit(dep_id, steps, colors, workflow)?,
            Color::Visited => {}
        }
    }

    colors.insert(step_id, Color::Visited);
    Ok(())
}
