//! Nested-workflow detection and cross-reference rewriting.
//!
//! A definition A nests definition B when one of A's rendered steps has no
//! implementation unit and its descriptor equals B's workflow descriptor
//! once output identifiers are erased. B is then published first as its own
//! repository, and A references it as a submodule.

use std::collections::BTreeMap;

use phenoflow_core::descriptor::{
    descriptors_match, reroute_terminal_output, rewrite_parent_descriptor, rewrite_parent_inputs,
};

use crate::generator::RenderedWorkflow;

/// A rendered definition taking part in composition.
#[derive(Debug, Clone)]
pub struct ComposeItem {
    pub name: String,
    /// Repository the definition is published to.
    pub repository: String,
    pub rendered: RenderedWorkflow,
}

/// One detected containment: `parent`'s step `step_name` is `child`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nesting {
    pub parent: usize,
    pub child: usize,
    pub step_name: String,
}

/// Publish order derived from the detected nestings. Indices refer to the
/// composed items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionPlan {
    /// Published first, on the base branch.
    pub children: Vec<usize>,
    /// Each parent with the children it embeds.
    pub parents: BTreeMap<usize, Vec<usize>>,
    /// Neither parent nor child.
    pub independents: Vec<usize>,
    pub nestings: Vec<Nesting>,
}

impl CompositionPlan {
    /// Names of the steps of `parent` that were replaced by nested children.
    pub fn nested_steps(&self, parent: usize) -> impl Iterator<Item = &str> {
        self.nestings
            .iter()
            .filter(move |n| n.parent == parent)
            .map(|n| n.step_name.as_str())
    }
}

/// Find every nesting among `items`.
///
/// A definition that already embeds another is never itself nested, which
/// keeps the publish order to two levels.
pub fn detect(items: &[ComposeItem]) -> Vec<Nesting> {
    let mut nestings: Vec<Nesting> = Vec::new();
    for (parent, item) in items.iter().enumerate() {
        for step in item.rendered.steps.iter().filter(|s| s.is_nested()) {
            let found = items.iter().enumerate().find(|(child, candidate)| {
                *child != parent && descriptors_match(&step.content, &candidate.rendered.workflow)
            });
            if let Some((child, _)) = found {
                nestings.push(Nesting {
                    parent,
                    child,
                    step_name: step.name.clone(),
                });
            }
        }
    }

    let parents: Vec<usize> = nestings.iter().map(|n| n.parent).collect();
    nestings.retain(|n| {
        let keep = !parents.contains(&n.child);
        if !keep {
            tracing::debug!(
                parent = %items[n.parent].name,
                child = %items[n.child].name,
                "Skipping nesting of a definition that is itself a parent",
            );
        }
        keep
    });
    nestings
}

/// Detect nestings, rewrite the affected descriptors in place, and return
/// the publish plan.
pub fn compose(items: &mut [ComposeItem]) -> CompositionPlan {
    let nestings = detect(items);

    for nesting in &nestings {
        let (child_repository, child_name) = {
            let child = &items[nesting.child];
            (child.repository.clone(), child.name.clone())
        };
        let parent = &mut items[nesting.parent].rendered;
        let Some(position) = parent.steps.iter().position(|s| s.name == nesting.step_name) else {
            continue;
        };
        parent.workflow = rewrite_parent_descriptor(
            &parent.workflow,
            &nesting.step_name,
            &child_repository,
            &child_name,
        );
        parent.workflow_inputs =
            rewrite_parent_inputs(&parent.workflow_inputs, position + 1, &child_repository);
    }

    let mut plan = CompositionPlan::default();
    for nesting in &nestings {
        if !plan.children.contains(&nesting.child) {
            plan.children.push(nesting.child);
        }
        let children = plan.parents.entry(nesting.parent).or_default();
        if !children.contains(&nesting.child) {
            children.push(nesting.child);
        }
    }
    for &child in &plan.children {
        let rendered = &mut items[child].rendered;
        rendered.workflow = reroute_terminal_output(&rendered.workflow);
    }
    plan.independents = (0..items.len())
        .filter(|i| !plan.children.contains(i) && !plan.parents.contains_key(i))
        .collect();
    plan.nestings = nestings;

    tracing::debug!(
        children = plan.children.len(),
        parents = plan.parents.len(),
        independents = plan.independents.len(),
        "Composition planned",
    );
    plan
}
