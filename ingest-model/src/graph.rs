//! Validated key dependency graph over entity types.

use crate::{KeyComposition, ModelError, ModelResult};
use std::collections::{BTreeMap, HashMap, HashSet};

/// The full set of key composition rules, checked to form a DAG.
///
/// Construction is the only place rules are validated: unknown references,
/// empty rules and cycles are rejected here, so resolution never has to
/// guard against them.
#[derive(Debug, Clone, Default)]
pub struct KeyGraph {
    rules: BTreeMap<String, KeyComposition>,
    /// Dependencies before dependents.
    topo_order: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

impl KeyGraph {
    pub fn new(rules: impl IntoIterator<Item = (String, KeyComposition)>) -> ModelResult<Self> {
        let rules: BTreeMap<String, KeyComposition> = rules.into_iter().collect();

        for (entity, rule) in &rules {
            if rule.is_empty() && rule.key_field.is_none() {
                return Err(ModelError::EmptyRule(entity.clone()));
            }
            for reference in rule.dependencies() {
                if !rules.contains_key(reference) {
                    return Err(ModelError::UnknownReference {
                        entity: entity.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
        }

        let mut topo_order = Vec::with_capacity(rules.len());
        {
            let mut state: HashMap<&str, Visit> = HashMap::new();
            for entity in rules.keys() {
                let mut path = Vec::new();
                visit(&rules, entity, &mut state, &mut path, &mut topo_order)?;
            }
        }

        Ok(Self { rules, topo_order })
    }

    pub fn rule(&self, entity_type: &str) -> Option<&KeyComposition> {
        self.rules.get(entity_type)
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.rules.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Every entity type, dependencies first.
    pub fn topological_order(&self) -> &[String] {
        &self.topo_order
    }

    /// Direct key dependencies of an entity type.
    pub fn dependencies(&self, entity_type: &str) -> Vec<&str> {
        self.rules
            .get(entity_type)
            .map(|rule| rule.dependencies().collect())
            .unwrap_or_default()
    }

    /// Checks that a processing order never places an entity type before
    /// one of its (transitive) key dependencies.
    ///
    /// Dependencies that are absent from `order` are fine: their keys are
    /// still derived from the dependent's own record.
    pub fn validate_order<S: AsRef<str>>(&self, order: &[S]) -> ModelResult<()> {
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, e)| (e.as_ref(), i))
            .collect();

        for (i, entity) in order.iter().enumerate() {
            let mut seen = HashSet::new();
            let mut stack: Vec<&str> = self.dependencies(entity.as_ref());
            while let Some(dependency) = stack.pop() {
                if !seen.insert(dependency) {
                    continue;
                }
                if position.get(dependency).is_some_and(|&p| p > i) {
                    return Err(ModelError::OrderViolation {
                        entity: entity.as_ref().to_string(),
                        dependency: dependency.to_string(),
                    });
                }
                stack.extend(self.dependencies(dependency));
            }
        }
        Ok(())
    }
}

fn visit<'a>(
    rules: &'a BTreeMap<String, KeyComposition>,
    entity: &'a str,
    state: &mut HashMap<&'a str, Visit>,
    path: &mut Vec<&'a str>,
    out: &mut Vec<String>,
) -> ModelResult<()> {
    match state.get(entity) {
        Some(Visit::Done) => return Ok(()),
        Some(Visit::InProgress) => {
            let start = path.iter().position(|e| *e == entity).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|e| e.to_string()).collect();
            cycle.push(entity.to_string());
            return Err(ModelError::Cycle(cycle));
        }
        None => {}
    }

    state.insert(entity, Visit::InProgress);
    path.push(entity);
    if let Some(rule) = rules.get(entity) {
        for dependency in rule.dependencies() {
            visit(rules, dependency, state, path, out)?;
        }
    }
    path.pop();
    state.insert(entity, Visit::Done);
    out.push(entity.to_string());
    Ok(())
}
