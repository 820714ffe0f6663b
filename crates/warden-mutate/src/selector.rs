//! Stable field selectors such as `outbounds[tag=wg-jp].peers.0.server`.

use std::fmt;

use serde_json::Value;

use crate::error::{MutateError, MutateResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Object member.
    Key(String),
    /// Array element by position.
    Index(usize),
    /// First array element whose `key` member is the string `value`.
    Match { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    raw: String,
    steps: Vec<Step>,
}

impl Selector {
    pub fn parse(raw: &str) -> MutateResult<Self> {
        let err = |reason: &str| MutateError::Selector {
            selector: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut steps = Vec::new();
        let mut word = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    push_word(&mut steps, &mut word);
                    if matches!(chars.peek(), None | Some('.')) {
                        return Err(err("empty path segment"));
                    }
                }
                '[' => {
                    push_word(&mut steps, &mut word);
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(err("unclosed '['"));
                    }
                    let (key, value) = inner
                        .split_once('=')
                        .ok_or_else(|| err("expected [key=value]"))?;
                    if key.trim().is_empty() {
                        return Err(err("empty match key"));
                    }
                    steps.push(Step::Match {
                        key: key.trim().to_string(),
                        value: value.trim().to_string(),
                    });
                }
                ']' => return Err(err("unexpected ']'")),
                c => word.push(c),
            }
        }
        push_word(&mut steps, &mut word);

        if steps.is_empty() {
            return Err(err("empty selector"));
        }
        Ok(Self {
            raw: raw.to_string(),
            steps,
        })
    }

    /// `outbounds[tag=<tag>]` followed by an optional dotted field path.
    pub fn for_entity(array: &str, tag: &str, field: &str) -> MutateResult<Self> {
        let base = format!("{array}[tag={tag}]");
        if field.is_empty() {
            Self::parse(&base)
        } else {
            Self::parse(&format!("{base}.{field}"))
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn get<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.steps.iter().try_fold(root, |node, step| step_ref(node, step))
    }

    pub fn get_mut<'v>(&self, root: &'v mut Value) -> Option<&'v mut Value> {
        self.steps.iter().try_fold(root, |node, step| step_mut(node, step))
    }

    /// Replace the selected value, returning the previous one.
    ///
    /// Only the final object member may be absent; it is then added.
    pub fn set(&self, root: &mut Value, new: Value) -> MutateResult<Option<Value>> {
        let not_found = || MutateError::NotFound(self.raw.clone());
        let (last, parents) = self.steps.split_last().ok_or_else(not_found)?;
        let parent = parents
            .iter()
            .try_fold(root, |node, step| step_mut(node, step))
            .ok_or_else(not_found)?;

        match (last, parent) {
            (Step::Key(key), Value::Object(map)) => Ok(map.insert(key.clone(), new)),
            (step, parent) => {
                let slot = step_mut(parent, step).ok_or_else(not_found)?;
                Ok(Some(std::mem::replace(slot, new)))
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn push_word(steps: &mut Vec<Step>, word: &mut String) {
    if word.is_empty() {
        return;
    }
    let w = std::mem::take(word);
    match w.parse::<usize>() {
        Ok(i) => steps.push(Step::Index(i)),
        Err(_) => steps.push(Step::Key(w)),
    }
}

fn matches(item: &Value, key: &str, value: &str) -> bool {
    item.get(key).and_then(Value::as_str) == Some(value)
}

fn step_ref<'v>(node: &'v Value, step: &Step) -> Option<&'v Value> {
    match (step, node) {
        (Step::Key(k), Value::Object(map)) => map.get(k),
        (Step::Index(i), Value::Array(items)) => items.get(*i),
        (Step::Index(i), Value::Object(map)) => map.get(&i.to_string()),
        (Step::Match { key, value }, Value::Array(items)) => {
            items.iter().find(|item| matches(item, key, value))
        }
        _ => None,
    }
}

fn step_mut<'v>(node: &'v mut Value, step: &Step) -> Option<&'v mut Value> {
    match (step, node) {
        (Step::Key(k), Value::Object(map)) => map.get_mut(k),
        (Step::Index(i), Value::Array(items)) => items.get_mut(*i),
        (Step::Index(i), Value::Object(map)) => map.get_mut(&i.to_string()),
        (Step::Match { key, value }, Value::Array(items)) => {
            items.iter_mut().find(|item| matches(item, key, value))
        }
        _ => None,
    }
}
