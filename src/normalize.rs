//! Schema normalization applied once to every freshly loaded document.
//!
//! Normalization is a single top-down traversal that runs an ordered list
//! of [`NormalizationRule`]s on every schema node and returns a new tree.
//! The default rules are:
//!
//! 1. [`AbsolutizeRefs`]: relative `$ref`s are resolved against the
//!    document's `$id` (and any nested `$id`).
//! 2. [`HoistBooleanOperators`]: keywords sitting next to
//!    `allOf`/`anyOf`/`oneOf` in an object schema are merged into every
//!    branch, so each branch describes the full object on its own.
//!
//! Only schema-bearing keywords are traversed; instance data under
//! `examples`, `default`, `enum` and `const` is never rewritten.
//!
//! A document is rewritten until a pass leaves it unchanged, so
//! normalizing an already normalized document returns it unchanged.

use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::types::BOOLEAN_OPERATORS;

/// Keywords whose value is an object of named subschemas.
const SCHEMA_MAP_KEYWORDS: &[&str] = &[
    "properties",
    "patternProperties",
    "$defs",
    "definitions",
    "dependentSchemas",
];

/// Keywords whose value is a single subschema.
const SCHEMA_KEYWORDS: &[&str] = &[
    "additionalProperties",
    "additionalItems",
    "unevaluatedItems",
    "unevaluatedProperties",
    "contains",
    "propertyNames",
    "not",
    "if",
    "then",
    "else",
];

/// Keywords whose value is an array of subschemas.
const SCHEMA_ARRAY_KEYWORDS: &[&str] = &["allOf", "anyOf", "oneOf", "prefixItems"];

/// Upper bound on rewrite passes over one document.
const MAX_PASSES: usize = 8;

/// Keywords never hoisted into boolean-operator branches.
const NON_HOISTED_KEYWORDS: &[&str] = &["allOf", "anyOf", "oneOf", "$id", "id", "$schema"];

/// Shape of a schema node, derived from the keywords it carries.
///
/// A node can have several shapes at once (an object schema with an
/// `allOf` is both [`NodeKind::ObjectSchema`] and
/// [`NodeKind::BooleanCombinator`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Carries a string `$ref`.
    Reference,
    /// Carries `allOf`, `anyOf` or `oneOf`.
    BooleanCombinator,
    /// Carries `properties`.
    ObjectSchema,
    /// None of the above.
    Other,
}

impl NodeKind {
    /// Every kind that applies to `node`, or `[Other]`.
    pub fn classify(node: &Map<String, Value>) -> Vec<NodeKind> {
        let mut kinds = Vec::new();
        if node.get("$ref").map(Value::is_string).unwrap_or(false) {
            kinds.push(NodeKind::Reference);
        }
        if BOOLEAN_OPERATORS
            .iter()
            .any(|op| node.get(*op).map(Value::is_array).unwrap_or(false))
        {
            kinds.push(NodeKind::BooleanCombinator);
        }
        if node.get("properties").map(Value::is_object).unwrap_or(false) {
            kinds.push(NodeKind::ObjectSchema);
        }
        if kinds.is_empty() {
            kinds.push(NodeKind::Other);
        }
        kinds
    }
}

/// Per-node context handed to rules.
#[derive(Debug, Clone, Default)]
pub struct NormalizeContext {
    /// Base URI in scope: the document `$id`, re-based by nested `$id`s.
    pub base: Option<Url>,
}

impl NormalizeContext {
    /// Context for the children of `node`, honoring a nested `$id`.
    fn enter(&self, node: &Map<String, Value>) -> NormalizeContext {
        let Some(id) = node.get("$id").and_then(Value::as_str) else {
            return self.clone();
        };
        let base = match &self.base {
            Some(base) => base.join(id).ok(),
            None => Url::parse(id).ok(),
        };
        NormalizeContext {
            base: base.or_else(|| self.base.clone()),
        }
    }
}

/// A rewrite applied to schema nodes during normalization.
pub trait NormalizationRule: Send + Sync {
    /// Stable rule name, used in logs.
    fn name(&self) -> &'static str;

    /// Whether the rule handles a node of these kinds.
    fn applies_to(&self, kinds: &[NodeKind]) -> bool;

    /// Rewrite one node. Children are normalized afterwards.
    fn apply(&self, node: Map<String, Value>, context: &NormalizeContext) -> Map<String, Value>;
}

/// Rewrites relative `$ref`s to absolute URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsolutizeRefs;

impl NormalizationRule for AbsolutizeRefs {
    fn name(&self) -> &'static str {
        "absolutize-refs"
    }

    fn applies_to(&self, kinds: &[NodeKind]) -> bool {
        kinds.contains(&NodeKind::Reference)
    }

    fn apply(&self, mut node: Map<String, Value>, context: &NormalizeContext) -> Map<String, Value> {
        let Some(base) = &context.base else {
            return node;
        };
        if let Some(Value::String(reference)) = node.get("$ref") {
            if let Some(absolute) = absolutize(reference, base) {
                node.insert("$ref".to_string(), Value::String(absolute));
            }
        }
        node
    }
}

/// Resolve `reference` against `base` unless it already carries a scheme.
pub fn absolutize(reference: &str, base: &Url) -> Option<String> {
    if Url::parse(reference).is_ok() {
        return None;
    }
    base.join(reference).ok().map(String::from)
}

/// Merges keywords adjacent to boolean operators into every branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoistBooleanOperators;

impl NormalizationRule for HoistBooleanOperators {
    fn name(&self) -> &'static str {
        "hoist-boolean-operators"
    }

    fn applies_to(&self, kinds: &[NodeKind]) -> bool {
        kinds.contains(&NodeKind::ObjectSchema) && kinds.contains(&NodeKind::BooleanCombinator)
    }

    fn apply(&self, mut node: Map<String, Value>, _context: &NormalizeContext) -> Map<String, Value> {
        let adjacent: Map<String, Value> = node
            .iter()
            .filter(|(k, _)| !NON_HOISTED_KEYWORDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for op in BOOLEAN_OPERATORS {
            if let Some(Value::Array(branches)) = node.get_mut(*op) {
                for branch in branches.iter_mut() {
                    *branch = merge_schemas(branch, &Value::Object(adjacent.clone()));
                }
            }
        }
        node
    }
}

/// Ordered set of normalization rules.
pub struct Normalizer {
    rules: Vec<Box<dyn NormalizationRule>>,
}

impl Default for Normalizer {
    /// Ref absolutization followed by boolean-operator hoisting.
    fn default() -> Self {
        Normalizer::empty()
            .with_rule(AbsolutizeRefs)
            .with_rule(HoistBooleanOperators)
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl Normalizer {
    /// A normalizer without rules (only copies the tree).
    pub fn empty() -> Self {
        Normalizer { rules: Vec::new() }
    }

    /// Append a rule; rules run in the order they were added.
    pub fn with_rule(mut self, rule: impl NormalizationRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Normalize a whole document, returning the rewritten copy.
    ///
    /// Passes repeat until the tree stops changing. Hoisting copies raw
    /// sibling keywords into branches that are normalized afterwards, so a
    /// single pass is not always stable.
    pub fn normalize(&self, document: &Value) -> Value {
        let context = NormalizeContext::default();
        let mut current = self.normalize_node(document, &context);
        for _ in 1..MAX_PASSES {
            let next = self.normalize_node(&current, &context);
            if next == current {
                return current;
            }
            current = next;
        }
        warn!(passes = MAX_PASSES, "normalization did not settle");
        current
    }

    fn normalize_node(&self, value: &Value, context: &NormalizeContext) -> Value {
        let Value::Object(map) = value else {
            return value.clone();
        };

        let context = context.enter(map);
        let kinds = NodeKind::classify(map);

        let mut node = map.clone();
        for rule in &self.rules {
            if rule.applies_to(&kinds) {
                node = rule.apply(node, &context);
            }
        }

        for (key, child) in node.iter_mut() {
            let key = key.as_str();
            if SCHEMA_MAP_KEYWORDS.contains(&key) {
                if let Value::Object(entries) = child {
                    for entry in entries.values_mut() {
                        *entry = self.normalize_node(entry, &context);
                    }
                }
            } else if SCHEMA_KEYWORDS.contains(&key) {
                *child = self.normalize_node(child, &context);
            } else if SCHEMA_ARRAY_KEYWORDS.contains(&key) {
                if let Value::Array(items) = child {
                    for item in items.iter_mut() {
                        *item = self.normalize_node(item, &context);
                    }
                }
            } else if key == "items" {
                match child {
                    Value::Array(items) => {
                        for item in items.iter_mut() {
                            *item = self.normalize_node(item, &context);
                        }
                    }
                    _ => *child = self.normalize_node(child, &context),
                }
            } else if key == "dependencies" {
                // Values are either subschemas or arrays of property names.
                if let Value::Object(entries) = child {
                    for entry in entries.values_mut() {
                        if !entry.is_array() {
                            *entry = self.normalize_node(entry, &context);
                        }
                    }
                }
            }
        }

        // Branches that became equal once normalized are the same constraint.
        if let Some(Value::Array(branches)) = node.get_mut("allOf") {
            dedup_branches(branches);
        }

        Value::Object(node)
    }
}

fn dedup_branches(branches: &mut Vec<Value>) {
    let mut unique: Vec<Value> = Vec::with_capacity(branches.len());
    for branch in branches.drain(..) {
        if !unique.contains(&branch) {
            unique.push(branch);
        }
    }
    *branches = unique;
}

// --- allOf merging ---

/// Keywords that only annotate; the first value wins on merge.
const ANNOTATION_KEYWORDS: &[&str] = &[
    "title",
    "description",
    "$comment",
    "examples",
    "default",
    "deprecated",
    "readOnly",
    "writeOnly",
    "$id",
    "id",
    "$schema",
];

const LOWER_BOUNDS: &[&str] = &[
    "minimum",
    "exclusiveMinimum",
    "minLength",
    "minItems",
    "minProperties",
];

const UPPER_BOUNDS: &[&str] = &[
    "maximum",
    "exclusiveMaximum",
    "maxLength",
    "maxItems",
    "maxProperties",
];

/// Keywords that read each other's values. A group is only flattened when
/// one side lacks it entirely or both sides carry it identically.
const DEPENDENT_GROUPS: &[&[&str]] = &[
    &["if", "then", "else"],
    &["contains", "minContains", "maxContains"],
    &["items", "additionalItems", "prefixItems"],
];

/// Schema equivalent to `allOf: [a, b]`, flattened where possible.
pub fn merge_schemas(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Bool(true), other) | (other, Value::Bool(true)) => other.clone(),
        (Value::Bool(false), _) | (_, Value::Bool(false)) => Value::Bool(false),
        (Value::Object(x), Value::Object(y)) => merge_all_of(x, y),
        _ if a == b => a.clone(),
        _ => nested_all_of(a.clone(), b.clone()),
    }
}

/// Merge `extra` into `base` with `allOf` semantics.
///
/// Keywords are combined pairwise; if any keyword cannot be combined the
/// result is the unflattened `{"allOf": [base, extra]}`. A `base` that
/// already lists `extra` in its `allOf` is returned unchanged, which makes
/// merging the same `extra` twice a no-op.
pub fn merge_all_of(base: &Map<String, Value>, extra: &Map<String, Value>) -> Value {
    let already_merged = base
        .get("allOf")
        .and_then(Value::as_array)
        .map(|branches| branches.iter().any(|b| b.as_object() == Some(extra)))
        .unwrap_or(false);
    if already_merged {
        return Value::Object(base.clone());
    }

    match flatten(base, extra) {
        Some(merged) => Value::Object(merged),
        None => nested_all_of(Value::Object(base.clone()), Value::Object(extra.clone())),
    }
}

fn nested_all_of(a: Value, b: Value) -> Value {
    let mut map = Map::new();
    map.insert("allOf".to_string(), Value::Array(vec![a, b]));
    Value::Object(map)
}

fn flatten(base: &Map<String, Value>, extra: &Map<String, Value>) -> Option<Map<String, Value>> {
    // Evaluation-dependent keywords change meaning once flattened.
    for keyword in ["unevaluatedProperties", "unevaluatedItems"] {
        if base.contains_key(keyword) || extra.contains_key(keyword) {
            return None;
        }
    }
    for group in DEPENDENT_GROUPS {
        let x = keyword_group(base, group);
        let y = keyword_group(extra, group);
        if x.is_empty() || y.is_empty() || x == y {
            continue;
        }
        // Two single-schema `items` apply to every element: allOf of both.
        if only_schema_items(&x) && only_schema_items(&y) {
            continue;
        }
        return None;
    }
    // additionalProperties covers names matched by neither `properties`
    // nor `patternProperties` of its own schema; both sets must agree.
    if (closes_object(base) || closes_object(extra))
        && (names_of(base, "properties") != names_of(extra, "properties")
            || names_of(base, "patternProperties") != names_of(extra, "patternProperties"))
    {
        return None;
    }

    let mut out = base.clone();
    for (key, value) in extra {
        match out.get(key) {
            None => {
                out.insert(key.clone(), value.clone());
            }
            Some(existing) if existing == value => {}
            Some(existing) => {
                let combined = combine_keyword(key, existing, value)?;
                out.insert(key.clone(), combined);
            }
        }
    }
    Some(out)
}

fn keyword_group(m: &Map<String, Value>, group: &[&str]) -> Map<String, Value> {
    group
        .iter()
        .filter_map(|k| m.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

fn only_schema_items(group: &Map<String, Value>) -> bool {
    group.len() == 1 && group.get("items").map(|v| !v.is_array()).unwrap_or(false)
}

fn names_of(m: &Map<String, Value>, keyword: &str) -> Vec<String> {
    let mut names: Vec<String> = m
        .get(keyword)
        .and_then(Value::as_object)
        .map(|p| p.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    names
}

fn closes_object(m: &Map<String, Value>) -> bool {
    match m.get("additionalProperties") {
        None | Some(Value::Bool(true)) => false,
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}

/// Combine two differing values of the same keyword, or `None` on conflict.
fn combine_keyword(keyword: &str, a: &Value, b: &Value) -> Option<Value> {
    if ANNOTATION_KEYWORDS.contains(&keyword) {
        return Some(a.clone());
    }
    if LOWER_BOUNDS.contains(&keyword) {
        return pick_number(a, b, |x, y| x >= y);
    }
    if UPPER_BOUNDS.contains(&keyword) {
        return pick_number(a, b, |x, y| x <= y);
    }
    if SCHEMA_MAP_KEYWORDS.contains(&keyword) {
        let (Value::Object(x), Value::Object(y)) = (a, b) else {
            return None;
        };
        let mut out = x.clone();
        for (name, schema) in y {
            let merged = match out.get(name) {
                Some(existing) if existing != schema => merge_schemas(existing, schema),
                _ => schema.clone(),
            };
            out.insert(name.clone(), merged);
        }
        return Some(Value::Object(out));
    }

    match keyword {
        "required" | "allOf" => {
            let (Value::Array(x), Value::Array(y)) = (a, b) else {
                return None;
            };
            let mut out = x.clone();
            for item in y {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            Some(Value::Array(out))
        }
        "type" => {
            let x = type_set(a)?;
            let y = type_set(b)?;
            let mut out: Vec<&str> = Vec::new();
            for t in x {
                let common = if y.contains(&t) {
                    Some(t)
                } else if (t == "number" && y.contains(&"integer"))
                    || (t == "integer" && y.contains(&"number"))
                {
                    Some("integer")
                } else {
                    None
                };
                if let Some(common) = common {
                    if !out.contains(&common) {
                        out.push(common);
                    }
                }
            }
            match out.as_slice() {
                [] => None,
                [single] => Some(Value::String(single.to_string())),
                many => Some(Value::Array(
                    many.iter().map(|t| Value::String(t.to_string())).collect(),
                )),
            }
        }
        "enum" => {
            let (Value::Array(x), Value::Array(y)) = (a, b) else {
                return None;
            };
            let out: Vec<Value> = x.iter().filter(|v| y.contains(v)).cloned().collect();
            (!out.is_empty()).then_some(Value::Array(out))
        }
        "uniqueItems" => Some(Value::Bool(
            a.as_bool().unwrap_or(false) || b.as_bool().unwrap_or(false),
        )),
        "additionalProperties" | "propertyNames" => {
            Some(merge_schemas(a, b))
        }
        "items" if a.is_object() && b.is_object() => Some(merge_schemas(a, b)),
        _ => None,
    }
}

fn pick_number(a: &Value, b: &Value, keep_a: impl Fn(f64, f64) -> bool) -> Option<Value> {
    let (x, y) = (a.as_f64()?, b.as_f64()?);
    Some(if keep_a(x, y) { a.clone() } else { b.clone() })
}

fn type_set(value: &Value) -> Option<Vec<&str>> {
    match value {
        Value::String(s) => Some(vec![s.as_str()]),
        Value::Array(items) => items.iter().map(Value::as_str).collect(),
        _ => None,
    }
}
