//! `$ref` resolution
//!
//! Produces a self-contained schema by splicing every referenced definition
//! in place of its `$ref`. Supported reference shapes:
//!
//! - `#` stays untouched, it marks a recursive structure
//! - `#/path/to/def` is looked up in the document being resolved
//! - `uri#/path/to/def` is looked up in the resolved external document `uri`
//! - `uri` splices the whole resolved external document, whose `$id` must
//!   equal `uri`
//!
//! Keys next to a `$ref` are kept and take precedence over keys of the
//! spliced definition.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::ResolutionError;
use crate::store::SchemaSource;

/// Nested reference expansions allowed before giving up
pub const MAX_DEPTH: usize = 64;

const REF: &str = "$ref";
const ID: &str = "$id";

pub type Result<T> = std::result::Result<T, ResolutionError>;

/// Resolve every `$ref` of `schema`, fetching external documents through `lookup`
pub fn resolve<F>(schema: &Value, lookup: &F) -> Result<Value>
where
    F: Fn(&str) -> Option<Value>,
{
    Expansion { lookup }.walk(schema, schema, 0)
}

struct Expansion<'a, F> {
    lookup: &'a F,
}

impl<F> Expansion<'_, F>
where
    F: Fn(&str) -> Option<Value>,
{
    fn walk(&self, node: &Value, root: &Value, depth: usize) -> Result<Value> {
        match node {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get(REF) {
                    if reference != "#" {
                        return self.splice(reference, map, root, depth);
                    }
                }
                let mut resolved = Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), self.walk(value, root, depth)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.walk(item, root, depth))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn splice(
        &self,
        reference: &str,
        siblings: &Map<String, Value>,
        root: &Value,
        depth: usize,
    ) -> Result<Value> {
        if depth >= MAX_DEPTH {
            return Err(ResolutionError::DepthExceeded(MAX_DEPTH));
        }

        let mut merged = self.target(reference, root, depth + 1)?;
        for (key, value) in siblings {
            if key != REF {
                merged.insert(key.clone(), self.walk(value, root, depth)?);
            }
        }
        Ok(Value::Object(merged))
    }

    fn target(&self, reference: &str, root: &Value, depth: usize) -> Result<Map<String, Value>> {
        match reference.split_once('#') {
            // Definition inside the current document
            Some(("", fragment)) => {
                let definition = pointer(root, fragment, reference)?;
                let resolved = self.walk(definition, root, depth)?;
                into_object(resolved, reference)
            }
            // Definition inside an external document
            Some((uri, fragment)) if !fragment.is_empty() => {
                let document = self.external(uri, depth)?;
                let definition = pointer(&document, fragment, reference)?.clone();
                into_object(definition, reference)
            }
            // Whole external document, `uri` or `uri#`
            _ => {
                let uri = reference.split_once('#').map_or(reference, |(u, _)| u);
                if uri.is_empty() {
                    return Err(ResolutionError::InvalidReference(reference.to_string()));
                }
                let document = self.external(uri, depth)?;
                match document.get(ID) {
                    Some(Value::String(id)) if id == uri => {}
                    Some(other) => {
                        return Err(ResolutionError::IdMismatch {
                            requested: uri.to_string(),
                            declared: other
                                .as_str()
                                .map_or_else(|| other.to_string(), str::to_string),
                        })
                    }
                    None => return Err(ResolutionError::MissingId(uri.to_string())),
                }
                into_object(document, reference)
            }
        }
    }

    fn external(&self, uri: &str, depth: usize) -> Result<Value> {
        let document =
            (self.lookup)(uri).ok_or_else(|| ResolutionError::NotFound(uri.to_string()))?;
        self.walk(&document, &document, depth)
    }
}

fn pointer<'v>(document: &'v Value, fragment: &str, reference: &str) -> Result<&'v Value> {
    if !fragment.starts_with('/') {
        return Err(ResolutionError::InvalidReference(reference.to_string()));
    }
    document
        .pointer(fragment)
        .ok_or_else(|| ResolutionError::NotFound(reference.to_string()))
}

fn into_object(value: Value, reference: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ResolutionError::NotAnObject(reference.to_string())),
    }
}

/// External documents referenced directly by `schema`
pub fn external_references(schema: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_references(schema, &mut found);
    found
}

fn collect_references(node: &Value, found: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get(REF) {
                let uri = reference.split_once('#').map_or(reference.as_str(), |(u, _)| u);
                if !uri.is_empty() && !found.iter().any(|f| f == uri) {
                    found.push(uri.to_string());
                }
            }
            map.values().for_each(|value| collect_references(value, found));
        }
        Value::Array(items) => items.iter().for_each(|item| collect_references(item, found)),
        _ => {}
    }
}

/// Loads topic schemas and resolves them against a [`SchemaSource`]
#[derive(Clone)]
pub struct SchemaResolver {
    source: Arc<dyn SchemaSource>,
}

impl SchemaResolver {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self { source }
    }

    /// Fetch the schema stored under `tag`
    pub async fn load(&self, tag: &str) -> Result<Option<Value>> {
        Ok(self.source.fetch_schema(tag).await?)
    }

    /// Fetch and resolve the schema stored under `tag`
    pub async fn load_resolved(&self, tag: &str) -> Result<Option<Value>> {
        match self.load(tag).await? {
            Some(schema) => self.resolve(&schema).await.map(Some),
            None => Ok(None),
        }
    }

    /// Resolve `schema`, fetching every external document it needs first
    pub async fn resolve(&self, schema: &Value) -> Result<Value> {
        let documents = self.prefetch(schema).await?;
        resolve(schema, &|uri: &str| documents.get(uri).cloned())
    }

    async fn prefetch(&self, schema: &Value) -> Result<HashMap<String, Value>> {
        let mut documents = HashMap::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<String> = external_references(schema).into();

        while let Some(uri) = queue.pop_front() {
            if !visited.insert(uri.clone()) {
                continue;
            }
            match self.source.fetch_schema(&uri).await? {
                Some(document) => {
                    queue.extend(external_references(&document));
                    documents.insert(uri, document);
                }
                None => {
                    tracing::debug!(reference = %uri, "Referenced schema not found");
                }
            }
        }

        Ok(documents)
    }
}
