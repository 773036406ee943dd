// Per-collection CRUD facade over a store

use crate::document::{self, Document, CREATED, ID, UPDATED, VERSION};
use crate::error::{Result, StormError};
use crate::middleware::{handler, Method, MethodSelector, MiddlewareId, Phase};
use crate::path::FieldPath;
use crate::query::{Documents, Query};
use crate::refs::resolve_document;
use crate::schema::Schema;
use crate::store::{CollectionData, StoreInner};
use crate::util::unix_now;
use crate::validation::{apply_schema, ApplyMode};
use crate::value::{values_equal, Map, Value};
use serde_json::Value as Json;
use std::collections::HashSet;
use std::sync::Arc;

const FORBIDDEN_NAMES: [&str; 3] = ["__proto__", "prototype", "constructor"];
const UNSET: &str = "$unset";

/// Collection names are lowercase `[a-z0-9_-]+`, plural (ending in `s`) and
/// never one of the object-prototype names.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(StormError::InvalidCollectionName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };
    let charset_ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if !charset_ok {
        return invalid("must contain only lowercase letters, numbers, hyphens or underscores");
    }
    if FORBIDDEN_NAMES.contains(&name) {
        return invalid("must not be \"__proto__\", \"prototype\" or \"constructor\"");
    }
    if !name.ends_with('s') {
        return invalid("must be plural, for example users, categories, products");
    }
    Ok(())
}

fn ensure_query(query: &Json) -> Result<()> {
    if query.is_object() {
        Ok(())
    } else {
        Err(StormError::invalid_argument("query", "Invalid object type of query."))
    }
}

fn id_query(id: &str) -> Result<Json> {
    if id.is_empty() {
        return Err(StormError::invalid_argument("id", "Invalid string type of id."));
    }
    let mut query = serde_json::Map::new();
    query.insert(ID.to_string(), Json::String(id.to_string()));
    Ok(Json::Object(query))
}

fn unset_paths(updates: &serde_json::Map<String, Json>, replace: bool) -> Result<Vec<FieldPath>> {
    match updates.get(UNSET) {
        None => Ok(Vec::new()),
        Some(_) if replace => Err(StormError::Validation(
            "Cannot unset fields in replace operation.".into(),
        )),
        Some(Json::Object(paths)) => Ok(paths
            .keys()
            .filter(|key| !document::is_reserved(key))
            .map(|key| FieldPath::parse(key))
            .collect()),
        Some(_) => Err(StormError::invalid_argument(
            "updates",
            "\"$unset\" must be an object of field paths.",
        )),
    }
}

/// Merge `updates` into `target` leaf by leaf. Returns the number of leaves
/// that actually changed.
fn merge_fields(target: &mut Map, updates: &Map) -> usize {
    let mut changed = 0;
    for (key, value) in updates {
        match (value, target.get_mut(key)) {
            (Value::Object(sub), Some(Value::Object(existing))) => {
                changed += merge_fields(existing, sub);
            }
            (Value::Object(sub), None) if sub.is_empty() => {}
            (value, Some(existing)) if values_equal(existing, value) => {}
            (value, _) => {
                target.insert(key.clone(), value.clone());
                changed += 1;
            }
        }
    }
    changed
}

fn user_fields(fields: &Map) -> Value {
    Value::Object(
        fields
            .iter()
            .filter(|(key, _)| !document::is_reserved(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

/// Swap the user fields of `doc` for `replacement`, keeping identity and
/// timestamps. Returns whether anything differs.
fn replace_fields(doc: &mut Document, replacement: &Map) -> bool {
    let mut next = Map::new();
    for key in [ID, VERSION, CREATED, UPDATED] {
        if let Some(value) = doc.fields().get(key) {
            next.insert(key.to_string(), value.clone());
        }
    }
    for (key, value) in replacement {
        if !document::is_reserved(key) {
            next.insert(key.clone(), value.clone());
        }
    }
    if values_equal(&user_fields(doc.fields()), &user_fields(&next)) {
        return false;
    }
    *doc.fields_mut() = next;
    true
}

/// Handle to one collection of a [`crate::Store`].
///
/// All inputs and outputs are plain JSON. Results always have their
/// references expanded; stored documents keep the markers.
#[derive(Clone)]
pub struct Model {
    store: Arc<StoreInner>,
    name: String,
    schema: Arc<Schema>,
    data: Arc<CollectionData>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl Model {
    pub(crate) fn new(store: Arc<StoreInner>, name: &str, schema: Schema) -> Self {
        let data = store.collection(name);
        Model {
            store,
            name: name.to_string(),
            schema: Arc::new(schema),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    // ── Middleware ──────────────────────────────────────────────────

    pub fn pre<F>(&self, method: impl Into<MethodSelector>, f: F) -> MiddlewareId
    where
        F: Fn(&mut Json) -> Result<()> + Send + Sync + 'static,
    {
        self.store
            .middleware
            .register(Phase::Pre, &self.name, method.into(), handler(f))
    }

    pub fn post<F>(&self, method: impl Into<MethodSelector>, f: F) -> MiddlewareId
    where
        F: Fn(&mut Json) -> Result<()> + Send + Sync + 'static,
    {
        self.store
            .middleware
            .register(Phase::Post, &self.name, method.into(), handler(f))
    }

    pub fn pre_many<F>(&self, methods: &[MethodSelector], f: F) -> Vec<MiddlewareId>
    where
        F: Fn(&mut Json) -> Result<()> + Send + Sync + 'static,
    {
        self.store
            .middleware
            .register_many(Phase::Pre, &self.name, methods, handler(f))
    }

    pub fn post_many<F>(&self, methods: &[MethodSelector], f: F) -> Vec<MiddlewareId>
    where
        F: Fn(&mut Json) -> Result<()> + Send + Sync + 'static,
    {
        self.store
            .middleware
            .register_many(Phase::Post, &self.name, methods, handler(f))
    }

    pub fn unregister(&self, id: MiddlewareId) -> bool {
        self.store.middleware.unregister(id)
    }

    // ── Create ──────────────────────────────────────────────────────

    pub fn insert_one(&self, item: Json) -> Result<Option<Json>> {
        if !item.is_object() {
            return Err(StormError::invalid_argument("item", "Invalid object type of item."));
        }
        Ok(self.create(vec![item], "item")?.into_iter().next())
    }

    pub fn insert_many(&self, items: Json) -> Result<Vec<Json>> {
        let Json::Array(items) = items else {
            return Err(StormError::invalid_argument("items", "Invalid array type of items."));
        };
        if items.iter().any(|item| !item.is_object()) {
            return Err(StormError::invalid_argument(
                "items",
                "Every element of items must be an object.",
            ));
        }
        self.create(items, "items")
    }

    fn create(&self, mut items: Vec<Json>, argument: &'static str) -> Result<Vec<Json>> {
        let _writer = self.data.gate.lock();
        self.run(Phase::Pre, Method::Create, &mut items)?;

        let config = self.store.config.get_config();
        let mut prepared = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(source) = Value::from_json(item) else {
                return Err(StormError::invalid_argument(
                    argument,
                    format!("Invalid object type of {argument}."),
                ));
            };
            let mut fields = self.validate(&source, config.strict, ApplyMode::Full)?;
            fields.retain(|key, _| !document::is_reserved(key));
            if fields.is_empty() {
                continue;
            }
            self.check_required(&fields)?;
            prepared.push(fields);
        }

        let now = unix_now();
        let created: Vec<Document> = {
            let current = self.data.docs.read();
            let candidates: Vec<&Map> = prepared.iter().collect();
            let unique: Vec<&FieldPath> = self.schema.unique_paths().iter().collect();
            self.check_unique(&unique, &candidates, &current, &HashSet::new())?;

            let mut batch_ids = HashSet::new();
            let created: Vec<Document> = prepared
                .into_iter()
                .map(|fields| {
                    let mut doc = Document::new(fields);
                    doc.stamp_new(self.fresh_id(&current, &mut batch_ids), now, config.default_fields);
                    doc
                })
                .collect();
            created
        };

        if !created.is_empty() {
            {
                let mut current = self.data.docs.write();
                for doc in &created {
                    if let Some(id) = doc.id() {
                        current.insert(id.to_string(), doc.clone());
                    }
                }
            }
            self.persist(Method::Create, created.iter().map(Document::to_stored).collect());
        }

        let mut results: Vec<Json> = created.iter().map(|doc| self.resolve(doc)).collect();
        self.run(Phase::Post, Method::Create, &mut results)?;
        Ok(results)
    }

    // ── Read ────────────────────────────────────────────────────────

    pub fn find(&self, query: Json) -> Result<Vec<Json>> {
        self.find_items(query, None)
    }

    pub fn find_one(&self, query: Json) -> Result<Option<Json>> {
        Ok(self.find_items(query, Some(1))?.into_iter().next())
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Json>> {
        self.find_one(id_query(id)?)
    }

    /// Number of matching documents. Middleware is not involved.
    pub fn count(&self, query: Json) -> Result<usize> {
        ensure_query(&query)?;
        let docs = self.data.docs.read();
        let matched = Query::parse(&query).evaluate(&docs).len();
        Ok(matched)
    }

    pub fn exists(&self, query: Json) -> Result<bool> {
        Ok(self.count(query)? > 0)
    }

    fn find_items(&self, query: Json, limit: Option<usize>) -> Result<Vec<Json>> {
        ensure_query(&query)?;
        let mut payload = [query];
        self.run(Phase::Pre, Method::Read, &mut payload)?;
        let [query] = payload;

        let found = self.select(&query, limit);
        let mut results: Vec<Json> = found.iter().map(|doc| self.resolve(doc)).collect();
        self.run(Phase::Post, Method::Read, &mut results)?;
        Ok(results)
    }

    // ── Update / Replace ────────────────────────────────────────────

    pub fn update_one(&self, query: Json, updates: Json) -> Result<Option<Json>> {
        ensure_query(&query)?;
        Ok(self.modify(&query, updates, Some(1), false)?.into_iter().next())
    }

    pub fn update_many(&self, query: Json, updates: Json) -> Result<Vec<Json>> {
        ensure_query(&query)?;
        self.modify(&query, updates, None, false)
    }

    pub fn replace_one(&self, query: Json, replacement: Json) -> Result<Option<Json>> {
        ensure_query(&query)?;
        Ok(self.modify(&query, replacement, Some(1), true)?.into_iter().next())
    }

    pub fn replace_many(&self, query: Json, replacement: Json) -> Result<Vec<Json>> {
        ensure_query(&query)?;
        self.modify(&query, replacement, None, true)
    }

    pub fn find_by_id_and_update(&self, id: &str, updates: Json) -> Result<Option<Json>> {
        let query = id_query(id)?;
        Ok(self.modify(&query, updates, Some(1), false)?.into_iter().next())
    }

    pub fn find_by_id_and_replace(&self, id: &str, replacement: Json) -> Result<Option<Json>> {
        let query = id_query(id)?;
        Ok(self.modify(&query, replacement, Some(1), true)?.into_iter().next())
    }

    fn modify(&self, query: &Json, updates: Json, limit: Option<usize>, replace: bool) -> Result<Vec<Json>> {
        let Json::Object(updates) = updates else {
            return Err(StormError::invalid_argument("updates", "Invalid object type of updates."));
        };
        let unset = unset_paths(&updates, replace)?;
        let method = if replace { Method::Replace } else { Method::Update };

        let _writer = self.data.gate.lock();
        let targets = self.select(query, limit);
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        // Handlers see the targets as they are now and may abort; edits are discarded.
        let mut payload: Vec<Json> = targets.iter().map(|doc| self.resolve(doc)).collect();
        self.run(Phase::Pre, method, &mut payload)?;

        let config = self.store.config.get_config();
        let changes = self.prepare_changes(updates, replace, config.strict)?;

        let mut updated = Vec::with_capacity(targets.len());
        for mut doc in targets {
            let changed = if replace {
                replace_fields(&mut doc, &changes)
            } else {
                let merged = merge_fields(doc.fields_mut(), &changes);
                let removed = unset
                    .iter()
                    .filter(|path| path.remove(doc.fields_mut()).is_some())
                    .count();
                merged + removed > 0
            };
            self.check_required(doc.fields())?;
            updated.push((doc, changed));
        }

        {
            let current = self.data.docs.read();
            let unique: Vec<&FieldPath> = self
                .schema
                .unique_paths()
                .iter()
                .filter(|path| replace || path.get(&changes).is_some())
                .collect();
            let exclude: HashSet<String> = updated
                .iter()
                .filter_map(|(doc, _)| doc.id().map(str::to_string))
                .collect();
            let candidates: Vec<&Map> = updated.iter().map(|(doc, _)| doc.fields()).collect();
            self.check_unique(&unique, &candidates, &current, &exclude)?;
        }

        let now = unix_now();
        let mut stored = Vec::new();
        {
            let mut current = self.data.docs.write();
            for (doc, changed) in updated.iter_mut() {
                if !*changed {
                    continue;
                }
                doc.touch(now, config.default_fields);
                if let Some(slot) = doc.id().and_then(|id| current.get_mut(id)) {
                    *slot = doc.clone();
                    stored.push(doc.to_stored());
                }
            }
        }
        if !stored.is_empty() {
            self.persist(method, stored);
        }

        let mut results: Vec<Json> = updated.iter().map(|(doc, _)| self.resolve(doc)).collect();
        self.run(Phase::Post, method, &mut results)?;
        Ok(results)
    }

    /// Turn raw update input into validated fields. Dotted keys address
    /// nested fields; operator and metadata keys are dropped.
    fn prepare_changes(
        &self,
        updates: serde_json::Map<String, Json>,
        replace: bool,
        strict: bool,
    ) -> Result<Map> {
        let mut source = Map::new();
        for (key, value) in updates {
            if key.starts_with('$') || document::is_reserved(&key) {
                continue;
            }
            let value = Value::from_json(value);
            if key.contains('.') {
                FieldPath::parse(&key).set(&mut source, value);
            } else {
                source.insert(key, value);
            }
        }
        let mode = if replace { ApplyMode::Full } else { ApplyMode::Partial };
        self.validate(&source, strict, mode)
    }

    // ── Delete ──────────────────────────────────────────────────────

    pub fn delete_one(&self, query: Json) -> Result<Option<Json>> {
        ensure_query(&query)?;
        Ok(self.remove(&query, Some(1))?.into_iter().next())
    }

    pub fn delete_many(&self, query: Json) -> Result<Vec<Json>> {
        ensure_query(&query)?;
        self.remove(&query, None)
    }

    pub fn find_by_id_and_delete(&self, id: &str) -> Result<Option<Json>> {
        let query = id_query(id)?;
        Ok(self.remove(&query, Some(1))?.into_iter().next())
    }

    fn remove(&self, query: &Json, limit: Option<usize>) -> Result<Vec<Json>> {
        let _writer = self.data.gate.lock();
        let targets = self.select(query, limit);
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        // Resolve before removal so references between the removed documents still expand.
        let mut results: Vec<Json> = targets.iter().map(|doc| self.resolve(doc)).collect();
        let mut payload = results.clone();
        self.run(Phase::Pre, Method::Delete, &mut payload)?;

        let ids: HashSet<&str> = targets.iter().filter_map(Document::id).collect();
        self.data.docs.write().retain(|id, _| !ids.contains(id.as_str()));
        self.persist(Method::Delete, targets.iter().map(Document::to_stored).collect());

        self.run(Phase::Post, Method::Delete, &mut results)?;
        Ok(results)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn run(&self, phase: Phase, method: Method, payload: &mut [Json]) -> Result<()> {
        self.store.middleware.run(phase, &self.name, method, payload)
    }

    fn resolve(&self, doc: &Document) -> Json {
        resolve_document(&self.name, doc, self.store.as_ref())
    }

    /// Clone the matching documents out of the collection.
    fn select(&self, query: &Json, limit: Option<usize>) -> Vec<Document> {
        let docs = self.data.docs.read();
        let mut found = Query::parse(query).evaluate(&docs);
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        let owned: Vec<Document> = found.into_iter().cloned().collect();
        owned
    }

    fn validate(&self, source: &Map, strict: bool, mode: ApplyMode) -> Result<Map> {
        apply_schema(source, &self.schema, strict, mode)
    }

    fn check_required(&self, fields: &Map) -> Result<()> {
        for path in self.schema.required_paths() {
            if path.get(fields).map_or(true, Value::is_null) {
                return Err(StormError::RequiredField {
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Reject a candidate whose value on a unique path is already used by an
    /// earlier candidate or by a stored document outside `exclude`.
    fn check_unique(
        &self,
        paths: &[&FieldPath],
        candidates: &[&Map],
        current: &Documents,
        exclude: &HashSet<String>,
    ) -> Result<()> {
        for path in paths {
            let mut seen: Vec<&Value> = Vec::new();
            for fields in candidates {
                let Some(value) = path.get(fields).filter(|v| !v.is_null()) else {
                    continue;
                };
                let taken = seen.iter().any(|other| values_equal(other, value))
                    || current.iter().any(|(id, doc)| {
                        !exclude.contains(id) && doc.get(path).is_some_and(|v| values_equal(v, value))
                    });
                if taken {
                    return Err(StormError::UniqueViolation {
                        path: path.to_string(),
                    });
                }
                seen.push(value);
            }
        }
        Ok(())
    }

    fn fresh_id(&self, current: &Documents, batch: &mut HashSet<String>) -> String {
        loop {
            let id = self.store.ids.generate();
            if !current.contains_key(&id) && batch.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Hand the full collection snapshot to the storage adapter.
    fn persist(&self, method: Method, changes: Vec<Json>) {
        let persistence = &self.store.persistence;
        if !persistence.has_storage() {
            return;
        }
        let snapshot = self.data.snapshot();
        match method {
            Method::Create => persistence.on_insert(&self.name, snapshot, changes),
            Method::Update | Method::Replace => persistence.on_update(&self.name, snapshot, changes),
            Method::Delete => persistence.on_delete(&self.name, snapshot, changes),
            Method::Read => {}
        }
    }
}
