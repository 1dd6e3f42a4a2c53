//! GET / PUT / POST / DELETE semantics. Auth has already run when these are called.

use super::Resource;
use crate::error::{AppError, RestError};
use crate::filter::{Filter, Query};
use crate::keys::Keys;
use crate::method::Method;
use crate::response::Envelope;
use crate::store::{Row, Session};
use crate::validation::Candidate;
use serde_json::{Map, Value as Json};

impl Resource {
    /// Run a verb: the registered handler when there is one, else the built-in.
    pub fn handle(&self, method: Method, payload: Option<&Json>, keys: &Keys) -> Result<Envelope, AppError> {
        if let Some(custom) = self.def.handlers.get(&method) {
            return custom(self, payload, keys);
        }
        match method {
            Method::Get => self.get(payload, keys),
            Method::Put => self.put(payload, keys),
            Method::Post => self.post(payload, keys),
            Method::Delete => self.delete(payload, keys),
        }
    }

    pub fn get(&self, _payload: Option<&Json>, keys: &Keys) -> Result<Envelope, AppError> {
        let mut session = self.store.session()?;
        if self.has(keys) {
            let row = self.fetch(session.as_mut(), keys)?;
            return Ok(Envelope::one(self.serialize(&row)?));
        }
        let query = self.query();
        let rows = session.all(&query)?;
        let count = session.count(&query)?;
        Ok(Envelope::many(self.serialize_all(&rows)?, Some(count)))
    }

    pub fn put(&self, payload: Option<&Json>, keys: &Keys) -> Result<Envelope, AppError> {
        if !self.has(keys) {
            return self.replace_all(payload);
        }
        let payload = object_payload(payload)?;
        self.check_coherent_keys(&payload, keys)?;

        let mut session = self.store.session()?;
        let existing = session.first(&self.query().filter_by(keys))?;
        if existing.is_none() && self.hidden_by_filter(session.as_mut(), keys)? {
            return Err(self.not_found(keys).into());
        }
        let mut row = match &existing {
            Some(row) => row.clone(),
            None => {
                let mut row = self.blank_row();
                for (name, value) in keys.present() {
                    row.set(name, value.clone());
                }
                row
            }
        };
        self.def.coercers.merge(&payload, &mut row, &self.writable())?;
        if existing.is_none() {
            self.apply_defaults(&payload, &mut row);
        }
        self.apply_fixed(&mut row);

        let candidate = match existing {
            Some(old) => Candidate::updated(row, old),
            None => Candidate::created(row),
        };
        let mut candidates = vec![candidate];
        self.validate(&mut candidates)?;
        let stored = self.write_all(session.as_mut(), candidates)?;
        session.commit()?;
        Ok(Envelope::many(self.serialize_all(&stored)?, None))
    }

    pub fn post(&self, payload: Option<&Json>, keys: &Keys) -> Result<Envelope, AppError> {
        if self.has(keys) {
            return Err(RestError::Unsupported(
                "You can't create a new collection here. If you want to update an item use the PUT method".into(),
            )
            .into());
        }
        let payload = object_payload(payload)?;
        let mut row = self.blank_row();
        self.def.coercers.merge(&payload, &mut row, &self.columns())?;
        self.apply_defaults(&payload, &mut row);
        self.apply_fixed(&mut row);

        let mut candidates = vec![Candidate::created(row)];
        self.validate(&mut candidates)?;
        let mut session = self.store.session()?;
        let stored = self.write_all(session.as_mut(), candidates)?;
        session.commit()?;
        Ok(Envelope::many(self.serialize_all(&stored)?, None))
    }

    pub fn delete(&self, _payload: Option<&Json>, keys: &Keys) -> Result<Envelope, AppError> {
        let mut session = self.store.session()?;
        if self.has(keys) {
            let row = self.fetch(session.as_mut(), keys)?;
            session.delete(&self.model(), &row)?;
            session.commit()?;
            return Ok(Envelope::one(self.serialize(&row)?));
        }
        if !self.def.allow_batch {
            return Err(AppError::batch_not_allowed());
        }
        let query = self.query();
        let rows = session.all(&query)?;
        let count = session.count(&query)?;
        session.delete_all(&query)?;
        session.commit()?;
        tracing::debug!(resource = %self.def.name, count, "batch delete");
        Ok(Envelope::many(self.serialize_all(&rows)?, Some(count)))
    }

    /// Batch PUT: everything the query matches is replaced by the payload's objects.
    fn replace_all(&self, payload: Option<&Json>) -> Result<Envelope, AppError> {
        if !self.def.allow_batch {
            return Err(AppError::batch_not_allowed());
        }
        let payload = payload.unwrap_or(&Json::Null);
        let columns = self.columns();
        let rows = self.def.coercers.create(payload, &columns)?;
        let objects = payload
            .get("objects")
            .and_then(Json::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut candidates = Vec::with_capacity(rows.len());
        for (mut row, object) in rows.into_iter().zip(objects) {
            if let Some(object) = object.as_object() {
                self.apply_defaults(object, &mut row);
            }
            self.apply_fixed(&mut row);
            candidates.push(Candidate::created(row));
        }
        self.validate(&mut candidates)?;

        let query = self.query();
        let mut session = self.store.session()?;
        let removed = session.delete_all(&query)?;
        let stored = self.write_all(session.as_mut(), candidates)?;
        let count = session.count(&query)?;
        session.commit()?;
        tracing::debug!(resource = %self.def.name, removed, count, "batch replace");
        Ok(Envelope::many(self.serialize_all(&stored)?, Some(count)))
    }

    fn fetch(&self, session: &mut dyn Session, keys: &Keys) -> Result<Row, AppError> {
        session
            .first(&self.query().filter_by(keys))?
            .ok_or_else(|| self.not_found(keys).into())
    }

    fn not_found(&self, keys: &Keys) -> RestError {
        RestError::NotFound(format!("{}({}) not found", self.def.name, keys))
    }

    /// A record with these keys exists in the model but this resource's filter excludes it.
    fn hidden_by_filter(&self, session: &mut dyn Session, keys: &Keys) -> Result<bool, AppError> {
        if self.def.filter.is_all() {
            return Ok(false);
        }
        let unfiltered = Query::new(self.model(), Filter::All).filter_by(keys);
        Ok(session.first(&unfiltered)?.is_some())
    }

    fn check_coherent_keys(&self, payload: &Map<String, Json>, keys: &Keys) -> Result<(), RestError> {
        for column in self.primary_keys() {
            let (Some(data), Some(url)) = (payload.get(&column.name), keys.get(&column.name)) else {
                continue;
            };
            let coherent = self
                .def
                .coercers
                .deserialize_value(&column.type_tag, data)
                .map(|v| v.same_as(url))
                .unwrap_or(false);
            if !coherent {
                return Err(RestError::IncoherentPrimaryKey {
                    column: column.name.clone(),
                    payload: data.to_string(),
                    url: url.to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate(&self, candidates: &mut [Candidate]) -> Result<(), AppError> {
        let pks: Vec<_> = self.primary_keys().into_iter().cloned().collect();
        let coercers = &self.def.coercers;
        self.def.validators.validate_all(candidates, |row| {
            coercers.serialize_row(row, &pks).map_err(AppError::Serialize)
        })
    }

    /// Candidates with a prior state are updates, the rest are inserts. Key clashes are client errors.
    fn write_all(&self, session: &mut dyn Session, candidates: Vec<Candidate>) -> Result<Vec<Row>, AppError> {
        let model = self.model();
        candidates
            .into_iter()
            .map(|c| match c.old {
                Some(_) => session.update(&model, c.row),
                None => session.insert(&model, c.row),
            }
            .map_err(AppError::from_write))
            .collect()
    }

    fn serialize(&self, row: &Row) -> Result<Map<String, Json>, AppError> {
        self.def
            .coercers
            .serialize_row(row, &self.columns())
            .map_err(AppError::Serialize)
    }

    fn serialize_all(&self, rows: &[Row]) -> Result<Vec<Map<String, Json>>, AppError> {
        let columns = self.columns();
        rows.iter()
            .map(|row| {
                self.def
                    .coercers
                    .serialize_row(row, &columns)
                    .map_err(AppError::Serialize)
            })
            .collect()
    }
}

/// Absent payloads read as `{}`. Anything but an object is a client error.
fn object_payload(payload: Option<&Json>) -> Result<Map<String, Json>, RestError> {
    match payload {
        None | Some(Json::Null) => Ok(Map::new()),
        Some(Json::Object(map)) => Ok(map.clone()),
        Some(_) => Err(RestError::BadRequest("payload must be an object".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::tree;
    use super::*;
    use crate::coerce::Coercers;
    use crate::error::CoercionError;
    use crate::validation::{Field, ValidationFailure};
    use crate::value::Value;
    use serde_json::json;
    use std::sync::Arc;

    fn keys(id: i64) -> Keys {
        Keys::new(vec![("id".into(), Some(Value::Integer(id)))])
    }

    fn no_keys() -> Keys {
        Keys::new(vec![("id".into(), None)])
    }

    fn name_required(field: &Field<'_>) -> Result<Value, ValidationFailure> {
        match field.value.as_str() {
            Some(s) if !s.is_empty() => Ok(field.value.clone()),
            _ => Err(ValidationFailure::new("Name is required")),
        }
    }

    #[test]
    fn test_get_singleton_and_collection() {
        let r = tree(|b| b);
        let env = r.get(None, &keys(2)).unwrap();
        assert_eq!(env.occurences, 1);
        assert_eq!(env.objects[0]["name"], "maple");
        let env = r.get(None, &no_keys()).unwrap();
        assert_eq!(env.occurences, 3);
        assert_eq!(env.objects.len(), 3);
        let err = r.get(None, &keys(6)).unwrap_err();
        assert_eq!(err.to_string(), "tree(id=6) not found");
    }

    #[test]
    fn test_put_singleton_creates_then_replaces() {
        let r = tree(|b| b.methods(&[Method::Get, Method::Put]));
        let payload = json!({"name": "cedar", "height": 12.5});
        let first = r.put(Some(&payload), &keys(7)).unwrap();
        let second = r.put(Some(&payload), &keys(7)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.objects[0]["id"], 7);
        assert_eq!(r.get(None, &no_keys()).unwrap().occurences, 4);

        let err = r.put(Some(&json!({"id": 8, "name": "x"})), &keys(7)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Incoherent primary_key (id) in payload (8) and url (7) for PUT"
        );
        assert!(r.put(Some(&json!({"id": "7", "name": "fir"})), &keys(7)).is_ok());
    }

    #[test]
    fn test_put_merge_leaves_absent_columns() {
        let r = tree(|b| b);
        let env = r.put(Some(&json!({"height": 1.0})), &keys(1)).unwrap();
        assert_eq!(env.objects[0]["name"], "pine");
        assert_eq!(env.objects[0]["height"], 1.0);
    }

    #[test]
    fn test_post_rejects_singleton_path() {
        let r = tree(|b| b);
        let err = r.post(Some(&json!({"name": "elm"})), &keys(1)).unwrap_err();
        assert!(matches!(err, AppError::Rest(RestError::Unsupported(_))));
        let env = r.post(Some(&json!({"name": "elm"})), &no_keys()).unwrap();
        assert_eq!(env.objects[0]["id"], 4);
    }

    #[test]
    fn test_batch_requires_allow_batch() {
        let r = tree(|b| b);
        assert!(matches!(r.delete(None, &no_keys()), Err(AppError::BatchNotAllowed(_))));
        assert!(matches!(
            r.put(Some(&json!({"objects": []})), &no_keys()),
            Err(AppError::BatchNotAllowed(_))
        ));
        assert_eq!(r.get(None, &no_keys()).unwrap().occurences, 3);
    }

    #[test]
    fn test_batch_delete_returns_snapshot() {
        let r = tree(|b| b.allow_batch(true));
        let env = r.delete(None, &no_keys()).unwrap();
        assert_eq!(env.occurences, 3);
        let names: Vec<_> = env.objects.iter().map(|o| o["name"].clone()).collect();
        assert_eq!(names, vec![json!("pine"), json!("maple"), json!("oak")]);
        let env = r.get(None, &no_keys()).unwrap();
        assert_eq!(env.occurences, 0);
        assert!(env.objects.is_empty());
    }

    #[test]
    fn test_batch_put_replaces_only_matched_records() {
        let r = tree(|b| b.allow_batch(true));
        let tall = r.sub(Filter::gt("height", 18.0), Some("tall"));
        let env = tall
            .put(
                Some(&json!({"objects": [{"id": 10, "name": "sequoia", "height": 80.0}]})),
                &no_keys(),
            )
            .unwrap();
        assert_eq!(env.occurences, 1);
        let all = r.get(None, &no_keys()).unwrap();
        let names: Vec<_> = all.objects.iter().map(|o| o["name"].clone()).collect();
        assert_eq!(names, vec![json!("maple"), json!("sequoia")]);
    }

    #[test]
    fn test_failed_validation_leaves_storage_unchanged() {
        let r = tree(|b| b.allow_batch(true).validator("name", name_required));
        let payload = json!({"objects": [
            {"id": 1, "name": ""},
            {"id": 2, "name": "ok"},
            {"id": 3, "name": null},
        ]});
        let err = r.put(Some(&payload), &no_keys()).unwrap_err();
        let AppError::Rest(RestError::Validation(errors)) = err else {
            panic!("expected a validation error");
        };
        assert_eq!(
            errors.to_value(),
            json!([
                {"id": 1, "fields": {"name": "Name is required"}},
                {"id": 3, "fields": {"name": "Name is required"}},
            ])
        );
        let names: Vec<_> = r
            .get(None, &no_keys())
            .unwrap()
            .objects
            .iter()
            .map(|o| o["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("pine"), json!("maple"), json!("oak")]);
    }

    #[test]
    fn test_fixed_overrides_and_defaults_fill() {
        let r = tree(|b| b.fixed("name", "birch").default_value("height", 3.0));
        let env = r.post(Some(&json!({"name": "elm"})), &no_keys()).unwrap();
        assert_eq!(env.objects[0]["name"], "birch");
        assert_eq!(env.objects[0]["height"], 3.0);
        let env = r.post(Some(&json!({"height": 9.0})), &no_keys()).unwrap();
        assert_eq!(env.objects[0]["height"], 9.0);
    }

    #[test]
    fn test_sub_filters_compose() {
        let r = tree(|b| b);
        let tall = r.sub(Filter::gt("height", 16.0), None);
        let tall_p = tall.sub(Filter::lt("name", "p"), None);
        assert_eq!(tall.name(), "subtree");
        assert_eq!(tall.get(None, &no_keys()).unwrap().occurences, 2);
        let env = tall_p.get(None, &no_keys()).unwrap();
        assert_eq!(env.occurences, 1);
        assert_eq!(env.objects[0]["name"], "oak");
        assert!(tall.get(None, &keys(2)).is_err());
        assert_eq!(r.get(None, &no_keys()).unwrap().occurences, 3);
    }

    #[test]
    fn test_post_with_taken_key_is_a_conflict() {
        let r = tree(|b| b);
        let err = r.post(Some(&json!({"id": 1, "name": "intruder"})), &no_keys()).unwrap_err();
        let AppError::Rest(RestError::Conflict(message)) = err else {
            panic!("expected a conflict");
        };
        assert_eq!(message, "tree(id=1) already exists");
        let env = r.get(None, &keys(1)).unwrap();
        assert_eq!(env.objects[0]["name"], "pine");
        assert_eq!(env.objects[0]["height"], 20.0);
        assert_eq!(r.get(None, &no_keys()).unwrap().occurences, 3);
    }

    #[test]
    fn test_batch_put_cannot_overwrite_records_outside_the_filter() {
        let r = tree(|b| b.allow_batch(true));
        let tall = r.sub(Filter::gt("height", 18.0), Some("tall"));
        let payload = json!({"objects": [{"id": 4, "name": "fir"}, {"id": 2, "name": "x"}]});
        let err = tall.put(Some(&payload), &no_keys()).unwrap_err();
        assert!(matches!(err, AppError::Rest(RestError::Conflict(_))));
        let names: Vec<_> = r
            .get(None, &no_keys())
            .unwrap()
            .objects
            .iter()
            .map(|o| o["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("pine"), json!("maple"), json!("oak")]);
    }

    #[test]
    fn test_sub_put_cannot_reach_records_outside_the_filter() {
        let r = tree(|b| b.methods(&[Method::Get, Method::Put]));
        let tall = r.sub(Filter::gt("height", 18.0), Some("tall"));
        let err = tall.put(Some(&json!({"name": "x"})), &keys(2)).unwrap_err();
        assert_eq!(err.to_string(), "tall(id=2) not found");
        let env = r.get(None, &keys(2)).unwrap();
        assert_eq!(env.objects[0], json!({"id": 2, "name": "maple", "height": 15.5}).as_object().unwrap().clone());

        let env = tall.put(Some(&json!({"name": "oak", "height": 31.0})), &keys(3)).unwrap();
        assert_eq!(env.objects[0]["height"], 31.0);
        let env = tall.put(Some(&json!({"name": "fir", "height": 19.0})), &keys(9)).unwrap();
        assert_eq!(env.objects[0]["id"], 9);
    }

    #[test]
    fn test_key_serialization_failure_is_reported() {
        let coercers = Coercers::builtin()
            .with_serializer("integer", |_, _, _| Err(CoercionError::Invalid("opaque key".into())));
        let r = tree(|b| b.coercers(Arc::new(coercers)).validator("name", name_required));
        let err = r.post(Some(&json!({"id": 5, "name": ""})), &no_keys()).unwrap_err();
        assert!(matches!(err, AppError::Serialize(_)));
        assert_eq!(err.to_string(), "serialize: id: opaque key");
    }

    #[test]
    fn test_custom_handler_replaces_verb() {
        let r = tree(|b| {
            b.handler(Method::Delete, |_, _, _| Err(RestError::Forbidden("trees stay".into()).into()))
                .handler(Method::Get, |r, payload, keys| {
                    let mut env = r.get(payload, keys)?;
                    for object in &mut env.objects {
                        object.remove("height");
                    }
                    Ok(env)
                })
        });
        assert_eq!(r.methods(), &[Method::Get, Method::Delete]);
        let err = r.handle(Method::Delete, None, &keys(1)).unwrap_err();
        assert_eq!(err.to_string(), "trees stay");
        let env = r.handle(Method::Get, None, &keys(1)).unwrap();
        assert_eq!(env.objects[0], json!({"id": 1, "name": "pine"}).as_object().unwrap().clone());
        assert_eq!(r.get(None, &no_keys()).unwrap().occurences, 3);
    }
}
