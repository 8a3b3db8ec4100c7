use serde_json::Value;

/// Root keys that carry side-loaded data rather than the requested entities.
const SKIPPED_ROOT_KEYS: [&str; 2] = ["meta", "included"];

/// Add a `webLink` to every top-level entity of a Projects API response.
///
/// Entities are objects (or arrays of objects) directly under the response
/// root; the link is `<installation>/<entity_path>/<id>`. Entities without a
/// usable `id` are left alone.
pub fn add_web_links(body: &mut Value, installation_url: &str, entity_path: &str) {
    let Value::Object(root) = body else {
        return;
    };
    let base = installation_url.trim_end_matches('/');
    for (key, value) in root.iter_mut() {
        if SKIPPED_ROOT_KEYS.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::Object(_) => link_entity(value, base, entity_path),
            Value::Array(items) => items
                .iter_mut()
                .for_each(|item| link_entity(item, base, entity_path)),
            _ => {}
        }
    }
}

fn link_entity(entity: &mut Value, base: &str, entity_path: &str) {
    let Value::Object(fields) = entity else {
        return;
    };
    let id = match fields.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return,
    };
    fields.insert(
        "webLink".to_string(),
        Value::String(format!("{base}/{entity_path}/{id}")),
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn linked(mut body: Value) -> Value {
        add_web_links(&mut body, "https://example.com/", "entities");
        body
    }

    #[test]
    fn links_single_and_listed_entities() {
        assert_eq!(
            linked(json!({ "entity": { "id": 123, "name": "Test" } })),
            json!({ "entity": { "id": 123, "name": "Test", "webLink": "https://example.com/entities/123" } })
        );
        assert_eq!(
            linked(json!({ "entities": [{ "id": 1 }, { "name": "no id" }, { "id": "2" }] })),
            json!({ "entities": [
                { "id": 1, "webLink": "https://example.com/entities/1" },
                { "name": "no id" },
                { "id": "2", "webLink": "https://example.com/entities/2" }
            ] })
        );
    }

    #[test]
    fn side_loaded_and_id_less_data_is_untouched() {
        let body = json!({
            "meta": { "page": { "hasMore": false } },
            "included": [{ "id": 789 }],
            "entity": { "id": "", "name": "Empty" }
        });
        assert_eq!(linked(body.clone()), body);
        assert_eq!(linked(json!("not an object")), json!("not an object"));
    }
}
