use serde_json::Value;

pub type DocumentId = u64;

/// Dot-notation lookup through nested objects only: `"user.address.city"`.
pub fn get_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Every value reachable at `path`, descending into arrays of subdocuments
/// on the way: `{"a": [{"b": 1}, {"b": 2}]}` yields `1, 2` for `"a.b"`.
pub fn collect_path<'a>(data: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    let parts: Vec<&str> = path.split('.').collect();
    collect_into(data, &parts, &mut out);
    out
}

fn collect_into<'a>(current: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(current);
        return;
    };
    match current {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect_into(next, rest, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                if item.is_object() {
                    collect_into(item, parts, out);
                }
            }
        }
        _ => {}
    }
}
