/// Argument parsing and output rendering for the CLI subcommands
use color_eyre::{eyre::eyre, Result};
use resync::{Collection, Fields, QueryState, QueryStatus, RecordItem, RecordPage};
use serde_json::Value;

/// Parse `name=value` assignments into record fields.
///
/// The value is read as JSON when it parses (`n=3`, `tags=["a"]`,
/// `done=true`), otherwise it is kept as a plain string.
pub fn parse_assignments<S: AsRef<str>>(args: &[S]) -> Result<Fields> {
  let mut fields = Fields::new();

  for arg in args {
    let arg = arg.as_ref();
    let (name, raw) = arg
      .split_once('=')
      .ok_or_else(|| eyre!("Expected name=value, got '{}'", arg))?;

    let name = name.trim();
    if name.is_empty() {
      return Err(eyre!("Missing field name in '{}'", arg));
    }
    if fields.contains_key(name) {
      return Err(eyre!("Field '{}' assigned more than once", name));
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    fields.insert(name.to_string(), value);
  }

  Ok(fields)
}

/// Parse `name=value` listing filters.
pub fn parse_filters<S: AsRef<str>>(args: &[S]) -> Result<Vec<(String, String)>> {
  args
    .iter()
    .map(|arg| {
      let arg = arg.as_ref();
      match arg.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
          Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(eyre!("Expected filter as name=value, got '{}'", arg)),
      }
    })
    .collect()
}

pub fn render_collections(collections: &[Collection]) -> String {
  if collections.is_empty() {
    return "No collections".to_string();
  }

  let width = collections.iter().map(|c| c.slug.len()).max().unwrap_or(0);
  collections
    .iter()
    .map(|c| match &c.description {
      Some(desc) => format!("{:width$}  {}  ({})", c.slug, c.name, desc, width = width),
      None => format!("{:width$}  {}", c.slug, c.name, width = width),
    })
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn render_page(page: &RecordPage) -> String {
  if page.is_empty() {
    return "No records".to_string();
  }

  let width = page.records.iter().map(|r| r.id.len()).max().unwrap_or(0);
  let mut lines: Vec<String> = page
    .records
    .iter()
    .map(|r| format!("{:width$}  {}", r.id, summarize(&r.fields), width = width))
    .collect();

  match page.total {
    Some(total) => lines.push(format!("({} of {})", page.len(), total)),
    None => lines.push(format!("({} records)", page.len())),
  }
  lines.join("\n")
}

pub fn render_record(record: &RecordItem) -> Result<String> {
  serde_json::to_string_pretty(record).map_err(|e| eyre!("Failed to render record: {}", e))
}

/// One line describing a view state, used by `watch`.
pub fn render_state(state: &QueryState<RecordPage>) -> String {
  let marker = if state.stale { " (refreshing)" } else { "" };
  match state.status {
    QueryStatus::Loading => "Loading...".to_string(),
    QueryStatus::Empty => format!("No records{}", marker),
    QueryStatus::NotFound => "Collection not found".to_string(),
    QueryStatus::Errored => match &state.error {
      Some(err) => format!("Error: {}", err),
      None => "Error".to_string(),
    },
    QueryStatus::Loaded => {
      let page = state.data.as_ref().map(render_page).unwrap_or_default();
      format!("{}{}", page, marker)
    }
  }
}

fn summarize(fields: &Fields) -> String {
  fields
    .iter()
    .map(|(name, value)| match value {
      Value::String(s) => format!("{}={}", name, s),
      other => format!("{}={}", name, other),
    })
    .collect::<Vec<_>>()
    .join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use resync::SyncError;
  use serde_json::json;

  fn record(id: &str, fields: Value) -> RecordItem {
    RecordItem {
      id: id.to_string(),
      collection: "orders".to_string(),
      fields: resync::model::fields_from_value(fields).unwrap(),
      created_at: None,
      updated_at: None,
    }
  }

  #[test]
  fn test_assignment_values_parse_as_json() {
    let fields = parse_assignments(&["n=3", "done=true", "tags=[\"a\",\"b\"]", "note=null"]).unwrap();
    assert_eq!(fields["n"], json!(3));
    assert_eq!(fields["done"], json!(true));
    assert_eq!(fields["tags"], json!(["a", "b"]));
    assert_eq!(fields["note"], Value::Null);
  }

  #[test]
  fn test_assignment_falls_back_to_string() {
    let fields = parse_assignments(&["name=big order", "eq=a=b", "empty="]).unwrap();
    assert_eq!(fields["name"], json!("big order"));
    assert_eq!(fields["eq"], json!("a=b"));
    assert_eq!(fields["empty"], json!(""));
  }

  #[test]
  fn test_bad_assignments() {
    assert!(parse_assignments(&["novalue"]).is_err());
    assert!(parse_assignments(&["=1"]).is_err());
    assert!(parse_assignments(&["a=1", "a=2"]).is_err());
  }

  #[test]
  fn test_filters() {
    let filters = parse_filters(&["status=open", "owner=a=b"]).unwrap();
    assert_eq!(
      filters,
      vec![
        ("status".to_string(), "open".to_string()),
        ("owner".to_string(), "a=b".to_string())
      ]
    );
    assert!(parse_filters(&["status"]).is_err());
  }

  #[test]
  fn test_render_page() {
    let mut page = RecordPage::new(vec![
      record("r1", json!({"name": "first"})),
      record("r10", json!({"n": 2})),
    ]);
    assert_eq!(render_page(&page), "r1   name=first\nr10  n=2\n(2 records)");

    page.total = Some(9);
    assert!(render_page(&page).ends_with("(2 of 9)"));
    assert_eq!(render_page(&RecordPage::default()), "No records");
  }

  #[test]
  fn test_render_state() {
    let mut state = QueryState {
      status: QueryStatus::Loaded,
      data: Some(RecordPage::new(vec![record("r1", json!({"n": 1}))])),
      error: None,
      stale: true,
    };
    assert!(render_state(&state).ends_with("(refreshing)"));

    state.status = QueryStatus::Errored;
    state.error = Some(SyncError::Network("offline".into()));
    assert!(render_state(&state).contains("offline"));
  }
}
