//! Rendering of a `terraform.tfvars` file from a deployment's options
//! map. Plain key = value concatenation — no templating engine,
//! since HCL's grammar is simple enough that `tera` would be solving a
//! problem we don't have.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};

/// Deterministic: `BTreeMap` iteration order plus recursive rendering
/// means the same options always produce byte-identical tfvars.
pub fn render_tfvars(options: &BTreeMap<String, Value>) -> Result<String> {
    let mut out = String::new();
    for (key, value) in options {
        if !is_valid_identifier(key) {
            return Err(Error::validation("tfvars key", format!("not a valid HCL identifier: {key}")));
        }
        out.push_str(key);
        out.push_str(" = ");
        render_value(value, &mut out)?;
        out.push('\n');
    }
    Ok(out)
}

fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn render_value(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(k);
                out.push_str(" = ");
                render_value(v, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Scale procedure: strip every `worker_desired_count` assignment out of
/// a previously-saved tfvars blob, drop the blank lines that leaves
/// behind, then append the new assignment at the end. Duplicate
/// occurrences (which a hand-edited tfvars blob could carry) are all
/// removed rather than just the first match.
pub fn rewrite_worker_desired_count(tfvars: &str, new_count: u32) -> String {
    let mut rendered: String = tfvars
        .lines()
        .filter(|line| !line.trim_start().starts_with("worker_desired_count"))
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("{line}\n"))
        .collect();
    rendered.push_str(&format!("worker_desired_count = {new_count}\n"));
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_scalar_and_collection_values() {
        let mut options = BTreeMap::new();
        options.insert("desired_count".to_string(), json!(3));
        options.insert("project_name".to_string(), json!("demo"));
        options.insert("subnet_ids".to_string(), json!(["subnet-a", "subnet-b"]));
        let rendered = render_tfvars(&options).unwrap();
        assert_eq!(
            rendered,
            "desired_count = 3\nproject_name = \"demo\"\nsubnet_ids = [\"subnet-a\", \"subnet-b\"]\n"
        );
    }

    #[test]
    fn rejects_non_identifier_keys() {
        let mut options = BTreeMap::new();
        options.insert("not a key".to_string(), json!(1));
        assert!(render_tfvars(&options).is_err());
    }

    #[test]
    fn rewrite_strips_the_existing_line_and_appends_the_new_one_at_the_end() {
        let tfvars = "project_name = \"demo\"\nworker_desired_count = 2\ncpu = 256\n";
        let rewritten = rewrite_worker_desired_count(tfvars, 7);
        assert_eq!(
            rewritten,
            "project_name = \"demo\"\ncpu = 256\nworker_desired_count = 7\n"
        );
    }

    #[test]
    fn rewrite_appends_when_absent() {
        let tfvars = "project_name = \"demo\"\n";
        let rewritten = rewrite_worker_desired_count(tfvars, 4);
        assert_eq!(rewritten, "project_name = \"demo\"\nworker_desired_count = 4\n");
    }

    #[test]
    fn rewrite_removes_every_duplicate_occurrence() {
        let tfvars = "worker_desired_count = 1\nproject_name = \"demo\"\nworker_desired_count = 2\n";
        let rewritten = rewrite_worker_desired_count(tfvars, 9);
        assert_eq!(rewritten, "project_name = \"demo\"\nworker_desired_count = 9\n");
    }
}
