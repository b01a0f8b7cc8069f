use super::{json_pretty, spin_fail, spin_ok, spinner, EXIT_MANIFEST_ERROR, EXIT_SUCCESS};
use quarry_schema::{parse_manifest_file, ManifestIssue, ManifestKind};
use std::path::Path;

pub fn run(manifest: &Path, stack: bool, json: bool) -> Result<u8, String> {
    let kind = if stack {
        ManifestKind::Stack
    } else {
        ManifestKind::Repository
    };

    let pb = if json {
        None
    } else {
        Some(spinner("validating manifest..."))
    };
    let (parsed, issues) = match parse_manifest_file(manifest, kind) {
        Ok(r) => r,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "validation failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        let codes: Vec<String> = issues.iter().map(ManifestIssue::code).collect();
        let tools = if issues.is_empty() {
            parsed.to_value()["tools"].clone()
        } else {
            serde_json::Value::Null
        };
        let payload = serde_json::json!({
            "path": manifest.display().to_string(),
            "kind": kind,
            "valid": issues.is_empty(),
            "issues": codes,
            "tools": tools,
        });
        println!("{}", json_pretty(&payload)?);
    } else if let Some(ref pb) = pb {
        if issues.is_empty() {
            spin_ok(
                pb,
                &format!("manifest '{}' is valid ({} tools)", parsed.name, parsed.tools.len()),
            );
            for tool in &parsed.tools {
                println!("  {}@{}  {}", tool.id, tool.version, tool.location.as_str());
            }
        } else {
            spin_fail(pb, &format!("manifest has {} issue(s)", issues.len()));
            for issue in &issues {
                println!("  {issue}");
            }
        }
    }

    Ok(if issues.is_empty() {
        EXIT_SUCCESS
    } else {
        EXIT_MANIFEST_ERROR
    })
}
