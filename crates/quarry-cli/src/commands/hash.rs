use super::{colorize_outcome, json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use quarry_store::sha256_of;
use std::path::Path;

pub fn run(file: &Path, expect: Option<&str>, json: bool) -> Result<u8, String> {
    let actual = sha256_of(file).map_err(|e| e.to_string())?;
    let expected = expect.map(|e| e.trim().to_ascii_lowercase());
    let verified = expected.as_deref().map(|e| e == actual);

    if json {
        let payload = serde_json::json!({
            "path": file.display().to_string(),
            "sha256": actual,
            "expected": expected,
            "verified": verified,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{actual}  {}", file.display());
        match (verified, &expected) {
            (Some(true), _) => println!("{}", colorize_outcome("verified")),
            (Some(false), Some(expected)) => {
                eprintln!("{}: expected {expected}", colorize_outcome("failed"));
            }
            _ => {}
        }
    }

    Ok(if verified == Some(false) {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}
