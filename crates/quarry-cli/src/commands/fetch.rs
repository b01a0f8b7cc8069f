use super::{json_pretty, make_gate, spin_fail, spin_ok, transfer_bar, NetworkArgs, EXIT_SUCCESS};
use quarry_remote::{ClientOptions, HttpClient};
use quarry_store::sha256_of;
use std::path::Path;

pub fn run(
    url: &str,
    output: &Path,
    network: &NetworkArgs,
    policy_file: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let gate = make_gate(policy_file, network)?;
    let client = HttpClient::new(gate, ClientOptions::default()).map_err(|e| e.to_string())?;

    let pb = if json { None } else { Some(transfer_bar("fetch")) };
    let mut progress = |bytes: u64, total: u64| {
        if let Some(ref pb) = pb {
            pb.set_length(total);
            pb.set_position(bytes);
        }
    };

    let bytes = match client.download_to(url, output, &mut progress) {
        Ok(n) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("fetched {url}"));
            }
            n
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "fetch failed");
            }
            if e.is_policy_denial() {
                return Err(format!("policy denied: {e}"));
            }
            return Err(e.to_string());
        }
    };
    let sha256 = sha256_of(output).map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "url": url,
            "path": output.display().to_string(),
            "bytes": bytes,
            "sha256": sha256,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{bytes} bytes -> {}", output.display());
        println!("sha256: {sha256}");
    }
    Ok(EXIT_SUCCESS)
}
