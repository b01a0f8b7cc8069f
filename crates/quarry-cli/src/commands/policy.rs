use super::{
    colorize_outcome, json_pretty, load_policy, NetworkArgs, EXIT_POLICY_ERROR, EXIT_SUCCESS,
};
use quarry_remote::{NetworkTarget, OfflineGate, Url};
use std::path::Path;

pub fn show(network: &NetworkArgs, policy_file: Option<&Path>, json: bool) -> Result<u8, String> {
    let policy = load_policy(policy_file, network)?;
    if json {
        println!("{}", json_pretty(&policy)?);
        return Ok(EXIT_SUCCESS);
    }

    let list = |items: Vec<String>| {
        if items.is_empty() {
            "(any)".to_owned()
        } else {
            items.join(", ")
        }
    };
    println!("offline_mode:   {}", policy.offline_mode);
    println!("force_offline:  {}", policy.force_offline);
    println!(
        "allowed_hosts:  {}",
        list(policy.allowed_hosts.iter().cloned().collect())
    );
    println!(
        "allowed_ports:  {}",
        list(policy.allowed_ports.iter().map(ToString::to_string).collect())
    );
    Ok(EXIT_SUCCESS)
}

pub fn check(
    url: &str,
    network: &NetworkArgs,
    policy_file: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let gate = OfflineGate::new(load_policy(policy_file, network)?);
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;
    let target = NetworkTarget::new(parsed.host.clone(), parsed.port);
    let decision = gate.check("policy check", Some(&target));

    if json {
        let reason = (!decision.allowed).then_some(&decision.error_message);
        let payload = serde_json::json!({
            "url": url,
            "host": target.host,
            "port": target.port,
            "allowed": decision.allowed,
            "reason": reason,
        });
        println!("{}", json_pretty(&payload)?);
    } else if decision.allowed {
        println!("{} {}:{}", colorize_outcome("allowed"), target.host, target.port);
    } else {
        println!(
            "{} {}:{}: {}",
            colorize_outcome("denied"),
            target.host,
            target.port,
            decision.error_message
        );
    }

    Ok(if decision.allowed {
        EXIT_SUCCESS
    } else {
        EXIT_POLICY_ERROR
    })
}
