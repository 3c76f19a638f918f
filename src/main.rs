//!
//! hostgate binary
//! ---------------
//! Authenticates a single host from command-line flags against a gate built from the
//! configuration (JSON file and HOSTGATE_* environment), prints the result and the gate
//! status as JSON, then shuts the gate down.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use hostgate::auth::LocalLicenseService;
use hostgate::policy::PermissionSet;
use hostgate::{AuthenticationRequest, CallerContext, ExternalCredentials, GateConfig, HostGate, HostIdentity};

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn print_usage() {
    eprintln!(
        "usage: hostgate --package NAME --install-id ID [--name DISPLAY] [--digest HEX] [--token TOKEN] \
         [--user NAME --secret SECRET] [--config PATH]"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config_path = parse_arg(&args, "--config").map(PathBuf::from);
    let config = GateConfig::load(config_path.as_deref())?;
    info!(target: "hostgate", config = ?config_path, preset = ?config.container_preset, "hostgate starting");

    let package = parse_arg(&args, "--package").ok_or_else(|| {
        print_usage();
        anyhow!("--package is required")
    })?;
    let install_id = parse_arg(&args, "--install-id").unwrap_or_else(|| "default".to_string());
    let display = parse_arg(&args, "--name").unwrap_or_else(|| package.clone());
    let digest = parse_arg(&args, "--digest");
    let host = Arc::new(HostIdentity::new(package, &install_id, display, digest));

    let mut request = AuthenticationRequest::new(host);
    if let Some(token) = parse_arg(&args, "--token") {
        request = request.with_token(token);
    }

    let mut builder = HostGate::builder(config);
    if let (Some(user), Some(secret)) = (parse_arg(&args, "--user"), parse_arg(&args, "--secret")) {
        // single local account so the license step can be exercised end to end
        let accounts = LocalLicenseService::new();
        accounts.add_account(&user, &secret, PermissionSet::new(), None).context("registering local license account")?;
        builder = builder.license_service(Arc::new(accounts));
        request = request.with_license(ExternalCredentials::new(user, secret));
    }
    let gate = Arc::new(builder.build()?);
    let maintenance = gate.spawn_maintenance();

    let ctx = CallerContext::with_new_request_id();
    let result = gate.authenticate_host(&ctx, &request).await;
    let code = match &result {
        Ok(r) => {
            println!("{}", serde_json::to_string_pretty(r)?);
            if r.authenticated { 0 } else { 2 }
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(e)?);
            3
        }
    };
    println!("{}", serde_json::to_string_pretty(&gate.status())?);

    let closed = gate.shutdown();
    maintenance.await.context("maintenance task")?;
    info!(target: "hostgate", sessions_closed = closed, "hostgate stopped");
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
