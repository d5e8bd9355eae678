use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use srcfed_core::logging::init_tracing;
use srcfed_core::{error_response, ApiRequest, ApiResponse, Federation, FederationConfig};
use std::io::Write;
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("srcfed")
        .version(srcfed_core::VERSION)
        .about("Source federation and link resolution")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .arg(
            Arg::new("user")
                .long("user")
                .global(true)
                .help("Act as this user"),
        )
        .subcommand(Command::new("check-config").about("Validate the configuration and exit"))
        .subcommand(Command::new("remotes").about("List configured remote instances"))
        .subcommand(
            Command::new("resolve")
                .about("Classify a project[/package[/file]] path")
                .arg(Arg::new("path").required(true)),
        )
        .subcommand(
            Command::new("get")
                .about("GET a /source or /build path")
                .arg(Arg::new("path").required(true))
                .arg(Arg::new("rev").long("rev").help("Revision to read"))
                .arg(
                    Arg::new("expand")
                        .long("expand")
                        .value_parser(value_parser!(bool))
                        .help("Expand links (true) or read raw files (false)"),
                )
                .arg(Arg::new("view").long("view").help("Build result view")),
        )
        .subcommand(
            Command::new("post")
                .about("POST a command to a /source or /build path")
                .arg(Arg::new("path").required(true))
                .arg(Arg::new("cmd").long("cmd").required(true).help("Command verb"))
                .arg(
                    Arg::new("params")
                        .num_args(0..)
                        .help("Extra key=value parameters"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<FederationConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => FederationConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(FederationConfig::default()),
    }
}

fn key_value(param: &str) -> anyhow::Result<(String, String)> {
    match param.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => bail!("expected key=value, got '{param}'"),
    }
}

async fn send(federation: &Federation, request: ApiRequest) -> anyhow::Result<()> {
    match federation.handle(request).await {
        Ok(ApiResponse::Document(doc)) => {
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        Ok(ApiResponse::Blob(bytes)) => {
            std::io::stdout().write_all(&bytes)?;
            Ok(())
        }
        Err(err) => {
            let (status, doc) = error_response(&err);
            bail!("{status} {}: {}", doc.code, doc.message)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json")).context("installing tracing subscriber")?;

    let config = load_config(&matches)?;
    let user = matches.get_one::<String>("user").cloned();

    match matches.subcommand() {
        Some(("check-config", _)) => {
            println!(
                "configuration ok: {} remote(s), request timeout {}s",
                config.remotes.len(),
                config.request_timeout_secs
            );
        }
        Some(("remotes", _)) => {
            let registry = config.registry()?;
            for instance in registry.iter() {
                println!("{}\t{}", instance.name, instance.base_url);
            }
        }
        Some(("resolve", args)) => {
            let federation = Federation::builder(config).build()?;
            let path = args.get_one::<String>("path").map_or("", String::as_str);
            println!("{}", federation.resolve(path)?);
        }
        Some(("get", args)) => {
            let federation = Federation::builder(config).build()?;
            let path = args.get_one::<String>("path").map_or("", String::as_str);
            let mut request = ApiRequest::get(path);
            if let Some(rev) = args.get_one::<String>("rev") {
                request = request.with_query("rev", rev);
            }
            if let Some(expand) = args.get_one::<bool>("expand") {
                request = request.with_query("expand", if *expand { "1" } else { "0" });
            }
            if let Some(view) = args.get_one::<String>("view") {
                request = request.with_query("view", view);
            }
            if let Some(user) = user {
                request = request.with_user(user);
            }
            send(&federation, request).await?;
        }
        Some(("post", args)) => {
            let federation = Federation::builder(config).build()?;
            let path = args.get_one::<String>("path").map_or("", String::as_str);
            let cmd = args.get_one::<String>("cmd").map_or("", String::as_str);
            let mut request = ApiRequest::post(path).with_query("cmd", cmd);
            for param in args.get_many::<String>("params").into_iter().flatten() {
                let (k, v) = key_value(param)?;
                request = request.with_query(k, v);
            }
            if let Some(user) = user {
                request = request.with_user(user);
            }
            send(&federation, request).await?;
        }
        Some((other, _)) => bail!("unknown subcommand '{other}'"),
        None => bail!("no subcommand given"),
    }
    Ok(())
}
