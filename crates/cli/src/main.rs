use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dsq_api::{ClientSettings, Environment};
use dsq_engine::{
    ApiCall, ApiClient, DataSourceClient, DirectoryTemplateStore, LegacyDataSourceClient, QueryInput, TemplateStore,
};
use dsq_types::{CallFormat, FieldMap, Response};
use dsq_util::keystore::{remove_secret, store_secret};
use dsq_util::{CredentialResolver, FileCredentialResolver, redact_sensitive};
use reqwest::Method;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dsq", version, about = "Call tenant data sources over the modern or legacy protocol")]
struct Cli {
    /// Settings document; defaults to $DSQ_CONFIG_PATH or ~/.config/dsq/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Credentials document; defaults to $DSQ_CREDENTIALS_PATH or ~/.config/dsq/credentials.json
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// Use the production database instead of test
    #[arg(long, global = true)]
    production: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a data source on the modern endpoint
    Execute {
        identifier: String,
        #[command(flatten)]
        query: QueryArgs,
        /// Call format: 1 (tabular) or 2 (row list)
        #[arg(long, default_value_t = 1)]
        format: i64,
        /// Drop unregistered and empty fields before sending
        #[arg(long)]
        purge: bool,
        /// Coerce fields to their registered types before sending
        #[arg(long)]
        reconcile: bool,
    },
    /// Execute a data source over the legacy SOAP protocol
    Legacy {
        key: i64,
        #[command(flatten)]
        query: QueryArgs,
        #[arg(long, default_value = dsq_engine::legacy::DEFAULT_DELIMITER)]
        delimiter: String,
    },
    /// List the data sources a tenant may call
    Access {
        /// Tenants to list; repeat for several
        #[arg(long = "tenant", conflicts_with = "all")]
        tenants: Vec<String>,
        /// List every configured tenant
        #[arg(long)]
        all: bool,
    },
    /// Call a developer API endpoint for one or more tenants
    Api {
        url: String,
        /// HTTP method; POST and PUT send the fields as a JSON body
        #[arg(long, default_value = "GET", value_parser = parse_method)]
        method: Method,
        /// Tenants to call for; repeat for several
        #[arg(long = "tenant", required = true)]
        tenants: Vec<String>,
        /// Field as NAME=VALUE; VALUE is read as JSON when it parses, text otherwise
        #[arg(long = "field", value_parser = parse_field, conflicts_with = "body")]
        fields: Vec<(String, Value)>,
        /// Raw JSON document to send instead of fields
        #[arg(long)]
        body: Option<String>,
        /// Print only this attribute of the returned rows
        #[arg(long)]
        select: Option<String>,
        /// Keep rows where COLUMN=VALUE; repeat to combine
        #[arg(long = "where", value_parser = parse_field, requires = "select")]
        filters: Vec<(String, Value)>,
    },
    /// Show a template's fields, inferred types and composed body
    Template {
        identifier: String,
        #[arg(long)]
        templates: PathBuf,
        #[arg(long, default_value_t = 1)]
        format: i64,
    },
    /// Manage secrets referenced as ${secret:NAME} in the credentials document
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[arg(long)]
    tenant: String,
    /// Directory of <identifier>.json templates
    #[arg(long)]
    templates: Option<PathBuf>,
    /// Field as NAME=VALUE; VALUE is read as JSON when it parses, text otherwise
    #[arg(long = "field", value_parser = parse_field)]
    fields: Vec<(String, Value)>,
}

#[derive(Subcommand, Debug)]
enum SecretAction {
    /// Store a secret; the value is read from stdin when --value is omitted
    Set {
        name: String,
        #[arg(long)]
        value: Option<String>,
    },
    Remove {
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {}", redact_sensitive(&format!("{error:#}")));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG` directives, falling back to `info` when unset or unparseable.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Execute {
            identifier,
            query,
            format,
            purge,
            reconcile,
        } => {
            let settings = load_settings(&cli)?;
            let client = DataSourceClient::from_settings(&settings, credentials(&cli))?;
            let mut input = build_query(identifier, *format, query)?;
            if *reconcile {
                input.reconcile()?;
            }
            if *purge {
                input.purge();
            }
            let response = client.execute(&query.tenant, &input).await?;
            print_response(&response)
        }
        Command::Legacy { key, query, delimiter } => {
            let settings = load_settings(&cli)?;
            let client = LegacyDataSourceClient::from_settings(&settings, credentials(&cli))?.with_delimiter(delimiter);
            let input = build_query(key, CallFormat::default().number(), query)?;
            let response = client.execute(&query.tenant, &input).await?;
            print_response(&response)
        }
        Command::Access { tenants, all } => {
            if tenants.is_empty() && !all {
                bail!("pass --tenant at least once, or --all");
            }
            let settings = load_settings(&cli)?;
            let client = DataSourceClient::from_settings(&settings, credentials(&cli))?;
            let report = client.list_access_all((!all).then(|| tenants.clone())).await?;
            print_response(&report.to_response())?;
            for failure in &report.failures {
                eprintln!("{}: {}", failure.tenant, redact_sensitive(&failure.error.to_string()));
            }
            if !report.is_complete() {
                bail!("{} tenant(s) failed", report.failures.len());
            }
            Ok(())
        }
        Command::Api {
            url,
            method,
            tenants,
            fields,
            body,
            select,
            filters,
        } => {
            let settings = load_settings(&cli)?;
            let client = ApiClient::from_settings(&settings, credentials(&cli))?;
            let call = match body {
                Some(raw) => ApiCall::new(method.clone(), url)
                    .with_json(serde_json::from_str(raw).context("--body must be a JSON document")?),
                None => ApiCall::new(method.clone(), url).with_fields(fields.iter().cloned().collect()),
            };
            let response = client.call_all(tenants, &call).await?;
            match select {
                Some(name) => {
                    let filters: Vec<(&str, Value)> =
                        filters.iter().map(|(column, value)| (column.as_str(), value.clone())).collect();
                    let selected = match response.single(name, &filters) {
                        Some(value) => value.clone(),
                        None => Value::Array(response.column_where(name, &filters).into_iter().cloned().collect()),
                    };
                    println!("{}", serde_json::to_string_pretty(&selected)?);
                    Ok(())
                }
                None => print_response(&response),
            }
        }
        Command::Template {
            identifier,
            templates,
            format,
        } => {
            let store = DirectoryTemplateStore::new(templates);
            if store.lookup(identifier)?.is_none() {
                bail!("no template named {identifier} in {}", templates.display());
            }
            let input = QueryInput::builder(identifier)
                .call_format(*format)
                .template_store(&store)
                .build()?;
            let types: serde_json::Map<String, Value> = input
                .registry()
                .iter()
                .map(|(name, field_type)| (name.to_string(), Value::String(field_type.to_string())))
                .collect();
            let summary = json!({
                "identifier": input.identifier(),
                "fields": input.fields(),
                "types": types,
                "body": input.composed_body(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Secret { action } => match action {
            SecretAction::Set { name, value } => {
                let value = match value {
                    Some(value) => value.clone(),
                    None => read_stdin_line()?,
                };
                store_secret(name, &value).with_context(|| format!("failed to store secret {name}"))?;
                eprintln!("stored secret {name}");
                Ok(())
            }
            SecretAction::Remove { name } => {
                remove_secret(name).with_context(|| format!("failed to remove secret {name}"))?;
                eprintln!("removed secret {name}");
                Ok(())
            }
        },
    }
}

fn load_settings(cli: &Cli) -> Result<ClientSettings> {
    let mut settings = match &cli.config {
        Some(path) => ClientSettings::load_from_path(path)?,
        None => ClientSettings::load()?,
    };
    if cli.production {
        settings.environment = Environment::Production;
    }
    Ok(settings)
}

fn credentials(cli: &Cli) -> Arc<dyn CredentialResolver> {
    match &cli.credentials {
        Some(path) => Arc::new(FileCredentialResolver::new(path)),
        None => Arc::new(FileCredentialResolver::from_default_path()),
    }
}

fn build_query(identifier: impl ToString, format: i64, args: &QueryArgs) -> Result<QueryInput> {
    let store = args.templates.as_ref().map(DirectoryTemplateStore::new);
    let fields: FieldMap = args.fields.iter().cloned().collect();
    let mut builder = QueryInput::builder(identifier).call_format(format).fields(fields);
    if let Some(store) = &store {
        builder = builder.template_store(store);
    }
    Ok(builder.build()?)
}

fn print_response(response: &Response) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    for warning in response.warnings() {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

fn read_stdin_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).context("failed to read secret from stdin")?;
    let value = line.trim_end_matches(['\r', '\n']).to_string();
    if value.is_empty() {
        bail!("secret value must not be empty");
    }
    Ok(value)
}

fn parse_method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).map_err(|_| format!("invalid HTTP method '{raw}'"))
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("field name is empty in '{raw}'"));
    }
    let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
