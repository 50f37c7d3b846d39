use anyhow::{anyhow, bail, Context, Result};
use autoadmin::catalog::{find_resource, group_by_tag, Capability};
use autoadmin::config::Settings;
use autoadmin::explorer::{EndpointExplorer, ExplorerEvent, TagFilter};
use autoadmin::form::AutoForm;
use autoadmin::http::{ApiClient, SpecSource};
use autoadmin::resource::ResourceManager;
use autoadmin::runner::{EndpointRunner, ExecutionOutcome};
use autoadmin::schema::synthesize;
use autoadmin::spec::{self, EndpointTag, HttpMethod, NormalizedEndpoint, NormalizedSpec, SnapshotHandle};
use autoadmin::store::{endpoint_listing, listing_diff, Connector, ConnectorMode, ConnectorStore, SessionStore};
use autoadmin::table::{render_detail, AutoTable, GraphView};
use clap::{Parser, Subcommand};
use colored::*;
use log::{debug, error, info};
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Browse and drive a REST backend from its OpenAPI/Swagger document")]
struct Args {
    /// Path to the settings file
    #[arg(short, long, default_value = "autoadmin.yaml")]
    config: PathBuf,

    /// Bearer token; overrides the saved session
    #[arg(short, long, env = "AUTOADMIN_TOKEN")]
    token: Option<String>,

    /// Backend base URL; overrides settings and the active connector
    #[arg(long, env = "AUTOADMIN_BASE_URL")]
    base_url: Option<String>,

    /// Spec file or URL; overrides the active connector
    #[arg(long)]
    spec: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List endpoints, optionally filtered and with one selected
    Endpoints {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        search: Option<String>,
        /// Endpoint id to select, e.g. "GET /books/{id}"
        #[arg(long)]
        select: Option<String>,
    },
    /// List tags with their endpoint counts
    Tags,
    /// List resources and their inferred capabilities
    Resources,
    /// Print a sample request body
    Sample { method: String, path: String },
    /// Show the generated form for a request body
    Form {
        method: String,
        path: String,
        /// Field edits, applied in order
        #[arg(long = "set", value_parser = parse_pair)]
        set: Vec<(String, String)>,
    },
    /// Execute an endpoint against the backend
    Run {
        method: String,
        path: String,
        /// Parameter values, by name or `location:name`
        #[arg(short = 'p', long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,
        /// JSON body, or @file
        #[arg(long)]
        body: Option<String>,
    },
    /// CRUD on a resource
    Resource {
        name: String,
        #[command(subcommand)]
        action: ResourceAction,
    },
    /// Schema reference graph
    Graph {
        #[arg(long)]
        dot: bool,
    },
    /// Manage saved backend connectors
    Connector {
        #[command(subcommand)]
        action: ConnectorAction,
    },
    /// Save a session token
    Login {
        #[arg(long)]
        token: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Clear the saved session
    Logout,
    /// Show the saved session
    Whoami,
}

#[derive(Subcommand, Debug)]
enum ResourceAction {
    List,
    Get {
        id: String,
    },
    Create {
        /// JSON body, or @file
        #[arg(long)]
        body: String,
    },
    Update {
        id: String,
        #[arg(long)]
        body: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConnectorAction {
    Add {
        name: String,
        #[arg(long, value_enum, default_value = "direct")]
        mode: ConnectorMode,
        #[arg(long)]
        base_url: String,
        /// Spec URL, for remote connectors
        #[arg(long)]
        spec_url: Option<String>,
        /// Spec file to store, for local connectors
        #[arg(long)]
        spec_file: Option<PathBuf>,
        #[arg(long)]
        swagger_path: Option<String>,
    },
    List,
    Use {
        name: String,
    },
    Rename {
        name: String,
        new_name: String,
    },
    Remove {
        name: String,
    },
    /// Re-fetch a connector's spec and show what changed
    Refresh {
        name: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_pair(input: &str) -> std::result::Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", input))
}

fn read_body(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading body from {}", path)),
        None => Ok(arg.to_string()),
    }
}

fn method_label(method: HttpMethod) -> ColoredString {
    let label = format!("{:<7}", method.as_str());
    match method {
        HttpMethod::Get => label.blue(),
        HttpMethod::Post => label.green(),
        HttpMethod::Put | HttpMethod::Patch => label.yellow(),
        HttpMethod::Delete => label.red(),
        HttpMethod::Options | HttpMethod::Head => label.normal(),
    }
}

/// A loaded spec plus a client pointed at its backend.
struct Workspace {
    client: ApiClient,
    spec: Arc<NormalizedSpec>,
}

impl Workspace {
    fn endpoint(&self, method: &str, path: &str) -> Result<&NormalizedEndpoint> {
        let method = HttpMethod::parse(method).ok_or_else(|| anyhow!("Unknown HTTP method '{}'", method))?;
        self.spec
            .find(method, path)
            .ok_or_else(|| anyhow!("No endpoint {} {}", method, path))
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

async fn open_workspace(args: &Args, settings: &Settings) -> Result<Workspace> {
    let connectors = ConnectorStore::open(&settings.data_dir)?;
    let session = SessionStore::new(&settings.data_dir).load()?;
    let active = connectors.active();

    let base_url = args
        .base_url
        .clone()
        .or_else(|| settings.base_url.clone())
        .or_else(|| active.map(|c| c.base_url.clone()))
        .unwrap_or_default();
    let mut config = settings.client_config(&base_url);
    if let Some(token) = session.bearer(args.token.as_deref()) {
        config.set_token(token);
    }

    let source = match (&args.spec, active) {
        (Some(arg), _) => SpecSource::from_arg(arg),
        (None, Some(connector)) => {
            debug!("Using connector '{}'", connector.name);
            connector.spec_source(false)?
        }
        (None, None) if !base_url.is_empty() => SpecSource::convention(&base_url, Some(&settings.swagger_path)),
        (None, None) => bail!("No spec to load: pass --spec or --base-url, or add a connector"),
    };

    let mut client = ApiClient::new(config)?;
    let handle = SnapshotHandle::default();
    let spec = client
        .load_spec(&source, &cancel_on_ctrl_c(), &handle)
        .await
        .context("Failed to load spec")?;
    if client.config().base_url().is_empty() {
        client.set_base_url(&spec.meta.server_url);
    }
    info!(
        "Loaded '{}' {} with {} endpoints",
        spec.meta.title,
        spec.meta.version,
        spec.endpoints.len()
    );
    Ok(Workspace { client, spec })
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        error!("Application error: {:#}", e);
        eprintln!("{} {:#}", "error:".red().bold(), e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args.config).with_context(|| format!("reading {}", args.config.display()))?;
    info!("Starting autoadmin with config: {}", args.config.display());

    match &args.command {
        Command::Connector { action } => return connector_command(&args, &settings, action).await,
        Command::Login { token, user } => {
            let session = SessionStore::new(&settings.data_dir).login(token, user.as_deref())?;
            println!("Logged in{}", session.user.map(|u| format!(" as {}", u.bold())).unwrap_or_default());
            return Ok(());
        }
        Command::Logout => {
            SessionStore::new(&settings.data_dir).logout()?;
            println!("Logged out");
            return Ok(());
        }
        Command::Whoami => {
            let session = SessionStore::new(&settings.data_dir).load()?;
            match (&session.user, &session.token) {
                (_, None) => println!("{}", "anonymous".dimmed()),
                (Some(user), Some(_)) => println!("{} ({:?})", user.bold(), session.status),
                (None, Some(_)) => println!("token set ({:?})", session.status),
            }
            return Ok(());
        }
        _ => {}
    }

    let workspace = open_workspace(&args, &settings).await?;
    let spec = &workspace.spec;
    match &args.command {
        Command::Endpoints { tag, search, select } => {
            let mut explorer = EndpointExplorer::new(spec.clone());
            if let Some(tag) = tag {
                let tag = match tag.as_str() {
                    EndpointTag::UNTAGGED_LABEL | "(default)" => EndpointTag::Untagged,
                    name => EndpointTag::Named(name.to_string()),
                };
                explorer.dispatch(ExplorerEvent::SetTag(TagFilter::Tag(tag)));
            }
            if let Some(search) = search {
                explorer.dispatch(ExplorerEvent::SetSearch(search.clone()));
            }
            if let Some(id) = select {
                explorer.dispatch(ExplorerEvent::Select(id.clone()));
            }
            let selected = explorer.selected().map(|e| e.id.clone());
            for endpoint in explorer.visible() {
                let marker = if Some(&endpoint.id) == selected.as_ref() { "*" } else { " " };
                let summary = if endpoint.deprecated {
                    endpoint.summary.strikethrough()
                } else {
                    endpoint.summary.normal()
                };
                println!("{} {} {}  {}", marker, method_label(endpoint.method), endpoint.path, summary.dimmed());
            }
            if let (Some(_), Some(endpoint)) = (select, explorer.selected()) {
                println!();
                print_endpoint(endpoint);
            }
        }
        Command::Tags => {
            for tag in &spec.tags {
                let count = spec.endpoints.iter().filter(|e| e.tag == tag.name).count();
                println!(
                    "{} ({})  {}",
                    tag.name.to_string().bold(),
                    count,
                    tag.description.as_deref().unwrap_or("").dimmed()
                );
            }
        }
        Command::Resources => {
            let resources = group_by_tag(&spec.endpoints, &spec.meta.schemas, &settings.display_names);
            for resource in &resources {
                let capabilities: Vec<String> = Capability::ALL
                    .iter()
                    .map(|c| {
                        if resource.supports(*c) {
                            c.as_str().green().to_string()
                        } else {
                            c.as_str().dimmed().to_string()
                        }
                    })
                    .collect();
                println!(
                    "{}  {}  [{}]  schema: {}",
                    resource.display_name.bold(),
                    resource.base_path.as_deref().unwrap_or("-"),
                    capabilities.join(" "),
                    resource.schema_name.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Sample { method, path } => {
            let endpoint = workspace.endpoint(method, path)?;
            let sample = endpoint
                .request_body
                .as_ref()
                .and_then(|body| body.schema.as_ref())
                .and_then(|schema| synthesize(schema, &spec.meta.schemas));
            match sample {
                Some(sample) => println!("{}", serde_json::to_string_pretty(&sample)?),
                None => println!("{}", "No request body schema".dimmed()),
            }
        }
        Command::Form { method, path, set } => {
            let endpoint = workspace.endpoint(method, path)?;
            let schema = endpoint
                .request_body
                .as_ref()
                .and_then(|body| body.schema.clone())
                .ok_or_else(|| anyhow!("{} has no request body", endpoint.id))?;
            let mut form = AutoForm::from_schema(&schema, &spec.meta.schemas);
            for field in form.fields() {
                let name = if field.required {
                    format!("{}*", field.name).bold()
                } else {
                    field.name.normal()
                };
                println!(
                    "{} ({:?})  {}",
                    name,
                    field.kind,
                    field.description.as_deref().unwrap_or("").dimmed()
                );
            }
            let mut state = form.to_json();
            for (name, value) in set {
                state = form.set(name, value);
            }
            println!("{}", state);
            let missing = form.missing_required();
            if !missing.is_empty() {
                println!("{} {}", "Missing required:".yellow(), missing.join(", "));
            }
        }
        Command::Run { method, path, params, body } => {
            let endpoint = workspace.endpoint(method, path)?;
            let mut runner = EndpointRunner::new();
            runner.select(endpoint, &spec.meta.schemas);
            for (name, value) in params {
                runner
                    .set_param(name, value)
                    .with_context(|| format!("setting parameters for {}", endpoint.id))?;
            }
            if let Some(body) = body {
                runner.set_body(&read_body(body)?);
            }
            match runner.execute(&workspace.client).await? {
                Some(ExecutionOutcome::Response { status, elapsed_ms, body }) => {
                    let status_text = status.to_string();
                    let status_text = if (200..300).contains(status) {
                        status_text.green()
                    } else {
                        status_text.red()
                    };
                    println!("{} {}", status_text.bold(), format!("{}ms", elapsed_ms).dimmed());
                    println!("{}", body.render());
                }
                Some(ExecutionOutcome::Error { error }) => bail!("{}", error),
                None => {}
            }
        }
        Command::Resource { name, action } => {
            let resources = group_by_tag(&spec.endpoints, &spec.meta.schemas, &settings.display_names);
            let resource = find_resource(&resources, name).ok_or_else(|| anyhow!("No resource named '{}'", name))?;
            let manager = ResourceManager::new(resource, &workspace.client);
            match action {
                ResourceAction::List => {
                    let records = manager.list().await?;
                    let columns = settings
                        .columns_for(&resource.display_name)
                        .or_else(|| settings.columns_for(resource.tag.label()));
                    print!("{}", AutoTable::new(&records, columns).render());
                }
                ResourceAction::Get { id } => print!("{}", render_detail(&manager.get(id).await?)),
                ResourceAction::Create { body } => {
                    let body: Value = serde_json::from_str(&read_body(body)?).context("parsing body")?;
                    print!("{}", render_detail(&manager.create(&body).await?));
                }
                ResourceAction::Update { id, body } => {
                    let body: Value = serde_json::from_str(&read_body(body)?).context("parsing body")?;
                    print!("{}", render_detail(&manager.update(id, &body).await?));
                }
                ResourceAction::Delete { id } => {
                    manager.delete(id).await?;
                    println!("Deleted {} {}", resource.display_name, id);
                }
            }
        }
        Command::Graph { dot } => {
            let graph = GraphView::from_dictionary(&spec.meta.schemas);
            if *dot {
                print!("{}", graph.to_dot());
            } else {
                print!("{}", graph.render());
            }
        }
        Command::Connector { .. } | Command::Login { .. } | Command::Logout | Command::Whoami => {}
    }
    Ok(())
}

fn print_endpoint(endpoint: &NormalizedEndpoint) {
    println!("{} {}", method_label(endpoint.method), endpoint.path.bold());
    if let Some(description) = &endpoint.description {
        println!("{}", description);
    }
    if endpoint.requires_auth {
        println!("{}", "requires auth".yellow());
    }
    for param in &endpoint.parameters {
        let required = if param.required { "*" } else { "" };
        println!("  {}{}  ({})", param.key(), required, param.location.as_str().dimmed());
    }
    if let Some(body) = &endpoint.request_body {
        println!("  body: {}", body.content_type);
    }
}

async fn connector_command(args: &Args, settings: &Settings, action: &ConnectorAction) -> Result<()> {
    let mut store = ConnectorStore::open(&settings.data_dir)?;
    match action {
        ConnectorAction::Add {
            name,
            mode,
            base_url,
            spec_url,
            spec_file,
            swagger_path,
        } => {
            let mut connector = Connector::new(name, *mode, base_url);
            connector.spec_url = spec_url.clone();
            connector.swagger_path = swagger_path.clone();
            if let Some(path) = spec_file {
                let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
                spec::load_text(&text).context("spec file is not a usable OpenAPI document")?;
                connector.spec_payload = Some(text);
            }
            let connector = store.add(connector)?;
            println!("Added connector {} ({})", connector.name.bold(), connector.id.dimmed());
        }
        ConnectorAction::List => {
            let active = store.active().map(|c| c.id.clone());
            for connector in store.list() {
                let marker = if Some(&connector.id) == active.as_ref() { "*".green() } else { " ".normal() };
                let synced = connector
                    .last_synced_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never synced".to_string());
                println!(
                    "{} {}  {:?}  {}  {}",
                    marker,
                    connector.name.bold(),
                    connector.mode,
                    connector.base_url,
                    synced.dimmed()
                );
            }
        }
        ConnectorAction::Use { name } => {
            store.set_active(name)?;
            println!("Active connector: {}", name.bold());
        }
        ConnectorAction::Rename { name, new_name } => {
            store.rename(name, new_name)?;
            println!("Renamed {} to {}", name, new_name.bold());
        }
        ConnectorAction::Remove { name } => {
            let removed = store.remove(name)?;
            println!("Removed connector {}", removed.name);
        }
        ConnectorAction::Refresh { name, dry_run } => {
            let connector = match name {
                Some(name) => store.get(name),
                None => store.active(),
            }
            .cloned()
            .ok_or_else(|| anyhow!("No connector to refresh"))?;

            let mut config = settings.client_config(&connector.base_url);
            let session = SessionStore::new(&settings.data_dir).load()?;
            if let Some(token) = session.bearer(args.token.as_deref()) {
                config.set_token(token);
            }
            let client = ApiClient::new(config)?;
            let text = client
                .fetch_spec(&connector.spec_source(true)?, &cancel_on_ctrl_c())
                .await
                .with_context(|| format!("refreshing {}", connector.name))?;
            let fresh = spec::load_text(&text)?;
            let stored = match &connector.spec_payload {
                Some(payload) => endpoint_listing(&spec::load_text(payload)?),
                None => String::new(),
            };
            match listing_diff(&stored, &endpoint_listing(&fresh)) {
                None => println!("No endpoint changes for {}", connector.name),
                Some(diff) => {
                    for line in diff.lines() {
                        if line.starts_with("+++") || line.starts_with("---") {
                            println!("{}", line.bold());
                        } else if line.starts_with('+') {
                            println!("{}", line.green());
                        } else if line.starts_with('-') {
                            println!("{}", line.red());
                        } else {
                            println!("{}", line);
                        }
                    }
                }
            }
            if *dry_run {
                println!("Dry run: stored spec left unchanged.");
            } else {
                store.record_sync(&connector.id, &text)?;
                println!("Synced {} ({} endpoints)", connector.name.bold(), fresh.endpoints.len());
            }
        }
    }
    Ok(())
}
