use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use inbox_triage_core::{Normalizer, Priority, RecordId, RecordPatch, Status};
use inbox_triage_store::{
    aggregate, category_breakdown, daily_sentiment, query, CollectionStore, DateRange, Facet,
    Filters, HttpRecordSource, HttpSourceConfig, LoadOutcome, MutationCoordinator,
    MutationOutcome, Query, RecordSource, Selection, SortKey, SortOrder,
};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "triage")]
#[command(about = "Inbox triage CLI")]
struct Cli {
    #[arg(long, env = "TRIAGE_SERVICE_URL", default_value = "http://127.0.0.1:4020")]
    service_url: String,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Label and extract a single message without contacting the service.
    Classify(ClassifyArgs),
    Query(QueryArgs),
    Stats(StatsArgs),
    Update(UpdateArgs),
    Delete(IdArgs),
    BulkStatus(BulkStatusArgs),
    BulkDelete(IdsArgs),
    /// Generate and store a reply draft for a record.
    Respond(IdArgs),
    /// Ask the service to run extraction over a stored record.
    Extract(IdArgs),
    /// Run server-side extraction over several records, reporting each one.
    BatchExtract(IdsArgs),
}

#[derive(Debug, Args)]
struct ClassifyArgs {
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    body: Option<String>,
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[arg(long, default_value = "")]
    search: String,
    #[arg(long, default_value = "all")]
    priority: String,
    #[arg(long, default_value = "all")]
    sentiment: String,
    #[arg(long, default_value = "all")]
    status: String,
    #[arg(long, default_value = "all")]
    category: String,
    #[arg(long = "date-range", default_value = "all")]
    date_range: String,
    #[arg(long, default_value = "received_at", value_parser = parse_sort_key)]
    sort: SortKey,
    #[arg(long, default_value = "desc", value_parser = parse_sort_order)]
    order: SortOrder,
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long = "page-size", default_value_t = 10)]
    page_size: usize,
}

#[derive(Debug, Args)]
struct StatsArgs {
    /// Number of days in the sentiment trend, today included.
    #[arg(long, default_value_t = 7)]
    days: u16,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    id: u64,
    #[arg(long, value_parser = parse_status)]
    status: Option<Status>,
    #[arg(long, value_parser = parse_priority)]
    priority: Option<Priority>,
    #[arg(long)]
    starred: Option<bool>,
    #[arg(long)]
    response: Option<String>,
}

#[derive(Debug, Args)]
struct IdArgs {
    id: u64,
}

#[derive(Debug, Args)]
struct BulkStatusArgs {
    #[arg(long, value_delimiter = ',', required = true)]
    ids: Vec<u64>,
    #[arg(long, value_parser = parse_status)]
    status: Status,
}

#[derive(Debug, Args)]
struct IdsArgs {
    #[arg(long, value_delimiter = ',', required = true)]
    ids: Vec<u64>,
}

fn parse_status(value: &str) -> Result<Status, String> {
    Status::parse(value).ok_or_else(|| format!("unknown status `{value}`"))
}

fn parse_priority(value: &str) -> Result<Priority, String> {
    Priority::parse(value).ok_or_else(|| format!("unknown priority `{value}`"))
}

fn parse_sort_key(value: &str) -> Result<SortKey, String> {
    SortKey::parse(value).ok_or_else(|| format!("unknown sort key `{value}`"))
}

fn parse_sort_order(value: &str) -> Result<SortOrder, String> {
    SortOrder::parse(value).ok_or_else(|| format!("unknown sort order `{value}`"))
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "cli_contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "cli_contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Command::Classify(args) = &cli.command {
        return run_classify(args);
    }

    let config = HttpSourceConfig { base_url: cli.service_url.clone(), timeout_secs: cli.timeout_secs };
    let source = HttpRecordSource::new(&config)
        .with_context(|| format!("failed to build a client for {}", config.base_url))?;
    let store = CollectionStore::new(source);

    match cli.command {
        Command::Classify(_) => Ok(()),
        Command::Query(args) => run_query(&store, &args).await,
        Command::Stats(args) => run_stats(&store, &args).await,
        Command::Update(args) => run_update(&store, args).await,
        Command::Delete(args) => run_delete(&store, args.id).await,
        Command::BulkStatus(args) => run_bulk_status(&store, &args).await,
        Command::BulkDelete(args) => run_bulk_delete(&store, &args).await,
        Command::Respond(args) => run_respond(&store, args.id).await,
        Command::Extract(args) => run_extract(&store, args.id).await,
        Command::BatchExtract(args) => run_batch_extract(&store, &args).await,
    }
}

fn run_classify(args: &ClassifyArgs) -> Result<()> {
    let normalizer = Normalizer::default();
    let labels = normalizer.labels(args.subject.as_deref(), args.body.as_deref());
    let extracted = normalizer.extract(args.body.as_deref().unwrap_or_default());
    emit_json(json!({
        "priority": labels.priority,
        "sentiment": labels.sentiment,
        "category": labels.category,
        "extracted": extracted,
    }))
}

/// Fill the store from the service. A failed first load leaves nothing to work on.
async fn load<R: RecordSource>(store: &CollectionStore<R>) -> Result<LoadOutcome> {
    match store.load(false).await {
        LoadOutcome::Failed { reason } => bail!("failed to load records: {reason}"),
        outcome => Ok(outcome),
    }
}

async fn run_query<R: RecordSource>(store: &CollectionStore<R>, args: &QueryArgs) -> Result<()> {
    let outcome = load(store).await?;
    let request = Query {
        filters: Filters {
            search: args.search.clone(),
            priority: Facet::parse(&args.priority),
            sentiment: Facet::parse(&args.sentiment),
            status: Facet::parse(&args.status),
            category: Facet::parse(&args.category),
            date_range: DateRange::parse(&args.date_range),
        },
        sort_key: args.sort,
        sort_order: args.order,
        page: args.page,
        page_size: args.page_size,
    };
    let page = query(&store.snapshot(), &request, OffsetDateTime::now_utc());
    emit_json(json!({
        "load": outcome,
        "query": request,
        "page": page,
    }))
}

async fn run_stats<R: RecordSource>(store: &CollectionStore<R>, args: &StatsArgs) -> Result<()> {
    load(store).await?;
    let snapshot = store.snapshot();
    emit_json(json!({
        "stats": aggregate(&snapshot),
        "categories": category_breakdown(&snapshot),
        "daily_sentiment": daily_sentiment(&snapshot, args.days, OffsetDateTime::now_utc()),
    }))
}

fn outcome_json(id: Option<RecordId>, outcome: &MutationOutcome) -> Result<Value> {
    let mut value = serde_json::to_value(outcome)?;
    if let (Some(id), Value::Object(object)) = (id, &mut value) {
        object.insert("id".to_string(), json!(id));
    }
    Ok(value)
}

fn not_found(id: RecordId) -> anyhow::Error {
    anyhow!("record {id} not found")
}

async fn run_update<R: RecordSource>(store: &CollectionStore<R>, args: UpdateArgs) -> Result<()> {
    load(store).await?;
    let id = RecordId(args.id);
    let patch = RecordPatch {
        status: args.status,
        priority: args.priority,
        starred: args.starred,
        response: args.response,
        ..RecordPatch::default()
    };
    if patch.is_empty() {
        bail!("nothing to update; pass at least one of --status, --priority, --starred, --response");
    }

    let outcome = MutationCoordinator::new(store).update_record(id, patch).await;
    if outcome == MutationOutcome::NotFound {
        return Err(not_found(id));
    }
    let mut value = outcome_json(Some(id), &outcome)?;
    if let Value::Object(object) = &mut value {
        object.insert("record".to_string(), serde_json::to_value(store.get(id))?);
    }
    emit_json(value)
}

async fn run_delete<R: RecordSource>(store: &CollectionStore<R>, id: u64) -> Result<()> {
    load(store).await?;
    let id = RecordId(id);
    let outcome = MutationCoordinator::new(store).delete_record(id).await;
    if outcome == MutationOutcome::NotFound {
        return Err(not_found(id));
    }
    emit_json(outcome_json(Some(id), &outcome)?)
}

async fn run_bulk_status<R: RecordSource>(
    store: &CollectionStore<R>,
    args: &BulkStatusArgs,
) -> Result<()> {
    load(store).await?;
    let mut selection = args.ids.iter().copied().map(RecordId).collect::<Selection>();
    let requested = selection.len();
    let outcome = MutationCoordinator::new(store).bulk_update_status(&mut selection, args.status).await;
    let mut value = outcome_json(None, &outcome)?;
    if let Value::Object(object) = &mut value {
        object.insert("requested".to_string(), json!(requested));
        object.insert("records".to_string(), json!(store.len()));
    }
    emit_json(value)
}

async fn run_bulk_delete<R: RecordSource>(
    store: &CollectionStore<R>,
    args: &IdsArgs,
) -> Result<()> {
    load(store).await?;
    let mut selection = args.ids.iter().copied().map(RecordId).collect::<Selection>();
    let requested = selection.len();
    let outcome = MutationCoordinator::new(store).bulk_delete(&mut selection).await;
    let mut value = outcome_json(None, &outcome)?;
    if let Value::Object(object) = &mut value {
        object.insert("requested".to_string(), json!(requested));
        object.insert("records".to_string(), json!(store.len()));
    }
    emit_json(value)
}

async fn run_respond<R: RecordSource>(store: &CollectionStore<R>, id: u64) -> Result<()> {
    load(store).await?;
    let id = RecordId(id);
    match MutationCoordinator::new(store).generate_response(id).await {
        MutationOutcome::NotFound => Err(not_found(id)),
        MutationOutcome::Failed { reason } | MutationOutcome::Resynced { reason } => {
            bail!("response generation for record {id} failed: {reason}")
        }
        outcome @ MutationOutcome::Applied => {
            let mut value = outcome_json(Some(id), &outcome)?;
            if let Value::Object(object) = &mut value {
                let text = store.get(id).and_then(|record| record.response);
                object.insert("response".to_string(), json!(text));
            }
            emit_json(value)
        }
    }
}

async fn run_extract<R: RecordSource>(store: &CollectionStore<R>, id: u64) -> Result<()> {
    let id = RecordId(id);
    let info = store
        .source()
        .extract_info(id)
        .await
        .with_context(|| format!("failed to extract info for record {id}"))?;
    emit_json(json!({ "id": id, "extracted": info }))
}

async fn run_batch_extract<R: RecordSource>(
    store: &CollectionStore<R>,
    args: &IdsArgs,
) -> Result<()> {
    let ids = args.ids.iter().copied().map(RecordId).collect();
    let result = store
        .source()
        .batch_extract(ids)
        .await
        .context("failed to run batch extraction")?;
    emit_json(json!(result))
}
