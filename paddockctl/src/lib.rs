use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use paddock_core::browser::DiscoveredEndpoint;
use paddock_core::extraction::ExtractionContext;
use paddock_core::fetch::{normalize_url, FetchMetrics};
use paddock_core::{
    cancel_pair, fetcher_from_config, load_pipeline_config, CancelSignal, ConfigError,
    ContentKind, FetchRequest, FetchResult, PipelineConfig, PipelineError, SchedulePipeline,
    ValidatedRecord,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "configs/paddock.toml";

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{}", .0.operator_message())]
    Pipeline(#[from] PipelineError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Motorsport schedule acquisition console", long_about = None)]
pub struct Cli {
    /// Path to paddock.toml; built-in defaults apply when absent
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch one page through cache, plain HTTP and the browser fallback
    Fetch(FetchArgs),
    /// Render a page and list the data endpoints it calls
    Discover(TargetArgs),
    /// Extract a schedule from a local document
    Extract(ExtractArgs),
    /// Fetch, extract and validate a schedule from a URL
    Acquire(AcquireArgs),
    /// Print the cache key a request maps to
    CacheKey(CacheKeyArgs),
    /// Check configuration, cache, browser and credentials
    Health,
    /// Print shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Page address
    pub url: String,
    /// Substrings that mark schedule endpoints (repeatable)
    #[arg(long = "pattern", default_values_t = default_patterns())]
    pub patterns: Vec<String>,
    /// CSS selector to wait for after navigation
    #[arg(long)]
    pub ready_selector: Option<String>,
    /// Resource type or URL substring that is never blocked (repeatable)
    #[arg(long = "allow")]
    pub allow: Vec<String>,
}

fn default_patterns() -> Vec<String> {
    ["schedule", "calendar", "session"]
        .iter()
        .map(|pattern| pattern.to_string())
        .collect()
}

impl TargetArgs {
    fn request(&self) -> Result<FetchRequest> {
        let mut request = FetchRequest::new(&self.url)
            .map_err(PipelineError::from)?
            .with_patterns(self.patterns.iter().cloned());
        if let Some(selector) = &self.ready_selector {
            request = request.with_ready_selector(selector.clone());
        }
        for allowed in &self.allow {
            request = request.allow_resource(allowed.clone());
        }
        Ok(request)
    }
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Include the fetched content in the output
    #[arg(long, default_value_t = false)]
    pub show_content: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
    /// Championship name passed to the extractor
    #[arg(long)]
    pub series: Option<String>,
    /// Season year passed to the extractor
    #[arg(long)]
    pub season: Option<i32>,
    /// Site-specific hint for the extractor (repeatable)
    #[arg(long = "hint")]
    pub hints: Vec<String>,
}

impl ContextArgs {
    fn context(&self, source_url: Option<String>) -> ExtractionContext {
        ExtractionContext {
            series_name: self.series.clone(),
            season: self.season,
            source_url,
            hints: self.hints.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Html,
    Json,
    Text,
}

impl From<KindArg> for ContentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Html => ContentKind::Html,
            KindArg::Json => ContentKind::Json,
            KindArg::Text => ContentKind::Text,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Document to read
    pub path: PathBuf,
    /// Content kind; guessed from the file extension when omitted
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,
    /// Address the document originally came from
    #[arg(long)]
    pub source_url: Option<String>,
    #[command(flatten)]
    pub context: ContextArgs,
}

#[derive(Args, Debug, Clone)]
pub struct AcquireArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    #[command(flatten)]
    pub context: ContextArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CacheKeyArgs {
    /// Page address
    pub url: String,
    /// Extra cache-key parameter as name=value (repeatable)
    #[arg(long = "param")]
    pub params: Vec<String>,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "paddockctl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::CacheKey(args) => {
            let report = cache_key_report(args)?;
            render(&report, cli.format)?;
        }
        Commands::Health => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more health checks failed".to_string(),
                ));
            }
        }
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(context.run_async(command, cli.format))?;
        }
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: PipelineConfig,
    config_path: Option<PathBuf>,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = match &cli.config {
            Some(path) => Some(path.clone()),
            None => Some(PathBuf::from(DEFAULT_CONFIG)).filter(|path| path.exists()),
        };
        let mut config = match &config_path {
            Some(path) => load_pipeline_config(path)?,
            None => PipelineConfig::default(),
        };
        config.apply_env_overrides()?;
        Ok(Self {
            config,
            config_path,
        })
    }

    async fn run_async(&self, command: &Commands, format: OutputFormat) -> Result<()> {
        let cancel = interrupt_signal();
        match command {
            Commands::Fetch(args) => {
                let fetcher = fetcher_from_config(&self.config)?;
                let request = args.target.request()?;
                let result = fetcher
                    .fetch(&request, &cancel)
                    .await
                    .map_err(PipelineError::from)?;
                let report = FetchReport::new(result, fetcher.metrics(), args.show_content);
                render(&report, format)
            }
            Commands::Discover(args) => {
                let fetcher = fetcher_from_config(&self.config)?;
                let request = args.request()?;
                let endpoints = fetcher
                    .discover(&request, &cancel)
                    .await
                    .map_err(PipelineError::from)?;
                render(
                    &DiscoverReport {
                        url: args.url.clone(),
                        endpoints,
                    },
                    format,
                )
            }
            Commands::Extract(args) => {
                let content = fs::read_to_string(&args.path)?;
                let kind = args
                    .kind
                    .map(ContentKind::from)
                    .unwrap_or_else(|| kind_from_extension(&args.path));
                let pipeline = SchedulePipeline::from_config(&self.config)?;
                let source = args
                    .source_url
                    .clone()
                    .or_else(|| Some(args.path.display().to_string()));
                let record = pipeline
                    .ingest_document(content, kind, args.context.context(source))
                    .await?;
                render(&RecordReport(record), format)
            }
            Commands::Acquire(args) => {
                let pipeline = SchedulePipeline::from_config(&self.config)?;
                let request = args.target.request()?;
                let record = pipeline
                    .acquire(&request, args.context.context(None), &cancel)
                    .await?;
                info!(metrics = ?pipeline.metrics(), "Acquisition finished");
                render(&RecordReport(record), format)
            }
            Commands::CacheKey(_) | Commands::Health | Commands::Completions { .. } => Ok(()),
        }
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(match &self.config_path {
            Some(path) => HealthEntry::ok("config", path.display().to_string()),
            None => HealthEntry::warn("config", "no paddock.toml found; using defaults"),
        });
        results.push(self.check_cache());
        results.push(self.check_browser());
        results.push(self.check_credential());
        results.push(HealthEntry::ok(
            "rate limit",
            format!(
                "{} request(s) per {}s, {}s apart",
                self.config.rate_limit.max_requests_per_window,
                self.config.rate_limit.window_seconds,
                self.config.rate_limit.min_gap_seconds
            ),
        ));
        results
    }

    fn check_cache(&self) -> HealthEntry {
        let Some(dir) = &self.config.cache.directory else {
            return HealthEntry::ok("cache", "in memory");
        };
        let path = Path::new(dir);
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok("cache", path.display().to_string()),
            Ok(_) => HealthEntry::error("cache", format!("{} is not a directory", path.display())),
            Err(_) => HealthEntry::warn(
                "cache",
                format!("{} does not exist yet; it is created on first use", path.display()),
            ),
        }
    }

    fn check_browser(&self) -> HealthEntry {
        let browser = &self.config.browser;
        if !browser.enabled {
            return HealthEntry::ok("browser", "disabled; plain HTTP only");
        }
        match &browser.executable_path {
            Some(path) if Path::new(path).exists() => {
                HealthEntry::ok("browser", format!("{} ({} page(s))", path, browser.max_pages))
            }
            Some(path) => HealthEntry::error("browser", format!("{path} not found")),
            None => HealthEntry::warn("browser", "no executable configured; relying on autodetect"),
        }
    }

    fn check_credential(&self) -> HealthEntry {
        let variable = &self.config.extraction.credential_env;
        let present = std::env::var(variable)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false);
        let provider = format!(
            "{:?}/{}",
            self.config.extraction.provider, self.config.extraction.model
        )
        .to_lowercase();
        if present {
            HealthEntry::ok("extraction", format!("{provider}; {variable} is set"))
        } else {
            HealthEntry::error("extraction", format!("{provider}; {variable} is not set"))
        }
    }
}

/// Cancels in-flight work on Ctrl-C.
fn interrupt_signal() -> CancelSignal {
    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling");
            handle.cancel();
        }
    });
    signal
}

fn kind_from_extension(path: &Path) -> ContentKind {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("html") | Some("htm") => ContentKind::Html,
        Some("json") => ContentKind::Json,
        _ => ContentKind::Text,
    }
}

fn cache_key_report(args: &CacheKeyArgs) -> Result<CacheKeyReport> {
    let mut request = FetchRequest::new(&args.url).map_err(PipelineError::from)?;
    for param in &args.params {
        let (name, value) = param
            .split_once('=')
            .ok_or_else(|| AppError::InvalidArgument(format!("expected name=value, got {param}")))?;
        request = request.with_cache_param(name.trim(), value.trim());
    }
    Ok(CacheKeyReport {
        url: args.url.clone(),
        normalized: normalize_url(request.url()),
        destination: request.destination().to_string(),
        key: request.cache_key().to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct FetchReport {
    pub status: u16,
    pub final_url: String,
    pub kind: ContentKind,
    pub provenance: String,
    pub attempts: usize,
    pub elapsed_ms: u64,
    pub chars: usize,
    pub graduated_endpoint: Option<String>,
    pub discovered_endpoints: Vec<DiscoveredEndpoint>,
    pub warnings: Vec<String>,
    pub metrics: FetchMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FetchReport {
    fn new(result: FetchResult, metrics: FetchMetrics, show_content: bool) -> Self {
        Self {
            status: result.status,
            final_url: result.final_url,
            kind: result.kind,
            provenance: result.provenance.as_str().to_string(),
            attempts: result.timing.attempts,
            elapsed_ms: result.timing.elapsed_ms,
            chars: result.content.chars().count(),
            graduated_endpoint: result.graduated_endpoint,
            discovered_endpoints: result.discovered_endpoints,
            warnings: result.warnings,
            metrics,
            content: show_content.then_some(result.content),
        }
    }
}

impl DisplayFallback for FetchReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("URL: {}", self.final_url),
            format!("Status: {} ({})", self.status, self.kind),
            format!(
                "Served by: {} after {} attempt(s) in {} ms",
                self.provenance, self.attempts, self.elapsed_ms
            ),
            format!("Characters: {}", self.chars),
        ];
        if let Some(endpoint) = &self.graduated_endpoint {
            lines.push(format!("Graduated endpoint: {endpoint}"));
        }
        if !self.discovered_endpoints.is_empty() {
            lines.push(endpoint_lines(&self.discovered_endpoints));
        }
        for warning in &self.warnings {
            lines.push(format!("Warning: {warning}"));
        }
        if let Some(content) = &self.content {
            lines.push(String::new());
            lines.push(content.clone());
        }
        lines.join("\n")
    }
}

fn endpoint_lines(endpoints: &[DiscoveredEndpoint]) -> String {
    let mut lines = vec!["Endpoints:".to_string()];
    for endpoint in endpoints {
        lines.push(format!(
            "  {score:>5.2}  {url} [{content_type}]",
            score = endpoint.score,
            url = endpoint.url,
            content_type = endpoint.content_type.as_deref().unwrap_or("-")
        ));
    }
    lines.join("\n")
}

#[derive(Debug, Serialize)]
pub struct DiscoverReport {
    pub url: String,
    pub endpoints: Vec<DiscoveredEndpoint>,
}

impl DisplayFallback for DiscoverReport {
    fn display(&self) -> String {
        if self.endpoints.is_empty() {
            return format!("No data endpoints observed on {}", self.url);
        }
        endpoint_lines(&self.endpoints)
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RecordReport(pub ValidatedRecord);

impl DisplayFallback for RecordReport {
    fn display(&self) -> String {
        let record = &self.0;
        let series = &record.series;
        let mut lines = vec![format!(
            "{} {} [{:?}]: {} event(s), {} session(s)",
            series.name,
            series.season,
            series.category,
            series.events.len(),
            series.session_count()
        )];
        for event in &series.events {
            let place = event
                .venue
                .circuit
                .as_deref()
                .or(event.venue.city.as_deref())
                .unwrap_or("venue unknown");
            lines.push(format!(
                "  {} .. {}  {} ({})",
                event.start_date, event.end_date, event.name, place
            ));
            for session in &event.sessions {
                let start = session
                    .start
                    .map(|start| start.to_rfc3339())
                    .unwrap_or_else(|| "time TBD".to_string());
                lines.push(format!(
                    "      {:<12} {}  {}",
                    session.session_type.as_str(),
                    start,
                    session.name
                ));
            }
        }
        if let Some(source) = &record.source {
            lines.push(format!(
                "Source: {} via {} at {}",
                source.url,
                source.extraction_method,
                source.retrieved_at.to_rfc3339()
            ));
        }
        for warning in &record.warnings {
            lines.push(format!("Warning: {warning}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct CacheKeyReport {
    pub url: String,
    pub normalized: String,
    pub destination: String,
    pub key: String,
}

impl DisplayFallback for CacheKeyReport {
    fn display(&self) -> String {
        format!(
            "{key}\n  normalized: {normalized}\n  destination: {destination}",
            key = self.key,
            normalized = self.normalized,
            destination = self.destination
        )
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| {
                format!(
                    "[{status}] {name}: {detail}",
                    status = entry.status,
                    name = entry.name,
                    detail = entry.detail
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context_with(config: &str) -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("paddock.toml");
        fs::write(&path, config).unwrap();
        let cli = Cli::try_parse_from([
            "paddockctl",
            "--config",
            path.to_str().unwrap(),
            "health",
        ])
        .unwrap();
        let context = AppContext::new(&cli).unwrap();
        (temp, context)
    }

    #[test]
    fn parses_acquire_arguments() {
        let cli = Cli::try_parse_from([
            "paddockctl",
            "--format",
            "json",
            "acquire",
            "https://www.indycar.com/schedule",
            "--pattern",
            "events",
            "--series",
            "IndyCar",
            "--season",
            "2025",
        ])
        .unwrap();
        match cli.command {
            Commands::Acquire(args) => {
                assert_eq!(args.target.patterns, vec!["events".to_string()]);
                assert_eq!(args.context.season, Some(2025));
                let request = args.target.request().unwrap();
                assert_eq!(request.destination(), "www.indycar.com:443");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn default_patterns_apply() {
        let cli = Cli::try_parse_from(["paddockctl", "discover", "https://example.org/"]).unwrap();
        match cli.command {
            Commands::Discover(args) => assert_eq!(args.patterns, default_patterns()),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cache_key_ignores_param_order() {
        let first = cache_key_report(&CacheKeyArgs {
            url: "https://Example.org:443/calendar/".into(),
            params: vec!["season=2025".into(), "lang=en".into()],
        })
        .unwrap();
        let second = cache_key_report(&CacheKeyArgs {
            url: "https://example.org/calendar".into(),
            params: vec!["lang=en".into(), "season=2025".into()],
        })
        .unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(first.normalized, "https://example.org/calendar");
    }

    #[test]
    fn malformed_cache_param_is_rejected() {
        let err = cache_key_report(&CacheKeyArgs {
            url: "https://example.org/".into(),
            params: vec!["season".into()],
        })
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn health_reports_browser_and_cache() {
        let (temp, context) = context_with(&format!(
            "[browser]\nenabled = true\nexecutable_path = \"/nonexistent/chromium\"\n\n[cache]\ndirectory = \"{}\"\n\n[extraction]\ncredential_env = \"PADDOCKCTL_TEST_UNSET_KEY\"\n",
            "/nonexistent/cache"
        ));
        let report = context.health_check();
        let by_name = |name: &str| report.iter().find(|entry| entry.name == name).unwrap();
        assert!(matches!(by_name("config").status, CheckStatus::Ok));
        assert!(matches!(by_name("browser").status, CheckStatus::Error));
        assert!(matches!(by_name("cache").status, CheckStatus::Warn));
        let extraction = by_name("extraction");
        assert!(matches!(extraction.status, CheckStatus::Error));
        assert!(extraction.detail.contains("PADDOCKCTL_TEST_UNSET_KEY is not set"));
        drop(temp);
    }

    #[test]
    fn extension_picks_content_kind() {
        assert_eq!(kind_from_extension(Path::new("a/calendar.HTML")), ContentKind::Html);
        assert_eq!(kind_from_extension(Path::new("feed.json")), ContentKind::Json);
        assert_eq!(kind_from_extension(Path::new("schedule.pdf.txt")), ContentKind::Text);
    }
}
