use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use oncoflow_core::merger::parse_event_date;
use oncoflow_core::*;
use oncoflow_memory::{JsonFileBackend, PatientStore};
use oncoflow_provider::{CompletionService, GeminiClient};
use oncoflow_schema::{EventKind, Patient, PatientId, TimelineEvent};

#[derive(Parser)]
#[command(name = "oncoflow", version, about = "Oncology clinical history digitizer")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.oncoflow",
        help = "Root directory (contains config.yaml, data/ and logs/)"
    )]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Import a clinical history PDF")]
    Import { file: PathBuf },
    #[command(about = "List patients, newest import first")]
    List {
        #[arg(long, help = "Only patients whose name contains this text")]
        search: Option<String>,
    },
    #[command(about = "Show a patient record with its timeline")]
    Show { id: PatientId },
    #[command(about = "Append a timeline event to a patient")]
    AddEvent {
        id: PatientId,
        #[arg(long, help = "Event date, e.g. 2024-05-20")]
        date: String,
        #[arg(long = "type", help = "Consulta, Quimioterapia, Imágenes, Cirugía or free text")]
        kind: String,
        #[arg(long, default_value = "")]
        note: String,
    },
    #[command(about = "Delete a patient record")]
    Delete { id: PatientId },
    #[command(about = "Audit a case against oncology guidelines")]
    Audit { id: PatientId },
    #[command(about = "Write a formal chronological summary")]
    Summary { id: PatientId },
    #[command(about = "Validate config.yaml")]
    Validate,
}

struct App {
    config: OncoflowConfig,
    store: Arc<PatientStore>,
    merger: Arc<RecordMerger>,
    client: Arc<dyn CompletionService>,
}

impl App {
    async fn open(root: &Path) -> Result<Self> {
        let config = load_config(root)?;
        let data_dir = config.data_dir(root);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir: {}", data_dir.display()))?;

        let backend = Arc::new(JsonFileBackend::new(&data_dir));
        let store = Arc::new(
            PatientStore::open(backend)
                .await
                .context("failed to open patient store")?,
        );
        tracing::debug!(
            data_dir = %data_dir.display(),
            patients = store.len(),
            "patient store opened"
        );
        let merger = Arc::new(RecordMerger::new(Arc::clone(&store)));
        let client: Arc<dyn CompletionService> = Arc::new(GeminiClient::from_config(&config.provider));

        Ok(Self {
            config,
            store,
            merger,
            client,
        })
    }

    fn pipeline(&self) -> ImportPipeline {
        ImportPipeline::new(
            Arc::new(DocumentTextExtractor::lopdf()),
            Arc::clone(&self.client),
            Arc::clone(&self.merger),
            self.config.import_options(),
        )
    }

    fn consultant(&self) -> Consultant {
        Consultant::new(Arc::clone(&self.client), self.config.import.retry)
    }

    fn patient(&self, id: PatientId) -> Result<Patient> {
        self.store
            .get(id)
            .ok_or_else(|| anyhow!("patient not found: {id}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    cli.root = expand_home(&cli.root);

    let log_dir = cli.root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "oncoflow.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    run(&cli.root, command).await
}

async fn run(root: &Path, command: Commands) -> Result<()> {
    if let Commands::Validate = command {
        let config = load_config(root)?;
        println!(
            "Config valid. model: {}, data dir: {}, credential: {}.",
            config.provider.model,
            config.data_dir(root).display(),
            if config.provider.has_credential() {
                "configured"
            } else {
                "missing"
            }
        );
        return Ok(());
    }

    let app = App::open(root).await?;
    match command {
        Commands::Import { file } => {
            let bytes = read_pdf(&file).await?;
            tracing::info!(file = %file.display(), bytes = bytes.len(), "importing document");
            let patient = app.pipeline().import(bytes).await.map_err(with_remedy)?;
            println!(
                "Imported {} ({}): {}, {} events.",
                patient.display_name(),
                patient.id,
                patient.display_diagnosis(),
                patient.timeline.len()
            );
        }
        Commands::List { search } => {
            let patients = match search.as_deref() {
                Some(query) => app.store.search(query),
                None => app.store.snapshot().to_vec(),
            };
            print!("{}", render_list(&patients));
        }
        Commands::Show { id } => {
            print!("{}", render_patient(&app.patient(id)?));
        }
        Commands::AddEvent {
            id,
            date,
            kind,
            note,
        } => {
            let date = parse_event_date(&date).ok_or_else(|| anyhow!("unrecognized date: {date}"))?;
            let event = TimelineEvent::new(date, EventKind::parse_label(&kind), note.trim());
            let patient = app
                .merger
                .append_event(id, event)
                .await
                .map_err(with_remedy)?;
            println!(
                "Added event to {}. Last visit: {}.",
                patient.display_name(),
                patient.last_visit
            );
        }
        Commands::Delete { id } => {
            if app.store.delete(id).await? {
                tracing::info!(patient_id = id, "patient deleted");
                println!("Deleted patient {id}.");
            } else {
                println!("No patient with id {id}.");
            }
        }
        Commands::Audit { id } => {
            let patient = app.patient(id)?;
            println!("{}", app.consultant().consult(&patient, ConsultationMode::Audit).await);
        }
        Commands::Summary { id } => {
            let patient = app.patient(id)?;
            println!("{}", app.consultant().consult(&patient, ConsultationMode::Summary).await);
        }
        Commands::Validate => {}
    }
    Ok(())
}

fn expand_home(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(path.strip_prefix("~").unwrap_or(path));
        }
    }
    path.to_path_buf()
}

async fn read_pdf(path: &Path) -> Result<Vec<u8>> {
    let is_pdf_name = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf_name {
        bail!("only PDF files can be imported: {}", path.display());
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    if !looks_like_pdf(&bytes) {
        bail!("file is not a PDF document: {}", path.display());
    }
    Ok(bytes)
}

fn with_remedy(err: PipelineError) -> anyhow::Error {
    let remedy = err.remedy();
    anyhow::Error::new(err).context(format!("hint: {remedy}"))
}

fn render_list(patients: &[Patient]) -> String {
    if patients.is_empty() {
        return "No patients.\n".to_string();
    }
    let mut out = format!(
        "{:<15} {:<30} {:<35} {:<10}\n{}\n",
        "ID",
        "NAME",
        "DIAGNOSIS",
        "LAST VISIT",
        "-".repeat(92)
    );
    for p in patients {
        out.push_str(&format!(
            "{:<15} {:<30} {:<35} {:<10}\n",
            p.id,
            p.display_name(),
            p.display_diagnosis(),
            p.last_visit
        ));
    }
    out
}

fn render_patient(patient: &Patient) -> String {
    let mut out = format!(
        "Patient: {} ({})\nDiagnosis: {}\n",
        patient.display_name(),
        patient.id,
        patient.display_diagnosis()
    );
    if let Some(stage) = &patient.stage {
        out.push_str(&format!("Stage: {stage}\n"));
    }
    out.push_str(&format!("Last visit: {}\n", patient.last_visit));
    if !patient.clinical_notes.is_empty() {
        out.push_str(&format!("Notes: {}\n", patient.clinical_notes));
    }
    out.push_str(&format!("Timeline ({} events):\n", patient.timeline.len()));
    for event in &patient.timeline {
        out.push_str(&format!("  {}  {:<15} {}\n", event.date, event.kind, event.note));
    }
    out
}
