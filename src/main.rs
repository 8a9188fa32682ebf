use certpress::archive::{ArchiveSink, DirectorySink, InlineSink};
use certpress::audit::{AuditSink, JsonlFileSink};
use certpress::config::{self, AppConfig};
use certpress::fields::FieldSet;
use certpress::imaging::SvgBackend;
use certpress::output;
use certpress::pipeline::{BatchPipeline, SingleRequest, SingleRequestPipeline};
use certpress::store::{DirStore, TemplateStore, fields_or_empty};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "certpress")]
#[command(about = "Stamp names and courses onto certificate templates")]
#[command(long_about = "\
Stamp names and courses onto certificate templates

A template is a PNG or JPEG plus up to three named boxes:

  person-name   the recipient
  course        the course title
  record-id     the certificate identifier (PREFIX-YYYYMMDD-xxxxxxxx)

Text in each box is wrapped on word boundaries and shrunk until it fits.

Typical session:

  certpress template add blank.png           # prints tpl_3f2a9c01b7de
  certpress template fields tpl_3f2a9c01b7de fields.json
  certpress generate --template tpl_3f2a9c01b7de --person \"Ann Lee\" --course Go
  certpress batch --template tpl_3f2a9c01b7de people.csv --out certificates/

CSV input needs a person column (fio, name, full_name, person) and a course
column (courses, course). Several courses in one cell are separated by ','
or '|'; each yields its own certificate sharing the row's identifier.

Run 'certpress gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file = defaults)
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Template store directory (overrides [store] root)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage stored templates
    #[command(subcommand)]
    Template(TemplateCommand),
    /// Render certificates for one person
    Generate(GenerateArgs),
    /// Render certificates for every row of a CSV file into one zip
    Batch(BatchArgs),
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Store a PNG or JPEG template and print its id
    Add { image: PathBuf },
    /// Replace a template's fields from a JSON file: {"fields": [...]}
    Fields { id: String, fields: PathBuf },
    /// Show a template's type, version and fields
    Show { id: String },
}

#[derive(clap::Args)]
struct GenerateArgs {
    #[arg(long)]
    template: String,
    #[arg(long, alias = "name")]
    person: String,
    /// Course title, repeatable
    #[arg(long = "course", required = true)]
    courses: Vec<String>,
    /// Identifier prefix (overrides [batch] prefix)
    #[arg(long)]
    prefix: Option<String>,
    /// Directory for the rendered files
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(clap::Args)]
struct BatchArgs {
    #[arg(long)]
    template: String,
    /// CSV file with a header row
    csv: PathBuf,
    /// Identifier prefix (overrides [batch] prefix)
    #[arg(long)]
    prefix: Option<String>,
    /// Directory receiving batch_<millis>.zip
    #[arg(long, default_value = ".", conflicts_with = "zip")]
    out: PathBuf,
    /// Write the archive to exactly this path instead
    #[arg(long)]
    zip: Option<PathBuf>,
    /// Print the JSON response (count, log, zipBase64) instead of writing a file
    #[arg(long, conflicts_with_all = ["zip"])]
    inline: bool,
    /// Read the CSV in chunks instead of loading it whole
    #[arg(long)]
    stream: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "certpress=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let app_config = config::load_config(&cli.config)?;
    let store_root = cli
        .store
        .clone()
        .unwrap_or_else(|| app_config.store.root.clone());
    let store = DirStore::new(store_root);

    match cli.command {
        Command::Template(command) => run_template(command, &store)?,
        Command::Generate(args) => run_generate(args, &store, &app_config)?,
        Command::Batch(args) => run_batch(args, &store, &app_config)?,
        Command::GenConfig => {}
    }

    Ok(())
}

fn run_template(
    command: TemplateCommand,
    store: &DirStore,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        TemplateCommand::Add { image } => {
            let bytes = fs::read(&image)?;
            let id = store.put(&bytes)?;
            println!("{}", id);
        }
        TemplateCommand::Fields { id, fields } => {
            let set = FieldSet::from_json(&fs::read_to_string(&fields)?)?;
            store.save_fields(&id, set.fields)?;
            show_template(store, &id)?;
        }
        TemplateCommand::Show { id } => show_template(store, &id)?,
    }
    Ok(())
}

fn show_template(store: &DirStore, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let asset = store.get(id)?;
    let fields = fields_or_empty(store, id)?;
    output::print_template(id, asset.mime.as_str(), &asset.version(), &fields);
    Ok(())
}

fn run_generate(
    args: GenerateArgs,
    store: &DirStore,
    app_config: &AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = build_backend(app_config)?;
    let audit_sinks = audit_sinks(app_config, store, &args.template);

    let mut pipeline = SingleRequestPipeline::new(&backend, store)
        .with_settings(app_config.render.settings());
    for sink in &audit_sinks {
        pipeline = pipeline.with_audit_sink(sink as &dyn AuditSink);
    }

    let request = SingleRequest {
        template_id: args.template,
        person: args.person,
        courses: args.courses,
        prefix: args.prefix.unwrap_or_else(|| app_config.batch.prefix.clone()),
    };
    let outcome = pipeline.run(&request)?;

    fs::create_dir_all(&args.out)?;
    for (name, bytes) in &outcome.files {
        fs::write(args.out.join(name), bytes)?;
    }
    output::print_single_output(&outcome, &args.out);
    Ok(())
}

fn run_batch(
    args: BatchArgs,
    store: &DirStore,
    app_config: &AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = build_backend(app_config)?;
    let audit_sinks = audit_sinks(app_config, store, &args.template);
    let sink: Box<dyn ArchiveSink> = if args.inline {
        Box::new(InlineSink)
    } else if let Some(path) = &args.zip {
        Box::new(DirectorySink::to_file(path))
    } else {
        Box::new(DirectorySink::new(&args.out))
    };
    let prefix = args
        .prefix
        .clone()
        .unwrap_or_else(|| app_config.batch.prefix.clone());

    let (tx, rx) = std::sync::mpsc::channel();
    let quiet = args.inline;
    let printer = std::thread::spawn(move || {
        for event in rx {
            if quiet {
                continue;
            }
            for line in output::format_batch_event(&event) {
                println!("{}", line);
            }
        }
    });

    let result = {
        let mut pipeline = BatchPipeline::new(&backend, store, sink.as_ref())
            .with_settings(app_config.render.settings())
            .with_workers(config::effective_threads(&app_config.batch))
            .with_chunk_size(app_config.batch.chunk_size)
            .with_events(tx);
        for audit in &audit_sinks {
            pipeline = pipeline.with_audit_sink(audit as &dyn AuditSink);
        }
        let input = fs::File::open(&args.csv)?;
        if args.stream {
            pipeline.run_csv(std::io::BufReader::new(input), &args.template, &prefix)
        } else {
            let rows = certpress::records::read_rows(input)?;
            pipeline.run(&rows, &args.template, &prefix)
        }
    };
    // The pipeline (and its sender) is gone, so the printer drains and exits.
    let _ = printer.join();

    let outcome = result?;
    if args.inline {
        println!("{}", serde_json::to_string_pretty(&output::batch_response_json(&outcome))?);
    } else {
        output::print_delivery(&outcome.delivery);
    }
    Ok(())
}

fn build_backend(app_config: &AppConfig) -> Result<SvgBackend, Box<dyn std::error::Error>> {
    let render = &app_config.render;
    Ok(SvgBackend::new(
        &render.font_files,
        render.system_fonts,
        render.quality(),
    )?)
}

/// The shared log from `[audit] log_file` plus, when enabled, the template's own log.
fn audit_sinks(app_config: &AppConfig, store: &DirStore, template_id: &str) -> Vec<JsonlFileSink> {
    let mut sinks = Vec::new();
    if let Some(path) = app_config.audit.log_path() {
        sinks.push(JsonlFileSink::new(path));
    }
    if app_config.audit.per_template_log
        && let Ok(path) = store.log_path(template_id)
        && path.parent().and_then(Path::parent).is_some_and(Path::is_dir)
    {
        sinks.push(JsonlFileSink::new(path));
    }
    sinks
}
