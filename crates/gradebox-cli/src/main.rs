//! Gradebox CLI
//!
//! Grades a submission directory against a project definition in local
//! isolate sandboxes and prints the feedback a viewer would see.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gradebox::feedback::{
    FeedbackCategory, ResolvedFeedbackConfig, UnitFeedback, UnitFeedbackView, first_failed_unit,
};
use gradebox::model::{GradingStatus, Project, Submission, SubmissionId};
use gradebox::{
    Config, Dispatcher, EXAMPLE_CONFIG, IsolateBackend, LogAlertSink, MemoryStore, Pipeline,
    Repositories, RetryPolicy, SandboxFile, SandboxManager, prepare_cgroup,
};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How often a waiting grade command checks the submission's status.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "gradebox")]
#[command(about = "Grade student submissions in isolated sandboxes")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: gradebox.toml)
        #[arg(short, long, default_value = "gradebox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Grade a submission directory against a project
    Grade {
        /// Project definition (TOML)
        #[arg(value_name = "PROJECT")]
        project: PathBuf,

        /// Directory holding the submitted files
        #[arg(value_name = "DIR")]
        submission: PathBuf,

        /// Usernames of the submitting group
        #[arg(short, long, value_delimiter = ',')]
        members: Vec<String>,

        /// Feedback category to render results with
        #[arg(long, value_enum, default_value_t = Category::Normal)]
        category: Category,

        /// Print feedback as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Category {
    Normal,
    UltimateSubmission,
    PastLimitSubmission,
    StaffViewer,
    Max,
}

impl From<Category> for FeedbackCategory {
    fn from(category: Category) -> Self {
        match category {
            Category::Normal => FeedbackCategory::Normal,
            Category::UltimateSubmission => FeedbackCategory::UltimateSubmission,
            Category::PastLimitSubmission => FeedbackCategory::PastLimitSubmission,
            Category::StaffViewer => FeedbackCategory::StaffViewer,
            Category::Max => FeedbackCategory::Max,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Grade {
            project,
            submission,
            members,
            category,
            json,
        } => {
            if config.cgroup {
                match prepare_cgroup(&config.cg_root) {
                    Ok(true) => debug!("cgroup hierarchy ready"),
                    Ok(false) => {
                        warn!(
                            "cgroup support unavailable (memory controller not found), falling back to RLIMIT_AS"
                        );
                        config.cgroup = false;
                    }
                    Err(e) => {
                        warn!(
                            "cgroup setup failed: {e}, falling back to RLIMIT_AS memory limiting"
                        );
                        config.cgroup = false;
                    }
                }
            }
            run_grade(
                Arc::new(config),
                &project,
                &submission,
                members,
                category.into(),
                json,
            )
            .await
        }
    }
}

async fn run_grade(
    config: Arc<Config>,
    project_path: &Path,
    submission_dir: &Path,
    members: Vec<String>,
    category: FeedbackCategory,
    json: bool,
) -> Result<()> {
    let project = Project::from_file(project_path).context("failed to load project")?;
    let project_files = project
        .load_files()
        .context("failed to read project files")?;
    let submitted = read_submission_dir(submission_dir).await?;
    info!(
        project = %project.id,
        units = project.units.len(),
        files = submitted.len(),
        "grading submission"
    );

    let store = Arc::new(MemoryStore::new());
    store.insert_project(&project.id, project.units.clone(), project_files.clone());
    let submission_id = store.create_submission(&project.id, members, submitted);

    let backend = IsolateBackend::new(config.clone()).context("failed to set up sandboxes")?;
    let sandboxes = SandboxManager::new(backend, Arc::new(LogAlertSink));
    let pipeline = Pipeline::new(sandboxes, &config, store.clone());
    let (dispatcher, jobs) = Dispatcher::new(
        Repositories::from_store(store.clone()),
        pipeline,
        RetryPolicy::from_config(&config.grading),
    );
    let dispatcher = Arc::new(dispatcher);
    let _workers = dispatcher.spawn_workers(jobs, config.grading.workers.max(1));
    dispatcher
        .schedule_grading(submission_id)
        .context("failed to queue submission")?;

    let submission = wait_until_graded(&dispatcher, &store, submission_id).await?;
    report(&project, &project_files, &store, &submission, category, json)?;

    if submission.status == GradingStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

/// Every regular file directly inside `dir`, sorted by name.
async fn read_submission_dir(dir: &Path) -> Result<Vec<SandboxFile>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read submission directory '{}'", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let content = tokio::fs::read(entry.path())
            .await
            .with_context(|| format!("failed to read submitted file '{name}'"))?;
        files.push(SandboxFile::new(name, content));
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

async fn wait_until_graded<B>(
    dispatcher: &Dispatcher<B>,
    store: &MemoryStore,
    submission_id: SubmissionId,
) -> Result<Submission>
where
    B: gradebox::SandboxBackend,
{
    loop {
        let submission = store
            .submission(submission_id)
            .context("submission disappeared")?;
        match submission.status {
            status if status.is_terminal() => return Ok(submission),
            GradingStatus::WaitingForDeferred => {
                dispatcher.check_finished_deferred().await?;
            }
            _ => {}
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn report(
    project: &Project,
    project_files: &[SandboxFile],
    store: &MemoryStore,
    submission: &Submission,
    category: FeedbackCategory,
    json: bool,
) -> Result<()> {
    let results: Vec<_> = project
        .units
        .iter()
        .filter_map(|unit| store.result(unit.id, submission.id))
        .collect();
    let first_failed = first_failed_unit(&project.units, &results, project_files);

    let views: Vec<UnitFeedbackView> = project
        .units
        .iter()
        .filter_map(|unit| {
            let resolved = ResolvedFeedbackConfig::for_unit(category, unit, first_failed)?;
            let result = results.iter().find(|result| result.unit_id() == unit.id)?;
            UnitFeedback::new(unit, result, &resolved.config, project_files)
                .map(|feedback| feedback.view())
        })
        .collect();

    if json {
        let output = serde_json::json!({
            "submission_id": submission.id,
            "status": submission.status,
            "basic_score": submission.basic_score,
            "error": submission.error_diagnostic,
            "units": views,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Submission {}: {}", submission.id, submission.status);
    println!("Score: {}", submission.basic_score);
    if let Some(error) = &submission.error_diagnostic {
        println!("Error: {error}");
    }
    for view in &views {
        let (name, points, possible) = match view {
            UnitFeedbackView::TestCase(view) => {
                (&view.name, view.total_points, view.total_points_possible)
            }
            UnitFeedbackView::MutationSuite(view) => {
                (&view.name, view.total_points, view.total_points_possible)
            }
        };
        match (points, possible) {
            (Some(points), Some(possible)) => println!("  {name:<30} {points}/{possible}"),
            _ => println!("  {name}"),
        }
    }
    Ok(())
}

fn show_config(config: &Config) {
    println!("Default resource limits:");
    println!(
        "  Wall time limit: {:?}",
        config.default_limits.wall_time_limit
    );
    println!("  Stack limit: {:?} KB", config.default_limits.stack_limit);
    println!("  Max processes: {:?}", config.default_limits.max_processes);
    println!();
    println!("Isolate binary: {}", config.isolate_binary().display());
    println!(
        "Box pool: {} boxes from id {}",
        config.box_pool.count, config.box_pool.start_id
    );
    println!();
    println!("Default image: {}", config.default_image);
    let mut images: Vec<_> = config.images.keys().collect();
    images.sort();
    for image in images {
        println!("  {image}");
    }
    println!();
    println!("Grading:");
    println!("  Workers: {}", config.grading.workers);
    println!(
        "  Retries: {} ({} ms apart)",
        config.grading.max_retries, config.grading.retry_delay_ms
    );
    println!("  Output ceiling: {} bytes", config.grading.output_ceiling);
}

async fn init_config(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
