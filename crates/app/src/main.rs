use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use course_core::model::{CourseId, LessonIndex, ProgressError, TotalLessonsPolicy, UserId};
use services::{
    AppServices, Clock, LedgerConfig, LessonCompletion, ProgressLedgerError, StaticIdentity,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "course-progress")]
#[command(about = "Track lesson completion across courses")]
struct Args {
    /// SQLite database URL or file path
    #[arg(long = "db", env = "COURSE_DB_URL", default_value = "sqlite://dev.sqlite3", global = true)]
    db_url: String,

    /// Signed-in user
    #[arg(long = "user", env = "COURSE_USER_ID", global = true)]
    user: Option<String>,

    /// Write attempts before giving up on a contended update
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Which lesson total percentages use: `snapshot` or `live`
    #[arg(long, global = true)]
    totals_policy: Option<TotalLessonsPolicy>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the built-in courses into the catalog
    Seed,
    /// Show every course with the user's completion percentage
    Dashboard,
    /// Show one course's lessons and where to resume
    Course { course_id: String },
    /// Mark a lesson (zero-based) complete
    Complete {
        course_id: String,
        #[arg(allow_negative_numbers = true)]
        lesson: i64,
    },
    /// Print the lesson to resume at
    Resume { course_id: String },
}

impl Args {
    fn ledger_config(&self) -> anyhow::Result<LedgerConfig> {
        let base = LedgerConfig::from_env()?;
        if self.max_attempts.is_none() && self.totals_policy.is_none() {
            return Ok(base);
        }
        Ok(LedgerConfig::new(
            self.max_attempts.unwrap_or(base.max_attempts()),
            self.totals_policy.unwrap_or(base.totals_policy()),
        )?)
    }

    fn identity(&self) -> anyhow::Result<StaticIdentity> {
        match &self.user {
            Some(raw) => Ok(StaticIdentity::signed_in(
                UserId::new(raw.as_str()).context("invalid --user")?,
            )),
            None => Ok(StaticIdentity::anonymous()),
        }
    }
}

fn normalize_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_owned();
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = std::path::Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> anyhow::Result<()> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let Some(path) = db_url.strip_prefix("sqlite://") else {
        bail!("invalid --db value: {db_url}");
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        bail!("invalid --db value: {db_url}");
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("creating {}", path.display()))?;
    }
    Ok(())
}

/// Negative positions get the same lesson-reference error as out-of-range ones.
fn lesson_index(course_id: &CourseId, raw: i64) -> Result<LessonIndex, ProgressLedgerError> {
    LessonIndex::try_from(raw).map_err(|_| ProgressLedgerError::InvalidLessonIndex {
        course_id: course_id.clone(),
        source: ProgressError::NegativeLessonIndex { index: raw },
    })
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let db_url = normalize_sqlite_url(&args.db_url);
    prepare_sqlite_file(&db_url)?;
    let config = args.ledger_config()?;
    debug!(db_url = %db_url, max_attempts = config.max_attempts(), policy = %config.totals_policy(), "starting");

    let app = AppServices::new_sqlite(&db_url, Clock::default(), config).await?;

    let identity = args.identity()?;

    match &args.command {
        Command::Seed => {
            let written = app.catalog().seed_defaults().await?;
            println!("seeded {written} courses into {db_url}");
        }
        Command::Dashboard => {
            app.sign_in(&identity).await?;
            let cards = app.views().dashboard(&identity).await?;
            if args.json {
                return print_json(&cards);
            }
            for card in cards {
                println!(
                    "{:<12} {:>3}%  {} ({} lessons)",
                    card.course_id, card.percent, card.title, card.total_lessons
                );
            }
        }
        Command::Course { course_id } => {
            app.sign_in(&identity).await?;
            let course_id = CourseId::new(course_id.as_str())?;
            let page = app.views().course_page(&identity, &course_id).await?;
            if args.json {
                return print_json(&page);
            }
            println!("{} [{}%]", page.title, page.percent);
            for row in &page.lessons {
                let mark = if row.index == page.resume_at { '>' } else { ' ' };
                println!(
                    "{mark} {:>2}. [{}] {}",
                    row.index,
                    row.state.as_str(),
                    row.title
                );
            }
        }
        Command::Complete { course_id, lesson } => {
            let (user_id, _) = app.sign_in(&identity).await?;
            let course_id = CourseId::new(course_id.as_str())?;
            let outcome = app
                .ledger()
                .mark_lesson_complete(&user_id, &course_id, lesson_index(&course_id, *lesson)?)
                .await?;
            if args.json {
                return print_json(&serde_json::json!({
                    "course_id": course_id,
                    "lesson": lesson,
                    "percent": outcome.percent(),
                    "recorded": outcome.wrote(),
                }));
            }
            match outcome {
                LessonCompletion::Recorded { percent } => {
                    println!("lesson {lesson} completed, {course_id} is {percent}% done");
                }
                LessonCompletion::AlreadyCompleted { percent } => {
                    println!("lesson {lesson} was already complete, {course_id} is {percent}% done");
                }
                LessonCompletion::CourseNotFound { prior_percent } => {
                    println!("{course_id} is not in the catalog; progress unchanged ({prior_percent}%)");
                }
            }
        }
        Command::Resume { course_id } => {
            let (user_id, _) = app.sign_in(&identity).await?;
            let course_id = CourseId::new(course_id.as_str())?;
            let at = app.ledger().resume_position(&user_id, &course_id).await?;
            if args.json {
                return print_json(&serde_json::json!({ "course_id": course_id, "resume_at": at }));
            }
            println!("{at}");
        }
    }
    Ok(())
}

/// What to print on stderr: the learner-facing message for ledger failures,
/// the full chain otherwise. Details go to the `debug` log.
fn failure_message(err: &anyhow::Error) -> String {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ProgressLedgerError>())
    {
        Some(ledger_err) => ledger_err.user_message().to_owned(),
        None => format!("{err:#}"),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        debug!(error = ?err, "command failed");
        eprintln!("{}", failure_message(&err));
        std::process::exit(2);
    }
}
