use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

mod aggregate;
mod api;
mod cache;
mod commands;
mod config;
mod directory;
mod error;
mod export;
mod filter;
mod live;
mod models;
mod qr;
mod rewards;
mod session;

use commands::{Dimension, RewardAction, TaskAction, TimetableAction};
use config::AppConfig;
use filter::{LecturerFilter, StudentFilter};
use models::{Goal, RescheduleStatus, Reward, Task, TimetableSlot};

#[derive(Parser)]
#[command(name = "attendance-insights")]
#[command(
    about = "Attendance analytics and engagement console for the attendance backend",
    long_about = None
)]
struct Cli {
    /// Base URL of the REST backend
    #[arg(long, global = true, env = "ATTENDANCE_API_URL", default_value = config::DEFAULT_API_URL)]
    api_url: String,
    /// Persisted auth store holding the bearer token and profile
    #[arg(
        long,
        global = true,
        env = "ATTENDANCE_AUTH_STORAGE",
        default_value = config::DEFAULT_AUTH_STORAGE
    )]
    auth_storage: PathBuf,
    #[arg(long, global = true, env = "ATTENDANCE_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
    #[arg(long, global = true, default_value_t = config::DEFAULT_PAGE_SIZE)]
    page_size: usize,
    /// Key used to sign and check QR attendance codes
    #[arg(long, global = true, env = "ATTENDANCE_QR_SECRET", hide_env_values = true)]
    qr_secret: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Institution-wide summary with the main breakdowns
    Dashboard,
    /// Attendance rate grouped by one dimension
    Breakdown {
        #[arg(long, value_enum)]
        by: Dimension,
    },
    /// Search, filter and page through students
    Students {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
        year: Option<u8>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Write every matching row to CSV instead of printing a page
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Search, filter and page through lecturers
    Lecturers {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Export the dashboard summary as CSV
    ExportSummary {
        #[arg(long, default_value = "attendance-summary.csv")]
        out: PathBuf,
    },
    /// Generate a markdown attendance report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        /// Students below this rate are listed as lowest attendance
        #[arg(long, default_value_t = 75)]
        threshold: u32,
        /// Limit the report to one department's students and lecturers
        #[arg(long)]
        department: Option<String>,
    },
    /// Attendance detail and reward progress for one student
    Student {
        /// Defaults to the signed-in user
        id: Option<String>,
    },
    /// Units, rates and pending requests for one lecturer
    Lecturer {
        id: Option<String>,
    },
    /// Re-print the live summary on a fixed interval until Ctrl-C
    Watch {
        #[arg(long, default_value_t = config::DEFAULT_POLL_SECS)]
        every_secs: u64,
    },
    /// Milestone reward configuration
    Rewards {
        #[arg(long)]
        institution: Option<String>,
        #[command(subcommand)]
        action: RewardCommand,
    },
    /// Lecturer QR attendance sessions
    Qr {
        #[command(subcommand)]
        action: QrCommand,
    },
    Tasks {
        #[command(subcommand)]
        action: Option<TaskCommand>,
    },
    Goals {
        #[command(subcommand)]
        action: Option<GoalCommand>,
    },
    Timetable {
        #[command(subcommand)]
        action: Option<TimetableCommand>,
    },
    /// Review lecturer reschedule requests
    #[command(group(
        ArgGroup::new("decision")
            .args(["approve", "reject"])
            .multiple(false)
    ))]
    Reschedule {
        #[arg(long)]
        approve: Option<String>,
        #[arg(long)]
        reject: Option<String>,
        #[arg(long)]
        pending: bool,
    },
    /// Backend-generated reports for a student
    Reports {
        student: Option<String>,
    },
    /// Ask the study assistant
    Chat {
        message: String,
    },
    /// Refresh and show the signed-in profile
    Whoami,
}

#[derive(Subcommand)]
enum RewardCommand {
    List,
    Add {
        #[arg(long)]
        milestone: u32,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Edit {
        index: usize,
        #[arg(long)]
        milestone: u32,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Delete {
        index: usize,
    },
}

#[derive(Subcommand)]
enum QrCommand {
    /// Start a session for a unit and hold it open until it expires
    Start {
        #[arg(long)]
        unit: String,
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value_t = config::DEFAULT_QR_TTL_MINUTES)]
        ttl_minutes: i64,
    },
    /// Check a scanned code for a student
    Verify {
        #[arg(long)]
        token: String,
        #[arg(long)]
        student: String,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    Add {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        due: Option<chrono::NaiveDate>,
        #[arg(long)]
        priority: Option<String>,
    },
    Done {
        id: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum GoalCommand {
    Add {
        title: String,
        #[arg(long)]
        target: u32,
    },
}

#[derive(Subcommand)]
enum TimetableCommand {
    Add {
        #[arg(long)]
        class: String,
        #[arg(long)]
        unit: String,
        #[arg(long)]
        day: String,
        #[arg(long)]
        start: String,
        #[arg(long, default_value = "")]
        end: String,
        #[arg(long)]
        period: Option<u32>,
        #[arg(long)]
        room: Option<String>,
    },
    Delete {
        id: String,
    },
    /// Upload a timetable CSV for server-side import
    Upload {
        csv: PathBuf,
    },
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let mut config = AppConfig::default()
        .with_api_url(cli.api_url)
        .with_timeout_secs(cli.timeout_secs);
    config.auth_storage = cli.auth_storage;
    config.page_size = cli.page_size.max(1);
    config.qr_secret = cli.qr_secret;

    let mut session = session::Session::load(&config.auth_storage)
        .context("failed to load session")?;
    let client = api::ApiClient::new(&config, &session).context("failed to build API client")?;

    let result = run(cli.command, &client, &mut session, config).await;
    if let Err(err) = &result {
        error!(error = %format!("{err:#}"), "command failed");
    }
    result
}

async fn run(
    command: Commands,
    client: &api::ApiClient,
    session: &mut session::Session,
    mut config: AppConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::Dashboard => commands::dashboard(client).await,
        Commands::Breakdown { by } => commands::breakdown(client, by).await,
        Commands::Students {
            search,
            program,
            department,
            year,
            gender,
            status,
            page,
            export,
        } => {
            let filter = StudentFilter {
                search,
                program,
                department,
                year,
                gender,
                status,
            };
            commands::students(client, &config, &filter, page, export.as_deref()).await
        }
        Commands::Lecturers {
            search,
            department,
            status,
            page,
            export,
        } => {
            let filter = LecturerFilter {
                search,
                department,
                status,
            };
            commands::lecturers(client, &config, &filter, page, export.as_deref()).await
        }
        Commands::ExportSummary { out } => commands::export_summary(client, &out).await,
        Commands::Report {
            out,
            threshold,
            department,
        } => commands::report(client, &out, threshold, department.as_deref()).await,
        Commands::Student { id } => commands::student(client, session, id.as_deref()).await,
        Commands::Lecturer { id } => commands::lecturer(client, session, id.as_deref()).await,
        Commands::Watch { every_secs } => {
            config.poll_interval = std::time::Duration::from_secs(every_secs.max(1));
            commands::live_summary(client, &config).await
        }
        Commands::Rewards {
            institution,
            action,
        } => {
            let action = match action {
                RewardCommand::List => RewardAction::List,
                RewardCommand::Add {
                    milestone,
                    name,
                    description,
                } => RewardAction::Add(Reward {
                    milestone,
                    reward: name,
                    description,
                }),
                RewardCommand::Edit {
                    index,
                    milestone,
                    name,
                    description,
                } => RewardAction::Edit(
                    index,
                    Reward {
                        milestone,
                        reward: name,
                        description,
                    },
                ),
                RewardCommand::Delete { index } => RewardAction::Delete(index),
            };
            commands::manage_rewards(client, session, institution.as_deref(), action).await
        }
        Commands::Qr { action } => match action {
            QrCommand::Start {
                unit,
                class,
                ttl_minutes,
            } => {
                commands::qr_start(client, session, &config, &unit, class.as_deref(), ttl_minutes)
                    .await
            }
            QrCommand::Verify { token, student } => {
                commands::qr_verify(client, &config, &token, &student).await
            }
        },
        Commands::Tasks { action } => {
            let action = match action {
                None => TaskAction::List,
                Some(TaskCommand::Add {
                    title,
                    description,
                    due,
                    priority,
                }) => TaskAction::Add(Task {
                    id: None,
                    title,
                    description,
                    due_date: due,
                    priority,
                    completed: false,
                }),
                Some(TaskCommand::Done { id }) => TaskAction::Done(id),
                Some(TaskCommand::Delete { id }) => TaskAction::Delete(id),
            };
            commands::tasks(client, action).await
        }
        Commands::Goals { action } => {
            let goal = action.map(|GoalCommand::Add { title, target }| Goal {
                id: None,
                title,
                target,
                progress: 0,
            });
            commands::goals(client, goal).await
        }
        Commands::Timetable { action } => {
            let action = match action {
                None => TimetableAction::List,
                Some(TimetableCommand::Add {
                    class,
                    unit,
                    day,
                    start,
                    end,
                    period,
                    room,
                }) => TimetableAction::Add(TimetableSlot {
                    id: None,
                    class_id: class,
                    day,
                    period,
                    start_time: start,
                    end_time: end,
                    unit_id: unit,
                    room,
                }),
                Some(TimetableCommand::Delete { id }) => TimetableAction::Delete(id),
                Some(TimetableCommand::Upload { csv }) => TimetableAction::Upload(csv),
            };
            commands::timetable(client, action).await
        }
        Commands::Reschedule {
            approve,
            reject,
            pending,
        } => {
            let decision = approve
                .map(|id| (id, RescheduleStatus::Approved))
                .or_else(|| reject.map(|id| (id, RescheduleStatus::Rejected)));
            commands::reschedule(client, decision, pending).await
        }
        Commands::Reports { student } => {
            commands::reports(client, session, student.as_deref()).await
        }
        Commands::Chat { message } => commands::chat(client, &message).await,
        Commands::Whoami => commands::whoami(client, session).await,
    }
}
