use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    courses::CourseCatalog, enrollments::EnrollmentManager, AuthSession, TracingNotifier,
};
use session_store::SessionStore;
use shared::{
    domain::{CourseId, Role, UserId},
    protocol::UserRecord,
};

mod config;

#[derive(Parser, Debug)]
#[command(about = "Command-line client for the course management backend")]
struct Cli {
    /// Overrides the configured backend base url.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Credentials {
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long, default_value = "student")]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new account.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "student")]
        role: Role,
    },
    /// Print the course catalog.
    Courses {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Enroll the logged-in student in a course.
    Enroll {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        course_id: i64,
    },
    /// Remove an enrollment by student and course.
    Unenroll {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        student_id: i64,
        #[arg(long)]
        course_id: i64,
    },
    /// Print the instructor directory (admin login required).
    Instructors {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Drop the persisted session token.
    Logout,
}

/// Picks up a persisted session if one survives revalidation, otherwise
/// logs in with the supplied credentials.
async fn authenticate(
    session: &Arc<AuthSession>,
    credentials: &Credentials,
) -> Result<UserRecord> {
    if let Some(user) = session.restore().await {
        return Ok(user);
    }
    let (Some(email), Some(password)) = (&credentials.email, &credentials.password) else {
        bail!("no stored session; pass --email and --password to log in");
    };
    Ok(session.login(email, password, credentials.role).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();

    let mut settings = config::load_settings();
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    let base_url = url::Url::parse(&settings.server_url)
        .with_context(|| format!("invalid server url '{}'", settings.server_url))?;
    let base_url = base_url.as_str().trim_end_matches('/').to_string();

    let store = Arc::new(SessionStore::new(&settings.session_db).await?);
    store.health_check().await?;
    let session = AuthSession::new(base_url, store);

    match cli.command {
        Command::Register {
            name,
            username,
            email,
            password,
            role,
        } => {
            session
                .register(&name, &username, &email, &password, role)
                .await?;
            println!("Registered {email} as {role}");
        }
        Command::Courses { credentials } => {
            authenticate(&session, &credentials).await?;
            let catalog = CourseCatalog::new(session.clone(), Arc::new(TracingNotifier));
            catalog.fetch_all().await?;
            for course in catalog.courses().await {
                println!("{}", serde_json::to_string(&course)?);
            }
        }
        Command::Enroll {
            credentials,
            course_id,
        } => {
            authenticate(&session, &credentials).await?;
            let manager = EnrollmentManager::new(session.clone(), Arc::new(TracingNotifier));
            manager.fetch_mine().await?;
            manager.enroll(CourseId(course_id)).await?;
            println!("Enrolled in course {course_id}");
        }
        Command::Unenroll {
            credentials,
            student_id,
            course_id,
        } => {
            authenticate(&session, &credentials).await?;
            let manager = EnrollmentManager::new(session.clone(), Arc::new(TracingNotifier));
            manager
                .unenroll(UserId(student_id), CourseId(course_id))
                .await?;
            println!("Unenrolled student {student_id} from course {course_id}");
        }
        Command::Instructors { credentials } => {
            let user = authenticate(&session, &credentials).await?;
            if !user.is_admin() {
                bail!("instructor management requires an admin login");
            }
            for entry in session.list_users().await? {
                if entry.role == Role::Instructor {
                    println!("{}", serde_json::to_string(&entry)?);
                }
            }
        }
        Command::Logout => {
            session.logout().await;
            println!("Logged out");
        }
    }

    Ok(())
}
